//! Where source text comes from.
//!
//! The compiler pipeline never touches the filesystem itself. The facade
//! reads the root file and every imported file through a [`SourceProvider`]
//! before compiling, so the same pipeline runs against disk
//! ([`FileSystemProvider`]) or an in-memory map ([`InMemoryProvider`]).

use std::collections::HashMap;
use std::io;
use std::path::{Component, Path, PathBuf};

/// File access used by import resolution.
pub trait SourceProvider: Send + Sync {
    /// Read the full text of `path`.
    fn read_source(&self, path: &Path) -> io::Result<String>;

    /// Resolve an `import "..."` string written in `importer`. Imports are
    /// relative to the importing file's directory.
    fn resolve_import(&self, importer: &Path, import: &str) -> io::Result<PathBuf>;

    /// Stable identity of a file, used to detect import cycles.
    fn canonicalize(&self, path: &Path) -> io::Result<PathBuf>;
}

/// Reads from the local filesystem.
#[derive(Debug, Default, Clone, Copy)]
pub struct FileSystemProvider;

impl SourceProvider for FileSystemProvider {
    fn read_source(&self, path: &Path) -> io::Result<String> {
        std::fs::read_to_string(path)
    }

    fn resolve_import(&self, importer: &Path, import: &str) -> io::Result<PathBuf> {
        let base = importer.parent().unwrap_or_else(|| Path::new(""));
        Ok(base.join(import))
    }

    fn canonicalize(&self, path: &Path) -> io::Result<PathBuf> {
        path.canonicalize()
    }
}

/// Path → text map; paths are normalized lexically so `a/../b.af` and
/// `b.af` name the same entry.
#[derive(Debug, Default, Clone)]
pub struct InMemoryProvider {
    files: HashMap<PathBuf, String>,
}

impl InMemoryProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_file(mut self, path: impl AsRef<Path>, text: impl Into<String>) -> Self {
        self.insert(path, text);
        self
    }

    pub fn insert(&mut self, path: impl AsRef<Path>, text: impl Into<String>) {
        self.files.insert(normalize(path.as_ref()), text.into());
    }
}

impl<P: AsRef<Path>, S: Into<String>> FromIterator<(P, S)> for InMemoryProvider {
    fn from_iter<I: IntoIterator<Item = (P, S)>>(iter: I) -> Self {
        let mut provider = InMemoryProvider::new();
        for (path, text) in iter {
            provider.insert(path, text);
        }
        provider
    }
}

impl SourceProvider for InMemoryProvider {
    fn read_source(&self, path: &Path) -> io::Result<String> {
        let key = normalize(path);
        self.files.get(&key).cloned().ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::NotFound,
                format!("no such file: {}", key.display()),
            )
        })
    }

    fn resolve_import(&self, importer: &Path, import: &str) -> io::Result<PathBuf> {
        let base = importer.parent().unwrap_or_else(|| Path::new(""));
        Ok(normalize(&base.join(import)))
    }

    fn canonicalize(&self, path: &Path) -> io::Result<PathBuf> {
        let key = normalize(path);
        if self.files.contains_key(&key) {
            Ok(key)
        } else {
            Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("no such file: {}", key.display()),
            ))
        }
    }
}

/// Resolve `.` and `..` without touching the filesystem.
fn normalize(path: &Path) -> PathBuf {
    let mut parts: Vec<Component<'_>> = Vec::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => match parts.last() {
                Some(Component::Normal(_)) => {
                    parts.pop();
                }
                Some(Component::RootDir) | Some(Component::Prefix(_)) => {}
                _ => parts.push(component),
            },
            other => parts.push(other),
        }
    }
    parts.iter().collect()
}
