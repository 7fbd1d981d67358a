//! Import resolution.
//!
//! Before anything is compiled, the root text and every file it imports
//! (transitively) are read through a [`SourceProvider`] into a
//! [`SourceSet`]. The pipeline then works on the set alone, and the set is
//! what the cache key is computed from.
//!
//! Imports are found with a token-level scan for top-level
//! `import "path"` lines. A file that does not lex has no imports as far as
//! this scan is concerned; the pipeline reports its lexical error.

use agentflow_core::lexer::{self, TokenKind};
use agentflow_core::{Code, Diagnostic, SourceProvider, Span};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceFile {
    pub id: String,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceSet {
    pub root: SourceFile,
    /// Imported files, dependencies before the files that import them.
    pub imports: Vec<SourceFile>,
}

impl SourceSet {
    /// A root with no imports.
    pub fn single(id: &str, text: &str) -> Self {
        SourceSet {
            root: SourceFile {
                id: id.to_owned(),
                text: text.to_owned(),
            },
            imports: Vec::new(),
        }
    }

    /// Read every file `root_text` imports, transitively. Missing files
    /// are E0005 and cycles are E0006; all such problems are collected
    /// before giving up.
    pub fn collect(
        root_id: &str,
        root_text: &str,
        provider: &dyn SourceProvider,
    ) -> Result<SourceSet, Vec<Diagnostic>> {
        let root_path = Path::new(root_id);
        let root_canon = provider
            .canonicalize(root_path)
            .unwrap_or_else(|_| root_path.to_path_buf());
        let mut loader = Loader {
            provider,
            stack: Vec::new(),
            visited: HashSet::new(),
            loaded: Vec::new(),
            diags: Vec::new(),
        };
        loader.visit(root_id, root_canon, root_text);
        if !loader.diags.is_empty() {
            return Err(loader.diags);
        }
        tracing::debug!(root = root_id, imports = loader.loaded.len(), "collected sources");
        Ok(SourceSet {
            root: SourceFile {
                id: root_id.to_owned(),
                text: root_text.to_owned(),
            },
            imports: loader.loaded,
        })
    }
}

struct Loader<'p> {
    provider: &'p dyn SourceProvider,
    /// Files currently being visited, outermost first.
    stack: Vec<(PathBuf, String)>,
    visited: HashSet<PathBuf>,
    loaded: Vec<SourceFile>,
    diags: Vec<Diagnostic>,
}

impl Loader<'_> {
    fn visit(&mut self, id: &str, canon: PathBuf, text: &str) {
        self.stack.push((canon.clone(), id.to_owned()));
        for (import, span) in scan_imports(text, id) {
            self.import(id, &import, span);
        }
        self.stack.pop();
        self.visited.insert(canon);
    }

    fn import(&mut self, importer: &str, import: &str, span: Span) {
        let resolved = self
            .provider
            .resolve_import(Path::new(importer), import)
            .and_then(|path| {
                let canon = self.provider.canonicalize(&path)?;
                Ok((path, canon))
            });
        let (path, canon) = match resolved {
            Ok(found) => found,
            Err(e) => {
                self.diags.push(
                    Diagnostic::new(
                        Code::ImportNotFound,
                        importer,
                        Some(span),
                        format!("import not found: \"{}\"", import),
                    )
                    .with_help(format!(
                        "imports are resolved relative to the importing file ({})",
                        e
                    )),
                );
                return;
            }
        };

        if let Some(pos) = self.stack.iter().position(|(c, _)| *c == canon) {
            let mut chain: Vec<&str> = self.stack[pos..].iter().map(|(_, id)| id.as_str()).collect();
            chain.push(&self.stack[pos].1);
            let message = format!("circular import: {}", chain.join(" -> "));
            self.diags.push(
                Diagnostic::new(Code::CircularImport, importer, Some(span), message)
                    .with_help("move the shared declarations into a file both can import"),
            );
            return;
        }
        if self.visited.contains(&canon) {
            return;
        }

        let text = match self.provider.read_source(&path) {
            Ok(text) => text,
            Err(e) => {
                self.diags.push(Diagnostic::new(
                    Code::ImportNotFound,
                    importer,
                    Some(span),
                    format!("cannot read import \"{}\": {}", import, e),
                ));
                return;
            }
        };
        let id = canon.to_string_lossy().into_owned();
        tracing::trace!(importer, import, resolved = %id, "loading import");
        self.visit(&id, canon, &text);
        self.loaded.push(SourceFile { id, text });
    }
}

/// `(path, span)` of every top-level `import "path"` line.
fn scan_imports(text: &str, file: &str) -> Vec<(String, Span)> {
    let Ok(tokens) = lexer::tokenize(text, file) else {
        return Vec::new();
    };
    let mut out = Vec::new();
    let mut depth = 0usize;
    let mut line_start = true;
    for (i, token) in tokens.iter().enumerate() {
        match token.kind {
            TokenKind::Indent => depth += 1,
            TokenKind::Dedent => depth = depth.saturating_sub(1),
            _ => {}
        }
        if depth == 0 && line_start && token.is_word("import") {
            if let Some(path) = tokens.get(i + 1).filter(|t| t.kind == TokenKind::Str) {
                out.push((path.text.clone(), token.span.to(path.span)));
            }
        }
        line_start = matches!(
            token.kind,
            TokenKind::Newline | TokenKind::Indent | TokenKind::Dedent
        );
    }
    out
}
