//! agentflow-compiler: the compiler facade.
//!
//! [`Compiler`] ties the pieces together:
//!
//! 1. read the root text and its imports into a [`SourceSet`]
//!    (the only I/O, through the configured [`SourceProvider`]),
//! 2. hash the set with the output-affecting configuration,
//! 3. on a cache miss, parse, analyze and generate in memory.
//!
//! `validate` runs the same checks as `compile` without generating code,
//! so both report the same diagnostics for the same input.

pub mod cache;
pub mod clock;
pub mod config;
pub mod hash;
pub mod imports;
mod pipeline;
pub mod result;

pub use cache::{CacheStats, CompilationCache};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{CompilerConfig, ConfigError};
pub use hash::ContentHash;
pub use imports::{SourceFile, SourceSet};
pub use result::{CompilationResult, EmittedFiles, ExitStatus, ReportStats, ValidationReport};

use agentflow_analyze::UnitStats;
use agentflow_core::{Diagnostic, FileSystemProvider, SourceProvider};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

#[derive(Debug, thiserror::Error)]
pub enum CompileFailure {
    #[error("compilation failed with {} error(s)", count_errors(.0))]
    Diagnostics(Vec<Diagnostic>),
    #[error("cannot read '{}': {source}", path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

fn count_errors(diags: &[Diagnostic]) -> usize {
    diags.iter().filter(|d| d.is_error()).count()
}

impl CompileFailure {
    /// Diagnostics of a failed compilation; empty for I/O failures.
    pub fn diagnostics(&self) -> &[Diagnostic] {
        match self {
            CompileFailure::Diagnostics(diags) => diags,
            CompileFailure::Io { .. } => &[],
        }
    }

    pub fn exit_status(&self) -> ExitStatus {
        match self {
            CompileFailure::Diagnostics(_) => ExitStatus::Invalid,
            CompileFailure::Io { .. } => ExitStatus::FileError,
        }
    }
}

pub struct Compiler {
    config: CompilerConfig,
    provider: Arc<dyn SourceProvider>,
    cache: Arc<CompilationCache>,
}

impl Compiler {
    /// Filesystem sources, wall-clock cache sized from `config`.
    pub fn new(config: CompilerConfig) -> Self {
        let cache = Arc::new(CompilationCache::new(
            config.cache_capacity,
            Arc::new(SystemClock),
        ));
        Compiler {
            config,
            provider: Arc::new(FileSystemProvider),
            cache,
        }
    }

    pub fn with_provider(mut self, provider: Arc<dyn SourceProvider>) -> Self {
        self.provider = provider;
        self
    }

    /// Use a shared or pre-built cache instead of the one from `new`.
    pub fn with_cache(mut self, cache: Arc<CompilationCache>) -> Self {
        self.cache = cache;
        self
    }

    pub fn config(&self) -> &CompilerConfig {
        &self.config
    }

    pub fn cache(&self) -> &CompilationCache {
        &self.cache
    }

    /// Compile `source` (identified as `file_id`) to a Python module.
    /// Imports are resolved relative to `file_id`.
    pub fn compile(
        &self,
        source: &str,
        file_id: &str,
    ) -> Result<Arc<CompilationResult>, CompileFailure> {
        let set = SourceSet::collect(file_id, source, self.provider.as_ref())
            .map_err(CompileFailure::Diagnostics)?;
        let hash = ContentHash::compute(&set, &self.config.fingerprint());
        let outcome = self
            .cache
            .get_or_compile(&hash, || pipeline::compile_set(&set, &self.config));
        match &outcome {
            Ok(result) => tracing::debug!(
                file = file_id,
                %hash,
                warnings = result.warnings.len(),
                "compiled"
            ),
            Err(diags) => tracing::debug!(
                file = file_id,
                %hash,
                errors = count_errors(diags),
                "compilation failed"
            ),
        }
        outcome.map_err(CompileFailure::Diagnostics)
    }

    /// Check `source` without generating code.
    pub fn validate(&self, source: &str, file_id: &str) -> ValidationReport {
        let wae = self.config.warnings_as_errors;
        let set = match SourceSet::collect(file_id, source, self.provider.as_ref()) {
            Ok(set) => set,
            Err(diags) => return ValidationReport::new(file_id, diags, ReportStats::default(), wae),
        };
        let hash = ContentHash::compute(&set, &self.config.fingerprint());
        if let Some(cached) = self.cache.get(&hash) {
            tracing::debug!(file = file_id, %hash, "validated from cache");
            return ValidationReport::new(file_id, cached.warnings.clone(), cached.stats.into(), wae);
        }
        let unit = match pipeline::front_end(&set, self.config.parse_strategy) {
            Ok(unit) => unit,
            Err(diags) => return ValidationReport::new(file_id, diags, ReportStats::default(), wae),
        };
        let diags = pipeline::check(&unit);
        let report = ValidationReport::new(file_id, diags, UnitStats::of(&unit).into(), wae);
        tracing::debug!(file = file_id, valid = report.valid, "validated");
        report
    }

    /// Read `path` through the provider and compile it.
    pub fn compile_path(&self, path: &Path) -> Result<Arc<CompilationResult>, CompileFailure> {
        let source = self.read(path)?;
        self.compile(&source, &path.to_string_lossy())
    }

    pub fn validate_path(&self, path: &Path) -> Result<ValidationReport, CompileFailure> {
        let source = self.read(path)?;
        Ok(self.validate(&source, &path.to_string_lossy()))
    }

    /// Compile independent files on scoped worker threads. Results are in
    /// the order of `paths`.
    pub fn compile_many(
        &self,
        paths: &[PathBuf],
    ) -> Vec<Result<Arc<CompilationResult>, CompileFailure>> {
        let workers = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1)
            .min(paths.len());
        let next = AtomicUsize::new(0);
        let mut done: Vec<(usize, Result<Arc<CompilationResult>, CompileFailure>)> =
            std::thread::scope(|s| {
                let handles: Vec<_> = (0..workers)
                    .map(|_| {
                        s.spawn(|| {
                            let mut out = Vec::new();
                            loop {
                                let i = next.fetch_add(1, Ordering::SeqCst);
                                let Some(path) = paths.get(i) else { break };
                                out.push((i, self.compile_path(path)));
                            }
                            out
                        })
                    })
                    .collect();
                handles
                    .into_iter()
                    .flat_map(|h| match h.join() {
                        Ok(out) => out,
                        Err(panic) => std::panic::resume_unwind(panic),
                    })
                    .collect()
            });
        done.sort_by_key(|(i, _)| *i);
        done.into_iter().map(|(_, r)| r).collect()
    }

    fn read(&self, path: &Path) -> Result<String, CompileFailure> {
        self.provider
            .read_source(path)
            .map_err(|source| CompileFailure::Io {
                path: path.to_path_buf(),
                source,
            })
    }
}

impl Default for Compiler {
    fn default() -> Self {
        Compiler::new(CompilerConfig::default())
    }
}
