//! What the facade hands back: compiled modules, validation reports and
//! the exit-status mapping for command-line callers.

use agentflow_analyze::UnitStats;
use agentflow_codegen::SourceMap;
use agentflow_core::{Diagnostic, Severity};
use serde::Serialize;
use std::io;
use std::path::{Path, PathBuf};

/// A successful compilation. Immutable once built; shared through the
/// cache as `Arc<CompilationResult>`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompilationResult {
    pub file: String,
    pub class_name: String,
    /// Generated Python module.
    pub source: String,
    pub source_map: SourceMap,
    /// Non-blocking diagnostics.
    pub warnings: Vec<Diagnostic>,
    pub stats: UnitStats,
}

/// Paths written by [`CompilationResult::write_to`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmittedFiles {
    pub module: PathBuf,
    pub source_map: PathBuf,
}

impl CompilationResult {
    /// Write `<stem>.py` and `<stem>.py.map.json` into `dir`.
    pub fn write_to(&self, dir: &Path) -> io::Result<EmittedFiles> {
        let stem = Path::new(&self.file)
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("module");
        let module = dir.join(format!("{}.py", stem));
        let source_map = dir.join(format!("{}.py.map.json", stem));
        std::fs::write(&module, &self.source)?;
        let map_json = serde_json::to_string_pretty(&self.source_map).map_err(io::Error::other)?;
        std::fs::write(&source_map, map_json)?;
        tracing::debug!(module = %module.display(), "wrote generated module");
        Ok(EmittedFiles { module, source_map })
    }
}

/// Declaration counts in a validation report.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReportStats {
    pub models: usize,
    pub agents: usize,
    pub flows: usize,
    pub handlers: usize,
}

impl From<UnitStats> for ReportStats {
    fn from(s: UnitStats) -> Self {
        ReportStats {
            models: s.models,
            agents: s.agents,
            flows: s.flows,
            handlers: s.handlers,
        }
    }
}

/// Outcome of `validate`. Serializes to the tooling JSON shape
/// `{file, valid, errors, warnings, stats}`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValidationReport {
    pub file: String,
    pub valid: bool,
    #[serde(serialize_with = "diagnostics_json")]
    pub errors: Vec<Diagnostic>,
    #[serde(serialize_with = "diagnostics_json")]
    pub warnings: Vec<Diagnostic>,
    pub stats: ReportStats,
}

fn diagnostics_json<S: serde::Serializer>(
    diags: &[Diagnostic],
    serializer: S,
) -> Result<S::Ok, S::Error> {
    serializer.collect_seq(diags.iter().map(Diagnostic::to_json_value))
}

impl ValidationReport {
    /// Split `diags` into errors and warnings. With `warnings_as_errors`
    /// every warning also makes the report invalid.
    pub fn new(
        file: &str,
        diags: Vec<Diagnostic>,
        stats: ReportStats,
        warnings_as_errors: bool,
    ) -> Self {
        let (warnings, errors): (Vec<Diagnostic>, Vec<Diagnostic>) = diags
            .into_iter()
            .partition(|d| d.severity == Severity::Warning);
        let valid = errors.is_empty() && !(warnings_as_errors && !warnings.is_empty());
        ValidationReport {
            file: file.to_owned(),
            valid,
            errors,
            warnings,
            stats,
        }
    }

    /// Every diagnostic, errors first.
    pub fn diagnostics(&self) -> impl Iterator<Item = &Diagnostic> {
        self.errors.iter().chain(&self.warnings)
    }

    /// One-line summary: `valid (1 model, 1 agent)` or
    /// `invalid (2 errors, 1 warning)`.
    pub fn summary(&self) -> String {
        if self.valid {
            let s = &self.stats;
            let parts: Vec<String> = [
                (s.models, "model"),
                (s.agents, "agent"),
                (s.flows, "flow"),
                (s.handlers, "handler"),
            ]
            .iter()
            .filter(|(n, _)| *n > 0)
            .map(|(n, what)| count(*n, what))
            .collect();
            if parts.is_empty() {
                "valid".to_owned()
            } else {
                format!("valid ({})", parts.join(", "))
            }
        } else {
            let mut parts = Vec::new();
            if !self.errors.is_empty() {
                parts.push(count(self.errors.len(), "error"));
            }
            if !self.warnings.is_empty() {
                parts.push(count(self.warnings.len(), "warning"));
            }
            format!("invalid ({})", parts.join(", "))
        }
    }

    pub fn exit_status(&self) -> ExitStatus {
        if self.valid {
            ExitStatus::Valid
        } else {
            ExitStatus::Invalid
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}

fn count(n: usize, what: &str) -> String {
    if n == 1 {
        format!("1 {}", what)
    } else {
        format!("{} {}s", n, what)
    }
}

/// Process exit status owed to command-line callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitStatus {
    /// Everything valid.
    Valid,
    /// Diagnostics with errors.
    Invalid,
    /// A file could not be read.
    FileError,
}

impl ExitStatus {
    pub fn code(self) -> i32 {
        match self {
            ExitStatus::Valid => 0,
            ExitStatus::Invalid => 1,
            ExitStatus::FileError => 2,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agentflow_core::{Code, Span};

    fn diag(code: Code) -> Diagnostic {
        Diagnostic::new(code, "t.af", Some(Span::point(3, 5)), "msg")
    }

    #[test]
    fn summary_lists_nonzero_counts() {
        let report = ValidationReport::new(
            "t.af",
            vec![],
            ReportStats {
                models: 1,
                agents: 1,
                flows: 0,
                handlers: 0,
            },
            false,
        );
        assert_eq!(report.summary(), "valid (1 model, 1 agent)");
        assert_eq!(report.exit_status().code(), 0);
    }

    #[test]
    fn warnings_do_not_invalidate_unless_promoted() {
        let diags = vec![diag(Code::DelegateAndUse), diag(Code::UnboundedLoop)];
        let report = ValidationReport::new("t.af", diags.clone(), ReportStats::default(), false);
        assert!(report.valid);
        assert_eq!(report.warnings.len(), 2);
        assert_eq!(report.summary(), "valid");
        let strict = ValidationReport::new("t.af", diags, ReportStats::default(), true);
        assert!(!strict.valid);
        assert_eq!(strict.summary(), "invalid (2 warnings)");
        assert_eq!(strict.exit_status(), ExitStatus::Invalid);
    }

    #[test]
    fn json_shape() {
        let report = ValidationReport::new(
            "t.af",
            vec![diag(Code::UndefinedReference), diag(Code::UnboundedLoop)],
            ReportStats::default(),
            false,
        );
        let json = report.to_json();
        assert_eq!(json["valid"], false);
        assert_eq!(json["errors"][0]["code"], "E0001");
        assert_eq!(json["errors"][0]["line"], 3);
        assert_eq!(json["warnings"][0]["severity"], "warning");
        assert_eq!(json["stats"]["handlers"], 0);
        assert_eq!(report.summary(), "invalid (1 error, 1 warning)");
    }

    #[test]
    fn write_to_emits_module_and_map() {
        let dir = tempfile::tempdir().unwrap();
        let result = CompilationResult {
            file: "flows/support_bot.af".into(),
            class_name: "SupportBotWorkflow".into(),
            source: "x = 1\n".into(),
            source_map: SourceMap::new(),
            warnings: vec![],
            stats: UnitStats::default(),
        };
        let files = result.write_to(dir.path()).unwrap();
        assert_eq!(files.module, dir.path().join("support_bot.py"));
        assert_eq!(std::fs::read_to_string(&files.module).unwrap(), "x = 1\n");
        assert!(files.source_map.exists());
    }
}
