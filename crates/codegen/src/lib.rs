//! agentflow-codegen: Python code generation for analyzed agentflow units.
//!
//! [`generate`] turns a [`CompilationUnit`] that passed semantic analysis
//! into one Python module plus a [`SourceMap`] from generated lines back to
//! agentflow positions. The module targets an external runtime package
//! (`agentflow_runtime` by default) that provides `Workflow` and
//! `Escalation`.
//!
//! Generation can still fail before a line is written: `parallel do` blocks
//! may only hold agent runs (E0012), and distinct names must not collapse
//! into one Python method or parameter name (E0003).

mod expr;
mod flow;
mod python;
mod restrict;
mod shell;
mod source_map;
mod writer;

pub use python::class_name;
pub use restrict::{check_parallel_blocks, check_python_names, check_restrictions};
pub use shell::expand_template;
pub use source_map::{SourceLocation, SourceMap};

use agentflow_core::ast::{CompilationUnit, DeclKind, Declaration};
use agentflow_core::Diagnostic;
use serde::{Deserialize, Serialize};
use shell::ShellEmitter;
use std::collections::HashMap;
use writer::CodeWriter;

/// Output-affecting knobs. Part of the compilation cache key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(default)]
pub struct CodegenOptions {
    /// Python module the generated code imports `Workflow` from.
    pub runtime_module: String,
    /// Appended to the CamelCase file stem to name the workflow class.
    pub class_suffix: String,
}

impl Default for CodegenOptions {
    fn default() -> Self {
        CodegenOptions {
            runtime_module: "agentflow_runtime".to_owned(),
            class_suffix: "Workflow".to_owned(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GeneratedModule {
    pub source: String,
    pub source_map: SourceMap,
    pub class_name: String,
}

/// Kind of each globally named declaration. Handlers have no global name.
/// When a name is declared twice the first declaration wins; analysis
/// has already reported the duplicate.
pub(crate) fn decl_kinds(unit: &CompilationUnit) -> HashMap<String, DeclKind> {
    let mut kinds = HashMap::new();
    for decl in &unit.declarations {
        if matches!(decl, Declaration::Handler(_)) {
            continue;
        }
        kinds
            .entry(decl.name().name.clone())
            .or_insert_with(|| decl.kind());
    }
    kinds
}

/// Generate the Python module for `unit`.
///
/// The unit is expected to be free of analysis errors; generation does not
/// re-check references.
pub fn generate(
    unit: &CompilationUnit,
    options: &CodegenOptions,
) -> Result<GeneratedModule, Vec<Diagnostic>> {
    let rejected = check_restrictions(unit);
    if !rejected.is_empty() {
        tracing::debug!(
            file = %unit.file,
            count = rejected.len(),
            "python target restriction failed"
        );
        return Err(rejected);
    }

    let kinds = decl_kinds(unit);
    let class = class_name(&unit.file, &options.class_suffix);
    let mut emitter = ShellEmitter {
        unit,
        options,
        kinds: &kinds,
        w: CodeWriter::new(),
    };
    emitter.emit_module(&class);
    let lines = emitter.w.line_count();
    let (source, source_map) = emitter.w.finish();
    tracing::debug!(
        file = %unit.file,
        class = %class,
        lines,
        mapped = source_map.len(),
        "generated python module"
    );
    Ok(GeneratedModule {
        source,
        source_map,
        class_name: class,
    })
}
