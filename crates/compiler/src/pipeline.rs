//! The in-memory pipeline: parse every file of a source set, merge,
//! analyze, generate. No I/O happens here.

use crate::config::CompilerConfig;
use crate::imports::SourceSet;
use crate::result::CompilationResult;
use agentflow_analyze::{analyze, UnitStats};
use agentflow_codegen::{check_restrictions, generate};
use agentflow_core::{parse_unit, CompilationUnit, Diagnostic, ParseStrategy, Severity};

/// Parse the root and its imports into one unit. Imported declarations
/// come first and keep their own file provenance. Each file that fails to
/// lex or parse contributes its one fatal diagnostic.
pub(crate) fn front_end(
    set: &SourceSet,
    strategy: ParseStrategy,
) -> Result<CompilationUnit, Vec<Diagnostic>> {
    let mut fatal = Vec::new();
    let mut declarations = Vec::new();
    for file in &set.imports {
        match parse_unit(&file.text, &file.id, strategy) {
            Ok(unit) => declarations.extend(unit.declarations),
            Err(diag) => fatal.push(diag),
        }
    }
    let root = parse_unit(&set.root.text, &set.root.id, strategy);
    let mut unit = match root {
        Ok(unit) if fatal.is_empty() => unit,
        Ok(_) => return Err(fatal),
        Err(diag) => {
            fatal.insert(0, diag);
            return Err(fatal);
        }
    };
    declarations.append(&mut unit.declarations);
    unit.declarations = declarations;
    Ok(unit)
}

/// Every semantic diagnostic for `unit`, including the restrictions the
/// generator enforces.
pub(crate) fn check(unit: &CompilationUnit) -> Vec<Diagnostic> {
    let mut diags = analyze(unit);
    diags.extend(check_restrictions(unit));
    diags
}

pub(crate) fn blocks(diags: &[Diagnostic], warnings_as_errors: bool) -> bool {
    diags
        .iter()
        .any(|d| d.is_error() || (warnings_as_errors && d.severity == Severity::Warning))
}

pub(crate) fn compile_set(
    set: &SourceSet,
    config: &CompilerConfig,
) -> Result<CompilationResult, Vec<Diagnostic>> {
    let unit = front_end(set, config.parse_strategy)?;
    let diags = check(&unit);
    if blocks(&diags, config.warnings_as_errors) {
        return Err(diags);
    }
    let module = generate(&unit, &config.codegen)?;
    Ok(CompilationResult {
        file: set.root.id.clone(),
        class_name: module.class_name,
        source: module.source,
        source_map: module.source_map,
        warnings: diags,
        stats: UnitStats::of(&unit),
    })
}
