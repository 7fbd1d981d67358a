//! agentflow-analyze: semantic analysis over a [`CompilationUnit`].
//!
//! The analyzer is read-only over the AST. Each pass is a separate module
//! that appends to a shared diagnostics list; all passes always run, so one
//! call surfaces every semantic error in the unit. The passes run in this
//! order:
//!
//! 1. [`globals`]: global namespace, duplicate definitions
//! 2. [`resolve`]: references from declarations and statements
//! 3. [`order`]: variable definition order inside flows and handlers
//! 4. [`cycles`]: circular references between agents, flows and prompts
//! 5. [`checks`]: structural policy checks and required properties

pub mod checks;
pub mod cycles;
pub mod globals;
pub mod order;
pub mod resolve;
pub mod scope;
pub mod suggest;

use agentflow_core::ast::CompilationUnit;
use agentflow_core::Diagnostic;
use serde::Serialize;

pub use globals::{GlobalDef, Globals};
pub use scope::{Binding, BindingKind, ScopeStack};

/// Counts of what a unit declares, reported with every successful check.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct UnitStats {
    pub models: usize,
    pub tools: usize,
    pub schemas: usize,
    pub prompts: usize,
    pub agents: usize,
    pub flows: usize,
    pub handlers: usize,
}

impl UnitStats {
    pub fn of(unit: &CompilationUnit) -> Self {
        use agentflow_core::ast::Declaration as D;
        let mut stats = UnitStats::default();
        for decl in &unit.declarations {
            match decl {
                D::Model(_) => stats.models += 1,
                D::Tool(_) => stats.tools += 1,
                D::Schema(_) => stats.schemas += 1,
                D::Prompt(_) => stats.prompts += 1,
                D::Agent(_) => stats.agents += 1,
                D::Flow(_) => stats.flows += 1,
                D::Handler(_) => stats.handlers += 1,
                D::Policy(_) | D::Retry(_) | D::Timeout(_) => {}
            }
        }
        stats
    }
}

/// Run every pass and return the diagnostics in pass order.
pub fn analyze(unit: &CompilationUnit) -> Vec<Diagnostic> {
    let mut diags = Vec::new();

    let globals = globals::collect(unit, &mut diags);
    resolve::check_references(unit, &globals, &mut diags);
    order::check_definition_order(unit, &globals, &mut diags);
    cycles::check_cycles(unit, &globals, &mut diags);
    checks::check_structure(unit, &mut diags);

    tracing::debug!(
        file = %unit.file,
        declarations = unit.declarations.len(),
        errors = diags.iter().filter(|d| d.is_error()).count(),
        warnings = diags.iter().filter(|d| !d.is_error()).count(),
        "analyzed"
    );
    diags
}

/// True if any diagnostic blocks code generation.
pub fn has_errors(diags: &[Diagnostic]) -> bool {
    diags.iter().any(Diagnostic::is_error)
}
