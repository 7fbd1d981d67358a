//! Constructs the Python target cannot express faithfully.
//!
//! `parallel do` runs its statements with `asyncio.gather`, which only
//! makes sense for independent agent runs. Any other statement inside the
//! block is E0012; it is never downgraded to sequential execution.
//!
//! Flow methods, handler methods and flow parameters are named after their
//! agentflow names. Two distinct names that map to one Python name would
//! make the later definition silently replace the earlier one, so that is
//! reported as E0003.

use crate::python::py_name;
use crate::shell::handler_method;
use agentflow_core::ast::{CompilationUnit, DeclKind, Declaration, RunKind, Stmt};
use agentflow_core::{Code, Diagnostic, Span};
use std::collections::HashMap;

/// Every construct the generator refuses to emit.
pub fn check_restrictions(unit: &CompilationUnit) -> Vec<Diagnostic> {
    let mut diags = check_parallel_blocks(unit);
    diags.extend(check_python_names(unit));
    diags
}

pub fn check_parallel_blocks(unit: &CompilationUnit) -> Vec<Diagnostic> {
    let kinds = crate::decl_kinds(unit);
    let mut diags = Vec::new();
    for decl in &unit.declarations {
        let (file, body) = match decl {
            Declaration::Flow(f) => (&f.prov.file, &f.body),
            Declaration::Handler(h) => (&h.prov.file, &h.body),
            _ => continue,
        };
        walk(file, body, &kinds, &mut diags);
    }
    diags
}

fn walk(file: &str, stmts: &[Stmt], kinds: &HashMap<String, DeclKind>, diags: &mut Vec<Diagnostic>) {
    for stmt in stmts {
        match stmt {
            Stmt::Parallel { body, .. } => {
                for inner in body {
                    if let Some(problem) = parallel_problem(inner, kinds) {
                        diags.push(
                            Diagnostic::new(
                                Code::InvalidParallelStatement,
                                file,
                                Some(inner.span()),
                                format!("{} is not allowed in a parallel block", problem),
                            )
                            .with_help("a parallel block may only contain `run agent` statements"),
                        );
                    }
                }
            }
            Stmt::ForLoop { body, .. } | Stmt::Loop { body, .. } => walk(file, body, kinds, diags),
            Stmt::If {
                then_body,
                else_body,
                ..
            } => {
                walk(file, then_body, kinds, diags);
                if let Some(body) = else_body {
                    walk(file, body, kinds, diags);
                }
            }
            Stmt::Match { arms, default, .. } => {
                for arm in arms {
                    walk(file, &arm.body, kinds, diags);
                }
                if let Some(body) = default {
                    walk(file, body, kinds, diags);
                }
            }
            _ => {}
        }
    }
}

/// An agentflow name that claims a Python name.
struct Claim<'u> {
    name: String,
    file: &'u str,
    span: Span,
}

/// Python names already claimed in one scope (the class, or one
/// signature).
#[derive(Default)]
struct PyScope<'u> {
    claims: HashMap<String, Claim<'u>>,
}

impl<'u> PyScope<'u> {
    fn claim(&mut self, what: &str, py: String, claim: Claim<'u>, diags: &mut Vec<Diagnostic>) {
        match self.claims.get(&py) {
            // Identical agentflow names are duplicates the analyzer reports.
            Some(first) if first.name == claim.name => {}
            Some(first) => diags.push(
                Diagnostic::new(
                    Code::DuplicateDefinition,
                    claim.file,
                    Some(claim.span),
                    format!(
                        "{} `{}` and `{}` both compile to the Python name `{}`",
                        what, claim.name, first.name, py
                    ),
                )
                .with_label(first.file, first.span, "first defined here")
                .with_help("rename one of them"),
            ),
            None => {
                self.claims.insert(py, claim);
            }
        }
    }
}

pub fn check_python_names(unit: &CompilationUnit) -> Vec<Diagnostic> {
    let mut diags = Vec::new();
    let mut class = PyScope::default();
    for decl in &unit.declarations {
        match decl {
            Declaration::Flow(f) => {
                let file = f.prov.file.as_str();
                let method = format!("flow_{}", py_name(&f.name.name));
                let claim = Claim {
                    name: f.name.name.clone(),
                    file,
                    span: f.name.span,
                };
                class.claim("flow", method, claim, &mut diags);

                let mut signature = PyScope::default();
                for p in &f.params {
                    let claim = Claim {
                        name: p.name.clone(),
                        file,
                        span: p.span,
                    };
                    signature.claim("parameter", format!("p_{}", py_name(&p.name)), claim, &mut diags);
                }
            }
            Declaration::Handler(h) => {
                let claim = Claim {
                    name: format!("{} {}", h.timing.as_str(), h.event.name),
                    file: h.prov.file.as_str(),
                    span: h.event.span,
                };
                class.claim("handler", handler_method(h), claim, &mut diags);
            }
            _ => {}
        }
    }
    diags
}

/// What is wrong with `stmt` as a member of a parallel block, if anything.
fn parallel_problem(stmt: &Stmt, kinds: &HashMap<String, DeclKind>) -> Option<String> {
    match stmt {
        Stmt::Run {
            kind,
            callee,
            on_escalate,
            ..
        } => {
            let runs_flow = match kind {
                RunKind::Agent => false,
                RunKind::Flow => true,
                RunKind::Unspecified => kinds.get(&callee.name) == Some(&DeclKind::Flow),
            };
            if runs_flow {
                Some("`run flow`".to_owned())
            } else if on_escalate.is_some() {
                Some("`on escalate`".to_owned())
            } else {
                None
            }
        }
        other => Some(format!("`{}`", other.describe())),
    }
}
