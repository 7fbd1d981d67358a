//! Pass 5: structural checks.
//!
//! - W0002: an agent with both `delegate` and `use`
//! - W0001: a `loop` without `max` and no way out
//! - E0009: guardrail statements outside an event handler
//! - E0010: missing required properties

use agentflow_core::ast::{
    find_property, AgentDef, CompilationUnit, Declaration, ModelDef, OnEscalate, Stmt, ToolDef,
    ToolKind,
};
use agentflow_core::{Code, Diagnostic};

pub fn check_structure(unit: &CompilationUnit, diags: &mut Vec<Diagnostic>) {
    for decl in &unit.declarations {
        let file = decl.prov().file.as_str();
        match decl {
            Declaration::Agent(a) => agent(file, a, diags),
            Declaration::Model(m) => model(file, m, diags),
            Declaration::Tool(t) => tool(file, t, diags),
            Declaration::Flow(f) => {
                unbounded_loops(file, &f.body, diags);
                guardrails_outside_handler(file, &f.body, diags);
            }
            Declaration::Handler(h) => unbounded_loops(file, &h.body, diags),
            _ => {}
        }
    }
}

fn agent(file: &str, a: &AgentDef, diags: &mut Vec<Diagnostic>) {
    if a.instruction().is_none() {
        diags.push(missing(file, a.name.span, "agent", &a.name.name, "instruction"));
    }
    if let (Some(delegate), Some(used)) = (a.delegates().next(), a.uses().next()) {
        diags.push(
            Diagnostic::new(
                Code::DelegateAndUse,
                file,
                Some(a.name.span),
                format!("agent `{}` has both `delegate` and `use`", a.name.name),
            )
            .with_label(file, delegate.span, "delegates here")
            .with_label(file, used.span, "uses an agent as a tool here")
            .with_help("delegated agents take over the conversation; pick one style"),
        );
    }
}

/// The long form must name the provider and model.
fn model(file: &str, m: &ModelDef, diags: &mut Vec<Diagnostic>) {
    if m.properties.is_empty() {
        return;
    }
    for key in ["provider", "name"] {
        if find_property(&m.properties, key).is_none() {
            diags.push(missing(file, m.name.span, "model", &m.name.name, key));
        }
    }
}

fn tool(file: &str, t: &ToolDef, diags: &mut Vec<Diagnostic>) {
    if t.kind.is_some() {
        return;
    }
    match find_property(&t.properties, "type") {
        None => diags.push(missing(file, t.name.span, "tool", &t.name.name, "type")),
        Some(prop) => diags.push(
            Diagnostic::new(
                Code::TypeMismatch,
                file,
                Some(prop.value.span()),
                format!("tool `{}` has an unknown type", t.name.name),
            )
            .with_help(format!(
                "expected one of: {}",
                [ToolKind::Builtin, ToolKind::Mcp, ToolKind::Http]
                    .map(ToolKind::as_str)
                    .join(", ")
            )),
        ),
    }
}

fn missing(
    file: &str,
    span: agentflow_core::Span,
    kind: &str,
    name: &str,
    prop: &str,
) -> Diagnostic {
    Diagnostic::new(
        Code::MissingRequiredProperty,
        file,
        Some(span),
        format!("{} `{}` is missing required property `{}`", kind, name, prop),
    )
}

fn unbounded_loops(file: &str, stmts: &[Stmt], diags: &mut Vec<Diagnostic>) {
    for stmt in stmts {
        if let Stmt::Loop { max: None, body, span } = stmt {
            if !has_exit(body) {
                diags.push(
                    Diagnostic::new(
                        Code::UnboundedLoop,
                        file,
                        Some(*span),
                        "loop has no `max` bound and no reachable exit",
                    )
                    .with_help("add `max N` or a `return`/`escalate` inside the loop"),
                );
            }
        }
        for_each_body(stmt, |body| unbounded_loops(file, body, diags));
    }
}

/// True if some path through `stmts` leaves the enclosing loop.
fn has_exit(stmts: &[Stmt]) -> bool {
    stmts.iter().any(|stmt| match stmt {
        Stmt::Return { .. } | Stmt::Escalate { .. } => true,
        Stmt::Run {
            on_escalate: Some(OnEscalate::Return { .. } | OnEscalate::Abort),
            ..
        } => true,
        _ => {
            let mut found = false;
            for_each_body(stmt, |body| found |= has_exit(body));
            found
        }
    })
}

fn guardrails_outside_handler(file: &str, stmts: &[Stmt], diags: &mut Vec<Diagnostic>) {
    for stmt in stmts {
        if let Stmt::Guardrail { span, .. } = stmt {
            diags.push(
                Diagnostic::new(
                    Code::InvalidGuardrailContext,
                    file,
                    Some(*span),
                    format!("`{}` is only allowed inside an event handler", stmt.describe()),
                )
                .with_help("move this guardrail into an `on ... do` or `after ... do` handler"),
            );
        }
        for_each_body(stmt, |body| guardrails_outside_handler(file, body, diags));
    }
}

/// Call `f` on every statement list nested directly inside `stmt`.
fn for_each_body(stmt: &Stmt, mut f: impl FnMut(&[Stmt])) {
    match stmt {
        Stmt::ForLoop { body, .. } | Stmt::Parallel { body, .. } | Stmt::Loop { body, .. } => {
            f(body)
        }
        Stmt::If {
            then_body,
            else_body,
            ..
        } => {
            f(then_body);
            if let Some(body) = else_body {
                f(body);
            }
        }
        Stmt::Match { arms, default, .. } => {
            for arm in arms {
                f(&arm.body);
            }
            if let Some(body) = default {
                f(body);
            }
        }
        _ => {}
    }
}
