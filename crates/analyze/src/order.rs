//! Pass 3: variables must be assigned before they are read.
//!
//! Bodies are walked in textual order. Assignments with an empty path bind
//! the variable; assignments to `$x.field` and `push ... to $x` read `$x`.
//! A read that finds no local binding falls back to the global namespace,
//! so passing a declared name as a value is accepted. A name that is only
//! assigned later in the body is E0002, anything else is E0001. Each name is
//! reported once per body.

use crate::globals::Globals;
use crate::scope::{Binding, BindingKind, ScopeStack};
use crate::suggest::did_you_mean;
use agentflow_core::ast::{
    CompilationUnit, Declaration, Expr, Guardrail, OnEscalate, Stmt, Target, FLOW_BUILTINS,
    HANDLER_BUILTINS,
};
use agentflow_core::{Code, Diagnostic, Span};
use std::collections::{HashMap, HashSet};

pub fn check_definition_order(
    unit: &CompilationUnit,
    globals: &Globals,
    diags: &mut Vec<Diagnostic>,
) {
    for decl in &unit.declarations {
        match decl {
            Declaration::Flow(f) => {
                let mut scopes = ScopeStack::new(&FLOW_BUILTINS);
                for param in &f.params {
                    scopes.bind_local(
                        &param.name,
                        Binding {
                            kind: BindingKind::Param,
                            span: Some(param.span),
                        },
                    );
                }
                BodyChecker::new(globals, &f.prov.file, scopes, &f.body).run(&f.body, diags);
            }
            Declaration::Handler(h) => {
                let scopes = ScopeStack::new(&HANDLER_BUILTINS);
                BodyChecker::new(globals, &h.prov.file, scopes, &h.body).run(&h.body, diags);
            }
            _ => {}
        }
    }
}

struct BodyChecker<'a> {
    globals: &'a Globals,
    file: &'a str,
    scopes: ScopeStack,
    /// First assignment of each variable anywhere in the body.
    assigned: HashMap<&'a str, Span>,
    reported: HashSet<String>,
    out: Vec<Diagnostic>,
}

impl<'a> BodyChecker<'a> {
    fn new(globals: &'a Globals, file: &'a str, scopes: ScopeStack, body: &'a [Stmt]) -> Self {
        let mut assigned = HashMap::new();
        collect_assignments(body, &mut assigned);
        BodyChecker {
            globals,
            file,
            scopes,
            assigned,
            reported: HashSet::new(),
            out: Vec::new(),
        }
    }

    fn run(mut self, body: &[Stmt], diags: &mut Vec<Diagnostic>) {
        self.block(body);
        diags.append(&mut self.out);
    }

    fn block(&mut self, stmts: &[Stmt]) {
        for stmt in stmts {
            self.stmt(stmt);
        }
    }

    fn stmt(&mut self, stmt: &Stmt) {
        match stmt {
            Stmt::Assignment { target, value, .. } => {
                self.expr(value);
                self.write(target);
            }
            Stmt::Run {
                target,
                args,
                on_escalate,
                ..
            } => {
                args.iter().for_each(|a| self.expr(a));
                if let Some(OnEscalate::Return { value: Some(v) }) = on_escalate {
                    self.expr(v);
                }
                if let Some(t) = target {
                    self.write(t);
                }
            }
            Stmt::Call { target, args, .. } => {
                args.iter().for_each(|a| self.expr(a));
                if let Some(t) = target {
                    self.write(t);
                }
            }
            Stmt::ForLoop {
                var,
                iterable,
                body,
                ..
            } => {
                self.expr(iterable);
                self.scopes.push();
                self.scopes.bind_local(
                    &var.name,
                    Binding {
                        kind: BindingKind::LoopVar,
                        span: Some(var.span),
                    },
                );
                self.block(body);
                self.scopes.pop();
            }
            Stmt::Parallel { body, .. } | Stmt::Loop { body, .. } => self.block(body),
            Stmt::If {
                condition,
                then_body,
                else_body,
                ..
            } => {
                self.expr(condition);
                self.block(then_body);
                if let Some(body) = else_body {
                    self.block(body);
                }
            }
            Stmt::Match {
                subject,
                arms,
                default,
                ..
            } => {
                self.expr(subject);
                for arm in arms {
                    self.block(&arm.body);
                }
                if let Some(body) = default {
                    self.block(body);
                }
            }
            Stmt::Return { value, .. } => {
                if let Some(v) = value {
                    self.expr(v);
                }
            }
            Stmt::Push { value, target, .. } => {
                self.expr(value);
                self.read(&target.var, target.span);
            }
            Stmt::Escalate { payload, .. } => {
                if let Some(p) = payload {
                    self.expr(p);
                }
            }
            Stmt::Guardrail { guard, .. } => match guard {
                Guardrail::Block { condition } | Guardrail::Warn { condition } => {
                    self.expr(condition)
                }
                Guardrail::Mask { .. } => {}
            },
        }
    }

    fn write(&mut self, target: &Target) {
        if target.path.is_empty() {
            self.scopes.assign(&target.var, target.span);
        } else {
            self.read(&target.var, target.span);
        }
    }

    fn expr(&mut self, expr: &Expr) {
        let mut reads: Vec<(&str, Span)> = Vec::new();
        expr.walk(&mut |e| {
            if let Expr::VarRef { name, span } = e {
                reads.push((name.as_str(), *span));
            }
        });
        for (name, span) in reads {
            self.read(name, span);
        }
    }

    fn read(&mut self, name: &str, span: Span) {
        if self.scopes.lookup(name).is_some() || self.globals.get(name).is_some() {
            return;
        }
        if !self.reported.insert(name.to_owned()) {
            return;
        }
        let diag = match self.assigned.get(name) {
            Some(assigned) => Diagnostic::new(
                Code::UseBeforeDefinition,
                self.file,
                Some(span),
                format!("variable `{}` used before definition", name),
            )
            .with_label(self.file, *assigned, "assigned here")
            .with_help(format!("assign `{}` before this statement", name)),
            None => {
                let mut diag = Diagnostic::new(
                    Code::UndefinedReference,
                    self.file,
                    Some(span),
                    format!("undefined reference `{}`", name),
                );
                if let Some(help) = did_you_mean(name, self.scopes.visible()) {
                    diag = diag.with_help(help);
                }
                diag
            }
        };
        self.out.push(diag);
    }
}

fn collect_assignments<'a>(stmts: &'a [Stmt], out: &mut HashMap<&'a str, Span>) {
    fn bind<'a>(target: &'a Target, out: &mut HashMap<&'a str, Span>) {
        if target.path.is_empty() {
            out.entry(target.var.as_str()).or_insert(target.span);
        }
    }
    for stmt in stmts {
        match stmt {
            Stmt::Assignment { target, .. } => bind(target, out),
            Stmt::Run {
                target: Some(t), ..
            }
            | Stmt::Call {
                target: Some(t), ..
            } => bind(t, out),
            Stmt::ForLoop { body, .. } | Stmt::Parallel { body, .. } | Stmt::Loop { body, .. } => {
                collect_assignments(body, out)
            }
            Stmt::If {
                then_body,
                else_body,
                ..
            } => {
                collect_assignments(then_body, out);
                if let Some(body) = else_body {
                    collect_assignments(body, out);
                }
            }
            Stmt::Match { arms, default, .. } => {
                for arm in arms {
                    collect_assignments(&arm.body, out);
                }
                if let Some(body) = default {
                    collect_assignments(body, out);
                }
            }
            _ => {}
        }
    }
}
