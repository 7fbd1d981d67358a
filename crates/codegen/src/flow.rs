//! Flow and handler bodies.
//!
//! Each statement sets the writer's origin to its own span before writing,
//! and restores the enclosing origin afterwards, so every body line maps to
//! the innermost statement that produced it.

use crate::expr::{literal, ExprEmitter};
use crate::python::{py_name, py_str};
use crate::writer::{CodeWriter, Origin};
use agentflow_core::ast::{
    DeclKind, Expr, Guardrail, MatchArm, OnEscalate, RunKind, Stmt, Target,
};
use agentflow_core::Span;
use std::collections::{HashMap, HashSet};

pub struct BodyEmitter<'a> {
    pub w: &'a mut CodeWriter,
    pub file: &'a str,
    pub locals: HashSet<String>,
    pub globals: &'a HashMap<String, DeclKind>,
    tmp: usize,
}

impl<'a> BodyEmitter<'a> {
    /// `locals` starts with the parameters and builtins; assigned names
    /// and loop variables are added from the body.
    pub fn new(
        w: &'a mut CodeWriter,
        file: &'a str,
        mut locals: HashSet<String>,
        globals: &'a HashMap<String, DeclKind>,
        body: &[Stmt],
    ) -> Self {
        collect_locals(body, &mut locals);
        BodyEmitter {
            w,
            file,
            locals,
            globals,
            tmp: 0,
        }
    }

    fn expr(&self, e: &Expr) -> String {
        ExprEmitter {
            locals: &self.locals,
            globals: self.globals,
        }
        .emit(e)
    }

    fn fresh(&mut self, prefix: &str) -> String {
        self.tmp += 1;
        format!("_{}{}", prefix, self.tmp)
    }

    pub fn block(&mut self, stmts: &[Stmt]) {
        if stmts.is_empty() {
            self.w.line("pass");
        }
        for stmt in stmts {
            self.stmt(stmt);
        }
    }

    fn indented(&mut self, stmts: &[Stmt]) {
        self.w.indent();
        self.block(stmts);
        self.w.dedent();
    }

    fn stmt(&mut self, stmt: &Stmt) {
        let origin = Origin::new(self.file, stmt.span());
        let saved = self.w.set_origin(Some(origin.clone()));
        match stmt {
            Stmt::Assignment { target, value, .. } => {
                let value = self.expr(value);
                self.assign(target, &value);
            }
            Stmt::Run {
                target,
                kind,
                callee,
                args,
                on_escalate,
                ..
            } => {
                let call = self.run_call(*kind, &callee.name, args);
                match on_escalate {
                    None => self.store(target.as_ref(), &format!("await {}", call)),
                    Some(handler) => {
                        self.w.line("try:");
                        self.w.indent();
                        self.store(target.as_ref(), &format!("await {}", call));
                        self.w.dedent();
                        self.w.line("except Escalation as _esc:");
                        self.w.indent();
                        match handler {
                            OnEscalate::Return { value } => {
                                let v = value.as_ref().map_or("None".to_owned(), |v| self.expr(v));
                                self.w.line(format!("return {}", v));
                            }
                            OnEscalate::Continue => match target {
                                Some(t) => self.assign(t, "_esc.payload"),
                                None => self.w.line("pass"),
                            },
                            OnEscalate::Abort => self.w.line("raise"),
                        }
                        self.w.dedent();
                    }
                }
            }
            Stmt::Call {
                target,
                prompt,
                args,
                model,
                ..
            } => {
                let args: Vec<String> = args.iter().map(|a| self.expr(a)).collect();
                let model = model
                    .as_ref()
                    .map_or("None".to_owned(), |m| py_str(&m.name));
                let call = format!(
                    "await self.call_llm(ctx, {}, [{}], model={})",
                    py_str(&prompt.name),
                    args.join(", "),
                    model
                );
                self.store(target.as_ref(), &call);
            }
            Stmt::ForLoop {
                var,
                iterable,
                body,
                ..
            } => {
                let item = self.fresh("v");
                let iterable = self.expr(iterable);
                self.w.line(format!("for {} in ({} or []):", item, iterable));
                self.w.indent();
                self.w
                    .line(format!("ctx.vars[{}] = {}", py_str(&var.name), item));
                self.block(body);
                self.w.dedent();
            }
            Stmt::Parallel { body, .. } => self.parallel(body, &origin),
            Stmt::Loop { max, body, .. } => {
                match max {
                    Some(n) => self.w.line(format!("for _ in range({}):", n)),
                    None => self.w.line("while True:"),
                }
                self.indented(body);
            }
            Stmt::If {
                condition,
                then_body,
                else_body,
                ..
            } => {
                let cond = self.expr(condition);
                self.w.line(format!("if {}:", cond));
                self.indented(then_body);
                if let Some(body) = else_body {
                    self.w.set_origin(Some(origin.clone()));
                    self.w.line("else:");
                    self.indented(body);
                }
            }
            Stmt::Match {
                subject,
                arms,
                default,
                ..
            } => self.match_block(subject, arms, default.as_deref(), &origin),
            Stmt::Return { value, .. } => {
                let v = value.as_ref().map_or("None".to_owned(), |v| self.expr(v));
                self.w.line(format!("return {}", v));
            }
            Stmt::Push { value, target, .. } => {
                let value = self.expr(value);
                let container = self.target_value(target);
                self.w.line(format!("{}.append({})", container, value));
            }
            Stmt::Escalate { to, payload, .. } => {
                let to = to.as_ref().map_or("None".to_owned(), |t| py_str(&t.name));
                let payload = payload
                    .as_ref()
                    .map_or("None".to_owned(), |p| self.expr(p));
                self.w.line(format!("raise Escalation({}, {})", to, payload));
            }
            Stmt::Guardrail { guard, span } => {
                let at = py_str(&format!("{}:{}", self.file, span.start.line));
                match guard {
                    Guardrail::Mask { entity } => {
                        self.w
                            .line(format!("await self.mask(ctx, {})", py_str(&entity.name)));
                    }
                    Guardrail::Block { condition } => {
                        let cond = self.expr(condition);
                        self.w.line(format!("if {}:", cond));
                        self.w.indent();
                        self.w.line(format!("await self.block(ctx, {})", at));
                        self.w.dedent();
                    }
                    Guardrail::Warn { condition } => {
                        let cond = self.expr(condition);
                        self.w.line(format!("if {}:", cond));
                        self.w.indent();
                        self.w.line(format!("await self.warn(ctx, {})", at));
                        self.w.dedent();
                    }
                }
            }
        }
        self.w.set_origin(saved);
    }

    /// Python call expression (without `await`) for a `run` statement.
    fn run_call(&self, kind: RunKind, callee: &str, args: &[Expr]) -> String {
        let args: Vec<String> = args.iter().map(|a| self.expr(a)).collect();
        let is_flow = match kind {
            RunKind::Flow => true,
            RunKind::Agent => false,
            RunKind::Unspecified => self.globals.get(callee) == Some(&DeclKind::Flow),
        };
        if is_flow {
            let mut parts = vec!["ctx.child()".to_owned()];
            parts.extend(args);
            format!("self.flow_{}({})", py_name(callee), parts.join(", "))
        } else {
            format!(
                "self.run_agent(ctx, {}, [{}])",
                py_str(callee),
                args.join(", ")
            )
        }
    }

    /// Agent runs gathered concurrently; results are stored in statement
    /// order. Blocks that fail the parallel restriction never get here.
    fn parallel(&mut self, body: &[Stmt], origin: &Origin) {
        let results = self.fresh("r");
        self.w.line(format!("{} = await asyncio.gather(", results));
        self.w.indent();
        let mut targets: Vec<(Option<&Target>, Span)> = Vec::new();
        for stmt in body {
            if let Stmt::Run {
                target,
                kind,
                callee,
                args,
                span,
                ..
            } = stmt
            {
                self.w.set_origin(Some(Origin::new(self.file, *span)));
                let call = self.run_call(*kind, &callee.name, args);
                self.w.line(format!("{},", call));
                targets.push((target.as_ref(), *span));
            }
        }
        self.w.dedent();
        self.w.set_origin(Some(origin.clone()));
        self.w.line(")");
        for (i, (target, span)) in targets.into_iter().enumerate() {
            if let Some(t) = target {
                self.w.set_origin(Some(Origin::new(self.file, span)));
                self.assign(t, &format!("{}[{}]", results, i));
            }
        }
    }

    fn match_block(
        &mut self,
        subject: &Expr,
        arms: &[MatchArm],
        default: Option<&[Stmt]>,
        origin: &Origin,
    ) {
        let subject_var = self.fresh("m");
        let subject = self.expr(subject);
        self.w.line(format!("{} = {}", subject_var, subject));
        for (i, arm) in arms.iter().enumerate() {
            self.w.set_origin(Some(Origin::new(self.file, arm.span)));
            let keyword = if i == 0 { "if" } else { "elif" };
            self.w.line(format!(
                "{} {} == {}:",
                keyword,
                subject_var,
                literal(&arm.pattern)
            ));
            self.indented(&arm.body);
        }
        if let Some(body) = default {
            self.w.set_origin(Some(origin.clone()));
            if arms.is_empty() {
                self.block(body);
            } else {
                self.w.line("else:");
                self.indented(body);
            }
        }
    }

    /// Store `value` in `target`, or evaluate it for effect.
    fn store(&mut self, target: Option<&Target>, value: &str) {
        match target {
            Some(t) => self.assign(t, value),
            None => self.w.line(value),
        }
    }

    fn assign(&mut self, target: &Target, value: &str) {
        if target.path.is_empty() {
            self.w
                .line(format!("ctx.vars[{}] = {}", py_str(&target.var), value));
        } else {
            let path: Vec<String> = target.path.iter().map(|p| py_str(p)).collect();
            self.w.line(format!(
                "_assign(ctx.vars, {}, [{}], {})",
                py_str(&target.var),
                path.join(", "),
                value
            ));
        }
    }

    fn target_value(&self, target: &Target) -> String {
        let mut out = format!("ctx.vars[{}]", py_str(&target.var));
        for p in &target.path {
            out = format!("_prop({}, {})", out, py_str(p));
        }
        out
    }
}

/// Names the body binds: assignment targets and loop variables.
fn collect_locals(stmts: &[Stmt], out: &mut HashSet<String>) {
    for stmt in stmts {
        match stmt {
            Stmt::Assignment { target, .. }
            | Stmt::Run {
                target: Some(target),
                ..
            }
            | Stmt::Call {
                target: Some(target),
                ..
            } => {
                out.insert(target.var.clone());
            }
            Stmt::ForLoop { var, body, .. } => {
                out.insert(var.name.clone());
                collect_locals(body, out);
            }
            Stmt::Parallel { body, .. } | Stmt::Loop { body, .. } => collect_locals(body, out),
            Stmt::If {
                then_body,
                else_body,
                ..
            } => {
                collect_locals(then_body, out);
                if let Some(body) = else_body {
                    collect_locals(body, out);
                }
            }
            Stmt::Match { arms, default, .. } => {
                for arm in arms {
                    collect_locals(&arm.body, out);
                }
                if let Some(body) = default {
                    collect_locals(body, out);
                }
            }
            _ => {}
        }
    }
}
