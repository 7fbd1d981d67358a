//! Pass 2: reference resolution.
//!
//! Every name a declaration or statement points at must exist and be of the
//! expected kind. A missing name is E0001 with a nearest-name suggestion
//! drawn from names of the expected kind; a name of the wrong kind is E0004.
//! Variable reads are left to the definition-order pass.

use crate::globals::Globals;
use crate::suggest::did_you_mean;
use agentflow_core::ast::{
    AgentDef, AgentProp, CompilationUnit, DeclKind, Declaration, Expr, Ident, OnEscalate,
    PromptDef, RunKind, Stmt, TypeRef, BUILTIN_FUNCTIONS, PRIMITIVE_TYPES,
};
use agentflow_core::{Code, Diagnostic, Span};
use std::collections::HashMap;

pub fn check_references(unit: &CompilationUnit, globals: &Globals, diags: &mut Vec<Diagnostic>) {
    for decl in &unit.declarations {
        let mut r = Resolver {
            globals,
            file: &decl.prov().file,
            diags: &mut *diags,
        };
        match decl {
            Declaration::Schema(s) => {
                for field in &s.fields {
                    r.type_ref(&field.ty);
                }
            }
            Declaration::Prompt(p) => r.prompt(p),
            Declaration::Agent(a) => r.agent(a),
            Declaration::Flow(f) => r.block(&f.body),
            Declaration::Handler(h) => r.block(&h.body),
            Declaration::Model(_)
            | Declaration::Tool(_)
            | Declaration::Policy(_)
            | Declaration::Retry(_)
            | Declaration::Timeout(_) => {}
        }
    }
}

struct Resolver<'a> {
    globals: &'a Globals,
    file: &'a str,
    diags: &'a mut Vec<Diagnostic>,
}

impl Resolver<'_> {
    /// Resolve `ident` in the shared namespace against `kinds`.
    /// Returns the kind it resolved to, if it resolved to an expected one.
    fn expect(&mut self, ident: &Ident, kinds: &[DeclKind], role: &str) -> Option<DeclKind> {
        match self.globals.get(&ident.name) {
            Some(def) if kinds.contains(&def.kind) => Some(def.kind),
            Some(def) => {
                self.diags.push(
                    Diagnostic::new(
                        Code::TypeMismatch,
                        self.file,
                        Some(ident.span),
                        format!("`{}` is a {}, expected {}", ident.name, def.kind, role),
                    )
                    .with_label(&def.file, def.span, format!("{} defined here", def.kind)),
                );
                None
            }
            None => {
                let help = did_you_mean(&ident.name, self.globals.names_of(kinds))
                    .unwrap_or_else(|| format!("no {} named `{}` is declared", strip_article(role), ident.name));
                self.undefined(ident.span, &ident.name, help);
                None
            }
        }
    }

    /// Resolve `ident` in the retry or timeout namespace.
    fn expect_in(&mut self, ident: &Ident, kind: DeclKind) {
        let Some(table) = self.globals.namespace(kind) else {
            return;
        };
        if table.contains_key(&ident.name) {
            return;
        }
        if let Some(def) = self.globals.get(&ident.name) {
            self.diags.push(
                Diagnostic::new(
                    Code::TypeMismatch,
                    self.file,
                    Some(ident.span),
                    format!("`{}` is a {}, expected a {}", ident.name, def.kind, kind),
                )
                .with_label(&def.file, def.span, format!("{} defined here", def.kind)),
            );
            return;
        }
        let help = did_you_mean(&ident.name, table.keys().map(String::as_str))
            .unwrap_or_else(|| format!("no {} named `{}` is declared", kind, ident.name));
        self.undefined(ident.span, &ident.name, help);
    }

    fn undefined(&mut self, span: Span, name: &str, help: String) {
        self.diags.push(
            Diagnostic::new(
                Code::UndefinedReference,
                self.file,
                Some(span),
                format!("undefined reference `{}`", name),
            )
            .with_help(help),
        );
    }

    fn type_ref(&mut self, ty: &TypeRef) {
        let (name, span) = ty.base();
        if PRIMITIVE_TYPES.contains(&name) {
            return;
        }
        match self.globals.get(name) {
            Some(def) if def.kind == DeclKind::Schema => {}
            Some(def) => self.diags.push(
                Diagnostic::new(
                    Code::TypeMismatch,
                    self.file,
                    Some(span),
                    format!("`{}` is a {}, expected a schema or primitive type", name, def.kind),
                )
                .with_label(&def.file, def.span, format!("{} defined here", def.kind)),
            ),
            None => {
                let candidates = self
                    .globals
                    .names_of(&[DeclKind::Schema])
                    .chain(PRIMITIVE_TYPES.iter().copied());
                let help = did_you_mean(name, candidates)
                    .unwrap_or_else(|| format!("declare `schema {}:` or use a primitive type", name));
                self.undefined(span, name, help);
            }
        }
    }

    fn prompt(&mut self, p: &PromptDef) {
        if let Some(model) = &p.model {
            self.expect(model, &[DeclKind::Model], "a model");
        }
        if let Some(ty) = &p.expecting {
            self.type_ref(ty);
        }
        for name in p.compositions() {
            let ident = Ident {
                name,
                span: p.body_span,
            };
            self.expect(&ident, &[DeclKind::Prompt], "a prompt");
        }
    }

    fn agent(&mut self, a: &AgentDef) {
        let mut seen: HashMap<&str, Span> = HashMap::new();
        for prop in &a.props {
            if prop.is_single_valued() {
                if let Some(first) = seen.get(prop.key()) {
                    self.diags.push(
                        Diagnostic::new(
                            Code::DuplicateDefinition,
                            self.file,
                            Some(prop.span()),
                            format!("duplicate property `{}` in agent `{}`", prop.key(), a.name.name),
                        )
                        .with_label(self.file, *first, "first set here"),
                    );
                } else {
                    seen.insert(prop.key(), prop.span());
                }
            }
            match prop {
                AgentProp::Model { model, .. } => {
                    self.expect(model, &[DeclKind::Model], "a model");
                }
                AgentProp::Instruction { prompt, .. } => {
                    self.expect(prompt, &[DeclKind::Prompt], "a prompt");
                }
                AgentProp::Tools { tools, .. } => {
                    for tool in tools {
                        self.expect(tool, &[DeclKind::Tool], "a tool");
                    }
                }
                AgentProp::Delegate { agents, .. } | AgentProp::Use { agents, .. } => {
                    for agent in agents {
                        self.expect(agent, &[DeclKind::Agent], "an agent");
                    }
                }
                AgentProp::Retry { policy, .. } => self.expect_in(policy, DeclKind::Retry),
                AgentProp::Timeout { policy, .. } => self.expect_in(policy, DeclKind::Timeout),
                AgentProp::Description { .. } | AgentProp::Escalate { .. } => {}
            }
        }
    }

    fn block(&mut self, stmts: &[Stmt]) {
        for stmt in stmts {
            self.stmt(stmt);
        }
    }

    fn stmt(&mut self, stmt: &Stmt) {
        match stmt {
            Stmt::Assignment { value, .. } => self.expr(value),
            Stmt::Run {
                kind,
                callee,
                args,
                on_escalate,
                ..
            } => {
                self.run(*kind, callee, args.len());
                args.iter().for_each(|a| self.expr(a));
                if let Some(OnEscalate::Return { value: Some(v) }) = on_escalate {
                    self.expr(v);
                }
            }
            Stmt::Call {
                prompt, args, model, ..
            } => {
                self.expect(prompt, &[DeclKind::Prompt], "a prompt");
                if let Some(model) = model {
                    self.expect(model, &[DeclKind::Model], "a model");
                }
                args.iter().for_each(|a| self.expr(a));
            }
            Stmt::ForLoop { iterable, body, .. } => {
                self.expr(iterable);
                self.block(body);
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
            Stmt::Push { value, .. } => self.expr(value),
            Stmt::Escalate { payload, .. } => {
                if let Some(p) = payload {
                    self.expr(p);
                }
            }
            Stmt::Guardrail { guard, .. } => {
                use agentflow_core::ast::Guardrail;
                match guard {
                    Guardrail::Block { condition } | Guardrail::Warn { condition } => {
                        self.expr(condition)
                    }
                    Guardrail::Mask { .. } => {}
                }
            }
        }
    }

    fn run(&mut self, kind: RunKind, callee: &Ident, argc: usize) {
        let resolved = match kind {
            RunKind::Agent => self.expect(callee, &[DeclKind::Agent], "an agent"),
            RunKind::Flow => self.expect(callee, &[DeclKind::Flow], "a flow"),
            RunKind::Unspecified => {
                self.expect(callee, &[DeclKind::Agent, DeclKind::Flow], "an agent or flow")
            }
        };
        if resolved != Some(DeclKind::Flow) {
            return;
        }
        let Some(def) = self.globals.get(&callee.name) else {
            return;
        };
        if let Some(arity) = def.arity {
            if arity != argc {
                self.diags.push(
                    Diagnostic::new(
                        Code::TypeMismatch,
                        self.file,
                        Some(callee.span),
                        format!(
                            "flow `{}` takes {} argument{}, found {}",
                            callee.name,
                            arity,
                            if arity == 1 { "" } else { "s" },
                            argc
                        ),
                    )
                    .with_label(&def.file, def.span, "flow defined here"),
                );
            }
        }
    }

    fn expr(&mut self, expr: &Expr) {
        expr.walk(&mut |e| {
            if let Expr::FunctionCall { name, args, .. } = e {
                self.function(name, args.len());
            }
        });
    }

    fn function(&mut self, name: &Ident, argc: usize) {
        let Some((_, min, max)) = BUILTIN_FUNCTIONS.iter().find(|(n, _, _)| *n == name.name) else {
            let help = did_you_mean(&name.name, BUILTIN_FUNCTIONS.iter().map(|(n, _, _)| *n))
                .unwrap_or_else(|| {
                    let all: Vec<&str> = BUILTIN_FUNCTIONS.iter().map(|(n, _, _)| *n).collect();
                    format!("available functions: {}", all.join(", "))
                });
            self.undefined(name.span, &name.name, help);
            return;
        };
        if argc < *min || argc > *max {
            let expected = if min == max {
                format!("{}", min)
            } else {
                format!("{} to {}", min, max)
            };
            self.diags.push(Diagnostic::new(
                Code::TypeMismatch,
                self.file,
                Some(name.span),
                format!(
                    "function `{}` takes {} argument{}, found {}",
                    name.name,
                    expected,
                    if *max == 1 { "" } else { "s" },
                    argc
                ),
            ));
        }
    }
}

fn strip_article(role: &str) -> &str {
    role.strip_prefix("an ")
        .or_else(|| role.strip_prefix("a "))
        .unwrap_or(role)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::globals;
    use agentflow_core::{parse_unit, ParseStrategy};

    fn check(src: &str) -> Vec<Diagnostic> {
        let unit = parse_unit(src, "r.af", ParseStrategy::Predictive).unwrap();
        let mut diags = Vec::new();
        let globals = globals::collect(&unit, &mut diags);
        check_references(&unit, &globals, &mut diags);
        diags
    }

    #[test]
    fn undefined_instruction_gets_suggestion() {
        let diags = check("prompt triage: \"x\"\nagent a:\n    instruction triag\n");
        assert_eq!(diags.len(), 1);
        assert_eq!(diags[0].code, Code::UndefinedReference);
        assert_eq!(diags[0].message, "undefined reference `triag`");
        assert_eq!(diags[0].help.as_deref(), Some("did you mean `triage`?"));
        assert_eq!(diags[0].span.unwrap().start.line, 3);
    }

    #[test]
    fn suggestions_only_come_from_the_expected_kind() {
        let diags = check("tool triage = builtin web.search\nagent a:\n    instruction triag\n");
        assert_eq!(diags[0].help.as_deref(), Some("no prompt named `triag` is declared"));
    }

    #[test]
    fn wrong_kind_is_a_type_mismatch() {
        let diags = check(
            "model main = openai/gpt-4o\nprompt p: \"x\"\nagent a:\n    instruction p\n    tools main\n",
        );
        assert_eq!(diags.len(), 1);
        assert_eq!(diags[0].code, Code::TypeMismatch);
        assert_eq!(diags[0].message, "`main` is a model, expected a tool");
        assert_eq!(diags[0].labels[0].span.start.line, 1);
    }

    #[test]
    fn retry_and_timeout_use_their_own_namespaces() {
        let diags = check(
            "retry quick = 2 times\nprompt p: \"x\"\nagent a:\n    instruction p\n    retry quik\n    timeout p\n",
        );
        assert_eq!(diags.len(), 2);
        assert_eq!(diags[0].code, Code::UndefinedReference);
        assert_eq!(diags[0].help.as_deref(), Some("did you mean `quick`?"));
        assert_eq!(diags[1].code, Code::TypeMismatch);
        assert_eq!(diags[1].message, "`p` is a prompt, expected a timeout");
    }

    #[test]
    fn duplicate_single_valued_agent_props() {
        let diags = check(
            "prompt p: \"x\"\nagent a:\n    instruction p\n    use a\n    use a\n    instruction p\n",
        );
        assert_eq!(diags.len(), 1);
        assert_eq!(diags[0].code, Code::DuplicateDefinition);
        assert_eq!(diags[0].span.unwrap().start.line, 6);
        assert_eq!(diags[0].labels[0].span.start.line, 3);
    }

    #[test]
    fn schema_and_prompt_types() {
        let diags = check(
            "schema Finding:\n    title: string\n    related: list[Findng]\n    meta: object?\n\nprompt p expecting Finding[]: \"x\"\n",
        );
        assert_eq!(diags.len(), 1);
        assert_eq!(diags[0].help.as_deref(), Some("did you mean `Finding`?"));
    }

    #[test]
    fn prompt_compositions_must_be_prompts() {
        let diags = check(
            "model tone = openai/gpt-4o\nprompt p: \"\"\"\n{{tone}} and {{rules}}\n\"\"\"\n",
        );
        let codes: Vec<Code> = diags.iter().map(|d| d.code).collect();
        assert_eq!(codes, vec![Code::TypeMismatch, Code::UndefinedReference]);
    }

    #[test]
    fn run_targets_and_flow_arity() {
        let src = "prompt p: \"x\"\nagent helper:\n    instruction p\n\nflow sub($a, $b):\n    return $a\n\nflow main:\n    run helper\n    run flow sub with 1\n    run agent sub\n    $x = call llm p using model helper\n";
        let diags = check(src);
        let summary: Vec<(Code, u32)> = diags
            .iter()
            .map(|d| (d.code, d.span.unwrap().start.line))
            .collect();
        assert_eq!(
            summary,
            vec![
                (Code::TypeMismatch, 10),
                (Code::TypeMismatch, 11),
                (Code::TypeMismatch, 12),
            ]
        );
        assert_eq!(diags[0].message, "flow `sub` takes 2 arguments, found 1");
    }

    #[test]
    fn builtin_functions_and_arity() {
        let src = "flow f($xs):\n    $n = len($xs)\n    $m = lenn($xs)\n    $j = join($xs, \", \")\n    $u = upper($xs, 1)\n";
        let diags = check(src);
        assert_eq!(diags.len(), 2);
        assert_eq!(diags[0].code, Code::UndefinedReference);
        assert_eq!(diags[0].help.as_deref(), Some("did you mean `len`?"));
        assert_eq!(diags[1].code, Code::TypeMismatch);
        assert_eq!(diags[1].message, "function `upper` takes 1 argument, found 2");
    }
}
