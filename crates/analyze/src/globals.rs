//! Global namespace construction.
//!
//! Models, tools, schemas, prompts, agents and flows share one namespace.
//! Retry, timeout and policy names each get their own, and handlers are
//! keyed by timing and event. A second definition of a name in the same
//! namespace is E0003 with a label pointing at the first.

use agentflow_core::ast::{CompilationUnit, DeclKind, Declaration, Ident};
use agentflow_core::{Code, Diagnostic, Span};
use std::collections::{BTreeMap, HashSet};

/// Where a global name was defined.
#[derive(Debug, Clone, PartialEq)]
pub struct GlobalDef {
    pub kind: DeclKind,
    pub file: String,
    pub span: Span,
    /// Parameter count for flows.
    pub arity: Option<usize>,
}

#[derive(Debug, Default)]
pub struct Globals {
    pub names: BTreeMap<String, GlobalDef>,
    pub retries: BTreeMap<String, GlobalDef>,
    pub timeouts: BTreeMap<String, GlobalDef>,
    pub policies: BTreeMap<String, GlobalDef>,
}

impl Globals {
    pub fn get(&self, name: &str) -> Option<&GlobalDef> {
        self.names.get(name)
    }

    pub fn kind_of(&self, name: &str) -> Option<DeclKind> {
        self.names.get(name).map(|d| d.kind)
    }

    /// Names in the shared namespace with one of `kinds`.
    pub fn names_of<'a>(&'a self, kinds: &'a [DeclKind]) -> impl Iterator<Item = &'a str> + 'a {
        self.names
            .iter()
            .filter(move |(_, d)| kinds.contains(&d.kind))
            .map(|(n, _)| n.as_str())
    }

    /// The per-kind namespace for retry, timeout and policy names.
    pub fn namespace(&self, kind: DeclKind) -> Option<&BTreeMap<String, GlobalDef>> {
        match kind {
            DeclKind::Retry => Some(&self.retries),
            DeclKind::Timeout => Some(&self.timeouts),
            DeclKind::Policy => Some(&self.policies),
            _ => None,
        }
    }
}

/// Pass 1: register every declaration; report duplicates, duplicate flow
/// parameters and duplicate schema fields.
pub fn collect(unit: &CompilationUnit, diags: &mut Vec<Diagnostic>) -> Globals {
    let mut globals = Globals::default();
    let mut handlers: BTreeMap<String, GlobalDef> = BTreeMap::new();

    for decl in &unit.declarations {
        let prov = decl.prov();
        let name = decl.name();
        let def = GlobalDef {
            kind: decl.kind(),
            file: prov.file.clone(),
            span: name.span,
            arity: match decl {
                Declaration::Flow(f) => Some(f.params.len()),
                _ => None,
            },
        };
        let (table, key) = match decl {
            Declaration::Retry(_) => (&mut globals.retries, name.name.clone()),
            Declaration::Timeout(_) => (&mut globals.timeouts, name.name.clone()),
            Declaration::Policy(_) => (&mut globals.policies, name.name.clone()),
            Declaration::Handler(h) => (
                &mut handlers,
                format!("{} {}", h.timing.as_str(), h.event.name),
            ),
            _ => (&mut globals.names, name.name.clone()),
        };
        match table.get(&key) {
            Some(first) => diags.push(duplicate(&def, first, &key)),
            None => {
                table.insert(key, def);
            }
        }

        match decl {
            Declaration::Flow(f) => {
                check_unique(&prov.file, &f.params, "parameter", diags);
            }
            Declaration::Schema(s) => {
                let fields: Vec<Ident> = s.fields.iter().map(|f| f.name.clone()).collect();
                check_unique(&prov.file, &fields, "field", diags);
            }
            _ => {}
        }
    }

    tracing::trace!(
        names = globals.names.len(),
        retries = globals.retries.len(),
        timeouts = globals.timeouts.len(),
        policies = globals.policies.len(),
        handlers = handlers.len(),
        "globals collected"
    );
    globals
}

fn duplicate(def: &GlobalDef, first: &GlobalDef, name: &str) -> Diagnostic {
    let message = if def.kind == first.kind {
        format!("duplicate definition of {} `{}`", def.kind, name)
    } else {
        format!(
            "duplicate definition of `{}`: already defined as a {}",
            name, first.kind
        )
    };
    Diagnostic::new(Code::DuplicateDefinition, &def.file, Some(def.span), message)
        .with_label(&first.file, first.span, "first defined here")
}

fn check_unique(file: &str, idents: &[Ident], what: &str, diags: &mut Vec<Diagnostic>) {
    let mut seen: HashSet<&str> = HashSet::new();
    for ident in idents {
        if !seen.insert(ident.name.as_str()) {
            let first = idents.iter().find(|i| i.name == ident.name).map(|i| i.span);
            let mut diag = Diagnostic::new(
                Code::DuplicateDefinition,
                file,
                Some(ident.span),
                format!("duplicate {} `{}`", what, ident.name),
            );
            if let Some(first) = first {
                diag = diag.with_label(file, first, "first defined here");
            }
            diags.push(diag);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agentflow_core::{parse_unit, ParseStrategy};

    fn globals_of(src: &str) -> (Globals, Vec<Diagnostic>) {
        let unit = parse_unit(src, "g.af", ParseStrategy::Predictive).unwrap();
        let mut diags = Vec::new();
        let globals = collect(&unit, &mut diags);
        (globals, diags)
    }

    #[test]
    fn shared_namespace_across_kinds() {
        let (globals, diags) = globals_of(
            "model main = openai/gpt-4o\nprompt main: \"hi\"\nretry main = 2 times\n",
        );
        assert_eq!(diags.len(), 1);
        assert_eq!(diags[0].code, Code::DuplicateDefinition);
        assert!(diags[0].message.contains("already defined as a model"), "{}", diags[0].message);
        assert_eq!(diags[0].labels[0].span.start.line, 1);
        assert_eq!(globals.kind_of("main"), Some(DeclKind::Model));
        assert!(globals.retries.contains_key("main"));
    }

    #[test]
    fn duplicate_params_and_fields() {
        let (_, diags) = globals_of(
            "schema S:\n    a: string\n    a: int\n\nflow f($x, $x):\n    return $x\n",
        );
        let messages: Vec<&str> = diags.iter().map(|d| d.message.as_str()).collect();
        assert_eq!(messages, vec!["duplicate field `a`", "duplicate parameter `x`"]);
    }

    #[test]
    fn handlers_are_keyed_by_timing_and_event() {
        let src = "on message do\n    return 1\nend\nafter message do\n    return 2\nend\non message do\n    return 3\nend\n";
        let (_, diags) = globals_of(src);
        assert_eq!(diags.len(), 1);
        assert_eq!(diags[0].span.unwrap().start.line, 7);
    }

    #[test]
    fn flow_arity_is_recorded() {
        let (globals, _) = globals_of("flow f($a, $b):\n    return $a\n");
        assert_eq!(globals.get("f").and_then(|d| d.arity), Some(2));
    }
}
