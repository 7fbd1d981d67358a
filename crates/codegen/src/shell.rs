//! Module header, runtime helpers, and the workflow class with its
//! declaration registries and one method per flow and handler.

use crate::expr::const_value;
use crate::flow::BodyEmitter;
use crate::python::{py_float, py_name, py_str};
use crate::writer::{CodeWriter, Origin};
use crate::CodegenOptions;
use agentflow_core::ast::{
    AgentDef, CompilationUnit, DeclKind, Declaration, EscalationOp, FlowDef, HandlerDef,
    ModelDef, PromptDef, Property, RetryDef, SchemaDef, TimeoutDef, ToolDef, FLOW_BUILTINS,
    HANDLER_BUILTINS,
};
use std::collections::{HashMap, HashSet};

const HELPERS: &[&str] = &[
    "def _prop(value, name):",
    "    if value is None:",
    "        return None",
    "    if isinstance(value, dict):",
    "        return value.get(name)",
    "    return getattr(value, name, None)",
    "",
    "",
    "def _norm(value):",
    "    return \" \".join(str(value).split()).lower()",
    "",
    "",
    "def _norm_eq(left, right):",
    "    return _norm(left) == _norm(right)",
    "",
    "",
    "def _contains(container, item):",
    "    if container is None:",
    "        return False",
    "    if isinstance(container, str):",
    "        return str(item) in container",
    "    return item in container",
    "",
    "",
    "def _add(left, right):",
    "    if isinstance(left, list):",
    "        return left + (right if isinstance(right, list) else [right])",
    "    if isinstance(left, str) or isinstance(right, str):",
    "        return str(left) + str(right)",
    "    return left + right",
    "",
    "",
    "def _assign(scope, name, path, value):",
    "    target = scope.setdefault(name, {})",
    "    for key in path[:-1]:",
    "        if isinstance(target, dict):",
    "            target = target.setdefault(key, {})",
    "        else:",
    "            target = getattr(target, key)",
    "    if isinstance(target, dict):",
    "        target[path[-1]] = value",
    "    else:",
    "        setattr(target, path[-1], value)",
];

pub struct ShellEmitter<'a> {
    pub unit: &'a CompilationUnit,
    pub options: &'a CodegenOptions,
    pub kinds: &'a HashMap<String, DeclKind>,
    pub w: CodeWriter,
}

impl ShellEmitter<'_> {
    pub fn emit_module(&mut self, class_name: &str) {
        self.w.line(format!(
            "# Generated by agentflow from {}. Do not edit.",
            self.unit.file
        ));
        self.w.line("import asyncio");
        self.w.blank();
        self.w.line(format!(
            "from {} import Escalation, Workflow",
            self.options.runtime_module
        ));
        self.w.blank();
        self.w.blank();
        for line in HELPERS {
            if line.is_empty() {
                self.w.blank();
            } else {
                self.w.line(line);
            }
        }
        self.w.blank();
        self.w.blank();
        self.w.line(format!("class {}(Workflow):", class_name));
        self.w.indent();
        self.w
            .line(format!("source_file = {}", py_str(&self.unit.file)));
        self.w.blank();
        self.registries();
        for decl in &self.unit.declarations {
            match decl {
                Declaration::Flow(f) => self.flow(f),
                Declaration::Handler(h) => self.handler(h),
                _ => {}
            }
        }
        self.w.dedent();
    }

    fn registries(&mut self) {
        let unit = self.unit;
        let prompts: HashMap<&str, &PromptDef> =
            unit.prompts().map(|p| (p.name.name.as_str(), p)).collect();

        self.registry("models", DeclKind::Model, |d| match d {
            Declaration::Model(m) => Some(model_entry(m)),
            _ => None,
        });
        self.registry("tools", DeclKind::Tool, |d| match d {
            Declaration::Tool(t) => Some(tool_entry(t)),
            _ => None,
        });
        self.registry("schemas", DeclKind::Schema, |d| match d {
            Declaration::Schema(s) => Some(schema_entry(s)),
            _ => None,
        });
        self.registry("prompts", DeclKind::Prompt, |d| match d {
            Declaration::Prompt(p) => Some(prompt_entry(p, &prompts)),
            _ => None,
        });
        self.registry("agents", DeclKind::Agent, |d| match d {
            Declaration::Agent(a) => Some(agent_entry(a)),
            _ => None,
        });
        self.registry("policies", DeclKind::Policy, |d| match d {
            Declaration::Policy(p) => Some(props_dict(&p.properties)),
            _ => None,
        });
        self.registry("retries", DeclKind::Retry, |d| match d {
            Declaration::Retry(r) => Some(retry_entry(r)),
            _ => None,
        });
        self.registry("timeouts", DeclKind::Timeout, |d| match d {
            Declaration::Timeout(t) => Some(timeout_entry(t)),
            _ => None,
        });
        self.registry("flows", DeclKind::Flow, |d| match d {
            Declaration::Flow(f) => {
                let params: Vec<String> = f.params.iter().map(|p| py_str(&p.name)).collect();
                Some(format!(
                    "{{\"method\": {}, \"params\": [{}]}}",
                    py_str(&format!("flow_{}", py_name(&f.name.name))),
                    params.join(", ")
                ))
            }
            _ => None,
        });
        self.registry("handlers", DeclKind::Handler, |d| match d {
            Declaration::Handler(h) => Some(py_str(&handler_method(h))),
            _ => None,
        });
    }

    /// `name = {` one line per declaration of `kind` `}`; each entry line
    /// maps to its declaration.
    fn registry(&mut self, name: &str, kind: DeclKind, entry: impl Fn(&Declaration) -> Option<String>) {
        let decls: Vec<&Declaration> = self
            .unit
            .declarations
            .iter()
            .filter(|d| d.kind() == kind)
            .collect();
        if decls.is_empty() {
            self.w.line(format!("{} = {{}}", name));
            return;
        }
        self.w.line(format!("{} = {{", name));
        self.w.indent();
        for decl in decls {
            let Some(value) = entry(decl) else { continue };
            let key = match decl {
                Declaration::Handler(h) => format!("{} {}", h.timing.as_str(), h.event.name),
                other => other.name().name.clone(),
            };
            let prov = decl.prov();
            let saved = self.w.set_origin(Some(Origin::new(&prov.file, prov.span)));
            self.w.line(format!("{}: {},", py_str(&key), value));
            self.w.set_origin(saved);
        }
        self.w.dedent();
        self.w.line("}");
    }

    fn flow(&mut self, f: &FlowDef) {
        let origin = Origin::new(&f.prov.file, f.prov.span);
        self.w.blank();
        let saved = self.w.set_origin(Some(origin));
        let mut signature = vec!["self".to_owned(), "ctx".to_owned()];
        signature.extend(f.params.iter().map(|p| format!("p_{}", py_name(&p.name))));
        self.w.line(format!(
            "async def flow_{}({}):",
            py_name(&f.name.name),
            signature.join(", ")
        ));
        self.w.indent();
        for p in &f.params {
            self.w
                .line(format!("ctx.vars[{}] = p_{}", py_str(&p.name), py_name(&p.name)));
        }
        let mut locals: HashSet<String> = FLOW_BUILTINS.iter().map(|b| (*b).to_owned()).collect();
        locals.extend(f.params.iter().map(|p| p.name.clone()));
        self.body(&f.prov.file, locals, &f.body);
        self.w.line("return None");
        self.w.dedent();
        self.w.set_origin(saved);
    }

    fn handler(&mut self, h: &HandlerDef) {
        let origin = Origin::new(&h.prov.file, h.prov.span);
        self.w.blank();
        let saved = self.w.set_origin(Some(origin));
        self.w
            .line(format!("async def {}(self, ctx):", handler_method(h)));
        self.w.indent();
        let locals: HashSet<String> = HANDLER_BUILTINS.iter().map(|b| (*b).to_owned()).collect();
        self.body(&h.prov.file, locals, &h.body);
        self.w.line("return None");
        self.w.dedent();
        self.w.set_origin(saved);
    }

    fn body(&mut self, file: &str, locals: HashSet<String>, body: &[agentflow_core::ast::Stmt]) {
        let mut emitter = BodyEmitter::new(&mut self.w, file, locals, self.kinds, body);
        emitter.block(body);
    }
}

pub(crate) fn handler_method(h: &HandlerDef) -> String {
    format!("{}_{}", h.timing.as_str(), py_name(&h.event.name))
}

fn opt_str(v: Option<&str>) -> String {
    v.map_or("None".to_owned(), py_str)
}

fn props_dict(props: &[Property]) -> String {
    let parts: Vec<String> = props
        .iter()
        .map(|p| format!("{}: {}", py_str(&p.key.name), const_value(&p.value)))
        .collect();
    format!("{{{}}}", parts.join(", "))
}

fn model_entry(m: &ModelDef) -> String {
    format!(
        "{{\"provider\": {}, \"name\": {}, \"properties\": {}}}",
        opt_str(m.provider.as_deref()),
        opt_str(m.model.as_deref()),
        props_dict(&m.properties)
    )
}

fn tool_entry(t: &ToolDef) -> String {
    format!(
        "{{\"type\": {}, \"target\": {}, \"properties\": {}}}",
        opt_str(t.kind.map(|k| k.as_str())),
        opt_str(t.target.as_deref()),
        props_dict(&t.properties)
    )
}

fn schema_entry(s: &SchemaDef) -> String {
    let parts: Vec<String> = s
        .fields
        .iter()
        .map(|f| format!("{}: {}", py_str(&f.name.name), py_str(&f.ty.to_string())))
        .collect();
    format!("{{{}}}", parts.join(", "))
}

fn prompt_entry(p: &PromptDef, prompts: &HashMap<&str, &PromptDef>) -> String {
    let template = expand_template(p, prompts, &mut vec![p.name.name.as_str()]);
    format!(
        "{{\"template\": {}, \"model\": {}, \"expecting\": {}}}",
        py_str(&template),
        opt_str(p.model.as_ref().map(|m| m.name.as_str())),
        opt_str(p.expecting.as_ref().map(|t| t.to_string()).as_deref())
    )
}

/// Replace `{{name}}` with the named prompt's expanded template. Unknown
/// names and names already being expanded stay as written.
pub fn expand_template<'a>(
    p: &'a PromptDef,
    prompts: &HashMap<&str, &'a PromptDef>,
    stack: &mut Vec<&'a str>,
) -> String {
    let mut out = String::new();
    let mut rest = p.body.as_str();
    while let Some(start) = rest.find("{{") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let Some(end) = after.find("}}") else {
            out.push_str(&rest[start..]);
            return out;
        };
        let name = after[..end].trim();
        match prompts.get(name) {
            Some(&inner) if !stack.contains(&name) => {
                stack.push(inner.name.name.as_str());
                out.push_str(&expand_template(inner, prompts, stack));
                stack.pop();
            }
            _ => out.push_str(&rest[start..start + 2 + end + 2]),
        }
        rest = &after[end + 2..];
    }
    out.push_str(rest);
    out
}

fn agent_entry(a: &AgentDef) -> String {
    let list = |names: Vec<&str>| -> String {
        let parts: Vec<String> = names.into_iter().map(py_str).collect();
        format!("[{}]", parts.join(", "))
    };
    let escalate = a.escalation().map_or("None".to_owned(), |rule| {
        let op = match rule.op {
            EscalationOp::Normalized => "normalized",
            EscalationOp::Exact => "exact",
            EscalationOp::Contains => "contains",
        };
        format!("{{\"op\": {}, \"text\": {}}}", py_str(op), py_str(&rule.text))
    });
    format!(
        "{{\"model\": {}, \"instruction\": {}, \"description\": {}, \"tools\": {}, \"delegate\": {}, \"use\": {}, \"retry\": {}, \"timeout\": {}, \"escalate\": {}}}",
        opt_str(a.model().map(|m| m.name.as_str())),
        opt_str(a.instruction().map(|p| p.name.as_str())),
        opt_str(a.description()),
        list(a.tools().map(|t| t.name.as_str()).collect()),
        list(a.delegates().map(|t| t.name.as_str()).collect()),
        list(a.uses().map(|t| t.name.as_str()).collect()),
        opt_str(a.retry().map(|r| r.name.as_str())),
        opt_str(a.timeout().map(|t| t.name.as_str())),
        escalate
    )
}

fn retry_entry(r: &RetryDef) -> String {
    format!(
        "{{\"attempts\": {}, \"backoff\": {}}}",
        r.attempts,
        opt_str(r.backoff.as_deref())
    )
}

fn timeout_entry(t: &TimeoutDef) -> String {
    let scale = match t.unit.as_str() {
        "ms" | "millisecond" | "milliseconds" => Some(0.001),
        "s" | "sec" | "second" | "seconds" => Some(1.0),
        "m" | "min" | "minute" | "minutes" => Some(60.0),
        "h" | "hour" | "hours" => Some(3600.0),
        _ => None,
    };
    format!(
        "{{\"value\": {}, \"unit\": {}, \"seconds\": {}}}",
        py_float(t.value),
        py_str(&t.unit),
        scale.map_or("None".to_owned(), |s| py_float(t.value * s))
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use agentflow_core::{parse_unit, ParseStrategy};

    #[test]
    fn templates_expand_transitively() {
        let src = "prompt a: \"A {{b}} $x\"\nprompt b: \"B {{c}}\"\nprompt c: \"C {{missing}}\"\n";
        let unit = parse_unit(src, "t.af", ParseStrategy::Predictive).unwrap();
        let prompts: HashMap<&str, &PromptDef> =
            unit.prompts().map(|p| (p.name.name.as_str(), p)).collect();
        let a = prompts["a"];
        assert_eq!(
            expand_template(a, &prompts, &mut vec!["a"]),
            "A B C {{missing}} $x"
        );
    }

    #[test]
    fn self_composition_is_left_alone() {
        let src = "prompt a: \"loop {{ a }}\"\n";
        let unit = parse_unit(src, "t.af", ParseStrategy::Predictive).unwrap();
        let prompts: HashMap<&str, &PromptDef> =
            unit.prompts().map(|p| (p.name.name.as_str(), p)).collect();
        assert_eq!(
            expand_template(prompts["a"], &prompts, &mut vec!["a"]),
            "loop {{ a }}"
        );
    }

    #[test]
    fn timeouts_convert_to_seconds() {
        let src = "timeout short = 2 minutes\ntimeout odd = 3 fortnights\n";
        let unit = parse_unit(src, "t.af", ParseStrategy::Predictive).unwrap();
        let entries: Vec<String> = unit
            .declarations
            .iter()
            .filter_map(|d| match d {
                Declaration::Timeout(t) => Some(timeout_entry(t)),
                _ => None,
            })
            .collect();
        assert_eq!(entries[0], "{\"value\": 2.0, \"unit\": \"minutes\", \"seconds\": 120.0}");
        assert!(entries[1].ends_with("\"seconds\": None}"));
    }
}
