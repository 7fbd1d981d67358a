//! End-to-end code generation tests.
//!
//! Units come from the real front end. Tests that need a Python
//! interpreter skip themselves when `python3` is not on the PATH.

use agentflow_codegen::{generate, CodegenOptions, GeneratedModule};
use agentflow_core::ast::{CompilationUnit, Declaration, Stmt};
use agentflow_core::{parse_unit, ParseStrategy};
use std::path::Path;
use std::process::Command;

const WORKFLOW: &str = r#"
model main = anthropic/claude-sonnet
model big:
    provider: "openai"
    name: "gpt-4o"
    temperature: 0.2

tool search = builtin web.search
tool lookup:
    type: http
    url: "https://example.test/lookup"

schema Finding:
    title: string
    confidence: int
    tags: list[string]?

prompt triage using model main expecting list[Finding]: """
Review $ticket and list findings.
{{tone}}
"""
prompt tone: "Be concise."

policy strict:
    max_cost: 5
    regions: ["eu", "us"]

retry standard = 3 times, exponential backoff
timeout quick = 30 seconds

agent triager:
    model main
    instruction triage
    tools search, lookup
    retry standard
    timeout quick
    escalate if contains "human"

agent summarizer:
    instruction tone
    description "Summarizes findings"

flow review($ticket):
    $findings = run agent triager with $ticket on escalate return "escalated"
    $strong = filter $findings where .confidence >= 80 and .title != null
    $report = {count: len($strong), source: "triage"}
    $report.owner = "ops"
    $seen = []
    for $f in $strong do
        push $f.title to $seen
    end
    parallel do
        $a = run agent summarizer with $strong
        $b = run agent triager with $ticket
    end
    loop max 3 do
        $summary = call llm tone with $a, $b using model big
        if len($summary) > 0:
            return $summary
        else:
            warn if $summary ~ "  EMPTY "
    end
    match $ticket.priority:
        when "high" -> escalate to human with $ticket
        when 2:
            return join($seen, ", ")
        else -> return $strong

flow wrapper($t):
    $r = run review with $t on escalate continue
    loop do
        return $r
    end

on message do
    mask EMAIL
    block if message contains "ssn"
    run flow review with message
end

after message do
    $m = upper(trim(message))
end
"#;

fn compile(src: &str, file: &str) -> (CompilationUnit, GeneratedModule) {
    let unit = parse_unit(src, file, ParseStrategy::Predictive)
        .unwrap_or_else(|e| panic!("parse failed: {}", e));
    let module = generate(&unit, &CodegenOptions::default())
        .unwrap_or_else(|d| panic!("generation failed: {:#?}", d));
    (unit, module)
}

fn statements<'a>(body: &'a [Stmt], out: &mut Vec<&'a Stmt>) {
    for stmt in body {
        out.push(stmt);
        match stmt {
            Stmt::ForLoop { body, .. } | Stmt::Parallel { body, .. } | Stmt::Loop { body, .. } => {
                statements(body, out)
            }
            Stmt::If {
                then_body,
                else_body,
                ..
            } => {
                statements(then_body, out);
                if let Some(body) = else_body {
                    statements(body, out);
                }
            }
            Stmt::Match { arms, default, .. } => {
                for arm in arms {
                    statements(&arm.body, out);
                }
                if let Some(body) = default {
                    statements(body, out);
                }
            }
            _ => {}
        }
    }
}

fn python3() -> bool {
    Command::new("python3")
        .arg("--version")
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false)
}

#[test]
fn every_statement_is_reachable_through_the_source_map() {
    let (unit, module) = compile(WORKFLOW, "support.af");
    let mut stmts = Vec::new();
    for decl in &unit.declarations {
        match decl {
            Declaration::Flow(f) => statements(&f.body, &mut stmts),
            Declaration::Handler(h) => statements(&h.body, &mut stmts),
            _ => {}
        }
    }
    assert!(stmts.len() > 20);
    for stmt in stmts {
        let span = stmt.span();
        let generated = module
            .source_map
            .reverse_lookup("support.af", span.start.line)
            .unwrap_or_else(|| panic!("no generated line for {:?}", stmt));
        let loc = module.source_map.resolve(generated).unwrap();
        assert!(
            span.contains_line(loc.line),
            "{} at line {} maps back to line {}",
            stmt.describe(),
            span.start.line,
            loc.line
        );
    }
}

#[test]
fn mapped_lines_fall_inside_declarations() {
    let (unit, module) = compile(WORKFLOW, "support.af");
    let total = module.source.lines().count() as u32;
    for (generated, loc) in module.source_map.entries() {
        assert!(generated >= 1 && generated <= total);
        assert_eq!(loc.file, "support.af");
        assert!(
            unit.declarations
                .iter()
                .any(|d| d.prov().span.contains_line(loc.line)),
            "generated line {} maps to line {} outside every declaration",
            generated,
            loc.line
        );
    }
}

#[test]
fn generation_is_deterministic() {
    let (_, first) = compile(WORKFLOW, "support.af");
    let (_, second) = compile(WORKFLOW, "support.af");
    assert_eq!(first, second);
}

#[test]
fn registries_and_templates() {
    let (_, module) = compile(WORKFLOW, "support.af");
    let src = &module.source;
    assert!(src.contains("Review $ticket and list findings.\\nBe concise."));
    assert!(src.contains("\"model\": \"main\", \"expecting\": \"list[Finding]\"}"));
    assert!(src.contains("\"quick\": {\"value\": 30.0, \"unit\": \"seconds\", \"seconds\": 30.0},"));
    assert!(src.contains("\"on message\": \"on_message\","));
    assert!(src.contains("\"after message\": \"after_message\","));
    assert!(src.contains("\"wrapper\": {\"method\": \"flow_wrapper\", \"params\": [\"t\"]},"));
    assert!(src.contains("async def flow_review(self, ctx, p_ticket):"));
    assert!(src.contains("await self.flow_review(ctx.child(), ctx.vars[\"t\"])"));
}

#[test]
fn generated_module_is_valid_python() {
    if !python3() {
        eprintln!("python3 not available; skipping");
        return;
    }
    let (_, module) = compile(WORKFLOW, "support.af");
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("support.py");
    std::fs::write(&path, &module.source).unwrap();
    let out = Command::new("python3")
        .arg("-c")
        .arg("import ast, sys; ast.parse(open(sys.argv[1]).read())")
        .arg(&path)
        .output()
        .unwrap();
    assert!(
        out.status.success(),
        "python rejected generated code:\n{}\n{}",
        String::from_utf8_lossy(&out.stderr),
        module.source
    );
}

const STUB_RUNTIME: &str = r#"
class Escalation(Exception):
    def __init__(self, target=None, payload=None):
        super().__init__(target)
        self.target = target
        self.payload = payload


class Context:
    def __init__(self):
        self.vars = {}

    def child(self):
        return Context()


class Workflow:
    pass
"#;

const DRIVER: &str = r#"
import asyncio
import json

import agentflow_runtime
import scenario

records = [
    {"title": "a", "confidence": 95},
    {"title": "b", "confidence": 40},
    {"title": "c", "confidence": 80},
    {"title": "d", "confidence": 10},
    {"title": "e", "confidence": 79},
]
flow = scenario.ScenarioWorkflow()
result = asyncio.run(flow.flow_strong(agentflow_runtime.Context(), records))
print(json.dumps([r["title"] for r in result]))
"#;

fn write(dir: &Path, name: &str, text: &str) {
    std::fs::write(dir.join(name), text).unwrap();
}

#[test]
fn filter_runs_against_records() {
    if !python3() {
        eprintln!("python3 not available; skipping");
        return;
    }
    let src = "flow strong($findings):\n    $strong = filter $findings where .confidence >= 80\n    return $strong\n";
    let (_, module) = compile(src, "scenario.af");
    assert_eq!(module.class_name, "ScenarioWorkflow");
    assert!(module.source.contains(
        "ctx.vars[\"strong\"] = [_item for _item in (ctx.vars[\"findings\"] or []) if (_prop(_item, \"confidence\") >= 80)]"
    ));

    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "agentflow_runtime.py", STUB_RUNTIME);
    write(dir.path(), "scenario.py", &module.source);
    write(dir.path(), "driver.py", DRIVER);
    let out = Command::new("python3")
        .arg("driver.py")
        .current_dir(dir.path())
        .output()
        .unwrap();
    assert!(
        out.status.success(),
        "driver failed:\n{}",
        String::from_utf8_lossy(&out.stderr)
    );
    assert_eq!(String::from_utf8_lossy(&out.stdout).trim(), "[\"a\", \"c\"]");
}
