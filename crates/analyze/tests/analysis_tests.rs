//! Integration tests for the semantic analyzer.
//!
//! Each test parses a small agentflow file with the real front end and runs
//! the full pass sequence.

use agentflow_analyze::{analyze, has_errors, UnitStats};
use agentflow_core::{parse_unit, Code, Diagnostic, ParseStrategy};

fn analyze_src(src: &str) -> Vec<Diagnostic> {
    let unit = parse_unit(src, "test.af", ParseStrategy::Predictive)
        .unwrap_or_else(|e| panic!("parse failed: {}", e));
    analyze(&unit)
}

fn codes(diags: &[Diagnostic]) -> Vec<&'static str> {
    diags.iter().map(|d| d.code.as_str()).collect()
}

const SUPPORT: &str = r#"
model main = anthropic/claude-sonnet

tool search = builtin web.search

schema Finding:
    title: string
    confidence: int

prompt triage using model main expecting list[Finding]: """
Review $ticket and list findings.
{{tone}}
"""
prompt tone: "Be concise."

retry standard = 3 times, exponential backoff

agent triager:
    model main
    instruction triage
    tools search
    retry standard
    escalate if contains "human"

agent summarizer:
    instruction tone

flow review($ticket):
    $findings = run agent triager with $ticket on escalate return "escalated"
    $strong = filter $findings where .confidence >= 80
    parallel do
        $a = run agent summarizer with $strong
        $b = run agent triager with $ticket
    end
    loop max 3 do
        $summary = call llm tone with $a, $b
        if len($summary) > 0:
            return $summary
    end
    return $strong

on message do
    mask EMAIL
    run flow review with message
end
"#;

// ──────────────────────────────────────────────
// Valid input
// ──────────────────────────────────────────────

#[test]
fn well_formed_file_has_no_diagnostics() {
    let diags = analyze_src(SUPPORT);
    assert!(diags.is_empty(), "{:#?}", diags);
}

#[test]
fn stats_count_declarations() {
    let unit = parse_unit(SUPPORT, "test.af", ParseStrategy::Predictive).unwrap();
    let stats = UnitStats::of(&unit);
    assert_eq!(stats.models, 1);
    assert_eq!(stats.tools, 1);
    assert_eq!(stats.schemas, 1);
    assert_eq!(stats.prompts, 2);
    assert_eq!(stats.agents, 2);
    assert_eq!(stats.flows, 1);
    assert_eq!(stats.handlers, 1);
}

// ──────────────────────────────────────────────
// Undefined references
// ──────────────────────────────────────────────

#[test]
fn undefined_instruction_prompt() {
    let src = "model main = anthropic/claude-sonnet\n\nagent support:\n    model main\n    instruction missing\n";
    let diags = analyze_src(src);
    assert_eq!(codes(&diags), vec!["E0001"]);
    assert!(has_errors(&diags));
    assert_eq!(diags[0].message, "undefined reference `missing`");
    assert_eq!(diags[0].line(), 5);
    assert_eq!(diags[0].column(), 17);
}

#[test]
fn all_semantic_errors_are_collected() {
    let src = "agent a:\n    instruction nope\n    tools nothing\n\nagent a:\n    instruction p\n\nflow f:\n    return $x\n";
    let diags = analyze_src(src);
    assert_eq!(codes(&diags), vec!["E0003", "E0001", "E0001", "E0001", "E0001"]);
}

// ──────────────────────────────────────────────
// Cycles
// ──────────────────────────────────────────────

#[test]
fn mutual_delegation_is_one_cycle() {
    let src = "prompt p: \"x\"\n\nagent a:\n    instruction p\n    delegate b\n\nagent b:\n    instruction p\n    delegate a\n";
    let diags = analyze_src(src);
    assert_eq!(codes(&diags), vec!["E0011"]);
    assert_eq!(diags[0].message, "circular reference: a -> b -> a");
    assert_eq!(diags[0].line(), 9);
}

#[test]
fn delegate_and_use_edges_combine() {
    let src = "prompt p: \"x\"\n\nagent a:\n    instruction p\n    use b\n\nagent b:\n    instruction p\n    delegate c\n\nagent c:\n    instruction p\n    use a\n";
    let diags = analyze_src(src);
    let cycles: Vec<&Diagnostic> = diags
        .iter()
        .filter(|d| d.code == Code::CircularReference)
        .collect();
    assert_eq!(cycles.len(), 1);
    assert!(cycles[0].message.ends_with("a -> b -> c -> a"));
}

#[test]
fn every_route_back_is_its_own_cycle() {
    let src = "prompt p: \"x\"\n\nagent a:\n    instruction p\n    delegate b, c\n\nagent b:\n    instruction p\n    delegate a\n\nagent c:\n    instruction p\n    delegate b\n";
    let diags = analyze_src(src);
    let messages: Vec<&str> = diags
        .iter()
        .filter(|d| d.code == Code::CircularReference)
        .map(|d| d.message.as_str())
        .collect();
    assert_eq!(
        messages,
        vec![
            "circular reference: a -> b -> a",
            "circular reference: a -> c -> b -> a"
        ]
    );
}

#[test]
fn recursive_flows_are_cycles() {
    let src = "flow ping($n):\n    run flow pong with $n\n\nflow pong($n):\n    run ping with $n\n";
    let diags = analyze_src(src);
    assert_eq!(codes(&diags), vec!["E0011"]);
    assert_eq!(diags[0].message, "circular reference: ping -> pong -> ping");
}

#[test]
fn prompt_composition_cycles() {
    let src = "prompt a: \"{{b}}\"\nprompt b: \"{{a}}\"\n";
    let diags = analyze_src(src);
    assert_eq!(codes(&diags), vec!["E0011"]);
    assert!(diags[0].message.starts_with("circular prompt composition"));
}

// ──────────────────────────────────────────────
// Scope soundness
// ──────────────────────────────────────────────

#[test]
fn read_before_assignment_in_every_nesting() {
    let cases = [
        "flow f:\n    $y = $x\n    $x = 1\n",
        "flow f:\n    if $x:\n        return 1\n    $x = 2\n",
        "flow f($items):\n    for $i in $items do\n        $t = $acc + $i\n        $acc = $t\n    end\n",
        "flow f:\n    match $x:\n        when 1 -> return 1\n    $x = 1\n",
    ];
    for src in cases {
        let diags = analyze_src(src);
        assert_eq!(codes(&diags), vec!["E0002"], "{}", src);
    }
}

#[test]
fn assignment_in_branch_is_visible_afterwards() {
    let src = "flow f($c):\n    if $c:\n        $x = 1\n    else:\n        $x = 2\n    return $x\n";
    assert!(analyze_src(src).is_empty());
}

// ──────────────────────────────────────────────
// Warnings
// ──────────────────────────────────────────────

#[test]
fn warnings_do_not_block() {
    let src = "prompt p: \"x\"\n\nagent a:\n    instruction p\n    delegate b\n    use c\n\nagent b:\n    instruction p\n\nagent c:\n    instruction p\n\nflow f:\n    loop do\n        run agent a\n    end\n";
    let diags = analyze_src(src);
    assert_eq!(codes(&diags), vec!["W0002", "W0001"]);
    assert!(!has_errors(&diags));
}

#[test]
fn diagnostics_serialize_with_stable_fields() {
    let diags = analyze_src("agent a:\n    instruction p\n");
    let json = serde_json::to_value(&diags).unwrap();
    assert_eq!(json[0]["code"], "E0001");
    assert_eq!(json[0]["severity"], "error");
    assert_eq!(json[0]["file"], "test.af");
}
