//! Facade tests: compile/validate scenarios, caching, imports and the
//! report JSON contract.

use agentflow_compiler::{
    CompilationCache, Compiler, CompilerConfig, ExitStatus, ManualClock, ValidationReport,
};
use agentflow_core::report::{render_human, Sources};
use agentflow_core::{Code, Diagnostic, InMemoryProvider};
use std::path::{Path, PathBuf};
use std::sync::Arc;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn compiler() -> Compiler {
    init_tracing();
    Compiler::new(CompilerConfig::default()).with_provider(Arc::new(InMemoryProvider::new()))
}

fn codes(diags: &[Diagnostic]) -> Vec<&'static str> {
    diags.iter().map(|d| d.code.as_str()).collect()
}

const UNDEFINED_PROMPT: &str = "model main = anthropic/claude-sonnet

agent helper:
    model main
    instruction missing
";

const MUTUAL_DELEGATION: &str = "prompt p: \"work\"

agent a:
    instruction p
    delegate b

agent b:
    instruction p
    delegate a
";

const MINIMAL: &str = "model main = anthropic/claude-sonnet

prompt greet: \"Say hello to $name.\"

agent greeter:
    model main
    instruction greet
";

const FILTER_FLOW: &str = "flow strong($findings):
    $strong = filter $findings where .confidence >= 80
    return $strong
";

// ──────────────────────────────────────────────
// Scenarios
// ──────────────────────────────────────────────

#[test]
fn undefined_prompt_fails_with_one_error_and_emits_nothing() {
    let c = compiler();
    let out = tempfile::tempdir().unwrap();
    let emitted = c
        .compile(UNDEFINED_PROMPT, "bot.af")
        .map(|result| result.write_to(out.path()));
    assert_eq!(std::fs::read_dir(out.path()).unwrap().count(), 0);
    let failure = emitted.unwrap_err();
    assert_eq!(codes(failure.diagnostics()), vec!["E0001"]);
    assert_eq!(failure.exit_status(), ExitStatus::Invalid);
    assert_eq!(failure.exit_status().code(), 1);

    let diag = &failure.diagnostics()[0];
    assert_eq!((diag.line(), diag.column()), (5, 17));
    let human = render_human(diag, &Sources::new().with("bot.af", UNDEFINED_PROMPT));
    assert!(human.starts_with("error[E0001]: undefined reference `missing`\n"), "{}", human);
    assert!(human.contains(" --> bot.af:5:17\n"), "{}", human);
    assert!(human.contains("instruction missing"), "{}", human);
}

#[test]
fn mutual_delegation_reports_the_cycle_once() {
    let c = compiler();
    let failure = c.compile(MUTUAL_DELEGATION, "cycle.af").unwrap_err();
    let diags = failure.diagnostics();
    assert_eq!(codes(diags), vec!["E0011"]);
    assert!(diags[0].message.contains("a -> b -> a"), "{}", diags[0].message);
}

#[test]
fn valid_file_summary_and_cached_recompile() {
    let c = compiler();
    let report = c.validate(MINIMAL, "greet.af");
    assert_eq!(report.summary(), "valid (1 model, 1 agent)");
    assert_eq!(report.exit_status().code(), 0);

    let first = c.compile(MINIMAL, "greet.af").unwrap();
    let second = c.compile(MINIMAL, "greet.af").unwrap();
    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(c.cache().stats().hits, 1);
    assert_eq!(c.cache().stats().misses, 1);
    assert_eq!(first.stats.prompts, 1);
    assert!(first.source.contains("class GreetWorkflow(Workflow):"));
}

#[test]
fn filter_compiles_to_a_comprehension_over_the_list() {
    let c = compiler();
    let result = c.compile(FILTER_FLOW, "scenario.af").unwrap();
    assert!(result.source.contains(
        "ctx.vars[\"strong\"] = [_item for _item in (ctx.vars[\"findings\"] or []) if (_prop(_item, \"confidence\") >= 80)]"
    ));
    let line = result
        .source
        .lines()
        .position(|l| l.contains("_item for _item"))
        .unwrap() as u32
        + 1;
    assert_eq!(result.source_map.resolve(line).unwrap().line, 2);
}

// ──────────────────────────────────────────────
// Properties
// ──────────────────────────────────────────────

#[test]
fn cold_and_warm_compiles_are_identical() {
    let cold = compiler().compile(MINIMAL, "greet.af").unwrap();
    let c = compiler();
    c.compile(MINIMAL, "greet.af").unwrap();
    let warm = c.compile(MINIMAL, "greet.af").unwrap();
    assert_eq!(cold.source, warm.source);
    assert_eq!(cold.source_map, warm.source_map);
    assert_eq!(cold.warnings, warm.warnings);
}

fn sorted(diags: impl IntoIterator<Item = Diagnostic>) -> Vec<(String, u32, u32, String)> {
    let mut out: Vec<_> = diags
        .into_iter()
        .map(|d| (d.code.as_str().to_owned(), d.line(), d.column(), d.message))
        .collect();
    out.sort();
    out
}

#[test]
fn validate_and_compile_agree() {
    let inputs = [
        UNDEFINED_PROMPT,
        MUTUAL_DELEGATION,
        "flow f($t):\n    parallel do\n        $a = $t\n        run agent x\n    end\n    return $y\n",
        "flow f:\n    return $x\n    $x = 1\n",
        "flow f\n",
        "agent a:\n    instruction p\n    delegate b\n    use b\n",
        "flow a-b:\n    return 1\n\nflow a_b:\n    return 2\n",
    ];
    let c = compiler();
    for src in inputs {
        let report = c.validate(src, "agree.af");
        let compiled = match c.compile(src, "agree.af") {
            Ok(result) => result.warnings.clone(),
            Err(failure) => failure.diagnostics().to_vec(),
        };
        assert_eq!(
            sorted(report.diagnostics().cloned()),
            sorted(compiled),
            "input:\n{}",
            src
        );
        assert!(!report.valid, "input:\n{}", src);
    }
}

#[test]
fn parallel_restriction_is_reported_by_validate() {
    let c = compiler();
    let src = "flow f($t):\n    parallel do\n        $a = $t\n    end\n";
    let report = c.validate(src, "p.af");
    assert!(!report.valid);
    assert_eq!(codes(&report.errors), vec!["E0012"]);
}

#[test]
fn python_name_collisions_are_reported_by_validate() {
    let c = compiler();
    let src = "flow a-b:\n    return 1\n\nflow a_b:\n    return 2\n";
    let report = c.validate(src, "n.af");
    assert!(!report.valid);
    assert_eq!(codes(&report.errors), vec!["E0003"]);
    assert!(c.compile(src, "n.af").is_err());
}

#[test]
fn cache_stays_within_capacity() {
    init_tracing();
    let config = CompilerConfig {
        cache_capacity: 2,
        ..CompilerConfig::default()
    };
    let clock = Arc::new(ManualClock::new(0));
    let cache = Arc::new(CompilationCache::new(config.cache_capacity, clock.clone()));
    let c = Compiler::new(config)
        .with_provider(Arc::new(InMemoryProvider::new()))
        .with_cache(cache);
    for n in 0..5 {
        let src = format!("flow f{}:\n    return {}\n", n, n);
        c.compile(&src, "bound.af").unwrap();
        clock.advance(1);
        assert!(c.cache().len() <= 2);
    }
    assert_eq!(c.cache().stats().evictions, 3);
}

#[test]
fn failures_are_recompiled_after_a_fix() {
    let mut provider = InMemoryProvider::new();
    provider.insert("lib.af", "prompt p: \"x\"\n");
    let provider = Arc::new(provider);
    let c = Compiler::default().with_provider(provider);
    let src = "import \"lib.af\"\n\nagent a:\n    instruction q\n";
    assert!(c.compile(src, "main.af").is_err());
    assert!(c.cache().is_empty());
    let fixed = "import \"lib.af\"\n\nagent a:\n    instruction p\n";
    assert!(c.compile(fixed, "main.af").is_ok());
}

#[test]
fn concurrent_identical_requests_compile_once() {
    let c = compiler();
    let results: Vec<_> = std::thread::scope(|s| {
        let handles: Vec<_> = (0..8)
            .map(|_| s.spawn(|| c.compile(MINIMAL, "greet.af")))
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });
    assert!(results.iter().all(|r| r.is_ok()));
    let stats = c.cache().stats();
    assert_eq!(stats.misses, 1);
    assert_eq!(stats.hits + stats.coalesced, 7);
}

// ──────────────────────────────────────────────
// Files and imports
// ──────────────────────────────────────────────

fn write(dir: &Path, rel: &str, text: &str) -> PathBuf {
    let path = dir.join(rel);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(&path, text).unwrap();
    path
}

#[test]
fn imports_are_read_from_disk() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let models = write(
        dir.path(),
        "shared/models.af",
        "model main = anthropic/claude-sonnet\n",
    );
    let main = write(
        dir.path(),
        "app/main.af",
        "import \"../shared/models.af\"\n\nprompt p: \"hi\"\n\nagent a:\n    model main\n    instruction p\n",
    );
    let c = Compiler::default();
    let result = c.compile_path(&main).unwrap();
    assert_eq!(result.stats.models, 1);
    assert!(result.source.contains("\"main\": {\"provider\": \"anthropic\""));

    // a changed import is a different compilation
    std::fs::write(&models, "model main = openai/gpt-4o\n").unwrap();
    let again = c.compile_path(&main).unwrap();
    assert!(again.source.contains("\"provider\": \"openai\""));
    assert_eq!(c.cache().stats().misses, 2);
}

#[test]
fn import_problems_are_diagnostics() {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "a.af", "import \"b.af\"\n");
    write(dir.path(), "b.af", "import \"a.af\"\n");
    let missing = write(dir.path(), "m.af", "import \"nope.af\"\n");
    let cyclic = dir.path().join("a.af");
    let c = Compiler::default();

    let failure = c.compile_path(&missing).unwrap_err();
    assert_eq!(codes(failure.diagnostics()), vec!["E0005"]);
    assert_eq!(failure.exit_status(), ExitStatus::Invalid);

    let failure = c.compile_path(&cyclic).unwrap_err();
    assert_eq!(codes(failure.diagnostics()), vec!["E0006"]);
    assert!(failure.diagnostics()[0].message.starts_with("circular import: "));
}

#[test]
fn duplicate_across_files_names_both() {
    let provider: InMemoryProvider = [("models.af", "model main = anthropic/claude-sonnet\n")]
        .into_iter()
        .collect();
    let c = Compiler::default().with_provider(Arc::new(provider));
    let src = "import \"models.af\"\n\nmodel main = openai/gpt-4o\n";
    let failure = c.compile(src, "main.af").unwrap_err();
    let diags = failure.diagnostics();
    assert_eq!(codes(diags), vec!["E0003"]);
    assert_eq!(diags[0].file, "main.af");
    assert_eq!(diags[0].labels[0].file, "models.af");
}

#[test]
fn unreadable_root_is_a_file_error() {
    let dir = tempfile::tempdir().unwrap();
    let c = Compiler::default();
    let failure = c.compile_path(&dir.path().join("absent.af")).unwrap_err();
    assert_eq!(failure.exit_status(), ExitStatus::FileError);
    assert_eq!(failure.exit_status().code(), 2);
    assert!(failure.diagnostics().is_empty());
    assert!(failure.to_string().contains("absent.af"));
    assert!(c.validate_path(&dir.path().join("absent.af")).is_err());
}

#[test]
fn compile_many_keeps_input_order() {
    let dir = tempfile::tempdir().unwrap();
    let paths = vec![
        write(dir.path(), "one.af", "flow one:\n    return 1\n"),
        write(dir.path(), "two.af", "flow two:\n    return $x\n"),
        dir.path().join("three.af"),
        write(dir.path(), "four.af", MINIMAL),
    ];
    let results = Compiler::default().compile_many(&paths);
    assert_eq!(results.len(), 4);
    assert_eq!(results[0].as_ref().unwrap().class_name, "OneWorkflow");
    assert_eq!(
        results[1].as_ref().unwrap_err().diagnostics()[0].code,
        Code::UndefinedReference
    );
    assert_eq!(
        results[2].as_ref().unwrap_err().exit_status(),
        ExitStatus::FileError
    );
    assert_eq!(results[3].as_ref().unwrap().class_name, "FourWorkflow");
}

#[test]
fn results_can_be_written_out() {
    let c = compiler();
    let result = c.compile(MINIMAL, "flows/greet.af").unwrap();
    let out = tempfile::tempdir().unwrap();
    let files = result.write_to(out.path()).unwrap();
    assert_eq!(files.module.file_name().unwrap(), "greet.py");
    let map: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&files.source_map).unwrap()).unwrap();
    assert!(map["entries"].is_object());
}

// ──────────────────────────────────────────────
// Report JSON contract
// ──────────────────────────────────────────────

fn report_validator() -> jsonschema::Validator {
    let schema: serde_json::Value = serde_json::from_str(include_str!(concat!(
        env!("CARGO_MANIFEST_DIR"),
        "/../../schema/validation-report.schema.json"
    )))
    .unwrap();
    jsonschema::validator_for(&schema).unwrap()
}

fn assert_conforms(validator: &jsonschema::Validator, report: &ValidationReport) {
    let json = report.to_json();
    if let Err(error) = validator.validate(&json) {
        panic!("report does not match schema: {}\n{:#}", error, json);
    }
}

#[test]
fn reports_match_the_schema() {
    let validator = report_validator();
    let c = compiler();
    let inputs = [
        MINIMAL,
        UNDEFINED_PROMPT,
        MUTUAL_DELEGATION,
        "flow f\n",
        "flow f:\n    loop do\n        $x = 1\n    end\n",
        "import \"nowhere.af\"\n",
    ];
    for src in inputs {
        assert_conforms(&validator, &c.validate(src, "schema.af"));
    }

    let warned = c.validate("flow f:\n    loop do\n        $x = 1\n    end\n", "w.af");
    assert!(warned.valid);
    let json = warned.to_json();
    assert_eq!(json["warnings"][0]["code"], "W0001");
    assert_eq!(json["stats"]["flows"], 1);
    assert_eq!(json["errors"], serde_json::json!([]));
}

#[test]
fn config_file_drives_the_compiler() {
    let dir = tempfile::tempdir().unwrap();
    let path = write(
        dir.path(),
        "agentflow.toml",
        "parse_strategy = \"backtracking\"\n\n[codegen]\nruntime_module = \"acme.rt\"\nclass_suffix = \"Flows\"\n",
    );
    let config = CompilerConfig::load(&path).unwrap();
    let c = Compiler::new(config).with_provider(Arc::new(InMemoryProvider::new()));
    let result = c.compile(MINIMAL, "greet.af").unwrap();
    assert_eq!(result.class_name, "GreetFlows");
    assert!(result.source.contains("from acme.rt import Escalation, Workflow"));
}
