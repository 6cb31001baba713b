//! Full pipeline runs against toolchains found on the host.
//! Tests for a missing toolchain return early.

use kiln_sandbox::{ExecutionRequest, OutcomeKind, Stage};
use kiln_tests::{has_program, process_engine, setup_test_logging};
use std::time::Duration;

#[tokio::test]
async fn test_c_compiles_and_runs() {
    setup_test_logging();
    if !has_program("gcc") {
        return;
    }
    let engine = process_engine(1);
    let source = "#include <stdio.h>\nint main(void) {\n    printf(\"%d\\n\", 6 * 7);\n    return 0;\n}\n";

    let result = engine
        .sandbox
        .submit(ExecutionRequest::new(source).with_language("auto"))
        .await;

    assert!(result.ok, "{result:?}");
    assert_eq!(result.language.as_deref(), Some("c"));
    assert_eq!(result.output, "42");
    assert_eq!(engine.workspace_entries(), 0);
}

#[tokio::test]
async fn test_c_compile_error_reports_diagnostics() {
    if !has_program("gcc") {
        return;
    }
    let engine = process_engine(1);

    let result = engine
        .sandbox
        .submit(ExecutionRequest::new("int main(void) { return 0 }\n").with_language("c"))
        .await;

    assert_eq!(result.outcome(), OutcomeKind::CompileFailure);
    assert_eq!(result.stage(), Some(Stage::Compile));
    assert!(result.output.contains("error"), "{}", result.output);
    assert!(!result.killed);
    assert_eq!(engine.workspace_entries(), 0);
}

#[tokio::test]
async fn test_compiled_program_exit_code() {
    if !has_program("gcc") {
        return;
    }
    let engine = process_engine(1);

    let result = engine
        .sandbox
        .submit(ExecutionRequest::new("int main(void) { return 3; }\n").with_language("c"))
        .await;

    assert_eq!(result.outcome(), OutcomeKind::RuntimeFailure);
    assert_eq!(result.exit_code, Some(3));
    assert_eq!(result.stage(), Some(Stage::Run));
}

#[tokio::test]
async fn test_python_runs() {
    if !has_program("python3") {
        return;
    }
    let engine = process_engine(1);

    let result = engine
        .sandbox
        .submit(ExecutionRequest::new("import sys\nprint(sum(range(10)))\n"))
        .await;

    assert!(result.ok, "{result:?}");
    assert_eq!(result.language.as_deref(), Some("python"));
    assert_eq!(result.output, "45");
}

#[tokio::test]
async fn test_python_sleep_past_timeout_is_killed_on_time() {
    if !has_program("python3") {
        return;
    }
    let engine = process_engine(1);
    let timeout_ms = 1000;

    let result = engine
        .sandbox
        .submit(
            ExecutionRequest::new("import time\ntime.sleep(2)\n")
                .with_language("python")
                .with_timeout(Duration::from_millis(timeout_ms)),
        )
        .await;

    assert_eq!(result.outcome(), OutcomeKind::Timeout);
    assert!(result.killed);
    assert!(!result.ok);
    assert!(
        timeout_ms <= result.duration_ms && result.duration_ms < timeout_ms + 1500,
        "took {} ms",
        result.duration_ms
    );
    assert_eq!(engine.workspace_entries(), 0);
}

#[test]
fn test_result_json_shape() {
    let engine = process_engine(1);
    let result = tokio_test::block_on(engine.sandbox.submit(
        ExecutionRequest::new("echo json").with_language("sh"),
    ));

    let value = serde_json::to_value(&result).unwrap();
    assert_eq!(value["ok"], true);
    assert_eq!(value["output"], "json");
    assert_eq!(value["exit_code"], 0);
    assert_eq!(value["killed"], false);
    assert_eq!(value["truncated"], false);
    assert_eq!(value["language"], "bash");
    assert!(value["duration_ms"].is_u64());
    assert!(value.get("failure").is_none());
    assert_eq!(value["id"].as_str().map(str::len), Some(36));

    // the ledger saw it too
    let history = tokio_test::block_on(engine.sandbox.history());
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].outcome, OutcomeKind::Completed);
}
