//! Real processes through the full engine (needs bash)

use kiln_sandbox::{
    ExecutionFailure, ExecutionRequest, OutcomeKind, ProcessRunner, Stage, TRUNCATION_MARKER,
};
use kiln_tests::{engine_with_config, has_program, process_engine, setup_test_logging, test_config};
use std::sync::Arc;
use std::time::{Duration, Instant};

fn bash(source: &str) -> ExecutionRequest {
    ExecutionRequest::new(source).with_language("bash")
}

#[tokio::test]
async fn test_bash_hello() {
    setup_test_logging();
    let engine = process_engine(2);

    let result = engine.sandbox.submit(bash("echo hello")).await;

    assert!(result.ok, "{result:?}");
    assert_eq!(result.output, "hello");
    assert_eq!(result.exit_code, Some(0));
    assert!(!result.killed);
    assert_eq!(result.language.as_deref(), Some("bash"));
    assert_eq!(engine.workspace_entries(), 0);
}

#[tokio::test]
async fn test_run_timeout_kills_and_keeps_partial_output() {
    let engine = process_engine(1);
    let started = Instant::now();

    let result = engine
        .sandbox
        .submit(bash("echo start\nsleep 2\necho never").with_timeout(Duration::from_secs(1)))
        .await;

    assert!(started.elapsed() < Duration::from_millis(2500));
    assert!(!result.ok);
    assert!(
        (1000..2500).contains(&result.duration_ms),
        "took {} ms",
        result.duration_ms
    );
    assert!(result.killed);
    assert_eq!(
        result.failure,
        Some(ExecutionFailure::Timeout {
            stage: Stage::Run,
            timeout_ms: 1000
        })
    );
    assert!(result.output.contains("start"));
    assert!(!result.output.contains("never"));
    assert_eq!(engine.workspace_entries(), 0);
    assert_eq!(engine.sandbox.status().await.in_flight, 0);
}

#[tokio::test]
async fn test_output_is_capped_with_marker() {
    let engine = engine_with_config(Arc::new(ProcessRunner::default()), |root| {
        let mut config = test_config(root, 1);
        config.limits.output_cap_bytes = 64;
        config
    });

    let result = engine
        .sandbox
        .submit(bash("for i in $(seq 1 500); do printf x; done"))
        .await;

    assert!(result.ok, "{result:?}");
    assert!(result.truncated);
    assert_eq!(result.output, format!("{}{}", "x".repeat(64), TRUNCATION_MARKER));
}

#[tokio::test]
async fn test_nonzero_exit_is_runtime_failure() {
    let engine = process_engine(1);

    let result = engine.sandbox.submit(bash("echo oops >&2\nexit 4")).await;

    assert!(!result.ok);
    assert_eq!(result.exit_code, Some(4));
    assert_eq!(
        result.failure,
        Some(ExecutionFailure::RuntimeFailure { exit_code: Some(4) })
    );
    assert_eq!(result.output, "oops");
}

#[tokio::test]
async fn test_process_runs_inside_its_own_workspace() {
    let engine = process_engine(1);

    let result = engine.sandbox.submit(bash("pwd\nls")).await;

    assert!(result.ok, "{result:?}");
    let mut lines = result.output.lines();
    let cwd = lines.next().unwrap_or_default();
    assert!(cwd.ends_with(&result.id.simple()), "{cwd}");
    assert_eq!(lines.collect::<Vec<_>>(), vec!["main.sh"]);
}

#[tokio::test]
async fn test_environment_is_restricted() {
    let engine = process_engine(1);

    let result = engine
        .sandbox
        .submit(bash("echo \"$HOME|$LANG|${CARGO_HOME:-unset}\""))
        .await;

    assert!(result.ok, "{result:?}");
    assert_eq!(result.output, "/tmp|C.UTF-8|unset");
}

#[tokio::test]
async fn test_missing_interpreter_is_internal_error() {
    let engine = process_engine(1);

    // lua is rarely installed in CI images; skip when it is
    if has_program("lua") {
        return;
    }
    let result = engine
        .sandbox
        .submit(ExecutionRequest::new("print(1)").with_language("lua"))
        .await;

    assert_eq!(result.outcome(), OutcomeKind::InternalError);
    assert_eq!(result.stage(), Some(Stage::Run));
    assert_eq!(engine.workspace_entries(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_processes_clean_up() {
    let engine = process_engine(4);

    let runs = (0..4).map(|i| {
        let sandbox = engine.sandbox.clone();
        async move { sandbox.submit(bash(&format!("echo run {i}"))).await }
    });
    let results = spawn_all(runs).await;

    for (i, result) in results.iter().enumerate() {
        assert!(result.ok, "{result:?}");
        assert_eq!(result.output, format!("run {i}"));
    }
    assert_eq!(engine.workspace_entries(), 0);
    assert_eq!(engine.sandbox.history().await.len(), 4);
}

async fn spawn_all<F: std::future::Future>(futures: impl Iterator<Item = F>) -> Vec<F::Output>
where
    F: Send + 'static,
    F::Output: Send + 'static,
{
    let handles: Vec<_> = futures.map(tokio::spawn).collect();
    let mut results = Vec::with_capacity(handles.len());
    for handle in handles {
        results.push(handle.await.unwrap());
    }
    results
}
