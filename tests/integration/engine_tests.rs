//! Engine-level properties, driven through fake runners

use kiln_sandbox::{
    AdmissionRejection, ExecutionFailure, ExecutionRequest, OutcomeKind, PolicyCategory,
};
use kiln_tests::{
    count_workspaces, engine_on_root, engine_with, engine_with_config, setup_test_logging,
    test_config, GatedRunner, RecordingRunner,
};
use std::sync::Arc;
use std::time::Duration;

fn bash(source: &str) -> ExecutionRequest {
    ExecutionRequest::new(source).with_language("bash")
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_capacity_bounds_concurrent_executions() {
    setup_test_logging();
    let runner = Arc::new(GatedRunner::new());
    let engine = engine_with(runner.clone(), 2);

    let mut running = Vec::new();
    for _ in 0..2 {
        let sandbox = engine.sandbox.clone();
        running.push(tokio::spawn(async move {
            sandbox.submit(bash("echo held")).await
        }));
    }
    runner.wait_started(2).await;

    let status = engine.sandbox.status().await;
    assert_eq!(status.in_flight, 2);
    assert_eq!(status.capacity, 2);

    // no waiting queue: extra requests are refused immediately
    for _ in 0..3 {
        let result = engine.sandbox.submit(bash("echo extra")).await;
        assert_eq!(
            result.failure,
            Some(ExecutionFailure::AdmissionRejected {
                rejection: AdmissionRejection::Capacity {
                    in_flight: 2,
                    capacity: 2
                }
            })
        );
    }
    assert_eq!(runner.started(), 2);

    runner.release(2);
    for handle in running {
        let result = handle.await.unwrap();
        assert!(result.ok, "{result:?}");
    }

    assert_eq!(engine.sandbox.status().await.in_flight, 0);
    assert_eq!(engine.workspace_entries(), 0);

    // slots are reusable once released
    runner.release(1);
    assert!(engine.sandbox.submit(bash("echo again")).await.ok);
}

#[tokio::test]
async fn test_blocked_requests_never_reach_the_runner() {
    let runner = Arc::new(RecordingRunner::new());
    let engine = engine_with(runner.clone(), 4);

    let cases = [
        ("rm -rf /", "bash", PolicyCategory::Destruction),
        ("reboot", "bash", PolicyCategory::SystemControl),
        ("killall node", "bash", PolicyCategory::ProcessControl),
        ("sudo whoami", "bash", PolicyCategory::Privilege),
        ("nc -l 9000", "bash", PolicyCategory::Network),
        ("apt install vim", "bash", PolicyCategory::Packages),
        ("import os\nos.remove('x')", "python", PolicyCategory::LanguageSpecific),
        ("require('child_process')", "javascript", PolicyCategory::LanguageSpecific),
    ];

    for (source, language, category) in cases {
        let result = engine
            .sandbox
            .submit(ExecutionRequest::new(source).with_language(language))
            .await;
        assert!(!result.ok);
        assert_eq!(
            result.failure,
            Some(ExecutionFailure::PolicyViolation { category }),
            "{source}"
        );
        assert_eq!(result.exit_code, None);
        // the caller learns the category, not which rule matched
        assert_eq!(result.output, format!("blocked by policy: {category}"));
    }

    assert_eq!(runner.spawns(), 0);
    assert_eq!(engine.workspace_entries(), 0);
    assert_eq!(engine.sandbox.status().await.in_flight, 0);
}

#[tokio::test]
async fn test_compile_failure_skips_run_stage() {
    let runner = Arc::new(RecordingRunner::failing(&["gcc"]));
    let engine = engine_with(runner.clone(), 1);

    let result = engine
        .sandbox
        .submit(ExecutionRequest::new("int main( {").with_language("c"))
        .await;

    assert_eq!(result.outcome(), OutcomeKind::CompileFailure);
    assert!(result.output.contains("error"));
    assert_eq!(runner.programs(), vec!["gcc".to_string()]);
    assert_eq!(engine.workspace_entries(), 0);
}

#[tokio::test]
async fn test_every_outcome_releases_its_slot() {
    let runner = Arc::new(RecordingRunner::failing(&["ruby"]));
    let engine = engine_with(runner, 1);

    let requests = vec![
        bash("echo ok"),
        bash("sudo ls"),
        ExecutionRequest::new("x").with_language("cobol"),
        ExecutionRequest::new(""),
        ExecutionRequest::new("puts 1").with_language("ruby"),
        ExecutionRequest::new("package main\nfunc main() {}\n"),
    ];
    let mut outcomes = Vec::new();
    for request in requests {
        outcomes.push(engine.sandbox.submit(request).await.outcome());
        assert_eq!(engine.sandbox.status().await.in_flight, 0);
    }

    assert_eq!(
        outcomes,
        vec![
            OutcomeKind::Completed,
            OutcomeKind::PolicyViolation,
            OutcomeKind::UnknownLanguage,
            OutcomeKind::InvalidRequest,
            OutcomeKind::RuntimeFailure,
            // the fake compiler leaves no artifact behind
            OutcomeKind::InternalError,
        ]
    );
    assert_eq!(engine.workspace_entries(), 0);
    assert_eq!(engine.sandbox.history().await.len(), 6);
}

#[tokio::test]
async fn test_history_evicts_oldest_first() {
    let engine = engine_with_config(Arc::new(RecordingRunner::new()), |root| {
        let mut config = test_config(root, 1);
        config.history.capacity = 5;
        config.history.status_window = 2;
        config
    });

    let mut ids = Vec::new();
    for i in 0..6 {
        ids.push(engine.sandbox.submit(bash(&format!("echo {i}"))).await.id);
    }

    let history: Vec<_> = engine
        .sandbox
        .history()
        .await
        .into_iter()
        .map(|entry| entry.id)
        .collect();
    assert_eq!(history, ids[1..].to_vec());

    let recent: Vec<_> = engine
        .sandbox
        .status()
        .await
        .recent_history
        .into_iter()
        .map(|entry| entry.id)
        .collect();
    assert_eq!(recent, ids[4..].to_vec());
}

#[tokio::test]
async fn test_engines_are_isolated() {
    let first_runner = Arc::new(GatedRunner::new());
    let first = engine_with(first_runner.clone(), 1);
    let second = engine_with(Arc::new(RecordingRunner::new()), 1);

    let sandbox = first.sandbox.clone();
    let held = tokio::spawn(async move { sandbox.submit(bash("echo held")).await });
    first_runner.wait_started(1).await;

    // first engine is full, the second one is unaffected
    assert_eq!(
        first.sandbox.submit(bash("echo x")).await.outcome(),
        OutcomeKind::AdmissionRejected
    );
    assert!(second.sandbox.submit(bash("echo y")).await.ok);
    assert_eq!(second.sandbox.history().await.len(), 1);

    first_runner.release(1);
    assert!(held.await.unwrap().ok);
}

#[tokio::test]
async fn test_classification_is_deterministic() {
    let engine = engine_with(Arc::new(RecordingRunner::new()), 1);
    let source = "#include <stdio.h>\nint main(void) { return 0; }\n";

    let first = engine.sandbox.detect(source).id;
    for _ in 0..20 {
        assert_eq!(engine.sandbox.detect(source).id, first);
    }
    assert_eq!(first, "c");

    // auto requests go through the same classifier
    let runner = Arc::new(RecordingRunner::new());
    let engine = engine_with(runner.clone(), 1);
    let result = engine
        .sandbox
        .submit(ExecutionRequest::new("console.log(1)").with_language("auto"))
        .await;
    assert_eq!(result.language.as_deref(), Some("javascript"));
    assert_eq!(runner.programs(), vec!["node".to_string()]);
}

#[tokio::test]
async fn test_result_serializes_failure_reason() {
    let engine = engine_with(Arc::new(RecordingRunner::new()), 1);
    let result = engine.sandbox.submit(bash("shutdown now")).await;

    let value = serde_json::to_value(&result).unwrap();
    assert_eq!(value["ok"], false);
    assert_eq!(value["failure"]["reason"], "policy_violation");
    assert_eq!(value["failure"]["category"], "system_control");
    assert_eq!(value["language"], "bash");
}

#[tokio::test]
async fn test_new_engine_on_shared_root_leaves_running_workspaces() {
    let root = tempfile::tempdir().unwrap();
    let runner = Arc::new(GatedRunner::new());
    let first = engine_on_root(runner.clone(), root.path(), 1);

    let sandbox = first.clone();
    let held = tokio::spawn(async move { sandbox.submit(bash("echo held")).await });
    runner.wait_started(1).await;
    assert_eq!(count_workspaces(root.path()), 1);

    // a second engine starting up sweeps the same root
    let second = engine_on_root(Arc::new(RecordingRunner::new()), root.path(), 1);
    assert_eq!(count_workspaces(root.path()), 1);
    assert!(second.submit(bash("echo other")).await.ok);

    runner.release(1);
    let result = held.await.unwrap();
    assert!(result.ok, "{result:?}");
    assert_eq!(result.output, "ran bash (cwd present)");
    assert_eq!(count_workspaces(root.path()), 0);
}

#[tokio::test]
async fn test_history_timestamp_is_submission_time() {
    let runner = Arc::new(GatedRunner::new());
    let engine = engine_with(runner.clone(), 1);

    let before = chrono::Utc::now();
    let sandbox = engine.sandbox.clone();
    let held = tokio::spawn(async move { sandbox.submit(bash("echo slow")).await });
    runner.wait_started(1).await;
    tokio::time::sleep(Duration::from_millis(300)).await;
    runner.release(1);
    let result = held.await.unwrap();

    let history = engine.sandbox.history().await;
    assert_eq!(history.len(), 1);
    let recorded = history[0].timestamp;
    assert!(recorded >= before);
    assert!(result.duration_ms >= 300);
    // recorded at submission, not once the run finished
    assert!((recorded - before).num_milliseconds() < 250, "{recorded} vs {before}");
}
