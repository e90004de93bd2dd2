// tests/executor_failures.rs

use std::sync::Arc;

use cmdpipe::exec::{CommandExecutor, StepError};
use cmdpipe::scheduling::{TaskRegistry, TaskScheduler};
use cmdpipe::session::CommandError;
use cmdpipe_test_utils::{init_tracing, with_timeout, ProbeCommand, ProbeSession};

fn executor(session: &Arc<ProbeSession>) -> CommandExecutor<ProbeSession> {
    CommandExecutor::new(
        session.clone(),
        TaskScheduler::new("cpu", 2),
        TaskRegistry::new(),
    )
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_terminal_failure_fails_the_run() {
    init_tracing();
    let session = ProbeSession::new("probe");
    let exec = executor(&session);

    let err = with_timeout(exec.run(
        Vec::new(),
        ProbeCommand::new("t").fails_with("boom").arc(),
    ))
    .await
    .unwrap_err();

    assert_eq!(err.primary.command(), "#0 t");
    assert!(matches!(
        err.primary.command_error(),
        Some(CommandError::InvalidArgument(msg)) if msg == "boom"
    ));
    assert!(err.others.is_empty());
    assert!(err.to_string().contains("boom"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_failed_writer_fails_dependent_without_running_it() {
    let session = ProbeSession::new("probe");
    let exec = executor(&session);

    let first = vec![ProbeCommand::new("a").writes(&["g"]).fails_with("nope").arc()];
    let last = ProbeCommand::new("b").reads(&["g"]).arc();

    let err = with_timeout(exec.run(first, last)).await.unwrap_err();

    match &err.primary {
        StepError::UpstreamFailed { command, upstream } => {
            assert_eq!(&**command, "#1 b");
            assert_eq!(upstream.command(), "#0 a");
            assert!(matches!(**upstream, StepError::Failed { .. }));
        }
        other => panic!("expected UpstreamFailed, got {other:?}"),
    }
    assert!(!session.started("b"));
    assert_eq!(err.others.len(), 1);
    assert_eq!(err.others[0].command(), "#0 a");
    assert!(err.others[0].is_root_cause());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_failure_propagates_down_a_chain_with_its_root() {
    let session = ProbeSession::new("probe");
    let exec = executor(&session);

    let first = vec![
        ProbeCommand::new("a").writes(&["g"]).fails_with("root").arc(),
        ProbeCommand::new("b").reads(&["g"]).writes(&["h"]).arc(),
    ];
    let last = ProbeCommand::new("c").reads(&["h"]).arc();

    let err = with_timeout(exec.run(first, last)).await.unwrap_err();

    assert_eq!(err.primary.command(), "#2 c");
    assert_eq!(err.primary.root_command(), "#0 a");
    assert!(!session.started("b"));
    assert!(!session.started("c"));

    let roots: Vec<_> = err.root_causes().map(|e| e.command().to_string()).collect();
    assert_eq!(roots, vec!["#0 a"]);
    assert_eq!(err.failures().count(), 3);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_overwritten_failed_writer_still_reports_its_error() {
    init_tracing();
    let session = ProbeSession::new("probe");
    let exec = executor(&session);

    let first = vec![
        ProbeCommand::new("a")
            .writes(&["g"])
            .fails_out_of_memory()
            .arc(),
    ];
    let last = ProbeCommand::new("b").writes(&["g"]).arc();

    let err = with_timeout(exec.run(first, last)).await.unwrap_err();

    assert_eq!(err.primary.command(), "#1 b");
    assert!(!err.primary.is_root_cause());
    assert_eq!(err.primary.root_command(), "#0 a");
    assert!(err.primary.is_out_of_memory());
    assert!(matches!(
        err.primary.command_error(),
        Some(CommandError::OutOfMemory { .. })
    ));

    let roots: Vec<_> = err.root_causes().map(|e| e.command().to_string()).collect();
    assert_eq!(roots, vec!["#0 a"]);
    assert!(err.others.iter().any(StepError::is_out_of_memory));
    assert!(!session.started("b"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_upstream_error_is_the_source_of_a_skipped_step() {
    let session = ProbeSession::new("probe");
    let exec = executor(&session);

    let first = vec![ProbeCommand::new("a").writes(&["g"]).fails_with("disk").arc()];
    let last = ProbeCommand::new("b").reads(&["g"]).arc();

    let err = with_timeout(exec.run(first, last)).await.unwrap_err();

    let source = std::error::Error::source(&err.primary).expect("upstream error as source");
    assert!(source.to_string().contains("#0 a failed"), "{source}");
    assert!(err.primary.to_string().contains("upstream #0 a failed"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_side_branch_failure_is_surfaced_without_touching_terminal() {
    init_tracing();
    let session = ProbeSession::new("probe");
    let exec = executor(&session);

    let first = vec![
        ProbeCommand::new("side")
            .writes(&["a"])
            .sleeps(20)
            .fails_out_of_memory()
            .arc(),
        ProbeCommand::new("independent").writes(&["b"]).arc(),
    ];
    let last = ProbeCommand::new("t").writes(&["t"]).arc();

    let err = with_timeout(exec.run(first, last)).await.unwrap_err();

    assert_eq!(err.primary.command(), "#0 side");
    assert!(err.primary.is_out_of_memory());
    assert!(err.others.is_empty());
    assert!(session.finished("t"));
    assert!(session.finished("independent"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_terminal_error_is_primary_when_both_fail() {
    let session = ProbeSession::new("probe");
    let exec = executor(&session);

    let first = vec![ProbeCommand::new("side").writes(&["a"]).fails_with("side").arc()];
    let last = ProbeCommand::new("t").writes(&["t"]).fails_with("terminal").arc();

    let err = with_timeout(exec.run(first, last)).await.unwrap_err();

    assert_eq!(err.primary.command(), "#1 t");
    assert_eq!(err.others.len(), 1);
    assert_eq!(err.others[0].command(), "#0 side");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_panicking_command_is_reported_and_releases_its_slot() {
    let session = ProbeSession::new("probe");
    let exec = executor(&session);

    let err = with_timeout(exec.run(Vec::new(), ProbeCommand::new("p").panics().arc()))
        .await
        .unwrap_err();

    assert!(matches!(err.primary, StepError::Aborted { .. }));
    assert_eq!(exec.scheduler().held_slots(), 0);
    assert!(exec.registry().is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_command_for_another_session_is_rejected() {
    let session = ProbeSession::new("probe");
    let exec = executor(&session);

    let err = with_timeout(exec.run(
        Vec::new(),
        ProbeCommand::new("x").for_session("elsewhere").arc(),
    ))
    .await
    .unwrap_err();

    assert!(matches!(
        err.primary.command_error(),
        Some(CommandError::WrongSession { expected, actual })
            if expected == "elsewhere" && actual == "probe"
    ));
    assert!(!session.started("x"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_executor_is_reusable_after_a_failed_run() {
    let session = ProbeSession::new("probe");
    let exec = executor(&session);

    let failed = exec
        .run(Vec::new(), ProbeCommand::new("bad").fails_with("x").arc())
        .await;
    assert!(failed.is_err());

    let ok = with_timeout(exec.run(Vec::new(), ProbeCommand::new("good").arc()))
        .await
        .unwrap();
    assert_eq!(ok, "good");
    assert_eq!(exec.scheduler().held_slots(), 0);
}
