// tests/memory_session.rs

use std::sync::Arc;

use cmdpipe::exec::{CommandExecutor, DynCommand};
use cmdpipe::scheduling::{TaskRegistry, TaskScheduler};
use cmdpipe::session::{
    Command, CommandError, CopyGroups, GroupStats, InMemorySession, MetricRegroup, MetricSpec,
    NumGroups, PopStat, PushStat, ResetGroups, SessionOutput,
};
use cmdpipe_test_utils::{init_tracing, with_timeout};

const SID: &str = "mem";

/// Ten docs; metric `m` takes the values 0..=9.
fn session(memory_limit: u64) -> Arc<InMemorySession> {
    Arc::new(InMemorySession::open(SID, 10, memory_limit, &[MetricSpec::new("m", 10, 1)]).unwrap())
}

fn executor(session: &Arc<InMemorySession>) -> CommandExecutor<InMemorySession> {
    CommandExecutor::new(
        session.clone(),
        TaskScheduler::new("cpu", 2),
        TaskRegistry::new(),
    )
}

fn regroup(input: &str, output: &str) -> DynCommand<InMemorySession> {
    Arc::new(MetricRegroup::new(SID, input, output, "m", 0, 10, 5))
}

#[test]
fn test_open_puts_every_doc_in_group_one() {
    let session = session(1 << 20);
    let groups = session.groups("default").unwrap();

    assert_eq!(groups.docs(), &[1; 10]);
    assert_eq!(groups.num_groups(), 1);
    assert_eq!(session.memory_used(), 40);
    assert_eq!(&*session.metric("m").unwrap(), &[0, 1, 2, 3, 4, 5, 6, 7, 8, 9]);
}

#[test]
fn test_open_fails_when_default_groups_do_not_fit() {
    let err = InMemorySession::open(SID, 10, 39, &[]).unwrap_err();
    assert!(err.is_out_of_memory());
}

#[test]
fn test_regroup_buckets_with_gutters() {
    let session = session(1 << 20);
    let out = MetricRegroup::new(SID, "default", "b", "m", 2, 8, 3)
        .apply(&session)
        .unwrap();

    // 2 regular buckets ([2,5), [5,8)) plus the two gutters.
    assert_eq!(out, SessionOutput::NumGroups(4));
    let groups = session.groups("b").unwrap();
    assert_eq!(groups.docs(), &[1, 1, 2, 2, 2, 3, 3, 3, 4, 4]);
}

#[test]
fn test_regroup_keeps_filtered_docs_filtered() {
    let session = session(1 << 20);
    let mut docs = vec![1; 10];
    docs[0] = 0;
    docs[9] = 0;
    session.set_groups("partial", docs, 1).unwrap();

    regroup("partial", "b").apply(&session).unwrap();
    let groups = session.groups("b").unwrap();
    assert_eq!(groups.docs()[0], 0);
    assert_eq!(groups.docs()[9], 0);
    assert_eq!(groups.docs()[1], 2);
}

#[test]
fn test_regroup_rejects_bad_ranges() {
    let session = session(1 << 20);
    let err = MetricRegroup::new(SID, "default", "b", "m", 5, 5, 1)
        .apply(&session)
        .unwrap_err();
    assert!(matches!(err, CommandError::InvalidArgument(_)));

    let err = MetricRegroup::new(SID, "default", "b", "nope", 0, 5, 1)
        .apply(&session)
        .unwrap_err();
    assert!(matches!(err, CommandError::UnknownMetric(name) if name == "nope"));
}

#[test]
fn test_regroup_over_the_full_i64_range() {
    let session = session(1 << 20);
    let out = MetricRegroup::new(SID, "default", "b", "m", i64::MIN, i64::MAX, i64::MAX)
        .apply(&session)
        .unwrap();

    // Three regular buckets plus the gutters; 0..=9 all fall in the second.
    assert_eq!(out, SessionOutput::NumGroups(5));
    assert_eq!(session.groups("b").unwrap().docs(), &[3; 10]);
}

#[test]
fn test_regroup_with_too_many_buckets_is_invalid() {
    let session = session(1 << 20);
    for (min, max) in [(i64::MIN, i64::MAX), (0, 1 << 40)] {
        let err = MetricRegroup::new(SID, "default", "b", "m", min, max, 1)
            .apply(&session)
            .unwrap_err();
        assert!(matches!(err, CommandError::InvalidArgument(_)), "{err}");
    }
    assert!(session.groups("b").is_err());
    assert_eq!(session.memory_used(), 40);
}

#[test]
fn test_bucket_count_edges() {
    assert_eq!(MetricRegroup::bucket_count(0, 10, 5), Some(4));
    assert_eq!(MetricRegroup::bucket_count(0, 11, 5), Some(5));
    assert_eq!(MetricRegroup::bucket_count(0, 10, 0), None);
    assert_eq!(MetricRegroup::bucket_count(10, 0, 1), None);
    assert_eq!(MetricRegroup::bucket_count(0, i64::from(u32::MAX) - 2, 1), Some(u32::MAX));
    assert_eq!(MetricRegroup::bucket_count(0, i64::from(u32::MAX) - 1, 1), None);
}

#[test]
fn test_metric_column_with_huge_multiplier_stays_in_range() {
    let spec = MetricSpec {
        name: "wide".to_string(),
        modulus: 7,
        multiplier: i64::MAX,
        offset: i64::MAX,
    };
    let session = InMemorySession::open(SID, 10, 1 << 20, &[spec]).unwrap();
    let values = session.metric("wide").unwrap();

    assert_eq!(values.len(), 10);
    assert!(values.iter().all(|v| (0..7).contains(v)), "{values:?}");
}

#[test]
fn test_set_groups_rejects_ids_above_the_group_count() {
    let session = session(1 << 20);
    let mut docs = vec![1; 10];
    docs[4] = 3;

    let err = session.set_groups("bad", docs, 2).unwrap_err();
    assert!(matches!(err, CommandError::InvalidArgument(ref msg) if msg.contains("exceeds")), "{err}");
    assert!(session.groups("bad").is_err());
    assert_eq!(session.memory_used(), 40);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_pipeline_regroup_then_stats() {
    init_tracing();
    let session = session(1 << 20);
    let exec = executor(&session);

    let first = vec![regroup("default", "b")];
    let last: DynCommand<_> = Arc::new(GroupStats::new(SID, "b", "m"));

    let out = with_timeout(exec.run(first, last)).await.unwrap();

    // Groups: 1 = below 0 (none), 2 = [0,5), 3 = [5,10), 4 = at or above 10.
    assert_eq!(out, SessionOutput::GroupStats(vec![0, 0, 10, 35, 0]));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_nested_regroup_multiplies_group_count() {
    let session = session(1 << 20);
    let exec = executor(&session);

    let first = vec![regroup("default", "a"), regroup("a", "b")];
    let last: DynCommand<_> = Arc::new(NumGroups::new(SID, "b"));

    let out = with_timeout(exec.run(first, last)).await.unwrap();
    assert_eq!(out, SessionOutput::NumGroups(16));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_out_of_memory_fails_the_run_and_leaves_budget_intact() {
    let session = session(40);
    let exec = executor(&session);

    let first = vec![regroup("default", "b")];
    let last: DynCommand<_> = Arc::new(NumGroups::new(SID, "b"));

    let err = with_timeout(exec.run(first, last)).await.unwrap_err();

    assert_eq!(err.primary.root_command(), "#0 metric_regroup");
    assert!(err.others.iter().any(|e| e.is_out_of_memory()));
    assert_eq!(session.memory_used(), 40);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_rewriting_a_group_frees_the_old_array() {
    let session = session(120);
    let exec = executor(&session);

    let first = vec![regroup("default", "b"), regroup("default", "b")];
    let last: DynCommand<_> = Arc::new(NumGroups::new(SID, "b"));

    with_timeout(exec.run(first, last)).await.unwrap();
    assert_eq!(session.memory_used(), 80);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_copy_and_reset_groups() {
    let session = session(1 << 20);
    let exec = executor(&session);

    let first: Vec<DynCommand<_>> = vec![
        regroup("default", "b"),
        Arc::new(CopyGroups::new(SID, "b", "c")),
        Arc::new(ResetGroups::new(SID, "b")),
    ];
    let last: DynCommand<_> = Arc::new(NumGroups::new(SID, "c"));

    let out = with_timeout(exec.run(first, last)).await.unwrap();

    assert_eq!(out, SessionOutput::NumGroups(4));
    assert_eq!(session.groups("b").unwrap().num_groups(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_stat_stack_commands_are_ordered() {
    let session = session(1 << 20);
    let exec = executor(&session);

    let first: Vec<DynCommand<_>> = vec![
        Arc::new(PushStat::new(SID, "m")),
        Arc::new(PushStat::new(SID, "m")),
    ];
    let last: DynCommand<_> = Arc::new(PopStat::new(SID));

    let out = with_timeout(exec.run(first, last)).await.unwrap();
    assert_eq!(out, SessionOutput::NumStats(1));
    assert_eq!(session.stats(), vec!["m".to_string()]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_pop_on_empty_stack_fails() {
    let session = session(1 << 20);
    let exec = executor(&session);

    let err = with_timeout(exec.run(Vec::new(), Arc::new(PopStat::new(SID))))
        .await
        .unwrap_err();
    assert!(matches!(
        err.primary.command_error(),
        Some(CommandError::EmptyStatStack)
    ));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_unknown_group_is_a_command_error_not_a_hang() {
    let session = session(1 << 20);
    let exec = executor(&session);

    let err = with_timeout(exec.run(Vec::new(), Arc::new(NumGroups::new(SID, "ghost"))))
        .await
        .unwrap_err();
    assert!(matches!(
        err.primary.command_error(),
        Some(CommandError::UnknownGroup(name)) if name == "ghost"
    ));
}

#[test]
fn test_display_of_group_stats() {
    let rendered = SessionOutput::GroupStats(vec![0, 3, 4]).to_string();
    assert_eq!(rendered, "group\tsum\n1\t3\n2\t4\n");
}
