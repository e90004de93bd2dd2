// tests/plan.rs

use cmdpipe::plan::{PipelinePlan, PlanStep};
use cmdpipe::types::group_names;
use cmdpipe_test_utils::builders::{cmd, ConfigFileBuilder};

fn step(seq: usize, name: &str, inputs: &[&str], outputs: &[&str]) -> PlanStep {
    PlanStep::new(seq, name, group_names(inputs.iter().copied()), group_names(outputs.iter().copied()))
}

#[test]
fn test_independent_writers_share_a_stage() {
    let plan = PipelinePlan::build(vec![
        step(0, "reset_a", &[], &["a"]),
        step(1, "reset_b", &[], &["b"]),
        step(2, "regroup", &["a"], &["c"]),
        step(3, "stats", &["c"], &[]),
    ]);

    assert_eq!(plan.stages().unwrap(), vec![vec![0, 1], vec![2], vec![3]]);
    assert_eq!(plan.dependencies_of(2), vec![0]);
    assert!(plan.dependencies_of(1).is_empty());
    assert!(plan.is_ordered(0, 3));
    assert!(plan.is_ordered(3, 0));
    assert!(!plan.is_ordered(1, 3));
}

#[test]
fn test_write_after_read_orders_the_writer() {
    let plan = PipelinePlan::build(vec![
        step(0, "read1", &["default"], &[]),
        step(1, "read2", &["default"], &[]),
        step(2, "overwrite", &[], &["default"]),
        step(3, "read3", &["default"], &[]),
    ]);

    assert_eq!(plan.dependencies_of(2), vec![0, 1]);
    assert_eq!(plan.dependencies_of(3), vec![2]);
    assert!(!plan.is_ordered(0, 1));
    assert_eq!(plan.stages().unwrap(), vec![vec![0, 1], vec![2], vec![3]]);
}

#[test]
fn test_display_marks_the_terminal_step() {
    let cfg = ConfigFileBuilder::new()
        .with_metric("m", 10, 1)
        .with_command(cmd::regroup("default", "b", "m", 0, 10, 5))
        .with_command(cmd::stats("b", "m"))
        .build();

    let rendered = cfg.plan().unwrap().to_string();
    assert!(rendered.contains("#0 metric_regroup\n"), "{rendered}");
    assert!(rendered.contains("#1 group_stats (terminal)"), "{rendered}");
    assert!(rendered.contains("after: [0]"), "{rendered}");
    assert!(rendered.contains("stages (2):"), "{rendered}");
}

#[test]
fn test_plan_from_config_uses_stat_stack_ordering() {
    let cfg = ConfigFileBuilder::new()
        .with_metric("m", 10, 1)
        .with_command(cmdpipe::config::CommandConfig::PushStat {
            metric: "m".to_string(),
        })
        .with_command(cmdpipe::config::CommandConfig::PopStat)
        .build();

    let plan = cfg.plan().unwrap();
    assert_eq!(plan.terminal().map(|s| s.name.as_str()), Some("pop_stat"));
    assert_eq!(plan.dependencies_of(1), vec![0]);
}
