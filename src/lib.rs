// src/lib.rs

pub mod cli;
pub mod config;
pub mod errors;
pub mod exec;
pub mod logging;
pub mod plan;
pub mod scheduling;
pub mod session;
pub mod types;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use futures::future::join_all;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::cli::CliArgs;
use crate::config::loader::load_and_validate;
use crate::config::model::{ConfigFile, RuntimeSection};
use crate::exec::CommandExecutor;
use crate::scheduling::{SchedulerGroup, TaskContext, TaskRegistry, TaskScheduler};
use crate::session::{InMemorySession, SessionOutput};

/// High-level entry point.
///
/// Loads and validates the config named by `args`, then hands over to
/// [`run_with_config`].
pub async fn run(args: CliArgs) -> Result<()> {
    let cfg = load_config(&args)?;
    run_with_config(&args, cfg).await
}

/// Load and validate the config named by `args`.
pub fn load_config(args: &CliArgs) -> Result<ConfigFile> {
    let config_path = PathBuf::from(&args.config);
    load_and_validate(&config_path)
        .with_context(|| format!("loading config from {}", config_path.display()))
}

/// Build the Tokio runtime described by `[runtime]`.
pub fn build_runtime(section: &RuntimeSection) -> std::io::Result<tokio::runtime::Runtime> {
    let mut builder = tokio::runtime::Builder::new_multi_thread();
    builder
        .enable_all()
        .thread_name("cmdpipe-worker")
        .max_blocking_threads(section.max_blocking_threads);
    if let Some(workers) = section.worker_threads {
        builder.worker_threads(workers);
    }
    builder.build()
}

/// Run an already loaded config.
///
/// This wires together:
/// - the scheduler group (CPU scheduler plus remote sibling)
/// - the process-wide task registry
/// - one session and executor per `--repeat` run, all running concurrently
/// - (optional) periodic status logging
pub async fn run_with_config(args: &CliArgs, mut cfg: ConfigFile) -> Result<()> {
    if let Some(slots) = args.cpu_slots {
        cfg.scheduler.cpu_slots = slots;
    }

    if args.dry_run {
        print_dry_run(&cfg)?;
        return Ok(());
    }

    let group = SchedulerGroup::new();
    let cpu = group.add_scheduler("cpu", cfg.scheduler.cpu_slots);
    let remote = group.add_scheduler("remote", cfg.scheduler.remote_slots);
    let registry = TaskRegistry::new();

    let status = (cfg.runtime.status_interval_ms > 0).then(|| {
        spawn_status_reporter(
            group.clone(),
            registry.clone(),
            Duration::from_millis(cfg.runtime.status_interval_ms),
        )
    });

    let repeat = args.repeat.max(1);
    info!(
        session = %cfg.session.id,
        commands = cfg.commands().len(),
        cpu_slots = cfg.scheduler.cpu_slots,
        repeat,
        "starting"
    );

    let runs = (0..repeat).map(|run| {
        let session_id = if repeat == 1 {
            cfg.session.id.clone()
        } else {
            format!("{}-{run}", cfg.session.id)
        };
        run_once(&cfg, session_id, cpu.clone(), remote.clone(), registry.clone())
    });
    let results = join_all(runs).await;

    if let Some(status) = status {
        status.abort();
    }
    for scheduler in group.schedulers() {
        let stats = scheduler.stats();
        debug!(
            scheduler = %stats.name,
            total_grants = stats.total_grants,
            total_wait = ?stats.total_wait,
            "scheduler totals"
        );
    }

    let mut failed = 0;
    for (session_id, result) in results {
        match result {
            Ok(output) => {
                if repeat > 1 {
                    println!("[{session_id}]");
                }
                println!("{output}");
            }
            Err(err) => {
                failed += 1;
                error!(session = %session_id, error = %format!("{err:#}"), "run failed");
            }
        }
    }

    if failed > 0 {
        anyhow::bail!("{failed} of {repeat} pipeline run(s) failed");
    }
    Ok(())
}

async fn run_once(
    cfg: &ConfigFile,
    session_id: String,
    cpu: TaskScheduler,
    remote: TaskScheduler,
    registry: TaskRegistry,
) -> (String, Result<SessionOutput>) {
    let result = open_and_run(cfg, &session_id, cpu, remote, registry).await;
    (session_id, result)
}

/// Open one session and run the configured pipeline against it.
///
/// Session loading is admitted by the remote scheduler; commands by `cpu`.
async fn open_and_run(
    cfg: &ConfigFile,
    session_id: &str,
    cpu: TaskScheduler,
    remote: TaskScheduler,
    registry: TaskRegistry,
) -> Result<SessionOutput> {
    let session = {
        let _slot = remote.acquire_slot().await;
        InMemorySession::open(
            session_id,
            cfg.session.num_docs,
            cfg.session.memory_limit_bytes,
            &cfg.metric_specs(),
        )
        .with_context(|| format!("opening session '{session_id}'"))?
    };

    let context = TaskContext {
        user_name: std::env::var("USER").ok(),
        client_name: Some("cmdpipe-cli".to_string()),
        dataset: Some(cfg.session.id.clone()),
    };
    let executor = CommandExecutor::new(Arc::new(session), cpu, registry).with_context(context);

    let (first, last) = cfg.build_pipeline(session_id)?;
    let output = executor.run(first, last).await?;
    Ok(output)
}

fn spawn_status_reporter(
    group: SchedulerGroup,
    registry: TaskRegistry,
    period: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        // The first tick completes immediately.
        ticker.tick().await;
        loop {
            ticker.tick().await;
            for scheduler in group.schedulers() {
                let stats = scheduler.stats();
                info!(
                    scheduler = %stats.name,
                    held = stats.held,
                    capacity = stats.capacity,
                    waiting = stats.waiting,
                    "scheduler status"
                );
                for snapshot in scheduler.snapshot_running_tasks() {
                    info!(scheduler = %stats.name, "{snapshot}");
                }
            }
            debug!(in_flight = registry.len(), "task registry status");
        }
    })
}

/// Dry-run output: scheduler settings, then the plan with its stages.
fn print_dry_run(cfg: &ConfigFile) -> Result<()> {
    println!("cmdpipe dry-run");
    println!("  scheduler.cpu_slots = {}", cfg.scheduler.cpu_slots);
    println!("  scheduler.remote_slots = {}", cfg.scheduler.remote_slots);
    println!(
        "  session = {} ({} docs, {} bytes)",
        cfg.session.id, cfg.session.num_docs, cfg.session.memory_limit_bytes
    );
    println!();

    let plan = cfg.plan()?;
    plan.stages()?;
    print!("{plan}");

    debug!("dry-run complete (no execution)");
    Ok(())
}
