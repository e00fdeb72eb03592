// src/lib.rs

pub mod cli;
pub mod config;
pub mod engine;
pub mod errors;
pub mod exec;
pub mod factory;
pub mod files;
pub mod idf;
pub mod job;
pub mod logging;
pub mod params;
pub mod process;
pub mod store;
pub mod tools;
pub mod tree;
pub mod types;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::cli::CliArgs;
use crate::config::{build_tree, load_and_validate, process_options};
use crate::engine::{CoreRuntime, RunSummary, Runtime, RuntimeEvent, RuntimeOptions};
use crate::exec::RealExecutorBackend;
use crate::factory::JobFactory;
use crate::job::Job;
use crate::process::{LocalProcessCreator, ProcessCreator};
use crate::store::open_store;
use crate::tree::Scheduler;

pub use crate::errors::{Result as RunManagerResult, RunManagerError};

/// High-level entry point used by `main.rs`.
///
/// This wires together:
/// - config loading and tree construction
/// - state restore and pruning
/// - the merge optimizer
/// - scheduler / runtime / executor
/// - Ctrl-C handling
pub async fn run(args: CliArgs) -> Result<()> {
    let config_path = PathBuf::from(&args.config);
    let cfg = load_and_validate(&config_path)
        .with_context(|| format!("loading {:?}", config_path))?;
    let root_dir = config_root_dir(&config_path);

    let store = open_store(cfg.config.state_storage, &root_dir);
    let tree = build_tree(&cfg, &root_dir, &store, args.force)?;

    {
        let active: Vec<_> = tree.uuids();
        let mut guard = store
            .lock()
            .map_err(|_| anyhow::anyhow!("state store lock poisoned"))?;
        if let Err(e) = guard.prune(&active) {
            warn!(error = %e, "could not prune stale job states");
        }
    }

    if cfg.config.optimize && !args.no_optimize {
        JobFactory::optimize_job_tree(&tree.root);
    }

    if args.dry_run {
        print_dry_run(&tree.root);
        return Ok(());
    }

    let (rt_tx, rt_rx) = mpsc::channel::<RuntimeEvent>(64);

    let creator: Arc<dyn ProcessCreator> =
        Arc::new(LocalProcessCreator::new(process_options(&cfg.config)));
    let executor = RealExecutorBackend::new(rt_tx.clone(), creator, Arc::clone(&store));

    // Ctrl-C → graceful shutdown.
    {
        let tx = rt_tx.clone();
        tokio::spawn(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(error = %e, "failed to listen for Ctrl+C");
                return;
            }
            let _ = tx.send(RuntimeEvent::ShutdownRequested).await;
        });
    }

    info!(root = %tree.root.uuid(), jobs = tree.root.tree().len(), "starting run");
    rt_tx.send(RuntimeEvent::RunRequested).await?;

    let core = CoreRuntime::new(
        Scheduler::from_root(&tree.root),
        RuntimeOptions {
            exit_when_idle: true,
        },
    );
    let summary = Runtime::new(core, rt_rx, executor).run().await?;

    print_summary(&tree.root, &summary);
    if !summary.all_succeeded() {
        bail!(
            "{} failed, {} canceled, {} blocked, {} unfinished",
            summary.failed.len(),
            summary.canceled.len(),
            summary.blocked.len(),
            summary.unfinished.len()
        );
    }
    Ok(())
}

/// Directory relative paths in the config resolve against.
///
/// - If the config path has a non-empty parent (e.g. "jobs/RunManager.toml"),
///   we use that directory.
/// - If it's just a bare filename, we fall back to the current directory.
fn config_root_dir(config_path: &Path) -> PathBuf {
    match config_path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
    }
}

/// Print the (optimized) tree with each job's up-to-date verdict.
fn print_dry_run(root: &Job) {
    println!("runmanager dry-run");
    print_job(root, 0, "");
    debug!("dry-run complete (no execution)");
}

fn print_job(job: &Job, depth: usize, label: &str) {
    let state = if job.out_of_date() { "out of date" } else { "up to date" };
    println!(
        "{:indent$}- {label}{} [{}] {} ({state})",
        "",
        job.job_type(),
        job.uuid(),
        job.description(),
        indent = depth * 2
    );
    for child in job.children() {
        print_job(&child, depth + 1, "");
    }
    if let Some(finished) = job.finished_job() {
        print_job(&finished, depth + 1, "finished: ");
    }
}

fn print_summary(root: &Job, summary: &RunSummary) {
    let label = |id: &uuid::Uuid| {
        root.tree()
            .into_iter()
            .find(|j| j.uuid() == *id)
            .map(|j| format!("{} {}", j.job_type(), id))
            .unwrap_or_else(|| id.to_string())
    };
    let sections = [
        ("succeeded", &summary.succeeded),
        ("up to date", &summary.up_to_date),
        ("failed", &summary.failed),
        ("canceled", &summary.canceled),
        ("blocked", &summary.blocked),
        ("unfinished", &summary.unfinished),
    ];
    for (name, ids) in sections {
        if ids.is_empty() {
            continue;
        }
        println!("{name} ({}):", ids.len());
        for id in ids {
            println!("  {}", label(id));
        }
    }
    for id in &summary.failed {
        if let Some(job) = root.tree().into_iter().find(|j| j.uuid() == *id) {
            for err in job.errors().errors() {
                println!("  {}: {err}", job.job_type());
            }
        }
    }
}
