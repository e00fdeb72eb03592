// tests/runtime_real_executor.rs

mod common;
use crate::common::{init_tracing, touch_later, with_timeout, CLEAN_ERR};

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use runmanager::config::{build_tree, load_and_validate, JobTree};
use runmanager::engine::{CoreRuntime, RunSummary, Runtime, RuntimeEvent, RuntimeOptions};
use runmanager::exec::RealExecutorBackend;
use runmanager::process::ProcessCreator;
use runmanager::store::{open_store, SharedStateStore, STATE_FILE_PATH};
use runmanager::tree::Scheduler;
use runmanager::types::{JobType, StateStorageMode};
use runmanager_test_utils::builders::{fake_tool, write_idf, JobBuilder};
use runmanager_test_utils::fake_process::{FakeBehavior, FakeProcessCreator};

const CONFIG: &str = r#"
[config]
outdir = "out"

[tool.energyplus]
path = "bin/energyplus"
version = "8.1"

[job.prep]
type = "EnergyPlusPreProcess"
files = ["in.idf"]
children = ["sim"]

[job.sim]
type = "EnergyPlus"
"#;

fn creator() -> FakeProcessCreator {
    FakeProcessCreator::new().on_tool(
        "energyplus",
        FakeBehavior::success()
            .writes("eplusout.err", CLEAN_ERR)
            .writes("eplusout.sql", "")
            .writes("eplusout.eso", ""),
    )
}

/// Load the config in `dir`, rebuild the tree from `store` and run it.
async fn run_config(dir: &Path, store: &SharedStateStore, creator: &FakeProcessCreator) -> (JobTree, RunSummary) {
    let cfg = load_and_validate(dir.join("RunManager.toml")).unwrap();
    let tree = build_tree(&cfg, dir, store, false).unwrap();

    let (rt_tx, rt_rx) = mpsc::channel::<RuntimeEvent>(16);
    let creator: Arc<dyn ProcessCreator> = Arc::new(creator.clone());
    let executor = RealExecutorBackend::new(rt_tx.clone(), creator, Arc::clone(store));
    rt_tx.send(RuntimeEvent::RunRequested).await.unwrap();

    let core = CoreRuntime::new(Scheduler::from_root(&tree.root), RuntimeOptions::default());
    let summary = with_timeout(Runtime::new(core, rt_rx, executor).run())
        .await
        .unwrap();
    (tree, summary)
}

#[tokio::test]
async fn second_invocation_skips_jobs_restored_as_up_to_date() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("RunManager.toml"), CONFIG).unwrap();
    let idf = write_idf(dir.path(), "in.idf", "8.1");
    let store = open_store(StateStorageMode::File, dir.path());
    let creator = creator();

    let (tree, summary) = run_config(dir.path(), &store, &creator).await;
    let (prep, sim) = (tree.jobs["prep"].uuid(), tree.jobs["sim"].uuid());
    assert_eq!(summary.succeeded, [prep, sim]);
    assert_eq!(creator.launched_tools(), ["energyplus"]);
    assert!(dir.path().join(STATE_FILE_PATH).exists());
    assert!(dir.path().join("out/EnergyPlusPreProcess/out.idf").exists());

    // A fresh store handle reads what the first run persisted.
    let store = open_store(StateStorageMode::File, dir.path());
    let (_, summary) = run_config(dir.path(), &store, &creator).await;
    assert_eq!(summary.up_to_date, [prep, sim]);
    assert_eq!(creator.launched_tools().len(), 1, "nothing re-ran");

    touch_later(&idf, &std::fs::read_to_string(&idf).unwrap());
    let (_, summary) = run_config(dir.path(), &store, &creator).await;
    assert_eq!(summary.succeeded, [prep, sim]);
    assert_eq!(creator.launched_tools().len(), 2);
}

#[tokio::test]
async fn failed_job_is_reported_failed_again_when_skipped() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("RunManager.toml"), CONFIG).unwrap();
    write_idf(dir.path(), "in.idf", "8.1");
    let store = open_store(StateStorageMode::Memory, dir.path());
    let failing = FakeProcessCreator::new()
        .on_tool("energyplus", FakeBehavior::success().writes("eplusout.err", "").exit_code(3));

    let (tree, summary) = run_config(dir.path(), &store, &failing).await;
    let sim = tree.jobs["sim"].uuid();
    assert_eq!(summary.failed, [sim]);
    assert!(tree.jobs["sim"]
        .errors()
        .errors()
        .iter()
        .any(|m| m.contains("non-zero exit code of: 3")));

    let (_, summary) = run_config(dir.path(), &store, &failing).await;
    assert_eq!(summary.failed, [sim]);
    assert_eq!(failing.launched_tools().len(), 1);
}

#[tokio::test]
async fn shutdown_cancels_running_jobs_and_blocks_the_rest() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let idf = write_idf(dir.path(), "in.idf", "8.1");

    let root = JobBuilder::new(JobType::Null)
        .param("outdir", dir.path().join("out").to_str().unwrap())
        .build();
    let sim = JobBuilder::new(JobType::EnergyPlus)
        .file(&idf)
        .tool(fake_tool(dir.path(), "energyplus", "8.1"))
        .build();
    let after = JobBuilder::new(JobType::Null).build();
    root.add_child(sim.clone());
    root.set_finished_job(Some(after.clone()));

    let fake = FakeProcessCreator::new().on_tool("energyplus", FakeBehavior::success().hang());
    let creator: Arc<dyn ProcessCreator> = Arc::new(fake.clone());
    let store = open_store(StateStorageMode::Memory, dir.path());

    let (rt_tx, rt_rx) = mpsc::channel::<RuntimeEvent>(16);
    let executor = RealExecutorBackend::new(rt_tx.clone(), creator, store);
    rt_tx.send(RuntimeEvent::RunRequested).await.unwrap();
    let core = CoreRuntime::new(Scheduler::from_root(&root), RuntimeOptions::default());
    let runtime = tokio::spawn(Runtime::new(core, rt_rx, executor).run());

    with_timeout(async {
        while fake.launched_tools().is_empty() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await;
    rt_tx.send(RuntimeEvent::ShutdownRequested).await.unwrap();

    let summary = with_timeout(runtime).await.unwrap().unwrap();
    assert_eq!(summary.succeeded, [root.uuid()]);
    assert_eq!(summary.canceled, [sim.uuid()]);
    assert_eq!(summary.blocked, [after.uuid()]);
    assert!(sim.canceled());
    assert!(!sim.is_running());
}
