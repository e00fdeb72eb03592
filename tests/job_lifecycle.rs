// tests/job_lifecycle.rs

mod common;
use crate::common::{init_tracing, output_named, touch_later, with_timeout, CLEAN_ERR, FATAL_ERR};

use std::time::Duration;

use runmanager::job::Job;
use runmanager::types::{JobStatus, JobType, ResultValue, TreeStatus};
use runmanager_test_utils::builders::{fake_tool, write_idf, JobBuilder};
use runmanager_test_utils::fake_process::{FakeBehavior, FakeProcessCreator};

fn energyplus_ok() -> FakeBehavior {
    FakeBehavior::success()
        .writes("eplusout.sql", "sqlite")
        .writes("eplusout.err", CLEAN_ERR)
        .writes("eplusout.eso", "eso")
}

/// EnergyPlusPreProcess root with an EnergyPlus child, rooted in `dir`.
fn preprocess_then_energyplus(dir: &std::path::Path) -> (Job, Job) {
    let idf = write_idf(dir, "in.idf", "8.1");
    let root = JobBuilder::new(JobType::EnergyPlusPreProcess)
        .file(&idf)
        .param("outdir", dir.join("out").to_str().unwrap())
        .base(dir)
        .build();
    let sim = JobBuilder::new(JobType::EnergyPlus)
        .tool(fake_tool(dir, "energyplus", "8.1.0"))
        .base(dir)
        .build();
    root.add_child(sim.clone());
    (root, sim)
}

#[tokio::test]
async fn stop_before_start_finishes_immediately_with_na() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let job = JobBuilder::new(JobType::Null)
        .param("outdir", dir.path().to_str().unwrap())
        .build();
    let creator = FakeProcessCreator::new();

    job.request_stop();
    let errors = with_timeout(job.run(&creator)).await;

    assert_eq!(errors.result, ResultValue::NA);
    assert!(job.canceled());
    assert_eq!(job.status(), JobStatus::Idle);
    assert!(job.last_run().is_none());
    assert!(creator.launched_tools().is_empty());
}

#[tokio::test]
async fn preprocess_then_energyplus_runs_and_becomes_up_to_date() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let (root, sim) = preprocess_then_energyplus(dir.path());
    let creator = FakeProcessCreator::new().on_tool("energyplus", energyplus_ok());

    assert!(root.out_of_date() && sim.out_of_date());
    assert!(root.runnable());
    assert!(!sim.runnable(), "child waits for its parent");

    let errors = with_timeout(root.run(&creator)).await;
    assert!(errors.succeeded(), "{:?}", errors);
    let out_idf = output_named(&root, "out.idf").expect("preprocessed idf");
    let text = std::fs::read_to_string(&out_idf.full_path).unwrap();
    assert!(text.contains("Output:SQLite"));

    assert!(sim.runnable());
    let errors = with_timeout(sim.run(&creator)).await;
    assert!(errors.succeeded(), "{:?}", errors);
    assert_eq!(creator.launched_tools(), ["energyplus"]);

    let spec = &creator.launched()[0];
    assert!(spec.parameters.ends_with(&["in.idf".to_string()]));
    assert!(
        spec.required_files
            .iter()
            .any(|(src, target)| src == &out_idf.full_path && target.as_os_str() == "in.idf")
    );
    assert!(sim.outdir().starts_with(root.outdir()));
    assert!(output_named(&sim, "eplusout.sql").is_some());

    assert!(!root.out_of_date());
    assert!(!sim.out_of_date());
    assert_eq!(root.tree_status(), TreeStatus::Finished);

    // Editing the input makes the whole chain stale again.
    touch_later(&dir.path().join("in.idf"), &std::fs::read_to_string(dir.path().join("in.idf")).unwrap());
    assert!(root.out_of_date());
    assert!(sim.out_of_date());
}

#[tokio::test]
async fn failing_tool_fails_the_job_but_keeps_partial_outputs() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let (root, sim) = preprocess_then_energyplus(dir.path());
    let creator = FakeProcessCreator::new().on_tool(
        "energyplus",
        FakeBehavior::success()
            .writes("eplusout.err", FATAL_ERR)
            .exit_code(1),
    );

    assert!(with_timeout(root.run(&creator)).await.succeeded());
    let errors = with_timeout(sim.run(&creator)).await;

    assert_eq!(errors.result, ResultValue::Fail);
    let messages = errors.errors();
    assert!(messages.iter().any(|m| m.contains("non-zero exit code of: 1")));
    assert!(messages.iter().any(|m| m.contains("Node connection error")));
    assert!(output_named(&sim, "eplusout.err").is_some());
    assert_eq!(root.tree_status(), TreeStatus::Failed);
}

#[tokio::test]
async fn missing_tool_is_a_configuration_failure() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let idf = write_idf(dir.path(), "in.idf", "8.1");
    let sim = JobBuilder::new(JobType::EnergyPlus)
        .file(&idf)
        .param("outdir", dir.path().join("out").to_str().unwrap())
        .build();
    let creator = FakeProcessCreator::new();

    let errors = with_timeout(sim.run(&creator)).await;
    assert_eq!(errors.result, ResultValue::Fail);
    assert!(errors.errors().iter().any(|m| m.contains("Tool not found")));
    assert!(creator.launched_tools().is_empty());
    assert_eq!(sim.status(), JobStatus::Idle);
}

#[tokio::test]
async fn stop_while_running_cancels_the_job() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let idf = write_idf(dir.path(), "in.idf", "8.1");
    let sim = JobBuilder::new(JobType::EnergyPlus)
        .file(&idf)
        .tool(fake_tool(dir.path(), "energyplus", "8.1"))
        .param("outdir", dir.path().join("out").to_str().unwrap())
        .build();
    let creator = std::sync::Arc::new(
        FakeProcessCreator::new().on_tool("energyplus", FakeBehavior::success().hang()),
    );

    let running = sim.spawn(creator.clone());
    with_timeout(async {
        while creator.launched_tools().is_empty() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await;
    running.request_stop();
    let errors = with_timeout(running.wait()).await;

    assert_eq!(errors.result, ResultValue::Fail);
    assert!(sim.canceled());
    assert!(errors.errors().iter().any(|m| m == "Job was canceled"));
    assert_eq!(sim.status(), JobStatus::Idle);
}

#[tokio::test]
async fn finished_job_is_not_runnable_after_a_child_failed() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let creator = FakeProcessCreator::new();

    let tree = |child: Job| {
        let root = JobBuilder::new(JobType::Null)
            .param("outdir", dir.path().join("out").to_str().unwrap())
            .build();
        let finished = JobBuilder::new(JobType::Null).build();
        root.add_child(child);
        root.set_finished_job(Some(finished.clone()));
        (root, finished)
    };

    let (root, finished) = tree(JobBuilder::new(JobType::Null).build());
    with_timeout(root.run(&creator)).await;
    assert!(!finished.runnable(), "children have not run yet");
    for child in root.children() {
        assert!(with_timeout(child.run(&creator)).await.succeeded());
    }
    assert!(finished.runnable());

    // No energyplus tool registered: the child fails before launching anything.
    let (root, finished) = tree(JobBuilder::new(JobType::EnergyPlus).build());
    with_timeout(root.run(&creator)).await;
    for child in root.children() {
        assert_eq!(with_timeout(child.run(&creator)).await.result, ResultValue::Fail);
        assert!(!child.out_of_date());
    }
    assert!(!finished.runnable());
}
