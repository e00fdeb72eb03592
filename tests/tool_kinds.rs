// tests/tool_kinds.rs

mod common;
use crate::common::{init_tracing, with_timeout, CLEAN_ERR};

use std::path::{Path, PathBuf};

use runmanager::types::{JobType, ResultValue};
use runmanager_test_utils::builders::{fake_tool, write_idf, JobBuilder};
use runmanager_test_utils::fake_process::{FakeBehavior, FakeProcessCreator};

fn outdir(dir: &Path) -> String {
    dir.join("out").to_string_lossy().into_owned()
}

fn staged_targets(creator: &FakeProcessCreator, step: usize) -> Vec<PathBuf> {
    creator.launched()[step]
        .required_files
        .iter()
        .map(|(_, target)| target.clone())
        .collect()
}

#[tokio::test]
async fn expand_objects_runs_first_and_energyplus_switches_to_its_output() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let idf = write_idf(dir.path(), "model.idf", "8.1");
    let epw = dir.path().join("chicago.epw");
    std::fs::write(&epw, "weather").unwrap();

    let sim = JobBuilder::new(JobType::EnergyPlus)
        .file(&idf)
        .file(&epw)
        .tool(fake_tool(dir.path(), "expandobjects", "8.1"))
        .tool(fake_tool(dir.path(), "energyplus", "8.1"))
        .param("outdir", &outdir(dir.path()))
        .build();
    let creator = FakeProcessCreator::new()
        .on_tool("expandobjects", FakeBehavior::success().writes("expanded.idf", "expanded"))
        .on_tool(
            "energyplus",
            FakeBehavior::success()
                .writes("eplusout.err", CLEAN_ERR)
                .writes("eplusout.sql", ""),
        );

    let errors = with_timeout(sim.run(&creator)).await;
    assert!(errors.succeeded(), "{:?}", errors);
    assert_eq!(creator.launched_tools(), ["expandobjects", "energyplus"]);

    let launched = creator.launched();
    assert_eq!(
        launched[1].parameters,
        ["-w", "in.epw", "-d", ".", "expanded.idf"]
    );
    let targets = staged_targets(&creator, 1);
    assert!(targets.contains(&PathBuf::from("in.idf")));
    assert!(targets.contains(&PathBuf::from("in.epw")));
}

#[tokio::test]
async fn failing_first_tool_skips_the_rest() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let idf = write_idf(dir.path(), "model.idf", "8.1");
    let sim = JobBuilder::new(JobType::EnergyPlus)
        .file(&idf)
        .tool(fake_tool(dir.path(), "expandobjects", "8.1"))
        .tool(fake_tool(dir.path(), "energyplus", "8.1"))
        .param("outdir", &outdir(dir.path()))
        .build();
    let creator = FakeProcessCreator::new().on_tool("expandobjects", FakeBehavior::success().exit_code(2));

    let errors = with_timeout(sim.run(&creator)).await;
    assert_eq!(errors.result, ResultValue::Fail);
    assert_eq!(creator.launched_tools(), ["expandobjects"]);
}

#[tokio::test]
async fn basement_merges_generated_objects_into_in_idf() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let idf = write_idf(dir.path(), "ground.idf", "8.1");
    let job = JobBuilder::new(JobType::Basement)
        .file(&idf)
        .tool(fake_tool(dir.path(), "basement", "8.1"))
        .param("outdir", &outdir(dir.path()))
        .build();
    let creator = FakeProcessCreator::new().on_tool(
        "basement",
        FakeBehavior::success().writes("EPObjects.TXT", "GroundHeatTransfer:Basement:Objects;\n"),
    );

    let errors = with_timeout(job.run(&creator)).await;
    assert!(errors.succeeded(), "{:?}", errors);
    assert_eq!(staged_targets(&creator, 0), [PathBuf::from("BasementGHTIn.idf")]);

    let merged = std::fs::read_to_string(job.outdir().join("in.idf")).unwrap();
    assert!(merged.starts_with("Version,"));
    assert!(merged.contains("GroundHeatTransfer:Basement:Objects;"));
}

#[tokio::test]
async fn slab_without_generated_objects_fails() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let idf = write_idf(dir.path(), "ground.idf", "8.1");
    let job = JobBuilder::new(JobType::Slab)
        .file(&idf)
        .tool(fake_tool(dir.path(), "slab", "8.1"))
        .param("outdir", &outdir(dir.path()))
        .build();

    let creator = FakeProcessCreator::new();

    let errors = with_timeout(job.run(&creator)).await;
    assert_eq!(errors.result, ResultValue::Fail);
    assert_eq!(staged_targets(&creator, 0), [PathBuf::from("GHTIn.idf")]);
    assert!(errors.errors().iter().any(|m| m.contains("EPObjects.TXT")));
}

#[tokio::test]
async fn translators_and_dakota_stage_their_input_under_a_fixed_name() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let osm = dir.path().join("model.osm");
    std::fs::write(&osm, "OS:Version;").unwrap();
    let study = dir.path().join("study.in");
    std::fs::write(&study, "method").unwrap();

    let cases = [
        (JobType::ModelToIdf, "modeltoidf", osm.clone(), "in.osm", vec!["in.osm", "out.idf"]),
        (
            JobType::Dakota,
            "dakota",
            study.clone(),
            "dakota.in",
            vec!["-i", "dakota.in", "-o", "dakota.out"],
        ),
    ];
    for (job_type, tool, input, staged_as, args) in cases {
        let job = JobBuilder::new(job_type)
            .file(&input)
            .tool(fake_tool(dir.path(), tool, "1.0"))
            .param("outdir", &outdir(dir.path()))
            .build();
        let creator = FakeProcessCreator::new();

        with_timeout(job.run(&creator)).await;
        let spec = &creator.launched()[0];
        assert_eq!(spec.tool.name, tool);
        assert_eq!(spec.parameters, args);
        assert!(spec
            .required_files
            .iter()
            .any(|(src, target)| *src == input && target == Path::new(staged_as)));
    }
}

#[tokio::test]
async fn readvars_writes_its_variable_list_and_stages_the_eso() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let eso = dir.path().join("eplusout.eso");
    std::fs::write(&eso, "eso").unwrap();
    let job = JobBuilder::new(JobType::ReadVars)
        .file(&eso)
        .tool(fake_tool(dir.path(), "readvars", "8.1"))
        .param("outdir", &outdir(dir.path()))
        .build();
    let creator = FakeProcessCreator::new()
        .on_tool("readvars", FakeBehavior::success().writes("eplusout.csv", "a,b\n"));

    let errors = with_timeout(job.run(&creator)).await;
    assert!(errors.succeeded(), "{:?}", errors);
    assert_eq!(creator.launched()[0].parameters, ["eplusout.rvi", "unlimited"]);
    assert!(job.outdir().join("eplusout.rvi").exists());
    assert_eq!(staged_targets(&creator, 0), [PathBuf::from("eplusout.eso")]);
}
