// tests/merge_optimizer.rs

mod common;
use crate::common::{init_tracing, with_timeout};

use std::path::{Path, PathBuf};

use runmanager::factory::JobFactory;
use runmanager::job::kinds::JobKind;
use runmanager::job::Job;
use runmanager::params::JobParam;
use runmanager::types::{JobType, ResultValue};
use runmanager_test_utils::builders::{fake_tool, JobBuilder};
use runmanager_test_utils::fake_process::FakeProcessCreator;

#[test]
fn null_child_is_absorbed_with_its_files_params_and_children() {
    init_tracing();
    let parent = JobBuilder::new(JobType::Ruby)
        .param("ruby_scriptfile", "/scripts/a.rb")
        .build();
    let null = JobBuilder::new(JobType::Null)
        .param("epwdir", "/weather")
        .file("/models/in.osm")
        .build();
    let grandchild = JobBuilder::new(JobType::ModelToIdf).build();
    parent.add_child(null.clone());
    null.add_child(grandchild.clone());

    JobFactory::merge_job(&parent, &null).unwrap();

    let children = parent.children();
    assert_eq!(children.len(), 1);
    assert_eq!(children[0], grandchild);
    assert_eq!(grandchild.parent(), Some(parent.clone()));
    assert!(null.children().is_empty());
    assert!(null.parent().is_none());

    assert_eq!(parent.params().get_single("epwdir").unwrap(), "/weather");
    assert!(parent.input_files().get_last_by_extension("osm").is_ok());
}

#[test]
fn merge_refuses_unrelated_jobs_and_busy_parents() {
    let parent = JobBuilder::new(JobType::Null).build();
    let stranger = JobBuilder::new(JobType::Null).build();
    let err = JobFactory::merge_job(&parent, &stranger).unwrap_err();
    assert!(err.to_string().contains("not a child"));

    let a = JobBuilder::new(JobType::Null).build();
    let b = JobBuilder::new(JobType::Null).build();
    parent.add_child(a.clone());
    parent.add_child(b.clone());
    let err = JobFactory::merge_job(&parent, &a).unwrap_err();
    assert!(err.to_string().contains("more than one child"));
    assert_eq!(parent.children().len(), 2);
}

#[test]
fn simulation_and_post_processing_stay_separate() {
    init_tracing();
    let sim = JobBuilder::new(JobType::EnergyPlus).build();
    let readvars = JobBuilder::new(JobType::ReadVars).build();
    sim.add_child(readvars.clone());

    assert!(JobFactory::merge_job(&sim, &readvars).is_err());
    JobFactory::optimize_job_tree(&sim);

    assert_eq!(sim.children(), [readvars.clone()]);
    assert_eq!(readvars.parent(), Some(sim));
}

#[test]
fn optimizer_collapses_null_chains_and_finished_jobs() {
    init_tracing();
    let root = JobBuilder::new(JobType::ModelToIdf).build();
    let n1 = JobBuilder::new(JobType::Null).param("a", "1").build();
    let n2 = JobBuilder::new(JobType::Null).param("b", "2").build();
    let sim = JobBuilder::new(JobType::EnergyPlus).build();
    let finished = JobBuilder::new(JobType::Null).param("c", "3").build();
    root.add_child(n1.clone());
    n1.add_child(n2.clone());
    n2.add_child(sim.clone());
    sim.set_finished_job(Some(finished.clone()));

    JobFactory::optimize_job_tree(&root);

    let tree: Vec<JobType> = root.tree().iter().map(|j| j.job_type()).collect();
    assert_eq!(tree, [JobType::ModelToIdf, JobType::EnergyPlus]);
    assert_eq!(root.children(), [sim.clone()]);
    assert!(sim.finished_job().is_none());

    let params = root.params();
    assert_eq!(params.get_single("a").unwrap(), "1");
    assert_eq!(params.get_single("b").unwrap(), "2");
    assert_eq!(sim.params().get_single("c").unwrap(), "3");
}

#[test]
fn ruby_chain_becomes_one_bundled_job() {
    init_tracing();
    let first = JobBuilder::new(JobType::Ruby)
        .param("ruby_scriptfile", "/scripts/first.rb")
        .build();
    let second = JobBuilder::new(JobType::Ruby)
        .param("ruby_scriptfile", "/scripts/second.rb")
        .build();
    let third = JobBuilder::new(JobType::Ruby)
        .param("ruby_scriptfile", "/scripts/third.rb")
        .build();
    first.add_child(second.clone());
    second.add_child(third.clone());

    JobFactory::optimize_job_tree(&first);

    assert!(first.children().is_empty());
    let JobKind::Ruby(ruby) = first.kind() else {
        panic!("expected a ruby job, got {:?}", first.kind());
    };
    let scripts: Vec<_> = ruby
        .bundles
        .iter()
        .map(|b| b.script.clone().unwrap().display().to_string())
        .collect();
    assert_eq!(scripts, ["/scripts/first.rb", "/scripts/second.rb", "/scripts/third.rb"]);
    assert_eq!(ruby.bundles[1].original_uuid, Some(second.uuid()));
    assert_eq!(first.params().get("merged_ruby_jobs").unwrap().children.len(), 3);
}

#[test]
fn ruby_and_user_script_jobs_do_not_merge() {
    let ruby = JobBuilder::new(JobType::Ruby)
        .param("ruby_scriptfile", "/scripts/a.rb")
        .build();
    let user = JobBuilder::new(JobType::UserScript)
        .param("ruby_scriptfile", "/scripts/b.rb")
        .build();
    ruby.add_child(user.clone());

    JobFactory::optimize_job_tree(&ruby);
    assert_eq!(ruby.children(), [user]);
}

/// A Ruby job running `<dir>/<script>` that needs `<dir>/<data>` staged as
/// `data.csv`.
fn ruby_with_data(dir: &Path, script: &str, data: &str) -> Job {
    std::fs::write(dir.join(script), "puts 1\n").unwrap();
    std::fs::write(dir.join(data), "a,b\n").unwrap();
    JobBuilder::new(JobType::Ruby)
        .tool(fake_tool(dir, "ruby", "2.0"))
        .param("ruby_scriptfile", dir.join(script).to_str().unwrap())
        .nested_param(JobParam::with_children(
            "ruby_requiredfiles",
            vec![JobParam::with_children(
                dir.join(data).to_str().unwrap(),
                vec![JobParam::new("data.csv")],
            )],
        ))
        .param("outdir", dir.join("out").to_str().unwrap())
        .build()
}

#[tokio::test]
async fn merged_ruby_jobs_stage_required_files_per_bundle() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let first = ruby_with_data(dir.path(), "a.rb", "a_data.csv");
    let second = ruby_with_data(dir.path(), "b.rb", "b_data.csv");
    first.add_child(second);

    JobFactory::optimize_job_tree(&first);
    assert!(first.children().is_empty());

    let creator = FakeProcessCreator::new();
    let errors = with_timeout(first.run(&creator)).await;
    assert_eq!(errors.result, ResultValue::Success, "{:?}", errors);

    let launched = creator.launched();
    assert_eq!(launched.len(), 1, "one driver run for the whole chain");
    let targets: Vec<PathBuf> = launched[0]
        .required_files
        .iter()
        .map(|(_, target)| target.clone())
        .collect();
    assert_eq!(
        targets,
        [
            PathBuf::from("mergedjob-0/a.rb"),
            PathBuf::from("mergedjob-0/data.csv"),
            PathBuf::from("mergedjob-1/b.rb"),
            PathBuf::from("mergedjob-1/data.csv"),
        ]
    );
    let sources: Vec<&PathBuf> = launched[0].required_files.iter().map(|(s, _)| s).collect();
    assert_eq!(sources[1], &dir.path().join("a_data.csv"));
    assert_eq!(sources[3], &dir.path().join("b_data.csv"));

    let driver = std::fs::read_to_string(first.outdir().join("merged_jobs.rb")).unwrap();
    assert!(driver.contains("$stderr.puts \"#{job['dir']}"));
    assert!(driver.ends_with("exit status\n"));
}
