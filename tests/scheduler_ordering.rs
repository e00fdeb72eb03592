// tests/scheduler_ordering.rs

use std::collections::{HashMap, HashSet};

use proptest::prelude::*;
use uuid::Uuid;

use runmanager::engine::JobOutcome;
use runmanager::job::Job;
use runmanager::tree::{JobRunState, Scheduler};
use runmanager::types::JobType;
use runmanager_test_utils::builders::JobBuilder;

fn null_job() -> Job {
    JobBuilder::new(JobType::Null).build()
}

/// Build a tree from `(parent index, as finished job)` pairs. Node `i`
/// hangs below node `parent % i`; a second finished-job request for the
/// same parent becomes a plain child.
fn build_tree(links: &[(usize, bool)]) -> Vec<Job> {
    let mut jobs = vec![null_job()];
    for (i, (parent, finished)) in links.iter().enumerate() {
        let node = null_job();
        let parent = &jobs[parent % (i + 1)];
        if *finished && parent.finished_job().is_none() {
            parent.set_finished_job(Some(node.clone()));
        } else {
            parent.add_child(node.clone());
        }
        jobs.push(node);
    }
    jobs
}

/// What a job waits for: its parent, plus every sibling tree when it is
/// the parent's finished job.
fn expected_deps(job: &Job) -> Vec<Uuid> {
    let Some(parent) = job.parent() else {
        return Vec::new();
    };
    let mut deps = vec![parent.uuid()];
    if job.is_finished_job_of(&parent) {
        for child in parent.children() {
            deps.extend(child.tree().iter().map(Job::uuid));
        }
    }
    deps
}

fn tree_strategy() -> impl Strategy<Value = Vec<(usize, bool)>> {
    proptest::collection::vec((any::<usize>(), proptest::bool::weighted(0.3)), 0..12)
}

proptest! {
    #[test]
    fn dispatch_respects_dependencies_and_failures_block_descendants(
        links in tree_strategy(),
        failing in proptest::collection::hash_set(0..13usize, 0..3),
    ) {
        let jobs = build_tree(&links);
        let by_id: HashMap<Uuid, &Job> = jobs.iter().map(|j| (j.uuid(), j)).collect();
        let failing: HashSet<Uuid> = failing
            .into_iter()
            .filter_map(|i| jobs.get(i).map(Job::uuid))
            .collect();

        let mut scheduler = Scheduler::from_root(&jobs[0]);
        let order: Vec<Uuid> = scheduler.job_ids().collect();
        prop_assert_eq!(order.len(), jobs.len());

        let mut executing: Vec<Uuid> = Vec::new();
        let mut dispatched: Vec<Uuid> = Vec::new();
        let mut check_dispatch = |scheduler: &Scheduler, ids: Vec<Uuid>, executing: &mut Vec<Uuid>| {
            for id in ids {
                for dep in expected_deps(by_id[&id]) {
                    assert_eq!(
                        scheduler.run_state_of(dep),
                        Some(JobRunState::DoneSuccess),
                        "job {id} dispatched before dependency {dep} succeeded"
                    );
                }
                dispatched.push(id);
                executing.push(id);
            }
        };

        let first: Vec<Uuid> = scheduler.handle_start().into_iter().map(|s| s.uuid).collect();
        prop_assert_eq!(&first, &vec![jobs[0].uuid()]);
        check_dispatch(&scheduler, first, &mut executing);

        let mut steps = 0;
        while !executing.is_empty() {
            let id = executing.remove(0);
            steps += 1;
            prop_assert!(steps <= jobs.len(), "a job was dispatched twice");
            let outcome = if failing.contains(&id) {
                JobOutcome::Failed
            } else {
                JobOutcome::Success
            };
            let next: Vec<Uuid> = scheduler
                .handle_completion(id, outcome)
                .into_iter()
                .map(|s| s.uuid)
                .collect();
            check_dispatch(&scheduler, next, &mut executing);
        }
        prop_assert!(scheduler.is_idle(), "run did not terminate");

        // Tree order is topological, so one pass decides every verdict.
        let mut ok: HashMap<Uuid, bool> = HashMap::new();
        let mut want_failed = Vec::new();
        let mut want_blocked = Vec::new();
        let mut want_succeeded = Vec::new();
        for id in &order {
            let deps_ok = expected_deps(by_id[id]).iter().all(|d| ok[d]);
            let good = deps_ok && !failing.contains(id);
            ok.insert(*id, good);
            match (deps_ok, good) {
                (true, true) => want_succeeded.push(*id),
                (true, false) => want_failed.push(*id),
                (false, _) => want_blocked.push(*id),
            }
        }

        let summary = scheduler.summary();
        prop_assert_eq!(&summary.succeeded, &want_succeeded);
        prop_assert_eq!(&summary.failed, &want_failed);
        prop_assert_eq!(&summary.blocked, &want_blocked);
        prop_assert!(summary.unfinished.is_empty());
        prop_assert_eq!(summary.all_succeeded(), failing.is_empty());
        for id in &want_blocked {
            prop_assert!(!dispatched.contains(id));
        }
    }
}

#[test]
fn finished_job_waits_for_every_child_tree() {
    let root = null_job();
    let a = null_job();
    let b = null_job();
    let a1 = null_job();
    let finished = null_job();
    root.add_child(a.clone());
    root.add_child(b.clone());
    a.add_child(a1.clone());
    root.set_finished_job(Some(finished.clone()));

    let mut scheduler = Scheduler::from_root(&root);
    let ids = |jobs: Vec<runmanager::tree::ScheduledJob>| -> Vec<Uuid> {
        jobs.into_iter().map(|s| s.uuid).collect()
    };

    assert_eq!(ids(scheduler.handle_start()), [root.uuid()]);
    assert_eq!(
        ids(scheduler.handle_completion(root.uuid(), JobOutcome::Success)),
        [a.uuid(), b.uuid()]
    );
    assert!(scheduler.handle_completion(b.uuid(), JobOutcome::UpToDate).is_empty());
    assert_eq!(
        ids(scheduler.handle_completion(a.uuid(), JobOutcome::Success)),
        [a1.uuid()]
    );
    assert_eq!(scheduler.deps_satisfied(finished.uuid()), Some(false));
    assert_eq!(
        ids(scheduler.handle_completion(a1.uuid(), JobOutcome::Success)),
        [finished.uuid()]
    );

    let step = scheduler.step_completion(finished.uuid(), JobOutcome::Success);
    assert!(step.run_just_finished);
    assert!(scheduler.is_idle());

    let summary = scheduler.summary();
    assert_eq!(summary.up_to_date, [b.uuid()]);
    assert_eq!(summary.succeeded.len(), 4);
    assert!(summary.all_succeeded());
}

#[test]
fn canceled_child_blocks_the_finished_job_only() {
    let root = null_job();
    let a = null_job();
    let b = null_job();
    let finished = null_job();
    root.add_child(a.clone());
    root.add_child(b.clone());
    root.set_finished_job(Some(finished.clone()));

    let mut scheduler = Scheduler::from_root(&root);
    scheduler.handle_start();
    scheduler.handle_completion(root.uuid(), JobOutcome::Success);

    let step = scheduler.step_completion(a.uuid(), JobOutcome::Canceled);
    assert_eq!(step.newly_failed, [a.uuid(), finished.uuid()]);
    assert_eq!(scheduler.run_state_of(b.uuid()), Some(JobRunState::Running));
    assert!(!scheduler.is_idle());

    let step = scheduler.step_completion(b.uuid(), JobOutcome::Success);
    assert!(step.newly_scheduled.is_empty());
    assert!(step.run_just_finished);

    let summary = scheduler.summary();
    assert_eq!(summary.canceled, [a.uuid()]);
    assert_eq!(summary.blocked, [finished.uuid()]);
    assert!(!summary.all_succeeded());
}

#[test]
fn a_new_run_resets_previous_verdicts() {
    let root = null_job();
    let child = null_job();
    root.add_child(child.clone());

    let mut scheduler = Scheduler::from_root(&root);
    scheduler.handle_start();
    scheduler.handle_completion(root.uuid(), JobOutcome::Failed);
    assert!(scheduler.is_idle());
    assert_eq!(scheduler.summary().blocked, [child.uuid()]);

    assert_eq!(scheduler.current_run_id(), None);
    scheduler.handle_start();
    assert_eq!(scheduler.current_run_id(), Some(2));
    assert_eq!(scheduler.run_state_of(child.uuid()), Some(JobRunState::Pending));
    assert_eq!(scheduler.outcome_of(root.uuid()), None);
}
