// src/tree/state_manager.rs

//! Per-run state management for jobs in the scheduler.

use std::collections::{HashMap, HashSet};

use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::tree::job_info::{JobInfo, RunState, ScheduledJob};
use crate::tree::JobGraph;

/// Manages per-run state transitions for jobs.
pub struct StateManager<'a> {
    graph: &'a JobGraph,
    jobs: &'a mut HashMap<Uuid, JobInfo>,
    current_run_id: Option<u64>,
}

impl<'a> StateManager<'a> {
    pub fn new(
        graph: &'a JobGraph,
        jobs: &'a mut HashMap<Uuid, JobInfo>,
        current_run_id: Option<u64>,
    ) -> Self {
        Self {
            graph,
            jobs,
            current_run_id,
        }
    }

    /// Include `root` and everything below it in this run.
    ///
    /// Jobs already participating keep their current state.
    pub fn mark_job_and_dependents_pending(&mut self, root: Uuid) {
        let mut stack = vec![root];
        let mut visited: HashSet<Uuid> = HashSet::new();

        while let Some(id) = stack.pop() {
            if !visited.insert(id) {
                continue;
            }

            if let Some(info) = self.jobs.get_mut(&id) {
                if info.run_state.is_none() {
                    info.run_state = Some(RunState::Pending);
                    info.outcome = None;
                    debug!(job = %id, "marked Pending for this run");
                }
                stack.extend(self.graph.dependents_of(id).iter().copied());
            } else {
                warn!(job = %id, "node in tree graph not present in jobs map");
            }
        }
    }

    pub fn deps_satisfied_for_info(&self, info: &JobInfo) -> bool {
        ReadOnlyStateManager::new(self.jobs).deps_satisfied_for_info(info)
    }

    /// Mark every pending dependent of a failed job (transitively) as
    /// `DoneFailed`.
    ///
    /// Returns the newly failed jobs, excluding `failed_job` itself.
    pub fn mark_dependents_failed(&mut self, failed_job: Uuid) -> Vec<Uuid> {
        let mut stack: Vec<Uuid> = self.graph.dependents_of(failed_job).to_vec();
        let mut newly_failed = Vec::new();

        while let Some(id) = stack.pop() {
            if let Some(info) = self.jobs.get_mut(&id) {
                match info.run_state {
                    Some(RunState::Pending) => {
                        info.run_state = Some(RunState::DoneFailed);
                        debug!(job = %id, upstream = %failed_job, "blocked by upstream failure");
                        newly_failed.push(id);
                        stack.extend(self.graph.dependents_of(id).iter().copied());
                    }
                    Some(RunState::Running)
                    | Some(RunState::DoneSuccess)
                    | Some(RunState::DoneFailed)
                    | None => {}
                }
            }
        }

        newly_failed
    }

    /// Mark every pending job whose dependencies are satisfied as `Running`
    /// and return them, in tree order.
    pub fn collect_new_ready_jobs(&mut self) -> Vec<ScheduledJob> {
        let candidates: Vec<Uuid> = self
            .graph
            .jobs()
            .filter(|id| {
                self.jobs.get(id).is_some_and(|info| {
                    matches!(info.run_state, Some(RunState::Pending))
                        && self.deps_satisfied_for_info(info)
                })
            })
            .collect();

        let mut ready = Vec::new();
        for id in candidates {
            if let Some(info) = self.jobs.get_mut(&id) {
                info!(
                    job = %id,
                    job_type = %info.job_type,
                    run_id = self.current_run_id,
                    "dependencies satisfied; scheduling job"
                );
                info.run_state = Some(RunState::Running);
                ready.push(ScheduledJob::from_job_info(
                    info,
                    self.current_run_id.unwrap_or(0),
                ));
            }
        }
        ready
    }

    pub fn all_jobs_terminal(&self) -> bool {
        !self.jobs.values().any(|info| {
            matches!(
                info.run_state,
                Some(RunState::Pending) | Some(RunState::Running)
            )
        })
    }
}

/// Read-only view for checking dependency satisfaction.
pub struct ReadOnlyStateManager<'a> {
    jobs: &'a HashMap<Uuid, JobInfo>,
}

impl<'a> ReadOnlyStateManager<'a> {
    pub fn new(jobs: &'a HashMap<Uuid, JobInfo>) -> Self {
        Self { jobs }
    }

    /// A dependency is satisfied when it succeeded in this run, or, if it is
    /// not part of this run, when its last recorded run succeeded.
    pub fn deps_satisfied_for_info(&self, info: &JobInfo) -> bool {
        for dep_id in &info.deps {
            let Some(dep) = self.jobs.get(dep_id) else {
                warn!(job = %info.uuid, dep = %dep_id, "dependency missing from jobs map");
                return false;
            };

            match dep.run_state {
                Some(RunState::DoneSuccess) => {}
                Some(RunState::DoneFailed) | Some(RunState::Pending) | Some(RunState::Running) => {
                    return false;
                }
                None => {
                    if dep.job.last_run().is_none() || !dep.job.errors().succeeded() {
                        return false;
                    }
                }
            }
        }
        true
    }
}
