// src/tree/scheduler.rs

use std::collections::HashMap;

use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::engine::{JobOutcome, RunSummary};
use crate::job::Job;
use crate::tree::graph::JobGraph;
use crate::tree::job_info::{JobInfo, JobRunState, RunState, ScheduledJob};
use crate::tree::scheduler_step::SchedulerStep;
use crate::tree::state_manager::{ReadOnlyStateManager, StateManager};

/// Scheduler holds the tree's dependency graph plus mutable per-run state.
///
/// It is responsible for:
/// - deciding when a job is ready (parent done, siblings done for a
///   finished job)
/// - recording each job's outcome
/// - failing every pending job below a failed one
#[derive(Debug)]
pub struct Scheduler {
    graph: JobGraph,
    jobs: HashMap<Uuid, JobInfo>,
    run_counter: u64,
    current_run_id: Option<u64>,
}

impl Scheduler {
    pub fn from_root(root: &Job) -> Self {
        let graph = JobGraph::from_root(root);
        let jobs = graph
            .jobs()
            .filter_map(|id| {
                let job = graph.job(id)?.clone();
                let deps = graph.dependencies_of(id).to_vec();
                Some((id, JobInfo::new(job, deps)))
            })
            .collect();

        Self {
            graph,
            jobs,
            run_counter: 0,
            current_run_id: None,
        }
    }

    pub fn is_idle(&self) -> bool {
        self.current_run_id.is_none()
    }

    pub fn current_run_id(&self) -> Option<u64> {
        self.current_run_id
    }

    pub fn run_state_of(&self, job: Uuid) -> Option<JobRunState> {
        let info = self.jobs.get(&job)?;
        Some(info.run_state.into())
    }

    pub fn outcome_of(&self, job: Uuid) -> Option<JobOutcome> {
        self.jobs.get(&job)?.outcome
    }

    /// Whether the dependencies of `job` are satisfied for the current run;
    /// `None` if the job is unknown.
    pub fn deps_satisfied(&self, job: Uuid) -> Option<bool> {
        let info = self.jobs.get(&job)?;
        Some(ReadOnlyStateManager::new(&self.jobs).deps_satisfied_for_info(info))
    }

    pub fn job_ids(&self) -> impl Iterator<Item = Uuid> + '_ {
        self.graph.jobs()
    }

    /// Start a run over the whole tree (production API).
    pub fn handle_start(&mut self) -> Vec<ScheduledJob> {
        self.step_start().newly_scheduled
    }

    pub fn handle_completion(&mut self, job: Uuid, outcome: JobOutcome) -> Vec<ScheduledJob> {
        self.step_completion(job, outcome).newly_scheduled
    }

    /// Manual-step variant of [`Scheduler::handle_start`].
    pub fn step_start(&mut self) -> SchedulerStep {
        self.run_counter += 1;
        self.current_run_id = Some(self.run_counter);
        for info in self.jobs.values_mut() {
            info.run_state = None;
            info.outcome = None;
        }
        debug!(run_id = self.run_counter, "scheduler: starting new run");

        let roots: Vec<Uuid> = self
            .graph
            .jobs()
            .filter(|id| self.graph.dependencies_of(*id).is_empty())
            .collect();

        let mut manager = StateManager::new(&self.graph, &mut self.jobs, self.current_run_id);
        for root in roots {
            manager.mark_job_and_dependents_pending(root);
        }
        let newly_scheduled = manager.collect_new_ready_jobs();
        let run_just_finished = self.maybe_finish_run();

        SchedulerStep {
            newly_scheduled,
            newly_failed: Vec::new(),
            run_just_finished,
        }
    }

    /// Manual-step variant of [`Scheduler::handle_completion`].
    pub fn step_completion(&mut self, job: Uuid, outcome: JobOutcome) -> SchedulerStep {
        let Some(run_id) = self.current_run_id else {
            warn!(job = %job, "completion with no active run; ignoring");
            return SchedulerStep::default();
        };

        let mut newly_scheduled = Vec::new();
        let mut newly_failed = Vec::new();

        match self.jobs.get_mut(&job) {
            Some(info) if info.run_state == Some(RunState::Running) => {
                info.outcome = Some(outcome);
                if outcome.is_success() {
                    info.run_state = Some(RunState::DoneSuccess);
                    debug!(job = %job, run_id, ?outcome, "job completed");
                    let mut manager =
                        StateManager::new(&self.graph, &mut self.jobs, self.current_run_id);
                    newly_scheduled.extend(manager.collect_new_ready_jobs());
                } else {
                    info.run_state = Some(RunState::DoneFailed);
                    warn!(job = %job, run_id, ?outcome, "job did not succeed; failing dependents in this run");
                    newly_failed.push(job);
                    let mut manager =
                        StateManager::new(&self.graph, &mut self.jobs, self.current_run_id);
                    newly_failed.append(&mut manager.mark_dependents_failed(job));
                }
            }
            Some(info) => {
                warn!(job = %job, state = ?info.run_state, "completion for a job that is not running; ignoring");
            }
            None => warn!(job = %job, "completion for unknown job; ignoring"),
        }

        let run_just_finished = self.maybe_finish_run();
        SchedulerStep {
            newly_scheduled,
            newly_failed,
            run_just_finished,
        }
    }

    /// Put dispatched-but-never-sent jobs back to `Pending`.
    pub fn unschedule(&mut self, jobs: &[ScheduledJob]) {
        for scheduled in jobs {
            if let Some(info) = self.jobs.get_mut(&scheduled.uuid) {
                if info.run_state == Some(RunState::Running) {
                    info.run_state = Some(RunState::Pending);
                }
            }
        }
    }

    /// Outcome of every job in the last (or current) run.
    pub fn summary(&self) -> RunSummary {
        let mut summary = RunSummary::default();
        for id in self.graph.jobs() {
            let Some(info) = self.jobs.get(&id) else {
                continue;
            };
            match (info.run_state, info.outcome) {
                (_, Some(JobOutcome::Success)) => summary.succeeded.push(id),
                (_, Some(JobOutcome::UpToDate)) => summary.up_to_date.push(id),
                (_, Some(JobOutcome::Failed)) => summary.failed.push(id),
                (_, Some(JobOutcome::Canceled)) => summary.canceled.push(id),
                (Some(RunState::DoneFailed), None) => summary.blocked.push(id),
                (Some(RunState::Pending) | Some(RunState::Running), None) => {
                    summary.unfinished.push(id)
                }
                _ => {}
            }
        }
        summary
    }

    fn maybe_finish_run(&mut self) -> bool {
        if self.current_run_id.is_none() {
            return false;
        }
        let manager = StateManager::new(&self.graph, &mut self.jobs, self.current_run_id);
        if manager.all_jobs_terminal() {
            info!(run_id = self.current_run_id, "scheduler: all jobs terminal; run finished");
            self.current_run_id = None;
            true
        } else {
            false
        }
    }
}
