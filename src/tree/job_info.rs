// src/tree/job_info.rs

//! Per-job scheduling metadata and per-run state.

use uuid::Uuid;

use crate::engine::JobOutcome;
use crate::job::Job;
use crate::types::JobType;

/// Per-run state of a job (internal).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    /// Part of this run, waiting on dependencies.
    Pending,
    /// Dispatched to the executor.
    Running,
    /// Ran successfully, or was already up to date.
    DoneSuccess,
    /// Failed or was canceled in this run, or was blocked by a failed
    /// dependency.
    DoneFailed,
}

/// Public, read-only view of a job's per-run state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobRunState {
    NotInRun,
    Pending,
    Running,
    DoneSuccess,
    DoneFailed,
}

impl From<Option<RunState>> for JobRunState {
    fn from(state: Option<RunState>) -> Self {
        match state {
            None => JobRunState::NotInRun,
            Some(RunState::Pending) => JobRunState::Pending,
            Some(RunState::Running) => JobRunState::Running,
            Some(RunState::DoneSuccess) => JobRunState::DoneSuccess,
            Some(RunState::DoneFailed) => JobRunState::DoneFailed,
        }
    }
}

/// Static job information plus per-run state.
#[derive(Debug, Clone)]
pub struct JobInfo {
    pub uuid: Uuid,
    pub job: Job,
    pub job_type: JobType,
    pub deps: Vec<Uuid>,
    pub run_state: Option<RunState>,
    /// What the executor reported; `None` for jobs blocked by a failure.
    pub outcome: Option<JobOutcome>,
}

impl JobInfo {
    pub fn new(job: Job, deps: Vec<Uuid>) -> Self {
        Self {
            uuid: job.uuid(),
            job_type: job.job_type(),
            job,
            deps,
            run_state: None,
            outcome: None,
        }
    }
}

/// A job the scheduler wants the executor to run now.
#[derive(Debug, Clone)]
pub struct ScheduledJob {
    pub uuid: Uuid,
    pub job: Job,
    /// All jobs dispatched during one run share the same `run_id`.
    pub run_id: u64,
}

impl ScheduledJob {
    pub fn from_job_info(info: &JobInfo, run_id: u64) -> Self {
        Self {
            uuid: info.uuid,
            job: info.job.clone(),
            run_id,
        }
    }
}
