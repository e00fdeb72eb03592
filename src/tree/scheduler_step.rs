// src/tree/scheduler_step.rs

//! Step-by-step execution result types for the scheduler.

use uuid::Uuid;

use crate::tree::job_info::ScheduledJob;

/// Structured result of a single scheduler "step".
///
/// Tests use this to step through a tree manually and assert on what
/// changed.
#[derive(Debug, Clone, Default)]
pub struct SchedulerStep {
    /// Jobs that became ready to run as a result of this step.
    pub newly_scheduled: Vec<ScheduledJob>,
    /// Jobs newly marked as failed in this step: the job that failed and
    /// every pending job below it.
    pub newly_failed: Vec<Uuid>,
    /// Whether this step finished the current run.
    pub run_just_finished: bool,
}
