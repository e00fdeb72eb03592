// src/engine/event_handlers.rs

//! Event handling logic for the core runtime.

use tracing::{debug, info};
use uuid::Uuid;

use crate::engine::{JobOutcome, RuntimeOptions};
use crate::tree::{ScheduledJob, Scheduler};

/// Command produced by the pure core, to be executed by the outer IO shell.
#[derive(Debug, Clone)]
pub enum CoreCommand {
    /// Send these jobs to the executor.
    DispatchJobs(Vec<ScheduledJob>),
    /// Ask every running job to stop.
    StopAll,
    /// Request that the process exits (the run is over).
    RequestExit,
}

/// Decision returned by the core after handling a single `RuntimeEvent`.
#[derive(Debug, Clone)]
pub struct CoreStep {
    /// Commands the IO shell should execute.
    pub commands: Vec<CoreCommand>,
    /// Whether the outer runtime loop should keep running.
    pub keep_running: bool,
}

impl CoreStep {
    pub fn continue_with(commands: Vec<CoreCommand>) -> Self {
        Self {
            commands,
            keep_running: true,
        }
    }

    pub fn stop(mut commands: Vec<CoreCommand>) -> Self {
        commands.push(CoreCommand::RequestExit);
        Self {
            commands,
            keep_running: false,
        }
    }
}

/// Start a run over the whole tree, unless one is already active.
pub fn handle_run_request(scheduler: &mut Scheduler, options: &RuntimeOptions) -> CoreStep {
    if !scheduler.is_idle() {
        debug!(run_id = scheduler.current_run_id(), "run already active; ignoring request");
        return CoreStep::continue_with(Vec::new());
    }

    let step = scheduler.step_start();
    let mut commands = Vec::new();
    if !step.newly_scheduled.is_empty() {
        commands.push(CoreCommand::DispatchJobs(step.newly_scheduled));
    }

    // An empty tree finishes immediately.
    if step.run_just_finished && options.exit_when_idle {
        return CoreStep::stop(commands);
    }
    CoreStep::continue_with(commands)
}

/// Record a job's outcome and dispatch whatever became ready.
///
/// While shutting down nothing new is dispatched; the jobs that would have
/// been are left unfinished.
pub fn handle_job_completion(
    scheduler: &mut Scheduler,
    options: &RuntimeOptions,
    shutting_down: bool,
    job: Uuid,
    outcome: JobOutcome,
) -> CoreStep {
    let step = scheduler.step_completion(job, outcome);
    let mut commands = Vec::new();

    if shutting_down {
        if !step.newly_scheduled.is_empty() {
            debug!(count = step.newly_scheduled.len(), "shutting down; not dispatching");
            scheduler.unschedule(&step.newly_scheduled);
        }
        if no_job_running(scheduler) {
            return CoreStep::stop(commands);
        }
        return CoreStep::continue_with(commands);
    }

    if !step.newly_scheduled.is_empty() {
        commands.push(CoreCommand::DispatchJobs(step.newly_scheduled));
    }
    if !step.newly_failed.is_empty() {
        info!(failed = ?step.newly_failed, "jobs failed or blocked in this run");
    }

    if options.exit_when_idle && scheduler.is_idle() {
        return CoreStep::stop(commands);
    }
    CoreStep::continue_with(commands)
}

/// Stop everything; exit at once when nothing is running.
pub fn handle_shutdown(scheduler: &Scheduler) -> CoreStep {
    if no_job_running(scheduler) {
        return CoreStep::stop(Vec::new());
    }
    CoreStep::continue_with(vec![CoreCommand::StopAll])
}

fn no_job_running(scheduler: &Scheduler) -> bool {
    !scheduler
        .job_ids()
        .any(|id| matches!(scheduler.run_state_of(id), Some(crate::tree::JobRunState::Running)))
}
