// src/engine/core.rs

//! Pure core runtime state machine.
//!
//! This module contains a synchronous, deterministic "core runtime" that
//! consumes [`RuntimeEvent`]s and produces:
//! - an updated core state
//! - a list of "commands" describing what the IO shell should do next
//!
//! The async/IO-heavy shell (`engine::runtime::Runtime`) is responsible for:
//! - reading events from channels
//! - sending `ScheduledJob`s to the executor
//! - handling Ctrl+C / shutdown
//!
//! The core is unit tested without any Tokio, channels or processes.

use crate::engine::event_handlers::{
    CoreStep, handle_job_completion, handle_run_request, handle_shutdown,
};
use crate::engine::{RunSummary, RuntimeEvent, RuntimeOptions};
use crate::tree::Scheduler;

/// Pure core runtime state.
///
/// Owns the tree scheduler and the runtime options. It has **no**
/// channels, no Tokio types, and does not perform any IO.
#[derive(Debug)]
pub struct CoreRuntime {
    scheduler: Scheduler,
    options: RuntimeOptions,
    shutting_down: bool,
}

impl CoreRuntime {
    pub fn new(scheduler: Scheduler, options: RuntimeOptions) -> Self {
        Self {
            scheduler,
            options,
            shutting_down: false,
        }
    }

    /// Expose whether the scheduler is idle (for tests).
    pub fn is_idle(&self) -> bool {
        self.scheduler.is_idle()
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    pub fn summary(&self) -> RunSummary {
        self.scheduler.summary()
    }

    /// Handle a single runtime event, updating core state and returning the
    /// resulting commands for the IO shell.
    pub fn step(&mut self, event: RuntimeEvent) -> CoreStep {
        match event {
            RuntimeEvent::RunRequested if self.shutting_down => CoreStep::stop(Vec::new()),
            RuntimeEvent::RunRequested => handle_run_request(&mut self.scheduler, &self.options),
            RuntimeEvent::JobCompleted { job, outcome } => handle_job_completion(
                &mut self.scheduler,
                &self.options,
                self.shutting_down,
                job,
                outcome,
            ),
            RuntimeEvent::ShutdownRequested => {
                self.shutting_down = true;
                handle_shutdown(&self.scheduler)
            }
        }
    }
}
