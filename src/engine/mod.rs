// src/engine/mod.rs

//! Orchestration engine for runmanager.
//!
//! This module ties together:
//! - the tree scheduler
//! - the main runtime event loop that reacts to:
//!   - run requests
//!   - job completion events
//!   - shutdown signals
//!
//! The pure core state machine lives in [`core`]; the async/IO shell is
//! implemented in [`runtime`].

use uuid::Uuid;

/// Outcome of one job for the scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobOutcome {
    /// The job ran and its errors report success.
    Success,
    /// Nothing changed since the last successful run; the job was skipped.
    UpToDate,
    /// The job ran (or was skipped) with a failing verdict.
    Failed,
    /// The job was stopped before it finished.
    Canceled,
}

impl JobOutcome {
    /// Whether jobs depending on this one may run.
    pub fn is_success(self) -> bool {
        matches!(self, JobOutcome::Success | JobOutcome::UpToDate)
    }
}

/// Runtime options used by both the core and the async shell.
#[derive(Debug, Clone, Copy)]
pub struct RuntimeOptions {
    /// If true, exit the runtime once the tree is idle after a run.
    pub exit_when_idle: bool,
}

impl Default for RuntimeOptions {
    fn default() -> Self {
        Self {
            exit_when_idle: true,
        }
    }
}

/// Events flowing into the runtime from the CLI, executors, etc.
#[derive(Debug, Clone)]
pub enum RuntimeEvent {
    /// Run the whole tree. Ignored while a run is active.
    RunRequested,
    /// A job finished with a concrete outcome.
    JobCompleted { job: Uuid, outcome: JobOutcome },
    /// Graceful shutdown requested (e.g. Ctrl-C).
    ShutdownRequested,
}

/// Per-job verdicts of one run, each list in tree order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub succeeded: Vec<Uuid>,
    pub up_to_date: Vec<Uuid>,
    pub failed: Vec<Uuid>,
    pub canceled: Vec<Uuid>,
    /// Never dispatched because something they depend on failed.
    pub blocked: Vec<Uuid>,
    /// Still pending or running when the runtime stopped.
    pub unfinished: Vec<Uuid>,
}

impl RunSummary {
    pub fn all_succeeded(&self) -> bool {
        self.failed.is_empty()
            && self.canceled.is_empty()
            && self.blocked.is_empty()
            && self.unfinished.is_empty()
    }
}

pub mod core;
pub mod event_handlers;
pub mod runtime;

pub use core::CoreRuntime;
pub use event_handlers::{CoreCommand, CoreStep};
pub use runtime::Runtime;
