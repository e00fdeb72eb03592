// src/tree/mod.rs

//! Job tree representation and scheduling.
//!
//! - [`graph`] flattens a job tree into dependency edges: a child waits for
//!   its parent, a finished job waits for its parent and every job in the
//!   parent's children trees.
//! - [`scheduler`] is the per-run state machine that decides which jobs are
//!   ready, and fails the dependents of a failed job.
//! - [`job_info`] provides per-job metadata and the scheduled job type.
//! - [`scheduler_step`] defines the result type for scheduler steps.
//! - [`state_manager`] manages per-run state transitions.

pub mod graph;
pub mod job_info;
pub mod scheduler;
pub mod scheduler_step;
pub mod state_manager;

pub use graph::JobGraph;
pub use job_info::{JobRunState, ScheduledJob};
pub use scheduler::Scheduler;
pub use scheduler_step::SchedulerStep;
