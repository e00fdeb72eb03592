// src/exec/mod.rs

//! Job execution layer.
//!
//! Runs scheduled jobs on Tokio tasks and reports back to the orchestration
//! runtime via `RuntimeEvent`s.
//!
//! - [`executor_loop`] owns the loop that tracks running jobs.
//! - [`job_runner`] runs one job and persists its state.
//! - [`backend`] provides the `ExecutorBackend` trait and the
//!   `RealExecutorBackend` used in production, which tests replace with a
//!   fake implementation.

pub mod backend;
pub mod executor_loop;
pub mod job_runner;

pub use backend::{ExecutorBackend, RealExecutorBackend};
pub use executor_loop::{ExecutorHandle, spawn_executor};
