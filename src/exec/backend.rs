// src/exec/backend.rs

//! Pluggable executor backend abstraction.
//!
//! The runtime talks to an `ExecutorBackend` instead of a raw mpsc sender,
//! so tests can swap in a fake executor.
//!
//! - `RealExecutorBackend` wraps the `spawn_executor` loop and forwards
//!   scheduled jobs over an mpsc channel.
//! - Tests can provide their own `ExecutorBackend` that records which jobs
//!   were scheduled and directly emits `JobCompleted` events.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use tokio::sync::mpsc;

use crate::engine::RuntimeEvent;
use crate::errors::Result;
use crate::process::ProcessCreator;
use crate::store::SharedStateStore;
use crate::tree::ScheduledJob;

use super::executor_loop::{ExecutorHandle, spawn_executor};

/// Trait abstracting how scheduled jobs are executed.
pub trait ExecutorBackend: Send {
    /// Dispatch the given jobs for execution.
    fn spawn_ready_jobs(
        &mut self,
        jobs: Vec<ScheduledJob>,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;

    /// Ask every running job to stop. Completions still arrive as events.
    fn stop_all(&mut self) {}

    /// Wait for running jobs to wind down before the runtime exits.
    fn shutdown(&mut self) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
        Box::pin(async {})
    }
}

/// Real executor backend used in production.
pub struct RealExecutorBackend {
    handle: ExecutorHandle,
}

impl RealExecutorBackend {
    /// Spawns the background executor loop immediately.
    pub fn new(
        runtime_tx: mpsc::Sender<RuntimeEvent>,
        creator: Arc<dyn ProcessCreator>,
        store: SharedStateStore,
    ) -> Self {
        let handle = spawn_executor(runtime_tx, creator, store);
        Self { handle }
    }
}

impl ExecutorBackend for RealExecutorBackend {
    fn spawn_ready_jobs(
        &mut self,
        jobs: Vec<ScheduledJob>,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        let handle = self.handle.clone();
        Box::pin(async move {
            for job in jobs {
                handle.run(job).await?;
            }
            Ok(())
        })
    }

    fn stop_all(&mut self) {
        self.handle.stop_all();
    }

    fn shutdown(&mut self) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
        let handle = self.handle.clone();
        Box::pin(async move { handle.shutdown().await })
    }
}
