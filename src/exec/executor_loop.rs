// src/exec/executor_loop.rs

//! Main executor loop that manages running jobs.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::engine::RuntimeEvent;
use crate::errors::{Result, RunManagerError};
use crate::exec::job_runner::run_job;
use crate::job::Job;
use crate::process::ProcessCreator;
use crate::store::SharedStateStore;
use crate::tree::ScheduledJob;

enum ExecutorCommand {
    Run(ScheduledJob),
    StopAll,
    Shutdown(oneshot::Sender<()>),
}

/// Internal handle for a currently-running job.
struct ActiveJob {
    job: Job,
    handle: tokio::task::JoinHandle<()>,
}

/// Cheap, cloneable handle to the executor loop.
#[derive(Clone)]
pub struct ExecutorHandle {
    tx: mpsc::UnboundedSender<ExecutorCommand>,
}

impl ExecutorHandle {
    pub async fn run(&self, job: ScheduledJob) -> Result<()> {
        self.tx
            .send(ExecutorCommand::Run(job))
            .map_err(|_| RunManagerError::ProcessError("executor loop has stopped".into()))
    }

    pub fn stop_all(&self) {
        if self.tx.send(ExecutorCommand::StopAll).is_err() {
            debug!("executor loop already gone; nothing to stop");
        }
    }

    /// Stop every running job and wait until all of them have returned.
    pub async fn shutdown(&self) {
        let (done_tx, done_rx) = oneshot::channel();
        if self.tx.send(ExecutorCommand::Shutdown(done_tx)).is_err() {
            return;
        }
        let _ = done_rx.await;
    }
}

/// Spawn the background executor loop.
///
/// Each scheduled job runs on its own Tokio task; **per job UUID there is
/// never more than one run in flight**. A request for a job that is still
/// running is ignored.
pub fn spawn_executor(
    runtime_tx: mpsc::Sender<RuntimeEvent>,
    creator: Arc<dyn ProcessCreator>,
    store: SharedStateStore,
) -> ExecutorHandle {
    let (tx, mut rx) = mpsc::unbounded_channel::<ExecutorCommand>();

    tokio::spawn(async move {
        info!("executor loop started");

        let mut active: HashMap<Uuid, ActiveJob> = HashMap::new();

        while let Some(command) = rx.recv().await {
            active.retain(|_, a| !a.handle.is_finished());

            match command {
                ExecutorCommand::Run(scheduled) => {
                    handle_scheduled_job(scheduled, &mut active, &runtime_tx, &creator, &store)
                }
                ExecutorCommand::StopAll => stop_all(&active),
                ExecutorCommand::Shutdown(done) => {
                    stop_all(&active);
                    for (uuid, running) in active.drain() {
                        if let Err(e) = running.handle.await {
                            warn!(job = %uuid, error = %e, "job task ended abnormally");
                        }
                    }
                    let _ = done.send(());
                    break;
                }
            }
        }

        info!("executor loop finished");
    });

    ExecutorHandle { tx }
}

fn handle_scheduled_job(
    scheduled: ScheduledJob,
    active: &mut HashMap<Uuid, ActiveJob>,
    runtime_tx: &mpsc::Sender<RuntimeEvent>,
    creator: &Arc<dyn ProcessCreator>,
    store: &SharedStateStore,
) {
    let uuid = scheduled.uuid;

    if active.contains_key(&uuid) {
        warn!(
            job = %uuid,
            run_id = scheduled.run_id,
            "job already running; ignoring new scheduling request"
        );
        return;
    }

    let job = scheduled.job.clone();
    let rt_tx = runtime_tx.clone();
    let creator = Arc::clone(creator);
    let store = Arc::clone(store);

    let handle = tokio::spawn(async move {
        run_job(scheduled, creator, store, rt_tx).await;
        debug!(job = %uuid, "job runner future finished");
    });

    active.insert(uuid, ActiveJob { job, handle });
}

fn stop_all(active: &HashMap<Uuid, ActiveJob>) {
    for (uuid, running) in active {
        info!(job = %uuid, "requesting stop");
        running.job.request_stop();
    }
}
