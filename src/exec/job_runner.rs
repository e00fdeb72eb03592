// src/exec/job_runner.rs

//! Individual job runner.

use std::sync::Arc;

use anyhow::Context;
use tokio::sync::mpsc;
use tracing::{debug, error, info};

use crate::engine::{JobOutcome, RuntimeEvent};
use crate::job::{Job, JobErrors};
use crate::process::ProcessCreator;
use crate::store::SharedStateStore;
use crate::tree::ScheduledJob;

/// Run one scheduled job (or skip it when up to date), persist its state
/// and report a `JobCompleted` event.
pub async fn run_job(
    scheduled: ScheduledJob,
    creator: Arc<dyn ProcessCreator>,
    store: SharedStateStore,
    runtime_tx: mpsc::Sender<RuntimeEvent>,
) {
    let job = scheduled.job;
    let uuid = scheduled.uuid;

    let outcome = if job.out_of_date() {
        info!(job = %uuid, job_type = %job.job_type(), run_id = scheduled.run_id, "running job");
        let errors = job.run(creator.as_ref()).await;
        if let Err(e) = save_state(&store, &job) {
            error!(job = %uuid, error = %e, "failed to persist job state");
        }
        outcome_of(&job, &errors)
    } else {
        let errors = job.errors();
        info!(job = %uuid, result = ?errors.result, "job is up to date; skipping");
        if errors.succeeded() {
            JobOutcome::UpToDate
        } else {
            JobOutcome::Failed
        }
    };

    debug!(job = %uuid, ?outcome, "reporting completion");
    if runtime_tx
        .send(RuntimeEvent::JobCompleted { job: uuid, outcome })
        .await
        .is_err()
    {
        debug!(job = %uuid, "runtime gone; completion dropped");
    }
}

fn outcome_of(job: &Job, errors: &JobErrors) -> JobOutcome {
    if job.canceled() {
        JobOutcome::Canceled
    } else if errors.succeeded() {
        JobOutcome::Success
    } else {
        JobOutcome::Failed
    }
}

fn save_state(store: &SharedStateStore, job: &Job) -> anyhow::Result<()> {
    let state = job.state();
    let mut guard = store
        .lock()
        .map_err(|_| anyhow::anyhow!("state store lock poisoned"))?;
    guard
        .save(job.uuid(), &state)
        .with_context(|| format!("saving state of job {}", job.uuid()))
}
