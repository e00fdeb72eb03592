use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;
use runmanager::engine::{JobOutcome, RuntimeEvent};
use runmanager::errors::{Result, RunManagerError};
use runmanager::exec::ExecutorBackend;
use runmanager::tree::ScheduledJob;
use uuid::Uuid;

/// A fake executor that:
/// - records which jobs were "run"
/// - immediately reports `JobCompleted` for each scheduled job, with the
///   outcome configured for it (`Success` by default).
pub struct FakeExecutor {
    runtime_tx: mpsc::Sender<RuntimeEvent>,
    executed: Arc<Mutex<Vec<Uuid>>>,
    outcomes: HashMap<Uuid, JobOutcome>,
}

impl FakeExecutor {
    pub fn new(runtime_tx: mpsc::Sender<RuntimeEvent>, executed: Arc<Mutex<Vec<Uuid>>>) -> Self {
        Self {
            runtime_tx,
            executed,
            outcomes: HashMap::new(),
        }
    }

    pub fn with_outcome(mut self, job: Uuid, outcome: JobOutcome) -> Self {
        self.outcomes.insert(job, outcome);
        self
    }
}

impl ExecutorBackend for FakeExecutor {
    fn spawn_ready_jobs(
        &mut self,
        jobs: Vec<ScheduledJob>,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        let tx = self.runtime_tx.clone();
        let executed = Arc::clone(&self.executed);
        let outcomes = self.outcomes.clone();

        Box::pin(async move {
            for j in jobs {
                executed.lock().unwrap().push(j.uuid);

                let outcome = outcomes.get(&j.uuid).copied().unwrap_or(JobOutcome::Success);
                tx.send(RuntimeEvent::JobCompleted { job: j.uuid, outcome })
                    .await
                    .map_err(|e| RunManagerError::ProcessError(e.to_string()))?;
            }
            Ok(())
        })
    }
}
