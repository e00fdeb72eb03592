// src/store/memory.rs

use std::collections::HashMap;

use anyhow::Result;
use tracing::{debug, info};
use uuid::Uuid;

use crate::job::JobState;
use crate::store::JobStateStore;

/// Keeps job states for the lifetime of the process only.
#[derive(Default)]
pub struct MemoryStateStore {
    map: HashMap<Uuid, JobState>,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl JobStateStore for MemoryStateStore {
    fn load(&self, job: Uuid) -> Result<Option<JobState>> {
        Ok(self.map.get(&job).cloned())
    }

    fn save(&mut self, job: Uuid, state: &JobState) -> Result<()> {
        self.map.insert(job, state.clone());
        debug!(job = %job, "stored job state (memory)");
        Ok(())
    }

    fn prune(&mut self, active_jobs: &[Uuid]) -> Result<()> {
        let initial_len = self.map.len();
        self.map.retain(|k, _| active_jobs.contains(k));
        if self.map.len() < initial_len {
            info!(removed = initial_len - self.map.len(), "pruned stale job states (memory)");
        }
        Ok(())
    }
}
