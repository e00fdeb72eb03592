// src/store/mod.rs

//! Persistence of job run state between invocations.
//!
//! Each job's [`JobState`] is saved after it runs and restored when the tree
//! is rebuilt, which is what lets an unchanged job be skipped as up to date.

use std::sync::{Arc, Mutex};

use anyhow::Result;
use uuid::Uuid;

use crate::job::JobState;
use crate::types::StateStorageMode;

mod file;
mod memory;

pub use file::{FileStateStore, STATE_FILE_PATH};
pub use memory::MemoryStateStore;

/// Abstract storage for job states, keyed by job UUID.
pub trait JobStateStore: Send + Sync {
    fn load(&self, job: Uuid) -> Result<Option<JobState>>;
    fn save(&mut self, job: Uuid, state: &JobState) -> Result<()>;
    /// Remove states of jobs that are not in `active_jobs`.
    fn prune(&mut self, active_jobs: &[Uuid]) -> Result<()>;
}

/// Store handle shared between the config builder and the executor.
pub type SharedStateStore = Arc<Mutex<Box<dyn JobStateStore>>>;

/// Store for the given mode, rooted at `root` when file-backed.
pub fn open_store(mode: StateStorageMode, root: impl Into<std::path::PathBuf>) -> SharedStateStore {
    let store: Box<dyn JobStateStore> = match mode {
        StateStorageMode::File => Box::new(FileStateStore::new(root.into())),
        StateStorageMode::Memory => Box::new(MemoryStateStore::new()),
    };
    Arc::new(Mutex::new(store))
}
