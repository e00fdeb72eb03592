// src/store/file.rs

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::{debug, info};
use uuid::Uuid;

use crate::job::JobState;
use crate::store::JobStateStore;

/// Relative path (from the config root) to the state file.
pub const STATE_FILE_PATH: &str = ".runmanager/jobstates.json";

/// Stores job states as one JSON object in `<root>/.runmanager/jobstates.json`.
pub struct FileStateStore {
    root: PathBuf,
}

impl FileStateStore {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    pub fn path(&self) -> PathBuf {
        self.root.join(STATE_FILE_PATH)
    }
}

impl JobStateStore for FileStateStore {
    fn load(&self, job: Uuid) -> Result<Option<JobState>> {
        let map = load_all(&self.path())?;
        Ok(map.get(&job).cloned())
    }

    fn save(&mut self, job: Uuid, state: &JobState) -> Result<()> {
        let path = self.path();
        let mut map = load_all(&path)?;
        map.insert(job, state.clone());
        save_all(&path, &map)?;
        debug!(job = %job, path = ?path, "stored job state (file)");
        Ok(())
    }

    fn prune(&mut self, active_jobs: &[Uuid]) -> Result<()> {
        let path = self.path();
        let mut map = load_all(&path)?;
        let initial_len = map.len();
        map.retain(|k, _| active_jobs.contains(k));

        if map.len() < initial_len {
            save_all(&path, &map)?;
            info!(removed = initial_len - map.len(), "pruned stale job states (file)");
        }
        Ok(())
    }
}

fn load_all(path: &Path) -> Result<BTreeMap<Uuid, JobState>> {
    if !path.exists() {
        return Ok(BTreeMap::new());
    }
    let file = File::open(path).with_context(|| format!("opening state file at {:?}", path))?;
    serde_json::from_reader(BufReader::new(file))
        .with_context(|| format!("parsing state file at {:?}", path))
}

fn save_all(path: &Path, map: &BTreeMap<Uuid, JobState>) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("creating state directory at {:?}", parent))?;
    }

    // An interrupted save must leave the previous file intact.
    let tmp = path.with_extension("json.tmp");
    let file = File::create(&tmp).with_context(|| format!("creating state file at {:?}", tmp))?;
    let mut writer = BufWriter::new(file);
    serde_json::to_writer_pretty(&mut writer, map)?;
    writer.flush()?;
    drop(writer);

    fs::rename(&tmp, path).with_context(|| format!("replacing state file at {:?}", path))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::JobErrors;
    use crate::types::ResultValue;

    #[test]
    fn saves_loads_and_prunes() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = FileStateStore::new(dir.path().to_path_buf());
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());

        assert!(store.load(a).unwrap().is_none());

        let state = JobState {
            last_run: Some(chrono::Utc::now()),
            errors: JobErrors::new(ResultValue::Success),
            ..JobState::default()
        };
        store.save(a, &state).unwrap();
        store.save(b, &JobState::default()).unwrap();

        let reopened = FileStateStore::new(dir.path().to_path_buf());
        assert_eq!(reopened.load(a).unwrap(), Some(state));

        store.prune(&[b]).unwrap();
        assert!(store.load(a).unwrap().is_none());
        assert!(store.load(b).unwrap().is_some());
    }

    #[test]
    fn corrupt_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStateStore::new(dir.path().to_path_buf());
        fs::create_dir_all(store.path().parent().unwrap()).unwrap();
        fs::write(store.path(), "not json").unwrap();
        assert!(store.load(Uuid::new_v4()).is_err());
    }
}
