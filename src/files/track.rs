// src/files/track.rs

//! Snapshots of the inputs a job consumed, used for staleness checks.

use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use blake3::Hasher;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// State of one input file as it was when a job last ran.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileTrack {
    pub path: PathBuf,
    pub existed: bool,
    pub last_modified: Option<DateTime<Utc>>,
    /// blake3 of the contents, only recorded when checksum verification is on.
    #[serde(default)]
    pub checksum: Option<String>,
}

impl FileTrack {
    /// Capture the current on-disk state of `path`.
    pub fn capture(path: impl Into<PathBuf>, with_checksum: bool) -> Self {
        let path = path.into();
        let meta = std::fs::metadata(&path).ok();
        let existed = meta.is_some();
        let last_modified = meta
            .and_then(|m| m.modified().ok())
            .map(DateTime::<Utc>::from);

        let checksum = if with_checksum && existed && path.is_file() {
            compute_file_hash(&path).ok()
        } else {
            None
        };

        Self {
            path,
            existed,
            last_modified,
            checksum,
        }
    }

    /// Whether the file changed relative to a run that started at `last_run`.
    ///
    /// A file changed if it appeared or disappeared, or if its modification
    /// time is newer than `last_run`. When a checksum was recorded, a newer
    /// mtime with identical contents is not a change.
    pub fn changed_since(&self, last_run: DateTime<Utc>) -> bool {
        let current = FileTrack::capture(&self.path, false);

        if current.existed != self.existed {
            debug!(path = ?self.path, existed = self.existed, "tracked file existence changed");
            return true;
        }
        if !current.existed {
            return false;
        }

        let newer = match current.last_modified {
            Some(mtime) => mtime > last_run,
            None => true,
        };
        if !newer {
            return false;
        }

        match &self.checksum {
            Some(old) => match compute_file_hash(&self.path) {
                Ok(new) => {
                    let changed = *old != new;
                    debug!(path = ?self.path, changed, "tracked file touched; compared checksum");
                    changed
                }
                Err(_) => true,
            },
            None => {
                debug!(path = ?self.path, "tracked file modified after last run");
                true
            }
        }
    }
}

/// Compute the blake3 hash of a single file.
pub fn compute_file_hash(path: &Path) -> Result<String> {
    let mut hasher = Hasher::new();
    let mut file =
        File::open(path).with_context(|| format!("opening file for hashing: {:?}", path))?;
    let mut buf = [0u8; 8192];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hasher.finalize().to_hex().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn appearance_and_disappearance_count_as_changes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("in.idf");

        let missing = FileTrack::capture(&path, false);
        assert!(!missing.existed);
        assert!(!missing.changed_since(Utc::now()));

        std::fs::write(&path, "Version,8.1;").unwrap();
        assert!(missing.changed_since(Utc::now()));

        let present = FileTrack::capture(&path, false);
        std::fs::remove_file(&path).unwrap();
        assert!(present.changed_since(Utc::now()));
    }

    #[test]
    fn older_mtime_is_unchanged() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("in.idf");
        std::fs::write(&path, "x").unwrap();
        let track = FileTrack::capture(&path, false);
        let after = Utc::now() + chrono::Duration::from_std(Duration::from_secs(1)).unwrap();
        assert!(!track.changed_since(after));
    }

    #[test]
    fn checksum_masks_touch_without_content_change() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("in.idf");
        std::fs::write(&path, "same").unwrap();
        let track = FileTrack::capture(&path, true);
        assert!(track.checksum.is_some());

        let before = Utc::now() - chrono::Duration::seconds(60);
        assert!(!track.changed_since(before));

        std::fs::write(&path, "different").unwrap();
        assert!(track.changed_since(before));
    }
}
