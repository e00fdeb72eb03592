// src/process/poll.rs

//! Directory snapshots for detecting output files while a tool runs.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

/// Path -> (mtime, size) for every file below a directory.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DirSnapshot {
    entries: BTreeMap<PathBuf, (Option<SystemTime>, u64)>,
}

impl DirSnapshot {
    /// Walk `dir` recursively. Unreadable entries are skipped.
    pub fn capture(dir: &Path) -> Self {
        let mut entries = BTreeMap::new();
        walk(dir, &mut entries);
        Self { entries }
    }

    /// Paths whose entry differs between the two snapshots (symmetric
    /// difference of the `(path, mtime, size)` sets, deduplicated by path).
    pub fn changed_since(&self, previous: &DirSnapshot) -> Vec<PathBuf> {
        let mut changed = BTreeSet::new();
        for (path, meta) in &self.entries {
            if previous.entries.get(path) != Some(meta) {
                changed.insert(path.clone());
            }
        }
        for path in previous.entries.keys() {
            if !self.entries.contains_key(path) {
                changed.insert(path.clone());
            }
        }
        changed.into_iter().collect()
    }

    /// Files present, minus `exclude`.
    pub fn files_excluding(&self, exclude: &HashSet<PathBuf>) -> Vec<PathBuf> {
        self.entries
            .keys()
            .filter(|p| !exclude.contains(*p))
            .cloned()
            .collect()
    }
}

fn walk(dir: &Path, out: &mut BTreeMap<PathBuf, (Option<SystemTime>, u64)>) {
    let Ok(read) = fs::read_dir(dir) else {
        return;
    };
    for entry in read.flatten() {
        let path = entry.path();
        let Ok(meta) = entry.metadata() else {
            continue;
        };
        if meta.is_dir() {
            walk(&path, out);
        } else {
            out.insert(path, (meta.modified().ok(), meta.len()));
        }
    }
}
