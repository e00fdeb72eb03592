// src/files/file_info.rs

//! A single tracked file and the files that must be staged next to it.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::{Result, RunManagerError};

/// One file known to the job engine.
///
/// `last_modified` and `exists` are captured when the value is constructed
/// (or refreshed) and do not take part in equality.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileInfo {
    pub full_path: PathBuf,
    pub filename: String,
    pub key: String,
    pub last_modified: Option<DateTime<Utc>>,
    pub exists: bool,
    required_files: Vec<(PathBuf, PathBuf)>,
}

impl PartialEq for FileInfo {
    fn eq(&self, other: &Self) -> bool {
        self.filename == other.filename
            && self.key == other.key
            && self.required_files == other.required_files
            && self.full_path == other.full_path
    }
}

impl Eq for FileInfo {}

impl FileInfo {
    /// Stat `path` and build a `FileInfo` tagged with `key`.
    ///
    /// A missing file is still a valid placeholder with `exists = false`.
    pub fn new(path: impl Into<PathBuf>, key: impl Into<String>) -> Self {
        let full_path = path.into();
        let filename = full_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let (exists, last_modified) = stat(&full_path);

        Self {
            full_path,
            filename,
            key: key.into(),
            last_modified,
            exists,
            required_files: Vec::new(),
        }
    }

    /// Build a `FileInfo` keyed by its lowercase extension.
    pub fn from_path(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let key = extension_of(&path).unwrap_or_default();
        Self::new(path, key)
    }

    /// Lowercase extension without the leading dot.
    pub fn extension(&self) -> Option<String> {
        extension_of(&self.full_path)
    }

    /// Re-read existence and modification time from disk.
    fn refresh(&mut self) {
        let (exists, last_modified) = stat(&self.full_path);
        self.exists = exists;
        self.last_modified = last_modified;
    }

    /// Declare that `source` must be staged at `target` (relative to the
    /// working directory) before a tool can consume this file.
    ///
    /// Adding the identical pair twice is a no-op; a different source for an
    /// already-claimed target is rejected.
    pub fn add_required_file(
        &mut self,
        source: impl Into<PathBuf>,
        target: impl Into<PathBuf>,
    ) -> Result<()> {
        let source = source.into();
        let target = target.into();

        if let Some((existing, _)) = self.required_files.iter().find(|(_, t)| *t == target) {
            if *existing == source {
                return Ok(());
            }
            return Err(RunManagerError::RequiredFileConflict {
                target: target.display().to_string(),
                existing: existing.display().to_string(),
                requested: source.display().to_string(),
            });
        }

        self.required_files.push((source, target));
        Ok(())
    }

    pub fn required_files(&self) -> &[(PathBuf, PathBuf)] {
        &self.required_files
    }

    /// Source staged at `target`, if any.
    pub fn required_file(&self, target: impl AsRef<Path>) -> Option<&Path> {
        let target = target.as_ref();
        self.required_files
            .iter()
            .find(|(_, t)| t == target)
            .map(|(s, _)| s.as_path())
    }

    /// Make this path (and relative required-file sources) absolute against `base`.
    pub fn complete(&self, base: &Path) -> FileInfo {
        if base.as_os_str().is_empty() {
            return self.clone();
        }

        let mut out = self.clone();
        if out.full_path.is_relative() {
            out.full_path = base.join(&out.full_path);
            out.refresh();
        }
        for (source, _) in out.required_files.iter_mut() {
            if source.is_relative() {
                *source = base.join(&*source);
            }
        }
        out
    }
}

pub(crate) fn extension_of(path: &Path) -> Option<String> {
    path.extension().map(|e| e.to_string_lossy().to_lowercase())
}

fn stat(path: &Path) -> (bool, Option<DateTime<Utc>>) {
    match std::fs::metadata(path) {
        Ok(meta) => {
            let modified = meta.modified().ok().map(DateTime::<Utc>::from);
            (true, modified)
        }
        Err(_) => (false, None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_is_a_placeholder() {
        let fi = FileInfo::new("/definitely/not/here/in.idf", "idf");
        assert!(!fi.exists);
        assert!(fi.last_modified.is_none());
        assert_eq!(fi.filename, "in.idf");
        assert_eq!(fi.extension().as_deref(), Some("idf"));
    }

    #[test]
    fn equality_ignores_timestamps() {
        let mut a = FileInfo::new("/tmp/x/a.idf", "idf");
        let mut b = a.clone();
        a.exists = true;
        b.last_modified = Some(Utc::now());
        assert_eq!(a, b);

        b.key = "other".into();
        assert_ne!(a, b);
    }

    #[test]
    fn conflicting_required_file_is_rejected() {
        let mut fi = FileInfo::new("/tmp/in.idf", "idf");
        fi.add_required_file("/w/a.epw", "in.epw").unwrap();
        fi.add_required_file("/w/a.epw", "in.epw").unwrap();
        assert_eq!(fi.required_files().len(), 1);

        let err = fi.add_required_file("/w/b.epw", "in.epw").unwrap_err();
        assert!(matches!(err, RunManagerError::RequiredFileConflict { .. }));
        assert_eq!(fi.required_file("in.epw"), Some(Path::new("/w/a.epw")));
    }

    #[test]
    fn complete_resolves_relative_paths() {
        let mut fi = FileInfo::new("model/in.idf", "idf");
        fi.add_required_file("weather/a.epw", "in.epw").unwrap();
        let done = fi.complete(Path::new("/project"));
        assert_eq!(done.full_path, PathBuf::from("/project/model/in.idf"));
        assert_eq!(
            done.required_file("in.epw"),
            Some(Path::new("/project/weather/a.epw"))
        );
    }
}
