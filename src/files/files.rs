// src/files/files.rs

use std::path::Path;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::errors::{Result, RunManagerError};
use crate::files::file_info::FileInfo;

/// Order-preserving collection of [`FileInfo`].
///
/// `get_last_by_*` prefers the most recently appended match; `get_all_by_*`
/// keeps the original relative order and may legitimately be empty.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Files {
    files: Vec<FileInfo>,
}

impl Files {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&mut self, file: FileInfo) {
        self.files.push(file);
    }

    pub fn extend(&mut self, other: &Files) {
        self.files.extend(other.files.iter().cloned());
    }

    pub fn files(&self) -> &[FileInfo] {
        &self.files
    }

    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &FileInfo> {
        self.files.iter()
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn get_last_by_key(&self, key: &str) -> Result<FileInfo> {
        self.last_matching("key", key, |f| f.key == key)
    }

    /// Case-insensitive; accepts `"idf"` or `".idf"`.
    pub fn get_last_by_extension(&self, ext: &str) -> Result<FileInfo> {
        let wanted = normalize_ext(ext);
        self.last_matching("extension", ext, |f| {
            f.extension().as_deref() == Some(wanted.as_str())
        })
    }

    pub fn get_last_by_filename(&self, filename: &str) -> Result<FileInfo> {
        self.last_matching("filename", filename, |f| f.filename == filename)
    }

    /// Matches against the full path.
    pub fn get_last_by_regex(&self, pattern: &Regex) -> Result<FileInfo> {
        self.last_matching("regex", pattern.as_str(), |f| {
            pattern.is_match(&f.full_path.to_string_lossy())
        })
    }

    pub fn get_all_by_key(&self, key: &str) -> Files {
        self.filtered(|f| f.key == key)
    }

    pub fn get_all_by_extension(&self, ext: &str) -> Files {
        let wanted = normalize_ext(ext);
        self.filtered(|f| f.extension().as_deref() == Some(wanted.as_str()))
    }

    pub fn get_all_by_filename(&self, filename: &str) -> Files {
        self.filtered(|f| f.filename == filename)
    }

    pub fn get_all_by_regex(&self, pattern: &Regex) -> Files {
        self.filtered(|f| pattern.is_match(&f.full_path.to_string_lossy()))
    }

    /// Make every entry absolute against `base`.
    pub fn complete(&self, base: &Path) -> Files {
        Files {
            files: self.files.iter().map(|f| f.complete(base)).collect(),
        }
    }

    /// Drop later duplicates, keeping the first occurrence of each entry.
    pub fn dedup(&self) -> Files {
        let mut out: Vec<FileInfo> = Vec::with_capacity(self.files.len());
        for f in &self.files {
            if !out.contains(f) {
                out.push(f.clone());
            }
        }
        Files { files: out }
    }

    fn last_matching(
        &self,
        criterion: &str,
        value: &str,
        pred: impl Fn(&FileInfo) -> bool,
    ) -> Result<FileInfo> {
        self.files
            .iter()
            .rev()
            .find(|f| pred(f))
            .cloned()
            .ok_or_else(|| RunManagerError::FileNotFound {
                criterion: criterion.to_string(),
                value: value.to_string(),
            })
    }

    fn filtered(&self, pred: impl Fn(&FileInfo) -> bool) -> Files {
        Files {
            files: self.files.iter().filter(|f| pred(f)).cloned().collect(),
        }
    }
}

impl FromIterator<FileInfo> for Files {
    fn from_iter<T: IntoIterator<Item = FileInfo>>(iter: T) -> Self {
        Files {
            files: iter.into_iter().collect(),
        }
    }
}

impl IntoIterator for Files {
    type Item = FileInfo;
    type IntoIter = std::vec::IntoIter<FileInfo>;

    fn into_iter(self) -> Self::IntoIter {
        self.files.into_iter()
    }
}

fn normalize_ext(ext: &str) -> String {
    ext.trim_start_matches('.').to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Files {
        let mut files = Files::new();
        files.append(FileInfo::new("/a/first.idf", "idf"));
        files.append(FileInfo::new("/a/weather.EPW", "epw"));
        files.append(FileInfo::new("/b/second.IDF", "idf"));
        files
    }

    #[test]
    fn last_by_extension_is_case_insensitive() {
        let files = sample();
        assert_eq!(files.get_last_by_extension("idf").unwrap().filename, "second.IDF");
        assert_eq!(files.get_last_by_extension(".epw").unwrap().filename, "weather.EPW");
    }

    #[test]
    fn not_found_names_the_criterion() {
        let err = sample().get_last_by_key("osm").unwrap_err();
        match err {
            RunManagerError::FileNotFound { criterion, value } => {
                assert_eq!(criterion, "key");
                assert_eq!(value, "osm");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn get_all_preserves_order_and_may_be_empty() {
        let files = sample();
        let idfs = files.get_all_by_key("idf");
        let names: Vec<_> = idfs.iter().map(|f| f.filename.as_str()).collect();
        assert_eq!(names, ["first.idf", "second.IDF"]);
        assert!(files.get_all_by_filename("nope").is_empty());
    }

    #[test]
    fn regex_matches_full_path() {
        let files = sample();
        let re = Regex::new(r"^/a/.*\.idf$").unwrap();
        assert_eq!(files.get_last_by_regex(&re).unwrap().filename, "first.idf");
    }

    #[test]
    fn dedup_keeps_first_occurrence() {
        let mut files = sample();
        files.append(FileInfo::new("/a/first.idf", "idf"));
        assert_eq!(files.dedup().len(), 3);
    }
}
