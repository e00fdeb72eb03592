// src/config/files.rs

//! Expansion of `files = [...]` entries into [`Files`].

use std::path::{Path, PathBuf};

use anyhow::Context;
use globset::{Glob, GlobMatcher};

use crate::config::model::FileSpec;
use crate::errors::{Result, RunManagerError};
use crate::files::{FileInfo, Files};

/// Resolve every entry relative to `root`, in declaration order.
///
/// A plain path must exist. A glob must match at least one file; its matches
/// are added in path order. Directories starting with `.` and `skip_dir` are
/// not searched.
pub fn expand_files(specs: &[FileSpec], root: &Path, skip_dir: Option<&Path>) -> Result<Files> {
    let mut files = Files::new();
    let mut listing: Option<Vec<PathBuf>> = None;

    for spec in specs {
        let pattern = spec.pattern();
        let matched = if is_glob(pattern) {
            let matcher = compile(pattern)?;
            if listing.is_none() {
                listing = Some(collect_files(root, skip_dir)?);
            }
            let all = listing.as_deref().unwrap_or_default();
            let mut hits: Vec<PathBuf> = all
                .iter()
                .filter(|p| {
                    p.strip_prefix(root)
                        .map(|rel| matcher.is_match(rel.to_string_lossy().replace('\\', "/")))
                        .unwrap_or(false)
                })
                .cloned()
                .collect();
            hits.sort();
            hits
        } else {
            let path = root.join(pattern);
            if !path.is_file() {
                return Err(RunManagerError::ConfigError(format!(
                    "input file {:?} does not exist",
                    path
                )));
            }
            vec![path]
        };

        if matched.is_empty() {
            return Err(RunManagerError::ConfigError(format!(
                "file pattern '{pattern}' matched no files under {:?}",
                root
            )));
        }

        for path in matched {
            let info = match spec.key() {
                Some(key) => FileInfo::new(path, key),
                None => FileInfo::from_path(path),
            };
            files.append(info);
        }
    }
    Ok(files)
}

fn is_glob(pattern: &str) -> bool {
    pattern.contains(['*', '?', '[', '{'])
}

fn compile(pattern: &str) -> Result<GlobMatcher> {
    let glob = Glob::new(pattern)
        .with_context(|| format!("invalid glob pattern: {pattern}"))?;
    Ok(glob.compile_matcher())
}

/// All regular files under `root`.
fn collect_files(root: &Path, skip_dir: Option<&Path>) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    let mut stack = vec![root.to_path_buf()];

    while let Some(dir) = stack.pop() {
        let entries = std::fs::read_dir(&dir).with_context(|| format!("reading dir {:?}", dir))?;
        for entry in entries {
            let path = entry.with_context(|| format!("reading dir {:?}", dir))?.path();
            if path.is_dir() {
                let hidden = path
                    .file_name()
                    .is_some_and(|n| n.to_string_lossy().starts_with('.'));
                if !hidden && skip_dir != Some(path.as_path()) {
                    stack.push(path);
                }
            } else if path.is_file() {
                files.push(path);
            }
        }
    }
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn globs_and_keys() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        std::fs::create_dir_all(root.join("weather")).unwrap();
        std::fs::create_dir_all(root.join(".runmanager")).unwrap();
        std::fs::write(root.join("in.idf"), "").unwrap();
        std::fs::write(root.join("weather/b.epw"), "").unwrap();
        std::fs::write(root.join("weather/a.epw"), "").unwrap();
        std::fs::write(root.join(".runmanager/x.epw"), "").unwrap();

        let specs = vec![
            FileSpec::Pattern("in.idf".into()),
            FileSpec::Keyed {
                path: "**/*.epw".into(),
                key: "weather".into(),
            },
        ];
        let files = expand_files(&specs, root, None).unwrap();

        let names: Vec<_> = files.iter().map(|f| f.filename.clone()).collect();
        assert_eq!(names, ["in.idf", "a.epw", "b.epw"]);
        assert_eq!(files.get_last_by_key("weather").unwrap().filename, "b.epw");
        assert_eq!(files.get_last_by_key("idf").unwrap().filename, "in.idf");
    }

    #[test]
    fn missing_file_and_empty_glob_are_errors() {
        let dir = tempfile::tempdir().unwrap();
        assert!(expand_files(&[FileSpec::Pattern("nope.idf".into())], dir.path(), None).is_err());
        assert!(expand_files(&[FileSpec::Pattern("*.osm".into())], dir.path(), None).is_err());
    }
}
