// src/process/staging.rs

//! Copying required files into a tool's working directory.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use tracing::{debug, info};

/// Resolve a required-file source: absolute paths are used as-is, relative
/// ones are tried against `base_path` first and then the tool directory.
pub fn resolve_source(source: &Path, base_path: &Path, tool_dir: &Path) -> PathBuf {
    if source.is_absolute() {
        return source.to_path_buf();
    }
    let from_base = base_path.join(source);
    if from_base.exists() {
        return from_base;
    }
    let from_tool = tool_dir.join(source);
    if from_tool.exists() {
        return from_tool;
    }
    from_base
}

/// Stage every `(source, target)` pair under `output_dir`.
///
/// Two different sources for one target is an error; the identical pair
/// listed twice is staged once. Returns the absolute staged paths (files
/// only; directories are expanded).
pub fn stage_required_files(
    required: &[(PathBuf, PathBuf)],
    output_dir: &Path,
    base_path: &Path,
    tool_dir: &Path,
) -> Result<Vec<PathBuf>> {
    let mut claimed: HashMap<&Path, &Path> = HashMap::new();
    let mut staged = Vec::new();

    for (source, target) in required {
        if let Some(existing) = claimed.get(target.as_path()) {
            if *existing == source.as_path() {
                continue;
            }
            bail!(
                "required file conflict: '{}' targeted by both '{}' and '{}'",
                target.display(),
                existing.display(),
                source.display()
            );
        }
        claimed.insert(target.as_path(), source.as_path());

        let resolved = resolve_source(source, base_path, tool_dir);
        let dest = output_dir.join(target);

        if resolved.is_dir() {
            copy_dir(&resolved, &dest, &mut staged)?;
        } else {
            copy_file(&resolved, &dest)?;
            staged.push(dest);
        }
    }

    info!(count = staged.len(), dir = ?output_dir, "staged required files");
    Ok(staged)
}

/// Delete staged copies, ignoring ones already gone.
pub fn remove_staged(staged: &[PathBuf]) {
    for path in staged {
        if let Err(e) = fs::remove_file(path) {
            debug!(path = ?path, error = %e, "could not remove staged file");
        }
    }
}

fn copy_file(source: &Path, dest: &Path) -> Result<()> {
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("creating directory for staged file {:?}", parent))?;
    }
    fs::copy(source, dest)
        .with_context(|| format!("staging {:?} -> {:?}", source, dest))?;
    debug!(source = ?source, dest = ?dest, "staged file");
    Ok(())
}

fn copy_dir(source: &Path, dest: &Path, staged: &mut Vec<PathBuf>) -> Result<()> {
    fs::create_dir_all(dest).with_context(|| format!("creating staged directory {:?}", dest))?;
    for entry in fs::read_dir(source).with_context(|| format!("reading {:?}", source))? {
        let entry = entry?;
        let path = entry.path();
        let target = dest.join(entry.file_name());
        if path.is_dir() {
            copy_dir(&path, &target, staged)?;
        } else {
            copy_file(&path, &target)?;
            staged.push(target);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stages_files_and_directories() {
        let src = tempfile::tempdir().unwrap();
        let out = tempfile::tempdir().unwrap();
        std::fs::write(src.path().join("a.epw"), "weather").unwrap();
        std::fs::create_dir_all(src.path().join("files/sub")).unwrap();
        std::fs::write(src.path().join("files/sub/x.txt"), "x").unwrap();

        let required = vec![
            (PathBuf::from("a.epw"), PathBuf::from("in.epw")),
            (PathBuf::from("a.epw"), PathBuf::from("in.epw")),
            (src.path().join("files"), PathBuf::from("files")),
        ];
        let staged =
            stage_required_files(&required, out.path(), src.path(), Path::new("/nonexistent"))
                .unwrap();

        assert_eq!(staged.len(), 2);
        assert_eq!(std::fs::read_to_string(out.path().join("in.epw")).unwrap(), "weather");
        assert!(out.path().join("files/sub/x.txt").exists());

        remove_staged(&staged);
        assert!(!out.path().join("in.epw").exists());
    }

    #[test]
    fn falls_back_to_tool_dir() {
        let tool = tempfile::tempdir().unwrap();
        let out = tempfile::tempdir().unwrap();
        std::fs::write(tool.path().join("Energy+.idd"), "idd").unwrap();

        let required = vec![(PathBuf::from("Energy+.idd"), PathBuf::from("Energy+.idd"))];
        stage_required_files(&required, out.path(), Path::new("/nonexistent"), tool.path()).unwrap();
        assert!(out.path().join("Energy+.idd").exists());
    }

    #[test]
    fn conflicting_targets_are_rejected() {
        let src = tempfile::tempdir().unwrap();
        let out = tempfile::tempdir().unwrap();
        std::fs::write(src.path().join("a"), "a").unwrap();
        std::fs::write(src.path().join("b"), "b").unwrap();

        let required = vec![
            (src.path().join("a"), PathBuf::from("in.epw")),
            (src.path().join("b"), PathBuf::from("in.epw")),
        ];
        assert!(stage_required_files(&required, out.path(), src.path(), src.path()).is_err());
    }
}
