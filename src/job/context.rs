// src/job/context.rs

//! Per-run scratch state filled in by a kind's start handler.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use tracing::debug;
use uuid::Uuid;

use crate::errors::{Result, RunManagerError};
use crate::files::{FileInfo, Files};
use crate::job::Job;
use crate::params::JobParams;
use crate::tools::{ToolInfo, ToolVersion, Tools};
use crate::types::JobType;

/// One tool invocation in a job's ordered sequence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolStep {
    pub tool: String,
    pub version: ToolVersion,
    pub args: Vec<String>,
    pub stdin: Option<String>,
}

impl ToolStep {
    pub fn new(tool: impl Into<String>, version: ToolVersion) -> Self {
        Self {
            tool: tool.into(),
            version,
            args: Vec::new(),
            stdin: None,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }
}

/// Output files with extension `extension` inherit `source`'s required
/// files (all of them, or only the one staged at `target`).
#[derive(Debug, Clone)]
pub struct CopyRequired {
    pub source: FileInfo,
    pub extension: String,
    pub target: Option<PathBuf>,
}

/// What a run needs: resolved inputs plus everything the start handler
/// declares (required files, tool steps, expected outputs).
pub struct RunContext {
    job: Job,
    pub outdir: PathBuf,
    pub base_path: PathBuf,
    pub params: JobParams,
    pub inputs: Files,
    pub tools: Tools,
    pub(crate) required_files: Vec<(PathBuf, PathBuf)>,
    pub(crate) osm_resources: Vec<(PathBuf, PathBuf)>,
    pub(crate) expected_outputs: BTreeSet<String>,
    pub(crate) copy_required: Vec<CopyRequired>,
    pub(crate) steps: Vec<ToolStep>,
    pub(crate) tracked: Vec<PathBuf>,
    pub(crate) no_output_error: bool,
}

impl RunContext {
    pub(crate) fn new(job: &Job) -> Self {
        let (base_path, tools) = {
            let data = job.read();
            (data.base_path.clone(), data.tools.clone())
        };
        Self {
            outdir: job.outdir(),
            params: job.all_params(),
            inputs: job.all_input_files(),
            base_path,
            tools,
            job: job.clone(),
            required_files: Vec::new(),
            osm_resources: Vec::new(),
            expected_outputs: BTreeSet::new(),
            copy_required: Vec::new(),
            steps: Vec::new(),
            tracked: Vec::new(),
            no_output_error: false,
        }
    }

    pub fn job_uuid(&self) -> Uuid {
        self.job.uuid()
    }

    pub fn job_type(&self) -> JobType {
        self.job.job_type()
    }

    /// Inputs and outputs of the parent job only.
    pub fn parent_files(&self) -> Files {
        self.job
            .parent()
            .map(|p| p.all_files())
            .unwrap_or_default()
    }

    /// Resolve a file once per run; see [`Job::memoized_file`].
    pub fn memoized<F>(&self, slot: &str, resolve: F) -> Result<FileInfo>
    where
        F: FnOnce(&Files) -> Result<FileInfo>,
    {
        self.job.memoized_file(slot, || resolve(&self.inputs))
    }

    /// Stage `source` at `target` (relative to the output directory).
    ///
    /// Local sources are tracked for staleness.
    pub fn add_required_file(&mut self, source: impl Into<PathBuf>, target: impl Into<PathBuf>) {
        let source = source.into();
        let target = target.into();
        debug!(job = %self.job_uuid(), source = ?source, target = ?target, "required file");
        let resolved = if source.is_relative() && !self.base_path.as_os_str().is_empty() {
            self.base_path.join(&source)
        } else {
            source.clone()
        };
        if resolved.is_absolute() {
            self.track(resolved);
        }
        self.required_files.push((source, target));
    }

    /// Stage `file` at `target` together with its own required files.
    pub fn add_required_file_info(&mut self, file: &FileInfo, target: impl Into<PathBuf>) {
        self.add_required_file(file.full_path.clone(), target);
        for (source, req_target) in file.required_files() {
            self.add_required_file(source.clone(), req_target.clone());
        }
    }

    /// Track an input that is read directly rather than staged.
    pub fn track(&mut self, path: impl Into<PathBuf>) {
        let path = path.into();
        if !self.tracked.contains(&path) {
            self.tracked.push(path);
        }
    }

    pub fn add_expected_output(&mut self, filename: impl Into<String>) {
        self.expected_outputs.insert(filename.into());
    }

    /// Output files ending in `extension` inherit `source`'s required files.
    pub fn copy_required_files(
        &mut self,
        source: &FileInfo,
        extension: impl Into<String>,
        target: Option<PathBuf>,
    ) {
        self.copy_required.push(CopyRequired {
            source: source.clone(),
            extension: extension.into().trim_start_matches('.').to_lowercase(),
            target,
        });
    }

    pub fn add_step(&mut self, step: ToolStep) {
        self.steps.push(step);
    }

    pub fn steps(&self) -> &[ToolStep] {
        &self.steps
    }

    pub fn required_files(&self) -> &[(PathBuf, PathBuf)] {
        &self.required_files
    }

    pub fn expected_outputs(&self) -> impl Iterator<Item = &str> {
        self.expected_outputs.iter().map(String::as_str)
    }

    /// Fail the run if it produces no output files.
    pub fn set_no_output_error(&mut self) {
        self.no_output_error = true;
    }

    /// Newest registered tool named `name` matching `version`.
    pub fn tool(&self, name: &str, version: &ToolVersion) -> Result<ToolInfo> {
        self.tools.get_tool(name, version)
    }

    /// `name` resolved against the output directory.
    pub fn out_path(&self, name: impl AsRef<Path>) -> PathBuf {
        self.outdir.join(name)
    }

    /// Required files plus, for every staged `osm`, its resource directory.
    ///
    /// The resource directory is the first of `<stem>/files`, `<base>/files`,
    /// `<dir>/resources/files` and `<dir>/../files` that exists; its files
    /// are staged next to the model under `files/`.
    pub fn acquire_required_files(&mut self) -> Result<Vec<(PathBuf, PathBuf)>> {
        let mut out: Vec<(PathBuf, PathBuf)> = Vec::new();
        let mut resources = Vec::new();

        let push = |out: &mut Vec<(PathBuf, PathBuf)>, source: PathBuf, target: PathBuf| -> Result<bool> {
            if let Some((existing, _)) = out.iter().find(|(_, t)| *t == target) {
                if *existing == source {
                    return Ok(false);
                }
                return Err(RunManagerError::RequiredFileConflict {
                    target: target.display().to_string(),
                    existing: existing.display().to_string(),
                    requested: source.display().to_string(),
                });
            }
            out.push((source, target));
            Ok(true)
        };

        for (source, target) in self.required_files.clone() {
            let is_osm = source
                .extension()
                .is_some_and(|e| e.eq_ignore_ascii_case("osm"));
            if is_osm {
                let target_dir = target.parent().map(Path::to_path_buf).unwrap_or_default();
                for (file, relative) in osm_resource_files(&source, &self.base_path) {
                    let staged = target_dir.join(&relative);
                    if push(&mut out, file.clone(), staged)? {
                        resources.push((file, relative));
                    }
                }
            }
            push(&mut out, source, target)?;
        }

        self.osm_resources = resources;
        Ok(out)
    }
}

fn osm_resource_files(osm: &Path, base_path: &Path) -> Vec<(PathBuf, PathBuf)> {
    let Some(dir) = osm.parent() else {
        return Vec::new();
    };
    let stem = osm
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();

    // (root the relative path is taken from, files dir, folder prefix)
    let candidates = [
        (dir.join(&stem), dir.join(&stem).join("files"), None),
        (base_path.to_path_buf(), base_path.join("files"), Some(stem.clone())),
        (dir.to_path_buf(), dir.join("resources").join("files"), Some(stem.clone())),
        (
            dir.parent().map(Path::to_path_buf).unwrap_or_default(),
            dir.parent().map(|p| p.join("files")).unwrap_or_default(),
            Some(stem.clone()),
        ),
    ];

    let Some((root, files_dir, prefix)) = candidates
        .into_iter()
        .find(|(_, files, _)| files.is_absolute() && files.is_dir())
    else {
        return Vec::new();
    };

    let mut found = Vec::new();
    collect_files(&files_dir, &mut found);

    found
        .into_iter()
        .filter_map(|p| {
            let relative = p.strip_prefix(&root).ok()?.to_path_buf();
            let relative = match relative.strip_prefix("resources") {
                Ok(rest) => rest.to_path_buf(),
                Err(_) => relative,
            };
            if relative.as_os_str().is_empty() {
                return None;
            }
            let relative = match &prefix {
                Some(folder) => PathBuf::from(folder).join(relative),
                None => relative,
            };
            Some((p, relative))
        })
        .collect()
}

fn collect_files(dir: &Path, out: &mut Vec<PathBuf>) {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return;
    };
    let mut paths: Vec<PathBuf> = entries.flatten().map(|e| e.path()).collect();
    paths.sort();
    for path in paths {
        if path.is_dir() {
            collect_files(&path, out);
        } else {
            out.push(path);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn osm_brings_its_files_directory() {
        let dir = tempfile::tempdir().unwrap();
        let osm = dir.path().join("model.osm");
        std::fs::write(&osm, "OS:Version;").unwrap();
        std::fs::create_dir_all(dir.path().join("model/files")).unwrap();
        std::fs::write(dir.path().join("model/files/sched.csv"), "1").unwrap();

        let found = osm_resource_files(&osm, Path::new(""));
        assert_eq!(
            found,
            vec![(
                dir.path().join("model/files/sched.csv"),
                PathBuf::from("files/sched.csv")
            )]
        );
    }

    #[test]
    fn osm_without_resources_brings_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let osm = dir.path().join("sub/model.osm");
        std::fs::create_dir_all(dir.path().join("sub")).unwrap();
        std::fs::write(&osm, "OS:Version;").unwrap();
        assert!(osm_resource_files(&osm, Path::new("")).is_empty());
    }
}
