#![allow(dead_code)]

use std::path::{Path, PathBuf};

use runmanager::factory::JobFactory;
use runmanager::files::{FileInfo, Files};
use runmanager::job::Job;
use runmanager::params::{JobParam, JobParams};
use runmanager::tools::{ToolInfo, ToolVersion, Tools};
use runmanager::types::JobType;

/// Builder for `Job` to simplify test setup.
pub struct JobBuilder {
    job_type: JobType,
    tools: Tools,
    params: JobParams,
    files: Files,
    base: PathBuf,
}

impl JobBuilder {
    pub fn new(job_type: JobType) -> Self {
        Self {
            job_type,
            tools: Tools::new(),
            params: JobParams::new(),
            files: Files::new(),
            base: PathBuf::new(),
        }
    }

    pub fn tool(mut self, tool: ToolInfo) -> Self {
        self.tools.append(tool);
        self
    }

    pub fn tools(mut self, tools: &Tools) -> Self {
        self.tools.extend(tools);
        self
    }

    pub fn param(mut self, key: &str, value: &str) -> Self {
        self.params.append_value(key, value);
        self
    }

    pub fn flag(mut self, key: &str) -> Self {
        self.params.append(JobParam::new(key));
        self
    }

    /// Append a parameter together with its nested children.
    pub fn nested_param(mut self, param: JobParam) -> Self {
        self.params.append(param);
        self
    }

    pub fn file(mut self, path: impl Into<PathBuf>) -> Self {
        self.files.append(FileInfo::from_path(path));
        self
    }

    pub fn keyed_file(mut self, path: impl Into<PathBuf>, key: &str) -> Self {
        self.files.append(FileInfo::new(path, key));
        self
    }

    pub fn base(mut self, base: impl Into<PathBuf>) -> Self {
        self.base = base.into();
        self
    }

    pub fn build(self) -> Job {
        JobFactory::create_job(self.job_type, self.tools, self.params, self.files, self.base)
            .expect("Failed to build job from builder")
    }
}

/// A tool entry pointing at `<dir>/<name>` (the file need not exist for
/// fake process creators).
pub fn fake_tool(dir: &Path, name: &str, version: &str) -> ToolInfo {
    let version: ToolVersion = version.parse().expect("valid tool version");
    ToolInfo::new(name, version, dir.join(name))
}

/// Write a minimal idf with a version object and one RunPeriod.
pub fn write_idf(dir: &Path, name: &str, version: &str) -> PathBuf {
    let path = dir.join(name);
    let text = format!(
        "Version,\n  {version};                    !- Version Identifier\n\n\
         Building,\n  Test Building;               !- Name\n\n\
         RunPeriod,\n  ,                        !- Name\n  1,                       !- Begin Month\n  1,                       !- Begin Day of Month\n  12,                      !- End Month\n  31,                      !- End Day of Month\n  UseWeatherFile;          !- Day of Week for Start Day\n"
    );
    std::fs::write(&path, text).expect("write idf");
    path
}
