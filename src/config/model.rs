// src/config/model.rs

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::Deserialize;

use crate::types::{StateStorageMode, ZombieAssumption};

/// Top-level configuration as read from a TOML file.
///
/// ```toml
/// [config]
/// outdir = "out"
/// state_storage = "file"
///
/// [tool.energyplus]
/// path = "/usr/local/EnergyPlus-8-1-0/energyplus"
/// version = "8.1"
///
/// [job.sim]
/// type = "EnergyPlus"
/// files = ["in.idf", { path = "weather/*.epw", key = "epw" }]
/// children = ["report"]
/// ```
///
/// This is the unchecked form; see [`ConfigFile`] for the validated one.
#[derive(Debug, Clone, Deserialize)]
pub struct RawConfigFile {
    /// Global behaviour config from `[config]`.
    #[serde(default)]
    pub config: ConfigSection,

    /// Tool registry from `[tool.<name>]`.
    #[serde(default)]
    pub tool: BTreeMap<String, ToolConfig>,

    /// All jobs from `[job.<name>]`, keyed by name.
    #[serde(default)]
    pub job: BTreeMap<String, JobConfig>,
}

/// Validated configuration. Build with `ConfigFile::try_from(raw)`.
#[derive(Debug, Clone)]
pub struct ConfigFile {
    pub config: ConfigSection,
    pub tool: BTreeMap<String, ToolConfig>,
    pub job: BTreeMap<String, JobConfig>,
}

impl ConfigFile {
    pub(crate) fn new_unchecked(
        config: ConfigSection,
        tool: BTreeMap<String, ToolConfig>,
        job: BTreeMap<String, JobConfig>,
    ) -> Self {
        Self { config, tool, job }
    }

    /// Names of jobs that are nobody's child or finished job.
    pub fn root_names(&self) -> Vec<&str> {
        self.job
            .keys()
            .filter(|name| {
                !self.job.values().any(|j| {
                    j.children.iter().any(|c| c == *name) || j.finished.as_deref() == Some(name)
                })
            })
            .map(String::as_str)
            .collect()
    }
}

/// `[config]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct ConfigSection {
    /// Root output directory, relative to the config file.
    #[serde(default)]
    pub outdir: Option<PathBuf>,

    /// `"file"` (default) or `"memory"`.
    #[serde(default)]
    pub state_storage: StateStorageMode,

    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Time between asking a tool to stop and killing it.
    #[serde(default = "default_stop_grace_ms")]
    pub stop_grace_ms: u64,

    #[serde(default = "default_zombie_max_polls")]
    pub zombie_max_polls: u32,

    /// Verdict for a child whose exit status could not be observed.
    #[serde(default)]
    pub zombie_assume: ZombieAssumption,

    /// Confirm modification times with a content checksum.
    #[serde(default)]
    pub verify_checksums: bool,

    /// Merge compatible jobs before running.
    #[serde(default = "default_optimize")]
    pub optimize: bool,
}

fn default_poll_interval_ms() -> u64 {
    1000
}

fn default_stop_grace_ms() -> u64 {
    3000
}

fn default_zombie_max_polls() -> u32 {
    10
}

fn default_optimize() -> bool {
    true
}

impl Default for ConfigSection {
    fn default() -> Self {
        Self {
            outdir: None,
            state_storage: StateStorageMode::default(),
            poll_interval_ms: default_poll_interval_ms(),
            stop_grace_ms: default_stop_grace_ms(),
            zombie_max_polls: default_zombie_max_polls(),
            zombie_assume: ZombieAssumption::default(),
            verify_checksums: false,
            optimize: default_optimize(),
        }
    }
}

/// `[tool.<name>]` section; the table key is the tool name.
#[derive(Debug, Clone, Deserialize)]
pub struct ToolConfig {
    pub path: PathBuf,
    /// Dotted version such as `"8.1.0"`; missing means any.
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub remote: bool,
    #[serde(default)]
    pub out_file_filter: Option<String>,
}

/// `[job.<name>]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct JobConfig {
    /// Job type name, e.g. `"EnergyPlus"` or `"ModelToIdf"`.
    #[serde(rename = "type")]
    pub job_type: String,

    /// Input files: glob patterns relative to the config file, optionally
    /// with an explicit lookup key.
    #[serde(default)]
    pub files: Vec<FileSpec>,

    /// Parameters; strings, numbers, `true` flags, arrays and nested tables.
    #[serde(default)]
    pub params: toml::Table,

    /// Names of child jobs, in run order.
    #[serde(default)]
    pub children: Vec<String>,

    /// Name of the job that runs after every child tree is done.
    #[serde(default)]
    pub finished: Option<String>,

    /// Fixed identity; derived from the job name when absent.
    #[serde(default)]
    pub uuid: Option<String>,

    /// Always rerun, even when up to date.
    #[serde(default)]
    pub force: bool,
}

/// One entry of `files`.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum FileSpec {
    Pattern(String),
    Keyed { path: String, key: String },
}

impl FileSpec {
    pub fn pattern(&self) -> &str {
        match self {
            FileSpec::Pattern(p) => p,
            FileSpec::Keyed { path, .. } => path,
        }
    }

    pub fn key(&self) -> Option<&str> {
        match self {
            FileSpec::Pattern(_) => None,
            FileSpec::Keyed { key, .. } => Some(key),
        }
    }
}
