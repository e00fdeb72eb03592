// src/config/build.rs

//! Turning a validated [`ConfigFile`] into a live job tree.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::files::expand_files;
use crate::config::model::{ConfigFile, ConfigSection};
use crate::errors::{Result, RunManagerError};
use crate::factory::JobFactory;
use crate::files::Files;
use crate::job::{Job, JobState};
use crate::params::{JobParam, JobParams};
use crate::process::local::{LocalProcessOptions, ZombiePolicy};
use crate::store::SharedStateStore;
use crate::tools::{ToolInfo, ToolVersion, Tools};
use crate::types::JobType;

/// The tree built from a config file.
#[derive(Debug)]
pub struct JobTree {
    pub root: Job,
    /// Every configured job by name (the synthetic root is not included).
    pub jobs: BTreeMap<String, Job>,
}

impl JobTree {
    pub fn uuids(&self) -> Vec<Uuid> {
        self.root.tree().iter().map(Job::uuid).collect()
    }
}

/// Identity of a job configured without an explicit `uuid`.
pub fn job_uuid(name: &str) -> Uuid {
    Uuid::new_v5(&Uuid::NAMESPACE_URL, format!("runmanager:{name}").as_bytes())
}

/// Process options from `[config]`.
pub fn process_options(section: &ConfigSection) -> LocalProcessOptions {
    LocalProcessOptions {
        poll_interval: Duration::from_millis(section.poll_interval_ms),
        stop_grace: Duration::from_millis(section.stop_grace_ms),
        zombie: ZombiePolicy {
            max_polls: section.zombie_max_polls,
            assume: section.zombie_assume,
        },
        ..LocalProcessOptions::default()
    }
}

/// Output root, absolute.
pub fn output_root(cfg: &ConfigFile, root: &Path) -> Option<PathBuf> {
    cfg.config.outdir.as_ref().map(|d| root.join(d))
}

/// Registry built from every `[tool.<name>]`; paths are relative to `root`.
pub fn build_tools(cfg: &ConfigFile, root: &Path) -> Result<Tools> {
    cfg.tool
        .iter()
        .map(|(name, tool)| {
            let version = match &tool.version {
                Some(v) => v.parse::<ToolVersion>()?,
                None => ToolVersion::any(),
            };
            let mut info = ToolInfo::new(name.clone(), version, root.join(&tool.path));
            info.remote_executable = tool.remote;
            info.out_file_filter = tool.out_file_filter.clone();
            Ok(info)
        })
        .collect()
}

/// Convert a TOML parameter table into job parameters.
///
/// `key = "v"` and numbers become `key -> [v]`, `key = true` a bare flag
/// (`false` is dropped), arrays a list of children and tables nest.
pub fn params_from_table(table: &toml::Table) -> JobParams {
    JobParams::from_params(table.iter().filter_map(|(k, v)| param_from_value(k, v)).collect())
}

fn param_from_value(key: &str, value: &toml::Value) -> Option<JobParam> {
    match value {
        toml::Value::Boolean(false) => None,
        toml::Value::Boolean(true) => Some(JobParam::new(key)),
        toml::Value::Array(items) => Some(JobParam::with_children(
            key,
            items.iter().flat_map(values_of).collect(),
        )),
        toml::Value::Table(t) => Some(JobParam::with_children(
            key,
            params_from_table(t).params().to_vec(),
        )),
        scalar => Some(JobParam::with_children(key, vec![JobParam::new(scalar_text(scalar))])),
    }
}

fn values_of(value: &toml::Value) -> Vec<JobParam> {
    match value {
        toml::Value::Table(t) => params_from_table(t).params().to_vec(),
        toml::Value::Array(items) => items.iter().flat_map(values_of).collect(),
        scalar => vec![JobParam::new(scalar_text(scalar))],
    }
}

fn scalar_text(value: &toml::Value) -> String {
    match value {
        toml::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Build the job tree described by `cfg`.
///
/// `root` is the directory holding the config file; relative paths resolve
/// against it. Each job's last-run state is restored from `store`. When the
/// config has several roots they become children of a `Null` job.
pub fn build_tree(
    cfg: &ConfigFile,
    root: &Path,
    store: &SharedStateStore,
    force: bool,
) -> Result<JobTree> {
    let tools = build_tools(cfg, root)?;
    let skip_dir = output_root(cfg, root);

    let mut jobs: BTreeMap<String, Job> = BTreeMap::new();
    for (name, job_cfg) in cfg.job.iter() {
        let job_type: JobType = job_cfg
            .job_type
            .parse()
            .map_err(RunManagerError::ConfigError)?;
        let uuid = match &job_cfg.uuid {
            Some(u) => Uuid::parse_str(u)
                .map_err(|e| RunManagerError::ConfigError(format!("job '{name}': {e}")))?,
            None => job_uuid(name),
        };

        let files = expand_files(&job_cfg.files, root, skip_dir.as_deref())?;
        let params = params_from_table(&job_cfg.params);
        let state = load_state(store, uuid)?;

        let job = JobFactory::create_job_with_state(
            job_type,
            tools.clone(),
            params,
            files,
            root,
            uuid,
            state,
        )?;
        job.set_force(force || job_cfg.force);
        job.set_verify_checksums(cfg.config.verify_checksums);
        debug!(job = %uuid, %name, %job_type, "built job from config");
        jobs.insert(name.clone(), job);
    }

    for (name, job_cfg) in cfg.job.iter() {
        let Some(parent) = jobs.get(name) else {
            continue;
        };
        for (i, child_name) in job_cfg.children.iter().enumerate() {
            let child = lookup(&jobs, child_name)?;
            child.set_index(i);
            parent.add_child(child);
        }
        if let Some(finished) = &job_cfg.finished {
            parent.set_finished_job(Some(lookup(&jobs, finished)?));
        }
    }

    let roots = cfg.root_names();
    let tree_root = match roots.as_slice() {
        [single] => lookup(&jobs, single)?,
        _ => {
            info!(roots = ?roots, "several root jobs; grouping them under a Null job");
            let group = JobFactory::create_job_with_state(
                JobType::Null,
                Tools::new(),
                JobParams::new(),
                Files::new(),
                root,
                job_uuid(&format!("root:{}", roots.join(","))),
                JobState::default(),
            )?;
            for (i, name) in roots.iter().enumerate() {
                let job = lookup(&jobs, name)?;
                job.set_index(i);
                group.add_child(job);
            }
            group
        }
    };

    if let Some(outdir) = &cfg.config.outdir {
        let mut data = tree_root.write();
        data.params.append_value("outdir", outdir.to_string_lossy());
    }
    tree_root.invalidate_tree_caches();

    Ok(JobTree {
        root: tree_root,
        jobs,
    })
}

fn lookup(jobs: &BTreeMap<String, Job>, name: &str) -> Result<Job> {
    jobs.get(name)
        .cloned()
        .ok_or_else(|| RunManagerError::JobNotFound(name.to_string()))
}

fn load_state(store: &SharedStateStore, uuid: Uuid) -> Result<JobState> {
    let guard = store
        .lock()
        .map_err(|_| RunManagerError::ConfigError("state store lock poisoned".into()))?;
    match guard.load(uuid) {
        Ok(state) => Ok(state.unwrap_or_default()),
        Err(e) => {
            warn!(job = %uuid, error = %e, "cannot load saved state; starting fresh");
            Ok(JobState::default())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn toml_params_become_job_params() {
        let table: toml::Table = toml::from_str(
            r#"
            flatoutdir = true
            skipped = false
            numpartitions = 4
            outdir = "/tmp/x"
            args = ["-a", "-b"]
            [script]
            file = "measure.rb"
            "#,
        )
        .unwrap();
        let params = params_from_table(&table);

        assert!(params.has("flatoutdir"));
        assert!(!params.has("skipped"));
        assert_eq!(params.get_single("numpartitions").unwrap(), "4");
        assert_eq!(params.get_single("outdir").unwrap(), "/tmp/x");
        assert_eq!(params.get_values("args"), ["-a", "-b"]);
        let script = params.get("script").unwrap().child_params();
        assert_eq!(script.get_single("file").unwrap(), "measure.rb");
    }

    #[test]
    fn names_map_to_stable_uuids() {
        assert_eq!(job_uuid("sim"), job_uuid("sim"));
        assert_ne!(job_uuid("sim"), job_uuid("post"));
    }
}
