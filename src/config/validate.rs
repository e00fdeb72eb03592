// src/config/validate.rs

use std::collections::BTreeMap;

use petgraph::algo::toposort;
use petgraph::graphmap::DiGraphMap;

use crate::config::model::{ConfigFile, RawConfigFile};
use crate::errors::{Result, RunManagerError};
use crate::tools::ToolVersion;
use crate::types::JobType;

impl TryFrom<RawConfigFile> for ConfigFile {
    type Error = RunManagerError;

    fn try_from(raw: RawConfigFile) -> std::result::Result<Self, Self::Error> {
        validate_raw_config(&raw)?;
        Ok(ConfigFile::new_unchecked(raw.config, raw.tool, raw.job))
    }
}

/// Re-run validation on an already built config (e.g. after edits in tests).
pub fn validate_config(cfg: &ConfigFile) -> Result<()> {
    validate_raw_config(&RawConfigFile {
        config: cfg.config.clone(),
        tool: cfg.tool.clone(),
        job: cfg.job.clone(),
    })
}

fn validate_raw_config(cfg: &RawConfigFile) -> Result<()> {
    ensure_has_jobs(cfg)?;
    validate_global_config(cfg)?;
    validate_tools(cfg)?;
    validate_jobs(cfg)?;
    validate_links(cfg)?;
    validate_tree(cfg)?;
    Ok(())
}

fn ensure_has_jobs(cfg: &RawConfigFile) -> Result<()> {
    if cfg.job.is_empty() {
        return Err(RunManagerError::ConfigError(
            "config must contain at least one [job.<name>] section".to_string(),
        ));
    }
    Ok(())
}

fn validate_global_config(cfg: &RawConfigFile) -> Result<()> {
    if cfg.config.poll_interval_ms == 0 {
        return Err(RunManagerError::ConfigError(
            "[config].poll_interval_ms must be >= 1 (got 0)".to_string(),
        ));
    }
    if cfg.config.zombie_max_polls == 0 {
        return Err(RunManagerError::ConfigError(
            "[config].zombie_max_polls must be >= 1 (got 0)".to_string(),
        ));
    }
    Ok(())
}

fn validate_tools(cfg: &RawConfigFile) -> Result<()> {
    for (name, tool) in cfg.tool.iter() {
        if let Some(version) = &tool.version {
            version.parse::<ToolVersion>().map_err(|e| {
                RunManagerError::ConfigError(format!("tool '{name}' has an invalid version: {e}"))
            })?;
        }
        if let Some(filter) = &tool.out_file_filter {
            regex::Regex::new(filter).map_err(|e| {
                RunManagerError::ConfigError(format!(
                    "tool '{name}' has an invalid out_file_filter: {e}"
                ))
            })?;
        }
    }
    Ok(())
}

fn validate_jobs(cfg: &RawConfigFile) -> Result<()> {
    for (name, job) in cfg.job.iter() {
        job.job_type
            .parse::<JobType>()
            .map_err(|e| RunManagerError::ConfigError(format!("job '{name}': {e}")))?;

        if let Some(uuid) = &job.uuid {
            uuid::Uuid::parse_str(uuid).map_err(|e| {
                RunManagerError::ConfigError(format!("job '{name}' has an invalid uuid '{uuid}': {e}"))
            })?;
        }
    }
    Ok(())
}

/// Every `children` / `finished` reference names a job other than itself,
/// and no job is claimed by two parents.
fn validate_links(cfg: &RawConfigFile) -> Result<()> {
    let mut parent_of: BTreeMap<&str, &str> = BTreeMap::new();

    for (name, job) in cfg.job.iter() {
        let linked = job
            .children
            .iter()
            .map(|c| (c.as_str(), "children"))
            .chain(job.finished.as_deref().map(|f| (f, "finished")));

        for (target, field) in linked {
            if !cfg.job.contains_key(target) {
                return Err(RunManagerError::ConfigError(format!(
                    "job '{name}' has unknown job '{target}' in `{field}`"
                )));
            }
            if target == name {
                return Err(RunManagerError::ConfigError(format!(
                    "job '{name}' cannot list itself in `{field}`"
                )));
            }
            if let Some(previous) = parent_of.insert(target, name.as_str()) {
                if previous != name {
                    return Err(RunManagerError::ConfigError(format!(
                        "job '{target}' has two parents: '{previous}' and '{name}'"
                    )));
                }
                return Err(RunManagerError::ConfigError(format!(
                    "job '{name}' lists '{target}' more than once"
                )));
            }
        }
    }
    Ok(())
}

fn validate_tree(cfg: &RawConfigFile) -> Result<()> {
    // Edge direction: parent -> child (and parent -> finished job).
    let mut graph: DiGraphMap<&str, ()> = DiGraphMap::new();

    for name in cfg.job.keys() {
        graph.add_node(name.as_str());
    }

    for (name, job) in cfg.job.iter() {
        for child in job.children.iter().chain(job.finished.iter()) {
            graph.add_edge(name.as_str(), child.as_str(), ());
        }
    }

    match toposort(&graph, None) {
        Ok(_order) => Ok(()),
        Err(cycle) => {
            let node = cycle.node_id();
            Err(RunManagerError::TreeCycle(format!(
                "cycle detected in job tree involving job '{}'",
                node
            )))
        }
    }
}
