// src/factory.rs

//! Job construction and the merge optimizer.
//!
//! [`JobFactory::optimize_job_tree`] walks a tree bottom-up and folds every
//! child that can be absorbed into its parent, repeating until nothing
//! changes. A refusal is a [`MergeJobError`]; the optimizer logs it and
//! leaves the pair alone.

use std::path::PathBuf;

use tracing::{debug, info};
use uuid::Uuid;

use crate::errors::{MergeJobError, Result};
use crate::files::Files;
use crate::job::kinds::JobKind;
use crate::job::state::JobState;
use crate::job::{Job, JobParts};
use crate::params::JobParams;
use crate::tools::Tools;
use crate::types::JobType;

pub struct JobFactory;

impl JobFactory {
    /// A fresh job with a random UUID and no run history.
    pub fn create_job(
        job_type: JobType,
        tools: Tools,
        params: JobParams,
        files: Files,
        base_path: impl Into<PathBuf>,
    ) -> Result<Job> {
        Self::create_job_with_state(
            job_type,
            tools,
            params,
            files,
            base_path,
            Uuid::new_v4(),
            JobState::default(),
        )
    }

    /// Rebuild a job with a known identity and last-run snapshot.
    pub fn create_job_with_state(
        job_type: JobType,
        tools: Tools,
        params: JobParams,
        files: Files,
        base_path: impl Into<PathBuf>,
        uuid: Uuid,
        state: JobState,
    ) -> Result<Job> {
        let kind = JobKind::for_type(job_type, &params)?;
        debug!(job = %uuid, %job_type, "creating job");
        Ok(Job::from_parts(JobParts {
            uuid,
            job_type,
            kind,
            tools,
            params,
            input_files: files,
            state,
            base_path: base_path.into(),
        }))
    }

    /// Fold `child` into `parent`.
    ///
    /// `child` must be `parent`'s only child, or its finished job when it
    /// has no children. Null children are absorbed into any parent; Ruby
    /// and UserScript jobs chain into one driver run. Nothing is modified
    /// when the merge is refused.
    pub fn merge_job(parent: &Job, child: &Job) -> std::result::Result<(), MergeJobError> {
        let is_child = child
            .parent()
            .is_some_and(|p| p == *parent)
            && parent.child_index(child.uuid()).is_some();
        let is_finished = child.is_finished_job_of(parent);

        if !is_child && !is_finished {
            return Err(MergeJobError::new("RHS is not a child of LHS"));
        }
        let children = parent.children();
        if children.len() > 1 {
            return Err(MergeJobError::new("LHS has more than one child"));
        }
        if is_finished && !children.is_empty() {
            return Err(MergeJobError::new(
                "cannot merge a finished job into a parent that has children",
            ));
        }
        if child.finished_job().is_some() && parent.finished_job().is_some() && !is_finished {
            return Err(MergeJobError::new("both jobs have a finished job"));
        }
        if parent.is_running() || child.is_running() {
            return Err(MergeJobError::new("cannot merge running jobs"));
        }

        match (parent.kind(), child.kind()) {
            (_, JobKind::Null) => {
                Self::absorb(parent, child, is_finished);
                Ok(())
            }
            (JobKind::Ruby(mut lhs), JobKind::Ruby(rhs)) => {
                if parent.job_type() != child.job_type() {
                    return Err(MergeJobError::new(format!(
                        "job types {} and {} cannot be merged",
                        parent.job_type(),
                        child.job_type()
                    )));
                }
                if let Some(first) = lhs.bundles.first_mut() {
                    first.original_uuid.get_or_insert(parent.uuid());
                }
                let mut rhs = rhs;
                if let Some(first) = rhs.bundles.first_mut() {
                    first.original_uuid.get_or_insert(child.uuid());
                }
                let child_script = child
                    .input_files()
                    .get_last_by_extension("rb")
                    .ok()
                    .map(|f| f.full_path);
                lhs.merge(&rhs, child_script)?;

                {
                    let mut data = parent.write();
                    lhs.encode_into(&mut data.params);
                    data.kind = JobKind::Ruby(lhs);
                }
                Self::absorb(parent, child, is_finished);
                Ok(())
            }
            _ => Err(MergeJobError::new(format!(
                "{} and {} jobs cannot be merged",
                parent.job_type(),
                child.job_type()
            ))),
        }
    }

    /// Move `child`'s links and inputs onto `parent` and drop it.
    fn absorb(parent: &Job, child: &Job, is_finished: bool) {
        info!(parent = %parent.uuid(), child = %child.uuid(), child_type = %child.job_type(), "merging jobs");

        if is_finished {
            parent.set_finished_job(None);
        } else {
            parent.remove_child(child.uuid());
        }

        let (tools, files) = (child.tools(), child.read().input_files.clone());
        let null_params = matches!(child.kind(), JobKind::Null).then(|| child.params());
        {
            let mut data = parent.write();
            data.tools.extend(&tools);
            data.input_files.extend(&files);
            data.input_files = data.input_files.dedup();
            if let Some(params) = null_params {
                data.params.extend(&params);
            }
        }

        for grandchild in child.children() {
            child.remove_child(grandchild.uuid());
            parent.add_child(grandchild);
        }
        if let Some(finished) = child.finished_job() {
            child.set_finished_job(None);
            parent.set_finished_job(Some(finished));
        }
        parent.invalidate_tree_caches();
    }

    /// Merge bottom-up until no pair in the tree can be merged.
    pub fn optimize_job_tree(job: &Job) {
        for child in job.children() {
            Self::optimize_job_tree(&child);
        }
        if let Some(finished) = job.finished_job() {
            Self::optimize_job_tree(&finished);
        }

        loop {
            let candidates: Vec<Job> = job
                .children()
                .into_iter()
                .chain(job.finished_job())
                .collect();

            let mut merged = false;
            for candidate in candidates {
                match Self::merge_job(job, &candidate) {
                    Ok(()) => {
                        merged = true;
                        break;
                    }
                    Err(e) => debug!(parent = %job.uuid(), child = %candidate.uuid(), reason = %e, "not merged"),
                }
            }
            if !merged {
                break;
            }
        }
    }
}
