// src/job/state.rs

//! Serializable outcome of a job run.

use std::ops::Add;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::files::{FileTrack, Files};
use crate::types::{ErrorType, JobStatus, ResultValue};

/// Ordered messages plus the overall verdict of a run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobErrors {
    pub result: ResultValue,
    pub all_errors: Vec<(ErrorType, String)>,
}

impl JobErrors {
    pub fn new(result: ResultValue) -> Self {
        Self {
            result,
            all_errors: Vec::new(),
        }
    }

    pub fn push(&mut self, kind: ErrorType, msg: impl Into<String>) {
        self.all_errors.push((kind, msg.into()));
    }

    fn of(&self, kind: ErrorType) -> Vec<String> {
        self.all_errors
            .iter()
            .filter(|(k, _)| *k == kind)
            .map(|(_, m)| m.clone())
            .collect()
    }

    pub fn errors(&self) -> Vec<String> {
        self.of(ErrorType::Error)
    }

    pub fn warnings(&self) -> Vec<String> {
        self.of(ErrorType::Warning)
    }

    pub fn infos(&self) -> Vec<String> {
        self.of(ErrorType::Info)
    }

    pub fn initial_conditions(&self) -> Vec<String> {
        self.of(ErrorType::InitialCondition)
    }

    pub fn final_conditions(&self) -> Vec<String> {
        self.of(ErrorType::FinalCondition)
    }

    pub fn succeeded(&self) -> bool {
        self.result == ResultValue::Success
    }

    pub fn total_count_by_type(&self, kind: ErrorType) -> usize {
        self.all_errors.iter().filter(|(k, _)| *k == kind).count()
    }
}

impl Add for JobErrors {
    type Output = JobErrors;

    fn add(mut self, rhs: JobErrors) -> JobErrors {
        self.result = self.result.combine(rhs.result);
        self.all_errors.extend(rhs.all_errors);
        self
    }
}

/// Snapshot of a job's last run; the unit of save and restore.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobState {
    pub last_run: Option<DateTime<Utc>>,
    pub errors: JobErrors,
    /// `None` until the job has completed a run.
    pub output_files: Option<Files>,
    pub status: JobStatus,
    #[serde(default)]
    pub canceled: bool,
    /// Output directory used by the last run.
    #[serde(default)]
    pub outdir: Option<PathBuf>,
    #[serde(default)]
    pub tracked_files: Vec<FileTrack>,
}
