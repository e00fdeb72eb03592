use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Severity of a single message collected during a job run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorType {
    Error,
    Warning,
    Info,
    InitialCondition,
    FinalCondition,
}

/// Overall verdict of a job run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum ResultValue {
    Success,
    Fail,
    #[default]
    NA,
}

impl ResultValue {
    /// Combine two verdicts: `Fail` dominates, then `Success`, then `NA`.
    pub fn combine(self, other: ResultValue) -> ResultValue {
        match (self, other) {
            (ResultValue::Fail, _) | (_, ResultValue::Fail) => ResultValue::Fail,
            (ResultValue::Success, _) | (_, ResultValue::Success) => ResultValue::Success,
            _ => ResultValue::NA,
        }
    }
}

impl FromStr for ResultValue {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "success" => Ok(ResultValue::Success),
            "fail" | "failure" => Ok(ResultValue::Fail),
            "na" | "n/a" => Ok(ResultValue::NA),
            other => Err(format!("invalid result value: {other}")),
        }
    }
}

/// Discriminant for the concrete behaviour of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum JobType {
    Null,
    EnergyPlus,
    ExpandObjects,
    EnergyPlusPreProcess,
    ReadVars,
    Basement,
    Slab,
    Ruby,
    UserScript,
    ModelToIdf,
    IdfToModel,
    Dakota,
    ParallelEnergyPlusSplit,
    ParallelEnergyPlusJoin,
}

impl JobType {
    pub const ALL: [JobType; 14] = [
        JobType::Null,
        JobType::EnergyPlus,
        JobType::ExpandObjects,
        JobType::EnergyPlusPreProcess,
        JobType::ReadVars,
        JobType::Basement,
        JobType::Slab,
        JobType::Ruby,
        JobType::UserScript,
        JobType::ModelToIdf,
        JobType::IdfToModel,
        JobType::Dakota,
        JobType::ParallelEnergyPlusSplit,
        JobType::ParallelEnergyPlusJoin,
    ];

    /// Name used in output directory names and config files.
    pub fn value_name(self) -> &'static str {
        match self {
            JobType::Null => "Null",
            JobType::EnergyPlus => "EnergyPlus",
            JobType::ExpandObjects => "ExpandObjects",
            JobType::EnergyPlusPreProcess => "EnergyPlusPreProcess",
            JobType::ReadVars => "ReadVars",
            JobType::Basement => "Basement",
            JobType::Slab => "Slab",
            JobType::Ruby => "Ruby",
            JobType::UserScript => "UserScript",
            JobType::ModelToIdf => "ModelToIdf",
            JobType::IdfToModel => "IdfToModel",
            JobType::Dakota => "Dakota",
            JobType::ParallelEnergyPlusSplit => "ParallelEnergyPlusSplit",
            JobType::ParallelEnergyPlusJoin => "ParallelEnergyPlusJoin",
        }
    }
}

impl fmt::Display for JobType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.value_name())
    }
}

impl FromStr for JobType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_lowercase();
        JobType::ALL
            .iter()
            .copied()
            .find(|t| t.value_name().to_lowercase() == wanted)
            .ok_or_else(|| format!("unknown job type: {s}"))
    }
}

/// Lifecycle state of a single job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum JobStatus {
    #[default]
    Idle,
    Starting,
    Processing,
    Finishing,
    Canceling,
}

impl JobStatus {
    pub fn is_running(self) -> bool {
        !matches!(self, JobStatus::Idle)
    }
}

/// Aggregate state of a job together with its children and finished job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TreeStatus {
    Waiting,
    Running,
    Finished,
    Failed,
    Canceled,
}

impl TreeStatus {
    fn priority(self) -> u8 {
        match self {
            TreeStatus::Failed => 4,
            TreeStatus::Running => 3,
            TreeStatus::Canceled => 2,
            TreeStatus::Waiting => 1,
            TreeStatus::Finished => 0,
        }
    }

    /// Combine two statuses, keeping the more significant one
    /// (Failed > Running > Canceled > Waiting > Finished).
    pub fn combine(self, other: TreeStatus) -> TreeStatus {
        if other.priority() > self.priority() {
            other
        } else {
            self
        }
    }
}

/// Where persisted job states are kept.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StateStorageMode {
    /// `<root>/.runmanager/jobstates.json`.
    File,
    /// Kept in memory only (lost on restart).
    Memory,
}

impl Default for StateStorageMode {
    fn default() -> Self {
        StateStorageMode::File
    }
}

/// What to conclude when a child process has vanished at the OS level but
/// its exit was never observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ZombieAssumption {
    Success,
    Failure,
}

impl Default for ZombieAssumption {
    fn default() -> Self {
        ZombieAssumption::Success
    }
}
