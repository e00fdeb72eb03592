// src/process/mod.rs

//! Spawning and monitoring external tool invocations.
//!
//! A job never talks to the OS directly. It asks a [`ProcessCreator`] for a
//! [`Process`], starts it, and consumes the typed [`ProcessEvent`]s pushed on
//! the returned channel until the channel closes.
//!
//! - [`local`] runs tools as local child processes (production).
//! - [`staging`] copies required files into the working directory.
//! - [`poll`] snapshots the working directory and diffs snapshots.
//! - [`kill`] terminates a whole process tree.

pub mod kill;
pub mod local;
pub mod poll;
pub mod staging;

use std::path::PathBuf;

use tokio::sync::mpsc;

use crate::errors::Result;
use crate::files::{FileInfo, Files};
use crate::tools::ToolInfo;

pub use local::{LocalProcess, LocalProcessCreator, LocalProcessOptions, ZombiePolicy};

/// Everything needed to launch one tool.
#[derive(Debug, Clone)]
pub struct ProcessSpec {
    pub tool: ToolInfo,
    /// `(source, target relative to output_dir)` pairs to stage first.
    pub required_files: Vec<(PathBuf, PathBuf)>,
    /// argv, passed without shell interpretation.
    pub parameters: Vec<String>,
    pub output_dir: PathBuf,
    pub expected_output_files: Vec<String>,
    pub stdin: Option<String>,
    /// Base for resolving relative required-file sources.
    pub base_path: PathBuf,
}

/// How a process ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitStatus {
    Normal,
    Crashed,
}

/// OS-level failure reported by the process layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessErrorKind {
    FailedToStart,
    Crashed,
    WriteError,
    ReadError,
    Unknown,
}

impl ProcessErrorKind {
    pub fn describe(self) -> &'static str {
        match self {
            ProcessErrorKind::FailedToStart => "Process failed to start",
            ProcessErrorKind::Crashed => "Process crashed",
            ProcessErrorKind::WriteError => "Error writing to process",
            ProcessErrorKind::ReadError => "Error reading from process",
            ProcessErrorKind::Unknown => "Unknown process error",
        }
    }
}

#[derive(Debug, Clone)]
pub enum ProcessEvent {
    Started,
    OutputFileChanged(FileInfo),
    StandardOut(String),
    StandardErr(String),
    Error {
        kind: ProcessErrorKind,
        message: String,
    },
    Finished {
        exit_code: i32,
        exit_status: ExitStatus,
    },
}

/// A single tool invocation.
///
/// `start` may be called once. The returned channel closes after the last
/// event (normally `Finished`, or `Error` when the tool never ran).
pub trait Process: Send + Sync {
    fn start(&self) -> Result<mpsc::UnboundedReceiver<ProcessEvent>>;

    /// Request termination. Callable from any thread, any number of times.
    fn stop(&self);

    /// Files in the working directory that were not staged inputs.
    fn output_files(&self) -> Files;

    /// Remove the staged copies of required files.
    fn clean_up_required_files(&self);
}

/// Factory for [`Process`] handles; one per job run.
pub trait ProcessCreator: Send + Sync {
    fn create_process(&self, spec: ProcessSpec) -> Result<Box<dyn Process>>;
}
