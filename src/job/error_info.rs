// src/job/error_info.rs

//! Reconciling the different sources of failure into one verdict.
//!
//! A run collects the tool's exit code, OS-level process errors, an optional
//! structured result (`result.ossr`, one per merged sub-job) and the
//! EnergyPlus error log (`eplusout.err`). A tool can exit 0 yet report a
//! logical failure, and can exit non-zero for reasons unrelated to the
//! simulation, so every source is kept and folded at the end.

use std::path::Path;

use regex::Regex;
use serde::Deserialize;
use std::sync::LazyLock;
use tracing::{debug, warn};

use crate::files::Files;
use crate::job::state::JobErrors;
use crate::process::{ExitStatus, ProcessErrorKind};
use crate::types::{ErrorType, ResultValue};

static MERGED_DIR_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^mergedjob-(\d+)$").expect("valid regex"));

/// Structured result written by scripted measures.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct OsResult {
    pub value: ResultValue,
    #[serde(default)]
    pub errors: Vec<String>,
    #[serde(default)]
    pub warnings: Vec<String>,
    #[serde(default)]
    pub info: Vec<String>,
    #[serde(default)]
    pub initial_condition: Option<String>,
    #[serde(default)]
    pub final_condition: Option<String>,
}

impl OsResult {
    pub fn parse(text: &str) -> serde_json::Result<OsResult> {
        serde_json::from_str(text)
    }

    /// Combine per-script results, prefixing messages with `Script: <n>`.
    pub fn merge(results: &[(usize, OsResult)]) -> OsResult {
        if results.len() == 1 {
            return results[0].1.clone();
        }

        let mut merged = OsResult {
            value: ResultValue::NA,
            ..Default::default()
        };
        let mut initial = Vec::new();
        let mut finals = Vec::new();

        for (idx, r) in results {
            let prefix = format!("Script: {} ", idx + 1);
            merged.value = merged.value.combine(r.value);
            merged.errors.extend(r.errors.iter().map(|m| format!("{prefix}{m}")));
            merged.warnings.extend(r.warnings.iter().map(|m| format!("{prefix}{m}")));
            merged.info.extend(r.info.iter().map(|m| format!("{prefix}{m}")));
            if let Some(c) = &r.initial_condition {
                initial.push(format!("{prefix}{c}"));
            }
            if let Some(c) = &r.final_condition {
                finals.push(format!("{prefix}{c}"));
            }
        }

        if !initial.is_empty() {
            merged.initial_condition = Some(initial.join("\n"));
        }
        if !finals.is_empty() {
            merged.final_condition = Some(finals.join("\n"));
        }
        merged
    }
}

/// Parsed `eplusout.err`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnergyPlusErrFile {
    pub warnings: Vec<String>,
    pub severe: Vec<String>,
    pub fatal: Vec<String>,
    pub completed: bool,
    pub completed_successfully: bool,
}

impl EnergyPlusErrFile {
    pub fn parse(text: &str) -> EnergyPlusErrFile {
        #[derive(Clone, Copy)]
        enum Kind {
            Warning,
            Severe,
            Fatal,
        }

        let mut out = EnergyPlusErrFile::default();
        let mut last: Option<Kind> = None;

        for line in text.lines() {
            let trimmed = line.trim();

            if trimmed.contains("EnergyPlus Completed Successfully") {
                out.completed = true;
                out.completed_successfully = true;
            } else if trimmed.contains("EnergyPlus Terminated") {
                out.completed = true;
            }

            let Some(rest) = trimmed.strip_prefix("**") else {
                continue;
            };
            let Some((tag, msg)) = rest.split_once("**") else {
                continue;
            };
            let tag = tag.trim();
            let msg = msg.trim().to_string();

            let kind = match tag {
                "Warning" => Some(Kind::Warning),
                "Severe" => Some(Kind::Severe),
                "Fatal" => Some(Kind::Fatal),
                "~~~" => {
                    // Continuation of the previous message.
                    let target = match last {
                        Some(Kind::Warning) => out.warnings.last_mut(),
                        Some(Kind::Severe) => out.severe.last_mut(),
                        Some(Kind::Fatal) => out.fatal.last_mut(),
                        None => None,
                    };
                    if let Some(prev) = target {
                        prev.push('\n');
                        prev.push_str(&msg);
                    }
                    None
                }
                _ => None,
            };

            if let Some(kind) = kind {
                match kind {
                    Kind::Warning => out.warnings.push(msg),
                    Kind::Severe => out.severe.push(msg),
                    Kind::Fatal => out.fatal.push(msg),
                }
                last = Some(kind);
            }
        }

        out
    }
}

/// Accumulator for everything that happened during one run.
#[derive(Debug, Clone, Default)]
pub struct ErrorInfo {
    exit: Option<(i32, ExitStatus)>,
    process_errors: Vec<(ProcessErrorKind, String)>,
    start_error: Option<String>,
    canceled: bool,
    os_result: Option<OsResult>,
    err_file: Option<EnergyPlusErrFile>,
    messages: Vec<(ErrorType, String)>,
    forced_failure: bool,
}

impl ErrorInfo {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a tool exit. A later failing tool overrides an earlier success.
    pub fn process_finished(&mut self, exit_code: i32, exit_status: ExitStatus) {
        match self.exit {
            Some((code, ExitStatus::Normal)) if code == 0 => {
                self.exit = Some((exit_code, exit_status));
            }
            None => self.exit = Some((exit_code, exit_status)),
            _ => {}
        }
    }

    pub fn process_error(&mut self, kind: ProcessErrorKind, message: impl Into<String>) {
        self.process_errors.push((kind, message.into()));
    }

    /// Configuration failure before any tool ran.
    pub fn start_error(&mut self, message: impl Into<String>) {
        self.start_error = Some(message.into());
    }

    pub fn canceled(&mut self) {
        self.canceled = true;
    }

    pub fn add(&mut self, kind: ErrorType, message: impl Into<String>) {
        self.messages.push((kind, message.into()));
    }

    /// Add an error and force a `Fail` verdict.
    pub fn fail(&mut self, message: impl Into<String>) {
        self.messages.push((ErrorType::Error, message.into()));
        self.forced_failure = true;
    }

    pub fn set_os_result(&mut self, result: OsResult) {
        self.os_result = Some(result);
    }

    pub fn set_err_file(&mut self, err: EnergyPlusErrFile) {
        self.err_file = Some(err);
    }

    pub fn has_failed(&self) -> bool {
        self.errors().result == ResultValue::Fail
    }

    /// Parse `eplusout.err` and every `result.ossr` among `outputs`.
    ///
    /// The result index comes from an enclosing `mergedjob-<i>` directory.
    pub fn process_result_files(&mut self, outputs: &Files) {
        if let Ok(err) = outputs.get_last_by_filename("eplusout.err") {
            match std::fs::read_to_string(&err.full_path) {
                Ok(text) => self.set_err_file(EnergyPlusErrFile::parse(&text)),
                Err(e) => debug!(path = ?err.full_path, error = %e, "could not read eplusout.err"),
            }
        }

        let mut results = Vec::new();
        for ossr in outputs.get_all_by_filename("result.ossr").iter() {
            let idx = merged_index(&ossr.full_path).unwrap_or(0);
            match std::fs::read_to_string(&ossr.full_path)
                .map_err(|e| e.to_string())
                .and_then(|t| OsResult::parse(&t).map_err(|e| e.to_string()))
            {
                Ok(r) => results.push((idx, r)),
                Err(e) => {
                    warn!(path = ?ossr.full_path, error = %e, "unreadable result file");
                    self.add(
                        ErrorType::Warning,
                        format!("Unable to read result file {}: {e}", ossr.full_path.display()),
                    );
                }
            }
        }
        if !results.is_empty() {
            results.sort_by_key(|(i, _)| *i);
            self.set_os_result(OsResult::merge(&results));
        }
    }

    /// Fold everything into a final [`JobErrors`].
    pub fn errors(&self) -> JobErrors {
        let mut out = JobErrors::new(ResultValue::Success);
        let mut fail = self.forced_failure;

        if let Some(msg) = &self.start_error {
            out.push(ErrorType::Error, msg.clone());
            fail = true;
        }

        if self.canceled {
            out.push(ErrorType::Error, "Job was canceled");
            fail = true;
        }

        match self.exit {
            Some((_, ExitStatus::Crashed)) => {
                out.push(ErrorType::Error, "Process crashed.");
                fail = true;
            }
            Some((code, ExitStatus::Normal)) if code != 0 => {
                out.push(
                    ErrorType::Error,
                    format!("Process exited with a non-zero exit code of: {code}"),
                );
                fail = true;
            }
            _ => {}
        }

        for (kind, msg) in &self.process_errors {
            let text = if msg.is_empty() {
                kind.describe().to_string()
            } else {
                format!("{}: {msg}", kind.describe())
            };
            out.push(ErrorType::Error, text);
            fail = true;
        }

        let mut result = ResultValue::Success;
        if let Some(r) = &self.os_result {
            if r.value != ResultValue::NA {
                result = r.value;
            }
            for m in &r.errors {
                out.push(ErrorType::Error, m.clone());
            }
            for m in &r.warnings {
                out.push(ErrorType::Warning, m.clone());
            }
            for m in &r.info {
                out.push(ErrorType::Info, m.clone());
            }
            if let Some(c) = &r.initial_condition {
                out.push(ErrorType::InitialCondition, c.clone());
            }
            if let Some(c) = &r.final_condition {
                out.push(ErrorType::FinalCondition, c.clone());
            }
            if !r.errors.is_empty() {
                fail = true;
            }
        }

        if let Some(err) = &self.err_file {
            for m in &err.warnings {
                out.push(ErrorType::Warning, m.clone());
            }
            for m in err.severe.iter().chain(err.fatal.iter()) {
                out.push(ErrorType::Error, m.clone());
            }
            if !err.severe.is_empty() || !err.fatal.is_empty() {
                fail = true;
            }
            if !err.completed {
                out.push(ErrorType::Error, "EnergyPlus did not complete");
                fail = true;
            } else if !err.completed_successfully {
                out.push(ErrorType::Error, "EnergyPlus did not complete successfully");
                fail = true;
            }
        }

        out.all_errors.extend(self.messages.iter().cloned());

        out.result = if fail { ResultValue::Fail } else { result };
        out
    }
}

pub(crate) fn merged_index(path: &Path) -> Option<usize> {
    path.ancestors().skip(1).find_map(|dir| {
        let name = dir.file_name()?.to_str()?;
        MERGED_DIR_RE
            .captures(name)
            .and_then(|c| c.get(1))
            .and_then(|m| m.as_str().parse().ok())
    })
}
