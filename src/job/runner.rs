// src/job/runner.rs

//! The run loop of a single job.
//!
//! `Job::run` drives one pass through the lifecycle:
//! `Idle -> Starting -> Processing -> Finishing -> Idle`. Tools run strictly
//! one after another; the first failing tool (or a stop request) ends the
//! sequence. Whatever happened is folded into an [`ErrorInfo`] and written
//! back into the job's [`JobState`](crate::job::JobState).

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info, warn};

use crate::errors::{Result, RunManagerError};
use crate::files::{FileInfo, FileTrack, Files};
use crate::job::context::{CopyRequired, RunContext, ToolStep};
use crate::job::error_info::ErrorInfo;
use crate::job::kinds::{self, JobKind};
use crate::job::{Job, JobErrors};
use crate::process::{Process, ProcessCreator, ProcessEvent, ProcessSpec};
use crate::types::{JobStatus, ResultValue};

/// How the tool sequence ended.
enum StepsOutcome {
    Completed,
    Failed,
    Stopped,
}

impl Job {
    /// Run this job once, to completion.
    ///
    /// Never fails: configuration problems, tool failures and cancellation
    /// all end up in the returned [`JobErrors`], which are also stored on
    /// the job. A stop requested before the run starts completes it
    /// immediately with an `NA` verdict and leaves the previous state alone.
    pub async fn run(&self, creator: &dyn ProcessCreator) -> JobErrors {
        let _guard = self.run_lock().lock().await;

        if self.take_stop_request() {
            info!(job = %self.uuid(), "stop requested before start; not running");
            self.write().state.canceled = true;
            self.set_status(JobStatus::Idle);
            return JobErrors::new(ResultValue::NA);
        }

        self.set_status(JobStatus::Starting);
        self.reset_caches();
        let started_at = Utc::now();
        {
            let mut data = self.write();
            data.state.last_run = Some(started_at);
            data.state.canceled = false;
        }
        info!(job = %self.uuid(), job_type = %self.job_type(), "starting job");

        let mut info = ErrorInfo::new();
        let mut ctx = RunContext::new(self);
        let kind = self.kind();

        if let Err(e) = prepare_outdir(&ctx.outdir) {
            warn!(job = %self.uuid(), outdir = ?ctx.outdir, error = %e, "cannot create output directory");
            info.start_error(e.to_string());
            return self.finish(ctx, info, Files::new(), false);
        }

        if let Err(e) = kinds::start_handler(&kind, &mut ctx) {
            warn!(job = %self.uuid(), error = %e, "job configuration failed");
            info.start_error(e.to_string());
            return self.finish(ctx, info, Files::new(), false);
        }

        self.set_status(JobStatus::Processing);

        let (ctx_back, produced, outcome) = if kinds::is_internal(&kind) {
            run_internal(self, kind.clone(), ctx, &mut info).await
        } else {
            let mut last = None;
            let outcome = self.run_steps(&kind, &mut ctx, creator, &mut info, &mut last).await;
            (ctx, ProducedBy::Process(last), outcome)
        };
        let mut ctx = ctx_back;

        if !matches!(self.status(), JobStatus::Canceling) {
            self.set_status(JobStatus::Finishing);
        }

        let pending_stop = self.take_stop_request();
        let stopped = matches!(outcome, StepsOutcome::Stopped) || pending_stop;
        if !stopped && !matches!(outcome, StepsOutcome::Failed) {
            if let Err(e) = kinds::end_handler(&kind, &mut ctx, &mut info) {
                warn!(job = %self.uuid(), error = %e, "end handler failed");
                info.fail(e.to_string());
            }
        }

        let outputs = match produced {
            ProducedBy::Internal(files) => files,
            ProducedBy::Process(Some(process)) => process.output_files(),
            ProducedBy::Process(None) => Files::new(),
        };
        let outputs = kinds::output_files(&kind, &ctx, outputs.dedup());

        self.finish(ctx, info, outputs, stopped)
    }

    /// Run every declared tool step in order.
    async fn run_steps(
        &self,
        kind: &JobKind,
        ctx: &mut RunContext,
        creator: &dyn ProcessCreator,
        info: &mut ErrorInfo,
        last: &mut Option<Arc<dyn Process>>,
    ) -> StepsOutcome {
        let steps: Vec<ToolStep> = ctx.steps().to_vec();
        let total = steps.len();

        for (i, mut step) in steps.into_iter().enumerate() {
            if self.stop_requested() {
                return StepsOutcome::Stopped;
            }

            let spec = match self.process_spec(kind, ctx, &mut step) {
                Ok(spec) => spec,
                Err(e) => {
                    warn!(job = %self.uuid(), tool = %step.tool, error = %e, "cannot launch tool");
                    info.start_error(e.to_string());
                    return StepsOutcome::Failed;
                }
            };

            info!(
                job = %self.uuid(),
                tool = %step.tool,
                version = %spec.tool.version,
                step = i + 1,
                of = total,
                args = ?spec.parameters,
                "launching tool"
            );

            let process: Arc<dyn Process> = match creator.create_process(spec) {
                Ok(p) => Arc::from(p),
                Err(e) => {
                    info.start_error(e.to_string());
                    return StepsOutcome::Failed;
                }
            };
            *last = Some(Arc::clone(&process));

            if !self.set_active_process(Some(Arc::clone(&process))) {
                return StepsOutcome::Stopped;
            }
            let result = consume_events(self, process.as_ref(), &step.tool, info).await;
            self.set_active_process(None);

            if let Err(e) = result {
                info.start_error(e.to_string());
                return StepsOutcome::Failed;
            }
            if self.stop_requested() {
                return StepsOutcome::Stopped;
            }
            if info.has_failed() {
                debug!(job = %self.uuid(), tool = %step.tool, "tool failed; skipping remaining steps");
                return StepsOutcome::Failed;
            }
        }
        StepsOutcome::Completed
    }

    fn process_spec(
        &self,
        kind: &JobKind,
        ctx: &mut RunContext,
        step: &mut ToolStep,
    ) -> Result<ProcessSpec> {
        kinds::prepare_tool(kind, ctx, step)?;
        let tool = ctx.tool(&step.tool, &step.version)?;
        let required_files = ctx.acquire_required_files()?;
        Ok(ProcessSpec {
            tool,
            required_files,
            parameters: step.args.clone(),
            output_dir: ctx.outdir.clone(),
            expected_output_files: ctx.expected_outputs().map(str::to_string).collect(),
            stdin: step.stdin.clone(),
            base_path: ctx.base_path.clone(),
        })
    }

    /// Fold the run into the job's state and return to `Idle`.
    fn finish(&self, ctx: RunContext, mut info: ErrorInfo, outputs: Files, stopped: bool) -> JobErrors {
        let outputs = apply_copy_required(outputs, &ctx);
        let outputs = expected_last(outputs, &ctx);

        info.process_result_files(&outputs);
        if ctx.no_output_error && outputs.is_empty() && !stopped {
            info.fail("Job produced no output files");
        }
        if stopped {
            info.canceled();
        }

        let verify = self.read().verify_checksums;
        let tracked: Vec<FileTrack> = ctx
            .tracked
            .iter()
            .map(|p| FileTrack::capture(p.clone(), verify))
            .collect();

        let errors = info.errors();
        {
            let mut data = self.write();
            data.state.errors = errors.clone();
            data.state.output_files = Some(outputs);
            data.state.outdir = Some(ctx.outdir.clone());
            data.state.tracked_files = tracked;
            data.state.canceled = stopped;
            data.state.status = JobStatus::Idle;
        }
        self.set_status(JobStatus::Idle);

        info!(
            job = %self.uuid(),
            result = ?errors.result,
            errors = errors.errors().len(),
            warnings = errors.warnings().len(),
            "job finished"
        );
        errors
    }
}

enum ProducedBy {
    Internal(Files),
    Process(Option<Arc<dyn Process>>),
}

/// Run an internal kind's work on a blocking thread.
async fn run_internal(
    job: &Job,
    kind: JobKind,
    ctx: RunContext,
    info: &mut ErrorInfo,
) -> (RunContext, ProducedBy, StepsOutcome) {
    let handle = tokio::task::spawn_blocking(move || {
        let result = kinds::run_internal(&kind, &ctx);
        (ctx, result)
    });

    match handle.await {
        Ok((ctx, Ok(files))) => (ctx, ProducedBy::Internal(files), StepsOutcome::Completed),
        Ok((ctx, Err(e))) => {
            warn!(job = %job.uuid(), error = %e, "internal job failed");
            info.fail(e.to_string());
            (ctx, ProducedBy::Internal(Files::new()), StepsOutcome::Failed)
        }
        Err(e) => {
            // The context moved into the panicked task; rebuild an empty one.
            warn!(job = %job.uuid(), error = %e, "internal job panicked");
            info.fail(format!("Internal job panicked: {e}"));
            (RunContext::new(job), ProducedBy::Internal(Files::new()), StepsOutcome::Failed)
        }
    }
}

/// Start `process` and fold its events into `info` until it finishes or the
/// channel closes.
async fn consume_events(
    job: &Job,
    process: &dyn Process,
    tool: &str,
    info: &mut ErrorInfo,
) -> Result<()> {
    let mut rx = process.start()?;
    while let Some(event) = rx.recv().await {
        match event {
            ProcessEvent::Started => debug!(job = %job.uuid(), tool, "tool started"),
            ProcessEvent::OutputFileChanged(file) => {
                debug!(job = %job.uuid(), tool, file = ?file.full_path, "output file changed")
            }
            ProcessEvent::StandardOut(line) => debug!(job = %job.uuid(), tool, "stdout: {line}"),
            ProcessEvent::StandardErr(line) => debug!(job = %job.uuid(), tool, "stderr: {line}"),
            ProcessEvent::Error { kind, message } => {
                warn!(job = %job.uuid(), tool, ?kind, %message, "process error");
                info.process_error(kind, message);
            }
            ProcessEvent::Finished {
                exit_code,
                exit_status,
            } => {
                info!(job = %job.uuid(), tool, exit_code, ?exit_status, "tool exited");
                info.process_finished(exit_code, exit_status);
                break;
            }
        }
    }
    Ok(())
}

fn prepare_outdir(outdir: &Path) -> Result<()> {
    std::fs::create_dir_all(outdir)?;
    let stdout = outdir.join("stdout");
    std::fs::write(&stdout, "").map_err(|e| {
        RunManagerError::ProcessError(format!("cannot create {}: {e}", stdout.display()))
    })
}

/// Attach the declared required files to matching outputs.
fn apply_copy_required(outputs: Files, ctx: &RunContext) -> Files {
    if ctx.copy_required.is_empty() && ctx.osm_resources.is_empty() {
        return outputs;
    }
    outputs
        .into_iter()
        .map(|mut file| {
            let ext = file.extension().unwrap_or_default();
            for rule in ctx.copy_required.iter().filter(|r| r.extension == ext) {
                inherit(&mut file, rule);
            }
            if ext == "osm" {
                for (source, target) in &ctx.osm_resources {
                    if let Err(e) = file.add_required_file(source.clone(), target.clone()) {
                        debug!(file = ?file.full_path, error = %e, "skipping resource file");
                    }
                }
            }
            file
        })
        .collect()
}

fn inherit(file: &mut FileInfo, rule: &CopyRequired) {
    let pairs: Vec<(PathBuf, PathBuf)> = match &rule.target {
        Some(target) => rule
            .source
            .required_file(target)
            .map(|s| vec![(s.to_path_buf(), target.clone())])
            .unwrap_or_default(),
        None => rule.source.required_files().to_vec(),
    };
    for (source, target) in pairs {
        if let Err(e) = file.add_required_file(source, target) {
            debug!(file = ?file.full_path, error = %e, "skipping inherited required file");
        }
    }
}

/// Keep order, but move declared outputs to the end so lookups by
/// extension prefer them over incidental files.
fn expected_last(outputs: Files, ctx: &RunContext) -> Files {
    let (expected, other): (Vec<FileInfo>, Vec<FileInfo>) = outputs
        .into_iter()
        .partition(|f| ctx.expected_outputs.contains(&f.filename));
    other.into_iter().chain(expected).collect()
}
