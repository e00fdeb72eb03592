// src/job/mod.rs

//! The job node: identity, tree links, cached resolutions and staleness.
//!
//! A [`Job`] is a cheap, cloneable handle. All mutable data sits behind one
//! `RwLock` (read for queries such as [`Job::out_of_date`], write for
//! transitions); the cached resolutions (output directory, accumulated
//! parameters and input files, per-kind file lookups) live under the same
//! lock and are dropped at the start of every run and whenever the tree
//! shape changes.
//!
//! - [`runner`] is the sequential tool loop (`Job::run`).
//! - [`context`] is what a kind's start handler fills in.
//! - [`error_info`] folds process results into [`JobErrors`].
//! - [`kinds`] holds the per-[`JobType`] behaviour.
//! - [`state`] is the serializable [`JobState`].

pub mod context;
pub mod error_info;
pub mod kinds;
pub mod runner;
pub mod state;

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard, Weak};

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::files::{FileInfo, Files};
use crate::params::JobParams;
use crate::process::{Process, ProcessCreator};
use crate::tools::Tools;
use crate::types::{JobStatus, JobType, TreeStatus};

pub use context::{RunContext, ToolStep};
pub use error_info::{EnergyPlusErrFile, ErrorInfo, OsResult};
pub use kinds::JobKind;
pub use state::{JobErrors, JobState};

/// Handle to one node of a job tree.
#[derive(Clone)]
pub struct Job {
    inner: Arc<JobInner>,
}

struct JobInner {
    uuid: Uuid,
    job_type: JobType,
    data: RwLock<JobData>,
    stop: Mutex<StopFlag>,
    status: watch::Sender<JobStatus>,
    /// Held for the whole duration of a run.
    run_lock: tokio::sync::Mutex<()>,
}

pub(crate) struct JobData {
    pub(crate) kind: JobKind,
    pub(crate) tools: Tools,
    pub(crate) params: JobParams,
    pub(crate) input_files: Files,
    pub(crate) children: Vec<Job>,
    pub(crate) finished: Option<Job>,
    parent: Weak<JobInner>,
    pub(crate) state: JobState,
    pub(crate) force: bool,
    pub(crate) verify_checksums: bool,
    pub(crate) base_path: PathBuf,
    pub(crate) index: usize,
    cache: JobCache,
}

#[derive(Default)]
struct JobCache {
    outdir: Option<PathBuf>,
    all_params: Option<JobParams>,
    all_input_files: Option<Files>,
    resolved: HashMap<String, FileInfo>,
}

#[derive(Default)]
struct StopFlag {
    requested: bool,
    active: Option<Arc<dyn Process>>,
}

/// Everything needed to construct a job; see `JobFactory`.
pub(crate) struct JobParts {
    pub uuid: Uuid,
    pub job_type: JobType,
    pub kind: JobKind,
    pub tools: Tools,
    pub params: JobParams,
    pub input_files: Files,
    pub state: JobState,
    pub base_path: PathBuf,
}

impl Job {
    pub(crate) fn from_parts(parts: JobParts) -> Job {
        let (status, _) = watch::channel(JobStatus::Idle);
        Job {
            inner: Arc::new(JobInner {
                uuid: parts.uuid,
                job_type: parts.job_type,
                data: RwLock::new(JobData {
                    kind: parts.kind,
                    tools: parts.tools,
                    params: parts.params,
                    input_files: parts.input_files,
                    children: Vec::new(),
                    finished: None,
                    parent: Weak::new(),
                    state: parts.state,
                    force: false,
                    verify_checksums: false,
                    base_path: parts.base_path,
                    index: 0,
                    cache: JobCache::default(),
                }),
                stop: Mutex::new(StopFlag::default()),
                status,
                run_lock: tokio::sync::Mutex::new(()),
            }),
        }
    }

    pub(crate) fn read(&self) -> RwLockReadGuard<'_, JobData> {
        self.inner.data.read().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn write(&self) -> RwLockWriteGuard<'_, JobData> {
        self.inner.data.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn stop_flag(&self) -> MutexGuard<'_, StopFlag> {
        self.inner.stop.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn uuid(&self) -> Uuid {
        self.inner.uuid
    }

    pub fn job_type(&self) -> JobType {
        self.inner.job_type
    }

    pub fn status(&self) -> JobStatus {
        *self.inner.status.borrow()
    }

    /// Receive every status transition.
    pub fn subscribe_status(&self) -> watch::Receiver<JobStatus> {
        self.inner.status.subscribe()
    }

    pub(crate) fn set_status(&self, status: JobStatus) {
        debug!(job = %self.uuid(), ?status, "status");
        self.inner.status.send_replace(status);
    }

    pub fn is_running(&self) -> bool {
        self.status().is_running()
    }

    /// Short human-readable label, e.g. `EnergyPlus in.idf`.
    pub fn description(&self) -> String {
        let data = self.read();
        let names: Vec<&str> = data.input_files.iter().map(|f| f.filename.as_str()).collect();
        if names.is_empty() {
            self.job_type().to_string()
        } else {
            format!("{} {}", self.job_type(), names.join(" "))
        }
    }

    pub fn kind(&self) -> JobKind {
        self.read().kind.clone()
    }

    pub fn params(&self) -> JobParams {
        self.read().params.clone()
    }

    /// Own input files, made absolute against the base path.
    pub fn input_files(&self) -> Files {
        let data = self.read();
        data.input_files.complete(&data.base_path)
    }

    pub fn tools(&self) -> Tools {
        self.read().tools.clone()
    }

    pub fn base_path(&self) -> PathBuf {
        self.read().base_path.clone()
    }

    pub fn set_base_path(&self, base: impl Into<PathBuf>) {
        self.write().base_path = base.into();
        self.invalidate_tree_caches();
    }

    pub fn index(&self) -> usize {
        self.read().index
    }

    pub fn set_index(&self, index: usize) {
        self.write().index = index;
        self.invalidate_tree_caches();
    }

    /// Always treat this job as out of date.
    pub fn set_force(&self, force: bool) {
        self.write().force = force;
    }

    /// Confirm a newer mtime with a content checksum before re-running.
    pub fn set_verify_checksums(&self, verify: bool) {
        self.write().verify_checksums = verify;
    }

    // ---- tree ---------------------------------------------------------

    pub fn children(&self) -> Vec<Job> {
        self.read().children.clone()
    }

    pub fn finished_job(&self) -> Option<Job> {
        self.read().finished.clone()
    }

    pub fn parent(&self) -> Option<Job> {
        self.read().parent.upgrade().map(|inner| Job { inner })
    }

    /// Position of `child` among this job's children.
    pub fn child_index(&self, child: Uuid) -> Option<usize> {
        self.read().children.iter().position(|c| c.uuid() == child)
    }

    pub fn is_finished_job_of(&self, parent: &Job) -> bool {
        parent
            .finished_job()
            .is_some_and(|f| f.uuid() == self.uuid())
    }

    pub fn add_child(&self, child: Job) {
        child.write().parent = Arc::downgrade(&self.inner);
        self.write().children.push(child.clone());
        child.invalidate_tree_caches();
    }

    pub fn remove_child(&self, uuid: Uuid) -> Option<Job> {
        let removed = {
            let mut data = self.write();
            let pos = data.children.iter().position(|c| c.uuid() == uuid)?;
            data.children.remove(pos)
        };
        removed.write().parent = Weak::new();
        removed.invalidate_tree_caches();
        // sibling indices shift
        self.invalidate_tree_caches();
        Some(removed)
    }

    /// Install (or clear) the continuation that runs after this job and
    /// all of its children trees.
    pub fn set_finished_job(&self, job: Option<Job>) {
        if let Some(j) = &job {
            j.write().parent = Arc::downgrade(&self.inner);
        }
        let previous = std::mem::replace(&mut self.write().finished, job.clone());
        if let Some(prev) = previous {
            if job.as_ref().is_none_or(|j| j.uuid() != prev.uuid()) {
                prev.write().parent = Weak::new();
                prev.invalidate_tree_caches();
            }
        }
        if let Some(j) = job {
            j.invalidate_tree_caches();
        }
    }

    /// This job followed by every descendant, children before the finished job.
    pub fn tree(&self) -> Vec<Job> {
        let mut out = vec![self.clone()];
        for child in self.children() {
            out.extend(child.tree());
        }
        if let Some(f) = self.finished_job() {
            out.extend(f.tree());
        }
        out
    }

    pub(crate) fn invalidate_tree_caches(&self) {
        self.write().cache = JobCache::default();
        for job in self.tree().into_iter().skip(1) {
            job.write().cache = JobCache::default();
        }
    }

    // ---- state --------------------------------------------------------

    pub fn state(&self) -> JobState {
        self.read().state.clone()
    }

    /// Replace the last-run snapshot, e.g. from a state store.
    pub fn restore_state(&self, state: JobState) {
        let mut data = self.write();
        data.state = state;
        data.cache = JobCache::default();
    }

    pub fn last_run(&self) -> Option<DateTime<Utc>> {
        self.read().state.last_run
    }

    pub fn errors(&self) -> JobErrors {
        self.read().state.errors.clone()
    }

    pub fn canceled(&self) -> bool {
        self.read().state.canceled
    }

    /// Files produced by the last run; `None` before the first run.
    pub fn output_files(&self) -> Option<Files> {
        self.read().state.output_files.clone()
    }

    /// Accumulated input files followed by this job's outputs.
    pub fn all_files(&self) -> Files {
        let mut files = self.all_input_files();
        if let Some(out) = self.output_files() {
            files.extend(&out);
        }
        files.complete(&self.base_path())
    }

    /// Input and output files of every child tree below this job.
    pub fn all_child_files(&self) -> Files {
        let mut files = Files::new();
        for child in self.children() {
            files.extend(&child.input_files());
            if let Some(out) = child.output_files() {
                files.extend(&out);
            }
            files.extend(&child.all_child_files());
        }
        files.complete(&self.base_path())
    }

    pub fn all_child_params(&self) -> JobParams {
        let mut params = JobParams::new();
        for child in self.children() {
            params.extend(&child.params());
        }
        params
    }

    /// Parameters inherited from the parent chain, plus the children's when
    /// this is its parent's finished job, plus this job's own.
    pub fn all_params(&self) -> JobParams {
        if let Some(cached) = &self.read().cache.all_params {
            return cached.clone();
        }

        let mut params = JobParams::new();
        if let Some(parent) = self.parent() {
            params.extend(&parent.all_params());
            if self.is_finished_job_of(&parent) {
                params.extend(&parent.all_child_params());
            }
        }
        params.extend(&self.params());

        self.write().cache.all_params = Some(params.clone());
        params
    }

    /// Files visible to this job: the parent's inputs and outputs, the
    /// sibling trees' files when this is the finished job, then its own.
    pub fn all_input_files(&self) -> Files {
        if let Some(cached) = &self.read().cache.all_input_files {
            return cached.clone();
        }

        let mut files = Files::new();
        if let Some(parent) = self.parent() {
            files.extend(&parent.all_files());
            if self.is_finished_job_of(&parent) {
                files.extend(&parent.all_child_files());
            }
        }
        files.extend(&self.input_files());
        let files = files.complete(&self.base_path());

        self.write().cache.all_input_files = Some(files.clone());
        files
    }

    /// Working directory for this job.
    ///
    /// A restored state's directory wins. Otherwise a child lives under its
    /// parent's directory as `<JobType>-<index>` (or `<JobType>-finishedjob`)
    /// and a root under its `outdir` parameter as `<JobType>`. With the
    /// `flatoutdir` parameter, jobs are siblings prefixed by their index.
    pub fn outdir(&self) -> PathBuf {
        {
            let data = self.read();
            if let Some(dir) = &data.cache.outdir {
                return dir.clone();
            }
            if let Some(dir) = &data.state.outdir {
                return complete_path(dir, &data.base_path);
            }
        }

        let flat = self.all_params().has("flatoutdir");
        let (index, base, outdir_param) = {
            let data = self.read();
            (data.index, data.base_path.clone(), data.params.get_opt("outdir"))
        };
        let prefix = if flat { format!("{index}-") } else { String::new() };

        let (parent_path, suffix) = match self.parent() {
            Some(parent) => {
                let suffix = if self.is_finished_job_of(&parent) {
                    "-finishedjob".to_string()
                } else {
                    format!("-{}", parent.child_index(self.uuid()).unwrap_or(0))
                };
                let parent_dir = parent.outdir();
                let path = if flat {
                    parent_dir.parent().map(Path::to_path_buf).unwrap_or(parent_dir)
                } else {
                    parent_dir
                };
                (path, suffix)
            }
            None => {
                if outdir_param.is_none() && base.as_os_str().is_empty() {
                    warn!(job = %self.uuid(), "no 'outdir' parameter and no base path; using the current directory");
                }
                (outdir_param.map(PathBuf::from).unwrap_or_default(), String::new())
            }
        };

        let dir = parent_path.join(format!("{prefix}{}{suffix}", self.job_type().value_name()));
        let dir = complete_path(&dir, &base);
        self.write().cache.outdir = Some(dir.clone());
        dir
    }

    /// Cached per-run file lookup; `resolve` runs at most once per run.
    pub fn memoized_file<F>(&self, slot: &str, resolve: F) -> crate::errors::Result<FileInfo>
    where
        F: FnOnce() -> crate::errors::Result<FileInfo>,
    {
        if let Some(found) = self.read().cache.resolved.get(slot) {
            return Ok(found.clone());
        }
        let found = resolve()?;
        self.write()
            .cache
            .resolved
            .insert(slot.to_string(), found.clone());
        Ok(found)
    }

    pub(crate) fn reset_caches(&self) {
        self.write().cache = JobCache::default();
    }

    // ---- staleness ----------------------------------------------------

    /// Whether this job must run again.
    ///
    /// True if forced, never run, a tracked input changed since the last run,
    /// the parent is out of date or ran later, or, for a finished job, any
    /// sibling tree is out of date or ran later.
    pub fn out_of_date(&self) -> bool {
        let (force, last_run, tracked) = {
            let data = self.read();
            (
                data.force,
                data.state.last_run,
                data.state.tracked_files.clone(),
            )
        };

        if force {
            return true;
        }
        let Some(last_run) = last_run else {
            return true;
        };
        if tracked.iter().any(|t| t.changed_since(last_run)) {
            return true;
        }

        let Some(parent) = self.parent() else {
            return false;
        };
        if parent.out_of_date() {
            debug!(job = %self.uuid(), "parent out of date");
            return true;
        }
        if parent.last_run().is_some_and(|p| p > last_run) {
            debug!(job = %self.uuid(), "parent ran after this job");
            return true;
        }

        if self.is_finished_job_of(&parent) {
            if parent.children_trees_out_of_date() {
                return true;
            }
            if parent
                .children_last_run()
                .is_some_and(|c| c > last_run)
            {
                return true;
            }
        }

        false
    }

    /// This job or anything below it is out of date.
    pub fn tree_out_of_date(&self) -> bool {
        self.out_of_date()
            || self.children_trees_out_of_date()
            || self.finished_job().is_some_and(|f| f.tree_out_of_date())
    }

    pub fn children_trees_out_of_date(&self) -> bool {
        self.children().iter().any(Job::tree_out_of_date)
    }

    /// Most recent `last_run` among the children.
    pub fn children_last_run(&self) -> Option<DateTime<Utc>> {
        self.children().iter().filter_map(Job::last_run).max()
    }

    /// Whether this job could start right now.
    ///
    /// Forced jobs always can. Otherwise the job must be idle, not canceled
    /// and out of date, its parent must have run successfully and be up to
    /// date, and a finished job additionally waits for its siblings' trees to have
    /// run successfully.
    pub fn runnable(&self) -> bool {
        if self.read().force {
            return true;
        }
        if self.is_running() || self.canceled() || !self.out_of_date() {
            return false;
        }

        let Some(parent) = self.parent() else {
            return true;
        };
        if parent.last_run().is_none() || parent.is_running() {
            return false;
        }
        if !parent.errors().succeeded() || parent.out_of_date() {
            return false;
        }

        if self.is_finished_job_of(&parent) {
            for child in parent.children() {
                if !child.tree_errors().succeeded() {
                    return false;
                }
                for job in child.tree() {
                    if job.is_running() || job.out_of_date() || job.last_run().is_none() {
                        return false;
                    }
                }
            }
        }
        true
    }

    pub fn tree_status(&self) -> TreeStatus {
        let own = if self.is_running() {
            TreeStatus::Running
        } else if self.last_run().is_some() {
            if self.errors().succeeded() {
                TreeStatus::Finished
            } else {
                TreeStatus::Failed
            }
        } else if self.canceled() {
            TreeStatus::Canceled
        } else {
            TreeStatus::Waiting
        };

        let mut status = own;
        for child in self.children() {
            status = status.combine(child.tree_status());
        }
        if let Some(f) = self.finished_job() {
            status = status.combine(f.tree_status());
        }
        status
    }

    /// Errors of this job and every descendant, added together.
    pub fn tree_errors(&self) -> JobErrors {
        let mut errors = self.errors();
        for child in self.children() {
            errors = errors + child.tree_errors();
        }
        if let Some(f) = self.finished_job() {
            errors = errors + f.tree_errors();
        }
        errors
    }

    // ---- stop ---------------------------------------------------------

    /// Ask the job to stop. Safe from any thread and in any state.
    ///
    /// A job that has not started yet completes immediately when it is next
    /// run.
    pub fn request_stop(&self) {
        let active = {
            let mut flag = self.stop_flag();
            flag.requested = true;
            flag.active.clone()
        };
        info!(job = %self.uuid(), "stop requested");
        if self.is_running() {
            self.set_status(JobStatus::Canceling);
        }
        if let Some(process) = active {
            process.stop();
        }
    }

    pub fn stop_requested(&self) -> bool {
        self.stop_flag().requested
    }

    /// Take and clear the stop request.
    pub(crate) fn take_stop_request(&self) -> bool {
        std::mem::take(&mut self.stop_flag().requested)
    }

    /// Register the process to stop on `request_stop`. Returns `false` (and
    /// registers nothing) when a stop is already pending.
    pub(crate) fn set_active_process(&self, process: Option<Arc<dyn Process>>) -> bool {
        let mut flag = self.stop_flag();
        if process.is_some() && flag.requested {
            return false;
        }
        flag.active = process;
        true
    }

    /// Request stop and wait until any in-flight run has finished.
    pub async fn shutdown(&self) {
        self.request_stop();
        let _guard = self.inner.run_lock.lock().await;
    }

    /// Run this job on its own task.
    ///
    /// Dropping the returned handle requests stop; the task then finishes
    /// promptly and its process tree is killed.
    pub fn spawn(&self, creator: Arc<dyn ProcessCreator>) -> RunningJob {
        let job = self.clone();
        let handle = tokio::spawn(async move { job.run(creator.as_ref()).await });
        RunningJob {
            job: self.clone(),
            handle: Some(handle),
        }
    }

    pub(crate) fn run_lock(&self) -> &tokio::sync::Mutex<()> {
        &self.inner.run_lock
    }
}

impl PartialEq for Job {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for Job {}

impl fmt::Debug for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Job")
            .field("uuid", &self.uuid())
            .field("job_type", &self.job_type())
            .field("status", &self.status())
            .finish()
    }
}

impl Drop for JobInner {
    fn drop(&mut self) {
        let flag = self.stop.get_mut().unwrap_or_else(PoisonError::into_inner);
        if let Some(process) = flag.active.take() {
            process.stop();
        }
    }
}

/// A job running on its own task.
pub struct RunningJob {
    job: Job,
    handle: Option<JoinHandle<JobErrors>>,
}

impl RunningJob {
    pub fn job(&self) -> &Job {
        &self.job
    }

    pub fn request_stop(&self) {
        self.job.request_stop();
    }

    /// Wait for the run to finish.
    pub async fn wait(mut self) -> JobErrors {
        match self.handle.take() {
            Some(handle) => match handle.await {
                Ok(errors) => errors,
                Err(e) => {
                    warn!(job = %self.job.uuid(), error = %e, "job task panicked or was aborted");
                    self.job.errors()
                }
            },
            None => self.job.errors(),
        }
    }
}

impl Drop for RunningJob {
    fn drop(&mut self) {
        if self.handle.as_ref().is_some_and(|h| !h.is_finished()) {
            self.job.request_stop();
        }
    }
}

fn complete_path(path: &Path, base: &Path) -> PathBuf {
    if path.is_absolute() || base.as_os_str().is_empty() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}
