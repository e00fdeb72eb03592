// src/process/local.rs

//! Tools run as local child processes.

use std::collections::HashSet;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use notify::{Config, Event, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::errors::{Result, RunManagerError};
use crate::files::{FileInfo, Files};
use crate::process::kill;
use crate::process::poll::DirSnapshot;
use crate::process::staging;
use crate::process::{
    ExitStatus, Process, ProcessCreator, ProcessErrorKind, ProcessEvent, ProcessSpec,
};
use crate::types::ZombieAssumption;

/// How to treat a child that can no longer be waited on and whose exit was
/// never observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ZombiePolicy {
    /// Consecutive polls the child must be lost before concluding.
    pub max_polls: u32,
    pub assume: ZombieAssumption,
}

impl Default for ZombiePolicy {
    fn default() -> Self {
        Self {
            max_polls: 10,
            assume: ZombieAssumption::Success,
        }
    }
}

#[derive(Debug, Clone)]
pub struct LocalProcessOptions {
    pub poll_interval: Duration,
    /// Time between the graceful stop request and the forced kill.
    pub stop_grace: Duration,
    pub zombie: ZombiePolicy,
    /// Also poll on filesystem notifications for the output directory.
    pub watch_output_dir: bool,
}

impl Default for LocalProcessOptions {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(1000),
            stop_grace: Duration::from_secs(3),
            zombie: ZombiePolicy::default(),
            watch_output_dir: true,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct LocalProcessCreator {
    options: LocalProcessOptions,
}

impl LocalProcessCreator {
    pub fn new(options: LocalProcessOptions) -> Self {
        Self { options }
    }
}

impl ProcessCreator for LocalProcessCreator {
    fn create_process(&self, spec: ProcessSpec) -> Result<Box<dyn Process>> {
        Ok(Box::new(LocalProcess::new(spec, self.options.clone())))
    }
}

#[derive(Default)]
struct Shared {
    started: bool,
    staged: Vec<PathBuf>,
    pid: Option<u32>,
    driver: Option<JoinHandle<()>>,
}

pub struct LocalProcess {
    spec: ProcessSpec,
    options: LocalProcessOptions,
    stop_tx: watch::Sender<bool>,
    shared: Arc<Mutex<Shared>>,
}

impl LocalProcess {
    pub fn new(spec: ProcessSpec, options: LocalProcessOptions) -> Self {
        let (stop_tx, _) = watch::channel(false);
        Self {
            spec,
            options,
            stop_tx,
            shared: Arc::new(Mutex::new(Shared::default())),
        }
    }
}

impl Process for LocalProcess {
    fn start(&self) -> Result<mpsc::UnboundedReceiver<ProcessEvent>> {
        let mut shared = self
            .shared
            .lock()
            .map_err(|_| RunManagerError::ProcessError("process state poisoned".into()))?;
        if shared.started {
            return Err(RunManagerError::ProcessError(format!(
                "process for tool '{}' already started",
                self.spec.tool.name
            )));
        }
        shared.started = true;

        let (tx, rx) = mpsc::unbounded_channel();
        let driver = Driver {
            spec: self.spec.clone(),
            options: self.options.clone(),
            shared: Arc::clone(&self.shared),
            stop_rx: self.stop_tx.subscribe(),
            tx,
        };
        shared.driver = Some(tokio::spawn(driver.run()));
        Ok(rx)
    }

    fn stop(&self) {
        debug!(tool = %self.spec.tool.name, "stop requested for local process");
        self.stop_tx.send_replace(true);
    }

    fn output_files(&self) -> Files {
        let staged: HashSet<PathBuf> = self
            .shared
            .lock()
            .map(|s| s.staged.iter().cloned().collect())
            .unwrap_or_default();
        DirSnapshot::capture(&self.spec.output_dir)
            .files_excluding(&staged)
            .into_iter()
            .map(FileInfo::from_path)
            .collect()
    }

    fn clean_up_required_files(&self) {
        if let Ok(mut shared) = self.shared.lock() {
            staging::remove_staged(&shared.staged);
            shared.staged.clear();
        }
    }
}

impl Drop for LocalProcess {
    fn drop(&mut self) {
        let Ok(mut shared) = self.shared.lock() else {
            return;
        };
        if let Some(driver) = shared.driver.take() {
            if !driver.is_finished() {
                if let Some(pid) = shared.pid {
                    warn!(pid, tool = %self.spec.tool.name, "process handle dropped while running; killing tree");
                    let _ = kill::kill_tree(pid);
                }
                driver.abort();
            }
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Stream {
    Out,
    Err,
}

/// One read from a child's stdout or stderr.
type StreamLine = (Stream, std::result::Result<String, String>);

/// What a poll tick learned about the child.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Liveness {
    Running,
    /// Exited, but the exit was found by polling rather than by `wait`.
    Exited(i32, ExitStatus),
    /// Not waitable any more (already reaped elsewhere) and no exit seen.
    Lost,
}

fn liveness(child: &mut Child) -> Liveness {
    match child.try_wait() {
        Ok(None) => Liveness::Running,
        Ok(Some(status)) => {
            let (code, status) = exit_of(status);
            Liveness::Exited(code, status)
        }
        Err(e) => {
            debug!(error = %e, "cannot poll child status");
            Liveness::Lost
        }
    }
}

fn exit_of(status: std::process::ExitStatus) -> (i32, ExitStatus) {
    match status.code() {
        Some(code) => (code, ExitStatus::Normal),
        None => (-1, ExitStatus::Crashed),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Verdict {
    Running,
    Exited(i32, ExitStatus),
    Assumed(ZombieAssumption),
}

/// Counts consecutive ticks on which the child was lost.
#[derive(Debug)]
struct ZombieWatch {
    policy: ZombiePolicy,
    lost_polls: u32,
}

impl ZombieWatch {
    fn new(policy: ZombiePolicy) -> Self {
        Self {
            policy,
            lost_polls: 0,
        }
    }

    fn observe(&mut self, liveness: Liveness) -> Verdict {
        match liveness {
            Liveness::Running => {
                self.lost_polls = 0;
                Verdict::Running
            }
            Liveness::Exited(code, status) => Verdict::Exited(code, status),
            Liveness::Lost => {
                self.lost_polls += 1;
                if self.lost_polls >= self.policy.max_polls.max(1) {
                    Verdict::Assumed(self.policy.assume)
                } else {
                    Verdict::Running
                }
            }
        }
    }
}

/// Exit code and status reported for a lost child.
fn assumed_exit(assume: ZombieAssumption) -> (i32, ExitStatus) {
    match assume {
        ZombieAssumption::Success => (0, ExitStatus::Normal),
        ZombieAssumption::Failure => (-1, ExitStatus::Crashed),
    }
}

struct Driver {
    spec: ProcessSpec,
    options: LocalProcessOptions,
    shared: Arc<Mutex<Shared>>,
    stop_rx: watch::Receiver<bool>,
    tx: mpsc::UnboundedSender<ProcessEvent>,
}

impl Driver {
    fn emit(&self, event: ProcessEvent) {
        // The job may have stopped listening; nothing left to do then.
        let _ = self.tx.send(event);
    }

    fn fail_to_start(&self, message: String) {
        warn!(tool = %self.spec.tool.name, %message, "process failed to start");
        self.emit(ProcessEvent::Error {
            kind: ProcessErrorKind::FailedToStart,
            message,
        });
    }

    fn poll(&self, previous: &mut DirSnapshot) {
        let current = DirSnapshot::capture(&self.spec.output_dir);
        for path in current.changed_since(previous) {
            self.emit(ProcessEvent::OutputFileChanged(FileInfo::from_path(path)));
        }
        *previous = current;
    }

    async fn run(mut self) {
        let tool_name = self.spec.tool.name.clone();

        if *self.stop_rx.borrow() {
            self.fail_to_start("process was stopped before it started".to_string());
            return;
        }

        if let Err(e) = tokio::fs::create_dir_all(&self.spec.output_dir).await {
            self.fail_to_start(format!("creating output directory: {e}"));
            return;
        }

        match staging::stage_required_files(
            &self.spec.required_files,
            &self.spec.output_dir,
            &self.spec.base_path,
            self.spec.tool.tool_dir(),
        ) {
            Ok(staged) => {
                if let Ok(mut shared) = self.shared.lock() {
                    shared.staged = staged;
                }
            }
            Err(e) => {
                self.fail_to_start(format!("{e:#}"));
                return;
            }
        }

        let mut snapshot = DirSnapshot::capture(&self.spec.output_dir);

        let mut cmd = Command::new(&self.spec.tool.local_bin_path);
        cmd.args(&self.spec.parameters)
            .current_dir(&self.spec.output_dir)
            .env("PATH", prepend_path(self.spec.tool.tool_dir()))
            .stdin(if self.spec.stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        #[cfg(unix)]
        cmd.process_group(0);

        info!(
            tool = %tool_name,
            exe = ?self.spec.tool.local_bin_path,
            args = ?self.spec.parameters,
            dir = ?self.spec.output_dir,
            "starting tool process"
        );

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                self.fail_to_start(format!(
                    "spawning {:?}: {e}",
                    self.spec.tool.local_bin_path
                ));
                return;
            }
        };

        let pid = child.id();
        if let Ok(mut shared) = self.shared.lock() {
            shared.pid = pid;
        }
        self.emit(ProcessEvent::Started);

        if let (Some(payload), Some(mut stdin)) = (self.spec.stdin.clone(), child.stdin.take()) {
            let tx = self.tx.clone();
            tokio::spawn(async move {
                if let Err(e) = stdin.write_all(payload.as_bytes()).await {
                    let _ = tx.send(ProcessEvent::Error {
                        kind: ProcessErrorKind::WriteError,
                        message: e.to_string(),
                    });
                }
                // Dropping stdin closes the pipe.
            });
        }

        let (line_tx, mut line_rx) = mpsc::unbounded_channel::<StreamLine>();
        let mut readers = Vec::with_capacity(2);
        if let Some(stdout) = child.stdout.take() {
            readers.push(spawn_line_reader(stdout, Stream::Out, line_tx.clone()));
        }
        if let Some(stderr) = child.stderr.take() {
            readers.push(spawn_line_reader(stderr, Stream::Err, line_tx.clone()));
        }
        drop(line_tx);

        let (fs_tx, mut fs_rx) = mpsc::unbounded_channel::<()>();
        let _watcher = if self.options.watch_output_dir {
            watch_output_dir(&self.spec.output_dir, fs_tx)
        } else {
            None
        };

        let mut logs = StdLogs::open(&self.spec.output_dir).await;
        let mut ticker = tokio::time::interval(self.options.poll_interval);
        let mut stopping: Option<Instant> = None;
        let mut killed = false;
        let mut zombies = ZombieWatch::new(self.options.zombie);

        let (exit_code, exit_status) = loop {
            tokio::select! {
                status = child.wait() => {
                    break match status {
                        Ok(status) => exit_of(status),
                        Err(e) => {
                            self.emit(ProcessEvent::Error {
                                kind: ProcessErrorKind::Unknown,
                                message: format!("waiting for process: {e}"),
                            });
                            (-1, ExitStatus::Crashed)
                        }
                    };
                }

                Some(line) = line_rx.recv() => {
                    self.forward_line(&mut logs, line).await;
                    self.poll(&mut snapshot);
                }

                Some(()) = fs_rx.recv() => {
                    self.poll(&mut snapshot);
                }

                _ = ticker.tick() => {
                    self.poll(&mut snapshot);

                    if let (Some(since), Some(pid)) = (stopping, pid) {
                        if !killed && since.elapsed() >= self.options.stop_grace {
                            warn!(tool = %tool_name, pid, "process ignored stop request; killing process tree");
                            if let Err(e) = kill::kill_tree(pid) {
                                debug!(error = %e, "kill_tree failed");
                            }
                            let _ = child.start_kill();
                            killed = true;
                        }
                    }

                    match zombies.observe(liveness(&mut child)) {
                        Verdict::Running => {}
                        Verdict::Exited(code, status) => {
                            debug!(tool = %tool_name, ?pid, code, "exit noticed by polling");
                            break (code, status);
                        }
                        Verdict::Assumed(assume) => break self.zombie_outcome(pid, assume),
                    }
                }

                res = self.stop_rx.changed(), if stopping.is_none() => {
                    if res.is_err() || *self.stop_rx.borrow() {
                        info!(tool = %tool_name, ?pid, "terminating process tree");
                        if let Some(pid) = pid {
                            if let Err(e) = kill::terminate_tree(pid) {
                                debug!(error = %e, "terminate_tree failed; killing child");
                                let _ = child.start_kill();
                            }
                        } else {
                            let _ = child.start_kill();
                        }
                        stopping = Some(Instant::now());
                    }
                }
            }
        };

        // Helpers may still hold the pipes open; don't wait on them forever.
        let drain = async {
            while let Some(line) = line_rx.recv().await {
                self.forward_line(&mut logs, line).await;
            }
        };
        if tokio::time::timeout(Duration::from_millis(500), drain).await.is_err() {
            debug!(tool = %tool_name, "stdio still open after exit; not waiting further");
        }
        for reader in readers {
            reader.abort();
        }
        logs.flush().await;

        self.poll(&mut snapshot);

        info!(tool = %tool_name, exit_code, ?exit_status, "tool process finished");
        self.emit(ProcessEvent::Finished {
            exit_code,
            exit_status,
        });
    }

    async fn forward_line(&self, logs: &mut StdLogs, (stream, line): StreamLine) {
        match line {
            Ok(line) => {
                logs.write(stream, &line).await;
                self.emit(match stream {
                    Stream::Out => ProcessEvent::StandardOut(line),
                    Stream::Err => ProcessEvent::StandardErr(line),
                });
            }
            Err(message) => self.emit(ProcessEvent::Error {
                kind: ProcessErrorKind::ReadError,
                message,
            }),
        }
    }

    fn zombie_outcome(&self, pid: Option<u32>, assume: ZombieAssumption) -> (i32, ExitStatus) {
        warn!(
            tool = %self.spec.tool.name,
            ?pid,
            ?assume,
            "process exit was never observed; applying zombie policy"
        );
        if assume == ZombieAssumption::Failure {
            self.emit(ProcessEvent::Error {
                kind: ProcessErrorKind::Unknown,
                message: "process vanished without reporting an exit status".to_string(),
            });
        }
        assumed_exit(assume)
    }
}

/// Forward lines (and the first read error) until the stream closes.
fn spawn_line_reader<R>(
    reader: R,
    stream: Stream,
    line_tx: mpsc::UnboundedSender<StreamLine>,
) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(reader).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    if line_tx.send((stream, Ok(line))).is_err() {
                        break;
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    let _ = line_tx.send((stream, Err(format!("reading {stream:?}: {e}"))));
                    break;
                }
            }
        }
    })
}

fn watch_output_dir(dir: &Path, tx: mpsc::UnboundedSender<()>) -> Option<RecommendedWatcher> {
    let mut watcher = RecommendedWatcher::new(
        move |res: notify::Result<Event>| {
            if res.is_ok() {
                let _ = tx.send(());
            }
        },
        Config::default(),
    )
    .map_err(|e| debug!(error = %e, "output directory watcher unavailable"))
    .ok()?;

    watcher
        .watch(dir, RecursiveMode::Recursive)
        .map_err(|e| debug!(error = %e, dir = ?dir, "could not watch output directory"))
        .ok()?;
    Some(watcher)
}

/// `PATH` with the tool directory in front.
fn prepend_path(tool_dir: &Path) -> OsString {
    let mut dirs = vec![tool_dir.to_path_buf()];
    if let Some(existing) = std::env::var_os("PATH") {
        dirs.extend(std::env::split_paths(&existing));
    }
    std::env::join_paths(dirs).unwrap_or_else(|_| tool_dir.as_os_str().to_os_string())
}

/// Appends tool output to `stdout` / `stderr` in the output directory.
struct StdLogs {
    out: Option<tokio::fs::File>,
    err: Option<tokio::fs::File>,
}

impl StdLogs {
    async fn open(dir: &Path) -> Self {
        Self {
            out: open_append(&dir.join("stdout")).await,
            err: open_append(&dir.join("stderr")).await,
        }
    }

    async fn write(&mut self, stream: Stream, line: &str) {
        let file = match stream {
            Stream::Out => self.out.as_mut(),
            Stream::Err => self.err.as_mut(),
        };
        if let Some(file) = file {
            let _ = file.write_all(line.as_bytes()).await;
            let _ = file.write_all(b"\n").await;
        }
    }

    async fn flush(&mut self) {
        for file in [self.out.as_mut(), self.err.as_mut()].into_iter().flatten() {
            let _ = file.flush().await;
        }
    }
}

async fn open_append(path: &Path) -> Option<tokio::fs::File> {
    tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await
        .map_err(|e| debug!(path = ?path, error = %e, "cannot open log file"))
        .ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(max_polls: u32, assume: ZombieAssumption) -> ZombiePolicy {
        ZombiePolicy { max_polls, assume }
    }

    #[test]
    fn lost_child_is_assumed_successful_after_max_polls() {
        let mut watch = ZombieWatch::new(policy(3, ZombieAssumption::Success));
        assert_eq!(watch.observe(Liveness::Lost), Verdict::Running);
        assert_eq!(watch.observe(Liveness::Lost), Verdict::Running);
        assert_eq!(
            watch.observe(Liveness::Lost),
            Verdict::Assumed(ZombieAssumption::Success)
        );
        assert_eq!(assumed_exit(ZombieAssumption::Success), (0, ExitStatus::Normal));
    }

    #[test]
    fn lost_child_is_assumed_failed_under_failure_policy() {
        let mut watch = ZombieWatch::new(policy(2, ZombieAssumption::Failure));
        watch.observe(Liveness::Lost);
        assert_eq!(
            watch.observe(Liveness::Lost),
            Verdict::Assumed(ZombieAssumption::Failure)
        );
        assert_eq!(assumed_exit(ZombieAssumption::Failure), (-1, ExitStatus::Crashed));
    }

    #[test]
    fn running_tick_resets_the_lost_count() {
        let mut watch = ZombieWatch::new(policy(2, ZombieAssumption::Success));
        watch.observe(Liveness::Lost);
        watch.observe(Liveness::Running);
        assert_eq!(watch.observe(Liveness::Lost), Verdict::Running);
    }

    #[test]
    fn exit_found_by_polling_reports_the_real_status() {
        let mut watch = ZombieWatch::new(policy(1, ZombieAssumption::Failure));
        assert_eq!(
            watch.observe(Liveness::Exited(4, ExitStatus::Normal)),
            Verdict::Exited(4, ExitStatus::Normal)
        );
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn unreaped_child_is_seen_as_exited_not_running() {
        let mut child = Command::new("true").spawn().unwrap();
        let mut state = liveness(&mut child);
        for _ in 0..100 {
            if state != Liveness::Running {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
            state = liveness(&mut child);
        }
        assert_eq!(state, Liveness::Exited(0, ExitStatus::Normal));
    }
}
