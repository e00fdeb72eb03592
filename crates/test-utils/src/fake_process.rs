use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use tokio::sync::{mpsc, Notify};
use runmanager::errors::Result;
use runmanager::files::{FileInfo, Files};
use runmanager::process::{ExitStatus, Process, ProcessCreator, ProcessEvent, ProcessSpec};

/// What a fake tool does when launched.
#[derive(Debug, Clone, Default)]
pub struct FakeBehavior {
    /// `(file name, contents)` written into the output directory.
    pub outputs: Vec<(String, String)>,
    pub exit_code: i32,
    /// Never finish on its own; only `stop()` ends the process.
    pub hang: bool,
}

impl FakeBehavior {
    pub fn success() -> Self {
        Self::default()
    }

    pub fn writes(mut self, name: &str, contents: &str) -> Self {
        self.outputs.push((name.to_string(), contents.to_string()));
        self
    }

    pub fn exit_code(mut self, code: i32) -> Self {
        self.exit_code = code;
        self
    }

    pub fn hang(mut self) -> Self {
        self.hang = true;
        self
    }
}

/// A process creator that never spawns anything:
/// - records every `ProcessSpec` it is asked to launch
/// - "runs" each tool by writing the configured outputs and reporting the
///   configured exit code.
///
/// Tools without a configured behavior succeed and write nothing.
#[derive(Clone, Default)]
pub struct FakeProcessCreator {
    behaviors: Arc<Mutex<HashMap<String, FakeBehavior>>>,
    launched: Arc<Mutex<Vec<ProcessSpec>>>,
}

impl FakeProcessCreator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_tool(self, tool: &str, behavior: FakeBehavior) -> Self {
        self.behaviors
            .lock()
            .unwrap()
            .insert(tool.to_lowercase(), behavior);
        self
    }

    /// Names of the tools launched so far, in order.
    pub fn launched_tools(&self) -> Vec<String> {
        self.launched
            .lock()
            .unwrap()
            .iter()
            .map(|s| s.tool.name.clone())
            .collect()
    }

    pub fn launched(&self) -> Vec<ProcessSpec> {
        self.launched.lock().unwrap().clone()
    }
}

impl ProcessCreator for FakeProcessCreator {
    fn create_process(&self, spec: ProcessSpec) -> Result<Box<dyn Process>> {
        let behavior = self
            .behaviors
            .lock()
            .unwrap()
            .get(&spec.tool.name.to_lowercase())
            .cloned()
            .unwrap_or_default();
        self.launched.lock().unwrap().push(spec.clone());
        Ok(Box::new(FakeProcess {
            spec,
            behavior,
            stop: Arc::new(Notify::new()),
            written: Arc::new(Mutex::new(Vec::new())),
        }))
    }
}

struct FakeProcess {
    spec: ProcessSpec,
    behavior: FakeBehavior,
    stop: Arc<Notify>,
    written: Arc<Mutex<Vec<PathBuf>>>,
}

impl Process for FakeProcess {
    fn start(&self) -> Result<mpsc::UnboundedReceiver<ProcessEvent>> {
        let (tx, rx) = mpsc::unbounded_channel();
        let _ = tx.send(ProcessEvent::Started);

        std::fs::create_dir_all(&self.spec.output_dir)?;
        for (name, contents) in &self.behavior.outputs {
            let path = self.spec.output_dir.join(name);
            std::fs::write(&path, contents)?;
            self.written.lock().unwrap().push(path);
        }

        if self.behavior.hang {
            let stop = Arc::clone(&self.stop);
            tokio::spawn(async move {
                stop.notified().await;
                let _ = tx.send(ProcessEvent::Finished {
                    exit_code: -1,
                    exit_status: ExitStatus::Crashed,
                });
            });
        } else {
            let _ = tx.send(ProcessEvent::Finished {
                exit_code: self.behavior.exit_code,
                exit_status: ExitStatus::Normal,
            });
        }
        Ok(rx)
    }

    fn stop(&self) {
        self.stop.notify_one();
    }

    fn output_files(&self) -> Files {
        self.written
            .lock()
            .unwrap()
            .iter()
            .map(|p| FileInfo::from_path(p.clone()))
            .collect()
    }

    fn clean_up_required_files(&self) {}
}
