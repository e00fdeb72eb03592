#![allow(dead_code)]

use std::path::Path;

use runmanager::files::{FileInfo, Files};
use runmanager::job::Job;

pub use runmanager_test_utils::{init_tracing, with_timeout};

/// Output files of the job's last run, or empty.
pub fn outputs(job: &Job) -> Files {
    job.output_files().unwrap_or_default()
}

pub fn output_named(job: &Job, name: &str) -> Option<FileInfo> {
    outputs(job).get_last_by_filename(name).ok()
}

/// Rewrite a file after a short pause so its mtime is past any earlier run
/// (coarse filesystem timestamps).
pub fn touch_later(path: &Path, contents: &str) {
    std::thread::sleep(std::time::Duration::from_millis(20));
    std::fs::write(path, contents).expect("rewrite file");
}

/// EnergyPlus error file reporting a clean simulation.
pub const CLEAN_ERR: &str = "Program Version,EnergyPlus 8.1\n\
    ************* Beginning Zone Sizing Calculations\n\
    ************* EnergyPlus Completed Successfully-- 0 Warning; 0 Severe Errors\n";

/// EnergyPlus error file with one severe and one fatal error.
pub const FATAL_ERR: &str = "Program Version,EnergyPlus 8.1\n\
    ** Severe  ** Node connection error\n\
    **  Fatal  ** Preceding conditions cause termination.\n\
    ************* EnergyPlus Terminated--Fatal Error Detected. 0 Warning; 1 Severe Errors\n";
