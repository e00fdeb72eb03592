// src/process/kill.rs

//! Terminating a tool together with every helper it spawned.
//!
//! On unix tools are started in their own process group, so signalling the
//! group reaches forked helpers as well. On Windows `taskkill /T` walks the
//! process tree.

use anyhow::Result;

/// Ask the process tree rooted at `pid` to exit.
#[cfg(unix)]
pub fn terminate_tree(pid: u32) -> Result<()> {
    use nix::sys::signal::{killpg, Signal};
    use nix::unistd::Pid;

    killpg(Pid::from_raw(pid as i32), Signal::SIGTERM)?;
    Ok(())
}

/// Forcefully kill the process tree rooted at `pid`.
#[cfg(unix)]
pub fn kill_tree(pid: u32) -> Result<()> {
    use nix::sys::signal::{killpg, Signal};
    use nix::unistd::Pid;

    killpg(Pid::from_raw(pid as i32), Signal::SIGKILL)?;
    Ok(())
}

#[cfg(windows)]
pub fn terminate_tree(pid: u32) -> Result<()> {
    taskkill(pid, false)
}

#[cfg(windows)]
pub fn kill_tree(pid: u32) -> Result<()> {
    taskkill(pid, true)
}

#[cfg(windows)]
fn taskkill(pid: u32, force: bool) -> Result<()> {
    let mut cmd = std::process::Command::new("taskkill");
    cmd.arg("/PID").arg(pid.to_string()).arg("/T");
    if force {
        cmd.arg("/F");
    }
    let status = cmd.status()?;
    if !status.success() {
        anyhow::bail!("taskkill exited with {status}");
    }
    Ok(())
}
