//! Daemon module for neurocare
//!
//! Hosts a booking workflow between CLI invocations and serves it over IPC.

pub mod client;
pub mod ipc;
pub mod server;
pub mod service;
pub mod state;

use anyhow::Result;
use std::process::Command;
use std::time::{Duration, Instant};

use crate::config::Settings;

/// PID of a running daemon, if the PID file points at a live process
pub fn running_pid(settings: &Settings) -> Option<i32> {
    let pid = std::fs::read_to_string(settings.pid_path())
        .ok()?
        .trim()
        .parse::<i32>()
        .ok()?;
    process_alive(pid).then_some(pid)
}

fn process_alive(pid: i32) -> bool {
    if pid <= 0 {
        return false;
    }
    // Signal 0 only checks that the process exists
    unsafe { libc::kill(pid, 0) == 0 }
}

/// Start the daemon as a background process
pub fn start_daemon(settings: &Settings) -> Result<()> {
    let pid_path = settings.pid_path();
    let socket_path = settings.socket_path();

    if pid_path.exists() {
        if let Some(pid) = running_pid(settings) {
            anyhow::bail!("Daemon is already running (PID: {})", pid);
        }
        // Stale PID file
        std::fs::remove_file(&pid_path)?;
    }

    if socket_path.exists() {
        let _ = std::fs::remove_file(&socket_path);
    }

    let exe = std::env::current_exe()?;
    let mut child = Command::new(exe)
        .args(["daemon", "start", "--foreground"])
        .stdin(std::process::Stdio::null())
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null())
        .spawn()?;

    // Wait for readiness so callers don't get a false positive start.
    let deadline = Instant::now() + Duration::from_secs(2);
    while Instant::now() < deadline {
        if let Some(status) = child.try_wait()? {
            anyhow::bail!(
                "Daemon failed to start (exit: {}). Run `neurocare daemon start --foreground` for details.",
                status
            );
        }

        if pid_path.exists() && socket_path.exists() {
            return Ok(());
        }

        std::thread::sleep(Duration::from_millis(50));
    }

    anyhow::bail!("Daemon start timed out. Run `neurocare daemon start --foreground` for details.")
}

/// Run the daemon in the foreground
pub async fn run_foreground(settings: &Settings) -> Result<()> {
    service::run(settings).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn current_process_is_alive() {
        assert!(process_alive(std::process::id() as i32));
        assert!(!process_alive(0));
        assert!(!process_alive(-1));
    }
}
