//! PTY (Pseudo-Terminal) abstraction
//!
//! Wraps portable-pty so the rest of the local backend deals with one
//! thread-safe handle: resize, a cloned reader, a taken writer, and process
//! group teardown.

use portable_pty::{native_pty_system, CommandBuilder, MasterPty, PtySize};
use std::collections::BTreeMap;
use std::io::{Read, Write};
use std::path::PathBuf;
use std::sync::Mutex as StdMutex;
use tracing::{debug, info, warn};

use super::shell::{get_shell_args, ShellInfo};

#[cfg(unix)]
use nix::sys::signal::{killpg, Signal};
#[cfg(unix)]
use nix::unistd::Pid;

/// Error type for PTY operations
#[derive(Debug, thiserror::Error)]
pub enum PtyError {
    #[error("Failed to create PTY: {0}")]
    CreateFailed(String),

    #[error("Failed to spawn shell: {0}")]
    SpawnFailed(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("PTY system error: {0}")]
    PtySystemError(String),

    #[error("Lock error")]
    LockError,
}

/// Configuration for creating a new PTY
#[derive(Clone, Debug)]
pub struct PtyConfig {
    pub cols: u16,
    pub rows: u16,
    pub shell: ShellInfo,
    pub cwd: Option<PathBuf>,
    pub env: BTreeMap<String, String>,
    pub load_profile: bool,
}

impl Default for PtyConfig {
    fn default() -> Self {
        Self {
            cols: 80,
            rows: 24,
            shell: super::shell::default_shell(),
            cwd: None,
            env: BTreeMap::new(),
            load_profile: true,
        }
    }
}

/// Split halves of a freshly spawned PTY
pub struct PtyParts {
    pub handle: PtyHandle,
    pub reader: Box<dyn Read + Send>,
    pub writer: Box<dyn Write + Send>,
}

/// Master side and child process of a PTY
///
/// MasterPty is not Sync, so both halves sit behind standard mutexes.
pub struct PtyHandle {
    master: StdMutex<Box<dyn MasterPty + Send>>,
    child: StdMutex<Box<dyn portable_pty::Child + Send + Sync>>,
}

impl PtyHandle {
    /// Open a PTY and spawn the configured shell in it
    pub fn spawn(config: PtyConfig) -> Result<PtyParts, PtyError> {
        let pty_system = native_pty_system();

        let pair = pty_system
            .openpty(PtySize {
                rows: config.rows,
                cols: config.cols,
                pixel_width: 0,
                pixel_height: 0,
            })
            .map_err(|e| PtyError::CreateFailed(e.to_string()))?;

        let mut cmd = CommandBuilder::new(&config.shell.path);
        for arg in get_shell_args(&config.shell.id, config.load_profile) {
            cmd.arg(arg);
        }

        if let Some(cwd) = &config.cwd {
            cmd.cwd(cwd);
        } else if let Some(home) = dirs::home_dir() {
            cmd.cwd(home);
        }

        for (key, value) in std::env::vars() {
            cmd.env(key, value);
        }
        cmd.env("TERM", "xterm-256color");
        cmd.env("COLORTERM", "truecolor");
        for (key, value) in &config.env {
            cmd.env(key, value);
        }

        info!(
            "Spawning PTY shell: {:?} ({}x{}, cwd: {:?})",
            config.shell.path, config.cols, config.rows, config.cwd
        );

        let child = pair.slave.spawn_command(cmd).map_err(|e| {
            tracing::error!("Failed to spawn PTY shell: {}", e);
            PtyError::SpawnFailed(e.to_string())
        })?;
        // The slave end stays open in the child only; dropping ours lets EOF reach the reader
        drop(pair.slave);

        info!("PTY shell spawned, PID: {:?}", child.process_id());

        let reader = pair
            .master
            .try_clone_reader()
            .map_err(|e| PtyError::PtySystemError(format!("Failed to clone reader: {}", e)))?;
        let writer = pair
            .master
            .take_writer()
            .map_err(|e| PtyError::PtySystemError(format!("Failed to take writer: {}", e)))?;

        Ok(PtyParts {
            handle: PtyHandle {
                master: StdMutex::new(pair.master),
                child: StdMutex::new(child),
            },
            reader,
            writer,
        })
    }

    pub fn resize(&self, cols: u16, rows: u16) -> Result<(), PtyError> {
        let master = self.master.lock().map_err(|_| PtyError::LockError)?;
        master
            .resize(PtySize {
                rows,
                cols,
                pixel_width: 0,
                pixel_height: 0,
            })
            .map_err(|e| PtyError::PtySystemError(e.to_string()))
    }

    pub fn pid(&self) -> Option<u32> {
        self.child.lock().ok().and_then(|child| child.process_id())
    }

    pub fn is_alive(&self) -> bool {
        match self.child.lock() {
            Ok(mut child) => matches!(child.try_wait(), Ok(None)),
            Err(_) => false,
        }
    }

    pub fn kill(&self) -> Result<(), PtyError> {
        let mut child = self.child.lock().map_err(|_| PtyError::LockError)?;
        child
            .kill()
            .map_err(|e| PtyError::PtySystemError(e.to_string()))
    }

    /// Kill the shell and everything it started (vim, top, ...)
    #[cfg(unix)]
    pub fn kill_process_group(&self) -> Result<(), PtyError> {
        let Some(pid) = self.pid() else {
            return self.kill();
        };

        // The PTY child is a session and process group leader, so PGID == PID
        let pgid = Pid::from_raw(pid as i32);
        if let Err(e) = killpg(pgid, Signal::SIGTERM) {
            debug!("SIGTERM to process group {} failed: {}", pid, e);
        }
        std::thread::sleep(std::time::Duration::from_millis(50));
        if let Err(e) = killpg(pgid, Signal::SIGKILL) {
            // Usually ESRCH: the group already exited
            debug!("SIGKILL to process group {} failed: {}", pid, e);
        }
        // Reap the child so it does not linger as a zombie
        if let Ok(mut child) = self.child.lock() {
            let _ = child.try_wait();
        }
        Ok(())
    }

    #[cfg(windows)]
    pub fn kill_process_group(&self) -> Result<(), PtyError> {
        if let Some(pid) = self.pid() {
            let _ = std::process::Command::new("taskkill")
                .args(["/F", "/T", "/PID", &pid.to_string()])
                .output();
        }
        self.kill()
    }
}

impl Drop for PtyHandle {
    fn drop(&mut self) {
        if self.is_alive() {
            warn!("PTY dropped while shell still running, killing process group");
            let _ = self.kill_process_group();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pty_config_default() {
        let config = PtyConfig::default();
        assert_eq!(config.cols, 80);
        assert_eq!(config.rows, 24);
        assert!(config.load_profile);
    }
}
