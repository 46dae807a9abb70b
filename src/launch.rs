//! Running the traced program.
//!
//! The launch command (typically an `mpirun` line) is executed through
//! `sh -c`. The instrumented program learns where to write its per-rank
//! streams from the environment:
//!
//! - `PERFLOW_TRACE_DIR`: directory for the `rank<r>.jsonl` files
//! - `PERFLOW_NPROCS`: number of ranks the run was started with
//! - `PERFLOW_BINARY`: path of the traced binary

use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{bail, Context};
use tracing::{debug, info};

use crate::error::{Error, Result};

pub const ENV_TRACE_DIR: &str = "PERFLOW_TRACE_DIR";
pub const ENV_NPROCS: &str = "PERFLOW_NPROCS";
pub const ENV_BINARY: &str = "PERFLOW_BINARY";

#[derive(Debug, Clone)]
pub struct LaunchRequest {
    pub binary: PathBuf,
    pub command: String,
    pub nprocs: usize,
    pub trace_dir: PathBuf,
    pub timeout: Duration,
}

/// Runs a program to completion.
pub trait Launcher {
    fn launch(&self, request: &LaunchRequest) -> anyhow::Result<()>;
}

/// Launches through `sh -c`, polling for exit until the request's timeout.
#[derive(Debug, Clone)]
pub struct CommandLauncher {
    poll_interval: Duration,
}

impl CommandLauncher {
    pub fn new() -> Self {
        CommandLauncher {
            poll_interval: Duration::from_millis(50),
        }
    }
}

impl Default for CommandLauncher {
    fn default() -> Self {
        Self::new()
    }
}

impl Launcher for CommandLauncher {
    fn launch(&self, request: &LaunchRequest) -> anyhow::Result<()> {
        let mut child = Command::new("sh")
            .arg("-c")
            .arg(&request.command)
            .env(ENV_TRACE_DIR, &request.trace_dir)
            .env(ENV_NPROCS, request.nprocs.to_string())
            .env(ENV_BINARY, &request.binary)
            .stdin(Stdio::null())
            .spawn()
            .with_context(|| format!("Failed to spawn '{}'", request.command))?;
        debug!("Spawned pid {} for '{}'", child.id(), request.command);

        let start = Instant::now();
        loop {
            if let Some(status) = child.try_wait().context("Failed to wait for child")? {
                if !status.success() {
                    bail!("'{}' exited with {}", request.command, status);
                }
                return Ok(());
            }
            if start.elapsed() >= request.timeout {
                // The child may exit between the check and the kill.
                let _ = child.kill();
                let _ = child.wait();
                bail!(
                    "'{}' timed out after {:?} and was killed",
                    request.command,
                    request.timeout
                );
            }
            thread::sleep(self.poll_interval);
        }
    }
}

/// Check the binary and run the request, wrapping any failure as a launch error.
pub(crate) fn run_launcher(launcher: &dyn Launcher, request: &LaunchRequest) -> Result<()> {
    let wrap = |source: anyhow::Error| Error::Launch {
        binary: request.binary.clone(),
        source,
    };
    if !Path::new(&request.binary).is_file() {
        return Err(wrap(anyhow::anyhow!("binary does not exist")));
    }
    info!(
        "Launching {} with {} process(es)",
        request.binary.display(),
        request.nprocs
    );
    let start = Instant::now();
    launcher.launch(request).map_err(wrap)?;
    info!("Target finished in {:.2?}", start.elapsed());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn request(dir: &TempDir, command: &str, timeout: Duration) -> LaunchRequest {
        let binary = dir.path().join("app");
        std::fs::write(&binary, b"").unwrap();
        LaunchRequest {
            binary,
            command: command.to_string(),
            nprocs: 4,
            trace_dir: dir.path().join("trace"),
            timeout,
        }
    }

    #[test]
    fn test_successful_command_sees_environment() {
        let dir = TempDir::new().unwrap();
        let req = request(
            &dir,
            "test \"$PERFLOW_NPROCS\" = 4 && test -n \"$PERFLOW_TRACE_DIR\"",
            Duration::from_secs(10),
        );
        run_launcher(&CommandLauncher::new(), &req).unwrap();
    }

    #[test]
    fn test_nonzero_exit_is_launch_error() {
        let dir = TempDir::new().unwrap();
        let req = request(&dir, "exit 3", Duration::from_secs(10));
        match run_launcher(&CommandLauncher::new(), &req) {
            Err(Error::Launch { source, .. }) => assert!(source.to_string().contains("exit")),
            other => panic!("expected Launch, got {other:?}"),
        }
    }

    #[test]
    fn test_timeout_kills_child() {
        let dir = TempDir::new().unwrap();
        let req = request(&dir, "sleep 5", Duration::from_millis(100));
        let start = Instant::now();
        let err = run_launcher(&CommandLauncher::new(), &req).unwrap_err();
        assert!(err.to_string().contains("timed out"));
        assert!(start.elapsed() < Duration::from_secs(4));
    }

    #[test]
    fn test_missing_binary() {
        let dir = TempDir::new().unwrap();
        let mut req = request(&dir, "true", Duration::from_secs(1));
        req.binary = dir.path().join("missing");
        let err = run_launcher(&CommandLauncher::new(), &req).unwrap_err();
        assert!(matches!(err, Error::Launch { .. }));
        assert!(err.to_string().contains("does not exist"));
    }
}
