//! Worker process spawner.
//!
//! Spawns the interpreter with:
//! - stdin attached to the null device, stdout and stderr piped for the
//!   forwarders;
//! - `kill_on_drop(true)` so a dropped handle never leaks the process;
//! - the platform hooks from [`super::lifetime`] so the worker dies with us.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use tokio::process::{Child, ChildStderr, ChildStdout, Command};
use tracing::{debug, error, info, warn};

use super::lifetime::ParentLink;
use crate::config::WorkerConfig;
use crate::{AppError, Result};

/// Placeholder passed when no library directory is configured.
pub const NO_LIB_DIR: &str = "None";

// ── Command line ─────────────────────────────────────────────────────────────

/// Build the worker's argument vector.
///
/// Layout: `[flags..., launcher, port, handler, lib_dir, repository,
/// update_flag, token]`, where `lib_dir` is [`NO_LIB_DIR`] when unset and
/// `update_flag` is `True` or `False`.
#[must_use]
pub fn build_args(config: &WorkerConfig, port: u16, token: &str) -> Vec<OsString> {
    let mut args: Vec<OsString> = config.interpreter_flags.iter().map(OsString::from).collect();
    args.push(config.launcher_script.clone().into_os_string());
    args.push(port.to_string().into());
    args.push(config.handler_script.clone().into_os_string());
    args.push(
        config
            .lib_dir
            .clone()
            .map_or_else(|| OsString::from(NO_LIB_DIR), PathBuf::into_os_string),
    );
    args.push(config.repository.clone().into());
    args.push(OsString::from(if config.update_packages {
        "True"
    } else {
        "False"
    }));
    args.push(token.into());
    args
}

/// Program plus arguments, with the secret kept out of log output.
#[derive(Clone)]
pub struct LaunchCommand {
    program: PathBuf,
    args: Vec<OsString>,
    secret: String,
}

impl std::fmt::Debug for LaunchCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LaunchCommand")
            .field("command_line", &self.display())
            .finish()
    }
}

impl LaunchCommand {
    /// Command line for `program` serving on `port` with `token`.
    #[must_use]
    pub fn new(program: PathBuf, config: &WorkerConfig, port: u16, token: &str) -> Self {
        Self {
            program,
            args: build_args(config, port, token),
            secret: token.to_owned(),
        }
    }

    /// Executable path.
    #[must_use]
    pub fn program(&self) -> &Path {
        &self.program
    }

    /// Arguments after the program.
    #[must_use]
    pub fn args(&self) -> &[OsString] {
        &self.args
    }

    /// Shell-like rendering for logs, with the token replaced by `<token>`.
    #[must_use]
    pub fn display(&self) -> String {
        std::iter::once(self.program.as_os_str())
            .chain(self.args.iter().map(OsString::as_os_str))
            .map(|arg| {
                let text = arg.to_string_lossy();
                if !self.secret.is_empty() && text == self.secret.as_str() {
                    "<token>".to_owned()
                } else if text.is_empty() || text.contains(char::is_whitespace) {
                    format!("\"{text}\"")
                } else {
                    text.into_owned()
                }
            })
            .collect::<Vec<_>>()
            .join(" ")
    }
}

// ── Process handle ───────────────────────────────────────────────────────────

/// Handle to a spawned worker process.
#[derive(Debug)]
pub struct WorkerProcess {
    child: Child,
    pid: Option<u32>,
    // Held for its Drop; releases the Windows job object.
    _link: ParentLink,
}

/// A freshly spawned worker together with its output pipes.
#[derive(Debug)]
pub struct SpawnedWorker {
    /// Process handle.
    pub process: WorkerProcess,
    /// Worker stdout.
    pub stdout: ChildStdout,
    /// Worker stderr.
    pub stderr: ChildStderr,
}

/// Start the worker described by `launch`.
///
/// Must be called from within a tokio runtime.
///
/// # Errors
///
/// Returns `AppError::Spawn` if the OS refuses to start the process or its
/// pipes cannot be captured. The command line is logged at error level.
pub fn spawn_worker(launch: &LaunchCommand, session_id: &str) -> Result<SpawnedWorker> {
    let command_line = launch.display();
    let mut cmd = Command::new(launch.program());
    cmd.args(launch.args())
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let link = ParentLink::prepare(&mut cmd)?;

    debug!(session_id, command = command_line.as_str(), "starting worker");

    let mut child = cmd.spawn().map_err(|err| {
        error!(session_id, command = command_line.as_str(), %err, "failed to start worker process");
        AppError::Spawn(format!(
            "failed to start {}: {err}",
            launch.program().display()
        ))
    })?;

    let pid = child.id();
    if let Err(err) = link.attach(&child) {
        let _ = child.start_kill();
        return Err(err);
    }

    let (Some(stdout), Some(stderr)) = (child.stdout.take(), child.stderr.take()) else {
        let _ = child.start_kill();
        return Err(AppError::Spawn("failed to capture worker output pipes".into()));
    };

    info!(session_id, pid, "worker process started");

    Ok(SpawnedWorker {
        process: WorkerProcess {
            child,
            pid,
            _link: link,
        },
        stdout,
        stderr,
    })
}

impl WorkerProcess {
    /// OS process id, if it was known at spawn time.
    #[must_use]
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Non-blocking exit check.
    ///
    /// A failed status query is logged and treated as "still running".
    pub fn poll_exit(&mut self) -> Option<ExitStatus> {
        match self.child.try_wait() {
            Ok(status) => status,
            Err(err) => {
                warn!(pid = self.pid, %err, "failed to poll worker status; assuming it is running");
                None
            }
        }
    }

    /// Wait up to `timeout` for a voluntary exit. Returns whether it exited.
    pub async fn wait_for_exit(&mut self, timeout: Duration) -> bool {
        match tokio::time::timeout(timeout, self.child.wait()).await {
            Ok(Ok(status)) => {
                debug!(pid = self.pid, status = %describe_exit(status), "worker exited");
                true
            }
            Ok(Err(err)) => {
                warn!(pid = self.pid, %err, "failed to wait for worker to exit");
                false
            }
            Err(_elapsed) => {
                warn!(pid = self.pid, ?timeout, "worker did not exit in time");
                false
            }
        }
    }

    /// Force-kill and reap the process. Errors are logged, not returned.
    pub async fn kill(&mut self) {
        match self.child.kill().await {
            Ok(()) => warn!(pid = self.pid, "killed worker process"),
            Err(err) => warn!(pid = self.pid, %err, "failed to kill worker process"),
        }
    }

    /// Reap an exiting process and describe how it ended.
    pub async fn reap(&mut self) -> String {
        match self.child.wait().await {
            Ok(status) => describe_exit(status),
            Err(err) => format!("exit status unavailable: {err}"),
        }
    }
}

/// Human-readable exit status: `exit code N` or `terminated by signal`.
#[must_use]
pub fn describe_exit(status: ExitStatus) -> String {
    status.code().map_or_else(
        || "terminated by signal".to_owned(),
        |code| format!("exit code {code}"),
    )
}
