//! Launch sequence and lifetime of one running worker.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::locate::{check_libraries, locate_executable};
use super::port::select_port;
use super::spawner::{describe_exit, spawn_worker, LaunchCommand, WorkerProcess};
use crate::config::WorkerConfig;
use crate::forwarder::{
    spawn_forwarder, ForwarderContext, Readiness, SignalPatterns, StreamKind, WorkerSignals,
};
use crate::logging::LogSink;
use crate::{AppError, Result};

/// Inputs of [`launch`] that outlive a single worker.
#[derive(Debug, Clone)]
pub struct LaunchContext {
    /// Session identifier for log fields.
    pub session_id: String,
    /// Shared secret handed to the worker.
    pub token: String,
    /// Compiled stream patterns.
    pub patterns: Arc<SignalPatterns>,
    /// Destination for forwarded output.
    pub sink: Arc<dyn LogSink>,
}

/// A started worker with its forwarders.
#[derive(Debug)]
pub struct RunningWorker {
    session_id: String,
    process: WorkerProcess,
    port: u16,
    signals: WorkerSignals,
    cancel: CancellationToken,
    forwarders: Vec<JoinHandle<()>>,
}

/// Locate, spawn and wait for a worker to report readiness.
///
/// Steps: find the executable, check required libraries, pick the port,
/// spawn, attach the stdout/stderr forwarders, then wait for the readiness
/// line. The wait restarts while the worker reports it is installing
/// packages. If startup fails after the spawn the process is killed before
/// the error is returned.
///
/// # Errors
///
/// - `AppError::NotInstalled`: executable or required library missing.
/// - `AppError::Io`: no port could be reserved.
/// - `AppError::Spawn`: the process could not be started.
/// - `AppError::StartupTimeout`: no readiness line in time.
/// - `AppError::ProcessExited`: the worker closed its output before readiness.
pub async fn launch(config: &WorkerConfig, ctx: &LaunchContext) -> Result<RunningWorker> {
    let session_id = ctx.session_id.as_str();

    let executable = locate_executable(&config.executable)?;
    check_libraries(&config.required_libraries)?;
    let port = select_port(config.port)?;
    debug!(session_id, port, "using loopback port");

    let command = LaunchCommand::new(executable, config, port, &ctx.token);
    let spawned = spawn_worker(&command, session_id)?;

    let signals = WorkerSignals::new(2);
    let cancel = CancellationToken::new();
    let forwarder_ctx = ForwarderContext {
        session_id: ctx.session_id.clone(),
        patterns: Arc::clone(&ctx.patterns),
        signals: signals.clone(),
        sink: Arc::clone(&ctx.sink),
        cancel: cancel.clone(),
    };
    let forwarders = vec![
        spawn_forwarder(forwarder_ctx.clone(), StreamKind::Stdout, spawned.stdout),
        spawn_forwarder(forwarder_ctx, StreamKind::Stderr, spawned.stderr),
    ];

    let mut worker = RunningWorker {
        session_id: ctx.session_id.clone(),
        process: spawned.process,
        port,
        signals,
        cancel,
        forwarders,
    };

    if let Err(err) = worker
        .wait_until_ready(config.startup_timeout(), config.ready_settle())
        .await
    {
        worker.abort().await;
        return Err(err);
    }

    info!(session_id, port, pid = worker.pid(), "worker ready");
    Ok(worker)
}

impl RunningWorker {
    /// Loopback port the worker listens on.
    #[must_use]
    pub fn port(&self) -> u16 {
        self.port
    }

    /// OS process id.
    #[must_use]
    pub fn pid(&self) -> Option<u32> {
        self.process.pid()
    }

    /// Startup flags shared with the forwarders.
    #[must_use]
    pub fn signals(&self) -> &WorkerSignals {
        &self.signals
    }

    /// `Some(description)` if the process has exited.
    pub fn exit_status(&mut self) -> Option<String> {
        self.process.poll_exit().map(describe_exit)
    }

    async fn wait_until_ready(&mut self, startup: Duration, settle: Duration) -> Result<()> {
        let session_id = self.session_id.as_str();
        loop {
            match tokio::time::timeout(startup, self.signals.wait_ready()).await {
                Ok(Readiness::Ready) => break,
                Ok(Readiness::StreamsClosed) => {
                    let status = tokio::time::timeout(startup, self.process.reap())
                        .await
                        .unwrap_or_else(|_| "process still running".to_owned());
                    return Err(AppError::ProcessExited(format!(
                        "worker closed its output before reporting readiness ({status}); \
                         check the preceding log messages"
                    )));
                }
                Err(_elapsed) if self.signals.is_installing() => {
                    info!(session_id, "worker is installing packages; extending startup wait");
                }
                Err(_elapsed) => {
                    return Err(AppError::StartupTimeout(format!(
                        "{:.1} seconds elapsed without the worker reporting readiness; check the \
                         preceding log messages, or increase startup_timeout_seconds",
                        startup.as_secs_f64()
                    )));
                }
            }
        }

        debug!(session_id, "worker reported readiness");
        if !settle.is_zero() {
            tokio::time::sleep(settle).await;
        }
        Ok(())
    }

    /// Wait up to `timeout` for a voluntary exit, kill otherwise, then stop
    /// the forwarders. Never fails.
    pub async fn terminate(mut self, timeout: Duration) {
        if !self.process.wait_for_exit(timeout).await {
            self.process.kill().await;
        }
        self.stop_forwarders().await;
    }

    /// Kill immediately and stop the forwarders.
    pub async fn abort(&mut self) {
        if self.process.poll_exit().is_none() {
            self.process.kill().await;
        }
        self.stop_forwarders().await;
    }

    async fn stop_forwarders(&mut self) {
        self.cancel.cancel();
        for handle in self.forwarders.drain(..) {
            if let Err(err) = handle.await {
                debug!(
                    session_id = self.session_id.as_str(),
                    %err,
                    "forwarder task ended abnormally"
                );
            }
        }
    }
}

impl Drop for RunningWorker {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
