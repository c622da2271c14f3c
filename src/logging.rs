//! Logging sink for worker output and tracing setup for host programs.
//!
//! Everything this crate logs about itself goes through `tracing`. Lines the
//! worker prints are handed to a [`LogSink`], which by default re-emits them
//! as `tracing` events on the [`WORKER_TARGET`] target.

use std::fmt::Debug;

use tracing::Level;
use tracing_subscriber::{fmt, EnvFilter};

use crate::{AppError, Result};

/// `tracing` target used for lines printed by the worker.
pub const WORKER_TARGET: &str = "rworker::worker";

/// Receiver for the worker's classified output lines.
pub trait LogSink: Send + Sync + Debug {
    /// Record one line at `level`.
    fn log(&self, level: Level, message: &str);
}

/// Default sink: forwards worker lines to `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl LogSink for TracingSink {
    fn log(&self, level: Level, message: &str) {
        match level {
            Level::ERROR => tracing::error!(target: WORKER_TARGET, "{message}"),
            Level::WARN => tracing::warn!(target: WORKER_TARGET, "{message}"),
            Level::INFO => tracing::info!(target: WORKER_TARGET, "{message}"),
            Level::DEBUG => tracing::debug!(target: WORKER_TARGET, "{message}"),
            Level::TRACE => tracing::trace!(target: WORKER_TARGET, "{message}"),
        }
    }
}

/// Output format for [`init_tracing`].
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum LogFormat {
    /// Human-readable lines.
    Text,
    /// One JSON object per event.
    Json,
}

/// Install a global `tracing` subscriber filtered by `RUST_LOG` (default `info`).
///
/// Library users with their own subscriber should not call this.
///
/// # Errors
///
/// Returns `AppError::Config` if a global subscriber is already installed.
pub fn init_tracing(log_format: LogFormat) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = fmt().with_env_filter(env_filter);

    match log_format {
        LogFormat::Text => subscriber
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
        LogFormat::Json => subscriber
            .json()
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
    }

    Ok(())
}
