//! Blocking facade over [`AsyncSession`].

use std::sync::Arc;
use std::time::Duration;

use tokio::runtime::{Builder, Handle, Runtime};
use tracing::warn;

use super::async_session::AsyncSession;
use super::state::SessionState;
use crate::config::WorkerConfig;
use crate::logging::LogSink;
use crate::models::Value;
use crate::{AppError, Result};

/// Synchronous handle to one supervised worker.
///
/// Owns a private two-thread tokio runtime that drives the forwarders and
/// every request; calls block the calling thread. Do not use it from inside
/// an async runtime: use [`AsyncSession`] there.
///
/// Dropping the session stops the worker, waiting at most the configured stop
/// timeout. On Linux the worker receives `SIGKILL` if the thread that started
/// it exits first.
///
/// ```no_run
/// use rworker::{Session, Value, WorkerConfig};
///
/// let session = Session::new(WorkerConfig::default())?;
/// session.set("x", 42)?;
/// assert_eq!(session.eval("x + 1")?, Value::Int(43));
/// session.stop();
/// # Ok::<(), rworker::AppError>(())
/// ```
#[derive(Debug)]
pub struct Session {
    inner: AsyncSession,
    handle: Handle,
    // Only taken in `Drop`.
    runtime: Option<Runtime>,
}

impl Session {
    /// New idle session that forwards worker output to `tracing`.
    ///
    /// # Errors
    ///
    /// `AppError::Config` for invalid configuration, `AppError::Io` if the
    /// runtime cannot be created.
    pub fn new(config: WorkerConfig) -> Result<Self> {
        Self::from_async(AsyncSession::new(config)?)
    }

    /// New idle session that forwards worker output to `sink`.
    ///
    /// # Errors
    ///
    /// As [`Session::new`].
    pub fn with_sink(config: WorkerConfig, sink: Arc<dyn LogSink>) -> Result<Self> {
        Self::from_async(AsyncSession::with_sink(config, sink)?)
    }

    fn from_async(inner: AsyncSession) -> Result<Self> {
        let runtime = Builder::new_multi_thread()
            .worker_threads(2)
            .thread_name("rworker-session")
            .enable_all()
            .build()
            .map_err(|err| AppError::Io(format!("failed to build session runtime: {err}")))?;
        Ok(Self {
            inner,
            handle: runtime.handle().clone(),
            runtime: Some(runtime),
        })
    }

    /// Start the worker now instead of on first use.
    ///
    /// # Errors
    ///
    /// See [`AsyncSession::start`].
    pub fn start(&self) -> Result<()> {
        self.handle.block_on(self.inner.start())
    }

    /// Stop the worker with the configured timeout. Idempotent.
    pub fn stop(&self) {
        self.handle.block_on(self.inner.stop());
    }

    /// Stop the worker, killing it after `timeout`. Idempotent.
    pub fn stop_with_timeout(&self, timeout: Duration) {
        self.handle.block_on(self.inner.stop_with_timeout(timeout));
    }

    /// Value of variable `name`.
    ///
    /// # Errors
    ///
    /// See [`AsyncSession::get`].
    pub fn get(&self, name: &str) -> Result<Value> {
        self.handle.block_on(self.inner.get(name))
    }

    /// Assign `value` to variable `name`.
    ///
    /// # Errors
    ///
    /// See [`AsyncSession::set`].
    pub fn set(&self, name: &str, value: impl Into<Value>) -> Result<()> {
        self.handle.block_on(self.inner.set(name, value))
    }

    /// Remove variable `name`.
    ///
    /// # Errors
    ///
    /// See [`AsyncSession::delete`].
    pub fn delete(&self, name: &str) -> Result<()> {
        self.handle.block_on(self.inner.delete(name))
    }

    /// Names of all variables.
    ///
    /// # Errors
    ///
    /// See [`AsyncSession::keys`].
    pub fn keys(&self) -> Result<Vec<String>> {
        self.handle.block_on(self.inner.keys())
    }

    /// Number of variables.
    ///
    /// # Errors
    ///
    /// See [`AsyncSession::keys`].
    pub fn len(&self) -> Result<usize> {
        self.handle.block_on(self.inner.len())
    }

    /// Whether no variables are defined.
    ///
    /// # Errors
    ///
    /// See [`AsyncSession::keys`].
    pub fn is_empty(&self) -> Result<bool> {
        self.handle.block_on(self.inner.is_empty())
    }

    /// Whether variable `name` is defined.
    ///
    /// # Errors
    ///
    /// See [`AsyncSession::contains_key`].
    pub fn contains_key(&self, name: &str) -> Result<bool> {
        self.handle.block_on(self.inner.contains_key(name))
    }

    /// Evaluate `expr` with the configured eval timeout.
    ///
    /// # Errors
    ///
    /// See [`AsyncSession::eval`].
    pub fn eval(&self, expr: &str) -> Result<Value> {
        self.handle.block_on(self.inner.eval(expr))
    }

    /// Evaluate `expr`; `None` blocks until the worker answers.
    ///
    /// # Errors
    ///
    /// See [`AsyncSession::eval_with_timeout`].
    pub fn eval_with_timeout(&self, expr: &str, timeout: Option<Duration>) -> Result<Value> {
        self.handle.block_on(self.inner.eval_with_timeout(expr, timeout))
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> SessionState {
        self.inner.state()
    }

    /// Secret sent with every request.
    #[must_use]
    pub fn auth_token(&self) -> String {
        self.inner.auth_token()
    }

    /// Replace the secret; see [`AsyncSession::set_auth_token`].
    pub fn set_auth_token(&self, token: impl Into<String>) {
        self.handle.block_on(self.inner.set_auth_token(token));
    }

    /// Port of the running worker.
    #[must_use]
    pub fn port(&self) -> Option<u16> {
        self.inner.port()
    }

    /// Process id of the running worker.
    #[must_use]
    pub fn pid(&self) -> Option<u32> {
        self.inner.pid()
    }

    /// Identifier used in log fields.
    #[must_use]
    pub fn session_id(&self) -> &str {
        self.inner.session_id()
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        let in_runtime = Handle::try_current().is_ok();
        if self.inner.state().has_worker() {
            if in_runtime {
                warn!(
                    session_id = self.inner.session_id(),
                    "session dropped inside an async runtime; killing the worker without a graceful stop"
                );
            } else {
                self.handle.block_on(self.inner.stop());
            }
        }
        // A runtime cannot be dropped from async context.
        if let Some(runtime) = self.runtime.take() {
            if in_runtime {
                runtime.shutdown_background();
            }
        }
    }
}
