//! Async session: lazy start, liveness checks and serialized RPC.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{watch, Mutex};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::state::{SessionState, Status};
use crate::config::WorkerConfig;
use crate::forwarder::SignalPatterns;
use crate::logging::{LogSink, TracingSink};
use crate::models::Value;
use crate::rpc::{normalize_name, RpcClient};
use crate::supervisor::{self, LaunchContext, RunningWorker};
use crate::{AppError, Result};

#[derive(Debug, Default)]
struct Inner {
    worker: Option<RunningWorker>,
    client: Option<RpcClient>,
}

/// One supervised worker, usable from async code.
///
/// All operations are serialized by an internal mutex: at most one request
/// is in flight and start/stop never overlap with a request. The first
/// operation starts the worker if needed. A worker that dies is reported as
/// [`AppError::ProcessExited`] until [`AsyncSession::stop`] is called; it is
/// never restarted behind the caller's back.
#[derive(Debug)]
pub struct AsyncSession {
    session_id: String,
    config: WorkerConfig,
    patterns: Arc<SignalPatterns>,
    sink: Arc<dyn LogSink>,
    status: watch::Sender<Status>,
    inner: Mutex<Inner>,
}

impl AsyncSession {
    /// New idle session that forwards worker output to `tracing`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if `config` fails validation.
    pub fn new(config: WorkerConfig) -> Result<Self> {
        Self::with_sink(config, Arc::new(TracingSink))
    }

    /// New idle session that forwards worker output to `sink`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if `config` fails validation.
    pub fn with_sink(config: WorkerConfig, sink: Arc<dyn LogSink>) -> Result<Self> {
        config.validate()?;
        let patterns = Arc::new(SignalPatterns::from_config(&config.signals)?);
        let (status, _) = watch::channel(Status {
            token: supervisor::generate_token(),
            ..Status::default()
        });

        let session_id = Uuid::new_v4().to_string();
        debug!(session_id = session_id.as_str(), "session created");

        Ok(Self {
            session_id,
            config,
            patterns,
            sink,
            status,
            inner: Mutex::new(Inner::default()),
        })
    }

    /// Identifier used in this session's log fields.
    #[must_use]
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Configuration the session was built with.
    #[must_use]
    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> SessionState {
        self.status.borrow().state
    }

    /// Port of the running worker.
    #[must_use]
    pub fn port(&self) -> Option<u16> {
        self.status.borrow().port
    }

    /// Process id of the running worker.
    #[must_use]
    pub fn pid(&self) -> Option<u32> {
        self.status.borrow().pid
    }

    /// Secret sent with every request.
    #[must_use]
    pub fn auth_token(&self) -> String {
        self.status.borrow().token.clone()
    }

    /// Replace the secret used for subsequent requests.
    ///
    /// The worker keeps the token it was started with, so changing it on a
    /// running session makes later requests fail with
    /// [`AppError::Unauthorized`]. A restart hands the new token to the worker.
    pub async fn set_auth_token(&self, token: impl Into<String>) {
        let token = token.into();
        let mut inner = self.inner.lock().await;
        if let Some(client) = inner.client.as_mut() {
            *client = client.with_token(&token);
        }
        self.status.send_modify(|status| status.token = token);
    }

    /// Start the worker if it is not running. A no-op when it is.
    ///
    /// # Errors
    ///
    /// Any launch error (see [`supervisor::launch`]). The session is idle
    /// again afterwards.
    pub async fn start(&self) -> Result<()> {
        let mut inner = self.inner.lock().await;
        self.ensure_started(&mut inner).await
    }

    /// Stop the worker, waiting up to the configured stop timeout.
    pub async fn stop(&self) {
        self.stop_with_timeout(self.config.stop_timeout()).await;
    }

    /// Stop the worker, waiting up to `timeout` for it to exit before it is
    /// killed. Idempotent and infallible.
    pub async fn stop_with_timeout(&self, timeout: Duration) {
        let mut inner = self.inner.lock().await;
        let client = inner.client.take();
        let Some(worker) = inner.worker.take() else {
            return;
        };
        let session_id = self.session_id.as_str();
        info!(session_id, pid = worker.pid(), "stopping worker");

        if let Some(client) = client {
            if let Err(err) = client.shutdown(timeout).await {
                debug!(
                    session_id,
                    %err,
                    "shutdown request failed (expected while the worker exits)"
                );
            }
        }
        worker.terminate(timeout).await;

        self.publish(SessionState::Idle, None, None);
        debug!(session_id, "worker stopped");
    }

    /// Value of variable `name`.
    ///
    /// # Errors
    ///
    /// `AppError::InvalidKey` for a blank name, launch and liveness errors,
    /// or any RPC error.
    pub async fn get(&self, name: &str) -> Result<Value> {
        normalize_name(name)?;
        let mut inner = self.inner.lock().await;
        let client = self.ready_client(&mut inner).await?;
        client.get(name).await
    }

    /// Assign `value` to variable `name`.
    ///
    /// # Errors
    ///
    /// As [`AsyncSession::get`], plus `AppError::Codec` for unencodable values.
    pub async fn set(&self, name: &str, value: impl Into<Value>) -> Result<()> {
        normalize_name(name)?;
        let value = value.into();
        let mut inner = self.inner.lock().await;
        let client = self.ready_client(&mut inner).await?;
        client.set(name, &value).await
    }

    /// Remove variable `name`.
    ///
    /// # Errors
    ///
    /// As [`AsyncSession::get`].
    pub async fn delete(&self, name: &str) -> Result<()> {
        normalize_name(name)?;
        let mut inner = self.inner.lock().await;
        let client = self.ready_client(&mut inner).await?;
        client.delete(name).await
    }

    /// Names of all variables in the worker.
    ///
    /// # Errors
    ///
    /// Launch and liveness errors, or any RPC error.
    pub async fn keys(&self) -> Result<Vec<String>> {
        let mut inner = self.inner.lock().await;
        let client = self.ready_client(&mut inner).await?;
        client.list().await
    }

    /// Number of variables in the worker.
    ///
    /// # Errors
    ///
    /// As [`AsyncSession::keys`].
    pub async fn len(&self) -> Result<usize> {
        Ok(self.keys().await?.len())
    }

    /// Whether the worker holds no variables.
    ///
    /// # Errors
    ///
    /// As [`AsyncSession::keys`].
    pub async fn is_empty(&self) -> Result<bool> {
        Ok(self.keys().await?.is_empty())
    }

    /// Whether variable `name` exists.
    ///
    /// # Errors
    ///
    /// As [`AsyncSession::keys`], plus `AppError::InvalidKey`.
    pub async fn contains_key(&self, name: &str) -> Result<bool> {
        let name = normalize_name(name)?;
        Ok(self.keys().await?.iter().any(|key| key == name))
    }

    /// Evaluate `expr` with the configured eval timeout.
    ///
    /// # Errors
    ///
    /// `AppError::Worker` if evaluation raised, launch and liveness errors,
    /// or any RPC error.
    pub async fn eval(&self, expr: &str) -> Result<Value> {
        self.eval_with_timeout(expr, self.config.eval_timeout()).await
    }

    /// Evaluate `expr`, waiting at most `timeout`; `None` waits forever.
    ///
    /// # Errors
    ///
    /// As [`AsyncSession::eval`].
    pub async fn eval_with_timeout(&self, expr: &str, timeout: Option<Duration>) -> Result<Value> {
        let mut inner = self.inner.lock().await;
        let client = self.ready_client(&mut inner).await?;
        client.eval(expr, timeout).await
    }

    /// Start if needed, check liveness and hand out the RPC client.
    async fn ready_client<'a>(&self, inner: &'a mut Inner) -> Result<&'a RpcClient> {
        self.ensure_started(inner).await?;
        self.check_alive(inner)?;
        inner
            .client
            .as_ref()
            .ok_or_else(|| AppError::ProcessExited("worker is not running".into()))
    }

    async fn ensure_started(&self, inner: &mut Inner) -> Result<()> {
        if inner.worker.is_some() {
            return Ok(());
        }

        let session_id = self.session_id.as_str();
        info!(session_id, "starting worker");
        let token = self.auth_token();
        self.publish(SessionState::Starting, None, None);

        let ctx = LaunchContext {
            session_id: self.session_id.clone(),
            token: token.clone(),
            patterns: Arc::clone(&self.patterns),
            sink: Arc::clone(&self.sink),
        };

        let mut worker = match supervisor::launch(&self.config, &ctx).await {
            Ok(worker) => worker,
            Err(err) => {
                warn!(session_id, %err, "worker failed to start");
                self.publish(SessionState::Idle, None, None);
                return Err(err);
            }
        };

        let client = match RpcClient::new(worker.port(), &token, &self.config, session_id) {
            Ok(client) => client,
            Err(err) => {
                worker.abort().await;
                self.publish(SessionState::Idle, None, None);
                return Err(err);
            }
        };

        self.publish(SessionState::Ready, Some(worker.port()), worker.pid());
        inner.worker = Some(worker);
        inner.client = Some(client);
        Ok(())
    }

    fn check_alive(&self, inner: &mut Inner) -> Result<()> {
        let Some(worker) = inner.worker.as_mut() else {
            return Err(AppError::ProcessExited("worker is not running".into()));
        };
        if let Some(exit) = worker.exit_status() {
            warn!(
                session_id = self.session_id.as_str(),
                pid = worker.pid(),
                exit = exit.as_str(),
                "worker exited unexpectedly"
            );
            let (port, pid) = (Some(worker.port()), worker.pid());
            self.publish(SessionState::Exited, port, pid);
            return Err(AppError::ProcessExited(format!(
                "worker exited unexpectedly ({exit}); call stop and try again"
            )));
        }
        Ok(())
    }

    fn publish(&self, state: SessionState, port: Option<u16>, pid: Option<u32>) {
        self.status.send_modify(|status| {
            status.state = state;
            status.port = port;
            status.pid = pid;
        });
    }
}
