//! Startup state shared between the stream forwarders and the supervisor.

use std::sync::Arc;

use tokio::sync::watch;

/// Snapshot of what the forwarders have observed so far.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct SignalState {
    ready: bool,
    installing: bool,
    open_streams: usize,
}

/// Result of [`WorkerSignals::wait_ready`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Readiness {
    /// The readiness line was seen.
    Ready,
    /// Every forwarded stream closed before readiness.
    StreamsClosed,
}

/// Cloneable handle onto the readiness and installing flags of one worker.
#[derive(Debug, Clone)]
pub struct WorkerSignals {
    state: Arc<watch::Sender<SignalState>>,
}

impl WorkerSignals {
    /// New signal set expecting `streams` forwarders to report closure.
    #[must_use]
    pub fn new(streams: usize) -> Self {
        let (tx, _rx) = watch::channel(SignalState {
            ready: false,
            installing: false,
            open_streams: streams,
        });
        Self { state: Arc::new(tx) }
    }

    /// Record the readiness line. Clears the installing flag.
    pub fn mark_ready(&self) {
        self.state.send_modify(|state| {
            state.ready = true;
            state.installing = false;
        });
    }

    /// Record that the worker started (or finished) installing packages.
    pub fn set_installing(&self, installing: bool) {
        self.state.send_if_modified(|state| {
            let changed = state.installing != installing;
            state.installing = installing;
            changed
        });
    }

    /// Record the end of one forwarded stream. Clears the installing flag.
    pub fn stream_closed(&self) {
        self.state.send_modify(|state| {
            state.installing = false;
            state.open_streams = state.open_streams.saturating_sub(1);
        });
    }

    /// Whether the readiness line has been seen.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.state.borrow().ready
    }

    /// Whether the worker is currently installing packages.
    #[must_use]
    pub fn is_installing(&self) -> bool {
        self.state.borrow().installing
    }

    /// Whether every forwarded stream has closed.
    #[must_use]
    pub fn all_streams_closed(&self) -> bool {
        self.state.borrow().open_streams == 0
    }

    /// Wait until readiness or until all streams close, whichever is first.
    ///
    /// Readiness wins if both are already true.
    pub async fn wait_ready(&self) -> Readiness {
        let mut rx = self.state.subscribe();
        let readiness = match rx
            .wait_for(|state| state.ready || state.open_streams == 0)
            .await
        {
            Ok(state) if state.ready => Readiness::Ready,
            _ => Readiness::StreamsClosed,
        };
        readiness
    }
}
