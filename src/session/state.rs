//! Observable session state.

use serde::{Deserialize, Serialize};

/// Lifecycle state of a session's worker.
///
/// `Idle → Starting → Ready → Idle` through start and stop. `Exited` is
/// entered when an operation finds the worker dead; only `stop` leaves it.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// No worker process.
    #[default]
    Idle,
    /// Worker spawned, waiting for readiness.
    Starting,
    /// Worker accepting requests.
    Ready,
    /// Worker died on its own; call stop before starting again.
    Exited,
}

impl SessionState {
    /// Whether a worker process is (or was, for `Exited`) attached.
    #[must_use]
    pub fn has_worker(self) -> bool {
        !matches!(self, Self::Idle)
    }
}

/// Snapshot published on every state change.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct Status {
    pub(crate) state: SessionState,
    pub(crate) port: Option<u16>,
    pub(crate) pid: Option<u32>,
    pub(crate) token: String,
}
