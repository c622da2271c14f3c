//! Error types shared across the crate.

use std::fmt::{Display, Formatter};

/// Shared crate result type.
pub type Result<T> = std::result::Result<T, AppError>;

/// Error enumeration covering every failure mode of a worker session.
#[derive(Debug, Clone, PartialEq)]
pub enum AppError {
    /// Configuration parsing or validation failure.
    Config(String),
    /// The worker executable or a shared library it needs is missing.
    NotInstalled(String),
    /// The operating system refused to start the worker process.
    Spawn(String),
    /// The worker did not report readiness within the startup timeout.
    StartupTimeout(String),
    /// The worker rejected the shared secret (HTTP 401).
    Unauthorized(String),
    /// The worker evaluated the request and raised an error (HTTP 500).
    Worker {
        /// Message reported by the interpreter.
        message: String,
        /// Call stack captured by the worker, outermost frame first.
        call_stack: Vec<String>,
    },
    /// Network failure or an unexpected HTTP status.
    Transport(String),
    /// The worker answered with a body this client cannot interpret.
    Protocol(String),
    /// The worker process is no longer running.
    ProcessExited(String),
    /// A value could not be encoded or decoded.
    Codec(String),
    /// A variable name was empty or blank.
    InvalidKey(String),
    /// File-system or pipe I/O failure.
    Io(String),
}

impl AppError {
    /// Whether the session cannot continue without an explicit stop/restart.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::NotInstalled(_) | Self::StartupTimeout(_) | Self::ProcessExited(_)
        )
    }
}

impl Display for AppError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Config(msg) => write!(f, "config: {msg}"),
            Self::NotInstalled(msg) => write!(f, "not installed: {msg}"),
            Self::Spawn(msg) => write!(f, "spawn: {msg}"),
            Self::StartupTimeout(msg) => write!(f, "startup timeout: {msg}"),
            Self::Unauthorized(msg) => write!(f, "unauthorized: {msg}"),
            Self::Worker { message, .. } => write!(f, "from R: {message}"),
            Self::Transport(msg) => write!(f, "transport: {msg}"),
            Self::Protocol(msg) => write!(f, "protocol: {msg}"),
            Self::ProcessExited(msg) => write!(f, "worker exited: {msg}"),
            Self::Codec(msg) => write!(f, "codec: {msg}"),
            Self::InvalidKey(msg) => write!(f, "invalid key: {msg}"),
            Self::Io(msg) => write!(f, "io: {msg}"),
        }
    }
}

impl std::error::Error for AppError {}

impl From<toml::de::Error> for AppError {
    fn from(err: toml::de::Error) -> Self {
        Self::Config(format!("invalid config: {err}"))
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        Self::Codec(format!("json: {err}"))
    }
}

impl From<arrow_schema::ArrowError> for AppError {
    fn from(err: arrow_schema::ArrowError) -> Self {
        Self::Codec(format!("arrow: {err}"))
    }
}
