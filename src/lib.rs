//! Supervised R worker process with a variable-store and eval client.
//!
//! A [`Session`] launches `Rscript` running a plumber HTTP handler on a
//! loopback port, forwards its output to `tracing`, and exposes the worker's
//! global environment as a map of [`Value`]s plus `eval`. Tables travel as
//! Arrow IPC files; timestamps as mongo-style `{"$date": ms}` JSON.

#![deny(unsafe_code)]

pub mod codec;
pub mod config;
pub mod errors;
pub mod forwarder;
pub mod logging;
pub mod models;
pub mod rpc;
pub mod session;
pub mod supervisor;

pub use config::WorkerConfig;
pub use errors::{AppError, Result};
pub use logging::{LogSink, TracingSink};
pub use models::{Timestamp, Value};
pub use session::{AsyncSession, Session, SessionState};
