//! Worker process supervision.
//!
//! - [`locate`]: find the interpreter and check required shared libraries.
//! - [`port`]: choose the loopback port.
//! - [`secret`]: per-session authentication token.
//! - [`spawner`]: command line and process handle.
//! - [`lifetime`]: platform hooks that make the worker die with this process.
//! - [`worker`]: the launch sequence and readiness wait.

pub mod lifetime;
pub mod locate;
pub mod port;
pub mod secret;
pub mod spawner;
pub mod worker;

pub use secret::generate_token;
pub use worker::{launch, LaunchContext, RunningWorker};
