//! Session facades over a supervised worker.
//!
//! [`AsyncSession`] holds the state machine and is used from async code.
//! [`Session`] wraps it with a private runtime for blocking callers.

pub mod async_session;
pub mod blocking;
pub mod state;

pub use async_session::AsyncSession;
pub use blocking::Session;
pub use state::SessionState;
