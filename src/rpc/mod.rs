//! Loopback HTTP RPC to the worker.
//!
//! | Operation | Request | Body | Result |
//! |---|---|---|---|
//! | `list` | `POST /list` | none | variable names |
//! | `get` | `POST /get?name=` | none | value |
//! | `set` | `PUT /set?name=` | JSON, or multipart `value` (Arrow file) | none |
//! | `delete` | `DELETE /delete?name=` | none | none |
//! | `eval` | `POST /eval` | `{"expr": ...}` | value |
//! | `shutdown` | `POST /shutdown` | none | none |
//!
//! Every request carries the session secret in [`client::TOKEN_HEADER`] and
//! redirects are never followed.

pub mod client;
pub mod response;

pub use client::{normalize_name, RetryPolicy, RpcClient, TOKEN_HEADER};
