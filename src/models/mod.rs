//! Transport-level value model exchanged with the worker.

pub mod timestamp;
pub mod value;

pub use timestamp::Timestamp;
pub use value::Value;
