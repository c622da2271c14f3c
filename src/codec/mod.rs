//! Wire encodings for values exchanged with the worker.
//!
//! Two channels exist:
//! - [`json`]: a JSON dialect with "mongo" timestamps (`{"$date": ms}`) and
//!   marker objects that keep the worker from unboxing single timestamps.
//! - [`table`]: Arrow IPC files (Feather v2) for data frames.
//!
//! Which channel a response uses is decided by its `Content-Type`, never by
//! inspecting the body.

pub mod json;
pub mod table;

/// Media type of the JSON channel.
pub const JSON_MEDIA_TYPE: &str = "application/json";

/// Wire channel selected by a response's media type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Channel {
    /// [`json`] dialect.
    Json,
    /// [`table`] Arrow IPC file.
    Table,
}

/// Map a `Content-Type` header value to a channel.
///
/// Parameters such as `charset` are ignored and the comparison is
/// case-insensitive. Returns `None` for unrecognized media types.
#[must_use]
pub fn channel_for(content_type: &str) -> Option<Channel> {
    let essence = content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();

    if essence == JSON_MEDIA_TYPE {
        Some(Channel::Json)
    } else if table::MEDIA_TYPES.contains(&essence.as_str()) {
        Some(Channel::Table)
    } else {
        None
    }
}
