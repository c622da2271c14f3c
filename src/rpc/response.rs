//! Mapping of worker HTTP responses onto values and errors.

use chrono_tz::Tz;
use reqwest::StatusCode;
use serde_json::Value as JsonValue;
use tracing::debug;

use crate::codec::{self, Channel};
use crate::models::Value;
use crate::{AppError, Result};

/// Turn a non-200 status into the matching error.
///
/// - 401: [`AppError::Unauthorized`].
/// - 500 whose body is a JSON object with a string `message`:
///   [`AppError::Worker`], with the optional `cst` array as the call stack.
/// - anything else but 200: [`AppError::Transport`].
///
/// # Errors
///
/// As listed above; `Ok(())` for 200.
pub fn check_status(status: StatusCode, body: &[u8]) -> Result<()> {
    if status == StatusCode::OK {
        return Ok(());
    }

    if status == StatusCode::UNAUTHORIZED {
        return Err(AppError::Unauthorized(
            "the worker rejected the authentication token".into(),
        ));
    }

    if status == StatusCode::INTERNAL_SERVER_ERROR {
        if let Some(err) = worker_error(body) {
            return Err(err);
        }
    }

    Err(AppError::Transport(format!(
        "request to the worker failed with status {}: {}",
        status.as_u16(),
        status.canonical_reason().unwrap_or("unknown")
    )))
}

fn worker_error(body: &[u8]) -> Option<AppError> {
    let JsonValue::Object(object) = serde_json::from_slice::<JsonValue>(body).ok()? else {
        return None;
    };
    let message = object.get("message")?.as_str()?.to_owned();

    let call_stack: Vec<String> = match object.get("cst") {
        Some(JsonValue::Array(frames)) => frames
            .iter()
            .map(|frame| match frame {
                JsonValue::String(s) => s.trim_end().to_owned(),
                other => other.to_string(),
            })
            .collect(),
        _ => Vec::new(),
    };

    debug!(message = message.as_str(), "worker raised an error");
    for frame in &call_stack {
        debug!(frame = frame.as_str(), "worker call stack");
    }

    Some(AppError::Worker {
        message,
        call_stack,
    })
}

/// Decode a 200 body according to its `Content-Type`.
///
/// A missing content type yields [`Value::Null`].
///
/// # Errors
///
/// Returns `AppError::Protocol` for unknown media types and for bodies the
/// selected channel cannot decode.
pub fn decode_body(content_type: Option<&str>, body: &[u8], zone: Tz) -> Result<Value> {
    let Some(content_type) = content_type else {
        debug!("response has no content type; ignoring body");
        return Ok(Value::Null);
    };

    match codec::channel_for(content_type) {
        Some(Channel::Json) => codec::json::decode(body, zone)
            .map_err(|err| AppError::Protocol(format!("undecodable JSON response: {err}"))),
        Some(Channel::Table) => codec::table::decode_table(body)
            .map(Value::Table)
            .map_err(|err| AppError::Protocol(format!("undecodable table response: {err}"))),
        None => Err(AppError::Protocol(format!(
            "the worker answered with unsupported content type {content_type:?}"
        ))),
    }
}
