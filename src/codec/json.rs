//! JSON dialect spoken by the worker's `jsonlite`-based handler.
//!
//! # Timestamps
//!
//! A timestamp is the single-key object `{"$date": <ms since epoch, UTC>}`.
//! Naive timestamps are localized in the session's default zone before
//! conversion; decoded timestamps carry that zone.
//!
//! # Vector collapsing
//!
//! The worker has no scalars, only length-one vectors, and it serializes a
//! length-one date-time vector as `[{"$date": ...}]` while other length-one
//! vectors are unboxed. The decoder therefore unwraps a one-element array
//! whose only element is a timestamp. No other array is unwrapped.
//!
//! When *setting* a value the opposite problem appears: the worker would
//! collapse a bare timestamp (or a one-element timestamp list) to `NULL`,
//! and flatten a map made only of timestamps into a vector. The top-level
//! value is marked so the worker can undo this:
//!
//! | value | body |
//! |---|---|
//! | timestamp or `[timestamp]` | `{"value": {"value": v, "RWorkerProcess_IsAtomicDatetime": true}}` |
//! | map of timestamps / `[timestamp]`s | `{"value": {...v, "RWorkerProcess_IsDatetimeList": true}}` |
//! | anything else | `{"value": v}` |

use std::collections::BTreeMap;

use chrono_tz::Tz;
use serde_json::{Map, Number, Value as JsonValue};

use crate::models::{Timestamp, Value};
use crate::{AppError, Result};

/// Key of the mongo timestamp envelope.
pub const DATE_KEY: &str = "$date";

/// Marks a wrapped atomic timestamp (or one-element timestamp list).
pub const ATOMIC_TIMESTAMP_MARKER: &str = "RWorkerProcess_IsAtomicDatetime";

/// Marks a map whose values are all timestamps.
pub const TIMESTAMP_MAP_MARKER: &str = "RWorkerProcess_IsDatetimeList";

/// Encode `value` as plain dialect JSON, without set-body markers.
///
/// # Errors
///
/// Returns `AppError::Codec` for tables, non-finite floats, empty map keys,
/// maps that would be read back as a timestamp envelope and naive
/// timestamps that do not exist in `zone`.
pub fn encode_value(value: &Value, zone: Tz) -> Result<JsonValue> {
    match value {
        Value::Null => Ok(JsonValue::Null),
        Value::Bool(b) => Ok(JsonValue::Bool(*b)),
        Value::Int(i) => Ok(JsonValue::Number(Number::from(*i))),
        Value::Float(f) => Number::from_f64(*f)
            .map(JsonValue::Number)
            .ok_or_else(|| AppError::Codec(format!("cannot encode non-finite float {f}"))),
        Value::String(s) => Ok(JsonValue::String(s.clone())),
        Value::List(items) => items
            .iter()
            .map(|item| encode_value(item, zone))
            .collect::<Result<Vec<_>>>()
            .map(JsonValue::Array),
        Value::Map(members) => {
            let mut object = Map::with_capacity(members.len());
            for (key, member) in members {
                if key.is_empty() {
                    return Err(AppError::Codec("map keys must not be empty".into()));
                }
                object.insert(key.clone(), encode_value(member, zone)?);
            }
            if mongo_date_millis(&object).is_some() {
                return Err(AppError::Codec(format!(
                    "a map holding only a numeric {DATE_KEY:?} member would decode as a timestamp"
                )));
            }
            Ok(JsonValue::Object(object))
        }
        Value::Timestamp(ts) => {
            let mut object = Map::with_capacity(1);
            object.insert(
                DATE_KEY.into(),
                JsonValue::Number(Number::from(ts.to_epoch_millis(zone)?)),
            );
            Ok(JsonValue::Object(object))
        }
        Value::Table(_) => Err(AppError::Codec(
            "tables are sent on the columnar channel, not as JSON".into(),
        )),
    }
}

/// Build the body of a `set` request: `{"value": ...}` with markers applied.
///
/// # Errors
///
/// Propagates [`encode_value`] failures.
pub fn encode_set_body(value: &Value, zone: Tz) -> Result<Vec<u8>> {
    let encoded = encode_value(value, zone)?;

    let marked = match value {
        Value::Timestamp(_) => wrap_atomic(encoded),
        Value::List(items) if is_single_timestamp_list(items) => wrap_atomic(encoded),
        Value::Map(members) if members.values().all(is_timestamp_like) => match encoded {
            JsonValue::Object(mut object) => {
                object.insert(TIMESTAMP_MAP_MARKER.into(), JsonValue::Bool(true));
                JsonValue::Object(object)
            }
            other => other,
        },
        _ => encoded,
    };

    let mut body = Map::with_capacity(1);
    body.insert("value".into(), marked);
    Ok(serde_json::to_vec(&JsonValue::Object(body))?)
}

/// Build the body of an `eval` request.
///
/// # Errors
///
/// Returns `AppError::Codec` if serialization fails.
pub fn encode_eval_body(expr: &str) -> Result<Vec<u8>> {
    let mut body = Map::with_capacity(1);
    body.insert("expr".into(), JsonValue::String(expr.to_owned()));
    Ok(serde_json::to_vec(&JsonValue::Object(body))?)
}

/// Decode a response body.
///
/// # Errors
///
/// Returns `AppError::Codec` if `bytes` is not valid JSON or holds an
/// out-of-range timestamp.
pub fn decode(bytes: &[u8], zone: Tz) -> Result<Value> {
    let json: JsonValue = serde_json::from_slice(bytes)?;
    decode_json(json, zone)
}

/// Convert parsed JSON into a [`Value`], applying the dialect rules.
///
/// # Errors
///
/// Returns `AppError::Codec` for out-of-range timestamps.
pub fn decode_json(json: JsonValue, zone: Tz) -> Result<Value> {
    match json {
        JsonValue::Null => Ok(Value::Null),
        JsonValue::Bool(b) => Ok(Value::Bool(b)),
        JsonValue::Number(n) => Ok(decode_number(&n)),
        JsonValue::String(s) => Ok(Value::String(s)),
        JsonValue::Array(items) => {
            let mut decoded = items
                .into_iter()
                .map(|item| decode_json(item, zone))
                .collect::<Result<Vec<_>>>()?;
            if decoded.len() == 1 && matches!(decoded[0], Value::Timestamp(_)) {
                return Ok(decoded.remove(0));
            }
            Ok(Value::List(decoded))
        }
        JsonValue::Object(object) => {
            if let Some(millis) = mongo_date_millis(&object) {
                return Timestamp::from_epoch_millis(millis, zone).map(Value::Timestamp);
            }
            object
                .into_iter()
                .map(|(key, member)| Ok((key, decode_json(member, zone)?)))
                .collect::<Result<BTreeMap<_, _>>>()
                .map(Value::Map)
        }
    }
}

fn decode_number(n: &Number) -> Value {
    if let Some(i) = n.as_i64() {
        Value::Int(i)
    } else {
        Value::Float(n.as_f64().unwrap_or(f64::NAN))
    }
}

fn mongo_date_millis(object: &Map<String, JsonValue>) -> Option<f64> {
    if object.len() != 1 {
        return None;
    }
    object.get(DATE_KEY).and_then(JsonValue::as_f64)
}

fn wrap_atomic(encoded: JsonValue) -> JsonValue {
    let mut object = Map::with_capacity(2);
    object.insert("value".into(), encoded);
    object.insert(ATOMIC_TIMESTAMP_MARKER.into(), JsonValue::Bool(true));
    JsonValue::Object(object)
}

fn is_single_timestamp_list(items: &[Value]) -> bool {
    matches!(items, [Value::Timestamp(_)])
}

fn is_timestamp_like(value: &Value) -> bool {
    match value {
        Value::Timestamp(_) => true,
        Value::List(items) => is_single_timestamp_list(items),
        _ => false,
    }
}
