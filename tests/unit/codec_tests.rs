//! Wire codecs: the JSON dialect and the Arrow table channel.

use std::collections::BTreeMap;
use std::sync::Arc;

use arrow_array::{ArrayRef, Int32Array, RecordBatch, StringArray};
use arrow_ipc::writer::FileWriter;
use chrono::TimeZone;
use chrono_tz::Tz;
use rworker::codec::{json, table};
use rworker::{AppError, Timestamp, Value};
use serde_json::json;

const ZONE: Tz = chrono_tz::Asia::Tokyo;

fn batch(ids: Vec<i32>, labels: Vec<&str>) -> RecordBatch {
    let id: ArrayRef = Arc::new(Int32Array::from(ids));
    let label: ArrayRef = Arc::new(StringArray::from(labels));
    RecordBatch::try_from_iter(vec![("id", id), ("label", label)]).unwrap()
}

// ── JSON dialect ────────────────────────────────────────────

#[test]
fn nested_structures_decode_recursively() {
    let raw = br#"{"name": "run-7", "ok": true, "scores": [1, 2.5, null], "meta": {"at": {"$date": 0}}}"#;
    let value = json::decode(raw, ZONE).unwrap();
    let map = value.as_map().expect("object decodes to a map");

    assert_eq!(map["name"], Value::from("run-7"));
    assert_eq!(map["ok"], Value::Bool(true));
    assert_eq!(
        map["scores"],
        Value::List(vec![Value::Int(1), Value::Float(2.5), Value::Null])
    );
    let at = map["meta"].as_map().and_then(|m| m.get("at")).unwrap();
    let Value::Timestamp(Timestamp::Zoned(dt)) = at else {
        panic!("expected a zoned timestamp, got {at:?}");
    };
    assert_eq!(dt.timestamp_millis(), 0);
    assert_eq!(dt.timezone(), ZONE);
}

#[test]
fn zoned_timestamps_ignore_the_default_zone() {
    let instant = chrono_tz::Europe::London
        .with_ymd_and_hms(2025, 6, 1, 12, 0, 0)
        .single()
        .unwrap();
    let encoded = json::encode_value(&Value::from(instant), ZONE).unwrap();
    assert_eq!(encoded, json!({"$date": instant.timestamp_millis()}));
}

#[test]
fn set_body_wraps_plain_values() {
    let mut inner = BTreeMap::new();
    inner.insert("depth".to_owned(), Value::Float(3.5));
    let mut outer = BTreeMap::new();
    outer.insert("probe".to_owned(), Value::Map(inner));

    let body: serde_json::Value =
        serde_json::from_slice(&json::encode_set_body(&Value::Map(outer), ZONE).unwrap()).unwrap();
    assert_eq!(body, json!({"value": {"probe": {"depth": 3.5}}}));
}

#[test]
fn tables_are_not_json() {
    let err = json::encode_value(&Value::Table(batch(vec![1], vec!["a"])), ZONE).unwrap_err();
    assert!(matches!(err, AppError::Codec(msg) if msg.contains("columnar")));
}

#[test]
fn invalid_json_is_a_codec_error() {
    assert!(matches!(json::decode(b"{nope", ZONE), Err(AppError::Codec(_))));
}

// ── Arrow tables ────────────────────────────────────────────

#[test]
fn multi_batch_files_are_concatenated() {
    let first = batch(vec![1, 2], vec!["a", "b"]);
    let second = batch(vec![3], vec!["c"]);

    let mut bytes = Vec::new();
    {
        let mut writer = FileWriter::try_new(&mut bytes, &first.schema()).unwrap();
        writer.write(&first).unwrap();
        writer.write(&second).unwrap();
        writer.finish().unwrap();
    }

    let decoded = table::decode_table(&bytes).unwrap();
    assert_eq!(decoded, batch(vec![1, 2, 3], vec!["a", "b", "c"]));
}

#[test]
fn file_without_batches_is_an_empty_table() {
    let schema = batch(vec![], vec![]).schema();
    let mut bytes = Vec::new();
    {
        let mut writer = FileWriter::try_new(&mut bytes, &schema).unwrap();
        writer.finish().unwrap();
    }

    let decoded = table::decode_table(&bytes).unwrap();
    assert_eq!(decoded.num_rows(), 0);
    assert_eq!(decoded.schema(), schema);
}

#[test]
fn encoded_table_round_trips() {
    let original = batch(vec![7, 8, 9], vec!["x", "y", "z"]);
    let bytes = table::encode_table(&original).unwrap();
    assert_eq!(table::decode_table(&bytes).unwrap(), original);
}
