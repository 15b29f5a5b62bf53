//! Record value types
//!
//! [`RawValue`] is the tagged form of a decoded wire value. [`CleanValue`] is
//! the typed scalar produced by the cleaner. A [`CleanRecord`] holds one entry
//! per schema field in schema order, plus any fields appended by enrichment.
//!
//! Batches cross every stage boundary as a JSON array of objects. Timestamps
//! travel as RFC3339 strings.

pub mod timestamp;

use chrono::{DateTime, Utc};
use serde_json::{Map, Number, Value};
use std::collections::BTreeMap;

use crate::error::PipelineResult;
use crate::schema::{FieldKind, SourceSchema};

pub use timestamp::{format_timestamp, is_zero_instant, parse_timestamp, zero_instant};

/// A record exactly as decoded from the wire
pub type RawRecord = BTreeMap<String, RawValue>;

/// Dynamically-typed wire value
#[derive(Debug, Clone, PartialEq)]
pub enum RawValue {
    Null,
    Bool(bool),
    Number(Number),
    String(String),
    Array(Vec<RawValue>),
    Object(RawRecord),
}

impl RawValue {
    /// Wire type name, used in type-mismatch drop reasons
    pub fn observed_type(&self) -> &'static str {
        match self {
            RawValue::Null => "null",
            RawValue::Bool(_) => "boolean",
            RawValue::Number(_) => "number",
            RawValue::String(_) => "string",
            RawValue::Array(_) => "array",
            RawValue::Object(_) => "object",
        }
    }

    /// Interpret as a record; `None` for anything but an object
    pub fn into_record(self) -> Option<RawRecord> {
        match self {
            RawValue::Object(map) => Some(map),
            _ => None,
        }
    }
}

impl From<Value> for RawValue {
    fn from(value: Value) -> Self {
        match value {
            Value::Null => RawValue::Null,
            Value::Bool(b) => RawValue::Bool(b),
            Value::Number(n) => RawValue::Number(n),
            Value::String(s) => RawValue::String(s),
            Value::Array(items) => RawValue::Array(items.into_iter().map(RawValue::from).collect()),
            Value::Object(map) => {
                RawValue::Object(map.into_iter().map(|(k, v)| (k, RawValue::from(v))).collect())
            }
        }
    }
}

/// Typed scalar held by a cleaned record
#[derive(Debug, Clone, PartialEq)]
pub enum CleanValue {
    Null,
    Str(String),
    Int(i64),
    Float(f64),
    Bool(bool),
    Timestamp(DateTime<Utc>),
}

impl CleanValue {
    /// Missing-value sentinel for a field kind
    pub fn sentinel(kind: FieldKind) -> Self {
        match kind {
            FieldKind::String => CleanValue::Str(String::new()),
            FieldKind::Int => CleanValue::Int(-1),
            FieldKind::Float => CleanValue::Float(-1.0),
            FieldKind::Timestamp => CleanValue::Timestamp(zero_instant()),
        }
    }

    /// True for values equal to a sentinel, whether substituted or genuine
    pub fn is_sentinel(&self) -> bool {
        match self {
            CleanValue::Str(s) => s.is_empty(),
            CleanValue::Int(i) => *i == -1,
            CleanValue::Float(f) => *f == -1.0,
            CleanValue::Timestamp(ts) => is_zero_instant(ts),
            CleanValue::Null | CleanValue::Bool(_) => false,
        }
    }

    /// Numeric view, used for coordinates
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            CleanValue::Float(f) => Some(*f),
            CleanValue::Int(i) => Some(*i as f64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            CleanValue::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn to_json(&self) -> Value {
        match self {
            CleanValue::Null => Value::Null,
            CleanValue::Str(s) => Value::String(s.clone()),
            CleanValue::Int(i) => Value::from(*i),
            CleanValue::Float(f) => Value::from(*f),
            CleanValue::Bool(b) => Value::Bool(*b),
            CleanValue::Timestamp(ts) => Value::String(format_timestamp(ts)),
        }
    }

    /// Decode a wire value written by an upstream stage
    ///
    /// `hint` is the declared kind when the key belongs to the schema. Keys
    /// outside the schema (derived fields) decode by wire type alone.
    pub fn from_json(value: &Value, hint: Option<FieldKind>) -> Option<Self> {
        match (value, hint) {
            (Value::Null, _) => Some(CleanValue::Null),
            (Value::Bool(b), _) => Some(CleanValue::Bool(*b)),
            (Value::String(s), Some(FieldKind::Timestamp)) => {
                parse_timestamp(s).map(CleanValue::Timestamp)
            }
            (Value::String(s), _) => Some(CleanValue::Str(s.clone())),
            (Value::Number(n), Some(FieldKind::Float)) => n.as_f64().map(CleanValue::Float),
            (Value::Number(n), _) => n
                .as_i64()
                .map(CleanValue::Int)
                .or_else(|| n.as_f64().map(CleanValue::Float)),
            (Value::Array(_) | Value::Object(_), _) => None,
        }
    }
}

/// Ordered key/value record produced by the cleaner or the enricher
///
/// Built once from an iterator of entries and never mutated. Enrichment and
/// projection return new records.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct CleanRecord {
    fields: Vec<(String, CleanValue)>,
}

/// A cleaned record with derived fields appended
pub type EnrichedRecord = CleanRecord;

impl CleanRecord {
    pub fn get(&self, key: &str) -> Option<&CleanValue> {
        self.fields.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|(k, _)| k.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &CleanValue)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// New record with `extra` appended after the existing fields
    pub fn extended(&self, extra: Vec<(String, CleanValue)>) -> Self {
        self.fields.iter().cloned().chain(extra).collect()
    }

    /// New record keeping only `keep`, in the current field order
    pub fn projected(&self, keep: &[String]) -> Self {
        self.fields
            .iter()
            .filter(|(k, _)| keep.iter().any(|want| want == k))
            .cloned()
            .collect()
    }

    pub fn to_json(&self) -> Value {
        let map: Map<String, Value> = self
            .fields
            .iter()
            .map(|(k, v)| (k.clone(), v.to_json()))
            .collect();
        Value::Object(map)
    }

    /// Decode a wire object produced by an upstream stage
    ///
    /// Schema fields come first in schema order, followed by any other keys.
    /// Returns `None` when the value is not an object or holds a nested value.
    pub fn from_json(schema: &SourceSchema, value: &Value) -> Option<Self> {
        let object = value.as_object()?;
        let mut fields = Vec::with_capacity(object.len());

        for spec in &schema.fields {
            if let Some(raw) = object.get(&spec.key) {
                fields.push((spec.key.clone(), CleanValue::from_json(raw, Some(spec.kind))?));
            }
        }
        for (key, raw) in object {
            if schema.field(key).is_none() {
                fields.push((key.clone(), CleanValue::from_json(raw, None)?));
            }
        }

        Some(Self { fields })
    }
}

impl FromIterator<(String, CleanValue)> for CleanRecord {
    fn from_iter<I: IntoIterator<Item = (String, CleanValue)>>(iter: I) -> Self {
        Self {
            fields: iter.into_iter().collect(),
        }
    }
}

/// Decode a raw ingress payload into its JSON elements
pub fn decode_raw_batch(payload: &[u8]) -> PipelineResult<Vec<Value>> {
    Ok(serde_json::from_slice(payload)?)
}

/// Encode records as the JSON array wire format
pub fn encode_batch(records: &[CleanRecord]) -> PipelineResult<Vec<u8>> {
    let values: Vec<Value> = records.iter().map(CleanRecord::to_json).collect();
    Ok(serde_json::to_vec(&values)?)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::schema::{FieldSpec, SourceSchema};
    use serde_json::json;

    fn schema() -> SourceSchema {
        SourceSchema::builder("trips")
            .field(FieldSpec::required("trip_id", FieldKind::String))
            .field(FieldSpec::required("started", FieldKind::Timestamp))
            .field(FieldSpec::required("miles", FieldKind::Float))
            .field(FieldSpec::optional("area", FieldKind::Int))
            .build()
            .unwrap()
    }

    #[test]
    fn test_raw_value_observed_types() {
        let raw = RawValue::from(json!({"a": [1, "x"], "b": null}));
        assert_eq!(raw.observed_type(), "object");
        let record = raw.into_record().unwrap();
        assert_eq!(record["a"].observed_type(), "array");
        assert_eq!(record["b"], RawValue::Null);
        assert!(RawValue::from(json!(3)).into_record().is_none());
    }

    #[test]
    fn test_sentinels() {
        assert!(CleanValue::sentinel(FieldKind::String).is_sentinel());
        assert!(CleanValue::sentinel(FieldKind::Int).is_sentinel());
        assert!(CleanValue::sentinel(FieldKind::Float).is_sentinel());
        assert!(CleanValue::sentinel(FieldKind::Timestamp).is_sentinel());
        assert!(CleanValue::Int(-1).is_sentinel());
        assert!(!CleanValue::Int(0).is_sentinel());
        assert!(!CleanValue::Null.is_sentinel());
    }

    #[test]
    fn test_wire_decode_follows_schema_order_then_derived() {
        let wire = json!({
            "zipcode": "60601",
            "miles": 3,
            "trip_id": "t1",
            "started": "2023-06-01T14:15:00Z",
            "area": 8
        });

        let record = CleanRecord::from_json(&schema(), &wire).unwrap();
        let keys: Vec<&str> = record.keys().collect();
        assert_eq!(keys, vec!["trip_id", "started", "miles", "area", "zipcode"]);
        assert_eq!(record.get("miles"), Some(&CleanValue::Float(3.0)));
        assert_eq!(record.get("area"), Some(&CleanValue::Int(8)));
        assert!(matches!(record.get("started"), Some(CleanValue::Timestamp(_))));
        assert_eq!(record.get("zipcode"), Some(&CleanValue::Str("60601".into())));
    }

    #[test]
    fn test_wire_decode_rejects_nested_values() {
        let wire = json!({"trip_id": {"nested": true}});
        assert!(CleanRecord::from_json(&schema(), &wire).is_none());
        assert!(CleanRecord::from_json(&schema(), &json!("t1")).is_none());
    }

    #[test]
    fn test_extended_and_projected_build_new_records() {
        let record: CleanRecord = vec![
            ("a".to_string(), CleanValue::Int(1)),
            ("b".to_string(), CleanValue::Str("x".into())),
        ]
        .into_iter()
        .collect();

        let extended = record.extended(vec![("c".to_string(), CleanValue::Bool(true))]);
        assert_eq!(record.len(), 2);
        assert_eq!(extended.len(), 3);

        let projected = extended.projected(&["c".to_string(), "a".to_string()]);
        let keys: Vec<&str> = projected.keys().collect();
        assert_eq!(keys, vec!["a", "c"]);
    }

    #[test]
    fn test_encode_batch_writes_timestamps_as_rfc3339() {
        let record: CleanRecord = vec![(
            "started".to_string(),
            CleanValue::Timestamp(parse_timestamp("2023-06-01T14:15:00.000").unwrap()),
        )]
        .into_iter()
        .collect();

        let bytes = encode_batch(&[record]).unwrap();
        let decoded: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(decoded, json!([{"started": "2023-06-01T14:15:00Z"}]));
    }

    #[test]
    fn test_decode_raw_batch_requires_array() {
        assert_eq!(decode_raw_batch(br#"[{"a":1}]"#).unwrap().len(), 1);
        assert!(decode_raw_batch(br#"{"a":1}"#).is_err());
    }
}
