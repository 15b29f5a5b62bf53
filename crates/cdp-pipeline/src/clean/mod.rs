//! Record validation and coercion
//!
//! The cleaner applies a [`SourceSchema`] to raw wire records. Each field is
//! looked up with its extractor and coerced to its declared kind:
//!
//! | kind        | accepted wire values                          |
//! |-------------|-----------------------------------------------|
//! | `String`    | string                                        |
//! | `Int`       | string parsed as i64, or an integral number   |
//! | `Float`     | string parsed as a finite f64, or any number  |
//! | `Timestamp` | string in one of the accepted formats         |
//!
//! A required field that is absent or fails coercion drops the record. An
//! optional one gets its missing value instead. A malformed coordinate
//! composite always drops.

pub mod drops;

use serde_json::Value;
use tracing::debug;

use crate::record::{parse_timestamp, CleanRecord, CleanValue, RawRecord, RawValue};
use crate::schema::{CrossFieldRule, Extract, FieldKind, FieldSpec, SourceSchema};

pub use drops::{DropCounter, DropReason};

/// Cleaned records of one batch plus what was dropped
#[derive(Debug, Clone, Default)]
pub struct CleanOutcome {
    pub records: Vec<CleanRecord>,
    pub drops: DropCounter,
}

/// Result of locating a field in a raw record
enum Located<'a> {
    Absent,
    Present(&'a RawValue),
    /// Composite exists but is not shaped as expected; carries the observed type
    Malformed(&'static str),
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Cleaner;

impl Cleaner {
    pub fn new() -> Self {
        Self
    }

    /// Clean every element of a decoded batch
    pub fn clean_batch(&self, schema: &SourceSchema, batch: Vec<Value>) -> CleanOutcome {
        let mut outcome = CleanOutcome {
            records: Vec::with_capacity(batch.len()),
            drops: DropCounter::new(),
        };

        for element in batch {
            let result = match RawValue::from(element).into_record() {
                Some(raw) => self.clean_record(schema, &raw),
                None => Err(DropReason::MalformedRecord),
            };

            match result {
                Ok(record) => outcome.records.push(record),
                Err(reason) => {
                    debug!(source = %schema.name, reason = %reason, "record dropped");
                    outcome.drops.record(reason);
                }
            }
        }

        outcome
    }

    /// Apply `schema` to one raw record
    pub fn clean_record(
        &self,
        schema: &SourceSchema,
        raw: &RawRecord,
    ) -> Result<CleanRecord, DropReason> {
        let record = schema
            .fields
            .iter()
            .map(|spec| Ok((spec.key.clone(), clean_field(spec, raw)?)))
            .collect::<Result<CleanRecord, DropReason>>()?;

        for rule in &schema.rules {
            check_rule(rule, &record)?;
        }

        Ok(record)
    }
}

fn clean_field(spec: &FieldSpec, raw: &RawRecord) -> Result<CleanValue, DropReason> {
    match locate(spec, raw) {
        Located::Malformed(observed) => Err(DropReason::type_mismatch(&spec.key, observed)),
        Located::Absent if spec.required => Err(DropReason::MissingField(spec.key.clone())),
        Located::Absent => Ok(spec.missing_value()),
        Located::Present(value) => match coerce(value, spec.kind) {
            Some(clean) => Ok(clean),
            None if spec.required => Err(DropReason::type_mismatch(&spec.key, value.observed_type())),
            None => Ok(spec.missing_value()),
        },
    }
}

fn locate<'a>(spec: &FieldSpec, raw: &'a RawRecord) -> Located<'a> {
    match &spec.extract {
        Extract::Key(key) => match raw.get(key) {
            None | Some(RawValue::Null) => Located::Absent,
            Some(value) => Located::Present(value),
        },
        Extract::Coordinate { key, index } => match raw.get(key) {
            None | Some(RawValue::Null) => Located::Absent,
            Some(RawValue::Object(point)) => match point.get("coordinates") {
                Some(RawValue::Array(pair)) if pair.len() == 2 => match pair.get(*index) {
                    Some(member @ RawValue::Number(_)) => Located::Present(member),
                    Some(other) => Located::Malformed(other.observed_type()),
                    None => Located::Malformed("array"),
                },
                Some(other) => Located::Malformed(other.observed_type()),
                None => Located::Malformed("object"),
            },
            Some(other) => Located::Malformed(other.observed_type()),
        },
    }
}

fn coerce(value: &RawValue, kind: FieldKind) -> Option<CleanValue> {
    match (kind, value) {
        (FieldKind::String, RawValue::String(s)) => Some(CleanValue::Str(s.clone())),

        (FieldKind::Int, RawValue::String(s)) => s.trim().parse::<i64>().ok().map(CleanValue::Int),
        (FieldKind::Int, RawValue::Number(n)) => n
            .as_i64()
            .or_else(|| {
                n.as_f64()
                    .filter(|f| f.fract() == 0.0 && f.abs() < i64::MAX as f64)
                    .map(|f| f as i64)
            })
            .map(CleanValue::Int),

        (FieldKind::Float, RawValue::String(s)) => s
            .trim()
            .parse::<f64>()
            .ok()
            .filter(|f| f.is_finite())
            .map(CleanValue::Float),
        (FieldKind::Float, RawValue::Number(n)) => n.as_f64().map(CleanValue::Float),

        (FieldKind::Timestamp, RawValue::String(s)) => parse_timestamp(s).map(CleanValue::Timestamp),

        _ => None,
    }
}

fn check_rule(rule: &CrossFieldRule, record: &CleanRecord) -> Result<(), DropReason> {
    match rule {
        CrossFieldRule::AllEmpty { name, fields } => {
            let all_empty = fields.iter().all(|key| {
                record
                    .get(key)
                    .is_none_or(|v| v.is_sentinel() || *v == CleanValue::Null)
            });
            if all_empty {
                Err(DropReason::AllEmpty(name.clone()))
            } else {
                Ok(())
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::schema::{sources, FieldSpec, SourceSchema};
    use serde_json::json;

    fn raw(value: Value) -> RawRecord {
        RawValue::from(value).into_record().unwrap()
    }

    fn mixed_schema() -> SourceSchema {
        SourceSchema::builder("mixed")
            .field(FieldSpec::required("id", FieldKind::String))
            .field(FieldSpec::required("count", FieldKind::Int))
            .field(FieldSpec::optional("rate", FieldKind::Float))
            .field(FieldSpec::optional("seen", FieldKind::Timestamp))
            .field(FieldSpec::optional("note", FieldKind::String))
            .build()
            .unwrap()
    }

    #[test]
    fn test_optional_fields_get_sentinels() {
        let record = Cleaner::new()
            .clean_record(&mixed_schema(), &raw(json!({"id": "a", "count": "3"})))
            .unwrap();

        assert_eq!(record.get("count"), Some(&CleanValue::Int(3)));
        assert_eq!(record.get("rate"), Some(&CleanValue::Float(-1.0)));
        assert!(record.get("seen").unwrap().is_sentinel());
        assert_eq!(record.get("note"), Some(&CleanValue::Str(String::new())));
    }

    #[test]
    fn test_field_set_matches_schema_with_extra_wire_keys() {
        let schema = mixed_schema();
        let record = Cleaner::new()
            .clean_record(&schema, &raw(json!({"id": "a", "count": 1, "junk": true})))
            .unwrap();

        let keys: Vec<&str> = record.keys().collect();
        let expected: Vec<&str> = schema.field_keys().collect();
        assert_eq!(keys, expected);
    }

    #[test]
    fn test_required_null_is_missing() {
        let err = Cleaner::new()
            .clean_record(&mixed_schema(), &raw(json!({"id": null, "count": 1})))
            .unwrap_err();
        assert_eq!(err, DropReason::MissingField("id".into()));
    }

    #[test]
    fn test_int_coercion_matrix() {
        let cleaner = Cleaner::new();
        let schema = mixed_schema();
        let count = |v: Value| cleaner.clean_record(&schema, &raw(json!({"id": "a", "count": v})));

        assert_eq!(count(json!(" 42 ")).unwrap().get("count"), Some(&CleanValue::Int(42)));
        assert_eq!(count(json!(7)).unwrap().get("count"), Some(&CleanValue::Int(7)));
        assert_eq!(count(json!(7.0)).unwrap().get("count"), Some(&CleanValue::Int(7)));
        assert_eq!(
            count(json!(7.5)).unwrap_err(),
            DropReason::type_mismatch("count", "number")
        );
        assert_eq!(
            count(json!("4.2")).unwrap_err(),
            DropReason::type_mismatch("count", "string")
        );
        assert_eq!(
            count(json!(true)).unwrap_err(),
            DropReason::type_mismatch("count", "boolean")
        );
    }

    #[test]
    fn test_string_field_rejects_numbers() {
        let err = Cleaner::new()
            .clean_record(&mixed_schema(), &raw(json!({"id": 12, "count": 1})))
            .unwrap_err();
        assert_eq!(err, DropReason::type_mismatch("id", "number"));
    }

    #[test]
    fn test_optional_coercion_failure_uses_sentinel() {
        let record = Cleaner::new()
            .clean_record(
                &mixed_schema(),
                &raw(json!({"id": "a", "count": 1, "rate": "NaN", "seen": "soon", "note": 5})),
            )
            .unwrap();

        assert_eq!(record.get("rate"), Some(&CleanValue::Float(-1.0)));
        assert!(record.get("seen").unwrap().is_sentinel());
        assert_eq!(record.get("note"), Some(&CleanValue::Str(String::new())));
    }

    #[test]
    fn test_coordinates_unpacked_from_point() {
        let schema = sources::covid_vulnerability_index().unwrap();
        let record = Cleaner::new()
            .clean_record(
                &schema,
                &raw(json!({
                    "geography_type": "CA",
                    "community_area_or_zip": "70",
                    "ccvi_score": "45.1",
                    "ccvi_category": "MEDIUM",
                    "rank_covid_19_incidence_rate": "12",
                    "location": {"type": "Point", "coordinates": [-87.7, 41.7]}
                })),
            )
            .unwrap();

        assert_eq!(record.get("latitude"), Some(&CleanValue::Float(41.7)));
        assert_eq!(record.get("longitude"), Some(&CleanValue::Float(-87.7)));
        assert_eq!(record.get("rank_age_65_plus"), Some(&CleanValue::Int(-1)));
    }

    #[test]
    fn test_malformed_point_is_type_mismatch() {
        let schema = SourceSchema::builder("geo")
            .field(FieldSpec::required("id", FieldKind::String))
            .field(FieldSpec::optional("lat", FieldKind::Float).coordinate("location", 1))
            .build()
            .unwrap();
        let cleaner = Cleaner::new();

        let cases = [
            (json!({"coordinates": [-87.7]}), "array"),
            (json!({"coordinates": [-87.7, "41.7"]}), "string"),
            (json!({"type": "Point"}), "object"),
            (json!("41.7,-87.7"), "string"),
        ];
        for (location, observed) in cases {
            let err = cleaner
                .clean_record(&schema, &raw(json!({"id": "a", "location": location})))
                .unwrap_err();
            assert_eq!(err, DropReason::type_mismatch("lat", observed));
        }

        let absent = cleaner.clean_record(&schema, &raw(json!({"id": "a"}))).unwrap();
        assert_eq!(absent.get("lat"), Some(&CleanValue::Float(-1.0)));
    }

    #[test]
    fn test_all_empty_location_rule() {
        let schema = SourceSchema::builder("permits")
            .field(FieldSpec::required("id", FieldKind::String))
            .field(FieldSpec::optional("ward", FieldKind::String))
            .field(FieldSpec::optional("latitude", FieldKind::Float))
            .rule(CrossFieldRule::all_empty("location", &["ward", "latitude"]))
            .build()
            .unwrap();
        let cleaner = Cleaner::new();

        let err = cleaner.clean_record(&schema, &raw(json!({"id": "p1"}))).unwrap_err();
        assert_eq!(err, DropReason::AllEmpty("location".into()));

        assert!(cleaner
            .clean_record(&schema, &raw(json!({"id": "p1", "ward": "42"})))
            .is_ok());
    }

    #[test]
    fn test_batch_counts_malformed_elements() {
        let outcome = Cleaner::new().clean_batch(
            &mixed_schema(),
            vec![json!({"id": "a", "count": 1}), json!("oops"), json!([1, 2])],
        );
        assert_eq!(outcome.records.len(), 1);
        assert_eq!(outcome.drops.count(&DropReason::MalformedRecord), 2);
    }

    #[test]
    fn test_renamed_wire_keys() {
        let schema = sources::census_data().unwrap();
        let record = Cleaner::new()
            .clean_record(
                &schema,
                &raw(json!({
                    "ca": "1",
                    "community_area_name": "Rogers Park",
                    "percent_of_housing_crowded": "7.7",
                    "percent_households_below_poverty": "23.6",
                    "percent_aged_16_unemployed": "8.7",
                    "percent_aged_25_without_high_school_diploma": "18.2",
                    "percent_aged_under_18_or_over_64": "27.5",
                    "per_capita_income_": "23939",
                    "hardship_index": "39"
                })),
            )
            .unwrap();

        assert_eq!(record.get("community_area_number"), Some(&CleanValue::Str("1".into())));
        assert_eq!(record.get("per_capita_income"), Some(&CleanValue::Int(23939)));
        assert!(record.get("ca").is_none());
    }
}
