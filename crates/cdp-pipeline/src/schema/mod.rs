//! Declarative per-source field contracts
//!
//! A [`SourceSchema`] is plain data: an ordered list of [`FieldSpec`]s, any
//! cross-field drop rules, the enrichment lookups, and the upstream dataset it
//! is fetched from. The cleaner, enricher and persister are generic over it, so
//! adding a source means adding a value to [`sources`], never a code branch.

pub mod registry;
pub mod sources;

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::error::{PipelineError, PipelineResult};
use crate::record::CleanValue;

pub use registry::SchemaRegistry;

/// Semantic type of a field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldKind {
    String,
    Int,
    Float,
    Timestamp,
}

impl FieldKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FieldKind::String => "string",
            FieldKind::Int => "int",
            FieldKind::Float => "float",
            FieldKind::Timestamp => "timestamp",
        }
    }
}

impl std::fmt::Display for FieldKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a field's raw value is located in the wire record
#[derive(Debug, Clone, PartialEq)]
pub enum Extract {
    /// Top-level key, possibly different from the output key
    Key(String),
    /// Member `index` of a GeoJSON point `{ "coordinates": [lon, lat] }` under `key`
    Coordinate { key: String, index: usize },
}

#[derive(Debug, Clone, PartialEq)]
pub struct FieldSpec {
    /// Output key in the cleaned record
    pub key: String,
    pub kind: FieldKind,
    pub required: bool,
    /// Overrides the kind sentinel when the optional field is missing
    pub default: Option<CleanValue>,
    pub extract: Extract,
}

impl FieldSpec {
    fn new(key: &str, kind: FieldKind, required: bool) -> Self {
        Self {
            key: key.to_string(),
            kind,
            required,
            default: None,
            extract: Extract::Key(key.to_string()),
        }
    }

    pub fn required(key: &str, kind: FieldKind) -> Self {
        Self::new(key, kind, true)
    }

    pub fn optional(key: &str, kind: FieldKind) -> Self {
        Self::new(key, kind, false)
    }

    /// Read the value from a differently named wire key
    pub fn from_key(mut self, wire_key: &str) -> Self {
        self.extract = Extract::Key(wire_key.to_string());
        self
    }

    /// Read the value from a GeoJSON point's coordinate array
    pub fn coordinate(mut self, wire_key: &str, index: usize) -> Self {
        self.extract = Extract::Coordinate {
            key: wire_key.to_string(),
            index,
        };
        self
    }

    pub fn with_default(mut self, value: CleanValue) -> Self {
        self.default = Some(value);
        self
    }

    /// Value used when an optional field is absent or fails coercion
    pub fn missing_value(&self) -> CleanValue {
        self.default
            .clone()
            .unwrap_or_else(|| CleanValue::sentinel(self.kind))
    }
}

/// Rule evaluated across fields after per-field cleaning
#[derive(Debug, Clone, PartialEq)]
pub enum CrossFieldRule {
    /// Drop when every listed field holds a sentinel
    AllEmpty { name: String, fields: Vec<String> },
}

impl CrossFieldRule {
    pub fn all_empty(name: &str, fields: &[&str]) -> Self {
        CrossFieldRule::AllEmpty {
            name: name.to_string(),
            fields: fields.iter().map(|f| f.to_string()).collect(),
        }
    }

    fn fields(&self) -> &[String] {
        match self {
            CrossFieldRule::AllEmpty { fields, .. } => fields,
        }
    }
}

/// A coordinate pair resolved to a postal code
#[derive(Debug, Clone, PartialEq)]
pub struct PointLookup {
    pub latitude: String,
    pub longitude: String,
    /// Key of the derived field
    pub output: String,
    pub required: bool,
}

impl PointLookup {
    pub fn required(latitude: &str, longitude: &str, output: &str) -> Self {
        Self {
            latitude: latitude.to_string(),
            longitude: longitude.to_string(),
            output: output.to_string(),
            required: true,
        }
    }

    pub fn optional(latitude: &str, longitude: &str, output: &str) -> Self {
        Self {
            required: false,
            ..Self::required(latitude, longitude, output)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct EnrichmentSpec {
    pub lookups: Vec<PointLookup>,
    /// Fields kept in the enriched record; derived fields are always kept
    pub projection: Option<Vec<String>>,
}

impl EnrichmentSpec {
    pub fn is_identity(&self) -> bool {
        self.lookups.is_empty() && self.projection.is_none()
    }
}

/// How often a dataset is fetched
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Refresh {
    /// Static reference data, fetched until exhausted once
    Once,
    /// Polled every fetch round
    Recurring,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DatasetEndpoint {
    /// Socrata dataset identifier, e.g. `wrvz-psew`
    pub id: String,
    pub refresh: Refresh,
}

/// Immutable field contract for one logical source
#[derive(Debug, Clone, PartialEq)]
pub struct SourceSchema {
    pub name: String,
    pub fields: Vec<FieldSpec>,
    pub rules: Vec<CrossFieldRule>,
    pub enrichment: EnrichmentSpec,
    pub dataset: Option<DatasetEndpoint>,
}

impl SourceSchema {
    pub fn builder(name: &str) -> SourceSchemaBuilder {
        SourceSchemaBuilder {
            schema: SourceSchema {
                name: name.to_string(),
                fields: Vec::new(),
                rules: Vec::new(),
                enrichment: EnrichmentSpec::default(),
                dataset: None,
            },
        }
    }

    pub fn field(&self, key: &str) -> Option<&FieldSpec> {
        self.fields.iter().find(|f| f.key == key)
    }

    pub fn field_keys(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|f| f.key.as_str())
    }

    /// Check structural invariants
    ///
    /// Keys are unique, at least one field is required, and every field named
    /// by a rule, lookup or projection exists.
    pub fn validate(&self) -> PipelineResult<()> {
        let mut seen = HashSet::new();
        for field in &self.fields {
            if !seen.insert(field.key.as_str()) {
                return Err(PipelineError::invalid_schema(
                    &self.name,
                    format!("duplicate field key '{}'", field.key),
                ));
            }
        }

        if !self.fields.iter().any(|f| f.required) {
            return Err(PipelineError::invalid_schema(
                &self.name,
                "at least one field must be required",
            ));
        }

        let referenced = self
            .rules
            .iter()
            .flat_map(|r| r.fields().iter())
            .chain(
                self.enrichment
                    .lookups
                    .iter()
                    .flat_map(|l| [&l.latitude, &l.longitude]),
            )
            .chain(self.enrichment.projection.iter().flatten());

        for key in referenced {
            if !seen.contains(key.as_str()) {
                return Err(PipelineError::invalid_schema(
                    &self.name,
                    format!("unknown field '{}' referenced", key),
                ));
            }
        }

        for lookup in &self.enrichment.lookups {
            if seen.contains(lookup.output.as_str()) {
                return Err(PipelineError::invalid_schema(
                    &self.name,
                    format!("lookup output '{}' shadows a field", lookup.output),
                ));
            }
        }

        Ok(())
    }
}

pub struct SourceSchemaBuilder {
    schema: SourceSchema,
}

impl SourceSchemaBuilder {
    pub fn field(mut self, field: FieldSpec) -> Self {
        self.schema.fields.push(field);
        self
    }

    pub fn fields(mut self, fields: impl IntoIterator<Item = FieldSpec>) -> Self {
        self.schema.fields.extend(fields);
        self
    }

    pub fn rule(mut self, rule: CrossFieldRule) -> Self {
        self.schema.rules.push(rule);
        self
    }

    pub fn lookup(mut self, lookup: PointLookup) -> Self {
        self.schema.enrichment.lookups.push(lookup);
        self
    }

    pub fn project(mut self, keep: &[&str]) -> Self {
        self.schema.enrichment.projection = Some(keep.iter().map(|k| k.to_string()).collect());
        self
    }

    pub fn dataset(mut self, id: &str, refresh: Refresh) -> Self {
        self.schema.dataset = Some(DatasetEndpoint {
            id: id.to_string(),
            refresh,
        });
        self
    }

    pub fn build(self) -> PipelineResult<SourceSchema> {
        self.schema.validate()?;
        Ok(self.schema)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_duplicate_keys_rejected() {
        let err = SourceSchema::builder("dupes")
            .field(FieldSpec::required("id", FieldKind::String))
            .field(FieldSpec::optional("id", FieldKind::Int))
            .build()
            .unwrap_err();
        assert!(matches!(err, PipelineError::InvalidSchema { ref reason, .. } if reason.contains("duplicate")));
    }

    #[test]
    fn test_schema_needs_a_required_field() {
        let err = SourceSchema::builder("lax")
            .field(FieldSpec::optional("id", FieldKind::String))
            .build()
            .unwrap_err();
        assert!(matches!(err, PipelineError::InvalidSchema { .. }));
    }

    #[test]
    fn test_lookup_must_reference_known_fields() {
        let err = SourceSchema::builder("geo")
            .field(FieldSpec::required("lat", FieldKind::Float))
            .lookup(PointLookup::required("lat", "lon", "zipcode"))
            .build()
            .unwrap_err();
        assert!(matches!(err, PipelineError::InvalidSchema { ref reason, .. } if reason.contains("'lon'")));
    }

    #[test]
    fn test_missing_value_uses_default_over_sentinel() {
        let plain = FieldSpec::optional("rank", FieldKind::Int);
        assert_eq!(plain.missing_value(), CleanValue::Int(-1));

        let defaulted = FieldSpec::optional("status", FieldKind::String)
            .with_default(CleanValue::Str("UNKNOWN".into()));
        assert_eq!(defaulted.missing_value(), CleanValue::Str("UNKNOWN".into()));
    }

    #[test]
    fn test_extractors() {
        let renamed = FieldSpec::required("community_area_number", FieldKind::String).from_key("ca");
        assert_eq!(renamed.extract, Extract::Key("ca".into()));

        let lat = FieldSpec::required("latitude", FieldKind::Float).coordinate("location", 1);
        assert_eq!(
            lat.extract,
            Extract::Coordinate {
                key: "location".into(),
                index: 1
            }
        );
    }
}
