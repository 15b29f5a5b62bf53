//! Source schema registry

use crate::error::{PipelineError, PipelineResult};
use crate::schema::{sources, SourceSchema};

/// Read-only lookup of registered source schemas
#[derive(Debug, Clone)]
pub struct SchemaRegistry {
    schemas: Vec<SourceSchema>,
}

impl SchemaRegistry {
    /// Build a registry, validating each schema and rejecting duplicate names
    pub fn new(schemas: Vec<SourceSchema>) -> PipelineResult<Self> {
        for (i, schema) in schemas.iter().enumerate() {
            schema.validate()?;
            if schemas[..i].iter().any(|s| s.name == schema.name) {
                return Err(PipelineError::invalid_schema(
                    &schema.name,
                    "source registered twice",
                ));
            }
        }
        Ok(Self { schemas })
    }

    /// Registry of the seven Chicago open-data sources
    pub fn builtin() -> PipelineResult<Self> {
        Self::new(sources::all()?)
    }

    pub fn get(&self, name: &str) -> PipelineResult<&SourceSchema> {
        self.schemas
            .iter()
            .find(|s| s.name == name)
            .ok_or_else(|| PipelineError::UnknownSource(name.to_string()))
    }

    /// Registered source names in registration order
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.schemas.iter().map(|s| s.name.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = &SourceSchema> {
        self.schemas.iter()
    }

    /// Resolve an optional selection of names; `None` selects every source
    pub fn select(&self, names: Option<&[String]>) -> PipelineResult<Vec<&SourceSchema>> {
        match names {
            None => Ok(self.schemas.iter().collect()),
            Some(names) => names.iter().map(|n| self.get(n)).collect(),
        }
    }
}
