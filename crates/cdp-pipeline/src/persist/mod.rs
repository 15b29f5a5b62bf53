//! Schema inference and batch persistence
//!
//! Column types come from the first record of a batch only. The relation is
//! created if absent and never altered afterwards, so the first batch a
//! relation sees fixes its columns for good. Sentinel values become SQL `NULL`
//! on the way in; a genuine `-1` or empty string is nulled the same way.
//!
//! Inserts are best effort. When a statement is split for the bind limit,
//! earlier chunks stay committed if a later one fails.

pub mod postgres;
pub mod store;

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use crate::error::{PipelineError, PipelineResult};
use crate::record::{format_timestamp, CleanRecord, CleanValue};

pub use postgres::PgRelationStore;
pub use store::{MemoryRelationStore, RelationState, RelationStore};

/// Default bound on a single store call
pub const DEFAULT_PERSIST_TIMEOUT: Duration = Duration::from_secs(30);

/// Persisted column type
///
/// In PostgreSQL `INTEGER` is 32-bit and `REAL` is single precision, while
/// values are bound as `i64` and `f64`. The server narrows them on insert:
/// a REAL keeps about 6 significant digits, so coordinates are rounded, and
/// an integer outside the `i32` range fails the whole insert statement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    Integer,
    Real,
    Text,
    Boolean,
}

impl ColumnType {
    pub fn as_sql(&self) -> &'static str {
        match self {
            ColumnType::Integer => "INTEGER",
            ColumnType::Real => "REAL",
            ColumnType::Text => "TEXT",
            ColumnType::Boolean => "BOOLEAN",
        }
    }

    fn of(value: &CleanValue) -> Self {
        match value {
            CleanValue::Int(_) => ColumnType::Integer,
            CleanValue::Float(_) => ColumnType::Real,
            CleanValue::Bool(_) => ColumnType::Boolean,
            CleanValue::Str(_) | CleanValue::Timestamp(_) | CleanValue::Null => ColumnType::Text,
        }
    }
}

/// Ordered column/type list inferred from a representative record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InferredSchema {
    pub columns: Vec<(String, ColumnType)>,
}

impl InferredSchema {
    pub fn column_names(&self) -> Vec<String> {
        self.columns.iter().map(|(name, _)| name.clone()).collect()
    }
}

/// Infer column types from one record
pub fn infer_schema(record: &CleanRecord) -> InferredSchema {
    InferredSchema {
        columns: record
            .iter()
            .map(|(key, value)| (key.to_string(), ColumnType::of(value)))
            .collect(),
    }
}

/// A bind value typed for its target column; `None` is SQL `NULL`
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Integer(Option<i64>),
    Real(Option<f64>),
    Text(Option<String>),
    Boolean(Option<bool>),
}

impl SqlValue {
    pub fn null(column: ColumnType) -> Self {
        match column {
            ColumnType::Integer => SqlValue::Integer(None),
            ColumnType::Real => SqlValue::Real(None),
            ColumnType::Text => SqlValue::Text(None),
            ColumnType::Boolean => SqlValue::Boolean(None),
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(
            self,
            SqlValue::Integer(None) | SqlValue::Real(None) | SqlValue::Text(None) | SqlValue::Boolean(None)
        )
    }

    /// Convert a cleaned value for a column, resolving sentinels to `NULL`
    ///
    /// Returns `None` when the value has no representation in the column type.
    pub fn convert(value: &CleanValue, column: ColumnType) -> Option<Self> {
        if value.is_sentinel() || *value == CleanValue::Null {
            return Some(SqlValue::null(column));
        }

        match (column, value) {
            (ColumnType::Integer, CleanValue::Int(i)) => Some(SqlValue::Integer(Some(*i))),
            (ColumnType::Real, CleanValue::Float(f)) => Some(SqlValue::Real(Some(*f))),
            (ColumnType::Real, CleanValue::Int(i)) => Some(SqlValue::Real(Some(*i as f64))),
            (ColumnType::Boolean, CleanValue::Bool(b)) => Some(SqlValue::Boolean(Some(*b))),
            (ColumnType::Text, CleanValue::Str(s)) => Some(SqlValue::Text(Some(s.clone()))),
            (ColumnType::Text, CleanValue::Int(i)) => Some(SqlValue::Text(Some(i.to_string()))),
            (ColumnType::Text, CleanValue::Float(f)) => Some(SqlValue::Text(Some(f.to_string()))),
            (ColumnType::Text, CleanValue::Bool(b)) => Some(SqlValue::Text(Some(b.to_string()))),
            (ColumnType::Text, CleanValue::Timestamp(ts)) => Some(SqlValue::Text(Some(format_timestamp(ts)))),
            _ => None,
        }
    }
}

/// Relation names and column names are restricted to `[a-z0-9_]`
pub fn validate_identifier(identifier: &str) -> bool {
    !identifier.is_empty()
        && identifier.len() <= 63
        && !identifier.starts_with(|c: char| c.is_ascii_digit())
        && identifier
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PersistOutcome {
    pub relation: String,
    pub created: bool,
    pub inserted: u64,
}

pub struct Persister {
    store: Arc<dyn RelationStore>,
    timeout: Duration,
}

impl Persister {
    pub fn new(store: Arc<dyn RelationStore>, timeout: Duration) -> Self {
        Self { store, timeout }
    }

    /// Ensure the relation named after `source` exists and append `records`
    pub async fn persist(&self, source: &str, records: &[CleanRecord]) -> PipelineResult<PersistOutcome> {
        let first = records
            .first()
            .ok_or_else(|| PipelineError::EmptyBatch(source.to_string()))?;

        if !validate_identifier(source) {
            return Err(PipelineError::persistence(source, "invalid relation name"));
        }

        let inferred = infer_schema(first);
        if let Some((bad, _)) = inferred.columns.iter().find(|(c, _)| !validate_identifier(c)) {
            return Err(PipelineError::persistence(source, format!("invalid column name '{}'", bad)));
        }

        let state = self
            .bounded("ensure_relation", self.store.ensure_relation(source, &inferred))
            .await?;

        if let Some((missing, _)) = inferred
            .columns
            .iter()
            .find(|(c, _)| state.column_type(c).is_none())
        {
            return Err(PipelineError::column_mismatch(
                source,
                format!("column '{}' is not in the existing relation", missing),
            ));
        }

        let columns = inferred.column_names();
        let rows = self.build_rows(source, &columns, &state, records)?;

        let inserted = self
            .bounded("insert_rows", self.store.insert_rows(source, &columns, rows))
            .await?;

        if state.created {
            info!(relation = %source, columns = columns.len(), "relation created");
        }
        debug!(relation = %source, inserted, "batch persisted");

        Ok(PersistOutcome {
            relation: source.to_string(),
            created: state.created,
            inserted,
        })
    }

    fn build_rows(
        &self,
        source: &str,
        columns: &[String],
        state: &RelationState,
        records: &[CleanRecord],
    ) -> PipelineResult<Vec<Vec<SqlValue>>> {
        let expected: HashSet<&str> = columns.iter().map(String::as_str).collect();

        records
            .iter()
            .enumerate()
            .map(|(index, record)| {
                let keys: HashSet<&str> = record.keys().collect();
                if keys != expected || record.len() != columns.len() {
                    let extra: Vec<&str> = keys.difference(&expected).copied().collect();
                    let absent: Vec<&str> = expected.difference(&keys).copied().collect();
                    return Err(PipelineError::column_mismatch(
                        source,
                        format!(
                            "row {} differs from inferred columns (extra: {:?}, missing: {:?})",
                            index, extra, absent
                        ),
                    ));
                }

                columns
                    .iter()
                    .map(|column| {
                        let column_type = state.column_type(column).unwrap_or(ColumnType::Text);
                        let value = record.get(column).unwrap_or(&CleanValue::Null);
                        SqlValue::convert(value, column_type).ok_or_else(|| {
                            PipelineError::persistence(
                                source,
                                format!(
                                    "row {} column '{}' cannot be stored as {}",
                                    index,
                                    column,
                                    column_type.as_sql()
                                ),
                            )
                        })
                    })
                    .collect()
            })
            .collect()
    }

    async fn bounded<T>(
        &self,
        operation: &'static str,
        call: impl std::future::Future<Output = PipelineResult<T>>,
    ) -> PipelineResult<T> {
        tokio::time::timeout(self.timeout, call)
            .await
            .map_err(|_| PipelineError::Timeout {
                operation,
                after: self.timeout,
            })?
    }
}
