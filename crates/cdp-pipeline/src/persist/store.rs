//! Relational store interface

use async_trait::async_trait;
use std::collections::BTreeMap;
use tokio::sync::Mutex;

use super::{ColumnType, InferredSchema, SqlValue};
use crate::error::{PipelineError, PipelineResult};

/// The relation as it exists after `ensure_relation`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelationState {
    /// True when this call created the relation
    pub created: bool,
    pub columns: Vec<(String, ColumnType)>,
}

impl RelationState {
    pub fn column_type(&self, column: &str) -> Option<ColumnType> {
        self.columns
            .iter()
            .find(|(name, _)| name == column)
            .map(|(_, t)| *t)
    }
}

/// Target store for persisted batches
#[async_trait]
pub trait RelationStore: Send + Sync {
    /// Create the relation with `schema` if absent; never alters an existing one
    async fn ensure_relation(&self, name: &str, schema: &InferredSchema) -> PipelineResult<RelationState>;

    /// Append `rows`, each ordered like `columns`; returns the rows written
    async fn insert_rows(
        &self,
        name: &str,
        columns: &[String],
        rows: Vec<Vec<SqlValue>>,
    ) -> PipelineResult<u64>;
}

#[derive(Debug, Clone, Default)]
struct MemoryRelation {
    columns: Vec<(String, ColumnType)>,
    rows: Vec<Vec<SqlValue>>,
}

/// In-process store for tests and `--transport memory` runs
#[derive(Debug, Default)]
pub struct MemoryRelationStore {
    relations: Mutex<BTreeMap<String, MemoryRelation>>,
}

impl MemoryRelationStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn relation_names(&self) -> Vec<String> {
        self.relations.lock().await.keys().cloned().collect()
    }

    pub async fn columns(&self, name: &str) -> Option<Vec<(String, ColumnType)>> {
        self.relations.lock().await.get(name).map(|r| r.columns.clone())
    }

    /// Stored rows keyed by column name
    pub async fn rows(&self, name: &str) -> Option<Vec<BTreeMap<String, SqlValue>>> {
        let relations = self.relations.lock().await;
        let relation = relations.get(name)?;
        Some(
            relation
                .rows
                .iter()
                .map(|row| {
                    relation
                        .columns
                        .iter()
                        .map(|(c, _)| c.clone())
                        .zip(row.iter().cloned())
                        .collect()
                })
                .collect(),
        )
    }
}

#[async_trait]
impl RelationStore for MemoryRelationStore {
    async fn ensure_relation(&self, name: &str, schema: &InferredSchema) -> PipelineResult<RelationState> {
        let mut relations = self.relations.lock().await;
        let created = !relations.contains_key(name);
        let relation = relations.entry(name.to_string()).or_insert_with(|| MemoryRelation {
            columns: schema.columns.clone(),
            rows: Vec::new(),
        });

        Ok(RelationState {
            created,
            columns: relation.columns.clone(),
        })
    }

    async fn insert_rows(
        &self,
        name: &str,
        columns: &[String],
        rows: Vec<Vec<SqlValue>>,
    ) -> PipelineResult<u64> {
        let mut relations = self.relations.lock().await;
        let relation = relations
            .get_mut(name)
            .ok_or_else(|| PipelineError::persistence(name, "relation does not exist"))?;

        let positions = columns
            .iter()
            .map(|c| {
                relation
                    .columns
                    .iter()
                    .position(|(existing, _)| existing == c)
                    .ok_or_else(|| PipelineError::persistence(name, format!("column '{}' does not exist", c)))
            })
            .collect::<PipelineResult<Vec<usize>>>()?;

        let count = rows.len() as u64;
        for row in rows {
            let mut stored: Vec<SqlValue> = relation.columns.iter().map(|(_, t)| SqlValue::null(*t)).collect();
            for (value, &position) in row.into_iter().zip(&positions) {
                stored[position] = value;
            }
            relation.rows.push(stored);
        }

        Ok(count)
    }
}
