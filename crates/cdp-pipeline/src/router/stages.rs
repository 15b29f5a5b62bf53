//! Per-stage batch processors

use async_trait::async_trait;
use serde_json::Value;

use super::Stage;
use crate::clean::{Cleaner, DropCounter, DropReason};
use crate::enrich::Enricher;
use crate::error::PipelineResult;
use crate::persist::Persister;
use crate::record::{decode_raw_batch, encode_batch, CleanRecord};
use crate::schema::SourceSchema;

/// A payload to publish on the next stage's topic
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outbound {
    pub topic: String,
    pub payload: Vec<u8>,
}

/// What one batch produced
#[derive(Debug, Clone, Default)]
pub struct Processed {
    /// `None` for the final stage and for batches with nothing left
    pub outbound: Option<Outbound>,
    pub received: usize,
    pub kept: usize,
    pub drops: DropCounter,
}

/// Transforms one batch payload for a source
#[async_trait]
pub trait StageProcessor: Send + Sync {
    fn stage(&self) -> Stage;

    async fn process(&self, schema: &SourceSchema, payload: &[u8]) -> PipelineResult<Processed>;
}

/// Decode a cleaned batch, counting elements that are not valid records
fn decode_clean_batch(schema: &SourceSchema, payload: &[u8]) -> PipelineResult<(Vec<CleanRecord>, DropCounter)> {
    let values: Vec<Value> = decode_raw_batch(payload)?;
    let mut drops = DropCounter::new();
    let mut records = Vec::with_capacity(values.len());

    for value in &values {
        match CleanRecord::from_json(schema, value) {
            Some(record) => records.push(record),
            None => drops.record(DropReason::MalformedRecord),
        }
    }

    Ok((records, drops))
}

fn forward(stage: Stage, schema: &SourceSchema, records: &[CleanRecord]) -> PipelineResult<Option<Outbound>> {
    let Some(topic) = stage.output_topic(&schema.name) else {
        return Ok(None);
    };
    if records.is_empty() {
        return Ok(None);
    }
    Ok(Some(Outbound {
        topic,
        payload: encode_batch(records)?,
    }))
}

/// raw -> bronze
#[derive(Debug, Default)]
pub struct CleanStage {
    cleaner: Cleaner,
}

impl CleanStage {
    pub fn new(cleaner: Cleaner) -> Self {
        Self { cleaner }
    }
}

#[async_trait]
impl StageProcessor for CleanStage {
    fn stage(&self) -> Stage {
        Stage::Clean
    }

    async fn process(&self, schema: &SourceSchema, payload: &[u8]) -> PipelineResult<Processed> {
        let batch = decode_raw_batch(payload)?;
        let received = batch.len();
        let outcome = self.cleaner.clean_batch(schema, batch);

        Ok(Processed {
            outbound: forward(Stage::Clean, schema, &outcome.records)?,
            received,
            kept: outcome.records.len(),
            drops: outcome.drops,
        })
    }
}

/// bronze -> silver
pub struct EnrichStage {
    enricher: Enricher,
}

impl EnrichStage {
    pub fn new(enricher: Enricher) -> Self {
        Self { enricher }
    }
}

#[async_trait]
impl StageProcessor for EnrichStage {
    fn stage(&self) -> Stage {
        Stage::Enrich
    }

    async fn process(&self, schema: &SourceSchema, payload: &[u8]) -> PipelineResult<Processed> {
        let (records, mut drops) = decode_clean_batch(schema, payload)?;
        let received = records.len() + drops.total();
        let outcome = self.enricher.enrich_batch(schema, records).await;
        drops.merge(&outcome.drops);

        Ok(Processed {
            outbound: forward(Stage::Enrich, schema, &outcome.records)?,
            received,
            kept: outcome.records.len(),
            drops,
        })
    }
}

/// silver -> relation
pub struct PersistStage {
    persister: Persister,
}

impl PersistStage {
    pub fn new(persister: Persister) -> Self {
        Self { persister }
    }
}

#[async_trait]
impl StageProcessor for PersistStage {
    fn stage(&self) -> Stage {
        Stage::Persist
    }

    async fn process(&self, schema: &SourceSchema, payload: &[u8]) -> PipelineResult<Processed> {
        let (records, drops) = decode_clean_batch(schema, payload)?;
        let received = records.len() + drops.total();
        let outcome = self.persister.persist(&schema.name, &records).await?;

        Ok(Processed {
            outbound: None,
            received,
            kept: outcome.inserted as usize,
            drops,
        })
    }
}
