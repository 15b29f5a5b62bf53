//! Stage routing
//!
//! Each `(stage, source)` pair is a consume-process-publish loop over named
//! topics:
//!
//! | stage     | input            | output            |
//! |-----------|------------------|-------------------|
//! | `clean`   | `<source>_raw`   | `<source>_bronze` |
//! | `enrich`  | `<source>_bronze`| `<source>_silver` |
//! | `persist` | `<source>_silver`| relation `<source>` |
//!
//! Deliveries are acknowledged only after processing and any publish have
//! finished, so a crash between the two re-delivers the batch.

pub mod retry;
pub mod stages;

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::error::{PipelineError, PipelineResult, TransportError};
use crate::schema::SourceSchema;
use crate::transport::{Delivery, Transport};

pub use retry::{Backoff, RetryPolicy, DEFAULT_RETRY_INTERVAL};
pub use stages::{CleanStage, EnrichStage, Outbound, PersistStage, Processed, StageProcessor};

pub const RAW: &str = "raw";
pub const BRONZE: &str = "bronze";
pub const SILVER: &str = "silver";

/// `<source>_<suffix>`
pub fn topic(source: &str, suffix: &str) -> String {
    format!("{}_{}", source, suffix)
}

/// Source name of a topic carrying `suffix`
pub fn source_from_topic<'a>(topic: &'a str, suffix: &str) -> Option<&'a str> {
    topic
        .strip_suffix(suffix)?
        .strip_suffix('_')
        .filter(|source| !source.is_empty())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, clap::ValueEnum)]
pub enum Stage {
    Clean,
    Enrich,
    Persist,
}

impl Stage {
    pub fn all() -> [Stage; 3] {
        [Stage::Clean, Stage::Enrich, Stage::Persist]
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Clean => "clean",
            Stage::Enrich => "enrich",
            Stage::Persist => "persist",
        }
    }

    pub fn input_suffix(&self) -> &'static str {
        match self {
            Stage::Clean => RAW,
            Stage::Enrich => BRONZE,
            Stage::Persist => SILVER,
        }
    }

    pub fn output_suffix(&self) -> Option<&'static str> {
        match self {
            Stage::Clean => Some(BRONZE),
            Stage::Enrich => Some(SILVER),
            Stage::Persist => None,
        }
    }

    pub fn input_topic(&self, source: &str) -> String {
        topic(source, self.input_suffix())
    }

    /// `None` for the stage that writes to the relational store
    pub fn output_topic(&self, source: &str) -> Option<String> {
        self.output_suffix().map(|suffix| topic(source, suffix))
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Stage {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "clean" => Ok(Stage::Clean),
            "enrich" => Ok(Stage::Enrich),
            "persist" => Ok(Stage::Persist),
            other => Err(PipelineError::config(format!("unknown stage '{}'", other))),
        }
    }
}

/// Totals over one runner's lifetime
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub batches: usize,
    pub failed: usize,
    pub received: usize,
    pub kept: usize,
    pub dropped: usize,
}

/// Consume-process-publish loop for one `(stage, source)`
pub struct StageRunner {
    schema: SourceSchema,
    processor: Arc<dyn StageProcessor>,
    transport: Arc<dyn Transport>,
    retry: RetryPolicy,
    exit_when_idle: bool,
    instance: Uuid,
}

impl StageRunner {
    pub fn new(
        schema: SourceSchema,
        processor: Arc<dyn StageProcessor>,
        transport: Arc<dyn Transport>,
    ) -> Self {
        Self {
            schema,
            processor,
            transport,
            retry: RetryPolicy::default(),
            exit_when_idle: false,
            instance: Uuid::new_v4(),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Return once the input topic yields nothing within a poll window
    pub fn exit_when_idle(mut self, exit: bool) -> Self {
        self.exit_when_idle = exit;
        self
    }

    pub fn stage(&self) -> Stage {
        self.processor.stage()
    }

    pub fn source(&self) -> &str {
        &self.schema.name
    }

    /// Run until `cancel` fires
    ///
    /// Returns an error only when a transport call exhausts its retries.
    /// Cancellation during a retry is a clean stop that leaves the delivery
    /// unacknowledged. Batch processing failures are logged and the delivery
    /// is acknowledged.
    pub async fn run(&self, cancel: CancellationToken) -> PipelineResult<RunSummary> {
        let stage = self.stage();
        let input = stage.input_topic(&self.schema.name);
        let mut summary = RunSummary::default();

        info!(
            source = %self.schema.name,
            stage = %stage,
            topic = %input,
            instance = %self.instance,
            "stage runner started"
        );

        let transport = &self.transport;
        let topic = input.as_str();

        while !cancel.is_cancelled() {
            let received = tokio::select! {
                _ = cancel.cancelled() => break,
                received = self.retry.retry("receive", &cancel, move || transport.receive(topic)) => received,
            };

            let delivery = match received {
                Ok(Some(delivery)) => delivery,
                Ok(None) if self.exit_when_idle => break,
                Ok(None) => continue,
                Err(_) if cancel.is_cancelled() => break,
                Err(e) => return Err(e.into()),
            };

            self.handle(&delivery, &cancel, &mut summary).await?;
        }

        info!(
            source = %self.schema.name,
            stage = %stage,
            batches = summary.batches,
            failed = summary.failed,
            kept = summary.kept,
            dropped = summary.dropped,
            "stage runner stopped"
        );

        Ok(summary)
    }

    async fn handle(
        &self,
        delivery: &Delivery,
        cancel: &CancellationToken,
        summary: &mut RunSummary,
    ) -> PipelineResult<()> {
        let stage = self.stage();
        let transport = &self.transport;
        summary.batches += 1;

        match self.processor.process(&self.schema, &delivery.payload).await {
            Ok(processed) => {
                if let Some(outbound) = processed.outbound {
                    let Outbound { topic, payload } = outbound;
                    let (topic, payload) = (topic.as_str(), &payload);
                    let published = self
                        .retry
                        .retry("publish", cancel, move || transport.publish(topic, payload.clone()))
                        .await;
                    if self.stopped_unacked(published, cancel, delivery)? {
                        return Ok(());
                    }
                    debug!(source = %self.schema.name, stage = %stage, topic = %topic, "batch published");
                }

                summary.received += processed.received;
                summary.kept += processed.kept;
                summary.dropped += processed.drops.total();

                info!(
                    source = %self.schema.name,
                    stage = %stage,
                    received = processed.received,
                    kept = processed.kept,
                    dropped = processed.drops.total(),
                    drops = %processed.drops,
                    "batch processed"
                );
            }
            Err(e) => {
                summary.failed += 1;
                error!(
                    source = %self.schema.name,
                    stage = %stage,
                    delivery = delivery.id,
                    error = %e,
                    "batch failed"
                );
            }
        }

        let acked = self
            .retry
            .retry("ack", cancel, move || transport.ack(delivery))
            .await;
        self.stopped_unacked(acked, cancel, delivery)?;

        Ok(())
    }

    /// `Ok(true)` when a transport call gave up because of cancellation
    ///
    /// The delivery stays unacknowledged and is redelivered to the next
    /// consumer. Exhausted retries without cancellation are still an error.
    fn stopped_unacked(
        &self,
        result: Result<(), TransportError>,
        cancel: &CancellationToken,
        delivery: &Delivery,
    ) -> PipelineResult<bool> {
        match result {
            Ok(()) => Ok(false),
            Err(e) if cancel.is_cancelled() => {
                warn!(
                    source = %self.schema.name,
                    stage = %self.stage(),
                    delivery = delivery.id,
                    error = %e,
                    "stopped mid-retry, delivery left unacknowledged"
                );
                Ok(true)
            }
            Err(e) => Err(e.into()),
        }
    }
}
