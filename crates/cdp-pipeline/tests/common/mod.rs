//! Shared fixtures for pipeline integration tests
//!
//! - in-memory collaborators: a canned geocoder and a transport that fails on demand
//! - a PostgreSQL container with migrations applied, for the `requires Docker` tests
//! - record fixtures for the built-in sources

#![allow(dead_code, clippy::unwrap_used, clippy::expect_used)]

use anyhow::{Context, Result};
use async_trait::async_trait;
use cdp_pipeline::enrich::{GeocodeCandidate, ReverseGeocoder};
use cdp_pipeline::error::{PipelineResult, TransportError};
use cdp_pipeline::router::{RetryPolicy, RunSummary, StageProcessor};
use cdp_pipeline::transport::{Delivery, MemoryTransport, Transport};
use cdp_pipeline::{SourceSchema, StageRunner};
use serde_json::{json, Value};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use testcontainers::{core::IntoContainerPort, runners::AsyncRunner, ContainerAsync, ImageExt};
use testcontainers_modules::postgres::Postgres;
use tokio_util::sync::CancellationToken;
use tracing::info;

pub fn init_test_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};

    let _ = fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,cdp_pipeline=debug,sqlx=warn,testcontainers=info")),
        )
        .with_test_writer()
        .try_init();
}

// ============================================================================
// In-memory collaborators
// ============================================================================

/// Answers every lookup with the same candidate list
pub struct CannedGeocoder {
    postal_code: Option<String>,
    calls: AtomicUsize,
}

impl CannedGeocoder {
    pub fn resolving(postal_code: &str) -> Arc<Self> {
        Arc::new(Self {
            postal_code: Some(postal_code.to_string()),
            calls: AtomicUsize::new(0),
        })
    }

    /// Zero candidates for every point
    pub fn unresolving() -> Arc<Self> {
        Arc::new(Self {
            postal_code: None,
            calls: AtomicUsize::new(0),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ReverseGeocoder for CannedGeocoder {
    async fn lookup(&self, _latitude: f64, _longitude: f64) -> PipelineResult<Vec<GeocodeCandidate>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .postal_code
            .iter()
            .map(|code| GeocodeCandidate {
                postal_code: Some(code.clone()),
                formatted_address: None,
            })
            .collect())
    }
}

/// Memory transport whose first `n` receive and publish calls fail
pub struct FlakyTransport {
    inner: MemoryTransport,
    receive_failures: AtomicU32,
    publish_failures: AtomicU32,
}

impl FlakyTransport {
    pub fn new(receive_failures: u32, publish_failures: u32) -> Arc<Self> {
        Arc::new(Self {
            inner: MemoryTransport::new(Duration::from_millis(20)),
            receive_failures: AtomicU32::new(receive_failures),
            publish_failures: AtomicU32::new(publish_failures),
        })
    }

    pub fn inner(&self) -> &MemoryTransport {
        &self.inner
    }

    fn take_failure(counter: &AtomicU32) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl Transport for FlakyTransport {
    async fn receive(&self, topic: &str) -> Result<Option<Delivery>, TransportError> {
        if Self::take_failure(&self.receive_failures) {
            return Err(TransportError::Unavailable("broker connection refused".into()));
        }
        self.inner.receive(topic).await
    }

    async fn ack(&self, delivery: &Delivery) -> Result<(), TransportError> {
        self.inner.ack(delivery).await
    }

    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), TransportError> {
        if Self::take_failure(&self.publish_failures) {
            return Err(TransportError::Unavailable("broker connection refused".into()));
        }
        self.inner.publish(topic, payload).await
    }
}

/// Run one `(stage, source)` until its input topic is empty
pub async fn drain_stage(
    schema: &SourceSchema,
    processor: Arc<dyn StageProcessor>,
    transport: Arc<dyn Transport>,
) -> RunSummary {
    StageRunner::new(schema.clone(), processor, transport)
        .with_retry(RetryPolicy::indefinite(Duration::from_millis(10)))
        .exit_when_idle(true)
        .run(CancellationToken::new())
        .await
        .expect("runner failed")
}

pub fn memory_transport() -> Arc<MemoryTransport> {
    Arc::new(MemoryTransport::new(Duration::from_millis(20)))
}

pub fn batch(records: &[Value]) -> Vec<u8> {
    serde_json::to_vec(records).unwrap()
}

// ============================================================================
// Fixtures
// ============================================================================

/// A complete taxi trip as the open-data API returns it
pub fn taxi_trip(trip_id: &str) -> Value {
    json!({
        "trip_id": trip_id,
        "trip_start_timestamp": "2024-01-01T10:00:00.000",
        "trip_end_timestamp": "2024-01-01T10:20:00.000",
        "pickup_centroid_latitude": "41.88",
        "pickup_centroid_longitude": "-87.63",
        "pickup_community_area": "8",
        "dropoff_centroid_latitude": "41.90",
        "dropoff_centroid_longitude": "-87.62",
        "dropoff_community_area": "32",
        "fare": "12.25"
    })
}

pub fn without(mut record: Value, key: &str) -> Value {
    if let Some(object) = record.as_object_mut() {
        object.remove(key);
    }
    record
}

// ============================================================================
// PostgreSQL Test Container
// ============================================================================

pub struct TestPostgres {
    _container: ContainerAsync<Postgres>,
    pool: PgPool,
}

impl TestPostgres {
    /// Start a PostgreSQL container with migrations applied
    pub async fn start() -> Result<Self> {
        info!("Starting PostgreSQL test container...");

        let container = Postgres::default()
            .with_tag("16-alpine")
            .start()
            .await
            .context("Failed to start PostgreSQL container")?;

        let host = container.get_host().await.context("Failed to get container host")?;
        let port = container
            .get_host_port_ipv4(5432.tcp())
            .await
            .context("Failed to get container port")?;

        let connection_string = format!("postgresql://postgres:postgres@{}:{}/postgres", host, port);

        let pool = PgPoolOptions::new()
            .max_connections(5)
            .acquire_timeout(Duration::from_secs(30))
            .connect(&connection_string)
            .await
            .context("Failed to connect to PostgreSQL")?;

        cdp_pipeline::db::run_migrations(&pool)
            .await
            .context("Failed to run migrations")?;

        Ok(Self {
            _container: container,
            pool,
        })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}
