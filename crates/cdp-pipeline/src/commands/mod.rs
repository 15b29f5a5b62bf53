//! Command implementations for the `cdp` binary

use anyhow::Context as _;
use sqlx::PgPool;
use std::sync::Arc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::clean::Cleaner;
use crate::config::{PipelineConfig, TransportKind};
use crate::db::{create_pool, run_migrations};
use crate::enrich::{Enricher, GoogleGeocoder};
use crate::error::PipelineResult;
use crate::fetch::SocrataFetcher;
use crate::persist::{PgRelationStore, Persister};
use crate::router::{
    CleanStage, EnrichStage, PersistStage, RunSummary, Stage, StageProcessor, StageRunner,
};
use crate::schema::{SchemaRegistry, SourceSchema};
use crate::transport::{MemoryTransport, PgQueueTransport, Transport};

type RunnerResult = (String, Stage, PipelineResult<RunSummary>);

/// Print the registered sources
pub fn sources(registry: &SchemaRegistry) {
    println!("{:<28} {:<10} {:<10} {:>6} {:>8}", "SOURCE", "DATASET", "REFRESH", "FIELDS", "LOOKUPS");
    for schema in registry.iter() {
        let (dataset, refresh) = schema
            .dataset
            .as_ref()
            .map(|d| (d.id.as_str(), format!("{:?}", d.refresh).to_lowercase()))
            .unwrap_or(("-", "-".to_string()));
        println!(
            "{:<28} {:<10} {:<10} {:>6} {:>8}",
            schema.name,
            dataset,
            refresh,
            schema.fields.len(),
            schema.enrichment.lookups.len()
        );
    }
}

/// Fetch the selected sources once through the configured transport
pub async fn fetch(
    config: &PipelineConfig,
    registry: &SchemaRegistry,
    sources: &[String],
    cancel: CancellationToken,
) -> anyhow::Result<()> {
    let schemas = select(registry, sources)?;
    let pool = match config.transport.kind {
        TransportKind::Postgres => Some(open_pool(config).await?),
        TransportKind::Memory => {
            warn!("fetching into memory transport; pages are lost when the process exits");
            None
        }
    };
    let transport = build_transport(config, config.transport.kind, pool.as_ref())?;

    let fetcher = SocrataFetcher::new(config.fetch.clone(), transport)?.with_retry(config.retry.clone());
    let summary = fetcher.run(&schemas, &cancel).await;
    info!(pages = summary.pages, records = summary.records, "fetch complete");
    Ok(())
}

/// Run one stage for the selected sources until cancelled
pub async fn stage(
    config: &PipelineConfig,
    registry: &SchemaRegistry,
    stage: Stage,
    sources: &[String],
    until_idle: bool,
    cancel: CancellationToken,
) -> anyhow::Result<()> {
    let schemas = select(registry, sources)?;
    let pool = open_pool(config).await?;
    if config.transport.kind == TransportKind::Memory {
        warn!(stage = %stage, "memory transport only carries messages published by this process");
    }
    let transport = build_transport(config, config.transport.kind, Some(&pool))?;
    let processor = build_processor(config, stage, &pool)?;

    let mut runners = JoinSet::new();
    for schema in schemas {
        let runner = StageRunner::new(schema.clone(), processor.clone(), transport.clone())
            .with_retry(config.retry.clone())
            .exit_when_idle(until_idle);
        spawn_runner(&mut runners, runner, cancel.clone());
    }

    join_runners(runners).await
}

/// Fetch, then run every stage for the selected sources in one process
pub async fn run(
    config: &PipelineConfig,
    registry: &SchemaRegistry,
    transport_kind: TransportKind,
    sources: &[String],
    fetch: bool,
    cancel: CancellationToken,
) -> anyhow::Result<()> {
    let schemas: Vec<SourceSchema> = select(registry, sources)?.into_iter().cloned().collect();
    let pool = open_pool(config).await?;
    let transport = build_transport(config, transport_kind, Some(&pool))?;

    let mut runners = JoinSet::new();
    for stage in Stage::all() {
        let processor = build_processor(config, stage, &pool)?;
        for schema in &schemas {
            let runner = StageRunner::new(schema.clone(), processor.clone(), transport.clone())
                .with_retry(config.retry.clone());
            spawn_runner(&mut runners, runner, cancel.clone());
        }
    }
    info!(transport = %transport_kind, runners = runners.len(), "pipeline started");

    if fetch {
        let fetcher = SocrataFetcher::new(config.fetch.clone(), transport.clone())?
            .with_retry(config.retry.clone());
        let selected: Vec<&SourceSchema> = schemas.iter().collect();
        let summary = fetcher.run(&selected, &cancel).await;
        info!(pages = summary.pages, records = summary.records, "fetch complete, stages keep running");
    }

    join_runners(runners).await
}

fn select<'a>(registry: &'a SchemaRegistry, sources: &[String]) -> PipelineResult<Vec<&'a SourceSchema>> {
    registry.select((!sources.is_empty()).then_some(sources))
}

async fn open_pool(config: &PipelineConfig) -> anyhow::Result<PgPool> {
    let pool = create_pool(&config.database)
        .await
        .context("Failed to connect to database")?;
    run_migrations(&pool).await.context("Failed to run migrations")?;
    Ok(pool)
}

fn build_transport(
    config: &PipelineConfig,
    kind: TransportKind,
    pool: Option<&PgPool>,
) -> anyhow::Result<Arc<dyn Transport>> {
    let transport: Arc<dyn Transport> = match (kind, pool) {
        (TransportKind::Memory, _) => Arc::new(MemoryTransport::default()),
        (TransportKind::Postgres, Some(pool)) => Arc::new(PgQueueTransport::new(
            pool.clone(),
            config.transport.poll_interval,
            config.transport.visibility_timeout,
        )),
        (TransportKind::Postgres, None) => anyhow::bail!("postgres transport requires a database pool"),
    };
    Ok(transport)
}

/// Processor for `stage` wired to production collaborators
pub fn build_processor(
    config: &PipelineConfig,
    stage: Stage,
    pool: &PgPool,
) -> PipelineResult<Arc<dyn StageProcessor>> {
    let processor: Arc<dyn StageProcessor> = match stage {
        Stage::Clean => Arc::new(CleanStage::new(Cleaner::new())),
        Stage::Enrich => {
            let geocoder = GoogleGeocoder::new(
                config.geocoder.base_url.clone(),
                config.geocoder.api_key.clone(),
                config.geocoder.timeout,
            )?;
            Arc::new(EnrichStage::new(Enricher::new(Arc::new(geocoder), config.geocoder.timeout)))
        }
        Stage::Persist => {
            let store = PgRelationStore::new(pool.clone());
            Arc::new(PersistStage::new(Persister::new(Arc::new(store), config.persist_timeout)))
        }
    };
    Ok(processor)
}

fn spawn_runner(runners: &mut JoinSet<RunnerResult>, runner: StageRunner, cancel: CancellationToken) {
    runners.spawn(async move {
        let result = runner.run(cancel).await;
        (runner.source().to_string(), runner.stage(), result)
    });
}

async fn join_runners(mut runners: JoinSet<RunnerResult>) -> anyhow::Result<()> {
    let mut failed = 0;
    while let Some(joined) = runners.join_next().await {
        match joined {
            Ok((source, stage, Ok(summary))) => info!(
                source = %source,
                stage = %stage,
                batches = summary.batches,
                kept = summary.kept,
                dropped = summary.dropped,
                "runner finished"
            ),
            Ok((source, stage, Err(e))) => {
                failed += 1;
                error!(source = %source, stage = %stage, error = %e, "runner stopped on transport failure");
            }
            Err(e) => {
                failed += 1;
                error!(error = %e, "runner task panicked");
            }
        }
    }

    if failed > 0 {
        anyhow::bail!("{} stage runner(s) failed", failed);
    }
    Ok(())
}
