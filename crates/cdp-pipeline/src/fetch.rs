//! Paged ingestion from the Socrata open-data API
//!
//! Each page of `{base}/resource/{dataset}.json?$limit=N&$offset=M` is
//! published unchanged to `<source>_raw`. `Once` datasets are read until the
//! first empty page. `Recurring` datasets are read the same way every round,
//! resuming at the offset the previous round reached, with a sleep between
//! rounds.

use futures::future::join_all;
use reqwest::Client;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::PipelineResult;
use crate::router::{topic, RetryPolicy, RAW};
use crate::schema::{DatasetEndpoint, Refresh, SourceSchema};
use crate::transport::Transport;

pub const DEFAULT_FETCH_BASE_URL: &str = "https://data.cityofchicago.org";
pub const DEFAULT_PAGE_LIMIT: usize = 500;
pub const DEFAULT_FETCH_ROUNDS: u32 = 20;
pub const DEFAULT_FETCH_INTERVAL: Duration = Duration::from_secs(60);
pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, PartialEq)]
pub struct FetchConfig {
    pub base_url: String,
    pub page_limit: usize,
    /// Rounds for `Recurring` datasets
    pub rounds: u32,
    /// Sleep between rounds
    pub interval: Duration,
    /// Per-request timeout
    pub timeout: Duration,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_FETCH_BASE_URL.to_string(),
            page_limit: DEFAULT_PAGE_LIMIT,
            rounds: DEFAULT_FETCH_ROUNDS,
            interval: DEFAULT_FETCH_INTERVAL,
            timeout: DEFAULT_FETCH_TIMEOUT,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FetchSummary {
    pub pages: usize,
    pub records: usize,
}

impl FetchSummary {
    fn add(&mut self, other: FetchSummary) {
        self.pages += other.pages;
        self.records += other.records;
    }
}

pub struct SocrataFetcher {
    client: Client,
    config: FetchConfig,
    transport: Arc<dyn Transport>,
    retry: RetryPolicy,
}

impl SocrataFetcher {
    pub fn new(config: FetchConfig, transport: Arc<dyn Transport>) -> PipelineResult<Self> {
        let client = Client::builder().timeout(config.timeout).build()?;
        Ok(Self {
            client,
            config: FetchConfig {
                base_url: config.base_url.trim_end_matches('/').to_string(),
                ..config
            },
            transport,
            retry: RetryPolicy::default(),
        })
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// One page of a dataset
    pub async fn fetch_page(&self, dataset_id: &str, offset: usize) -> PipelineResult<Vec<Value>> {
        let url = format!("{}/resource/{}.json", self.config.base_url, dataset_id);
        let page: Vec<Value> = self
            .client
            .get(&url)
            .query(&[("$limit", self.config.page_limit), ("$offset", offset)])
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(page)
    }

    /// Fetch every source concurrently
    ///
    /// A failing source is logged and does not stop the others.
    pub async fn run(&self, schemas: &[&SourceSchema], cancel: &CancellationToken) -> FetchSummary {
        let results = join_all(schemas.iter().copied().map(|schema| async move {
            (schema.name.as_str(), self.fetch_source(schema, cancel).await)
        }))
        .await;

        let mut total = FetchSummary::default();
        for (source, result) in results {
            match result {
                Ok(summary) => total.add(summary),
                Err(e) => error!(source, error = %e, "fetch failed"),
            }
        }
        total
    }

    pub async fn fetch_source(
        &self,
        schema: &SourceSchema,
        cancel: &CancellationToken,
    ) -> PipelineResult<FetchSummary> {
        let Some(dataset) = &schema.dataset else {
            warn!(source = %schema.name, "source has no dataset endpoint, skipping fetch");
            return Ok(FetchSummary::default());
        };

        let mut offset = 0;
        let summary = match dataset.refresh {
            Refresh::Once => self.drain_from(schema, dataset, &mut offset, cancel).await?,
            Refresh::Recurring => {
                let mut summary = FetchSummary::default();
                for round in 1..=self.config.rounds {
                    match self.drain_from(schema, dataset, &mut offset, cancel).await {
                        Ok(fetched) => summary.add(fetched),
                        Err(e) => warn!(source = %schema.name, round, error = %e, "fetch round failed"),
                    }
                    if round == self.config.rounds {
                        break;
                    }
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = tokio::time::sleep(self.config.interval) => {}
                    }
                }
                summary
            }
        };

        info!(
            source = %schema.name,
            dataset = %dataset.id,
            pages = summary.pages,
            records = summary.records,
            "fetch finished"
        );
        Ok(summary)
    }

    /// Publish pages from `offset` until an empty page, advancing `offset`
    async fn drain_from(
        &self,
        schema: &SourceSchema,
        dataset: &DatasetEndpoint,
        offset: &mut usize,
        cancel: &CancellationToken,
    ) -> PipelineResult<FetchSummary> {
        let raw_topic = topic(&schema.name, RAW);
        let transport = &self.transport;
        let mut summary = FetchSummary::default();

        while !cancel.is_cancelled() {
            let page = self.fetch_page(&dataset.id, *offset).await?;
            if page.is_empty() {
                break;
            }

            let payload = serde_json::to_vec(&page)?;
            let (topic, payload) = (raw_topic.as_str(), &payload);
            self.retry
                .retry("publish", cancel, move || transport.publish(topic, payload.clone()))
                .await?;

            debug!(source = %schema.name, offset = *offset, records = page.len(), "page published");
            summary.pages += 1;
            summary.records += page.len();
            *offset += page.len();
        }

        Ok(summary)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::schema::{FieldKind, FieldSpec};
    use crate::transport::MemoryTransport;
    use serde_json::json;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn schema(refresh: Refresh) -> SourceSchema {
        SourceSchema::builder("widgets")
            .field(FieldSpec::required("id", FieldKind::String))
            .dataset("abcd-1234", refresh)
            .build()
            .unwrap()
    }

    fn config(server: &MockServer) -> FetchConfig {
        FetchConfig {
            base_url: server.uri(),
            page_limit: 2,
            rounds: 2,
            interval: Duration::from_millis(10),
            timeout: Duration::from_secs(5),
        }
    }

    async fn mount_page(server: &MockServer, offset: &str, body: Value) {
        Mock::given(method("GET"))
            .and(path("/resource/abcd-1234.json"))
            .and(query_param("$limit", "2"))
            .and(query_param("$offset", offset))
            .respond_with(ResponseTemplate::new(200).set_body_json(body))
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn test_once_source_pages_until_empty() {
        let server = MockServer::start().await;
        mount_page(&server, "0", json!([{"id": "1"}, {"id": "2"}])).await;
        mount_page(&server, "2", json!([{"id": "3"}])).await;
        mount_page(&server, "3", json!([])).await;

        let transport = Arc::new(MemoryTransport::default());
        let fetcher = SocrataFetcher::new(config(&server), transport.clone()).unwrap();
        let summary = fetcher
            .fetch_source(&schema(Refresh::Once), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(summary, FetchSummary { pages: 2, records: 3 });
        let pages = transport.drain("widgets_raw").await;
        assert_eq!(pages.len(), 2);
        let first: Value = serde_json::from_slice(&pages[0]).unwrap();
        assert_eq!(first, json!([{"id": "1"}, {"id": "2"}]));
    }

    #[tokio::test]
    async fn test_recurring_source_resumes_offset() {
        let server = MockServer::start().await;
        mount_page(&server, "0", json!([{"id": "1"}])).await;
        mount_page(&server, "1", json!([])).await;

        let transport = Arc::new(MemoryTransport::default());
        let fetcher = SocrataFetcher::new(config(&server), transport.clone()).unwrap();
        let summary = fetcher
            .fetch_source(&schema(Refresh::Recurring), &CancellationToken::new())
            .await
            .unwrap();

        // the second round starts at offset 1 and finds nothing new
        assert_eq!(summary, FetchSummary { pages: 1, records: 1 });
        assert_eq!(transport.pending("widgets_raw").await, 1);
    }

    #[tokio::test]
    async fn test_http_error_fails_once_source() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let transport = Arc::new(MemoryTransport::default());
        let fetcher = SocrataFetcher::new(config(&server), transport).unwrap();
        let err = fetcher
            .fetch_source(&schema(Refresh::Once), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, crate::error::PipelineError::Http(_)));
    }

    #[tokio::test]
    async fn test_source_without_dataset_is_skipped() {
        let schema = SourceSchema::builder("local")
            .field(FieldSpec::required("id", FieldKind::String))
            .build()
            .unwrap();
        let fetcher =
            SocrataFetcher::new(FetchConfig::default(), Arc::new(MemoryTransport::default())).unwrap();

        let summary = fetcher.run(&[&schema], &CancellationToken::new()).await;
        assert_eq!(summary, FetchSummary::default());
    }
}
