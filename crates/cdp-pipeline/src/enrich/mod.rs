//! Point-lookup enrichment
//!
//! For each [`PointLookup`] a schema declares, the coordinate pair is sent to a
//! [`ReverseGeocoder`] and the first candidate's postal code is appended to the
//! record under the lookup's output key. Lookups are evaluated independently.
//! A required lookup that does not resolve drops the record; an optional one
//! yields an empty string.

pub mod geocoder;

use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::clean::{DropCounter, DropReason};
use crate::record::{CleanRecord, CleanValue, EnrichedRecord};
use crate::schema::{PointLookup, SourceSchema};

pub use geocoder::{GeocodeCandidate, GoogleGeocoder, ReverseGeocoder};

/// Default bound on a single lookup call
pub const DEFAULT_LOOKUP_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Default)]
pub struct EnrichOutcome {
    pub records: Vec<EnrichedRecord>,
    pub drops: DropCounter,
}

pub struct Enricher {
    geocoder: Arc<dyn ReverseGeocoder>,
    lookup_timeout: Duration,
}

impl Enricher {
    pub fn new(geocoder: Arc<dyn ReverseGeocoder>, lookup_timeout: Duration) -> Self {
        Self {
            geocoder,
            lookup_timeout,
        }
    }

    pub async fn enrich_batch(&self, schema: &SourceSchema, records: Vec<CleanRecord>) -> EnrichOutcome {
        let mut outcome = EnrichOutcome {
            records: Vec::with_capacity(records.len()),
            drops: DropCounter::new(),
        };

        for record in &records {
            match self.enrich(schema, record).await {
                Ok(enriched) => outcome.records.push(enriched),
                Err(reason) => {
                    debug!(source = %schema.name, reason = %reason, "record dropped");
                    outcome.drops.record(reason);
                }
            }
        }

        outcome
    }

    /// Build the enriched form of `record`; the input is left untouched
    pub async fn enrich(
        &self,
        schema: &SourceSchema,
        record: &CleanRecord,
    ) -> Result<EnrichedRecord, DropReason> {
        let spec = &schema.enrichment;
        if spec.is_identity() {
            return Ok(record.clone());
        }

        let mut derived = Vec::with_capacity(spec.lookups.len());
        for lookup in &spec.lookups {
            match self.resolve(schema, lookup, record).await {
                Some(postal_code) => derived.push((lookup.output.clone(), CleanValue::Str(postal_code))),
                None if lookup.required => return Err(DropReason::LookupUnresolved(lookup.output.clone())),
                None => derived.push((lookup.output.clone(), CleanValue::Str(String::new()))),
            }
        }

        let base = match &spec.projection {
            Some(keep) => record.projected(keep),
            None => record.clone(),
        };
        Ok(base.extended(derived))
    }

    /// `None` when the pair is unusable or the lookup fails, times out, or is empty
    async fn resolve(
        &self,
        schema: &SourceSchema,
        lookup: &PointLookup,
        record: &CleanRecord,
    ) -> Option<String> {
        let coordinate = |key: &str| {
            record
                .get(key)
                .filter(|v| !v.is_sentinel())
                .and_then(CleanValue::as_f64)
        };
        let (latitude, longitude) = (coordinate(&lookup.latitude)?, coordinate(&lookup.longitude)?);

        match tokio::time::timeout(self.lookup_timeout, self.geocoder.lookup(latitude, longitude)).await {
            Ok(Ok(candidates)) => candidates
                .into_iter()
                .next()
                .map(|c| c.postal_code.unwrap_or_default()),
            Ok(Err(e)) => {
                warn!(source = %schema.name, output = %lookup.output, error = %e, "lookup failed");
                None
            }
            Err(_) => {
                warn!(
                    source = %schema.name,
                    output = %lookup.output,
                    timeout_ms = self.lookup_timeout.as_millis() as u64,
                    "lookup timed out"
                );
                None
            }
        }
    }
}
