//! Enrichment candidate selection and the bounded concurrent detail fan-out.

use std::time::Duration;

use futures::stream::{self, StreamExt};
use rentwatch_adapters::{DetailFetchError, DetailSource, ScrapeContext};
use rentwatch_core::{DetailRecord, ListingId, ReconciledRecord};
use serde::Serialize;
use tracing::{info, warn};

use crate::table::ReconciledTable;

#[derive(Debug, Clone, Copy)]
pub struct EnrichmentConfig {
    /// Upper bound on in-flight detail fetches.
    pub concurrency: usize,
    /// Per-id deadline; expiry counts as a failure for that id only.
    pub fetch_timeout: Duration,
}

impl Default for EnrichmentConfig {
    fn default() -> Self {
        Self {
            concurrency: 4,
            fetch_timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailedEnrichment {
    pub id: ListingId,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct EnrichmentReport {
    pub selected: Vec<ListingId>,
    pub enriched: Vec<ListingId>,
    /// Selected because an earlier cycle's fetch failed, not because they are new.
    pub retried: Vec<ListingId>,
    pub failed: Vec<FailedEnrichment>,
}

impl EnrichmentReport {
    pub fn failed_ids(&self) -> Vec<ListingId> {
        self.failed.iter().map(|f| f.id).collect()
    }
}

#[derive(Debug, Clone, Default)]
pub struct EnrichmentSelector {
    config: EnrichmentConfig,
}

impl EnrichmentSelector {
    pub fn new(config: EnrichmentConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> EnrichmentConfig {
        self.config
    }

    /// Actionable records plus earlier failures still missing details, in id order.
    pub fn select(&self, table: &ReconciledTable) -> Vec<ListingId> {
        table
            .iter()
            .filter(|r| r.is_actionable() || Self::is_retry(table, r))
            .map(|r| r.id)
            .collect()
    }

    /// An earlier fetch failed and the listing is still in the search results.
    /// Listings that dropped off the results are not fetched again.
    fn is_retry(table: &ReconciledTable, record: &ReconciledRecord) -> bool {
        record.needs_enrichment_retry() && table.was_scraped(record.id)
    }

    /// Fetch details for every selected id and merge them into `table`.
    ///
    /// Failures are collected per id; they never abort the remaining fetches.
    pub async fn enrich(
        &self,
        source: &dyn DetailSource,
        ctx: &ScrapeContext,
        table: &mut ReconciledTable,
    ) -> EnrichmentReport {
        let selected = self.select(table);
        let retried = selected
            .iter()
            .copied()
            .filter(|id| table.get(*id).is_some_and(|r| Self::is_retry(table, r)))
            .collect::<Vec<_>>();
        if selected.is_empty() {
            return EnrichmentReport::default();
        }

        let timeout = self.config.fetch_timeout;
        let outcomes = stream::iter(selected.iter().copied())
            .map(|id| async move {
                let outcome = match tokio::time::timeout(timeout, source.fetch_detail(ctx, id)).await
                {
                    Ok(result) => result,
                    Err(_) => Err(DetailFetchError::Timeout { id, after: timeout }),
                };
                (id, outcome)
            })
            .buffer_unordered(self.config.concurrency.max(1))
            .collect::<Vec<(ListingId, Result<DetailRecord, DetailFetchError>)>>()
            .await;

        let mut enriched = Vec::new();
        let mut failed = Vec::new();
        for (id, outcome) in outcomes {
            match outcome {
                Ok(details) if details.is_empty() => {
                    warn!(run_id = %ctx.run_id, %id, "detail fetch returned no fields");
                    failed.push(FailedEnrichment {
                        id,
                        reason: "detail page yielded no fields".to_string(),
                    });
                }
                Ok(details) => {
                    if table.merge_details(id, details).is_some() {
                        enriched.push(id);
                    }
                }
                Err(err) => {
                    warn!(run_id = %ctx.run_id, %id, error = %err, "detail fetch failed");
                    failed.push(FailedEnrichment {
                        id,
                        reason: err.to_string(),
                    });
                }
            }
        }
        enriched.sort();
        failed.sort_by_key(|f| f.id);

        info!(
            run_id = %ctx.run_id,
            selected = selected.len(),
            enriched = enriched.len(),
            retried = retried.len(),
            failed = failed.len(),
            "enrichment finished"
        );
        EnrichmentReport {
            selected,
            enriched,
            retried,
            failed,
        }
    }
}
