//! One reconciliation cycle per search, plus the optional cron trigger.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rentwatch_adapters::{DetailSource, ListingSource, OpenRentSource, ScrapeContext};
use rentwatch_core::{ListingId, ReconciledRecord, Snapshot};
use rentwatch_storage::{HttpFetcher, JsonFileSnapshotStore, SnapshotStore};
use serde::Serialize;
use tokio::sync::Mutex;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{error, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::classify::reconcile;
use crate::config::{SearchConfig, SyncConfig, WatchConfig};
use crate::enrich::{EnrichmentReport, EnrichmentSelector};
use crate::filter::compile;
use crate::notify::{render_notification, DeliveryReceipt, Notifier, OutboxNotifier};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum DeliveryStatus {
    /// The filtered subset was empty, so nothing was rendered.
    Skipped,
    Delivered(DeliveryReceipt),
    Failed { reason: String },
}

#[derive(Debug, Clone, Serialize)]
pub struct CycleReport {
    pub run_id: Uuid,
    pub search: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub first_run: bool,
    /// The prior snapshot could not be read and the cycle ran as a first run.
    pub snapshot_unavailable: bool,
    pub scraped: usize,
    pub records: usize,
    pub new_listings: usize,
    pub actionable: Vec<ListingId>,
    pub pruned_historical: Vec<ListingId>,
    pub let_agreed_transitions: Vec<ListingId>,
    pub enrichment: EnrichmentReport,
    pub notified: Vec<ListingId>,
    pub delivery: DeliveryStatus,
    pub snapshot_path: String,
    pub snapshot_sha256: String,
}

/// "Nothing to enrich or notify" is a normal outcome, distinct from failure.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "outcome", content = "report", rename_all = "snake_case")]
pub enum CycleOutcome {
    NoActionableResults(CycleReport),
    Completed(CycleReport),
}

impl CycleOutcome {
    pub fn report(&self) -> &CycleReport {
        match self {
            Self::NoActionableResults(report) | Self::Completed(report) => report,
        }
    }

    pub fn is_actionable(&self) -> bool {
        matches!(self, Self::Completed(_))
    }
}

pub struct SearchRun {
    pub search: String,
    pub outcome: Result<CycleOutcome>,
}

pub struct SyncPipeline {
    config: SyncConfig,
    watch: WatchConfig,
    listings: Arc<dyn ListingSource>,
    details: Arc<dyn DetailSource>,
    notifier: Arc<dyn Notifier>,
    stores: BTreeMap<String, Arc<dyn SnapshotStore>>,
    selector: EnrichmentSelector,
    // held for a whole cycle, persistence included
    cycle_lock: Mutex<()>,
}

impl SyncPipeline {
    pub fn new(config: SyncConfig, watch: WatchConfig) -> Result<Self> {
        let http = Arc::new(HttpFetcher::new(config.http_client()).context("building http client")?);
        let source = Arc::new(OpenRentSource::new(http));
        let notifier = Arc::new(OutboxNotifier::new(config.outbox_dir.clone()));
        Ok(Self {
            selector: EnrichmentSelector::new(config.enrichment()),
            config,
            watch,
            listings: source.clone(),
            details: source,
            notifier,
            stores: BTreeMap::new(),
            cycle_lock: Mutex::new(()),
        })
    }

    pub fn with_collaborators(
        mut self,
        listings: Arc<dyn ListingSource>,
        details: Arc<dyn DetailSource>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        self.listings = listings;
        self.details = details;
        self.notifier = notifier;
        self
    }

    /// Use `store` for `search` instead of the JSON file under the snapshot dir.
    pub fn with_store(mut self, search: &str, store: Arc<dyn SnapshotStore>) -> Self {
        self.stores.insert(search.to_string(), store);
        self
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn watch(&self) -> &WatchConfig {
        &self.watch
    }

    fn store_for(&self, search: &str) -> Arc<dyn SnapshotStore> {
        match self.stores.get(search) {
            Some(store) => store.clone(),
            None => Arc::new(JsonFileSnapshotStore::for_search(&self.config.snapshot_dir, search)),
        }
    }

    pub async fn load_snapshot(&self, search: &str) -> Result<Option<Snapshot>> {
        self.store_for(search)
            .load()
            .await
            .with_context(|| format!("loading snapshot for search `{search}`"))
    }

    /// Run every enabled search in config order. One search failing does not stop the rest.
    pub async fn run_all(&self) -> Vec<SearchRun> {
        let mut runs = Vec::new();
        for search in self.watch.enabled_searches() {
            let outcome = self.run_cycle(search).await;
            if let Err(err) = &outcome {
                error!(search = %search.name, error = %format!("{err:#}"), "sync cycle failed");
            }
            runs.push(SearchRun {
                search: search.name.clone(),
                outcome,
            });
        }
        runs
    }

    pub async fn run_search(&self, name: &str) -> Result<CycleOutcome> {
        let search = self
            .watch
            .search(name)
            .with_context(|| format!("no search named `{name}` in config"))?;
        self.run_cycle(search).await
    }

    pub async fn run_cycle(&self, search: &SearchConfig) -> Result<CycleOutcome> {
        let _cycle = self.cycle_lock.lock().await;
        let run_id = Uuid::new_v4();
        let span = info_span!("sync_cycle", %run_id, search = %search.name);
        self.cycle(search, run_id).instrument(span).await
    }

    async fn cycle(&self, search: &SearchConfig, run_id: Uuid) -> Result<CycleOutcome> {
        let started_at = Utc::now();
        let ctx = ScrapeContext {
            run_id,
            observed_at: started_at,
        };
        let store = self.store_for(&search.name);

        let (prior, snapshot_unavailable) = match store.load().await {
            Ok(prior) => (prior, false),
            Err(err) => {
                warn!(error = %err, "prior snapshot unavailable; running as first cycle");
                (None, true)
            }
        };

        let scraped = self
            .listings
            .scrape(&ctx, &search.query)
            .await
            .with_context(|| format!("scraping {} for `{}`", self.listings.source_id(), search.name))?;
        let scraped_count = scraped.len();

        let mut reconciliation =
            reconcile(prior.as_ref(), scraped).context("reconciling scrape against snapshot")?;
        reconciliation
            .table
            .declare_columns(self.details.columns().iter().copied());
        let actionable = reconciliation.actionable_ids();
        info!(
            first_run = reconciliation.first_run,
            scraped = scraped_count,
            records = reconciliation.table.len(),
            actionable = actionable.len(),
            let_agreed = reconciliation.let_agreed_transitions().len(),
            "reconciled"
        );

        let selected = self.selector.select(&reconciliation.table);
        let enrichment = if selected.is_empty() {
            EnrichmentReport::default()
        } else {
            self.selector
                .enrich(self.details.as_ref(), &ctx, &mut reconciliation.table)
                .await
        };

        // new listings, plus earlier fetch failures that were enriched on retry
        let mut candidates: BTreeSet<ListingId> = actionable.iter().copied().collect();
        candidates.extend(
            enrichment
                .retried
                .iter()
                .filter(|id| enrichment.enriched.contains(id)),
        );

        let notify_subset = if candidates.is_empty() {
            Vec::new()
        } else {
            let predicate = compile(self.watch.filters_for(search))
                .with_context(|| format!("compiling filters for `{}`", search.name))?;
            predicate
                .apply_where(&reconciliation.table, |r| candidates.contains(&r.id))
                .with_context(|| format!("evaluating filter `{predicate}`"))?
        };

        let snapshot = reconciliation.table.to_snapshot(run_id, Utc::now());
        let saved = store
            .save(&snapshot)
            .await
            .with_context(|| format!("saving snapshot for `{}`", search.name))?;

        let delivery = self.deliver(search, &notify_subset).await;

        let report = CycleReport {
            run_id,
            search: search.name.clone(),
            started_at,
            finished_at: Utc::now(),
            first_run: reconciliation.first_run,
            snapshot_unavailable,
            scraped: scraped_count,
            records: reconciliation.table.len(),
            new_listings: reconciliation.new_listings(),
            actionable,
            pruned_historical: reconciliation.pruned_historical.clone(),
            let_agreed_transitions: reconciliation.let_agreed_transitions(),
            enrichment,
            notified: notify_subset.iter().map(|r| r.id).collect(),
            delivery,
            snapshot_path: saved.path.display().to_string(),
            snapshot_sha256: saved.content_hash,
        };
        info!(
            notified = report.notified.len(),
            enrichment_failed = report.enrichment.failed.len(),
            "cycle finished"
        );

        if selected.is_empty() {
            Ok(CycleOutcome::NoActionableResults(report))
        } else {
            Ok(CycleOutcome::Completed(report))
        }
    }

    async fn deliver(&self, search: &SearchConfig, subset: &[ReconciledRecord]) -> DeliveryStatus {
        let message = match render_notification(&search.name, &self.watch.notify, subset, Utc::now()) {
            Ok(Some(message)) => message,
            Ok(None) => return DeliveryStatus::Skipped,
            Err(err) => {
                warn!(error = %err, "rendering notification failed");
                return DeliveryStatus::Failed {
                    reason: err.to_string(),
                };
            }
        };
        match self.notifier.deliver(&message).await {
            Ok(receipt) => DeliveryStatus::Delivered(receipt),
            Err(err) => {
                warn!(channel = self.notifier.channel(), error = %err, "notification delivery failed");
                DeliveryStatus::Failed {
                    reason: err.to_string(),
                }
            }
        }
    }

    pub async fn maybe_build_scheduler(self: Arc<Self>) -> Result<Option<JobScheduler>> {
        if !self.config.scheduler_enabled {
            return Ok(None);
        }

        let sched = JobScheduler::new().await.context("creating scheduler")?;
        let cron = self.config.sync_cron.clone();
        let pipeline = self.clone();
        let job = Job::new_async(cron.as_str(), move |_uuid, _l| {
            let pipeline = pipeline.clone();
            Box::pin(async move {
                for run in pipeline.run_all().await {
                    if let Ok(outcome) = run.outcome {
                        info!(
                            search = %run.search,
                            actionable = outcome.is_actionable(),
                            "scheduled cycle done"
                        );
                    }
                }
            })
        })
        .with_context(|| format!("creating scheduler job for cron {cron}"))?;
        sched.add(job).await.context("adding scheduler job")?;
        Ok(Some(sched))
    }
}

pub async fn run_sync_once_from_env() -> Result<Vec<SearchRun>> {
    let config = SyncConfig::from_env();
    let watch = WatchConfig::load(&config.config_path).await?;
    let pipeline = SyncPipeline::new(config, watch)?;
    Ok(pipeline.run_all().await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{
        flat_details, fresh_listing, listing, record, snapshot_of, ts, MockDetailSource,
        RecordingNotifier, ScriptedListingSource,
    };
    use rentwatch_storage::MemorySnapshotStore;

    const WATCH: &str = "searches:\n  - {name: camden, term: Camden}\nfilters:\n  max_rent_per_person: 1000\n";

    fn pipeline(
        listings: Arc<ScriptedListingSource>,
        details: Arc<MockDetailSource>,
        notifier: Arc<RecordingNotifier>,
        store: Arc<MemorySnapshotStore>,
    ) -> SyncPipeline {
        let watch = WatchConfig::from_yaml_str(WATCH).unwrap();
        SyncPipeline::new(SyncConfig::from_vars(|_| None), watch)
            .unwrap()
            .with_collaborators(listings, details, notifier)
            .with_store("camden", store)
    }

    #[tokio::test]
    async fn first_cycle_bootstraps_without_notifying_backlog() {
        let listings = Arc::new(
            ScriptedListingSource::new()
                .then_scrape(vec![listing(1, ts(9)), listing(2, ts(9)), fresh_listing(3, ts(9))]),
        );
        let details = Arc::new(MockDetailSource::new().on_detail(3, flat_details(1800.0, 2, "Euston")));
        let notifier = Arc::new(RecordingNotifier::new());
        let store = Arc::new(MemorySnapshotStore::new(None));
        let pipeline = pipeline(listings, details.clone(), notifier.clone(), store.clone());

        let outcome = pipeline.run_search("camden").await.unwrap();
        let report = outcome.report();
        assert!(outcome.is_actionable());
        assert!(report.first_run);
        assert_eq!(report.actionable, vec![ListingId(3)]);
        assert_eq!(details.calls(), vec![ListingId(3)]);
        assert_eq!(report.notified, vec![ListingId(3)]);
        assert!(matches!(report.delivery, DeliveryStatus::Delivered(_)));
        assert_eq!(notifier.delivered().len(), 1);

        let saved = store.current().await.unwrap();
        assert_eq!(saved.len(), 3);
        assert!(saved.get(ListingId(1)).unwrap().historical);
        assert!(saved.get(ListingId(3)).unwrap().is_enriched());
    }

    #[tokio::test]
    async fn quiet_cycle_still_persists_and_signals_no_results() {
        let listings = Arc::new(ScriptedListingSource::new().then_scrape(vec![listing(1, ts(12))]));
        let details = Arc::new(MockDetailSource::new());
        let notifier = Arc::new(RecordingNotifier::new());
        let mut known = record(1);
        known.details = flat_details(900.0, 1, "Angel");
        let store = Arc::new(MemorySnapshotStore::new(Some(snapshot_of(vec![known]))));
        let pipeline = pipeline(listings, details.clone(), notifier.clone(), store.clone());

        let outcome = pipeline.run_search("camden").await.unwrap();
        assert!(matches!(outcome, CycleOutcome::NoActionableResults(_)));
        assert_eq!(outcome.report().delivery, DeliveryStatus::Skipped);
        assert!(details.calls().is_empty());
        assert!(notifier.delivered().is_empty());
        let saved = store.current().await.unwrap();
        assert_eq!(saved.get(ListingId(1)).unwrap().observed_at, ts(12));
    }

    #[tokio::test]
    async fn failed_delivery_is_reported_not_fatal() {
        let listings = Arc::new(ScriptedListingSource::new().then_scrape(vec![listing(5, ts(10))]));
        let details = Arc::new(MockDetailSource::new().on_detail(5, flat_details(1200.0, 2, "Euston")));
        let notifier = Arc::new(RecordingNotifier::failing());
        let store = Arc::new(MemorySnapshotStore::new(Some(snapshot_of(vec![record(1)]))));
        let pipeline = pipeline(listings, details, notifier, store.clone());

        let outcome = pipeline.run_search("camden").await.unwrap();
        assert!(matches!(outcome.report().delivery, DeliveryStatus::Failed { .. }));
        assert!(store.current().await.unwrap().get(ListingId(5)).is_some());
    }

    #[tokio::test]
    async fn failed_fetch_under_a_detail_filter_is_reported_not_fatal() {
        let mut old = record(1);
        old.historical = true;
        let listings = Arc::new(
            ScriptedListingSource::new()
                .then_scrape(vec![listing(1, ts(10)), fresh_listing(5, ts(10))]),
        );
        let details = Arc::new(MockDetailSource::new().failing(5));
        let notifier = Arc::new(RecordingNotifier::new());
        let store = Arc::new(MemorySnapshotStore::new(Some(snapshot_of(vec![old]))));
        let pipeline = pipeline(listings, details, notifier.clone(), store.clone());

        let outcome = pipeline.run_search("camden").await.unwrap();
        let report = outcome.report();
        assert_eq!(report.actionable, vec![ListingId(5)]);
        assert_eq!(report.enrichment.failed_ids(), vec![ListingId(5)]);
        assert!(report.notified.is_empty());
        assert_eq!(report.delivery, DeliveryStatus::Skipped);
        assert!(notifier.delivered().is_empty());

        let saved = store.current().await.unwrap();
        let pending = saved.get(ListingId(5)).unwrap();
        assert!(!pending.is_enriched());
        assert!(!pending.historical);
    }

    #[tokio::test]
    async fn listing_enriched_on_retry_is_notified() {
        let listings = Arc::new(ScriptedListingSource::new().then_scrape(vec![listing(3, ts(12))]));
        let details = Arc::new(MockDetailSource::new().on_detail(3, flat_details(1400.0, 2, "Euston")));
        let notifier = Arc::new(RecordingNotifier::new());
        let store = Arc::new(MemorySnapshotStore::new(Some(snapshot_of(vec![record(3)]))));
        let pipeline = pipeline(listings, details.clone(), notifier.clone(), store.clone());

        let outcome = pipeline.run_search("camden").await.unwrap();
        let report = outcome.report();
        assert!(outcome.is_actionable());
        assert!(report.actionable.is_empty());
        assert_eq!(report.enrichment.retried, vec![ListingId(3)]);
        assert_eq!(report.notified, vec![ListingId(3)]);
        assert_eq!(notifier.delivered().len(), 1);
        assert_eq!(notifier.delivered()[0].listing_ids, vec![ListingId(3)]);
    }

    #[tokio::test]
    async fn filter_drift_aborts_before_saving() {
        let watch = WatchConfig::from_yaml_str(
            "searches:\n  - {name: camden, term: Camden}\nfilters:\n  max_floor_area: 50\n",
        )
        .unwrap();
        let listings = Arc::new(ScriptedListingSource::new().then_scrape(vec![listing(5, ts(10))]));
        let details = Arc::new(MockDetailSource::new().on_detail(5, flat_details(1200.0, 2, "Euston")));
        let prior = snapshot_of(vec![record(1)]);
        let store = Arc::new(MemorySnapshotStore::new(Some(prior.clone())));
        let pipeline = SyncPipeline::new(SyncConfig::from_vars(|_| None), watch)
            .unwrap()
            .with_collaborators(listings, details, Arc::new(RecordingNotifier::new()))
            .with_store("camden", store.clone());

        let err = pipeline.run_search("camden").await.unwrap_err();
        assert!(format!("{err:#}").contains("floor_area"));
        assert_eq!(store.current().await.unwrap(), prior);
    }

    #[tokio::test]
    async fn scrape_failure_aborts_the_cycle() {
        let listings = Arc::new(ScriptedListingSource::new().then_fail("layout changed"));
        let store = Arc::new(MemorySnapshotStore::new(None));
        let pipeline = pipeline(
            listings,
            Arc::new(MockDetailSource::new()),
            Arc::new(RecordingNotifier::new()),
            store.clone(),
        );

        assert!(pipeline.run_search("camden").await.is_err());
        assert!(store.current().await.is_none());
        assert!(pipeline.run_search("nowhere").await.is_err());
    }

    #[tokio::test]
    async fn scheduler_is_off_unless_enabled() {
        let watch = WatchConfig::from_yaml_str(WATCH).unwrap();
        let pipeline = Arc::new(SyncPipeline::new(SyncConfig::from_vars(|_| None), watch).unwrap());
        assert!(pipeline.maybe_build_scheduler().await.unwrap().is_none());
    }
}
