// Test fixtures and collaborator mocks for the sync pipeline.
//
// Three mocks, one per collaborator seam:
// - ScriptedListingSource (ListingSource): queue of scrape results, one per call
// - MockDetailSource (DetailSource): id -> detail record, with failures and delays
// - RecordingNotifier (Notifier): keeps every delivered message, optionally failing
//
// Plus builders for summaries, reconciled records and snapshots.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use rentwatch_adapters::{
    DetailFetchError, DetailSource, ListingSource, ScrapeContext, ScrapeError, SearchQuery,
    DETAIL_COLUMNS,
};
use rentwatch_core::{DetailRecord, FieldValue, ListingId, ListingSummary, ReconciledRecord, Snapshot};
use rentwatch_storage::FetchError;
use uuid::Uuid;

use crate::notify::{DeliveryReceipt, NotificationMessage, Notifier, NotifyError};

/// 2026-03-01 at `hour`:00 UTC.
pub fn ts(hour: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 1, hour, 0, 0)
        .single()
        .unwrap_or_default()
}

/// Available listing, not updated recently.
pub fn listing(id: u64, at: DateTime<Utc>) -> ListingSummary {
    ListingSummary {
        id: ListingId(id),
        observed_at: at,
        let_agreed: false,
        let_agreed_at: None,
        recently_updated: false,
    }
}

/// Available listing updated within the last hour.
pub fn fresh_listing(id: u64, at: DateTime<Utc>) -> ListingSummary {
    ListingSummary {
        recently_updated: true,
        ..listing(id, at)
    }
}

pub fn let_agreed_listing(id: u64, at: DateTime<Utc>) -> ListingSummary {
    ListingSummary {
        let_agreed: true,
        let_agreed_at: Some(at),
        ..listing(id, at)
    }
}

/// Known, non-historical record from an earlier cycle with no details.
pub fn record(id: u64) -> ReconciledRecord {
    ReconciledRecord {
        id: ListingId(id),
        observed_at: ts(9),
        created_at: ts(8),
        let_agreed: false,
        let_agreed_at: None,
        recently_updated: false,
        historical: false,
        new_listing: false,
        let_agreed_since_last_run: false,
        details: DetailRecord::new(),
    }
}

pub fn snapshot_of(records: Vec<ReconciledRecord>) -> Snapshot {
    Snapshot::new(Uuid::nil(), ts(9), records)
}

pub fn details<'a>(fields: impl IntoIterator<Item = (&'a str, FieldValue)>) -> DetailRecord {
    fields
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect()
}

/// Typical enriched flat: title, rent, bedrooms and closest station.
pub fn flat_details(rent: f64, bedrooms: i64, station: &str) -> DetailRecord {
    details([
        ("title", FieldValue::from(format!("{bedrooms} Bed Flat"))),
        ("rent_total", FieldValue::Float(rent)),
        ("bedrooms", FieldValue::Int(bedrooms)),
        ("rent_per_person", FieldValue::Float(rent / bedrooms.max(1) as f64)),
        ("closest_station", FieldValue::from(station)),
        ("closest_station_mins", FieldValue::Int(6)),
    ])
}

pub fn context(at: DateTime<Utc>) -> ScrapeContext {
    ScrapeContext {
        run_id: Uuid::new_v4(),
        observed_at: at,
    }
}

// ---------------------------------------------------------------------------
// ScriptedListingSource
// ---------------------------------------------------------------------------

/// Returns queued scrape results in order; an exhausted queue yields an empty scrape.
#[derive(Default)]
pub struct ScriptedListingSource {
    script: Mutex<VecDeque<Result<Vec<ListingSummary>, String>>>,
    queries: Mutex<Vec<SearchQuery>>,
}

impl ScriptedListingSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn then_scrape(self, summaries: Vec<ListingSummary>) -> Self {
        self.push(Ok(summaries));
        self
    }

    pub fn then_fail(self, reason: &str) -> Self {
        self.push(Err(reason.to_string()));
        self
    }

    /// Queue another result on a source already shared with a pipeline.
    pub fn push(&self, result: Result<Vec<ListingSummary>, String>) {
        if let Ok(mut script) = self.script.lock() {
            script.push_back(result);
        }
    }

    pub fn queries(&self) -> Vec<SearchQuery> {
        self.queries.lock().map(|q| q.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl ListingSource for ScriptedListingSource {
    fn source_id(&self) -> &'static str {
        "scripted"
    }

    async fn scrape(
        &self,
        _ctx: &ScrapeContext,
        query: &SearchQuery,
    ) -> Result<Vec<ListingSummary>, ScrapeError> {
        if let Ok(mut queries) = self.queries.lock() {
            queries.push(query.clone());
        }
        let next = self.script.lock().ok().and_then(|mut s| s.pop_front());
        match next {
            None => Ok(Vec::new()),
            Some(Ok(summaries)) => Ok(summaries),
            Some(Err(reason)) => Err(ScrapeError::Selector {
                selector: "scripted".into(),
                reason,
            }),
        }
    }
}

// ---------------------------------------------------------------------------
// MockDetailSource
// ---------------------------------------------------------------------------

/// Id-keyed detail source. Unregistered ids fail with a parse error.
/// Builder pattern: `.on_detail()`, `.failing()`, `.slow()`.
#[derive(Default)]
pub struct MockDetailSource {
    records: HashMap<ListingId, DetailRecord>,
    failing: HashSet<ListingId>,
    slow: HashMap<ListingId, Duration>,
    calls: Mutex<Vec<ListingId>>,
}

impl MockDetailSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_detail(mut self, id: u64, record: DetailRecord) -> Self {
        self.records.insert(ListingId(id), record);
        self
    }

    pub fn failing(mut self, id: u64) -> Self {
        self.failing.insert(ListingId(id));
        self
    }

    pub fn slow(mut self, id: u64, delay: Duration) -> Self {
        self.slow.insert(ListingId(id), delay);
        self
    }

    /// Ids requested so far, in call order.
    pub fn calls(&self) -> Vec<ListingId> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl DetailSource for MockDetailSource {
    fn columns(&self) -> &'static [&'static str] {
        DETAIL_COLUMNS
    }

    async fn fetch_detail(
        &self,
        _ctx: &ScrapeContext,
        id: ListingId,
    ) -> Result<DetailRecord, DetailFetchError> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(id);
        }
        if let Some(delay) = self.slow.get(&id) {
            tokio::time::sleep(*delay).await;
        }
        if self.failing.contains(&id) {
            return Err(DetailFetchError::Fetch {
                id,
                source: FetchError::HttpStatus {
                    status: 503,
                    url: format!("mock://listing/{id}"),
                },
            });
        }
        self.records
            .get(&id)
            .cloned()
            .ok_or_else(|| DetailFetchError::Parse {
                id,
                reason: "MockDetailSource: no detail registered".into(),
            })
    }
}

// ---------------------------------------------------------------------------
// RecordingNotifier
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct RecordingNotifier {
    delivered: Mutex<Vec<NotificationMessage>>,
    fail: bool,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn delivered(&self) -> Vec<NotificationMessage> {
        self.delivered.lock().map(|d| d.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    fn channel(&self) -> &'static str {
        "recording"
    }

    async fn deliver(&self, message: &NotificationMessage) -> Result<DeliveryReceipt, NotifyError> {
        if self.fail {
            return Err(NotifyError::Rejected {
                channel: self.channel(),
                reason: "recording notifier configured to fail".into(),
            });
        }
        if let Ok(mut delivered) = self.delivered.lock() {
            delivered.push(message.clone());
        }
        Ok(DeliveryReceipt {
            channel: self.channel(),
            location: format!("memory://{}", message.search),
            delivered_at: Utc::now(),
        })
    }
}
