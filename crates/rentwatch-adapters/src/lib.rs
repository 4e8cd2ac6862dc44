//! Listing-site adapters: search results scraping and per-listing detail extraction.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rentwatch_core::{DetailRecord, FieldValue, ListingId, ListingSummary};
use rentwatch_storage::{FetchError, HttpFetcher};
use scraper::{ElementRef, Html, Selector};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, warn};
use uuid::Uuid;

pub const CRATE_NAME: &str = "rentwatch-adapters";

pub const SEARCH_ENDPOINT: &str = "https://www.openrent.co.uk/properties-to-rent/";
pub const LISTING_BASE: &str = "https://www.openrent.co.uk/";

const LISTING_SELECTOR: &str = "a.pli.clearfix";
const LISTING_ID_SELECTOR: &str = "div[data-listing-id]";
const LET_AGREED_SELECTOR: &str = "span.let-agreed";
const TIMESTAMP_SELECTOR: &str = "div.timeStamp";
const ROOM_ONLY_PREFIX: &str = "Room in a Shared House";

/// Every field a listing detail page can yield. A column listed here exists for
/// filtering even when no record carries a value for it yet.
pub const DETAIL_COLUMNS: &[&str] = &[
    "available_from",
    "bathrooms",
    "bedrooms",
    "bills_included",
    "closest_station",
    "closest_station_mins",
    "deposit",
    "description",
    "dss_lha_covers_rent",
    "epc_rating",
    "families_allowed",
    "furnished",
    "has_fireplace",
    "has_garden",
    "has_parking",
    "lat",
    "lng",
    "location",
    "max_tenants",
    "minimum_tenancy",
    "pets_allowed",
    "rent_per_person",
    "rent_total",
    "room_only",
    "second_closest_station",
    "second_closest_station_mins",
    "smokers_allowed",
    "student_friendly",
    "title",
];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScrapeContext {
    pub run_id: Uuid,
    pub observed_at: DateTime<Utc>,
}

/// Free-text search plus query parameters, as configured per named search.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchQuery {
    pub term: String,
    #[serde(default)]
    pub params: BTreeMap<String, FieldValue>,
}

impl SearchQuery {
    pub fn search_url(&self) -> Result<reqwest::Url, ScrapeError> {
        let base = reqwest::Url::parse(SEARCH_ENDPOINT)
            .map_err(|e| ScrapeError::InvalidUrl(e.to_string()))?;
        let mut url = base
            .join(&term_slug(&self.term))
            .map_err(|e| ScrapeError::InvalidUrl(e.to_string()))?;
        {
            let mut pairs = url.query_pairs_mut();
            pairs.append_pair("term", &self.term);
            for (key, value) in &self.params {
                if key != "term" {
                    pairs.append_pair(key, &value.to_string());
                }
            }
        }
        Ok(url)
    }
}

/// Lowercased, dash-separated form of a search term with punctuation removed.
pub fn term_slug(term: &str) -> String {
    term.chars()
        .filter(|c| c.is_ascii_alphanumeric() || c.is_whitespace())
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join("-")
        .to_ascii_lowercase()
}

pub fn listing_url(id: ListingId) -> String {
    format!("{LISTING_BASE}{id}")
}

#[derive(Debug, Error)]
pub enum ScrapeError {
    #[error("invalid search url: {0}")]
    InvalidUrl(String),
    #[error("invalid selector {selector}: {reason}")]
    Selector { selector: String, reason: String },
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error("scrape session slot closed")]
    SessionClosed,
}

#[derive(Debug, Error)]
pub enum DetailFetchError {
    #[error("detail fetch for listing {id} timed out after {after:?}")]
    Timeout { id: ListingId, after: Duration },
    #[error("detail fetch for listing {id} failed: {source}")]
    Fetch {
        id: ListingId,
        #[source]
        source: FetchError,
    },
    #[error("detail page for listing {id} could not be parsed: {reason}")]
    Parse { id: ListingId, reason: String },
}

impl DetailFetchError {
    pub fn id(&self) -> ListingId {
        match self {
            Self::Timeout { id, .. } | Self::Fetch { id, .. } | Self::Parse { id, .. } => *id,
        }
    }
}

/// Scrape collaborator: one ordered, duplicate-free batch of summaries per call.
#[async_trait]
pub trait ListingSource: Send + Sync {
    fn source_id(&self) -> &'static str;

    async fn scrape(
        &self,
        ctx: &ScrapeContext,
        query: &SearchQuery,
    ) -> Result<Vec<ListingSummary>, ScrapeError>;
}

/// Detail-fetch collaborator: expensive per-listing enrichment.
#[async_trait]
pub trait DetailSource: Send + Sync {
    /// Field names this source can produce.
    fn columns(&self) -> &'static [&'static str];

    async fn fetch_detail(
        &self,
        ctx: &ScrapeContext,
        id: ListingId,
    ) -> Result<DetailRecord, DetailFetchError>;
}

/// Exclusive handle on a source for the duration of one scrape call.
///
/// Holding the handle holds the source's only session permit; dropping it releases
/// the permit whether the scrape succeeded or not.
pub struct ScrapeSession<'a> {
    http: &'a HttpFetcher,
    ctx: &'a ScrapeContext,
    pages_fetched: usize,
    _permit: OwnedSemaphorePermit,
}

impl<'a> ScrapeSession<'a> {
    pub async fn fetch_page(&mut self, url: &str) -> Result<String, ScrapeError> {
        let response = self.http.fetch_bytes(self.ctx.run_id, url).await?;
        self.pages_fetched += 1;
        Ok(response.text())
    }
}

impl Drop for ScrapeSession<'_> {
    fn drop(&mut self) {
        debug!(
            run_id = %self.ctx.run_id,
            pages = self.pages_fetched,
            "scrape session released"
        );
    }
}

#[derive(Debug, Clone)]
pub struct OpenRentSource {
    http: Arc<HttpFetcher>,
    session_slot: Arc<Semaphore>,
}

impl OpenRentSource {
    pub fn new(http: Arc<HttpFetcher>) -> Self {
        Self {
            http,
            session_slot: Arc::new(Semaphore::new(1)),
        }
    }

    pub async fn open_session<'a>(
        &'a self,
        ctx: &'a ScrapeContext,
    ) -> Result<ScrapeSession<'a>, ScrapeError> {
        let permit = self
            .session_slot
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| ScrapeError::SessionClosed)?;
        Ok(ScrapeSession {
            http: self.http.as_ref(),
            ctx,
            pages_fetched: 0,
            _permit: permit,
        })
    }
}

#[async_trait]
impl ListingSource for OpenRentSource {
    fn source_id(&self) -> &'static str {
        "openrent"
    }

    async fn scrape(
        &self,
        ctx: &ScrapeContext,
        query: &SearchQuery,
    ) -> Result<Vec<ListingSummary>, ScrapeError> {
        let url = query.search_url()?;
        let mut session = self.open_session(ctx).await?;
        let html = session.fetch_page(url.as_str()).await?;
        drop(session);
        parse_search_results(&html, ctx)
    }
}

#[async_trait]
impl DetailSource for OpenRentSource {
    fn columns(&self) -> &'static [&'static str] {
        DETAIL_COLUMNS
    }

    async fn fetch_detail(
        &self,
        ctx: &ScrapeContext,
        id: ListingId,
    ) -> Result<DetailRecord, DetailFetchError> {
        let response = self
            .http
            .fetch_bytes(ctx.run_id, &listing_url(id))
            .await
            .map_err(|source| DetailFetchError::Fetch { id, source })?;
        parse_listing_detail(id, &response.text())
    }
}

fn selector(css: &str) -> Result<Selector, ScrapeError> {
    Selector::parse(css).map_err(|e| ScrapeError::Selector {
        selector: css.to_string(),
        reason: e.to_string(),
    })
}

fn collapsed_text(node: ElementRef<'_>) -> String {
    node.text()
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// "Last updated" text speaking in minutes or a single hour counts as a recent change.
pub fn is_recent_update(text: &str) -> bool {
    text.split_whitespace()
        .map(|w| {
            w.trim_matches(|c: char| !c.is_ascii_alphanumeric())
                .to_ascii_lowercase()
        })
        .any(|w| matches!(w.as_str(), "minute" | "minutes" | "hour"))
}

pub fn parse_search_results(
    html: &str,
    ctx: &ScrapeContext,
) -> Result<Vec<ListingSummary>, ScrapeError> {
    let document = Html::parse_document(html);
    let listing_sel = selector(LISTING_SELECTOR)?;
    let id_sel = selector(LISTING_ID_SELECTOR)?;
    let let_agreed_sel = selector(LET_AGREED_SELECTOR)?;
    let stamp_sel = selector(TIMESTAMP_SELECTOR)?;

    let updates: Vec<bool> = document
        .select(&stamp_sel)
        .map(|n| is_recent_update(&collapsed_text(n)))
        .collect();

    let mut seen = HashSet::new();
    let mut out = Vec::new();
    for (idx, anchor) in document.select(&listing_sel).enumerate() {
        let raw_id = anchor
            .select(&id_sel)
            .find_map(|div| div.value().attr("data-listing-id"));
        let Some(id) = raw_id.and_then(|raw| raw.trim().parse::<u64>().ok()) else {
            warn!(position = idx, raw_id = ?raw_id, "listing without a usable id skipped");
            continue;
        };
        let id = ListingId(id);
        if !seen.insert(id) {
            debug!(%id, "duplicate listing on results page ignored");
            continue;
        }

        let let_agreed = anchor.select(&let_agreed_sel).count() == 1;
        out.push(ListingSummary {
            id,
            observed_at: ctx.observed_at,
            let_agreed,
            let_agreed_at: let_agreed.then_some(ctx.observed_at),
            recently_updated: updates.get(idx).copied().unwrap_or(false),
        });
    }
    Ok(out)
}

fn parse_number(text: &str) -> Option<f64> {
    let digits: String = text
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == '.')
        .collect();
    digits.parse().ok()
}

fn parse_leading_int(text: &str) -> Option<i64> {
    text.split_whitespace().next()?.parse().ok()
}

/// Tick/cross icon inside a table cell; a cross means "no".
fn icon_flag(cell: ElementRef<'_>, icon_sel: &Selector) -> Option<bool> {
    let icon = cell.select(icon_sel).next()?;
    let class = icon.value().attr("class")?;
    let class = class.split_whitespace().collect::<Vec<_>>().join(" ");
    Some(class != "fa fa-times")
}

fn extract_lat_lng(html: &str) -> Option<(f64, f64)> {
    let start = html.find("LatLng(")? + "LatLng(".len();
    let rest = &html[start..];
    let inner = &rest[..rest.find(')')?];
    let mut parts = inner.split(',');
    let lat = parts.next()?.trim().parse().ok()?;
    let lng = parts.next()?.trim().parse().ok()?;
    Some((lat, lng))
}

/// Tables whose class attribute is exactly `class_list`, in document order.
fn tables_with_exact_class<'a>(document: &'a Html, class_list: &str) -> Vec<ElementRef<'a>> {
    let Ok(table_sel) = Selector::parse("table") else {
        return Vec::new();
    };
    document
        .select(&table_sel)
        .filter(|t| {
            t.value()
                .attr("class")
                .map(|c| c.split_whitespace().collect::<Vec<_>>().join(" ") == class_list)
                .unwrap_or(false)
        })
        .collect()
}

fn table_cells<'a>(tables: &[ElementRef<'a>], idx: usize, td_sel: &Selector) -> Vec<ElementRef<'a>> {
    tables
        .get(idx)
        .map(|t| t.select(td_sel).collect())
        .unwrap_or_default()
}

fn cell_text(cells: &[ElementRef<'_>], idx: usize) -> Option<String> {
    cells.get(idx).map(|c| collapsed_text(*c)).and_then(non_empty)
}

fn cell_flag(cells: &[ElementRef<'_>], idx: usize, icon_sel: &Selector) -> Option<bool> {
    cells.get(idx).and_then(|c| icon_flag(*c, icon_sel))
}

fn put(record: &mut DetailRecord, key: &str, value: Option<impl Into<FieldValue>>) {
    if let Some(value) = value {
        record.insert(key.to_string(), value.into());
    }
}

fn non_empty(text: String) -> Option<String> {
    if text.is_empty() {
        None
    } else {
        Some(text)
    }
}

pub fn parse_listing_detail(id: ListingId, html: &str) -> Result<DetailRecord, DetailFetchError> {
    let parse_err = |reason: String| DetailFetchError::Parse { id, reason };
    let sel = |css: &str| Selector::parse(css).map_err(|e| parse_err(e.to_string()));

    let document = Html::parse_document(html);
    let title_sel = sel("h1.property-title")?;
    let strong_sel = sel("strong")?;
    let description_sel = sel("div.description")?;
    let td_sel = sel("td")?;
    let icon_sel = sel("i")?;

    let title = document
        .select(&title_sel)
        .next()
        .map(collapsed_text)
        .and_then(non_empty)
        .ok_or_else(|| parse_err("missing h1.property-title".to_string()))?;

    let mut record = DetailRecord::new();
    let room_only = title.split(',').next().map(str::trim) == Some(ROOM_ONLY_PREFIX);
    put(&mut record, "room_only", Some(room_only));

    if let Some((lat, lng)) = extract_lat_lng(html) {
        put(&mut record, "lat", Some(lat));
        put(&mut record, "lng", Some(lng));
    }

    let mut bedrooms = None;
    if let Some(overview) = tables_with_exact_class(&document, "table table-striped intro-stats").first() {
        let stats: Vec<String> = overview.select(&strong_sel).map(collapsed_text).collect();
        bedrooms = stats.first().and_then(|s| s.parse::<i64>().ok());
        put(&mut record, "bedrooms", bedrooms);
        put(&mut record, "bathrooms", stats.get(1).and_then(|s| s.parse::<i64>().ok()));
        put(&mut record, "max_tenants", stats.get(2).and_then(|s| s.parse::<i64>().ok()));
        put(&mut record, "location", stats.get(3).cloned().and_then(non_empty));
    }

    put(
        &mut record,
        "description",
        document
            .select(&description_sel)
            .next()
            .map(collapsed_text)
            .and_then(non_empty),
    );

    let features = tables_with_exact_class(&document, "table table-striped");
    let cells = |table_idx: usize| table_cells(&features, table_idx, &td_sel);

    let price_bills = cells(0);
    let rent_total = cell_text(&price_bills, 3).and_then(|t| parse_number(&t));
    put(&mut record, "deposit", cell_text(&price_bills, 1).and_then(|t| parse_number(&t)));
    put(&mut record, "rent_total", rent_total);
    put(&mut record, "bills_included", cell_flag(&price_bills, 5, &icon_sel));

    let tenant_preference = cells(1);
    put(&mut record, "student_friendly", cell_flag(&tenant_preference, 1, &icon_sel));
    put(&mut record, "families_allowed", cell_flag(&tenant_preference, 3, &icon_sel));
    put(&mut record, "pets_allowed", cell_flag(&tenant_preference, 5, &icon_sel));
    put(&mut record, "smokers_allowed", cell_flag(&tenant_preference, 7, &icon_sel));
    put(&mut record, "dss_lha_covers_rent", cell_flag(&tenant_preference, 9, &icon_sel));

    let availability = cells(2);
    put(&mut record, "available_from", cell_text(&availability, 1));
    put(&mut record, "minimum_tenancy", cell_text(&availability, 3));

    let additional = cells(3);
    put(&mut record, "has_garden", cell_flag(&additional, 1, &icon_sel));
    put(&mut record, "has_parking", cell_flag(&additional, 3, &icon_sel));
    put(&mut record, "has_fireplace", cell_flag(&additional, 5, &icon_sel));
    put(&mut record, "furnished", cell_text(&additional, 7));
    put(&mut record, "epc_rating", cell_text(&additional, 9));

    let transport: Vec<String> = tables_with_exact_class(&document, "table table-striped mt-1")
        .first()
        .map(|t| {
            t.select(&td_sel)
                .map(collapsed_text)
                .filter(|s| !s.is_empty())
                .collect()
        })
        .unwrap_or_default();
    put(&mut record, "closest_station", transport.get(2).cloned());
    put(&mut record, "closest_station_mins", transport.get(3).and_then(|t| parse_leading_int(t)));
    put(&mut record, "second_closest_station", transport.get(4).cloned());
    put(
        &mut record,
        "second_closest_station_mins",
        transport.get(5).and_then(|t| parse_leading_int(t)),
    );

    let rent_per_person = match (rent_total, bedrooms) {
        (Some(rent), _) if room_only => Some(rent),
        (Some(rent), Some(beds)) if beds > 0 => Some((rent / beds as f64 * 100.0).round() / 100.0),
        _ => None,
    };
    put(&mut record, "rent_per_person", rent_per_person);
    put(&mut record, "title", Some(title));

    Ok(record)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    const RESULTS_PAGE: &str = r#"
        <html><body>
          <a class="pli clearfix" href="/1001">
            <div class="listing" data-listing-id="1001"></div>
            <div class="timeStamp">Last Updated: 25 minutes ago</div>
          </a>
          <a class="pli clearfix" href="/1002">
            <div data-listing-id="1002"></div>
            <span class="let-agreed">Let Agreed</span>
            <div class="timeStamp">Last Updated: 3 days ago</div>
          </a>
          <a class="pli clearfix" href="/1001">
            <div data-listing-id="1001"></div>
            <div class="timeStamp">Last Updated: 1 hour ago</div>
          </a>
          <a class="pli clearfix" href="/broken">
            <div data-listing-id="n/a"></div>
            <div class="timeStamp">Last Updated: 2 hours ago</div>
          </a>
        </body></html>
    "#;

    const DETAIL_PAGE: &str = r#"
        <html><body>
          <h1 class="property-title">2 Bed Flat, York Way, N1</h1>
          <table class="table table-striped intro-stats">
            <tr><td>Bedrooms</td><td><strong>2</strong></td></tr>
            <tr><td>Bathrooms</td><td><strong>1</strong></td></tr>
            <tr><td>Max Tenants</td><td><strong>3</strong></td></tr>
            <tr><td>Location</td><td><strong>Kings Cross</strong></td></tr>
          </table>
          <div class="description">  Bright flat
             near the canal. </div>
          <table class="table table-striped">
            <tr><td>Deposit</td><td>£2,307.69</td></tr>
            <tr><td>Rent PCM</td><td>£2,000.00</td></tr>
            <tr><td>Bills Included</td><td><i class="fa fa-times"></i></td></tr>
          </table>
          <table class="table table-striped">
            <tr><td>Student Friendly</td><td><i class="fa fa-check"></i></td></tr>
            <tr><td>Families Allowed</td><td><i class="fa fa-check"></i></td></tr>
            <tr><td>Pets Allowed</td><td><i class="fa fa-times"></i></td></tr>
            <tr><td>Smokers Allowed</td><td><i class="fa fa-times"></i></td></tr>
            <tr><td>DSS/LHA Covers Rent</td><td><i class="fa fa-times"></i></td></tr>
          </table>
          <table class="table table-striped">
            <tr><td>Available From</td><td>Today</td></tr>
            <tr><td>Minimum Tenancy</td><td>12 Months</td></tr>
          </table>
          <table class="table table-striped">
            <tr><td>Garden</td><td><i class="fa fa-times"></i></td></tr>
            <tr><td>Parking</td><td><i class="fa fa-check"></i></td></tr>
            <tr><td>Fireplace</td><td><i class="fa fa-times"></i></td></tr>
            <tr><td>Furnishing</td><td>Furnished</td></tr>
            <tr><td>EPC Rating</td><td>C</td></tr>
          </table>
          <table class="table table-striped mt-1">
            <tr><td>Station</td><td>Walk</td></tr>
            <tr><td>Kings Cross</td><td>4 minute walk</td></tr>
            <tr><td>Euston</td><td>11 minute walk</td></tr>
          </table>
          <script>var pos = new google.maps.LatLng(51.5308, -0.1238);</script>
        </body></html>
    "#;

    fn ctx() -> ScrapeContext {
        ScrapeContext {
            run_id: Uuid::new_v4(),
            observed_at: Utc.with_ymd_and_hms(2026, 3, 1, 7, 30, 0).single().unwrap(),
        }
    }

    #[test]
    fn search_url_slugs_the_term_and_encodes_params() {
        let mut params = BTreeMap::new();
        params.insert("prices_max".to_string(), FieldValue::Int(2000));
        params.insert("bedrooms_min".to_string(), FieldValue::Int(2));
        let query = SearchQuery {
            term: "King's Cross,  London".to_string(),
            params,
        };
        let url = query.search_url().unwrap();
        assert_eq!(url.path(), "/properties-to-rent/kings-cross-london");
        assert_eq!(
            url.query(),
            Some("term=King%27s+Cross%2C++London&bedrooms_min=2&prices_max=2000")
        );
    }

    #[test]
    fn recent_update_detection() {
        assert!(is_recent_update("Last Updated: 25 minutes ago"));
        assert!(is_recent_update("Last Updated: 1 hour ago"));
        assert!(!is_recent_update("Last Updated: 2 hours ago"));
        assert!(!is_recent_update("Last Updated: 3 days ago"));
    }

    #[test]
    fn results_page_yields_unique_summaries() {
        let ctx = ctx();
        let listings = parse_search_results(RESULTS_PAGE, &ctx).unwrap();
        assert_eq!(listings.len(), 2);

        assert_eq!(listings[0].id, ListingId(1001));
        assert!(!listings[0].let_agreed);
        assert_eq!(listings[0].let_agreed_at, None);
        assert!(listings[0].recently_updated);
        assert_eq!(listings[0].observed_at, ctx.observed_at);

        assert_eq!(listings[1].id, ListingId(1002));
        assert!(listings[1].let_agreed);
        assert_eq!(listings[1].let_agreed_at, Some(ctx.observed_at));
        assert!(!listings[1].recently_updated);
    }

    #[test]
    fn empty_results_page_is_not_an_error() {
        let listings = parse_search_results("<html><body></body></html>", &ctx()).unwrap();
        assert!(listings.is_empty());
    }

    #[test]
    fn detail_page_extracts_fields() {
        let record = parse_listing_detail(ListingId(1001), DETAIL_PAGE).unwrap();
        let get = |k: &str| record.get(k).cloned();

        assert_eq!(get("title"), Some("2 Bed Flat, York Way, N1".into()));
        assert_eq!(get("room_only"), Some(false.into()));
        assert_eq!(get("bedrooms"), Some(FieldValue::Int(2)));
        assert_eq!(get("bathrooms"), Some(FieldValue::Int(1)));
        assert_eq!(get("max_tenants"), Some(FieldValue::Int(3)));
        assert_eq!(get("location"), Some("Kings Cross".into()));
        assert_eq!(get("description"), Some("Bright flat near the canal.".into()));
        assert_eq!(get("deposit"), Some(FieldValue::Float(2307.69)));
        assert_eq!(get("rent_total"), Some(FieldValue::Float(2000.0)));
        assert_eq!(get("rent_per_person"), Some(FieldValue::Float(1000.0)));
        assert_eq!(get("bills_included"), Some(false.into()));
        assert_eq!(get("student_friendly"), Some(true.into()));
        assert_eq!(get("pets_allowed"), Some(false.into()));
        assert_eq!(get("available_from"), Some("Today".into()));
        assert_eq!(get("minimum_tenancy"), Some("12 Months".into()));
        assert_eq!(get("has_parking"), Some(true.into()));
        assert_eq!(get("furnished"), Some("Furnished".into()));
        assert_eq!(get("epc_rating"), Some("C".into()));
        assert_eq!(get("closest_station"), Some("Kings Cross".into()));
        assert_eq!(get("closest_station_mins"), Some(FieldValue::Int(4)));
        assert_eq!(get("second_closest_station"), Some("Euston".into()));
        assert_eq!(get("second_closest_station_mins"), Some(FieldValue::Int(11)));
        assert_eq!(get("lat"), Some(FieldValue::Float(51.5308)));
        assert_eq!(get("lng"), Some(FieldValue::Float(-0.1238)));
    }

    #[test]
    fn every_parsed_field_is_a_declared_column() {
        let record = parse_listing_detail(ListingId(1001), DETAIL_PAGE).unwrap();
        let undeclared: Vec<_> = record
            .keys()
            .filter(|k| !DETAIL_COLUMNS.contains(&k.as_str()))
            .collect();
        assert!(undeclared.is_empty(), "undeclared detail fields: {undeclared:?}");
    }

    #[test]
    fn room_in_shared_house_rent_is_per_person() {
        let html = DETAIL_PAGE.replace(
            "2 Bed Flat, York Way, N1",
            "Room in a Shared House, York Way, N1",
        );
        let record = parse_listing_detail(ListingId(1001), &html).unwrap();
        assert_eq!(record.get("room_only"), Some(&FieldValue::Bool(true)));
        assert_eq!(record.get("rent_per_person"), Some(&FieldValue::Float(2000.0)));
    }

    #[test]
    fn detail_page_without_title_is_a_parse_error() {
        let err = parse_listing_detail(ListingId(9), "<html><body><p>gone</p></body></html>")
            .unwrap_err();
        assert_eq!(err.id(), ListingId(9));
        assert!(matches!(err, DetailFetchError::Parse { .. }));
    }

    #[test]
    fn sparse_detail_page_omits_missing_fields() {
        let html = r#"<h1 class="property-title">Studio, E1</h1>"#;
        let record = parse_listing_detail(ListingId(5), html).unwrap();
        assert_eq!(record.get("title"), Some(&FieldValue::Text("Studio, E1".into())));
        assert!(record.get("rent_total").is_none());
        assert!(record.get("rent_per_person").is_none());
        assert!(record.get("closest_station").is_none());
    }
}
