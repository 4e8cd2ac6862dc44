//! Core domain model for rentwatch: scraped listing summaries, reconciled records and snapshots.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub const CRATE_NAME: &str = "rentwatch-core";

pub const SNAPSHOT_SCHEMA_VERSION: u32 = 1;

/// Columns every reconciled record carries, independent of enrichment.
pub const BASE_COLUMNS: [&str; 9] = [
    "id",
    "observed_at",
    "created_at",
    "let_agreed",
    "let_agreed_at",
    "recently_updated",
    "historical",
    "new_listing",
    "let_agreed_since_last_run",
];

/// Listing identity assigned by the source site. Never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ListingId(pub u64);

impl fmt::Display for ListingId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for ListingId {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

/// One listing as seen on the search results page during a single cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListingSummary {
    pub id: ListingId,
    pub observed_at: DateTime<Utc>,
    pub let_agreed: bool,
    pub let_agreed_at: Option<DateTime<Utc>>,
    pub recently_updated: bool,
}

/// Scalar value of an enrichment field or a filter bound.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl FieldValue {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::Float(_) => "float",
            Self::Text(_) => "text",
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Int(v) => Some(*v as f64),
            Self::Float(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(v) => Some(v.as_str()),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(v) => Some(*v),
            _ => None,
        }
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(v) => write!(f, "{v}"),
            Self::Int(v) => write!(f, "{v}"),
            Self::Float(v) => write!(f, "{v}"),
            Self::Text(v) => write!(f, "{v}"),
        }
    }
}

impl From<bool> for FieldValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<i64> for FieldValue {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<f64> for FieldValue {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

/// Flat mapping of detail fields returned by the detail-page collaborator.
pub type DetailRecord = BTreeMap<String, FieldValue>;

/// Post-merge view of a listing: one per distinct id ever observed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconciledRecord {
    pub id: ListingId,
    pub observed_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub let_agreed: bool,
    pub let_agreed_at: Option<DateTime<Utc>>,
    pub recently_updated: bool,
    pub historical: bool,
    pub new_listing: bool,
    pub let_agreed_since_last_run: bool,
    #[serde(default)]
    pub details: DetailRecord,
}

impl ReconciledRecord {
    /// New and not historical: the records a cycle enriches and may notify on.
    pub fn is_actionable(&self) -> bool {
        self.new_listing && !self.historical
    }

    pub fn is_enriched(&self) -> bool {
        !self.details.is_empty()
    }

    /// Seen in an earlier cycle whose detail fetch failed.
    pub fn needs_enrichment_retry(&self) -> bool {
        !self.new_listing && !self.historical && !self.is_enriched()
    }

    pub fn detail(&self, key: &str) -> Option<&FieldValue> {
        self.details.get(key)
    }

    /// Value of a base column: `None` when `name` is not a base column,
    /// `Some(None)` when it is one but holds no value for this record.
    pub fn base_column(&self, name: &str) -> Option<Option<FieldValue>> {
        let value = match name {
            "id" => Some(match i64::try_from(self.id.0) {
                Ok(v) => FieldValue::Int(v),
                Err(_) => FieldValue::Text(self.id.to_string()),
            }),
            "observed_at" => Some(FieldValue::Text(self.observed_at.to_rfc3339())),
            "created_at" => Some(FieldValue::Text(self.created_at.to_rfc3339())),
            "let_agreed" => Some(FieldValue::Bool(self.let_agreed)),
            "let_agreed_at" => self.let_agreed_at.map(|t| FieldValue::Text(t.to_rfc3339())),
            "recently_updated" => Some(FieldValue::Bool(self.recently_updated)),
            "historical" => Some(FieldValue::Bool(self.historical)),
            "new_listing" => Some(FieldValue::Bool(self.new_listing)),
            "let_agreed_since_last_run" => Some(FieldValue::Bool(self.let_agreed_since_last_run)),
            _ => return None,
        };
        Some(value)
    }
}

/// Full set of reconciled records as of the end of a cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub schema_version: u32,
    pub saved_at: DateTime<Utc>,
    pub run_id: Uuid,
    pub records: Vec<ReconciledRecord>,
}

impl Snapshot {
    pub fn new(run_id: Uuid, saved_at: DateTime<Utc>, mut records: Vec<ReconciledRecord>) -> Self {
        records.sort_by_key(|r| r.id);
        Self {
            schema_version: SNAPSHOT_SCHEMA_VERSION,
            saved_at,
            run_id,
            records,
        }
    }

    pub fn get(&self, id: ListingId) -> Option<&ReconciledRecord> {
        self.records
            .binary_search_by_key(&id, |r| r.id)
            .ok()
            .map(|idx| &self.records[idx])
    }

    pub fn historical_ids(&self) -> BTreeSet<ListingId> {
        self.records
            .iter()
            .filter(|r| r.historical)
            .map(|r| r.id)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
