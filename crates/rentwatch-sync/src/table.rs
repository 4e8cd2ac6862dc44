//! Keyed in-memory table of reconciled records for one cycle.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use rentwatch_core::{
    DetailRecord, FieldValue, ListingId, ReconciledRecord, Snapshot, BASE_COLUMNS,
};
use uuid::Uuid;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReconciledTable {
    records: BTreeMap<ListingId, ReconciledRecord>,
    // columns the detail source can produce, known even while all NULL
    declared: BTreeSet<String>,
    // ids present in this cycle's scrape
    scraped: BTreeSet<ListingId>,
}

impl ReconciledTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Later records with the same id replace earlier ones.
    pub fn from_records(records: impl IntoIterator<Item = ReconciledRecord>) -> Self {
        Self {
            records: records.into_iter().map(|r| (r.id, r)).collect(),
            ..Self::default()
        }
    }

    /// Register detail columns that exist for every record, valued or not.
    pub fn declare_columns<'a>(&mut self, columns: impl IntoIterator<Item = &'a str>) {
        self.declared.extend(columns.into_iter().map(str::to_string));
    }

    pub fn mark_scraped(&mut self, id: ListingId) {
        self.scraped.insert(id);
    }

    /// The listing appeared in this cycle's search results.
    pub fn was_scraped(&self, id: ListingId) -> bool {
        self.scraped.contains(&id)
    }

    pub fn insert(&mut self, record: ReconciledRecord) -> Option<ReconciledRecord> {
        self.records.insert(record.id, record)
    }

    pub fn get(&self, id: ListingId) -> Option<&ReconciledRecord> {
        self.records.get(&id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ReconciledRecord> {
        self.records.values()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Base columns, declared detail columns, and every enrichment key present
    /// on any record.
    pub fn columns(&self) -> BTreeSet<String> {
        let mut columns: BTreeSet<String> = BASE_COLUMNS.iter().map(|c| c.to_string()).collect();
        columns.extend(self.declared.iter().cloned());
        for record in self.records.values() {
            columns.extend(record.details.keys().cloned());
        }
        columns
    }

    /// Value of `column` for `record`; `None` is NULL. Callers check the column
    /// exists in [`Self::columns`] first.
    pub fn column_value(record: &ReconciledRecord, column: &str) -> Option<FieldValue> {
        match record.base_column(column) {
            Some(value) => value,
            None => record.details.get(column).cloned(),
        }
    }

    /// Add detail fields to a record without touching fields it already has.
    /// Returns the number of fields added, or `None` for an unknown id.
    pub fn merge_details(&mut self, id: ListingId, details: DetailRecord) -> Option<usize> {
        let record = self.records.get_mut(&id)?;
        let mut added = 0;
        for (key, value) in details {
            if let std::collections::btree_map::Entry::Vacant(slot) = record.details.entry(key) {
                slot.insert(value);
                added += 1;
            }
        }
        Some(added)
    }

    pub fn into_snapshot(self, run_id: Uuid, saved_at: DateTime<Utc>) -> Snapshot {
        Snapshot::new(run_id, saved_at, self.records.into_values().collect())
    }

    pub fn to_snapshot(&self, run_id: Uuid, saved_at: DateTime<Utc>) -> Snapshot {
        Snapshot::new(run_id, saved_at, self.records.values().cloned().collect())
    }
}
