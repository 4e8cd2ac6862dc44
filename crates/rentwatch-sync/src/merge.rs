//! Keyed outer join of the prior snapshot against the current scrape.

use std::collections::btree_map::Entry;
use std::collections::{BTreeMap, BTreeSet};

use rentwatch_core::{ListingId, ListingSummary, ReconciledRecord, Snapshot};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ReconcileError {
    #[error("listing {0} appears more than once in the scrape")]
    DuplicateListing(ListingId),
    #[error("prior snapshot holds listing {0} more than once")]
    DuplicateSnapshotRecord(ListingId),
    #[error("merged row for listing {0} has neither an existing nor a new side")]
    EmptyRow(ListingId),
}

/// One id of the join: the persisted side, the freshly scraped side, or both.
#[derive(Debug, Clone, PartialEq)]
pub struct MergedRow {
    pub id: ListingId,
    pub existing: Option<ReconciledRecord>,
    pub new: Option<ListingSummary>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MergedTable {
    /// No usable prior snapshot: the bootstrap rule applies to new rows.
    pub first_run: bool,
    /// Sorted by id, one row per distinct id.
    pub rows: Vec<MergedRow>,
    /// Scraped ids dropped because the prior snapshot already marks them historical.
    pub pruned_historical: Vec<ListingId>,
}

/// Join `scraped` against `prior` by listing id.
///
/// Scraped listings whose id is historical in `prior` are pruned before the join, so
/// the prior record is carried unchanged and can never be reclassified as new. The
/// historical set is read from `prior` only. A prior snapshot with no records counts
/// as a first run.
pub fn merge(
    prior: Option<&Snapshot>,
    scraped: Vec<ListingSummary>,
) -> Result<MergedTable, ReconcileError> {
    let first_run = prior.map_or(true, Snapshot::is_empty);
    let historical: BTreeSet<ListingId> = prior.map(Snapshot::historical_ids).unwrap_or_default();

    let mut rows: BTreeMap<ListingId, MergedRow> = BTreeMap::new();
    for record in prior.map(|p| p.records.as_slice()).unwrap_or_default() {
        match rows.entry(record.id) {
            Entry::Vacant(slot) => {
                slot.insert(MergedRow {
                    id: record.id,
                    existing: Some(record.clone()),
                    new: None,
                });
            }
            Entry::Occupied(_) => return Err(ReconcileError::DuplicateSnapshotRecord(record.id)),
        }
    }

    let mut seen = BTreeSet::new();
    let mut pruned_historical = Vec::new();
    for listing in scraped {
        let id = listing.id;
        if !seen.insert(id) {
            return Err(ReconcileError::DuplicateListing(id));
        }
        if historical.contains(&id) {
            pruned_historical.push(id);
            continue;
        }
        rows.entry(id)
            .or_insert_with(|| MergedRow {
                id,
                existing: None,
                new: None,
            })
            .new = Some(listing);
    }

    Ok(MergedTable {
        first_run,
        rows: rows.into_values().collect(),
        pruned_historical,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{listing, record, snapshot_of, ts};

    #[test]
    fn absent_prior_is_a_first_run_with_new_only_rows() {
        let merged = merge(None, vec![listing(2, ts(9)), listing(1, ts(9))]).unwrap();
        assert!(merged.first_run);
        assert_eq!(merged.rows.len(), 2);
        assert_eq!(merged.rows[0].id, ListingId(1));
        assert!(merged.rows.iter().all(|r| r.existing.is_none() && r.new.is_some()));
    }

    #[test]
    fn outer_join_keeps_existing_only_new_only_and_overlapping_rows() {
        let prior = snapshot_of(vec![record(1), record(2)]);
        let merged = merge(Some(&prior), vec![listing(2, ts(9)), listing(3, ts(9))]).unwrap();
        assert!(!merged.first_run);

        let sides: Vec<_> = merged
            .rows
            .iter()
            .map(|r| (r.id.0, r.existing.is_some(), r.new.is_some()))
            .collect();
        assert_eq!(sides, vec![(1, true, false), (2, true, true), (3, false, true)]);
    }

    #[test]
    fn historical_ids_from_prior_are_pruned_from_the_scrape() {
        let mut old = record(1);
        old.historical = true;
        let prior = snapshot_of(vec![old.clone(), record(2)]);

        let merged = merge(Some(&prior), vec![listing(1, ts(9)), listing(2, ts(9))]).unwrap();
        assert_eq!(merged.pruned_historical, vec![ListingId(1)]);
        let row = merged.rows.iter().find(|r| r.id == ListingId(1)).unwrap();
        assert_eq!(row.existing.as_ref(), Some(&old));
        assert!(row.new.is_none());
        let row = merged.rows.iter().find(|r| r.id == ListingId(2)).unwrap();
        assert!(row.new.is_some());
    }

    #[test]
    fn duplicate_scraped_ids_are_rejected() {
        let err = merge(None, vec![listing(5, ts(9)), listing(5, ts(10))]).unwrap_err();
        assert_eq!(err, ReconcileError::DuplicateListing(ListingId(5)));
    }

    #[test]
    fn empty_prior_snapshot_still_bootstraps() {
        let prior = snapshot_of(vec![]);
        let merged = merge(Some(&prior), vec![listing(1, ts(9))]).unwrap();
        assert!(merged.first_run);
    }

    #[test]
    fn empty_scrape_carries_every_prior_record() {
        let prior = snapshot_of(vec![record(1), record(2)]);
        let merged = merge(Some(&prior), vec![]).unwrap();
        assert_eq!(merged.rows.len(), 2);
        assert!(merged.rows.iter().all(|r| r.new.is_none()));
    }
}
