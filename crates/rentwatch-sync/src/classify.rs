//! Per-listing transition classification over the merged table.

use rentwatch_core::{ListingId, ListingSummary, ReconciledRecord, Snapshot};

use crate::merge::{merge, MergedRow, ReconcileError};
use crate::table::ReconciledTable;

/// Result of merging and classifying one cycle's scrape.
#[derive(Debug, Clone, PartialEq)]
pub struct Reconciliation {
    pub first_run: bool,
    pub table: ReconciledTable,
    pub pruned_historical: Vec<ListingId>,
}

impl Reconciliation {
    /// New and not historical, in id order.
    pub fn actionable_ids(&self) -> Vec<ListingId> {
        self.table
            .iter()
            .filter(|r| r.is_actionable())
            .map(|r| r.id)
            .collect()
    }

    pub fn has_actionable(&self) -> bool {
        self.table.iter().any(ReconciledRecord::is_actionable)
    }

    pub fn new_listings(&self) -> usize {
        self.table.iter().filter(|r| r.new_listing).count()
    }

    pub fn let_agreed_transitions(&self) -> Vec<ListingId> {
        self.table
            .iter()
            .filter(|r| r.let_agreed_since_last_run)
            .map(|r| r.id)
            .collect()
    }
}

pub fn reconcile(
    prior: Option<&Snapshot>,
    scraped: Vec<ListingSummary>,
) -> Result<Reconciliation, ReconcileError> {
    let merged = merge(prior, scraped)?;
    let mut table = ReconciledTable::new();
    for row in merged.rows {
        let scraped = row.new.is_some();
        let record = classify(row, merged.first_run)?;
        if scraped {
            table.mark_scraped(record.id);
        }
        table.insert(record);
    }
    Ok(Reconciliation {
        first_run: merged.first_run,
        table,
        pruned_historical: merged.pruned_historical,
    })
}

/// Derive the unified record for one merged row.
///
/// Fields are computed strictly in the order new_listing, created_at, let-agreed
/// transition, let_agreed_at, historical; each step reads only inputs and earlier steps.
pub fn classify(row: MergedRow, first_run: bool) -> Result<ReconciledRecord, ReconcileError> {
    let MergedRow { id, existing, new } = row;

    let new_listing = existing.is_none();

    let created_at = match (&existing, &new) {
        (Some(existing), _) => existing.created_at,
        (None, Some(new)) => new.observed_at,
        (None, None) => return Err(ReconcileError::EmptyRow(id)),
    };

    let was_let_agreed = existing.as_ref().is_some_and(|e| e.let_agreed);
    let now_let_agreed = new.as_ref().is_some_and(|n| n.let_agreed);
    let let_agreed_since_last_run = !new_listing && !was_let_agreed && now_let_agreed;
    let let_agreed = if new_listing {
        now_let_agreed
    } else {
        was_let_agreed || let_agreed_since_last_run
    };

    let let_agreed_at = if new_listing || let_agreed_since_last_run {
        new.as_ref()
            .and_then(|n| n.let_agreed_at.or(n.let_agreed.then_some(n.observed_at)))
    } else {
        existing.as_ref().and_then(|e| e.let_agreed_at)
    };

    let historical = match &existing {
        Some(existing) => existing.historical,
        None => first_run && !new.as_ref().is_some_and(|n| n.recently_updated),
    };

    let (observed_at, recently_updated) = match (&new, &existing) {
        (Some(new), _) => (new.observed_at, new.recently_updated),
        (None, Some(existing)) => (existing.observed_at, existing.recently_updated),
        (None, None) => return Err(ReconcileError::EmptyRow(id)),
    };

    Ok(ReconciledRecord {
        id,
        observed_at,
        created_at,
        let_agreed,
        let_agreed_at,
        recently_updated,
        historical,
        new_listing,
        let_agreed_since_last_run,
        details: existing.map(|e| e.details).unwrap_or_default(),
    })
}
