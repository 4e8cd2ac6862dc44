//! Incremental reconciliation engine: merges each scrape against the persisted snapshot,
//! classifies listing transitions, enriches new listings and selects what to notify on.

pub mod classify;
pub mod config;
pub mod enrich;
pub mod export;
pub mod filter;
pub mod merge;
pub mod notify;
pub mod pipeline;
pub mod table;
pub mod testing;

pub use classify::{classify, reconcile, Reconciliation};
pub use config::{NotifySettings, SearchConfig, SyncConfig, WatchConfig};
pub use enrich::{EnrichmentConfig, EnrichmentReport, EnrichmentSelector, FailedEnrichment};
pub use export::{export_snapshot, ExportManifest, ExportManifestFile};
pub use filter::{
    compile, Condition, FilterBound, FilterCompileError, FilterEvaluationError, FilterSpec,
    Predicate,
};
pub use merge::{merge, MergedRow, MergedTable, ReconcileError};
pub use notify::{
    render_notification, DeliveryReceipt, NotificationMessage, NotificationRow, Notifier,
    NotifyError, OutboxNotifier,
};
pub use pipeline::{
    run_sync_once_from_env, CycleOutcome, CycleReport, DeliveryStatus, SearchRun, SyncPipeline,
};
pub use table::ReconciledTable;

pub const CRATE_NAME: &str = "rentwatch-sync";
