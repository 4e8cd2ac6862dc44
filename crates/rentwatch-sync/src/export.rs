//! Parquet export of a reconciled snapshot, with a sha256 manifest.

use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use arrow_array::{BooleanArray, Float64Array, Int64Array, RecordBatch, StringArray, UInt64Array};
use arrow_schema::{DataType, Field as ArrowField, Schema};
use chrono::{DateTime, Utc};
use parquet::arrow::ArrowWriter;
use rentwatch_core::{FieldValue, ReconciledRecord, Snapshot};
use rentwatch_storage::{file_slug, sha256_hex, write_atomic};
use serde::{Deserialize, Serialize};
use tokio::fs;
use tracing::info;
use uuid::Uuid;

pub const EXPORT_SCHEMA_VERSION: u32 = 1;
const LISTINGS_FILE: &str = "listings.parquet";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportManifest {
    pub schema_version: u32,
    pub search: String,
    pub run_id: Uuid,
    pub snapshot_saved_at: DateTime<Utc>,
    pub files: Vec<ExportManifestFile>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportManifestFile {
    pub name: String,
    pub path: String,
    pub rows: usize,
    pub sha256: String,
    pub bytes: u64,
}

/// Write `<dir>/<search>/<run_id>/listings.parquet` plus `manifest.json` beside it.
/// Returns the manifest path.
pub async fn export_snapshot(snapshot: &Snapshot, dir: &Path, search: &str) -> Result<PathBuf> {
    let export_dir = dir
        .join(file_slug(search))
        .join(snapshot.run_id.to_string());
    fs::create_dir_all(&export_dir)
        .await
        .with_context(|| format!("creating {}", export_dir.display()))?;

    let listings_path = export_dir.join(LISTINGS_FILE);
    write_parquet(&listings_path, listings_batch(&snapshot.records)?)?;

    let bytes = fs::read(&listings_path)
        .await
        .with_context(|| format!("reading {}", listings_path.display()))?;
    let manifest = ExportManifest {
        schema_version: EXPORT_SCHEMA_VERSION,
        search: search.to_string(),
        run_id: snapshot.run_id,
        snapshot_saved_at: snapshot.saved_at,
        files: vec![ExportManifestFile {
            name: "listings".to_string(),
            path: LISTINGS_FILE.to_string(),
            rows: snapshot.len(),
            sha256: sha256_hex(&bytes),
            bytes: bytes.len() as u64,
        }],
    };

    let manifest_path = export_dir.join("manifest.json");
    let encoded = serde_json::to_vec_pretty(&manifest).context("serializing export manifest")?;
    write_atomic(&manifest_path, &encoded)
        .await
        .with_context(|| format!("writing {}", manifest_path.display()))?;

    info!(search, rows = snapshot.len(), path = %manifest_path.display(), "snapshot exported");
    Ok(manifest_path)
}

fn write_parquet(path: &Path, batch: RecordBatch) -> Result<()> {
    let file = File::create(path).with_context(|| format!("creating {}", path.display()))?;
    let mut writer = ArrowWriter::try_new(file, batch.schema(), None)
        .with_context(|| format!("opening parquet writer {}", path.display()))?;
    writer
        .write(&batch)
        .with_context(|| format!("writing record batch {}", path.display()))?;
    writer
        .close()
        .with_context(|| format!("closing parquet writer {}", path.display()))?;
    Ok(())
}

fn text_detail<'a>(record: &'a ReconciledRecord, key: &str) -> Option<&'a str> {
    record.detail(key).and_then(FieldValue::as_str)
}

fn float_detail(record: &ReconciledRecord, key: &str) -> Option<f64> {
    record.detail(key).and_then(FieldValue::as_f64)
}

fn int_detail(record: &ReconciledRecord, key: &str) -> Option<i64> {
    match record.detail(key) {
        Some(FieldValue::Int(v)) => Some(*v),
        _ => None,
    }
}

fn listings_batch(records: &[ReconciledRecord]) -> Result<RecordBatch> {
    let schema = Arc::new(Schema::new(vec![
        ArrowField::new("id", DataType::UInt64, false),
        ArrowField::new("observed_at", DataType::Utf8, false),
        ArrowField::new("created_at", DataType::Utf8, false),
        ArrowField::new("let_agreed", DataType::Boolean, false),
        ArrowField::new("let_agreed_at", DataType::Utf8, true),
        ArrowField::new("recently_updated", DataType::Boolean, false),
        ArrowField::new("historical", DataType::Boolean, false),
        ArrowField::new("new_listing", DataType::Boolean, false),
        ArrowField::new("let_agreed_since_last_run", DataType::Boolean, false),
        ArrowField::new("title", DataType::Utf8, true),
        ArrowField::new("rent_total", DataType::Float64, true),
        ArrowField::new("rent_per_person", DataType::Float64, true),
        ArrowField::new("bedrooms", DataType::Int64, true),
        ArrowField::new("closest_station", DataType::Utf8, true),
        ArrowField::new("closest_station_mins", DataType::Int64, true),
        ArrowField::new("details_json", DataType::Utf8, false),
    ]));

    let flag = |f: fn(&ReconciledRecord) -> bool| {
        Arc::new(BooleanArray::from(records.iter().map(f).collect::<Vec<_>>()))
    };
    let details_json = records
        .iter()
        .map(|r| serde_json::to_string(&r.details))
        .collect::<Result<Vec<_>, _>>()
        .context("serializing detail fields")?;

    let batch = RecordBatch::try_new(
        schema,
        vec![
            Arc::new(UInt64Array::from(records.iter().map(|r| r.id.0).collect::<Vec<_>>())),
            Arc::new(StringArray::from(
                records.iter().map(|r| r.observed_at.to_rfc3339()).collect::<Vec<_>>(),
            )),
            Arc::new(StringArray::from(
                records.iter().map(|r| r.created_at.to_rfc3339()).collect::<Vec<_>>(),
            )),
            flag(|r| r.let_agreed),
            Arc::new(StringArray::from(
                records
                    .iter()
                    .map(|r| r.let_agreed_at.map(|t| t.to_rfc3339()))
                    .collect::<Vec<_>>(),
            )),
            flag(|r| r.recently_updated),
            flag(|r| r.historical),
            flag(|r| r.new_listing),
            flag(|r| r.let_agreed_since_last_run),
            Arc::new(StringArray::from(
                records.iter().map(|r| text_detail(r, "title")).collect::<Vec<_>>(),
            )),
            Arc::new(Float64Array::from(
                records.iter().map(|r| float_detail(r, "rent_total")).collect::<Vec<_>>(),
            )),
            Arc::new(Float64Array::from(
                records
                    .iter()
                    .map(|r| float_detail(r, "rent_per_person"))
                    .collect::<Vec<_>>(),
            )),
            Arc::new(Int64Array::from(
                records.iter().map(|r| int_detail(r, "bedrooms")).collect::<Vec<_>>(),
            )),
            Arc::new(StringArray::from(
                records
                    .iter()
                    .map(|r| text_detail(r, "closest_station"))
                    .collect::<Vec<_>>(),
            )),
            Arc::new(Int64Array::from(
                records
                    .iter()
                    .map(|r| int_detail(r, "closest_station_mins"))
                    .collect::<Vec<_>>(),
            )),
            Arc::new(StringArray::from(details_json)),
        ],
    )
    .context("building listings record batch")?;
    Ok(batch)
}
