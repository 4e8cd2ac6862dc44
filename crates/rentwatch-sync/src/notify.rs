//! Notification rendering and delivery.

use std::path::{Path, PathBuf};

use askama::Template;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rentwatch_core::{FieldValue, ListingId, ReconciledRecord};
use rentwatch_storage::{file_slug, write_atomic};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;
use uuid::Uuid;

use crate::config::NotifySettings;

pub const LINK_BASE: &str = "https://openrent.co.uk/";
const UNKNOWN: &str = "?";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationMessage {
    pub message_id: Uuid,
    pub search: String,
    pub subject: String,
    pub sender: Option<String>,
    pub recipient: Option<String>,
    pub listing_ids: Vec<ListingId>,
    pub created_at: DateTime<Utc>,
    #[serde(skip)]
    pub html: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeliveryReceipt {
    pub channel: &'static str,
    pub location: String,
    pub delivered_at: DateTime<Utc>,
}

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("rendering notification: {0}")]
    Render(#[from] askama::Error),
    #[error("serializing notification envelope: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("writing {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("{channel} rejected the message: {reason}")]
    Rejected { channel: &'static str, reason: String },
}

/// Delivery seam. Implementations report each outcome; callers never retry.
#[async_trait]
pub trait Notifier: Send + Sync {
    fn channel(&self) -> &'static str;

    async fn deliver(&self, message: &NotificationMessage) -> Result<DeliveryReceipt, NotifyError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationRow {
    pub url: String,
    pub headline: String,
}

#[derive(Template)]
#[template(path = "notification.html")]
struct NotificationTemplate<'a> {
    search: &'a str,
    rows: &'a [NotificationRow],
}

fn shown(value: Option<&FieldValue>) -> String {
    value.map_or_else(|| UNKNOWN.to_string(), ToString::to_string)
}

fn shown_rounded(value: Option<&FieldValue>) -> String {
    value
        .and_then(FieldValue::as_f64)
        .map_or_else(|| UNKNOWN.to_string(), |v| format!("{}", v.round() as i64))
}

impl NotificationRow {
    pub fn for_record(record: &ReconciledRecord) -> Self {
        let headline = format!(
            "{} Bed, {} PP, {} Minutes from {} or {} Minutes from {}",
            shown(record.detail("bedrooms")),
            shown_rounded(record.detail("rent_per_person")),
            shown(record.detail("closest_station_mins")),
            shown(record.detail("closest_station")),
            shown(record.detail("second_closest_station_mins")),
            shown(record.detail("second_closest_station")),
        );
        Self {
            url: format!("{LINK_BASE}{}", record.id),
            headline,
        }
    }
}

/// Render the notification for `records`; `None` when there is nothing to send.
pub fn render_notification(
    search: &str,
    settings: &NotifySettings,
    records: &[ReconciledRecord],
    now: DateTime<Utc>,
) -> Result<Option<NotificationMessage>, NotifyError> {
    if records.is_empty() {
        return Ok(None);
    }
    let rows = records
        .iter()
        .map(NotificationRow::for_record)
        .collect::<Vec<_>>();
    let html = NotificationTemplate {
        search,
        rows: &rows,
    }
    .render()?;
    Ok(Some(NotificationMessage {
        message_id: Uuid::new_v4(),
        search: search.to_string(),
        subject: settings.subject.clone(),
        sender: settings.sender.clone(),
        recipient: settings.recipient.clone(),
        listing_ids: records.iter().map(|r| r.id).collect(),
        created_at: now,
        html,
    }))
}

/// Drops each message into a directory as `<stem>.json` (envelope) and
/// `<stem>.html` (body) for an external mail relay to pick up. The envelope
/// lands first, so a visible body always has its headers.
#[derive(Debug, Clone)]
pub struct OutboxNotifier {
    dir: PathBuf,
}

impl OutboxNotifier {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn stem(message: &NotificationMessage) -> String {
        format!(
            "{}-{}-{}",
            message.created_at.format("%Y%m%dT%H%M%SZ"),
            file_slug(&message.search),
            message.message_id.simple()
        )
    }
}

#[async_trait]
impl Notifier for OutboxNotifier {
    fn channel(&self) -> &'static str {
        "outbox"
    }

    async fn deliver(&self, message: &NotificationMessage) -> Result<DeliveryReceipt, NotifyError> {
        let stem = Self::stem(message);
        let envelope_path = self.dir.join(format!("{stem}.json"));
        let body_path = self.dir.join(format!("{stem}.html"));

        let envelope = serde_json::to_vec_pretty(message)?;
        write_atomic(&envelope_path, &envelope)
            .await
            .map_err(|source| NotifyError::Io {
                path: envelope_path.clone(),
                source,
            })?;
        write_atomic(&body_path, message.html.as_bytes())
            .await
            .map_err(|source| NotifyError::Io {
                path: body_path.clone(),
                source,
            })?;

        info!(
            search = %message.search,
            listings = message.listing_ids.len(),
            path = %body_path.display(),
            "notification queued in outbox"
        );
        Ok(DeliveryReceipt {
            channel: self.channel(),
            location: body_path.display().to_string(),
            delivered_at: Utc::now(),
        })
    }
}
