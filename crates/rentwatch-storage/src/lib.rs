//! Snapshot persistence + HTTP fetch utilities for rentwatch.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Context;
use async_trait::async_trait;
use rentwatch_core::{Snapshot, SNAPSHOT_SCHEMA_VERSION};
use reqwest::StatusCode;
use sha2::{Digest, Sha256};
use thiserror::Error;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::{Mutex, Semaphore};
use tracing::{debug, info_span, Instrument};
use uuid::Uuid;

pub const CRATE_NAME: &str = "rentwatch-storage";

#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("snapshot io failed for {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("snapshot {path} is corrupt: {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("snapshot {path} has schema version {found}, expected {expected}")]
    UnsupportedVersion {
        path: PathBuf,
        found: u32,
        expected: u32,
    },
    #[error("serializing snapshot: {0}")]
    Serialize(#[from] serde_json::Error),
}

#[derive(Debug, Clone)]
pub struct SavedSnapshot {
    pub path: PathBuf,
    pub content_hash: String,
    pub byte_size: usize,
    pub records: usize,
}

/// Persistence seam for reconciled snapshots.
///
/// `load` returns `Ok(None)` when no snapshot was ever written; an `Err` means a
/// snapshot may exist but could not be read.
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    async fn load(&self) -> Result<Option<Snapshot>, SnapshotError>;
    async fn save(&self, snapshot: &Snapshot) -> Result<SavedSnapshot, SnapshotError>;
}

pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

/// Write bytes to `dest` through a temp file in the same directory and an atomic rename,
/// so readers never observe a half-written file.
pub async fn write_atomic(dest: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let parent = dest.parent().unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(parent).await?;

    let temp_path = parent.join(format!(".{}.{}.tmp", Uuid::new_v4(), bytes.len()));
    let mut file = fs::OpenOptions::new()
        .create_new(true)
        .write(true)
        .open(&temp_path)
        .await?;
    let written = async {
        file.write_all(bytes).await?;
        file.flush().await?;
        file.sync_all().await
    }
    .await;
    drop(file);
    if let Err(err) = written {
        let _ = fs::remove_file(&temp_path).await;
        return Err(err);
    }

    match fs::rename(&temp_path, dest).await {
        Ok(()) => Ok(()),
        Err(err) => {
            let _ = fs::remove_file(&temp_path).await;
            Err(err)
        }
    }
}

/// One JSON file per search, replaced atomically on every save.
#[derive(Debug, Clone)]
pub struct JsonFileSnapshotStore {
    path: PathBuf,
}

impl JsonFileSnapshotStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn for_search(root: impl AsRef<Path>, search_name: &str) -> Self {
        Self::new(root.as_ref().join(format!("{}.json", file_slug(search_name))))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Lowercase, dash-separated, filesystem-safe form of a search name.
pub fn file_slug(input: &str) -> String {
    let slug = input
        .trim()
        .to_ascii_lowercase()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
        .collect::<String>()
        .split('-')
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join("-");
    if slug.is_empty() {
        "default".to_string()
    } else {
        slug
    }
}

#[async_trait]
impl SnapshotStore for JsonFileSnapshotStore {
    async fn load(&self) -> Result<Option<Snapshot>, SnapshotError> {
        let bytes = match fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(source) => {
                return Err(SnapshotError::Io {
                    path: self.path.clone(),
                    source,
                })
            }
        };
        let snapshot: Snapshot =
            serde_json::from_slice(&bytes).map_err(|source| SnapshotError::Corrupt {
                path: self.path.clone(),
                source,
            })?;
        if snapshot.schema_version != SNAPSHOT_SCHEMA_VERSION {
            return Err(SnapshotError::UnsupportedVersion {
                path: self.path.clone(),
                found: snapshot.schema_version,
                expected: SNAPSHOT_SCHEMA_VERSION,
            });
        }
        debug!(path = %self.path.display(), records = snapshot.len(), "loaded snapshot");
        Ok(Some(snapshot))
    }

    async fn save(&self, snapshot: &Snapshot) -> Result<SavedSnapshot, SnapshotError> {
        let bytes = serde_json::to_vec_pretty(snapshot)?;
        write_atomic(&self.path, &bytes)
            .await
            .map_err(|source| SnapshotError::Io {
                path: self.path.clone(),
                source,
            })?;
        Ok(SavedSnapshot {
            path: self.path.clone(),
            content_hash: sha256_hex(&bytes),
            byte_size: bytes.len(),
            records: snapshot.len(),
        })
    }
}

/// Process-local store, used when persistence is handled by the caller.
#[derive(Debug, Default)]
pub struct MemorySnapshotStore {
    inner: Mutex<Option<Snapshot>>,
}

impl MemorySnapshotStore {
    pub fn new(initial: Option<Snapshot>) -> Self {
        Self {
            inner: Mutex::new(initial),
        }
    }

    pub async fn current(&self) -> Option<Snapshot> {
        self.inner.lock().await.clone()
    }
}

#[async_trait]
impl SnapshotStore for MemorySnapshotStore {
    async fn load(&self) -> Result<Option<Snapshot>, SnapshotError> {
        Ok(self.inner.lock().await.clone())
    }

    async fn save(&self, snapshot: &Snapshot) -> Result<SavedSnapshot, SnapshotError> {
        let bytes = serde_json::to_vec(snapshot)?;
        *self.inner.lock().await = Some(snapshot.clone());
        Ok(SavedSnapshot {
            path: PathBuf::from(":memory:"),
            content_hash: sha256_hex(&bytes),
            byte_size: bytes.len(),
            records: snapshot.len(),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDisposition {
    Retryable,
    NonRetryable,
}

pub fn classify_status(status: StatusCode) -> RetryDisposition {
    if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
        RetryDisposition::Retryable
    } else {
        RetryDisposition::NonRetryable
    }
}

pub fn classify_reqwest_error(err: &reqwest::Error) -> RetryDisposition {
    if err.is_timeout() || err.is_connect() || err.is_request() {
        RetryDisposition::Retryable
    } else {
        RetryDisposition::NonRetryable
    }
}

#[derive(Debug, Clone, Copy)]
pub struct BackoffPolicy {
    pub max_retries: usize,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(8),
        }
    }
}

impl BackoffPolicy {
    pub fn delay_for_attempt(&self, attempt_index: usize) -> Duration {
        let factor = 1u32.checked_shl(attempt_index as u32).unwrap_or(u32::MAX);
        let delay = self.base_delay.saturating_mul(factor);
        delay.min(self.max_delay)
    }
}

#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    pub timeout: Duration,
    pub user_agent: Option<String>,
    pub concurrency: usize,
    pub backoff: BackoffPolicy,
    pub token_bucket: Option<TokenBucketConfig>,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(20),
            user_agent: None,
            concurrency: 4,
            backoff: BackoffPolicy::default(),
            // bursts of 3, then one request per second
            token_bucket: Some(TokenBucketConfig {
                capacity: 3,
                refill_every: Duration::from_secs(1),
            }),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct TokenBucketConfig {
    pub capacity: u32,
    pub refill_every: Duration,
}

#[derive(Debug)]
pub struct SimpleTokenBucket {
    capacity: u32,
    refill_every: Duration,
    state: Mutex<TokenBucketState>,
}

#[derive(Debug, Clone, Copy)]
struct TokenBucketState {
    tokens: u32,
    last_refill: Instant,
}

impl SimpleTokenBucket {
    pub fn new(capacity: u32, refill_every: Duration) -> Self {
        Self {
            capacity,
            refill_every,
            state: Mutex::new(TokenBucketState {
                tokens: capacity,
                last_refill: Instant::now(),
            }),
        }
    }

    pub async fn take(&self) {
        loop {
            let mut state = self.state.lock().await;
            let elapsed = state.last_refill.elapsed();
            if elapsed >= self.refill_every && self.refill_every.as_millis() > 0 {
                let refills = (elapsed.as_millis() / self.refill_every.as_millis()) as u32;
                state.tokens = (state.tokens.saturating_add(refills)).min(self.capacity);
                state.last_refill = Instant::now();
            }

            if state.tokens > 0 {
                state.tokens -= 1;
                return;
            }

            let sleep_for = self.refill_every;
            drop(state);
            tokio::time::sleep(sleep_for).await;
        }
    }
}

#[derive(Debug)]
pub struct HttpFetcher {
    client: reqwest::Client,
    limit: Arc<Semaphore>,
    token_bucket: Option<Arc<SimpleTokenBucket>>,
    backoff: BackoffPolicy,
}

#[derive(Debug, Clone)]
pub struct FetchedResponse {
    pub status: StatusCode,
    pub final_url: String,
    pub body: Vec<u8>,
}

impl FetchedResponse {
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request failed after retries: {0}")]
    Request(#[from] reqwest::Error),
    #[error("http status {status} for {url}")]
    HttpStatus { status: u16, url: String },
    #[error("gave up on {url} after retries")]
    RetriesExhausted { url: String },
    #[error("request limiter closed")]
    LimiterClosed,
}

impl HttpFetcher {
    pub fn new(config: HttpClientConfig) -> anyhow::Result<Self> {
        let mut builder = reqwest::Client::builder()
            .gzip(true)
            .brotli(true)
            .timeout(config.timeout);

        if let Some(user_agent) = &config.user_agent {
            builder = builder.user_agent(user_agent.clone());
        }

        let client = builder.build().context("building reqwest client")?;
        let token_bucket = config
            .token_bucket
            .map(|c| Arc::new(SimpleTokenBucket::new(c.capacity, c.refill_every)));

        Ok(Self {
            client,
            limit: Arc::new(Semaphore::new(config.concurrency.max(1))),
            token_bucket,
            backoff: config.backoff,
        })
    }

    pub async fn fetch_bytes(&self, run_id: Uuid, url: &str) -> Result<FetchedResponse, FetchError> {
        let span = info_span!("http_fetch", %run_id, url);
        self.fetch_with_retries(url).instrument(span).await
    }

    async fn fetch_with_retries(&self, url: &str) -> Result<FetchedResponse, FetchError> {
        let _permit = self
            .limit
            .acquire()
            .await
            .map_err(|_| FetchError::LimiterClosed)?;

        if let Some(bucket) = &self.token_bucket {
            bucket.take().await;
        }

        let mut last_request_error: Option<reqwest::Error> = None;

        for attempt in 0..=self.backoff.max_retries {
            match self.client.get(url).send().await {
                Ok(resp) => {
                    let status = resp.status();
                    let final_url = resp.url().to_string();

                    if status.is_success() {
                        let body = resp.bytes().await?.to_vec();
                        return Ok(FetchedResponse {
                            status,
                            final_url,
                            body,
                        });
                    }

                    if classify_status(status) == RetryDisposition::Retryable
                        && attempt < self.backoff.max_retries
                    {
                        tokio::time::sleep(self.backoff.delay_for_attempt(attempt)).await;
                        continue;
                    }

                    return Err(FetchError::HttpStatus {
                        status: status.as_u16(),
                        url: final_url,
                    });
                }
                Err(err) => {
                    if classify_reqwest_error(&err) == RetryDisposition::Retryable
                        && attempt < self.backoff.max_retries
                    {
                        last_request_error = Some(err);
                        tokio::time::sleep(self.backoff.delay_for_attempt(attempt)).await;
                        continue;
                    }
                    return Err(FetchError::Request(err));
                }
            }
        }

        Err(match last_request_error {
            Some(err) => FetchError::Request(err),
            None => FetchError::RetriesExhausted {
                url: url.to_string(),
            },
        })
    }
}
