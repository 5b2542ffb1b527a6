//! Bulk record fetching.
//!
//! | Feed | Endpoint | Record shape |
//! |---|---|---|
//! | `stm` | `GET /api/ego/memories` | [`StmRecord`] |
//! | `ltm` | `GET /api/ego/experiences` | [`LtmRecord`] |
//! | `events` | `GET /sentience/memory` | [`PerceptionRecord`] |
//!
//! The upstream services do not agree on an envelope, so [`extract_records`]
//! accepts a bare array, the `{success, data, error}` envelope, or an object
//! carrying the array under `data`, `memories`, `events` or `experiences`.

use std::time::Duration;

use async_trait::async_trait;
use memline_types::{Feed, LtmRecord, MemlineError, PerceptionRecord, RawRecord, StmRecord};
use serde::de::DeserializeOwned;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};

const ARRAY_KEYS: [&str; 4] = ["data", "memories", "events", "experiences"];

/// Transport-level failure talking to the gateway.
#[derive(Error, Debug)]
pub enum FeedError {
    #[error("HTTP Error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Gateway returned HTTP {0}")]
    Status(u16),

    #[error("Gateway reported failure: {0}")]
    Rejected(String),

    #[error("Decode Error: {0}")]
    Decode(String),

    #[error("Invalid gateway URL '{0}'")]
    InvalidUrl(String),
}

impl FeedError {
    /// Collapse into the engine taxonomy for `feed`.
    pub fn into_fetch_error(self, feed: Feed) -> MemlineError {
        MemlineError::SourceFetch {
            feed,
            details: self.to_string(),
        }
    }
}

/// Anything that can deliver the raw records of one bulk feed.
///
/// Implementations must be cheap to call repeatedly; the session re-fetches
/// a feed whenever the operator asks for a refresh.
#[async_trait]
pub trait RecordSource: Send + Sync {
    async fn fetch(&self, feed: Feed) -> Result<Vec<RawRecord>, MemlineError>;
}

// ─────────────────────────────────────────────────────────────────────────────
// GatewayClient
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct GatewayClient {
    http: reqwest::Client,
    base_url: String,
    limit: Option<usize>,
}

impl GatewayClient {
    /// Create a client for the gateway at `base_url`.
    pub fn new(base_url: &str) -> Result<Self, FeedError> {
        Self::with_timeout(base_url, Duration::from_secs(10))
    }

    pub fn with_timeout(base_url: &str, timeout: Duration) -> Result<Self, FeedError> {
        let trimmed = base_url.trim().trim_end_matches('/');
        reqwest::Url::parse(trimmed).map_err(|_| FeedError::InvalidUrl(base_url.to_string()))?;
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            base_url: trimmed.to_string(),
            limit: None,
        })
    }

    /// Ask the gateway for at most `limit` records per feed.
    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn feed_url(&self, feed: Feed) -> String {
        let path = match feed {
            Feed::Stm => "/api/ego/memories",
            Feed::Ltm => "/api/ego/experiences",
            Feed::Events => "/sentience/memory",
        };
        format!("{}{}", self.base_url, path)
    }

    pub fn events_url(&self) -> String {
        format!("{}/events", self.base_url)
    }

    async fn fetch_value(&self, feed: Feed) -> Result<Value, FeedError> {
        let mut request = self.http.get(self.feed_url(feed));
        if let Some(limit) = self.limit {
            request = request.query(&[("limit", limit)]);
        }
        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(FeedError::Status(status.as_u16()));
        }
        let text = response.text().await?;
        serde_json::from_str(&text).map_err(|e| FeedError::Decode(e.to_string()))
    }
}

#[async_trait]
impl RecordSource for GatewayClient {
    async fn fetch(&self, feed: Feed) -> Result<Vec<RawRecord>, MemlineError> {
        let result = match self.fetch_value(feed).await {
            Ok(body) => extract_records(feed, body),
            Err(e) => Err(e),
        };
        match result {
            Ok(records) => {
                debug!(%feed, count = records.len(), "fetched records");
                Ok(records)
            }
            Err(e) => {
                warn!(%feed, error = %e, "fetch failed");
                Err(e.into_fetch_error(feed))
            }
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Body decoding
// ─────────────────────────────────────────────────────────────────────────────

/// Pull the record array for `feed` out of a response body.
///
/// Elements that are not objects of the expected shape are skipped.
pub fn extract_records(feed: Feed, body: Value) -> Result<Vec<RawRecord>, FeedError> {
    let items = find_array(body)?;
    let records = items
        .into_iter()
        .filter_map(|item| decode_item(feed, item))
        .collect();
    Ok(records)
}

fn find_array(body: Value) -> Result<Vec<Value>, FeedError> {
    match body {
        Value::Array(items) => Ok(items),
        Value::Null => Ok(Vec::new()),
        Value::Object(mut map) => {
            if map.get("success").and_then(Value::as_bool) == Some(false) {
                let reason = map
                    .get("error")
                    .and_then(Value::as_str)
                    .unwrap_or("unspecified error")
                    .to_string();
                return Err(FeedError::Rejected(reason));
            }
            for key in ARRAY_KEYS {
                if let Some(inner) = map.remove(key) {
                    return find_array(inner);
                }
            }
            Err(FeedError::Decode("no record array in response".to_string()))
        }
        other => Err(FeedError::Decode(format!(
            "expected an array or object, got {other}"
        ))),
    }
}

fn decode_item(feed: Feed, item: Value) -> Option<RawRecord> {
    match feed {
        Feed::Stm => decode::<StmRecord>(feed, item).map(RawRecord::Stm),
        Feed::Ltm => decode::<LtmRecord>(feed, item).map(RawRecord::Ltm),
        Feed::Events => decode::<PerceptionRecord>(feed, item).map(RawRecord::Perception),
    }
}

fn decode<T: DeserializeOwned>(feed: Feed, item: Value) -> Option<T> {
    if !item.is_object() {
        debug!(%feed, "skipping non-object record");
        return None;
    }
    serde_json::from_value(item)
        .inspect_err(|e| debug!(%feed, error = %e, "skipping undecodable record"))
        .ok()
}
