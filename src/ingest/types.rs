// src/ingest/types.rs
use std::collections::BTreeSet;
use std::future::Future;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::geo::GeoPoint;

/// Unvalidated, source-shaped payload. Every accessor degrades to `None`
/// instead of failing, so one odd field never sinks a batch.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RawEvent(Map<String, Value>);

impl RawEvent {
    pub fn new() -> Self {
        Self(Map::new())
    }

    /// Wraps a JSON object; anything else is not an event.
    pub fn from_value(value: Value) -> Option<Self> {
        match value {
            Value::Object(map) => Some(Self(map)),
            _ => None,
        }
    }

    /// Builder-style insert, handy for scraped blocks and tests.
    pub fn with(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.0.insert(key.to_string(), value.into());
        self
    }

    pub fn insert(&mut self, key: &str, value: impl Into<Value>) {
        self.0.insert(key.to_string(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// String value, trimmed; empty strings count as absent.
    pub fn str(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(value_str)
    }

    /// Number value; numeric strings are accepted too.
    pub fn f64(&self, key: &str) -> Option<f64> {
        self.get(key).and_then(value_f64)
    }

    /// Identifier that may arrive as a string or an integer.
    pub fn id_string(&self, key: &str) -> Option<String> {
        match self.get(key)? {
            Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }

    pub fn object(&self, key: &str) -> Option<&Map<String, Value>> {
        self.get(key).and_then(Value::as_object)
    }

    pub fn array(&self, key: &str) -> Option<&Vec<Value>> {
        self.get(key).and_then(Value::as_array)
    }

    /// Walks nested objects, e.g. `["ContactInfos", "en", "City"]`.
    pub fn path(&self, path: &[&str]) -> Option<&Value> {
        let (first, rest) = path.split_first()?;
        let mut cur = self.get(first)?;
        for key in rest {
            cur = cur.as_object()?.get(*key)?;
        }
        Some(cur)
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }
}

impl From<Map<String, Value>> for RawEvent {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

pub(crate) fn value_str(v: &Value) -> Option<&str> {
    v.as_str().map(str::trim).filter(|s| !s.is_empty())
}

pub(crate) fn value_f64(v: &Value) -> Option<f64> {
    let n = match v {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    n.filter(|x| x.is_finite())
}

/// Canonical, storage-ready event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub id: String,
    pub title: String,
    pub description: String,
    pub date_start: DateTime<Utc>,
    pub date_end: DateTime<Utc>,
    pub location: String,
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    pub source_name: String,
    pub source_id: String,
    #[serde(default)]
    pub topics: BTreeSet<String>,
    pub category: String,
    pub is_new: bool,
    #[serde(default)]
    pub latitude: f64,
    #[serde(default)]
    pub longitude: f64,
}

impl Event {
    pub fn position(&self) -> GeoPoint {
        GeoPoint::new(self.latitude, self.longitude)
    }

    /// Dedup partition key.
    pub fn key(&self) -> (&str, &str) {
        (&self.source_name, &self.source_id)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("unexpected status {status} from {url}")]
    Status { status: u16, url: String },

    #[error("decoding response: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("malformed payload: {0}")]
    Malformed(String),

    #[error("fetch cancelled")]
    Cancelled,

    #[error("sync deadline exceeded")]
    DeadlineExceeded,
}

/// Cancellation + deadline shared by every fetch of one sync run.
#[derive(Debug, Clone)]
pub struct FetchContext {
    deadline: Instant,
    cancel: CancellationToken,
}

impl FetchContext {
    pub fn new(deadline: Instant, cancel: CancellationToken) -> Self {
        Self { deadline, cancel }
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        Self::new(Instant::now() + timeout, CancellationToken::new())
    }

    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Drives `fut` until it finishes, the token fires, or the deadline passes.
    pub async fn run<F, T>(&self, fut: F) -> Result<T, FetchError>
    where
        F: Future<Output = T>,
    {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(FetchError::Cancelled),
            res = tokio::time::timeout_at(self.deadline, fut) => {
                res.map_err(|_| FetchError::DeadlineExceeded)
            }
        }
    }
}

/// One external source: identify, fetch raw items, map them to `Event`.
#[async_trait::async_trait]
pub trait EventProvider: Send + Sync {
    /// Stable lowercase dedup partition key. Never rename once events are stored.
    fn source_name(&self) -> &'static str;

    /// Network I/O against the source. No internal retries.
    async fn fetch_events(&self, ctx: &FetchContext) -> Result<Vec<RawEvent>, FetchError>;

    /// Pure mapping; `None` rejects a low-quality item.
    fn map_event(&self, raw: &RawEvent) -> Option<Event>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn accessors_degrade_instead_of_failing() {
        let raw = RawEvent::from_value(json!({
            "Id": 42,
            "Title": "  ",
            "Latitude": "46.49",
            "Longitude": {"nested": true},
            "ContactInfos": {"en": {"City": "Bozen"}}
        }))
        .unwrap();

        assert_eq!(raw.id_string("Id").as_deref(), Some("42"));
        assert_eq!(raw.str("Title"), None);
        assert_eq!(raw.f64("Latitude"), Some(46.49));
        assert_eq!(raw.f64("Longitude"), None);
        assert_eq!(raw.f64("Missing"), None);
        assert_eq!(
            raw.path(&["ContactInfos", "en", "City"]).and_then(value_str),
            Some("Bozen")
        );
        assert_eq!(raw.path(&["ContactInfos", "de", "City"]), None);
    }

    #[test]
    fn non_objects_are_not_raw_events() {
        assert!(RawEvent::from_value(json!([1, 2])).is_none());
        assert!(RawEvent::from_value(json!("x")).is_none());
    }

    #[tokio::test]
    async fn cancelled_context_fails_fast() {
        let ctx = FetchContext::with_timeout(Duration::from_secs(60));
        ctx.cancel_token().cancel();
        let res = ctx.run(std::future::pending::<()>()).await;
        assert!(matches!(res, Err(FetchError::Cancelled)));
    }

    #[tokio::test]
    async fn expired_deadline_fails() {
        let ctx = FetchContext::with_timeout(Duration::from_millis(10));
        let res = ctx.run(std::future::pending::<()>()).await;
        assert!(matches!(res, Err(FetchError::DeadlineExceeded)));
    }
}
