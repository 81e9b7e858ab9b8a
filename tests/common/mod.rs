// tests/common/mod.rs
#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use shuttle_axum::axum::Router;

use venvi::ingest::types::{Event, EventProvider, FetchContext, FetchError, RawEvent};
use venvi::store::{Collection, Params, Record, RecordStore, StoreError};

/// Serves `router` on an ephemeral local port and returns its base URL.
pub async fn serve(router: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind fixture server");
    let addr = listener.local_addr().expect("local addr");
    tokio::spawn(async move {
        let _ = shuttle_axum::axum::serve(listener, router).await;
    });
    format!("http://{addr}")
}

pub fn event(source: &str, id: &str, starts_in_h: i64) -> Event {
    let start = Utc::now() + Duration::hours(starts_in_h);
    Event {
        id: id.to_string(),
        title: format!("Event {id}"),
        description: format!("A description for event {id}"),
        date_start: start,
        date_end: start + Duration::hours(2),
        location: "Bolzano".to_string(),
        url: format!("https://example.org/{source}/{id}"),
        image_url: None,
        source_name: source.to_string(),
        source_id: id.to_string(),
        topics: Default::default(),
        category: "general".to_string(),
        is_new: true,
        latitude: 0.0,
        longitude: 0.0,
    }
}

/// Provider returning canned events; the raw payload carries the event as JSON.
pub struct FakeProvider {
    pub name: &'static str,
    pub events: parking_lot::Mutex<Vec<Event>>,
    pub fail: bool,
    pub calls: AtomicUsize,
}

impl FakeProvider {
    pub fn new(name: &'static str, events: Vec<Event>) -> Self {
        Self {
            name,
            events: parking_lot::Mutex::new(events),
            fail: false,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn failing(name: &'static str) -> Self {
        Self {
            fail: true,
            ..Self::new(name, Vec::new())
        }
    }

    pub fn set_events(&self, events: Vec<Event>) {
        *self.events.lock() = events;
    }
}

#[async_trait]
impl EventProvider for FakeProvider {
    fn source_name(&self) -> &'static str {
        self.name
    }

    async fn fetch_events(&self, ctx: &FetchContext) -> Result<Vec<RawEvent>, FetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(FetchError::Status {
                status: 503,
                url: format!("https://{}.invalid/", self.name),
            });
        }
        if ctx.is_cancelled() {
            return Err(FetchError::Cancelled);
        }
        let events = self.events.lock().clone();
        Ok(events
            .iter()
            .filter_map(|e| serde_json::to_value(e).ok().and_then(RawEvent::from_value))
            .collect())
    }

    fn map_event(&self, raw: &RawEvent) -> Option<Event> {
        let ev: Event = serde_json::from_value(serde_json::Value::Object(raw.as_map().clone())).ok()?;
        if ev.title.starts_with("reject") {
            return None;
        }
        Some(ev)
    }
}

/// Wraps a store and fails `save` for records whose `source_id` is listed.
pub struct FlakyStore<S> {
    pub inner: S,
    pub fail_ids: Vec<String>,
    pub fail_lookups: bool,
}

#[async_trait]
impl<S: RecordStore> RecordStore for FlakyStore<S> {
    async fn find_collection_by_name(&self, name: &str) -> Result<Collection, StoreError> {
        self.inner.find_collection_by_name(name).await
    }

    async fn find_records_by_filter(
        &self,
        collection: &Collection,
        filter: &str,
        sort: &str,
        limit: usize,
        offset: usize,
        params: &Params,
    ) -> Result<Vec<Record>, StoreError> {
        if self.fail_lookups {
            return Err(StoreError::Backend("lookup unavailable".into()));
        }
        self.inner
            .find_records_by_filter(collection, filter, sort, limit, offset, params)
            .await
    }

    async fn save(&self, record: &mut Record) -> Result<(), StoreError> {
        self.check(record)?;
        self.inner.save(record).await
    }

    async fn save_unique(&self, record: &mut Record, key: &[&str]) -> Result<(), StoreError> {
        self.check(record)?;
        self.inner.save_unique(record, key).await
    }

    async fn flush(&self) -> Result<(), StoreError> {
        self.inner.flush().await
    }
}

impl<S> FlakyStore<S> {
    fn check(&self, record: &Record) -> Result<(), StoreError> {
        if self.fail_ids.contains(&record.get_string("source_id")) {
            return Err(StoreError::Backend("disk full".into()));
        }
        Ok(())
    }
}

pub type Hits = Arc<parking_lot::Mutex<Vec<HashMap<String, String>>>>;

pub fn ts(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .expect("valid timestamp")
        .with_timezone(&Utc)
}
