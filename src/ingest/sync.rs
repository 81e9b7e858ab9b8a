// src/ingest/sync.rs
//! Fetch → map → upsert across every provider, keyed by `(source_name, source_id)`.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use futures::stream::{self, StreamExt};
use metrics::{counter, gauge};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::ingest::ensure_metrics_described;
use crate::ingest::types::{Event, EventProvider, FetchContext, FetchError};
use crate::store::{params, Collection, Record, RecordStore, StoreError};

pub const EVENTS_COLLECTION: &str = "events";
pub const LOOKUP_FILTER: &str = "source_name = {:source_name} && source_id = {:source_id}";
/// Fields that identify one stored event.
pub const EVENT_KEY: [&str; 2] = ["source_name", "source_id"];

/// Shared deadline for one whole multi-provider run.
pub const SYNC_DEADLINE: Duration = Duration::from_secs(5 * 60);
pub const DEFAULT_MAX_CONCURRENCY: usize = 4;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncStats {
    pub provider: String,
    pub new: usize,
    pub updated: usize,
    pub errors: usize,
}

impl SyncStats {
    pub fn new(provider: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            ..Default::default()
        }
    }

    fn merge(&mut self, other: &SyncStats) {
        self.new += other.new;
        self.updated += other.updated;
        self.errors += other.errors;
    }
}

#[derive(Debug, Clone, Copy)]
pub struct SyncOptions {
    pub deadline: Duration,
    pub max_concurrency: usize,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            deadline: SYNC_DEADLINE,
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
        }
    }
}

/// One run at a time per store: shared by the scheduler and the admin trigger.
#[derive(Debug, Clone, Default)]
pub struct SyncGate(Arc<Mutex<()>>);

impl SyncGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Waits for the running sync, if any, to finish.
    pub async fn enter(&self) -> OwnedMutexGuard<()> {
        self.0.clone().lock_owned().await
    }

    /// `None` while another sync holds the gate.
    pub fn try_enter(&self) -> Option<OwnedMutexGuard<()>> {
        self.0.clone().try_lock_owned().ok()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("fetch failed: {0}")]
    Fetch(#[from] FetchError),
    #[error("store unavailable: {0}")]
    Store(#[from] StoreError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Created,
    Updated,
}

/// Aggregated result returned by the admin trigger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncReport {
    pub message: String,
    pub providers: BTreeMap<String, SyncStats>,
    pub total_new: usize,
    pub total_updated: usize,
    pub total_errors: usize,
}

impl SyncReport {
    pub fn from_stats(providers: BTreeMap<String, SyncStats>) -> Self {
        let total_new = providers.values().map(|s| s.new).sum();
        let total_updated = providers.values().map(|s| s.updated).sum();
        let total_errors = providers.values().map(|s| s.errors).sum();
        Self {
            message: format!(
                "sync finished: {total_new} new, {total_updated} updated, {total_errors} errors"
            ),
            providers,
            total_new,
            total_updated,
            total_errors,
        }
    }
}

/// Runs every provider under one shared deadline.
pub async fn sync_all(
    providers: &[Box<dyn EventProvider>],
    store: &dyn RecordStore,
    opts: SyncOptions,
) -> BTreeMap<String, SyncStats> {
    let ctx = FetchContext::with_timeout(opts.deadline);
    sync_all_with_context(providers, store, &ctx, opts.max_concurrency).await
}

/// Like [`sync_all`] but with a caller-owned context (cancellation from shutdown, tests).
pub async fn sync_all_with_context(
    providers: &[Box<dyn EventProvider>],
    store: &dyn RecordStore,
    ctx: &FetchContext,
    max_concurrency: usize,
) -> BTreeMap<String, SyncStats> {
    ensure_metrics_described();
    let started = Instant::now();

    let runs: Vec<_> = providers
        .iter()
        .map(|p| run_isolated(p.as_ref(), store, ctx))
        .collect();
    let results: Vec<SyncStats> = stream::iter(runs)
        .buffer_unordered(max_concurrency.max(1))
        .collect()
        .await;

    let mut out: BTreeMap<String, SyncStats> = BTreeMap::new();
    for stats in results {
        out.entry(stats.provider.clone())
            .and_modify(|acc| acc.merge(&stats))
            .or_insert(stats);
    }

    if let Err(e) = store.flush().await {
        counter!("sync_flush_failures_total").increment(1);
        tracing::error!(target: "sync", error = %e, "failed to persist store after sync");
    }

    counter!("sync_runs_total").increment(1);
    gauge!("sync_last_run_ts").set(Utc::now().timestamp() as f64);
    tracing::info!(
        target: "sync",
        providers = out.len(),
        new = out.values().map(|s| s.new).sum::<usize>(),
        updated = out.values().map(|s| s.updated).sum::<usize>(),
        errors = out.values().map(|s| s.errors).sum::<usize>(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "sync run finished"
    );
    out
}

/// A provider-level failure becomes a single error in its stats.
async fn run_isolated(
    provider: &dyn EventProvider,
    store: &dyn RecordStore,
    ctx: &FetchContext,
) -> SyncStats {
    let name = provider.source_name();
    match sync_provider(provider, store, ctx).await {
        Ok(stats) => {
            tracing::info!(
                target: "sync",
                provider = name,
                new = stats.new,
                updated = stats.updated,
                errors = stats.errors,
                "provider synced"
            );
            stats
        }
        Err(e) => {
            tracing::warn!(target: "sync", provider = name, error = %e, "provider failed");
            counter!("sync_provider_failures_total", "provider" => name).increment(1);
            SyncStats {
                errors: 1,
                ..SyncStats::new(name)
            }
        }
    }
}

pub async fn sync_provider(
    provider: &dyn EventProvider,
    store: &dyn RecordStore,
    ctx: &FetchContext,
) -> Result<SyncStats, SyncError> {
    let name = provider.source_name();
    let collection = store.find_collection_by_name(EVENTS_COLLECTION).await?;
    let raws = provider.fetch_events(ctx).await?;

    let mut stats = SyncStats::new(name);
    for raw in &raws {
        let Some(mut event) = provider.map_event(raw) else {
            continue;
        };
        event.source_name = name.to_string();

        match upsert_event(store, &collection, &event).await {
            Ok(UpsertOutcome::Created) => stats.new += 1,
            Ok(UpsertOutcome::Updated) => stats.updated += 1,
            Err(e) => {
                stats.errors += 1;
                tracing::warn!(
                    target: "sync",
                    provider = name,
                    source_id = %event.source_id,
                    error = %e,
                    "failed to save event"
                );
            }
        }
    }

    counter!("sync_events_new_total", "provider" => name).increment(stats.new as u64);
    counter!("sync_events_updated_total", "provider" => name).increment(stats.updated as u64);
    counter!("sync_item_errors_total", "provider" => name).increment(stats.errors as u64);
    Ok(stats)
}

/// Creates or overwrites the record for `event`. A lookup failure is treated as "absent".
///
/// Creation goes through [`RecordStore::save_unique`], so a concurrent run that
/// inserted the same key first turns this call into an update.
pub async fn upsert_event(
    store: &dyn RecordStore,
    collection: &Collection,
    event: &Event,
) -> Result<UpsertOutcome, StoreError> {
    if let Some(existing) = lookup(store, collection, event).await {
        return update(store, existing, event).await;
    }

    let mut record = store.create_record(collection);
    populate_record(&mut record, event, true)?;
    match store.save_unique(&mut record, &EVENT_KEY).await {
        Ok(()) => Ok(UpsertOutcome::Created),
        Err(conflict @ StoreError::Conflict { .. }) => {
            tracing::debug!(
                target: "sync",
                source_name = %event.source_name,
                source_id = %event.source_id,
                "key taken by a concurrent run, updating"
            );
            match lookup(store, collection, event).await {
                Some(existing) => update(store, existing, event).await,
                None => Err(conflict),
            }
        }
        Err(e) => Err(e),
    }
}

async fn lookup(store: &dyn RecordStore, collection: &Collection, event: &Event) -> Option<Record> {
    let bind = params([
        ("source_name", event.source_name.as_str()),
        ("source_id", event.source_id.as_str()),
    ]);
    match store
        .find_records_by_filter(collection, LOOKUP_FILTER, "", 1, 0, &bind)
        .await
    {
        Ok(found) => found.into_iter().next(),
        Err(e) => {
            tracing::debug!(
                target: "sync",
                source_name = %event.source_name,
                source_id = %event.source_id,
                error = %e,
                "lookup failed, creating"
            );
            None
        }
    }
}

/// Overwrites `existing` in place, keeping its stored `is_new`.
async fn update(
    store: &dyn RecordStore,
    mut existing: Record,
    event: &Event,
) -> Result<UpsertOutcome, StoreError> {
    let is_new = existing.get_bool("is_new");
    populate_record(&mut existing, event, is_new)?;
    store.save(&mut existing).await?;
    Ok(UpsertOutcome::Updated)
}

/// Writes every mutable field of `event`; `is_new` is supplied by the caller.
pub fn populate_record(record: &mut Record, event: &Event, is_new: bool) -> Result<(), StoreError> {
    record.set("title", event.title.as_str());
    record.set("description", event.description.as_str());
    record.set_datetime("date_start", event.date_start);
    record.set_datetime("date_end", event.date_end);
    record.set("location", event.location.as_str());
    record.set("url", event.url.as_str());
    record.set("image_url", event.image_url.clone().map_or(Value::Null, Value::from));
    record.set("source_name", event.source_name.as_str());
    record.set("source_id", event.source_id.as_str());
    record.set_json("topics", &event.topics)?;
    record.set("category", event.category.as_str());
    record.set("is_new", is_new);
    record.set("latitude", event.latitude);
    record.set("longitude", event.longitude);
    Ok(())
}

/// Inverse of [`populate_record`]; `None` when the stored dates are unreadable.
pub fn record_to_event(record: &Record) -> Option<Event> {
    let date_start = record.get_datetime("date_start")?;
    let date_end = record.get_datetime("date_end")?.max(date_start);
    let image_url = Some(record.get_string("image_url")).filter(|s| !s.is_empty());

    Some(Event {
        id: record.id.clone(),
        title: record.get_string("title"),
        description: record.get_string("description"),
        date_start,
        date_end,
        location: record.get_string("location"),
        url: record.get_string("url"),
        image_url,
        source_name: record.get_string("source_name"),
        source_id: record.get_string("source_id"),
        topics: record.get_json::<BTreeSet<String>>("topics").unwrap_or_default(),
        category: record.get_string("category"),
        is_new: record.get_bool("is_new"),
        latitude: record.get_float("latitude"),
        longitude: record.get_float("longitude"),
    })
}
