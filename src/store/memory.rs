// src/store/memory.rs
//! In-process record store with an optional JSON snapshot on disk.
//!
//! Saves only touch memory; [`RecordStore::flush`] writes the snapshot when
//! anything changed since the last flush.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::store::filter::{compare_records, parse_sort, Filter};
use crate::store::{Collection, Params, Record, RecordStore, StoreError};

#[derive(Debug, Default, Serialize, Deserialize)]
struct Inner {
    #[serde(default)]
    next_id: u64,
    #[serde(default)]
    collections: BTreeMap<String, Vec<Record>>,
    /// Bumped on every write.
    #[serde(skip)]
    version: u64,
}

pub struct MemoryStore {
    inner: RwLock<Inner>,
    snapshot: Option<PathBuf>,
    /// Version last written to `snapshot`.
    flushed: tokio::sync::Mutex<u64>,
}

impl MemoryStore {
    /// Empty store holding the given collections.
    pub fn new(collections: &[&str]) -> Self {
        let mut inner = Inner::default();
        for name in collections {
            inner.collections.insert((*name).to_string(), Vec::new());
        }
        Self {
            inner: RwLock::new(inner),
            snapshot: None,
            flushed: tokio::sync::Mutex::new(0),
        }
    }

    /// Loads `path` if it exists; [`RecordStore::flush`] writes back to it.
    pub fn open(path: impl AsRef<Path>, collections: &[&str]) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        let mut inner = match std::fs::read_to_string(&path) {
            Ok(text) if !text.trim().is_empty() => serde_json::from_str::<Inner>(&text)?,
            Ok(_) => Inner::default(),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Inner::default(),
            Err(e) => return Err(e.into()),
        };
        for name in collections {
            inner.collections.entry((*name).to_string()).or_default();
        }
        let loaded: usize = inner.collections.values().map(Vec::len).sum();
        tracing::info!(target: "store", path = %path.display(), records = loaded, "opened snapshot");

        Ok(Self {
            inner: RwLock::new(inner),
            snapshot: Some(path),
            flushed: tokio::sync::Mutex::new(0),
        })
    }

    pub fn len(&self, collection: &str) -> usize {
        self.inner
            .read()
            .collections
            .get(collection)
            .map_or(0, Vec::len)
    }

    pub fn is_empty(&self, collection: &str) -> bool {
        self.len(collection) == 0
    }

    /// Every record of `collection` in insertion order.
    pub fn all(&self, collection: &str) -> Vec<Record> {
        self.inner
            .read()
            .collections
            .get(collection)
            .cloned()
            .unwrap_or_default()
    }

    /// Insert-or-replace under one write lock. A non-empty `key` must stay unique.
    fn write(&self, record: &mut Record, key: &[&str]) -> Result<(), StoreError> {
        let mut guard = self.inner.write();
        let inner = &mut *guard;
        let Some(records) = inner.collections.get_mut(&record.collection) else {
            return Err(StoreError::CollectionNotFound(record.collection.clone()));
        };

        if !key.is_empty()
            && records
                .iter()
                .any(|r| r.id != record.id && r.same_key(record, key))
        {
            return Err(record.conflict(key));
        }

        if record.is_unsaved() {
            inner.next_id += 1;
            record.id = format!("{:015x}", inner.next_id);
        }
        match records.iter_mut().find(|r| r.id == record.id) {
            Some(slot) => *slot = record.clone(),
            None => records.push(record.clone()),
        }
        inner.version += 1;
        Ok(())
    }
}

#[async_trait]
impl RecordStore for MemoryStore {
    async fn find_collection_by_name(&self, name: &str) -> Result<Collection, StoreError> {
        if self.inner.read().collections.contains_key(name) {
            Ok(Collection {
                name: name.to_string(),
            })
        } else {
            Err(StoreError::CollectionNotFound(name.to_string()))
        }
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
        let filter = Filter::parse(filter)?;
        let keys = parse_sort(sort)?;
        let now = Utc::now();

        let mut hits = Vec::new();
        {
            let inner = self.inner.read();
            let records = inner
                .collections
                .get(&collection.name)
                .ok_or_else(|| StoreError::CollectionNotFound(collection.name.clone()))?;
            for rec in records {
                if filter.matches(rec, params, now)? {
                    hits.push(rec.clone());
                }
            }
        }

        if !keys.is_empty() {
            hits.sort_by(|a, b| compare_records(a, b, &keys));
        }
        let take = if limit == 0 { usize::MAX } else { limit };
        Ok(hits.into_iter().skip(offset).take(take).collect())
    }

    async fn save(&self, record: &mut Record) -> Result<(), StoreError> {
        self.write(record, &[])
    }

    async fn save_unique(&self, record: &mut Record, key: &[&str]) -> Result<(), StoreError> {
        self.write(record, key)
    }

    async fn flush(&self) -> Result<(), StoreError> {
        let Some(path) = &self.snapshot else {
            return Ok(());
        };
        let mut flushed = self.flushed.lock().await;
        let (version, body) = {
            let inner = self.inner.read();
            if inner.version == *flushed {
                return Ok(());
            }
            (inner.version, serde_json::to_vec_pretty(&*inner)?)
        };

        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(dir).await?;
        }
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, &body).await?;
        tokio::fs::rename(&tmp, path).await?;

        *flushed = version;
        tracing::debug!(target: "store", path = %path.display(), bytes = body.len(), "snapshot written");
        Ok(())
    }
}
