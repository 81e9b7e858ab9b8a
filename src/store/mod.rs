// src/store/mod.rs
//! Record store seam: collections of loosely-typed records, looked up by
//! small parametrized filter expressions.

pub mod filter;
pub mod memory;

use std::collections::HashMap;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub use filter::FilterError;
pub use memory::MemoryStore;

/// Named values bound to `{:name}` placeholders.
pub type Params = HashMap<String, Value>;

pub fn params<K, V, I>(pairs: I) -> Params
where
    I: IntoIterator<Item = (K, V)>,
    K: Into<String>,
    V: Into<Value>,
{
    pairs
        .into_iter()
        .map(|(k, v)| (k.into(), v.into()))
        .collect()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Collection {
    pub name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Record {
    /// Empty until the store assigns one on first save.
    #[serde(default)]
    pub id: String,
    pub collection: String,
    #[serde(default)]
    pub fields: Map<String, Value>,
}

impl Record {
    pub fn new(collection: &Collection) -> Self {
        Self {
            id: String::new(),
            collection: collection.name.clone(),
            fields: Map::new(),
        }
    }

    pub fn is_unsaved(&self) -> bool {
        self.id.is_empty()
    }

    pub fn set(&mut self, name: &str, value: impl Into<Value>) {
        self.fields.insert(name.to_string(), value.into());
    }

    /// Datetimes are kept as RFC 3339 UTC strings with millisecond precision.
    pub fn set_datetime(&mut self, name: &str, value: DateTime<Utc>) {
        self.set(name, format_datetime(value));
    }

    pub fn set_json<T: Serialize>(&mut self, name: &str, value: &T) -> Result<(), StoreError> {
        let v = serde_json::to_value(value)?;
        self.fields.insert(name.to_string(), v);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        if name == "id" {
            return None;
        }
        self.fields.get(name)
    }

    pub fn get_string(&self, name: &str) -> String {
        match self.get(name) {
            Some(Value::String(s)) => s.clone(),
            Some(Value::Null) | None => String::new(),
            Some(other) => other.to_string(),
        }
    }

    pub fn get_bool(&self, name: &str) -> bool {
        match self.get(name) {
            Some(Value::Bool(b)) => *b,
            Some(Value::String(s)) => s.eq_ignore_ascii_case("true"),
            Some(Value::Number(n)) => n.as_f64().is_some_and(|x| x != 0.0),
            _ => false,
        }
    }

    pub fn get_float(&self, name: &str) -> f64 {
        match self.get(name) {
            Some(Value::Number(n)) => n.as_f64().unwrap_or(0.0),
            Some(Value::String(s)) => s.trim().parse().unwrap_or(0.0),
            _ => 0.0,
        }
    }

    pub fn get_datetime(&self, name: &str) -> Option<DateTime<Utc>> {
        self.get(name)
            .and_then(Value::as_str)
            .and_then(parse_stored_datetime)
    }

    /// Structured JSON, or a string holding serialized JSON.
    pub fn get_json<T: DeserializeOwned>(&self, name: &str) -> Option<T> {
        match self.get(name)? {
            Value::String(s) => serde_json::from_str(s).ok(),
            other => serde_json::from_value(other.clone()).ok(),
        }
    }

    /// Field lookup used by filters and sorting; `id` resolves to the record id.
    pub(crate) fn field_value(&self, name: &str) -> Value {
        if name == "id" {
            return Value::String(self.id.clone());
        }
        self.fields.get(name).cloned().unwrap_or(Value::Null)
    }

    /// True when both records carry equal values for every field of `key`.
    pub(crate) fn same_key(&self, other: &Record, key: &[&str]) -> bool {
        key.iter().all(|f| self.field_value(f) == other.field_value(f))
    }

    pub(crate) fn conflict(&self, key: &[&str]) -> StoreError {
        let key = key
            .iter()
            .map(|f| format!("{f}={}", self.get_string(f)))
            .collect::<Vec<_>>()
            .join(", ");
        StoreError::Conflict {
            collection: self.collection.clone(),
            key,
        }
    }
}

pub fn format_datetime(value: DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub(crate) fn parse_stored_datetime(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s.trim())
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("collection not found: {0}")]
    CollectionNotFound(String),

    #[error("invalid filter: {0}")]
    Filter(#[from] FilterError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("store backend error: {0}")]
    Backend(String),

    #[error("record with {key} already exists in {collection}")]
    Conflict { collection: String, key: String },
}

/// Persistence collaborator consumed by the sync engine and the read path.
#[async_trait::async_trait]
pub trait RecordStore: Send + Sync {
    async fn find_collection_by_name(&self, name: &str) -> Result<Collection, StoreError>;

    /// `limit == 0` means unlimited. Empty `filter`/`sort` match everything / keep insertion order.
    async fn find_records_by_filter(
        &self,
        collection: &Collection,
        filter: &str,
        sort: &str,
        limit: usize,
        offset: usize,
        params: &Params,
    ) -> Result<Vec<Record>, StoreError>;

    fn create_record(&self, collection: &Collection) -> Record {
        Record::new(collection)
    }

    /// Inserts unsaved records (assigning an id) or replaces by id.
    async fn save(&self, record: &mut Record) -> Result<(), StoreError>;

    /// Like [`RecordStore::save`], but fails with [`StoreError::Conflict`] when another
    /// record already holds the same values for `key`.
    ///
    /// The default checks then writes and is only as atomic as the backend's own
    /// unique index. [`MemoryStore`] does both under one lock.
    async fn save_unique(&self, record: &mut Record, key: &[&str]) -> Result<(), StoreError> {
        let collection = Collection {
            name: record.collection.clone(),
        };
        let filter = key
            .iter()
            .map(|f| format!("{f} = {{:{f}}}"))
            .collect::<Vec<_>>()
            .join(" && ");
        let bind: Params = key.iter().map(|f| (f.to_string(), record.field_value(f))).collect();

        let taken = self
            .find_records_by_filter(&collection, &filter, "", 2, 0, &bind)
            .await?;
        if taken.iter().any(|r| r.id != record.id) {
            return Err(record.conflict(key));
        }
        self.save(record).await
    }

    /// Makes earlier saves durable. No-op for stores that write through.
    async fn flush(&self) -> Result<(), StoreError> {
        Ok(())
    }
}
