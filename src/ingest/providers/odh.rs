// src/ingest/providers/odh.rs
//! Open Data Hub tourism events (South Tyrol).

use async_trait::async_trait;
use chrono::Utc;
use metrics::counter;
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;

use crate::ingest::helpers::{build_odh_event, finalize, OdhDefaults, UNKNOWN_LOCATION};
use crate::ingest::http::{default_client, get_json};
use crate::ingest::types::{Event, EventProvider, FetchContext, FetchError, RawEvent};

pub const SOURCE_NAME: &str = "odh";
pub const DEFAULT_URL: &str = "https://tourism.opendatahub.com/v1/Event";

const PAGE_SIZE: u32 = 50;

/// One page of the ODH `/v1/Event` listing.
#[derive(Debug, Deserialize)]
pub(crate) struct OdhPage {
    #[serde(rename = "TotalResults", default)]
    pub total_results: Option<u64>,
    #[serde(rename = "TotalPages", default)]
    pub total_pages: Option<u64>,
    #[serde(rename = "Items")]
    pub items: Vec<Value>,
}

impl OdhPage {
    pub(crate) fn into_raw_events(self) -> Vec<RawEvent> {
        self.items
            .into_iter()
            .filter_map(RawEvent::from_value)
            .collect()
    }
}

pub struct OdhProvider {
    base_url: String,
    client: Client,
}

impl Default for OdhProvider {
    fn default() -> Self {
        Self::with_client(default_client())
    }
}

impl OdhProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_client(client: Client) -> Self {
        Self {
            base_url: DEFAULT_URL.to_string(),
            client,
        }
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }
}

#[async_trait]
impl EventProvider for OdhProvider {
    fn source_name(&self) -> &'static str {
        SOURCE_NAME
    }

    async fn fetch_events(&self, ctx: &FetchContext) -> Result<Vec<RawEvent>, FetchError> {
        let query = [
            ("pagenumber", "1".to_string()),
            ("pagesize", PAGE_SIZE.to_string()),
            ("active", "true".to_string()),
            ("odalactive", "true".to_string()),
            ("datefrom", Utc::now().format("%Y-%m-%d").to_string()),
        ];
        let page: OdhPage = get_json(&self.client, ctx, &self.base_url, &query).await?;
        let out = page.into_raw_events();
        counter!("ingest_events_total").increment(out.len() as u64);
        Ok(out)
    }

    fn map_event(&self, raw: &RawEvent) -> Option<Event> {
        let defaults = OdhDefaults {
            location: UNKNOWN_LOCATION,
            url: None,
            category: "general",
        };
        finalize(build_odh_event(raw, SOURCE_NAME, defaults, Utc::now()))
    }
}
