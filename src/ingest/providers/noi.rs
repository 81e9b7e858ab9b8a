// src/ingest/providers/noi.rs
//! NOI Techpark events, carved out of the Open Data Hub listing for Bolzano.

use async_trait::async_trait;
use chrono::Utc;
use metrics::counter;
use reqwest::Client;

use crate::ingest::contains_alias;
use crate::ingest::helpers::{
    build_odh_event, finalize, localized_all, localized_names, OdhDefaults,
};
use crate::ingest::http::{default_client, get_json};
use crate::ingest::providers::odh::OdhPage;
use crate::ingest::types::{Event, EventProvider, FetchContext, FetchError, RawEvent};

pub const SOURCE_NAME: &str = "noi";
pub const DEFAULT_URL: &str = "https://tourism.api.opendatahub.com/v1/Event";
pub const LANDING_URL: &str = "https://noi.bz.it/en/events";

/// Substrings that tie an ODH event to the techpark.
pub const ALIASES: [&str; 3] = ["NOI", "VOLTA", "TECHPARK"];

const PAGE_SIZE: usize = 200;
const MAX_PAGES: u64 = 50;

pub struct NoiProvider {
    base_url: String,
    client: Client,
}

impl Default for NoiProvider {
    fn default() -> Self {
        Self::with_client(default_client())
    }
}

impl NoiProvider {
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

/// Title, district name or contact address mentions an alias, in any language.
pub fn is_noi_event(raw: &RawEvent) -> bool {
    let hit = |s: &str| contains_alias(s, &ALIASES);

    if let Some(details) = raw.object("Detail") {
        if localized_all(details, "Title").into_iter().any(hit) {
            return true;
        }
    }

    if let Some(name) = raw
        .path(&["LocationInfo", "DistrictInfo", "Name"])
        .and_then(|v| v.as_object())
    {
        if localized_names(name).into_iter().any(hit) {
            return true;
        }
    }

    raw.object("ContactInfos")
        .map(|contacts| localized_all(contacts, "Address").into_iter().any(hit))
        .unwrap_or(false)
}

#[async_trait]
impl EventProvider for NoiProvider {
    fn source_name(&self) -> &'static str {
        SOURCE_NAME
    }

    async fn fetch_events(&self, ctx: &FetchContext) -> Result<Vec<RawEvent>, FetchError> {
        let mut matched = Vec::new();
        let mut seen: u64 = 0;
        let mut page_no: u64 = 1;

        loop {
            let query = [
                ("pagesize", PAGE_SIZE.to_string()),
                ("locationfilter", "Bolzano".to_string()),
                ("pagenumber", page_no.to_string()),
            ];
            let page: OdhPage = get_json(&self.client, ctx, &self.base_url, &query).await?;

            let page_len = page.items.len();
            if page_len == 0 {
                break;
            }
            seen += page_len as u64;

            let total_results = page.total_results;
            let total_pages = page.total_pages;
            matched.extend(page.into_raw_events().into_iter().filter(is_noi_event));

            let short_page = page_len < PAGE_SIZE;
            let past_total = total_results.is_some_and(|t| seen >= t)
                || total_pages.is_some_and(|t| page_no >= t);
            if short_page || past_total {
                break;
            }
            if page_no >= MAX_PAGES {
                tracing::warn!(target: "ingest", provider = SOURCE_NAME, pages = page_no, "page cap reached");
                break;
            }
            page_no += 1;
        }

        tracing::debug!(target: "ingest", provider = SOURCE_NAME, seen, matched = matched.len(), "noi pages scanned");
        counter!("ingest_events_total").increment(matched.len() as u64);
        Ok(matched)
    }

    fn map_event(&self, raw: &RawEvent) -> Option<Event> {
        let defaults = OdhDefaults {
            location: "NOI Techpark",
            url: Some(LANDING_URL),
            category: "technology",
        };
        finalize(build_odh_event(raw, SOURCE_NAME, defaults, Utc::now()))
    }
}
