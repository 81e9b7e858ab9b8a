// src/ingest/providers/euro_hackathons.rs
use std::collections::BTreeSet;

use async_trait::async_trait;
use chrono::Utc;
use metrics::counter;
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;

use crate::ingest::helpers::{clamp_end, datetime_or_now, fallback_id, finalize, UNTITLED};
use crate::ingest::http::{default_client, get_json};
use crate::ingest::types::{value_str, Event, EventProvider, FetchContext, FetchError, RawEvent};

pub const SOURCE_NAME: &str = "euro_hackathons";
pub const DEFAULT_URL: &str = "https://euro-hackathons.vercel.app/api/hackathons";

#[derive(Debug, Deserialize)]
struct HackathonsResponse {
    data: Vec<Value>,
}

pub struct EuroHackathonsProvider {
    base_url: String,
    client: Client,
}

impl Default for EuroHackathonsProvider {
    fn default() -> Self {
        Self::with_client(default_client())
    }
}

impl EuroHackathonsProvider {
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

/// "City, CC", either part alone, or empty.
fn format_location(city: Option<&str>, country: Option<&str>) -> String {
    match (city, country) {
        (Some(c), Some(cc)) => format!("{c}, {cc}"),
        (Some(c), None) => c.to_string(),
        (None, Some(cc)) => cc.to_string(),
        (None, None) => String::new(),
    }
}

#[async_trait]
impl EventProvider for EuroHackathonsProvider {
    fn source_name(&self) -> &'static str {
        SOURCE_NAME
    }

    async fn fetch_events(&self, ctx: &FetchContext) -> Result<Vec<RawEvent>, FetchError> {
        let query = [("status", "upcoming".to_string())];
        let resp: HackathonsResponse = get_json(&self.client, ctx, &self.base_url, &query).await?;
        let out: Vec<RawEvent> = resp.data.into_iter().filter_map(RawEvent::from_value).collect();
        counter!("ingest_events_total").increment(out.len() as u64);
        Ok(out)
    }

    fn map_event(&self, raw: &RawEvent) -> Option<Event> {
        let now = Utc::now();
        let url = raw.str("url").unwrap_or_default().to_string();
        let source_id = raw.id_string("id").unwrap_or_else(|| {
            fallback_id(
                Some(&url),
                raw.str("name").unwrap_or_default(),
                raw.str("date_start").unwrap_or_default(),
            )
        });

        let date_start = datetime_or_now(raw.str("date_start"), now, SOURCE_NAME, "date_start");
        let date_end = datetime_or_now(raw.str("date_end"), now, SOURCE_NAME, "date_end");

        let topics: BTreeSet<String> = raw
            .array("topics")
            .map(|list| list.iter().filter_map(value_str).map(str::to_string).collect())
            .unwrap_or_default();

        finalize(Event {
            id: source_id.clone(),
            title: raw.str("name").unwrap_or(UNTITLED).to_string(),
            description: raw.str("notes").unwrap_or_default().to_string(),
            date_start,
            date_end: clamp_end(date_start, date_end),
            location: format_location(raw.str("city"), raw.str("country_code")),
            url,
            image_url: None,
            source_name: SOURCE_NAME.to_string(),
            source_id,
            topics,
            category: "hackathon".to_string(),
            is_new: true,
            latitude: raw.f64("latitude").unwrap_or(0.0),
            longitude: raw.f64("longitude").unwrap_or(0.0),
        })
    }
}
