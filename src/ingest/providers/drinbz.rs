// src/ingest/providers/drinbz.rs
//! Drinbz WordPress posts (Bolzano nightlife listings).

use async_trait::async_trait;
use chrono::{Duration, Utc};
use metrics::counter;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::ingest::helpers::{datetime_or_now, fallback_id, finalize, parse_datetime, UNTITLED};
use crate::ingest::http::{default_client, get_json};
use crate::ingest::normalize_text;
use crate::ingest::types::{Event, EventProvider, FetchContext, FetchError, RawEvent};

pub const SOURCE_NAME: &str = "drinbz";
pub const DEFAULT_URL: &str = "https://drinbz.it/wp-json/wp/v2/posts";

const PER_PAGE: u32 = 20;
const DEFAULT_DURATION_HOURS: i64 = 2;

#[derive(Debug, Deserialize)]
struct Rendered {
    #[serde(default)]
    rendered: String,
}

#[derive(Debug, Deserialize)]
struct WpPost {
    #[serde(default)]
    id: Value,
    #[serde(default)]
    date: Option<String>,
    #[serde(default)]
    date_gmt: Option<String>,
    #[serde(default)]
    link: Option<String>,
    title: Option<Rendered>,
    content: Option<Rendered>,
    #[serde(default)]
    jetpack_featured_media_url: Option<String>,
}

impl WpPost {
    fn into_raw(self) -> RawEvent {
        RawEvent::new()
            .with("id", self.id)
            .with("date", json!(self.date))
            .with("date_gmt", json!(self.date_gmt))
            .with("link", json!(self.link))
            .with("title", self.title.map(|r| r.rendered).unwrap_or_default())
            .with("content", self.content.map(|r| r.rendered).unwrap_or_default())
            .with("image", json!(self.jetpack_featured_media_url))
    }
}

pub struct DrinbzProvider {
    base_url: String,
    client: Client,
}

impl Default for DrinbzProvider {
    fn default() -> Self {
        Self::with_client(default_client())
    }
}

impl DrinbzProvider {
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
impl EventProvider for DrinbzProvider {
    fn source_name(&self) -> &'static str {
        SOURCE_NAME
    }

    async fn fetch_events(&self, ctx: &FetchContext) -> Result<Vec<RawEvent>, FetchError> {
        let query = [("per_page", PER_PAGE.to_string())];
        let posts: Vec<WpPost> = get_json(&self.client, ctx, &self.base_url, &query).await?;
        tracing::debug!(target: "ingest", provider = SOURCE_NAME, posts = posts.len(), "fetched posts");

        let out: Vec<RawEvent> = posts.into_iter().map(WpPost::into_raw).collect();
        counter!("ingest_events_total").increment(out.len() as u64);
        Ok(out)
    }

    fn map_event(&self, raw: &RawEvent) -> Option<Event> {
        let now = Utc::now();
        let link = raw.str("link").unwrap_or_default().to_string();
        let source_id = raw.id_string("id").unwrap_or_else(|| {
            fallback_id(
                Some(&link),
                raw.str("title").unwrap_or_default(),
                raw.str("date").unwrap_or_default(),
            )
        });

        // `date_gmt` is UTC; `date` is site-local wall time.
        let date_start = match raw.str("date_gmt").and_then(parse_datetime) {
            Some(dt) => dt,
            None => datetime_or_now(raw.str("date"), now, SOURCE_NAME, "date"),
        };

        let title = raw
            .str("title")
            .map(normalize_text)
            .filter(|t| !t.is_empty())
            .unwrap_or_else(|| UNTITLED.to_string());

        finalize(Event {
            id: source_id.clone(),
            title,
            description: normalize_text(raw.str("content").unwrap_or_default()),
            date_start,
            date_end: date_start + Duration::hours(DEFAULT_DURATION_HOURS),
            location: "Bolzano".to_string(),
            url: link,
            image_url: raw.str("image").map(str::to_string),
            source_name: SOURCE_NAME.to_string(),
            source_id,
            topics: Default::default(),
            category: "nightlife".to_string(),
            is_new: true,
            latitude: 0.0,
            longitude: 0.0,
        })
    }
}
