// src/ingest/providers/museion.rs
//! Museion (Bolzano museum of modern art) programme, scraped from HTML.

use async_trait::async_trait;
use chrono::{Duration, NaiveDate, NaiveTime, Utc};
use metrics::counter;
use once_cell::sync::Lazy;
use reqwest::{Client, Url};
use scraper::Selector;

use crate::ingest::helpers::{finalize, link_identity, resolve_link};
use crate::ingest::http::{default_client, get_text};
use crate::ingest::providers::{parse_html_document, select_attr, select_text, selector};
use crate::ingest::types::{Event, EventProvider, FetchContext, FetchError, RawEvent};

pub const SOURCE_NAME: &str = "museion";
pub const DEFAULT_URL: &str = "https://www.museion.it/en/events";

static ITEM: Lazy<Selector> = Lazy::new(|| selector(".preview-item"));
static TITLE: Lazy<Selector> = Lazy::new(|| selector(".preview-item__title"));
static LINK: Lazy<Selector> = Lazy::new(|| selector("a[href]"));
static IMAGE: Lazy<Selector> = Lazy::new(|| selector("img[src]"));
static META: Lazy<Selector> = Lazy::new(|| selector(".preview-item__meta"));

pub struct MuseionProvider {
    base_url: String,
    client: Client,
}

impl Default for MuseionProvider {
    fn default() -> Self {
        Self::with_client(default_client())
    }
}

impl MuseionProvider {
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

    pub fn parse_listing(html: &str, base: &Url) -> Result<Vec<RawEvent>, FetchError> {
        let doc = parse_html_document(html)?;
        let mut out = Vec::new();

        for block in doc.select(&ITEM) {
            let title = select_text(&block, &TITLE);
            if title.is_empty() {
                continue;
            }
            let Some(link) =
                select_attr(&block, &LINK, "href").and_then(|href| resolve_link(base, &href))
            else {
                continue;
            };
            let image = select_attr(&block, &IMAGE, "src").and_then(|src| resolve_link(base, &src));

            out.push(
                RawEvent::new()
                    .with("title", title)
                    .with("link", link)
                    .with("image", image.unwrap_or_default())
                    .with("meta", select_text(&block, &META)),
            );
        }
        Ok(out)
    }
}

/// Leading "dd.mm.yyyy" of a meta line like "10.02.2026 | Talk".
pub fn parse_meta_date(meta: &str) -> Option<NaiveDate> {
    let head = meta.split('|').next()?.trim();
    NaiveDate::parse_from_str(head, "%d.%m.%Y").ok()
}

#[async_trait]
impl EventProvider for MuseionProvider {
    fn source_name(&self) -> &'static str {
        SOURCE_NAME
    }

    async fn fetch_events(&self, ctx: &FetchContext) -> Result<Vec<RawEvent>, FetchError> {
        let base = Url::parse(&self.base_url)
            .map_err(|e| FetchError::Malformed(format!("bad base url {}: {e}", self.base_url)))?;
        let body = get_text(&self.client, ctx, &self.base_url, &[]).await?;
        let out = Self::parse_listing(&body, &base)?;

        if out.is_empty() {
            tracing::warn!(
                target: "ingest",
                provider = SOURCE_NAME,
                url = %self.base_url,
                "scraper found 0 events (check for DOM structure changes)"
            );
        }
        counter!("ingest_events_total").increment(out.len() as u64);
        Ok(out)
    }

    fn map_event(&self, raw: &RawEvent) -> Option<Event> {
        let link = raw.str("link").unwrap_or_default().to_string();
        let source_id = link_identity(SOURCE_NAME, &link);
        let meta = raw.str("meta").unwrap_or_default().to_string();

        let date_start = match parse_meta_date(&meta) {
            Some(day) => day.and_time(NaiveTime::MIN).and_utc(),
            None => {
                if !meta.is_empty() {
                    tracing::warn!(target: "ingest", provider = SOURCE_NAME, value = %meta, "unparsable date, using now");
                }
                Utc::now()
            }
        };

        finalize(Event {
            id: source_id.clone(),
            title: raw.str("title").unwrap_or_default().to_string(),
            description: meta,
            date_start,
            date_end: date_start + Duration::hours(2),
            location: "Museion, Bolzano".to_string(),
            url: link,
            image_url: raw.str("image").map(str::to_string),
            source_name: SOURCE_NAME.to_string(),
            source_id,
            topics: Default::default(),
            category: "art".to_string(),
            is_new: true,
            latitude: 46.4983,
            longitude: 11.3490,
        })
    }
}
