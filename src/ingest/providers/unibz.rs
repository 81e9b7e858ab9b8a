// src/ingest/providers/unibz.rs
//! unibz guide events, scraped from the public HTML listing.

use async_trait::async_trait;
use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use metrics::counter;
use once_cell::sync::Lazy;
use reqwest::{Client, Url};
use scraper::Selector;

use crate::ingest::helpers::{clamp_end, finalize, link_identity, resolve_link};
use crate::ingest::http::{default_client, get_text};
use crate::ingest::providers::{parse_html_document, select_attr, select_text, selector};
use crate::ingest::types::{Event, EventProvider, FetchContext, FetchError, RawEvent};

pub const SOURCE_NAME: &str = "unibz";
pub const DEFAULT_URL: &str = "https://guide.unibz.it/en/events/";

static ITEM: Lazy<Selector> = Lazy::new(|| selector(".mediaItem"));
static TITLE_LINK: Lazy<Selector> = Lazy::new(|| selector(".mediaItem_title a"));
static DATE: Lazy<Selector> = Lazy::new(|| selector(".mediaItem_content .u-fw-bold"));
static BODY: Lazy<Selector> = Lazy::new(|| selector(".mediaItem_content .typography"));

pub struct UnibzProvider {
    base_url: String,
    client: Client,
}

impl Default for UnibzProvider {
    fn default() -> Self {
        Self::with_client(default_client())
    }
}

impl UnibzProvider {
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

    /// One raw event per `.mediaItem` block with a title and a link.
    pub fn parse_listing(html: &str, base: &Url) -> Result<Vec<RawEvent>, FetchError> {
        let doc = parse_html_document(html)?;
        let mut out = Vec::new();

        for block in doc.select(&ITEM) {
            let title = select_text(&block, &TITLE_LINK);
            if title.is_empty() {
                continue;
            }
            let Some(link) = select_attr(&block, &TITLE_LINK, "href")
                .and_then(|href| resolve_link(base, &href))
            else {
                continue;
            };

            out.push(
                RawEvent::new()
                    .with("title", title)
                    .with("link", link)
                    .with("date_text", select_text(&block, &DATE))
                    .with("description", select_text(&block, &BODY)),
            );
        }
        Ok(out)
    }
}

/// "10 Feb 2026 16:00-17:00" → (start, end). A missing time range means midnight start.
pub fn parse_date_range(text: &str) -> Option<(DateTime<Utc>, Option<DateTime<Utc>>)> {
    let parts: Vec<&str> = text.split_whitespace().collect();
    if parts.len() < 3 {
        return None;
    }
    let day = NaiveDate::parse_from_str(&parts[..3].join(" "), "%d %b %Y").ok()?;

    let Some(range) = parts.get(3) else {
        return Some((day.and_time(NaiveTime::MIN).and_utc(), None));
    };
    let mut times = range.split('-').map(str::trim);
    let at = |t: &str| -> Option<DateTime<Utc>> {
        let time = NaiveTime::parse_from_str(t, "%H:%M").ok()?;
        Some(NaiveDateTime::new(day, time).and_utc())
    };

    let start = times.next().and_then(at)?;
    let end = times.next().and_then(at);
    Some((start, end))
}

#[async_trait]
impl EventProvider for UnibzProvider {
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
        let now = Utc::now();
        let link = raw.str("link").unwrap_or_default().to_string();
        let source_id = link_identity(SOURCE_NAME, &link);
        let date_text = raw.str("date_text").unwrap_or_default();

        let (date_start, date_end) = match parse_date_range(date_text) {
            Some((start, end)) => {
                let end = end.unwrap_or(start + Duration::hours(2));
                (start, clamp_end(start, end))
            }
            None => {
                if !date_text.is_empty() {
                    tracing::warn!(target: "ingest", provider = SOURCE_NAME, value = date_text, "unparsable date, using now");
                }
                (now, now + Duration::hours(2))
            }
        };

        let description = raw
            .str("description")
            .or(raw.str("date_text"))
            .unwrap_or_default()
            .to_string();

        finalize(Event {
            id: source_id.clone(),
            title: raw.str("title").unwrap_or_default().to_string(),
            description,
            date_start,
            date_end,
            location: "unibz Bolzano".to_string(),
            url: link,
            image_url: None,
            source_name: SOURCE_NAME.to_string(),
            source_id,
            topics: Default::default(),
            category: "education".to_string(),
            is_new: true,
            latitude: 0.0,
            longitude: 0.0,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn date_range_with_times() {
        let (start, end) = parse_date_range("10 Feb 2026 16:00-17:00").unwrap();
        assert_eq!(start, Utc.with_ymd_and_hms(2026, 2, 10, 16, 0, 0).unwrap());
        assert_eq!(end, Some(Utc.with_ymd_and_hms(2026, 2, 10, 17, 0, 0).unwrap()));
    }

    #[test]
    fn date_only_starts_at_midnight() {
        let (start, end) = parse_date_range("03 Mar 2026").unwrap();
        assert_eq!(start, Utc.with_ymd_and_hms(2026, 3, 3, 0, 0, 0).unwrap());
        assert_eq!(end, None);
    }

    #[test]
    fn garbage_dates_do_not_parse() {
        assert!(parse_date_range("soon").is_none());
        assert!(parse_date_range("").is_none());
    }

    #[test]
    fn range_crossing_midnight_is_clamped() {
        let raw = RawEvent::new()
            .with("title", "Late lab night")
            .with("link", "https://guide.unibz.it/en/events/late-lab/")
            .with("date_text", "10 Feb 2026 23:00-01:00")
            .with("description", "Hands-on session in the robotics lab");
        let ev = UnibzProvider::new().map_event(&raw).unwrap();
        assert_eq!(ev.date_end, ev.date_start);
        assert_eq!(ev.source_id, "unibz-late-lab");
    }
}
