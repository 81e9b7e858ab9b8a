// src/ingest/helpers.rs
//! Field extraction shared by the providers: localized lookups, date
//! fallback chains, coordinates, identity hashing and the quality gate.

use std::collections::BTreeSet;

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use reqwest::Url;
use serde_json::{Map, Value};

use crate::geo::GeoPoint;
use crate::ingest::types::{value_f64, value_str, Event, RawEvent};

/// Localized-field resolution order.
pub const LANGS: [&str; 3] = ["en", "it", "de"];

pub const UNTITLED: &str = "Untitled Event";
pub const UNKNOWN_LOCATION: &str = "Unknown";

/// Descriptions shorter than this (in characters, after trimming) are rejected.
pub const MIN_DESCRIPTION_CHARS: usize = 10;

/// First language (en → it → de) whose `obj[lang][key]` is a non-empty string.
pub fn localized<'a>(obj: &'a Map<String, Value>, key: &str) -> Option<&'a str> {
    LANGS.iter().find_map(|lang| {
        obj.get(*lang)
            .and_then(Value::as_object)
            .and_then(|inner| inner.get(key))
            .and_then(value_str)
    })
}

/// Every language's `obj[lang][key]`, in resolution order.
pub fn localized_all<'a>(obj: &'a Map<String, Value>, key: &'a str) -> Vec<&'a str> {
    LANGS
        .iter()
        .filter_map(|lang| {
            obj.get(*lang)
                .and_then(Value::as_object)
                .and_then(|inner| inner.get(key))
                .and_then(value_str)
        })
        .collect()
}

/// Language-keyed plain strings: `{"en": "...", "it": "..."}`.
pub fn localized_names(obj: &Map<String, Value>) -> Vec<&str> {
    LANGS
        .iter()
        .filter_map(|lang| obj.get(*lang).and_then(value_str))
        .collect()
}

/// Title and description from an ODH-style `Detail` block.
pub fn localized_details(raw: &RawEvent) -> (String, String) {
    let Some(details) = raw.object("Detail") else {
        return (UNTITLED.to_string(), String::new());
    };
    let title = localized(details, "Title").unwrap_or(UNTITLED).to_string();
    let description = localized(details, "BaseText")
        .or_else(|| localized(details, "IntroText"))
        .unwrap_or_default()
        .to_string();
    (title, description)
}

/// First `ImageGallery[].ImageUrl`.
pub fn first_image_url(raw: &RawEvent) -> Option<String> {
    raw.array("ImageGallery")?
        .first()?
        .as_object()?
        .get("ImageUrl")
        .and_then(value_str)
        .map(str::to_string)
}

/// City from `ContactInfos.{lang}.City`.
pub fn contact_city(raw: &RawEvent) -> Option<&str> {
    raw.object("ContactInfos")
        .and_then(|contacts| localized(contacts, "City"))
}

/// Coordinates from `GpsInfo[0]`, falling back to top-level `Latitude`/`Longitude`.
pub fn extract_gps(raw: &RawEvent) -> GeoPoint {
    let from_list = raw
        .array("GpsInfo")
        .and_then(|list| list.first())
        .and_then(Value::as_object)
        .map(|gps| {
            GeoPoint::new(
                gps.get("Latitude").and_then(value_f64).unwrap_or(0.0),
                gps.get("Longitude").and_then(value_f64).unwrap_or(0.0),
            )
        })
        .and_then(GeoPoint::known);

    from_list.unwrap_or_else(|| {
        GeoPoint::new(
            raw.f64("Latitude").unwrap_or(0.0),
            raw.f64("Longitude").unwrap_or(0.0),
        )
    })
}

/// Tries RFC 3339, then zone-less date+time (read as UTC), then date-only.
pub fn parse_datetime(s: &str) -> Option<DateTime<Utc>> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    for layout in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, layout) {
            return Some(naive.and_utc());
        }
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

/// Parsed value or `now`. Malformed (present but unparsable) input is logged.
pub fn datetime_or_now(
    value: Option<&str>,
    now: DateTime<Utc>,
    source: &str,
    field: &str,
) -> DateTime<Utc> {
    match value {
        None => now,
        Some(s) => parse_datetime(s).unwrap_or_else(|| {
            tracing::warn!(target: "ingest", provider = source, field, value = s, "unparsable date, using now");
            now
        }),
    }
}

/// `DateBegin`/`DateEnd` with now-fallbacks and end clamped to start.
pub fn parse_dates(raw: &RawEvent, now: DateTime<Utc>, source: &str) -> (DateTime<Utc>, DateTime<Utc>) {
    let start = datetime_or_now(raw.str("DateBegin"), now, source, "DateBegin");
    let end = datetime_or_now(raw.str("DateEnd"), now, source, "DateEnd");
    (start, clamp_end(start, end))
}

pub fn clamp_end(start: DateTime<Utc>, end: DateTime<Utc>) -> DateTime<Utc> {
    end.max(start)
}

/// Short stable id: hex of the first 8 bytes of SHA-256.
pub fn hash_id(input: &str) -> String {
    use sha2::{Digest, Sha256};
    use std::fmt::Write as _;

    let digest = Sha256::digest(input.as_bytes());
    let mut out = String::with_capacity(16);
    for b in digest.iter().take(8) {
        let _ = write!(&mut out, "{:02x}", b);
    }
    out
}

/// Identity for items without a source id: the link when there is one, else `title|date`.
pub fn fallback_id(link: Option<&str>, title: &str, date: &str) -> String {
    match link.map(str::trim).filter(|l| !l.is_empty()) {
        Some(link) => hash_id(link),
        None => hash_id(&format!("{}|{}", title.trim(), date.trim())),
    }
}

/// Last non-empty path segment of an absolute link.
pub fn link_slug(link: &str) -> Option<String> {
    let url = Url::parse(link.trim()).ok()?;
    url.path_segments()?
        .filter(|seg| !seg.is_empty() && *seg != ".")
        .last()
        .map(str::to_string)
}

/// `<prefix>-<slug>` from the link, or `<prefix>-<hash(link)>` when there is no slug.
pub fn link_identity(prefix: &str, link: &str) -> String {
    let base = link_slug(link).unwrap_or_else(|| hash_id(link.trim_end_matches('/')));
    format!("{prefix}-{base}")
}

/// Absolute link for `href` relative to `base`; absolute hrefs pass through.
pub fn resolve_link(base: &Url, href: &str) -> Option<String> {
    let href = href.trim();
    if href.is_empty() {
        return None;
    }
    base.join(href).ok().map(|u| u.to_string())
}

pub fn is_hex(s: &str) -> bool {
    !s.is_empty() && s.chars().all(|c| c.is_ascii_hexdigit())
}

/// Bare 32-char hex titles are leaked ids, not names.
pub fn looks_like_leaked_id(title: &str) -> bool {
    let t = title.trim();
    t.len() == 32 && is_hex(t)
}

pub fn passes_quality_filter(event: &Event) -> bool {
    !looks_like_leaked_id(&event.title)
        && event.description.trim().chars().count() >= MIN_DESCRIPTION_CHARS
}

/// Last step of every `map_event`: repair invariants, then apply the quality gate.
pub fn finalize(mut event: Event) -> Option<Event> {
    event.date_end = clamp_end(event.date_start, event.date_end);
    event.image_url = event
        .image_url
        .take()
        .map(|u| u.trim().to_string())
        .filter(|u| !u.is_empty());
    if event.location.trim().is_empty() {
        event.location = UNKNOWN_LOCATION.to_string();
    }

    if !passes_quality_filter(&event) {
        tracing::debug!(
            target: "ingest",
            provider = %event.source_name,
            source_id = %event.source_id,
            "rejected low-quality event"
        );
        metrics::counter!("ingest_rejected_total").increment(1);
        return None;
    }
    Some(event)
}

/// Defaults an ODH-shaped source fills in when the item lacks them.
#[derive(Debug, Clone, Copy)]
pub struct OdhDefaults<'a> {
    pub location: &'a str,
    /// Fixed landing page; `None` means a per-item `opendatahub.com` link.
    pub url: Option<&'a str>,
    pub category: &'a str,
}

/// Maps the Open Data Hub event shape shared by several sources.
pub fn build_odh_event(
    raw: &RawEvent,
    source_name: &str,
    defaults: OdhDefaults<'_>,
    now: DateTime<Utc>,
) -> Event {
    let (title, description) = localized_details(raw);
    let (date_start, date_end) = parse_dates(raw, now, source_name);
    let position = extract_gps(raw);

    let location = contact_city(raw)
        .unwrap_or(defaults.location)
        .to_string();

    let item_link = raw
        .object("ContactInfos")
        .and_then(|contacts| localized(contacts, "Url"))
        .map(str::to_string);

    let source_id = raw.id_string("Id").unwrap_or_else(|| {
        fallback_id(
            item_link.as_deref(),
            &title,
            raw.str("DateBegin").unwrap_or_default(),
        )
    });

    let url = match defaults.url {
        Some(fixed) => fixed.to_string(),
        None => format!("https://opendatahub.com/events/{source_id}"),
    };

    let topics: BTreeSet<String> = raw
        .array("Topics")
        .map(|list| {
            list.iter()
                .filter_map(|t| {
                    value_str(t).or_else(|| t.get("TopicInfo").and_then(value_str))
                })
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();

    Event {
        id: source_id.clone(),
        title,
        description,
        date_start,
        date_end,
        location,
        url,
        image_url: first_image_url(raw),
        source_name: source_name.to_string(),
        source_id,
        topics,
        category: defaults.category.to_string(),
        is_new: true,
        latitude: position.latitude,
        longitude: position.longitude,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use serde_json::json;

    fn raw(v: serde_json::Value) -> RawEvent {
        RawEvent::from_value(v).unwrap()
    }

    #[test]
    fn localized_prefers_en_then_it_then_de() {
        let obj = json!({
            "de": {"Title": "Deutsch"},
            "it": {"Title": "Italiano"},
            "en": {"Title": ""}
        });
        assert_eq!(localized(obj.as_object().unwrap(), "Title"), Some("Italiano"));

        let obj = json!({"de": {"Title": "Deutsch"}});
        assert_eq!(localized(obj.as_object().unwrap(), "Title"), Some("Deutsch"));
    }

    #[test]
    fn details_fall_back_to_intro_and_untitled() {
        let r = raw(json!({"Detail": {"it": {"IntroText": "Breve introduzione all'evento"}}}));
        let (title, desc) = localized_details(&r);
        assert_eq!(title, UNTITLED);
        assert_eq!(desc, "Breve introduzione all'evento");
    }

    #[test]
    fn date_chain_accepts_known_layouts() {
        let rfc = parse_datetime("2024-06-15T09:00:00+02:00").unwrap();
        assert_eq!(rfc, Utc.with_ymd_and_hms(2024, 6, 15, 7, 0, 0).unwrap());

        let local = parse_datetime("2024-06-15T09:00:00").unwrap();
        assert_eq!(local, Utc.with_ymd_and_hms(2024, 6, 15, 9, 0, 0).unwrap());

        let day = parse_datetime("2024-06-15").unwrap();
        assert_eq!(day, Utc.with_ymd_and_hms(2024, 6, 15, 0, 0, 0).unwrap());

        assert!(parse_datetime("15/06/2024").is_none());
    }

    #[test]
    fn malformed_dates_fall_back_to_now_and_end_is_clamped() {
        let now = Utc.with_ymd_and_hms(2025, 1, 1, 12, 0, 0).unwrap();
        let r = raw(json!({"DateBegin": "not a date", "DateEnd": "2020-01-01"}));
        let (start, end) = parse_dates(&r, now, "test");
        assert_eq!(start, now);
        assert_eq!(end, now);

        let r = raw(json!({"DateBegin": "2025-03-10T10:00:00", "DateEnd": "2025-03-09T10:00:00"}));
        let (start, end) = parse_dates(&r, now, "test");
        assert_eq!(end, start);
    }

    #[test]
    fn gps_prefers_list_then_top_level() {
        let r = raw(json!({
            "GpsInfo": [{"Latitude": 46.5, "Longitude": 11.35}],
            "Latitude": 1.0, "Longitude": 2.0
        }));
        assert_eq!(extract_gps(&r), GeoPoint::new(46.5, 11.35));

        let r = raw(json!({"GpsInfo": [], "Latitude": 46.1, "Longitude": 11.1}));
        assert_eq!(extract_gps(&r), GeoPoint::new(46.1, 11.1));

        let r = raw(json!({"GpsInfo": [{"Latitude": 0, "Longitude": 0}]}));
        assert!(!extract_gps(&r).is_known());
    }

    #[test]
    fn identity_is_stable_per_link() {
        let a = link_identity("museion", "https://www.museion.it/en/events/hope/");
        assert_eq!(a, "museion-hope");
        let h1 = hash_id("https://example.org/x");
        let h2 = hash_id("https://example.org/x");
        assert_eq!(h1, h2);
        assert_eq!(h1.len(), 16);
        assert_eq!(link_identity("x", "https://example.org"), format!("x-{}", hash_id("https://example.org")));
    }

    #[test]
    fn fallback_id_uses_title_and_date_without_link() {
        assert_eq!(fallback_id(Some("https://a.example"), "A", "2030"), hash_id("https://a.example"));
        assert_eq!(fallback_id(Some("  "), "A", "2030"), hash_id("A|2030"));
        assert_ne!(fallback_id(None, "A", "2030"), fallback_id(None, "B", "2030"));
        assert_ne!(fallback_id(None, "A", "2030"), hash_id(""));
    }

    #[test]
    fn leaked_hex_titles_and_short_descriptions_are_rejected() {
        let now = Utc::now();
        let base = Event {
            id: "1".into(),
            title: "A real title".into(),
            description: "Long enough description".into(),
            date_start: now,
            date_end: now - Duration::hours(1),
            location: String::new(),
            url: "https://example.org".into(),
            image_url: Some("  ".into()),
            source_name: "test".into(),
            source_id: "1".into(),
            topics: BTreeSet::new(),
            category: "general".into(),
            is_new: true,
            latitude: 0.0,
            longitude: 0.0,
        };

        let ok = finalize(base.clone()).unwrap();
        assert_eq!(ok.date_end, ok.date_start);
        assert_eq!(ok.image_url, None);
        assert_eq!(ok.location, UNKNOWN_LOCATION);

        let mut hex = base.clone();
        hex.title = "0123456789abcdefABCDEF0123456789".into();
        assert!(finalize(hex).is_none());

        let mut short = base.clone();
        short.description = "too short".into();
        assert!(finalize(short).is_none());

        let mut not_hex = base;
        not_hex.title = "0123456789abcdefABCDEF012345678g".into();
        assert!(finalize(not_hex).is_some());
    }

    #[test]
    fn odh_builder_hashes_when_id_missing() {
        let now = Utc::now();
        let r = raw(json!({
            "Detail": {"en": {"Title": "Open Day", "BaseText": "Doors open for everyone"}},
            "DateBegin": "2030-05-01T10:00:00"
        }));
        let defaults = OdhDefaults { location: "Somewhere", url: None, category: "general" };
        let a = build_odh_event(&r, "odh", defaults, now);
        let b = build_odh_event(&r, "odh", defaults, now);
        assert_eq!(a.source_id, b.source_id);
        assert_eq!(a.location, "Somewhere");
        assert_eq!(a.url, format!("https://opendatahub.com/events/{}", a.source_id));
    }
}
