// src/ingest/mod.rs
pub mod config;
pub mod helpers;
pub mod http;
pub mod providers;
pub mod scheduler;
pub mod sync;
pub mod types;

use metrics::{describe_counter, describe_gauge, describe_histogram};
use once_cell::sync::OnceCell;

pub use sync::{sync_all, SyncReport, SyncStats};
pub use types::{Event, EventProvider, FetchContext, FetchError, RawEvent};

/// One-time metrics registration (so series show up on /metrics).
pub(crate) fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!("sync_runs_total", "Completed full sync runs.");
        describe_counter!("sync_events_new_total", "Events inserted for the first time.");
        describe_counter!(
            "sync_events_updated_total",
            "Existing events overwritten in place."
        );
        describe_counter!(
            "sync_item_errors_total",
            "Per-item persistence failures during sync."
        );
        describe_counter!(
            "sync_provider_failures_total",
            "Providers whose fetch failed for a run."
        );
        describe_counter!(
            "sync_flush_failures_total",
            "Sync runs whose store flush failed."
        );
        describe_counter!("ingest_events_total", "Raw events fetched from providers.");
        describe_counter!(
            "ingest_rejected_total",
            "Raw events rejected by the quality filter."
        );
        describe_histogram!("ingest_fetch_ms", "Provider fetch time in milliseconds.");
        describe_gauge!("sync_last_run_ts", "Unix ts when the last sync finished.");
    });
}

/// Normalize scraped/HTML text: decode entities, strip tags, collapse whitespace.
pub fn normalize_text(s: &str) -> String {
    // 1) HTML entity decode
    let mut out = html_escape::decode_html_entities(s).to_string();

    // 2) Strip HTML tags
    static RE_TAGS: OnceCell<regex::Regex> = OnceCell::new();
    let re_tags = RE_TAGS.get_or_init(|| regex::Regex::new(r"(?is)</?[^>]+>").unwrap());
    out = re_tags.replace_all(&out, " ").to_string();

    // 3) Entities that were double-encoded inside tags (&amp;#8211;)
    out = html_escape::decode_html_entities(&out).to_string();

    // 4) Collapse whitespace
    static RE_WS: OnceCell<regex::Regex> = OnceCell::new();
    let re_ws = RE_WS.get_or_init(|| regex::Regex::new(r"\s+").unwrap());
    out = re_ws.replace_all(&out, " ").to_string();

    out.trim().to_string()
}

/// Case-insensitive substring match against any alias.
pub fn contains_alias<S: AsRef<str>>(haystack: &str, aliases: &[S]) -> bool {
    let h = haystack.to_uppercase();
    aliases
        .iter()
        .any(|a| h.contains(&a.as_ref().to_uppercase()))
}
