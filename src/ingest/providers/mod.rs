// src/ingest/providers/mod.rs
pub mod drinbz;
pub mod euro_hackathons;
pub mod museion;
pub mod noi;
pub mod odh;
pub mod unibz;

use reqwest::Client;
use scraper::{ElementRef, Html, Selector};

use crate::ingest::config::SyncConfig;
use crate::ingest::normalize_text;
use crate::ingest::types::{EventProvider, FetchError};

pub use drinbz::DrinbzProvider;
pub use euro_hackathons::EuroHackathonsProvider;
pub use museion::MuseionProvider;
pub use noi::NoiProvider;
pub use odh::OdhProvider;
pub use unibz::UnibzProvider;

/// Source names in registry order.
pub const ALL_SOURCES: [&str; 6] = [
    odh::SOURCE_NAME,
    euro_hackathons::SOURCE_NAME,
    drinbz::SOURCE_NAME,
    noi::SOURCE_NAME,
    unibz::SOURCE_NAME,
    museion::SOURCE_NAME,
];

/// Every known provider with its production endpoint.
pub fn default_providers(client: &Client) -> Vec<Box<dyn EventProvider>> {
    providers_from_config(&SyncConfig::default(), client)
}

/// Providers enabled by `cfg`, with base URL overrides applied.
pub fn providers_from_config(cfg: &SyncConfig, client: &Client) -> Vec<Box<dyn EventProvider>> {
    let mut out: Vec<Box<dyn EventProvider>> = Vec::new();
    for name in ALL_SOURCES {
        if !cfg.is_enabled(name) {
            continue;
        }
        let base = cfg.base_urls.get(name).cloned();
        let c = client.clone();
        let p: Box<dyn EventProvider> = match name {
            odh::SOURCE_NAME => Box::new(with_base(OdhProvider::with_client(c), base, |p, u| {
                p.with_base_url(u)
            })),
            euro_hackathons::SOURCE_NAME => Box::new(with_base(
                EuroHackathonsProvider::with_client(c),
                base,
                |p, u| p.with_base_url(u),
            )),
            drinbz::SOURCE_NAME => Box::new(with_base(DrinbzProvider::with_client(c), base, |p, u| {
                p.with_base_url(u)
            })),
            noi::SOURCE_NAME => Box::new(with_base(NoiProvider::with_client(c), base, |p, u| {
                p.with_base_url(u)
            })),
            unibz::SOURCE_NAME => Box::new(with_base(UnibzProvider::with_client(c), base, |p, u| {
                p.with_base_url(u)
            })),
            museion::SOURCE_NAME => Box::new(with_base(MuseionProvider::with_client(c), base, |p, u| {
                p.with_base_url(u)
            })),
            _ => continue,
        };
        out.push(p);
    }
    for name in &cfg.enabled {
        if !ALL_SOURCES.contains(&name.as_str()) {
            tracing::warn!(target: "ingest", provider = %name, "unknown source in config, ignored");
        }
    }
    out
}

fn with_base<P>(p: P, base: Option<String>, set: fn(P, String) -> P) -> P {
    match base {
        Some(url) => set(p, url),
        None => p,
    }
}

/// Parses an HTML body; a payload without any markup is not a page.
pub(crate) fn parse_html_document(body: &str) -> Result<Html, FetchError> {
    if !body.contains('<') {
        return Err(FetchError::Malformed("response is not an HTML document".into()));
    }
    Ok(Html::parse_document(body))
}

/// Normalized text content of the first match of `sel` under `el`.
pub(crate) fn select_text(el: &ElementRef<'_>, sel: &Selector) -> String {
    el.select(sel)
        .next()
        .map(|m| normalize_text(&m.text().collect::<Vec<_>>().join(" ")))
        .unwrap_or_default()
}

/// Attribute of the first match of `sel` under `el`, trimmed.
pub(crate) fn select_attr(el: &ElementRef<'_>, sel: &Selector, attr: &str) -> Option<String> {
    el.select(sel)
        .find_map(|m| m.value().attr(attr))
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

pub(crate) fn selector(css: &str) -> Selector {
    Selector::parse(css).unwrap_or_else(|e| panic!("invalid static selector {css:?}: {e}"))
}
