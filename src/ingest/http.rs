// src/ingest/http.rs
use std::time::{Duration, Instant};

use metrics::histogram;
use reqwest::Client;
use serde::de::DeserializeOwned;

use crate::ingest::types::{FetchContext, FetchError};

/// Per-request timeout applied to every upstream call.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

const USER_AGENT: &str = concat!("venvi/", env!("CARGO_PKG_VERSION"));

pub fn build_client(timeout: Duration) -> Client {
    Client::builder()
        .timeout(timeout)
        .user_agent(USER_AGENT)
        .build()
        .unwrap_or_else(|e| {
            tracing::warn!(error = ?e, "http client builder failed, using defaults");
            Client::new()
        })
}

pub fn default_client() -> Client {
    build_client(REQUEST_TIMEOUT)
}

/// GET `url?query`, require 2xx, return the body. Honors `ctx` cancellation and deadline.
pub async fn get_text(
    client: &Client,
    ctx: &FetchContext,
    url: &str,
    query: &[(&str, String)],
) -> Result<String, FetchError> {
    let t0 = Instant::now();
    let request = client.get(url).query(query);

    let resp = ctx.run(request.send()).await??;
    let status = resp.status();
    if !status.is_success() {
        return Err(FetchError::Status {
            status: status.as_u16(),
            url: resp.url().to_string(),
        });
    }
    let body = ctx.run(resp.text()).await??;

    histogram!("ingest_fetch_ms").record(t0.elapsed().as_secs_f64() * 1_000.0);
    Ok(body)
}

/// Like [`get_text`], decoding the body as JSON.
pub async fn get_json<T: DeserializeOwned>(
    client: &Client,
    ctx: &FetchContext,
    url: &str,
    query: &[(&str, String)],
) -> Result<T, FetchError> {
    let body = get_text(client, ctx, url, query).await?;
    Ok(serde_json::from_str(&body)?)
}
