//! One-shot sync against the configured store; prints the report as JSON.

use anyhow::{Context, Result};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use venvi::ingest::config;
use venvi::ingest::http::build_client;
use venvi::ingest::providers::providers_from_config;
use venvi::ingest::sync::{sync_all, SyncReport, EVENTS_COLLECTION};
use venvi::store::MemoryStore;

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("venvi=info,warn")))
        .with(fmt::layer().compact().with_writer(std::io::stderr))
        .init();

    let cfg = config::load_default().context("loading sync config")?;
    let store = match &cfg.store_path {
        Some(path) => MemoryStore::open(path, &[EVENTS_COLLECTION])?,
        None => {
            tracing::warn!("no store_path configured, results are not persisted");
            MemoryStore::new(&[EVENTS_COLLECTION])
        }
    };

    let client = build_client(cfg.request_timeout());
    let providers = providers_from_config(&cfg, &client);
    let stats = sync_all(&providers, &store, cfg.sync_options()).await;

    let report = SyncReport::from_stats(stats);
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
