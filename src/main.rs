//! venvi: event aggregation service entrypoint.
//! Boots the Axum HTTP server, the record store, and the periodic sync scheduler.

use std::sync::Arc;

use anyhow::Context;
use shuttle_axum::ShuttleAxum;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use venvi::api::{self, AppState};
use venvi::ingest::config::{self, SyncConfig};
use venvi::ingest::http::build_client;
use venvi::ingest::providers::providers_from_config;
use venvi::ingest::scheduler::{spawn_sync_scheduler, SchedulerCfg};
use venvi::ingest::sync::{SyncGate, EVENTS_COLLECTION};
use venvi::metrics::Metrics;
use venvi::store::{MemoryStore, RecordStore};

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("venvi=info,warn"));

    // Shuttle may already have installed a subscriber.
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().compact())
        .try_init();
}

fn open_store(cfg: &SyncConfig) -> anyhow::Result<Arc<dyn RecordStore>> {
    let store = match &cfg.store_path {
        Some(path) => MemoryStore::open(path, &[EVENTS_COLLECTION])
            .with_context(|| format!("opening store snapshot {}", path.display()))?,
        None => MemoryStore::new(&[EVENTS_COLLECTION]),
    };
    Ok(Arc::new(store))
}

#[shuttle_runtime::main]
async fn axum() -> ShuttleAxum {
    // Load .env in local/dev; no-op in prod environments.
    let _ = dotenvy::dotenv();
    init_tracing();

    let cfg = config::load_default().context("loading sync config")?;
    tracing::info!(
        interval_secs = cfg.interval_secs,
        enabled = ?cfg.enabled,
        persistent = cfg.store_path.is_some(),
        "starting venvi"
    );

    let metrics = Metrics::init(cfg.interval_secs)?;
    let store = open_store(&cfg)?;
    let client = build_client(cfg.request_timeout());
    let providers = Arc::new(providers_from_config(&cfg, &client));

    let gate = SyncGate::new();
    let _scheduler = spawn_sync_scheduler(
        SchedulerCfg {
            interval: cfg.interval(),
            sync: cfg.sync_options(),
        },
        providers.clone(),
        store.clone(),
        gate.clone(),
        CancellationToken::new(),
    );

    let state = AppState::new(store, providers)
        .with_sync_options(cfg.sync_options())
        .with_sync_gate(gate)
        .with_admin_token(cfg.admin_token.clone());
    let router = api::router(state).merge(metrics.router());

    Ok(router.into())
}
