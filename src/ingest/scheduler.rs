// src/ingest/scheduler.rs
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::ingest::sync::{sync_all_with_context, SyncGate, SyncOptions};
use crate::ingest::types::{EventProvider, FetchContext};
use crate::store::RecordStore;

pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(6 * 3600);

#[derive(Clone, Copy, Debug)]
pub struct SchedulerCfg {
    pub interval: Duration,
    pub sync: SyncOptions,
}

impl Default for SchedulerCfg {
    fn default() -> Self {
        Self {
            interval: DEFAULT_INTERVAL,
            sync: SyncOptions::default(),
        }
    }
}

/// Runs a full sync right away and then every `cfg.interval` until `shutdown` fires.
/// A shutdown mid-run cancels in-flight fetches. Ticks wait for a manual run holding `gate`.
pub fn spawn_sync_scheduler(
    cfg: SchedulerCfg,
    providers: Arc<Vec<Box<dyn EventProvider>>>,
    store: Arc<dyn RecordStore>,
    gate: SyncGate,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(cfg.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {}
            }
            let _running = tokio::select! {
                _ = shutdown.cancelled() => break,
                guard = gate.enter() => guard,
            };

            let ctx = FetchContext::new(
                tokio::time::Instant::now() + cfg.sync.deadline,
                shutdown.child_token(),
            );
            let stats = sync_all_with_context(
                providers.as_slice(),
                store.as_ref(),
                &ctx,
                cfg.sync.max_concurrency,
            )
            .await;

            tracing::info!(
                target: "sync",
                providers = stats.len(),
                next_in_secs = cfg.interval.as_secs(),
                "scheduled sync tick"
            );
        }
        tracing::info!(target: "sync", "sync scheduler stopped");
    })
}
