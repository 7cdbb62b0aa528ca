//! Background eviction of stale uploads.
//!
//! One long-lived task, armed for the life of the process. Each tick walks
//! the store and deletes entries whose last access fell out of the retention
//! window, then collects temp files past the grace period. A failed tick is
//! logged and the next one runs anyway; request handling never waits on any
//! of this.

use crate::common::config::{ConfigStore, Settings};
use crate::store::content::ContentStore;
use crate::store::meta::unix_ms;
use anyhow::Result;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

/// Outcome of one sweep, for logging and tests.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepStats {
    pub expired: usize,
    pub temps: usize,
}

/// Spawn the sweeper loop. The interval is fixed at spawn time; retention is
/// re-read from config on every tick. Cancel the token to stop it.
pub fn spawn_sweeper(
    store: Arc<ContentStore>,
    config: Arc<ConfigStore>,
    token: CancellationToken,
) -> JoinHandle<()> {
    let period = config.current().sweep_interval();

    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tracing::debug!(period_secs = period.as_secs(), "sweeper started");

        loop {
            tokio::select! {
                _ = token.cancelled() => {
                    tracing::debug!("sweeper stopped");
                    break;
                }
                _ = ticker.tick() => {}
            }

            let settings = config.current();
            match sweep(&store, &settings).await {
                Ok(stats) if stats.expired > 0 || stats.temps > 0 => {
                    tracing::info!(
                        expired = stats.expired,
                        temps = stats.temps,
                        "sweep finished"
                    );
                }
                Ok(_) => {}
                Err(e) => {
                    tracing::warn!(error = format!("{e:#}"), "sweep failed, will retry next tick");
                }
            }
        }
    })
}

/// Run one sweep: expire files past retention, then stale temps. Errors on
/// individual entries are logged and skipped so one bad file cannot wedge
/// eviction for everything else.
pub async fn sweep(store: &ContentStore, settings: &Settings) -> Result<SweepStats> {
    let cutoff_ms = unix_ms().saturating_sub(settings.retention_secs.saturating_mul(1000));
    let mut stats = SweepStats::default();

    for meta in store.list() {
        if meta.last_access_ms >= cutoff_ms {
            continue;
        }
        match store.delete(&meta.identity).await {
            Ok(()) => {
                stats.expired += 1;
                tracing::info!(
                    identity = %meta.identity,
                    idle_secs = unix_ms().saturating_sub(meta.last_access_ms) / 1000,
                    "expired upload removed"
                );
            }
            Err(e) => {
                tracing::warn!(
                    identity = %meta.identity,
                    error = %e,
                    "failed to remove expired upload"
                );
            }
        }
    }

    stats.temps = store.remove_stale_temps(settings.sweep_interval()).await?;

    Ok(stats)
}
