// File: ./src/sync/scheduler.rs
//! Auto-sync timers. Each timer calls the same cycle as a manual sync, so
//! the per-source lock keeps a tick from overlapping a running cycle.
use crate::error::SyncError;
use crate::sync::SyncManager;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// Owns the timer tasks; dropping it stops them (and kills any command a
/// tick is waiting on).
#[derive(Default)]
pub struct Scheduler {
    timers: Vec<(String, JoinHandle<()>)>,
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts a timer for every enabled source with `auto_sync = true` whose
    /// descriptor supports it.
    pub fn start(manager: &SyncManager) -> Self {
        let mut scheduler = Self::new();
        for settings in manager.enabled_sources() {
            if !settings.auto_sync {
                continue;
            }
            let supported = manager
                .registry()
                .resolve(&settings.name)
                .is_ok_and(|d| d.capabilities.supports_auto_sync);
            if !supported {
                log::warn!("[{}] auto_sync is set but the source does not support it", settings.name);
                continue;
            }
            scheduler.spawn_timer(manager.clone(), &settings.name, settings.interval());
        }
        scheduler
    }

    pub fn spawn_timer(&mut self, manager: SyncManager, source: &str, period: Duration) {
        log::info!("[{}] Auto-sync every {:?}", source, period);
        let name = source.to_string();
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            // The first tick completes immediately; the first sync waits a full period.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                match manager.sync(&name).await {
                    Ok(_) => {}
                    Err(SyncError::Busy(_)) => {
                        log::info!("[{}] Auto-sync tick skipped, a sync is running", name);
                    }
                    Err(e @ (SyncError::Disabled { .. }
                    | SyncError::NotLoaded(_)
                    | SyncError::NotFound(_))) => {
                        log::warn!("[{}] Stopping auto-sync: {}", name, e);
                        break;
                    }
                    // Already reported by the manager; retried on the next tick.
                    Err(_) => {}
                }
            }
        });
        self.timers.push((source.to_string(), handle));
    }

    pub fn sources(&self) -> Vec<String> {
        self.timers.iter().map(|(n, _)| n.clone()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.timers.is_empty()
    }

    pub fn stop(&mut self) {
        for (name, handle) in self.timers.drain(..) {
            log::debug!("[{}] Auto-sync stopped", name);
            handle.abort();
        }
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.stop();
    }
}
