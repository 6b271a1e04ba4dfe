// File: ./src/sync/mod.rs
/*! Sync orchestration.

`SyncManager` owns everything a cycle needs (config, registry, executor,
per-source locks, notifier) and drives one cycle per request:

```text
idle -> running -> success | partial | failed -> idle
```

`running` is entered only when the source's lock is free; otherwise the
request is refused with `SyncError::Busy` and nothing is queued.
*/
pub mod conflict;
pub mod lock;
pub mod pull;
pub mod push;
pub mod report;
pub mod scheduler;
pub mod state;

use crate::config::{Config, SourceSettings};
use crate::context::SharedContext;
use crate::error::SyncError;
use crate::exec::CommandExecutor;
use crate::notify::{LogNotifier, Notifier};
use crate::source::{AdapterContext, AdapterError, Registry, SourceDescriptor};
use chrono::Utc;
use futures::FutureExt;
use futures::stream::{self, StreamExt};
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex};
use tokio::task::JoinHandle;

pub use lock::{LockManager, LockToken};
pub use report::{CycleReport, CycleStatus, PullStats, PushSummary};
pub use scheduler::Scheduler;
pub use state::{SourceState, StateStore};

/// Concurrent cycles in `sync_all`.
const SYNC_ALL_CONCURRENCY: usize = 4;

pub(crate) fn adapter_error(source: &str, err: AdapterError) -> SyncError {
    let name = source.to_string();
    match err {
        AdapterError::Config(message) => SyncError::Config { name, message },
        AdapterError::Unsupported(what) => SyncError::Config {
            name,
            message: format!("{} is not supported by this source", what),
        },
        AdapterError::Transport(message) | AdapterError::Item(message) => {
            SyncError::Transport { name, message }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum SetupState {
    Ready,
    Disabled(String),
}

struct Inner {
    ctx: SharedContext,
    config: Config,
    registry: Registry,
    executor: CommandExecutor,
    locks: LockManager,
    notifier: Arc<dyn Notifier>,
    state: StateStore,
    setup: Mutex<HashMap<String, SetupState>>,
}

/// Cheap to clone; clones share locks and setup state.
#[derive(Clone)]
pub struct SyncManager {
    inner: Arc<Inner>,
}

impl SyncManager {
    pub fn new(ctx: SharedContext, config: Config, registry: Registry) -> Self {
        Self::with_notifier(ctx, config, registry, Arc::new(LogNotifier))
    }

    pub fn with_notifier(
        ctx: SharedContext,
        config: Config,
        registry: Registry,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        let executor = CommandExecutor::new(config.command_timeout());
        let state = StateStore::new(ctx.as_ref());
        Self {
            inner: Arc::new(Inner {
                ctx,
                config,
                registry,
                executor,
                locks: LockManager::new(),
                notifier,
                state,
                setup: Mutex::new(HashMap::new()),
            }),
        }
    }

    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    pub fn registry(&self) -> &Registry {
        &self.inner.registry
    }

    pub fn locks(&self) -> &LockManager {
        &self.inner.locks
    }

    /// Effective settings, or why the source cannot run.
    pub fn settings(&self, name: &str) -> Result<SourceSettings, SyncError> {
        let settings = self
            .inner
            .registry
            .settings(name, &self.inner.config, self.inner.ctx.as_ref())?;
        if let Some(SetupState::Disabled(reason)) = self.setup_state(&settings.name) {
            return Err(SyncError::Disabled {
                name: settings.name,
                reason,
            });
        }
        Ok(settings)
    }

    /// Enabled sources with their settings (skips sources disabled by setup).
    pub fn enabled_sources(&self) -> Vec<SourceSettings> {
        self.inner
            .registry
            .list_enabled(&self.inner.config)
            .into_iter()
            .filter_map(|d| match self.settings(&d.name) {
                Ok(s) => Some(s),
                Err(e) => {
                    log::debug!("Skipping '{}': {}", d.name, e);
                    None
                }
            })
            .collect()
    }

    fn setup_state(&self, name: &str) -> Option<SetupState> {
        let map = self.inner.setup.lock().unwrap_or_else(|e| e.into_inner());
        map.get(&name.to_lowercase()).cloned()
    }

    fn set_setup_state(&self, name: &str, state: SetupState) {
        let mut map = self.inner.setup.lock().unwrap_or_else(|e| e.into_inner());
        map.insert(name.to_lowercase(), state);
    }

    fn adapter_context(&self, settings: &SourceSettings) -> AdapterContext {
        AdapterContext {
            source: settings.name.clone(),
            settings: settings.clone(),
            executor: self.inner.executor.clone(),
        }
    }

    /// Runs adapter setup once per process. `false` disables the source.
    async fn ensure_setup(
        &self,
        descriptor: &SourceDescriptor,
        cx: &AdapterContext,
    ) -> Result<(), SyncError> {
        match self.setup_state(&descriptor.name) {
            Some(SetupState::Ready) => return Ok(()),
            Some(SetupState::Disabled(reason)) => {
                return Err(SyncError::Disabled {
                    name: descriptor.name.clone(),
                    reason,
                });
            }
            None => {}
        }
        match descriptor.adapter.setup(cx).await {
            Ok(true) => {
                log::debug!("[{}] Setup complete", descriptor.name);
                self.set_setup_state(&descriptor.name, SetupState::Ready);
                Ok(())
            }
            Ok(false) => {
                let reason = "setup reported the source unavailable".to_string();
                log::warn!("[{}] Disabled: {}", descriptor.name, reason);
                self.set_setup_state(&descriptor.name, SetupState::Disabled(reason.clone()));
                Err(SyncError::Disabled {
                    name: descriptor.name.clone(),
                    reason,
                })
            }
            // Not memoized: fixed credentials are picked up by the next cycle.
            Err(e) => Err(adapter_error(&descriptor.name, e)),
        }
    }

    /// Runs setup for every enabled source up front.
    pub async fn initialize(&self) -> Vec<(String, SyncError)> {
        let mut errors = Vec::new();
        for settings in self.enabled_sources() {
            let Ok(descriptor) = self.inner.registry.resolve(&settings.name) else {
                continue;
            };
            let cx = self.adapter_context(&settings);
            if let Err(e) = self.ensure_setup(descriptor, &cx).await {
                errors.push((settings.name.clone(), e));
            }
        }
        errors
    }

    async fn run_cycle(
        &self,
        descriptor: &SourceDescriptor,
        settings: &SourceSettings,
    ) -> Result<CycleReport, SyncError> {
        let cx = self.adapter_context(settings);
        let caps = descriptor.capabilities;
        self.ensure_setup(descriptor, &cx).await?;

        let do_push = caps.supports_push && settings.push;
        if !caps.supports_pull && !do_push {
            return Err(SyncError::Config {
                name: descriptor.name.clone(),
                message: "source cannot pull and push is disabled (set push = true)".to_string(),
            });
        }

        let mut report = CycleReport::new(&descriptor.name, settings.max_reported_rejections);
        if caps.supports_pull {
            pull::run_pull(descriptor.adapter.as_ref(), &cx, &mut report).await?;
        }
        if do_push {
            match push::run_push(descriptor.adapter.as_ref(), &cx, caps).await {
                Ok(summary) => report.push = Some(summary),
                // The pull result is already on disk; report the abort on top of it.
                Err(e) if caps.supports_pull => report.error = Some(e),
                Err(e) => return Err(e),
            }
        }
        report.finished_at = Utc::now();
        Ok(report)
    }

    fn record(&self, source: &str, status: CycleStatus, summary: String, error: Option<String>) {
        self.inner.notifier.cycle_finished(source, status, &summary);
        let state = SourceState {
            status,
            summary,
            error,
            finished_at: Utc::now(),
        };
        if let Err(e) = self.inner.state.record(source, state) {
            log::warn!("Could not persist sync state for '{}': {:#}", source, e);
        }
    }

    /// One cycle for `name`.
    ///
    /// `Err(Busy)` when a cycle for the source is already running,
    /// `NotFound`/`NotLoaded`/`Disabled` when it cannot run at all. Every
    /// cycle that starts produces exactly one notification.
    pub async fn sync(&self, name: &str) -> Result<CycleReport, SyncError> {
        let settings = self.settings(name)?;
        let descriptor = self.inner.registry.resolve(&settings.name)?;

        let Some(_token) = self.inner.locks.try_acquire(&descriptor.name) else {
            log::info!("[{}] Sync already running, request refused", descriptor.name);
            return Err(SyncError::Busy(descriptor.name.clone()));
        };
        log::info!("[{}] Sync started", descriptor.name);

        let cycle = AssertUnwindSafe(self.run_cycle(descriptor, &settings)).catch_unwind();
        let result = match cycle.await {
            Ok(r) => r,
            Err(panic) => {
                let message = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());
                Err(SyncError::Transport {
                    name: descriptor.name.clone(),
                    message: format!("adapter panicked: {}", message),
                })
            }
        };

        match &result {
            Ok(report) => {
                let error = report.error.as_ref().map(|e| e.to_string());
                self.record(&descriptor.name, report.status(), report.summary(), error);
            }
            // Disabled by setup: not a cycle failure, nothing ran.
            Err(e) if !e.is_cycle_failure() => {}
            Err(e) => {
                let summary = format!("{}: failed; {}", descriptor.name, e);
                self.record(&descriptor.name, CycleStatus::Failed, summary, Some(e.to_string()));
            }
        }
        result
    }

    /// Every enabled source, concurrently. Disabled and not-loaded sources
    /// are not attempted.
    pub async fn sync_all(&self) -> Vec<(String, Result<CycleReport, SyncError>)> {
        let names: Vec<String> = self.enabled_sources().into_iter().map(|s| s.name).collect();
        let futures = names.into_iter().map(|name| {
            let manager = self.clone();
            async move {
                let res = manager.sync(&name).await;
                (name, res)
            }
        });
        let mut results: Vec<(String, Result<CycleReport, SyncError>)> = stream::iter(futures)
            .buffer_unordered(SYNC_ALL_CONCURRENCY)
            .collect()
            .await;
        results.sort_by(|a, b| a.0.cmp(&b.0));
        results
    }

    /// Fire-and-forget: the outcome is reported through the notifier.
    pub fn spawn_sync(&self, name: &str) -> JoinHandle<Result<CycleReport, SyncError>> {
        let manager = self.clone();
        let name = name.to_string();
        tokio::spawn(async move {
            let res = manager.sync(&name).await;
            if let Err(e) = &res
                && !e.is_cycle_failure()
            {
                log::warn!("[{}] {}", name, e);
            }
            res
        })
    }

    /// Last persisted outcome for `name`.
    pub fn status(&self, name: &str) -> Result<Option<SourceState>, SyncError> {
        let descriptor = self.inner.registry.resolve(name)?;
        self.inner
            .state
            .get(&descriptor.name)
            .map_err(|e| SyncError::storage(&descriptor.name, e))
    }

    pub fn is_running(&self, name: &str) -> bool {
        self.inner.locks.is_held(name)
    }
}
