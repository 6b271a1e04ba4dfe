// File: tests/common/mod.rs
// Shared fixtures: an in-memory source adapter, a recording notifier and a
// manager builder over a throwaway TestContext.
#![allow(dead_code)]

use async_trait::async_trait;
use notesync::config::{Config, SourceConfig};
use notesync::context::{SharedContext, TestContext};
use notesync::model::{Item, RawItem};
use notesync::notify::Notifier;
use notesync::source::{
    AdapterContext, AdapterError, Capabilities, PullResult, PushReceipt, RemoteStamp, Registry,
    SourceAdapter,
};
use notesync::sync::{CycleStatus, SyncManager};
use serde_json::json;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;

/// Scriptable adapter that records every call.
pub struct FakeAdapter {
    pub name: String,
    pub caps: Capabilities,
    pub items: Mutex<Vec<RawItem>>,
    pub remote: Mutex<HashMap<String, RemoteStamp>>,
    pub pushed: Mutex<Vec<Item>>,
    pub pull_calls: AtomicUsize,
    pub update_calls: AtomicUsize,
    pub create_calls: AtomicUsize,
    pub active_pulls: AtomicUsize,
    pub max_active_pulls: AtomicUsize,
    /// When set, `pull` announces itself on `entered` and waits on `release`.
    pub gate: Option<(Arc<Notify>, Arc<Notify>)>,
    pub setup_result: Mutex<Result<bool, AdapterError>>,
    pub pushed_updated_at: Mutex<Option<String>>,
    /// Pushing a title containing this text fails with a transport error.
    pub unreachable_for: Mutex<Option<String>>,
    pub panic_in_pull: AtomicBool,
    next_id: AtomicUsize,
}

impl FakeAdapter {
    pub fn new(name: &str, caps: Capabilities) -> Self {
        Self {
            name: name.to_string(),
            caps,
            items: Mutex::new(vec![]),
            remote: Mutex::new(HashMap::new()),
            pushed: Mutex::new(vec![]),
            pull_calls: AtomicUsize::new(0),
            update_calls: AtomicUsize::new(0),
            create_calls: AtomicUsize::new(0),
            active_pulls: AtomicUsize::new(0),
            max_active_pulls: AtomicUsize::new(0),
            gate: None,
            setup_result: Mutex::new(Ok(true)),
            pushed_updated_at: Mutex::new(Some("2026-10-16T12:00:00Z".to_string())),
            unreachable_for: Mutex::new(None),
            panic_in_pull: AtomicBool::new(false),
            next_id: AtomicUsize::new(1),
        }
    }

    pub fn with_items(self, items: Vec<serde_json::Value>) -> Self {
        *self.items.lock().unwrap() = items
            .into_iter()
            .map(|v| RawItem::from_json(v).unwrap())
            .collect();
        self
    }

    pub fn with_gate(mut self, entered: Arc<Notify>, release: Arc<Notify>) -> Self {
        self.gate = Some((entered, release));
        self
    }

    pub fn set_remote(&self, id: &str, stamp: RemoteStamp) {
        self.remote.lock().unwrap().insert(id.to_string(), stamp);
    }
}

#[async_trait]
impl SourceAdapter for FakeAdapter {
    fn name(&self) -> &str {
        &self.name
    }

    fn capabilities(&self) -> Capabilities {
        self.caps
    }

    async fn setup(&self, _cx: &AdapterContext) -> Result<bool, AdapterError> {
        self.setup_result.lock().unwrap().clone()
    }

    async fn pull(&self, _cx: &AdapterContext) -> Result<PullResult, AdapterError> {
        self.pull_calls.fetch_add(1, Ordering::SeqCst);
        if self.panic_in_pull.load(Ordering::SeqCst) {
            panic!("feed parser blew up");
        }
        let active = self.active_pulls.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active_pulls.fetch_max(active, Ordering::SeqCst);
        if let Some((entered, release)) = &self.gate {
            entered.notify_one();
            release.notified().await;
        }
        self.active_pulls.fetch_sub(1, Ordering::SeqCst);
        Ok(PullResult {
            items: self.items.lock().unwrap().clone(),
            label: Some("fake".to_string()),
        })
    }

    async fn push_item(&self, _cx: &AdapterContext, item: &Item) -> Result<PushReceipt, AdapterError> {
        if item.title.contains("reject me") {
            return Err(AdapterError::Item("remote refused".to_string()));
        }
        if let Some(text) = self.unreachable_for.lock().unwrap().as_deref()
            && item.title.contains(text)
        {
            return Err(AdapterError::Transport("connection reset".to_string()));
        }
        self.pushed.lock().unwrap().push(item.clone());
        let remote_id = match &item.remote_id {
            Some(id) => {
                self.update_calls.fetch_add(1, Ordering::SeqCst);
                id.clone()
            }
            None => {
                self.create_calls.fetch_add(1, Ordering::SeqCst);
                format!("r{}", self.next_id.fetch_add(1, Ordering::SeqCst))
            }
        };
        let updated_at = self.pushed_updated_at.lock().unwrap().clone();
        if let Some(stamp) = &updated_at {
            self.set_remote(&remote_id, RemoteStamp::Present(stamp.clone()));
        }
        Ok(PushReceipt {
            remote_id,
            updated_at,
        })
    }

    async fn fetch_remote_updated_at(
        &self,
        _cx: &AdapterContext,
        remote_id: &str,
    ) -> Result<RemoteStamp, AdapterError> {
        Ok(self
            .remote
            .lock()
            .unwrap()
            .get(remote_id)
            .cloned()
            .unwrap_or(RemoteStamp::Deleted))
    }
}

/// Remembers every notification.
#[derive(Default)]
pub struct RecordingNotifier {
    pub events: Mutex<Vec<(String, CycleStatus, String)>>,
}

impl RecordingNotifier {
    pub fn count(&self) -> usize {
        self.events.lock().unwrap().len()
    }

    pub fn last(&self) -> Option<(String, CycleStatus, String)> {
        self.events.lock().unwrap().last().cloned()
    }
}

impl Notifier for RecordingNotifier {
    fn cycle_finished(&self, source: &str, status: CycleStatus, summary: &str) {
        self.events
            .lock()
            .unwrap()
            .push((source.to_string(), status, summary.to_string()));
    }
}

pub struct Harness {
    pub ctx: Arc<TestContext>,
    pub manager: SyncManager,
    pub notifier: Arc<RecordingNotifier>,
}

impl Harness {
    pub fn notes_dir(&self) -> PathBuf {
        self.ctx.path("notes")
    }

    pub fn note(&self, file: &str) -> PathBuf {
        self.notes_dir().join(file)
    }

    pub fn read(&self, file: &str) -> String {
        std::fs::read_to_string(self.note(file)).unwrap()
    }

    pub fn write(&self, file: &str, content: &str) {
        std::fs::create_dir_all(self.notes_dir()).unwrap();
        std::fs::write(self.note(file), content).unwrap();
    }
}

/// Config with a notes dir inside the test root and one block per source.
pub fn config_for(ctx: &TestContext, blocks: Vec<(&str, SourceConfig)>) -> Config {
    let mut config = Config {
        notes_dir: Some(ctx.path("notes")),
        ..Config::default()
    };
    for (name, block) in blocks {
        config.sources.insert(name.to_string(), block);
    }
    config
}

pub fn push_block() -> SourceConfig {
    SourceConfig {
        push: Some(true),
        ..SourceConfig::default()
    }
}

pub fn harness(adapters: Vec<Arc<FakeAdapter>>, blocks: Vec<(&str, SourceConfig)>) -> Harness {
    let ctx = Arc::new(TestContext::new());
    let config = config_for(&ctx, blocks);
    let mut registry = Registry::new();
    for adapter in adapters {
        registry.register_adapter(adapter).unwrap();
    }
    let notifier = Arc::new(RecordingNotifier::default());
    let shared: SharedContext = ctx.clone();
    let manager = SyncManager::with_notifier(shared, config, registry, notifier.clone());
    Harness {
        ctx,
        manager,
        notifier,
    }
}

pub fn event(title: &str, date: &str, time: Option<&str>, id: &str) -> serde_json::Value {
    let mut v = json!({
        "title": title,
        "start_date": date,
        "remote_id": id,
        "updated_at": "2026-10-01T08:00:00Z",
    });
    if let Some(t) = time {
        v["start_time"] = json!(t);
    }
    v
}
