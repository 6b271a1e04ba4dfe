// File: ./src/sync/state.rs
// Last cycle outcome per source, persisted so `status` works across processes.
//
// Bump STATE_VERSION whenever SourceState changes shape; older files are
// then ignored instead of failing to parse.
use crate::context::AppContext;
use crate::storage::LocalStorage;
use crate::sync::report::CycleStatus;
use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;

const STATE_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceState {
    pub status: CycleStatus,
    pub summary: String,
    #[serde(default)]
    pub error: Option<String>,
    pub finished_at: DateTime<Utc>,
}

#[derive(Serialize, Deserialize, Default)]
struct StateFile {
    // Missing in files written before versioning; treated as stale.
    #[serde(default)]
    version: u32,
    #[serde(default)]
    sources: BTreeMap<String, SourceState>,
}

#[derive(Debug, Clone)]
pub struct StateStore {
    path: Option<PathBuf>,
}

impl StateStore {
    pub fn new(ctx: &dyn AppContext) -> Self {
        Self {
            path: ctx.get_state_path(),
        }
    }

    fn read(path: &PathBuf) -> Result<StateFile> {
        if !path.exists() {
            return Ok(StateFile::default());
        }
        let json = fs::read_to_string(path)?;
        match serde_json::from_str::<StateFile>(&json) {
            Ok(file) if file.version == STATE_VERSION => Ok(file),
            _ => {
                log::debug!("Ignoring stale or unreadable state file {:?}", path);
                Ok(StateFile::default())
            }
        }
    }

    pub fn load_all(&self) -> Result<BTreeMap<String, SourceState>> {
        let Some(path) = &self.path else {
            return Ok(BTreeMap::new());
        };
        LocalStorage::with_lock(path, || Ok(Self::read(path)?.sources))
    }

    pub fn get(&self, source: &str) -> Result<Option<SourceState>> {
        Ok(self.load_all()?.remove(&source.to_lowercase()))
    }

    pub fn record(&self, source: &str, state: SourceState) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        LocalStorage::with_lock(path, || {
            let mut file = Self::read(path)?;
            file.version = STATE_VERSION;
            file.sources.insert(source.to_lowercase(), state);
            let json = serde_json::to_string_pretty(&file)?;
            LocalStorage::atomic_write(path, json)?;
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::TestContext;

    fn state(status: CycleStatus, summary: &str) -> SourceState {
        SourceState {
            status,
            summary: summary.to_string(),
            error: None,
            finished_at: Utc::now(),
        }
    }

    #[test]
    fn test_record_and_reload() {
        let ctx = TestContext::new();
        let store = StateStore::new(&ctx);
        assert!(store.get("foo").unwrap().is_none());

        store.record("Foo", state(CycleStatus::Success, "ok")).unwrap();
        store.record("bar", state(CycleStatus::Failed, "down")).unwrap();

        let reopened = StateStore::new(&ctx);
        assert_eq!(reopened.get("FOO").unwrap().unwrap().summary, "ok");
        assert_eq!(reopened.load_all().unwrap().len(), 2);
    }

    #[test]
    fn test_version_mismatch_is_ignored() {
        let ctx = TestContext::new();
        let path = ctx.get_state_path().unwrap();
        fs::write(&path, r#"{"version": 0, "sources": {}}"#).unwrap();
        let store = StateStore::new(&ctx);
        assert!(store.load_all().unwrap().is_empty());
        store.record("foo", state(CycleStatus::Partial, "x")).unwrap();
        assert_eq!(store.load_all().unwrap().len(), 1);
    }
}
