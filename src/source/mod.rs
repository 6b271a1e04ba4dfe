// File: ./src/source/mod.rs
//! Source adapters: the plug-in seam between the sync engine and an external
//! system (calendar, issue tracker, spreadsheet...).
pub mod command;
pub mod registry;

use crate::config::{SourceConfig, SourceSettings};
use crate::exec::{CommandExecutor, CommandSpec, ExecError};
use crate::model::{Item, LocalHeading, RawItem};
use async_trait::async_trait;
use thiserror::Error;

pub use command::CommandSource;
pub use registry::{Registry, RegistryError, SourceDescriptor};

/// What an adapter can do. A descriptor may declare a subset of these.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Capabilities {
    pub supports_pull: bool,
    pub supports_push: bool,
    pub supports_auto_sync: bool,
    pub supports_conflict_check: bool,
}

impl Capabilities {
    pub fn pull_only() -> Self {
        Self {
            supports_pull: true,
            supports_auto_sync: true,
            ..Default::default()
        }
    }

    pub fn full() -> Self {
        Self {
            supports_pull: true,
            supports_push: true,
            supports_auto_sync: true,
            supports_conflict_check: true,
        }
    }

    /// True when every flag set in `self` is also set in `other`.
    pub fn is_subset_of(&self, other: &Capabilities) -> bool {
        (!self.supports_pull || other.supports_pull)
            && (!self.supports_push || other.supports_push)
            && (!self.supports_auto_sync || other.supports_auto_sync)
            && (!self.supports_conflict_check || other.supports_conflict_check)
    }

    pub fn flags(&self) -> Vec<&'static str> {
        let mut out = Vec::new();
        if self.supports_pull {
            out.push("pull");
        }
        if self.supports_push {
            out.push("push");
        }
        if self.supports_auto_sync {
            out.push("auto-sync");
        }
        if self.supports_conflict_check {
            out.push("conflict-check");
        }
        out
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AdapterError {
    /// Bad or missing configuration/credentials. Aborts the cycle.
    #[error("configuration: {0}")]
    Config(String),
    /// The external system could not be reached. Aborts the cycle.
    #[error("transport: {0}")]
    Transport(String),
    /// The external system refused a single item.
    #[error("item: {0}")]
    Item(String),
    #[error("{0} is not supported by this source")]
    Unsupported(&'static str),
}

impl From<ExecError> for AdapterError {
    fn from(err: ExecError) -> Self {
        Self::Transport(err.to_string())
    }
}

/// Everything an adapter call may need. Built fresh for every cycle.
#[derive(Debug, Clone)]
pub struct AdapterContext {
    pub source: String,
    pub settings: SourceSettings,
    pub executor: CommandExecutor,
}

impl AdapterContext {
    /// Runs a command through the shared executor.
    pub async fn run(&self, spec: &CommandSpec) -> Result<Vec<String>, ExecError> {
        self.executor.execute(spec).await
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PullResult {
    pub items: Vec<RawItem>,
    /// Human label for the summary (calendar name, repository...).
    pub label: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PushReceipt {
    pub remote_id: String,
    /// The remote's `updated_at` after the write, when reported.
    pub updated_at: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteStamp {
    Present(String),
    /// The remote record no longer exists.
    Deleted,
}

/// Default push selection: the heading carries the source's push tag, or
/// is already tracked by it.
pub fn default_push_selection(heading: &LocalHeading, settings: &SourceSettings) -> bool {
    heading.has_tag(&settings.push_tag) || heading.identity_for(&settings.name).is_some()
}

#[async_trait]
pub trait SourceAdapter: Send + Sync {
    fn name(&self) -> &str;

    fn capabilities(&self) -> Capabilities;

    /// Settings the user block is laid over.
    fn default_config(&self) -> SourceConfig {
        SourceConfig::default()
    }

    /// Called once before the first cycle. `Ok(false)` disables the source
    /// for the rest of the process.
    async fn setup(&self, _cx: &AdapterContext) -> Result<bool, AdapterError> {
        Ok(true)
    }

    async fn pull(&self, _cx: &AdapterContext) -> Result<PullResult, AdapterError> {
        Err(AdapterError::Unsupported("pull"))
    }

    /// Creates the item when `item.remote_id` is `None`, updates it otherwise.
    async fn push_item(&self, _cx: &AdapterContext, _item: &Item) -> Result<PushReceipt, AdapterError> {
        Err(AdapterError::Unsupported("push"))
    }

    async fn fetch_remote_updated_at(
        &self,
        _cx: &AdapterContext,
        _remote_id: &str,
    ) -> Result<RemoteStamp, AdapterError> {
        Err(AdapterError::Unsupported("conflict check"))
    }

    fn selects_for_push(&self, heading: &LocalHeading, settings: &SourceSettings) -> bool {
        default_push_selection(heading, settings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capability_subset() {
        let full = Capabilities::full();
        let pull = Capabilities::pull_only();
        assert!(pull.is_subset_of(&full));
        assert!(!full.is_subset_of(&pull));
        assert_eq!(pull.flags(), vec!["pull", "auto-sync"]);
    }

    #[test]
    fn test_exec_errors_become_transport() {
        let err: AdapterError = ExecError::TimedOut {
            program: "sh".into(),
            after: std::time::Duration::from_secs(1),
        }
        .into();
        assert!(matches!(err, AdapterError::Transport(_)));
    }
}
