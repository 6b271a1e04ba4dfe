// File: ./src/error.rs
//! Error taxonomy of a sync cycle.
use crate::region::MarkerError;
use thiserror::Error;

/// Why a sync request for a source did not produce a completed cycle.
///
/// `Busy` is the lock-refused outcome; it is not a failure of the source.
#[derive(Debug, Clone, Error)]
pub enum SyncError {
    #[error("source '{0}' is not registered")]
    NotFound(String),

    /// Registered, but the config file has no `[sources.<name>]` block.
    #[error("source '{0}' is not loaded (no [sources.{0}] block in config)")]
    NotLoaded(String),

    #[error("source '{name}' is disabled: {reason}")]
    Disabled { name: String, reason: String },

    #[error("a sync for '{0}' is already running")]
    Busy(String),

    #[error("configuration error in '{name}': {message}")]
    Config { name: String, message: String },

    #[error("transport error in '{name}': {message}")]
    Transport { name: String, message: String },

    #[error(transparent)]
    MarkerCorruption(#[from] MarkerError),

    #[error("file error in '{name}': {message}")]
    Storage { name: String, message: String },
}

impl SyncError {
    /// Lock refusal and availability errors are not failed cycles.
    pub fn is_cycle_failure(&self) -> bool {
        matches!(
            self,
            Self::Config { .. }
                | Self::Transport { .. }
                | Self::MarkerCorruption(_)
                | Self::Storage { .. }
        )
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "not-found",
            Self::NotLoaded(_) => "not-loaded",
            Self::Disabled { .. } => "disabled",
            Self::Busy(_) => "busy",
            Self::Config { .. } => "config",
            Self::Transport { .. } => "transport",
            Self::MarkerCorruption(_) => "marker-corruption",
            Self::Storage { .. } => "storage",
        }
    }

    pub(crate) fn storage(name: &str, err: anyhow::Error) -> Self {
        Self::Storage {
            name: name.to_string(),
            message: format!("{:#}", err),
        }
    }
}
