// File: ./src/config.rs
// Handles configuration loading, saving, defaults and per-source overlays.
use crate::context::AppContext;
use crate::storage::{DEFAULT_BACKUP_LIMIT, LocalStorage};
use anyhow::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;
use strum::{Display, EnumString};

fn default_backup_limit() -> usize {
    DEFAULT_BACKUP_LIMIT
}
fn default_command_timeout() -> u64 {
    120
}
fn default_max_rejections() -> usize {
    3
}
pub const DEFAULT_INTERVAL_MINS: u32 = 15;
pub const DEFAULT_KIND: &str = "command";

/// What to do when a stored or remote timestamp cannot be parsed during a
/// conflict check.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum TimestampPolicy {
    /// Push anyway (logged as a warning).
    #[default]
    Allow,
    /// Skip the candidate with reason `unparsable`.
    Skip,
}

/// One `[sources.<name>]` block. Every field is optional so that a user block
/// can be laid over the adapter's defaults.
#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq)]
pub struct SourceConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_file: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub push: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub push_files: Option<Vec<PathBuf>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub push_tag: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auto_sync: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interval_mins: Option<u32>,
    #[serde(default, skip_serializing_if = "toml::Table::is_empty")]
    pub options: toml::Table,
}

impl SourceConfig {
    /// `self` overlaid by `user`: user values win, `options` merge per key.
    pub fn overlay(&self, user: &SourceConfig) -> SourceConfig {
        let mut options = self.options.clone();
        for (k, v) in &user.options {
            options.insert(k.clone(), v.clone());
        }
        SourceConfig {
            enabled: user.enabled.or(self.enabled),
            kind: user.kind.clone().or_else(|| self.kind.clone()),
            target_file: user.target_file.clone().or_else(|| self.target_file.clone()),
            push: user.push.or(self.push),
            push_files: user.push_files.clone().or_else(|| self.push_files.clone()),
            push_tag: user.push_tag.clone().or_else(|| self.push_tag.clone()),
            auto_sync: user.auto_sync.or(self.auto_sync),
            interval_mins: user.interval_mins.or(self.interval_mins),
            options,
        }
    }
}

/// Effective settings of a loaded source, with paths resolved against the
/// notes directory.
#[derive(Clone, Debug, PartialEq)]
pub struct SourceSettings {
    pub name: String,
    pub enabled: bool,
    pub kind: String,
    pub target_file: PathBuf,
    pub push: bool,
    pub push_files: Vec<PathBuf>,
    pub push_tag: String,
    pub auto_sync: bool,
    pub interval_mins: u32,
    pub options: toml::Table,
    pub backup_limit: usize,
    pub max_reported_rejections: usize,
    pub unparsable_timestamps: TimestampPolicy,
}

impl SourceSettings {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(u64::from(self.interval_mins.max(1)) * 60)
    }

    pub fn option_str(&self, key: &str) -> Option<&str> {
        self.options.get(key).and_then(|v| v.as_str())
    }

    /// A string or list-of-strings option as an argv vector.
    pub fn option_argv(&self, key: &str) -> Option<Vec<String>> {
        match self.options.get(key)? {
            toml::Value::String(s) if !s.trim().is_empty() => Some(vec![s.clone()]),
            toml::Value::Array(values) => {
                let argv: Vec<String> = values
                    .iter()
                    .filter_map(|v| v.as_str().map(str::to_string))
                    .collect();
                (!argv.is_empty() && argv.len() == values.len()).then_some(argv)
            }
            _ => None,
        }
    }
}

#[derive(Deserialize, Serialize, Clone, Debug)]
pub struct Config {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes_dir: Option<PathBuf>,
    #[serde(default = "default_backup_limit")]
    pub backup_limit: usize,
    /// 0 disables the timeout.
    #[serde(default = "default_command_timeout")]
    pub command_timeout_secs: u64,
    #[serde(default = "default_max_rejections")]
    pub max_reported_rejections: usize,
    #[serde(default)]
    pub unparsable_timestamps: TimestampPolicy,
    #[serde(default)]
    pub desktop_notifications: bool,
    #[serde(default)]
    pub debug_logging: bool,
    #[serde(default)]
    pub sources: BTreeMap<String, SourceConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            notes_dir: None,
            // Match the serde defaults
            backup_limit: DEFAULT_BACKUP_LIMIT,
            command_timeout_secs: 120,
            max_reported_rejections: 3,
            unparsable_timestamps: TimestampPolicy::Allow,
            desktop_notifications: false,
            debug_logging: false,
            sources: BTreeMap::new(),
        }
    }
}

impl Config {
    /// Load the configuration from disk using an explicit context.
    /// Returns a contextualized error if reading or parsing fails.
    pub fn load(ctx: &dyn AppContext) -> Result<Self> {
        let path = ctx.get_config_file_path()?;

        // Explicitly detect missing file so callers can fall back to defaults.
        if !path.exists() {
            return Err(anyhow::anyhow!("Config file not found"));
        }

        let contents = fs::read_to_string(&path).map_err(|e| {
            anyhow::anyhow!("Failed to read config file '{}': {}", path.display(), e)
        })?;

        let config: Config = toml::from_str(&contents).map_err(|e| {
            anyhow::anyhow!("Failed to parse config file '{}': {}", path.display(), e)
        })?;

        Ok(config)
    }

    /// Like [`Config::load`], but a missing file yields the defaults (no
    /// sources loaded). Parse errors are still reported.
    pub fn load_or_default(ctx: &dyn AppContext) -> Result<Self> {
        match Self::load(ctx) {
            Ok(c) => Ok(c),
            Err(e) if Self::is_missing_config_error(&e) => {
                log::info!("No config file found, using defaults");
                Ok(Self::default())
            }
            Err(e) => Err(e),
        }
    }

    /// Helper to detect whether an anyhow::Error indicates that the config file was missing.
    pub fn is_missing_config_error(err: &Error) -> bool {
        if err.to_string().contains("Config file not found") {
            return true;
        }
        for cause in err.chain() {
            if let Some(io_err) = cause.downcast_ref::<std::io::Error>()
                && io_err.kind() == std::io::ErrorKind::NotFound
            {
                return true;
            }
        }
        false
    }

    /// Save configuration using an explicit context.
    pub fn save(&self, ctx: &dyn AppContext) -> Result<()> {
        let path = ctx.get_config_file_path()?;
        LocalStorage::with_lock(&path, || {
            let toml_str = toml::to_string_pretty(self)?;
            LocalStorage::atomic_write(&path, toml_str)?;
            Ok(())
        })?;
        Ok(())
    }

    /// Get the path string using an explicit context.
    pub fn get_path_string(ctx: &dyn AppContext) -> Result<String> {
        let path = ctx.get_config_file_path()?;
        Ok(path.to_string_lossy().to_string())
    }

    pub fn notes_dir(&self, ctx: &dyn AppContext) -> Result<PathBuf> {
        match &self.notes_dir {
            Some(dir) => {
                fs::create_dir_all(dir).map_err(|e| {
                    anyhow::anyhow!("Failed to create notes directory '{}': {}", dir.display(), e)
                })?;
                Ok(dir.clone())
            }
            None => ctx.get_notes_dir(),
        }
    }

    pub fn command_timeout(&self) -> Option<Duration> {
        (self.command_timeout_secs > 0).then(|| Duration::from_secs(self.command_timeout_secs))
    }

    /// The user's block for `name`, matched case-insensitively.
    pub fn source_block(&self, name: &str) -> Option<&SourceConfig> {
        self.sources
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v)
    }

    /// Effective settings for `name`, or `None` when the source is not loaded
    /// (no config block).
    pub fn settings_for(
        &self,
        name: &str,
        defaults: &SourceConfig,
        ctx: &dyn AppContext,
    ) -> Result<Option<SourceSettings>> {
        let Some(user) = self.source_block(name) else {
            return Ok(None);
        };
        let merged = defaults.overlay(user);
        let notes_dir = self.notes_dir(ctx)?;
        let resolve = |p: PathBuf| if p.is_absolute() { p } else { notes_dir.join(p) };

        Ok(Some(SourceSettings {
            name: name.to_string(),
            enabled: merged.enabled.unwrap_or(true),
            kind: merged.kind.unwrap_or_else(|| DEFAULT_KIND.to_string()),
            target_file: resolve(
                merged
                    .target_file
                    .unwrap_or_else(|| PathBuf::from(format!("{}.md", name.to_lowercase()))),
            ),
            push: merged.push.unwrap_or(false),
            push_files: merged
                .push_files
                .unwrap_or_default()
                .into_iter()
                .map(resolve)
                .collect(),
            push_tag: merged.push_tag.unwrap_or_else(|| name.to_lowercase()),
            auto_sync: merged.auto_sync.unwrap_or(false),
            interval_mins: merged.interval_mins.unwrap_or(DEFAULT_INTERVAL_MINS),
            options: merged.options,
            backup_limit: self.backup_limit,
            max_reported_rejections: self.max_reported_rejections,
            unparsable_timestamps: self.unparsable_timestamps,
        }))
    }
}
