// File: ./src/source/registry.rs
use crate::config::{Config, DEFAULT_KIND, SourceConfig, SourceSettings};
use crate::context::AppContext;
use crate::error::SyncError;
use crate::source::{Capabilities, CommandSource, SourceAdapter};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("source name cannot be empty")]
    EmptyName,
    #[error("invalid source name '{0}': use letters, digits, '-' or '_'")]
    InvalidName(String),
    #[error("source already registered: {0}")]
    Duplicate(String),
    #[error("source '{name}' is inconsistent: {reason}")]
    Inconsistent { name: String, reason: String },
}

/// A registered source. Immutable after registration; configuration is
/// overlaid per cycle.
#[derive(Clone)]
pub struct SourceDescriptor {
    pub name: String,
    pub capabilities: Capabilities,
    pub default_config: SourceConfig,
    pub adapter: Arc<dyn SourceAdapter>,
}

impl SourceDescriptor {
    /// Descriptor declaring everything the adapter implements.
    pub fn new(adapter: Arc<dyn SourceAdapter>) -> Self {
        Self {
            name: adapter.name().to_string(),
            capabilities: adapter.capabilities(),
            default_config: adapter.default_config(),
            adapter,
        }
    }

    pub fn with_capabilities(mut self, capabilities: Capabilities) -> Self {
        self.capabilities = capabilities;
        self
    }

    fn check(&self) -> Result<(), RegistryError> {
        if self.name.trim().is_empty() {
            return Err(RegistryError::EmptyName);
        }
        if !self
            .name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            return Err(RegistryError::InvalidName(self.name.clone()));
        }
        let inconsistent = |reason: &str| RegistryError::Inconsistent {
            name: self.name.clone(),
            reason: reason.to_string(),
        };
        let caps = &self.capabilities;
        if !caps.supports_pull && !caps.supports_push {
            return Err(inconsistent("declares neither pull nor push"));
        }
        if !caps.is_subset_of(&self.adapter.capabilities()) {
            return Err(inconsistent(
                "declares capabilities its adapter does not implement",
            ));
        }
        if caps.supports_conflict_check && !caps.supports_push {
            return Err(inconsistent("conflict checks require push"));
        }
        if caps.supports_auto_sync && !caps.supports_pull {
            return Err(inconsistent("auto-sync requires pull"));
        }
        Ok(())
    }
}

impl fmt::Debug for SourceDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SourceDescriptor")
            .field("name", &self.name)
            .field("capabilities", &self.capabilities)
            .field("default_config", &self.default_config)
            .finish_non_exhaustive()
    }
}

/// Which sources exist. Built once and handed to the sync manager.
#[derive(Debug, Default, Clone)]
pub struct Registry {
    // Keyed by lowercase name.
    sources: BTreeMap<String, SourceDescriptor>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, descriptor: SourceDescriptor) -> Result<(), RegistryError> {
        descriptor.check()?;
        let key = descriptor.name.to_lowercase();
        if self.sources.contains_key(&key) {
            return Err(RegistryError::Duplicate(descriptor.name));
        }
        log::debug!(
            "Registered source '{}' ({})",
            descriptor.name,
            descriptor.capabilities.flags().join(", ")
        );
        self.sources.insert(key, descriptor);
        Ok(())
    }

    pub fn register_adapter(&mut self, adapter: Arc<dyn SourceAdapter>) -> Result<(), RegistryError> {
        self.register(SourceDescriptor::new(adapter))
    }

    /// Registers a command adapter for every `kind = "command"` block whose
    /// name is not taken yet. Returns the blocks that could not be registered.
    pub fn register_configured(&mut self, config: &Config) -> Vec<RegistryError> {
        let mut errors = Vec::new();
        for (name, block) in &config.sources {
            if self.sources.contains_key(&name.to_lowercase()) {
                continue;
            }
            let kind = block.kind.as_deref().unwrap_or(DEFAULT_KIND);
            if kind != DEFAULT_KIND {
                log::warn!("Source '{}' has unknown kind '{}', not registered", name, kind);
                continue;
            }
            let adapter = CommandSource::new(name, &block.options);
            if let Err(e) = self.register_adapter(Arc::new(adapter)) {
                log::warn!("Could not register source '{}': {}", name, e);
                errors.push(e);
            }
        }
        errors
    }

    pub fn resolve(&self, name: &str) -> Result<&SourceDescriptor, SyncError> {
        self.sources
            .get(&name.to_lowercase())
            .ok_or_else(|| SyncError::NotFound(name.to_string()))
    }

    pub fn names(&self) -> Vec<String> {
        self.sources.values().map(|d| d.name.clone()).collect()
    }

    pub fn all(&self) -> impl Iterator<Item = &SourceDescriptor> {
        self.sources.values()
    }

    /// Loaded (has a config block) and not disabled by it.
    pub fn list_enabled(&self, config: &Config) -> Vec<&SourceDescriptor> {
        self.sources
            .values()
            .filter(|d| {
                config.source_block(&d.name).is_some_and(|block| {
                    d.default_config.overlay(block).enabled.unwrap_or(true)
                })
            })
            .collect()
    }

    /// Effective settings for a manual invocation: distinguishes unknown,
    /// not-loaded and disabled sources.
    pub fn settings(
        &self,
        name: &str,
        config: &Config,
        ctx: &dyn AppContext,
    ) -> Result<SourceSettings, SyncError> {
        let descriptor = self.resolve(name)?;
        let settings = config
            .settings_for(&descriptor.name, &descriptor.default_config, ctx)
            .map_err(|e| SyncError::Config {
                name: descriptor.name.clone(),
                message: format!("{:#}", e),
            })?
            .ok_or_else(|| SyncError::NotLoaded(descriptor.name.clone()))?;
        if !settings.enabled {
            return Err(SyncError::Disabled {
                name: descriptor.name.clone(),
                reason: "enabled = false in config".to_string(),
            });
        }
        Ok(settings)
    }
}
