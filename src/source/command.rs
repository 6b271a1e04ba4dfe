// File: ./src/source/command.rs
//! The built-in `kind = "command"` adapter: every operation is an external
//! program configured in the source's `options` table.
//!
//! ```toml
//! [sources.calendar]
//! push = true
//! options.pull = ["cal-export", "--json"]
//! options.push = ["cal-import"]
//! options.updated_at = ["cal-stat", "{remote_id}"]
//! options.credentials_env = ["CAL_TOKEN"]
//! ```
//!
//! `updated_at` prints the remote's timestamp, or nothing when the record is
//! gone. A non-zero exit fails only that item; the rest of the batch is
//! still pushed.
use crate::config::{DEFAULT_KIND, SourceConfig, SourceSettings};
use crate::exec::{CommandSpec, ExecError};
use crate::model::{Item, RawItem};
use crate::source::{
    AdapterContext, AdapterError, Capabilities, PullResult, PushReceipt, RemoteStamp,
    SourceAdapter,
};
use async_trait::async_trait;
use serde_json::Value;

pub const OPT_PULL: &str = "pull";
pub const OPT_PUSH: &str = "push";
pub const OPT_UPDATED_AT: &str = "updated_at";
pub const OPT_SETUP: &str = "setup";
pub const OPT_CREDENTIALS_ENV: &str = "credentials_env";

const REMOTE_ID_PLACEHOLDER: &str = "{remote_id}";

#[derive(Debug, Clone)]
pub struct CommandSource {
    name: String,
    capabilities: Capabilities,
}

impl CommandSource {
    /// Capabilities follow from which commands `options` configures.
    pub fn new(name: &str, options: &toml::Table) -> Self {
        let has = |key: &str| options.contains_key(key);
        let pull = has(OPT_PULL);
        let push = has(OPT_PUSH);
        Self {
            name: name.to_string(),
            capabilities: Capabilities {
                supports_pull: pull,
                supports_push: push,
                supports_auto_sync: pull,
                supports_conflict_check: push && has(OPT_UPDATED_AT),
            },
        }
    }

    fn spec(&self, cx: &AdapterContext, key: &str) -> Result<CommandSpec, AdapterError> {
        let argv = cx.settings.option_argv(key).ok_or_else(|| {
            AdapterError::Config(format!(
                "options.{} must be a command string or a list of strings",
                key
            ))
        })?;
        let spec = CommandSpec::from_argv(&argv)
            .ok_or_else(|| AdapterError::Config(format!("options.{} is empty", key)))?;
        Ok(spec
            .env("NOTESYNC_SOURCE", &self.name)
            .env(
                "NOTESYNC_TARGET_FILE",
                cx.settings.target_file.to_string_lossy(),
            ))
    }

    fn missing_credentials(settings: &SourceSettings) -> Vec<String> {
        let names: Vec<String> = match settings.options.get(OPT_CREDENTIALS_ENV) {
            Some(toml::Value::String(s)) => vec![s.clone()],
            Some(toml::Value::Array(a)) => a
                .iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect(),
            _ => vec![],
        };
        names
            .into_iter()
            .filter(|n| std::env::var_os(n).is_none_or(|v| v.is_empty()))
            .collect()
    }

    fn check_credentials(settings: &SourceSettings) -> Result<(), AdapterError> {
        let missing = Self::missing_credentials(settings);
        if missing.is_empty() {
            Ok(())
        } else {
            Err(AdapterError::Config(format!(
                "missing credentials: environment variable(s) {} not set",
                missing.join(", ")
            )))
        }
    }

    fn parse_pull_output(lines: &[String]) -> Result<PullResult, AdapterError> {
        let text = lines.join("\n");
        if text.trim().is_empty() {
            return Ok(PullResult::default());
        }
        let value: Value = serde_json::from_str(&text)
            .map_err(|e| AdapterError::Transport(format!("pull output is not JSON: {}", e)))?;
        let (items, label) = match value {
            Value::Array(items) => (items, None),
            Value::Object(mut map) => {
                let label = map
                    .get("label")
                    .and_then(Value::as_str)
                    .map(str::to_string);
                match map.remove("items") {
                    Some(Value::Array(items)) => (items, label),
                    _ => {
                        return Err(AdapterError::Transport(
                            "pull output object has no \"items\" list".to_string(),
                        ));
                    }
                }
            }
            _ => {
                return Err(AdapterError::Transport(
                    "pull output must be a list of items or {\"items\": [...]}".to_string(),
                ));
            }
        };

        let items = items
            .into_iter()
            .enumerate()
            .map(|(i, v)| {
                RawItem::from_json(v).unwrap_or_else(|e| {
                    log::warn!("Pulled entry #{} is not an item object: {}", i + 1, e);
                    RawItem::default()
                })
            })
            .collect();
        Ok(PullResult { items, label })
    }

    fn parse_push_output(lines: &[String], item: &Item) -> Result<PushReceipt, AdapterError> {
        let text = lines.join("\n");
        let text = text.trim();
        let id_of = |v: &Value| match v {
            Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        };

        let (remote_id, updated_at) = match serde_json::from_str::<Value>(text) {
            Ok(Value::Object(map)) => (
                map.get("remote_id").or_else(|| map.get("id")).and_then(id_of),
                map.get("updated_at")
                    .and_then(Value::as_str)
                    .map(str::to_string),
            ),
            Ok(v) => (id_of(&v), None),
            Err(_) => (
                text.lines()
                    .next()
                    .map(str::trim)
                    .filter(|l| !l.is_empty())
                    .map(str::to_string),
                None,
            ),
        };

        match remote_id.or_else(|| item.remote_id.clone()) {
            Some(remote_id) => Ok(PushReceipt {
                remote_id,
                updated_at,
            }),
            None => Err(AdapterError::Item(
                "push command printed no remote id".to_string(),
            )),
        }
    }
}

#[async_trait]
impl SourceAdapter for CommandSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn capabilities(&self) -> Capabilities {
        self.capabilities
    }

    fn default_config(&self) -> SourceConfig {
        SourceConfig {
            kind: Some(DEFAULT_KIND.to_string()),
            ..Default::default()
        }
    }

    async fn setup(&self, cx: &AdapterContext) -> Result<bool, AdapterError> {
        Self::check_credentials(&cx.settings)?;
        if !cx.settings.options.contains_key(OPT_SETUP) {
            return Ok(true);
        }
        let spec = self.spec(cx, OPT_SETUP)?;
        match cx.run(&spec).await {
            Ok(_) => Ok(true),
            Err(ExecError::Failed { stderr, .. }) => {
                log::warn!("Setup of '{}' failed, disabling: {}", self.name, stderr);
                Ok(false)
            }
            Err(e) => Err(AdapterError::Config(e.to_string())),
        }
    }

    async fn pull(&self, cx: &AdapterContext) -> Result<PullResult, AdapterError> {
        Self::check_credentials(&cx.settings)?;
        let spec = self.spec(cx, OPT_PULL)?;
        let lines = cx.run(&spec).await?;
        Self::parse_pull_output(&lines)
    }

    async fn push_item(&self, cx: &AdapterContext, item: &Item) -> Result<PushReceipt, AdapterError> {
        Self::check_credentials(&cx.settings)?;
        let action = if item.remote_id.is_some() { "update" } else { "create" };
        let payload = serde_json::to_string(&item.to_wire())
            .map_err(|e| AdapterError::Item(e.to_string()))?;
        let spec = self
            .spec(cx, OPT_PUSH)?
            .env("NOTESYNC_ACTION", action)
            .stdin(format!("{}\n", payload));

        match cx.run(&spec).await {
            Ok(lines) => Self::parse_push_output(&lines, item),
            // The remote answered and refused this item.
            Err(ExecError::Failed { stderr, .. }) => Err(AdapterError::Item(stderr)),
            Err(e) => Err(e.into()),
        }
    }

    async fn fetch_remote_updated_at(
        &self,
        cx: &AdapterContext,
        remote_id: &str,
    ) -> Result<RemoteStamp, AdapterError> {
        let mut spec = self.spec(cx, OPT_UPDATED_AT)?.env("NOTESYNC_REMOTE_ID", remote_id);
        for arg in spec.args.iter_mut() {
            *arg = arg.replace(REMOTE_ID_PLACEHOLDER, remote_id);
        }
        let lines = match cx.run(&spec).await {
            Ok(lines) => lines,
            Err(ExecError::Failed { stderr, .. }) => return Err(AdapterError::Item(stderr)),
            Err(e) => return Err(e.into()),
        };
        Ok(lines
            .iter()
            .map(|l| l.trim())
            .find(|l| !l.is_empty())
            .map(|l| RemoteStamp::Present(l.to_string()))
            .unwrap_or(RemoteStamp::Deleted))
    }
}
