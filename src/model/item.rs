// File: ./src/model/item.rs
use chrono::{NaiveDate, NaiveTime};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::collections::BTreeSet;
use strum::{AsRefStr, Display, EnumIter, EnumString};

pub const TIME_FORMAT: &str = "%H:%M";
pub const DATE_FORMAT: &str = "%Y-%m-%d";

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    EnumIter,
    AsRefStr,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(ascii_case_insensitive)]
pub enum ItemStatus {
    #[strum(to_string = "TODO")]
    Todo,
    #[strum(to_string = "IN_PROGRESS", serialize = "IN-PROGRESS")]
    InProgress,
    #[strum(to_string = "DONE")]
    Done,
    #[strum(to_string = "CANCELLED", serialize = "CANCELED")]
    Cancelled,
    #[strum(to_string = "WAITING")]
    Waiting,
    #[strum(to_string = "BLOCKED")]
    Blocked,
}

impl ItemStatus {
    pub fn is_done(&self) -> bool {
        matches!(self, Self::Done | Self::Cancelled)
    }
}

/// The normalized unit moved between a note file and a remote source.
///
/// Items only exist in this form after validation; adapters hand back
/// [`RawItem`]s.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Item {
    pub title: String,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub start_time: Option<NaiveTime>,
    pub end_time: Option<NaiveTime>,
    /// Never true when `start_time` is set.
    pub all_day: bool,
    pub status: Option<ItemStatus>,
    /// Single uppercase letter.
    pub priority: Option<char>,
    pub tags: BTreeSet<String>,
    pub body: String,
    /// Heading the item is rendered under (calendar name, project, sheet...).
    pub group: Option<String>,
    pub remote_id: Option<String>,
    /// Remote last-modified timestamp, as reported by the source.
    pub updated_at: Option<String>,
}

impl Item {
    pub fn new(title: &str) -> Self {
        Self {
            title: title.to_string(),
            ..Default::default()
        }
    }

    /// JSON shape handed to external push commands.
    pub fn to_wire(&self) -> Value {
        let date = |d: &Option<NaiveDate>| d.map(|d| d.format(DATE_FORMAT).to_string());
        let time = |t: &Option<NaiveTime>| t.map(|t| t.format(TIME_FORMAT).to_string());
        json!({
            "title": self.title,
            "start_date": date(&self.start_date),
            "end_date": date(&self.end_date),
            "start_time": time(&self.start_time),
            "end_time": time(&self.end_time),
            "all_day": self.all_day,
            "status": self.status.map(|s| s.to_string()),
            "priority": self.priority.map(|c| c.to_string()),
            "tags": self.tags.iter().collect::<Vec<_>>(),
            "body": self.body,
            "group": self.group,
            "remote_id": self.remote_id,
            "updated_at": self.updated_at,
        })
    }
}

/// An item exactly as an adapter returned it, before any type checks.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawItem {
    #[serde(default, alias = "summary")]
    pub title: Value,
    #[serde(default)]
    pub start_date: Value,
    #[serde(default)]
    pub end_date: Value,
    #[serde(default)]
    pub start_time: Value,
    #[serde(default)]
    pub end_time: Value,
    #[serde(default)]
    pub all_day: Value,
    #[serde(default)]
    pub status: Value,
    #[serde(default)]
    pub priority: Value,
    #[serde(default)]
    pub tags: Value,
    #[serde(default, alias = "description")]
    pub body: Value,
    #[serde(default, alias = "calendar")]
    pub group: Value,
    #[serde(default, alias = "id")]
    pub remote_id: Value,
    #[serde(default)]
    pub updated_at: Value,
}

impl RawItem {
    pub fn from_json(value: Value) -> serde_json::Result<Self> {
        serde_json::from_value(value)
    }

    /// Short label for rejection messages.
    pub fn title_hint(&self) -> String {
        match &self.title {
            Value::String(s) if !s.trim().is_empty() => {
                let s = s.trim();
                if s.chars().count() > 40 {
                    format!("{}…", s.chars().take(40).collect::<String>())
                } else {
                    s.to_string()
                }
            }
            _ => "<untitled>".to_string(),
        }
    }
}

impl From<&Item> for RawItem {
    fn from(item: &Item) -> Self {
        // to_wire only emits the fields declared above, so this cannot fail.
        serde_json::from_value(item.to_wire()).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_status_parsing_is_case_insensitive_with_aliases() {
        assert_eq!(ItemStatus::from_str("todo").unwrap(), ItemStatus::Todo);
        assert_eq!(
            ItemStatus::from_str("in-progress").unwrap(),
            ItemStatus::InProgress
        );
        assert_eq!(
            ItemStatus::from_str("IN_PROGRESS").unwrap(),
            ItemStatus::InProgress
        );
        assert!(ItemStatus::from_str("NEXT").is_err());
        assert_eq!(ItemStatus::InProgress.to_string(), "IN_PROGRESS");
    }

    #[test]
    fn test_raw_item_aliases() {
        let raw = RawItem::from_json(json!({"summary": "Standup", "id": 42})).unwrap();
        assert_eq!(raw.title, json!("Standup"));
        assert_eq!(raw.remote_id, json!(42));
        assert_eq!(raw.start_date, Value::Null);
    }

    #[test]
    fn test_wire_roundtrip_through_raw() {
        let mut item = Item::new("Review");
        item.start_date = NaiveDate::from_ymd_opt(2026, 10, 16);
        item.start_time = NaiveTime::from_hms_opt(9, 30, 0);
        item.priority = Some('B');
        let raw = RawItem::from(&item);
        assert_eq!(raw.start_time, json!("09:30"));
        assert_eq!(raw.priority, json!("B"));
    }
}
