// File: ./src/model/validate.rs
//! Per-item schema checks for adapter output.
//!
//! Each raw item is checked on its own; a malformed item never affects the
//! others in its batch.
use crate::model::item::{DATE_FORMAT, Item, ItemStatus, RawItem};
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde_json::{Map, Value};
use std::collections::BTreeSet;
use std::str::FromStr;
use strum::IntoEnumIterator;

/// A raw item that failed validation. `index` is its position in the batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rejection {
    pub index: usize,
    pub title: String,
    pub errors: Vec<String>,
}

impl Rejection {
    pub fn reason(&self) -> String {
        self.errors.join("; ")
    }
}

#[derive(Debug, Clone, Default)]
pub struct Partition {
    pub accepted: Vec<Item>,
    pub rejected: Vec<Rejection>,
}

type FieldResult<T> = Result<Option<T>, String>;

/// Converts a raw item into an [`Item`], collecting every problem found.
pub fn validate(raw: &RawItem) -> Result<Item, Vec<String>> {
    let mut errors = Vec::new();
    macro_rules! field {
        ($e:expr) => {
            match $e {
                Ok(v) => v,
                Err(msg) => {
                    errors.push(msg);
                    None
                }
            }
        };
    }

    let title = field!(title(&raw.title));
    let start_date = field!(date("start_date", &raw.start_date));
    let end_date = field!(date("end_date", &raw.end_date));
    let start_time = field!(time("start_time", &raw.start_time));
    let end_time = field!(time("end_time", &raw.end_time));
    let all_day = field!(boolean("all_day", &raw.all_day));
    let status = field!(status(&raw.status));
    let priority = field!(priority(&raw.priority));
    let tags = field!(tags(&raw.tags)).unwrap_or_default();
    let body = field!(text("body", &raw.body)).unwrap_or_default();
    let group = field!(text("group", &raw.group))
        .map(|g| single_line(&g))
        .filter(|g| !g.is_empty());
    let remote_id = field!(remote_id(&raw.remote_id));
    let updated_at = field!(updated_at(&raw.updated_at));

    if start_time.is_some() && start_date.is_none() && raw.start_date.is_null() {
        errors.push("start_time requires start_date".to_string());
    }
    if end_time.is_some() && start_time.is_none() && raw.start_time.is_null() {
        errors.push("end_time requires start_time".to_string());
    }
    if end_date.is_some() && start_date.is_none() && raw.start_date.is_null() {
        errors.push("end_date requires start_date".to_string());
    }
    if all_day == Some(true) && start_time.is_some() {
        errors.push("all_day item cannot have a start_time".to_string());
    }
    if let (Some(s), Some(e)) = (start_date, end_date)
        && e < s
    {
        errors.push(format!("end_date {} is before start_date {}", e, s));
    }
    if let (Some(s), Some(e)) = (start_time, end_time)
        && e < s
        && end_date.is_none_or(|d| Some(d) == start_date)
    {
        errors.push(format!(
            "end_time {} is before start_time {}",
            e.format("%H:%M"),
            s.format("%H:%M")
        ));
    }

    if !errors.is_empty() {
        return Err(errors);
    }

    Ok(Item {
        title: title.unwrap_or_default(),
        start_date,
        end_date,
        start_time,
        end_time,
        all_day: all_day.unwrap_or(start_time.is_none() && start_date.is_some()),
        status,
        priority,
        tags,
        body,
        group,
        remote_id,
        updated_at,
    })
}

/// Invariant checks for an already typed item (local headings before push).
pub fn check(item: &Item) -> Vec<String> {
    let mut errors = Vec::new();
    if item.title.trim().is_empty() {
        errors.push("title is required".to_string());
    }
    if item.all_day && item.start_time.is_some() {
        errors.push("all_day item cannot have a start_time".to_string());
    }
    if let Some(p) = item.priority
        && !p.is_ascii_uppercase()
    {
        errors.push(format!("priority '{}' must be a single uppercase letter A-Z", p));
    }
    for tag in &item.tags {
        if let Err(e) = check_tag(tag) {
            errors.push(e);
        }
    }
    errors
}

/// Splits a pulled batch into accepted items and rejections.
pub fn partition(raws: Vec<RawItem>) -> Partition {
    let mut out = Partition::default();
    for (index, raw) in raws.into_iter().enumerate() {
        match validate(&raw) {
            Ok(item) => out.accepted.push(item),
            Err(errors) => out.rejected.push(Rejection {
                index,
                title: raw.title_hint(),
                errors,
            }),
        }
    }
    out
}

/// Bounded description of the first `limit` rejections plus a remainder count.
pub fn summarize_rejections(rejected: &[Rejection], limit: usize) -> Option<String> {
    if rejected.is_empty() {
        return None;
    }
    let mut parts: Vec<String> = rejected
        .iter()
        .take(limit)
        .map(|r| format!("#{} '{}': {}", r.index + 1, r.title, r.reason()))
        .collect();
    if rejected.len() > limit {
        parts.push(format!("and {} more", rejected.len() - limit));
    }
    Some(format!(
        "{} item(s) rejected: {}",
        rejected.len(),
        parts.join("; ")
    ))
}

// --- Field parsers ---

/// Collapses all whitespace, line breaks included, to single spaces.
fn single_line(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn title(v: &Value) -> FieldResult<String> {
    match v {
        Value::String(s) => {
            let s = single_line(s);
            if s.is_empty() {
                Err("title is required".to_string())
            } else {
                Ok(Some(s))
            }
        }
        Value::Null => Err("title is required".to_string()),
        other => Err(format!("title must be a string, got {}", kind(other))),
    }
}

fn date(name: &str, v: &Value) -> FieldResult<NaiveDate> {
    match v {
        Value::Null => Ok(None),
        Value::String(s) => {
            let s = s.trim();
            let complete = s.len() == 10 && s.as_bytes()[4] == b'-' && s.as_bytes()[7] == b'-';
            if !complete {
                return Err(format!(
                    "{} '{}' must be a complete YYYY-MM-DD date",
                    name, s
                ));
            }
            NaiveDate::parse_from_str(s, DATE_FORMAT)
                .map(Some)
                .map_err(|_| format!("{} '{}' is not a valid calendar date", name, s))
        }
        Value::Object(map) => {
            let year = int_part(name, map, &["year"])?;
            let month = int_part(name, map, &["month"])?;
            let day = int_part(name, map, &["day"])?;
            let (Ok(y), Ok(m), Ok(d)) = (i32::try_from(year), u32::try_from(month), u32::try_from(day))
            else {
                return Err(format!("{} has out-of-range parts", name));
            };
            NaiveDate::from_ymd_opt(y, m, d)
                .map(Some)
                .ok_or_else(|| format!("{} {}-{}-{} is not a valid calendar date", name, y, m, d))
        }
        other => Err(format!(
            "{} must be a date string or {{year, month, day}} table, got {}",
            name,
            kind(other)
        )),
    }
}

fn time(name: &str, v: &Value) -> FieldResult<NaiveTime> {
    let (hour, minute) = match v {
        Value::Null => return Ok(None),
        Value::String(s) => {
            let s = s.trim();
            let bad = || format!("{} '{}' must be HH:MM", name, s);
            let (h, m) = s.split_once(':').ok_or_else(bad)?;
            let digits = |p: &str| !p.is_empty() && p.bytes().all(|b| b.is_ascii_digit());
            if !digits(h) || h.len() > 2 || !digits(m) || m.len() != 2 {
                return Err(bad());
            }
            (h.parse::<i64>().map_err(|_| bad())?, m.parse::<i64>().map_err(|_| bad())?)
        }
        Value::Object(map) => (
            int_part(name, map, &["hour"])?,
            int_part(name, map, &["minute", "min"])?,
        ),
        other => {
            return Err(format!(
                "{} must be an HH:MM string, got {}",
                name,
                kind(other)
            ));
        }
    };
    if !(0..24).contains(&hour) {
        return Err(format!("{} hour {} is outside 00-23", name, hour));
    }
    if !(0..60).contains(&minute) {
        return Err(format!("{} minute {} is outside 00-59", name, minute));
    }
    Ok(NaiveTime::from_hms_opt(hour as u32, minute as u32, 0))
}

fn int_part(name: &str, map: &Map<String, Value>, keys: &[&str]) -> Result<i64, String> {
    let value = keys.iter().find_map(|k| map.get(*k));
    match value {
        None | Some(Value::Null) => Err(format!("{} is missing {}", name, keys[0])),
        Some(Value::Number(n)) => n
            .as_i64()
            .ok_or_else(|| format!("{} {} must be an integer", name, keys[0])),
        Some(Value::String(s)) => s
            .trim()
            .parse::<i64>()
            .map_err(|_| format!("{} {} '{}' must be an integer", name, keys[0], s)),
        Some(other) => Err(format!(
            "{} {} must be an integer, got {}",
            name,
            keys[0],
            kind(other)
        )),
    }
}

fn boolean(name: &str, v: &Value) -> FieldResult<bool> {
    match v {
        Value::Null => Ok(None),
        Value::Bool(b) => Ok(Some(*b)),
        other => Err(format!("{} must be true or false, got {}", name, kind(other))),
    }
}

fn status(v: &Value) -> FieldResult<ItemStatus> {
    match v {
        Value::Null => Ok(None),
        Value::String(s) if s.trim().is_empty() => Ok(None),
        Value::String(s) => ItemStatus::from_str(&s.trim().replace(' ', "_"))
            .map(Some)
            .map_err(|_| {
                let allowed: Vec<String> = ItemStatus::iter().map(|s| s.to_string()).collect();
                format!("status '{}' is not one of {}", s, allowed.join(", "))
            }),
        other => Err(format!("status must be a string, got {}", kind(other))),
    }
}

fn priority(v: &Value) -> FieldResult<char> {
    match v {
        Value::Null => Ok(None),
        Value::String(s) => {
            let mut chars = s.trim().chars();
            match (chars.next(), chars.next()) {
                (Some(c), None) if c.is_ascii_uppercase() => Ok(Some(c)),
                _ => Err(format!(
                    "priority '{}' must be a single uppercase letter A-Z",
                    s
                )),
            }
        }
        other => Err(format!(
            "priority must be a single uppercase letter, got {}",
            kind(other)
        )),
    }
}

fn check_tag(tag: &str) -> Result<(), String> {
    if tag.is_empty() || tag.chars().any(|c| c.is_whitespace() || c == ':') {
        Err(format!("tag '{}' must be non-empty without spaces or ':'", tag))
    } else {
        Ok(())
    }
}

fn tags(v: &Value) -> FieldResult<BTreeSet<String>> {
    match v {
        Value::Null => Ok(None),
        Value::Array(values) => {
            let mut set = BTreeSet::new();
            for value in values {
                let Value::String(tag) = value else {
                    return Err(format!("tags must be strings, got {}", kind(value)));
                };
                let tag = tag.trim();
                check_tag(tag)?;
                set.insert(tag.to_string());
            }
            Ok(Some(set))
        }
        other => Err(format!("tags must be a list of strings, got {}", kind(other))),
    }
}

fn text(name: &str, v: &Value) -> FieldResult<String> {
    match v {
        Value::Null => Ok(None),
        Value::String(s) => Ok(Some(s.clone())),
        other => Err(format!("{} must be a string, got {}", name, kind(other))),
    }
}

fn remote_id(v: &Value) -> FieldResult<String> {
    match v {
        Value::Null => Ok(None),
        Value::String(s) if s.trim().is_empty() => Ok(None),
        Value::String(s) => Ok(Some(s.trim().to_string())),
        Value::Number(n) => Ok(Some(n.to_string())),
        other => Err(format!(
            "remote_id must be a string or number, got {}",
            kind(other)
        )),
    }
}

fn updated_at(v: &Value) -> FieldResult<String> {
    match v {
        Value::Null => Ok(None),
        Value::String(s) if s.trim().is_empty() => Ok(None),
        Value::String(s) => Ok(Some(s.trim().to_string())),
        // Epoch seconds
        Value::Number(n) => n
            .as_i64()
            .and_then(|secs| DateTime::<Utc>::from_timestamp(secs, 0))
            .map(|dt| Some(dt.to_rfc3339_opts(chrono::SecondsFormat::Secs, true)))
            .ok_or_else(|| format!("updated_at {} is not a valid epoch timestamp", n)),
        other => Err(format!("updated_at must be a string, got {}", kind(other))),
    }
}

fn kind(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "list",
        Value::Object(_) => "table",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn raw(v: Value) -> RawItem {
        RawItem::from_json(v).unwrap()
    }

    #[test]
    fn test_group_is_flattened_to_one_line() {
        let item = validate(&raw(json!({
            "title": "x",
            "group": "Work\n<!-- END FOO SYNC -->\r\n"
        })))
        .unwrap();
        assert_eq!(item.group.as_deref(), Some("Work <!-- END FOO SYNC -->"));

        let blank = validate(&raw(json!({"title": "x", "group": " \n\t"}))).unwrap();
        assert_eq!(blank.group, None);
    }

    #[test]
    fn test_date_only_item_is_all_day() {
        let item = validate(&raw(json!({"title": "Holiday", "start_date": "2026-12-25"}))).unwrap();
        assert!(item.all_day);
        assert_eq!(item.start_date, NaiveDate::from_ymd_opt(2026, 12, 25));
    }

    #[test]
    fn test_timed_item_is_not_all_day() {
        let item = validate(&raw(json!({
            "title": "Call",
            "start_date": {"year": 2026, "month": 10, "day": 16},
            "start_time": {"hour": 9, "min": 5},
            "end_time": "10:00"
        })))
        .unwrap();
        assert!(!item.all_day);
        assert_eq!(item.start_time, NaiveTime::from_hms_opt(9, 5, 0));
    }

    #[test]
    fn test_all_day_with_time_is_rejected() {
        let errs = validate(&raw(json!({
            "title": "x", "start_date": "2026-10-16", "start_time": "10:00", "all_day": true
        })))
        .unwrap_err();
        assert!(errs.iter().any(|e| e.contains("all_day")));
    }

    #[test]
    fn test_time_format_boundaries() {
        for bad in ["24:00", "12:60", "1200", "12:5", "ab:cd", ":30"] {
            let res = validate(&raw(json!({"title": "t", "start_date": "2026-01-01", "start_time": bad})));
            assert!(res.is_err(), "{} should be rejected", bad);
        }
        for good in ["00:00", "23:59", "7:30"] {
            let res = validate(&raw(json!({"title": "t", "start_date": "2026-01-01", "start_time": good})));
            assert!(res.is_ok(), "{} should be accepted", good);
        }
    }

    #[test]
    fn test_incomplete_dates_are_rejected() {
        let errs = validate(&raw(json!({"title": "t", "start_date": {"year": 2026, "month": 3}}))).unwrap_err();
        assert_eq!(errs, vec!["start_date is missing day".to_string()]);

        let errs = validate(&raw(json!({"title": "t", "start_date": "2026-03"}))).unwrap_err();
        assert!(errs[0].contains("complete YYYY-MM-DD"));

        let errs = validate(&raw(json!({"title": "t", "start_date": "2026-02-30"}))).unwrap_err();
        assert!(errs[0].contains("not a valid calendar date"));
    }

    #[test]
    fn test_priority_and_status() {
        assert!(validate(&raw(json!({"title": "t", "priority": "a"}))).is_err());
        assert!(validate(&raw(json!({"title": "t", "priority": "AB"}))).is_err());
        assert!(validate(&raw(json!({"title": "t", "priority": 1}))).is_err());
        let item = validate(&raw(json!({"title": "t", "priority": "C", "status": "waiting"}))).unwrap();
        assert_eq!(item.priority, Some('C'));
        assert_eq!(item.status, Some(ItemStatus::Waiting));

        let errs = validate(&raw(json!({"title": "t", "status": "NEXT"}))).unwrap_err();
        assert!(errs[0].contains("TODO, IN_PROGRESS, DONE, CANCELLED, WAITING, BLOCKED"));
    }

    #[test]
    fn test_all_errors_are_collected() {
        let errs = validate(&raw(json!({"title": "", "priority": "z", "tags": "work"}))).unwrap_err();
        assert_eq!(errs.len(), 3);
    }

    #[test]
    fn test_numeric_remote_fields_are_coerced() {
        let item = validate(&raw(json!({"title": "t", "id": 17, "updated_at": 0}))).unwrap();
        assert_eq!(item.remote_id.as_deref(), Some("17"));
        assert_eq!(item.updated_at.as_deref(), Some("1970-01-01T00:00:00Z"));
    }

    #[test]
    fn test_partition_keeps_valid_items() {
        let batch = vec![
            raw(json!({"title": "ok 1"})),
            raw(json!({"title": 5})),
            raw(json!({"title": "ok 2"})),
        ];
        let p = partition(batch);
        assert_eq!(p.accepted.len(), 2);
        assert_eq!(p.rejected.len(), 1);
        assert_eq!(p.rejected[0].index, 1);
        assert!(!p.rejected[0].reason().is_empty());
    }

    #[test]
    fn test_rejection_summary_is_bounded() {
        let rejected: Vec<Rejection> = (0..7)
            .map(|i| Rejection {
                index: i,
                title: format!("t{}", i),
                errors: vec!["title is required".to_string()],
            })
            .collect();
        let summary = summarize_rejections(&rejected, 3).unwrap();
        assert!(summary.starts_with("7 item(s) rejected"));
        assert!(summary.contains("#3 't2'"));
        assert!(!summary.contains("'t3'"));
        assert!(summary.ends_with("and 4 more"));
        assert!(summarize_rejections(&[], 3).is_none());
    }
}
