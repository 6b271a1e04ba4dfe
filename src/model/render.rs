// File: ./src/model/render.rs
//! Turns validated items into the lines of a managed region.
use crate::model::heading::Schedule;
use crate::model::identity::IdentityRecord;
use crate::model::item::Item;
use std::collections::HashMap;

const UNSCHEDULED: &str = "Unscheduled";

fn group_label(item: &Item) -> String {
    if let Some(g) = &item.group {
        let label = one_line(g);
        if !label.is_empty() {
            return label;
        }
    }
    match item.start_date {
        Some(d) => d.format("%Y-%m-%d %a").to_string(),
        None => UNSCHEDULED.to_string(),
    }
}

/// Headings are a single line whatever the remote sent.
fn one_line(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Dated items first (by date and time), then undated, then by title.
fn sort_items(items: &mut [&Item]) {
    items.sort_by(|a, b| {
        (a.start_date.is_none(), a.start_date, a.start_time, &a.title).cmp(&(
            b.start_date.is_none(),
            b.start_date,
            b.start_time,
            &b.title,
        ))
    });
}

pub fn heading_line(item: &Item) -> String {
    let mut line = String::from("###");
    if let Some(status) = item.status {
        line.push(' ');
        line.push_str(status.as_ref());
    }
    if let Some(p) = item.priority {
        line.push_str(&format!(" [#{}]", p));
    }
    line.push(' ');
    line.push_str(&one_line(&item.title));
    if !item.tags.is_empty() {
        let tags: Vec<&str> = item.tags.iter().map(String::as_str).collect();
        line.push_str(&format!(" :{}:", tags.join(":")));
    }
    line
}

/// Identity records already present in a managed region, keyed by remote id.
pub fn previous_identities(managed: &[String], source: &str) -> HashMap<String, IdentityRecord> {
    managed
        .iter()
        .filter_map(|l| IdentityRecord::parse(l))
        .filter(|r| r.is_for(source))
        .map(|r| (r.remote_id.clone(), r))
        .collect()
}

/// Renders `items` for `source`.
///
/// `previous` is the current region body: an item whose remote `updated_at`
/// is unchanged keeps its recorded `synced_at`, otherwise it gets `now`.
pub fn render(source: &str, items: &[Item], previous: &[String], now: &str) -> Vec<String> {
    let known = previous_identities(previous, source);

    let mut sorted: Vec<&Item> = items.iter().collect();
    sort_items(&mut sorted);

    let mut order: Vec<String> = Vec::new();
    let mut groups: HashMap<String, Vec<&Item>> = HashMap::new();
    for item in sorted {
        let label = group_label(item);
        if !groups.contains_key(&label) {
            order.push(label.clone());
        }
        groups.entry(label).or_default().push(item);
    }

    let mut out = Vec::new();
    for (i, label) in order.iter().enumerate() {
        if i > 0 {
            out.push(String::new());
        }
        out.push(format!("## {}", label));
        for item in &groups[label] {
            out.push(heading_line(item));
            if let Some(id) = &item.remote_id {
                let synced_at = match known.get(id) {
                    Some(prev) if prev.remote_updated_at == item.updated_at => {
                        prev.synced_at.clone().unwrap_or_else(|| now.to_string())
                    }
                    _ => now.to_string(),
                };
                let record = IdentityRecord {
                    source: source.to_string(),
                    remote_id: id.clone(),
                    synced_at: Some(synced_at),
                    remote_updated_at: item.updated_at.clone(),
                };
                out.push(record.to_comment());
            }
            let schedule = Schedule {
                start_date: item.start_date,
                start_time: item.start_time,
                end_date: item.end_date,
                end_time: item.end_time,
            };
            if let Some(stamp) = schedule.format() {
                out.push(stamp);
            }
            for line in item.body.lines() {
                if line.trim().is_empty() {
                    out.push(String::new());
                } else {
                    out.push(format!("  {}", line.trim_end()));
                }
            }
        }
    }
    out
}
