// File: ./src/model/heading.rs
//! Reads markdown headings back into items.
//!
//! Understands the layout written by the renderer, and the same layout
//! typed by hand in user notes:
//!
//! ```text
//! ### TODO [#A] Dentist :health:calendar:
//! <!-- sync:calendar id=42 synced_at=2026-10-16T08:00:00Z -->
//! <2026-10-20 Tue 09:00-09:45>
//!   Bring the insurance card.
//! ```
use crate::model::identity::{HeadingAnchor, IdentityRecord};
use crate::model::item::{DATE_FORMAT, Item, ItemStatus, TIME_FORMAT};
use crate::region::{MarkerFault, RegionSplit};
use chrono::{NaiveDate, NaiveTime};
use std::collections::BTreeSet;
use std::str::FromStr;

/// Date and time range from an org-style timestamp line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Schedule {
    pub start_date: Option<NaiveDate>,
    pub start_time: Option<NaiveTime>,
    pub end_date: Option<NaiveDate>,
    pub end_time: Option<NaiveTime>,
}

impl Schedule {
    /// `<2026-10-16 Fri 10:00-11:00>`, `<2026-10-16 Fri>--<2026-10-18 Sun>` and
    /// `<2026-10-16 Fri 22:00>--<2026-10-17 Sat 01:00>`.
    pub fn parse(line: &str) -> Option<Self> {
        let line = line.trim();
        let (first, second) = match line.split_once("--<") {
            Some((a, b)) => (a, Some(format!("<{}", b))),
            None => (line, None),
        };
        let (start_date, start_time, mut end_time) = parse_stamp(first)?;
        let mut end_date = None;
        if let Some(second) = second {
            let (d, t, _) = parse_stamp(&second)?;
            end_date = Some(d);
            end_time = t;
        }
        Some(Self {
            start_date: Some(start_date),
            start_time,
            end_date,
            end_time,
        })
    }

    pub fn format(&self) -> Option<String> {
        let start = self.start_date?;
        let stamp = |d: NaiveDate, t: Option<NaiveTime>, t2: Option<NaiveTime>| {
            let mut s = format!("<{}", d.format("%Y-%m-%d %a"));
            if let Some(t) = t {
                s.push_str(&format!(" {}", t.format(TIME_FORMAT)));
                if let Some(t2) = t2 {
                    s.push_str(&format!("-{}", t2.format(TIME_FORMAT)));
                }
            }
            s.push('>');
            s
        };
        Some(match self.end_date.filter(|e| *e != start) {
            Some(end) => format!(
                "{}--{}",
                stamp(start, self.start_time, None),
                stamp(end, self.end_time.filter(|_| self.start_time.is_some()), None)
            ),
            None => stamp(start, self.start_time, self.end_time),
        })
    }
}

fn parse_time(s: &str) -> Option<NaiveTime> {
    NaiveTime::parse_from_str(s, TIME_FORMAT).ok()
}

fn parse_stamp(s: &str) -> Option<(NaiveDate, Option<NaiveTime>, Option<NaiveTime>)> {
    let inner = s.strip_prefix('<')?.strip_suffix('>')?;
    let mut parts = inner.split_whitespace();
    let date = NaiveDate::parse_from_str(parts.next()?, DATE_FORMAT).ok()?;
    let mut start = None;
    let mut end = None;
    for part in parts {
        if part.chars().all(|c| c.is_ascii_alphabetic()) {
            continue; // weekday
        }
        let (a, b) = match part.split_once('-') {
            Some((a, b)) => (a, Some(b)),
            None => (part, None),
        };
        start = Some(parse_time(a)?);
        if let Some(b) = b {
            end = Some(parse_time(b)?);
        }
    }
    Some((date, start, end))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalHeading {
    pub anchor: HeadingAnchor,
    pub level: usize,
    pub status: Option<ItemStatus>,
    pub priority: Option<char>,
    pub title: String,
    pub tags: BTreeSet<String>,
    pub identities: Vec<IdentityRecord>,
    pub schedule: Option<Schedule>,
    pub body: String,
}

impl LocalHeading {
    pub fn identity_for(&self, source: &str) -> Option<&IdentityRecord> {
        self.identities.iter().find(|r| r.is_for(source))
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.iter().any(|t| t.eq_ignore_ascii_case(tag))
    }

    /// Converts the heading into the item pushed to `source`. The local
    /// selection tag is not part of the remote item.
    pub fn to_item(&self, source: &str, push_tag: &str) -> Item {
        let schedule = self.schedule.unwrap_or_default();
        let identity = self.identity_for(source);
        Item {
            title: self.title.clone(),
            start_date: schedule.start_date,
            end_date: schedule.end_date,
            start_time: schedule.start_time,
            end_time: schedule.end_time,
            all_day: schedule.start_date.is_some() && schedule.start_time.is_none(),
            status: self.status,
            priority: self.priority,
            tags: self
                .tags
                .iter()
                .filter(|t| !t.eq_ignore_ascii_case(push_tag))
                .cloned()
                .collect(),
            body: self.body.clone(),
            group: None,
            remote_id: identity.map(|r| r.remote_id.clone()),
            updated_at: identity.and_then(|r| r.remote_updated_at.clone()),
        }
    }
}

/// `### TODO [#A] Title :a:b:` → (level, rest)
fn heading_level(line: &str) -> Option<(usize, &str)> {
    let level = line.bytes().take_while(|b| *b == b'#').count();
    if level == 0 || level > 6 {
        return None;
    }
    let rest = line[level..].strip_prefix(' ')?;
    Some((level, rest.trim()))
}

fn split_tags(text: &str) -> (&str, BTreeSet<String>) {
    let (head, last) = text.rsplit_once(' ').unwrap_or(("", text));
    let is_tag_block = last.len() > 2
        && last.starts_with(':')
        && last.ends_with(':')
        && last[1..last.len() - 1]
            .split(':')
            .all(|t| !t.is_empty() && !t.chars().any(char::is_whitespace));
    if !is_tag_block || head.trim().is_empty() {
        return (text, BTreeSet::new());
    }
    let tags = last[1..last.len() - 1]
        .split(':')
        .map(str::to_string)
        .collect();
    (head.trim_end(), tags)
}

fn parse_heading_text(
    text: &str,
) -> (Option<ItemStatus>, Option<char>, String, BTreeSet<String>) {
    let mut rest = text;

    let mut status = None;
    let (word, tail) = rest.split_once(' ').unwrap_or((rest, ""));
    if !word.is_empty()
        && word
            .chars()
            .all(|c| c.is_ascii_uppercase() || c == '_' || c == '-')
        && let Ok(s) = ItemStatus::from_str(word)
    {
        status = Some(s);
        rest = tail.trim_start();
    }

    let mut priority = None;
    if let Some(tail) = rest.strip_prefix("[#") {
        let mut chars = tail.chars();
        if let (Some(c), Some(']')) = (chars.next(), chars.next())
            && c.is_ascii_uppercase()
        {
            priority = Some(c);
            rest = tail[2..].trim_start();
        }
    }

    let (title, tags) = split_tags(rest);
    (status, priority, title.trim().to_string(), tags)
}

/// Scans a run of lines; `offset` is the index of `lines[0]` in the file.
fn scan_lines(lines: &[String], offset: usize, out: &mut Vec<LocalHeading>) {
    let mut i = 0;
    while i < lines.len() {
        let Some((level, text)) = heading_level(&lines[i]) else {
            i += 1;
            continue;
        };
        let (status, priority, title, tags) = parse_heading_text(text);
        let anchor = HeadingAnchor {
            line: offset + i,
            raw: lines[i].clone(),
        };
        i += 1;

        let mut identities = Vec::new();
        while let Some(r) = lines.get(i).and_then(|l| IdentityRecord::parse(l)) {
            identities.push(r);
            i += 1;
        }

        let mut schedule = None;
        if let Some(s) = lines.get(i).and_then(|l| Schedule::parse(l)) {
            schedule = Some(s);
            i += 1;
        }

        let mut body: Vec<&str> = Vec::new();
        while i < lines.len() && heading_level(&lines[i]).is_none() {
            let line = lines[i].trim_end_matches('\r');
            body.push(line.strip_prefix("  ").unwrap_or(line));
            i += 1;
        }
        while body.last().is_some_and(|l| l.trim().is_empty()) {
            body.pop();
        }
        while body.first().is_some_and(|l| l.trim().is_empty()) {
            body.remove(0);
        }

        if title.is_empty() {
            continue;
        }
        out.push(LocalHeading {
            anchor,
            level,
            status,
            priority,
            title,
            tags,
            identities,
            schedule,
            body: body.join("\n"),
        });
    }
}

/// All headings outside the managed region of `source`.
pub fn scan_outside_region(content: &str, source: &str) -> Result<Vec<LocalHeading>, MarkerFault> {
    let split = RegionSplit::parse(content, source)?;
    let mut out = Vec::new();
    scan_lines(&split.before, 0, &mut out);
    if !split.after.is_empty() {
        let offset = split.before.len() + split.managed.len() + 2;
        scan_lines(&split.after, offset, &mut out);
    }
    Ok(out)
}

/// All headings in a run of lines (e.g. a managed region body).
pub fn scan(lines: &[String]) -> Vec<LocalHeading> {
    let mut out = Vec::new();
    scan_lines(lines, 0, &mut out);
    out
}
