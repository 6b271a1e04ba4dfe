// File: ./src/model/identity.rs
//! Inline identity records.
//!
//! The mapping from a local heading to its remote counterpart is stored as a
//! comment directly below the heading, one per source:
//!
//! ```text
//! ### TODO Call the bank :calendar:
//! <!-- sync:calendar id=abc123 synced_at=2026-10-16T10:00:00Z remote_updated_at=2026-10-16T09:58:12Z -->
//! ```
use crate::region::split_lines;
use crate::storage::LocalStorage;
use anyhow::{Result, anyhow};
use chrono::Utc;
use std::path::Path;

pub const STAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";

pub fn now_stamp() -> String {
    Utc::now().format(STAMP_FORMAT).to_string()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentityRecord {
    pub source: String,
    pub remote_id: String,
    /// Local time of the last successful push or pull of this record.
    pub synced_at: Option<String>,
    /// The remote's own `updated_at` as seen at that sync.
    pub remote_updated_at: Option<String>,
}

impl IdentityRecord {
    pub fn new(source: &str, remote_id: &str) -> Self {
        Self {
            source: source.to_string(),
            remote_id: remote_id.to_string(),
            synced_at: None,
            remote_updated_at: None,
        }
    }

    pub fn is_for(&self, source: &str) -> bool {
        self.source.eq_ignore_ascii_case(source)
    }

    pub fn to_comment(&self) -> String {
        let mut out = format!(
            "<!-- sync:{} id={}",
            self.source.to_lowercase(),
            escape(&self.remote_id)
        );
        if let Some(ts) = &self.synced_at {
            out.push_str(&format!(" synced_at={}", escape(ts)));
        }
        if let Some(ts) = &self.remote_updated_at {
            out.push_str(&format!(" remote_updated_at={}", escape(ts)));
        }
        out.push_str(" -->");
        out
    }

    /// Parses an identity comment line. Leading indentation is allowed.
    pub fn parse(line: &str) -> Option<Self> {
        let inner = line.trim().strip_prefix("<!--")?.strip_suffix("-->")?;
        let mut words = inner.split_whitespace();
        let source = words.next()?.strip_prefix("sync:")?;
        if source.is_empty() {
            return None;
        }
        let mut record = Self::new(source, "");
        for word in words {
            let (key, value) = word.split_once('=')?;
            let value = unescape(value);
            match key {
                "id" => record.remote_id = value,
                "synced_at" => record.synced_at = Some(value),
                "remote_updated_at" => record.remote_updated_at = Some(value),
                // Unknown keys from newer versions are ignored.
                _ => {}
            }
        }
        if record.remote_id.is_empty() {
            return None;
        }
        Some(record)
    }
}

pub fn escape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '%' => out.push_str("%25"),
            ' ' => out.push_str("%20"),
            '>' => out.push_str("%3E"),
            '\t' => out.push_str("%09"),
            '\n' => out.push_str("%0A"),
            '\r' => out.push_str("%0D"),
            c => out.push(c),
        }
    }
    out
}

pub fn unescape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut rest = value;
    while let Some(pos) = rest.find('%') {
        out.push_str(&rest[..pos]);
        let code = rest.get(pos + 1..pos + 3);
        match code.and_then(|h| u8::from_str_radix(h, 16).ok()) {
            Some(b) if b.is_ascii() => {
                out.push(b as char);
                rest = &rest[pos + 3..];
            }
            _ => {
                out.push('%');
                rest = &rest[pos + 1..];
            }
        }
    }
    out.push_str(rest);
    out
}

/// Where a heading was found when the push candidates were scanned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeadingAnchor {
    /// 0-based line index at scan time.
    pub line: usize,
    /// Exact heading line, used to re-locate it if lines moved.
    pub raw: String,
}

/// Anchors and file lines are compared without a trailing `\r`.
fn locate(lines: &[String], anchor: &HeadingAnchor) -> Option<usize> {
    let wanted = anchor.raw.trim_end_matches('\r');
    let matches = |l: &String| l.trim_end_matches('\r') == wanted;
    if lines.get(anchor.line).is_some_and(matches) {
        return Some(anchor.line);
    }
    lines
        .iter()
        .enumerate()
        .filter(|(_, l)| matches(*l))
        .min_by_key(|(i, _)| i.abs_diff(anchor.line))
        .map(|(i, _)| i)
}

/// Sets (or clears, with `None`) the identity comment for `source` below the
/// anchored heading, under the file lock. Every other byte of the file,
/// line endings included, is kept.
pub fn write_back(
    path: &Path,
    anchor: &HeadingAnchor,
    source: &str,
    record: Option<&IdentityRecord>,
) -> Result<()> {
    LocalStorage::with_lock(path, || {
        let content = LocalStorage::read_optional(path)?
            .ok_or_else(|| anyhow!("{:?} disappeared before identity write-back", path))?;
        let (mut lines, trailing_newline) = split_lines(&content);

        let heading = locate(&lines, anchor).ok_or_else(|| {
            anyhow!(
                "Heading '{}' no longer present in {:?}",
                anchor.raw.trim_end_matches('\r'),
                path
            )
        })?;
        let eol = if lines[heading].ends_with('\r') { "\r" } else { "" };

        let mut existing = None;
        let mut block_end = heading + 1;
        while block_end < lines.len() {
            match IdentityRecord::parse(&lines[block_end]) {
                Some(r) => {
                    if r.is_for(source) {
                        existing = Some(block_end);
                    }
                    block_end += 1;
                }
                None => break,
            }
        }

        match (existing, record) {
            (Some(i), Some(r)) => {
                let eol = if lines[i].ends_with('\r') { "\r" } else { "" };
                lines[i] = format!("{}{}", r.to_comment(), eol);
            }
            (Some(i), None) => {
                lines.remove(i);
            }
            (None, Some(r)) => lines.insert(block_end, format!("{}{}", r.to_comment(), eol)),
            (None, None) => return Ok(()),
        }

        let mut out = lines.join("\n");
        if trailing_newline {
            out.push('\n');
        }
        LocalStorage::atomic_write(path, out)
    })
}
