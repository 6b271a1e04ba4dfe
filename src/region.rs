// File: ./src/region.rs
//! Managed-region engine.
//!
//! A managed file is split into `before`, `managed` and `after` parts by a
//! marker pair that is unique per source:
//!
//! ```text
//! user notes...
//! <!-- BEGIN CALENDAR SYNC -->
//! generated lines, rewritten on every pull
//! <!-- END CALENDAR SYNC -->
//! more user notes...
//! ```
//!
//! Splitting is done by a two-state scanner. Every unbalanced layout is an
//! explicit `MarkerFault` and no write happens in that case.
use crate::error::SyncError;
use crate::storage::LocalStorage;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegionStatus {
    /// No marker for this source yet; the whole file is user content.
    NoMarkers,
    /// Exactly one BEGIN followed by exactly one END.
    Balanced,
}

/// Line numbers are 1-based.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MarkerFault {
    #[error("BEGIN marker on line {line} has no matching END")]
    UnterminatedBegin { line: usize },
    #[error("END marker on line {line} has no preceding BEGIN")]
    OrphanEnd { line: usize },
    #[error("BEGIN marker on line {line} appears inside an open region")]
    NestedBegin { line: usize },
    #[error("second region starts on line {line}; only one pair is allowed")]
    DuplicateRegion { line: usize },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("refusing to write {path:?}: {fault} (source '{source_name}')")]
pub struct MarkerError {
    pub path: PathBuf,
    pub source_name: String,
    pub fault: MarkerFault,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Marker {
    Begin,
    End,
}

enum ScanState {
    Outside,
    Inside { begin: usize },
}

pub fn begin_marker(source: &str) -> String {
    format!("<!-- BEGIN {} SYNC -->", source.to_uppercase())
}

pub fn end_marker(source: &str) -> String {
    format!("<!-- END {} SYNC -->", source.to_uppercase())
}

/// Recognizes `<!-- BEGIN NAME SYNC -->` / `<!-- END NAME SYNC -->` at column 0.
fn marker_kind(line: &str, source: &str) -> Option<Marker> {
    let inner = line.trim_end().strip_prefix("<!--")?.strip_suffix("-->")?;
    let mut words = inner.split_whitespace();
    let kind = match words.next()? {
        w if w.eq_ignore_ascii_case("BEGIN") => Marker::Begin,
        w if w.eq_ignore_ascii_case("END") => Marker::End,
        _ => return None,
    };
    if !words.next()?.eq_ignore_ascii_case(source) {
        return None;
    }
    if !words.next()?.eq_ignore_ascii_case("SYNC") || words.next().is_some() {
        return None;
    }
    Some(kind)
}

/// Result of scanning a file for one source's region.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegionSplit {
    pub status: RegionStatus,
    pub before: Vec<String>,
    pub managed: Vec<String>,
    pub after: Vec<String>,
    begin_line: Option<String>,
    end_line: Option<String>,
    trailing_newline: bool,
}

impl RegionSplit {
    /// Splits `content` for `source`.
    pub fn parse(content: &str, source: &str) -> Result<Self, MarkerFault> {
        let (lines, trailing_newline) = split_lines(content);

        let mut state = ScanState::Outside;
        let mut region: Option<(usize, usize)> = None;
        for (i, line) in lines.iter().enumerate() {
            match (marker_kind(line, source), &state) {
                (None, _) => {}
                (Some(Marker::Begin), ScanState::Outside) => {
                    if region.is_some() {
                        return Err(MarkerFault::DuplicateRegion { line: i + 1 });
                    }
                    state = ScanState::Inside { begin: i };
                }
                (Some(Marker::Begin), ScanState::Inside { .. }) => {
                    return Err(MarkerFault::NestedBegin { line: i + 1 });
                }
                (Some(Marker::End), ScanState::Inside { begin }) => {
                    region = Some((*begin, i));
                    state = ScanState::Outside;
                }
                (Some(Marker::End), ScanState::Outside) => {
                    return Err(MarkerFault::OrphanEnd { line: i + 1 });
                }
            }
        }
        if let ScanState::Inside { begin } = state {
            return Err(MarkerFault::UnterminatedBegin { line: begin + 1 });
        }

        Ok(match region {
            None => Self {
                status: RegionStatus::NoMarkers,
                before: lines,
                managed: vec![],
                after: vec![],
                begin_line: None,
                end_line: None,
                trailing_newline,
            },
            Some((b, e)) => Self {
                status: RegionStatus::Balanced,
                before: lines[..b].to_vec(),
                managed: lines[b + 1..e].to_vec(),
                after: lines[e + 1..].to_vec(),
                begin_line: Some(lines[b].clone()),
                end_line: Some(lines[e].clone()),
                trailing_newline,
            },
        })
    }

    /// Reassembles the file with `managed` as the new region body.
    ///
    /// Existing marker lines are reused verbatim so preserved text stays
    /// byte-identical. A file without markers gets the region appended.
    pub fn compose(&self, source: &str, managed: &[String]) -> String {
        let begin = self.begin_line.clone().unwrap_or_else(|| begin_marker(source));
        let end = self.end_line.clone().unwrap_or_else(|| end_marker(source));

        let mut lines: Vec<&str> = self.before.iter().map(String::as_str).collect();
        if self.status == RegionStatus::NoMarkers
            && lines.last().is_some_and(|l| !l.trim().is_empty())
        {
            lines.push("");
        }
        lines.push(&begin);
        lines.extend(managed.iter().map(String::as_str));
        lines.push(&end);
        lines.extend(self.after.iter().map(String::as_str));

        let mut out = lines.join("\n");
        if self.trailing_newline || self.status == RegionStatus::NoMarkers {
            out.push('\n');
        }
        out
    }
}

/// Splits on `\n` only, so a CRLF line keeps its `\r`.
pub(crate) fn split_lines(content: &str) -> (Vec<String>, bool) {
    if content.is_empty() {
        return (vec![], false);
    }
    let trailing = content.ends_with('\n');
    let body = if trailing {
        &content[..content.len() - 1]
    } else {
        content
    };
    (body.split('\n').map(str::to_string).collect(), trailing)
}

fn corruption(path: &Path, source: &str, fault: MarkerFault) -> SyncError {
    SyncError::MarkerCorruption(MarkerError {
        path: path.to_path_buf(),
        source_name: source.to_string(),
        fault,
    })
}

/// Reads `path` and splits it for `source`. A missing file has no markers.
pub fn read_preserved(path: &Path, source: &str) -> Result<RegionSplit, SyncError> {
    let content = LocalStorage::read_optional(path)
        .map_err(|e| SyncError::storage(source, e))?
        .unwrap_or_default();
    RegionSplit::parse(&content, source).map_err(|fault| corruption(path, source, fault))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteOutcome {
    /// Layout found before the write.
    pub previous_status: RegionStatus,
    /// False when the composed file equalled the current one.
    pub changed: bool,
    pub backup: Option<PathBuf>,
}

/// Replaces the managed region of `path` with `managed`.
///
/// Runs under the file lock: re-reads the file, refuses on any marker fault,
/// writes atomically with read-back, and only then stores a backup of the
/// previous version (keeping `backup_limit` backups).
pub fn write_atomic(
    path: &Path,
    source: &str,
    managed: &[String],
    backup_limit: usize,
) -> Result<WriteOutcome, SyncError> {
    let result = LocalStorage::with_lock(path, || {
        let previous = LocalStorage::read_optional(path)?;
        let split = match RegionSplit::parse(previous.as_deref().unwrap_or(""), source) {
            Ok(s) => s,
            Err(fault) => return Ok(Err(fault)),
        };
        let composed = split.compose(source, managed);

        if previous.as_deref() == Some(composed.as_str()) {
            return Ok(Ok(WriteOutcome {
                previous_status: split.status,
                changed: false,
                backup: None,
            }));
        }

        if let Err(e) = LocalStorage::atomic_write(path, &composed) {
            if let Some(prev) = &previous
                && LocalStorage::read_optional(path).ok().flatten().as_ref() != Some(prev)
            {
                log::error!("Write of {:?} failed verification, restoring previous content", path);
                if let Err(restore) = LocalStorage::atomic_write(path, prev) {
                    log::error!("Restore of {:?} failed: {}", path, restore);
                }
            }
            return Err(e);
        }

        let backup = match &previous {
            Some(prev) if !prev.is_empty() => {
                match LocalStorage::write_backup(path, prev.as_bytes(), backup_limit) {
                    Ok(p) => Some(p),
                    Err(e) => {
                        log::warn!("Wrote {:?} but could not store a backup: {:#}", path, e);
                        None
                    }
                }
            }
            _ => None,
        };

        Ok(Ok(WriteOutcome {
            previous_status: split.status,
            changed: true,
            backup,
        }))
    });

    match result {
        Ok(Ok(outcome)) => Ok(outcome),
        Ok(Err(fault)) => Err(corruption(path, source, fault)),
        Err(e) => Err(SyncError::storage(source, e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lines(v: &[&str]) -> Vec<String> {
        v.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_no_markers_returns_everything_as_before() {
        let split = RegionSplit::parse("a\nb\n", "foo").unwrap();
        assert_eq!(split.status, RegionStatus::NoMarkers);
        assert_eq!(split.before, lines(&["a", "b"]));
        assert!(split.after.is_empty());
    }

    #[test]
    fn test_balanced_split() {
        let text = "top\n<!-- BEGIN FOO SYNC -->\nold\n<!-- END FOO SYNC -->\ntail\n";
        let split = RegionSplit::parse(text, "foo").unwrap();
        assert_eq!(split.status, RegionStatus::Balanced);
        assert_eq!(split.before, lines(&["top"]));
        assert_eq!(split.managed, lines(&["old"]));
        assert_eq!(split.after, lines(&["tail"]));
    }

    #[test]
    fn test_marker_name_is_case_insensitive() {
        let text = "<!-- begin Foo sync -->\n<!-- END FOO SYNC -->\n";
        let split = RegionSplit::parse(text, "FOO").unwrap();
        assert_eq!(split.status, RegionStatus::Balanced);
    }

    #[test]
    fn test_other_source_markers_are_user_content() {
        let text = "<!-- BEGIN BAR SYNC -->\nx\n<!-- END BAR SYNC -->\n";
        let split = RegionSplit::parse(text, "foo").unwrap();
        assert_eq!(split.status, RegionStatus::NoMarkers);
        assert_eq!(split.before.len(), 3);
    }

    #[test]
    fn test_indented_marker_is_not_a_marker() {
        let text = "  <!-- BEGIN FOO SYNC -->\n";
        let split = RegionSplit::parse(text, "foo").unwrap();
        assert_eq!(split.status, RegionStatus::NoMarkers);
    }

    #[test]
    fn test_unterminated_begin() {
        let text = "a\n<!-- BEGIN FOO SYNC -->\nprecious\n";
        assert_eq!(
            RegionSplit::parse(text, "foo"),
            Err(MarkerFault::UnterminatedBegin { line: 2 })
        );
    }

    #[test]
    fn test_orphan_end() {
        let text = "a\n<!-- END FOO SYNC -->\n";
        assert_eq!(
            RegionSplit::parse(text, "foo"),
            Err(MarkerFault::OrphanEnd { line: 2 })
        );
    }

    #[test]
    fn test_nested_begin() {
        let text = "<!-- BEGIN FOO SYNC -->\n<!-- BEGIN FOO SYNC -->\n<!-- END FOO SYNC -->\n";
        assert_eq!(
            RegionSplit::parse(text, "foo"),
            Err(MarkerFault::NestedBegin { line: 2 })
        );
    }

    #[test]
    fn test_duplicate_region() {
        let text = "<!-- BEGIN FOO SYNC -->\n<!-- END FOO SYNC -->\n<!-- BEGIN FOO SYNC -->\n<!-- END FOO SYNC -->\n";
        assert_eq!(
            RegionSplit::parse(text, "foo"),
            Err(MarkerFault::DuplicateRegion { line: 3 })
        );
    }

    #[test]
    fn test_compose_appends_region_to_unmarked_file() {
        let split = RegionSplit::parse("notes", "foo").unwrap();
        let out = split.compose("foo", &lines(&["item"]));
        assert_eq!(
            out,
            "notes\n\n<!-- BEGIN FOO SYNC -->\nitem\n<!-- END FOO SYNC -->\n"
        );
    }

    #[test]
    fn test_compose_roundtrip_keeps_bytes() {
        let text = "top\r\n<!--   BEGIN foo SYNC -->\nold\n<!-- END FOO SYNC -->\ntail";
        let split = RegionSplit::parse(text, "foo").unwrap();
        assert_eq!(split.compose("foo", &split.managed), text);
    }

    #[test]
    fn test_empty_file_gets_region() {
        let split = RegionSplit::parse("", "foo").unwrap();
        assert_eq!(
            split.compose("foo", &[]),
            "<!-- BEGIN FOO SYNC -->\n<!-- END FOO SYNC -->\n"
        );
    }
}
