// File: ./src/sync/report.rs
//! Cycle results.
use crate::error::SyncError;
use crate::model::validate::{Rejection, summarize_rejections};
use crate::model::Item;
use crate::region::WriteOutcome;
use crate::sync::conflict::SkipReason;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use strum::Display;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum CycleStatus {
    Success,
    /// Completed, but some items were rejected or failed.
    Partial,
    Failed,
}

/// Summary statistics of one pull.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PullStats {
    pub count: usize,
    pub earliest: Option<NaiveDate>,
    pub latest: Option<NaiveDate>,
    pub label: Option<String>,
}

impl PullStats {
    pub fn from_items(items: &[Item], label: Option<String>) -> Self {
        let dates = items
            .iter()
            .flat_map(|i| [i.start_date, i.end_date])
            .flatten();
        Self {
            count: items.len(),
            earliest: dates.clone().min(),
            latest: dates.max(),
            label,
        }
    }

    fn describe(&self) -> String {
        let mut out = format!("pulled {} item(s)", self.count);
        match (self.earliest, self.latest) {
            (Some(a), Some(b)) if a != b => out.push_str(&format!(" from {} to {}", a, b)),
            (Some(a), _) => out.push_str(&format!(" on {}", a)),
            _ => {}
        }
        if let Some(label) = &self.label {
            out.push_str(&format!(" [{}]", label));
        }
        out
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PushSummary {
    pub created: usize,
    pub updated: usize,
    /// (title, reason)
    pub skipped: Vec<(String, SkipReason)>,
    /// (title, error)
    pub failed: Vec<(String, String)>,
    pub identities_cleared: usize,
}

impl PushSummary {
    fn describe(&self) -> String {
        let mut out = format!(
            "created {}, updated {}, skipped {}, failed {}",
            self.created,
            self.updated,
            self.skipped.len(),
            self.failed.len()
        );
        let conflicts = self
            .skipped
            .iter()
            .filter(|(_, r)| *r == SkipReason::Conflict)
            .count();
        if conflicts > 0 {
            out.push_str(&format!(" ({} remote conflict(s))", conflicts));
        }
        out
    }
}

/// Outcome of one completed cycle for one source.
#[derive(Debug, Clone)]
pub struct CycleReport {
    pub source: String,
    pub accepted: Vec<Item>,
    pub rejected: Vec<Rejection>,
    /// Present when a pull ran.
    pub stats: Option<PullStats>,
    pub write: Option<WriteOutcome>,
    /// Present when a push ran.
    pub push: Option<PushSummary>,
    /// Set when a later phase aborted after earlier phases were written.
    pub error: Option<SyncError>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub max_reported_rejections: usize,
}

impl CycleReport {
    pub fn new(source: &str, max_reported_rejections: usize) -> Self {
        let now = Utc::now();
        Self {
            source: source.to_string(),
            accepted: vec![],
            rejected: vec![],
            stats: None,
            write: None,
            push: None,
            error: None,
            started_at: now,
            finished_at: now,
            max_reported_rejections,
        }
    }

    pub fn status(&self) -> CycleStatus {
        if self.error.is_some() {
            CycleStatus::Failed
        } else if !self.rejected.is_empty()
            || self.push.as_ref().is_some_and(|p| !p.failed.is_empty())
        {
            CycleStatus::Partial
        } else {
            CycleStatus::Success
        }
    }

    pub fn rejection_summary(&self) -> Option<String> {
        summarize_rejections(&self.rejected, self.max_reported_rejections)
    }

    /// One line for notifications and the CLI.
    pub fn summary(&self) -> String {
        let mut parts = Vec::new();
        if let Some(stats) = &self.stats {
            parts.push(stats.describe());
            match &self.write {
                Some(w) if w.changed => parts.push("file updated".to_string()),
                Some(_) => parts.push("file unchanged".to_string()),
                None => parts.push("file not written".to_string()),
            }
        }
        if let Some(rejections) = self.rejection_summary() {
            parts.push(rejections);
        }
        if let Some(push) = &self.push {
            parts.push(push.describe());
        }
        if let Some(e) = &self.error {
            parts.push(format!("aborted: {}", e));
        }
        format!("{}: {}; {}", self.source, self.status(), parts.join("; "))
    }
}
