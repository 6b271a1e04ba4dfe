// File: ./src/sync/push.rs
//! Push phase: select local headings, resolve conflicts, upsert, record
//! identities.
use crate::error::SyncError;
use crate::model::heading::{self, LocalHeading};
use crate::model::identity::{self, IdentityRecord, STAMP_FORMAT};
use crate::model::validate;
use crate::region::MarkerError;
use crate::source::{AdapterContext, AdapterError, Capabilities, SourceAdapter};
use crate::storage::LocalStorage;
use crate::sync::adapter_error;
use crate::sync::conflict::{self, SkipReason, Verdict};
use crate::sync::report::PushSummary;
use chrono::Utc;
use std::path::{Path, PathBuf};

/// Target file first, then the extra push files, without duplicates.
fn push_files(cx: &AdapterContext) -> Vec<PathBuf> {
    let mut files = vec![cx.settings.target_file.clone()];
    for f in &cx.settings.push_files {
        if !files.contains(f) {
            files.push(f.clone());
        }
    }
    files
}

fn candidates(
    adapter: &dyn SourceAdapter,
    cx: &AdapterContext,
    path: &Path,
) -> Result<Vec<LocalHeading>, SyncError> {
    let Some(content) =
        LocalStorage::read_optional(path).map_err(|e| SyncError::storage(&cx.source, e))?
    else {
        log::debug!("[{}] Push file {:?} does not exist, skipping", cx.source, path);
        return Ok(vec![]);
    };
    let headings = heading::scan_outside_region(&content, &cx.source).map_err(|fault| {
        SyncError::MarkerCorruption(MarkerError {
            path: path.to_path_buf(),
            source_name: cx.source.clone(),
            fault,
        })
    })?;
    let mut selected: Vec<LocalHeading> = headings
        .into_iter()
        .filter(|h| adapter.selects_for_push(h, &cx.settings))
        .collect();
    // Bottom-up, so identity lines inserted below a heading never shift the
    // anchors still to be processed.
    selected.sort_by(|a, b| b.anchor.line.cmp(&a.anchor.line));
    Ok(selected)
}

/// Per-item failures are recorded; configuration and transport errors abort.
fn item_failure(
    source: &str,
    summary: &mut PushSummary,
    title: &str,
    err: AdapterError,
) -> Result<(), SyncError> {
    match err {
        AdapterError::Item(msg) => {
            log::warn!("[{}] Push of '{}' failed: {}", source, title, msg);
            summary.failed.push((title.to_string(), msg));
            Ok(())
        }
        other => Err(adapter_error(source, other)),
    }
}

fn write_identity(
    cx: &AdapterContext,
    path: &Path,
    h: &LocalHeading,
    record: Option<&IdentityRecord>,
) -> Result<(), SyncError> {
    identity::write_back(path, &h.anchor, &cx.source, record)
        .map_err(|e| SyncError::storage(&cx.source, e))
}

pub(crate) async fn run_push(
    adapter: &dyn SourceAdapter,
    cx: &AdapterContext,
    caps: Capabilities,
) -> Result<PushSummary, SyncError> {
    let source = cx.source.as_str();
    let mut summary = PushSummary::default();

    for path in push_files(cx) {
        let selected = candidates(adapter, cx, &path)?;
        if !selected.is_empty() {
            log::info!("[{}] {} push candidate(s) in {:?}", source, selected.len(), path);
        }

        for h in &selected {
            let mut item = h.to_item(source, &cx.settings.push_tag);
            let problems = validate::check(&item);
            if !problems.is_empty() {
                let reason = problems.join("; ");
                log::warn!("[{}] Not pushing '{}': {}", source, h.title, reason);
                summary.failed.push((h.title.clone(), reason));
                continue;
            }

            let verdict = match h.identity_for(source) {
                None => Verdict::Create,
                Some(record) if caps.supports_conflict_check => {
                    match adapter.fetch_remote_updated_at(cx, &record.remote_id).await {
                        Ok(stamp) => {
                            conflict::judge(record, &stamp, cx.settings.unparsable_timestamps)
                        }
                        Err(AdapterError::Unsupported(_)) => Verdict::Update {
                            remote_id: record.remote_id.clone(),
                        },
                        Err(e) => {
                            item_failure(source, &mut summary, &h.title, e)?;
                            continue;
                        }
                    }
                }
                Some(record) => Verdict::Update {
                    remote_id: record.remote_id.clone(),
                },
            };
            log::debug!("[{}] '{}': {:?}", source, h.title, verdict);

            match verdict {
                Verdict::Skip(reason) => {
                    if reason == SkipReason::Deleted {
                        log::info!(
                            "[{}] '{}' was deleted remotely, clearing its identity",
                            source,
                            h.title
                        );
                        write_identity(cx, &path, h, None)?;
                        summary.identities_cleared += 1;
                    } else {
                        log::warn!("[{}] Skipping '{}': {}", source, h.title, reason);
                    }
                    summary.skipped.push((h.title.clone(), reason));
                    continue;
                }
                Verdict::Create => item.remote_id = None,
                Verdict::Update { ref remote_id } => item.remote_id = Some(remote_id.clone()),
            }

            let is_update = item.remote_id.is_some();
            let receipt = match adapter.push_item(cx, &item).await {
                Ok(r) => r,
                Err(e) => {
                    item_failure(source, &mut summary, &h.title, e)?;
                    continue;
                }
            };

            let synced_at =
                conflict::synced_at_after_push(Utc::now(), receipt.updated_at.as_deref());
            let record = IdentityRecord {
                source: source.to_string(),
                remote_id: receipt.remote_id,
                synced_at: Some(synced_at.format(STAMP_FORMAT).to_string()),
                remote_updated_at: receipt.updated_at,
            };
            // Recorded before the next candidate so an interrupted cycle
            // resumes with updates instead of duplicate creates.
            write_identity(cx, &path, h, Some(&record))?;

            if is_update {
                summary.updated += 1;
            } else {
                summary.created += 1;
            }
            log::info!(
                "[{}] {} '{}' as {}",
                source,
                if is_update { "Updated" } else { "Created" },
                h.title,
                record.remote_id
            );
        }
    }
    Ok(summary)
}
