// File: ./src/sync/pull.rs
//! Pull phase: fetch, validate, render, merge into the managed region.
use crate::error::SyncError;
use crate::model::identity::now_stamp;
use crate::model::{render, validate};
use crate::region::{self, WriteOutcome};
use crate::source::{AdapterContext, SourceAdapter};
use crate::sync::adapter_error;
use crate::sync::report::{CycleReport, PullStats};

pub(crate) async fn run_pull(
    adapter: &dyn SourceAdapter,
    cx: &AdapterContext,
    report: &mut CycleReport,
) -> Result<(), SyncError> {
    let source = cx.source.as_str();
    let target = &cx.settings.target_file;

    // Refuse early on a corrupted file, before talking to the remote.
    let current = region::read_preserved(target, source)?;

    log::info!("[{}] Pulling", source);
    let pulled = adapter
        .pull(cx)
        .await
        .map_err(|e| adapter_error(source, e))?;
    let fetched = pulled.items.len();

    let partition = validate::partition(pulled.items);
    log::info!(
        "[{}] {} item(s) fetched: {} accepted, {} rejected",
        source,
        fetched,
        partition.accepted.len(),
        partition.rejected.len()
    );
    for r in &partition.rejected {
        log::debug!("[{}] Rejected #{} '{}': {}", source, r.index + 1, r.title, r.reason());
    }

    report.stats = Some(PullStats::from_items(&partition.accepted, pulled.label));
    report.rejected = partition.rejected;

    if partition.accepted.is_empty() && !report.rejected.is_empty() {
        log::warn!(
            "[{}] Every pulled item was rejected, leaving {:?} untouched",
            source,
            target
        );
        report.accepted = partition.accepted;
        return Ok(());
    }

    let lines = render::render(source, &partition.accepted, &current.managed, &now_stamp());
    let outcome: WriteOutcome =
        region::write_atomic(target, source, &lines, cx.settings.backup_limit)?;
    match (&outcome.backup, outcome.changed) {
        (_, false) => log::info!("[{}] {:?} already up to date", source, target),
        (Some(b), true) => log::info!("[{}] Wrote {:?} (backup {:?})", source, target, b),
        (None, true) => log::info!("[{}] Wrote {:?}", source, target),
    }

    report.accepted = partition.accepted;
    report.write = Some(outcome);
    Ok(())
}
