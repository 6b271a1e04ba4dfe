// File: ./src/notify.rs
//! Cycle notifications.
use crate::sync::report::CycleStatus;
use notify_rust::Notification;

/// Receives exactly one call per finished cycle.
pub trait Notifier: Send + Sync {
    fn cycle_finished(&self, source: &str, status: CycleStatus, summary: &str);
}

/// Writes the summary to the log. Always active.
#[derive(Debug, Default, Clone)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn cycle_finished(&self, source: &str, status: CycleStatus, summary: &str) {
        match status {
            CycleStatus::Success => log::info!("[{}] {}", source, summary),
            CycleStatus::Partial => log::warn!("[{}] {}", source, summary),
            CycleStatus::Failed => log::error!("[{}] {}", source, summary),
        }
    }
}

/// Logs, and shows a desktop notification.
#[derive(Debug, Default, Clone)]
pub struct DesktopNotifier {
    log: LogNotifier,
}

impl Notifier for DesktopNotifier {
    fn cycle_finished(&self, source: &str, status: CycleStatus, summary: &str) {
        self.log.cycle_finished(source, status, summary);

        let title = format!("notesync: {} {}", source, status);
        let body = summary.to_string();
        // The notification daemon call can block, keep it off the runtime.
        std::thread::spawn(move || {
            if let Err(e) = Notification::new()
                .summary(&title)
                .body(&body)
                .appname("notesync")
                .show()
            {
                log::debug!("Desktop notification failed: {}", e);
            }
        });
    }
}

pub fn from_config(desktop: bool) -> std::sync::Arc<dyn Notifier> {
    if desktop {
        std::sync::Arc::new(DesktopNotifier::default())
    } else {
        std::sync::Arc::new(LogNotifier)
    }
}
