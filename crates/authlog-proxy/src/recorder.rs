//! Persist-then-publish for finalized entries.

use std::sync::Arc;

use authlog_core::{EventHub, LogEntry};
use authlog_storage::LogStore;
use tracing::{error, info};

/// Hands finalized entries to the log store and then to live subscribers.
///
/// Recording never fails from the caller's point of view: storage errors
/// are logged and the entry is still published.
#[derive(Clone, Debug)]
pub struct Recorder {
    store: LogStore,
    hub: EventHub,
}

impl Recorder {
    pub fn new(store: LogStore, hub: EventHub) -> Self {
        Self { store, hub }
    }

    pub fn store(&self) -> &LogStore {
        &self.store
    }

    pub fn hub(&self) -> &EventHub {
        &self.hub
    }

    /// Records an entry in the background.
    ///
    /// Falls back to recording inline when called outside a tokio runtime.
    pub fn record(&self, entry: LogEntry) {
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let recorder = self.clone();
                handle.spawn(async move { recorder.persist(entry).await });
            }
            Err(_) => self.persist_blocking(entry),
        }
    }

    /// Appends the entry, then publishes it.
    pub async fn persist(&self, entry: LogEntry) {
        let entry = Arc::new(entry);
        let store = self.store.clone();
        let to_store = Arc::clone(&entry);

        match tokio::task::spawn_blocking(move || store.append(&to_store)).await {
            Ok(result) => self.log_append(&entry, result),
            Err(e) => error!(url = %entry.url, error = %e, "Log append task failed"),
        }

        self.hub.publish(entry);
    }

    fn persist_blocking(&self, entry: LogEntry) {
        let entry = Arc::new(entry);
        let result = self.store.append(&entry);
        self.log_append(&entry, result);
        self.hub.publish(entry);
    }

    fn log_append(&self, entry: &LogEntry, result: authlog_storage::Result<std::path::PathBuf>) {
        match result {
            Ok(path) => info!(
                method = %entry.method,
                url = %entry.url,
                status = ?entry.status(),
                file = %path.display(),
                "Auth request logged"
            ),
            Err(e) => error!(
                method = %entry.method,
                url = %entry.url,
                error = %e,
                "Failed to persist auth request"
            ),
        }
    }
}
