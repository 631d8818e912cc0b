//! Application state for the API server.

use authlog_core::EventHub;
use authlog_proxy::Recorder;
use authlog_storage::LogStore;

/// Shared application state.
#[derive(Clone, Debug)]
pub struct AppState {
    /// Log files read by the API.
    pub store: LogStore,
    /// Live entry fan-out.
    pub hub: EventHub,
}

impl AppState {
    pub fn new(store: LogStore, hub: EventHub) -> Self {
        Self { store, hub }
    }

    /// Shares the store and hub the proxy records into.
    pub fn from_recorder(recorder: &Recorder) -> Self {
        Self::new(recorder.store().clone(), recorder.hub().clone())
    }
}
