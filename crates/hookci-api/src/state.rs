//! Application state.

use hookci_core::EntityId;
use hookci_db::EntityStore;
use hookci_scheduler::{Dispatcher, LogService};
use std::sync::Arc;

use crate::error::ApiError;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub dispatcher: Arc<Dispatcher>,
    pub logs: LogService,
    /// Shared secret for GitHub signatures; unsigned deliveries are
    /// accepted when unset.
    pub github_secret: Option<Arc<str>>,
}

impl AppState {
    pub fn new(dispatcher: Arc<Dispatcher>, github_secret: Option<String>) -> Self {
        let logs = LogService::new(dispatcher.store().clone(), dispatcher.logs().clone());
        Self {
            dispatcher,
            logs,
            github_secret: github_secret.map(Arc::from),
        }
    }

    pub fn store(&self) -> &Arc<dyn EntityStore> {
        self.dispatcher.store()
    }
}

/// Parse an id taken from a request path.
pub fn parse_id(raw: &str) -> Result<EntityId, ApiError> {
    raw.parse()
        .map_err(|e: hookci_core::Error| ApiError::BadRequest(e.to_string()))
}
