//! Log read path.

use hookci_core::{EntityId, Error, LineStream, LogKey, LogSink, Result};
use hookci_db::EntityStore;
use std::sync::Arc;

/// Resolves an entity id to its log and streams it.
#[derive(Clone)]
pub struct LogService {
    store: Arc<dyn EntityStore>,
    logs: Arc<dyn LogSink>,
}

impl LogService {
    pub fn new(store: Arc<dyn EntityStore>, logs: Arc<dyn LogSink>) -> Self {
        Self { store, logs }
    }

    /// Stream the log of a build or deploy.
    ///
    /// Fails with [`Error::NotFound`] when no such record exists or when the
    /// record exists but nothing was ever written for it.
    pub async fn stream_log(&self, id: &EntityId) -> Result<LineStream> {
        if let Some(build) = self.store.find_build(id).await? {
            return self.logs.open_reader(&LogKey::for_build(&build)).await;
        }
        if let Some(deploy) = self.store.find_deploy(id).await? {
            return self.logs.open_reader(&LogKey::for_deploy(&deploy)).await;
        }
        Err(Error::NotFound(format!("no build or deploy {}", id)))
    }

    pub async fn stream_build_log(&self, build_id: &EntityId) -> Result<LineStream> {
        let build = self.store.get_build(build_id).await?;
        self.logs.open_reader(&LogKey::for_build(&build)).await
    }

    pub async fn stream_deploy_log(&self, deploy_id: &EntityId) -> Result<LineStream> {
        let deploy = self.store.get_deploy(deploy_id).await?;
        self.logs.open_reader(&LogKey::for_deploy(&deploy)).await
    }
}
