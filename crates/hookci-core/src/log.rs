//! Log sink abstraction.
//!
//! Each build or deploy owns one append-only log. A single writer fills it
//! while any number of readers stream the lines committed so far.

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};

use crate::id::EntityId;
use crate::{Build, Deploy, Result};

/// Which kind of entity a log belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogKind {
    Build,
    Deploy,
}

impl LogKind {
    /// Directory name used under a project's log directory.
    pub fn dir_name(&self) -> &'static str {
        match self {
            LogKind::Build => "builds",
            LogKind::Deploy => "deploys",
        }
    }
}

/// Address of one log.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LogKey {
    pub project_id: EntityId,
    pub kind: LogKind,
    pub entity_id: EntityId,
}

impl LogKey {
    pub fn for_build(build: &Build) -> Self {
        Self {
            project_id: build.project_id.clone(),
            kind: LogKind::Build,
            entity_id: build.id.clone(),
        }
    }

    pub fn for_deploy(deploy: &Deploy) -> Self {
        Self {
            project_id: deploy.project_id.clone(),
            kind: LogKind::Deploy,
            entity_id: deploy.id.clone(),
        }
    }
}

/// Lazy, finite sequence of complete lines (without trailing newline).
pub type LineStream = BoxStream<'static, Result<String>>;

/// Exclusive writer for one log.
///
/// Every line is committed with a single write so concurrent readers never
/// observe half a line.
#[async_trait]
pub trait LogWriter: Send {
    /// Append one line. A trailing newline is added.
    async fn write_line(&mut self, line: &str) -> Result<()>;

    /// Flush and close. Dropping the writer without calling this still
    /// closes the log, but skips the final sync.
    async fn finish(self: Box<Self>) -> Result<()>;
}

/// Storage backend for logs.
#[async_trait]
pub trait LogSink: Send + Sync {
    /// Create or truncate the log and return its writer.
    async fn open_writer(&self, key: &LogKey) -> Result<Box<dyn LogWriter>>;

    /// Stream the lines committed so far.
    ///
    /// Fails with [`crate::Error::NotFound`] if the log was never written.
    async fn open_reader(&self, key: &LogKey) -> Result<LineStream>;
}
