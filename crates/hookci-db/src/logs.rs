//! File-backed log sink.
//!
//! Logs live at `<root>/<project id>/builds/<build id>` and
//! `<root>/<project id>/deploys/<deploy id>`, one line per output line.

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use hookci_core::{Error, LineStream, LogKey, LogSink, LogWriter, Result};
use std::path::{Path, PathBuf};
use tokio::fs::{self, File};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::debug;

/// Stores each log as a plain text file under `root`.
#[derive(Debug, Clone)]
pub struct FileLogSink {
    root: PathBuf,
}

impl FileLogSink {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Location of the log for `key`.
    pub fn path_for(&self, key: &LogKey) -> PathBuf {
        self.root
            .join(key.project_id.as_str())
            .join(key.kind.dir_name())
            .join(key.entity_id.as_str())
    }
}

struct FileLogWriter {
    file: File,
}

#[async_trait]
impl LogWriter for FileLogWriter {
    async fn write_line(&mut self, line: &str) -> Result<()> {
        let mut buf = Vec::with_capacity(line.len() + 1);
        buf.extend_from_slice(line.as_bytes());
        buf.push(b'\n');
        self.file.write_all(&buf).await?;
        Ok(())
    }

    async fn finish(mut self: Box<Self>) -> Result<()> {
        self.file.flush().await?;
        self.file.sync_data().await?;
        Ok(())
    }
}

#[async_trait]
impl LogSink for FileLogSink {
    async fn open_writer(&self, key: &LogKey) -> Result<Box<dyn LogWriter>> {
        let path = self.path_for(key);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        let file = File::create(&path).await?;
        debug!(path = %path.display(), "Opened log for writing");
        Ok(Box::new(FileLogWriter { file }))
    }

    async fn open_reader(&self, key: &LogKey) -> Result<LineStream> {
        let path = self.path_for(key);
        let file = match File::open(&path).await {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(Error::NotFound(format!(
                    "{} log {}",
                    key.kind.dir_name().trim_end_matches('s'),
                    key.entity_id
                )));
            }
            Err(e) => return Err(e.into()),
        };

        let reader = BufReader::new(file);
        let lines = stream::unfold(Some(reader), |state| async move {
            let mut reader = state?;
            let mut buf = Vec::new();
            match reader.read_until(b'\n', &mut buf).await {
                Ok(0) => None,
                // A line still being written has no newline yet.
                Ok(_) if buf.last() != Some(&b'\n') => None,
                Ok(_) => {
                    buf.pop();
                    if buf.last() == Some(&b'\r') {
                        buf.pop();
                    }
                    let line = String::from_utf8_lossy(&buf).into_owned();
                    Some((Ok(line), Some(reader)))
                }
                Err(e) => Some((Err(Error::from(e)), None)),
            }
        });
        Ok(lines.boxed())
    }
}
