//! Built-in listener that reports completed builds to the process log.

use hookci_core::{Event, Listener, LogKey, Result};
use hookci_db::FileLogSink;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;
use tracing::{info, warn};

const DEFAULT_TAIL_LINES: usize = 20;

/// Only the end of a log is read when echoing its tail.
const TAIL_WINDOW_BYTES: u64 = 64 * 1024;

/// Logs every completion, followed by the last lines of its log.
pub struct TracingListener {
    logs: Option<FileLogSink>,
    tail_lines: usize,
}

impl TracingListener {
    /// Report outcomes only.
    pub fn new() -> Self {
        Self {
            logs: None,
            tail_lines: DEFAULT_TAIL_LINES,
        }
    }

    /// Report outcomes and echo the tail of each build log.
    pub fn with_logs(logs: FileLogSink) -> Self {
        Self {
            logs: Some(logs),
            tail_lines: DEFAULT_TAIL_LINES,
        }
    }

    pub fn tail_lines(mut self, lines: usize) -> Self {
        self.tail_lines = lines;
        self
    }

    fn tail(&self, key: &LogKey) -> Option<Vec<String>> {
        let path = self.logs.as_ref()?.path_for(key);
        let content = read_tail(&path, TAIL_WINDOW_BYTES).ok()?;
        Some(last_lines(&content, self.tail_lines))
    }
}

/// Read at most the last `window` bytes of a file. A line cut by the start
/// of the window is dropped.
fn read_tail(path: &Path, window: u64) -> std::io::Result<String> {
    let mut file = File::open(path)?;
    let start = file.metadata()?.len().saturating_sub(window);
    file.seek(SeekFrom::Start(start))?;

    let mut buf = Vec::new();
    file.take(window).read_to_end(&mut buf)?;
    let text = String::from_utf8_lossy(&buf);
    if start == 0 {
        return Ok(text.into_owned());
    }
    Ok(match text.find('\n') {
        Some(i) => text[i + 1..].to_string(),
        None => String::new(),
    })
}

impl Default for TracingListener {
    fn default() -> Self {
        Self::new()
    }
}

fn last_lines(content: &str, n: usize) -> Vec<String> {
    let lines: Vec<&str> = content.lines().collect();
    let start = lines.len().saturating_sub(n);
    lines[start..].iter().map(|l| l.to_string()).collect()
}

impl Listener for TracingListener {
    fn name(&self) -> &str {
        "tracing"
    }

    fn on_event(&self, event: &Event) -> Result<()> {
        let key = match event {
            Event::BuildCompleted(e) => {
                if e.succeeded {
                    info!(
                        build_id = %e.build.id,
                        project_id = %e.build.project_id,
                        commit = %e.build.short_sha(),
                        branch = %e.build.branch,
                        "Build succeeded"
                    );
                } else {
                    warn!(
                        build_id = %e.build.id,
                        project_id = %e.build.project_id,
                        commit = %e.build.short_sha(),
                        branch = %e.build.branch,
                        "Build failed"
                    );
                }
                LogKey::for_build(&e.build)
            }
            Event::DeployCompleted(e) => {
                info!(
                    deploy_id = %e.deploy.id,
                    build_id = %e.deploy.build_id,
                    succeeded = e.succeeded,
                    "Deploy completed"
                );
                LogKey::for_deploy(&e.deploy)
            }
        };

        if let Some(tail) = self.tail(&key) {
            for line in tail {
                info!(entity_id = %key.entity_id, "| {}", line);
            }
        }
        Ok(())
    }
}
