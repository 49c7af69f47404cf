//! Local build execution command.

use anyhow::{Context, Result};
use async_trait::async_trait;
use hookci_config::load_system_config;
use hookci_core::{Build, BuildJob, BuildRunner, LogWriter, Project};
use hookci_executor::ProcessRunner;
use std::io::Write;
use std::path::Path;

/// Prints build output as it is produced.
struct StdoutWriter;

#[async_trait]
impl LogWriter for StdoutWriter {
    async fn write_line(&mut self, line: &str) -> hookci_core::Result<()> {
        let mut out = std::io::stdout().lock();
        writeln!(out, "{}", line)?;
        Ok(())
    }

    async fn finish(self: Box<Self>) -> hookci_core::Result<()> {
        std::io::stdout().flush()?;
        Ok(())
    }
}

pub struct LocalRun<'a> {
    pub config: Option<&'a Path>,
    pub org: &'a str,
    pub name: &'a str,
    pub url: &'a str,
    pub branch: &'a str,
    pub commit: &'a str,
}

/// Run the configured build steps for one commit on this machine, without
/// a server or store.
pub async fn run_local(run: LocalRun<'_>) -> Result<()> {
    let config = load_system_config(run.config).context("Failed to load configuration")?;
    let runner = ProcessRunner::from_config(&config);

    let project = Project::new(run.org, run.name, run.url);
    let build = Build::new(&project.id, run.commit, run.branch);
    let job = BuildJob::new(&project, &build);

    println!("Building {} at {} ({})", project.full_name(), build.short_sha(), build.branch);
    println!("Build id: {}", build.id);
    println!("Steps: {}", config.steps.len());

    let mut writer = Box::new(StdoutWriter);
    let outcome = runner.run(&job, writer.as_mut()).await?;
    writer.finish().await?;

    println!("Result: {}", outcome);
    if !outcome.succeeded() {
        std::process::exit(outcome.exit_code().filter(|c| *c != 0).unwrap_or(1));
    }
    Ok(())
}
