//! Local subprocess build runner.
//!
//! Every build gets a fresh directory under the configured work dir. The
//! configured steps run there one after another; stdout and stderr of each
//! step are written to the build log line by line as they are produced.

use async_trait::async_trait;
use hookci_config::{StepConfig, StepDir, SystemConfig, VariableContext, VariableContextBuilder};
use hookci_core::{BuildJob, BuildOutcome, BuildRunner, Error, LogWriter, Result};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tracing::{debug, info, warn};

/// Directory name of the checkout inside a workspace.
const CHECKOUT_DIR: &str = "checkout";

/// Runs build steps as local processes.
pub struct ProcessRunner {
    steps: Vec<StepConfig>,
    work_dir: PathBuf,
    step_timeout: Duration,
}

enum StepResult {
    Exited(Option<i32>),
    NotStarted,
    TimedOut,
}

impl ProcessRunner {
    pub fn new(steps: Vec<StepConfig>, work_dir: impl Into<PathBuf>, step_timeout: Duration) -> Self {
        Self {
            steps,
            work_dir: work_dir.into(),
            step_timeout,
        }
    }

    pub fn from_config(config: &SystemConfig) -> Self {
        Self::new(
            config.steps.clone(),
            config.storage.work_dir.clone(),
            config.workers.step_timeout,
        )
    }

    async fn run_steps(
        &self,
        job: &BuildJob,
        workspace: &Path,
        log: &mut dyn LogWriter,
    ) -> Result<BuildOutcome> {
        let checkout = workspace.join(CHECKOUT_DIR);
        let ctx = VariableContextBuilder::new()
            .with_job(job)
            .with_workspace(workspace, &checkout)
            .build();

        for step in &self.steps {
            let cwd = match step.dir {
                StepDir::Workspace => workspace,
                StepDir::Checkout => checkout.as_path(),
            };
            debug!(build_id = %job.build_id, step = %step.name, "Running step");

            match self.run_step(job, step, &ctx, cwd, log).await? {
                StepResult::Exited(Some(0)) => {}
                StepResult::Exited(exit_code) => {
                    return Ok(BuildOutcome::Failure {
                        step: step.name.clone(),
                        exit_code,
                    });
                }
                StepResult::NotStarted => {
                    return Ok(BuildOutcome::Failure {
                        step: step.name.clone(),
                        exit_code: None,
                    });
                }
                StepResult::TimedOut => {
                    return Ok(BuildOutcome::TimedOut {
                        step: step.name.clone(),
                    });
                }
            }
        }
        Ok(BuildOutcome::Success)
    }

    async fn run_step(
        &self,
        job: &BuildJob,
        step: &StepConfig,
        ctx: &VariableContext,
        cwd: &Path,
        log: &mut dyn LogWriter,
    ) -> Result<StepResult> {
        let argv = ctx.interpolate_vec(&step.command);
        let Some((program, args)) = argv.split_first() else {
            log.write_line(&format!("step '{}' has no command", step.name))
                .await?;
            return Ok(StepResult::NotStarted);
        };
        log.write_line(&ctx.mask_secrets(&format!("==> {}: {}", step.name, argv.join(" "))))
            .await?;

        let spawned = Command::new(program)
            .args(args)
            .current_dir(cwd)
            .envs(&job.secrets)
            .env("HOOKCI_BUILD_ID", job.build_id.as_str())
            .env("HOOKCI_COMMIT", &job.commit_id)
            .env("HOOKCI_BRANCH", &job.branch)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn();
        let mut child = match spawned {
            Ok(child) => child,
            Err(e) => {
                warn!(build_id = %job.build_id, step = %step.name, error = %e, "Failed to start step");
                log.write_line(&format!("failed to start '{}': {}", program, e))
                    .await?;
                return Ok(StepResult::NotStarted);
            }
        };

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::Internal("stdout was not captured".to_string()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| Error::Internal("stderr was not captured".to_string()))?;
        let mut out = OutputLines::new(stdout);
        let mut err = OutputLines::new(stderr);

        let deadline = tokio::time::sleep(self.step_timeout);
        tokio::pin!(deadline);

        while out.open || err.open {
            tokio::select! {
                line = out.next(), if out.open => {
                    if let Some(line) = line {
                        log.write_line(&ctx.mask_secrets(&line)).await?;
                    }
                }
                line = err.next(), if err.open => {
                    if let Some(line) = line {
                        log.write_line(&ctx.mask_secrets(&line)).await?;
                    }
                }
                _ = &mut deadline => {
                    return self.time_out(job, step, &mut child, log).await;
                }
            }
        }

        let status = tokio::select! {
            status = child.wait() => status?,
            _ = &mut deadline => {
                return self.time_out(job, step, &mut child, log).await;
            }
        };

        if !status.success() {
            log.write_line(&format!("step '{}' exited with {}", step.name, status))
                .await?;
        }
        Ok(StepResult::Exited(status.code()))
    }

    async fn time_out(
        &self,
        job: &BuildJob,
        step: &StepConfig,
        child: &mut tokio::process::Child,
        log: &mut dyn LogWriter,
    ) -> Result<StepResult> {
        warn!(
            build_id = %job.build_id,
            step = %step.name,
            timeout_secs = self.step_timeout.as_secs(),
            "Step timed out, killing"
        );
        if let Err(e) = child.kill().await {
            warn!(build_id = %job.build_id, error = %e, "Failed to kill step");
        }
        log.write_line(&format!(
            "step '{}' timed out after {}s",
            step.name,
            self.step_timeout.as_secs()
        ))
        .await?;
        Ok(StepResult::TimedOut)
    }
}

/// Line reader over one output pipe. Invalid UTF-8 is replaced rather than
/// ending the stream, so a chatty step can never fill its pipe and stall.
struct OutputLines<R> {
    inner: tokio::io::Split<BufReader<R>>,
    open: bool,
}

impl<R: AsyncRead + Unpin> OutputLines<R> {
    fn new(reader: R) -> Self {
        Self {
            inner: BufReader::new(reader).split(b'\n'),
            open: true,
        }
    }

    async fn next(&mut self) -> Option<String> {
        match self.inner.next_segment().await {
            Ok(Some(mut bytes)) => {
                if bytes.last() == Some(&b'\r') {
                    bytes.pop();
                }
                Some(String::from_utf8_lossy(&bytes).into_owned())
            }
            Ok(None) => {
                self.open = false;
                None
            }
            Err(e) => {
                debug!(error = %e, "Output pipe closed with error");
                self.open = false;
                None
            }
        }
    }
}

#[async_trait]
impl BuildRunner for ProcessRunner {
    fn name(&self) -> &'static str {
        "process"
    }

    async fn run(&self, job: &BuildJob, log: &mut dyn LogWriter) -> Result<BuildOutcome> {
        tokio::fs::create_dir_all(&self.work_dir)
            .await
            .map_err(|e| Error::Internal(format!("work dir {}: {}", self.work_dir.display(), e)))?;
        let workspace = tempfile::Builder::new()
            .prefix("build-")
            .tempdir_in(&self.work_dir)
            .map_err(|e| Error::Internal(format!("workspace: {}", e)))?;

        info!(
            build_id = %job.build_id,
            commit = %job.commit_id,
            workspace = %workspace.path().display(),
            "Starting build"
        );

        let result = self.run_steps(job, workspace.path(), log).await;

        if let Err(e) = workspace.close() {
            warn!(build_id = %job.build_id, error = %e, "Failed to remove workspace");
        }

        match &result {
            Ok(outcome) => info!(build_id = %job.build_id, %outcome, "Build finished"),
            Err(e) => warn!(build_id = %job.build_id, error = %e, "Build aborted"),
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hookci_core::{Build, Project};

    #[derive(Default)]
    struct VecWriter {
        lines: Vec<String>,
    }

    #[async_trait]
    impl LogWriter for VecWriter {
        async fn write_line(&mut self, line: &str) -> Result<()> {
            self.lines.push(line.to_string());
            Ok(())
        }

        async fn finish(self: Box<Self>) -> Result<()> {
            Ok(())
        }
    }

    struct BrokenWriter;

    #[async_trait]
    impl LogWriter for BrokenWriter {
        async fn write_line(&mut self, _line: &str) -> Result<()> {
            Err(Error::Sink(std::io::Error::other("disk full")))
        }

        async fn finish(self: Box<Self>) -> Result<()> {
            Ok(())
        }
    }

    fn job() -> BuildJob {
        let mut project = Project::new(
            "owenstranathan",
            "kupy-test",
            "https://github.com/owenstranathan/kupy-test",
        );
        project
            .secrets
            .insert("SECRET_TOKEN".to_string(), "12345".to_string());
        let build = Build::new(&project.id, "a29u9ufcuoi3u9r0aucisdjlk", "develop");
        BuildJob::new(&project, &build)
    }

    fn sh(name: &str, dir: StepDir, script: &str) -> StepConfig {
        StepConfig::new(name, dir, &["sh", "-c", script])
    }

    fn runner(work: &Path, steps: Vec<StepConfig>) -> ProcessRunner {
        ProcessRunner::new(steps, work, Duration::from_secs(30))
    }

    fn workspace_entries(work: &Path) -> usize {
        std::fs::read_dir(work).map(|d| d.count()).unwrap_or(0)
    }

    #[tokio::test]
    async fn test_success_captures_output_in_order() {
        let work = tempfile::tempdir().unwrap();
        let runner = runner(
            work.path(),
            vec![
                sh("clone", StepDir::Workspace, "mkdir checkout && echo cloned ${branch}"),
                sh("build", StepDir::Checkout, "echo one; echo two >&2; sleep 0.1; echo three"),
            ],
        );
        let mut log = VecWriter::default();

        let outcome = runner.run(&job(), &mut log).await.unwrap();

        assert_eq!(outcome, BuildOutcome::Success);
        assert!(log.lines.contains(&"cloned develop".to_string()));
        let one = log.lines.iter().position(|l| l == "one").unwrap();
        let two = log.lines.iter().position(|l| l == "two").unwrap();
        let three = log.lines.iter().position(|l| l == "three").unwrap();
        assert!(one < three);
        assert!(two < three);
        assert_eq!(workspace_entries(work.path()), 0);
    }

    #[tokio::test]
    async fn test_non_zero_exit_is_failure() {
        let work = tempfile::tempdir().unwrap();
        let runner = runner(
            work.path(),
            vec![
                sh("clone", StepDir::Workspace, "mkdir checkout"),
                sh("build", StepDir::Checkout, "echo compiling; exit 2"),
                sh("after", StepDir::Checkout, "echo never"),
            ],
        );
        let mut log = VecWriter::default();

        let outcome = runner.run(&job(), &mut log).await.unwrap();

        assert_eq!(
            outcome,
            BuildOutcome::Failure {
                step: "build".to_string(),
                exit_code: Some(2)
            }
        );
        assert!(log.lines.contains(&"compiling".to_string()));
        assert!(!log.lines.contains(&"never".to_string()));
        assert_eq!(workspace_entries(work.path()), 0);
    }

    #[tokio::test]
    async fn test_missing_program_is_failure_without_exit_code() {
        let work = tempfile::tempdir().unwrap();
        let runner = runner(
            work.path(),
            vec![StepConfig::new(
                "clone",
                StepDir::Workspace,
                &["hookci-definitely-not-a-program"],
            )],
        );
        let mut log = VecWriter::default();

        let outcome = runner.run(&job(), &mut log).await.unwrap();

        assert_eq!(
            outcome,
            BuildOutcome::Failure {
                step: "clone".to_string(),
                exit_code: None
            }
        );
        assert!(log.lines.iter().any(|l| l.starts_with("failed to start")));
    }

    #[tokio::test]
    async fn test_step_timeout_kills_process() {
        let work = tempfile::tempdir().unwrap();
        let runner = ProcessRunner::new(
            vec![StepConfig::new("build", StepDir::Workspace, &["sleep", "10"])],
            work.path(),
            Duration::from_millis(200),
        );
        let mut log = VecWriter::default();

        let started = std::time::Instant::now();
        let outcome = runner.run(&job(), &mut log).await.unwrap();

        assert_eq!(
            outcome,
            BuildOutcome::TimedOut {
                step: "build".to_string()
            }
        );
        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(workspace_entries(work.path()), 0);
    }

    #[tokio::test]
    async fn test_secrets_masked_and_exported() {
        let work = tempfile::tempdir().unwrap();
        let runner = runner(
            work.path(),
            vec![
                sh("interp", StepDir::Workspace, "echo token=${secrets.SECRET_TOKEN}"),
                sh("env", StepDir::Workspace, "echo env=$SECRET_TOKEN"),
            ],
        );
        let mut log = VecWriter::default();

        let outcome = runner.run(&job(), &mut log).await.unwrap();

        assert!(outcome.succeeded());
        assert!(log.lines.contains(&"token=***".to_string()));
        assert!(log.lines.contains(&"env=***".to_string()));
        assert!(log.lines.iter().all(|l| !l.contains("12345")));
    }

    #[tokio::test]
    async fn test_sink_failure_is_error() {
        let work = tempfile::tempdir().unwrap();
        let runner = runner(work.path(), vec![sh("build", StepDir::Workspace, "echo hi")]);
        let mut log = BrokenWriter;

        let result = runner.run(&job(), &mut log).await;

        assert!(matches!(result, Err(Error::Sink(_))));
        assert_eq!(workspace_entries(work.path()), 0);
    }
}
