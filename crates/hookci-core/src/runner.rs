//! Build runner trait and outcome types.
//!
//! A runner clones one commit into a throwaway workspace, runs the build
//! steps there and writes their combined output to a [`LogWriter`].

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::id::EntityId;
use crate::log::LogWriter;
use crate::{Build, Project, Result};

/// Everything a runner needs to build one commit.
#[derive(Debug, Clone)]
pub struct BuildJob {
    pub build_id: EntityId,
    pub org: String,
    pub name: String,
    pub url: String,
    pub branch: String,
    pub commit_id: String,
    /// Project secrets, available to step interpolation.
    pub secrets: HashMap<String, String>,
}

impl BuildJob {
    pub fn new(project: &Project, build: &Build) -> Self {
        Self {
            build_id: build.id.clone(),
            org: project.org.clone(),
            name: project.name.clone(),
            url: project.url.clone(),
            branch: build.branch.clone(),
            commit_id: build.commit_id.clone(),
            secrets: project.secrets.clone(),
        }
    }
}

/// How a build ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum BuildOutcome {
    Success,
    /// A step exited non-zero, was killed by a signal (`exit_code` is `None`)
    /// or could not be started.
    Failure {
        step: String,
        exit_code: Option<i32>,
    },
    /// A step exceeded the per-step time limit and was killed.
    TimedOut { step: String },
}

impl BuildOutcome {
    pub fn succeeded(&self) -> bool {
        matches!(self, BuildOutcome::Success)
    }

    pub fn exit_code(&self) -> Option<i32> {
        match self {
            BuildOutcome::Success => Some(0),
            BuildOutcome::Failure { exit_code, .. } => *exit_code,
            BuildOutcome::TimedOut { .. } => None,
        }
    }
}

impl std::fmt::Display for BuildOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BuildOutcome::Success => write!(f, "success"),
            BuildOutcome::Failure {
                step,
                exit_code: Some(code),
            } => write!(f, "step '{}' failed with exit code {}", step, code),
            BuildOutcome::Failure {
                step,
                exit_code: None,
            } => write!(f, "step '{}' failed without an exit code", step),
            BuildOutcome::TimedOut { step } => write!(f, "step '{}' timed out", step),
        }
    }
}

/// Executes builds.
#[async_trait]
pub trait BuildRunner: Send + Sync {
    /// Name of this runner.
    fn name(&self) -> &'static str;

    /// Run the job, writing all output to `log`.
    ///
    /// Step failures come back as a [`BuildOutcome`]. An `Err` means the log
    /// could not be written or the runner itself broke.
    async fn run(&self, job: &BuildJob, log: &mut dyn LogWriter) -> Result<BuildOutcome>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outcome_display_and_exit_code() {
        let failure = BuildOutcome::Failure {
            step: "build".to_string(),
            exit_code: Some(2),
        };
        assert!(!failure.succeeded());
        assert_eq!(failure.exit_code(), Some(2));
        assert_eq!(failure.to_string(), "step 'build' failed with exit code 2");

        assert!(BuildOutcome::Success.succeeded());
        assert_eq!(
            BuildOutcome::TimedOut {
                step: "clone".to_string()
            }
            .exit_code(),
            None
        );
    }

    #[test]
    fn test_job_from_records() {
        let mut project = Project::new("acme", "widget", "https://x/acme/widget");
        project
            .secrets
            .insert("TOKEN".to_string(), "t0k".to_string());
        let build = Build::new(&project.id, "c1", "main");
        let job = BuildJob::new(&project, &build);
        assert_eq!(job.build_id, build.id);
        assert_eq!(job.url, "https://x/acme/widget");
        assert_eq!(job.secrets["TOKEN"], "t0k");
    }
}
