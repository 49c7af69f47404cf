//! Variable interpolation for build step commands.
//!
//! Supports variables like:
//! - `${url}` - Clone URL of the project
//! - `${branch}` - Branch being built
//! - `${commit}` - Full commit id
//! - `${short_sha}` - First 7 characters of the commit id
//! - `${workspace}` - Ephemeral directory the build runs in
//! - `${checkout}` - Directory the repository is cloned into
//! - `${project.org}`, `${project.name}`, `${project.full_name}`
//! - `${build.id}` - Build id
//! - `${env.VAR_NAME}` - Environment variable of the relay process
//! - `${secrets.KEY}` - Project secret
//!
//! Unknown variables are left untouched.

use hookci_core::BuildJob;
use regex::Regex;
use std::collections::HashMap;
use std::path::Path;
use std::sync::LazyLock;

/// Values available to step interpolation.
#[derive(Debug, Clone, Default)]
pub struct VariableContext {
    vars: HashMap<String, String>,
    secrets: HashMap<String, String>,
}

// Regex for matching ${...} variables
static VAR_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\$\{([a-zA-Z_][a-zA-Z0-9_]*(?:\.[a-zA-Z_][a-zA-Z0-9_]*)?)\}").unwrap()
});

impl VariableContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a plain variable.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.vars.insert(name.into(), value.into());
    }

    fn resolve(&self, name: &str) -> Option<String> {
        if let Some(key) = name.strip_prefix("secrets.") {
            return self.secrets.get(key).cloned();
        }
        if let Some(key) = name.strip_prefix("env.") {
            return std::env::var(key).ok();
        }
        self.vars.get(name).cloned()
    }

    /// Replace every known `${name}` in `input`.
    pub fn interpolate(&self, input: &str) -> String {
        VAR_REGEX
            .replace_all(input, |caps: &regex::Captures| {
                let name = &caps[1];
                self.resolve(name).unwrap_or_else(|| caps[0].to_string())
            })
            .into_owned()
    }

    pub fn interpolate_vec(&self, inputs: &[String]) -> Vec<String> {
        inputs.iter().map(|s| self.interpolate(s)).collect()
    }

    /// Replace secret values in a line of output with `***`.
    pub fn mask_secrets(&self, line: &str) -> String {
        let mut masked = line.to_string();
        for value in self.secrets.values().filter(|v| !v.is_empty()) {
            masked = masked.replace(value.as_str(), "***");
        }
        masked
    }

    /// Names of secret variables referenced in `input`.
    pub fn find_secrets_in_string(&self, input: &str) -> Vec<String> {
        VAR_REGEX
            .captures_iter(input)
            .map(|caps| caps[1].to_string())
            .filter(|name| name.starts_with("secrets."))
            .collect()
    }
}

/// Builder for [`VariableContext`].
#[derive(Debug, Default)]
pub struct VariableContextBuilder {
    ctx: VariableContext,
}

impl VariableContextBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Populate job-derived variables and secrets.
    pub fn with_job(mut self, job: &BuildJob) -> Self {
        let short_sha: String = job.commit_id.chars().take(7).collect();
        self.ctx.set("url", &job.url);
        self.ctx.set("branch", &job.branch);
        self.ctx.set("commit", &job.commit_id);
        self.ctx.set("short_sha", short_sha);
        self.ctx.set("project.org", &job.org);
        self.ctx.set("project.name", &job.name);
        self.ctx
            .set("project.full_name", format!("{}/{}", job.org, job.name));
        self.ctx.set("build.id", job.build_id.as_str());
        self.ctx.secrets.extend(job.secrets.clone());
        self
    }

    pub fn with_workspace(mut self, workspace: &Path, checkout: &Path) -> Self {
        self.ctx
            .set("workspace", workspace.to_string_lossy().into_owned());
        self.ctx
            .set("checkout", checkout.to_string_lossy().into_owned());
        self
    }

    pub fn with_var(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.ctx.set(name, value);
        self
    }

    pub fn with_secret(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.ctx.secrets.insert(key.into(), value.into());
        self
    }

    pub fn build(self) -> VariableContext {
        self.ctx
    }
}
