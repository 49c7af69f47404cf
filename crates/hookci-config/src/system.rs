//! System configuration parsing.
//!
//! ```kdl
//! server {
//!     listen "0.0.0.0:3000"
//!     github-secret "hunter2"
//! }
//! storage {
//!     log-root "/var/lib/hookci/logs"
//!     work-dir "/var/tmp/hookci"
//!     database-url "postgres://hookci@localhost/hookci"
//! }
//! workers {
//!     pool-size 4
//!     step-timeout 3600
//! }
//! steps {
//!     step "clone" dir="workspace" {
//!         run "git" "clone" "--branch" "${branch}" "${url}" "${checkout}"
//!     }
//!     step "build" {
//!         run "make" "build"
//!     }
//! }
//! notify {
//!     webhook "https://chat.example.com/hooks/ci"
//!     attempts 3
//! }
//! ```

use crate::{ConfigError, ConfigResult};
use kdl::{KdlDocument, KdlNode};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

/// System-wide configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemConfig {
    pub server: ServerConfig,
    pub storage: StorageConfig,
    pub workers: WorkerConfig,
    /// Build procedure, run in order. The first failing step ends the build.
    pub steps: Vec<StepConfig>,
    pub notify: NotifyConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub listen: String,
    /// Shared secret for `X-Hub-Signature-256` verification.
    pub github_secret: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub log_root: PathBuf,
    pub work_dir: PathBuf,
    /// PostgreSQL URL. Records are kept in memory when unset.
    pub database_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Maximum number of builds running at once.
    pub pool_size: usize,
    pub step_timeout: Duration,
}

/// Directory a step runs in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepDir {
    /// The ephemeral workspace root.
    Workspace,
    /// The cloned repository inside the workspace.
    Checkout,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepConfig {
    pub name: String,
    /// Program and arguments; each element is interpolated separately.
    pub command: Vec<String>,
    pub dir: StepDir,
}

impl StepConfig {
    pub fn new(name: &str, dir: StepDir, command: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            command: command.iter().map(|s| s.to_string()).collect(),
            dir,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NotifyConfig {
    /// URLs receiving a JSON POST for every completed build.
    pub webhooks: Vec<String>,
    /// Delivery attempts per URL.
    pub attempts: u32,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: "0.0.0.0:3000".to_string(),
            github_secret: None,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            log_root: std::env::temp_dir().join("hookci").join("logs"),
            work_dir: std::env::temp_dir().join("hookci").join("work"),
            database_url: None,
        }
    }
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            pool_size: 4,
            step_timeout: Duration::from_secs(3600),
        }
    }
}

/// Clone the branch, pin the pushed commit, then `make build`.
pub fn default_steps() -> Vec<StepConfig> {
    vec![
        StepConfig::new(
            "clone",
            StepDir::Workspace,
            &[
                "git",
                "clone",
                "--branch",
                "${branch}",
                "${url}",
                "${checkout}",
            ],
        ),
        StepConfig::new(
            "checkout",
            StepDir::Checkout,
            &["git", "checkout", "--detach", "${commit}"],
        ),
        StepConfig::new("build", StepDir::Checkout, &["make", "build"]),
    ]
}

impl Default for SystemConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            storage: StorageConfig::default(),
            workers: WorkerConfig::default(),
            steps: default_steps(),
            notify: NotifyConfig {
                webhooks: Vec::new(),
                attempts: 3,
            },
        }
    }
}

impl SystemConfig {
    /// Apply `HOOKCI_*` and `DATABASE_URL` environment overrides.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(listen) = lookup("HOOKCI_LISTEN") {
            self.server.listen = listen;
        }
        if let Some(secret) = lookup("HOOKCI_GITHUB_SECRET") {
            self.server.github_secret = Some(secret);
        }
        if let Some(root) = lookup("HOOKCI_LOG_ROOT") {
            self.storage.log_root = PathBuf::from(root);
        }
        if let Some(dir) = lookup("HOOKCI_WORK_DIR") {
            self.storage.work_dir = PathBuf::from(dir);
        }
        if let Some(url) = lookup("DATABASE_URL") {
            self.storage.database_url = Some(url);
        }
    }
}

/// Parse system configuration from KDL text. Missing sections keep defaults.
pub fn parse_system_config(kdl: &str) -> ConfigResult<SystemConfig> {
    let doc: KdlDocument = kdl.parse()?;
    let mut config = SystemConfig::default();

    for node in doc.nodes() {
        match node.name().value() {
            "server" => parse_server(node, &mut config.server)?,
            "storage" => parse_storage(node, &mut config.storage)?,
            "workers" => parse_workers(node, &mut config.workers)?,
            "steps" => config.steps = parse_steps(node)?,
            "notify" => parse_notify(node, &mut config.notify)?,
            other => debug!(node = %other, "Ignoring unknown config node"),
        }
    }

    Ok(config)
}

/// Load configuration from `path` (or defaults when `None`), then apply
/// environment overrides.
pub fn load_system_config(path: Option<&Path>) -> ConfigResult<SystemConfig> {
    let mut config = match path {
        Some(path) => parse_system_config(&std::fs::read_to_string(path)?)?,
        None => SystemConfig::default(),
    };
    config.apply_env_overrides();
    Ok(config)
}

fn parse_server(node: &KdlNode, server: &mut ServerConfig) -> ConfigResult<()> {
    for child in children(node) {
        match child.name().value() {
            "listen" => server.listen = required_string(child, "server.listen")?,
            "github-secret" => {
                server.github_secret = Some(required_string(child, "server.github-secret")?)
            }
            _ => {}
        }
    }
    Ok(())
}

fn parse_storage(node: &KdlNode, storage: &mut StorageConfig) -> ConfigResult<()> {
    for child in children(node) {
        match child.name().value() {
            "log-root" => storage.log_root = required_string(child, "storage.log-root")?.into(),
            "work-dir" => storage.work_dir = required_string(child, "storage.work-dir")?.into(),
            "database-url" => {
                storage.database_url = Some(required_string(child, "storage.database-url")?)
            }
            _ => {}
        }
    }
    Ok(())
}

fn parse_workers(node: &KdlNode, workers: &mut WorkerConfig) -> ConfigResult<()> {
    for child in children(node) {
        match child.name().value() {
            "pool-size" => {
                let size = positive_integer(child, "workers.pool-size")?;
                workers.pool_size = size as usize;
            }
            "step-timeout" => {
                let secs = positive_integer(child, "workers.step-timeout")?;
                workers.step_timeout = Duration::from_secs(secs);
            }
            _ => {}
        }
    }
    Ok(())
}

fn parse_steps(node: &KdlNode) -> ConfigResult<Vec<StepConfig>> {
    let mut steps: Vec<StepConfig> = Vec::new();

    for child in children(node).filter(|c| c.name().value() == "step") {
        let name = get_first_string_arg(child)
            .ok_or_else(|| ConfigError::MissingField("step name".to_string()))?;

        if steps.iter().any(|s| s.name == name) {
            return Err(ConfigError::Duplicate(format!("step '{}'", name)));
        }

        let dir = match get_string_prop(child, "dir").as_deref() {
            None | Some("checkout") => StepDir::Checkout,
            Some("workspace") => StepDir::Workspace,
            Some(other) => {
                return Err(ConfigError::InvalidValue {
                    field: format!("step '{}' dir", name),
                    message: format!("expected 'workspace' or 'checkout', got '{}'", other),
                });
            }
        };

        let command = children(child)
            .find(|c| c.name().value() == "run")
            .map(get_all_string_args)
            .unwrap_or_default();

        if command.is_empty() {
            return Err(ConfigError::MissingField(format!(
                "run command for step '{}'",
                name
            )));
        }

        steps.push(StepConfig { name, command, dir });
    }

    if steps.is_empty() {
        return Err(ConfigError::MissingField("at least one step".to_string()));
    }

    Ok(steps)
}

fn parse_notify(node: &KdlNode, notify: &mut NotifyConfig) -> ConfigResult<()> {
    for child in children(node) {
        match child.name().value() {
            "webhook" => notify
                .webhooks
                .push(required_string(child, "notify.webhook")?),
            "attempts" => notify.attempts = positive_integer(child, "notify.attempts")? as u32,
            _ => {}
        }
    }
    Ok(())
}

// Helper functions for extracting values from KDL nodes

fn children(node: &KdlNode) -> impl Iterator<Item = &KdlNode> {
    node.children()
        .map(|doc| doc.nodes().iter())
        .into_iter()
        .flatten()
}

fn get_first_string_arg(node: &KdlNode) -> Option<String> {
    node.entries()
        .iter()
        .find(|e| e.name().is_none())
        .and_then(|e| e.value().as_string())
        .map(|s| s.to_string())
}

fn get_all_string_args(node: &KdlNode) -> Vec<String> {
    node.entries()
        .iter()
        .filter(|e| e.name().is_none())
        .filter_map(|e| e.value().as_string())
        .map(|s| s.to_string())
        .collect()
}

fn get_string_prop(node: &KdlNode, name: &str) -> Option<String> {
    node.get(name)
        .and_then(|v| v.as_string())
        .map(|s| s.to_string())
}

fn required_string(node: &KdlNode, field: &str) -> ConfigResult<String> {
    get_first_string_arg(node).ok_or_else(|| ConfigError::MissingField(field.to_string()))
}

fn positive_integer(node: &KdlNode, field: &str) -> ConfigResult<u64> {
    let value = node
        .entries()
        .iter()
        .find(|e| e.name().is_none())
        .and_then(|e| e.value().as_integer())
        .ok_or_else(|| ConfigError::MissingField(field.to_string()))?;

    if value <= 0 || value > u32::MAX as i128 {
        return Err(ConfigError::InvalidValue {
            field: field.to_string(),
            message: format!("expected a positive integer, got {}", value),
        });
    }
    Ok(value as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_config() {
        let kdl = r#"
            server {
                listen "127.0.0.1:8080"
                github-secret "hunter2"
            }
            storage {
                log-root "/srv/logs"
                work-dir "/srv/work"
            }
            workers {
                pool-size 8
                step-timeout 600
            }
            steps {
                step "clone" dir="workspace" {
                    run "git" "clone" "${url}" "${checkout}"
                }
                step "test" {
                    run "cargo" "test"
                }
            }
            notify {
                webhook "https://chat.example.com/a"
                webhook "https://chat.example.com/b"
                attempts 5
            }
        "#;

        let config = parse_system_config(kdl).unwrap();
        assert_eq!(config.server.listen, "127.0.0.1:8080");
        assert_eq!(config.server.github_secret.as_deref(), Some("hunter2"));
        assert_eq!(config.storage.log_root, PathBuf::from("/srv/logs"));
        assert_eq!(config.workers.pool_size, 8);
        assert_eq!(config.workers.step_timeout, Duration::from_secs(600));
        assert_eq!(config.steps.len(), 2);
        assert_eq!(config.steps[0].dir, StepDir::Workspace);
        assert_eq!(config.steps[1].command, vec!["cargo", "test"]);
        assert_eq!(config.steps[1].dir, StepDir::Checkout);
        assert_eq!(config.notify.webhooks.len(), 2);
        assert_eq!(config.notify.attempts, 5);
    }

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = parse_system_config("").unwrap();
        assert_eq!(config.workers.pool_size, 4);
        assert_eq!(config.steps, default_steps());
        assert!(config.storage.database_url.is_none());
    }

    #[test]
    fn test_duplicate_step_rejected() {
        let kdl = r#"
            steps {
                step "build" { run "make" }
                step "build" { run "make" "again" }
            }
        "#;
        assert!(matches!(
            parse_system_config(kdl),
            Err(ConfigError::Duplicate(_))
        ));
    }

    #[test]
    fn test_step_without_command_rejected() {
        let kdl = r#"
            steps {
                step "build"
            }
        "#;
        assert!(matches!(
            parse_system_config(kdl),
            Err(ConfigError::MissingField(_))
        ));
    }

    #[test]
    fn test_invalid_step_dir_rejected() {
        let kdl = r#"
            steps {
                step "build" dir="home" { run "make" }
            }
        "#;
        assert!(matches!(
            parse_system_config(kdl),
            Err(ConfigError::InvalidValue { .. })
        ));
    }

    #[test]
    fn test_zero_pool_size_rejected() {
        let kdl = "workers { pool-size 0 }";
        assert!(matches!(
            parse_system_config(kdl),
            Err(ConfigError::InvalidValue { .. })
        ));
    }

    #[test]
    fn test_env_overrides() {
        let mut config = SystemConfig::default();
        config.apply_overrides(|key| match key {
            "DATABASE_URL" => Some("postgres://db/hookci".to_string()),
            "HOOKCI_LOG_ROOT" => Some("/data/logs".to_string()),
            _ => None,
        });
        assert_eq!(
            config.storage.database_url.as_deref(),
            Some("postgres://db/hookci")
        );
        assert_eq!(config.storage.log_root, PathBuf::from("/data/logs"));
        assert_eq!(config.server.listen, "0.0.0.0:3000");
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hookci.kdl");
        std::fs::write(&path, "workers { pool-size 2 }").unwrap();
        let config = load_system_config(Some(&path)).unwrap();
        assert_eq!(config.workers.pool_size, 2);
    }

    #[test]
    fn test_parse_error() {
        assert!(matches!(
            parse_system_config("server {"),
            Err(ConfigError::Parse(_))
        ));
    }
}
