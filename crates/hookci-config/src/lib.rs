//! KDL configuration parsing for the hookci build relay.
//!
//! This crate handles:
//! - System configuration (hookci.kdl) with environment overrides
//! - Variable interpolation for build step commands

pub mod error;
pub mod system;
pub mod variables;

pub use error::{ConfigError, ConfigResult};
pub use system::{
    NotifyConfig, ServerConfig, StepConfig, StepDir, StorageConfig, SystemConfig, WorkerConfig,
    load_system_config, parse_system_config,
};
pub use variables::{VariableContext, VariableContextBuilder};
