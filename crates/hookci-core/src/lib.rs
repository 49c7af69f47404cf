//! Core domain types and traits for the hookci build relay.
//!
//! This crate contains:
//! - Content-addressed identifiers for projects, builds and deploys
//! - Entity records (Project, Build, Deploy)
//! - Build requests and dispatch acknowledgements
//! - The build runner trait and outcome types
//! - Log sink abstractions
//! - Completion events and the listener trait

pub mod entity;
pub mod error;
pub mod event;
pub mod id;
pub mod log;
pub mod request;
pub mod runner;

pub use entity::{Build, Deploy, EntityKind, Project};
pub use error::{Error, Result};
pub use event::{BuildCompletedEvent, DeployCompletedEvent, Event, EventKind, Listener};
pub use id::{EntityId, build_id, deploy_id, project_id};
pub use log::{LineStream, LogKey, LogKind, LogSink, LogWriter};
pub use request::{Acknowledgement, BuildRequest, DispatchStatus};
pub use runner::{BuildJob, BuildOutcome, BuildRunner};
