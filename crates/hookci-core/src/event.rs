//! Completion events and listeners.

use serde::{Deserialize, Serialize};

use crate::id::EntityId;
use crate::{Build, Deploy, Result};

/// Closed set of event kinds the bus routes on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    BuildCompleted,
    DeployCompleted,
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EventKind::BuildCompleted => write!(f, "build_completed"),
            EventKind::DeployCompleted => write!(f, "deploy_completed"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildCompletedEvent {
    pub build: Build,
    pub succeeded: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeployCompletedEvent {
    pub deploy: Deploy,
    pub succeeded: bool,
}

/// An event published on the bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    BuildCompleted(BuildCompletedEvent),
    DeployCompleted(DeployCompletedEvent),
}

impl Event {
    pub fn kind(&self) -> EventKind {
        match self {
            Event::BuildCompleted(_) => EventKind::BuildCompleted,
            Event::DeployCompleted(_) => EventKind::DeployCompleted,
        }
    }

    /// Id of the build or deploy the event is about.
    pub fn entity_id(&self) -> &EntityId {
        match self {
            Event::BuildCompleted(e) => &e.build.id,
            Event::DeployCompleted(e) => &e.deploy.id,
        }
    }

    pub fn project_id(&self) -> &EntityId {
        match self {
            Event::BuildCompleted(e) => &e.build.project_id,
            Event::DeployCompleted(e) => &e.deploy.project_id,
        }
    }

    pub fn succeeded(&self) -> bool {
        match self {
            Event::BuildCompleted(e) => e.succeeded,
            Event::DeployCompleted(e) => e.succeeded,
        }
    }
}

impl From<BuildCompletedEvent> for Event {
    fn from(event: BuildCompletedEvent) -> Self {
        Event::BuildCompleted(event)
    }
}

impl From<DeployCompletedEvent> for Event {
    fn from(event: DeployCompletedEvent) -> Self {
        Event::DeployCompleted(event)
    }
}

/// Reacts to published events.
///
/// Called synchronously on the publishing task, so implementations that do
/// I/O should hand the work off and return.
pub trait Listener: Send + Sync {
    /// Name used in log lines when the listener fails.
    fn name(&self) -> &str;

    fn on_event(&self, event: &Event) -> Result<()>;
}
