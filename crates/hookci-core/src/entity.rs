//! Project, Build and Deploy records.
//!
//! Constructors derive each record's id from its logical key; stores refuse
//! records whose id does not match (see [`Project::has_consistent_id`]).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::id::{self, EntityId};

/// Kind of a stored record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    Project,
    Build,
    Deploy,
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EntityKind::Project => write!(f, "project"),
            EntityKind::Build => write!(f, "build"),
            EntityKind::Deploy => write!(f, "deploy"),
        }
    }
}

/// A source repository known to the relay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Project {
    pub id: EntityId,
    pub org: String,
    pub name: String,
    /// Clone URL.
    pub url: String,
    pub created_at: DateTime<Utc>,
    /// Opaque key/value secrets handed to build steps.
    #[serde(default, skip_serializing)]
    pub secrets: HashMap<String, String>,
}

impl Project {
    pub fn new(org: impl Into<String>, name: impl Into<String>, url: impl Into<String>) -> Self {
        let org = org.into();
        let name = name.into();
        Self {
            id: id::project_id(&org, &name),
            org,
            name,
            url: url.into(),
            created_at: Utc::now(),
            secrets: HashMap::new(),
        }
    }

    /// `org/name`.
    pub fn full_name(&self) -> String {
        format!("{}/{}", self.org, self.name)
    }

    pub fn has_consistent_id(&self) -> bool {
        self.id == id::project_id(&self.org, &self.name)
    }
}

/// One commit of a project, built at most once.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Build {
    pub id: EntityId,
    pub project_id: EntityId,
    pub commit_id: String,
    pub branch: String,
    pub created_at: DateTime<Utc>,
}

impl Build {
    pub fn new(
        project_id: &EntityId,
        commit_id: impl Into<String>,
        branch: impl Into<String>,
    ) -> Self {
        let commit_id = commit_id.into();
        Self {
            id: id::build_id(project_id, &commit_id),
            project_id: project_id.clone(),
            commit_id,
            branch: branch.into(),
            created_at: Utc::now(),
        }
    }

    pub fn has_consistent_id(&self) -> bool {
        self.id == id::build_id(&self.project_id, &self.commit_id)
    }

    /// First 7 characters of the commit id.
    pub fn short_sha(&self) -> &str {
        let end = self
            .commit_id
            .char_indices()
            .nth(7)
            .map(|(i, _)| i)
            .unwrap_or(self.commit_id.len());
        &self.commit_id[..end]
    }
}

/// A deployment of a build. Only the record exists; nothing executes it yet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Deploy {
    pub id: EntityId,
    pub project_id: EntityId,
    pub build_id: EntityId,
    pub created_at: DateTime<Utc>,
}

impl Deploy {
    pub fn new(project_id: &EntityId, build_id: &EntityId) -> Self {
        Self {
            id: id::deploy_id(project_id, build_id),
            project_id: project_id.clone(),
            build_id: build_id.clone(),
            created_at: Utc::now(),
        }
    }

    pub fn has_consistent_id(&self) -> bool {
        self.id == id::deploy_id(&self.project_id, &self.build_id)
    }
}
