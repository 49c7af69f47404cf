//! Entity store trait.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use hookci_core::{Build, Deploy, EntityId, Project, build_id, deploy_id, project_id};
use std::collections::HashMap;

use crate::DbResult;

/// Position in a creation-time ordered listing. Listings return records
/// strictly after the cursor, ordered by `(created_at, id)`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct Cursor {
    pub created_at: DateTime<Utc>,
    pub id: EntityId,
}

/// A record that can be listed in creation order.
pub trait Timestamped {
    fn cursor(&self) -> Cursor;
}

impl Timestamped for Project {
    fn cursor(&self) -> Cursor {
        Cursor {
            created_at: self.created_at,
            id: self.id.clone(),
        }
    }
}

impl Timestamped for Build {
    fn cursor(&self) -> Cursor {
        Cursor {
            created_at: self.created_at,
            id: self.id.clone(),
        }
    }
}

impl Timestamped for Deploy {
    fn cursor(&self) -> Cursor {
        Cursor {
            created_at: self.created_at,
            id: self.id.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BuildFilter {
    All,
    Project(EntityId),
}

impl BuildFilter {
    pub fn matches(&self, build: &Build) -> bool {
        match self {
            BuildFilter::All => true,
            BuildFilter::Project(id) => &build.project_id == id,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeployFilter {
    All,
    Project(EntityId),
    Build(EntityId),
}

impl DeployFilter {
    pub fn matches(&self, deploy: &Deploy) -> bool {
        match self {
            DeployFilter::All => true,
            DeployFilter::Project(id) => &deploy.project_id == id,
            DeployFilter::Build(id) => &deploy.build_id == id,
        }
    }
}

/// A deploy must belong to the same project as its build.
pub(crate) fn check_deploy_project(deploy: &Deploy, build: &Build) -> DbResult<()> {
    if deploy.project_id != build.project_id {
        return Err(crate::DbError::InvalidRecord(format!(
            "build {} does not belong to project {}",
            build.id, deploy.project_id
        )));
    }
    Ok(())
}

/// Durable storage for projects, builds and deploys.
///
/// `create_*` is an atomic create-if-absent: a second create for an id that
/// already exists fails with [`crate::DbError::Duplicate`] and leaves the
/// stored record untouched.
#[async_trait]
pub trait EntityStore: Send + Sync {
    async fn create_project(&self, project: Project) -> DbResult<Project>;
    async fn find_project(&self, id: &EntityId) -> DbResult<Option<Project>>;
    async fn update_project_secrets(
        &self,
        id: &EntityId,
        secrets: HashMap<String, String>,
    ) -> DbResult<Project>;
    async fn list_projects(&self, after: Option<&Cursor>, limit: usize) -> DbResult<Vec<Project>>;

    async fn create_build(&self, build: Build) -> DbResult<Build>;
    async fn find_build(&self, id: &EntityId) -> DbResult<Option<Build>>;
    async fn list_builds(
        &self,
        filter: &BuildFilter,
        after: Option<&Cursor>,
        limit: usize,
    ) -> DbResult<Vec<Build>>;

    async fn create_deploy(&self, deploy: Deploy) -> DbResult<Deploy>;
    async fn find_deploy(&self, id: &EntityId) -> DbResult<Option<Deploy>>;
    async fn list_deploys(
        &self,
        filter: &DeployFilter,
        after: Option<&Cursor>,
        limit: usize,
    ) -> DbResult<Vec<Deploy>>;

    async fn get_project(&self, id: &EntityId) -> DbResult<Project> {
        self.find_project(id)
            .await?
            .ok_or_else(|| crate::DbError::NotFound(format!("project {}", id)))
    }

    async fn get_build(&self, id: &EntityId) -> DbResult<Build> {
        self.find_build(id)
            .await?
            .ok_or_else(|| crate::DbError::NotFound(format!("build {}", id)))
    }

    async fn get_deploy(&self, id: &EntityId) -> DbResult<Deploy> {
        self.find_deploy(id)
            .await?
            .ok_or_else(|| crate::DbError::NotFound(format!("deploy {}", id)))
    }

    /// Lookup through the (org, name) key.
    async fn find_project_by_name(&self, org: &str, name: &str) -> DbResult<Option<Project>> {
        self.find_project(&project_id(org, name)).await
    }

    /// Lookup through the (project, commit) key.
    async fn find_build_for_commit(
        &self,
        project_id: &EntityId,
        commit_id: &str,
    ) -> DbResult<Option<Build>> {
        self.find_build(&build_id(project_id, commit_id)).await
    }

    /// Lookup through the (project, build) key.
    async fn find_deploy_for_build(
        &self,
        project_id: &EntityId,
        build_id: &EntityId,
    ) -> DbResult<Option<Deploy>> {
        self.find_deploy(&deploy_id(project_id, build_id)).await
    }
}
