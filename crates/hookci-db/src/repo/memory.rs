//! In-memory entity store.
//!
//! Each table is split into shards keyed by the leading byte of the id.
//! Creates take a single shard's write lock, so creation is atomic per id
//! while reads of other shards and other tables proceed concurrently.

use async_trait::async_trait;
use hookci_core::{Build, Deploy, EntityId, Project};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::collections::hash_map::Entry;

use super::store::{
    BuildFilter, Cursor, DeployFilter, EntityStore, Timestamped, check_deploy_project,
};
use crate::{DbError, DbResult};

const SHARD_COUNT: usize = 16;

struct Table<T> {
    shards: Vec<RwLock<HashMap<EntityId, T>>>,
}

impl<T: Clone + Timestamped> Table<T> {
    fn new() -> Self {
        Self {
            shards: (0..SHARD_COUNT)
                .map(|_| RwLock::new(HashMap::new()))
                .collect(),
        }
    }

    fn shard(&self, id: &EntityId) -> &RwLock<HashMap<EntityId, T>> {
        let lead = u8::from_str_radix(&id.as_str()[..2], 16).unwrap_or(0);
        &self.shards[lead as usize % SHARD_COUNT]
    }

    /// Insert unless the id is taken. Returns false on collision.
    fn insert_new(&self, id: &EntityId, value: T) -> bool {
        match self.shard(id).write().entry(id.clone()) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(value);
                true
            }
        }
    }

    fn get(&self, id: &EntityId) -> Option<T> {
        self.shard(id).read().get(id).cloned()
    }

    fn update(&self, id: &EntityId, apply: impl FnOnce(&mut T)) -> Option<T> {
        let mut shard = self.shard(id).write();
        let value = shard.get_mut(id)?;
        apply(value);
        Some(value.clone())
    }

    fn contains(&self, id: &EntityId) -> bool {
        self.shard(id).read().contains_key(id)
    }

    /// Matching records after `after`, in `(created_at, id)` order.
    fn page(
        &self,
        matches: impl Fn(&T) -> bool,
        after: Option<&Cursor>,
        limit: usize,
    ) -> Vec<T> {
        let mut rows: Vec<(Cursor, T)> = Vec::new();
        for shard in &self.shards {
            let shard = shard.read();
            rows.extend(
                shard
                    .values()
                    .filter(|v| matches(v))
                    .map(|v| (v.cursor(), v.clone()))
                    .filter(|(cursor, _)| after.is_none_or(|after| cursor > after)),
            );
        }
        rows.sort_by(|a, b| a.0.cmp(&b.0));
        rows.into_iter().take(limit).map(|(_, v)| v).collect()
    }
}

/// Entity store kept in process memory. Nothing survives a restart.
pub struct MemoryEntityStore {
    projects: Table<Project>,
    builds: Table<Build>,
    deploys: Table<Deploy>,
}

impl Default for MemoryEntityStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryEntityStore {
    pub fn new() -> Self {
        Self {
            projects: Table::new(),
            builds: Table::new(),
            deploys: Table::new(),
        }
    }
}

#[async_trait]
impl EntityStore for MemoryEntityStore {
    async fn create_project(&self, project: Project) -> DbResult<Project> {
        if !project.has_consistent_id() {
            return Err(DbError::InvalidRecord(format!(
                "project {} does not match {}",
                project.id,
                project.full_name()
            )));
        }
        if !self.projects.insert_new(&project.id, project.clone()) {
            return Err(DbError::Duplicate(format!("project {}", project.id)));
        }
        Ok(project)
    }

    async fn find_project(&self, id: &EntityId) -> DbResult<Option<Project>> {
        Ok(self.projects.get(id))
    }

    async fn update_project_secrets(
        &self,
        id: &EntityId,
        secrets: HashMap<String, String>,
    ) -> DbResult<Project> {
        self.projects
            .update(id, |project| project.secrets = secrets)
            .ok_or_else(|| DbError::NotFound(format!("project {}", id)))
    }

    async fn list_projects(&self, after: Option<&Cursor>, limit: usize) -> DbResult<Vec<Project>> {
        Ok(self.projects.page(|_| true, after, limit))
    }

    async fn create_build(&self, build: Build) -> DbResult<Build> {
        if !build.has_consistent_id() {
            return Err(DbError::InvalidRecord(format!(
                "build {} does not match {}/{}",
                build.id, build.project_id, build.commit_id
            )));
        }
        if !self.projects.contains(&build.project_id) {
            return Err(DbError::NotFound(format!("project {}", build.project_id)));
        }
        if !self.builds.insert_new(&build.id, build.clone()) {
            return Err(DbError::Duplicate(format!("build {}", build.id)));
        }
        Ok(build)
    }

    async fn find_build(&self, id: &EntityId) -> DbResult<Option<Build>> {
        Ok(self.builds.get(id))
    }

    async fn list_builds(
        &self,
        filter: &BuildFilter,
        after: Option<&Cursor>,
        limit: usize,
    ) -> DbResult<Vec<Build>> {
        Ok(self.builds.page(|b| filter.matches(b), after, limit))
    }

    async fn create_deploy(&self, deploy: Deploy) -> DbResult<Deploy> {
        if !deploy.has_consistent_id() {
            return Err(DbError::InvalidRecord(format!(
                "deploy {} does not match {}/{}",
                deploy.id, deploy.project_id, deploy.build_id
            )));
        }
        let build = self
            .builds
            .get(&deploy.build_id)
            .ok_or_else(|| DbError::NotFound(format!("build {}", deploy.build_id)))?;
        check_deploy_project(&deploy, &build)?;
        if !self.deploys.insert_new(&deploy.id, deploy.clone()) {
            return Err(DbError::Duplicate(format!("deploy {}", deploy.id)));
        }
        Ok(deploy)
    }

    async fn find_deploy(&self, id: &EntityId) -> DbResult<Option<Deploy>> {
        Ok(self.deploys.get(id))
    }

    async fn list_deploys(
        &self,
        filter: &DeployFilter,
        after: Option<&Cursor>,
        limit: usize,
    ) -> DbResult<Vec<Deploy>> {
        Ok(self.deploys.page(|d| filter.matches(d), after, limit))
    }
}
