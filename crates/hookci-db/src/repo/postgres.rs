//! PostgreSQL entity store.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use hookci_core::{Build, Deploy, EntityId, Project};
use sqlx::PgPool;
use sqlx::types::Json;
use std::collections::HashMap;

use super::store::{BuildFilter, Cursor, DeployFilter, EntityStore, check_deploy_project};
use crate::{DbError, DbResult};

const UNIQUE_VIOLATION: &str = "23505";
const FOREIGN_KEY_VIOLATION: &str = "23503";

#[derive(Debug, sqlx::FromRow)]
struct ProjectRow {
    id: String,
    org: String,
    name: String,
    url: String,
    secrets: Json<HashMap<String, String>>,
    created_at: DateTime<Utc>,
}

#[derive(Debug, sqlx::FromRow)]
struct BuildRow {
    id: String,
    project_id: String,
    commit_id: String,
    branch: String,
    created_at: DateTime<Utc>,
}

#[derive(Debug, sqlx::FromRow)]
struct DeployRow {
    id: String,
    project_id: String,
    build_id: String,
    created_at: DateTime<Utc>,
}

fn parse_id(raw: &str) -> DbResult<EntityId> {
    raw.parse()
        .map_err(|e: hookci_core::Error| DbError::InvalidRecord(e.to_string()))
}

impl TryFrom<ProjectRow> for Project {
    type Error = DbError;

    fn try_from(row: ProjectRow) -> DbResult<Self> {
        Ok(Project {
            id: parse_id(&row.id)?,
            org: row.org,
            name: row.name,
            url: row.url,
            created_at: row.created_at,
            secrets: row.secrets.0,
        })
    }
}

impl TryFrom<BuildRow> for Build {
    type Error = DbError;

    fn try_from(row: BuildRow) -> DbResult<Self> {
        Ok(Build {
            id: parse_id(&row.id)?,
            project_id: parse_id(&row.project_id)?,
            commit_id: row.commit_id,
            branch: row.branch,
            created_at: row.created_at,
        })
    }
}

impl TryFrom<DeployRow> for Deploy {
    type Error = DbError;

    fn try_from(row: DeployRow) -> DbResult<Self> {
        Ok(Deploy {
            id: parse_id(&row.id)?,
            project_id: parse_id(&row.project_id)?,
            build_id: parse_id(&row.build_id)?,
            created_at: row.created_at,
        })
    }
}

fn convert_all<R, T>(rows: Vec<R>) -> DbResult<Vec<T>>
where
    T: TryFrom<R, Error = DbError>,
{
    rows.into_iter().map(T::try_from).collect()
}

/// Map constraint violations on insert to store errors.
fn insert_error(err: sqlx::Error, what: String) -> DbError {
    if let sqlx::Error::Database(db) = &err {
        match db.code().as_deref() {
            Some(UNIQUE_VIOLATION) => return DbError::Duplicate(what),
            Some(FOREIGN_KEY_VIOLATION) => {
                return DbError::NotFound(format!("parent of {}", what));
            }
            _ => {}
        }
    }
    DbError::Database(err)
}

fn cursor_parts(after: Option<&Cursor>) -> (Option<DateTime<Utc>>, Option<String>) {
    match after {
        Some(c) => (Some(c.created_at), Some(c.id.to_string())),
        None => (None, None),
    }
}

fn limit_param(limit: usize) -> i64 {
    i64::try_from(limit).unwrap_or(i64::MAX)
}

/// PostgreSQL implementation of [`EntityStore`].
pub struct PgEntityStore {
    pool: PgPool,
}

impl PgEntityStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl EntityStore for PgEntityStore {
    async fn create_project(&self, project: Project) -> DbResult<Project> {
        if !project.has_consistent_id() {
            return Err(DbError::InvalidRecord(format!(
                "project {} does not match {}",
                project.id,
                project.full_name()
            )));
        }
        let what = format!("project {}", project.id);
        let row = sqlx::query_as::<_, ProjectRow>(
            r#"
            INSERT INTO projects (id, org, name, url, secrets, created_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (id) DO NOTHING
            RETURNING id, org, name, url, secrets, created_at
            "#,
        )
        .bind(project.id.as_str())
        .bind(&project.org)
        .bind(&project.name)
        .bind(&project.url)
        .bind(Json(&project.secrets))
        .bind(project.created_at)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| insert_error(e, what.clone()))?;

        row.ok_or(DbError::Duplicate(what))?.try_into()
    }

    async fn find_project(&self, id: &EntityId) -> DbResult<Option<Project>> {
        let row = sqlx::query_as::<_, ProjectRow>(
            r#"
            SELECT id, org, name, url, secrets, created_at
            FROM projects
            WHERE id = $1
            "#,
        )
        .bind(id.as_str())
        .fetch_optional(&self.pool)
        .await?;
        row.map(Project::try_from).transpose()
    }

    async fn update_project_secrets(
        &self,
        id: &EntityId,
        secrets: HashMap<String, String>,
    ) -> DbResult<Project> {
        let row = sqlx::query_as::<_, ProjectRow>(
            r#"
            UPDATE projects SET secrets = $2
            WHERE id = $1
            RETURNING id, org, name, url, secrets, created_at
            "#,
        )
        .bind(id.as_str())
        .bind(Json(&secrets))
        .fetch_optional(&self.pool)
        .await?;
        row.ok_or_else(|| DbError::NotFound(format!("project {}", id)))?
            .try_into()
    }

    async fn list_projects(&self, after: Option<&Cursor>, limit: usize) -> DbResult<Vec<Project>> {
        let (after_ts, after_id) = cursor_parts(after);
        let rows = sqlx::query_as::<_, ProjectRow>(
            r#"
            SELECT id, org, name, url, secrets, created_at
            FROM projects
            WHERE ($1::timestamptz IS NULL OR (created_at, id) > ($1, $2::text))
            ORDER BY created_at, id
            LIMIT $3
            "#,
        )
        .bind(after_ts)
        .bind(after_id)
        .bind(limit_param(limit))
        .fetch_all(&self.pool)
        .await?;
        convert_all(rows)
    }

    async fn create_build(&self, build: Build) -> DbResult<Build> {
        if !build.has_consistent_id() {
            return Err(DbError::InvalidRecord(format!(
                "build {} does not match {}/{}",
                build.id, build.project_id, build.commit_id
            )));
        }
        let what = format!("build {}", build.id);
        let row = sqlx::query_as::<_, BuildRow>(
            r#"
            INSERT INTO builds (id, project_id, commit_id, branch, created_at)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (id) DO NOTHING
            RETURNING id, project_id, commit_id, branch, created_at
            "#,
        )
        .bind(build.id.as_str())
        .bind(build.project_id.as_str())
        .bind(&build.commit_id)
        .bind(&build.branch)
        .bind(build.created_at)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| insert_error(e, what.clone()))?;

        row.ok_or(DbError::Duplicate(what))?.try_into()
    }

    async fn find_build(&self, id: &EntityId) -> DbResult<Option<Build>> {
        let row = sqlx::query_as::<_, BuildRow>(
            r#"
            SELECT id, project_id, commit_id, branch, created_at
            FROM builds
            WHERE id = $1
            "#,
        )
        .bind(id.as_str())
        .fetch_optional(&self.pool)
        .await?;
        row.map(Build::try_from).transpose()
    }

    async fn list_builds(
        &self,
        filter: &BuildFilter,
        after: Option<&Cursor>,
        limit: usize,
    ) -> DbResult<Vec<Build>> {
        let project = match filter {
            BuildFilter::All => None,
            BuildFilter::Project(id) => Some(id.to_string()),
        };
        let (after_ts, after_id) = cursor_parts(after);
        let rows = sqlx::query_as::<_, BuildRow>(
            r#"
            SELECT id, project_id, commit_id, branch, created_at
            FROM builds
            WHERE ($1::text IS NULL OR project_id = $1)
              AND ($2::timestamptz IS NULL OR (created_at, id) > ($2, $3::text))
            ORDER BY created_at, id
            LIMIT $4
            "#,
        )
        .bind(project)
        .bind(after_ts)
        .bind(after_id)
        .bind(limit_param(limit))
        .fetch_all(&self.pool)
        .await?;
        convert_all(rows)
    }

    async fn create_deploy(&self, deploy: Deploy) -> DbResult<Deploy> {
        if !deploy.has_consistent_id() {
            return Err(DbError::InvalidRecord(format!(
                "deploy {} does not match {}/{}",
                deploy.id, deploy.project_id, deploy.build_id
            )));
        }
        let build = self
            .find_build(&deploy.build_id)
            .await?
            .ok_or_else(|| DbError::NotFound(format!("build {}", deploy.build_id)))?;
        check_deploy_project(&deploy, &build)?;

        let what = format!("deploy {}", deploy.id);
        let row = sqlx::query_as::<_, DeployRow>(
            r#"
            INSERT INTO deploys (id, project_id, build_id, created_at)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (id) DO NOTHING
            RETURNING id, project_id, build_id, created_at
            "#,
        )
        .bind(deploy.id.as_str())
        .bind(deploy.project_id.as_str())
        .bind(deploy.build_id.as_str())
        .bind(deploy.created_at)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| insert_error(e, what.clone()))?;

        row.ok_or(DbError::Duplicate(what))?.try_into()
    }

    async fn find_deploy(&self, id: &EntityId) -> DbResult<Option<Deploy>> {
        let row = sqlx::query_as::<_, DeployRow>(
            r#"
            SELECT id, project_id, build_id, created_at
            FROM deploys
            WHERE id = $1
            "#,
        )
        .bind(id.as_str())
        .fetch_optional(&self.pool)
        .await?;
        row.map(Deploy::try_from).transpose()
    }

    async fn list_deploys(
        &self,
        filter: &DeployFilter,
        after: Option<&Cursor>,
        limit: usize,
    ) -> DbResult<Vec<Deploy>> {
        let (project, build) = match filter {
            DeployFilter::All => (None, None),
            DeployFilter::Project(id) => (Some(id.to_string()), None),
            DeployFilter::Build(id) => (None, Some(id.to_string())),
        };
        let (after_ts, after_id) = cursor_parts(after);
        let rows = sqlx::query_as::<_, DeployRow>(
            r#"
            SELECT id, project_id, build_id, created_at
            FROM deploys
            WHERE ($1::text IS NULL OR project_id = $1)
              AND ($2::text IS NULL OR build_id = $2)
              AND ($3::timestamptz IS NULL OR (created_at, id) > ($3, $4::text))
            ORDER BY created_at, id
            LIMIT $5
            "#,
        )
        .bind(project)
        .bind(build)
        .bind(after_ts)
        .bind(after_id)
        .bind(limit_param(limit))
        .fetch_all(&self.pool)
        .await?;
        convert_all(rows)
    }
}
