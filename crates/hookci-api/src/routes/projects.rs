//! Project endpoints.

use axum::extract::{Path, State};
use axum::routing::{get, put};
use axum::{Json, Router};
use futures::{StreamExt, TryStreamExt};
use hookci_core::{Build, Deploy, Project};
use hookci_db::{all_projects, project_builds, project_deploys};
use serde::Deserialize;
use std::collections::HashMap;
use tracing::info;

use crate::AppState;
use crate::error::ApiError;
use crate::state::parse_id;

/// Upper bound on records returned by one listing.
const MAX_LISTING: usize = 1000;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/projects", get(list_projects))
        .route("/projects/{id}", get(get_project))
        .route("/projects/{id}/secrets", put(update_secrets))
        .route("/projects/{id}/builds", get(list_builds))
        .route("/projects/{id}/deploys", get(list_deploys))
}

async fn list_projects(State(state): State<AppState>) -> Result<Json<Vec<Project>>, ApiError> {
    let projects: Vec<Project> = all_projects(state.store().clone())
        .take(MAX_LISTING)
        .try_collect()
        .await?;
    Ok(Json(projects))
}

async fn get_project(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Project>, ApiError> {
    let id = parse_id(&id)?;
    Ok(Json(state.store().get_project(&id).await?))
}

#[derive(Debug, Deserialize)]
struct SecretsRequest {
    secrets: HashMap<String, String>,
}

/// Replace the project's secrets. Values are never returned.
async fn update_secrets(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<SecretsRequest>,
) -> Result<Json<Project>, ApiError> {
    let id = parse_id(&id)?;
    let keys = request.secrets.len();
    let project = state
        .store()
        .update_project_secrets(&id, request.secrets)
        .await?;
    info!(project = %project.full_name(), keys, "Project secrets updated");
    Ok(Json(project))
}

async fn list_builds(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Vec<Build>>, ApiError> {
    let id = parse_id(&id)?;
    state.store().get_project(&id).await?;
    let builds: Vec<Build> = project_builds(state.store().clone(), id)
        .take(MAX_LISTING)
        .try_collect()
        .await?;
    Ok(Json(builds))
}

async fn list_deploys(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Vec<Deploy>>, ApiError> {
    let id = parse_id(&id)?;
    state.store().get_project(&id).await?;
    let deploys: Vec<Deploy> = project_deploys(state.store().clone(), id)
        .take(MAX_LISTING)
        .try_collect()
        .await?;
    Ok(Json(deploys))
}
