//! Build intake and build record endpoints.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use futures::TryStreamExt;
use hookci_core::{Acknowledgement, Build, BuildRequest, Deploy, Project};
use hookci_db::build_deploys;
use serde::Serialize;
use tracing::info;

use crate::AppState;
use crate::error::ApiError;
use crate::state::parse_id;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/build", post(trigger_build))
        .route("/builds/{id}", get(get_build))
        .route("/builds/{id}/retrigger", post(retrigger_build))
        .route("/builds/{id}/deploys", get(list_deploys).post(record_deploy))
}

/// Accept a normalized build request.
async fn trigger_build(
    State(state): State<AppState>,
    Json(request): Json<BuildRequest>,
) -> Result<(StatusCode, Json<Acknowledgement>), ApiError> {
    info!(
        project = %format!("{}/{}", request.org, request.name),
        commit = %request.commit_id,
        "Build requested"
    );
    let ack = state.dispatcher.dispatch_build(request).await?;
    Ok((StatusCode::ACCEPTED, Json(ack)))
}

#[derive(Debug, Serialize)]
struct BuildResponse {
    #[serde(flatten)]
    build: Build,
    project: Project,
    running: bool,
}

async fn get_build(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<BuildResponse>, ApiError> {
    let id = parse_id(&id)?;
    let build = state.store().get_build(&id).await?;
    let project = state.store().get_project(&build.project_id).await?;
    let running = state.dispatcher.is_running(&build.id);
    Ok(Json(BuildResponse {
        build,
        project,
        running,
    }))
}

async fn retrigger_build(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<(StatusCode, Json<Acknowledgement>), ApiError> {
    let id = parse_id(&id)?;
    let ack = state.dispatcher.retrigger(&id).await?;
    Ok((StatusCode::ACCEPTED, Json(ack)))
}

async fn list_deploys(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Vec<Deploy>>, ApiError> {
    let id = parse_id(&id)?;
    state.store().get_build(&id).await?;
    let deploys: Vec<Deploy> = build_deploys(state.store().clone(), id)
        .try_collect()
        .await?;
    Ok(Json(deploys))
}

async fn record_deploy(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<(StatusCode, Json<Deploy>), ApiError> {
    let id = parse_id(&id)?;
    let build = state.store().get_build(&id).await?;
    let deploy = state
        .dispatcher
        .record_deploy(&build.project_id, &build.id)
        .await?;
    Ok((StatusCode::CREATED, Json(deploy)))
}
