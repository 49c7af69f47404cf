//! Log streaming endpoints.
//!
//! Logs are returned as `text/plain`, one output line per line, streamed
//! from the sink as it is read.

use axum::Router;
use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::header;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use futures::StreamExt;
use hookci_core::{LineStream, build_id, project_id};

use crate::AppState;
use crate::error::ApiError;
use crate::state::parse_id;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/build/logs/{id}", get(build_log))
        .route("/build/logs/{org}/{name}/{commit}", get(build_log_for_commit))
        .route("/deploy/logs/{id}", get(deploy_log))
}

fn plain_text(lines: LineStream) -> Response {
    let body = Body::from_stream(lines.map(|line| line.map(|l| format!("{}\n", l))));
    ([(header::CONTENT_TYPE, "text/plain; charset=utf-8")], body).into_response()
}

async fn build_log(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Response, ApiError> {
    let id = parse_id(&id)?;
    let lines = state.logs.stream_build_log(&id).await?;
    Ok(plain_text(lines))
}

/// Look the build up by repository and commit instead of by id.
async fn build_log_for_commit(
    State(state): State<AppState>,
    Path((org, name, commit)): Path<(String, String, String)>,
) -> Result<Response, ApiError> {
    let id = build_id(&project_id(&org, &name), &commit);
    let lines = state.logs.stream_build_log(&id).await?;
    Ok(plain_text(lines))
}

async fn deploy_log(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Response, ApiError> {
    let id = parse_id(&id)?;
    let lines = state.logs.stream_deploy_log(&id).await?;
    Ok(plain_text(lines))
}
