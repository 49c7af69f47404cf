//! Webhook endpoints for Git providers.

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use hmac::{Hmac, Mac};
use hookci_core::BuildRequest;
use serde_json::json;
use sha2::Sha256;
use tracing::{info, warn};

use crate::AppState;
use crate::error::ApiError;

pub fn router() -> Router<AppState> {
    Router::new().route("/github", post(github_webhook))
}

/// Handle GitHub webhook events. Pushes are dispatched; everything else is
/// acknowledged and dropped.
async fn github_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ApiError> {
    let event_type = headers
        .get("X-GitHub-Event")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("unknown");
    let delivery = headers
        .get("X-GitHub-Delivery")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("-");

    if let Some(secret) = state.github_secret.as_deref() {
        let signature = headers
            .get("X-Hub-Signature-256")
            .and_then(|v| v.to_str().ok());
        if !verify_github_signature(secret, &body, signature) {
            warn!(event = %event_type, delivery = %delivery, "Invalid webhook signature");
            return Err(ApiError::Unauthorized("invalid signature".to_string()));
        }
    }

    let payload: serde_json::Value = serde_json::from_slice(&body)
        .map_err(|e| ApiError::BadRequest(format!("Invalid JSON: {}", e)))?;

    info!(
        event = %event_type,
        delivery = %delivery,
        repo = ?payload.pointer("/repository/full_name").and_then(|v| v.as_str()),
        "Received GitHub webhook"
    );

    match event_type {
        "push" => {
            // Branch deletions carry no commit to build.
            if payload.get("deleted").and_then(|v| v.as_bool()) == Some(true) {
                info!(delivery = %delivery, "Ignoring branch deletion");
                return Ok(ignored(event_type));
            }
            let request = BuildRequest::from_github_push(&payload)?;
            let ack = state.dispatcher.dispatch_build(request).await?;
            Ok((StatusCode::ACCEPTED, Json(ack)).into_response())
        }
        "ping" => {
            info!("Ping event received - webhook is configured correctly");
            Ok(ignored(event_type))
        }
        _ => {
            info!(event = %event_type, "Unhandled event type");
            Ok(ignored(event_type))
        }
    }
}

fn ignored(event_type: &str) -> Response {
    (
        StatusCode::ACCEPTED,
        Json(json!({ "status": "ignored", "event": event_type })),
    )
        .into_response()
}

/// Check an `X-Hub-Signature-256` header (`sha256=<hex hmac>`) against the body.
pub fn verify_github_signature(secret: &str, body: &[u8], signature: Option<&str>) -> bool {
    let Some(signature) = signature else {
        return false;
    };

    let Some(sig_hex) = signature.strip_prefix("sha256=") else {
        return false;
    };

    let Ok(sig_bytes) = hex::decode(sig_hex) else {
        return false;
    };

    let Ok(mut mac) = Hmac::<Sha256>::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(body);

    mac.verify_slice(&sig_bytes).is_ok()
}
