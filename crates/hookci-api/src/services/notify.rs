//! Outbound webhook notifications for completed builds.

use hookci_core::{Error, Event, Listener, Result};
use serde::Serialize;
use std::time::Duration;
use tracing::{debug, warn};

const RETRY_DELAY: Duration = Duration::from_secs(2);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Notification delivery errors.
#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Endpoint rejected notification: {0}")]
    Rejected(u16),
}

/// JSON body posted to every configured URL.
#[derive(Debug, Clone, Serialize)]
pub struct Notification {
    /// One-line summary suitable for chat webhooks.
    pub text: String,
    #[serde(flatten)]
    pub event: Event,
}

impl Notification {
    pub fn new(event: &Event) -> Self {
        let text = match event {
            Event::BuildCompleted(e) => format!(
                "Build {} ({} on {}) {}",
                e.build.id.short(),
                e.build.short_sha(),
                e.build.branch,
                if e.succeeded { "succeeded" } else { "failed" }
            ),
            Event::DeployCompleted(e) => format!(
                "Deploy {} {}",
                e.deploy.id.short(),
                if e.succeeded { "succeeded" } else { "failed" }
            ),
        };
        Self {
            text,
            event: event.clone(),
        }
    }
}

/// Posts a [`Notification`] to each URL. Delivery runs on its own task, so
/// a slow endpoint never holds up the bus.
pub struct WebhookNotifier {
    client: reqwest::Client,
    urls: Vec<String>,
    attempts: u32,
    retry_delay: Duration,
}

impl WebhookNotifier {
    pub fn new(urls: Vec<String>, attempts: u32) -> Self {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .unwrap_or_default();
        Self {
            client,
            urls,
            attempts: attempts.max(1),
            retry_delay: RETRY_DELAY,
        }
    }

    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }
}

impl Listener for WebhookNotifier {
    fn name(&self) -> &str {
        "webhook"
    }

    fn on_event(&self, event: &Event) -> Result<()> {
        if self.urls.is_empty() {
            return Ok(());
        }
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| Error::Transport(format!("no runtime for delivery: {}", e)))?;
        let notification = Notification::new(event);

        for url in &self.urls {
            let client = self.client.clone();
            let url = url.clone();
            let notification = notification.clone();
            let attempts = self.attempts;
            let delay = self.retry_delay;
            runtime.spawn(async move {
                if let Err(e) = deliver(&client, &url, &notification, attempts, delay).await {
                    warn!(url = %url, error = %e, "Notification not delivered");
                }
            });
        }
        Ok(())
    }
}

/// POST `notification`, retrying up to `attempts` times in total.
pub async fn deliver(
    client: &reqwest::Client,
    url: &str,
    notification: &Notification,
    attempts: u32,
    delay: Duration,
) -> std::result::Result<(), NotifyError> {
    let mut last_error = NotifyError::Transport("no attempts made".to_string());
    for attempt in 1..=attempts.max(1) {
        match post_once(client, url, notification).await {
            Ok(()) => {
                debug!(url = %url, attempt, "Notification delivered");
                return Ok(());
            }
            Err(e) => {
                debug!(url = %url, attempt, error = %e, "Notification attempt failed");
                last_error = e;
            }
        }
        if attempt < attempts {
            tokio::time::sleep(delay).await;
        }
    }
    Err(last_error)
}

async fn post_once(
    client: &reqwest::Client,
    url: &str,
    notification: &Notification,
) -> std::result::Result<(), NotifyError> {
    let response = client
        .post(url)
        .json(notification)
        .send()
        .await
        .map_err(|e| NotifyError::Transport(e.to_string()))?;
    let status = response.status();
    if !status.is_success() {
        return Err(NotifyError::Rejected(status.as_u16()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::Router;
    use axum::http::StatusCode;
    use axum::routing::post;
    use hookci_core::{Build, BuildCompletedEvent, Project};
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn event(succeeded: bool) -> Event {
        let project = Project::new("acme", "widget", "https://x/acme/widget");
        BuildCompletedEvent {
            build: Build::new(&project.id, "abcdef0123456789", "main"),
            succeeded,
        }
        .into()
    }

    /// Serve a receiver that fails the first `failures` requests.
    async fn receiver(failures: usize) -> (String, Arc<AtomicUsize>) {
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        let app = Router::new().route(
            "/hook",
            post(move || {
                let counter = counter.clone();
                async move {
                    if counter.fetch_add(1, Ordering::SeqCst) < failures {
                        StatusCode::SERVICE_UNAVAILABLE
                    } else {
                        StatusCode::OK
                    }
                }
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        (format!("http://{}/hook", addr), hits)
    }

    #[test]
    fn test_notification_body() {
        let body = serde_json::to_value(Notification::new(&event(false))).unwrap();
        assert_eq!(body["type"], "build_completed");
        assert_eq!(body["succeeded"], false);
        let text = body["text"].as_str().unwrap();
        assert!(text.contains("abcdef0"));
        assert!(text.ends_with("failed"));
    }

    #[tokio::test]
    async fn test_deliver_retries_until_success() {
        let (url, hits) = receiver(2).await;
        let client = reqwest::Client::new();
        let result = deliver(
            &client,
            &url,
            &Notification::new(&event(true)),
            3,
            Duration::from_millis(10),
        )
        .await;
        assert!(result.is_ok());
        assert_eq!(hits.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_deliver_gives_up_after_attempts() {
        let (url, hits) = receiver(10).await;
        let client = reqwest::Client::new();
        let result = deliver(
            &client,
            &url,
            &Notification::new(&event(true)),
            2,
            Duration::from_millis(10),
        )
        .await;
        assert!(matches!(result, Err(NotifyError::Rejected(503))));
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_is_transport_error() {
        let client = reqwest::Client::new();
        let result = deliver(
            &client,
            "http://127.0.0.1:9/unreachable",
            &Notification::new(&event(true)),
            1,
            Duration::ZERO,
        )
        .await;
        assert!(matches!(result, Err(NotifyError::Transport(_))));
    }

    #[tokio::test]
    async fn test_listener_returns_immediately() {
        let notifier = WebhookNotifier::new(vec!["http://127.0.0.1:9/x".to_string()], 1)
            .with_retry_delay(Duration::ZERO);
        assert!(notifier.on_event(&event(true)).is_ok());
    }

    #[test]
    fn test_listener_without_runtime_reports_transport_error() {
        let notifier = WebhookNotifier::new(vec!["http://127.0.0.1:9/x".to_string()], 1);
        assert!(matches!(
            notifier.on_event(&event(true)),
            Err(Error::Transport(_))
        ));
    }
}
