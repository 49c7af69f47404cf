//! API routes.

pub mod builds;
pub mod health;
pub mod logs;
pub mod projects;
pub mod webhooks;

use crate::AppState;
use axum::Router;

/// Build the main API router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .merge(builds::router())
        .merge(logs::router())
        .merge(projects::router())
        .nest("/webhooks", webhooks::router())
        .merge(health::router())
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use axum::body::{Body, to_bytes};
    use axum::http::{Request, StatusCode};
    use hmac::{Hmac, Mac};
    use hookci_core::{
        BuildJob, BuildOutcome, BuildRunner, Event, EventKind, Listener, LogWriter, Result,
        build_id, project_id,
    };
    use hookci_db::{FileLogSink, MemoryEntityStore};
    use hookci_scheduler::{Dispatcher, EventBus, WorkerPool};
    use serde_json::{Value, json};
    use sha2::Sha256;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::sync::mpsc;
    use tower::ServiceExt;

    struct EchoRunner;

    #[async_trait]
    impl BuildRunner for EchoRunner {
        fn name(&self) -> &'static str {
            "echo"
        }

        async fn run(&self, job: &BuildJob, log: &mut dyn LogWriter) -> Result<BuildOutcome> {
            log.write_line(&format!("clone {} {}", job.url, job.branch))
                .await?;
            log.write_line("build ok").await?;
            Ok(BuildOutcome::Success)
        }
    }

    struct Completions(mpsc::UnboundedSender<Event>);

    impl Listener for Completions {
        fn name(&self) -> &str {
            "completions"
        }

        fn on_event(&self, event: &Event) -> Result<()> {
            let _ = self.0.send(event.clone());
            Ok(())
        }
    }

    struct TestApp {
        router: Router,
        completions: mpsc::UnboundedReceiver<Event>,
        _dir: tempfile::TempDir,
    }

    fn app(github_secret: Option<&str>) -> TestApp {
        let dir = tempfile::tempdir().unwrap();
        let bus = Arc::new(EventBus::new());
        let (tx, completions) = mpsc::unbounded_channel();
        bus.subscribe(EventKind::BuildCompleted, Arc::new(Completions(tx)));
        let dispatcher = Dispatcher::new(
            Arc::new(MemoryEntityStore::new()),
            Arc::new(FileLogSink::new(dir.path())),
            Arc::new(EchoRunner),
            bus,
            WorkerPool::new(2),
        );
        let state = AppState::new(Arc::new(dispatcher), github_secret.map(String::from));
        TestApp {
            router: router(state),
            completions,
            _dir: dir,
        }
    }

    async fn send(router: &Router, request: Request<Body>) -> (StatusCode, Vec<u8>) {
        let response = router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, body.to_vec())
    }

    async fn get(router: &Router, uri: &str) -> (StatusCode, Vec<u8>) {
        send(router, Request::get(uri).body(Body::empty()).unwrap()).await
    }

    fn json_body(bytes: &[u8]) -> Value {
        serde_json::from_slice(bytes).unwrap()
    }

    fn build_request() -> Value {
        json!({
            "org": "acme",
            "name": "widget",
            "url": "https://x/acme/widget",
            "commit_id": "c1",
            "branch": "main"
        })
    }

    fn post_json(uri: &str, body: &Value) -> Request<Body> {
        Request::post(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn push_payload() -> Value {
        json!({
            "ref": "refs/heads/develop",
            "repository": {
                "full_name": "owenstranathan/kupy-test",
                "url": "https://github.com/owenstranathan/kupy-test"
            },
            "head_commit": { "id": "a29u9ufcuoi3u9r0aucisdjlk" }
        })
    }

    async fn wait_for_completion(app: &mut TestApp) -> Event {
        tokio::time::timeout(Duration::from_secs(5), app.completions.recv())
            .await
            .unwrap()
            .unwrap()
    }

    #[tokio::test]
    async fn test_health() {
        let app = app(None);
        let (status, body) = get(&app.router, "/health").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json_body(&body)["status"], "ok");

        let (status, _) = get(&app.router, "/health/ready").await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_build_then_read_records_and_log() {
        let mut app = app(None);

        let (status, body) = send(&app.router, post_json("/build", &build_request())).await;
        assert_eq!(status, StatusCode::ACCEPTED);
        let ack = json_body(&body);
        assert_eq!(ack["status"], "scheduled");
        let pid = project_id("acme", "widget");
        let bid = build_id(&pid, "c1");
        assert_eq!(ack["project_id"], pid.to_string());
        assert_eq!(ack["build_id"], bid.to_string());

        assert!(wait_for_completion(&mut app).await.succeeded());

        let (status, body) = get(&app.router, &format!("/build/logs/{}", bid)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            String::from_utf8(body).unwrap(),
            "clone https://x/acme/widget main\nbuild ok\n"
        );

        let (status, body) = get(&app.router, "/build/logs/acme/widget/c1").await;
        assert_eq!(status, StatusCode::OK);
        assert!(String::from_utf8(body).unwrap().ends_with("build ok\n"));

        let (status, body) = get(&app.router, &format!("/projects/{}", pid)).await;
        assert_eq!(status, StatusCode::OK);
        let project = json_body(&body);
        assert_eq!(project["org"], "acme");
        assert!(project.get("secrets").is_none());

        let (status, body) = get(&app.router, &format!("/projects/{}/builds", pid)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json_body(&body).as_array().unwrap().len(), 1);

        let (status, body) = get(&app.router, &format!("/builds/{}", bid)).await;
        assert_eq!(status, StatusCode::OK);
        let build = json_body(&body);
        assert_eq!(build["commit_id"], "c1");
        assert_eq!(build["project"]["name"], "widget");
    }

    #[tokio::test]
    async fn test_duplicate_build_request() {
        let mut app = app(None);
        send(&app.router, post_json("/build", &build_request())).await;
        wait_for_completion(&mut app).await;

        let (status, body) = send(&app.router, post_json("/build", &build_request())).await;
        assert_eq!(status, StatusCode::ACCEPTED);
        assert_eq!(json_body(&body)["status"], "duplicate");
    }

    #[tokio::test]
    async fn test_invalid_build_request() {
        let app = app(None);
        let mut request = build_request();
        request["org"] = json!("");
        let (status, body) = send(&app.router, post_json("/build", &request)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(json_body(&body)["error"].as_str().unwrap().contains("org"));
    }

    #[tokio::test]
    async fn test_unknown_and_malformed_ids() {
        let app = app(None);
        let unknown = build_id(&project_id("nobody", "nothing"), "c1");

        let (status, _) = get(&app.router, &format!("/build/logs/{}", unknown)).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        let (status, _) = get(&app.router, &format!("/deploy/logs/{}", unknown)).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        let (status, _) = get(&app.router, "/builds/not-an-id").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_github_push_dispatches_build() {
        let mut app = app(None);
        let request = Request::post("/webhooks/github")
            .header("X-GitHub-Event", "push")
            .body(Body::from(push_payload().to_string()))
            .unwrap();

        let (status, body) = send(&app.router, request).await;
        assert_eq!(status, StatusCode::ACCEPTED);
        let pid = project_id("owenstranathan", "kupy-test");
        assert_eq!(json_body(&body)["project_id"], pid.to_string());

        let event = wait_for_completion(&mut app).await;
        assert_eq!(event.entity_id(), &build_id(&pid, "a29u9ufcuoi3u9r0aucisdjlk"));
    }

    #[tokio::test]
    async fn test_github_non_push_is_ignored() {
        let mut app = app(None);
        let request = Request::post("/webhooks/github")
            .header("X-GitHub-Event", "ping")
            .body(Body::from(r#"{"zen":"Design for failure."}"#))
            .unwrap();
        let (status, body) = send(&app.router, request).await;
        assert_eq!(status, StatusCode::ACCEPTED);
        assert_eq!(json_body(&body)["status"], "ignored");
        assert!(app.completions.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_github_signature_required_when_configured() {
        let app = app(Some("hunter2"));
        let body = push_payload().to_string();

        let unsigned = Request::post("/webhooks/github")
            .header("X-GitHub-Event", "push")
            .body(Body::from(body.clone()))
            .unwrap();
        let (status, _) = send(&app.router, unsigned).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let mut mac = Hmac::<Sha256>::new_from_slice(b"hunter2").unwrap();
        mac.update(body.as_bytes());
        let signature = format!("sha256={}", hex::encode(mac.finalize().into_bytes()));
        let signed = Request::post("/webhooks/github")
            .header("X-GitHub-Event", "push")
            .header("X-Hub-Signature-256", signature)
            .body(Body::from(body))
            .unwrap();
        let (status, _) = send(&app.router, signed).await;
        assert_eq!(status, StatusCode::ACCEPTED);
    }

    #[tokio::test]
    async fn test_retrigger_and_deploy_record() {
        let mut app = app(None);
        let (_, body) = send(&app.router, post_json("/build", &build_request())).await;
        let bid = json_body(&body)["build_id"].as_str().unwrap().to_string();
        wait_for_completion(&mut app).await;

        let (status, _) = send(
            &app.router,
            Request::post(format!("/builds/{}/retrigger", bid))
                .body(Body::empty())
                .unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::ACCEPTED);
        wait_for_completion(&mut app).await;

        let (status, body) = send(
            &app.router,
            Request::post(format!("/builds/{}/deploys", bid))
                .body(Body::empty())
                .unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        let deploy_id = json_body(&body)["id"].as_str().unwrap().to_string();

        let (status, body) = get(&app.router, &format!("/builds/{}/deploys", bid)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json_body(&body)[0]["id"], deploy_id);

        // Deploys have records but no log until something runs them.
        let (status, _) = get(&app.router, &format!("/deploy/logs/{}", deploy_id)).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_update_secrets() {
        let mut app = app(None);
        send(&app.router, post_json("/build", &build_request())).await;
        wait_for_completion(&mut app).await;
        let pid = project_id("acme", "widget");

        let request = Request::put(format!("/projects/{}/secrets", pid))
            .header("content-type", "application/json")
            .body(Body::from(json!({ "secrets": { "SECRET_TOKEN": "12345" } }).to_string()))
            .unwrap();
        let (status, body) = send(&app.router, request).await;
        assert_eq!(status, StatusCode::OK);
        assert!(!String::from_utf8(body).unwrap().contains("12345"));
    }
}
