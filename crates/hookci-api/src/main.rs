//! hookci API Server

use clap::Parser;
use hookci_api::services::WebhookNotifier;
use hookci_api::{AppState, routes};
use hookci_config::load_system_config;
use hookci_core::EventKind;
use hookci_db::{EntityStore, FileLogSink, MemoryEntityStore, PgEntityStore, create_pool, run_migrations};
use hookci_executor::ProcessRunner;
use hookci_scheduler::{Dispatcher, EventBus, TracingListener, WorkerPool};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "hookci-server", about = "Webhook-driven build relay", version)]
struct Args {
    /// Path to hookci.kdl; built-in defaults are used when omitted
    #[arg(short, long, env = "HOOKCI_CONFIG")]
    config: Option<PathBuf>,

    /// Emit logs as JSON
    #[arg(long, env = "HOOKCI_LOG_JSON")]
    log_json: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Initialize tracing
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if args.log_json {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    let config = load_system_config(args.config.as_deref())?;
    info!(
        config = ?args.config,
        steps = config.steps.len(),
        pool_size = config.workers.pool_size,
        "Configuration loaded"
    );

    let store: Arc<dyn EntityStore> = match &config.storage.database_url {
        Some(database_url) => {
            info!("Connecting to database...");
            let pool = create_pool(database_url).await?;
            run_migrations(&pool).await?;
            info!("Database connected");
            Arc::new(PgEntityStore::new(pool))
        }
        None => {
            info!("No database configured, keeping records in memory");
            Arc::new(MemoryEntityStore::new())
        }
    };

    let log_sink = FileLogSink::new(&config.storage.log_root);
    info!(log_root = %config.storage.log_root.display(), "Writing build logs");

    let bus = Arc::new(EventBus::new());
    let tracing_listener = Arc::new(TracingListener::with_logs(log_sink.clone()));
    bus.subscribe(EventKind::BuildCompleted, tracing_listener.clone());
    bus.subscribe(EventKind::DeployCompleted, tracing_listener);
    if !config.notify.webhooks.is_empty() {
        let notifier = Arc::new(WebhookNotifier::new(
            config.notify.webhooks.clone(),
            config.notify.attempts,
        ));
        bus.subscribe(EventKind::BuildCompleted, notifier.clone());
        bus.subscribe(EventKind::DeployCompleted, notifier);
    }

    let dispatcher = Arc::new(Dispatcher::new(
        store,
        Arc::new(log_sink),
        Arc::new(ProcessRunner::from_config(&config)),
        bus,
        WorkerPool::new(config.workers.pool_size),
    ));

    // Create app state
    let state = AppState::new(dispatcher.clone(), config.server.github_secret.clone());

    // Build router
    let app = routes::router(state)
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        );

    // Start server
    info!("Starting server on {}", config.server.listen);
    let listener = TcpListener::bind(&config.server.listen).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutting down, waiting for running builds");
        })
        .await?;

    dispatcher.shutdown().await;
    Ok(())
}
