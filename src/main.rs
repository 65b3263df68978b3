use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use axum::{routing::get, Router};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod config;
mod db;
mod error;
mod queue;
mod routes;
mod services;
mod worker;

use config::Config;
use queue::NotificationQueue;
use services::alert::{AlertSink, TracingAlertSink};
use services::notifications::NotificationService;
use services::sender::{telegram::TelegramSender, SenderRegistry};
use worker::WorkerPool;

pub struct AppState {
    pub notifications: Arc<NotificationService>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "notification_engine=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    dotenvy::dotenv().ok();
    let config = Config::from_env()?;

    tracing::info!("starting notification delivery pipeline");

    let pool = init_db(&config).await?;

    let redis_client = redis::Client::open(config.redis.url.clone())?;
    let redis_conn = redis_client.get_connection_manager().await?;
    let queue = NotificationQueue::new(redis_conn);

    let mut registry = SenderRegistry::new();
    match config.telegram.bot_token.clone() {
        Some(token) => {
            let timeout = Duration::from_secs(config.telegram.request_timeout_seconds);
            registry.register(Arc::new(TelegramSender::new(token, timeout)));
        }
        None => {
            tracing::warn!(
                "no TELEGRAM_BOT_TOKEN configured; telegram notifications will fail with INVALID_PAYLOAD at send time"
            );
        }
    }
    let registry = Arc::new(registry);

    let alert_sink: Arc<dyn AlertSink> = Arc::new(TracingAlertSink);

    let notification_service = Arc::new(NotificationService::new(
        pool,
        queue.clone(),
        registry,
        alert_sink,
        config.retry.clone(),
    ));

    match notification_service.seed_queue_from_store().await {
        Ok(n) => tracing::info!(seeded = n, "seeded pending queue from durable store"),
        Err(e) => tracing::warn!(error = %e, "failed to seed pending queue from durable store"),
    }

    let worker_pool = WorkerPool::new(
        notification_service.clone(),
        queue,
        config.worker.clone(),
        config.retry.clone(),
    );
    worker_pool.start()?;

    let state = Arc::new(AppState {
        notifications: notification_service,
    });

    let app = Router::new()
        .route("/health", get(routes::health::health_check))
        .nest("/api/notifications", routes::notifications::router())
        .nest("/api/dlq", routes::dlq::router())
        .with_state(state)
        .layer(TraceLayer::new_for_http());

    let addr = format!("{}:{}", config.server.host, config.server.port);
    tracing::info!(%addr, "server listening");

    let listener = tokio::net::TcpListener::bind(&addr).await?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    worker_pool.stop().await;

    Ok(())
}

async fn shutdown_signal() {
    tokio::signal::ctrl_c()
        .await
        .expect("failed to install ctrl-c handler");
    tracing::info!("shutdown signal received");
}

/// Opens the SQLite pool and runs migrations, exactly as the host crate's
/// `services/init.rs` did before this rebuild folded it into `main`.
async fn init_db(config: &Config) -> anyhow::Result<sqlx::SqlitePool> {
    let db_url = &config.database.url;
    let db_path = db_url.strip_prefix("sqlite://").unwrap_or(db_url);
    let db_file_path = Path::new(db_path);

    if let Some(parent) = db_file_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let connect_options = sqlx::sqlite::SqliteConnectOptions::new()
        .filename(db_path)
        .create_if_missing(true);

    let pool = sqlx::sqlite::SqlitePoolOptions::new()
        .max_connections(config.database.max_connections)
        .connect_with(connect_options)
        .await?;

    if db_file_path.exists() {
        tracing::info!("connected to database file: {}", db_file_path.display());
    } else {
        tracing::info!("database file created: {}", db_file_path.display());
    }

    tracing::info!("running database migrations");
    sqlx::migrate!("./migrations").run(&pool).await?;

    Ok(pool)
}
