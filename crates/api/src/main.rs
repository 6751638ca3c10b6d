use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use roleshift_db::{MemoryStore, MigrationStore, PgStore};
use roleshift_engine::{retention, Engine, EngineConfig};
use roleshift_events::{EmailConfig, EmailDelivery, EventBus, NoopNotifier, Notifier};
use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use roleshift_api::app::build_app;
use roleshift_api::config::ServerConfig;
use roleshift_api::state::AppState;

/// Default connection pool size when `DB_MAX_CONNECTIONS` is unset.
const DEFAULT_DB_MAX_CONNECTIONS: u32 = 10;

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    // --- Tracing ---
    let json_logs = std::env::var("LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json"));
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "roleshift_api=debug,roleshift_engine=debug,tower_http=debug".into()
            }),
        )
        .with(json_logs.then(|| tracing_subscriber::fmt::layer().json()))
        .with((!json_logs).then(tracing_subscriber::fmt::layer))
        .init();

    // --- Configuration ---
    let config = ServerConfig::from_env();
    tracing::info!(host = %config.host, port = %config.port, "Loaded server configuration");

    let engine_config = EngineConfig::from_env().expect("Invalid migration engine configuration");
    tracing::info!(
        chunk_size = engine_config.limits.chunk_size,
        max_concurrency = engine_config.limits.max_concurrency,
        retention_days = engine_config.retention.days,
        backup_encryption = engine_config.backup_key.is_some(),
        "Loaded engine configuration",
    );

    // --- Store ---
    let store: Arc<dyn MigrationStore> = match std::env::var("DATABASE_URL") {
        Ok(database_url) => {
            let max_connections: u32 = std::env::var("DB_MAX_CONNECTIONS")
                .unwrap_or_else(|_| DEFAULT_DB_MAX_CONNECTIONS.to_string())
                .parse()
                .expect("DB_MAX_CONNECTIONS must be a valid u32");

            let pool = roleshift_db::create_pool(&database_url, max_connections)
                .await
                .expect("Failed to connect to database");
            tracing::info!(max_connections, "Database connection pool created");

            roleshift_db::health_check(&pool)
                .await
                .expect("Database health check failed");

            roleshift_db::run_migrations(&pool)
                .await
                .expect("Failed to run database migrations");
            tracing::info!("Database migrations applied");

            Arc::new(PgStore::new(pool))
        }
        Err(_) => {
            tracing::warn!("DATABASE_URL not set; using the in-memory store, data will not survive a restart");
            Arc::new(MemoryStore::new())
        }
    };

    // --- Notifications ---
    let notifier: Arc<dyn Notifier> = match EmailConfig::from_env() {
        Some(email_config) => {
            tracing::info!(smtp_host = %email_config.smtp_host, "Email notifications enabled");
            Arc::new(EmailDelivery::new(email_config))
        }
        None => {
            tracing::info!("SMTP_HOST not set; role change notifications are disabled");
            Arc::new(NoopNotifier)
        }
    };

    // --- Event bus ---
    let event_bus = Arc::new(EventBus::default());
    let mut events = event_bus.subscribe();
    let event_log_handle = tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => tracing::debug!(
                    event_type = %event.event_type,
                    operation_id = ?event.operation_id,
                    user_id = ?event.user_id,
                    "Migration event",
                ),
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "Event log fell behind");
                }
                Err(RecvError::Closed) => break,
            }
        }
    });

    // --- Engine ---
    let engine = Engine::new(store, notifier, Arc::clone(&event_bus), engine_config);

    // Spawn snapshot retention (purges expired snapshots on an interval).
    let retention_cancel = CancellationToken::new();
    let retention_handle = tokio::spawn(retention::run(
        Arc::clone(&engine.store),
        engine.tracker.clone(),
        engine.config.purge_interval,
        retention_cancel.clone(),
    ));

    // --- App state ---
    let state = AppState {
        engine,
        config: Arc::new(config.clone()),
    };
    let app = build_app(state);

    // --- Start server ---
    let addr = SocketAddr::new(
        config.host.parse().expect("Invalid HOST address"),
        config.port,
    );
    tracing::info!(%addr, "Starting server");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("Failed to bind to address");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("Server error");

    // --- Post-shutdown cleanup ---
    tracing::info!("Server stopped accepting connections, cleaning up");
    let drain = Duration::from_secs(config.shutdown_timeout_secs);

    retention_cancel.cancel();
    let _ = tokio::time::timeout(drain, retention_handle).await;
    tracing::info!("Snapshot retention stopped");

    event_log_handle.abort();

    tracing::info!("Graceful shutdown complete");
}

/// Wait for a termination signal to initiate graceful shutdown.
///
/// Handles both SIGINT (Ctrl-C) and SIGTERM (on Unix).
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl-C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received SIGINT (Ctrl-C), starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown");
        }
    }
}
