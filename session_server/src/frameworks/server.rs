// Framework bootstrap for the session server runtime.

use crate::frameworks::{config, level_config};
use crate::interface_adapters::http::{health_handler, state_handler};
use crate::interface_adapters::net::ws_handler;
use crate::interface_adapters::state::AppState;
use crate::use_cases::{SessionHandle, SessionSettings};

use axum::{Router, routing::get};
use std::net::SocketAddr;
use std::{io::Result, sync::Arc};

fn init_runtime() {
    let _ = dotenvy::dotenv();

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    let json = matches!(std::env::var("LOG_FORMAT").as_deref(), Ok("json"));
    if json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .json()
            .with_current_span(true)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .compact()
            .init();
    }

    std::panic::set_hook(Box::new(|info| {
        let backtrace = std::backtrace::Backtrace::capture();
        tracing::error!(%info, ?backtrace, "panic");
    }));
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/ws", get(ws_handler))
        .route("/state", get(state_handler))
        .route("/health", get(health_handler))
        .with_state(state)
}

pub async fn run(listener: tokio::net::TcpListener) -> Result<()> {
    let address = listener.local_addr()?;
    // build state
    let state = build_state()?;
    let session = state.session.clone();
    // Start the Web Server
    let app = router(state);

    tracing::info!(%address, session = %session.session_id, "listening");

    // Serve app and report errors rather than panicking
    let served = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .inspect_err(|e| {
            tracing::error!(error = %e, "server error");
        });

    session.shutdown();
    tracing::info!("server stopped");
    served
}

pub async fn run_with_config() -> Result<()> {
    init_runtime();

    let address = SocketAddr::from(([127, 0, 0, 1], config::http_port()));

    // Bind TCP listener with error handling
    let listener = tokio::net::TcpListener::bind(address)
        .await
        .inspect_err(|e| {
            tracing::error!(%address, error = %e, "failed to bind");
        })?;

    run(listener).await
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for shutdown signal");
        // Without a signal handler, keep serving until the process is killed.
        std::future::pending::<()>().await;
    }
    tracing::info!("shutdown requested");
}

fn build_state() -> Result<Arc<AppState>> {
    let level_path = config::level_config_path();
    let layout = level_config::load_level(level_path.as_deref())
        .map_err(|e| std::io::Error::other(format!("failed to load level: {e}")))?;
    tracing::debug!(
        level = %layout.name,
        path = ?level_path,
        keys = layout.keys.len(),
        doors = layout.all_doors(),
        "level loaded"
    );

    let settings = SessionSettings {
        event_channel_capacity: config::EVENT_CHANNEL_CAPACITY,
        update_broadcast_capacity: config::UPDATE_BROADCAST_CAPACITY,
        tick_interval: config::tick_interval(),
        join_timeout: config::join_timeout(),
    };

    // The single session every connection joins.
    let session = SessionHandle::start(config::DEFAULT_SESSION_ID, Arc::new(layout), &settings)
        .map_err(|e| std::io::Error::other(format!("failed to start session: {e}")))?;

    Ok(Arc::new(AppState { session }))
}
