use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{ConnectInfo, State};
use axum::http::Request as HttpRequest;
use axum::routing::get;
use axum::{Json, Router};
use clap::Parser;
use tokio::signal;
use tracing::{info, Level};

use tollgate::config::TollgateConfig;
use tollgate::key::Identity;
use tollgate::manager::Manager;
use tollgate::middleware::rate_limit;

#[derive(Parser, Debug)]
#[command(name = "tollgate", about = "Rate limiting middleware server", version)]
struct Args {
    /// Path to a YAML configuration file
    #[arg(short, long)]
    config: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_max_level(Level::INFO)
        .with_target(false)
        .with_thread_ids(true)
        .init();

    let args = Args::parse();

    info!("Starting Tollgate");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let mut config = match &args.config {
        Some(path) => TollgateConfig::from_file(path)?,
        None => TollgateConfig::default(),
    };
    // Operational endpoints never consume quota.
    for path in ["/health", "/metrics", "/swagger"] {
        if !config.rate_limit.excluded_paths.iter().any(|p| p == path) {
            config.rate_limit.excluded_paths.push(path.to_string());
        }
    }
    info!(listen_addr = %config.server.listen_addr, "Configuration loaded");

    // Build the rate limit manager, distributed when Redis is configured
    let redis = match &config.server.redis_url {
        Some(url) => Some(redis::Client::open(url.as_str())?),
        None => None,
    };
    let store_kind = if redis.is_some() { "redis" } else { "memory" };
    let manager = Arc::new(Manager::new(config.rate_limit.clone(), redis).await?);
    info!(store = store_kind, "Rate limit manager initialized");

    let app = Router::new()
        .route("/health", get(health))
        .route("/api/v0/limit", get(limit_status))
        .layer(axum::middleware::from_fn_with_state(
            Arc::clone(&manager),
            rate_limit,
        ))
        .with_state(manager);

    let listener = tokio::net::TcpListener::bind(config.server.listen_addr).await?;
    info!("Listening on {}", config.server.listen_addr);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    info!("Tollgate stopped");
    Ok(())
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "healthy" }))
}

/// Diagnostic endpoint: the caller's current quota state, without consuming
/// any.
async fn limit_status(
    State(manager): State<Arc<Manager>>,
    request: HttpRequest<axum::body::Body>,
) -> Json<serde_json::Value> {
    let identity = request
        .extensions()
        .get::<Identity>()
        .cloned()
        .unwrap_or_default();
    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|info| info.0.ip());

    match manager
        .get_limit_info(request.uri().path(), &identity, request.headers(), peer)
        .await
    {
        Ok(info) => Json(serde_json::json!({
            "limit": info.limit,
            "remaining": info.remaining.max(0),
            "reset": info.reset,
        })),
        Err(error) => Json(serde_json::json!({ "error": error.to_string() })),
    }
}

/// Wait for a shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating graceful shutdown");
        }
    }
}
