use axum::{
    routing::{get, post, put},
    Router,
};
use std::future::IntoFuture;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::Notify;
use tower_http::trace::TraceLayer;

use super::handlers::{close, health_check, log, meter, not_found, trace, AppState};
use crate::agent::Agent;
use crate::config::AgentConfig;

/// Build the application router
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        // Health check
        .route("/health", get(health_check))
        // Tracing
        .route("/v1/trace", put(trace).post(trace))
        .route("/v1/close", post(close))
        // Telemetry
        .route("/v1/meter", post(meter))
        .route("/v1/log", post(log))
        .fallback(not_found)
        // Middleware. No request timeout: ingestion is bounded by the
        // backend client timeouts and always answers 200.
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Run the agent until a shutdown signal arrives
pub async fn run_server(config: AgentConfig) -> Result<(), Box<dyn std::error::Error>> {
    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;
    let grace = config.wait();

    // Backends must be usable before we accept traffic
    let agent = Arc::new(Agent::connect(config).await?);
    agent.start_workers();

    let state = Arc::new(AppState {
        agent: Arc::clone(&agent),
    });
    let app = build_router(state);

    let listener = TcpListener::bind(addr).await?;
    tracing::info!("Listening on {}", addr);

    let signalled = Arc::new(Notify::new());
    let server = axum::serve(listener, app).with_graceful_shutdown({
        let signalled = Arc::clone(&signalled);
        async move {
            shutdown_signal().await;
            signalled.notify_one();
        }
    });

    // In-flight requests get `grace` to finish once the signal arrives
    tokio::select! {
        result = server.into_future() => result?,
        _ = async {
            signalled.notified().await;
            tokio::time::sleep(grace).await;
        } => {
            tracing::warn!("grace period of {:?} elapsed, dropping open connections", grace);
        }
    }

    agent.shutdown().await;
    tracing::info!("shutting down");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to install CTRL+C signal handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received, stopping listener...");
}
