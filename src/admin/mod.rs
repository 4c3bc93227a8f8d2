//! Admin HTTP API.
//!
//! # Responsibilities
//! - Expose command, circuit and pool health as JSON
//! - Stream periodic metrics frames over server-sent events
//! - Guard every route with the configured bearer token
//!
//! # Design Decisions
//! - Read-only: nothing here changes engine state
//! - The token is read from the live config on each request, so a reload
//!   rotates it without restarting the listener

pub mod auth;
pub mod handlers;

use axum::{middleware, routing::get, Router};
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;

use self::auth::admin_auth_middleware;
use self::handlers::*;
use crate::engine::Engine;

pub fn setup_admin_router(engine: Engine) -> Router {
    Router::new()
        .route("/admin/status", get(get_status))
        .route("/admin/commands", get(get_commands))
        .route("/admin/commands/{key}", get(get_command))
        .route("/admin/pools", get(get_pools))
        .route("/admin/stream", get(stream_metrics))
        .layer(middleware::from_fn_with_state(engine.clone(), admin_auth_middleware))
        .layer(TraceLayer::new_for_http())
        .with_state(engine)
}

/// Serve the admin API on `listener` until the engine shuts down.
pub async fn serve(engine: Engine, listener: TcpListener) -> std::io::Result<()> {
    let mut shutdown = engine.shutdown_signal();
    if let Ok(addr) = listener.local_addr() {
        tracing::info!(%addr, "Admin API listening");
    }
    axum::serve(listener, setup_admin_router(engine))
        .with_graceful_shutdown(async move {
            let _ = shutdown.recv().await;
        })
        .await
}
