//! HTTP server
//!
//! Thin axum surface over the node; every handler delegates to the
//! orchestrator or the chain state.

use axum::routing::{get, post};
use axum::Router;
use std::sync::Arc;
use tokio::sync::watch;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::node::{Node, NodeError};
use crate::rpc::handlers;

/// All routes of the node's HTTP surface
pub fn router(node: Arc<Node>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/balances/list", get(handlers::list_balances))
        .route("/blocks/list", get(handlers::list_blocks))
        .route("/tx/add", post(handlers::add_tx))
        .route("/node/status", get(handlers::node_status))
        .route("/node/sync", get(handlers::list_blocks))
        .route("/node/peer", get(handlers::add_peer))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(node)
}

/// Serve until the shutdown signal fires
pub async fn serve(node: Arc<Node>, mut shutdown: watch::Receiver<bool>) -> Result<(), NodeError> {
    let addr = node.info().tcp_address();
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(%addr, "http surface listening");

    axum::serve(listener, router(node))
        .with_graceful_shutdown(async move {
            let _ = shutdown.changed().await;
        })
        .await?;

    Ok(())
}
