//! RPC HTTP Server
//!
//! Axum-based HTTP server answering the cross-chain JSON-RPC methods.
//! Handlers run on the blocking pool: verification may issue its own
//! synchronous bridge calls to peer chains.

use axum::{extract::State, http::StatusCode, routing::post, Json, Router};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

use crate::rpc::methods::{handle_request, JsonRpcRequest, JsonRpcResponse, NodeState};

/// Start the RPC server on the specified port
pub async fn start_rpc_server(state: Arc<NodeState>, port: u16) -> std::io::Result<()> {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = Router::new()
        .route("/", post(handle_rpc))
        .layer(cors)
        .with_state(state);

    let addr = format!("0.0.0.0:{}", port);
    println!("🌐 RPC Server listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await
}

/// Handle incoming JSON-RPC requests
async fn handle_rpc(
    State(state): State<Arc<NodeState>>,
    Json(request): Json<JsonRpcRequest>,
) -> (StatusCode, Json<JsonRpcResponse>) {
    let id = request.id.clone();
    let response = tokio::task::spawn_blocking(move || handle_request(&state, request))
        .await
        .unwrap_or_else(|_| JsonRpcResponse::error(id, -1, "request handler panicked".into()));
    (StatusCode::OK, Json(response))
}
