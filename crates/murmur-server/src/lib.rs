pub mod config;

use std::sync::Arc;

use anyhow::Result;
use axum::{
    Router,
    extract::{Query, State, WebSocketUpgrade},
    response::IntoResponse,
    routing::get,
};
use serde::Deserialize;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use murmur_api::state::AppState;
use murmur_db::Database;
use murmur_gateway::connection::{self, Handshake};
use murmur_gateway::{BroadcastHub, MemoryStore, SharedStore};

use crate::config::StoreBackend;

#[derive(Clone)]
struct GatewayState {
    hub: BroadcastHub,
    queue_capacity: usize,
}

#[derive(Debug, Deserialize)]
struct GatewayParams {
    identity: Option<String>,
    topics: Option<String>,
}

pub fn open_store(backend: &StoreBackend) -> Result<SharedStore> {
    let store: SharedStore = match backend {
        StoreBackend::Sqlite(path) => Arc::new(Database::open(path)?),
        StoreBackend::Memory => {
            info!("Using in-memory message store; messages are lost on restart");
            Arc::new(MemoryStore::new())
        }
    };
    Ok(store)
}

/// Full application: HTTP API plus the `/chat` WebSocket gateway.
pub fn app(hub: BroadcastHub, queue_capacity: usize) -> Router {
    let ws_route = Router::new()
        .route("/chat", get(ws_upgrade))
        .with_state(GatewayState {
            hub: hub.clone(),
            queue_capacity,
        });

    Router::new()
        .merge(murmur_api::routes(AppState::new(hub)))
        .merge(ws_route)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

async fn ws_upgrade(
    State(state): State<GatewayState>,
    Query(params): Query<GatewayParams>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    let handshake = Handshake {
        identity: params.identity.filter(|name| !name.trim().is_empty()),
        topics: connection::parse_topics(params.topics.as_deref()),
        queue_capacity: state.queue_capacity,
    };

    ws.on_upgrade(move |socket| connection::handle_connection(socket, state.hub, handshake))
}
