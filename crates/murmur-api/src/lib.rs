pub mod error;
pub mod messages;
pub mod state;

use axum::{
    Router,
    routing::{get, post},
};

use crate::state::AppState;

/// HTTP routes over the query service and the publish path.
pub fn routes(state: AppState) -> Router {
    Router::new()
        .route("/api/messages", get(messages::stream_messages))
        .route("/api/messages/list", get(messages::list_messages))
        .route("/api/messages/send", post(messages::send_message))
        .route("/api/messages/count", get(messages::count_messages))
        .route("/api/messages/recent", get(messages::recent_messages))
        .route("/api/messages/sender/{sender}", get(messages::messages_by_sender))
        .route("/api/messages/{id}", get(messages::get_message))
        .route("/health", get(messages::health))
        .with_state(state)
}
