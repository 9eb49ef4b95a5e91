use axum::{
    Json,
    body::Body,
    extract::{
        Path, Query, State,
        rejection::{JsonRejection, PathRejection, QueryRejection},
    },
    http::{StatusCode, header},
    response::IntoResponse,
};
use bytes::Bytes;
use futures_util::StreamExt;
use serde::Deserialize;
use tracing::info;

use murmur_types::api::{CountResponse, SendMessageRequest};
use murmur_types::models::MessageId;

use crate::error::ApiError;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct RecentQuery {
    #[serde(default = "default_limit")]
    pub limit: i64,
}

fn default_limit() -> i64 {
    50
}

/// Persist and broadcast, exactly like a gateway `Publish`.
pub async fn send_message(
    State(state): State<AppState>,
    req: Result<Json<SendMessageRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(req) = req?;
    let topic = req.topic.unwrap_or_default();
    let message = state.hub.publish(topic.clone(), req.content, req.sender).await?;
    info!("Message {} from {} published to '{}' over HTTP", message.id, message.sender, topic);

    Ok((StatusCode::CREATED, Json(message)))
}

pub async fn list_messages(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.queries.list().await?))
}

/// All messages as newline-delimited JSON, streamed page by page.
pub async fn stream_messages(State(state): State<AppState>) -> impl IntoResponse {
    let lines = state.queries.stream().map(|item| {
        item.and_then(|message| {
            let mut line = serde_json::to_vec(&message)?;
            line.push(b'\n');
            Ok(Bytes::from(line))
        })
    });

    (
        [(header::CONTENT_TYPE, "application/x-ndjson")],
        Body::from_stream(lines),
    )
}

pub async fn count_messages(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    let count = state.queries.count().await?;
    Ok(Json(CountResponse { count }))
}

pub async fn messages_by_sender(
    State(state): State<AppState>,
    sender: Result<Path<String>, PathRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Path(sender) = sender?;
    Ok(Json(state.queries.by_sender(&sender).await?))
}

pub async fn recent_messages(
    State(state): State<AppState>,
    query: Result<Query<RecentQuery>, QueryRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Query(query) = query?;
    Ok(Json(state.queries.recent(query.limit).await?))
}

pub async fn get_message(
    State(state): State<AppState>,
    id: Result<Path<MessageId>, PathRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Path(id) = id?;
    Ok(Json(state.queries.by_id(id).await?))
}

pub async fn health() -> &'static str {
    "ok"
}
