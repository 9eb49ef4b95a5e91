use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use axum::extract::ws::{Message as WsMessage, WebSocket};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use murmur_types::events::{GatewayCommand, GatewayEvent};
use murmur_types::models::Topic;

use crate::error::HubError;
use crate::hub::BroadcastHub;
use crate::outbound::QueueOutbound;
use crate::registry::{Connection, ConnectionId};

/// Heartbeat interval: server sends a Ping every 15 seconds.
/// If 2 consecutive Pongs are missed (~30s), the connection is dropped.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

/// Sender name used when neither the command nor the handshake names one.
pub const ANONYMOUS_SENDER: &str = "anonymous";

/// Handshake parameters for one gateway connection.
#[derive(Debug, Clone, Default)]
pub struct Handshake {
    pub identity: Option<String>,
    pub topics: Vec<Topic>,
    /// Capacity of the connection's outbound broadcast queue.
    pub queue_capacity: usize,
}

/// Drive one WebSocket client from registration to disconnect.
///
/// Broadcast frames arrive through the registry-owned queue; direct replies
/// (acks, errors) go through a separate channel so that unregistering the
/// connection closes the broadcast side and ends the writer.
pub async fn handle_connection(socket: WebSocket, hub: BroadcastHub, handshake: Handshake) {
    let (mut sender, receiver) = socket.split();

    let conn_id = ConnectionId::new();
    let identity = handshake.identity;
    let (outbound, frame_rx) = QueueOutbound::channel(handshake.queue_capacity);

    let registered = hub.registry().register(
        Connection::new(conn_id, identity.clone(), outbound),
        handshake.topics,
    );
    if let Err(e) = registered {
        warn!("Connection {} rejected: {}", conn_id, e);
        let _ = send_event(&mut sender, &error_event(&e)).await;
        return;
    }

    let label = identity.as_deref().unwrap_or(ANONYMOUS_SENDER).to_string();
    info!("{} ({}) connected to gateway", label, conn_id);

    let ready = GatewayEvent::Ready {
        connection_id: conn_id.as_uuid(),
        identity: identity.clone(),
        topics: hub.registry().topics_of(conn_id).unwrap_or_default(),
    };
    if send_event(&mut sender, &ready).await.is_err() {
        hub.registry().unregister(conn_id);
        return;
    }

    run_connection_loop(sender, receiver, frame_rx, &hub, conn_id, identity).await;

    hub.registry().unregister(conn_id);
    info!("{} ({}) disconnected from gateway", label, conn_id);
}

async fn run_connection_loop(
    mut sender: SplitSink<WebSocket, WsMessage>,
    mut receiver: SplitStream<WebSocket>,
    mut frame_rx: mpsc::Receiver<bytes::Bytes>,
    hub: &BroadcastHub,
    conn_id: ConnectionId,
    identity: Option<String>,
) {
    let (reply_tx, mut reply_rx) = mpsc::unbounded_channel::<GatewayEvent>();

    let pong_received = Arc::new(AtomicBool::new(true));
    let pong_flag_send = pong_received.clone();
    let pong_flag_recv = pong_received;

    // Forward broadcasts + direct replies -> client, with heartbeat
    let mut send_task = tokio::spawn(async move {
        let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
        heartbeat.tick().await;
        let mut missed_heartbeats: u8 = 0;

        loop {
            tokio::select! {
                frame = frame_rx.recv() => {
                    // None: the registry dropped us (unregistered or evicted)
                    let Some(frame) = frame else { break };
                    let text = match std::str::from_utf8(&frame) {
                        Ok(text) => text,
                        Err(e) => {
                            warn!("Connection {} skipping non-UTF-8 frame: {}", conn_id, e);
                            continue;
                        }
                    };
                    if sender.send(WsMessage::Text(text.into())).await.is_err() {
                        break;
                    }
                }
                reply = reply_rx.recv() => {
                    let Some(event) = reply else { break };
                    if send_event(&mut sender, &event).await.is_err() {
                        break;
                    }
                }
                _ = heartbeat.tick() => {
                    if pong_flag_send.swap(false, Ordering::Acquire) {
                        missed_heartbeats = 0;
                    } else {
                        missed_heartbeats += 1;
                        if missed_heartbeats >= 2 {
                            warn!("Heartbeat timeout (missed {} pongs), dropping connection {}", missed_heartbeats, conn_id);
                            break;
                        }
                    }
                    if sender.send(WsMessage::Ping(bytes::Bytes::new())).await.is_err() {
                        break;
                    }
                }
            }
        }

        let _ = sender.send(WsMessage::Close(None)).await;
    });

    // Read commands from client
    let hub_recv = hub.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                WsMessage::Text(text) => match serde_json::from_str::<GatewayCommand>(&text) {
                    Ok(cmd) => {
                        let reply = handle_command(&hub_recv, conn_id, identity.as_deref(), cmd).await;
                        if reply_tx.send(reply).is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        warn!(
                            "Connection {} bad command: {} -- raw: {}",
                            conn_id,
                            e,
                            text.chars().take(200).collect::<String>()
                        );
                        let reply = error_event(&HubError::InvalidArgument(format!("bad command: {}", e)));
                        if reply_tx.send(reply).is_err() {
                            break;
                        }
                    }
                },
                WsMessage::Pong(_) => {
                    pong_flag_recv.store(true, Ordering::Release);
                }
                WsMessage::Close(_) => break,
                _ => {}
            }
        }
    });

    // Wait for either task to finish
    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }
}

/// Execute one client command and build the direct reply.
async fn handle_command(
    hub: &BroadcastHub,
    conn_id: ConnectionId,
    identity: Option<&str>,
    cmd: GatewayCommand,
) -> GatewayEvent {
    match cmd {
        GatewayCommand::Publish {
            content,
            sender,
            topic,
        } => {
            let sender = sender
                .or_else(|| identity.map(str::to_string))
                .unwrap_or_else(|| ANONYMOUS_SENDER.to_string());
            let topic = topic.unwrap_or_default();
            debug!("Connection {} publishing to '{}' as {}", conn_id, topic, sender);

            match hub.publish(topic.clone(), content, sender).await {
                Ok(message) => GatewayEvent::Published { topic, message },
                Err(e) => error_event(&e),
            }
        }

        GatewayCommand::Subscribe { topics } => {
            info!("Connection {} subscribing to {} topics", conn_id, topics.len());
            match hub.registry().subscribe(conn_id, topics) {
                Some(topics) => GatewayEvent::Subscribed { topics },
                None => error_event(&HubError::NotFound(format!("connection {} is gone", conn_id))),
            }
        }

        GatewayCommand::Unsubscribe { topics } => {
            info!("Connection {} unsubscribing from {} topics", conn_id, topics.len());
            match hub.registry().unsubscribe(conn_id, topics) {
                Some(topics) => GatewayEvent::Subscribed { topics },
                None => error_event(&HubError::NotFound(format!("connection {} is gone", conn_id))),
            }
        }
    }
}

fn error_event(err: &HubError) -> GatewayEvent {
    GatewayEvent::Error {
        kind: err.kind(),
        message: err.to_string(),
    }
}

async fn send_event(
    sender: &mut SplitSink<WebSocket, WsMessage>,
    event: &GatewayEvent,
) -> Result<(), axum::Error> {
    let text = match serde_json::to_string(event) {
        Ok(text) => text,
        Err(e) => {
            warn!("Failed to encode gateway event: {}", e);
            return Ok(());
        }
    };
    sender.send(WsMessage::Text(text.into())).await
}

/// Parse the `topics` handshake parameter: comma-separated, blanks ignored.
pub fn parse_topics(raw: Option<&str>) -> Vec<Topic> {
    raw.map(|raw| {
        raw.split(',')
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .map(Topic::from)
            .collect()
    })
    .unwrap_or_default()
}
