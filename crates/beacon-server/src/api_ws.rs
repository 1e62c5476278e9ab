//! WebSocket endpoints for real-time incident, NGO, government, and user feeds.

use crate::registry::ChannelRegistry;
use crate::AppState;
use axum::{
    extract::{
        ws::{Message as AxumMessage, WebSocket},
        Extension, Path, Query, WebSocketUpgrade,
    },
    response::IntoResponse,
};
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use beacon_types::ChannelKey;

/// Query parameters accepted by the incident/ngo/gov WebSocket endpoints.
#[derive(Debug, Deserialize)]
pub struct WsQuery {
    #[serde(alias = "userId")]
    pub user_id: Option<String>,
}

/// Incoming WebSocket message types.
#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
pub enum IncomingMessage {
    #[serde(rename = "PING")]
    Ping,
    /// Situation report from a citizen on an incident channel.
    #[serde(rename = "CITIZEN_UPDATE")]
    CitizenUpdate {
        content: String,
        #[serde(default)]
        willing: bool,
    },
    /// An NGO announcing it is taking an incident.
    #[serde(rename = "ACCEPT_INCIDENT")]
    AcceptIncident { incident_id: String },
    /// NGO-to-citizen update, forwarded onto the incident channel.
    #[serde(rename = "UPDATE_TO_CITIZEN")]
    UpdateToCitizen {
        incident_id: String,
        content: String,
    },
    /// Government directive forwarded to a specific NGO channel.
    #[serde(rename = "UPDATE_TO_NGO")]
    UpdateToNgo {
        ngo_id: String,
        content: String,
        #[serde(default)]
        priority: Option<String>,
    },
}

/// Outgoing WebSocket message types.
#[derive(Debug, Serialize)]
#[serde(tag = "type")]
pub enum OutgoingMessage {
    #[serde(rename = "CONNECTED")]
    Connected { channel: String, message: String },
    #[serde(rename = "PONG")]
    Pong,
    #[serde(rename = "INCIDENT_UPDATE")]
    IncidentUpdate {
        incident_id: String,
        status: String,
        details: serde_json::Value,
        timestamp: String,
    },
    #[serde(rename = "NEW_INCIDENT")]
    NewIncident {
        incident: serde_json::Value,
        timestamp: String,
    },
    #[serde(rename = "ESCALATION")]
    Escalation {
        incident_id: String,
        data: serde_json::Value,
        priority: String,
        timestamp: String,
    },
    #[serde(rename = "NOTIFICATION")]
    Notification {
        title: String,
        message: String,
        notification_type: String,
        timestamp: String,
    },
    #[serde(rename = "CITIZEN_UPDATE")]
    CitizenUpdate {
        from_user: String,
        content: String,
        willingness_to_update: bool,
    },
    #[serde(rename = "INCIDENT_ACCEPTED")]
    IncidentAccepted {
        incident_id: String,
        accepted_by: String,
    },
    #[serde(rename = "NGO_UPDATE")]
    NgoUpdate { from_ngo: String, content: String },
    #[serde(rename = "GOV_DIRECTIVE")]
    GovDirective {
        from_gov: String,
        content: String,
        priority: String,
    },
    #[serde(rename = "ERROR")]
    Error { message: String },
}

/// `GET /ws/incident/{incidentId}` — feed for one incident.
pub async fn ws_incident_handler(
    Extension(state): Extension<Arc<AppState>>,
    Path(incident_id): Path<String>,
    Query(query): Query<WsQuery>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    let channel = ChannelKey::Incident(incident_id);
    ws.on_upgrade(move |socket| serve_connection(state, socket, channel, query.user_id))
}

/// `GET /ws/ngo/{ngoId}` — feed for one responder organisation.
pub async fn ws_ngo_handler(
    Extension(state): Extension<Arc<AppState>>,
    Path(ngo_id): Path<String>,
    Query(query): Query<WsQuery>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    let channel = ChannelKey::Ngo(ngo_id);
    ws.on_upgrade(move |socket| serve_connection(state, socket, channel, query.user_id))
}

/// `GET /ws/gov/{jurisdiction}` — feed for one government jurisdiction.
pub async fn ws_gov_handler(
    Extension(state): Extension<Arc<AppState>>,
    Path(jurisdiction): Path<String>,
    Query(query): Query<WsQuery>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    let channel = ChannelKey::Gov(jurisdiction);
    ws.on_upgrade(move |socket| serve_connection(state, socket, channel, query.user_id))
}

/// `GET /ws/user/{userId}` — personal notification feed. The path segment is
/// both the channel scope and the user id for direct delivery.
pub async fn ws_user_handler(
    Extension(state): Extension<Arc<AppState>>,
    Path(user_id): Path<String>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    let channel = ChannelKey::User(user_id.clone());
    ws.on_upgrade(move |socket| serve_connection(state, socket, channel, Some(user_id)))
}

/// Drives one WebSocket connection: registers it, confirms the subscription,
/// forwards outbound frames, and interprets inbound frames until close.
async fn serve_connection(
    state: Arc<AppState>,
    socket: WebSocket,
    channel: ChannelKey,
    user_id: Option<String>,
) {
    let (mut sender, mut receiver) = socket.split();

    let registry = state.registry.clone();
    let (connection, mut rx) = registry.attach().await;
    registry
        .subscribe(connection, channel.clone(), user_id.clone())
        .await;

    tracing::info!(
        connection = %connection,
        channel = %channel,
        "websocket connected"
    );

    let connected = OutgoingMessage::Connected {
        channel: channel.to_string(),
        message: format!("Subscribed to {}", channel),
    };
    match serde_json::to_string(&connected) {
        Ok(json) => {
            if sender.send(AxumMessage::Text(json.into())).await.is_err() {
                registry.detach(connection).await;
                return;
            }
        }
        Err(e) => {
            tracing::error!("failed to serialize CONNECTED frame: {}", e);
        }
    }

    // Forward queued outbound frames to the socket.
    let send_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            if sender.send(AxumMessage::Text(msg.into())).await.is_err() {
                break;
            }
        }
    });

    while let Some(Ok(msg)) = receiver.next().await {
        match msg {
            AxumMessage::Text(text) => {
                match serde_json::from_str::<IncomingMessage>(text.as_str()) {
                    Ok(incoming) => {
                        handle_inbound(&registry, &channel, connection, user_id.as_deref(), incoming)
                            .await;
                    }
                    Err(_) => {
                        tracing::warn!(
                            connection = %connection,
                            channel = %channel,
                            "failed to parse incoming WebSocket message"
                        );
                        send_direct(
                            &registry,
                            connection,
                            OutgoingMessage::Error {
                                message: "invalid message format".to_string(),
                            },
                        )
                        .await;
                    }
                }
            }
            AxumMessage::Close(_) => break,
            _ => {}
        }
    }

    registry.detach(connection).await;
    send_task.abort();

    tracing::info!(connection = %connection, channel = %channel, "websocket disconnected");
}

/// Delivers a frame to exactly one connection via its outbound queue.
async fn send_direct(registry: &ChannelRegistry, connection: uuid::Uuid, out: OutgoingMessage) {
    match serde_json::to_string(&out) {
        Ok(json) => registry.send_to_connection(connection, &json).await,
        Err(e) => tracing::error!("failed to serialize outgoing frame: {}", e),
    }
}

/// Interprets one inbound frame according to the channel domain it arrived on.
///
/// Frames sent on a domain that does not accept them get an ERROR reply;
/// PING is answered on every domain.
async fn handle_inbound(
    registry: &ChannelRegistry,
    channel: &ChannelKey,
    connection: uuid::Uuid,
    user_id: Option<&str>,
    incoming: IncomingMessage,
) {
    match incoming {
        IncomingMessage::Ping => {
            send_direct(registry, connection, OutgoingMessage::Pong).await;
        }
        IncomingMessage::CitizenUpdate { content, willing } => {
            let ChannelKey::Incident(_) = channel else {
                send_direct(
                    registry,
                    connection,
                    OutgoingMessage::Error {
                        message: "CITIZEN_UPDATE is only accepted on incident channels"
                            .to_string(),
                    },
                )
                .await;
                return;
            };
            let out = OutgoingMessage::CitizenUpdate {
                from_user: user_id.unwrap_or("anonymous").to_string(),
                content,
                willingness_to_update: willing,
            };
            broadcast_frame(registry, channel, &out).await;
        }
        IncomingMessage::AcceptIncident { incident_id } => {
            let ChannelKey::Ngo(ngo_id) = channel else {
                send_direct(
                    registry,
                    connection,
                    OutgoingMessage::Error {
                        message: "ACCEPT_INCIDENT is only accepted on ngo channels".to_string(),
                    },
                )
                .await;
                return;
            };
            let out = OutgoingMessage::IncidentAccepted {
                incident_id,
                accepted_by: user_id.unwrap_or(ngo_id).to_string(),
            };
            broadcast_frame(registry, channel, &out).await;
        }
        IncomingMessage::UpdateToCitizen {
            incident_id,
            content,
        } => {
            let ChannelKey::Ngo(ngo_id) = channel else {
                send_direct(
                    registry,
                    connection,
                    OutgoingMessage::Error {
                        message: "UPDATE_TO_CITIZEN is only accepted on ngo channels".to_string(),
                    },
                )
                .await;
                return;
            };
            let out = OutgoingMessage::NgoUpdate {
                from_ngo: ngo_id.clone(),
                content,
            };
            broadcast_frame(registry, &ChannelKey::Incident(incident_id), &out).await;
        }
        IncomingMessage::UpdateToNgo {
            ngo_id,
            content,
            priority,
        } => {
            let ChannelKey::Gov(jurisdiction) = channel else {
                send_direct(
                    registry,
                    connection,
                    OutgoingMessage::Error {
                        message: "UPDATE_TO_NGO is only accepted on gov channels".to_string(),
                    },
                )
                .await;
                return;
            };
            let out = OutgoingMessage::GovDirective {
                from_gov: user_id.unwrap_or(jurisdiction).to_string(),
                content,
                priority: priority.unwrap_or_else(|| "normal".to_string()),
            };
            broadcast_frame(registry, &ChannelKey::Ngo(ngo_id), &out).await;
        }
    }
}

async fn broadcast_frame(registry: &ChannelRegistry, channel: &ChannelKey, out: &OutgoingMessage) {
    match serde_json::to_string(out) {
        Ok(json) => registry.broadcast(channel, &json).await,
        Err(e) => {
            tracing::error!(channel = %channel, "failed to serialize broadcast frame: {}", e);
        }
    }
}
