//! WebSocket wire protocol and per-connection state machine.
//!
//! Mirrors the rest of this stack's WebSocket layer: the socket is split
//! into read/write halves immediately on upgrade, the write half is owned
//! by a dedicated forwarder task draining a bounded `mpsc` channel, and
//! every inbound frame is decoded into a tagged enum and dispatched
//! synchronously into the registry.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::Response;
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::api::AppState;
use crate::core::SignalingCore;
use crate::error::SignalingError;

pub use crate::core::state::Role;

/// Query parameters accepted on the WebSocket upgrade. The token is
/// optional: a client with no prior session simply omits it and gets a
/// fresh identity back in `welcome`.
#[derive(Debug, Deserialize)]
pub struct WsQuery {
    pub token: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientEvent {
    FindPartner {
        #[serde(default)]
        audio_enabled: Option<bool>,
        #[serde(default)]
        video_enabled: Option<bool>,
    },
    JoinRoom {
        room: Uuid,
    },
    Skip,
    Offer {
        room: Uuid,
        offer: Value,
    },
    Answer {
        room: Uuid,
        answer: Value,
    },
    #[serde(rename = "ice-candidate")]
    IceCandidate {
        room: Uuid,
        candidate: Value,
    },
    RequestReoffer {
        room: Uuid,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JoinFailReason {
    NoRoom,
    NotAuthorized,
}

#[derive(Debug, Clone, Copy)]
pub enum RelayKind {
    Offer,
    Answer,
    IceCandidate,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerEvent {
    Welcome {
        user_id: Uuid,
        token: String,
    },
    ReconnectSuccess {
        user_id: Uuid,
        room: Option<Uuid>,
    },
    ReconnectFailed,
    RoomAssigned {
        room: Uuid,
        role: Role,
        partner_id: Uuid,
    },
    RoomJoined {
        room: Uuid,
        role: Role,
        partner_id: Uuid,
    },
    JoinFailed {
        reason: JoinFailReason,
    },
    PartnerSkipped,
    PartnerDisconnected {
        room: Uuid,
        partner_id: Uuid,
    },
    PartnerReconnected {
        room: Uuid,
        partner_id: Uuid,
    },
    Offer {
        offer: Value,
        sender_id: Uuid,
    },
    Answer {
        answer: Value,
        sender_id: Uuid,
    },
    #[serde(rename = "ice-candidate")]
    IceCandidate {
        candidate: Value,
        sender_id: Uuid,
    },
    UserCount {
        count: usize,
    },
    RequestReoffer {
        room: Uuid,
        requester: Uuid,
    },
}

/// Axum upgrade handler: `GET /ws?token=...`.
pub async fn handler(ws: WebSocketUpgrade, State(state): State<AppState>, Query(query): Query<WsQuery>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state.core, query.token))
}

async fn handle_socket(socket: WebSocket, core: Arc<SignalingCore>, presented_token: Option<String>) {
    let (mut ws_sender, mut ws_receiver) = socket.split();
    let (tx, mut rx) = mpsc::channel::<ServerEvent>(32);

    let forwarder = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            let Ok(text) = serde_json::to_string(&event) else {
                continue;
            };
            if ws_sender.send(Message::Text(text.into())).await.is_err() {
                break;
            }
        }
    });

    let (user_id, token, initial_actions) = core.attach(tx.clone(), presented_token.as_deref());
    dispatch(initial_actions);

    while let Some(msg) = ws_receiver.next().await {
        let msg = match msg {
            Ok(msg) => msg,
            Err(err) => {
                debug!(%user_id, error = %err, "websocket read error, closing");
                break;
            }
        };

        match msg {
            Message::Text(text) => {
                let actions = handle_client_message(&text, user_id, &core, &tx);
                dispatch(actions);
            }
            Message::Close(_) => break,
            Message::Ping(_) | Message::Pong(_) | Message::Binary(_) => {}
        }
    }

    forwarder.abort();
    dispatch(core.detach(token));
}

/// Decodes one inbound frame and dispatches it into the registry. Unknown
/// types and malformed frames are logged at debug and otherwise ignored,
/// per the client-recoverable error policy — never fatal to the socket.
fn handle_client_message(
    text: &str,
    user_id: Uuid,
    core: &Arc<SignalingCore>,
    tx: &mpsc::Sender<ServerEvent>,
) -> Vec<(mpsc::Sender<ServerEvent>, ServerEvent)> {
    let event: ClientEvent = match serde_json::from_str(text) {
        Ok(event) => event,
        Err(err) => {
            // serde's internally-tagged decoder reports an unrecognized
            // `type` field as an "unknown variant" error; anything else
            // (missing/mistyped fields on an otherwise-recognized type) is
            // a plain malformed frame. Both are client-recoverable: logged
            // once at debug, never fatal to the socket.
            let message = err.to_string();
            if message.contains("unknown variant") {
                let err = SignalingError::UnknownType(message);
                debug!(%user_id, error = %err, "ignoring frame");
            } else {
                let err = SignalingError::MalformedFrame(message);
                debug!(%user_id, error = %err, "ignoring frame");
            }
            return Vec::new();
        }
    };

    match event {
        ClientEvent::FindPartner {
            audio_enabled,
            video_enabled,
        } => core.find_partner(user_id, tx.clone(), audio_enabled, video_enabled),
        ClientEvent::JoinRoom { room } => core.join_room(user_id, room, tx.clone()),
        ClientEvent::Skip => core.skip(user_id),
        ClientEvent::Offer { room, offer } => core.relay(user_id, room, RelayKind::Offer, offer),
        ClientEvent::Answer { room, answer } => core.relay(user_id, room, RelayKind::Answer, answer),
        ClientEvent::IceCandidate { room, candidate } => {
            core.relay(user_id, room, RelayKind::IceCandidate, candidate)
        }
        ClientEvent::RequestReoffer { room } => core.request_reoffer(user_id, room),
    }
}

/// Sends every queued notification to its target socket. A full or closed
/// channel is a silent drop: the recipient is either gone or will recover
/// via ICE/re-pairing.
fn dispatch(actions: Vec<(mpsc::Sender<ServerEvent>, ServerEvent)>) {
    for (socket, event) in actions {
        if let Err(err) = socket.try_send(event) {
            warn!(?err, "dropped frame to unwritable or full socket");
        }
    }
}
