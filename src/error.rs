//! Domain error taxonomy for the signaling core.
//!
//! Every variant here corresponds to one of the client-recoverable failure
//! classes in the error-handling design. A variant is constructed at the
//! call site that detects the condition and logged through its `Display`
//! impl; it never becomes the client-visible reply (that's a specific
//! `ServerEvent`, sent by the caller where the design calls for one) and
//! never closes the socket. Relay-drops and registry inconsistencies reuse
//! the same variants for their log line even though the corresponding
//! action — a silent drop, or clearing a stale field — has no reply of its
//! own to send.

use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
pub enum SignalingError {
    #[error("room {0} not found")]
    RoomNotFound(Uuid),

    #[error("user {user} is not a member of room {room}")]
    NotAuthorized { user: Uuid, room: Uuid },

    #[error("user {0} already paired or waiting")]
    AlreadyPairing(Uuid),

    #[error("malformed frame: {0}")]
    MalformedFrame(String),

    #[error("unknown message type: {0}")]
    UnknownType(String),
}
