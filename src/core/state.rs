//! Authoritative in-memory state for identities, the matchmaking queue and rooms.
//!
//! Everything in this module is plain data; the mutations that keep the
//! invariants documented in `SignalingCore` are implemented in the sibling
//! `identity`, `matchmaking`, `rooms` and `lifecycle` modules, which all
//! operate on `&mut CoreState` while holding the owning mutex.

use std::collections::{HashMap, HashSet, VecDeque};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::ws::ServerEvent;

/// Identity assigned to a logical user; stable across reconnects.
pub type UserId = Uuid;

/// Opaque room identifier.
pub type RoomId = Uuid;

/// Reconnect token presented by returning clients.
pub type Token = String;

/// Handle used to push a frame to a connected socket's forwarder task.
///
/// A closed or dropped receiver simply makes sends fail; that failure is
/// always treated as "the socket is gone", never propagated as an error.
pub type SocketHandle = mpsc::Sender<ServerEvent>;

/// Which side of a pairing a member plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Initiator,
    Responder,
}

impl Role {
    #[must_use]
    pub const fn is_initiator(self) -> bool {
        matches!(self, Self::Initiator)
    }
}

/// A registered identity and its reconnect token.
pub struct TokenRecord {
    pub user_id: UserId,
    pub socket: Option<SocketHandle>,
    pub room_id: Option<RoomId>,
    pub last_seen: DateTime<Utc>,
    /// Bumped every time the token's socket/room state changes so a
    /// previously scheduled reaper can tell it is now stale.
    pub epoch: u64,
}

/// One user waiting to be paired.
pub struct WaitingEntry {
    pub user_id: UserId,
    pub socket: SocketHandle,
    pub joined_at: DateTime<Utc>,
    pub audio_enabled: Option<bool>,
    pub video_enabled: Option<bool>,
}

/// One side of a room.
pub struct RoomMember {
    pub user_id: UserId,
    pub socket: Option<SocketHandle>,
    pub is_initiator: bool,
}

impl RoomMember {
    #[must_use]
    pub fn role(&self) -> Role {
        if self.is_initiator {
            Role::Initiator
        } else {
            Role::Responder
        }
    }
}

/// A pair-room binding exactly two identities.
///
/// Unlike `TokenRecord`, rooms carry no epoch counter: room ids are fresh
/// `Uuid::new_v4` values that are never reused, so a reaper's own
/// `rooms.get(&room_id)` lookup is already a sufficient staleness check —
/// once a room is torn down, its id can never reappear out from under a
/// scheduled reaper.
pub struct RoomRecord {
    pub room_id: RoomId,
    pub member_a: RoomMember,
    pub member_b: RoomMember,
    pub created_at: DateTime<Utc>,
}

impl RoomRecord {
    #[must_use]
    pub fn other_member(&self, user_id: UserId) -> Option<&RoomMember> {
        if self.member_a.user_id == user_id {
            Some(&self.member_b)
        } else if self.member_b.user_id == user_id {
            Some(&self.member_a)
        } else {
            None
        }
    }

    #[must_use]
    pub fn member(&self, user_id: UserId) -> Option<&RoomMember> {
        if self.member_a.user_id == user_id {
            Some(&self.member_a)
        } else if self.member_b.user_id == user_id {
            Some(&self.member_b)
        } else {
            None
        }
    }

    pub fn member_mut(&mut self, user_id: UserId) -> Option<&mut RoomMember> {
        if self.member_a.user_id == user_id {
            Some(&mut self.member_a)
        } else if self.member_b.user_id == user_id {
            Some(&mut self.member_b)
        } else {
            None
        }
    }

    #[must_use]
    pub fn is_member(&self, user_id: UserId) -> bool {
        self.member_a.user_id == user_id || self.member_b.user_id == user_id
    }
}

/// Every authoritative map the registry owns, mutated only through the
/// operations in `identity`, `matchmaking`, `rooms` and `lifecycle`.
#[derive(Default)]
pub struct CoreState {
    pub tokens: HashMap<Token, TokenRecord>,
    pub identity_tokens: HashMap<UserId, Token>,
    pub waiting_set: HashSet<UserId>,
    pub waiting_queue: VecDeque<WaitingEntry>,
    pub rooms: HashMap<RoomId, RoomRecord>,
    pub user_rooms: HashMap<UserId, RoomId>,
    /// Set whenever a presence-relevant mutation happens; cleared by the
    /// coalescing broadcast ticker once it has fanned out the current count.
    pub presence_dirty: bool,
}

impl CoreState {
    #[must_use]
    pub fn live_user_count(&self) -> usize {
        self.tokens.values().filter(|t| t.socket.is_some()).count()
    }

    pub fn mark_presence_dirty(&mut self) {
        self.presence_dirty = true;
    }
}
