//! Identity & Token Registry operations.
//!
//! Pure, synchronous mutations over `CoreState`. Nothing in this module
//! performs I/O or suspends; the caller (see `core::SignalingCore`) is
//! responsible for releasing the registry lock before acting on whatever
//! notification this returns.

use chrono::Utc;
use rand::RngCore;
use uuid::Uuid;

use super::state::{CoreState, SocketHandle, Token, TokenRecord, UserId};
use crate::ws::ServerEvent;

/// Generates a fresh reconnect token: 32 random bytes, hex-encoded, for 256
/// bits of entropy (comfortably above the 128-bit floor).
pub fn generate_token() -> Token {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

pub struct AttachOutcome {
    pub user_id: UserId,
    pub token: Token,
    /// `true` if a presented token was unknown, so the caller must also
    /// send `reconnect_failed` ahead of `welcome` — the client still needs
    /// the freshly minted token even though its reconnect attempt failed.
    pub reconnect_failed: bool,
    pub welcome: ServerEvent,
    /// Present if the reconnecting client's room still exists: the room's
    /// id, and the notification owed to the partner (if attached).
    pub room: Option<Uuid>,
    pub partner_notify: Option<(SocketHandle, ServerEvent)>,
}

/// Attaches a socket to an identity, minting one if `presented_token` is
/// absent or unknown.
pub fn attach(state: &mut CoreState, socket: SocketHandle, presented_token: Option<&str>) -> AttachOutcome {
    if let Some(token) = presented_token.filter(|t| state.tokens.contains_key(*t)) {
        return rebind(state, token, socket);
    }

    if presented_token.is_some() {
        // A token was presented but is unknown to us; treat as no token,
        // but flag it so the caller also sends `reconnect_failed` ahead of
        // the `welcome` that still carries the freshly minted identity —
        // otherwise this socket is left with a session it was never told
        // about and can never resume after it drops.
        return mint(state, socket, true);
    }

    mint(state, socket, false)
}

fn mint(state: &mut CoreState, socket: SocketHandle, was_reconnect_attempt: bool) -> AttachOutcome {
    let user_id = Uuid::new_v4();
    let token = generate_token();

    state.tokens.insert(
        token.clone(),
        TokenRecord {
            user_id,
            socket: Some(socket),
            room_id: None,
            last_seen: Utc::now(),
            epoch: 0,
        },
    );
    state.identity_tokens.insert(user_id, token.clone());

    AttachOutcome {
        user_id,
        token: token.clone(),
        reconnect_failed: was_reconnect_attempt,
        welcome: ServerEvent::Welcome { user_id, token },
        room: None,
        partner_notify: None,
    }
}

fn rebind(state: &mut CoreState, token: &str, socket: SocketHandle) -> AttachOutcome {
    let record = state
        .tokens
        .get_mut(token)
        .expect("caller already checked the token exists");

    record.socket = Some(socket.clone());
    record.last_seen = Utc::now();
    record.epoch += 1; // invalidates any pending token-idle reaper

    let user_id = record.user_id;
    let room_id = record.room_id;

    let mut partner_notify = None;
    if let Some(room_id) = room_id {
        if let Some(room) = state.rooms.get_mut(&room_id) {
            if let Some(member) = room.member_mut(user_id) {
                member.socket = Some(socket);
            }
            if let Some(other) = room.other_member(user_id) {
                if let Some(other_socket) = &other.socket {
                    partner_notify = Some((
                        other_socket.clone(),
                        ServerEvent::PartnerReconnected {
                            room: room_id,
                            partner_id: user_id,
                        },
                    ));
                }
            }
        }
    }

    state.mark_presence_dirty();

    AttachOutcome {
        user_id,
        token: token.to_string(),
        reconnect_failed: false,
        welcome: ServerEvent::ReconnectSuccess {
            user_id,
            room: room_id,
        },
        room: room_id,
        partner_notify,
    }
}

pub struct RoomDisconnect {
    pub room_id: Uuid,
    pub partner_notify: Option<(SocketHandle, ServerEvent)>,
}

pub struct DetachOutcome {
    pub token_epoch: u64,
    pub was_waiting: bool,
    pub room_disconnect: Option<RoomDisconnect>,
}

/// Detaches the socket bound to `token`. Returns `None` if the token is
/// unknown (already reaped, or never existed — treated as a no-op).
pub fn detach(state: &mut CoreState, token: &str) -> Option<DetachOutcome> {
    let user_id = state.tokens.get(token)?.user_id;

    let was_waiting = state.waiting_set.remove(&user_id);
    if was_waiting {
        state.waiting_queue.retain(|w| w.user_id != user_id);
    }

    let room_disconnect = if let Some(&room_id) = state.user_rooms.get(&user_id) {
        let partner_notify = state.rooms.get_mut(&room_id).and_then(|room| {
            if let Some(member) = room.member_mut(user_id) {
                member.socket = None;
            }
            room.other_member(user_id).and_then(|other| {
                other.socket.clone().map(|sock| {
                    (
                        sock,
                        ServerEvent::PartnerDisconnected {
                            room: room_id,
                            partner_id: user_id,
                        },
                    )
                })
            })
        });
        Some(RoomDisconnect {
            room_id,
            partner_notify,
        })
    } else {
        None
    };

    let record = state
        .tokens
        .get_mut(token)
        .expect("token existed above and nothing else removes it");
    record.socket = None;
    record.last_seen = Utc::now();
    record.epoch += 1;
    let token_epoch = record.epoch;

    state.mark_presence_dirty();

    Some(DetachOutcome {
        token_epoch,
        was_waiting,
        room_disconnect,
    })
}

/// Rebinds the live socket for `user_id` inside the room it currently holds,
/// used by `join_room` and after a fresh pairing.
pub fn rebind_socket_in_room(state: &mut CoreState, user_id: UserId, room_id: Uuid, socket: SocketHandle) {
    if let Some(room) = state.rooms.get_mut(&room_id) {
        if let Some(member) = room.member_mut(user_id) {
            member.socket = Some(socket);
        }
    }
    if let Some(token) = state.identity_tokens.get(&user_id).cloned() {
        if let Some(record) = state.tokens.get_mut(&token) {
            record.epoch += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    fn socket() -> SocketHandle {
        mpsc::channel(8).0
    }

    #[test]
    fn generate_token_has_256_bits_of_hex_entropy() {
        let token = generate_token();
        assert_eq!(token.len(), 64);
        assert!(token.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(token, generate_token(), "two tokens should not collide");
    }

    #[test]
    fn attach_without_a_token_mints_a_fresh_identity() {
        let mut state = CoreState::default();
        let outcome = attach(&mut state, socket(), None);

        assert!(matches!(outcome.welcome, ServerEvent::Welcome { .. }));
        assert!(outcome.room.is_none());
        assert!(state.tokens.contains_key(&outcome.token));
    }

    #[test]
    fn attach_with_an_unknown_token_mints_fresh_and_still_sends_welcome() {
        let mut state = CoreState::default();
        let outcome = attach(&mut state, socket(), Some("not-a-real-token"));

        assert!(outcome.reconnect_failed, "caller must also send reconnect_failed");
        assert!(
            matches!(outcome.welcome, ServerEvent::Welcome { .. }),
            "the freshly minted identity must still reach the client"
        );
        assert!(state.tokens.contains_key(&outcome.token));
    }

    #[test]
    fn attach_with_a_known_token_rebinds_the_same_identity() {
        let mut state = CoreState::default();
        let first = attach(&mut state, socket(), None);

        let second = attach(&mut state, socket(), Some(&first.token));

        assert_eq!(second.user_id, first.user_id);
        assert_eq!(second.token, first.token);
        assert!(matches!(second.welcome, ServerEvent::ReconnectSuccess { .. }));
    }

    #[test]
    fn detach_then_attach_restores_the_identity() {
        let mut state = CoreState::default();
        let minted = attach(&mut state, socket(), None);

        let detached = detach(&mut state, &minted.token).expect("token should still exist");
        assert!(state.tokens.get(&minted.token).unwrap().socket.is_none());

        let reattached = attach(&mut state, socket(), Some(&minted.token));
        assert_eq!(reattached.user_id, minted.user_id);
        // epoch bumped on detach then again on the rebind.
        assert!(detached.token_epoch >= 1);
    }

    #[test]
    fn detach_of_an_unknown_token_is_a_no_op() {
        let mut state = CoreState::default();
        assert!(detach(&mut state, "nonexistent").is_none());
    }
}
