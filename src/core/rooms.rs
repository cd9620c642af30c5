//! Room Registry & Signaling Relay operations.

use tracing::debug;
use uuid::Uuid;

use super::matchmaking::remove_from_waiting;
use super::state::{CoreState, SocketHandle, UserId};
use crate::error::SignalingError;
use crate::ws::{JoinFailReason, RelayKind, ServerEvent};

pub enum JoinRoomOutcome {
    Joined {
        reply: ServerEvent,
    },
    Failed {
        reply: ServerEvent,
    },
}

/// Rebinds `user_id`'s socket inside `room_id` if it is a member of that
/// room. The `room_id` on an inbound frame is only ever advisory input to
/// this lookup; authorization is membership, not the field's presence.
pub fn join_room(state: &mut CoreState, user_id: UserId, room_id: Uuid, socket: SocketHandle) -> JoinRoomOutcome {
    let Some(room) = state.rooms.get(&room_id) else {
        let err = SignalingError::RoomNotFound(room_id);
        debug!(%user_id, error = %err, "join_room denied");
        return JoinRoomOutcome::Failed {
            reply: ServerEvent::JoinFailed {
                reason: JoinFailReason::NoRoom,
            },
        };
    };

    if !room.is_member(user_id) {
        let err = SignalingError::NotAuthorized { user: user_id, room: room_id };
        debug!(error = %err, "join_room denied");
        return JoinRoomOutcome::Failed {
            reply: ServerEvent::JoinFailed {
                reason: JoinFailReason::NotAuthorized,
            },
        };
    }

    let partner_id = room
        .other_member(user_id)
        .map(|m| m.user_id)
        .unwrap_or(user_id);
    let role = room.member(user_id).map(|m| m.role());

    super::identity::rebind_socket_in_room(state, user_id, room_id, socket);

    JoinRoomOutcome::Joined {
        reply: ServerEvent::RoomJoined {
            room: room_id,
            role: role.expect("membership just verified above"),
            partner_id,
        },
    }
}

/// Forwards an opaque signaling payload to the other member of the sender's
/// room. Returns `None` if the sender is not a member of `room_id`
/// (signaling authorization failure — dropped silently) or if the partner
/// has no live socket attached (relay-drop).
pub fn relay(
    state: &CoreState,
    sender_id: UserId,
    room_id: Uuid,
    kind: RelayKind,
    payload: serde_json::Value,
) -> Option<(SocketHandle, ServerEvent)> {
    let Some(room) = state.rooms.get(&room_id) else {
        let err = SignalingError::RoomNotFound(room_id);
        debug!(%sender_id, error = %err, "relay dropped");
        return None;
    };
    if !room.is_member(sender_id) {
        let err = SignalingError::NotAuthorized { user: sender_id, room: room_id };
        debug!(error = %err, "relay dropped");
        return None;
    }
    let other = room.other_member(sender_id)?;
    let socket = other.socket.clone()?;

    let event = match kind {
        RelayKind::Offer => ServerEvent::Offer {
            offer: payload,
            sender_id,
        },
        RelayKind::Answer => ServerEvent::Answer {
            answer: payload,
            sender_id,
        },
        RelayKind::IceCandidate => ServerEvent::IceCandidate {
            candidate: payload,
            sender_id,
        },
    };

    Some((socket, event))
}

/// Forwards `request_reoffer` to the room's initiator, authorized the same
/// way as other signaling kinds.
pub fn request_reoffer(state: &CoreState, requester_id: UserId, room_id: Uuid) -> Option<(SocketHandle, ServerEvent)> {
    let Some(room) = state.rooms.get(&room_id) else {
        let err = SignalingError::RoomNotFound(room_id);
        debug!(%requester_id, error = %err, "request_reoffer dropped");
        return None;
    };
    if !room.is_member(requester_id) {
        let err = SignalingError::NotAuthorized { user: requester_id, room: room_id };
        debug!(error = %err, "request_reoffer dropped");
        return None;
    }
    let initiator = if room.member_a.is_initiator {
        &room.member_a
    } else {
        &room.member_b
    };
    let socket = initiator.socket.clone()?;
    Some((
        socket,
        ServerEvent::RequestReoffer {
            room: room_id,
            requester: requester_id,
        },
    ))
}

pub enum SkipOutcome {
    /// The user was in a room; the partner is notified and the room torn
    /// down.
    LeftRoom {
        partner_notify: Option<(SocketHandle, ServerEvent)>,
    },
    /// The user was waiting; simply dequeued.
    LeftQueue,
    /// The user was idle; no-op.
    Idle,
}

/// Leaves the current room (notifying the partner and deleting the room) or
/// the waiting queue, whichever the user currently occupies. A no-op when
/// idle, matching the idempotence law in the testable-properties section.
pub fn skip(state: &mut CoreState, user_id: UserId) -> SkipOutcome {
    if let Some(room_id) = state.user_rooms.remove(&user_id) {
        let Some(room) = state.rooms.remove(&room_id) else {
            state.mark_presence_dirty();
            return SkipOutcome::LeftRoom {
                partner_notify: None,
            };
        };

        let partner = room.other_member(user_id);
        let partner_notify = partner.and_then(|p| {
            p.socket
                .clone()
                .map(|sock| (sock, ServerEvent::PartnerSkipped))
        });
        if let Some(partner) = partner {
            state.user_rooms.remove(&partner.user_id);
            clear_room_id(state, partner.user_id);
        }
        clear_room_id(state, user_id);

        state.mark_presence_dirty();
        return SkipOutcome::LeftRoom { partner_notify };
    }

    if remove_from_waiting(state, user_id) {
        state.mark_presence_dirty();
        return SkipOutcome::LeftQueue;
    }

    SkipOutcome::Idle
}

pub(crate) fn clear_room_id(state: &mut CoreState, user_id: UserId) {
    if let Some(token) = state.identity_tokens.get(&user_id).cloned() {
        if let Some(record) = state.tokens.get_mut(&token) {
            record.room_id = None;
            record.epoch += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::state::{RoomMember, RoomRecord};
    use tokio::sync::mpsc;

    fn socket() -> SocketHandle {
        mpsc::channel(8).0
    }

    fn seed_room(state: &mut CoreState, a: UserId, b: UserId) -> Uuid {
        let room_id = Uuid::new_v4();
        state.rooms.insert(
            room_id,
            RoomRecord {
                room_id,
                member_a: RoomMember {
                    user_id: a,
                    socket: Some(socket()),
                    is_initiator: true,
                },
                member_b: RoomMember {
                    user_id: b,
                    socket: Some(socket()),
                    is_initiator: false,
                },
                created_at: chrono::Utc::now(),
            },
        );
        state.user_rooms.insert(a, room_id);
        state.user_rooms.insert(b, room_id);
        room_id
    }

    #[test]
    fn relay_forwards_only_to_the_other_member() {
        let mut state = CoreState::default();
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        let room_id = seed_room(&mut state, a, b);

        let forwarded = relay(&state, a, room_id, RelayKind::Offer, serde_json::json!({"sdp": "x"}));

        let (socket, event) = forwarded.expect("offer should be forwarded");
        assert!(!socket.is_closed());
        match event {
            ServerEvent::Offer { sender_id, .. } => assert_eq!(sender_id, a),
            other => panic!("expected Offer, got {other:?}"),
        }
    }

    #[test]
    fn relay_drops_silently_for_a_non_member() {
        let mut state = CoreState::default();
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        let room_id = seed_room(&mut state, a, b);
        let outsider = Uuid::new_v4();

        let forwarded = relay(&state, outsider, room_id, RelayKind::Offer, serde_json::json!({}));

        assert!(forwarded.is_none());
    }

    #[test]
    fn relay_drops_silently_for_an_unknown_room() {
        let state = CoreState::default();
        let forwarded = relay(&state, Uuid::new_v4(), Uuid::new_v4(), RelayKind::Answer, serde_json::json!({}));
        assert!(forwarded.is_none());
    }

    #[test]
    fn join_room_rejects_unknown_room() {
        let mut state = CoreState::default();
        let outcome = join_room(&mut state, Uuid::new_v4(), Uuid::new_v4(), socket());
        match outcome {
            JoinRoomOutcome::Failed {
                reply: ServerEvent::JoinFailed { reason },
            } => assert_eq!(reason, JoinFailReason::NoRoom),
            _ => panic!("expected a no_room failure"),
        }
    }

    #[test]
    fn join_room_rejects_a_non_member() {
        let mut state = CoreState::default();
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        let room_id = seed_room(&mut state, a, b);
        let outsider = Uuid::new_v4();

        let outcome = join_room(&mut state, outsider, room_id, socket());

        match outcome {
            JoinRoomOutcome::Failed {
                reply: ServerEvent::JoinFailed { reason },
            } => assert_eq!(reason, JoinFailReason::NotAuthorized),
            _ => panic!("expected a not_authorized failure"),
        }
    }

    #[test]
    fn skip_from_a_room_notifies_partner_and_deletes_the_room() {
        let mut state = CoreState::default();
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        let room_id = seed_room(&mut state, a, b);

        let outcome = skip(&mut state, a);

        assert!(matches!(outcome, SkipOutcome::LeftRoom { partner_notify: Some(_) }));
        assert!(!state.rooms.contains_key(&room_id));
        assert!(!state.user_rooms.contains_key(&a));
        assert!(!state.user_rooms.contains_key(&b));
    }

    #[test]
    fn skip_while_idle_is_a_no_op() {
        let mut state = CoreState::default();
        let outcome = skip(&mut state, Uuid::new_v4());
        assert!(matches!(outcome, SkipOutcome::Idle));
    }
}
