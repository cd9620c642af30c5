//! Matchmaking Engine: FIFO pairing with deterministic role assignment.

use chrono::Utc;
use uuid::Uuid;

use super::state::{CoreState, RoomMember, RoomRecord, SocketHandle, UserId, WaitingEntry};
use crate::ws::{Role, ServerEvent};

pub enum FindPartnerOutcome {
    /// Already in a room or already waiting; the call is a silent no-op.
    AlreadyPairing,
    /// No live waiter was found; the caller was enqueued.
    Enqueued,
    /// A partner was found and a room was created.
    Paired {
        room_id: Uuid,
        initiator_notify: (SocketHandle, ServerEvent),
        responder_notify: (SocketHandle, ServerEvent),
    },
}

/// Breaks ties deterministically so both clients agree on roles without a
/// round-trip: earlier `joined_at` wins; equal timestamps fall back to the
/// lexicographically smaller id.
fn earlier_is_initiator(a_id: UserId, a_joined: chrono::DateTime<Utc>, b_id: UserId, b_joined: chrono::DateTime<Utc>) -> bool {
    match a_joined.cmp(&b_joined) {
        std::cmp::Ordering::Less => true,
        std::cmp::Ordering::Greater => false,
        std::cmp::Ordering::Equal => a_id.to_string() < b_id.to_string(),
    }
}

pub fn find_partner(
    state: &mut CoreState,
    user_id: UserId,
    socket: SocketHandle,
    audio_enabled: Option<bool>,
    video_enabled: Option<bool>,
) -> FindPartnerOutcome {
    if state.user_rooms.contains_key(&user_id) || state.waiting_set.contains(&user_id) {
        return FindPartnerOutcome::AlreadyPairing;
    }

    // Pop candidates from the head until a live one is found or the queue
    // empties; stale entries (socket gone, or no longer in the waiting-set
    // due to a race) are dropped silently.
    while let Some(candidate) = state.waiting_queue.pop_front() {
        if !state.waiting_set.contains(&candidate.user_id) {
            continue; // already removed elsewhere (skip/disconnect raced us)
        }
        if candidate.socket.is_closed() {
            state.waiting_set.remove(&candidate.user_id);
            continue;
        }

        state.waiting_set.remove(&candidate.user_id);

        let joined_at = Utc::now();
        let candidate_is_initiator = earlier_is_initiator(
            candidate.user_id,
            candidate.joined_at,
            user_id,
            joined_at,
        );

        let room_id = Uuid::new_v4();
        let member_a = RoomMember {
            user_id: candidate.user_id,
            socket: Some(candidate.socket.clone()),
            is_initiator: candidate_is_initiator,
        };
        let member_b = RoomMember {
            user_id,
            socket: Some(socket.clone()),
            is_initiator: !candidate_is_initiator,
        };

        state.user_rooms.insert(member_a.user_id, room_id);
        state.user_rooms.insert(member_b.user_id, room_id);

        for member_id in [member_a.user_id, member_b.user_id] {
            if let Some(token) = state.identity_tokens.get(&member_id).cloned() {
                if let Some(record) = state.tokens.get_mut(&token) {
                    record.room_id = Some(room_id);
                    record.epoch += 1;
                }
            }
        }

        let (candidate_role, user_role) = if candidate_is_initiator {
            (Role::Initiator, Role::Responder)
        } else {
            (Role::Responder, Role::Initiator)
        };

        let candidate_notify = (
            candidate.socket,
            ServerEvent::RoomAssigned {
                room: room_id,
                role: candidate_role,
                partner_id: user_id,
            },
        );
        let user_notify = (
            socket,
            ServerEvent::RoomAssigned {
                room: room_id,
                role: user_role,
                partner_id: candidate.user_id,
            },
        );

        state.rooms.insert(
            room_id,
            RoomRecord {
                room_id,
                member_a,
                member_b,
                created_at: joined_at,
            },
        );

        state.mark_presence_dirty();

        let (initiator_notify, responder_notify) = if candidate_is_initiator {
            (candidate_notify, user_notify)
        } else {
            (user_notify, candidate_notify)
        };

        return FindPartnerOutcome::Paired {
            room_id,
            initiator_notify,
            responder_notify,
        };
    }

    state.waiting_set.insert(user_id);
    state.waiting_queue.push_back(WaitingEntry {
        user_id,
        socket,
        joined_at: Utc::now(),
        audio_enabled,
        video_enabled,
    });
    state.mark_presence_dirty();

    FindPartnerOutcome::Enqueued
}

/// Removes `user_id` from both the waiting-set and the waiting-queue. Used
/// by `skip` and by disconnect handling.
pub fn remove_from_waiting(state: &mut CoreState, user_id: UserId) -> bool {
    let removed = state.waiting_set.remove(&user_id);
    if removed {
        state.waiting_queue.retain(|w| w.user_id != user_id);
    }
    removed
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    fn socket() -> SocketHandle {
        mpsc::channel(8).0
    }

    #[test]
    fn first_find_partner_enqueues() {
        let mut state = CoreState::default();
        let user = Uuid::new_v4();

        let outcome = find_partner(&mut state, user, socket(), None, None);

        assert!(matches!(outcome, FindPartnerOutcome::Enqueued));
        assert!(state.waiting_set.contains(&user));
        assert_eq!(state.waiting_queue.len(), 1);
    }

    #[test]
    fn second_find_partner_from_same_user_is_a_no_op() {
        let mut state = CoreState::default();
        let user = Uuid::new_v4();
        find_partner(&mut state, user, socket(), None, None);

        let outcome = find_partner(&mut state, user, socket(), None, None);

        assert!(matches!(outcome, FindPartnerOutcome::AlreadyPairing));
        assert_eq!(state.waiting_queue.len(), 1);
    }

    #[test]
    fn second_waiter_pairs_with_the_first_and_clears_the_queue() {
        let mut state = CoreState::default();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        find_partner(&mut state, a, socket(), None, None);

        let outcome = find_partner(&mut state, b, socket(), None, None);

        let FindPartnerOutcome::Paired { room_id, .. } = outcome else {
            panic!("expected a pairing");
        };
        assert!(state.waiting_set.is_empty());
        assert!(state.waiting_queue.is_empty());
        assert_eq!(state.user_rooms.get(&a), Some(&room_id));
        assert_eq!(state.user_rooms.get(&b), Some(&room_id));
        let room = &state.rooms[&room_id];
        assert!(room.member_a.is_initiator ^ room.member_b.is_initiator);
    }

    #[test]
    fn earlier_joiner_is_assigned_the_initiator_role() {
        let mut state = CoreState::default();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        find_partner(&mut state, a, socket(), None, None);

        let FindPartnerOutcome::Paired { room_id, .. } = find_partner(&mut state, b, socket(), None, None) else {
            panic!("expected a pairing");
        };

        let room = &state.rooms[&room_id];
        assert!(room.member(a).unwrap().is_initiator, "a joined the queue first");
        assert!(!room.member(b).unwrap().is_initiator);
    }

    #[test]
    fn stale_waiter_with_closed_socket_is_skipped() {
        let mut state = CoreState::default();
        let stale = Uuid::new_v4();
        let live = Uuid::new_v4();

        // Drop the receiver immediately so the sender is closed.
        let (tx, rx) = mpsc::channel(8);
        drop(rx);
        find_partner(&mut state, stale, tx, None, None);

        let outcome = find_partner(&mut state, live, socket(), None, None);

        assert!(matches!(outcome, FindPartnerOutcome::Enqueued));
        assert!(!state.waiting_set.contains(&stale));
        assert!(state.waiting_set.contains(&live));
    }

    #[test]
    fn remove_from_waiting_clears_both_set_and_queue() {
        let mut state = CoreState::default();
        let user = Uuid::new_v4();
        find_partner(&mut state, user, socket(), None, None);

        assert!(remove_from_waiting(&mut state, user));
        assert!(!state.waiting_set.contains(&user));
        assert!(state.waiting_queue.is_empty());
        assert!(!remove_from_waiting(&mut state, user));
    }
}
