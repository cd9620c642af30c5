//! Lifecycle & Presence: reaper predicates and the presence broadcast.
//!
//! The actual timers (spawn + sleep) live in `core::SignalingCore`, which
//! owns the `Arc` these closures need to be `'static`. This module only
//! holds the synchronous, re-checked-at-fire-time predicates, so a reaper
//! that fires against state that has since changed is a safe no-op.

use uuid::Uuid;

use super::rooms::clear_room_id;
use super::state::{CoreState, SocketHandle, Token};
use crate::ws::ServerEvent;

/// Removes `token` if it still has no socket and no room, and its epoch
/// still matches the one captured when this reaper was scheduled. A stale
/// reaper (superseded by a later detach, or invalidated by a reconnect)
/// is a no-op.
pub fn reap_token_if_stale(state: &mut CoreState, token: &Token, expected_epoch: u64) -> bool {
    let Some(record) = state.tokens.get(token) else {
        return false;
    };
    if record.epoch != expected_epoch || record.socket.is_some() || record.room_id.is_some() {
        return false;
    }
    let user_id = record.user_id;
    state.tokens.remove(token);
    state.identity_tokens.remove(&user_id);
    true
}

/// Deletes `room_id` if both members are still detached. Runs once per
/// scheduled reaper (one per disconnect); firing twice is harmless since
/// the second call simply finds the room already gone.
pub fn reap_room_if_both_absent(state: &mut CoreState, room_id: Uuid) -> bool {
    let Some(room) = state.rooms.get(&room_id) else {
        return false;
    };
    if room.member_a.socket.is_some() || room.member_b.socket.is_some() {
        return false;
    }
    let (a, b) = (room.member_a.user_id, room.member_b.user_id);
    state.rooms.remove(&room_id);
    state.user_rooms.remove(&a);
    state.user_rooms.remove(&b);
    clear_room_id(state, a);
    clear_room_id(state, b);
    true
}

/// Forcibly deletes `room_id` regardless of member state, as a safety net
/// against leaked rooms that never get a reconnect or a skip. Room ids are
/// never reused, so the existence check above is itself a sufficient
/// staleness guard: if the room this reaper was scheduled for has already
/// been torn down (skip, grace-window reap, or an earlier hard-cap fire),
/// this is a no-op rather than deleting an unrelated room of the same id.
pub fn reap_room_hard_cap(state: &mut CoreState, room_id: Uuid) -> bool {
    let Some(room) = state.rooms.get(&room_id) else {
        return false;
    };
    let (a, b) = (room.member_a.user_id, room.member_b.user_id);
    state.rooms.remove(&room_id);
    state.user_rooms.remove(&a);
    state.user_rooms.remove(&b);
    clear_room_id(state, a);
    clear_room_id(state, b);
    true
}

/// Drains the presence-dirty flag and collects a `user_count` notification
/// for every currently attached socket, or `None` if nothing changed since
/// the last tick.
pub fn collect_presence_broadcast(state: &mut CoreState) -> Option<Vec<(SocketHandle, ServerEvent)>> {
    if !state.presence_dirty {
        return None;
    }
    state.presence_dirty = false;

    let count = state.live_user_count();
    let event = ServerEvent::UserCount { count };
    Some(
        state
            .tokens
            .values()
            .filter_map(|t| t.socket.clone().map(|s| (s, event.clone())))
            .collect(),
    )
}
