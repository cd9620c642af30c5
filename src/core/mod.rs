//! The signaling and matchmaking registry.
//!
//! `SignalingCore` is the single logical owner described in the concurrency
//! model: every mutation to the authoritative maps happens while holding
//! `state`, a plain synchronous mutex. Because it is synchronous, it is
//! structurally impossible to hold it across an `.await`, so no pop-then-
//! notify sequence in `matchmaking` can ever interleave with another one.
//! Every public method here follows the same shape: lock, mutate, compute
//! the notifications it owes, drop the lock, then send — the same
//! clone-the-senders-before-I/O discipline this stack uses for room
//! broadcasts.

mod identity;
mod lifecycle;
mod matchmaking;
mod rooms;
pub mod state;

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio::time::sleep;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::Config;
use crate::error::SignalingError;
use crate::ratelimit::ActionRateLimiter;
use crate::ws::{RelayKind, ServerEvent};
use state::{CoreState, SocketHandle, UserId};

pub use rooms::{JoinRoomOutcome, SkipOutcome};

/// A notification owed to a specific socket, to be sent after the registry
/// lock has been released.
pub type Action = (SocketHandle, ServerEvent);

pub struct HealthCounts {
    pub tokens: usize,
    pub waiting: usize,
    pub rooms: usize,
    pub uptime_secs: u64,
}

pub struct SignalingCore {
    state: Mutex<CoreState>,
    rate_limiter: ActionRateLimiter,
    config: Config,
    started_at: Instant,
}

impl SignalingCore {
    pub fn new(config: Config) -> Arc<Self> {
        let rate_limiter = ActionRateLimiter::new(config.matchmaking_action_min_interval);
        let core = Arc::new(Self {
            state: Mutex::new(CoreState::default()),
            rate_limiter,
            config,
            started_at: Instant::now(),
        });
        Self::spawn_presence_ticker(Arc::clone(&core));
        Self::spawn_rate_limiter_sweeper(Arc::clone(&core));
        core
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, CoreState> {
        self.state.lock().expect("signaling registry mutex poisoned")
    }

    pub fn health(&self) -> HealthCounts {
        let state = self.lock();
        HealthCounts {
            tokens: state.tokens.len(),
            waiting: state.waiting_set.len(),
            rooms: state.rooms.len(),
            uptime_secs: self.started_at.elapsed().as_secs(),
        }
    }

    // ---- Identity & Token Registry -------------------------------------

    /// Attaches a socket to an identity (fresh or rebound) and returns the
    /// bound user id, its token, and every notification this attach owes.
    pub fn attach(&self, socket: SocketHandle, presented_token: Option<&str>) -> (UserId, String, Vec<Action>) {
        let outcome = {
            let mut state = self.lock();
            identity::attach(&mut state, socket.clone(), presented_token)
        };

        if outcome.reconnect_failed {
            debug!(user_id = %outcome.user_id, "presented token unknown; minted a fresh identity instead");
        } else {
            match (&outcome.welcome, outcome.room) {
                (ServerEvent::ReconnectSuccess { .. }, Some(room)) => {
                    info!(user_id = %outcome.user_id, %room, "identity rebound into its prior room");
                }
                (ServerEvent::ReconnectSuccess { .. }, None) => {
                    info!(user_id = %outcome.user_id, "identity rebound");
                }
                _ => debug!(user_id = %outcome.user_id, "fresh identity issued"),
            }
        }

        let mut actions = Vec::new();
        if outcome.reconnect_failed {
            actions.push((socket.clone(), ServerEvent::ReconnectFailed));
        }
        actions.push((socket, outcome.welcome));
        if let Some(notify) = outcome.partner_notify {
            actions.push(notify);
        }

        (outcome.user_id, outcome.token, actions)
    }

    /// Detaches the socket currently bound to `token`, notifying the
    /// partner if the user was in a room, and schedules the token-idle and
    /// (if applicable) room-reconnect reapers.
    pub fn detach(self: &Arc<Self>, token: String) -> Vec<Action> {
        let outcome = {
            let mut state = self.lock();
            identity::detach(&mut state, &token)
        };

        let Some(outcome) = outcome else {
            return Vec::new();
        };

        debug!(%token, was_waiting = outcome.was_waiting, "socket detached");

        let mut actions = Vec::new();
        let mut room_id_for_reaper = None;
        if let Some(room_disconnect) = outcome.room_disconnect {
            room_id_for_reaper = Some(room_disconnect.room_id);
            if let Some(notify) = room_disconnect.partner_notify {
                actions.push(notify);
            }
        }

        self.schedule_token_reaper(token, outcome.token_epoch);
        if let Some(room_id) = room_id_for_reaper {
            self.schedule_room_reconnect_reaper(room_id);
        }

        actions
    }

    // ---- Matchmaking Engine ---------------------------------------------

    pub fn find_partner(
        self: &Arc<Self>,
        user_id: UserId,
        socket: SocketHandle,
        audio_enabled: Option<bool>,
        video_enabled: Option<bool>,
    ) -> Vec<Action> {
        if !self.rate_limiter.check(user_id) {
            return Vec::new();
        }

        let outcome = {
            let mut state = self.lock();
            matchmaking::find_partner(&mut state, user_id, socket, audio_enabled, video_enabled)
        };

        match outcome {
            matchmaking::FindPartnerOutcome::AlreadyPairing => {
                let err = SignalingError::AlreadyPairing(user_id);
                debug!(error = %err, "find_partner ignored");
                Vec::new()
            }
            matchmaking::FindPartnerOutcome::Enqueued => Vec::new(),
            matchmaking::FindPartnerOutcome::Paired {
                room_id,
                initiator_notify,
                responder_notify,
            } => {
                info!(%room_id, %user_id, "paired into a new room");
                self.schedule_room_hard_cap(room_id);
                vec![initiator_notify, responder_notify]
            }
        }
    }

    // ---- Room Registry & Signaling Relay --------------------------------

    pub fn join_room(&self, user_id: UserId, room_id: Uuid, socket: SocketHandle) -> Vec<Action> {
        let outcome = {
            let mut state = self.lock();
            rooms::join_room(&mut state, user_id, room_id, socket.clone())
        };
        match outcome {
            JoinRoomOutcome::Joined { reply } | JoinRoomOutcome::Failed { reply } => vec![(socket, reply)],
        }
    }

    pub fn relay(
        &self,
        sender_id: UserId,
        room_id: Uuid,
        kind: RelayKind,
        payload: serde_json::Value,
    ) -> Vec<Action> {
        let state = self.lock();
        rooms::relay(&state, sender_id, room_id, kind, payload)
            .into_iter()
            .collect()
    }

    pub fn request_reoffer(&self, requester_id: UserId, room_id: Uuid) -> Vec<Action> {
        let state = self.lock();
        rooms::request_reoffer(&state, requester_id, room_id)
            .into_iter()
            .collect()
    }

    pub fn skip(&self, user_id: UserId) -> Vec<Action> {
        if !self.rate_limiter.check(user_id) {
            return Vec::new();
        }

        let outcome = {
            let mut state = self.lock();
            rooms::skip(&mut state, user_id)
        };
        match outcome {
            SkipOutcome::LeftRoom { partner_notify } => {
                debug!(%user_id, "skipped out of a room");
                partner_notify.into_iter().collect()
            }
            SkipOutcome::LeftQueue => {
                debug!(%user_id, "skipped out of the waiting queue");
                Vec::new()
            }
            SkipOutcome::Idle => Vec::new(),
        }
    }

    // ---- Lifecycle & Presence --------------------------------------------

    fn schedule_token_reaper(self: &Arc<Self>, token: String, epoch: u64) {
        let core = Arc::clone(self);
        let ttl = self.config.token_idle_ttl;
        tokio::spawn(async move {
            sleep(ttl).await;
            let reaped = {
                let mut state = core.lock();
                lifecycle::reap_token_if_stale(&mut state, &token, epoch)
            };
            if reaped {
                debug!(%token, "reaped idle token");
            }
        });
    }

    fn schedule_room_reconnect_reaper(self: &Arc<Self>, room_id: Uuid) {
        let core = Arc::clone(self);
        let ttl = self.config.room_reconnect_ttl;
        tokio::spawn(async move {
            sleep(ttl).await;
            let reaped = {
                let mut state = core.lock();
                lifecycle::reap_room_if_both_absent(&mut state, room_id)
            };
            if reaped {
                info!(%room_id, "reaped abandoned room after grace window");
            }
        });
    }

    /// Schedules the hard room-age cap, a safety net independent of member
    /// activity. Called once, right after a room is created.
    fn schedule_room_hard_cap(self: &Arc<Self>, room_id: Uuid) {
        let core = Arc::clone(self);
        let ttl = self.config.hard_room_age_cap;
        tokio::spawn(async move {
            sleep(ttl).await;
            let reaped = {
                let mut state = core.lock();
                lifecycle::reap_room_hard_cap(&mut state, room_id)
            };
            if reaped {
                warn!(%room_id, "force-expired room at hard age cap");
            }
        });
    }

    /// Periodically drops stale rate-limiter entries so a long-lived
    /// server doesn't retain one `Instant` per identity that has ever
    /// connected.
    fn spawn_rate_limiter_sweeper(core: Arc<Self>) {
        let interval = (core.config.matchmaking_action_min_interval * 10).max(Duration::from_secs(1));
        tokio::spawn(async move {
            loop {
                sleep(interval).await;
                core.rate_limiter.sweep();
            }
        });
    }

    fn spawn_presence_ticker(core: Arc<Self>) {
        let interval = core.config.presence_broadcast_interval;
        tokio::spawn(async move {
            loop {
                sleep(interval).await;
                let actions = {
                    let mut state = core.lock();
                    lifecycle::collect_presence_broadcast(&mut state)
                };
                let Some(actions) = actions else { continue };
                for (socket, event) in actions {
                    let _ = socket.try_send(event);
                }
            }
        });
    }
}
