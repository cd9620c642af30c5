//! Server configuration, loaded from environment variables.

use std::env;
use std::time::Duration;

use anyhow::Result;

/// Configuration loaded once at startup.
#[derive(Debug, Clone)]
pub struct Config {
    /// Server bind address (e.g. "0.0.0.0:8080").
    pub bind_address: String,

    /// How long an idle token (no socket, no room) survives before it is
    /// reaped. Default: 5 minutes.
    pub token_idle_ttl: Duration,

    /// How long a room survives after both members have disconnected,
    /// before it is reaped if neither reconnects. Default: 2 minutes.
    pub room_reconnect_ttl: Duration,

    /// Hard safety-net cap on room age, enforced regardless of member
    /// state. Default: 10 minutes.
    pub hard_room_age_cap: Duration,

    /// Cadence at which `user_count` is fanned out to attached sockets.
    /// Default: 1 second.
    pub presence_broadcast_interval: Duration,

    /// Minimum spacing between consecutive `find_partner`/`skip` calls
    /// honored from the same identity; closer repeats are silently
    /// dropped. Default: 200ms.
    pub matchmaking_action_min_interval: Duration,
}

impl Config {
    /// Load configuration from environment variables, falling back to the
    /// documented defaults when unset or unparsable.
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            bind_address: env::var("BIND_ADDRESS").unwrap_or_else(|_| "0.0.0.0:8080".into()),
            token_idle_ttl: Duration::from_secs(env_u64("TOKEN_IDLE_TTL_SECS", 300)),
            room_reconnect_ttl: Duration::from_secs(env_u64("ROOM_RECONNECT_TTL_SECS", 120)),
            hard_room_age_cap: Duration::from_secs(env_u64("HARD_ROOM_AGE_CAP_SECS", 600)),
            presence_broadcast_interval: Duration::from_millis(env_u64(
                "PRESENCE_BROADCAST_INTERVAL_MS",
                1000,
            )),
            matchmaking_action_min_interval: Duration::from_millis(env_u64(
                "MATCHMAKING_ACTION_MIN_INTERVAL_MS",
                200,
            )),
        })
    }

    /// Configuration used by tests: same defaults, no environment lookup.
    #[must_use]
    pub fn default_for_test() -> Self {
        Self {
            bind_address: "127.0.0.1:0".into(),
            token_idle_ttl: Duration::from_secs(300),
            room_reconnect_ttl: Duration::from_secs(120),
            hard_room_age_cap: Duration::from_secs(600),
            presence_broadcast_interval: Duration::from_millis(1000),
            matchmaking_action_min_interval: Duration::from_millis(200),
        }
    }
}

fn env_u64(key: &str, default: u64) -> u64 {
    env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}
