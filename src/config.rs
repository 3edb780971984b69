//! Runtime configuration

use serde::Deserialize;
use std::fmt;

/// Public STUN servers queried for NAT discovery, in preference order.
pub const DEFAULT_STUN_SERVERS: &[&str] = &[
    "stun.l.google.com:19302",
    "stun1.l.google.com:19302",
    "stun2.l.google.com:19302",
    "stun.cloudflare.com:3478",
];

/// Tunables for the bootstrap protocols. Deserializable so a config file can
/// override any of them; defaults are sensible for public internet play.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// STUN servers tried for public address discovery
    pub stun_servers: Vec<String>,
    /// Give up on NAT discovery after this many binding requests
    pub stun_max_attempts: u32,
    /// How long to wait for each STUN binding response, in milliseconds
    pub stun_timeout_ms: u64,
    /// Pause between server connection attempts, in milliseconds
    pub connect_retry_interval_ms: u64,
    /// Accepted disagreement between clock estimates, in milliseconds
    pub sync_tolerance_ms: u64,
    /// The server's simulation tick period, in milliseconds
    pub server_tick_period_ms: u64,
    /// Lobby registration endpoint (empty disables registration)
    pub lobby_endpoint: String,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            stun_servers: DEFAULT_STUN_SERVERS.iter().map(|s| s.to_string()).collect(),
            stun_max_attempts: 5,
            stun_timeout_ms: 2_000,
            connect_retry_interval_ms: 5_000,
            sync_tolerance_ms: 10,
            server_tick_period_ms: 100,
            lobby_endpoint: String::new(),
        }
    }
}

/// Lobby account used when registering a public address.
#[derive(Clone, Deserialize)]
pub struct LobbyCredentials {
    pub username: String,
    pub password: String,
}

// Manual Debug so the password never lands in logs.
impl fmt::Debug for LobbyCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LobbyCredentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}
