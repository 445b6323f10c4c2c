//! Session identity and status

use std::fmt;
use std::time::SystemTime;
use rand::Rng;
use serde::{Deserialize, Serialize};

/// Opaque session identifier handed to callers
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SessionId(String);

impl SessionId {
    /// Fresh random identifier
    pub fn generate() -> Self {
        let bytes: [u8; 8] = rand::thread_rng().gen();
        SessionId(format!("sess-{}", hex::encode(bytes)))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SessionId {
    fn from(value: &str) -> Self {
        SessionId(value.to_string())
    }
}

/// Lifecycle of a session's IRC connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    /// Transport being opened
    Connecting,
    /// NICK/USER sent, waiting for the welcome
    Registering,
    /// Registered and joined, accepting commands
    Ready,
    /// The server closed the link or the socket failed
    Disconnected,
    /// Closed by the owner
    Closed,
}

impl ConnectionState {
    pub fn is_usable(&self) -> bool {
        matches!(self, ConnectionState::Ready)
    }
}

impl Default for ConnectionState {
    fn default() -> Self {
        ConnectionState::Connecting
    }
}

/// Serialisable snapshot of one session for dashboards
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionStatus {
    pub id: SessionId,
    pub server: String,
    pub nickname: String,
    pub state: ConnectionState,
    pub tls: bool,
    pub healthy: bool,
    pub searches: usize,
    pub downloads: usize,
    pub created_at: SystemTime,
    pub last_activity: SystemTime,
    pub last_command: Option<SystemTime>,
}
