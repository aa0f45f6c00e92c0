//! GharSwitch Shared Protocol Types
//!
//! This crate provides the types every GharSwitch device variant agrees on:
//! relay channels, pending command bodies, presence records, the remote store
//! layout, and the event-stream codec used to follow the pending queue.

pub mod codec;
pub mod event;
pub mod paths;
pub mod state_machine;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

pub use event::{Dispatch, EventKind, PendingEntry, ProtocolError, StreamPayload};
pub use paths::StorePaths;

/// Get current timestamp in milliseconds since Unix epoch
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Timing defaults shared by all device variants
pub mod timing {
    /// Presence heartbeat interval in milliseconds
    pub const HEARTBEAT_INTERVAL_MS: u64 = 120_000;

    /// First delay before reopening a dropped stream
    pub const RECONNECT_DELAY_MS: u64 = 10_000;

    /// Upper bound for the growing reconnect delay
    pub const MAX_RECONNECT_DELAY_MS: u64 = 60_000;

    /// Silence on an open stream before it is considered dead.
    /// The store sends a keep-alive every 30 seconds.
    pub const STREAM_READ_TIMEOUT_MS: u64 = 90_000;

    /// Timeout for single request/response calls
    pub const REQUEST_TIMEOUT_MS: u64 = 15_000;

    /// Snapshot interval for the polling command source
    pub const POLL_INTERVAL_MS: u64 = 1_000;
}

/// One addressable relay output, e.g. `s1`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Channel(String);

impl Channel {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Channel {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

/// Body of a pending command as written by the controller
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CommandBody {
    pub target: Channel,
    pub action: bool,
}

/// A pending command together with its queue key
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    pub id: String,
    pub target: Channel,
    pub action: bool,
}

impl Command {
    /// Parse a command body read from the pending collection
    pub fn parse(id: &str, body: &Value) -> Result<Self, ProtocolError> {
        let body: CommandBody =
            serde_json::from_value(body.clone()).map_err(|e| ProtocolError::MalformedCommand {
                id: id.to_string(),
                reason: e.to_string(),
            })?;

        Ok(Self {
            id: id.to_string(),
            target: body.target,
            action: body.action,
        })
    }
}

/// The store's placeholder that it replaces with its own clock on write
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ServerTimestamp {
    #[serde(rename = ".sv")]
    sv: &'static str,
}

impl Default for ServerTimestamp {
    fn default() -> Self {
        Self { sv: "timestamp" }
    }
}

/// A `lastSeen` value: either assigned by the server or taken from the local clock
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum Timestamp {
    Server(ServerTimestamp),
    Millis(u64),
}

impl Timestamp {
    pub fn server() -> Self {
        Self::Server(ServerTimestamp::default())
    }

    pub fn local() -> Self {
        Self::Millis(now_ms())
    }
}

/// Liveness record written to the presence node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PresenceRecord {
    pub online: bool,
    #[serde(rename = "lastSeen")]
    pub last_seen: Timestamp,
}

impl PresenceRecord {
    pub fn online(last_seen: Timestamp) -> Self {
        Self {
            online: true,
            last_seen,
        }
    }

    pub fn offline(last_seen: Timestamp) -> Self {
        Self {
            online: false,
            last_seen,
        }
    }
}
