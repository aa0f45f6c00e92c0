//! Remote store trait abstraction for pluggable backends

use async_trait::async_trait;
use bytes::Bytes;
use futures::Stream;
use gharswitch_shared::Timestamp;
use serde_json::Value;
use std::pin::Pin;
use thiserror::Error;

/// Raw body chunks of an open subscription
pub type EventStream = Pin<Box<dyn Stream<Item = Result<Bytes, TransportError>> + Send>>;

/// Socket/HTTP level failures
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("Credential rejected (401)")]
    Unauthorized,

    #[error("Unexpected status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Request failed: {0}")]
    Request(String),

    #[error("Timed out")]
    Timeout,

    #[error("Undecodable response: {0}")]
    Decode(String),
}

/// Where `lastSeen` style timestamps come from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimestampMode {
    /// Server-assigned placeholder
    Server,
    /// Local epoch milliseconds
    Local,
}

impl TimestampMode {
    pub fn now(&self) -> Timestamp {
        match self {
            TimestampMode::Server => Timestamp::server(),
            TimestampMode::Local => Timestamp::local(),
        }
    }
}

/// Request primitives against the store; paths exclude the `.json` suffix
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Read a node; an absent node is `Value::Null`
    async fn get(&self, path: &str, token: &str) -> Result<Value, TransportError>;

    /// Replace a node
    async fn put(&self, path: &str, body: &Value, token: &str) -> Result<(), TransportError>;

    /// Update the listed children of a node, leaving siblings alone
    async fn patch(&self, path: &str, body: &Value, token: &str) -> Result<(), TransportError>;

    /// Remove a node
    async fn delete(&self, path: &str, token: &str) -> Result<(), TransportError>;

    /// Open a change subscription on a node
    async fn subscribe(&self, path: &str, token: &str) -> Result<EventStream, TransportError>;

    /// Timestamp capability of this store
    fn timestamp_mode(&self) -> TimestampMode;
}
