//! Command delivery from the remote store
//!
//! This module handles:
//! - Persistent event-stream subscription with automatic reconnection
//! - Credential refresh on rejection, backoff on failure
//! - Snapshot polling as an alternative source

mod manager;
mod poller;
mod source;

pub use manager::StreamConnectionManager;
pub use poller::PollingSource;
pub use source::CommandSource;
