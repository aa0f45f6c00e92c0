//! Presence Scheduler
//!
//! Runs a background task that writes an online heartbeat on a fixed
//! interval, independent of the command source, and writes the final
//! offline record at shutdown.

use crate::auth::{AuthError, AuthTokenManager};
use crate::store::{RemoteStore, TransportError};
use gharswitch_shared::{PresenceRecord, StorePaths};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

#[derive(Error, Debug)]
pub enum PresenceError {
    #[error("No credential: {0}")]
    Auth(#[from] AuthError),

    #[error("Presence write failed: {0}")]
    Transport(#[from] TransportError),

    #[error("Presence record encoding failed: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Writes this device's presence record
pub struct PresenceScheduler {
    store: Arc<dyn RemoteStore>,
    auth: Arc<AuthTokenManager>,
    path: String,
    interval: Duration,
}

impl PresenceScheduler {
    pub fn new(
        store: Arc<dyn RemoteStore>,
        auth: Arc<AuthTokenManager>,
        paths: &StorePaths,
        interval: Duration,
    ) -> Self {
        Self {
            store,
            auth,
            path: paths.presence(),
            interval,
        }
    }

    /// Write one `{online, lastSeen}` record
    pub async fn write(&self, online: bool) -> Result<(), PresenceError> {
        let token = self.auth.token().await?;
        let last_seen = self.store.timestamp_mode().now();
        let record = if online {
            PresenceRecord::online(last_seen)
        } else {
            PresenceRecord::offline(last_seen)
        };
        let body = serde_json::to_value(record)?;

        match self.store.put(&self.path, &body, &token).await {
            Ok(()) => Ok(()),
            Err(TransportError::Unauthorized) => {
                self.auth.invalidate().await;
                Err(TransportError::Unauthorized.into())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Start the heartbeat task; the first heartbeat is written immediately
    pub fn start(self: Arc<Self>) -> PresenceHandle {
        let scheduler = self.clone();

        let task = tokio::spawn(async move {
            let mut ticker = interval(scheduler.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                ticker.tick().await;
                match scheduler.write(true).await {
                    Ok(()) => debug!("[PRESENCE] Heartbeat sent"),
                    Err(e) => warn!("[PRESENCE] Heartbeat failed: {}", e),
                }
            }
        });

        info!("[PRESENCE] Heartbeat every {:?}", self.interval);
        PresenceHandle {
            scheduler: self,
            task,
        }
    }
}

/// Handle to the running heartbeat task
pub struct PresenceHandle {
    scheduler: Arc<PresenceScheduler>,
    task: JoinHandle<()>,
}

impl PresenceHandle {
    /// Stop heartbeats, abandoning one in flight, then write the offline record
    pub async fn shutdown(self) -> Result<(), PresenceError> {
        self.task.abort();
        // Cancellation is the expected outcome
        let _ = self.task.await;

        info!("[PRESENCE] Going offline");
        self.scheduler.write(false).await
    }
}
