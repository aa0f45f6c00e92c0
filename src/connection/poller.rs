//! Snapshot polling of the pending queue

use super::source::{apply_payload, CommandSource};
use crate::auth::AuthTokenManager;
use crate::command::CommandProcessor;
use crate::store::{RemoteStore, TransportError};
use anyhow::Result;
use async_trait::async_trait;
use gharswitch_shared::{EventKind, StorePaths, StreamPayload};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{error, info, warn};

/// Reads the whole pending queue on a fixed interval
///
/// Each snapshot is handled like a root-path stream event, so commands
/// that are still pending on the next poll are re-applied; application is
/// idempotent.
pub struct PollingSource {
    store: Arc<dyn RemoteStore>,
    auth: Arc<AuthTokenManager>,
    path: String,
    interval: Duration,
}

impl PollingSource {
    pub fn new(
        store: Arc<dyn RemoteStore>,
        auth: Arc<AuthTokenManager>,
        paths: &StorePaths,
        interval: Duration,
    ) -> Self {
        Self {
            store,
            auth,
            path: paths.pending(),
            interval,
        }
    }

    /// Fetch one snapshot and apply it
    pub async fn poll(&self, processor: &mut CommandProcessor) {
        let token = match self.auth.token().await {
            Ok(token) => token,
            Err(e) => {
                error!("[AUTH] {}", e);
                return;
            }
        };

        match self.store.get(&self.path, &token).await {
            Ok(snapshot) => {
                let payload = StreamPayload {
                    path: "/".into(),
                    data: snapshot,
                };
                apply_payload(processor, EventKind::Put, &payload).await;
            }
            Err(TransportError::Unauthorized) => {
                warn!("[POLL] Credential rejected, refreshing");
                if let Err(e) = self.auth.refresh().await {
                    error!("[AUTH] Refresh failed: {}", e);
                }
            }
            Err(e) => warn!("[POLL] Fetch failed: {}", e),
        }
    }
}

#[async_trait]
impl CommandSource for PollingSource {
    async fn run(&mut self, processor: &mut CommandProcessor) -> Result<()> {
        info!("[POLL] Polling {} every {:?}", self.path, self.interval);
        let mut ticker = interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            self.poll(processor).await;
        }
    }

    fn name(&self) -> &'static str {
        "poll"
    }
}
