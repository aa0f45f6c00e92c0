//! Streaming connection manager with automatic reconnection

use super::source::{apply_payload, CommandSource};
use crate::auth::AuthTokenManager;
use crate::command::CommandProcessor;
use crate::config::StreamConfig;
use crate::store::{EventStream, RemoteStore, TransportError};
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use futures::StreamExt;
use gharswitch_shared::codec::{parse_line, LineDecoder, SseLine};
use gharswitch_shared::event::decode_payload;
use gharswitch_shared::state_machine::{
    BackoffPolicy, LinkEvent, StreamState, StreamStateMachine, TransitionResult,
};
use gharswitch_shared::{EventKind, StorePaths};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, timeout};
use tracing::{debug, error, info, warn};

/// Follows the pending queue over a long-lived event stream
pub struct StreamConnectionManager {
    store: Arc<dyn RemoteStore>,
    auth: Arc<AuthTokenManager>,
    path: String,
    read_timeout: Duration,
    max_line: usize,
    fsm: StreamStateMachine,
}

impl StreamConnectionManager {
    pub fn new(
        store: Arc<dyn RemoteStore>,
        auth: Arc<AuthTokenManager>,
        paths: &StorePaths,
        config: &StreamConfig,
    ) -> Self {
        let policy = BackoffPolicy {
            initial: config.reconnect_delay(),
            max: config.max_reconnect_delay(),
        };

        Self {
            store,
            auth,
            path: paths.pending(),
            read_timeout: config.read_timeout(),
            max_line: config.max_line_bytes,
            fsm: StreamStateMachine::new(policy),
        }
    }

    /// One subscription attempt, from credential to the event that ended it
    async fn attempt(&mut self, processor: &mut CommandProcessor) -> LinkEvent {
        let token = match self.auth.token().await {
            Ok(token) => token,
            Err(e) => {
                error!("[AUTH] {}", e);
                return LinkEvent::AuthFailed;
            }
        };

        info!("[STREAM] Connecting to {}", self.path);
        let stream = match self.store.subscribe(&self.path, &token).await {
            Ok(stream) => stream,
            Err(TransportError::Unauthorized) => {
                warn!("[STREAM] Credential rejected");
                return LinkEvent::Unauthorized;
            }
            Err(e) => {
                warn!("[STREAM] Connect failed: {}", e);
                return LinkEvent::TransportFailed;
            }
        };

        self.fsm.process_event(LinkEvent::Opened);
        info!("[STREAM] Connected, listening for commands");

        self.read_events(stream, processor).await
    }

    /// Read the open stream until it ends, fails or goes silent
    async fn read_events(
        &self,
        mut stream: EventStream,
        processor: &mut CommandProcessor,
    ) -> LinkEvent {
        let mut decoder = LineDecoder::with_max_line(self.max_line);
        let mut event_name: Option<String> = None;

        loop {
            let chunk = match timeout(self.read_timeout, stream.next()).await {
                Ok(Some(Ok(chunk))) => chunk,
                Ok(Some(Err(e))) => {
                    warn!("[STREAM] Read error: {}", e);
                    return LinkEvent::TransportFailed;
                }
                Ok(None) => {
                    warn!("[STREAM] Stream ended by server");
                    return LinkEvent::StreamEnded;
                }
                Err(_) => {
                    warn!("[STREAM] Silent for {:?}, reconnecting", self.read_timeout);
                    return LinkEvent::TransportFailed;
                }
            };

            decoder.extend(&chunk);
            loop {
                let line = match decoder.next_line() {
                    Ok(Some(line)) => line,
                    Ok(None) => break,
                    Err(e) => {
                        warn!("[STREAM] {}", e);
                        continue;
                    }
                };

                if let Some(event) = self.handle_line(&line, &mut event_name, processor).await {
                    return event;
                }
            }
        }
    }

    /// Returns the event that closes the stream, if the line demands it
    async fn handle_line(
        &self,
        line: &str,
        event_name: &mut Option<String>,
        processor: &mut CommandProcessor,
    ) -> Option<LinkEvent> {
        match parse_line(line) {
            SseLine::Event(name) => match name.as_str() {
                "auth_revoked" => {
                    warn!("[STREAM] Credential revoked by server");
                    Some(LinkEvent::Unauthorized)
                }
                "cancel" => {
                    warn!("[STREAM] Read denied by server rules");
                    self.auth.invalidate().await;
                    Some(LinkEvent::TransportFailed)
                }
                _ => {
                    *event_name = Some(name);
                    None
                }
            },
            SseLine::Data(json) => {
                let kind = EventKind::from_name(event_name.as_deref())?;
                match decode_payload(&json) {
                    Ok(Some(payload)) => apply_payload(processor, kind, &payload).await,
                    Ok(None) => {}
                    Err(e) => warn!("[STREAM] Dropping event: {}", e),
                }
                None
            }
            SseLine::Blank => {
                *event_name = None;
                None
            }
            SseLine::Comment | SseLine::Other => None,
        }
    }

    /// Mint a fresh credential after a rejection
    async fn reauthenticate(&mut self, delay: Duration) {
        if !delay.is_zero() {
            warn!("[STREAM] Fresh credential rejected, retrying in {:?}", delay);
            sleep(delay).await;
        }

        if let Err(e) = self.auth.refresh().await {
            error!("[AUTH] Refresh failed: {}", e);
            let next = self.fsm.process_event(LinkEvent::AuthFailed);
            if let TransitionResult::Backoff { delay } = next {
                self.backoff(delay).await;
            }
        }
    }

    async fn backoff(&self, delay: Duration) {
        info!(
            "[STREAM] Reconnecting in {:?} (failure #{})",
            delay,
            self.fsm.consecutive_failures()
        );
        sleep(delay).await;
    }
}

fn invalid(from: StreamState, event: LinkEvent) -> anyhow::Error {
    anyhow!("Invalid stream transition {:?} from {:?}", event, from)
}

#[async_trait]
impl CommandSource for StreamConnectionManager {
    async fn run(&mut self, processor: &mut CommandProcessor) -> Result<()> {
        loop {
            let event = self.attempt(processor).await;
            match self.fsm.process_event(event) {
                TransitionResult::Backoff { delay } => self.backoff(delay).await,
                TransitionResult::Reauthenticate { delay } => self.reauthenticate(delay).await,
                TransitionResult::Success(state) => debug!("[STREAM] Now {:?}", state),
                TransitionResult::Invalid { from, event } => return Err(invalid(from, event)),
            }

            if let TransitionResult::Invalid { from, event } =
                self.fsm.process_event(LinkEvent::Retry)
            {
                return Err(invalid(from, event));
            }
        }
    }

    fn name(&self) -> &'static str {
        "stream"
    }
}
