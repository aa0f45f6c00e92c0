//! Command processor - validates, applies and acknowledges pending commands

use super::state::LocalState;
use crate::actuator::Actuator;
use crate::auth::{AuthError, AuthTokenManager};
use crate::config::UnknownChannelPolicy;
use crate::store::{RemoteStore, TransportError};
use gharswitch_shared::{Channel, Command, PendingEntry, ProtocolError, StorePaths};
use serde_json::{Map, Value};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error, info, warn};

/// Remote write that completes a command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckStep {
    /// PATCH of the reported switch state
    StatePatch,
    /// DELETE of the pending command
    PendingDelete,
}

impl fmt::Display for AckStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AckStep::StatePatch => write!(f, "state patch"),
            AckStep::PendingDelete => write!(f, "pending delete"),
        }
    }
}

#[derive(Error, Debug)]
pub enum CommandError {
    #[error("Unknown channel `{0}`")]
    UnknownChannel(Channel),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error("{step} failed: {source}")]
    AckWrite {
        step: AckStep,
        source: TransportError,
    },

    #[error("No credential for acknowledgment: {0}")]
    Auth(#[from] AuthError),
}

/// Result of command processing
#[derive(Debug)]
pub enum CommandResult {
    /// Applied locally and acknowledged remotely
    Acknowledged {
        command_id: String,
        target: Channel,
        action: bool,
    },
    /// Applied locally; the acknowledgment did not go through and the
    /// command may be redelivered
    AckFailed {
        command_id: String,
        error: CommandError,
    },
    /// Not applied
    Rejected {
        command_id: String,
        error: CommandError,
    },
}

/// Applies commands from any command source, strictly one at a time
pub struct CommandProcessor {
    paths: StorePaths,
    store: Arc<dyn RemoteStore>,
    auth: Arc<AuthTokenManager>,
    actuator: Box<dyn Actuator>,
    state: LocalState,
    unknown_channel: UnknownChannelPolicy,
}

impl CommandProcessor {
    /// Create a new command processor owning the local state
    pub fn new(
        paths: StorePaths,
        store: Arc<dyn RemoteStore>,
        auth: Arc<AuthTokenManager>,
        actuator: Box<dyn Actuator>,
        state: LocalState,
        unknown_channel: UnknownChannelPolicy,
    ) -> Self {
        Self {
            paths,
            store,
            auth,
            actuator,
            state,
            unknown_channel,
        }
    }

    pub fn state(&self) -> &LocalState {
        &self.state
    }

    /// Apply one pending command
    ///
    /// The relay is driven before any remote write. Re-applying the same
    /// command is harmless.
    pub async fn apply(&mut self, command_id: &str, body: &Value) -> CommandResult {
        let command = match Command::parse(command_id, body) {
            Ok(command) => command,
            Err(e) => {
                warn!("[CMD] Dropping {}: {}", command_id, e);
                return CommandResult::Rejected {
                    command_id: command_id.to_string(),
                    error: e.into(),
                };
            }
        };

        let Some(changed) = self.state.set(&command.target, command.action) else {
            warn!(
                "[CMD] Rejected {}: unknown channel {}",
                command.id, command.target
            );
            if self.unknown_channel == UnknownChannelPolicy::Delete {
                self.discard(&command.id).await;
            }
            return CommandResult::Rejected {
                command_id: command.id,
                error: CommandError::UnknownChannel(command.target),
            };
        };
        self.actuator.set_output(&command.target, command.action);

        info!(
            "[CMD] {} -> {} ({}){}",
            command.target,
            if command.action { "ON" } else { "OFF" },
            command.id,
            if changed { "" } else { " [no change]" }
        );
        debug!("[CMD] State: {}", self.state.summary());

        match self.acknowledge(&command).await {
            Ok(()) => {
                info!("[CMD] Command {} cleared", command.id);
                CommandResult::Acknowledged {
                    command_id: command.id,
                    target: command.target,
                    action: command.action,
                }
            }
            Err(e) => {
                error!("[CMD] Failed to acknowledge {}: {}", command.id, e);
                CommandResult::AckFailed {
                    command_id: command.id,
                    error: e,
                }
            }
        }
    }

    /// Apply a batch in order
    pub async fn apply_all(&mut self, entries: Vec<PendingEntry>) -> Vec<CommandResult> {
        let mut results = Vec::with_capacity(entries.len());
        for entry in entries {
            results.push(self.apply(&entry.id, &entry.body).await);
        }
        results
    }

    /// Report the new state, then remove the command from the queue
    ///
    /// A failed state patch skips the delete so the command stays pending
    /// and its redelivery repeats the patch.
    async fn acknowledge(&self, command: &Command) -> Result<(), CommandError> {
        let token = self.auth.token().await?;

        let mut update = Map::new();
        update.insert(command.target.to_string(), Value::Bool(command.action));
        let update = Value::Object(update);
        if let Err(source) = self.store.patch(&self.paths.switches(), &update, &token).await {
            return Err(self.ack_error(AckStep::StatePatch, source).await);
        }

        let pending = self.paths.pending_command(&command.id);
        if let Err(source) = self.store.delete(&pending, &token).await {
            return Err(self.ack_error(AckStep::PendingDelete, source).await);
        }

        Ok(())
    }

    async fn ack_error(&self, step: AckStep, source: TransportError) -> CommandError {
        if source == TransportError::Unauthorized {
            self.auth.invalidate().await;
        }
        CommandError::AckWrite { step, source }
    }

    async fn discard(&self, command_id: &str) {
        let result = match self.auth.token().await {
            Ok(token) => self
                .store
                .delete(&self.paths.pending_command(command_id), &token)
                .await
                .map_err(|e| e.to_string()),
            Err(e) => Err(e.to_string()),
        };
        match result {
            Ok(()) => info!("[CMD] Discarded {}", command_id),
            Err(e) => warn!("[CMD] Failed to discard {}: {}", command_id, e),
        }
    }

    /// Drive every relay to its cached value
    pub fn drive_all(&mut self) {
        for (channel, on) in self.state.iter() {
            self.actuator.set_output(channel, on);
        }
    }

    /// Align local relays with the stored switch state at startup
    ///
    /// A stored object wins for the channels it names; an empty node is
    /// seeded with the local all-off state. Failures leave the local state
    /// as it is.
    pub async fn sync_from_remote(&mut self) {
        let path = self.paths.switches();
        let token = match self.auth.token().await {
            Ok(token) => token,
            Err(e) => {
                warn!("[INIT] Skipping state sync, no credential: {}", e);
                self.drive_all();
                return;
            }
        };

        info!("[INIT] Fetching current state...");
        match self.store.get(&path, &token).await {
            Ok(Value::Object(remote)) => {
                for (channel, on) in self.state.known_values(&remote) {
                    self.state.set(&channel, on);
                }
                info!("[INIT] Synced: {}", self.state.summary());
            }
            Ok(Value::Null) => match self.store.put(&path, &self.state.to_json(), &token).await {
                Ok(()) => info!("[INIT] Created default state in store"),
                Err(e) => warn!("[INIT] Failed to seed default state: {}", e),
            },
            Ok(other) => warn!("[INIT] Ignoring unexpected switch state: {}", other),
            Err(e) => error!("[INIT] Error fetching state: {}", e),
        }

        self.drive_all();
    }
}
