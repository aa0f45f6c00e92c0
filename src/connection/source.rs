//! Command source abstraction

use crate::command::CommandProcessor;
use async_trait::async_trait;
use gharswitch_shared::event::{dispatch, Dispatch};
use gharswitch_shared::{EventKind, StreamPayload};
use tracing::{debug, warn};

/// Anything that delivers pending commands to the processor
///
/// `run` only returns on an unrecoverable error; the caller stops a source
/// by dropping its future.
#[async_trait]
pub trait CommandSource: Send {
    /// Deliver commands until cancelled
    async fn run(&mut self, processor: &mut CommandProcessor) -> anyhow::Result<()>;

    /// Human-readable name for this source
    fn name(&self) -> &'static str;
}

/// Route one pending-queue payload to the processor
///
/// Bad payloads are logged and dropped.
pub(crate) async fn apply_payload(
    processor: &mut CommandProcessor,
    kind: EventKind,
    payload: &StreamPayload,
) {
    match dispatch(kind, payload) {
        Ok(Dispatch::Commands(entries)) => {
            debug!("[CMD] {} command(s) at {}", entries.len(), payload.path);
            processor.apply_all(entries).await;
        }
        Ok(Dispatch::Removed(id)) => debug!("[CMD] Command {} left the queue", id),
        Ok(Dispatch::Cleared) => debug!("[CMD] Pending queue is empty"),
        Ok(Dispatch::FieldEdit { id, fields }) => {
            warn!("[CMD] Ignoring partial edit of {} ({})", id, fields.join(", "))
        }
        Err(e) => warn!("[CMD] Dropping event at {}: {}", payload.path, e),
    }
}
