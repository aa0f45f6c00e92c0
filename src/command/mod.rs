//! Command execution infrastructure for the relay agent
//!
//! This module handles:
//! - Validating pending commands from the store
//! - Driving relays and keeping the local state cache
//! - Acknowledging commands (state patch, then pending delete)

mod processor;
mod state;

pub use processor::CommandProcessor;
pub use state::LocalState;
