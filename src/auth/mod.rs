//! Device credential lifecycle
//!
//! This module handles:
//! - Minting an ID token from the device secret (two-step exchange)
//! - Sharing the current token between the command source and presence task
//! - Reactive refresh when the store rejects a token

mod exchange;
mod token;

pub use exchange::CustomTokenExchange;
pub use token::{AuthError, AuthTokenManager};
#[cfg(test)]
pub use token::{AuthStage, AuthToken, TokenSource};
