//! Remote store access
//!
//! Stateless request primitives against the hierarchical JSON store. Callers
//! pass the current credential on every call; nothing here holds state
//! beyond the HTTP connection pool.

mod rest;
mod traits;

pub use rest::RestStoreClient;
pub use traits::{EventStream, RemoteStore, TimestampMode, TransportError};
