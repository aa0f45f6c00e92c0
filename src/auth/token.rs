//! Auth token manager - owns the current credential

use async_trait::async_trait;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{info, warn};

/// Step of the exchange that failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthStage {
    /// Device secret -> custom token
    CustomToken,
    /// Custom token -> ID token
    IdToken,
}

impl fmt::Display for AuthStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuthStage::CustomToken => write!(f, "custom token request"),
            AuthStage::IdToken => write!(f, "ID token exchange"),
        }
    }
}

/// Credential exchange failures; never fatal to the process
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    #[error("{stage} rejected with status {status}: {body}")]
    Rejected {
        stage: AuthStage,
        status: u16,
        body: String,
    },

    #[error("{stage} failed: {message}")]
    Request { stage: AuthStage, message: String },

    #[error("{stage} response has no `{field}`")]
    MissingField {
        stage: AuthStage,
        field: &'static str,
    },
}

/// A bearer credential and when it was minted
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthToken {
    pub value: String,
    pub obtained_at: u64,
}

/// Anything able to mint a fresh credential
#[async_trait]
pub trait TokenSource: Send + Sync {
    async fn obtain_token(&self) -> Result<AuthToken, AuthError>;
}

/// Holds the current token behind a single-writer/multi-reader guard
///
/// The token has no fixed lifetime here: it is replaced when the store
/// answers 401, and never persisted across restarts.
pub struct AuthTokenManager {
    source: Arc<dyn TokenSource>,
    current: RwLock<Option<AuthToken>>,
    mint_count: AtomicU64,
}

impl AuthTokenManager {
    /// Create a manager with no token yet
    pub fn new(source: Arc<dyn TokenSource>) -> Self {
        Self {
            source,
            current: RwLock::new(None),
            mint_count: AtomicU64::new(0),
        }
    }

    /// Current token value, minting one if there is none
    pub async fn token(&self) -> Result<String, AuthError> {
        if let Some(token) = self.current.read().await.as_ref() {
            return Ok(token.value.clone());
        }

        let mut guard = self.current.write().await;
        // Another task may have minted while we waited for the write lock
        if let Some(token) = guard.as_ref() {
            return Ok(token.value.clone());
        }
        let token = self.mint().await?;
        let value = token.value.clone();
        *guard = Some(token);
        Ok(value)
    }

    /// Discard the current token and mint a new one
    pub async fn refresh(&self) -> Result<String, AuthError> {
        let mut guard = self.current.write().await;
        *guard = None;
        let token = self.mint().await?;
        let value = token.value.clone();
        *guard = Some(token);
        Ok(value)
    }

    /// Forget the current token; the next `token()` call mints a new one
    pub async fn invalidate(&self) {
        if self.current.write().await.take().is_some() {
            warn!("[AUTH] Token invalidated");
        }
    }

    /// When the current token was minted
    pub async fn obtained_at(&self) -> Option<u64> {
        self.current.read().await.as_ref().map(|t| t.obtained_at)
    }

    /// Number of tokens minted so far
    pub fn mint_count(&self) -> u64 {
        self.mint_count.load(Ordering::SeqCst)
    }

    async fn mint(&self) -> Result<AuthToken, AuthError> {
        let token = self.source.obtain_token().await?;
        let count = self.mint_count.fetch_add(1, Ordering::SeqCst) + 1;
        info!("[AUTH] Token obtained (#{})", count);
        Ok(token)
    }
}
