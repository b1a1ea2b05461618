//! Token provider capability.
//!
//! The connection manager never owns credentials. It reads the current token,
//! asks for a refresh after an authentication failure, and watches for tokens
//! rotated elsewhere (e.g. a background refresh).

use finstream_core::Token;
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;
use tokio::sync::watch;

/// Boxed future for dyn-compatible async trait methods.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Token acquisition failure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
    #[error("No token available")]
    NoToken,

    #[error("Credentials rejected: {0}")]
    Rejected(String),

    #[error("Token refresh failed: {0}")]
    RefreshFailed(String),
}

/// Source of bearer tokens for stream authentication.
pub trait TokenProvider: Send + Sync {
    /// Current token, if one is cached.
    fn current(&self) -> Option<Token>;

    /// Obtain a fresh token.
    fn refresh(&self) -> BoxFuture<'_, Result<Token, AuthError>>;

    /// Watch channel publishing every token change.
    fn changes(&self) -> watch::Receiver<Option<Token>>;
}

/// Observable token slot shared between a provider and its watchers.
#[derive(Debug)]
pub struct TokenCell {
    tx: watch::Sender<Option<Token>>,
}

impl TokenCell {
    pub fn new(initial: Option<Token>) -> Self {
        let (tx, _rx) = watch::channel(initial);
        Self { tx }
    }

    pub fn get(&self) -> Option<Token> {
        self.tx.borrow().clone()
    }

    /// Store a token. Watchers are only notified if the value changed.
    pub fn set(&self, token: Option<Token>) -> bool {
        self.tx.send_if_modified(|current| {
            if *current == token {
                false
            } else {
                *current = token;
                true
            }
        })
    }

    pub fn subscribe(&self) -> watch::Receiver<Option<Token>> {
        self.tx.subscribe()
    }
}

impl Default for TokenCell {
    fn default() -> Self {
        Self::new(None)
    }
}

/// In-memory provider without a refresh endpoint.
///
/// `refresh` re-reads the stored token, which another component may have
/// replaced via [`MemoryTokenProvider::set_token`].
#[derive(Debug, Default)]
pub struct MemoryTokenProvider {
    cell: TokenCell,
}

impl MemoryTokenProvider {
    pub fn new(token: Option<Token>) -> Self {
        Self {
            cell: TokenCell::new(token),
        }
    }

    /// Replace the stored token (publishes a rotation if it changed).
    pub fn set_token(&self, token: Option<Token>) {
        self.cell.set(token);
    }
}

impl TokenProvider for MemoryTokenProvider {
    fn current(&self) -> Option<Token> {
        self.cell.get()
    }

    fn refresh(&self) -> BoxFuture<'_, Result<Token, AuthError>> {
        Box::pin(async move { self.cell.get().ok_or(AuthError::NoToken) })
    }

    fn changes(&self) -> watch::Receiver<Option<Token>> {
        self.cell.subscribe()
    }
}
