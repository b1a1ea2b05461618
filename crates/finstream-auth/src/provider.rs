//! Token provider backed by the auth endpoints.

use crate::client::{AuthClient, TokenResponse};
use crate::error::{AuthClientError, AuthClientResult};
use finstream_core::Token;
use finstream_ws::{AuthError, BoxFuture, TokenCell, TokenProvider};
use parking_lot::Mutex;
use tokio::sync::watch;
use tracing::{info, warn};

/// Username and password used when no refresh token is usable.
#[derive(Clone)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// [`TokenProvider`] that refreshes through `/auth/refresh`.
///
/// A rejected refresh token falls back to a fresh login when credentials are
/// configured. Refreshes are serialized; every new access token is published
/// on the watch channel.
pub struct HttpTokenProvider {
    client: AuthClient,
    access: TokenCell,
    refresh_token: Mutex<Option<String>>,
    credentials: Option<Credentials>,
    refresh_lock: tokio::sync::Mutex<()>,
}

impl HttpTokenProvider {
    pub fn new(client: AuthClient) -> Self {
        Self {
            client,
            access: TokenCell::default(),
            refresh_token: Mutex::new(None),
            credentials: None,
            refresh_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// Seed with an existing token pair.
    pub fn with_tokens(self, access: Option<Token>, refresh_token: Option<String>) -> Self {
        self.access.set(access);
        *self.refresh_token.lock() = refresh_token;
        self
    }

    pub fn with_credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = Some(credentials);
        self
    }

    /// Log in with the configured credentials and store the token pair.
    pub async fn login(&self) -> AuthClientResult<Token> {
        let _guard = self.refresh_lock.lock().await;
        self.login_locked().await
    }

    /// Drop the stored tokens (e.g. on logout). Streams keep their socket.
    pub fn clear(&self) {
        *self.refresh_token.lock() = None;
        self.access.set(None);
    }

    async fn login_locked(&self) -> AuthClientResult<Token> {
        let Some(credentials) = self.credentials.as_ref() else {
            return Err(AuthClientError::NoCredentials);
        };
        let response = self
            .client
            .login(&credentials.username, &credentials.password)
            .await?;
        Ok(self.store(response))
    }

    async fn refresh_locked(&self) -> AuthClientResult<Token> {
        let refresh_token = self.refresh_token.lock().clone();

        if let Some(refresh_token) = refresh_token {
            match self.client.refresh(&refresh_token).await {
                Ok(response) => return Ok(self.store(response)),
                Err(AuthClientError::Rejected { detail, .. }) if self.credentials.is_some() => {
                    warn!(%detail, "Refresh token rejected, logging in again");
                }
                Err(e) => return Err(e),
            }
        }

        self.login_locked().await
    }

    fn store(&self, response: TokenResponse) -> Token {
        let token = Token::new(response.access_token);
        *self.refresh_token.lock() = Some(response.refresh_token);
        self.access.set(Some(token.clone()));
        info!(
            token = ?token,
            expires_in = response.expires_in,
            "Access token updated"
        );
        token
    }
}

impl TokenProvider for HttpTokenProvider {
    fn current(&self) -> Option<Token> {
        self.access.get()
    }

    fn refresh(&self) -> BoxFuture<'_, Result<Token, AuthError>> {
        Box::pin(async move {
            let _guard = self.refresh_lock.lock().await;
            self.refresh_locked().await.map_err(AuthError::from)
        })
    }

    fn changes(&self) -> watch::Receiver<Option<Token>> {
        self.access.subscribe()
    }
}
