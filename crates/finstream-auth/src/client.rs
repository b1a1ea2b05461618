//! HTTP client for the backend's auth endpoints.

use crate::error::{AuthClientError, AuthClientResult};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Default timeout for API requests.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Serialize)]
struct LoginRequest<'a> {
    username: &'a str,
    password: &'a str,
}

#[derive(Debug, Serialize)]
struct RefreshRequest<'a> {
    refresh_token: &'a str,
}

/// FastAPI-style error body (`{"detail": "..."}`).
#[derive(Debug, Deserialize)]
struct ErrorBody {
    detail: serde_json::Value,
}

/// Token pair returned by login and refresh.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub refresh_token: String,
    #[serde(default = "default_token_type")]
    pub token_type: String,
    /// Access token lifetime in seconds.
    #[serde(default)]
    pub expires_in: u64,
}

fn default_token_type() -> String {
    "bearer".to_string()
}

impl std::fmt::Debug for TokenResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenResponse")
            .field("token_type", &self.token_type)
            .field("expires_in", &self.expires_in)
            .finish_non_exhaustive()
    }
}

/// Client for `/auth/login` and `/auth/refresh`.
#[derive(Debug, Clone)]
pub struct AuthClient {
    client: Client,
    base_url: String,
}

impl AuthClient {
    /// Create a new auth client.
    ///
    /// # Arguments
    /// * `base_url` - HTTP API base (e.g., "http://localhost:8000")
    pub fn new(base_url: impl Into<String>) -> AuthClientResult<Self> {
        let client = Client::builder()
            .timeout(DEFAULT_TIMEOUT)
            .build()
            .map_err(|e| {
                AuthClientError::HttpClient(format!("Failed to create HTTP client: {e}"))
            })?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    /// Exchange username and password for a token pair.
    pub async fn login(&self, username: &str, password: &str) -> AuthClientResult<TokenResponse> {
        info!(%username, "Logging in");
        self.post("/auth/login", &LoginRequest { username, password })
            .await
    }

    /// Exchange a refresh token for a new token pair.
    pub async fn refresh(&self, refresh_token: &str) -> AuthClientResult<TokenResponse> {
        debug!("Refreshing access token");
        self.post("/auth/refresh", &RefreshRequest { refresh_token })
            .await
    }

    async fn post<B: Serialize>(&self, path: &str, body: &B) -> AuthClientResult<TokenResponse> {
        let url = format!("{}{}", self.base_url, path);

        let response = self
            .client
            .post(&url)
            .json(body)
            .send()
            .await
            .map_err(|e| AuthClientError::HttpClient(format!("HTTP request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            let detail = error_detail(&text);
            warn!(%url, status = status.as_u16(), %detail, "Auth request rejected");

            return Err(match status {
                StatusCode::BAD_REQUEST | StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                    AuthClientError::Rejected {
                        status: status.as_u16(),
                        detail,
                    }
                }
                _ => AuthClientError::HttpClient(format!("HTTP {status}: {detail}")),
            });
        }

        let text = response
            .text()
            .await
            .map_err(|e| AuthClientError::HttpClient(format!("Failed to read response: {e}")))?;
        Ok(serde_json::from_str(&text)?)
    }
}

/// Extract `detail` from an error body, falling back to the raw text.
fn error_detail(body: &str) -> String {
    match serde_json::from_str::<ErrorBody>(body) {
        Ok(ErrorBody {
            detail: serde_json::Value::String(s),
        }) => s,
        Ok(ErrorBody { detail }) => detail.to_string(),
        Err(_) => body.to_string(),
    }
}
