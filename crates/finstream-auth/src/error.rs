//! Auth client error types.

use finstream_ws::AuthError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AuthClientError {
    #[error("HTTP client error: {0}")]
    HttpClient(String),

    #[error("Rejected with HTTP {status}: {detail}")]
    Rejected { status: u16, detail: String },

    #[error("No refresh token or credentials configured")]
    NoCredentials,

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type AuthClientResult<T> = Result<T, AuthClientError>;

impl From<AuthClientError> for AuthError {
    fn from(e: AuthClientError) -> Self {
        match e {
            AuthClientError::Rejected { detail, .. } => AuthError::Rejected(detail),
            AuthClientError::NoCredentials => AuthError::NoToken,
            other => AuthError::RefreshFailed(other.to_string()),
        }
    }
}
