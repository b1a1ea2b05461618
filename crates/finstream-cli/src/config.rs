//! Application configuration.

use crate::error::{AppError, AppResult};
use finstream_auth::Credentials;
use finstream_core::{StreamKind, Subscription, DEFAULT_PUSH_INTERVAL_MS};
use finstream_ws::{ConnectionConfig, ReconnectPolicy};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Environment variable naming the config file.
pub const CONFIG_ENV: &str = "FINSTREAM_CONFIG";
/// Fallback config file path.
pub const DEFAULT_CONFIG_PATH: &str = "config/default.toml";

const ACCESS_TOKEN_ENV: &str = "FINSTREAM_ACCESS_TOKEN";
const REFRESH_TOKEN_ENV: &str = "FINSTREAM_REFRESH_TOKEN";

/// Stream to open on startup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamConfig {
    #[serde(default = "default_kind")]
    pub kind: StreamKind,
    /// Requested server push interval (ms). Ignored by chat.
    #[serde(default = "default_push_interval_ms")]
    pub push_interval_ms: u64,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

fn default_kind() -> StreamKind {
    StreamKind::Line
}

fn default_push_interval_ms() -> u64 {
    DEFAULT_PUSH_INTERVAL_MS
}

fn default_true() -> bool {
    true
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            kind: default_kind(),
            push_interval_ms: default_push_interval_ms(),
            enabled: true,
        }
    }
}

/// Token pair and login credentials.
#[derive(Clone, Default, Serialize, Deserialize)]
pub struct AuthConfig {
    #[serde(default)]
    pub access_token: Option<String>,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
}

impl AuthConfig {
    /// Credentials, when both username and password are set.
    pub fn credentials(&self) -> Option<Credentials> {
        match (&self.username, &self.password) {
            (Some(username), Some(password)) => Some(Credentials::new(username, password)),
            _ => None,
        }
    }
}

impl std::fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthConfig")
            .field("access_token", &self.access_token.as_ref().map(|_| "<set>"))
            .field("refresh_token", &self.refresh_token.as_ref().map(|_| "<set>"))
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// Retry limits and backoff.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionSettings {
    #[serde(default = "default_max_auth_retries")]
    pub max_auth_retries: u32,
    #[serde(default = "default_max_generic_retries")]
    pub max_generic_retries: u32,
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,
    #[serde(default = "default_backoff_max_ms")]
    pub backoff_max_ms: u64,
    /// Close codes treated as token rejection.
    #[serde(default = "default_auth_close_codes")]
    pub auth_close_codes: Vec<u16>,
}

fn default_max_auth_retries() -> u32 {
    ReconnectPolicy::default().max_auth_retries
}

fn default_max_generic_retries() -> u32 {
    ReconnectPolicy::default().max_generic_retries
}

fn default_backoff_base_ms() -> u64 {
    ReconnectPolicy::default().reconnect_base_delay_ms
}

fn default_backoff_max_ms() -> u64 {
    ReconnectPolicy::default().reconnect_max_delay_ms
}

fn default_auth_close_codes() -> Vec<u16> {
    ReconnectPolicy::default().auth_close_codes
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            max_auth_retries: default_max_auth_retries(),
            max_generic_retries: default_max_generic_retries(),
            backoff_base_ms: default_backoff_base_ms(),
            backoff_max_ms: default_backoff_max_ms(),
            auth_close_codes: default_auth_close_codes(),
        }
    }
}

impl From<&ConnectionSettings> for ReconnectPolicy {
    fn from(settings: &ConnectionSettings) -> Self {
        Self {
            max_auth_retries: settings.max_auth_retries,
            max_generic_retries: settings.max_generic_retries,
            reconnect_base_delay_ms: settings.backoff_base_ms,
            reconnect_max_delay_ms: settings.backoff_max_ms,
            auth_close_codes: settings.auth_close_codes.clone(),
        }
    }
}

/// Main application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// HTTP API base URL for `/auth/*`.
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,
    /// WebSocket base URL for stream endpoints.
    #[serde(default = "default_ws_base_url")]
    pub ws_base_url: String,
    #[serde(default)]
    pub stream: StreamConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub connection: ConnectionSettings,
}

fn default_api_base_url() -> String {
    "http://localhost:8000".to_string()
}

fn default_ws_base_url() -> String {
    "ws://localhost:8000".to_string()
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            api_base_url: default_api_base_url(),
            ws_base_url: default_ws_base_url(),
            stream: StreamConfig::default(),
            auth: AuthConfig::default(),
            connection: ConnectionSettings::default(),
        }
    }
}

impl AppConfig {
    /// Load from `path`, falling back to defaults when it does not exist.
    pub fn load(path: &str) -> AppResult<Self> {
        let mut config = if Path::new(path).exists() {
            Self::from_file(path)?
        } else {
            tracing::warn!(path = %path, "Config file not found, using defaults");
            Self::default()
        };
        config.apply_env_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Load from a specific file.
    pub fn from_file(path: &str) -> AppResult<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| AppError::Config(format!("Failed to read config: {e}")))?;

        Self::from_toml(&content)
    }

    /// Parse from TOML text.
    pub fn from_toml(content: &str) -> AppResult<Self> {
        toml::from_str(content).map_err(|e| AppError::Config(format!("Failed to parse config: {e}")))
    }

    /// Apply token overrides; empty values are ignored.
    pub fn apply_env_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(token) = non_empty(ACCESS_TOKEN_ENV) {
            self.auth.access_token = Some(token);
        }
        if let Some(token) = non_empty(REFRESH_TOKEN_ENV) {
            self.auth.refresh_token = Some(token);
        }
    }

    /// Reject settings the connection manager cannot run with.
    pub fn validate(&self) -> AppResult<()> {
        if self.connection.max_auth_retries == 0 {
            return Err(AppError::Config(
                "connection.max_auth_retries must be at least 1".to_string(),
            ));
        }
        if self.connection.backoff_base_ms == 0
            || self.connection.backoff_base_ms > self.connection.backoff_max_ms
        {
            return Err(AppError::Config(format!(
                "connection backoff must satisfy 0 < base ({}) <= max ({})",
                self.connection.backoff_base_ms, self.connection.backoff_max_ms
            )));
        }
        self.subscription()
            .validate()
            .map_err(|e| AppError::Config(format!("Invalid [stream] section: {e}")))
    }

    /// Subscription for the configured stream.
    pub fn subscription(&self) -> Subscription {
        Subscription::new(self.stream.kind)
            .with_interval(self.stream.push_interval_ms)
            .with_enabled(self.stream.enabled)
    }

    /// Connection manager configuration.
    pub fn connection_config(&self) -> ConnectionConfig {
        ConnectionConfig {
            ws_base_url: self.ws_base_url.clone(),
            policy: ReconnectPolicy::from(&self.connection),
        }
    }
}
