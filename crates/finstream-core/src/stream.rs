//! Stream kinds and subscriptions.
//!
//! A `Subscription` is a consumer's declared desire for one logical stream,
//! independent of any particular socket.

use crate::error::{CoreError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Default push interval requested from chart streams.
pub const DEFAULT_PUSH_INTERVAL_MS: u64 = 2000;
/// Smallest push interval the server accepts.
pub const MIN_PUSH_INTERVAL_MS: u64 = 500;
/// Largest push interval the server accepts.
pub const MAX_PUSH_INTERVAL_MS: u64 = 60_000;

/// Logical stream kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamKind {
    /// Line chart: one point per push, accumulated client-side.
    Line,
    /// Pie chart: full snapshot per push.
    Pie,
    /// Bar chart: full snapshot per push.
    Bar,
    /// Chat channel.
    Chat,
}

impl StreamKind {
    /// All stream kinds.
    pub const ALL: [StreamKind; 4] = [Self::Line, Self::Pie, Self::Bar, Self::Chat];

    /// Check if this is a chart stream (accepts interval control frames).
    pub fn is_chart(&self) -> bool {
        !matches!(self, Self::Chat)
    }

    /// Lowercase name used in URLs and metric labels.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Line => "line",
            Self::Pie => "pie",
            Self::Bar => "bar",
            Self::Chat => "chat",
        }
    }

    /// WebSocket endpoint path, relative to the server's base URL.
    pub fn path(&self) -> String {
        match self {
            Self::Chat => "/chat/ws".to_string(),
            chart => format!("/charts/ws/{}", chart.as_str()),
        }
    }
}

impl fmt::Display for StreamKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StreamKind {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "line" => Ok(Self::Line),
            "pie" => Ok(Self::Pie),
            "bar" => Ok(Self::Bar),
            "chat" => Ok(Self::Chat),
            other => Err(CoreError::UnknownStreamKind(other.to_string())),
        }
    }
}

/// A consumer's request for one logical stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subscription {
    /// Stream kind.
    pub kind: StreamKind,
    /// Desired push interval (chart streams only).
    #[serde(default = "default_push_interval_ms")]
    pub push_interval_ms: u64,
    /// Whether the consumer currently wants the stream.
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_push_interval_ms() -> u64 {
    DEFAULT_PUSH_INTERVAL_MS
}

fn default_enabled() -> bool {
    true
}

impl Subscription {
    /// Create an enabled subscription with the default push interval.
    pub fn new(kind: StreamKind) -> Self {
        Self {
            kind,
            push_interval_ms: DEFAULT_PUSH_INTERVAL_MS,
            enabled: true,
        }
    }

    /// Set the push interval.
    #[must_use]
    pub fn with_interval(mut self, push_interval_ms: u64) -> Self {
        self.push_interval_ms = push_interval_ms;
        self
    }

    /// Set the enabled flag.
    #[must_use]
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Validate the push interval against the server's accepted range.
    ///
    /// Chat subscriptions ignore the interval.
    pub fn validate(&self) -> Result<()> {
        if self.kind.is_chart() {
            validate_interval(self.push_interval_ms)?;
        }
        Ok(())
    }
}

/// Check a push interval against the server's accepted range.
pub fn validate_interval(interval_ms: u64) -> Result<()> {
    if (MIN_PUSH_INTERVAL_MS..=MAX_PUSH_INTERVAL_MS).contains(&interval_ms) {
        Ok(())
    } else {
        Err(CoreError::InvalidInterval(interval_ms))
    }
}

/// Outbound control frame asking a chart stream to change its push rate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntervalUpdate {
    pub interval_ms: u64,
}

impl IntervalUpdate {
    /// Encode as a JSON text frame.
    pub fn to_json(&self) -> String {
        format!("{{\"interval_ms\":{}}}", self.interval_ms)
    }
}
