//! Reconnection policy: close-code classification and backoff.

use crate::message::is_auth_failure_text;
use std::time::Duration;

/// Normal closure.
pub const CLOSE_NORMAL: u16 = 1000;
/// No status code was present in the close frame.
pub const CLOSE_NO_STATUS: u16 = 1005;
/// Connection dropped without a close frame.
pub const CLOSE_ABNORMAL: u16 = 1006;
/// Policy violation; the server uses it to reject a token.
pub const CLOSE_POLICY_VIOLATION: u16 = 1008;
/// Application code: token invalid.
pub const CLOSE_AUTH_INVALID: u16 = 4001;
/// Application code: token expired.
pub const CLOSE_AUTH_EXPIRED: u16 = 4003;

/// How a socket closure should be handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseClass {
    /// Normal closure, no retry.
    Normal,
    /// Token rejected: refresh and retry immediately.
    Auth,
    /// Anything else: retry with backoff.
    Transport,
}

impl CloseClass {
    /// Metric/log label.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Normal => "normal",
            Self::Auth => "auth",
            Self::Transport => "transport",
        }
    }
}

/// Retry limits and backoff parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconnectPolicy {
    /// Consecutive auth failures that end in `Failed`.
    pub max_auth_retries: u32,
    /// Backoff retries before `Failed`.
    pub max_generic_retries: u32,
    /// Base delay for exponential backoff.
    pub reconnect_base_delay_ms: u64,
    /// Maximum delay for exponential backoff.
    pub reconnect_max_delay_ms: u64,
    /// Close codes that signal an authentication rejection.
    pub auth_close_codes: Vec<u16>,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_auth_retries: 2,
            max_generic_retries: 3,
            reconnect_base_delay_ms: 1000,
            reconnect_max_delay_ms: 10_000,
            auth_close_codes: vec![
                CLOSE_POLICY_VIOLATION,
                CLOSE_AUTH_INVALID,
                CLOSE_AUTH_EXPIRED,
            ],
        }
    }
}

impl ReconnectPolicy {
    /// Classify a closure by code first, then by reason text.
    pub fn classify_close(&self, code: u16, reason: &str) -> CloseClass {
        if self.auth_close_codes.contains(&code) || is_auth_failure_text(reason) {
            CloseClass::Auth
        } else if code == CLOSE_NORMAL {
            CloseClass::Normal
        } else {
            CloseClass::Transport
        }
    }

    /// Delay before generic retry `attempt` (1-based).
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let base = self.reconnect_base_delay_ms;
        let max = self.reconnect_max_delay_ms;

        // base * 2^(attempt-1), capped
        // attempt=1 -> base
        // attempt=2 -> 2*base
        // attempt=3 -> 4*base
        let exponent = attempt.saturating_sub(1).min(20);
        let delay = base.saturating_mul(1u64 << exponent);
        Duration::from_millis(delay.min(max))
    }
}
