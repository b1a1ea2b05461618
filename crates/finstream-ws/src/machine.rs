//! Connection state machine.
//!
//! `ConnectionMachine` owns every decision about one stream handle: when to
//! connect, how to react to closures and inbound frames, when to back off and
//! when to give up. It performs no I/O. Each call to [`ConnectionMachine::dispatch`]
//! consumes one [`ConnectionEvent`] and returns the [`Command`]s the driver
//! must execute.
//!
//! Every socket attempt, token refresh and backoff timer is tagged with an
//! epoch. The epoch advances whenever the previous attempt is superseded
//! (close, reconnect, token rotation), and events carrying an older epoch are
//! ignored. This is what keeps a timer scheduled before `close()` from
//! reopening the stream afterwards.

use crate::message::{decode, is_auth_failure_text, StreamData, StreamMessage, StreamPayload};
use crate::policy::{CloseClass, ReconnectPolicy, CLOSE_NORMAL};
use crate::token::AuthError;
use finstream_core::{
    ChatRequest, IntervalUpdate, LinePoint, RollingBuffer, StreamKind, Subscription, Token,
    LINE_BUFFER_CAPACITY,
};
use std::fmt;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Terminal message after repeated authentication failures.
pub const AUTH_FAILED_MESSAGE: &str = "Authentication failed. Please refresh the page.";
/// Terminal message after exhausting backoff retries.
pub const CONNECTION_LOST_MESSAGE: &str = "Connection lost. Please refresh the page.";
/// Shown while a token refresh is in flight.
pub const AUTH_REFRESHING_MESSAGE: &str = "Authentication expired. Refreshing token...";
/// Observed when `send` is called without an open socket.
pub const NOT_CONNECTED_MESSAGE: &str = "Cannot send message: not connected";

/// Connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    /// Created, not yet opened (or subscription disabled).
    Idle,
    /// Waiting for a token or for the transport to open.
    Connecting,
    /// Socket open.
    Connected,
    /// Waiting for a backoff timer or a token refresh before retrying.
    Reconnecting,
    /// Close requested, teardown in progress.
    Closing,
    /// Retries exhausted. Only `reconnect` leaves this state.
    Failed,
    /// Terminal.
    Closed,
}

impl ConnectionState {
    /// Lowercase label for logs and metrics.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Reconnecting => "reconnecting",
            Self::Closing => "closing",
            Self::Failed => "failed",
            Self::Closed => "closed",
        }
    }

    /// Check if the handle is finished for good.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Closed)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Input to the state machine.
#[derive(Debug)]
pub enum ConnectionEvent {
    /// Consumer opened the stream. `token` is the provider's cached token.
    Open { token: Option<Token> },
    /// Token refresh finished.
    TokenReady {
        epoch: u64,
        result: Result<Token, AuthError>,
    },
    /// Transport handshake completed.
    TransportOpened { epoch: u64 },
    /// Text frame received.
    TransportMessage { epoch: u64, text: String },
    /// Transport reported an error (a close usually follows).
    TransportError { epoch: u64, message: String },
    /// Transport closed.
    TransportClosed {
        epoch: u64,
        code: u16,
        reason: String,
    },
    /// Backoff timer elapsed.
    TimerFired { epoch: u64 },
    /// Token provider published a new token.
    TokenChanged { token: Option<Token> },
    /// Consumer changed the desired push interval.
    UpdateInterval { interval_ms: u64 },
    /// Consumer sent a chat message.
    Send { payload: String },
    /// Consumer asked to retry from scratch.
    Reconnect { token: Option<Token> },
    /// Consumer closed the stream.
    Close,
    /// Driver finished tearing down after `Close`.
    CloseComplete,
}

/// Output of the state machine, executed by the driver.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// Start a transport connection attempt.
    Connect { epoch: u64, url: String },
    /// Ask the token provider for a fresh token.
    RefreshToken { epoch: u64 },
    /// Send a text frame on the socket of `epoch`.
    SendText { epoch: u64, text: String },
    /// Close the socket of `epoch`.
    Disconnect {
        epoch: u64,
        code: u16,
        reason: String,
    },
    /// Arm the backoff timer.
    StartTimer { epoch: u64, delay: Duration },
    /// Disarm the backoff timer.
    CancelTimer,
    /// Hand decoded data to the consumer.
    Deliver(StreamData),
}

/// Observable state of one handle.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamSnapshot {
    pub kind: StreamKind,
    pub state: ConnectionState,
    /// Last decoded data (line streams: rolling window + latest point).
    pub data: Option<StreamData>,
    /// Human-readable error, if any.
    pub error: Option<String>,
    pub auth_retries: u32,
    pub generic_retries: u32,
    /// Interval requested on the next (re)connect.
    pub push_interval_ms: u64,
    /// Pending backoff delay while `Reconnecting`.
    pub reconnect_delay: Option<Duration>,
    /// Malformed or server error frames seen by this handle.
    pub protocol_errors: u64,
}

/// Explicit finite-state machine for one stream handle.
#[derive(Debug)]
pub struct ConnectionMachine {
    kind: StreamKind,
    enabled: bool,
    base_url: String,
    policy: ReconnectPolicy,
    state: ConnectionState,
    epoch: u64,
    token: Option<Token>,
    push_interval_ms: u64,
    auth_retries: u32,
    generic_retries: u32,
    /// Server accepted the current connection (first non-error frame seen).
    authenticated: bool,
    /// The pending attempt was started by an auth failure.
    retrying_auth: bool,
    timer_armed: bool,
    /// A `Connect` was issued for the current epoch and not yet closed.
    socket_live: bool,
    buffer: RollingBuffer<LinePoint>,
    data: Option<StreamData>,
    error: Option<String>,
    reconnect_delay: Option<Duration>,
    protocol_errors: u64,
}

impl ConnectionMachine {
    /// Create a machine for `subscription`, connecting under `base_url`.
    pub fn new(
        subscription: &Subscription,
        base_url: impl Into<String>,
        policy: ReconnectPolicy,
    ) -> Self {
        Self {
            kind: subscription.kind,
            enabled: subscription.enabled,
            base_url: base_url.into(),
            policy,
            state: ConnectionState::Idle,
            epoch: 0,
            token: None,
            push_interval_ms: subscription.push_interval_ms,
            auth_retries: 0,
            generic_retries: 0,
            authenticated: false,
            retrying_auth: false,
            timer_armed: false,
            socket_live: false,
            buffer: RollingBuffer::new(LINE_BUFFER_CAPACITY),
            data: None,
            error: None,
            reconnect_delay: None,
            protocol_errors: 0,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn kind(&self) -> StreamKind {
        self.kind
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn data(&self) -> Option<&StreamData> {
        self.data.as_ref()
    }

    pub fn buffer(&self) -> &RollingBuffer<LinePoint> {
        &self.buffer
    }

    pub fn auth_retries(&self) -> u32 {
        self.auth_retries
    }

    pub fn generic_retries(&self) -> u32 {
        self.generic_retries
    }

    pub fn push_interval_ms(&self) -> u64 {
        self.push_interval_ms
    }

    pub fn protocol_errors(&self) -> u64 {
        self.protocol_errors
    }

    /// Observable snapshot.
    pub fn snapshot(&self) -> StreamSnapshot {
        StreamSnapshot {
            kind: self.kind,
            state: self.state,
            data: self.data.clone(),
            error: self.error.clone(),
            auth_retries: self.auth_retries,
            generic_retries: self.generic_retries,
            push_interval_ms: self.push_interval_ms,
            reconnect_delay: self.reconnect_delay,
            protocol_errors: self.protocol_errors,
        }
    }

    /// Single entry point: apply one event and return the resulting commands.
    pub fn dispatch(&mut self, event: ConnectionEvent) -> Vec<Command> {
        let mut commands = Vec::new();

        if self.state == ConnectionState::Closed {
            debug!(kind = %self.kind, ?event, "Event after close ignored");
            return commands;
        }

        match event {
            ConnectionEvent::Open { token } => self.on_open(token, &mut commands),
            ConnectionEvent::TokenReady { epoch, result } => {
                self.on_token_ready(epoch, result, &mut commands)
            }
            ConnectionEvent::TransportOpened { epoch } => {
                self.on_transport_opened(epoch, &mut commands)
            }
            ConnectionEvent::TransportMessage { epoch, text } => {
                self.on_transport_message(epoch, &text, &mut commands)
            }
            ConnectionEvent::TransportError { epoch, message } => {
                if self.is_current(epoch) && self.state != ConnectionState::Closing {
                    warn!(kind = %self.kind, %message, "Transport error");
                    self.error = Some(format!("Connection error: {message}"));
                }
            }
            ConnectionEvent::TransportClosed {
                epoch,
                code,
                reason,
            } => self.on_transport_closed(epoch, code, &reason, &mut commands),
            ConnectionEvent::TimerFired { epoch } => self.on_timer_fired(epoch, &mut commands),
            ConnectionEvent::TokenChanged { token } => self.on_token_changed(token, &mut commands),
            ConnectionEvent::UpdateInterval { interval_ms } => {
                self.on_update_interval(interval_ms, &mut commands)
            }
            ConnectionEvent::Send { payload } => self.on_send(payload, &mut commands),
            ConnectionEvent::Reconnect { token } => self.on_reconnect(token, &mut commands),
            ConnectionEvent::Close => self.on_close(&mut commands),
            ConnectionEvent::CloseComplete => {
                if self.state == ConnectionState::Closing {
                    self.state = ConnectionState::Closed;
                    info!(kind = %self.kind, "Stream closed");
                }
            }
        }

        commands
    }

    // ------------------------------------------------------------------
    // Event handlers
    // ------------------------------------------------------------------

    fn on_open(&mut self, token: Option<Token>, commands: &mut Vec<Command>) {
        if self.state != ConnectionState::Idle {
            debug!(kind = %self.kind, state = %self.state, "Open ignored: already active");
            return;
        }
        if !self.enabled {
            debug!(kind = %self.kind, "Open ignored: subscription disabled");
            return;
        }
        if token.is_some() {
            self.token = token;
        }
        self.start_attempt(commands);
    }

    fn on_token_ready(
        &mut self,
        epoch: u64,
        result: Result<Token, AuthError>,
        commands: &mut Vec<Command>,
    ) {
        if !self.is_current(epoch)
            || !matches!(
                self.state,
                ConnectionState::Connecting | ConnectionState::Reconnecting
            )
        {
            return;
        }

        match result {
            Ok(token) => {
                debug!(kind = %self.kind, token = ?token, "Token ready");
                self.token = Some(token);
                self.state = ConnectionState::Connecting;
                self.issue_connect(commands);
            }
            Err(e) => {
                warn!(kind = %self.kind, error = %e, "Token unavailable");
                self.fail(AUTH_FAILED_MESSAGE, commands);
            }
        }
    }

    fn on_transport_opened(&mut self, epoch: u64, commands: &mut Vec<Command>) {
        if !self.is_current(epoch) || self.state != ConnectionState::Connecting {
            return;
        }

        self.state = ConnectionState::Connected;
        self.generic_retries = 0;
        // Auth failures only count while consecutive.
        if !self.retrying_auth {
            self.auth_retries = 0;
        }
        self.reconnect_delay = None;
        self.error = None;
        info!(kind = %self.kind, epoch, "Stream connected");

        if self.kind.is_chart() {
            commands.push(Command::SendText {
                epoch,
                text: IntervalUpdate {
                    interval_ms: self.push_interval_ms,
                }
                .to_json(),
            });
        }
    }

    fn on_transport_message(&mut self, epoch: u64, text: &str, commands: &mut Vec<Command>) {
        if !self.is_current(epoch) || self.state != ConnectionState::Connected {
            return;
        }

        match decode(self.kind, text) {
            Err(e) => {
                warn!(kind = %self.kind, error = %e, "Malformed message");
                self.protocol_errors += 1;
                self.error = Some(format!("Invalid message: {e}"));
            }
            Ok(StreamMessage::Error(message)) if is_auth_failure_text(&message) => {
                warn!(kind = %self.kind, %message, "Server rejected token");
                self.on_auth_failure(&message, commands);
            }
            Ok(StreamMessage::Error(message)) => {
                warn!(kind = %self.kind, %message, "Server error");
                self.protocol_errors += 1;
                self.error = Some(message);
            }
            Ok(StreamMessage::Status(status)) => {
                debug!(kind = %self.kind, %status, "Status acknowledgment");
                self.mark_authenticated();
            }
            Ok(StreamMessage::Payload(payload)) => {
                self.mark_authenticated();
                self.apply_payload(payload, commands);
            }
        }
    }

    fn on_transport_closed(
        &mut self,
        epoch: u64,
        code: u16,
        reason: &str,
        commands: &mut Vec<Command>,
    ) {
        if !self.is_current(epoch)
            || !matches!(
                self.state,
                ConnectionState::Connecting | ConnectionState::Connected
            )
        {
            return;
        }
        self.socket_live = false;

        match self.policy.classify_close(code, reason) {
            CloseClass::Normal => {
                info!(kind = %self.kind, code, reason, "Server closed stream normally");
                self.buffer.clear();
                self.state = ConnectionState::Closed;
            }
            CloseClass::Auth => {
                warn!(kind = %self.kind, code, reason, "Closed with authentication failure");
                self.on_auth_failure(reason, commands);
            }
            CloseClass::Transport => {
                warn!(kind = %self.kind, code, reason, "Connection lost");
                self.on_transport_failure(commands);
            }
        }
    }

    fn on_timer_fired(&mut self, epoch: u64, commands: &mut Vec<Command>) {
        if !self.is_current(epoch) || self.state != ConnectionState::Reconnecting {
            return;
        }
        self.timer_armed = false;
        self.reconnect_delay = None;
        debug!(kind = %self.kind, attempt = self.generic_retries, "Backoff elapsed, reconnecting");
        self.start_attempt(commands);
    }

    fn on_token_changed(&mut self, token: Option<Token>, commands: &mut Vec<Command>) {
        let Some(token) = token else {
            debug!(kind = %self.kind, "Token cleared, keeping current connection");
            return;
        };
        if self.token.as_ref() == Some(&token) {
            return;
        }
        self.token = Some(token);

        // Only an open (or opening) socket carries the stale token.
        if self.socket_live
            && matches!(
                self.state,
                ConnectionState::Connecting | ConnectionState::Connected
            )
        {
            info!(kind = %self.kind, "Token rotated, reopening stream");
            self.teardown_socket("token rotated", commands);
            self.start_attempt(commands);
        }
    }

    fn on_update_interval(&mut self, interval_ms: u64, commands: &mut Vec<Command>) {
        self.push_interval_ms = interval_ms;

        if self.kind.is_chart() && self.state == ConnectionState::Connected {
            debug!(kind = %self.kind, interval_ms, "Sending interval update");
            commands.push(Command::SendText {
                epoch: self.epoch,
                text: IntervalUpdate { interval_ms }.to_json(),
            });
        }
    }

    fn on_send(&mut self, payload: String, commands: &mut Vec<Command>) {
        if self.kind != StreamKind::Chat {
            self.error = Some(format!("Sending is not supported on {} streams", self.kind));
            return;
        }
        if self.state != ConnectionState::Connected {
            debug!(state = %self.state, "Send while not connected");
            self.error = Some(NOT_CONNECTED_MESSAGE.to_string());
            return;
        }

        match serde_json::to_string(&ChatRequest { message: payload }) {
            Ok(text) => commands.push(Command::SendText {
                epoch: self.epoch,
                text,
            }),
            Err(e) => self.error = Some(format!("Failed to encode message: {e}")),
        }
    }

    fn on_reconnect(&mut self, token: Option<Token>, commands: &mut Vec<Command>) {
        if !matches!(
            self.state,
            ConnectionState::Failed | ConnectionState::Reconnecting
        ) {
            debug!(kind = %self.kind, state = %self.state, "Reconnect ignored");
            return;
        }
        if token.is_some() {
            self.token = token;
        }

        info!(kind = %self.kind, "Manual reconnect");
        self.cancel_timer(commands);
        self.auth_retries = 0;
        self.generic_retries = 0;
        self.retrying_auth = false;
        self.error = None;
        self.start_attempt(commands);
    }

    fn on_close(&mut self, commands: &mut Vec<Command>) {
        match self.state {
            ConnectionState::Closing => {}
            ConnectionState::Idle => {
                self.epoch += 1;
                self.state = ConnectionState::Closed;
            }
            _ => {
                self.cancel_timer(commands);
                self.teardown_socket("client closed", commands);
                self.epoch += 1;
                self.buffer.clear();
                self.data = None;
                self.state = ConnectionState::Closing;
            }
        }
    }

    // ------------------------------------------------------------------
    // Failure policies
    // ------------------------------------------------------------------

    /// Refresh the token and retry immediately, up to the auth cap.
    fn on_auth_failure(&mut self, detail: &str, commands: &mut Vec<Command>) {
        self.teardown_socket("authentication failed", commands);
        self.auth_retries += 1;
        self.retrying_auth = true;

        if self.auth_retries >= self.policy.max_auth_retries {
            warn!(
                kind = %self.kind,
                attempts = self.auth_retries,
                detail,
                "Authentication retries exhausted"
            );
            self.fail(AUTH_FAILED_MESSAGE, commands);
            return;
        }

        self.epoch += 1;
        self.buffer.clear();
        self.authenticated = false;
        self.state = ConnectionState::Reconnecting;
        self.error = Some(AUTH_REFRESHING_MESSAGE.to_string());
        info!(kind = %self.kind, attempt = self.auth_retries, "Refreshing token before retry");
        commands.push(Command::RefreshToken { epoch: self.epoch });
    }

    /// Retry with exponential backoff, up to the generic cap.
    fn on_transport_failure(&mut self, commands: &mut Vec<Command>) {
        if self.generic_retries >= self.policy.max_generic_retries {
            warn!(
                kind = %self.kind,
                attempts = self.generic_retries,
                "Reconnection attempts exhausted"
            );
            self.fail(CONNECTION_LOST_MESSAGE, commands);
            return;
        }

        self.generic_retries += 1;
        self.retrying_auth = false;
        let delay = self.policy.backoff_delay(self.generic_retries);

        self.epoch += 1;
        self.buffer.clear();
        self.state = ConnectionState::Reconnecting;
        self.reconnect_delay = Some(delay);
        self.timer_armed = true;
        self.error = Some(format!(
            "Connection lost. Reconnecting in {} (attempt {}/{})",
            format_delay(delay),
            self.generic_retries,
            self.policy.max_generic_retries
        ));
        info!(
            kind = %self.kind,
            attempt = self.generic_retries,
            delay_ms = delay.as_millis() as u64,
            "Scheduling reconnect"
        );
        commands.push(Command::StartTimer {
            epoch: self.epoch,
            delay,
        });
    }

    fn fail(&mut self, message: &str, commands: &mut Vec<Command>) {
        self.cancel_timer(commands);
        self.teardown_socket("giving up", commands);
        self.epoch += 1;
        self.state = ConnectionState::Failed;
        self.error = Some(message.to_string());
    }

    // ------------------------------------------------------------------
    // Helpers
    // ------------------------------------------------------------------

    fn is_current(&self, epoch: u64) -> bool {
        if epoch == self.epoch {
            true
        } else {
            debug!(kind = %self.kind, epoch, current = self.epoch, "Stale event ignored");
            false
        }
    }

    /// Begin a fresh attempt: connect with the cached token or fetch one.
    fn start_attempt(&mut self, commands: &mut Vec<Command>) {
        self.epoch += 1;
        self.buffer.clear();
        if self.kind == StreamKind::Line {
            self.data = None;
        }
        self.authenticated = false;
        self.state = ConnectionState::Connecting;

        if self.token.is_some() {
            self.issue_connect(commands);
        } else {
            debug!(kind = %self.kind, "No cached token, requesting one");
            commands.push(Command::RefreshToken { epoch: self.epoch });
        }
    }

    fn issue_connect(&mut self, commands: &mut Vec<Command>) {
        let Some(token) = self.token.as_ref() else {
            return;
        };
        let url = stream_url(&self.base_url, self.kind, token);
        self.socket_live = true;
        commands.push(Command::Connect {
            epoch: self.epoch,
            url,
        });
    }

    fn teardown_socket(&mut self, reason: &str, commands: &mut Vec<Command>) {
        if self.socket_live {
            self.socket_live = false;
            commands.push(Command::Disconnect {
                epoch: self.epoch,
                code: CLOSE_NORMAL,
                reason: reason.to_string(),
            });
        }
    }

    fn cancel_timer(&mut self, commands: &mut Vec<Command>) {
        if self.timer_armed {
            self.timer_armed = false;
            self.reconnect_delay = None;
            commands.push(Command::CancelTimer);
        }
    }

    fn mark_authenticated(&mut self) {
        if !self.authenticated {
            self.authenticated = true;
            self.auth_retries = 0;
        }
    }

    fn apply_payload(&mut self, payload: StreamPayload, commands: &mut Vec<Command>) {
        let data = match payload {
            StreamPayload::Line(point) => {
                self.buffer.push(point.clone());
                StreamData::Line {
                    points: self.buffer.snapshot(),
                    latest_point: point,
                }
            }
            StreamPayload::Pie(pie) => StreamData::Pie(pie),
            StreamPayload::Bar(bars) => StreamData::Bar(bars),
            StreamPayload::Chat(message) => StreamData::Chat(message),
        };
        self.data = Some(data.clone());
        commands.push(Command::Deliver(data));
    }
}

/// Build the stream URL with the token as a query parameter.
pub fn stream_url(base_url: &str, kind: StreamKind, token: &Token) -> String {
    format!(
        "{}{}?token={}",
        base_url.trim_end_matches('/'),
        kind.path(),
        percent_encode(token.as_str())
    )
}

fn percent_encode(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for byte in raw.bytes() {
        if byte.is_ascii_alphanumeric() || matches!(byte, b'-' | b'.' | b'_' | b'~') {
            out.push(byte as char);
        } else {
            out.push_str(&format!("%{byte:02X}"));
        }
    }
    out
}

fn format_delay(delay: Duration) -> String {
    let millis = delay.as_millis();
    if millis % 1000 == 0 {
        format!("{}s", millis / 1000)
    } else {
        format!("{:.1}s", delay.as_secs_f64())
    }
}
