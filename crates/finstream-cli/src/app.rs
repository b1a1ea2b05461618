//! Main application orchestration.

use crate::config::AppConfig;
use crate::error::AppResult;
use crate::input::InputCommand;
use finstream_auth::{AuthClient, HttpTokenProvider};
use finstream_core::{merge_chat_message, ChatMessage, ChatSender, StreamKind, Token};
use finstream_telemetry::Metrics;
use finstream_ws::machine::AUTH_FAILED_MESSAGE;
use finstream_ws::{
    ConnectionManager, ConnectionState, StreamData, StreamHandle, StreamSnapshot, StreamUpdate,
    TungsteniteTransport,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// Capacity of the update channel between the manager and the renderer.
const UPDATE_CHANNEL_CAPACITY: usize = 256;
/// How long to wait for the socket to close on shutdown.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(2);

/// Main application.
pub struct Application {
    config: AppConfig,
    chat_log: Vec<ChatMessage>,
}

impl Application {
    pub fn new(config: AppConfig) -> AppResult<Self> {
        config.validate()?;
        Ok(Self {
            config,
            chat_log: Vec::new(),
        })
    }

    /// Run until `/quit`, Ctrl-C or the stream closing for good.
    pub async fn run(&mut self) -> AppResult<()> {
        let tokens = Arc::new(self.token_provider().await?);

        let (update_tx, mut update_rx) = mpsc::channel(UPDATE_CHANNEL_CAPACITY);
        let manager = ConnectionManager::new(
            self.config.connection_config(),
            Arc::new(TungsteniteTransport::new()),
            tokens,
            update_tx,
        );

        let handle = manager.open(self.config.subscription())?;
        info!(
            handle = %handle.id(),
            kind = %handle.kind(),
            ws_base_url = %self.config.ws_base_url,
            "Stream opened"
        );

        let mut snapshots = handle.subscribe();
        let mut tracker = StateTracker::new(handle.kind(), AUTH_FAILED_MESSAGE);
        tracker.observe(&snapshots.borrow_and_update());

        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        let mut stdin_open = true;

        loop {
            tokio::select! {
                Some(update) = update_rx.recv() => {
                    self.render(update);
                }

                changed = snapshots.changed() => {
                    if changed.is_err() {
                        debug!("Snapshot channel closed");
                        break;
                    }
                    let snapshot = snapshots.borrow_and_update().clone();
                    tracker.observe(&snapshot);
                    if snapshot.state == ConnectionState::Closed {
                        break;
                    }
                }

                line = lines.next_line(), if stdin_open => {
                    match line {
                        Ok(Some(line)) => {
                            if !self.handle_input(&manager, &handle, &line) {
                                break;
                            }
                        }
                        Ok(None) => {
                            debug!("Stdin closed, streaming until Ctrl-C");
                            stdin_open = false;
                        }
                        Err(e) => {
                            warn!(error = %e, "Failed to read stdin");
                            stdin_open = false;
                        }
                    }
                }

                _ = tokio::signal::ctrl_c() => {
                    info!("Received shutdown signal");
                    break;
                }
            }
        }

        manager.close(&handle);
        if tokio::time::timeout(CLOSE_TIMEOUT, handle.wait_for_state(ConnectionState::Closed))
            .await
            .is_err()
        {
            warn!("Timed out waiting for the stream to close");
        }
        manager.shutdown();

        info!("Application stopped");
        Ok(())
    }

    /// Build the token provider, logging in when only credentials are configured.
    async fn token_provider(&self) -> AppResult<HttpTokenProvider> {
        let auth = &self.config.auth;
        let mut provider = HttpTokenProvider::new(AuthClient::new(&self.config.api_base_url)?)
            .with_tokens(
                auth.access_token.clone().map(Token::new),
                auth.refresh_token.clone(),
            );

        if let Some(credentials) = auth.credentials() {
            provider = provider.with_credentials(credentials);
            if auth.access_token.is_none() {
                provider.login().await?;
            }
        } else if auth.access_token.is_none() && auth.refresh_token.is_none() {
            warn!("No token or credentials configured; the stream will fail to authenticate");
        }

        Ok(provider)
    }

    /// Apply one stdin line. Returns `false` to stop.
    fn handle_input(&self, manager: &ConnectionManager, handle: &StreamHandle, line: &str) -> bool {
        match InputCommand::parse(line) {
            InputCommand::Interval(ms) => {
                if !handle.kind().is_chart() {
                    warn!(kind = %handle.kind(), "Push interval only applies to chart streams");
                } else if let Err(e) = manager.update_push_interval(handle, ms) {
                    warn!(error = %e, "Interval rejected");
                } else {
                    info!(interval_ms = ms, "Push interval updated");
                }
            }
            InputCommand::Reconnect => {
                info!("Manual reconnect requested");
                manager.reconnect(handle);
            }
            InputCommand::Quit => return false,
            InputCommand::Chat(message) => {
                if handle.kind() == StreamKind::Chat {
                    manager.send(handle, message);
                } else {
                    warn!(kind = %handle.kind(), "Messages can only be sent on the chat stream");
                }
            }
            InputCommand::Empty => {}
            InputCommand::Invalid(reason) => warn!(%reason, "Ignoring input"),
        }
        true
    }

    fn render(&mut self, update: StreamUpdate) {
        Metrics::message_received(update.kind.as_str());

        match update.data {
            StreamData::Line {
                points,
                latest_point,
            } => {
                info!(
                    index = latest_point.index,
                    value = latest_point.value,
                    timestamp = %latest_point.timestamp,
                    buffered = points.len(),
                    "Line point"
                );
            }
            StreamData::Pie(pie) => {
                let largest = pie
                    .slices
                    .iter()
                    .max_by(|a, b| a.value.total_cmp(&b.value));
                info!(
                    slices = pie.slices.len(),
                    total = pie.total(),
                    largest = largest.map(|s| s.label.as_str()).unwrap_or("-"),
                    "Pie snapshot"
                );
            }
            StreamData::Bar(bar) => {
                let max = bar.max_bar();
                info!(
                    bars = bar.bars.len(),
                    max_label = max.map(|b| b.label.as_str()).unwrap_or("-"),
                    max_value = max.map(|b| b.value).unwrap_or_default(),
                    "Bar snapshot"
                );
            }
            StreamData::Chat(message) => {
                let complete = message.is_complete;
                let sender = message.sender;
                merge_chat_message(&mut self.chat_log, message);
                if complete {
                    if let Some(last) = self.chat_log.last() {
                        let who = match sender {
                            ChatSender::User => "you",
                            ChatSender::Assistant => "assistant",
                        };
                        info!(sender = who, message = %last.message, "Chat message");
                    }
                }
            }
        }
    }
}

/// Turns snapshot changes into metrics and log lines.
///
/// Snapshots are coalesced by the watch channel, so retry counters are
/// compared rather than assumed to move by one.
#[derive(Debug)]
struct StateTracker {
    kind: StreamKind,
    auth_failed_message: &'static str,
    state: Option<ConnectionState>,
    auth_retries: u32,
    generic_retries: u32,
    protocol_errors: u64,
}

impl StateTracker {
    fn new(kind: StreamKind, auth_failed_message: &'static str) -> Self {
        Self {
            kind,
            auth_failed_message,
            state: None,
            auth_retries: 0,
            generic_retries: 0,
            protocol_errors: 0,
        }
    }

    /// Record `snapshot`. Returns the new state when it changed.
    fn observe(&mut self, snapshot: &StreamSnapshot) -> Option<ConnectionState> {
        let kind = self.kind.as_str();

        if snapshot.auth_retries > self.auth_retries {
            Metrics::reconnect(kind, "auth");
        }
        if snapshot.generic_retries > self.generic_retries {
            Metrics::reconnect(kind, "transport");
        }
        self.auth_retries = snapshot.auth_retries;
        self.generic_retries = snapshot.generic_retries;

        if snapshot.protocol_errors > self.protocol_errors {
            Metrics::protocol_errors(kind, snapshot.protocol_errors - self.protocol_errors);
        }
        self.protocol_errors = snapshot.protocol_errors;

        if self.state == Some(snapshot.state) {
            return None;
        }
        self.state = Some(snapshot.state);
        Metrics::stream_state_set(kind, snapshot.state.as_str());

        match snapshot.state {
            ConnectionState::Failed => {
                let reason = if snapshot.error.as_deref() == Some(self.auth_failed_message) {
                    "auth"
                } else {
                    "transport"
                };
                Metrics::stream_failed(kind, reason);
                error!(
                    kind,
                    reason,
                    error = snapshot.error.as_deref().unwrap_or_default(),
                    "Stream failed; use /reconnect to try again"
                );
            }
            ConnectionState::Reconnecting => {
                warn!(
                    kind,
                    error = snapshot.error.as_deref().unwrap_or_default(),
                    "Stream reconnecting"
                );
            }
            state => info!(kind, state = %state, "Stream state changed"),
        }

        Some(snapshot.state)
    }
}
