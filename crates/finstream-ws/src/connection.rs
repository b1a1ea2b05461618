//! WebSocket connection manager.
//!
//! Each opened subscription gets a driver task that owns a
//! [`ConnectionMachine`], executes its commands against the [`Transport`] and
//! [`TokenProvider`], and publishes a [`StreamSnapshot`] after every step.

use crate::error::WsResult;
use crate::handle::{HandleCommand, HandleId, StreamHandle, StreamUpdate};
use crate::machine::{Command, ConnectionEvent, ConnectionMachine, ConnectionState, StreamSnapshot};
use crate::policy::{ReconnectPolicy, CLOSE_ABNORMAL, CLOSE_NORMAL};
use crate::token::{AuthError, TokenProvider};
use crate::transport::{SocketLink, Transport, TransportEvent};
use finstream_core::{Subscription, Token};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::future::pending;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Connection configuration.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// WebSocket base URL (e.g. `ws://localhost:8000`).
    pub ws_base_url: String,
    /// Retry limits and backoff.
    pub policy: ReconnectPolicy,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            ws_base_url: "ws://localhost:8000".to_string(),
            policy: ReconnectPolicy::default(),
        }
    }
}

#[derive(Debug)]
struct ActiveStream {
    subscription: Subscription,
    handle: StreamHandle,
}

/// Stream connection manager.
///
/// Holds at most one live handle: opening a subscription of another kind (or
/// toggling `enabled`) closes the previous one.
pub struct ConnectionManager {
    config: ConnectionConfig,
    transport: Arc<dyn Transport>,
    tokens: Arc<dyn TokenProvider>,
    update_tx: mpsc::Sender<StreamUpdate>,
    active: Mutex<Option<ActiveStream>>,
    next_id: AtomicU64,
    /// Cancellation token for graceful shutdown.
    shutdown_token: CancellationToken,
}

impl ConnectionManager {
    /// Create a new connection manager.
    ///
    /// Decoded data is delivered on `update_tx`. Updates that do not fit are
    /// dropped; the handle snapshot always carries the latest data.
    pub fn new(
        config: ConnectionConfig,
        transport: Arc<dyn Transport>,
        tokens: Arc<dyn TokenProvider>,
        update_tx: mpsc::Sender<StreamUpdate>,
    ) -> Self {
        Self {
            config,
            transport,
            tokens,
            update_tx,
            active: Mutex::new(None),
            next_id: AtomicU64::new(1),
            shutdown_token: CancellationToken::new(),
        }
    }

    /// Open a stream for `subscription`.
    ///
    /// Returns the existing handle if one for the same kind is still running.
    /// A `Failed` handle is reused and told to reconnect.
    pub fn open(&self, subscription: Subscription) -> WsResult<StreamHandle> {
        subscription.validate()?;
        let mut active = self.active.lock();

        if let Some(current) = active.as_mut() {
            let reusable = current.subscription.kind == subscription.kind
                && current.subscription.enabled
                && subscription.enabled
                && !current.handle.is_closed();

            if reusable {
                let handle = current.handle.clone();
                if handle.state() == ConnectionState::Failed {
                    handle.reconnect();
                }
                if current.subscription.push_interval_ms != subscription.push_interval_ms {
                    handle.update_push_interval(subscription.push_interval_ms)?;
                }
                debug!(handle = %handle.id(), kind = %subscription.kind, "Reusing open stream");
                current.subscription = subscription;
                return Ok(handle);
            }

            current.handle.close();
        }

        let handle = self.spawn_driver(&subscription);
        *active = Some(ActiveStream {
            subscription,
            handle: handle.clone(),
        });
        Ok(handle)
    }

    /// Close `handle`. Idempotent.
    pub fn close(&self, handle: &StreamHandle) {
        handle.close();
        let mut active = self.active.lock();
        if active.as_ref().is_some_and(|a| a.handle.id() == handle.id()) {
            *active = None;
        }
    }

    /// Change the push interval of `handle` (remembered across reconnects).
    pub fn update_push_interval(&self, handle: &StreamHandle, interval_ms: u64) -> WsResult<()> {
        handle.update_push_interval(interval_ms)?;
        if let Some(active) = self.active.lock().as_mut() {
            if active.handle.id() == handle.id() {
                active.subscription.push_interval_ms = interval_ms;
            }
        }
        Ok(())
    }

    /// Send a chat message. Errors surface on the handle's snapshot.
    pub fn send(&self, handle: &StreamHandle, payload: impl Into<String>) {
        handle.send(payload);
    }

    /// Retry a failed (or backing-off) handle from scratch.
    pub fn reconnect(&self, handle: &StreamHandle) {
        handle.reconnect();
    }

    /// Toggle the active subscription.
    ///
    /// Disabling closes the live handle; enabling opens a new one.
    pub fn set_enabled(&self, enabled: bool) -> WsResult<Option<StreamHandle>> {
        let subscription = {
            let active = self.active.lock();
            match active.as_ref() {
                Some(current) if current.subscription.enabled != enabled => {
                    current.subscription.clone().with_enabled(enabled)
                }
                other => return Ok(other.map(|a| a.handle.clone())),
            }
        };
        self.open(subscription).map(Some)
    }

    /// Currently active handle, if any.
    pub fn handle(&self) -> Option<StreamHandle> {
        self.active.lock().as_ref().map(|a| a.handle.clone())
    }

    /// Close every stream owned by this manager.
    pub fn shutdown(&self) {
        info!("Shutting down connection manager");
        self.shutdown_token.cancel();
        self.active.lock().take();
    }

    fn spawn_driver(&self, subscription: &Subscription) -> StreamHandle {
        let id = HandleId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let machine = ConnectionMachine::new(
            subscription,
            self.config.ws_base_url.clone(),
            self.config.policy.clone(),
        );

        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (snapshot_tx, snapshot_rx) = watch::channel(machine.snapshot());
        let mut token_changes = self.tokens.changes();
        let _ = token_changes.borrow_and_update();

        let driver = Driver {
            id,
            machine,
            transport: self.transport.clone(),
            tokens: self.tokens.clone(),
            commands: cmd_rx,
            updates: self.update_tx.clone(),
            snapshot: snapshot_tx,
            token_changes,
            watch_tokens: true,
            socket: None,
            refresh: None,
            timer: None,
            shutdown: self.shutdown_token.child_token(),
        };

        info!(handle = %id, kind = %subscription.kind, "Opening stream");
        tokio::spawn(driver.run());
        StreamHandle::new(id, subscription.kind, cmd_tx, snapshot_rx)
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        self.shutdown_token.cancel();
    }
}

/// Socket attempt owned by the driver.
struct LiveSocket {
    epoch: u64,
    link: SocketLink,
    events: mpsc::UnboundedReceiver<TransportEvent>,
}

/// In-flight token refresh.
struct RefreshTask {
    epoch: u64,
    task: JoinHandle<Result<Token, AuthError>>,
}

/// Why the driver loop woke up.
enum Wake {
    Command(Option<HandleCommand>),
    Socket(u64, Option<TransportEvent>),
    Token(u64, Result<Token, AuthError>),
    Timer(u64),
    TokenChanged(Option<Token>),
    TokenSourceGone,
    Shutdown,
}

struct Driver {
    id: HandleId,
    machine: ConnectionMachine,
    transport: Arc<dyn Transport>,
    tokens: Arc<dyn TokenProvider>,
    commands: mpsc::UnboundedReceiver<HandleCommand>,
    updates: mpsc::Sender<StreamUpdate>,
    snapshot: watch::Sender<StreamSnapshot>,
    token_changes: watch::Receiver<Option<Token>>,
    watch_tokens: bool,
    socket: Option<LiveSocket>,
    refresh: Option<RefreshTask>,
    /// At most one backoff deadline.
    timer: Option<(u64, Instant)>,
    shutdown: CancellationToken,
}

impl Driver {
    async fn run(mut self) {
        let token = self.tokens.current();
        self.process(ConnectionEvent::Open { token });

        while self.machine.state() != ConnectionState::Closed {
            let event = match self.next_wake().await {
                Wake::Command(Some(command)) => self.command_event(command),
                // Every handle and the manager are gone.
                Wake::Command(None) | Wake::Shutdown => ConnectionEvent::Close,
                Wake::Socket(epoch, event) => self.socket_event(epoch, event),
                Wake::Token(epoch, result) => {
                    self.refresh = None;
                    ConnectionEvent::TokenReady { epoch, result }
                }
                Wake::Timer(epoch) => {
                    self.timer = None;
                    ConnectionEvent::TimerFired { epoch }
                }
                Wake::TokenChanged(token) => ConnectionEvent::TokenChanged { token },
                Wake::TokenSourceGone => {
                    debug!(handle = %self.id, "Token provider dropped its watch channel");
                    self.watch_tokens = false;
                    continue;
                }
            };
            self.process(event);
        }

        self.teardown();
        debug!(handle = %self.id, "Driver exited");
    }

    async fn next_wake(&mut self) -> Wake {
        let timer = self.timer;
        tokio::select! {
            biased;

            _ = self.shutdown.cancelled() => Wake::Shutdown,

            command = self.commands.recv() => Wake::Command(command),

            (epoch, event) = recv_socket(&mut self.socket) => Wake::Socket(epoch, event),

            (epoch, result) = join_refresh(&mut self.refresh) => Wake::Token(epoch, result),

            epoch = sleep_until(timer) => Wake::Timer(epoch),

            changed = self.token_changes.changed(), if self.watch_tokens => match changed {
                Ok(()) => Wake::TokenChanged(self.token_changes.borrow_and_update().clone()),
                Err(_) => Wake::TokenSourceGone,
            },
        }
    }

    fn command_event(&self, command: HandleCommand) -> ConnectionEvent {
        match command {
            HandleCommand::UpdateInterval(interval_ms) => {
                ConnectionEvent::UpdateInterval { interval_ms }
            }
            HandleCommand::Send(payload) => ConnectionEvent::Send { payload },
            HandleCommand::Reconnect => ConnectionEvent::Reconnect {
                token: self.tokens.current(),
            },
            HandleCommand::Close => ConnectionEvent::Close,
        }
    }

    fn socket_event(&mut self, epoch: u64, event: Option<TransportEvent>) -> ConnectionEvent {
        match event {
            Some(TransportEvent::Opened) => ConnectionEvent::TransportOpened { epoch },
            Some(TransportEvent::Message(text)) => ConnectionEvent::TransportMessage { epoch, text },
            Some(TransportEvent::Error(message)) => {
                ConnectionEvent::TransportError { epoch, message }
            }
            Some(TransportEvent::Closed { code, reason }) => {
                self.socket = None;
                ConnectionEvent::TransportClosed {
                    epoch,
                    code,
                    reason,
                }
            }
            None => {
                self.socket = None;
                ConnectionEvent::TransportClosed {
                    epoch,
                    code: CLOSE_ABNORMAL,
                    reason: "transport ended without a close".to_string(),
                }
            }
        }
    }

    /// Dispatch `event` and everything it causes, publishing after each step.
    fn process(&mut self, event: ConnectionEvent) {
        let mut queue = VecDeque::from([event]);

        while let Some(event) = queue.pop_front() {
            let before = self.machine.state();
            for command in self.machine.dispatch(event) {
                self.execute(command);
            }

            let after = self.machine.state();
            if before != after {
                debug!(handle = %self.id, from = %before, to = %after, "State transition");
            }
            if after == ConnectionState::Closing {
                self.teardown();
                queue.push_back(ConnectionEvent::CloseComplete);
            }

            self.snapshot.send_replace(self.machine.snapshot());
        }
    }

    fn execute(&mut self, command: Command) {
        match command {
            Command::Connect { epoch, url } => {
                if let Some(old) = self.socket.take() {
                    old.link.close(CLOSE_NORMAL, "superseded");
                }
                let (events_tx, events_rx) = mpsc::unbounded_channel();
                let link = self.transport.connect(&url, events_tx);
                self.socket = Some(LiveSocket {
                    epoch,
                    link,
                    events: events_rx,
                });
            }
            Command::RefreshToken { epoch } => {
                if let Some(old) = self.refresh.take() {
                    old.task.abort();
                }
                let tokens = self.tokens.clone();
                let task = tokio::spawn(async move { tokens.refresh().await });
                self.refresh = Some(RefreshTask { epoch, task });
            }
            Command::SendText { epoch, text } => match &self.socket {
                Some(socket) if socket.epoch == epoch => {
                    if let Err(e) = socket.link.send_text(text) {
                        warn!(handle = %self.id, error = %e, "Outbound frame dropped");
                    }
                }
                _ => debug!(handle = %self.id, epoch, "No socket for outbound frame"),
            },
            Command::Disconnect {
                epoch,
                code,
                reason,
            } => {
                if self.socket.as_ref().is_some_and(|s| s.epoch == epoch) {
                    if let Some(socket) = self.socket.take() {
                        socket.link.close(code, reason);
                    }
                }
            }
            Command::StartTimer { epoch, delay } => {
                self.timer = Some((epoch, Instant::now() + delay));
            }
            Command::CancelTimer => {
                self.timer = None;
            }
            Command::Deliver(data) => {
                let update = StreamUpdate {
                    handle: self.id,
                    kind: self.machine.kind(),
                    data,
                };
                // The snapshot still carries the latest data.
                match self.updates.try_send(update) {
                    Ok(()) => {}
                    Err(TrySendError::Full(_)) => {
                        warn!(handle = %self.id, "Update channel full, dropping update");
                    }
                    Err(TrySendError::Closed(_)) => {
                        debug!(handle = %self.id, "Update receiver dropped");
                    }
                }
            }
        }
    }

    /// Release every resource tied to the current attempt.
    fn teardown(&mut self) {
        self.timer = None;
        if let Some(refresh) = self.refresh.take() {
            refresh.task.abort();
        }
        if let Some(socket) = self.socket.take() {
            socket.link.close(CLOSE_NORMAL, "client closed");
        }
    }
}

async fn recv_socket(socket: &mut Option<LiveSocket>) -> (u64, Option<TransportEvent>) {
    match socket {
        Some(socket) => (socket.epoch, socket.events.recv().await),
        None => pending().await,
    }
}

async fn join_refresh(refresh: &mut Option<RefreshTask>) -> (u64, Result<Token, AuthError>) {
    match refresh {
        Some(refresh) => {
            let result = match (&mut refresh.task).await {
                Ok(result) => result,
                Err(e) => Err(AuthError::RefreshFailed(e.to_string())),
            };
            (refresh.epoch, result)
        }
        None => pending().await,
    }
}

async fn sleep_until(timer: Option<(u64, Instant)>) -> u64 {
    match timer {
        Some((epoch, deadline)) => {
            tokio::time::sleep_until(deadline).await;
            epoch
        }
        None => pending().await,
    }
}
