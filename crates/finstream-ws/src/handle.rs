//! Consumer-facing handle for one stream.

use crate::error::WsResult;
use crate::machine::{ConnectionState, StreamSnapshot};
use crate::message::StreamData;
use finstream_core::{validate_interval, StreamKind};
use std::fmt;
use tokio::sync::{mpsc, watch};

/// Identifier of a stream handle, unique per manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HandleId(pub u64);

impl fmt::Display for HandleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "stream-{}", self.0)
    }
}

/// Request from a handle to its driver task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandleCommand {
    UpdateInterval(u64),
    Send(String),
    Reconnect,
    Close,
}

/// Data update delivered to the consumer channel.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamUpdate {
    pub handle: HandleId,
    pub kind: StreamKind,
    pub data: StreamData,
}

/// Cheap, cloneable handle to a running stream.
///
/// Commands are fire-and-forget: once the stream is closed they are dropped.
#[derive(Debug, Clone)]
pub struct StreamHandle {
    id: HandleId,
    kind: StreamKind,
    commands: mpsc::UnboundedSender<HandleCommand>,
    snapshot: watch::Receiver<StreamSnapshot>,
}

impl StreamHandle {
    pub(crate) fn new(
        id: HandleId,
        kind: StreamKind,
        commands: mpsc::UnboundedSender<HandleCommand>,
        snapshot: watch::Receiver<StreamSnapshot>,
    ) -> Self {
        Self {
            id,
            kind,
            commands,
            snapshot,
        }
    }

    pub fn id(&self) -> HandleId {
        self.id
    }

    pub fn kind(&self) -> StreamKind {
        self.kind
    }

    pub fn state(&self) -> ConnectionState {
        self.snapshot.borrow().state
    }

    /// Latest published snapshot.
    pub fn snapshot(&self) -> StreamSnapshot {
        self.snapshot.borrow().clone()
    }

    pub fn error(&self) -> Option<String> {
        self.snapshot.borrow().error.clone()
    }

    pub fn data(&self) -> Option<StreamData> {
        self.snapshot.borrow().data.clone()
    }

    pub fn is_closed(&self) -> bool {
        self.state().is_terminal()
    }

    /// Watch receiver notified on every state transition.
    pub fn subscribe(&self) -> watch::Receiver<StreamSnapshot> {
        self.snapshot.clone()
    }

    /// Wait until a snapshot satisfies `predicate`.
    ///
    /// Returns `None` if the driver exits first without ever matching.
    pub async fn wait_for<F>(&self, mut predicate: F) -> Option<StreamSnapshot>
    where
        F: FnMut(&StreamSnapshot) -> bool,
    {
        let mut rx = self.snapshot.clone();
        let matched = match rx.wait_for(|s| predicate(s)).await {
            Ok(snapshot) => Some(snapshot.clone()),
            Err(_) => None,
        };
        matched
    }

    /// Wait until the handle reaches `state`.
    pub async fn wait_for_state(&self, state: ConnectionState) -> Option<StreamSnapshot> {
        self.wait_for(|s| s.state == state).await
    }

    /// Change the push interval. Rejected outside 500..=60000 ms.
    pub fn update_push_interval(&self, interval_ms: u64) -> WsResult<()> {
        validate_interval(interval_ms)?;
        self.command(HandleCommand::UpdateInterval(interval_ms));
        Ok(())
    }

    pub fn send(&self, message: impl Into<String>) {
        self.command(HandleCommand::Send(message.into()));
    }

    pub fn reconnect(&self) {
        self.command(HandleCommand::Reconnect);
    }

    pub fn close(&self) {
        self.command(HandleCommand::Close);
    }

    fn command(&self, command: HandleCommand) {
        // Driver already gone: the stream is closed.
        let _ = self.commands.send(command);
    }
}
