//! In-memory transport: each `connect` hands the test both ends of the socket.

use finstream_ws::{OutboundFrame, SocketLink, Transport, TransportEvent};
use tokio::sync::mpsc;

/// One connection attempt, driven by the test.
pub struct MockSocket {
    pub url: String,
    events: mpsc::UnboundedSender<TransportEvent>,
    outbound: mpsc::UnboundedReceiver<OutboundFrame>,
}

impl MockSocket {
    pub fn open(&self) {
        let _ = self.events.send(TransportEvent::Opened);
    }

    pub fn message(&self, text: impl Into<String>) {
        let _ = self.events.send(TransportEvent::Message(text.into()));
    }

    pub fn close(&self, code: u16, reason: &str) {
        let _ = self.events.send(TransportEvent::Closed {
            code,
            reason: reason.to_string(),
        });
    }

    /// Next frame the client sent on this socket.
    pub async fn next_frame(&mut self) -> Option<OutboundFrame> {
        self.outbound.recv().await
    }

    /// Next frame, if one is already queued.
    pub fn try_frame(&mut self) -> Option<OutboundFrame> {
        self.outbound.try_recv().ok()
    }

    /// Check if the client dropped its event receiver for this attempt.
    pub fn is_abandoned(&self) -> bool {
        self.events.is_closed()
    }
}

/// Transport that reports every connection attempt on a channel.
pub struct MockTransport {
    attempts: mpsc::UnboundedSender<MockSocket>,
}

impl MockTransport {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<MockSocket>) {
        let (attempts, rx) = mpsc::unbounded_channel();
        (Self { attempts }, rx)
    }
}

impl Transport for MockTransport {
    fn connect(&self, url: &str, events: mpsc::UnboundedSender<TransportEvent>) -> SocketLink {
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let _ = self.attempts.send(MockSocket {
            url: url.to_string(),
            events,
            outbound: outbound_rx,
        });
        SocketLink::new(outbound_tx)
    }
}
