//! Transport abstraction: a raw duplex text-message channel.
//!
//! A transport starts one connection attempt per `connect` call, reports
//! what happens on an event channel, and accepts outbound frames through the
//! returned [`SocketLink`]. Dropping the link (or sending `Close`) ends the
//! attempt.

use crate::error::{WsError, WsResult};
use crate::policy::{CLOSE_ABNORMAL, CLOSE_NORMAL, CLOSE_NO_STATUS, CLOSE_POLICY_VIOLATION};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::{Error as TungsteniteError, Message};
use tokio_tungstenite::connect_async_tls_with_config;
use tracing::{debug, info, warn};

/// Event reported by a transport for one connection attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// Handshake completed.
    Opened,
    /// Text frame received.
    Message(String),
    /// Non-fatal or pre-close error.
    Error(String),
    /// Connection ended. Always the last event of an attempt.
    Closed { code: u16, reason: String },
}

/// Frame queued for sending.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboundFrame {
    Text(String),
    Close { code: u16, reason: String },
}

/// Outbound half of a connection attempt.
#[derive(Debug)]
pub struct SocketLink {
    outbound: mpsc::UnboundedSender<OutboundFrame>,
}

impl SocketLink {
    pub fn new(outbound: mpsc::UnboundedSender<OutboundFrame>) -> Self {
        Self { outbound }
    }

    /// Queue a text frame.
    pub fn send_text(&self, text: String) -> WsResult<()> {
        self.outbound
            .send(OutboundFrame::Text(text))
            .map_err(|_| WsError::SendFailed("socket is no longer running".to_string()))
    }

    /// Ask the socket to close. No-op if it already ended.
    pub fn close(&self, code: u16, reason: impl Into<String>) {
        let _ = self.outbound.send(OutboundFrame::Close {
            code,
            reason: reason.into(),
        });
    }
}

/// Raw duplex message channel factory.
pub trait Transport: Send + Sync {
    /// Start a connection attempt to `url`, reporting on `events`.
    fn connect(&self, url: &str, events: mpsc::UnboundedSender<TransportEvent>) -> SocketLink;
}

/// Transport backed by tokio-tungstenite. Each attempt runs in its own task.
#[derive(Debug, Clone, Copy, Default)]
pub struct TungsteniteTransport;

impl TungsteniteTransport {
    pub fn new() -> Self {
        Self
    }
}

impl Transport for TungsteniteTransport {
    fn connect(&self, url: &str, events: mpsc::UnboundedSender<TransportEvent>) -> SocketLink {
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        tokio::spawn(run_socket(url.to_string(), events, outbound_rx));
        SocketLink::new(outbound_tx)
    }
}

/// Map a handshake failure to a close code.
///
/// HTTP 401/403 during the upgrade is an authentication rejection.
fn classify_connect_error(error: &TungsteniteError) -> (u16, String) {
    match error {
        TungsteniteError::Http(response)
            if matches!(response.status().as_u16(), 401 | 403) =>
        {
            (
                CLOSE_POLICY_VIOLATION,
                format!("authentication failed: HTTP {}", response.status()),
            )
        }
        other => (CLOSE_ABNORMAL, other.to_string()),
    }
}

/// Redact the `token` query parameter for logging.
fn redact_url(url: &str) -> &str {
    url.split_once('?').map_or(url, |(base, _)| base)
}

async fn run_socket(
    url: String,
    events: mpsc::UnboundedSender<TransportEvent>,
    mut outbound: mpsc::UnboundedReceiver<OutboundFrame>,
) {
    debug!(url = %redact_url(&url), "Opening WebSocket");

    // TCP_NODELAY: chart pushes are tiny and latency-sensitive
    let connect = connect_async_tls_with_config(url.as_str(), None, true, None);
    tokio::pin!(connect);

    let result = loop {
        tokio::select! {
            result = &mut connect => break result,
            frame = outbound.recv() => match frame {
                Some(OutboundFrame::Text(_)) => {
                    debug!("Dropping frame queued before the socket opened");
                }
                Some(OutboundFrame::Close { .. }) | None => {
                    debug!(url = %redact_url(&url), "Connect cancelled");
                    return;
                }
            },
        }
    };

    let ws_stream = match result {
        Ok((ws_stream, _response)) => ws_stream,
        Err(e) => {
            let (code, reason) = classify_connect_error(&e);
            warn!(code, %reason, "WebSocket connect failed");
            let _ = events.send(TransportEvent::Error(e.to_string()));
            let _ = events.send(TransportEvent::Closed { code, reason });
            return;
        }
    };

    info!(url = %redact_url(&url), "WebSocket connected");
    if events.send(TransportEvent::Opened).is_err() {
        return;
    }

    let (mut write, mut read) = ws_stream.split();

    loop {
        tokio::select! {
            frame = outbound.recv() => {
                match frame {
                    Some(OutboundFrame::Text(text)) => {
                        if let Err(e) = write.send(Message::Text(text)).await {
                            warn!(?e, "WebSocket send failed");
                            let _ = events.send(TransportEvent::Error(e.to_string()));
                            let _ = events.send(TransportEvent::Closed {
                                code: CLOSE_ABNORMAL,
                                reason: e.to_string(),
                            });
                            return;
                        }
                    }
                    Some(OutboundFrame::Close { code, reason }) => {
                        debug!(code, %reason, "Closing WebSocket");
                        let frame = CloseFrame {
                            code: CloseCode::from(code),
                            reason: reason.into(),
                        };
                        if let Err(e) = write.send(Message::Close(Some(frame))).await {
                            debug!(?e, "Failed to send Close frame");
                        }
                        return;
                    }
                    None => {
                        // Link dropped by the owner: leave quietly.
                        let frame = CloseFrame {
                            code: CloseCode::from(CLOSE_NORMAL),
                            reason: "client gone".into(),
                        };
                        let _ = write.send(Message::Close(Some(frame))).await;
                        return;
                    }
                }
            }

            msg = read.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        if events.send(TransportEvent::Message(text)).is_err() {
                            return;
                        }
                    }
                    Some(Ok(Message::Binary(data))) => {
                        let event = match String::from_utf8(data) {
                            Ok(text) => TransportEvent::Message(text),
                            Err(_) => TransportEvent::Error("non-UTF-8 binary frame".to_string()),
                        };
                        if events.send(event).is_err() {
                            return;
                        }
                    }
                    Some(Ok(Message::Ping(data))) => {
                        debug!("Received ping, sending pong");
                        let _ = write.send(Message::Pong(data)).await;
                    }
                    Some(Ok(Message::Close(frame))) => {
                        let (code, reason) = frame
                            .map(|f| (f.code.into(), f.reason.to_string()))
                            .unwrap_or((CLOSE_NO_STATUS, String::new()));
                        info!(code, %reason, "WebSocket closed by server");
                        let _ = events.send(TransportEvent::Closed { code, reason });
                        return;
                    }
                    Some(Err(e)) => {
                        warn!(?e, "WebSocket read error");
                        let _ = events.send(TransportEvent::Error(e.to_string()));
                        let _ = events.send(TransportEvent::Closed {
                            code: CLOSE_ABNORMAL,
                            reason: e.to_string(),
                        });
                        return;
                    }
                    None => {
                        warn!("WebSocket stream ended");
                        let _ = events.send(TransportEvent::Closed {
                            code: CLOSE_ABNORMAL,
                            reason: "stream ended".to_string(),
                        });
                        return;
                    }
                    _ => {}
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_redact_url() {
        assert_eq!(
            redact_url("ws://localhost:8000/charts/ws/line?token=abc.def"),
            "ws://localhost:8000/charts/ws/line"
        );
        assert_eq!(redact_url("ws://host/chat/ws"), "ws://host/chat/ws");
    }

    #[test]
    fn test_link_reports_dead_socket() {
        let (tx, rx) = mpsc::unbounded_channel();
        let link = SocketLink::new(tx);
        assert!(link.send_text("hello".into()).is_ok());
        drop(rx);
        assert!(matches!(
            link.send_text("again".into()),
            Err(WsError::SendFailed(_))
        ));
        // Closing a dead link is a no-op.
        link.close(1000, "bye");
    }

    #[test]
    fn test_classify_connect_error_generic() {
        let (code, _) = classify_connect_error(&TungsteniteError::ConnectionClosed);
        assert_eq!(code, CLOSE_ABNORMAL);
    }
}
