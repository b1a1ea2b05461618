//! Mock WebSocket server for integration tests.
//!
//! Plays the backend's chart socket:
//! - Accepts connections and records the request URI (token included)
//! - Follows a per-connection script (reject with a close code, or stream points)
//! - Records received text frames

use super::line_point;
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::accept_hdr_async;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;

/// What the server does with one accepted connection.
#[derive(Debug, Clone)]
pub enum Script {
    /// Close immediately after the handshake.
    CloseWith(u16, &'static str),
    /// Wait for the first client frame, then send `n` line points and stay open.
    StreamLine(u64),
}

#[derive(Default)]
struct Shared {
    scripts: VecDeque<Script>,
    uris: Vec<String>,
    messages: Vec<String>,
    client_closes: Vec<u16>,
}

/// A mock WebSocket server for testing.
pub struct MockWsServer {
    addr: SocketAddr,
    shutdown_tx: mpsc::Sender<()>,
    shared: Arc<Mutex<Shared>>,
}

impl MockWsServer {
    /// Start a server that plays `scripts` in order, then `StreamLine(0)`.
    pub async fn start(scripts: Vec<Script>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let shared = Arc::new(Mutex::new(Shared {
            scripts: scripts.into(),
            ..Default::default()
        }));
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);

        let accept_shared = shared.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    Ok((stream, _)) = listener.accept() => {
                        tokio::spawn(handle_connection(stream, accept_shared.clone()));
                    }
                    _ = shutdown_rx.recv() => {
                        break;
                    }
                }
            }
        });

        Self {
            addr,
            shutdown_tx,
            shared,
        }
    }

    /// Base URL for `ConnectionConfig::ws_base_url`.
    pub fn url(&self) -> String {
        format!("ws://{}", self.addr)
    }

    pub fn connection_count(&self) -> usize {
        self.shared.lock().uris.len()
    }

    /// Request URIs in connection order.
    pub fn request_uris(&self) -> Vec<String> {
        self.shared.lock().uris.clone()
    }

    pub fn received_messages(&self) -> Vec<String> {
        self.shared.lock().messages.clone()
    }

    /// Close codes sent by the client.
    pub fn client_closes(&self) -> Vec<u16> {
        self.shared.lock().client_closes.clone()
    }

    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(()).await;
    }
}

async fn handle_connection(stream: TcpStream, shared: Arc<Mutex<Shared>>) {
    let record_shared = shared.clone();
    let callback = move |request: &Request, response: Response| -> Result<Response, ErrorResponse> {
        record_shared.lock().uris.push(request.uri().to_string());
        Ok(response)
    };

    let ws_stream = match accept_hdr_async(stream, callback).await {
        Ok(ws) => ws,
        Err(e) => {
            eprintln!("WebSocket handshake failed: {}", e);
            return;
        }
    };

    let script = shared
        .lock()
        .scripts
        .pop_front()
        .unwrap_or(Script::StreamLine(0));
    let (mut write, mut read) = ws_stream.split();

    if let Script::CloseWith(code, reason) = script {
        let frame = CloseFrame {
            code: CloseCode::from(code),
            reason: reason.into(),
        };
        let _ = write.send(Message::Close(Some(frame))).await;
        // Drain until the client acknowledges.
        while let Some(Ok(_)) = read.next().await {}
        return;
    }

    let mut pending_points = match script {
        Script::StreamLine(n) => Some(n),
        Script::CloseWith(..) => None,
    };

    while let Some(msg) = read.next().await {
        match msg {
            Ok(Message::Text(text)) => {
                shared.lock().messages.push(text.clone());
                if let Some(n) = pending_points.take() {
                    for index in 1..=n {
                        if write.send(Message::Text(line_point(index))).await.is_err() {
                            return;
                        }
                    }
                }
            }
            Ok(Message::Ping(data)) => {
                let _ = write.send(Message::Pong(data)).await;
            }
            Ok(Message::Close(frame)) => {
                let code = frame.map(|f| u16::from(f.code)).unwrap_or(1005);
                shared.lock().client_closes.push(code);
                break;
            }
            Err(_) => break,
            _ => {}
        }
    }
}
