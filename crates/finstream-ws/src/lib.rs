//! WebSocket stream manager for finstream chart and chat feeds.
//!
//! Provides authenticated streaming with:
//! - An explicit connection state machine (`ConnectionMachine::dispatch`)
//! - Token refresh and immediate retry on authentication failures
//! - Exponential backoff for generic transport failures
//! - Rolling line-chart buffer and per-kind payload decoding
//! - Epoch-guarded timers and callbacks, so nothing fires after close

pub mod connection;
pub mod error;
pub mod handle;
pub mod machine;
pub mod message;
pub mod policy;
pub mod token;
pub mod transport;

pub use connection::{ConnectionConfig, ConnectionManager};
pub use error::{WsError, WsResult};
pub use handle::{HandleCommand, HandleId, StreamHandle, StreamUpdate};
pub use machine::{Command, ConnectionEvent, ConnectionMachine, ConnectionState, StreamSnapshot};
pub use message::{decode, is_auth_failure_text, StreamData, StreamMessage, StreamPayload};
pub use policy::{CloseClass, ReconnectPolicy};
pub use token::{AuthError, BoxFuture, MemoryTokenProvider, TokenCell, TokenProvider};
pub use transport::{OutboundFrame, SocketLink, Transport, TransportEvent, TungsteniteTransport};

use std::sync::Once;

static INIT_CRYPTO: Once = Once::new();

/// Initialize the TLS crypto provider.
/// Must be called before any `wss://` connections are made.
pub fn init_crypto() {
    INIT_CRYPTO.call_once(|| {
        let _ = rustls::crypto::ring::default_provider().install_default();
    });
}
