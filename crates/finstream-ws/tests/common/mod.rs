//! Shared test doubles for finstream-ws integration tests.

#![allow(dead_code)]

pub mod mock_transport;
pub mod mock_ws;

use finstream_core::Token;
use finstream_ws::{AuthError, BoxFuture, TokenCell, TokenProvider};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// Line point frame as the backend sends it (naive UTC timestamp).
pub fn line_point(index: u64) -> String {
    format!(
        r#"{{"timestamp":"2024-05-01T12:00:{:02}.500000","value":{}.25,"index":{}}}"#,
        index % 60,
        100 + index,
        index
    )
}

/// Await `future`, failing the test if it takes longer than `secs`.
pub async fn within<F: std::future::Future>(secs: u64, future: F) -> F::Output {
    tokio::time::timeout(Duration::from_secs(secs), future)
        .await
        .expect("timed out")
}

/// Token provider handing out `tok-1`, `tok-2`, ... on each refresh.
pub struct CountingTokenProvider {
    cell: TokenCell,
    refreshes: AtomicUsize,
    fail_refresh: bool,
}

impl CountingTokenProvider {
    pub fn new(initial: Option<&str>) -> Self {
        Self {
            cell: TokenCell::new(initial.map(Token::new)),
            refreshes: AtomicUsize::new(0),
            fail_refresh: false,
        }
    }

    /// Provider whose refresh always fails.
    pub fn failing(initial: Option<&str>) -> Self {
        Self {
            fail_refresh: true,
            ..Self::new(initial)
        }
    }

    pub fn refresh_count(&self) -> usize {
        self.refreshes.load(Ordering::SeqCst)
    }

    /// Rotate the token as a background refresh would.
    pub fn rotate(&self, token: &str) {
        self.cell.set(Some(Token::new(token)));
    }
}

impl TokenProvider for CountingTokenProvider {
    fn current(&self) -> Option<Token> {
        self.cell.get()
    }

    fn refresh(&self) -> BoxFuture<'_, Result<Token, AuthError>> {
        Box::pin(async move {
            let n = self.refreshes.fetch_add(1, Ordering::SeqCst) + 1;
            if self.fail_refresh {
                return Err(AuthError::Rejected("refresh token revoked".to_string()));
            }
            let token = Token::new(format!("tok-{}", n + 1));
            self.cell.set(Some(token.clone()));
            Ok(token)
        })
    }

    fn changes(&self) -> tokio::sync::watch::Receiver<Option<Token>> {
        self.cell.subscribe()
    }
}
