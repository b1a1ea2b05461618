//! HTTP token provider for finstream streams.
//!
//! Talks to the backend's `/auth/login` and `/auth/refresh` endpoints and
//! exposes the resulting access token through [`finstream_ws::TokenProvider`].

pub mod client;
pub mod error;
pub mod provider;

pub use client::{AuthClient, TokenResponse};
pub use error::{AuthClientError, AuthClientResult};
pub use provider::{Credentials, HttpTokenProvider};
