//! Core domain types for finstream.
//!
//! This crate provides the types shared by the streaming client:
//! - `StreamKind`, `Subscription`: what a consumer wants to stream
//! - `LinePoint`, `PieChartData`, `BarChartData`, `ChatMessage`: wire payloads
//! - `RollingBuffer`: fixed-capacity FIFO window for line charts
//! - `merge_chat_message`: chat log reducer for streamed assistant replies
//! - `Token`: bearer credential with redacted `Debug`

pub mod buffer;
pub mod chart;
pub mod chat;
pub mod error;
pub mod stream;
pub mod timestamp;
pub mod token;

pub use buffer::{RollingBuffer, LINE_BUFFER_CAPACITY};
pub use chart::{BarChartData, ChartBar, LinePoint, PieChartData, PieSlice};
pub use chat::{merge_chat_message, ChatMessage, ChatRequest, ChatSender};
pub use error::{CoreError, Result};
pub use stream::{
    validate_interval, IntervalUpdate, StreamKind, Subscription, DEFAULT_PUSH_INTERVAL_MS,
    MAX_PUSH_INTERVAL_MS, MIN_PUSH_INTERVAL_MS,
};
pub use token::Token;
