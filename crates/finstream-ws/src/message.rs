//! Inbound stream message types and decoding.
//!
//! Every inbound frame is one of:
//! - `{"error": "..."}`: server-side rejection (auth or validation)
//! - `{"status": "...", ...}`: control acknowledgment
//! - a data payload whose shape depends on the stream kind

use crate::error::{WsError, WsResult};
use finstream_core::{BarChartData, ChatMessage, LinePoint, PieChartData, StreamKind};
use serde_json::Value;

/// Error text fragments that identify an authentication rejection.
const AUTH_FAILURE_PATTERNS: [&str; 3] = ["invalid token", "expired", "authentication failed"];

/// Decoded data payload, one variant per stream kind.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamPayload {
    Line(LinePoint),
    Pie(PieChartData),
    Bar(BarChartData),
    Chat(ChatMessage),
}

/// Decoded inbound frame.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamMessage {
    /// Data for the consumer.
    Payload(StreamPayload),
    /// Control acknowledgment (e.g. `{"status":"interval_updated","interval_ms":1000}`).
    Status(Value),
    /// Server-reported error.
    Error(String),
}

/// Data exposed to consumers.
///
/// Line streams expose the rolling window rather than the single point.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamData {
    Line {
        /// Rolling window, oldest first.
        points: Vec<LinePoint>,
        /// Point that produced this update.
        latest_point: LinePoint,
    },
    Pie(PieChartData),
    Bar(BarChartData),
    Chat(ChatMessage),
}

impl StreamData {
    /// Kind of stream this data belongs to.
    pub fn kind(&self) -> StreamKind {
        match self {
            Self::Line { .. } => StreamKind::Line,
            Self::Pie(_) => StreamKind::Pie,
            Self::Bar(_) => StreamKind::Bar,
            Self::Chat(_) => StreamKind::Chat,
        }
    }
}

/// Check if an error or close reason signals an authentication failure.
pub fn is_auth_failure_text(text: &str) -> bool {
    let lower = text.to_ascii_lowercase();
    AUTH_FAILURE_PATTERNS.iter().any(|p| lower.contains(p))
}

/// Decode a text frame received on a stream of the given kind.
pub fn decode(kind: StreamKind, text: &str) -> WsResult<StreamMessage> {
    let value: Value = serde_json::from_str(text)?;

    let Some(object) = value.as_object() else {
        return Err(WsError::Protocol(format!(
            "expected a JSON object, got {}",
            json_type_name(&value)
        )));
    };

    if let Some(error) = object.get("error") {
        let text = match error {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        return Ok(StreamMessage::Error(text));
    }

    if object.contains_key("status") {
        return Ok(StreamMessage::Status(value));
    }

    let payload = match kind {
        StreamKind::Line => StreamPayload::Line(serde_json::from_value(value)?),
        StreamKind::Pie => StreamPayload::Pie(serde_json::from_value(value)?),
        StreamKind::Bar => StreamPayload::Bar(serde_json::from_value(value)?),
        StreamKind::Chat => StreamPayload::Chat(serde_json::from_value(value)?),
    };
    Ok(StreamMessage::Payload(payload))
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
