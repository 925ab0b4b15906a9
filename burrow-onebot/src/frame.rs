// ABOUTME: Classifies inbound text frames into API responses, heartbeats and events
// ABOUTME: Also decodes the connection handshake that announces the bot's account id

use crate::api::ApiResponse;
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FrameError {
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("frame is not a JSON object")]
    NotAnObject,
    #[error("handshake carries no usable self_id")]
    MissingSelfId,
}

/// First frame of every connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Handshake {
    pub self_id: i64,
}

impl Handshake {
    pub fn parse(text: &str) -> Result<Self, FrameError> {
        let value: Value = serde_json::from_str(text)?;
        let self_id = value
            .get("self_id")
            .and_then(|v| match v {
                Value::Number(n) => n.as_i64(),
                Value::String(s) => s.parse().ok(),
                _ => None,
            })
            .filter(|id| *id != 0)
            .ok_or(FrameError::MissingSelfId)?;
        Ok(Self { self_id })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    /// Answer to an earlier API call; carries `echo`.
    Response(ApiResponse),
    /// `meta_event_type == "heartbeat"`, dropped by the read loop.
    Heartbeat,
    /// Anything else, handed on undecoded.
    Event(Value),
}

impl Frame {
    pub fn parse(text: &str) -> Result<Self, FrameError> {
        let value: Value = serde_json::from_str(text)?;
        let obj = value.as_object().ok_or(FrameError::NotAnObject)?;
        if obj.contains_key("echo") {
            return Ok(Frame::Response(ApiResponse::from_value(value)?));
        }
        if obj.get("meta_event_type").and_then(Value::as_str) == Some("heartbeat") {
            return Ok(Frame::Heartbeat);
        }
        Ok(Frame::Event(value))
    }
}
