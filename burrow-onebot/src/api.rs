// ABOUTME: Outbound API call envelope and the matching response, correlated by `echo`
// ABOUTME: Includes builders for the actions the runtime itself issues

use crate::message::Message;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ApiRequest {
    pub action: String,
    pub params: Value,
    /// Filled in by the connection right before the write.
    pub echo: u64,
}

impl ApiRequest {
    pub fn new(action: impl Into<String>, params: Value) -> Self {
        Self {
            action: action.into(),
            params,
            echo: 0,
        }
    }

    pub fn send_group_msg(group_id: i64, message: &Message) -> Self {
        Self::new(
            "send_group_msg",
            json!({ "group_id": group_id, "message": message }),
        )
    }

    pub fn send_private_msg(user_id: i64, message: &Message) -> Self {
        Self::new(
            "send_private_msg",
            json!({ "user_id": user_id, "message": message }),
        )
    }

    pub fn send_guild_channel_msg(guild_id: &str, channel_id: &str, message: &Message) -> Self {
        Self::new(
            "send_guild_channel_msg",
            json!({ "guild_id": guild_id, "channel_id": channel_id, "message": message }),
        )
    }

    pub fn set_group_whole_ban(group_id: i64, enable: bool) -> Self {
        Self::new(
            "set_group_whole_ban",
            json!({ "group_id": group_id, "enable": enable }),
        )
    }
}

/// Response to an [`ApiRequest`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ApiResponse {
    pub status: String,
    pub retcode: i64,
    pub data: Value,
    /// `message`, falling back to the older `msg` field.
    pub message: String,
    pub wording: String,
    pub echo: u64,
}

#[derive(Deserialize)]
struct RawResponse {
    #[serde(default)]
    status: String,
    #[serde(default)]
    retcode: i64,
    #[serde(default)]
    data: Value,
    #[serde(default)]
    message: String,
    #[serde(default)]
    msg: String,
    #[serde(default)]
    wording: String,
    #[serde(default)]
    echo: Value,
}

impl ApiResponse {
    pub fn from_value(value: Value) -> Result<Self, serde_json::Error> {
        let raw: RawResponse = serde_json::from_value(value)?;
        let message = if raw.message.is_empty() {
            raw.msg
        } else {
            raw.message
        };
        Ok(Self {
            status: raw.status,
            retcode: raw.retcode,
            data: raw.data,
            message,
            wording: raw.wording,
            echo: echo_number(&raw.echo).unwrap_or_default(),
        })
    }

    pub fn is_ok(&self) -> bool {
        self.retcode == 0 && (self.status.is_empty() || self.status == "ok" || self.status == "async")
    }

    pub fn message_id(&self) -> Option<i64> {
        self.data.get("message_id").and_then(Value::as_i64)
    }
}

/// Gateways echo the value back verbatim; some stringify it.
pub fn echo_number(echo: &Value) -> Option<u64> {
    match echo {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}
