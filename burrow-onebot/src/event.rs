// ABOUTME: Decoded inbound events with detail-type resolution and guild pseudo-id folding
// ABOUTME: Classifies events into the kinds modules subscribe to and works out "to me"

use crate::crc64;
use crate::cq;
use crate::message::{Message, Segment};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::fmt;

/// What a listener subscribes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EventKind {
    GroupMessage,
    PrivateMessage,
    GroupJoin,
    GroupQuit,
    GroupRequest,
    Unknown,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::GroupMessage => "group_message",
            EventKind::PrivateMessage => "private_message",
            EventKind::GroupJoin => "group_join",
            EventKind::GroupQuit => "group_quit",
            EventKind::GroupRequest => "group_request",
            EventKind::Unknown => "unknown",
        }
    }

    pub fn is_message(&self) -> bool {
        matches!(self, EventKind::GroupMessage | EventKind::PrivateMessage)
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Sender {
    #[serde(default, deserialize_with = "lenient_i64")]
    pub user_id: i64,
    #[serde(default)]
    pub nickname: String,
    #[serde(default)]
    pub card: String,
    /// `owner`, `admin` or `member` in groups.
    #[serde(default)]
    pub role: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub tiny_id: String,
}

impl Sender {
    pub fn is_group_admin(&self) -> bool {
        self.role == "admin" || self.role == "owner"
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Event {
    #[serde(default)]
    pub time: i64,
    #[serde(default, deserialize_with = "lenient_i64")]
    pub self_id: i64,
    #[serde(default)]
    pub post_type: String,
    #[serde(default)]
    pub message_type: String,
    #[serde(default)]
    pub notice_type: String,
    #[serde(default)]
    pub request_type: String,
    #[serde(default)]
    pub meta_event_type: String,
    #[serde(default)]
    pub sub_type: String,
    /// Set from the `*_type` field matching `post_type` during [`Event::decode`].
    #[serde(skip)]
    pub detail_type: String,
    /// Integer for ordinary chats, an opaque string on guild transports.
    #[serde(default)]
    pub message_id: Value,
    #[serde(default, deserialize_with = "lenient_i64")]
    pub user_id: i64,
    #[serde(default, deserialize_with = "lenient_i64")]
    pub group_id: i64,
    #[serde(default, deserialize_with = "lenient_i64")]
    pub target_id: i64,
    #[serde(default, deserialize_with = "lenient_i64")]
    pub operator_id: i64,
    #[serde(default, deserialize_with = "lenient_string")]
    pub guild_id: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub channel_id: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub tiny_id: String,
    #[serde(default, deserialize_with = "de_message")]
    pub message: Message,
    #[serde(default)]
    pub raw_message: String,
    #[serde(default)]
    pub sender: Sender,
    #[serde(default)]
    pub comment: String,
    #[serde(default)]
    pub flag: String,
    #[serde(skip)]
    pub is_to_me: bool,
}

impl Event {
    /// Decodes a raw event, resolves the detail type and folds guild ids.
    pub fn decode(value: Value) -> Result<Self, serde_json::Error> {
        let mut event: Event = serde_json::from_value(value)?;
        event.detail_type = match event.post_type.as_str() {
            "message" | "message_sent" => event.message_type.clone(),
            "notice" => event.notice_type.clone(),
            "request" => event.request_type.clone(),
            "meta_event" => event.meta_event_type.clone(),
            _ => String::new(),
        };
        if event.message_type == "guild" && event.message_id.as_i64().is_none() {
            event.fold_guild_ids();
        }
        Ok(event)
    }

    fn fold_guild_ids(&mut self) {
        self.group_id = crc64::pseudo_id_of(&[&self.guild_id, &self.channel_id]);
        let tiny = if self.tiny_id.is_empty() {
            self.sender.tiny_id.as_str()
        } else {
            self.tiny_id.as_str()
        };
        let user = crc64::pseudo_id_of(&[tiny]);
        self.user_id = user;
        self.sender.user_id = user;
    }

    pub fn kind(&self) -> EventKind {
        match (self.post_type.as_str(), self.detail_type.as_str()) {
            ("message", "group") => EventKind::GroupMessage,
            ("message", "guild") if self.sub_type == "channel" => EventKind::GroupMessage,
            ("message", "private") => EventKind::PrivateMessage,
            ("notice", "group_increase") => EventKind::GroupJoin,
            ("notice", "group_decrease") => EventKind::GroupQuit,
            ("request", "group") => EventKind::GroupRequest,
            _ => EventKind::Unknown,
        }
    }

    pub fn is_guild(&self) -> bool {
        self.detail_type == "guild"
    }

    /// The acting user: the sender block when present, otherwise `user_id`.
    pub fn sender_id(&self) -> i64 {
        if self.sender.user_id != 0 {
            self.sender.user_id
        } else {
            self.user_id
        }
    }

    pub fn plain_text(&self) -> String {
        self.message.plain_text()
    }

    /// Message id as text, suitable for a reply segment.
    pub fn reply_id(&self) -> Option<String> {
        match &self.message_id {
            Value::Number(n) => Some(n.to_string()),
            Value::String(s) if !s.is_empty() => Some(s.clone()),
            _ => None,
        }
    }

    /// Works out whether the event addresses the bot, normalising the message
    /// body on the way. Nickname prefixes are stripped from the first text.
    pub fn resolve_addressee(&mut self, nicknames: &[String]) {
        match self.post_type.as_str() {
            "message" => self.resolve_message_addressee(nicknames),
            "notice" => {
                self.is_to_me = if self.sub_type == "poke" || self.sub_type == "lucky_king" {
                    self.target_id == self.self_id
                } else {
                    self.user_id == self.self_id
                };
            }
            _ => {}
        }
    }

    fn resolve_message_addressee(&mut self, nicknames: &[String]) {
        self.message.normalize();
        let channel_like = self.detail_type == "group"
            || (self.detail_type == "guild" && self.sub_type == "channel");

        if channel_like {
            self.is_to_me = false;
            if self.message.first().and_then(Segment::mention) == Some(self.self_id) {
                self.message.0.remove(0);
                self.is_to_me = true;
            } else if self
                .message
                .iter()
                .any(|s| s.mention() == Some(self.self_id))
            {
                self.is_to_me = true;
            } else if let Some(first) = self.message.first_text_mut() {
                let trimmed = first.trim_start_matches(' ');
                match nicknames
                    .iter()
                    .find(|n| !n.is_empty() && trimmed.starts_with(n.as_str()))
                {
                    Some(nick) => {
                        *first = trimmed[nick.len()..].to_string();
                        self.is_to_me = true;
                    }
                    None => *first = trimmed.to_string(),
                }
            }
        } else {
            self.is_to_me = true;
        }

        if let Some(first) = self.message.first_text_mut() {
            *first = first.trim_start_matches(' ').to_string();
        }
        self.message.normalize();
    }
}

/// Accepts numbers, numeric strings and null; anything unparsable becomes 0.
fn lenient_i64<'de, D>(deserializer: D) -> Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_u64().map(|u| u as i64))
            .unwrap_or_default(),
        Value::String(s) => s.trim().parse().unwrap_or_default(),
        _ => 0,
    })
}

fn lenient_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::String(s) => s,
        Value::Null => String::new(),
        other => other.to_string(),
    })
}

/// Message bodies arrive either as a segment array or as a CQ string.
fn de_message<'de, D>(deserializer: D) -> Result<Message, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::String(s) => Ok(Message(cq::decode(&s))),
        Value::Null => Ok(Message::default()),
        other => serde_json::from_value(other).map_err(serde::de::Error::custom),
    }
}
