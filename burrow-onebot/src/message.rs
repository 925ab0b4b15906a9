// ABOUTME: Message segments in OneBot array form plus helpers for building outbound chains
// ABOUTME: Handles plain-text extraction and whitespace normalisation around mentions

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::ops::Deref;

/// A single `{"type": ..., "data": {...}}` element of a message.
///
/// Data values are kept as strings. The array form sometimes carries numbers
/// (`"qq": 12345`), so deserialisation stringifies scalars.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Segment {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, deserialize_with = "de_data")]
    pub data: BTreeMap<String, String>,
}

impl Segment {
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            data: BTreeMap::new(),
        }
    }

    /// Builder-style data setter.
    pub fn with(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.data.insert(key.into(), value.to_string());
        self
    }

    pub fn text(text: impl Into<String>) -> Self {
        Self::new("text").with("text", text.into())
    }

    pub fn at(user_id: i64) -> Self {
        Self::new("at").with("qq", user_id)
    }

    pub fn reply(message_id: impl ToString) -> Self {
        Self::new("reply").with("id", message_id)
    }

    pub fn image(file: impl Into<String>) -> Self {
        Self::new("image").with("file", file.into())
    }

    pub fn face(id: i64) -> Self {
        Self::new("face").with("id", id)
    }

    pub fn is_text(&self) -> bool {
        self.kind == "text"
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.data.get(key).map(String::as_str)
    }

    /// Text content for `text` segments, `None` for everything else.
    pub fn as_text(&self) -> Option<&str> {
        if self.is_text() {
            self.get("text")
        } else {
            None
        }
    }

    /// Mention target for `at` segments. `None` for `at` all and non-mentions.
    pub fn mention(&self) -> Option<i64> {
        if self.kind == "at" {
            self.get("qq").and_then(|v| v.parse().ok())
        } else {
            None
        }
    }
}

fn de_data<'de, D>(deserializer: D) -> Result<BTreeMap<String, String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let raw: Option<BTreeMap<String, serde_json::Value>> = Option::deserialize(deserializer)?;
    Ok(raw
        .unwrap_or_default()
        .into_iter()
        .filter_map(|(k, v)| {
            let v = match v {
                serde_json::Value::String(s) => s,
                serde_json::Value::Null => return None,
                other => other.to_string(),
            };
            Some((k, v))
        })
        .collect())
}

/// An ordered list of segments.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Message(pub Vec<Segment>);

impl Message {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, segment: Segment) {
        self.0.push(segment);
    }

    pub fn into_segments(self) -> Vec<Segment> {
        self.0
    }

    /// Builds an outbound chain, inserting a single space after each mention
    /// unless the next segment is text that already starts with one.
    pub fn chain(segments: impl IntoIterator<Item = Segment>) -> Self {
        let segments: Vec<Segment> = segments.into_iter().collect();
        let mut out = Vec::with_capacity(segments.len() * 2);
        let mut iter = segments.into_iter().peekable();
        while let Some(segment) = iter.next() {
            let is_at = segment.kind == "at";
            out.push(segment);
            if !is_at {
                continue;
            }
            let spaced = iter
                .peek()
                .and_then(Segment::as_text)
                .is_some_and(|t| t.starts_with(' '));
            if !spaced {
                out.push(Segment::text(" "));
            }
        }
        Self(out)
    }

    /// Concatenation of all text segments.
    pub fn plain_text(&self) -> String {
        self.0.iter().filter_map(Segment::as_text).collect()
    }

    /// Left-trims the text following each mention and drops empty text segments.
    pub fn normalize(&mut self) {
        let mut after_at = false;
        for segment in &mut self.0 {
            if segment.is_text() {
                if after_at {
                    if let Some(text) = segment.data.get_mut("text") {
                        *text = text.trim_start_matches(' ').to_string();
                    }
                }
                after_at = false;
            } else {
                after_at = segment.kind == "at";
            }
        }
        self.0
            .retain(|s| !s.is_text() || s.as_text().is_some_and(|t| !t.is_empty()));
    }

    /// First text segment, if the message starts with one.
    pub fn first_text_mut(&mut self) -> Option<&mut String> {
        let first = self.0.first_mut()?;
        if !first.is_text() {
            return None;
        }
        first.data.get_mut("text")
    }
}

impl Deref for Message {
    type Target = [Segment];

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl From<Vec<Segment>> for Message {
    fn from(segments: Vec<Segment>) -> Self {
        Self(segments)
    }
}

impl From<Segment> for Message {
    fn from(segment: Segment) -> Self {
        Self(vec![segment])
    }
}

impl From<&str> for Message {
    fn from(text: &str) -> Self {
        Self(vec![Segment::text(text)])
    }
}

impl From<String> for Message {
    fn from(text: String) -> Self {
        Self(vec![Segment::text(text)])
    }
}

impl FromIterator<Segment> for Message {
    fn from_iter<I: IntoIterator<Item = Segment>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl<'a> IntoIterator for &'a Message {
    type Item = &'a Segment;
    type IntoIter = std::slice::Iter<'a, Segment>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

/// Renders the legacy CQ string form.
impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&crate::cq::encode(&self.0))
    }
}
