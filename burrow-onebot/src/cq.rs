// ABOUTME: Codec for the legacy inline-markup string form of messages ([CQ:type,k=v])
// ABOUTME: Uses OneBot entity escaping for literal brackets, ampersands and commas

use crate::message::Segment;
use std::collections::BTreeMap;

const OPEN: &str = "[CQ:";

/// Escapes plain text outside of codes.
pub fn escape_text(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('[', "&#91;")
        .replace(']', "&#93;")
}

/// Escapes a value inside a code, where commas are also significant.
pub fn escape_value(s: &str) -> String {
    escape_text(s).replace(',', "&#44;")
}

/// Reverses both escape forms. `&amp;` goes last so `&amp;#91;` stays literal.
pub fn unescape(s: &str) -> String {
    s.replace("&#91;", "[")
        .replace("&#93;", "]")
        .replace("&#44;", ",")
        .replace("&amp;", "&")
}

/// Renders segments as a CQ string.
pub fn encode(segments: &[Segment]) -> String {
    let mut out = String::new();
    for segment in segments {
        if let Some(text) = segment.as_text() {
            out.push_str(&escape_text(text));
            continue;
        }
        out.push_str(OPEN);
        out.push_str(&segment.kind);
        for (key, value) in &segment.data {
            out.push(',');
            out.push_str(key);
            out.push('=');
            out.push_str(&escape_value(value));
        }
        out.push(']');
    }
    out
}

/// Parses a CQ string into segments.
///
/// An unterminated `[CQ:` is kept as literal text. The string form cannot
/// mark where one text segment ends and the next begins, so adjacent text
/// runs come back as a single segment and empty text segments vanish.
/// `decode(encode(x)) == x` only holds for chains with no empty or
/// back-to-back text segments.
pub fn decode(raw: &str) -> Vec<Segment> {
    let mut segments = Vec::new();
    let mut text = String::new();
    let mut rest = raw;

    while let Some(start) = rest.find(OPEN) {
        let body = &rest[start + OPEN.len()..];
        let Some(end) = body.find(']') else {
            break;
        };
        text.push_str(&unescape(&rest[..start]));
        if !text.is_empty() {
            segments.push(Segment::text(std::mem::take(&mut text)));
        }
        segments.push(parse_code(&body[..end]));
        rest = &body[end + 1..];
    }

    text.push_str(&unescape(rest));
    if !text.is_empty() {
        segments.push(Segment::text(text));
    }
    segments
}

fn parse_code(inner: &str) -> Segment {
    let mut parts = inner.split(',');
    let kind = parts.next().unwrap_or_default().trim().to_string();
    let mut data = BTreeMap::new();
    for part in parts {
        match part.split_once('=') {
            Some((key, value)) => {
                data.insert(key.trim().to_string(), unescape(value));
            }
            None if !part.is_empty() => {
                data.insert(part.trim().to_string(), String::new());
            }
            None => {}
        }
    }
    Segment { kind, data }
}
