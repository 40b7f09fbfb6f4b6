//! Wire payload decoding and validation

use serde_json::{Map, Value};

/// Severity kinds recognized on the wire
///
/// Anything outside this set is treated as an unknown kind and the request
/// carrying it is dropped without dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Success,
    Info,
    Warning,
    Error,
    FatalError,
}

impl Severity {
    /// Parse the wire-level `type` field
    pub fn from_wire(s: &str) -> Option<Self> {
        match s {
            "success" => Some(Severity::Success),
            "info" => Some(Severity::Info),
            "warning" => Some(Severity::Warning),
            "error" => Some(Severity::Error),
            "fatalerror" => Some(Severity::FatalError),
            _ => None,
        }
    }

    pub fn as_wire(&self) -> &'static str {
        match self {
            Severity::Success => "success",
            Severity::Info => "info",
            Severity::Warning => "warning",
            Severity::Error => "error",
            Severity::FatalError => "fatalerror",
        }
    }
}

/// A validated notification ready for dispatch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationRequest {
    pub severity: Severity,
    pub message: String,
    pub description: Option<String>,
}

/// Decode a request body into a loose key-value map.
///
/// A body that parses as a JSON object wins. Anything else (malformed JSON,
/// a JSON scalar, an empty body) falls back to form decoding, which never
/// fails — the worst case is an empty map.
pub fn decode_payload(body: &[u8]) -> Map<String, Value> {
    if let Ok(Value::Object(map)) = serde_json::from_slice(body) {
        return map;
    }
    parse_form(&String::from_utf8_lossy(body))
}

/// Parse flat `key=value&key=value` text.
///
/// Pairs without `=` or with an empty key are skipped; `+` decodes as space
/// and percent-escapes are resolved. Undecodable escapes keep the raw text.
/// A key seen more than once collects its values into an array, which no
/// longer looks like a string field and therefore fails validation.
fn parse_form(text: &str) -> Map<String, Value> {
    let mut map = Map::new();
    for pair in text.split('&') {
        let Some((key, value)) = pair.split_once('=') else {
            continue;
        };
        if key.is_empty() {
            continue;
        }
        let key = decode_component(key);
        let value = Value::String(decode_component(value));
        match map.get_mut(&key) {
            Some(Value::Array(values)) => values.push(value),
            Some(existing) => {
                let first = existing.take();
                *existing = Value::Array(vec![first, value]);
            }
            None => {
                map.insert(key, value);
            }
        }
    }
    map
}

fn decode_component(raw: &str) -> String {
    let unplussed = raw.replace('+', " ");
    match urlencoding::decode(&unplussed) {
        Ok(decoded) => decoded.into_owned(),
        Err(_) => unplussed,
    }
}

/// Validate a decoded payload.
///
/// Returns `None` when `type` is absent or unrecognized, or `message` is
/// absent, non-string, or empty. Callers drop such payloads silently — a
/// malformed ping must never surface an error or change the HTTP response.
pub fn validate(params: &Map<String, Value>) -> Option<NotificationRequest> {
    let severity = params
        .get("type")
        .and_then(Value::as_str)
        .and_then(Severity::from_wire)?;

    let message = params.get("message").and_then(Value::as_str)?;
    if message.is_empty() {
        return None;
    }

    let description = params
        .get("description")
        .and_then(Value::as_str)
        .map(str::to_string);

    Some(NotificationRequest {
        severity,
        message: message.to_string(),
        description,
    })
}
