//! Turn raw ad-platform error payloads into something a person can read.

use serde::Deserialize;

#[derive(Debug, Deserialize)]
struct Envelope {
    error: Body,
}

#[derive(Debug, Deserialize)]
struct Body {
    message: Option<String>,
    error_user_title: Option<String>,
    error_user_msg: Option<String>,
}

/// Best effort: a Graph-style `{"error": {...}}` payload, possibly preceded by
/// free text, becomes `"title: message"`. Anything else comes back unchanged.
pub fn humanize(raw: &str) -> String {
    let Some(start) = raw.find('{') else {
        return raw.to_string();
    };
    let Some(end) = raw.rfind('}') else {
        return raw.to_string();
    };
    if end < start {
        return raw.to_string();
    }

    let Ok(envelope) = serde_json::from_str::<Envelope>(&raw[start..=end]) else {
        return raw.to_string();
    };

    let body = envelope.error;
    let message = body.error_user_msg.or(body.message);
    match (body.error_user_title, message) {
        (Some(title), Some(message)) => format!("{}: {}", title, message),
        (Some(title), None) => title,
        (None, Some(message)) => message,
        (None, None) => raw.to_string(),
    }
}
