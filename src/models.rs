/// Wire types for the relay's own endpoints, plus the JSON-or-raw-text
/// decoder every upstream-facing handler shares.
use axum::http::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Body of `GET /__debug_key`. Reports presence only, never the value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeyStatus {
    #[serde(rename = "hasKey")]
    pub has_key: bool,
}

/// The normalized payload forwarded to the upstream completion endpoint.
/// Only `model` and `messages` survive normalization; anything else in the
/// inbound body is dropped, and the messages themselves pass through opaque.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletionPayload {
    pub model: String,
    pub messages: Vec<Value>,
}

/// An upstream response body, read exactly once as text and decoded at most
/// once as JSON. Both the passthrough and error paths branch on this, so the
/// parse-or-not decision lives in one place.
#[derive(Debug, Clone, PartialEq)]
pub enum UpstreamBody {
    Json(Value),
    Raw(String),
}

impl UpstreamBody {
    pub fn decode(text: &str) -> Self {
        match serde_json::from_str(text) {
            Ok(value) => Self::Json(value),
            Err(_) => Self::Raw(text.to_string()),
        }
    }

    /// The envelope `detail` for an upstream error: the parsed JSON when the
    /// body was JSON, the raw text when non-empty, the status phrase when the
    /// body was empty, and a fixed placeholder when even that is missing.
    pub fn into_detail(self, status: StatusCode) -> Value {
        match self {
            Self::Json(value) => value,
            Self::Raw(text) if !text.is_empty() => Value::String(text),
            Self::Raw(_) => Value::String(
                status
                    .canonical_reason()
                    .unwrap_or("Unknown upstream error")
                    .to_string(),
            ),
        }
    }
}
