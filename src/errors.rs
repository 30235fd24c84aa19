//! The relay's failure taxonomy and its uniform JSON envelope.
//!
//! Every failure path terminates in a `{"error": {...}}` body so the widget
//! can render a single shape regardless of where the request died.
use axum::http::{HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use serde_json::Value;

#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    /// The server-held upstream credential is not configured.
    #[error("Upstream API key is not configured on the server")]
    MissingKey,

    /// The inbound body failed a shape check. The client must correct and resend.
    #[error("{message}")]
    Validation {
        message: String,
        detail: Option<Value>,
    },

    /// The upstream answered with a non-success status; its status and body
    /// are passed through inside the envelope.
    #[error("Upstream API error")]
    Upstream {
        status: StatusCode,
        detail: Value,
        content_type: Option<HeaderValue>,
    },

    /// The upstream could not be reached at all.
    #[error("Proxy error")]
    Transport { detail: String },
}

impl RelayError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
            detail: None,
        }
    }

    pub fn validation_with_detail(message: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
            detail: Some(Value::String(detail.into())),
        }
    }

    pub fn transport(err: impl std::fmt::Display) -> Self {
        Self::Transport {
            detail: err.to_string(),
        }
    }

    /// The HTTP status this error terminates the request with.
    pub fn status(&self) -> StatusCode {
        match self {
            Self::MissingKey => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Validation { .. } => StatusCode::BAD_REQUEST,
            Self::Upstream { status, .. } => *status,
            Self::Transport { .. } => StatusCode::BAD_GATEWAY,
        }
    }

    /// The `type` field of the envelope.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::MissingKey => "server_error",
            Self::Validation { .. } => "validation_error",
            Self::Upstream { .. } => "upstream_error",
            Self::Transport { .. } => "transport_error",
        }
    }
}

#[derive(Serialize)]
struct ErrorBody {
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    status: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    detail: Option<Value>,
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Serialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

impl IntoResponse for RelayError {
    fn into_response(self) -> Response {
        let status = self.status();
        let kind = self.kind();
        let message = self.to_string();
        let (upstream_status, detail, content_type) = match self {
            Self::MissingKey => (None, None, None),
            Self::Validation { detail, .. } => (None, detail, None),
            Self::Upstream {
                status,
                detail,
                content_type,
            } => (Some(status.as_u16()), Some(detail), content_type),
            Self::Transport { detail } => (None, Some(Value::String(detail)), None),
        };

        let envelope = ErrorEnvelope {
            error: ErrorBody {
                message,
                status: upstream_status,
                detail,
                kind,
            },
        };

        let mut response = (status, axum::Json(envelope)).into_response();
        // Upstream errors keep the upstream's content type on the wire.
        if let Some(ct) = content_type {
            response.headers_mut().insert(header::CONTENT_TYPE, ct);
        }
        response
    }
}
