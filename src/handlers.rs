/// Axum handlers for the relay: the two diagnostics and the completion proxy.
use crate::AppState;
use crate::client::HttpClient;
use crate::errors::RelayError;
use crate::models::{CompletionPayload, KeyStatus, UpstreamBody};
use crate::relay::{COMPLETIONS_PATH, MODELS_PATH};
use axum::{
    Json,
    body::Body,
    extract::State,
    http::{HeaderValue, Method, header},
    response::{IntoResponse, Response},
};
use serde_json::Value;
use tracing::{error, info, instrument};
use url::Url;

/// `GET /__debug_key`: reports whether the upstream credential is configured.
/// The credential value itself never leaves the process.
#[instrument(skip(state))]
pub async fn debug_key<T: HttpClient>(State(state): State<AppState<T>>) -> impl IntoResponse {
    Json(KeyStatus {
        has_key: state.relay.has_key(),
    })
}

/// `GET /__debug_models`: forwards the upstream models list, status and body
/// passed through as-is.
#[instrument(skip(state))]
pub async fn debug_models<T: HttpClient>(
    State(state): State<AppState<T>>,
) -> Result<Response, RelayError> {
    let key = state.relay.key.as_deref().ok_or(RelayError::MissingKey)?;

    let req = upstream_request(&state.relay.url, MODELS_PATH, Method::GET, key, Body::empty())?;
    match state.http_client.request(req).await {
        Ok(response) => relay_upstream(response).await,
        Err(e) => {
            error!("Error fetching upstream models: {}", e);
            Err(RelayError::transport(e))
        }
    }
}

/// The completion proxy. Every request that is not a preflight or a matched
/// GET diagnostic lands here, whatever its method or path.
///
/// The pipeline is linear: credential check, validation ladder, normalize,
/// forward, relay the upstream response. Exactly one response per request.
#[instrument(skip(state, req))]
pub async fn completions<T: HttpClient>(
    State(state): State<AppState<T>>,
    req: axum::extract::Request,
) -> Result<Response, RelayError> {
    let key = state.relay.key.as_deref().ok_or(RelayError::MissingKey)?;

    let (parts, body) = req.into_parts();

    // Validation ladder. Each rung is a hard 400 and the order is fixed.
    if parts
        .headers
        .get(header::CONTENT_LENGTH)
        .is_some_and(|v| v == "0")
    {
        return Err(RelayError::validation("Request body is empty"));
    }
    if let Some(content_type) = parts.headers.get(header::CONTENT_TYPE) {
        let is_json = content_type
            .to_str()
            .is_ok_and(|v| v.contains("application/json"));
        if !is_json {
            return Err(RelayError::validation(
                "Content-Type must be application/json",
            ));
        }
    }

    let bytes = axum::body::to_bytes(body, usize::MAX)
        .await
        .map_err(|e| RelayError::validation_with_detail("Invalid JSON body", e.to_string()))?;
    let parsed: Value = serde_json::from_slice(&bytes)
        .map_err(|e| RelayError::validation_with_detail("Invalid JSON body", e.to_string()))?;
    let body_object = parsed
        .as_object()
        .ok_or_else(|| RelayError::validation("Request body must be a JSON object"))?;
    let messages = body_object
        .get("messages")
        .and_then(Value::as_array)
        .filter(|m| !m.is_empty())
        .ok_or_else(|| RelayError::validation("messages must be a non-empty array"))?;

    // Normalize: trimmed non-empty model or the configured default; messages
    // verbatim, no per-message validation.
    let model = body_object
        .get("model")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|m| !m.is_empty())
        .unwrap_or(&state.relay.default_model);
    let payload = CompletionPayload {
        model: model.to_string(),
        messages: messages.clone(),
    };

    info!("Relaying completion request for model: {}", payload.model);

    let body = serde_json::to_vec(&payload).map_err(RelayError::transport)?;
    let req = upstream_request(
        &state.relay.url,
        COMPLETIONS_PATH,
        Method::POST,
        key,
        Body::from(body),
    )?;
    match state.http_client.request(req).await {
        Ok(response) => relay_upstream(response).await,
        Err(e) => {
            error!("Error forwarding completion request: {}", e);
            Err(RelayError::transport(e))
        }
    }
}

/// Builds an authenticated request against the upstream API. The Host header
/// is rewritten to match the upstream, not the caller.
fn upstream_request(
    base: &Url,
    path: &str,
    method: Method,
    key: &str,
    body: Body,
) -> Result<axum::extract::Request, RelayError> {
    let url = base.join(path).map_err(RelayError::transport)?;

    let mut builder = axum::http::Request::builder()
        .method(method)
        .uri(url.as_str())
        .header(header::AUTHORIZATION, format!("Bearer {key}"))
        .header(header::CONTENT_TYPE, "application/json");

    if let Some(host) = url.host_str() {
        let host_value = match url.port() {
            Some(port) => format!("{host}:{port}"),
            None => host.to_string(),
        };
        builder = builder.header(header::HOST, host_value);
    }

    builder.body(body).map_err(RelayError::transport)
}

/// Terminates the pipeline with the upstream's answer.
///
/// The body is read exactly once as text and decoded at most once as JSON:
/// non-success statuses become an error envelope carrying the decoded body,
/// successful JSON is re-serialized, and anything else is forwarded verbatim
/// with the upstream's content type.
async fn relay_upstream(response: Response) -> Result<Response, RelayError> {
    let status = response.status();
    let content_type = response.headers().get(header::CONTENT_TYPE).cloned();

    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .map_err(RelayError::transport)?;
    let text = String::from_utf8_lossy(&bytes).into_owned();
    let decoded = UpstreamBody::decode(&text);

    if !status.is_success() {
        return Err(RelayError::Upstream {
            status,
            detail: decoded.into_detail(status),
            content_type,
        });
    }

    let (bytes, fallback_type) = match decoded {
        UpstreamBody::Json(value) => (
            serde_json::to_vec(&value).map_err(RelayError::transport)?,
            HeaderValue::from_static("application/json"),
        ),
        UpstreamBody::Raw(raw) => (
            raw.into_bytes(),
            HeaderValue::from_static("text/plain; charset=utf-8"),
        ),
    };

    Response::builder()
        .status(status)
        .header(header::CONTENT_TYPE, content_type.unwrap_or(fallback_type))
        .body(Body::from(bytes))
        .map_err(RelayError::transport)
}
