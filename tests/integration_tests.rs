//! Integration tests for the relay.
//!
//! These drive the full router as a tower service, which gives exact control
//! over inbound headers and access to the raw response.

use axum::body::Body;
use axum::http::{Request, StatusCode};
use chat_relay::relay::RelayConfig;
use chat_relay::session::{ChatSession, MemoryStore};
use chat_relay::test_utils::MockHttpClient;
use chat_relay::{AppState, build_router};
use serde_json::{Value, json};
use tower::util::ServiceExt; // for oneshot()

fn relay_config(key: Option<&str>) -> RelayConfig {
    RelayConfig::builder()
        .url("https://api.example.com".parse().unwrap())
        .maybe_key(key.map(str::to_string))
        .build()
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn declared_empty_body_is_rejected_before_parsing() {
    let mock = MockHttpClient::new(StatusCode::OK, "{}");
    let app = build_router(AppState::with_client(relay_config(Some("sk-test")), mock));

    let request = Request::builder()
        .method("POST")
        .uri("/")
        .header("content-type", "application/json")
        .header("content-length", "0")
        .body(Body::empty())
        .unwrap();

    let response = app.oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(
        response.headers().get("access-control-allow-origin").unwrap(),
        "*"
    );
    let body = body_json(response).await;
    assert_eq!(body["error"]["type"], "validation_error");
    assert_eq!(body["error"]["message"], "Request body is empty");
}

#[tokio::test]
async fn preflight_is_answered_without_a_body() {
    let mock = MockHttpClient::new(StatusCode::OK, "{}");
    let app = build_router(AppState::with_client(relay_config(None), mock));

    let request = Request::builder()
        .method("OPTIONS")
        .uri("/some/arbitrary/path")
        .body(Body::empty())
        .unwrap();

    let response = app.oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::NO_CONTENT);
    assert_eq!(
        response.headers().get("access-control-allow-methods").unwrap(),
        "GET, POST, OPTIONS"
    );
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    assert!(bytes.is_empty());
}

#[tokio::test]
async fn inbound_path_is_ignored_when_forwarding() {
    let mock = MockHttpClient::new(
        StatusCode::OK,
        r#"{"choices": [{"message": {"role": "assistant", "content": "Hi!"}}]}"#,
    );
    let app = build_router(AppState::with_client(
        relay_config(Some("sk-test")),
        mock.clone(),
    ));

    // The widget posts to /v1/chat/completions, but any path reaches the
    // same upstream endpoint.
    let request = Request::builder()
        .method("POST")
        .uri("/v1/chat/completions")
        .header("content-type", "application/json")
        .body(Body::from(
            serde_json::to_vec(&json!({
                "model": "gpt-4o-mini",
                "messages": [{"role": "user", "content": "Hello"}]
            }))
            .unwrap(),
        ))
        .unwrap();

    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let requests = mock.get_requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].uri, "https://api.example.com/v1/chat/completions");
}

#[tokio::test]
async fn widget_session_round_trip_through_the_relay() {
    let upstream = json!({
        "choices": [{"message": {"role": "assistant", "content": "The answer is 4."}}]
    });
    let mock = MockHttpClient::new(StatusCode::OK, &upstream.to_string());
    let app = build_router(AppState::with_client(
        relay_config(Some("sk-test")),
        mock.clone(),
    ));

    let store = MemoryStore::new();
    let mut session = ChatSession::open(store.clone(), "You only discuss math.", "gpt-4o-mini")
        .unwrap();

    // Submit appends the user turn and hands back the full history payload.
    let payload = session.submit("What is 2+2?").unwrap().unwrap();
    assert_eq!(payload.messages.len(), 2);
    assert_eq!(payload.messages[0]["role"], "system");

    let request = Request::builder()
        .method("POST")
        .uri("/")
        .header("content-type", "application/json")
        .body(Body::from(serde_json::to_vec(&payload).unwrap()))
        .unwrap();
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let reply = session
        .absorb_response(&String::from_utf8_lossy(&bytes))
        .unwrap();

    assert_eq!(reply, "The answer is 4.");
    assert_eq!(session.history().len(), 3);
    // The rendered view hides the system anchor.
    assert_eq!(session.visible().len(), 2);
    // Everything is persisted.
    assert_eq!(store.contents().unwrap().len(), 3);
}
