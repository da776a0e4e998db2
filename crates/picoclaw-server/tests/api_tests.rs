//! Endpoint tests: exercise the OpenAI-compatible handler with a mock
//! agent behind it.

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Instant;
use tower::ServiceExt;

use picoclaw_config::OpenAIApiConfig;
use picoclaw_server::{ProcessDirect, build_router};

/// Records (content, session_key) calls and replies with a fixed string.
struct MockAgent {
    reply: String,
    calls: Arc<Mutex<Vec<(String, String)>>>,
    fail: bool,
}

#[async_trait]
impl ProcessDirect for MockAgent {
    async fn process_direct(
        &self,
        content: &str,
        session_key: &str,
        deadline: Option<Instant>,
    ) -> picoclaw_core::Result<String> {
        assert!(deadline.is_some(), "endpoint must pass its deadline down");
        self.calls
            .lock()
            .push((content.to_string(), session_key.to_string()));
        if self.fail {
            return Err(picoclaw_core::PicoError::Provider("backend down".into()));
        }
        Ok(self.reply.clone())
    }
}

fn setup(reply: &str, fail: bool) -> (axum::Router, Arc<Mutex<Vec<(String, String)>>>) {
    let calls = Arc::new(Mutex::new(Vec::new()));
    let agent = Arc::new(MockAgent {
        reply: reply.to_string(),
        calls: calls.clone(),
        fail,
    });
    let config = OpenAIApiConfig {
        enabled: true,
        bind: "127.0.0.1:0".into(),
        bearer_tokens: vec!["sk-test".into()],
    };
    (build_router(config, agent), calls)
}

fn post(body: &str, bearer: Option<&str>) -> Request<Body> {
    let mut builder = Request::post("/v1/chat/completions").header("content-type", "application/json");
    if let Some(token) = bearer {
        builder = builder.header("authorization", format!("Bearer {token}"));
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

async fn body_json(resp: axum::response::Response) -> serde_json::Value {
    let bytes = resp.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn test_happy_path() {
    let (app, calls) = setup("Hi Alice!", false);
    let body = r#"{
        "model": "X",
        "messages": [
            {"role": "system", "content": "S"},
            {"role": "user", "content": "Hello"}
        ],
        "user": "alice"
    }"#;
    let resp = app.oneshot(post(body, Some("sk-test"))).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    let json = body_json(resp).await;
    assert_eq!(json["object"], "chat.completion");
    assert_eq!(json["model"], "X");
    assert_eq!(json["choices"][0]["index"], 0);
    assert_eq!(json["choices"][0]["message"]["role"], "assistant");
    assert_eq!(json["choices"][0]["message"]["content"], "Hi Alice!");
    assert_eq!(json["choices"][0]["finish_reason"], "stop");
    assert_eq!(json["usage"]["total_tokens"], 0);
    assert!(json["id"].as_str().unwrap().starts_with("chatcmpl-"));

    let calls = calls.lock();
    assert_eq!(calls.len(), 1);
    let (prompt, session_key) = &calls[0];
    assert_eq!(session_key, "openai:alice");
    assert!(prompt.contains("S"));
    assert!(prompt.contains("Hello"));
}

#[tokio::test]
async fn test_default_session_key_and_model() {
    let (app, calls) = setup("ok", false);
    let body = r#"{"messages": [{"role": "user", "content": "ping"}]}"#;
    let resp = app.oneshot(post(body, Some("sk-test"))).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let json = body_json(resp).await;
    assert_eq!(json["model"], "picoclaw");
    assert_eq!(calls.lock()[0].1, "openai:default");
}

#[tokio::test]
async fn test_non_post_is_405() {
    let (app, _) = setup("ok", false);
    let req = Request::get("/v1/chat/completions")
        .header("authorization", "Bearer sk-test")
        .body(Body::empty())
        .unwrap();
    let resp = app.oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::METHOD_NOT_ALLOWED);
    let json = body_json(resp).await;
    assert_eq!(json["error"]["type"], "method_not_allowed");
}

#[tokio::test]
async fn test_missing_bearer_is_401() {
    let (app, _) = setup("ok", false);
    let resp = app
        .oneshot(post(r#"{"messages":[]}"#, None))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(resp.headers().get("www-authenticate").unwrap(), "Bearer");
}

#[tokio::test]
async fn test_wrong_bearer_is_401() {
    let (app, calls) = setup("ok", false);
    let resp = app
        .oneshot(post(r#"{"messages":[]}"#, Some("sk-wrong")))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    assert!(calls.lock().is_empty(), "agent must not be reached");
}

#[tokio::test]
async fn test_invalid_json_is_400() {
    let (app, _) = setup("ok", false);
    let resp = app.oneshot(post("{not json", Some("sk-test"))).await.unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_stream_is_501() {
    let (app, _) = setup("ok", false);
    let body = r#"{"stream": true, "messages": [{"role": "user", "content": "x"}]}"#;
    let resp = app.oneshot(post(body, Some("sk-test"))).await.unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_IMPLEMENTED);
}

#[tokio::test]
async fn test_missing_user_message_is_400() {
    let (app, _) = setup("ok", false);
    let body = r#"{"messages": [{"role": "system", "content": "only system"}]}"#;
    let resp = app.oneshot(post(body, Some("sk-test"))).await.unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    let json = body_json(resp).await;
    assert_eq!(json["error"]["message"], "Missing user message in messages");
}

#[tokio::test]
async fn test_agent_failure_is_500() {
    let (app, _) = setup("", true);
    let body = r#"{"messages": [{"role": "user", "content": "hi"}]}"#;
    let resp = app.oneshot(post(body, Some("sk-test"))).await.unwrap();
    assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let json = body_json(resp).await;
    assert_eq!(json["error"]["type"], "api_error");
}

#[tokio::test]
async fn test_content_parts_are_concatenated() {
    let (app, calls) = setup("ok", false);
    let body = r#"{
        "messages": [{
            "role": "user",
            "content": [
                {"type": "text", "text": "part one"},
                {"input_text": "part two"}
            ]
        }]
    }"#;
    let resp = app.oneshot(post(body, Some("sk-test"))).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let prompt = &calls.lock()[0].0;
    assert!(prompt.contains("part one"));
    assert!(prompt.contains("part two"));
}

#[tokio::test]
async fn test_oversized_body_rejected() {
    let (app, calls) = setup("ok", false);
    let huge = format!(
        r#"{{"messages":[{{"role":"user","content":"{}"}}]}}"#,
        "x".repeat(2 * 1024 * 1024)
    );
    let resp = app.oneshot(post(&huge, Some("sk-test"))).await.unwrap();
    assert_eq!(resp.status(), StatusCode::PAYLOAD_TOO_LARGE);
    assert!(calls.lock().is_empty());
}
