//! # picoclaw-server
//!
//! OpenAI-compatible `POST /v1/chat/completions` endpoint bridging JSON
//! requests to the agent loop. No streaming: `stream=true` is rejected
//! with 501.

use async_trait::async_trait;
use axum::Router;
use axum::body::Bytes;
use axum::extract::{DefaultBodyLimit, State};
use axum::http::{HeaderMap, Method, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::any;
use serde::Deserialize;
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::{Duration, Instant};
use subtle::ConstantTimeEq;
use tracing::warn;
use uuid::Uuid;

use picoclaw_config::OpenAIApiConfig;
use picoclaw_core::Result;

const MAX_BODY_BYTES: usize = 1024 * 1024; // 1 MiB
const AGENT_DEADLINE: Duration = Duration::from_secs(120);

/// The capability the endpoint needs from the agent runtime. The
/// deadline is honored cooperatively by the agent loop between
/// iterations; an in-flight tool is never cut off mid-execution.
#[async_trait]
pub trait ProcessDirect: Send + Sync {
    async fn process_direct(
        &self,
        content: &str,
        session_key: &str,
        deadline: Option<Instant>,
    ) -> Result<String>;
}

struct AppState {
    bearer_tokens: Vec<String>,
    agent: Arc<dyn ProcessDirect>,
}

/// Build the axum router for the OpenAI-compatible gateway.
pub fn build_router(config: OpenAIApiConfig, agent: Arc<dyn ProcessDirect>) -> Router {
    let state = Arc::new(AppState {
        bearer_tokens: config.bearer_tokens,
        agent,
    });
    Router::new()
        .route("/v1/chat/completions", any(chat_completions))
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .with_state(state)
}

#[derive(Debug, Default, Deserialize)]
struct ChatCompletionRequest {
    #[serde(default)]
    model: String,
    #[serde(default)]
    messages: Vec<RequestMessage>,
    #[serde(default)]
    stream: bool,
    #[serde(default)]
    user: String,
}

#[derive(Debug, Default, Deserialize)]
struct RequestMessage {
    #[serde(default)]
    role: String,
    /// A string or a list of `{type: text, text}` / `{input_text}` parts.
    #[serde(default)]
    content: Value,
    #[serde(default)]
    name: String,
}

async fn chat_completions(
    State(state): State<Arc<AppState>>,
    method: Method,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    if method != Method::POST {
        return error_response(
            StatusCode::METHOD_NOT_ALLOWED,
            "method_not_allowed",
            "Only POST is allowed",
        );
    }

    if state.bearer_tokens.is_empty() {
        return unauthorized();
    }
    let Some(token) = extract_bearer_token(&headers) else {
        return unauthorized();
    };
    if !validate_bearer_token(&token, &state.bearer_tokens) {
        return unauthorized();
    }

    let Ok(request) = serde_json::from_slice::<ChatCompletionRequest>(&body) else {
        return error_response(
            StatusCode::BAD_REQUEST,
            "invalid_request_error",
            "Invalid JSON body",
        );
    };

    if request.stream {
        return error_response(
            StatusCode::NOT_IMPLEMENTED,
            "invalid_request_error",
            "stream=true is not supported yet",
        );
    }

    let (prompt, system_prompt) = build_prompt(&request.messages);
    if prompt.is_empty() {
        return error_response(
            StatusCode::BAD_REQUEST,
            "invalid_request_error",
            "Missing user message in messages",
        );
    }
    let prompt = if system_prompt.is_empty() {
        prompt
    } else {
        format!("{system_prompt}\n\n{prompt}")
    };

    let model = if request.model.is_empty() {
        "picoclaw".to_string()
    } else {
        request.model
    };
    let session_key = if request.user.is_empty() {
        "openai:default".to_string()
    } else {
        format!("openai:{}", request.user)
    };

    let deadline = Instant::now() + AGENT_DEADLINE;
    let response = match state
        .agent
        .process_direct(&prompt, &session_key, Some(deadline))
        .await
    {
        Ok(response) => response,
        Err(e) => {
            warn!(session_key, error = %e, "agent call failed");
            return error_response(StatusCode::INTERNAL_SERVER_ERROR, "api_error", &e.to_string());
        }
    };

    let out = json!({
        "id": format!("chatcmpl-{}", Uuid::new_v4()),
        "object": "chat.completion",
        "created": chrono::Utc::now().timestamp(),
        "model": model,
        "choices": [{
            "index": 0,
            "message": {"role": "assistant", "content": response},
            "finish_reason": "stop",
        }],
        "usage": {"prompt_tokens": 0, "completion_tokens": 0, "total_tokens": 0},
    });
    (StatusCode::OK, axum::Json(out)).into_response()
}

fn extract_bearer_token(headers: &HeaderMap) -> Option<String> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let (scheme, rest) = value.split_at_checked(7)?;
    if !scheme.eq_ignore_ascii_case("bearer ") {
        return None;
    }
    Some(rest.trim().to_string())
}

/// Constant-time comparison against the allowlist.
fn validate_bearer_token(token: &str, allowed: &[String]) -> bool {
    if token.is_empty() {
        return false;
    }
    let token = token.as_bytes();
    allowed.iter().any(|a| {
        let a = a.as_bytes();
        a.len() == token.len() && a.ct_eq(token).into()
    })
}

fn unauthorized() -> Response {
    let mut response = error_response(
        StatusCode::UNAUTHORIZED,
        "invalid_request_error",
        "Missing or invalid Authorization",
    );
    response.headers_mut().insert(
        header::WWW_AUTHENTICATE,
        axum::http::HeaderValue::from_static("Bearer"),
    );
    response
}

fn error_response(code: StatusCode, error_type: &str, message: &str) -> Response {
    let body = json!({"error": {"message": message, "type": error_type}});
    (code, axum::Json(body)).into_response()
}

/// Reduce OpenAI-format messages to the agent-facing prompt and an
/// optional extra system prompt. When only one user/tool/assistant
/// message remains its content passes through unchanged; otherwise the
/// conversation is rendered as `Role: content` lines.
fn build_prompt(messages: &[RequestMessage]) -> (String, String) {
    let mut system_parts: Vec<String> = Vec::new();
    let mut last_user_or_tool = String::new();
    let mut history: Vec<String> = Vec::new();

    for m in messages {
        let role = m.role.trim().to_lowercase();
        let content = extract_text_content(&m.content);
        let content = content.trim();
        if role.is_empty() || content.is_empty() {
            continue;
        }
        let role = match role.as_str() {
            "system" | "developer" => {
                system_parts.push(content.to_string());
                continue;
            }
            "function" => "tool",
            other => other,
        };
        let sender = match role {
            "assistant" => "Assistant".to_string(),
            "user" => "User".to_string(),
            "tool" if !m.name.is_empty() => format!("Tool:{}", m.name),
            "tool" => "Tool".to_string(),
            _ => continue,
        };
        last_user_or_tool = content.to_string();
        history.push(format!("{sender}: {content}"));
    }

    let system_prompt = system_parts.join("\n\n");
    if last_user_or_tool.is_empty() {
        return (String::new(), system_prompt);
    }
    if history.len() <= 1 {
        return (last_user_or_tool, system_prompt);
    }
    (history.join("\n"), system_prompt)
}

/// Concatenate the text of a string-or-parts content value.
fn extract_text_content(content: &Value) -> String {
    match content {
        Value::String(s) => s.clone(),
        Value::Array(parts) => {
            let mut out: Vec<&str> = Vec::new();
            for part in parts {
                let Some(part) = part.as_object() else { continue };
                if part.get("type").and_then(Value::as_str) == Some("text")
                    && let Some(text) = part.get("text").and_then(Value::as_str)
                    && !text.is_empty()
                {
                    out.push(text);
                }
                if let Some(text) = part.get("input_text").and_then(Value::as_str)
                    && !text.is_empty()
                {
                    out.push(text);
                }
            }
            out.join("\n")
        }
        _ => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn msg(role: &str, content: Value) -> RequestMessage {
        RequestMessage {
            role: role.into(),
            content,
            name: String::new(),
        }
    }

    #[test]
    fn test_build_prompt_single_user_passthrough() {
        let (prompt, system) = build_prompt(&[
            msg("system", json!("S")),
            msg("user", json!("Hello")),
        ]);
        assert_eq!(prompt, "Hello");
        assert_eq!(system, "S");
    }

    #[test]
    fn test_build_prompt_renders_conversation() {
        let (prompt, _) = build_prompt(&[
            msg("user", json!("first")),
            msg("assistant", json!("answer")),
            msg("user", json!("second")),
        ]);
        assert_eq!(prompt, "User: first\nAssistant: answer\nUser: second");
    }

    #[test]
    fn test_build_prompt_function_aliases_tool() {
        let mut m = msg("function", json!("result"));
        m.name = "lookup".into();
        let (prompt, _) = build_prompt(&[msg("user", json!("q")), m]);
        assert_eq!(prompt, "User: q\nTool:lookup: result");
    }

    #[test]
    fn test_build_prompt_no_user_message() {
        let (prompt, system) = build_prompt(&[msg("system", json!("only system"))]);
        assert_eq!(prompt, "");
        assert_eq!(system, "only system");
    }

    #[test]
    fn test_extract_text_content_parts() {
        let content = json!([
            {"type": "text", "text": "part one"},
            {"input_text": "part two"},
            {"type": "image_url", "image_url": {"url": "x"}},
        ]);
        assert_eq!(extract_text_content(&content), "part one\npart two");
    }

    #[test]
    fn test_validate_bearer_token() {
        let allowed = vec!["sk-one".to_string(), "sk-two".to_string()];
        assert!(validate_bearer_token("sk-two", &allowed));
        assert!(!validate_bearer_token("sk-three", &allowed));
        assert!(!validate_bearer_token("", &allowed));
        assert!(!validate_bearer_token("sk-one", &[]));
    }
}
