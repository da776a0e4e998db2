//! Provider for OpenAI-compatible chat-completions backends
//! (OpenRouter, OpenAI, local gateways).

use async_trait::async_trait;
use serde_json::{Value, json};
use tracing::debug;

use picoclaw_core::{Message, PicoError, Result, Role, ToolCall};

use crate::provider::{LlmProvider, LlmRequest, LlmResponse};

pub struct OpenAiCompatProvider {
    name: String,
    api_base: String,
    api_key: String,
    client: reqwest::Client,
}

impl OpenAiCompatProvider {
    pub fn new(name: impl Into<String>, api_base: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            api_base: api_base.into(),
            api_key: api_key.into(),
            client: reqwest::Client::new(),
        }
    }
}

fn role_str(role: Role) -> &'static str {
    match role {
        Role::System => "system",
        Role::User => "user",
        Role::Assistant => "assistant",
        Role::Tool => "tool",
    }
}

fn wire_message(m: &Message) -> Value {
    let mut out = json!({
        "role": role_str(m.role),
        "content": m.content,
    });
    if !m.tool_calls.is_empty() {
        out["tool_calls"] = Value::Array(
            m.tool_calls
                .iter()
                .map(|tc| {
                    json!({
                        "id": tc.id,
                        "type": "function",
                        "function": {
                            "name": tc.name,
                            "arguments": tc.arguments.to_string(),
                        },
                    })
                })
                .collect(),
        );
    }
    if let Some(id) = &m.tool_call_id {
        out["tool_call_id"] = json!(id);
    }
    out
}

fn parse_tool_calls(message: &Value) -> Vec<ToolCall> {
    let Some(calls) = message.get("tool_calls").and_then(Value::as_array) else {
        return vec![];
    };
    calls
        .iter()
        .filter_map(|call| {
            let id = call.get("id").and_then(Value::as_str)?.to_string();
            let function = call.get("function")?;
            let name = function.get("name").and_then(Value::as_str)?.to_string();
            let raw_args = function
                .get("arguments")
                .and_then(Value::as_str)
                .unwrap_or("{}");
            let arguments =
                serde_json::from_str(raw_args).unwrap_or(Value::String(raw_args.to_string()));
            Some(ToolCall { id, name, arguments })
        })
        .collect()
}

#[async_trait]
impl LlmProvider for OpenAiCompatProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn chat(&self, request: &LlmRequest) -> Result<LlmResponse> {
        let mut body = json!({
            "model": request.model,
            "messages": request.messages.iter().map(wire_message).collect::<Vec<_>>(),
        });
        if !request.tools.is_empty() {
            body["tools"] = Value::Array(
                request
                    .tools
                    .iter()
                    .map(|t| {
                        json!({
                            "type": "function",
                            "function": {
                                "name": t.name,
                                "description": t.description,
                                "parameters": t.parameters,
                            },
                        })
                    })
                    .collect(),
            );
        }

        debug!(model = %request.model, messages = request.messages.len(), "chat completion request");
        let resp = self
            .client
            .post(format!("{}/chat/completions", self.api_base))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| PicoError::Provider(format!("request failed: {e}")))?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(PicoError::Provider(format!("HTTP {}: {text}", status.as_u16())));
        }

        let payload: Value = resp
            .json()
            .await
            .map_err(|e| PicoError::Provider(format!("invalid response body: {e}")))?;
        let message = payload
            .pointer("/choices/0/message")
            .ok_or_else(|| PicoError::Provider("response has no choices".into()))?;

        Ok(LlmResponse {
            content: message
                .get("content")
                .and_then(Value::as_str)
                .unwrap_or("")
                .to_string(),
            tool_calls: parse_tool_calls(message),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_message_tool_result() {
        let msg = Message::tool_result("call_1", "output");
        let wire = wire_message(&msg);
        assert_eq!(wire["role"], "tool");
        assert_eq!(wire["tool_call_id"], "call_1");
    }

    #[test]
    fn test_parse_tool_calls_arguments_json() {
        let message = json!({
            "tool_calls": [{
                "id": "call_1",
                "type": "function",
                "function": {"name": "read_file", "arguments": "{\"path\": \"a.md\"}"},
            }]
        });
        let calls = parse_tool_calls(&message);
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].name, "read_file");
        assert_eq!(calls[0].arguments["path"], "a.md");
    }

    #[test]
    fn test_parse_tool_calls_malformed_arguments_kept_as_string() {
        let message = json!({
            "tool_calls": [{
                "id": "call_1",
                "function": {"name": "x", "arguments": "not json"},
            }]
        });
        let calls = parse_tool_calls(&message);
        assert_eq!(calls[0].arguments, Value::String("not json".into()));
    }
}
