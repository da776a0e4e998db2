//! Mock LLM provider for deterministic testing.
//!
//! Returns pre-configured responses without making any network calls.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;

use picoclaw_core::{PicoError, Result, ToolCall};

use crate::provider::{LlmProvider, LlmRequest, LlmResponse};

/// A pre-configured response from the mock provider.
#[derive(Clone, Default)]
pub struct MockResponse {
    pub text: String,
    pub tool_calls: Vec<ToolCall>,
    /// If set, the provider returns this error instead.
    pub error: Option<String>,
}

/// A mock LLM provider that returns queued responses in order.
pub struct MockProvider {
    name: String,
    responses: Arc<Mutex<Vec<MockResponse>>>,
    /// All requests received, for assertions in tests.
    pub requests: Arc<Mutex<Vec<LlmRequest>>>,
}

impl MockProvider {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            responses: Arc::new(Mutex::new(vec![])),
            requests: Arc::new(Mutex::new(vec![])),
        }
    }

    /// Queue a simple text response.
    pub fn with_response(self, text: &str) -> Self {
        self.responses.lock().push(MockResponse {
            text: text.to_string(),
            ..Default::default()
        });
        self
    }

    /// Queue a tool call response.
    pub fn with_tool_call(self, name: &str, args: serde_json::Value) -> Self {
        self.responses.lock().push(MockResponse {
            tool_calls: vec![ToolCall {
                id: format!("call_{}", uuid::Uuid::new_v4()),
                name: name.to_string(),
                arguments: args,
            }],
            ..Default::default()
        });
        self
    }

    /// Queue an error response.
    pub fn with_error(self, error: &str) -> Self {
        self.responses.lock().push(MockResponse {
            error: Some(error.to_string()),
            ..Default::default()
        });
        self
    }

    /// Pop the next queued response, or a default marker when drained.
    fn next_response(&self) -> MockResponse {
        let mut responses = self.responses.lock();
        if responses.is_empty() {
            MockResponse {
                text: "(mock: no more queued responses)".to_string(),
                ..Default::default()
            }
        } else {
            responses.remove(0)
        }
    }
}

#[async_trait]
impl LlmProvider for MockProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn chat(&self, request: &LlmRequest) -> Result<LlmResponse> {
        self.requests.lock().push(request.clone());
        let mock = self.next_response();

        if let Some(error) = mock.error {
            return Err(PicoError::Provider(error));
        }

        Ok(LlmResponse {
            content: mock.text,
            tool_calls: mock.tool_calls,
        })
    }
}
