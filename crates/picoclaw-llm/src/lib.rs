//! # picoclaw-llm
//!
//! The model-backend abstraction the agent loop depends on: a provider is
//! anything that can turn a message list plus tool specs into an
//! assistant message or tool calls. Candidate providers form an ordered
//! fallback list traversed until one succeeds.

pub mod candidates;
pub mod mock;
pub mod openai_compat;
pub mod provider;

pub use candidates::{FallbackCandidate, resolve_candidates};
pub use mock::{MockProvider, MockResponse};
pub use openai_compat::OpenAiCompatProvider;
pub use provider::{LlmProvider, LlmRequest, LlmResponse};
