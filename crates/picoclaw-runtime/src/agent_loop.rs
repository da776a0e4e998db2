use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tracing::{info, warn};

use picoclaw_config::PicoConfig;
use picoclaw_core::{Message, PicoError, Result, Role, ToolResult, ToolSpec};
use picoclaw_hooks::{Dispatcher, Event, HookContext};
use picoclaw_llm::{FallbackCandidate, LlmProvider, LlmRequest, LlmResponse, resolve_candidates};
use picoclaw_memory::{MemoryPolicy, MemoryStore};
use picoclaw_session::{Session, SessionManager, get_relevant_history};

use crate::context::ContextBuilder;
use crate::observe::{Common, FileObserver, ObserveEvent};
use crate::tools::{
    AppendFileTool, ListDirTool, MemoryAppendTool, MemorySearchTool, ReadFileTool, ToolRegistry,
    WriteFileTool,
};

const DEFAULT_MAX_ITERATIONS: u32 = 20;

/// The tool-using conversation state machine: builds the prompt, walks
/// the model/tool loop, emits lifecycle hooks, and persists the session.
pub struct AgentLoop {
    provider: Arc<dyn LlmProvider>,
    candidates: Vec<FallbackCandidate>,
    sessions: SessionManager,
    context: ContextBuilder,
    tools: ToolRegistry,
    hooks: Arc<Dispatcher>,
    memory: Arc<MemoryStore>,
    policy: MemoryPolicy,
    workspace: PathBuf,
    max_iterations: u32,
    context_window: usize,
    request_timeout_secs: u64,
    observer: Option<FileObserver>,
    turn_counter: AtomicU64,
    /// One writer per session key: turns for the same key are serialized.
    session_locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl AgentLoop {
    pub fn new(
        config: &PicoConfig,
        provider: Arc<dyn LlmProvider>,
        hooks: Arc<Dispatcher>,
    ) -> Self {
        let workspace = config.agent.workspace.clone();
        let _ = std::fs::create_dir_all(&workspace);

        let memory = Arc::new(MemoryStore::new(&workspace));
        let policy = MemoryPolicy::from_config(&config.memory, &workspace);

        let restrict = config.agent.restrict_to_workspace;
        let mut tools = ToolRegistry::new();
        tools.register(Arc::new(ReadFileTool::new(&workspace, restrict)));
        tools.register(Arc::new(WriteFileTool::new(
            &workspace,
            restrict,
            memory.clone(),
        )));
        tools.register(Arc::new(ListDirTool::new(&workspace, restrict)));
        tools.register(Arc::new(AppendFileTool::new(&workspace, restrict)));
        tools.register(Arc::new(MemorySearchTool::new(memory.clone())));
        tools.register(Arc::new(MemoryAppendTool::new(memory.clone())));

        let mut context = ContextBuilder::new(&workspace, memory.clone(), policy.clone());
        context.set_tool_summaries(tools.summaries());

        let candidates = resolve_candidates(&config.agent.model, &config.agent.model_fallbacks);
        let max_iterations = if config.agent.max_tool_iterations == 0 {
            DEFAULT_MAX_ITERATIONS
        } else {
            config.agent.max_tool_iterations
        };
        let observer = if config.logging.observe_dir.is_empty() {
            None
        } else {
            Some(FileObserver::new(
                PathBuf::from(&config.logging.observe_dir),
                config.logging.observe_full_prompt,
            ))
        };

        Self {
            provider,
            candidates,
            sessions: SessionManager::new(&workspace.join("sessions")),
            context,
            tools,
            hooks,
            memory,
            policy,
            workspace,
            max_iterations,
            context_window: config.agent.context_window.max(1),
            request_timeout_secs: config.agent.request_timeout_secs,
            observer,
            turn_counter: AtomicU64::new(0),
            session_locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn memory(&self) -> &Arc<MemoryStore> {
        &self.memory
    }

    fn primary_model(&self) -> String {
        self.candidates
            .first()
            .map(|c| c.model.clone())
            .unwrap_or_default()
    }

    fn session_lock(&self, key: &str) -> Arc<tokio::sync::Mutex<()>> {
        self.session_locks
            .lock()
            .entry(key.to_string())
            .or_default()
            .clone()
    }

    /// Process one user message addressed by session key alone. The
    /// channel and chat id are recovered from the `<channel>:<chat_id>`
    /// key shape.
    pub async fn process_direct(
        self: &Arc<Self>,
        content: &str,
        session_key: &str,
        deadline: Option<Instant>,
    ) -> Result<String> {
        let (channel, chat_id) = match session_key.split_once(':') {
            Some((channel, chat_id)) => (channel.to_string(), chat_id.to_string()),
            None => ("direct".to_string(), session_key.to_string()),
        };
        self.process(content, session_key, &channel, &chat_id, deadline)
            .await
    }

    /// Run one agent turn: hooks, history selection, the iterative
    /// model/tool loop, and session persistence.
    ///
    /// The deadline is checked between iterations and before each tool
    /// invocation; an in-flight model or tool call is never interrupted.
    /// With no caller deadline, `request_timeout_secs` bounds the turn.
    pub async fn process(
        self: &Arc<Self>,
        content: &str,
        session_key: &str,
        channel: &str,
        chat_id: &str,
        deadline: Option<Instant>,
    ) -> Result<String> {
        let lock = self.session_lock(session_key);
        let _turn_guard = lock.lock().await;

        let deadline = deadline.or_else(|| {
            (self.request_timeout_secs > 0)
                .then(|| Instant::now() + Duration::from_secs(self.request_timeout_secs))
        });

        let turn_id = format!("turn-{}", self.turn_counter.fetch_add(1, Ordering::Relaxed) + 1);
        let model = self.primary_model();

        let mut hook_ctx = HookContext::new(&turn_id);
        hook_ctx.session_key = session_key.to_string();
        hook_ctx.channel = channel.to_string();
        hook_ctx.chat_id = chat_id.to_string();
        hook_ctx.model = model.clone();
        hook_ctx.workspace = self.workspace.to_string_lossy().into_owned();
        hook_ctx.user_message = content.to_string();

        // Failures here are captured per handler; the turn proceeds.
        self.hooks.dispatch(Event::BeforeTurn, &hook_ctx);

        let mut session = self.sessions.get_or_create(session_key);

        let relevant_limit = self.policy.session_relevant_history_limit();
        let session_mode = if relevant_limit > 0 { "relevant" } else { "full" };
        let history = if relevant_limit > 0 {
            get_relevant_history(
                &session.messages,
                content,
                relevant_limit,
                self.policy.session_relevant_fallback_keep(),
            )
        } else {
            session.messages.clone()
        };

        if let Some(obs) = &self.observer {
            obs.record(ObserveEvent::TurnStart {
                common: Common::now(session_key, channel, chat_id),
                user_message: content.to_string(),
                session_mode: session_mode.to_string(),
                history_count: history.len(),
                summary_length: session.summary.as_deref().map_or(0, str::len),
            });
            let memory_context = self.memory.get_memory_context(
                content,
                self.policy.recent_days(),
                self.policy.retrieve_limit(),
            );
            obs.record(ObserveEvent::MemoryUsed {
                common: Common::now(session_key, channel, chat_id),
                memory_query: content.to_string(),
                memory_source: if content.trim().is_empty() { "full" } else { "retrieve" }
                    .to_string(),
                memory_context_length: memory_context.len(),
                memory_context_preview: memory_context,
            });
        }

        let mut messages = self.context.build_messages(
            &history,
            session.summary.as_deref(),
            content,
            channel,
            chat_id,
        );
        session.add_message(Message::text(Role::User, content));

        let specs = self.tools.specs();
        let mut last_content = String::new();
        let mut deadline_hit = false;

        for iteration in 1..=self.max_iterations {
            if past_deadline(deadline) {
                warn!(session_key, iteration, "request deadline reached, ending turn");
                deadline_hit = true;
                break;
            }

            let mut llm_ctx = hook_ctx.clone();
            if self
                .observer
                .as_ref()
                .is_some_and(FileObserver::include_full_prompt)
            {
                llm_ctx.messages_json = serde_json::to_string(&messages).unwrap_or_default();
            }
            self.hooks.dispatch(Event::BeforeLlm, &llm_ctx);
            if let Some(obs) = &self.observer {
                obs.record(ObserveEvent::LlmRequest {
                    common: Common::now(session_key, channel, chat_id),
                    iteration,
                    model: model.clone(),
                    messages_count: messages.len(),
                    tools_count: specs.len(),
                    messages_json: llm_ctx.messages_json.clone(),
                });
            }

            let response = match self.call_with_fallback(&messages, &specs).await {
                Ok(response) => response,
                Err(e) => {
                    let mut err_ctx = hook_ctx.clone();
                    err_ctx.error_message = e.to_string();
                    self.hooks.dispatch(Event::OnError, &err_ctx);
                    if let Err(save_err) = self.sessions.save(&session) {
                        warn!(session_key, error = %save_err, "failed to persist session");
                    }
                    return Err(e);
                }
            };

            let mut after_ctx = hook_ctx.clone();
            after_ctx.llm_response_summary = preview(&response.content, 500);
            self.hooks.dispatch(Event::AfterLlm, &after_ctx);
            if let Some(obs) = &self.observer {
                obs.record(ObserveEvent::LlmResponse {
                    common: Common::now(session_key, channel, chat_id),
                    iteration,
                    content_length: response.content.len(),
                    content_preview: response.content.clone(),
                    tool_calls: response.tool_calls.iter().map(|tc| tc.name.clone()).collect(),
                });
            }

            if !response.has_tool_calls() {
                last_content = response.content;
                let assistant = Message::text(Role::Assistant, &last_content);
                session.add_message(assistant);
                self.finish_turn(&hook_ctx, &session, &last_content, iteration);
                return Ok(last_content);
            }

            if !response.content.is_empty() {
                last_content = response.content.clone();
            }
            let assistant =
                Message::assistant_with_tools(&response.content, response.tool_calls.clone());
            messages.push(assistant.clone());
            session.add_message(assistant);

            for tool_call in &response.tool_calls {
                let args = tool_call
                    .arguments
                    .as_object()
                    .cloned()
                    .unwrap_or_default();

                let mut tool_ctx = hook_ctx.clone();
                tool_ctx.tool_name = tool_call.name.clone();
                tool_ctx.tool_args = args.clone();
                self.hooks.dispatch(Event::BeforeTool, &tool_ctx);

                // Past the deadline, pending tool calls are answered
                // with an error result instead of being executed, so
                // the history stays well-formed.
                let result = if past_deadline(deadline) {
                    ToolResult::error("request deadline exceeded; tool call not executed")
                } else {
                    self.tools.execute(&tool_call.name, &args).await
                };

                tool_ctx.tool_result = preview(&result.for_llm, 500);
                self.hooks.dispatch(Event::AfterTool, &tool_ctx);
                if result.is_error {
                    let mut err_ctx = tool_ctx.clone();
                    err_ctx.error_message = result.for_llm.clone();
                    self.hooks.dispatch(Event::OnError, &err_ctx);
                }
                if let Some(obs) = &self.observer {
                    obs.record(ObserveEvent::ToolExecuted {
                        common: Common::now(session_key, channel, chat_id),
                        tool_name: tool_call.name.clone(),
                        args_preview: tool_call.arguments.to_string(),
                        result_for_llm_length: result.for_llm.len(),
                        error: if result.is_error {
                            result.for_llm.clone()
                        } else {
                            String::new()
                        },
                    });
                }

                let tool_msg = Message::tool_result(&tool_call.id, &result.for_llm);
                messages.push(tool_msg.clone());
                session.add_message(tool_msg);
            }
        }

        if !deadline_hit {
            warn!(session_key, max_iterations = self.max_iterations, "max agent iterations reached");
        }
        self.finish_turn(&hook_ctx, &session, &last_content, self.max_iterations);
        Ok(last_content)
    }

    /// Walk the candidate list in order until one model call succeeds.
    async fn call_with_fallback(
        &self,
        messages: &[Message],
        tools: &[ToolSpec],
    ) -> Result<LlmResponse> {
        let mut last_err = None;
        for candidate in &self.candidates {
            let request = LlmRequest {
                model: candidate.model.clone(),
                messages: messages.to_vec(),
                tools: tools.to_vec(),
            };
            match self.provider.chat(&request).await {
                Ok(response) => return Ok(response),
                Err(e) => {
                    warn!(model = %candidate.model, error = %e, "model call failed, trying next candidate");
                    last_err = Some(e);
                }
            }
        }
        Err(last_err.unwrap_or_else(|| PicoError::Provider("no model candidates configured".into())))
    }

    /// Final bookkeeping for a turn: `after_turn`, persistence, and the
    /// out-of-band maintenance tasks.
    fn finish_turn(
        self: &Arc<Self>,
        hook_ctx: &HookContext,
        session: &Session,
        final_content: &str,
        iterations: u32,
    ) {
        let mut end_ctx = hook_ctx.clone();
        end_ctx.llm_response_summary = preview(final_content, 500);
        self.hooks.dispatch(Event::AfterTurn, &end_ctx);

        if let Err(e) = self.sessions.save(session) {
            warn!(session_key = %session.key, error = %e, "failed to persist session");
        }
        if let Some(obs) = &self.observer {
            obs.record(ObserveEvent::TurnEnd {
                common: Common::now(&hook_ctx.session_key, &hook_ctx.channel, &hook_ctx.chat_id),
                final_content_length: final_content.len(),
                final_content_preview: final_content.to_string(),
                total_iterations: iterations,
            });
        }

        self.maybe_summarize(session.key.clone());
        self.maybe_compress();
    }

    /// Summarize the session out of band when it grows past the policy
    /// thresholds, archiving all but the most recent messages.
    fn maybe_summarize(self: &Arc<Self>, session_key: String) {
        let msg_threshold = self.policy.session_summary_message_threshold();
        let token_limit = self.context_window * self.policy.session_summary_token_percent() / 100;
        let keep = self.policy.session_summary_keep_count();

        let this = self.clone();
        tokio::spawn(async move {
            let session = this.sessions.get_or_create(&session_key);
            let msg_count = session.messages.len();
            let est_tokens = session.estimate_tokens();
            if msg_count <= msg_threshold && est_tokens <= token_limit {
                return;
            }
            info!(session_key, msg_count, est_tokens, "summarizing session");

            let mut transcript = String::new();
            if let Some(prev) = &session.summary {
                transcript.push_str("Previous summary:\n");
                transcript.push_str(prev);
                transcript.push_str("\n\n");
            }
            transcript.push_str(&render_transcript(&session.messages));

            let prompt = format!(
                "Summarize this conversation history concisely. Preserve:\n\
                 - The user's goals and key facts about them\n\
                 - Decisions, corrections, and outcomes\n\
                 - Unresolved questions and the current state of progress\n\n\
                 Keep the summary under 500 words. Be factual and specific.\n\n\
                 Conversation to summarize:\n{transcript}"
            );
            let request = LlmRequest {
                model: this.primary_model(),
                messages: vec![
                    Message::text(
                        Role::System,
                        "You are a precise conversation summarizer. Output only the summary, nothing else.",
                    ),
                    Message::text(Role::User, prompt),
                ],
                tools: vec![],
            };

            match this.provider.chat(&request).await {
                Ok(response) if !response.content.trim().is_empty() => {
                    // Re-read under the turn lock so a concurrent turn's
                    // messages are not lost.
                    let lock = this.session_lock(&session_key);
                    let _guard = lock.lock().await;
                    let mut session = this.sessions.get_or_create(&session_key);
                    session.archive_to_summary(response.content.trim().to_string(), keep);
                    if let Err(e) = this.sessions.save(&session) {
                        warn!(session_key, error = %e, "failed to persist summarized session");
                    } else {
                        info!(session_key, kept = keep, "session summarized");
                    }
                }
                Ok(_) => {}
                Err(e) => warn!(session_key, error = %e, "session summarization failed"),
            }
        });
    }

    /// Compress the long-term memory file out of band when it exceeds
    /// the policy threshold; the sentinel file gates this to one writer
    /// roughly once a day.
    fn maybe_compress(self: &Arc<Self>) {
        let threshold = self.policy.long_term_compress_char_threshold();
        if !self.memory.compression_due(threshold) {
            return;
        }
        if let Err(e) = self.memory.mark_compressed() {
            warn!(error = %e, "failed to update compression sentinel");
            return;
        }

        let this = self.clone();
        tokio::spawn(async move {
            let content = this.memory.read_long_term();
            if content.is_empty() {
                return;
            }
            info!(chars = content.len(), "compressing long-term memory");

            let prompt = format!(
                "Rewrite this memory file to be roughly half as long. Merge duplicate \
                 entries, keep every distinct fact, preference, and correction, and keep \
                 the '## YYYY-MM-DD' heading structure.\n\n{content}"
            );
            let request = LlmRequest {
                model: this.primary_model(),
                messages: vec![
                    Message::text(
                        Role::System,
                        "You are a careful archivist. Output only the rewritten memory file.",
                    ),
                    Message::text(Role::User, prompt),
                ],
                tools: vec![],
            };
            match this.provider.chat(&request).await {
                Ok(response) if !response.content.trim().is_empty() => {
                    if let Err(e) = this.memory.write_long_term(response.content.trim()) {
                        warn!(error = %e, "failed to write compressed memory");
                    } else {
                        info!("long-term memory compressed");
                    }
                }
                Ok(_) => {}
                Err(e) => warn!(error = %e, "long-term compression failed"),
            }
        });
    }
}

fn past_deadline(deadline: Option<Instant>) -> bool {
    deadline.is_some_and(|d| Instant::now() >= d)
}

/// Render messages as `Role: content` lines for summarization prompts.
fn render_transcript(messages: &[Message]) -> String {
    messages
        .iter()
        .filter(|m| !m.content.is_empty())
        .map(|m| {
            let role = match m.role {
                Role::System => "System",
                Role::User => "User",
                Role::Assistant => "Assistant",
                Role::Tool => "Tool",
            };
            format!("{role}: {}", m.content)
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Truncate to at most `max_len` bytes on a char boundary.
fn preview(s: &str, max_len: usize) -> String {
    if s.len() <= max_len {
        return s.to_string();
    }
    let mut cut = max_len;
    while !s.is_char_boundary(cut) {
        cut -= 1;
    }
    format!("{}...", &s[..cut])
}
