use chrono::Utc;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

use picoclaw_core::{Message, Role};
use picoclaw_memory::{MemoryPolicy, MemoryStore};
use picoclaw_skills::SkillsLoader;

/// Workspace files folded into the system prompt when present.
const BOOTSTRAP_FILES: [&str; 4] = ["AGENTS.md", "SOUL.md", "USER.md", "IDENTITY.md"];

/// Composes the system prompt from identity, bootstrap files, the skills
/// summary, and the per-turn memory context.
pub struct ContextBuilder {
    workspace: PathBuf,
    skills: SkillsLoader,
    memory: Arc<MemoryStore>,
    memory_policy: MemoryPolicy,
    tool_summaries: Vec<String>,
}

impl ContextBuilder {
    pub fn new(workspace: &Path, memory: Arc<MemoryStore>, memory_policy: MemoryPolicy) -> Self {
        Self {
            workspace: workspace.to_path_buf(),
            skills: SkillsLoader::for_workspace(workspace),
            memory,
            memory_policy,
            tool_summaries: vec![],
        }
    }

    /// Set the one-line tool summaries shown in the identity section.
    pub fn set_tool_summaries(&mut self, summaries: Vec<String>) {
        self.tool_summaries = summaries;
    }

    pub fn memory(&self) -> &Arc<MemoryStore> {
        &self.memory
    }

    fn identity(&self) -> String {
        let now = Utc::now().format("%Y-%m-%d %H:%M (%A)");
        let workspace = self.workspace.display();
        let runtime = format!("{} {}", std::env::consts::OS, std::env::consts::ARCH);
        let tools_section = self.tools_section();

        format!(
            r#"# picoclaw 🦞

You are picoclaw, a helpful AI assistant.

## Current Time
{now}

## Runtime
{runtime}

## Workspace
Your workspace is at: {workspace}
- Memory: {workspace}/memory/MEMORY.md
- Daily Notes: {workspace}/memory/YYYYMM/YYYYMMDD.md
- Skills: {workspace}/skills/{{skill-name}}/SKILL.md

{tools_section}

## Important Rules

1. **ALWAYS use tools** - When you need to perform an action (save a note, read a file, execute a search), you MUST call the appropriate tool. Do NOT just say you'll do it or pretend to do it.

2. **Be helpful and accurate** - When using tools, briefly explain what you're doing.

3. **Memory** - When something is memorable (new fact, preference, or correction), you MUST call the **memory_append** tool in the same turn. When the user corrects a fact, append the corrected content using the same key terms as the original so retrieval prefers the latest entry.

4. **Memory over session** - When the **Long-term Memory** section and the current session history disagree on a user fact or preference, treat **Long-term Memory** as the source of truth."#,
        )
    }

    fn tools_section(&self) -> String {
        if self.tool_summaries.is_empty() {
            return String::new();
        }
        let mut out = String::from(
            "## Available Tools\n\n\
             **CRITICAL**: You MUST use tools to perform actions. Do NOT pretend to execute them.\n\n\
             You have access to the following tools:\n\n",
        );
        for s in &self.tool_summaries {
            out.push_str(s);
            out.push('\n');
        }
        out
    }

    fn load_bootstrap_files(&self) -> String {
        let mut out = String::new();
        for filename in BOOTSTRAP_FILES {
            if let Ok(data) = std::fs::read_to_string(self.workspace.join(filename)) {
                out.push_str(&format!("## {filename}\n\n{data}\n\n"));
            }
        }
        out
    }

    /// Build the system prompt. `memory_query` is the current user
    /// message, used for query-based memory retrieval; empty uses the
    /// full long-term content.
    pub fn build_system_prompt(&self, memory_query: &str) -> String {
        let mut parts = vec![self.identity()];

        let bootstrap = self.load_bootstrap_files();
        if !bootstrap.is_empty() {
            parts.push(bootstrap);
        }

        let skills_summary = self.skills.build_skills_summary();
        if !skills_summary.is_empty() {
            parts.push(format!(
                "# Skills\n\n\
                 The following skills extend your capabilities. To use a skill, read its SKILL.md file using the read_file tool.\n\n\
                 {skills_summary}"
            ));
        }

        let memory_context = self.memory.get_memory_context(
            memory_query,
            self.memory_policy.recent_days(),
            self.memory_policy.retrieve_limit(),
        );
        if !memory_context.is_empty() {
            parts.push(memory_context);
        }

        parts.join("\n\n---\n\n")
    }

    /// Assemble the full model message list: system prompt, sanitized
    /// history, and the current user message.
    pub fn build_messages(
        &self,
        history: &[Message],
        summary: Option<&str>,
        current_message: &str,
        channel: &str,
        chat_id: &str,
    ) -> Vec<Message> {
        let mut system_prompt = self.build_system_prompt(current_message);

        if let Some(summary) = summary
            && !summary.is_empty()
        {
            system_prompt.push_str("\n\n## Summary of Previous Conversation\n\n");
            system_prompt.push_str(summary);
        }

        if !channel.is_empty() && !chat_id.is_empty() {
            system_prompt.push_str(&format!(
                "\n\n## Current Session\nChannel: {channel}\nChat ID: {chat_id}"
            ));
        }

        debug!(
            total_chars = system_prompt.len(),
            section_count = system_prompt.matches("\n\n---\n\n").count() + 1,
            "system prompt built"
        );

        let mut messages = vec![Message::text(Role::System, system_prompt)];
        messages.extend(sanitize_history(history));
        if !current_message.trim().is_empty() {
            messages.push(Message::text(Role::User, current_message));
        }
        messages
    }
}

/// Drop history messages providers reject:
/// - a leading tool message,
/// - a tool message whose immediate predecessor is not an assistant
///   carrying tool calls,
/// - an assistant-with-tool-calls message whose immediate predecessor is
///   not a user or tool message.
pub fn sanitize_history(history: &[Message]) -> Vec<Message> {
    let mut sanitized: Vec<Message> = Vec::with_capacity(history.len());
    for msg in history {
        match msg.role {
            Role::Tool => {
                let Some(last) = sanitized.last() else {
                    debug!("dropping orphaned leading tool message");
                    continue;
                };
                if last.role != Role::Assistant || last.tool_calls.is_empty() {
                    debug!("dropping orphaned tool message");
                    continue;
                }
                sanitized.push(msg.clone());
            }
            Role::Assistant if !msg.tool_calls.is_empty() => {
                let Some(prev) = sanitized.last() else {
                    debug!("dropping assistant tool-call turn at history start");
                    continue;
                };
                if prev.role != Role::User && prev.role != Role::Tool {
                    debug!("dropping assistant tool-call turn with invalid predecessor");
                    continue;
                }
                sanitized.push(msg.clone());
            }
            _ => sanitized.push(msg.clone()),
        }
    }
    sanitized
}
