use chrono::Utc;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::time::Instant;

use crate::types::{AuditEntry, AuditSink, Event, Handler, HookContext, HookResult, HookStatus};

/// Routes hook events to registered handlers.
///
/// Dispatch takes a read lock only long enough to snapshot the handler
/// slice; registrations take the write lock. Handlers run outside the
/// lock, in registration order.
pub struct Dispatcher {
    handlers: RwLock<HashMap<Event, Vec<Arc<dyn Handler>>>>,
    audit: Option<Arc<dyn AuditSink>>,
}

impl Dispatcher {
    pub fn new(audit: Option<Arc<dyn AuditSink>>) -> Self {
        Self {
            handlers: RwLock::new(HashMap::new()),
            audit,
        }
    }

    pub fn register(&self, event: Event, handler: Arc<dyn Handler>) {
        self.handlers.write().entry(event).or_default().push(handler);
    }

    /// Run every handler registered for `event`. Never raises: handler
    /// errors and panics become error-status results, audit failures are
    /// swallowed.
    pub fn dispatch(&self, event: Event, ctx: &HookContext) -> Vec<HookResult> {
        let handlers: Vec<Arc<dyn Handler>> = {
            let map = self.handlers.read();
            map.get(&event).cloned().unwrap_or_default()
        };

        let mut results = Vec::with_capacity(handlers.len());
        for handler in handlers {
            let result = run_handler(handler.as_ref(), event, ctx);

            if let Some(audit) = &self.audit {
                let entry = AuditEntry {
                    turn_id: ctx.turn_id.clone(),
                    event,
                    handler: handler.name().to_string(),
                    status: result.status,
                    message: result.message.clone(),
                    error: result.error.clone(),
                    duration_ms: result.duration_ms,
                    timestamp: Utc::now(),
                    session_key: ctx.session_key.clone(),
                    channel: ctx.channel.clone(),
                    chat_id: ctx.chat_id.clone(),
                    metadata: result.metadata.clone(),
                };
                let _ = audit.write(&entry);
            }

            results.push(result);
        }
        results
    }

    pub fn handler_count(&self) -> usize {
        self.handlers.read().values().map(Vec::len).sum()
    }

    pub fn event_count(&self) -> usize {
        self.handlers
            .read()
            .values()
            .filter(|hs| !hs.is_empty())
            .count()
    }
}

/// Run one handler, capturing duration and converting a panic into an
/// error-status result.
fn run_handler(handler: &dyn Handler, event: Event, ctx: &HookContext) -> HookResult {
    let start = Instant::now();
    let outcome = catch_unwind(AssertUnwindSafe(|| handler.handle(event, &ctx.clone())));
    let duration_ms = start.elapsed().as_millis() as i64;

    let mut result = match outcome {
        Ok(result) => result,
        Err(panic) => HookResult::error(
            "hook panic recovered",
            format!("panic in hook {}: {}", handler.name(), panic_text(&panic)),
        ),
    };
    result.duration_ms = duration_ms;
    if result.status == HookStatus::Error && result.error.is_none() {
        result.error = Some(format!("hook error: {}", result.message));
    }
    result
}

fn panic_text(panic: &Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
