use std::collections::HashMap;
use tokio::sync::mpsc;

/// A message arriving from a channel, normalized for the agent runtime.
#[derive(Debug, Clone)]
pub struct InboundMessage {
    /// Channel identifier, e.g. "botschat".
    pub channel: String,
    /// Sender identifier (channel-specific).
    pub sender_id: String,
    /// Session key the conversation persists under.
    pub session_key: String,
    /// Text content.
    pub content: String,
    /// Channel-specific metadata (message ids etc.).
    pub metadata: HashMap<String, String>,
}

/// Routes inbound channel messages to the agent runtime.
#[derive(Clone)]
pub struct MessageBus {
    inbound_tx: mpsc::Sender<InboundMessage>,
}

impl MessageBus {
    /// Create a bus; the returned receiver is consumed by the runtime.
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<InboundMessage>) {
        let (inbound_tx, inbound_rx) = mpsc::channel(capacity);
        (Self { inbound_tx }, inbound_rx)
    }

    /// Publish an inbound message. Drops the message (with an error in
    /// the log at the call site) when the runtime has gone away.
    pub async fn publish(&self, msg: InboundMessage) -> bool {
        self.inbound_tx.send(msg).await.is_ok()
    }
}
