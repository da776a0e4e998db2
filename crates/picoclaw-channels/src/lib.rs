//! # picoclaw-channels
//!
//! The BotsChat cloud channel: a long-lived websocket client with
//! reconnection, heartbeat, inbound routing, and end-to-end message
//! encryption, plus the message-bus types the runtime consumes.

pub mod botschat;
pub mod bus;
pub mod e2e;

pub use botschat::BotsChatChannel;
pub use bus::{InboundMessage, MessageBus};
