//! BotsChat cloud channel: a supervised websocket client that
//! authenticates with a pairing token, heartbeats every 25 s, routes
//! inbound frames to the message bus, and encrypts outbound text when an
//! E2E key has been derived.

use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use picoclaw_config::BotsChatConfig;
use picoclaw_core::{PicoError, Result};

use crate::bus::{InboundMessage, MessageBus};
use crate::e2e;

const STATUS_INTERVAL: Duration = Duration::from_secs(25);
const MIN_BACKOFF: Duration = Duration::from_secs(1);
const MAX_BACKOFF: Duration = Duration::from_secs(30);
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Connection state shared between the supervisor task and `send`.
/// The lock is only held to sample or swap fields, never during I/O.
#[derive(Default)]
struct Shared {
    outbound: Option<mpsc::UnboundedSender<Value>>,
    connected: bool,
    e2e_key: Option<[u8; e2e::KEY_LEN]>,
}

pub struct BotsChatChannel {
    config: BotsChatConfig,
    bus: MessageBus,
    shared: Arc<Mutex<Shared>>,
    shutdown_tx: Mutex<Option<watch::Sender<bool>>>,
}

impl BotsChatChannel {
    pub fn new(config: BotsChatConfig, bus: MessageBus) -> Self {
        Self {
            config,
            bus,
            shared: Arc::new(Mutex::new(Shared::default())),
            shutdown_tx: Mutex::new(None),
        }
    }

    /// Start the supervisor loop. Returns immediately; the loop keeps a
    /// connection alive until `stop`.
    pub fn start(&self) {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        *self.shutdown_tx.lock() = Some(shutdown_tx);

        let config = self.config.clone();
        let bus = self.bus.clone();
        let shared = self.shared.clone();
        tokio::spawn(async move {
            supervisor_loop(config, bus, shared, shutdown_rx).await;
        });
    }

    /// Cancel the supervisor, drop the active connection, and clear the
    /// derived E2E key.
    pub fn stop(&self) {
        if let Some(tx) = self.shutdown_tx.lock().take() {
            let _ = tx.send(true);
        }
        let mut shared = self.shared.lock();
        shared.outbound = None;
        shared.connected = false;
        shared.e2e_key = None;
        info!("BotsChat channel stopped");
    }

    pub fn is_connected(&self) -> bool {
        self.shared.lock().connected
    }

    /// Send agent text to a chat. Encrypts when an E2E key is known.
    /// Errors when no authenticated connection is up.
    pub fn send(&self, chat_id: &str, content: &str) -> Result<()> {
        let (outbound, key) = {
            let shared = self.shared.lock();
            if !shared.connected {
                return Err(PicoError::ChannelNotConnected("botschat".into()));
            }
            (shared.outbound.clone(), shared.e2e_key)
        };
        let Some(outbound) = outbound else {
            return Err(PicoError::ChannelNotConnected("botschat".into()));
        };

        let message_id = Uuid::new_v4().to_string();
        let mut payload = json!({
            "type": "agent.text",
            "sessionKey": chat_id,
            "messageId": message_id,
        });
        if let Some(key) = key {
            let ciphertext = e2e::encrypt_text(&key, content, &message_id)?;
            payload["text"] = json!(e2e::to_base64(&ciphertext));
            payload["encrypted"] = json!(true);
        } else {
            payload["text"] = json!(content);
        }

        outbound
            .send(payload)
            .map_err(|_| PicoError::ChannelNotConnected("botschat".into()))
    }
}

/// Build the gateway URL: `<scheme>://<host>/api/gateway/<account_id>?token=…`,
/// scheme derived from the configured base URL.
fn build_ws_url(config: &BotsChatConfig) -> String {
    let scheme = if config.cloud_url.starts_with("http://") {
        "ws"
    } else {
        "wss"
    };
    let host = config
        .cloud_url
        .trim_start_matches("https://")
        .trim_start_matches("http://");
    let account_id = if config.account_id.is_empty() {
        "default"
    } else {
        &config.account_id
    };
    format!(
        "{scheme}://{host}/api/gateway/{account_id}?token={}",
        query_escape(&config.pairing_token)
    )
}

/// Percent-encode a query value (RFC 3986 unreserved characters pass).
fn query_escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for b in s.bytes() {
        match b {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(b as char)
            }
            _ => out.push_str(&format!("%{b:02X}")),
        }
    }
    out
}

/// The URL with the token query value masked, safe for logging.
fn redact_url_for_log(url: &str) -> String {
    match url.split_once("token=") {
        Some((head, _)) => format!("{head}token=***"),
        None => url.to_string(),
    }
}

fn now_nanos() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or_default()
}

fn clear_connection(shared: &Arc<Mutex<Shared>>) {
    let mut shared = shared.lock();
    shared.outbound = None;
    shared.connected = false;
    shared.e2e_key = None;
}

/// Supervisor: Disconnected → Dialing → Authenticating → Connected, with
/// exponential backoff between attempts (1 s doubled per failure, capped
/// at 30 s, reset on a successful connect).
async fn supervisor_loop(
    config: BotsChatConfig,
    bus: MessageBus,
    shared: Arc<Mutex<Shared>>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let mut backoff = MIN_BACKOFF;
    loop {
        if *shutdown_rx.borrow() {
            return;
        }

        let ws_url = build_ws_url(&config);
        info!(url = %redact_url_for_log(&ws_url), "connecting to BotsChat cloud");

        let ws_stream = match tokio::time::timeout(
            HANDSHAKE_TIMEOUT,
            tokio_tungstenite::connect_async(&ws_url),
        )
        .await
        {
            Ok(Ok((stream, _))) => stream,
            Ok(Err(e)) => {
                error!(error = %e, "BotsChat connection failed");
                if !sleep_or_shutdown(backoff, &mut shutdown_rx).await {
                    return;
                }
                backoff = (backoff * 2).min(MAX_BACKOFF);
                continue;
            }
            Err(_) => {
                error!(timeout_secs = HANDSHAKE_TIMEOUT.as_secs(), "BotsChat handshake timed out");
                if !sleep_or_shutdown(backoff, &mut shutdown_rx).await {
                    return;
                }
                backoff = (backoff * 2).min(MAX_BACKOFF);
                continue;
            }
        };
        backoff = MIN_BACKOFF;

        let (mut write, mut read) = ws_stream.split();

        let auth = json!({
            "type": "auth",
            "token": config.pairing_token,
            "agents": Value::Null,
            "model": "",
        });
        if let Err(e) = write.send(WsMessage::Text(auth.to_string().into())).await {
            error!(error = %e, "failed to send auth frame");
            continue;
        }

        // The outbound queue lives as long as this connection; `send`
        // enqueues, the select loop below writes.
        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<Value>();
        shared.lock().outbound = Some(out_tx.clone());

        let mut heartbeat = tokio::time::interval(STATUS_INTERVAL);
        heartbeat.tick().await; // consume the immediate first tick

        loop {
            tokio::select! {
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        info!("BotsChat shutdown signal received");
                        let _ = write.close().await;
                        clear_connection(&shared);
                        return;
                    }
                }
                _ = heartbeat.tick() => {
                    let status = json!({
                        "type": "status",
                        "connected": true,
                        "agents": [],
                        "model": "",
                    });
                    if let Err(e) = write.send(WsMessage::Text(status.to_string().into())).await {
                        warn!(error = %e, "heartbeat send failed");
                        break;
                    }
                }
                Some(frame) = out_rx.recv() => {
                    if let Err(e) = write.send(WsMessage::Text(frame.to_string().into())).await {
                        warn!(error = %e, "outbound send failed");
                        break;
                    }
                }
                msg = read.next() => {
                    match msg {
                        Some(Ok(ws_msg)) => {
                            if ws_msg.is_close() {
                                info!("BotsChat server closed the connection");
                                break;
                            }
                            let Ok(text) = ws_msg.to_text() else { continue };
                            let frame: Value = match serde_json::from_str(text) {
                                Ok(v) => v,
                                Err(e) => {
                                    warn!(error = %e, "invalid JSON frame");
                                    continue;
                                }
                            };
                            if !handle_frame(&config, &bus, &shared, &out_tx, frame).await {
                                break;
                            }
                        }
                        Some(Err(e)) => {
                            warn!(error = %e, "BotsChat read error");
                            break;
                        }
                        None => {
                            info!("BotsChat stream ended");
                            break;
                        }
                    }
                }
            }
        }

        clear_connection(&shared);
        if *shutdown_rx.borrow() {
            return;
        }
        info!(retry_in_secs = backoff.as_secs(), "BotsChat reconnecting");
        if !sleep_or_shutdown(backoff, &mut shutdown_rx).await {
            return;
        }
        backoff = (backoff * 2).min(MAX_BACKOFF);
    }
}

/// Sleep for `d`, waking early on shutdown. Returns false when shutting
/// down.
async fn sleep_or_shutdown(d: Duration, shutdown_rx: &mut watch::Receiver<bool>) -> bool {
    tokio::select! {
        _ = tokio::time::sleep(d) => true,
        _ = shutdown_rx.changed() => !*shutdown_rx.borrow(),
    }
}

/// Dispatch one inbound frame by its `type` field. Returns false when the
/// connection must be torn down (auth failure).
async fn handle_frame(
    config: &BotsChatConfig,
    bus: &MessageBus,
    shared: &Arc<Mutex<Shared>>,
    out_tx: &mpsc::UnboundedSender<Value>,
    frame: Value,
) -> bool {
    let frame_type = frame.get("type").and_then(Value::as_str).unwrap_or("");
    match frame_type {
        "ping" => {
            let _ = out_tx.send(json!({"type": "pong"}));
        }
        "auth.ok" => {
            shared.lock().connected = true;
            info!("authenticated with BotsChat cloud");
            if let Some(user_id) = frame.get("userId").and_then(Value::as_str)
                && !user_id.is_empty()
                && !config.e2e_password.is_empty()
            {
                // PBKDF2 at 310k iterations is CPU-bound; derive off the
                // async workers and store when ready.
                let password = config.e2e_password.clone();
                let user_id = user_id.to_string();
                let shared = shared.clone();
                tokio::task::spawn_blocking(move || {
                    let key = e2e::derive_key(&password, &user_id);
                    shared.lock().e2e_key = Some(key);
                    info!("E2E key derived");
                });
            }
        }
        "auth.fail" => {
            let reason = frame.get("reason").and_then(Value::as_str).unwrap_or("");
            error!(reason, "BotsChat auth failed");
            return false;
        }
        "user.message" => handle_user_message(config, bus, shared, frame).await,
        "user.media" => {
            let fake = json!({
                "sessionKey": frame.get("sessionKey").cloned().unwrap_or_default(),
                "text": "",
                "userId": frame.get("userId").cloned().unwrap_or_default(),
                "messageId": format!("media-{}", now_nanos()),
            });
            handle_user_message(config, bus, shared, fake).await;
        }
        "user.command" => {
            let command = frame.get("command").and_then(Value::as_str).unwrap_or("");
            let args = frame.get("args").and_then(Value::as_str).unwrap_or("");
            let mut text = format!("/{command}");
            if !args.is_empty() {
                text.push(' ');
                text.push_str(args);
            }
            let fake = json!({
                "sessionKey": frame.get("sessionKey").cloned().unwrap_or_default(),
                "text": text,
                "userId": "command",
                "messageId": format!("cmd-{}", now_nanos()),
            });
            handle_user_message(config, bus, shared, fake).await;
        }
        "user.action" => {
            let text = format_user_action(&frame);
            let fake = json!({
                "sessionKey": frame.get("sessionKey").cloned().unwrap_or_default(),
                "text": text,
                "userId": "action",
                "messageId": format!("action-{}", now_nanos()),
            });
            handle_user_message(config, bus, shared, fake).await;
        }
        "models.request" => {
            let _ = out_tx.send(json!({"type": "models.list", "models": []}));
        }
        other => {
            debug!(frame_type = other, "unhandled frame type");
        }
    }
    true
}

/// Synthesize the user-visible text for a `user.action` frame. Both the
/// selected label and the raw value survive in the text.
fn format_user_action(frame: &Value) -> String {
    let action = frame.get("action").and_then(Value::as_str).unwrap_or("");
    let params = frame.get("params").cloned().unwrap_or(json!({}));
    let kind = params
        .get("kind")
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .unwrap_or(action);
    let raw_value = params.get("value").and_then(Value::as_str).unwrap_or("");
    let selected = params.get("selected").and_then(Value::as_str).unwrap_or("");
    let chosen = if selected.is_empty() { raw_value } else { selected };
    let label = params
        .get("label")
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .unwrap_or(chosen);

    let mut text = format!("[Action: kind={kind}] User selected: {label:?}");
    if !raw_value.is_empty() && raw_value != label {
        text.push_str(&format!(" (value: {raw_value:?})"));
    }
    text
}

/// Decrypt (when needed), apply the sender allowlist, and forward a user
/// message to the agent runtime.
async fn handle_user_message(
    config: &BotsChatConfig,
    bus: &MessageBus,
    shared: &Arc<Mutex<Shared>>,
    frame: Value,
) {
    let mut session_key = frame
        .get("sessionKey")
        .and_then(Value::as_str)
        .unwrap_or("")
        .to_string();
    let mut text = frame
        .get("text")
        .and_then(Value::as_str)
        .unwrap_or("")
        .to_string();
    let user_id = frame
        .get("userId")
        .and_then(Value::as_str)
        .unwrap_or("")
        .to_string();
    let message_id = frame
        .get("messageId")
        .and_then(Value::as_str)
        .unwrap_or("")
        .to_string();
    let encrypted = frame
        .get("encrypted")
        .and_then(Value::as_bool)
        .unwrap_or(false);

    if encrypted {
        let key = shared.lock().e2e_key;
        if let Some(key) = key {
            match e2e::from_base64(&text).and_then(|ct| e2e::decrypt_text(&key, &ct, &message_id)) {
                Ok(decrypted) => text = decrypted,
                Err(e) => {
                    warn!(message_id, error = %e, "decryption failed");
                    text = "[Decryption Failed]".to_string();
                }
            }
        }
    }

    if !config.allow_from.is_empty() && !config.allow_from.iter().any(|a| a == &user_id) {
        warn!(user_id, "sender not in allowlist, dropping message");
        return;
    }

    let mut metadata = std::collections::HashMap::new();
    if !message_id.is_empty() {
        metadata.insert("message_id".to_string(), message_id);
    }
    if session_key.is_empty() {
        session_key = user_id.clone();
    }

    let delivered = bus
        .publish(InboundMessage {
            channel: "botschat".to_string(),
            sender_id: user_id,
            session_key,
            content: text,
            metadata,
        })
        .await;
    if !delivered {
        error!("message bus receiver gone, dropping inbound message");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(cloud_url: &str) -> BotsChatConfig {
        BotsChatConfig {
            cloud_url: cloud_url.to_string(),
            account_id: "acct-1".to_string(),
            pairing_token: "tok/en+1".to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_ws_url_scheme_follows_base() {
        let url = build_ws_url(&config("https://cloud.example.com"));
        assert!(url.starts_with("wss://cloud.example.com/api/gateway/acct-1?token="));
        let url = build_ws_url(&config("http://localhost:9100"));
        assert!(url.starts_with("ws://localhost:9100/api/gateway/acct-1?token="));
    }

    #[test]
    fn test_ws_url_escapes_token() {
        let url = build_ws_url(&config("https://x"));
        assert!(url.ends_with("token=tok%2Fen%2B1"));
    }

    #[test]
    fn test_redact_token() {
        let url = "wss://h/api/gateway/a?token=secret";
        assert_eq!(redact_url_for_log(url), "wss://h/api/gateway/a?token=***");
    }

    #[test]
    fn test_format_user_action_prefers_label() {
        let frame = json!({
            "action": "pick",
            "params": {"kind": "menu", "label": "Option A", "value": "opt_a"},
        });
        assert_eq!(
            format_user_action(&frame),
            r#"[Action: kind=menu] User selected: "Option A" (value: "opt_a")"#
        );
    }

    #[test]
    fn test_format_user_action_selected_fallback() {
        let frame = json!({
            "action": "pick",
            "params": {"selected": "B"},
        });
        assert_eq!(format_user_action(&frame), r#"[Action: kind=pick] User selected: "B""#);
    }
}
