//! BotsChat end-to-end crypto, wire-compatible with the cloud plugin:
//! AES-256-CTR with PBKDF2 key derivation and an HMAC-derived per-message
//! nonce. A fresh `context_id` per message is the caller's contract
//! (message id for text, `<message_id>:media` for media).

use aes::Aes256;
use aes::cipher::{KeyIvInit, StreamCipher};
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use hmac::{Hmac, Mac};
use sha2::Sha256;

use picoclaw_core::{PicoError, Result};

type Aes256Ctr = ctr::Ctr128BE<Aes256>;
type HmacSha256 = Hmac<Sha256>;

const SALT_PREFIX: &str = "botschat-e2e:";
const PBKDF2_ITERATIONS: u32 = 310_000;
pub const KEY_LEN: usize = 32;
const NONCE_LEN: usize = 16;

/// Derive the 32-byte symmetric key from the pairing password and user
/// id: PBKDF2-HMAC-SHA256 with salt `botschat-e2e:<user_id>`.
pub fn derive_key(password: &str, user_id: &str) -> [u8; KEY_LEN] {
    let salt = format!("{SALT_PREFIX}{user_id}");
    let mut key = [0u8; KEY_LEN];
    pbkdf2::pbkdf2_hmac::<Sha256>(
        password.as_bytes(),
        salt.as_bytes(),
        PBKDF2_ITERATIONS,
        &mut key,
    );
    key
}

/// Per-message nonce: first 16 bytes of
/// HMAC-SHA256(key, "nonce-" || context_id || 0x01).
fn nonce(key: &[u8], context_id: &str) -> Result<[u8; NONCE_LEN]> {
    let mut mac = HmacSha256::new_from_slice(key)
        .map_err(|e| PicoError::Crypto(format!("e2e: hmac init: {e}")))?;
    mac.update(b"nonce-");
    mac.update(context_id.as_bytes());
    mac.update(&[0x01]);
    let digest = mac.finalize().into_bytes();
    let mut out = [0u8; NONCE_LEN];
    out.copy_from_slice(&digest[..NONCE_LEN]);
    Ok(out)
}

fn apply_ctr(key: &[u8], data: &[u8], context_id: &str) -> Result<Vec<u8>> {
    if key.len() != KEY_LEN {
        return Err(PicoError::Crypto("e2e: key must be 32 bytes".into()));
    }
    let nonce = nonce(key, context_id)?;
    let mut cipher = Aes256Ctr::new_from_slices(key, &nonce)
        .map_err(|e| PicoError::Crypto(format!("e2e: cipher init: {e}")))?;
    let mut buf = data.to_vec();
    cipher.apply_keystream(&mut buf);
    Ok(buf)
}

/// Encrypt raw bytes (e.g. media); `context_id` must be unique per
/// message for a given key. Output length equals input length.
pub fn encrypt_bytes(key: &[u8], plaintext: &[u8], context_id: &str) -> Result<Vec<u8>> {
    apply_ctr(key, plaintext, context_id)
}

/// Decrypt raw bytes.
pub fn decrypt_bytes(key: &[u8], ciphertext: &[u8], context_id: &str) -> Result<Vec<u8>> {
    apply_ctr(key, ciphertext, context_id)
}

/// Encrypt a text message.
pub fn encrypt_text(key: &[u8], plaintext: &str, context_id: &str) -> Result<Vec<u8>> {
    encrypt_bytes(key, plaintext.as_bytes(), context_id)
}

/// Decrypt a text message back to UTF-8.
pub fn decrypt_text(key: &[u8], ciphertext: &[u8], context_id: &str) -> Result<String> {
    let plain = decrypt_bytes(key, ciphertext, context_id)?;
    String::from_utf8(plain).map_err(|e| PicoError::Crypto(format!("e2e: invalid utf-8: {e}")))
}

/// Encode ciphertext for JSON transport (standard base64 with padding,
/// matching Node's `Buffer.toString("base64")`).
pub fn to_base64(data: &[u8]) -> String {
    BASE64.encode(data)
}

/// Decode base64 from JSON.
pub fn from_base64(s: &str) -> Result<Vec<u8>> {
    BASE64
        .decode(s)
        .map_err(|e| PicoError::Crypto(format!("e2e: base64 decode: {e}")))
}
