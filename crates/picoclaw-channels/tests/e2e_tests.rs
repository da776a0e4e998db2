use picoclaw_channels::e2e;

fn test_key() -> [u8; 32] {
    e2e::derive_key("pairing-password", "user-42")
}

#[test]
fn test_key_is_deterministic_and_user_scoped() {
    let a = e2e::derive_key("pw", "alice");
    let b = e2e::derive_key("pw", "alice");
    let c = e2e::derive_key("pw", "bob");
    assert_eq!(a, b);
    assert_ne!(a, c, "different user ids must change the salt");
    assert_ne!(a, e2e::derive_key("other", "alice"));
}

#[test]
fn test_roundtrip_text() {
    let key = test_key();
    let ct = e2e::encrypt_text(&key, "hello, 世界", "msg-1").unwrap();
    let pt = e2e::decrypt_text(&key, &ct, "msg-1").unwrap();
    assert_eq!(pt, "hello, 世界");
}

#[test]
fn test_roundtrip_bytes_any_context() {
    let key = test_key();
    for ctx in ["m1", "m1:media", "action-123456789"] {
        let data = vec![0u8, 255, 7, 42, 128];
        let ct = e2e::encrypt_bytes(&key, &data, ctx).unwrap();
        let pt = e2e::decrypt_bytes(&key, &ct, ctx).unwrap();
        assert_eq!(pt, data);
    }
}

#[test]
fn test_ciphertext_length_matches_plaintext() {
    let key = test_key();
    for len in [0usize, 1, 15, 16, 17, 1000] {
        let data = vec![7u8; len];
        let ct = e2e::encrypt_bytes(&key, &data, "ctx").unwrap();
        assert_eq!(ct.len(), len);
    }
}

#[test]
fn test_distinct_context_ids_change_ciphertext() {
    let key = test_key();
    let a = e2e::encrypt_text(&key, "same plaintext", "msg-1").unwrap();
    let b = e2e::encrypt_text(&key, "same plaintext", "msg-2").unwrap();
    assert_ne!(a, b);
}

#[test]
fn test_wrong_context_id_garbles() {
    let key = test_key();
    let ct = e2e::encrypt_text(&key, "attack at dawn", "msg-1").unwrap();
    let wrong = e2e::decrypt_bytes(&key, &ct, "msg-2").unwrap();
    assert_ne!(wrong, b"attack at dawn");
}

#[test]
fn test_wrong_key_length_errors_immediately() {
    let short = [0u8; 16];
    assert!(e2e::encrypt_bytes(&short, b"x", "ctx").is_err());
    assert!(e2e::decrypt_bytes(&short, b"x", "ctx").is_err());
}

#[test]
fn test_base64_standard_with_padding() {
    let encoded = e2e::to_base64(&[0xff, 0x00, 0x10]);
    assert_eq!(encoded, "/wAQ");
    let encoded = e2e::to_base64(b"ab");
    assert_eq!(encoded, "YWI=", "padding expected for JSON embedding");
    assert_eq!(e2e::from_base64("YWI=").unwrap(), b"ab");
    assert!(e2e::from_base64("not base64!!!").is_err());
}
