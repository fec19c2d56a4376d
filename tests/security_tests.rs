//! Security tests for sealed session cookies
//!
//! Test categories:
//! 1. Cipher Layers
//! 2. Token Codec
//! 3. Forgery Rejection
//! 4. Tamper Rejection
//! 5. Origin Binding
//! 6. Reissue
//! 7. Concurrency
//! 8. Error Handling
//!
//! ## Running tests
//!
//! ```bash
//! cargo test --test security_tests
//! ```

use cookie_seal::*;
use proptest::prelude::*;
use serde_json::{json, Value};
use std::sync::Arc;
use std::thread;

fn fixed_options() -> SessionOptions {
    SessionOptions {
        keys: Some([LayerKey::from_bytes([0xA1; 32]), LayerKey::from_bytes([0xB2; 32])]),
        ivs: Some([LayerIv::from_bytes([0xC3; 16]), LayerIv::from_bytes([0xD4; 16])]),
        token_id: Some("session".to_string()),
        ..Default::default()
    }
}

fn manager() -> SessionManager {
    SessionManager::with_options(fixed_options()).unwrap()
}

fn local() -> RequestContext {
    RequestContext::from_addr("127.0.0.1".parse().unwrap())
}

/// Jar presenting `token` in the signed slot, as the transport would
fn jar_with(manager: &SessionManager, token: &str) -> InMemoryCookieJar {
    let mut jar = InMemoryCookieJar::new();
    jar.insert(manager.token_id(), token, true);
    jar
}

// ============================================================
// 1. CIPHER LAYERS
// ============================================================

mod cipher_layers {
    use super::*;

    /// AES-256-CBC known-answer test (NIST SP 800-38A F.2.5, first block)
    #[test]
    fn aes_layer_matches_reference_vector() {
        let key = LayerKey::from_hex(
            "603deb1015ca71be2b73aef0857d77811f352c073b6108d72d9810a30914dff4",
        )
        .unwrap();
        let iv = LayerIv::from_hex("000102030405060708090a0b0c0d0e0f").unwrap();
        let plaintext = hex::decode("6bc1bee22e409f96e93d7e117393172a").unwrap();

        let ciphertext = CipherLayer::Aes.encode(&plaintext, &key, &iv);
        // First block is the reference value, second block is PKCS#7 padding
        assert_eq!(ciphertext.len(), 32);
        assert_eq!(hex::encode(&ciphertext[..16]), "f58c4c04d6e5f1ba779eabfb5f7bfbd6");
        assert_eq!(CipherLayer::Aes.decode(&ciphertext, &key, &iv).unwrap(), plaintext);
    }

    /// Layers with different keys are independent
    #[test]
    fn layer_keys_are_independent() {
        let material = KeyMaterial::generate();
        let (outer_key, outer_iv) = material.outer();
        let (inner_key, inner_iv) = material.inner();

        assert_ne!(outer_key.as_bytes(), inner_key.as_bytes());
        assert_ne!(outer_iv.as_bytes(), inner_iv.as_bytes());
    }

    /// Wrong key/IV lengths are rejected, not padded or truncated
    #[test]
    fn wrong_material_lengths_rejected() {
        assert_eq!(
            CipherLayer::Aes.encode_with_slices(b"x", &[0; 24], &[0; 16]),
            Err(CipherError::InvalidKeyLength(24))
        );
        assert_eq!(
            CipherLayer::Twofish.decode_with_slices(&[0; 16], &[0; 32], &[0; 12]),
            Err(CipherError::InvalidIvLength(12))
        );
    }

    /// Padding damage in the last block is detected
    #[test]
    fn corrupted_padding_is_detected() {
        let key = LayerKey::from_bytes([9; 32]);
        let iv = LayerIv::from_bytes([9; 16]);
        let mut ciphertext = CipherLayer::Twofish.encode(b"0123456789", &key, &iv);

        // CBC: flipping a bit of the previous block flips the same bit of the pad byte
        let prev = ciphertext.len() - BLOCK_SIZE - 1;
        ciphertext[prev] ^= 0x01;
        assert!(CipherLayer::Twofish.decode(&ciphertext, &key, &iv).is_err());
    }
}

// ============================================================
// 2. TOKEN CODEC
// ============================================================

mod token_codec {
    use super::*;

    fn arb_json() -> impl Strategy<Value = Value> {
        let leaf = prop_oneof![
            Just(Value::Null),
            any::<bool>().prop_map(Value::Bool),
            any::<i64>().prop_map(|n| json!(n)),
            any::<f64>()
                .prop_filter("JSON has no NaN or infinity", |f| f.is_finite())
                .prop_map(|f| json!(f)),
            "[a-zA-Z0-9 _\\-\u{e9}\u{1F600}]{0,24}".prop_map(Value::String),
        ];
        leaf.prop_recursive(3, 32, 6, |inner| {
            prop_oneof![
                prop::collection::vec(inner.clone(), 0..6).prop_map(Value::Array),
                prop::collection::btree_map("[a-z]{1,8}", inner, 0..6)
                    .prop_map(|map| Value::Object(map.into_iter().collect())),
            ]
        })
    }

    proptest! {
        #[test]
        fn open_inverts_seal(payload in arb_json()) {
            let material = KeyMaterial::generate();
            let codec = TokenCodec::new(&material);

            let token = codec.seal(&payload).unwrap();
            let opened: Value = codec.open(&token).unwrap();
            prop_assert_eq!(opened, payload);
        }

        #[test]
        fn floats_survive_seal_exactly(price in any::<f64>().prop_filter("finite", |f| f.is_finite())) {
            let material = KeyMaterial::new(
                [LayerKey::from_bytes([0x11; 32]), LayerKey::from_bytes([0x22; 32])],
                [LayerIv::from_bytes([0x33; 16]), LayerIv::from_bytes([0x44; 16])],
            );
            let codec = TokenCodec::new(&material);

            let token = codec.seal(&json!({ "price": price })).unwrap();
            let opened: Value = codec.open(&token).unwrap();
            prop_assert_eq!(opened["price"].as_f64(), Some(price));
        }
    }

    /// Tokens from two managers cannot be opened by each other
    #[test]
    fn foreign_keys_cannot_open() {
        let a = KeyMaterial::generate();
        let b = KeyMaterial::generate();

        let token = TokenCodec::new(&a).seal_json("{\"user\":\"alice\"}");
        assert!(TokenCodec::new(&b).open::<Value>(&token).is_err());
    }

    /// Same record, same keys: deterministic token (no random IV per token)
    #[test]
    fn sealing_is_deterministic() {
        let material = KeyMaterial::generate();
        let codec = TokenCodec::new(&material);
        assert_eq!(codec.seal_json("{}"), codec.seal_json("{}"));
    }
}

// ============================================================
// 3. FORGERY REJECTION
// ============================================================

mod forgery {
    use super::*;

    /// A token sealed with the right keys but never registered is rejected
    #[test]
    fn decodable_but_unregistered_token_is_rejected() {
        let manager = manager();
        let record = SessionRecord::new(json!({"user": "mallory"}), Some("127.0.0.1".into()));

        // Seal with the manager's own keys, bypassing registration
        let forged = TokenCodec::new(manager.config().material()).seal(&record).unwrap();
        assert!(TokenCodec::new(manager.config().material()).open::<SessionRecord>(&forged).is_ok());

        let jar = jar_with(&manager, &forged);
        assert_eq!(manager.read(&local(), &jar).unwrap(), None);
        assert_eq!(manager.token_state(&jar).unwrap(), TokenState::Unrecognized);
    }

    /// A token issued by another manager instance is rejected
    #[test]
    fn token_from_other_manager_is_rejected() {
        let issuer = manager();
        // Same keys and token id, separate registry
        let verifier = manager();

        let mut jar = InMemoryCookieJar::new();
        issuer.write(&local(), &mut jar, &json!({"admin": true})).unwrap();

        assert!(issuer.read(&local(), &jar).unwrap().is_some());
        assert_eq!(verifier.read(&local(), &jar).unwrap(), None);
    }

    /// Arbitrary junk in the slot reads as no session
    #[test]
    fn junk_tokens_read_absent() {
        let manager = manager();
        let long = "ff".repeat(64);
        for junk in ["", "00", "not hex at all", long.as_str(), "🍪"] {
            let jar = jar_with(&manager, junk);
            assert_eq!(manager.read(&local(), &jar).unwrap(), None, "junk: {junk:?}");
        }
    }

    /// Writing over an unregistered token never promotes it
    #[test]
    fn write_does_not_trust_forged_current_token() {
        let manager = manager();
        let record = SessionRecord::new(json!({}), None);
        let forged = TokenCodec::new(manager.config().material()).seal(&record).unwrap();

        let mut jar = jar_with(&manager, &forged);
        let receipt = manager.write(&local(), &mut jar, &json!({"user": "alice"})).unwrap();

        assert_eq!(receipt.outcome, WriteOutcome::Created);
        assert!(!manager.registry().is_trusted(&forged));
    }
}

// ============================================================
// 4. TAMPER REJECTION
// ============================================================

mod tamper {
    use super::*;

    /// Flipping any single character of a registered token makes reads absent
    #[test]
    fn every_single_character_change_is_rejected() {
        let manager = manager();
        let mut jar = InMemoryCookieJar::new();
        let receipt = manager.write(&local(), &mut jar, &json!({"user": "alice"})).unwrap();

        let original = receipt.token.into_bytes();
        for i in 0..original.len() {
            let mut tampered = original.clone();
            tampered[i] = if tampered[i] == b'0' { b'1' } else { b'0' };
            let tampered = String::from_utf8(tampered).unwrap();

            let jar = jar_with(&manager, &tampered);
            assert_eq!(manager.read(&local(), &jar).unwrap(), None, "position {i}");
        }
    }

    /// The decoder itself notices tampering of the ciphertext bytes
    #[test]
    fn open_fails_on_flipped_pad_byte() {
        let material = KeyMaterial::generate();
        let codec = TokenCodec::new(&material);
        let token = codec.seal_json("{\"user\":\"alice\"}");

        let mut bytes = hex::decode(&token).unwrap();
        let prev = bytes.len() - BLOCK_SIZE - 1;
        bytes[prev] ^= 0x01;
        assert!(codec.open::<Value>(&hex::encode(bytes)).is_err());
    }

    /// Appending or truncating characters is rejected
    #[test]
    fn length_changes_are_rejected() {
        let manager = manager();
        let mut jar = InMemoryCookieJar::new();
        let token = manager.write(&local(), &mut jar, &json!(1)).unwrap().token;

        for candidate in [format!("{token}00"), token[..token.len() - 2].to_string()] {
            let jar = jar_with(&manager, &candidate);
            assert_eq!(manager.read(&local(), &jar).unwrap(), None);
        }
    }
}

// ============================================================
// 5. ORIGIN BINDING
// ============================================================

mod origin_binding {
    use super::*;

    /// Session written from A and replayed from B reads absent
    #[test]
    fn session_from_other_address_is_rejected() {
        let manager = manager();
        let a = RequestContext::from_addr("10.0.0.1".parse().unwrap());
        let b = RequestContext::from_addr("10.0.0.2".parse().unwrap());

        let mut jar = InMemoryCookieJar::new();
        manager.write(&a, &mut jar, &json!({"user": "alice"})).unwrap();

        assert_eq!(manager.read(&b, &jar).unwrap(), None);
        assert_eq!(manager.read(&a, &jar).unwrap(), Some(json!({"user": "alice"})));
        // Still trusted: rejection is by origin, not by registry
        assert_eq!(manager.token_state(&jar).unwrap(), TokenState::Issued);
    }

    /// A request without an address does not match an addressed session
    #[test]
    fn missing_address_does_not_match() {
        let manager = manager();
        let mut jar = InMemoryCookieJar::new();
        manager.write(&local(), &mut jar, &json!({})).unwrap();

        assert_eq!(manager.read(&RequestContext::new(), &jar).unwrap(), None);
    }

    /// Addresses that are not plain IPs still bind to their exact text
    #[test]
    fn unparseable_addresses_do_not_collapse_together() {
        let manager = manager();
        let a = RequestContext::from_remote("fe80::1%eth0");
        let b = RequestContext::from_remote("fe80::2%wlan0");

        let mut jar = InMemoryCookieJar::new();
        manager.write(&a, &mut jar, &json!({"user": "alice"})).unwrap();

        assert_eq!(manager.read(&b, &jar).unwrap(), None);
        assert_eq!(manager.read(&a, &jar).unwrap(), Some(json!({"user": "alice"})));
    }

    /// Two requests without any address never share a session
    #[test]
    fn address_less_requests_fail_closed() {
        let manager = manager();
        let mut jar = InMemoryCookieJar::new();
        manager.write(&RequestContext::new(), &mut jar, &json!({})).unwrap();

        assert_eq!(manager.read(&RequestContext::new(), &jar).unwrap(), None);
    }

    /// A custom binder replaces the network address
    #[test]
    fn custom_binder_is_used() {
        let options = SessionOptions {
            lock: OriginLock::custom(|ctx| ctx.attribute("client-id").map(str::to_string)),
            ..fixed_options()
        };
        let manager = SessionManager::with_options(options).unwrap();

        let alice_home = RequestContext::from_addr("10.0.0.1".parse().unwrap())
            .with_attribute("client-id", "alice-device");
        let alice_mobile = RequestContext::from_addr("172.16.0.9".parse().unwrap())
            .with_attribute("client-id", "alice-device");
        let other = RequestContext::from_addr("10.0.0.1".parse().unwrap())
            .with_attribute("client-id", "other-device");

        let mut jar = InMemoryCookieJar::new();
        manager.write(&alice_home, &mut jar, &json!("hi")).unwrap();

        assert_eq!(manager.read(&alice_mobile, &jar).unwrap(), Some(json!("hi")));
        assert_eq!(manager.read(&other, &jar).unwrap(), None);
    }

    /// Reissue keeps the original binding
    #[test]
    fn reissue_keeps_origin() {
        let manager = manager();
        let a = RequestContext::from_addr("10.0.0.1".parse().unwrap());
        let b = RequestContext::from_addr("10.0.0.2".parse().unwrap());

        let mut jar = InMemoryCookieJar::new();
        manager.write(&a, &mut jar, &json!(1)).unwrap();
        let receipt = manager.write(&b, &mut jar, &json!(2)).unwrap();

        assert_eq!(receipt.outcome, WriteOutcome::Updated);
        assert_eq!(manager.read(&b, &jar).unwrap(), None);
        assert_eq!(manager.read(&a, &jar).unwrap(), Some(json!(2)));
    }
}

// ============================================================
// 6. REISSUE
// ============================================================

mod reissue {
    use super::*;

    /// After two writes only the newest token is trusted
    #[test]
    fn old_token_untrusted_after_reissue() {
        let manager = manager();
        let mut jar = InMemoryCookieJar::new();

        let old = manager.write(&local(), &mut jar, &json!({"v": 1})).unwrap().token;
        let new = manager.write(&local(), &mut jar, &json!({"v": 2})).unwrap().token;

        assert!(!manager.registry().is_trusted(&old));
        assert!(manager.registry().is_trusted(&new));
        assert_eq!(manager.registry().len(), 1);
    }

    /// One registry entry and one cookie write per call
    #[test]
    fn one_cookie_write_per_call() {
        let manager = manager();
        let mut jar = InMemoryCookieJar::new();

        for i in 0..5 {
            manager.write(&local(), &mut jar, &json!(i)).unwrap();
        }
        assert_eq!(jar.write_count(), 5);
        assert_eq!(manager.registry().len(), 1);
    }

    /// Separate clients get separate registry entries
    #[test]
    fn independent_sessions_coexist() {
        let manager = manager();
        let mut alice = InMemoryCookieJar::new();
        let mut bob = InMemoryCookieJar::new();

        manager.write(&local(), &mut alice, &json!("alice")).unwrap();
        manager.write(&local(), &mut bob, &json!("bob")).unwrap();

        assert_eq!(manager.registry().len(), 2);
        assert_eq!(manager.read(&local(), &alice).unwrap(), Some(json!("alice")));
        assert_eq!(manager.read(&local(), &bob).unwrap(), Some(json!("bob")));
    }

    /// With eviction off entries stay until superseded
    #[test]
    fn eviction_can_be_disabled() {
        let options = SessionOptions { evict_expired: false, ..fixed_options() };
        let manager = SessionManager::with_options(options).unwrap();
        assert_eq!(manager.registry().ttl(), None);

        let mut jar = InMemoryCookieJar::new();
        manager.write(&local(), &mut jar, &json!({})).unwrap();
        assert_eq!(manager.registry().purge_expired(), 0);
        assert_eq!(manager.registry().len(), 1);
    }

    /// With a tiny max age, tokens stop being trusted once it passes
    #[test]
    fn expired_tokens_are_untrusted() {
        let options = SessionOptions {
            cookie: CookiePolicy {
                max_age: Some(std::time::Duration::from_millis(20)),
                ..CookiePolicy::default()
            },
            ..fixed_options()
        };
        let manager = SessionManager::with_options(options).unwrap();
        let mut jar = InMemoryCookieJar::new();
        manager.write(&local(), &mut jar, &json!({})).unwrap();

        thread::sleep(std::time::Duration::from_millis(60));
        assert_eq!(manager.read(&local(), &jar).unwrap(), None);
        assert_eq!(manager.registry().purge_expired(), 1);
        assert!(manager.registry().is_empty());
    }
}

// ============================================================
// 7. CONCURRENCY
// ============================================================

mod concurrency {
    use super::*;

    /// Many threads issuing sessions lose no registrations
    #[test]
    fn concurrent_writes_register_every_token() {
        let manager = Arc::new(manager());
        let threads = 8;
        let per_thread = 25;

        let handles: Vec<_> = (0..threads)
            .map(|t| {
                let manager = Arc::clone(&manager);
                thread::spawn(move || {
                    let mut tokens = Vec::new();
                    for i in 0..per_thread {
                        let mut jar = InMemoryCookieJar::new();
                        let receipt = manager
                            .write(&local(), &mut jar, &json!({"t": t, "i": i}))
                            .unwrap();
                        tokens.push(receipt.token);
                    }
                    tokens
                })
            })
            .collect();

        let tokens: Vec<String> = handles.into_iter().flat_map(|h| h.join().unwrap()).collect();
        assert_eq!(manager.registry().len(), threads * per_thread);
        assert!(tokens.iter().all(|token| manager.registry().is_trusted(token)));
    }

    /// Concurrent reissues of separate sessions each leave exactly one live token
    #[test]
    fn concurrent_reissues_supersede_cleanly() {
        let manager = Arc::new(manager());
        let threads = 8;

        let handles: Vec<_> = (0..threads)
            .map(|t| {
                let manager = Arc::clone(&manager);
                thread::spawn(move || {
                    let mut jar = InMemoryCookieJar::new();
                    let mut last = String::new();
                    for i in 0..20 {
                        last = manager.write(&local(), &mut jar, &json!([t, i])).unwrap().token;
                    }
                    let payload = manager.read(&local(), &jar).unwrap();
                    (last, payload)
                })
            })
            .collect();

        for (t, handle) in handles.into_iter().enumerate() {
            let (last, payload) = handle.join().unwrap();
            assert!(manager.registry().is_trusted(&last));
            assert_eq!(payload, Some(json!([t, 19])));
        }
        assert_eq!(manager.registry().len(), threads);
    }

    /// Readers racing a writer see either a valid session or none, never an error
    #[test]
    fn reads_during_reissue_never_error() {
        let manager = Arc::new(manager());
        let mut jar = InMemoryCookieJar::new();
        let first = manager.write(&local(), &mut jar, &json!(0)).unwrap().token;

        let reader = {
            let manager = Arc::clone(&manager);
            let jar = jar_with(&manager, &first);
            thread::spawn(move || {
                for _ in 0..200 {
                    let result = manager.read(&local(), &jar).unwrap();
                    assert!(result.is_none() || result == Some(json!(0)));
                }
            })
        };

        for i in 1..50 {
            manager.write(&local(), &mut jar, &json!(i)).unwrap();
        }
        reader.join().unwrap();
        assert!(!manager.registry().is_trusted(&first));
    }
}

// ============================================================
// 8. ERROR HANDLING
// ============================================================

mod error_handling {
    use super::*;

    /// No cookie parser at all is a configuration error on both paths
    #[test]
    fn missing_cookie_parser_is_loud() {
        let manager = manager();
        let mut jar = InMemoryCookieJar::without_parser();

        assert!(matches!(
            manager.write(&local(), &mut jar, &json!({})),
            Err(SessionError::Configuration)
        ));
        assert!(matches!(manager.read(&local(), &jar), Err(SessionError::Configuration)));
    }

    /// Only the unsigned map present is still a working transport
    #[test]
    fn unsigned_only_transport_is_not_a_configuration_error() {
        let manager = manager();
        let jar = InMemoryCookieJar::unsigned_only();
        // Signed policy, no signed map: nothing to read, but no error either
        assert_eq!(manager.read(&local(), &jar).unwrap(), None);
    }

    /// Absent cookie reads as no session
    #[test]
    fn absent_cookie_reads_none() {
        let manager = manager();
        let jar = InMemoryCookieJar::new();
        assert_eq!(manager.read(&local(), &jar).unwrap(), None);
        assert_eq!(manager.read_record(&local(), &jar).unwrap(), None);
    }

    /// Invalid supplied configuration is reported at construction
    #[test]
    fn invalid_token_id_is_reported() {
        let options = SessionOptions { token_id: Some("bad name".into()), ..fixed_options() };
        assert!(matches!(
            SessionManager::with_options(options),
            Err(SessionError::InvalidConfig(ConfigError::InvalidTokenId))
        ));
    }

    /// Error messages never echo the token
    #[test]
    fn decode_errors_do_not_contain_token() {
        let material = KeyMaterial::generate();
        let token = "ab".repeat(40);
        let err = TokenCodec::new(&material).open_json(&token).unwrap_err();
        assert!(!err.to_string().contains(&token));
    }
}
