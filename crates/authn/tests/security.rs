//! Security-focused authentication tests.
//!
//! These tests drive the public flows the way an attacker would: replaying
//! signatures, signing for someone else, presenting stale challenges and
//! forging or tampering with session tokens.
#![allow(clippy::expect_used, clippy::panic)]

mod common;

use std::time::Duration;

use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use chrono::Utc;
use common::{Fixture, Wallet};
use ed25519_dalek::SigningKey;
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use rand_core::OsRng;
use serde_json::json;
use trustkey_authn::{AuditAction, AuditStatus, AuthConfig, AuthError, SessionIssuer};
use zeroize::Zeroizing;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// PKCS#8 DER wrapping of an Ed25519 key.
fn pkcs8_der(key: &SigningKey) -> Zeroizing<Vec<u8>> {
    let mut der = Zeroizing::new(vec![
        0x30, 0x2e, // SEQUENCE, 46 bytes
        0x02, 0x01, 0x00, // INTEGER version 0
        0x30, 0x05, // SEQUENCE, 5 bytes (algorithm identifier)
        0x06, 0x03, 0x2b, 0x65, 0x70, // OID 1.3.101.112 (Ed25519)
        0x04, 0x22, // OCTET STRING, 34 bytes
        0x04, 0x20, // OCTET STRING, 32 bytes (the actual key)
    ]);
    der.extend_from_slice(&key.to_bytes());
    der
}

fn sign_claims(key: &SigningKey, claims: &serde_json::Value) -> String {
    let encoding_key = EncodingKey::from_ed_der(&pkcs8_der(key));
    jsonwebtoken::encode(&Header::new(Algorithm::EdDSA), claims, &encoding_key)
        .expect("encode test jwt")
}

fn raw_jwt(header: &serde_json::Value, payload: &serde_json::Value) -> String {
    let header_b64 = URL_SAFE_NO_PAD.encode(serde_json::to_vec(header).expect("header json"));
    let payload_b64 = URL_SAFE_NO_PAD.encode(serde_json::to_vec(payload).expect("payload json"));
    format!("{header_b64}.{payload_b64}.")
}

fn now() -> u64 {
    u64::try_from(Utc::now().timestamp()).expect("clock after epoch")
}

// ---------------------------------------------------------------------------
// Challenge replay and spoofing
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_replayed_signature_is_rejected() {
    let fx = Fixture::new();
    let alice = fx.register("alice");

    let challenge = fx.auth.request_challenge(alice.address()).await.expect("challenge");
    let signature = alice.sign(&challenge.nonce);
    fx.auth.verify(alice.address(), &signature).await.expect("first use");

    let replay = fx.auth.verify(alice.address(), &signature).await;
    assert!(matches!(replay, Err(AuthError::NonceExpiredOrMissing)), "got {replay:?}");
}

#[tokio::test]
async fn test_signature_over_old_challenge_fails_after_reissue() {
    let fx = Fixture::new();
    let alice = fx.register("alice");

    let first = fx.auth.request_challenge(alice.address()).await.expect("first");
    let _second = fx.auth.request_challenge(alice.address()).await.expect("second");

    // Recovery over the live nonce yields some other address.
    let result = fx.auth.verify(alice.address(), &alice.sign(&first.nonce)).await;
    assert!(matches!(result, Err(AuthError::SignatureMismatch)), "got {result:?}");
}

#[tokio::test]
async fn test_signing_for_another_identity_is_a_mismatch() {
    let fx = Fixture::new();
    let alice = fx.register("alice");
    let mallory = fx.register("mallory");

    let challenge = fx.auth.request_challenge(alice.address()).await.expect("challenge");
    let result = fx.auth.verify(alice.address(), &mallory.sign(&challenge.nonce)).await;
    assert!(matches!(result, Err(AuthError::SignatureMismatch)), "got {result:?}");

    // The challenge is gone; alice must start over.
    let retry = fx.auth.verify(alice.address(), &alice.sign(&challenge.nonce)).await;
    assert!(matches!(retry, Err(AuthError::NonceExpiredOrMissing)), "got {retry:?}");

    let failure = fx
        .audit
        .events()
        .into_iter()
        .find(|e| e.status.reason() == Some("signature_mismatch"))
        .expect("mismatch audited");
    assert_eq!(failure.identity, alice.address());
    assert_eq!(failure.metadata_value("stage"), Some("signature_pending"));
}

#[tokio::test]
async fn test_stale_nonce_echo_destroys_live_challenge() {
    let fx = Fixture::new();
    let alice = fx.register("alice");

    let first = fx.auth.request_challenge(alice.address()).await.expect("first");
    let second = fx.auth.request_challenge(alice.address()).await.expect("second");

    let stale =
        fx.auth.verify_with_nonce(alice.address(), &first.nonce, &alice.sign(&first.nonce)).await;
    assert!(matches!(stale, Err(AuthError::NonceExpiredOrMissing)));

    let live =
        fx.auth.verify_with_nonce(alice.address(), &second.nonce, &alice.sign(&second.nonce)).await;
    assert!(matches!(live, Err(AuthError::NonceExpiredOrMissing)));
}

#[tokio::test]
async fn test_expired_challenge_is_rejected() {
    let fx = Fixture::with(|admin| {
        AuthConfig::builder()
            .admins(vec![admin])
            .nonce_ttl(Duration::from_millis(50))
            .build()
            .expect("config")
    });
    let alice = fx.register("alice");

    let challenge = fx.auth.request_challenge(alice.address()).await.expect("challenge");
    tokio::time::sleep(Duration::from_millis(120)).await;

    let result = fx.auth.verify(alice.address(), &alice.sign(&challenge.nonce)).await;
    assert!(matches!(result, Err(AuthError::NonceExpiredOrMissing)), "got {result:?}");
}

#[tokio::test]
async fn test_unregistered_identity_gets_no_challenge() {
    let fx = Fixture::new();
    let stranger = Wallet::generate();

    let result = fx.auth.request_challenge(stranger.address()).await;
    assert!(matches!(result, Err(AuthError::UnregisteredIdentity)));
    assert_eq!(result.expect_err("refused").reason(), "unregistered_user");

    // Nothing was issued, so a signed guess has nothing to match.
    let verify = fx.auth.verify(stranger.address(), &stranger.sign("trustkey-login-00")).await;
    assert!(matches!(verify, Err(AuthError::NonceExpiredOrMissing)));

    let events = fx.audit.events();
    assert!(events.iter().all(|e| e.action == AuditAction::Login));
    assert!(events.iter().all(|e| matches!(e.status, AuditStatus::Failure(_))));
}

#[tokio::test]
async fn test_malformed_signatures_are_rejected() {
    let fx = Fixture::new();
    let alice = fx.register("alice");

    for signature in ["", "0x", "0xzz", "0x1234", &format!("0x{}", "ab".repeat(65))] {
        fx.auth.request_challenge(alice.address()).await.expect("challenge");
        let result = fx.auth.verify(alice.address(), signature).await;
        assert!(
            matches!(result, Err(AuthError::MalformedSignature)),
            "signature {signature:?}: got {result:?}"
        );
    }
}

// ---------------------------------------------------------------------------
// Session tokens
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_token_from_another_key_is_rejected() {
    let fx = Fixture::new();
    let alice = fx.register("alice");
    let impostor =
        SessionIssuer::generate("trustkey", Duration::from_secs(3600)).expect("impostor issuer");

    let forged = impostor.mint(&alice.identity(), trustkey_authn::Role::Admin).expect("mint");
    let result = fx.auth.authenticate(&format!("Bearer {}", forged.token));
    assert!(matches!(result, Err(AuthError::InvalidOrExpiredToken)), "got {result:?}");
}

#[test]
fn test_alg_none_token_is_rejected() {
    let issuer = SessionIssuer::generate("trustkey", Duration::from_secs(3600)).expect("issuer");
    let token = raw_jwt(
        &json!({"alg": "none", "typ": "JWT"}),
        &json!({
            "iss": "trustkey",
            "sub": "0x5aaeb6053f3e94c9b9a09f33669435e7ef1beaed",
            "role": "admin",
            "iat": now(),
            "exp": now() + 3600,
            "jti": "forged",
        }),
    );
    assert!(matches!(issuer.verify(&token), Err(AuthError::InvalidOrExpiredToken)));
}

#[test]
fn test_hs256_token_is_rejected() {
    let issuer = SessionIssuer::generate("trustkey", Duration::from_secs(3600)).expect("issuer");
    let token = jsonwebtoken::encode(
        &Header::new(Algorithm::HS256),
        &json!({
            "iss": "trustkey",
            "sub": "0x5aaeb6053f3e94c9b9a09f33669435e7ef1beaed",
            "role": "admin",
            "iat": now(),
            "exp": now() + 3600,
            "jti": "forged",
        }),
        &EncodingKey::from_secret(b"guessable"),
    )
    .expect("encode hs256");
    assert!(matches!(issuer.verify(&token), Err(AuthError::InvalidOrExpiredToken)));
}

#[test]
fn test_expired_token_is_rejected() {
    let key = SigningKey::generate(&mut OsRng);
    let issuer = SessionIssuer::new(&key, "trustkey", Duration::from_secs(3600)).expect("issuer");
    let token = sign_claims(
        &key,
        &json!({
            "iss": "trustkey",
            "sub": "0x5aaeb6053f3e94c9b9a09f33669435e7ef1beaed",
            "role": "user",
            "iat": now() - 7200,
            "exp": now() - 10,
            "jti": "old",
        }),
    );
    assert!(matches!(issuer.verify(&token), Err(AuthError::InvalidOrExpiredToken)));
}

#[test]
fn test_wrong_issuer_is_rejected() {
    let key = SigningKey::generate(&mut OsRng);
    let issuer = SessionIssuer::new(&key, "trustkey", Duration::from_secs(3600)).expect("issuer");
    let token = sign_claims(
        &key,
        &json!({
            "iss": "someone-else",
            "sub": "0x5aaeb6053f3e94c9b9a09f33669435e7ef1beaed",
            "role": "user",
            "iat": now(),
            "exp": now() + 3600,
            "jti": "x",
        }),
    );
    assert!(matches!(issuer.verify(&token), Err(AuthError::InvalidOrExpiredToken)));
}

#[test]
fn test_tampered_role_breaks_signature() {
    let issuer = SessionIssuer::generate("trustkey", Duration::from_secs(3600)).expect("issuer");
    let alice = Wallet::generate();
    let session = issuer.mint(&alice.identity(), trustkey_authn::Role::User).expect("mint");

    let mut parts: Vec<String> = session.token.split('.').map(str::to_owned).collect();
    let mut payload: serde_json::Value =
        serde_json::from_slice(&URL_SAFE_NO_PAD.decode(&parts[1]).expect("b64")).expect("json");
    payload["role"] = json!("admin");
    parts[1] = URL_SAFE_NO_PAD.encode(serde_json::to_vec(&payload).expect("json"));

    assert!(matches!(issuer.verify(&parts.join(".")), Err(AuthError::InvalidOrExpiredToken)));
}

#[test]
fn test_malformed_authorization_headers_are_rejected() {
    let issuer = SessionIssuer::generate("trustkey", Duration::from_secs(3600)).expect("issuer");
    for header in ["", "Bearer", "Bearer ", "Basic dXNlcjpwdw==", "token-without-scheme"] {
        assert!(
            matches!(issuer.authenticate(header), Err(AuthError::InvalidAuthorizationHeader)),
            "header {header:?}"
        );
    }
    assert!(matches!(
        issuer.authenticate("Bearer not.a.jwt"),
        Err(AuthError::InvalidOrExpiredToken)
    ));
}
