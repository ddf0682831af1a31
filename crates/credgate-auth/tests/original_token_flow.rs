//! Self-issued token verification, end to end
//!
//! The service's public certificate is served from a mock x509 metadata
//! endpoint; tokens are signed with the matching fixture private key.

mod common;

use common::{
    MockKeyServer, SERVICE_CERT_PEM, SERVICE_EMAIL, STRANGER_PRIVATE_PEM, custom_token_claims,
    engine_with_keys, init_tracing, now_secs, sign,
};
use credgate_auth::{AuthError, ClaimName};
use pretty_assertions::assert_eq;
use serde_json::json;

async fn key_server() -> MockKeyServer {
    let keys = MockKeyServer::start().await;
    keys.publish(&[("service-key", SERVICE_CERT_PEM)]).await;
    keys
}

fn custom_token() -> String {
    sign(&custom_token_claims(), common::SERVICE_PRIVATE_PEM, "service-key")
}

#[tokio::test]
async fn test_custom_token_verifies_to_flat_identity() {
    init_tracing();
    let keys = key_server().await;
    let engine = engine_with_keys(keys.metadata_url(), true);

    let identity = engine.verify_token(&custom_token()).await.unwrap();

    assert_eq!(identity.subject_id(), "custom-token-user");
    assert_eq!(identity.string_claim("foo").as_deref(), Some("bar"));
    assert_eq!(identity.string_claim("hoge").as_deref(), Some("fuga"));
    assert_eq!(identity.int_claim("int_claim"), Some(123));
    assert_eq!(identity.claim("iss"), Some(&json!(SERVICE_EMAIL)));
    assert!(!identity.is_expired());
    assert_eq!(engine.registry().latest_key_id().as_deref(), Some("service-key"));
}

#[tokio::test]
async fn test_disabled_original_tokens_are_rejected() {
    let keys = key_server().await;
    let engine = engine_with_keys(keys.metadata_url(), false);

    let err = engine.verify_token(&custom_token()).await.unwrap_err();
    assert!(matches!(err, AuthError::RejectedOriginalToken));

    // Rejected before any key lookup
    assert_eq!(keys.fetch_count().await, 0);
}

#[tokio::test]
async fn test_garbage_signature_is_signature_error() {
    let keys = key_server().await;
    let engine = engine_with_keys(keys.metadata_url(), true);

    let token = custom_token();
    let (unsigned, _) = token.rsplit_once('.').unwrap();
    let forged = format!("{unsigned}.bm90LWEtc2lnbmF0dXJl");

    let err = engine.verify_token(&forged).await.unwrap_err();
    assert!(matches!(err, AuthError::SignatureNotFound), "got {err:?}");
}

#[tokio::test]
async fn test_trailing_characters_fail() {
    let keys = key_server().await;
    let engine = engine_with_keys(keys.metadata_url(), true);
    let token = custom_token();

    for suffix in ["broken", " ", "A"] {
        let err = engine
            .verify_token(&format!("{token}{suffix}"))
            .await
            .unwrap_err();
        assert!(
            matches!(err, AuthError::SignatureNotFound),
            "suffix {suffix:?} gave {err:?}"
        );
    }

    // The untouched token still verifies
    assert!(engine.verify_token(&token).await.is_ok());
}

#[tokio::test]
async fn test_unknown_signer_fails_after_one_refresh() {
    let keys = key_server().await;
    let engine = engine_with_keys(keys.metadata_url(), true);

    let token = sign(&custom_token_claims(), STRANGER_PRIVATE_PEM, "service-key");
    let err = engine.verify_token(&token).await.unwrap_err();

    assert!(matches!(err, AuthError::SignatureNotFound));
    assert_eq!(keys.fetch_count().await, 1);
}

#[tokio::test]
async fn test_malformed_tokens() {
    let keys = key_server().await;
    let engine = engine_with_keys(keys.metadata_url(), true);

    for token in ["", "abc", "a.b", "a.b.c.d"] {
        let err = engine.verify_token(token).await.unwrap_err();
        assert!(matches!(err, AuthError::MalformedToken(_)), "{token:?} gave {err:?}");
    }
    assert_eq!(keys.fetch_count().await, 0);
}

#[tokio::test]
async fn test_claim_failures_name_the_claim() {
    let keys = key_server().await;
    let engine = engine_with_keys(keys.metadata_url(), true);

    let cases = [
        ("aud", json!("https://elsewhere.example.com"), ClaimName::Aud),
        ("exp", json!(now_secs() - 60), ClaimName::Exp),
        ("iat", json!(now_secs() + 86400), ClaimName::Iat),
        ("nbf", json!(now_secs() + 86400), ClaimName::Nbf),
        ("iss", json!("intruder@example.com"), ClaimName::Iss),
        ("uid", json!(""), ClaimName::Uid),
    ];

    for (name, value, expected) in cases {
        let mut claims = custom_token_claims();
        claims[name] = value;
        let token = sign(&claims, common::SERVICE_PRIVATE_PEM, "service-key");

        match engine.verify_token(&token).await {
            Err(AuthError::ClaimsInvalid { claim, .. }) => assert_eq!(claim, expected),
            other => panic!("{name}: expected ClaimsInvalid, got {other:?}"),
        }
    }
}

#[tokio::test]
async fn test_float_and_string_expiry() {
    let keys = key_server().await;
    let engine = engine_with_keys(keys.metadata_url(), true);
    let exp = now_secs() + 600;

    for encoded in [json!(exp as f64), json!(exp.to_string())] {
        let mut claims = custom_token_claims();
        claims["exp"] = encoded;
        let token = sign(&claims, common::SERVICE_PRIVATE_PEM, "service-key");

        let identity = engine.verify_token(&token).await.unwrap();
        assert_eq!(identity.expires_at().timestamp(), exp);
    }
}
