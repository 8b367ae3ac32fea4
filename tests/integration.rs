//! End-to-end scenarios (§8) driven through the public API: config parsing,
//! the worker cache, the fetch coordinator, and the filter adapter wired
//! together the way a host would, against a real JWKS endpoint served by
//! `wiremock`.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use jwt_authn_core::{
    filter::{DecodeOutcome, StreamAction},
    Authenticator, FetchCoordinator, FilterAdapter, FilterConfig, IssuerCache, RequestContext,
    ReqwestTransport,
};
use rand_core::OsRng;
use rsa::pkcs1v15::SigningKey;
use rsa::sha2::Sha256;
use rsa::signature::{RandomizedSigner, SignatureEncoding};
use rsa::traits::PublicKeyParts;
use std::collections::HashMap;
use std::sync::{Arc, Once};
use std::time::Duration;
use tokio::sync::Mutex;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

static TRACING_INIT: Once = Once::new();

fn init_tracing() {
    TRACING_INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .try_init();
    });
}

fn rsa_keypair() -> (rsa::RsaPrivateKey, rsa::RsaPublicKey) {
    let priv_key = rsa::RsaPrivateKey::new(&mut OsRng, 2048).unwrap();
    let pub_key = priv_key.to_public_key();
    (priv_key, pub_key)
}

fn jwks_body(pub_key: &rsa::RsaPublicKey, kid: &str) -> String {
    serde_json::json!({
        "keys": [{
            "kty": "RSA",
            "kid": kid,
            "alg": "RS256",
            "n": URL_SAFE_NO_PAD.encode(pub_key.n().to_bytes_be()),
            "e": URL_SAFE_NO_PAD.encode(pub_key.e().to_bytes_be()),
        }]
    })
    .to_string()
}

fn sign(priv_key: rsa::RsaPrivateKey, kid: &str, iss: &str, aud: &str, exp: i64) -> String {
    let header = format!(r#"{{"alg":"RS256","kid":"{kid}"}}"#);
    let payload = format!(r#"{{"iss":"{iss}","exp":{exp},"aud":"{aud}"}}"#);
    let h = URL_SAFE_NO_PAD.encode(header.as_bytes());
    let p = URL_SAFE_NO_PAD.encode(payload.as_bytes());
    let signing_input = format!("{h}.{p}");
    let signing_key = SigningKey::<Sha256>::new(priv_key);
    let sig: rsa::pkcs1v15::Signature = signing_key.sign_with_rng(&mut OsRng, signing_input.as_bytes());
    format!("{signing_input}.{}", URL_SAFE_NO_PAD.encode(sig.to_bytes()))
}

fn bearer_ctx(token: &str) -> RequestContext {
    let mut headers = HashMap::new();
    headers.insert("authorization".to_string(), format!("Bearer {token}"));
    RequestContext { headers, query: None }
}

async fn remote_config(server: &MockServer, issuer: &str, audience: &str) -> FilterConfig {
    let yaml = format!(
        "issuers:\n  - name: {issuer}\n    audiences: [{audience}]\n    pubkey:\n      type: jwks\n      uri: {}/jwks\n      cluster: idp\n",
        server.uri()
    );
    FilterConfig::parse(&yaml).unwrap()
}

fn build_adapter(config: &FilterConfig) -> Arc<FilterAdapter> {
    let cache = Arc::new(Mutex::new(IssuerCache::new(config)));
    let fetcher = Arc::new(FetchCoordinator::new(Arc::new(ReqwestTransport::default())));
    let authenticator = Arc::new(Authenticator::new(cache, fetcher, config.userinfo_type));
    Arc::new(FilterAdapter::new(authenticator))
}

#[tokio::test]
async fn cold_cache_fetches_jwks_and_authenticates() {
    init_tracing();
    let (priv_key, pub_key) = rsa_keypair();
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/jwks"))
        .respond_with(ResponseTemplate::new(200).set_body_string(jwks_body(&pub_key, "k1")))
        .expect(1)
        .mount(&server)
        .await;

    let config = remote_config(&server, "https://issuer.example", "aud1").await;
    let adapter = build_adapter(&config);

    let token = sign(priv_key, "k1", "https://issuer.example", "aud1", 9_999_999_999);
    let mut ctx = bearer_ctx(&token);
    let outcome = adapter.decode_headers(&mut ctx, 1_000).await;

    assert!(matches!(outcome, DecodeOutcome::Continue));
    assert!(ctx.headers.contains_key("authenticated-userinfo"));
}

#[tokio::test]
async fn concurrent_cold_requests_single_flight_through_the_adapter() {
    init_tracing();
    let (priv_key, pub_key) = rsa_keypair();
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/jwks"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string(jwks_body(&pub_key, "k1"))
                .set_delay(Duration::from_millis(50)),
        )
        .expect(1)
        .mount(&server)
        .await;

    let config = remote_config(&server, "https://issuer.example", "aud1").await;
    let adapter = build_adapter(&config);

    let priv_pem_a = priv_key.clone();
    let token_a = sign(priv_pem_a, "k1", "https://issuer.example", "aud1", 9_999_999_999);
    let token_b = sign(priv_key, "k1", "https://issuer.example", "aud1", 9_999_999_999);

    let adapter_a = Arc::clone(&adapter);
    let adapter_b = Arc::clone(&adapter);
    let task_a = tokio::spawn(async move {
        let mut ctx = bearer_ctx(&token_a);
        adapter_a.decode_headers(&mut ctx, 1_000).await
    });
    let task_b = tokio::spawn(async move {
        let mut ctx = bearer_ctx(&token_b);
        adapter_b.decode_headers(&mut ctx, 1_000).await
    });

    let (a, b) = tokio::join!(task_a, task_b);
    assert!(matches!(a.unwrap(), DecodeOutcome::Continue));
    assert!(matches!(b.unwrap(), DecodeOutcome::Continue));
    // `.expect(1)` on the mock asserts exactly one GET was made, verified on drop.
}

#[tokio::test]
async fn expired_token_yields_local_reply() {
    init_tracing();
    let (priv_key, pub_key) = rsa_keypair();
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/jwks"))
        .respond_with(ResponseTemplate::new(200).set_body_string(jwks_body(&pub_key, "k1")))
        .mount(&server)
        .await;

    let config = remote_config(&server, "https://issuer.example", "aud1").await;
    let adapter = build_adapter(&config);

    let token = sign(priv_key, "k1", "https://issuer.example", "aud1", 500);
    let mut ctx = bearer_ctx(&token);
    let outcome = adapter.decode_headers(&mut ctx, 1_000).await;

    match outcome {
        DecodeOutcome::LocalReply { status, body } => {
            assert_eq!(status, 401);
            assert_eq!(body, "Expired");
        }
        other => panic!("expected a local reply, got {other:?}"),
    }
}

#[tokio::test]
async fn audience_mismatch_yields_local_reply_without_fetching() {
    init_tracing();
    let (priv_key, pub_key) = rsa_keypair();
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/jwks"))
        .respond_with(ResponseTemplate::new(200).set_body_string(jwks_body(&pub_key, "k1")))
        .mount(&server)
        .await;

    let config = remote_config(&server, "https://issuer.example", "aud1").await;
    let adapter = build_adapter(&config);

    let token = sign(priv_key, "k1", "https://issuer.example", "other-aud", 9_999_999_999);
    let mut ctx = bearer_ctx(&token);
    let outcome = adapter.decode_headers(&mut ctx, 1_000).await;

    match outcome {
        DecodeOutcome::LocalReply { status, body } => {
            assert_eq!(status, 401);
            assert_eq!(body, "AudienceNotAllowed");
        }
        other => panic!("expected a local reply, got {other:?}"),
    }
}

#[tokio::test]
async fn destroy_mid_fetch_cancels_and_next_request_refetches() {
    init_tracing();
    let (priv_key, pub_key) = rsa_keypair();
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/jwks"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string(jwks_body(&pub_key, "k1"))
                .set_delay(Duration::from_millis(80)),
        )
        .expect(2)
        .mount(&server)
        .await;

    let config = remote_config(&server, "https://issuer.example", "aud1").await;
    let adapter = build_adapter(&config);

    let priv_for_second = priv_key.clone();
    let token = sign(priv_key, "k1", "https://issuer.example", "aud1", 9_999_999_999);
    let mut ctx = bearer_ctx(&token);

    let adapter_clone = Arc::clone(&adapter);
    let handle = tokio::spawn(async move { adapter_clone.decode_headers(&mut ctx, 1_000).await });
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(adapter.decode_data(), StreamAction::StopIteration);

    adapter.destroy();
    let _ = handle.await.unwrap();

    // a second, distinct adapter stands in for the next request on this
    // connection; it must re-fetch rather than observe the cancelled one.
    let adapter2 = build_adapter(&remote_config(&server, "https://issuer.example", "aud1").await);
    let token2 = sign(priv_for_second, "k1", "https://issuer.example", "aud1", 9_999_999_999);
    let mut ctx2 = bearer_ctx(&token2);
    let outcome2 = adapter2.decode_headers(&mut ctx2, 1_000).await;
    assert!(matches!(outcome2, DecodeOutcome::Continue));
}
