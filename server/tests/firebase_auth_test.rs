//! Router tests with real Firebase token verification.
//!
//! The signing key set is served by a wiremock server; tokens are signed with
//! the RSA key in `tests/fixtures`.

mod common;

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use serde_json::{json, Value};
use tower::ServiceExt;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use common::{firebase_claims, sign_token, split, JWKS, PROJECT_ID, TEST_KID};
use unityworks_server::firebase::FirebaseAuth;
use unityworks_server::routes::{create_router, AppState};
use unityworks_server::store::memory::MemoryStore;
use unityworks_server::store::Collections;

const EMAIL: &str = "volunteer@example.com";

struct Harness {
    _jwks_server: MockServer,
    router: axum::Router,
    store: Arc<MemoryStore>,
}

async fn setup() -> Harness {
    let jwks_server = MockServer::start().await;
    let jwks: Value = serde_json::from_str(JWKS).unwrap();
    Mock::given(method("GET"))
        .and(path("/jwk"))
        .respond_with(ResponseTemplate::new(200).set_body_json(jwks))
        .mount(&jwks_server)
        .await;

    let verifier = FirebaseAuth::new(PROJECT_ID, format!("{}/jwk", jwks_server.uri())).unwrap();
    let store = Arc::new(MemoryStore::new());
    let state = AppState::new(Collections::from_store(store.clone()), Arc::new(verifier));

    Harness {
        _jwks_server: jwks_server,
        router: create_router(state),
        store,
    }
}

async fn my_events(harness: &Harness, token: &str) -> (StatusCode, Value) {
    let request = Request::get(format!("/myEvents?email={EMAIL}"))
        .header("authorization", format!("Bearer {token}"))
        .body(Body::empty())
        .unwrap();
    split(harness.router.clone().oneshot(request).await.unwrap()).await
}

#[tokio::test]
async fn valid_firebase_token_is_accepted() {
    let harness = setup().await;
    let token = sign_token(TEST_KID, &firebase_claims(EMAIL, json!({})));

    let (status, body) = my_events(&harness, &token).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!([]));
    assert_eq!(harness.store.call_count(), 1);
}

#[tokio::test]
async fn firebase_token_for_other_email_is_forbidden() {
    let harness = setup().await;
    let token = sign_token(
        TEST_KID,
        &firebase_claims("someone-else@example.com", json!({})),
    );

    let (status, body) = my_events(&harness, &token).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["message"], "forbidden access");
}

#[tokio::test]
async fn expired_firebase_token_is_unauthorized() {
    let harness = setup().await;
    let past = chrono::Utc::now().timestamp() - 7200;
    let token = sign_token(
        TEST_KID,
        &firebase_claims(EMAIL, json!({"exp": past, "iat": past - 3600})),
    );

    let (status, body) = my_events(&harness, &token).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["message"], "authorized access");
    assert_eq!(harness.store.call_count(), 0);
}

#[tokio::test]
async fn firebase_token_for_other_project_is_unauthorized() {
    let harness = setup().await;
    let token = sign_token(
        TEST_KID,
        &firebase_claims(EMAIL, json!({"aud": "another-project"})),
    );

    let (status, _) = my_events(&harness, &token).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(harness.store.call_count(), 0);
}

#[tokio::test]
async fn firebase_token_with_unknown_kid_is_unauthorized() {
    let harness = setup().await;
    let token = sign_token("retired-key", &firebase_claims(EMAIL, json!({})));

    let (status, _) = my_events(&harness, &token).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(harness.store.call_count(), 0);
}

#[tokio::test]
async fn tampered_firebase_token_is_unauthorized() {
    let harness = setup().await;
    let token = sign_token(TEST_KID, &firebase_claims(EMAIL, json!({})));

    // Swap the payload for one claiming a different email, keeping the signature.
    let mut parts: Vec<&str> = token.split('.').collect();
    let forged_claims = sign_token(TEST_KID, &firebase_claims("admin@example.com", json!({})));
    let forged_payload = forged_claims.split('.').nth(1).unwrap().to_string();
    parts[1] = &forged_payload;
    let tampered = parts.join(".");

    let (status, _) = my_events(&harness, &tampered).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}
