//! Shared helpers for the integration tests.

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, Response, StatusCode};
use axum::Router;
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use serde_json::{json, Value};
use tower::ServiceExt;

use unityworks_server::auth::{Identity, TokenVerifier};
use unityworks_server::firebase::IdentityError;
use unityworks_server::routes::{create_router, AppState};
use unityworks_server::store::memory::MemoryStore;
use unityworks_server::store::Collections;

pub const PROJECT_ID: &str = "unityworks-test";
pub const TEST_KID: &str = "test-key-1";
pub const PRIVATE_KEY: &[u8] = include_bytes!("../fixtures/rsa_private.pem");
pub const JWKS: &str = include_str!("../fixtures/jwks.json");

/// Verifier that accepts `valid:<email>` tokens and counts calls.
#[derive(Default)]
pub struct StubVerifier {
    calls: AtomicUsize,
}

impl StubVerifier {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TokenVerifier for StubVerifier {
    async fn verify(&self, token: &str) -> Result<Identity, IdentityError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match token.strip_prefix("valid:") {
            Some("") => Ok(Identity {
                uid: "uid-anonymous".to_string(),
                email: None,
            }),
            Some(email) => Ok(Identity {
                uid: format!("uid-{email}"),
                email: Some(email.to_string()),
            }),
            None => Err(IdentityError::InvalidToken),
        }
    }
}

/// Router over a fresh in-memory store and a stub verifier.
pub struct TestApp {
    pub router: Router,
    pub store: Arc<MemoryStore>,
    pub verifier: Arc<StubVerifier>,
}

impl TestApp {
    pub fn new() -> Self {
        let store = Arc::new(MemoryStore::new());
        let verifier = Arc::new(StubVerifier::default());
        let state = AppState::new(Collections::from_store(store.clone()), verifier.clone());
        Self {
            router: create_router(state),
            store,
            verifier,
        }
    }

    pub async fn send(&self, request: Request<Body>) -> (StatusCode, Value) {
        let response = self.router.clone().oneshot(request).await.unwrap();
        split(response).await
    }
}

pub async fn split(response: Response<Body>) -> (StatusCode, Value) {
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes)
            .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).into_owned()))
    };
    (status, value)
}

pub fn bearer(email: &str) -> String {
    format!("Bearer valid:{email}")
}

pub fn json_request(method: &str, uri: &str) -> axum::http::request::Builder {
    Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
}

pub fn with_json(builder: axum::http::request::Builder, body: &Value) -> Request<Body> {
    builder.body(Body::from(body.to_string())).unwrap()
}

pub fn empty(method: &str, uri: &str) -> axum::http::request::Builder {
    Request::builder().method(method).uri(uri)
}

/// A complete event payload dated `date` and owned by `email`.
pub fn event_body(title: &str, email: &str, date: &str) -> Value {
    json!({
        "title": title,
        "description": format!("{title} description"),
        "eventType": "cleanup",
        "eventDate": date,
        "location": "Dhaka",
        "email": email,
    })
}

/// Signs `claims` with the fixture key under `kid`.
pub fn sign_token(kid: &str, claims: &Value) -> String {
    let mut header = Header::new(Algorithm::RS256);
    header.kid = Some(kid.to_string());
    let key = EncodingKey::from_rsa_pem(PRIVATE_KEY).unwrap();
    encode(&header, claims, &key).unwrap()
}

/// Valid Firebase claims for `email`, with `overrides` merged in.
pub fn firebase_claims(email: &str, overrides: Value) -> Value {
    let now = chrono::Utc::now().timestamp();
    let mut claims = json!({
        "iss": format!("https://securetoken.google.com/{PROJECT_ID}"),
        "aud": PROJECT_ID,
        "sub": "firebase-uid-1",
        "email": email,
        "iat": now,
        "exp": now + 3600,
    });
    if let (Value::Object(claims), Value::Object(extra)) = (&mut claims, overrides) {
        claims.extend(extra);
    }
    claims
}
