//! Request authentication and email-match authorization.
//!
//! Protected routes carry a Firebase ID token as `Authorization: Bearer <token>`.
//! Authorization is a plain comparison between the token's email claim and
//! an email the caller supplies, which each route takes from a fixed place:
//!
//! | Guard | Source of the caller email |
//! |---|---|
//! | [`require_query_email`] | `?email=` query parameter |
//! | [`require_header_email`] | `email` request header |
//! | [`ensure_email_matches`] | called by the handler with a body field |
//!
//! # Overview
//!
//! 1. [`require_auth`] extracts the bearer token, verifies it through a
//!    [`TokenVerifier`] and stores the resulting [`Identity`] in the request
//!    extensions. It rejects with 401 before any handler or store code runs.
//! 2. An email guard compares the caller email with [`Identity::email`] and
//!    rejects with 403 on mismatch.
//!
//! An identity without an email claim matches nothing.
//!
//! # Example
//!
//! ```rust,ignore
//! use axum::{middleware, routing::get, Router};
//! use unityworks_server::auth::{require_auth, require_query_email};
//!
//! let app = Router::new()
//!     .route("/myEvents", get(handler))
//!     .route_layer(middleware::from_fn(require_query_email))
//!     .route_layer(middleware::from_fn_with_state(verifier, require_auth));
//! ```

use std::sync::Arc;

use async_trait::async_trait;
use axum::{
    extract::{Query, Request, State},
    http::{header::AUTHORIZATION, HeaderMap},
    middleware::Next,
    response::Response,
};
use serde::Deserialize;
use tracing::{debug, warn};

use crate::error::ApiError;
use crate::firebase::IdentityError;

/// Header carrying the caller email on header-guarded routes.
pub const EMAIL_HEADER: &str = "email";

/// The authenticated caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    /// Stable user id from the identity provider.
    pub uid: String,

    /// Verified email, if the account has one.
    pub email: Option<String>,
}

impl Identity {
    /// Returns `true` if `email` is exactly this identity's email.
    ///
    /// Always `false` when the identity carries no email.
    ///
    /// # Example
    ///
    /// ```rust
    /// use unityworks_server::auth::Identity;
    ///
    /// let identity = Identity {
    ///     uid: "uid-1".to_string(),
    ///     email: Some("a@example.com".to_string()),
    /// };
    /// assert!(identity.email_matches("a@example.com"));
    /// assert!(!identity.email_matches("A@example.com"));
    /// ```
    pub fn email_matches(&self, email: &str) -> bool {
        self.email.as_deref() == Some(email)
    }
}

/// Verifies bearer tokens.
#[async_trait]
pub trait TokenVerifier: Send + Sync {
    /// Verifies `token` and returns the identity it carries.
    async fn verify(&self, token: &str) -> Result<Identity, IdentityError>;
}

/// Extracts the token from an `Authorization: Bearer <token>` header.
///
/// The header is split on single spaces and the token is the second piece,
/// so a doubled separator yields an empty token. Returns `None` for a missing
/// header, another scheme, or an empty token.
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(AUTHORIZATION)?.to_str().ok()?;
    let mut parts = value.split(' ');
    if parts.next()? != "Bearer" {
        return None;
    }
    parts.next().filter(|token| !token.is_empty())
}

/// Rejects with 403 unless `email` matches `identity`.
pub fn ensure_email_matches(identity: &Identity, email: &str) -> Result<(), ApiError> {
    if identity.email_matches(email) {
        Ok(())
    } else {
        debug!(uid = %identity.uid, "Caller email does not match token identity");
        Err(ApiError::Forbidden)
    }
}

fn identity_of(request: &Request) -> Result<&Identity, ApiError> {
    request
        .extensions()
        .get::<Identity>()
        .ok_or(ApiError::Unauthorized)
}

/// Middleware that authenticates the bearer token.
///
/// # Errors
///
/// Returns [`ApiError::Unauthorized`] if the header is missing or malformed,
/// or if verification fails for any reason.
pub async fn require_auth(
    State(verifier): State<Arc<dyn TokenVerifier>>,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let Some(token) = bearer_token(request.headers()) else {
        debug!(path = %request.uri().path(), "Missing or malformed Authorization header");
        return Err(ApiError::Unauthorized);
    };

    let identity = match verifier.verify(token).await {
        Ok(identity) => identity,
        Err(IdentityError::Unavailable(reason)) => {
            warn!(reason = %reason, "Identity provider unavailable, rejecting request");
            return Err(ApiError::Unauthorized);
        }
        Err(e) => return Err(e.into()),
    };

    debug!(uid = %identity.uid, "Request authenticated");
    request.extensions_mut().insert(identity);
    Ok(next.run(request).await)
}

#[derive(Debug, Deserialize)]
struct EmailQuery {
    email: Option<String>,
}

/// Middleware that matches the `email` query parameter against the identity.
///
/// Must run after [`require_auth`].
pub async fn require_query_email(request: Request, next: Next) -> Result<Response, ApiError> {
    let email = Query::<EmailQuery>::try_from_uri(request.uri())
        .ok()
        .and_then(|Query(query)| query.email);

    match email {
        Some(email) => ensure_email_matches(identity_of(&request)?, &email)?,
        None => return Err(ApiError::Forbidden),
    }
    Ok(next.run(request).await)
}

/// Middleware that matches the `email` header against the identity.
///
/// Must run after [`require_auth`].
pub async fn require_header_email(request: Request, next: Next) -> Result<Response, ApiError> {
    let email = request
        .headers()
        .get(EMAIL_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string);

    match email {
        Some(email) => ensure_email_matches(identity_of(&request)?, &email)?,
        None => return Err(ApiError::Forbidden),
    }
    Ok(next.run(request).await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use axum::{body::Body, http::StatusCode, middleware, routing::get, Extension, Router};
    use tower::ServiceExt;

    /// Accepts `good-token` as `a@example.com` and `no-email` as an identity
    /// without email. Counts calls.
    #[derive(Default)]
    struct StubVerifier {
        calls: AtomicUsize,
        unavailable: bool,
    }

    #[async_trait]
    impl TokenVerifier for StubVerifier {
        async fn verify(&self, token: &str) -> Result<Identity, IdentityError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.unavailable {
                return Err(IdentityError::Unavailable("down".to_string()));
            }
            match token {
                "good-token" => Ok(Identity {
                    uid: "uid-a".to_string(),
                    email: Some("a@example.com".to_string()),
                }),
                "no-email" => Ok(Identity {
                    uid: "uid-n".to_string(),
                    email: None,
                }),
                _ => Err(IdentityError::InvalidToken),
            }
        }
    }

    async fn whoami(Extension(identity): Extension<Identity>) -> String {
        identity.uid
    }

    fn app(verifier: Arc<StubVerifier>) -> Router {
        let verifier: Arc<dyn TokenVerifier> = verifier;
        let auth = middleware::from_fn_with_state(verifier, require_auth);

        let by_query = Router::new()
            .route("/query", get(whoami))
            .route_layer(middleware::from_fn(require_query_email));
        let by_header = Router::new()
            .route("/header", get(whoami))
            .route_layer(middleware::from_fn(require_header_email));

        Router::new()
            .route("/plain", get(whoami))
            .merge(by_query)
            .merge(by_header)
            .route_layer(auth)
    }

    async fn send(app: Router, request: axum::http::Request<Body>) -> StatusCode {
        app.oneshot(request).await.unwrap().status()
    }

    fn get_with(uri: &str, token: Option<&str>) -> axum::http::request::Builder {
        let builder = axum::http::Request::builder().uri(uri);
        match token {
            Some(token) => builder.header(AUTHORIZATION, format!("Bearer {token}")),
            None => builder,
        }
    }

    #[test]
    fn bearer_token_parses_header() {
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, "Bearer abc.def".parse().unwrap());
        assert_eq!(bearer_token(&headers), Some("abc.def"));

        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, "Bearer abc.def trailing".parse().unwrap());
        assert_eq!(bearer_token(&headers), Some("abc.def"));
    }

    #[test]
    fn bearer_token_rejects_malformed_headers() {
        for value in [
            "abc.def",
            "Basic abc",
            "Bearer ",
            "Bearer",
            "bearer abc",
            "Bearer  abc.def",
        ] {
            let mut headers = HeaderMap::new();
            headers.insert(AUTHORIZATION, value.parse().unwrap());
            assert_eq!(bearer_token(&headers), None, "header {value:?}");
        }
        assert_eq!(bearer_token(&HeaderMap::new()), None);
    }

    #[test]
    fn identity_without_email_never_matches() {
        let identity = Identity {
            uid: "u".to_string(),
            email: None,
        };
        assert!(!identity.email_matches(""));
        assert!(matches!(
            ensure_email_matches(&identity, "a@example.com"),
            Err(ApiError::Forbidden)
        ));
    }

    #[tokio::test]
    async fn missing_header_is_rejected_without_verification() {
        let verifier = Arc::new(StubVerifier::default());
        let status = send(
            app(verifier.clone()),
            get_with("/plain", None).body(Body::empty()).unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(verifier.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn valid_token_reaches_handler() {
        let verifier = Arc::new(StubVerifier::default());
        let status = send(
            app(verifier),
            get_with("/plain", Some("good-token")).body(Body::empty()).unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn rejected_token_is_unauthorized() {
        let verifier = Arc::new(StubVerifier::default());
        let status = send(
            app(verifier),
            get_with("/plain", Some("forged")).body(Body::empty()).unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn unavailable_provider_is_unauthorized() {
        let verifier = Arc::new(StubVerifier {
            unavailable: true,
            ..StubVerifier::default()
        });
        let status = send(
            app(verifier),
            get_with("/plain", Some("good-token")).body(Body::empty()).unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn query_guard_matches_email() {
        let verifier = Arc::new(StubVerifier::default());
        let ok = send(
            app(verifier.clone()),
            get_with("/query?email=a@example.com", Some("good-token"))
                .body(Body::empty())
                .unwrap(),
        )
        .await;
        assert_eq!(ok, StatusCode::OK);

        let mismatch = send(
            app(verifier.clone()),
            get_with("/query?email=b@example.com", Some("good-token"))
                .body(Body::empty())
                .unwrap(),
        )
        .await;
        assert_eq!(mismatch, StatusCode::FORBIDDEN);

        let missing = send(
            app(verifier),
            get_with("/query", Some("good-token")).body(Body::empty()).unwrap(),
        )
        .await;
        assert_eq!(missing, StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn header_guard_matches_email() {
        let verifier = Arc::new(StubVerifier::default());
        let ok = send(
            app(verifier.clone()),
            get_with("/header", Some("good-token"))
                .header(EMAIL_HEADER, "a@example.com")
                .body(Body::empty())
                .unwrap(),
        )
        .await;
        assert_eq!(ok, StatusCode::OK);

        let mismatch = send(
            app(verifier.clone()),
            get_with("/header", Some("good-token"))
                .header(EMAIL_HEADER, "b@example.com")
                .body(Body::empty())
                .unwrap(),
        )
        .await;
        assert_eq!(mismatch, StatusCode::FORBIDDEN);

        // The query parameter does not satisfy the header guard.
        let wrong_source = send(
            app(verifier),
            get_with("/header?email=a@example.com", Some("good-token"))
                .body(Body::empty())
                .unwrap(),
        )
        .await;
        assert_eq!(wrong_source, StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn identity_without_email_is_forbidden() {
        let verifier = Arc::new(StubVerifier::default());
        let status = send(
            app(verifier),
            get_with("/header", Some("no-email"))
                .header(EMAIL_HEADER, "")
                .body(Body::empty())
                .unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);
    }
}
