//! Firebase ID token verification.
//!
//! Firebase signs ID tokens with rotating RSA keys published as a JSON Web Key
//! Set. [`FirebaseAuth`] fetches that set, caches it, and verifies tokens
//! locally:
//!
//! - the header must name `RS256` and a `kid` present in the key set
//! - `aud` must equal the project id
//! - `iss` must equal `https://securetoken.google.com/<project id>`
//! - `exp` must lie in the future and `sub` must be non-empty
//!
//! # Architecture
//!
//! The key set is cached for one hour. A token naming an unknown `kid` forces
//! a refresh, but refreshes are spaced at least [`MIN_REFRESH_INTERVAL`]
//! apart so forged `kid`s cannot hammer the key endpoint. Requests to the key
//! endpoint time out after 5 seconds.
//!
//! # Example
//!
//! ```rust,ignore
//! use unityworks_server::firebase::FirebaseAuth;
//!
//! let auth = FirebaseAuth::new("unityworks-demo", DEFAULT_JWKS_URL)?;
//! let user = auth.verify_id_token(token).await?;
//! println!("uid={} email={:?}", user.uid, user.email);
//! ```

use std::collections::HashMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use jsonwebtoken::{decode, decode_header, Algorithm, DecodingKey, Validation};
use reqwest::Client;
use serde::Deserialize;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::auth::{Identity, TokenVerifier};

/// Timeout for key set requests.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

/// How long a fetched key set is trusted.
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(60 * 60);

/// Minimum spacing between refreshes triggered by unknown key ids.
pub const MIN_REFRESH_INTERVAL: Duration = Duration::from_secs(60);

/// Issuer prefix for Firebase ID tokens.
const ISSUER_PREFIX: &str = "https://securetoken.google.com/";

/// Errors raised while verifying an ID token.
///
/// Every variant is rejected with 401 by the HTTP layer. The distinction only
/// matters for logging.
#[derive(Debug, Error)]
pub enum IdentityError {
    /// The token is malformed, badly signed, expired, or issued for another
    /// project.
    #[error("invalid or expired ID token")]
    InvalidToken,

    /// The token's `kid` is not in the published key set.
    #[error("token signed with unknown key")]
    UnknownKey,

    /// The key endpoint could not be reached.
    #[error("identity provider unavailable: {0}")]
    Unavailable(String),

    /// The key endpoint answered with something other than a key set.
    #[error("invalid key set response: {0}")]
    InvalidResponse(String),

    /// The verifier could not be constructed.
    #[error("verifier configuration error: {0}")]
    Configuration(String),
}

/// Identity extracted from a verified ID token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FirebaseUser {
    /// Firebase user id (`sub`).
    pub uid: String,

    /// The account email, absent for phone or anonymous sign-in.
    pub email: Option<String>,
}

/// A single RSA key from the published key set.
#[derive(Debug, Clone, Deserialize)]
pub struct Jwk {
    pub kty: String,
    pub kid: String,
    #[serde(default)]
    pub n: Option<String>,
    #[serde(default)]
    pub e: Option<String>,
    #[serde(default)]
    pub alg: Option<String>,
}

#[derive(Debug, Deserialize)]
struct JwksResponse {
    keys: Vec<Jwk>,
}

/// Claims read from a Firebase ID token. `aud`, `iss` and `exp` are checked by
/// [`Validation`].
#[derive(Debug, Deserialize)]
struct Claims {
    #[serde(default)]
    sub: String,
    #[serde(default)]
    email: Option<String>,
}

struct CachedKeys {
    keys: HashMap<String, Jwk>,
    fetched_at: Instant,
}

/// Verifies Firebase ID tokens against the published signing keys.
pub struct FirebaseAuth {
    project_id: String,
    issuer: String,
    jwks_url: String,
    http_client: Client,
    cache: RwLock<Option<CachedKeys>>,
    cache_ttl: Duration,
}

impl std::fmt::Debug for FirebaseAuth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FirebaseAuth")
            .field("project_id", &self.project_id)
            .field("jwks_url", &self.jwks_url)
            .field("cache_ttl", &self.cache_ttl)
            .finish_non_exhaustive()
    }
}

impl FirebaseAuth {
    /// Creates a verifier for tokens issued to `project_id`.
    ///
    /// # Arguments
    ///
    /// * `project_id` - Firebase project id, from the service account
    /// * `jwks_url` - URL of the signing key set
    ///
    /// # Errors
    ///
    /// Returns [`IdentityError::Configuration`] if the HTTP client cannot be created.
    pub fn new(
        project_id: impl Into<String>,
        jwks_url: impl Into<String>,
    ) -> Result<Self, IdentityError> {
        Self::with_ttl(project_id, jwks_url, DEFAULT_CACHE_TTL)
    }

    /// Creates a verifier with a custom key cache lifetime.
    pub fn with_ttl(
        project_id: impl Into<String>,
        jwks_url: impl Into<String>,
        cache_ttl: Duration,
    ) -> Result<Self, IdentityError> {
        let project_id = project_id.into();
        let http_client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| {
                IdentityError::Configuration(format!("failed to create HTTP client: {e}"))
            })?;

        Ok(Self {
            issuer: format!("{ISSUER_PREFIX}{project_id}"),
            project_id,
            jwks_url: jwks_url.into(),
            http_client,
            cache: RwLock::new(None),
            cache_ttl,
        })
    }

    /// The project whose tokens are accepted.
    pub fn project_id(&self) -> &str {
        &self.project_id
    }

    /// Verifies an ID token and returns the identity it carries.
    ///
    /// # Errors
    ///
    /// - [`IdentityError::InvalidToken`] - malformed, badly signed, expired or foreign token
    /// - [`IdentityError::UnknownKey`] - the signing key is not published
    /// - [`IdentityError::Unavailable`] - the key endpoint is unreachable
    /// - [`IdentityError::InvalidResponse`] - the key endpoint returned garbage
    pub async fn verify_id_token(&self, token: &str) -> Result<FirebaseUser, IdentityError> {
        let header = decode_header(token).map_err(|e| {
            debug!(error = %e, "ID token header is malformed");
            IdentityError::InvalidToken
        })?;

        if header.alg != Algorithm::RS256 {
            debug!(alg = ?header.alg, "ID token uses unexpected algorithm");
            return Err(IdentityError::InvalidToken);
        }
        let kid = header.kid.ok_or(IdentityError::InvalidToken)?;

        let jwk = self.get_key(&kid).await?;
        let (Some(n), Some(e)) = (jwk.n.as_deref(), jwk.e.as_deref()) else {
            return Err(IdentityError::InvalidResponse(format!(
                "key {kid} has no RSA components"
            )));
        };
        let decoding_key = DecodingKey::from_rsa_components(n, e)
            .map_err(|e| IdentityError::InvalidResponse(format!("bad RSA key {kid}: {e}")))?;

        let mut validation = Validation::new(Algorithm::RS256);
        validation.set_audience(&[self.project_id.as_str()]);
        validation.set_issuer(&[self.issuer.as_str()]);
        validation.set_required_spec_claims(&["exp", "aud", "iss", "sub"]);

        let claims = decode::<Claims>(token, &decoding_key, &validation)
            .map_err(|e| {
                debug!(error = %e, "ID token rejected");
                IdentityError::InvalidToken
            })?
            .claims;

        if claims.sub.is_empty() {
            return Err(IdentityError::InvalidToken);
        }

        Ok(FirebaseUser {
            uid: claims.sub,
            email: claims.email,
        })
    }

    /// Looks up `kid`, refreshing the key set when it is stale or lacks the key.
    async fn get_key(&self, kid: &str) -> Result<Jwk, IdentityError> {
        {
            let cache = self.cache.read().await;
            if let Some(cached) = cache.as_ref() {
                let age = cached.fetched_at.elapsed();
                if age < self.cache_ttl {
                    if let Some(key) = cached.keys.get(kid) {
                        return Ok(key.clone());
                    }
                    if age < MIN_REFRESH_INTERVAL {
                        debug!(kid = %kid, "Key id not in fresh key set");
                        return Err(IdentityError::UnknownKey);
                    }
                }
            }
        }

        self.refresh().await?;

        let cache = self.cache.read().await;
        cache
            .as_ref()
            .and_then(|cached| cached.keys.get(kid).cloned())
            .ok_or_else(|| {
                debug!(kid = %kid, "Key id not in key set after refresh");
                IdentityError::UnknownKey
            })
    }

    async fn refresh(&self) -> Result<(), IdentityError> {
        debug!(url = %self.jwks_url, "Fetching signing keys");

        let response = self
            .http_client
            .get(&self.jwks_url)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    IdentityError::Unavailable(format!("request timed out after {REQUEST_TIMEOUT:?}"))
                } else if e.is_connect() {
                    IdentityError::Unavailable(format!("connection failed: {e}"))
                } else {
                    IdentityError::Unavailable(format!("request failed: {e}"))
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            warn!(status = %status, "Signing key endpoint returned error");
            return Err(IdentityError::Unavailable(format!("unexpected status {status}")));
        }

        let jwks: JwksResponse = response.json().await.map_err(|e| {
            IdentityError::InvalidResponse(format!("failed to parse key set: {e}"))
        })?;

        let keys: HashMap<String, Jwk> = jwks
            .keys
            .into_iter()
            .filter(|key| key.kty == "RSA")
            .map(|key| (key.kid.clone(), key))
            .collect();

        info!(key_count = keys.len(), "Signing key cache refreshed");

        *self.cache.write().await = Some(CachedKeys {
            keys,
            fetched_at: Instant::now(),
        });
        Ok(())
    }
}

#[async_trait]
impl TokenVerifier for FirebaseAuth {
    async fn verify(&self, token: &str) -> Result<Identity, IdentityError> {
        let user = self.verify_id_token(token).await?;
        Ok(Identity {
            uid: user.uid,
            email: user.email,
        })
    }
}
