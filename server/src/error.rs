//! Error types for the UnityWorks server.
//!
//! This module defines the error hierarchy returned by route handlers and
//! guards. Every variant maps to an HTTP status code and a `{message}` JSON
//! body through its [`IntoResponse`] implementation.
//!
//! # Error Types
//!
//! - [`ApiError::Unauthorized`] - Missing, malformed or rejected bearer token (401)
//! - [`ApiError::Forbidden`] - Caller email does not match the token identity (403)
//! - [`ApiError::BadRequest`] - Malformed body or object id (400)
//! - [`ApiError::NotFound`] - A conditional update matched nothing (404)
//! - [`ApiError::PayloadTooLarge`] - Body exceeds the size limit (413)
//! - [`ApiError::Internal`] - Store or runtime failure (500)
//!
//! Internal details are logged server-side and never sent to the client.
//!
//! # Example
//!
//! ```rust,ignore
//! use unityworks_server::error::ApiError;
//!
//! fn check_owner(body_email: &str, caller: &str) -> Result<(), ApiError> {
//!     if body_email != caller {
//!         return Err(ApiError::Forbidden);
//!     }
//!     Ok(())
//! }
//! ```

use axum::{
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, error};

use crate::firebase::IdentityError;
use crate::store::StoreError;

/// Message sent with every 401 response.
///
/// The wording is kept byte-for-byte from the public API contract.
pub const UNAUTHORIZED_MESSAGE: &str = "authorized access";

/// Message sent with every 403 response.
pub const FORBIDDEN_MESSAGE: &str = "forbidden access";

/// Message sent with every 500 response.
pub const INTERNAL_MESSAGE: &str = "Internal server error";

/// Errors surfaced to HTTP clients.
#[derive(Debug, Error)]
pub enum ApiError {
    /// No usable bearer token, or the identity provider rejected it.
    #[error("unauthorized")]
    Unauthorized,

    /// The caller-supplied email does not match the authenticated identity.
    #[error("forbidden")]
    Forbidden,

    /// The request was malformed (bad JSON, bad object id, failed validation).
    #[error("bad request: {0}")]
    BadRequest(String),

    /// The targeted document was not found or not modified.
    #[error("not found: {0}")]
    NotFound(String),

    /// The request body exceeds the configured limit.
    #[error("payload too large: {0}")]
    PayloadTooLarge(String),

    /// Unexpected failure. The detail is logged, never returned.
    #[error("internal error: {0}")]
    Internal(String),
}

impl ApiError {
    /// Creates a new bad request error.
    ///
    /// # Example
    ///
    /// ```rust
    /// use unityworks_server::error::ApiError;
    ///
    /// let err = ApiError::bad_request("invalid id");
    /// assert!(matches!(err, ApiError::BadRequest(_)));
    /// ```
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::BadRequest(message.into())
    }

    /// Creates a new not found error.
    ///
    /// # Example
    ///
    /// ```rust
    /// use unityworks_server::error::ApiError;
    ///
    /// let err = ApiError::not_found("Community not found or already joined");
    /// assert!(matches!(err, ApiError::NotFound(_)));
    /// ```
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound(message.into())
    }

    /// Creates a new internal error.
    ///
    /// # Example
    ///
    /// ```rust
    /// use unityworks_server::error::ApiError;
    ///
    /// let err = ApiError::internal("connection pool exhausted");
    /// assert!(matches!(err, ApiError::Internal(_)));
    /// ```
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Returns the HTTP status code for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::Forbidden => StatusCode::FORBIDDEN,
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Returns `true` if this error indicates a client-side problem.
    pub fn is_client_error(&self) -> bool {
        self.status_code().is_client_error()
    }

    /// Returns `true` if this error indicates a server-side problem.
    pub fn is_server_error(&self) -> bool {
        matches!(self, Self::Internal(_))
    }

    /// The message placed in the response body.
    fn client_message(&self) -> String {
        match self {
            Self::Unauthorized => UNAUTHORIZED_MESSAGE.to_string(),
            Self::Forbidden => FORBIDDEN_MESSAGE.to_string(),
            Self::BadRequest(msg) | Self::NotFound(msg) | Self::PayloadTooLarge(msg) => {
                msg.clone()
            }
            Self::Internal(_) => INTERNAL_MESSAGE.to_string(),
        }
    }
}

/// JSON body used for every error and for plain acknowledgements.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageBody {
    pub message: String,
}

impl MessageBody {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if let Self::Internal(detail) = &self {
            error!(error = %detail, "Request failed with internal error");
        }

        (self.status_code(), Json(MessageBody::new(self.client_message()))).into_response()
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::InvalidId(_) => Self::bad_request("invalid id"),
            other => Self::Internal(other.to_string()),
        }
    }
}

impl From<IdentityError> for ApiError {
    fn from(err: IdentityError) -> Self {
        debug!(error = %err, "Token verification failed");
        Self::Unauthorized
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        if rejection.status() == StatusCode::PAYLOAD_TOO_LARGE {
            return Self::PayloadTooLarge(rejection.body_text());
        }
        Self::BadRequest(rejection.body_text())
    }
}

/// A specialized Result type for request handling.
pub type Result<T> = std::result::Result<T, ApiError>;
