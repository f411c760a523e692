//! HTTP route handlers for the UnityWorks server.
//!
//! This module provides the HTTP API endpoints:
//!
//! | Method | Path | Guards |
//! |---|---|---|
//! | `GET` | `/` | none |
//! | `GET` | `/events` | none |
//! | `GET` | `/myEvents` | token + `?email=` |
//! | `POST` | `/add-event` | token + body `email` |
//! | `PATCH`, `DELETE` | `/events/{id}` | token + `email` header |
//! | `GET` | `/view-event/{id}` | token + `email` header |
//! | `GET` | `/joined-events` | token + `?email=` |
//! | `GET` | `/already-joined/{id}` | none |
//! | `POST` | `/join-event` | none |
//! | `PATCH` | `/join-event/{id}` | none |
//! | `GET` | `/community` | none |
//! | `PATCH` | `/joinCommunity` | none |
//! | `POST` | `/subscribe` | none |
//!
//! # Architecture
//!
//! All routes share application state through [`AppState`], which contains:
//! - The collection handles ([`Collections`])
//! - The bearer token verifier
//!
//! Each handler performs one store operation. Guards are applied per route
//! group with `route_layer`, so an unauthenticated request never reaches a
//! handler or the store.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use unityworks_server::firebase::FirebaseAuth;
//! use unityworks_server::routes::{create_router, AppState};
//! use unityworks_server::store::{memory::MemoryStore, Collections};
//!
//! #[tokio::main]
//! async fn main() {
//!     let store = Collections::from_store(Arc::new(MemoryStore::new()));
//!     let verifier = FirebaseAuth::new(
//!         "my-project",
//!         unityworks_server::config::DEFAULT_JWKS_URL,
//!     )
//!     .unwrap();
//!     let app = create_router(AppState::new(store, Arc::new(verifier)));
//!
//!     let listener = tokio::net::TcpListener::bind("0.0.0.0:3000").await.unwrap();
//!     axum::serve(listener, app).await.unwrap();
//! }
//! ```

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, DefaultBodyLimit, Path, Query, State},
    http::{HeaderMap, StatusCode},
    middleware,
    response::{IntoResponse, Response},
    routing::{get, patch, post},
    Extension, Json, Router,
};
use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info};

use crate::auth::{
    ensure_email_matches, require_auth, require_header_email, require_query_email, Identity,
    TokenVerifier, EMAIL_HEADER,
};
use crate::error::{ApiError, MessageBody, Result};
use crate::models::{
    Community, DeleteResult, DocumentId, Event, EventPatch, Fields, InsertOneResult,
    JoinCommunityRequest, JoinedEvent, Subscriber, UpdateResult,
};
use crate::store::{Collections, EventQuery};

// ============================================================================
// Constants
// ============================================================================

/// Maximum JSON body size (100 KiB).
const MAX_BODY_SIZE: usize = 100 * 1024;

/// Body of `GET /`.
pub const GREETING: &str = "Hello World!";

const ADDED_EVENT_MESSAGE: &str = "added event";
const JOINED_COMMUNITY_MESSAGE: &str = "Successfully joined the community";
const COMMUNITY_NOT_JOINED_MESSAGE: &str = "Community not found or already joined";

// ============================================================================
// Application State
// ============================================================================

/// Shared application state for all route handlers.
#[derive(Clone)]
pub struct AppState {
    /// Collection handles.
    pub store: Collections,

    /// Bearer token verifier used by the authentication guard.
    pub verifier: Arc<dyn TokenVerifier>,
}

impl AppState {
    /// Creates a new application state.
    ///
    /// # Arguments
    ///
    /// * `store` - Collection handles, usually from [`Collections::from_store`]
    /// * `verifier` - Token verifier, usually a [`crate::firebase::FirebaseAuth`]
    #[must_use]
    pub fn new(store: Collections, verifier: Arc<dyn TokenVerifier>) -> Self {
        Self { store, verifier }
    }
}

impl fmt::Debug for AppState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AppState")
            .field("store", &self.store)
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Router
// ============================================================================

/// Creates the application router with all routes configured.
///
/// Every route gets permissive CORS, request tracing, a 100 KiB body limit
/// and a panic handler that answers 500.
pub fn create_router(state: AppState) -> Router {
    let authenticate = middleware::from_fn_with_state(state.verifier.clone(), require_auth);

    let public = Router::new()
        .route("/", get(get_root))
        .route("/events", get(get_events))
        .route("/already-joined/{id}", get(get_already_joined))
        .route("/join-event", post(post_join_event))
        .route("/join-event/{id}", patch(patch_join_event))
        .route("/community", get(get_community))
        .route("/joinCommunity", patch(patch_join_community))
        .route("/subscribe", post(post_subscribe));

    let token_only = Router::new()
        .route("/add-event", post(post_add_event))
        .route_layer(authenticate.clone());

    let query_email = Router::new()
        .route("/myEvents", get(get_my_events))
        .route("/joined-events", get(get_joined_events))
        .route_layer(middleware::from_fn(require_query_email))
        .route_layer(authenticate.clone());

    let header_email = Router::new()
        .route("/events/{id}", patch(patch_event).delete(delete_event))
        .route("/view-event/{id}", get(get_view_event))
        .route_layer(middleware::from_fn(require_header_email))
        .route_layer(authenticate);

    Router::new()
        .merge(public)
        .merge(token_only)
        .merge(query_email)
        .merge(header_email)
        .with_state(state)
        .layer(DefaultBodyLimit::max(MAX_BODY_SIZE))
        .layer(CatchPanicLayer::custom(handle_panic))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

/// Converts a handler panic into a 500 response.
fn handle_panic(payload: Box<dyn Any + Send + 'static>) -> Response {
    let detail = payload
        .downcast_ref::<String>()
        .cloned()
        .or_else(|| payload.downcast_ref::<&str>().map(|s| s.to_string()))
        .unwrap_or_else(|| "unknown panic".to_string());
    error!(panic = %detail, "Handler panicked");
    ApiError::internal(detail).into_response()
}

/// The current instant formatted like JavaScript's `Date.toISOString`.
fn now_iso() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn parse_id(id: &str) -> Result<DocumentId> {
    Ok(id.parse::<DocumentId>()?)
}

// ============================================================================
// GET / - Greeting
// ============================================================================

async fn get_root() -> &'static str {
    GREETING
}

// ============================================================================
// Events
// ============================================================================

/// Query parameters for `GET /events`.
#[derive(Debug, Default, Deserialize)]
struct EventsQuery {
    search: Option<String>,
    category: Option<String>,
}

/// GET /events - Upcoming events, soonest first.
///
/// `search` matches title, description or location, case-insensitively.
/// `category` filters by `eventType` unless it is `all`.
async fn get_events(
    State(state): State<AppState>,
    Query(params): Query<EventsQuery>,
) -> Result<Json<Vec<Event>>> {
    let query = EventQuery::upcoming(now_iso())
        .with_search(params.search.as_deref())
        .with_category(params.category.as_deref());

    let events = state.store.events.find(&query).await?;
    debug!(count = events.len(), "Listed upcoming events");
    Ok(Json(events))
}

#[derive(Debug, Deserialize)]
struct CreatorQuery {
    email: String,
}

/// GET /myEvents - Events created by the caller.
async fn get_my_events(
    State(state): State<AppState>,
    Query(params): Query<CreatorQuery>,
) -> Result<Json<Vec<Event>>> {
    let events = state
        .store
        .events
        .find(&EventQuery::by_creator(params.email))
        .await?;
    Ok(Json(events))
}

/// Response for `POST /add-event`.
#[derive(Debug, Serialize)]
struct AddEventResponse {
    #[serde(flatten)]
    result: InsertOneResult,
    message: &'static str,
}

/// POST /add-event - Create an event owned by the caller.
///
/// # Responses
///
/// - `201 Created` - `{acknowledged, insertedId, message}`
/// - `400 Bad Request` - Malformed JSON or a missing required field
/// - `401 Unauthorized` - Missing or rejected token
/// - `403 Forbidden` - `email` in the body is not the caller's
async fn post_add_event(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    body: std::result::Result<Json<Event>, JsonRejection>,
) -> Result<(StatusCode, Json<AddEventResponse>)> {
    let Json(mut event) = body?;
    ensure_email_matches(&identity, &event.email)?;
    event.validate()?;
    event.id = None;

    let result = state.store.events.insert_one(event).await?;
    info!(event_id = %result.inserted_id, uid = %identity.uid, "Event created");

    Ok((
        StatusCode::CREATED,
        Json(AddEventResponse {
            result,
            message: ADDED_EVENT_MESSAGE,
        }),
    ))
}

/// PATCH /events/{id} - Overwrite fields of an event.
async fn patch_event(
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: std::result::Result<Json<Fields>, JsonRejection>,
) -> Result<Json<UpdateResult>> {
    let id = parse_id(&id)?;
    let Json(fields) = body?;
    let patch = EventPatch::new(fields);
    if patch.is_empty() {
        return Err(ApiError::bad_request("no fields to update"));
    }

    let result = state.store.events.update_one(&id, patch).await?;
    info!(event_id = %id, matched = result.matched_count, "Event updated");
    Ok(Json(result))
}

/// DELETE /events/{id} - Remove an event.
async fn delete_event(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<DeleteResult>> {
    let id = parse_id(&id)?;
    let result = state.store.events.delete_one(&id).await?;
    info!(event_id = %id, deleted = result.deleted_count, "Event deleted");
    Ok(Json(result))
}

/// GET /view-event/{id} - A single event, or `null`.
async fn get_view_event(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Option<Event>>> {
    let id = parse_id(&id)?;
    Ok(Json(state.store.events.find_one(&id).await?))
}

// ============================================================================
// Joined events
// ============================================================================

#[derive(Debug, Deserialize)]
struct JoinedEventsQuery {
    email: Option<String>,
}

/// GET /joined-events - Events the caller joined, soonest first.
async fn get_joined_events(
    State(state): State<AppState>,
    Query(params): Query<JoinedEventsQuery>,
) -> Result<Json<Vec<JoinedEvent>>> {
    let joined = state
        .store
        .joined_events
        .find(params.email.as_deref())
        .await?;
    Ok(Json(joined))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct AlreadyJoinedResponse {
    is_joined: bool,
}

/// GET /already-joined/{id} - Whether the `email` header user joined event `id`.
async fn get_already_joined(
    State(state): State<AppState>,
    Path(event_id): Path<String>,
    headers: HeaderMap,
) -> Result<Json<AlreadyJoinedResponse>> {
    let email = headers
        .get(EMAIL_HEADER)
        .and_then(|value| value.to_str().ok());

    let is_joined = match email {
        Some(email) => state
            .store
            .joined_events
            .find_membership(&event_id, email)
            .await?
            .is_some(),
        None => false,
    };
    Ok(Json(AlreadyJoinedResponse { is_joined }))
}

/// POST /join-event - Record that a user joined an event.
async fn post_join_event(
    State(state): State<AppState>,
    body: std::result::Result<Json<JoinedEvent>, JsonRejection>,
) -> Result<Json<InsertOneResult>> {
    let Json(mut joined) = body?;
    joined.validate()?;
    joined.id = None;

    let result = state.store.joined_events.insert_one(joined).await?;
    Ok(Json(result))
}

/// PATCH /join-event/{id} - Add one participant, creating the event if absent.
async fn patch_join_event(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<UpdateResult>> {
    let id = parse_id(&id)?;
    let result = state.store.events.increment_participant(&id).await?;
    debug!(event_id = %id, upserted = result.upserted_count, "Participant count incremented");
    Ok(Json(result))
}

// ============================================================================
// Communities
// ============================================================================

/// GET /community - All communities.
async fn get_community(State(state): State<AppState>) -> Result<Json<Vec<Community>>> {
    Ok(Json(state.store.communities.find_all().await?))
}

/// PATCH /joinCommunity - Add an email to a community's members.
///
/// # Responses
///
/// - `200 OK` - The email was added
/// - `404 Not Found` - No such community, no `communityId`, or the email is
///   already a member
/// - `500 Internal Server Error` - Malformed `communityId` or store failure
async fn patch_join_community(
    State(state): State<AppState>,
    body: std::result::Result<Json<JoinCommunityRequest>, JsonRejection>,
) -> Result<Json<MessageBody>> {
    let Json(request) = body?;
    let id = match &request.community_id {
        Value::String(hex) => hex
            .parse::<DocumentId>()
            .map_err(|err| ApiError::internal(err.to_string()))?,
        // An absent or numeric id can never name a stored community.
        Value::Null | Value::Number(_) => {
            return Err(ApiError::not_found(COMMUNITY_NOT_JOINED_MESSAGE))
        }
        other => return Err(ApiError::internal(format!("unusable communityId: {other}"))),
    };

    let result = state
        .store
        .communities
        .add_member(&id, &request.email)
        .await?;
    if result.modified_count == 0 {
        return Err(ApiError::not_found(COMMUNITY_NOT_JOINED_MESSAGE));
    }

    info!(community_id = %id, "Member joined community");
    Ok(Json(MessageBody::new(JOINED_COMMUNITY_MESSAGE)))
}

// ============================================================================
// Newsletter
// ============================================================================

/// POST /subscribe - Store a newsletter subscriber.
async fn post_subscribe(
    State(state): State<AppState>,
    body: std::result::Result<Json<Subscriber>, JsonRejection>,
) -> Result<Json<InsertOneResult>> {
    let Json(mut subscriber) = body?;
    subscriber.id = None;
    Ok(Json(state.store.subscribers.insert_one(subscriber).await?))
}

// ============================================================================
// Tests
// ============================================================================
