//! Document store access for the UnityWorks server.
//!
//! Each collection is reached through its own trait so handlers depend on the
//! operations they use and nothing else. Two backends implement every trait:
//!
//! - [`mongo::MongoStore`] - the production MongoDB database
//! - [`memory::MemoryStore`] - an in-process store used by tests and local runs
//!
//! Handlers receive the backends through the [`Collections`] bundle held in
//! the application state.
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use unityworks_server::store::{memory::MemoryStore, Collections, EventQuery};
//!
//! let collections = Collections::from_store(Arc::new(MemoryStore::new()));
//! let upcoming = collections
//!     .events
//!     .find(&EventQuery::upcoming("2030-01-01T00:00:00.000Z"))
//!     .await?;
//! ```

pub mod memory;
pub mod mongo;

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use crate::models::{
    Community, DeleteResult, DocumentId, Event, EventPatch, InsertOneResult, JoinedEvent,
    Subscriber, UpdateResult,
};

/// Collection holding [`Event`] documents.
pub const EVENTS_COLLECTION: &str = "events";

/// Collection holding [`JoinedEvent`] documents.
pub const JOINED_EVENTS_COLLECTION: &str = "joinedEvents";

/// Collection holding [`Community`] documents.
pub const COMMUNITIES_COLLECTION: &str = "communities";

/// Collection holding [`Subscriber`] documents.
///
/// The misspelling is the name existing deployments already use.
pub const SUBSCRIBERS_COLLECTION: &str = "subscibers";

/// Errors raised by a store backend.
#[derive(Debug, Error)]
pub enum StoreError {
    /// An id string is not a valid object id.
    #[error("invalid object id: {0}")]
    InvalidId(String),

    /// The backend failed to execute the operation.
    #[error("store backend error: {0}")]
    Backend(String),

    /// A document could not be converted to or from its stored form.
    #[error("document serialization error: {0}")]
    Serialization(String),
}

impl From<mongodb::error::Error> for StoreError {
    fn from(err: mongodb::error::Error) -> Self {
        Self::Backend(err.to_string())
    }
}

impl From<mongodb::bson::ser::Error> for StoreError {
    fn from(err: mongodb::bson::ser::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<mongodb::bson::de::Error> for StoreError {
    fn from(err: mongodb::bson::de::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

/// Filter for event listings.
///
/// All set criteria must hold. `search` matches when the term occurs,
/// case-insensitively and literally, in the title, the description or the
/// location.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EventQuery {
    /// Lower bound on `eventDate`, compared as a string.
    pub starting_from: Option<String>,
    pub search: Option<String>,
    /// Exact `eventType`.
    pub event_type: Option<String>,
    /// Exact creator `email`.
    pub creator_email: Option<String>,
}

impl EventQuery {
    /// Events dated at or after `now`.
    pub fn upcoming(now: impl Into<String>) -> Self {
        Self {
            starting_from: Some(now.into()),
            ..Self::default()
        }
    }

    /// Events created by `email`.
    pub fn by_creator(email: impl Into<String>) -> Self {
        Self {
            creator_email: Some(email.into()),
            ..Self::default()
        }
    }

    /// Adds a search term. Blank terms are ignored.
    pub fn with_search(mut self, term: Option<&str>) -> Self {
        self.search = term
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(str::to_string);
        self
    }

    /// Adds a category filter. `all` and blank categories are ignored.
    pub fn with_category(mut self, category: Option<&str>) -> Self {
        self.event_type = category
            .filter(|c| !c.is_empty() && *c != "all")
            .map(str::to_string);
        self
    }

    /// Returns `true` if `event` satisfies every set criterion.
    pub fn matches(&self, event: &Event) -> bool {
        if let Some(from) = &self.starting_from {
            if event.event_date.as_str() < from.as_str() {
                return false;
            }
        }
        if let Some(event_type) = &self.event_type {
            if &event.event_type != event_type {
                return false;
            }
        }
        if let Some(email) = &self.creator_email {
            if &event.email != email {
                return false;
            }
        }
        if let Some(term) = &self.search {
            let term = term.to_lowercase();
            let hit = [&event.title, &event.description, &event.location]
                .iter()
                .any(|field| field.to_lowercase().contains(&term));
            if !hit {
                return false;
            }
        }
        true
    }
}

/// Operations on the `events` collection.
#[async_trait]
pub trait EventCollection: Send + Sync {
    /// Events matching `query`, ascending by `eventDate`.
    async fn find(&self, query: &EventQuery) -> Result<Vec<Event>, StoreError>;

    async fn find_one(&self, id: &DocumentId) -> Result<Option<Event>, StoreError>;

    /// Inserts `event` under a fresh id. Any id on `event` is ignored.
    async fn insert_one(&self, event: Event) -> Result<InsertOneResult, StoreError>;

    /// Sets each field of `patch` on the event.
    async fn update_one(
        &self,
        id: &DocumentId,
        patch: EventPatch,
    ) -> Result<UpdateResult, StoreError>;

    async fn delete_one(&self, id: &DocumentId) -> Result<DeleteResult, StoreError>;

    /// Atomically adds one to `participant`, creating a sparse event if none
    /// exists under `id`.
    async fn increment_participant(&self, id: &DocumentId) -> Result<UpdateResult, StoreError>;
}

/// Operations on the `joinedEvents` collection.
#[async_trait]
pub trait JoinedEventCollection: Send + Sync {
    /// Records for `user_email`, or every record when `None`, ascending by
    /// `eventDate`.
    async fn find(&self, user_email: Option<&str>) -> Result<Vec<JoinedEvent>, StoreError>;

    /// The record for `(event_id, user_email)`, if any.
    async fn find_membership(
        &self,
        event_id: &str,
        user_email: &str,
    ) -> Result<Option<JoinedEvent>, StoreError>;

    async fn insert_one(&self, joined: JoinedEvent) -> Result<InsertOneResult, StoreError>;
}

/// Operations on the `communities` collection.
#[async_trait]
pub trait CommunityCollection: Send + Sync {
    async fn find_all(&self) -> Result<Vec<Community>, StoreError>;

    /// Adds `email` to `joinedMembers` unless already present.
    ///
    /// `modified_count` is 0 when the community is missing or the email was
    /// already a member.
    async fn add_member(&self, id: &DocumentId, email: &str) -> Result<UpdateResult, StoreError>;
}

/// Operations on the `subscibers` collection.
#[async_trait]
pub trait SubscriberCollection: Send + Sync {
    async fn insert_one(&self, subscriber: Subscriber) -> Result<InsertOneResult, StoreError>;
}

/// Handles to every collection, shared by all request handlers.
#[derive(Clone)]
pub struct Collections {
    pub events: Arc<dyn EventCollection>,
    pub joined_events: Arc<dyn JoinedEventCollection>,
    pub communities: Arc<dyn CommunityCollection>,
    pub subscribers: Arc<dyn SubscriberCollection>,
}

impl Collections {
    /// Uses one backend for all four collections.
    pub fn from_store<S>(store: Arc<S>) -> Self
    where
        S: EventCollection
            + JoinedEventCollection
            + CommunityCollection
            + SubscriberCollection
            + 'static,
    {
        Self {
            events: store.clone(),
            joined_events: store.clone(),
            communities: store.clone(),
            subscribers: store,
        }
    }
}

impl fmt::Debug for Collections {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Collections").finish_non_exhaustive()
    }
}
