//! In-process store with the same semantics as the MongoDB backend.
//!
//! Used by the test suite and for running the server without a database.
//! Every trait call is counted so tests can assert that a request was
//! rejected before reaching the store.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use serde_json::Value;

use super::{
    CommunityCollection, EventCollection, EventQuery, JoinedEventCollection, StoreError,
    SubscriberCollection,
};
use crate::models::{
    Community, DeleteResult, DocumentId, Event, EventPatch, InsertOneResult, JoinedEvent,
    Subscriber, UpdateResult,
};

/// Store that keeps every collection in memory.
#[derive(Debug, Default)]
pub struct MemoryStore {
    events: RwLock<Vec<Event>>,
    joined_events: RwLock<Vec<JoinedEvent>>,
    communities: RwLock<Vec<Community>>,
    subscribers: RwLock<Vec<Subscriber>>,
    calls: AtomicUsize,
}

fn read<T>(lock: &RwLock<T>) -> Result<RwLockReadGuard<'_, T>, StoreError> {
    lock.read()
        .map_err(|_| StoreError::Backend("lock poisoned".to_string()))
}

fn write<T>(lock: &RwLock<T>) -> Result<RwLockWriteGuard<'_, T>, StoreError> {
    lock.write()
        .map_err(|_| StoreError::Backend("lock poisoned".to_string()))
}

fn same_id(stored: &Option<String>, id: &DocumentId) -> bool {
    stored.as_deref() == Some(id.to_hex().as_str())
}

/// Applies `patch` to `event` through its JSON form, the way `$set` would.
fn apply_patch(event: &Event, patch: EventPatch) -> Result<Event, StoreError> {
    let mut value = serde_json::to_value(event)
        .map_err(|e| StoreError::Serialization(e.to_string()))?;
    if let Value::Object(fields) = &mut value {
        fields.extend(patch.into_fields());
    }
    serde_json::from_value(value).map_err(|e| StoreError::Serialization(e.to_string()))
}

impl MemoryStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of collection operations performed so far.
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Resets the operation counter, typically after seeding.
    pub fn reset_call_count(&self) {
        self.calls.store(0, Ordering::SeqCst);
    }

    /// Adds a community directly and returns its id.
    ///
    /// No route creates communities, so tests and local setups seed them here.
    pub fn seed_community(&self, mut community: Community) -> Result<String, StoreError> {
        let id = community
            .id
            .clone()
            .unwrap_or_else(|| DocumentId::generate().to_hex());
        community.id = Some(id.clone());
        write(&self.communities)?.push(community);
        Ok(id)
    }

    /// Copy of every stored subscriber.
    pub fn subscribers(&self) -> Result<Vec<Subscriber>, StoreError> {
        Ok(read(&self.subscribers)?.clone())
    }

    fn record_call(&self) {
        self.calls.fetch_add(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl EventCollection for MemoryStore {
    async fn find(&self, query: &EventQuery) -> Result<Vec<Event>, StoreError> {
        self.record_call();
        let mut found: Vec<Event> = read(&self.events)?
            .iter()
            .filter(|event| query.matches(event))
            .cloned()
            .collect();
        found.sort_by(|a, b| a.event_date.cmp(&b.event_date));
        Ok(found)
    }

    async fn find_one(&self, id: &DocumentId) -> Result<Option<Event>, StoreError> {
        self.record_call();
        Ok(read(&self.events)?
            .iter()
            .find(|event| same_id(&event.id, id))
            .cloned())
    }

    async fn insert_one(&self, mut event: Event) -> Result<InsertOneResult, StoreError> {
        self.record_call();
        let id = DocumentId::generate().to_hex();
        event.id = Some(id.clone());
        write(&self.events)?.push(event);
        Ok(InsertOneResult::new(id))
    }

    async fn update_one(
        &self,
        id: &DocumentId,
        patch: EventPatch,
    ) -> Result<UpdateResult, StoreError> {
        self.record_call();
        let mut events = write(&self.events)?;
        let Some(event) = events.iter_mut().find(|event| same_id(&event.id, id)) else {
            return Ok(UpdateResult::new(0, 0));
        };

        let mut updated = apply_patch(event, patch)?;
        updated.id = event.id.clone();
        let modified = u64::from(updated != *event);
        *event = updated;
        Ok(UpdateResult::new(1, modified))
    }

    async fn delete_one(&self, id: &DocumentId) -> Result<DeleteResult, StoreError> {
        self.record_call();
        let mut events = write(&self.events)?;
        match events.iter().position(|event| same_id(&event.id, id)) {
            Some(index) => {
                events.remove(index);
                Ok(DeleteResult::new(1))
            }
            None => Ok(DeleteResult::new(0)),
        }
    }

    async fn increment_participant(&self, id: &DocumentId) -> Result<UpdateResult, StoreError> {
        self.record_call();
        let mut events = write(&self.events)?;
        if let Some(event) = events.iter_mut().find(|event| same_id(&event.id, id)) {
            event.participant = event
                .participant
                .checked_add(1)
                .ok_or_else(|| StoreError::Backend("participant count overflow".to_string()))?;
            return Ok(UpdateResult::new(1, 1));
        }

        let hex = id.to_hex();
        events.push(Event {
            id: Some(hex.clone()),
            participant: 1,
            ..Event::default()
        });
        Ok(UpdateResult::upserted(hex))
    }
}

#[async_trait]
impl JoinedEventCollection for MemoryStore {
    async fn find(&self, user_email: Option<&str>) -> Result<Vec<JoinedEvent>, StoreError> {
        self.record_call();
        let mut found: Vec<JoinedEvent> = read(&self.joined_events)?
            .iter()
            .filter(|joined| user_email.map_or(true, |email| joined.user_email == email))
            .cloned()
            .collect();
        found.sort_by(|a, b| a.event_date.cmp(&b.event_date));
        Ok(found)
    }

    async fn find_membership(
        &self,
        event_id: &str,
        user_email: &str,
    ) -> Result<Option<JoinedEvent>, StoreError> {
        self.record_call();
        Ok(read(&self.joined_events)?
            .iter()
            .find(|joined| joined.event_id == event_id && joined.user_email == user_email)
            .cloned())
    }

    async fn insert_one(&self, mut joined: JoinedEvent) -> Result<InsertOneResult, StoreError> {
        self.record_call();
        let id = DocumentId::generate().to_hex();
        joined.id = Some(id.clone());
        write(&self.joined_events)?.push(joined);
        Ok(InsertOneResult::new(id))
    }
}

#[async_trait]
impl CommunityCollection for MemoryStore {
    async fn find_all(&self) -> Result<Vec<Community>, StoreError> {
        self.record_call();
        Ok(read(&self.communities)?.clone())
    }

    async fn add_member(&self, id: &DocumentId, email: &str) -> Result<UpdateResult, StoreError> {
        self.record_call();
        let mut communities = write(&self.communities)?;
        let Some(community) = communities.iter_mut().find(|c| same_id(&c.id, id)) else {
            return Ok(UpdateResult::new(0, 0));
        };

        if community.joined_members.iter().any(|member| member == email) {
            return Ok(UpdateResult::new(1, 0));
        }
        community.joined_members.push(email.to_string());
        Ok(UpdateResult::new(1, 1))
    }
}

#[async_trait]
impl SubscriberCollection for MemoryStore {
    async fn insert_one(&self, mut subscriber: Subscriber) -> Result<InsertOneResult, StoreError> {
        self.record_call();
        let id = DocumentId::generate().to_hex();
        subscriber.id = Some(id.clone());
        write(&self.subscribers)?.push(subscriber);
        Ok(InsertOneResult::new(id))
    }
}
