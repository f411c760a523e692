//! MongoDB backend.
//!
//! One [`mongodb::Client`] is opened at startup and shared by every request.
//! Documents are read as raw BSON and converted through relaxed extended JSON
//! so that object ids reach the models as hex strings.

use async_trait::async_trait;
use futures_util::TryStreamExt;
use mongodb::bson::{self, doc, Bson, Document};
use mongodb::options::{ClientOptions, ServerApi, ServerApiVersion};
use mongodb::{results, Client, Collection};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, info};

use super::{
    CommunityCollection, EventCollection, EventQuery, JoinedEventCollection, StoreError,
    SubscriberCollection, COMMUNITIES_COLLECTION, EVENTS_COLLECTION, JOINED_EVENTS_COLLECTION,
    SUBSCRIBERS_COLLECTION,
};
use crate::models::{
    Community, DeleteResult, DocumentId, Event, EventPatch, InsertOneResult, JoinedEvent,
    Subscriber, UpdateResult,
};

/// Store backed by a MongoDB database.
#[derive(Debug, Clone)]
pub struct MongoStore {
    client: Client,
    events: Collection<Document>,
    joined_events: Collection<Document>,
    communities: Collection<Document>,
    subscribers: Collection<Document>,
}

impl MongoStore {
    /// Connects to `uri` using Stable API v1 in strict mode.
    ///
    /// The driver connects lazily, so this only fails on a malformed URI or
    /// unresolvable options. Call [`MongoStore::ping`] to check reachability.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Backend`] if the connection string is invalid.
    pub async fn connect(uri: &str, db_name: &str) -> Result<Self, StoreError> {
        let mut options = ClientOptions::parse(uri).await?;
        options.server_api = Some(
            ServerApi::builder()
                .version(ServerApiVersion::V1)
                .strict(true)
                .deprecation_errors(true)
                .build(),
        );
        let client = Client::with_options(options)?;
        info!(database = %db_name, "MongoDB client created");
        Ok(Self::from_client(client, db_name))
    }

    /// Wraps an existing client.
    pub fn from_client(client: Client, db_name: &str) -> Self {
        let db = client.database(db_name);
        Self {
            events: db.collection(EVENTS_COLLECTION),
            joined_events: db.collection(JOINED_EVENTS_COLLECTION),
            communities: db.collection(COMMUNITIES_COLLECTION),
            subscribers: db.collection(SUBSCRIBERS_COLLECTION),
            client,
        }
    }

    /// Round-trips a `ping` command against the `admin` database.
    pub async fn ping(&self) -> Result<(), StoreError> {
        self.client
            .database("admin")
            .run_command(doc! { "ping": 1 })
            .await?;
        debug!("MongoDB ping succeeded");
        Ok(())
    }
}

/// Builds the filter document for an event listing.
pub(crate) fn event_filter(query: &EventQuery) -> Document {
    let mut filter = Document::new();
    if let Some(from) = &query.starting_from {
        filter.insert("eventDate", doc! { "$gte": from.as_str() });
    }
    if let Some(event_type) = &query.event_type {
        filter.insert("eventType", event_type.as_str());
    }
    if let Some(email) = &query.creator_email {
        filter.insert("email", email.as_str());
    }
    if let Some(term) = &query.search {
        let pattern = regex::escape(term);
        let clauses: Vec<Bson> = ["title", "description", "location"]
            .iter()
            .map(|field| {
                let mut clause = Document::new();
                clause.insert(*field, doc! { "$regex": pattern.as_str(), "$options": "i" });
                Bson::Document(clause)
            })
            .collect();
        filter.insert("$or", clauses);
    }
    filter
}

fn by_id(id: &DocumentId) -> Document {
    doc! { "_id": id.object_id() }
}

/// Converts a stored document into a model, rendering `_id` as hex.
pub(crate) fn decode<T: DeserializeOwned>(mut document: Document) -> Result<T, StoreError> {
    if let Some(Bson::ObjectId(oid)) = document.get("_id") {
        let hex = oid.to_hex();
        document.insert("_id", hex);
    }
    let value = Bson::Document(document).into_relaxed_extjson();
    serde_json::from_value(value).map_err(|e| StoreError::Serialization(e.to_string()))
}

/// Converts a model into a document, dropping any `_id` so the server assigns one.
fn encode<T: Serialize>(model: &T) -> Result<Document, StoreError> {
    let mut document = bson::to_document(model)?;
    document.remove("_id");
    Ok(document)
}

fn id_to_string(id: &Bson) -> String {
    match id {
        Bson::ObjectId(oid) => oid.to_hex(),
        Bson::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn insert_result(result: results::InsertOneResult) -> InsertOneResult {
    InsertOneResult::new(id_to_string(&result.inserted_id))
}

fn update_result(result: results::UpdateResult) -> UpdateResult {
    UpdateResult {
        acknowledged: true,
        matched_count: result.matched_count,
        modified_count: result.modified_count,
        upserted_count: u64::from(result.upserted_id.is_some()),
        upserted_id: result.upserted_id.as_ref().map(id_to_string),
    }
}

async fn find_sorted<T: DeserializeOwned>(
    collection: &Collection<Document>,
    filter: Document,
) -> Result<Vec<T>, StoreError> {
    let documents: Vec<Document> = collection
        .find(filter)
        .sort(doc! { "eventDate": 1 })
        .await?
        .try_collect()
        .await?;
    documents.into_iter().map(decode).collect()
}

#[async_trait]
impl EventCollection for MongoStore {
    async fn find(&self, query: &EventQuery) -> Result<Vec<Event>, StoreError> {
        find_sorted(&self.events, event_filter(query)).await
    }

    async fn find_one(&self, id: &DocumentId) -> Result<Option<Event>, StoreError> {
        self.events
            .find_one(by_id(id))
            .await?
            .map(decode)
            .transpose()
    }

    async fn insert_one(&self, event: Event) -> Result<InsertOneResult, StoreError> {
        let result = self.events.insert_one(encode(&event)?).await?;
        Ok(insert_result(result))
    }

    async fn update_one(
        &self,
        id: &DocumentId,
        patch: EventPatch,
    ) -> Result<UpdateResult, StoreError> {
        let fields = bson::to_document(patch.fields())?;
        let result = self
            .events
            .update_one(by_id(id), doc! { "$set": fields })
            .await?;
        Ok(update_result(result))
    }

    async fn delete_one(&self, id: &DocumentId) -> Result<DeleteResult, StoreError> {
        let result = self.events.delete_one(by_id(id)).await?;
        Ok(DeleteResult::new(result.deleted_count))
    }

    async fn increment_participant(&self, id: &DocumentId) -> Result<UpdateResult, StoreError> {
        let result = self
            .events
            .update_one(by_id(id), doc! { "$inc": { "participant": 1 } })
            .upsert(true)
            .await?;
        Ok(update_result(result))
    }
}

#[async_trait]
impl JoinedEventCollection for MongoStore {
    async fn find(&self, user_email: Option<&str>) -> Result<Vec<JoinedEvent>, StoreError> {
        let filter = match user_email {
            Some(email) => doc! { "userEmail": email },
            None => Document::new(),
        };
        find_sorted(&self.joined_events, filter).await
    }

    async fn find_membership(
        &self,
        event_id: &str,
        user_email: &str,
    ) -> Result<Option<JoinedEvent>, StoreError> {
        self.joined_events
            .find_one(doc! { "eventId": event_id, "userEmail": user_email })
            .await?
            .map(decode)
            .transpose()
    }

    async fn insert_one(&self, joined: JoinedEvent) -> Result<InsertOneResult, StoreError> {
        let result = self.joined_events.insert_one(encode(&joined)?).await?;
        Ok(insert_result(result))
    }
}

#[async_trait]
impl CommunityCollection for MongoStore {
    async fn find_all(&self) -> Result<Vec<Community>, StoreError> {
        let documents: Vec<Document> = self
            .communities
            .find(Document::new())
            .await?
            .try_collect()
            .await?;
        documents.into_iter().map(decode).collect()
    }

    async fn add_member(&self, id: &DocumentId, email: &str) -> Result<UpdateResult, StoreError> {
        let result = self
            .communities
            .update_one(by_id(id), doc! { "$addToSet": { "joinedMembers": email } })
            .await?;
        Ok(update_result(result))
    }
}

#[async_trait]
impl SubscriberCollection for MongoStore {
    async fn insert_one(&self, subscriber: Subscriber) -> Result<InsertOneResult, StoreError> {
        let result = self.subscribers.insert_one(encode(&subscriber)?).await?;
        Ok(insert_result(result))
    }
}
