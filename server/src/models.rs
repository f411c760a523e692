//! Document shapes stored in the four UnityWorks collections.
//!
//! The store enforces no schema, so every shape here reads leniently: missing
//! fields fall back to their defaults and unknown fields are preserved in
//! `extra`. Creation input is checked separately by `validate`.
//!
//! Object ids travel as 24-character hex strings on the wire.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use mongodb::bson::oid::ObjectId;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::error::ApiError;
use crate::store::StoreError;

/// Arbitrary JSON fields carried alongside the known ones.
pub type Fields = Map<String, Value>;

/// A parsed document object id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DocumentId(ObjectId);

impl DocumentId {
    /// Generates a fresh object id.
    pub fn generate() -> Self {
        Self(ObjectId::new())
    }

    /// The underlying BSON object id.
    pub fn object_id(&self) -> ObjectId {
        self.0
    }

    /// The 24-character lowercase hex form.
    pub fn to_hex(&self) -> String {
        self.0.to_hex()
    }
}

impl FromStr for DocumentId {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ObjectId::parse_str(s.trim())
            .map(Self)
            .map_err(|_| StoreError::InvalidId(s.to_string()))
    }
}

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

/// Reasons a creation payload is rejected.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// A required field is absent or blank.
    #[error("{0} is required")]
    MissingField(&'static str),

    /// `eventDate` is not an ISO-8601 date or date-time.
    #[error("eventDate must be an ISO-8601 date: {0}")]
    InvalidDate(String),
}

impl From<ValidationError> for ApiError {
    fn from(err: ValidationError) -> Self {
        ApiError::bad_request(err.to_string())
    }
}

fn require(value: &str, field: &'static str) -> Result<(), ValidationError> {
    if value.trim().is_empty() {
        return Err(ValidationError::MissingField(field));
    }
    Ok(())
}

/// Returns `true` for RFC 3339 date-times and for bare ISO dates or local
/// date-times as produced by HTML date pickers.
fn is_iso8601(value: &str) -> bool {
    DateTime::parse_from_rfc3339(value).is_ok()
        || NaiveDate::parse_from_str(value, "%Y-%m-%d").is_ok()
        || NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S%.f").is_ok()
        || NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M").is_ok()
}

/// Reads a count leniently. Doubles are truncated, numeric strings are
/// parsed and anything else counts as 0.
fn deserialize_count<'de, D>(deserializer: D) -> Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)).unwrap_or(0),
        Value::String(s) => s.trim().parse().unwrap_or(0),
        _ => 0,
    })
}

/// Renders a stored value as text.
///
/// Dates arrive from the store as `{"$date": "<rfc3339>"}` and keep their
/// ISO form. Other scalars are printed; arrays, objects and null become empty.
fn text_of(value: Value) -> String {
    match value {
        Value::String(s) => s,
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Object(mut map) => match map.remove("$date") {
            Some(Value::String(iso)) => iso,
            _ => String::new(),
        },
        Value::Null | Value::Array(_) => String::new(),
    }
}

fn deserialize_text<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(text_of(Value::deserialize(deserializer)?))
}

/// Reads a document id. Non-hex ids stored by other writers keep their text
/// form.
fn deserialize_id<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let id = text_of(Value::deserialize(deserializer)?);
    Ok((!id.is_empty()).then_some(id))
}

/// Reads a member list. Anything other than an array reads as empty.
fn deserialize_members<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::Array(items) => items
            .into_iter()
            .filter(|item| !item.is_null())
            .map(text_of)
            .collect(),
        _ => Vec::new(),
    })
}

/// A community event.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    #[serde(
        rename = "_id",
        default,
        deserialize_with = "deserialize_id",
        skip_serializing_if = "Option::is_none"
    )]
    pub id: Option<String>,
    #[serde(default, deserialize_with = "deserialize_text")]
    pub title: String,
    #[serde(default, deserialize_with = "deserialize_text")]
    pub description: String,
    #[serde(default, deserialize_with = "deserialize_text")]
    pub event_type: String,
    /// ISO-8601 string; listings compare it lexicographically.
    #[serde(default, deserialize_with = "deserialize_text")]
    pub event_date: String,
    #[serde(default, deserialize_with = "deserialize_text")]
    pub location: String,
    /// Creator email. Only the creator may update or delete the event.
    #[serde(default, deserialize_with = "deserialize_text")]
    pub email: String,
    #[serde(default, deserialize_with = "deserialize_count")]
    pub participant: i64,
    #[serde(flatten)]
    pub extra: Fields,
}

impl Event {
    /// Checks a creation payload.
    pub fn validate(&self) -> Result<(), ValidationError> {
        require(&self.title, "title")?;
        require(&self.event_type, "eventType")?;
        require(&self.event_date, "eventDate")?;
        require(&self.location, "location")?;
        require(&self.email, "email")?;

        if !is_iso8601(&self.event_date) {
            return Err(ValidationError::InvalidDate(self.event_date.clone()));
        }
        if self.participant < 0 {
            return Err(ValidationError::MissingField("participant"));
        }
        Ok(())
    }
}

/// Field replacements applied to an event by `PATCH /events/:id`.
///
/// `_id` is immutable and is dropped on construction.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EventPatch(Fields);

impl EventPatch {
    pub fn new(mut fields: Fields) -> Self {
        fields.remove("_id");
        Self(fields)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn fields(&self) -> &Fields {
        &self.0
    }

    pub fn into_fields(self) -> Fields {
        self.0
    }
}

/// A record that a user joined an event.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinedEvent {
    #[serde(
        rename = "_id",
        default,
        deserialize_with = "deserialize_id",
        skip_serializing_if = "Option::is_none"
    )]
    pub id: Option<String>,
    /// Hex id of the joined event.
    #[serde(default, deserialize_with = "deserialize_text")]
    pub event_id: String,
    #[serde(default, deserialize_with = "deserialize_text")]
    pub user_email: String,
    #[serde(default, deserialize_with = "deserialize_text")]
    pub event_date: String,
    #[serde(flatten)]
    pub extra: Fields,
}

impl JoinedEvent {
    pub fn validate(&self) -> Result<(), ValidationError> {
        require(&self.event_id, "eventId")?;
        require(&self.user_email, "userEmail")?;
        Ok(())
    }
}

/// A community and its members.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Community {
    #[serde(
        rename = "_id",
        default,
        deserialize_with = "deserialize_id",
        skip_serializing_if = "Option::is_none"
    )]
    pub id: Option<String>,
    /// Member emails. Never holds duplicates.
    #[serde(default, deserialize_with = "deserialize_members")]
    pub joined_members: Vec<String>,
    #[serde(flatten)]
    pub extra: Fields,
}

/// Body of `PATCH /joinCommunity`.
///
/// `communityId` stays untyped: a missing id and a malformed one get
/// different answers.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinCommunityRequest {
    #[serde(default)]
    pub community_id: Value,
    pub email: String,
}

/// A newsletter subscriber. Any JSON object is accepted.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Subscriber {
    #[serde(
        rename = "_id",
        default,
        deserialize_with = "deserialize_id",
        skip_serializing_if = "Option::is_none"
    )]
    pub id: Option<String>,
    /// Every submitted field, `email` included, kept as sent.
    #[serde(flatten)]
    pub extra: Fields,
}

/// Acknowledgement of a single insert.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InsertOneResult {
    pub acknowledged: bool,
    pub inserted_id: String,
}

impl InsertOneResult {
    pub fn new(inserted_id: impl Into<String>) -> Self {
        Self {
            acknowledged: true,
            inserted_id: inserted_id.into(),
        }
    }
}

/// Acknowledgement of a single update.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateResult {
    pub acknowledged: bool,
    pub matched_count: u64,
    pub modified_count: u64,
    pub upserted_count: u64,
    pub upserted_id: Option<String>,
}

impl UpdateResult {
    pub fn new(matched_count: u64, modified_count: u64) -> Self {
        Self {
            acknowledged: true,
            matched_count,
            modified_count,
            upserted_count: 0,
            upserted_id: None,
        }
    }

    pub fn upserted(id: impl Into<String>) -> Self {
        Self {
            acknowledged: true,
            matched_count: 0,
            modified_count: 0,
            upserted_count: 1,
            upserted_id: Some(id.into()),
        }
    }
}

/// Acknowledgement of a single delete.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteResult {
    pub acknowledged: bool,
    pub deleted_count: u64,
}

impl DeleteResult {
    pub fn new(deleted_count: u64) -> Self {
        Self {
            acknowledged: true,
            deleted_count,
        }
    }
}
