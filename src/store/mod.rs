//! Persistent document store boundary.
//!
//! The bot keeps users, entitlements and verification tokens in a small
//! document store behind the [`Store`] trait: collections of JSON
//! documents keyed by numeric user id, with upsert semantics and an
//! optional TTL sweep per collection. The shipped backend is
//! [`JsonStore`], which persists everything to a single JSON file;
//! [`MemoryStore`] backs the tests.

mod json;
mod memory;
mod users;

use async_trait::async_trait;
use serde_json::Value;

pub use json::JsonStore;
pub use memory::MemoryStore;
pub use users::{all_user_ids, note_quiz_created, record_interaction, UserRecord};

/// Numeric user identifier, as assigned by the chat platform.
pub type UserId = i64;

/// Field-equality filter over documents: a document matches when every
/// named field is present and equal.
pub type Filter = serde_json::Map<String, Value>;

/// Collection of tracked users.
pub const USERS: &str = "users";

/// Collection of sudo grants.
pub const SUDO_USERS: &str = "sudo_users";

/// Collection of premium grants.
pub const PREMIUM_USERS: &str = "premium_users";

/// Collection of 24-hour access tokens. TTL-swept on read.
pub const TOKENS: &str = "tokens";

/// Errors surfaced by a store backend.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("failed to persist store file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to encode store document: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Document store operations used by the bot core.
///
/// Every mutation is a single independent write; there is no
/// multi-document atomicity anywhere in the bot.
#[async_trait]
pub trait Store: Send + Sync {
    /// Creates or replaces the document for `key` in `collection`.
    async fn upsert(&self, collection: &str, key: UserId, fields: Value) -> Result<(), StoreError>;

    /// Fetches the document for `key`, if present.
    async fn find_one(&self, collection: &str, key: UserId) -> Result<Option<Value>, StoreError>;

    /// Deletes the document for `key`. Returns whether one existed.
    async fn delete_one(&self, collection: &str, key: UserId) -> Result<bool, StoreError>;

    /// Counts documents matching `filter` (all documents when `None`).
    async fn count(&self, collection: &str, filter: Option<&Filter>) -> Result<usize, StoreError>;

    /// Returns all documents matching `filter` in key order.
    async fn find_all(
        &self,
        collection: &str,
        filter: Option<&Filter>,
    ) -> Result<Vec<Value>, StoreError>;
}

/// Checks a document against a field-equality filter.
pub(crate) fn matches_filter(doc: &Value, filter: Option<&Filter>) -> bool {
    let Some(filter) = filter else {
        return true;
    };
    filter
        .iter()
        .all(|(field, expected)| doc.get(field) == Some(expected))
}

/// Checks whether a document's TTL field has passed.
///
/// The TTL field holds an RFC 3339 timestamp; documents with a missing
/// or unreadable field are kept, matching what a real TTL index does.
pub(crate) fn is_expired(doc: &Value, ttl_field: &str, now: chrono::DateTime<chrono::Utc>) -> bool {
    doc.get(ttl_field)
        .and_then(Value::as_str)
        .and_then(|s| chrono::DateTime::parse_from_rfc3339(s).ok())
        .is_some_and(|expiry| expiry <= now)
}
