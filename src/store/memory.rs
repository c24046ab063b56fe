//! In-memory store backend.
//!
//! Holds every collection in a map guarded by one lock. Used by tests
//! and useful for running the bot without any persistence at all.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use tokio::sync::RwLock;

use super::{is_expired, matches_filter, Filter, Store, StoreError, UserId};

type Collections = HashMap<String, BTreeMap<UserId, Value>>;

/// Volatile document store.
#[derive(Debug, Default)]
pub struct MemoryStore {
    collections: RwLock<Collections>,

    /// Collections swept on read: collection name to TTL field name.
    ttl_fields: HashMap<String, String>,
}

impl MemoryStore {
    /// Creates an empty store with no TTL sweeps configured.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Enables a read-time TTL sweep on `collection`, evicting documents
    /// whose `field` timestamp has passed.
    #[must_use]
    pub fn with_ttl(mut self, collection: &str, field: &str) -> Self {
        self.ttl_fields
            .insert(collection.to_owned(), field.to_owned());
        self
    }

    /// Removes expired documents from a TTL collection before a read.
    async fn sweep(&self, collection: &str) {
        let Some(field) = self.ttl_fields.get(collection) else {
            return;
        };
        let now = Utc::now();
        let mut collections = self.collections.write().await;
        if let Some(docs) = collections.get_mut(collection) {
            docs.retain(|_, doc| !is_expired(doc, field, now));
        }
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn upsert(&self, collection: &str, key: UserId, fields: Value) -> Result<(), StoreError> {
        let mut collections = self.collections.write().await;
        collections
            .entry(collection.to_owned())
            .or_default()
            .insert(key, fields);
        Ok(())
    }

    async fn find_one(&self, collection: &str, key: UserId) -> Result<Option<Value>, StoreError> {
        self.sweep(collection).await;
        let collections = self.collections.read().await;
        Ok(collections
            .get(collection)
            .and_then(|docs| docs.get(&key))
            .cloned())
    }

    async fn delete_one(&self, collection: &str, key: UserId) -> Result<bool, StoreError> {
        let mut collections = self.collections.write().await;
        Ok(collections
            .get_mut(collection)
            .is_some_and(|docs| docs.remove(&key).is_some()))
    }

    async fn count(&self, collection: &str, filter: Option<&Filter>) -> Result<usize, StoreError> {
        self.sweep(collection).await;
        let collections = self.collections.read().await;
        Ok(collections
            .get(collection)
            .map_or(0, |docs| {
                docs.values()
                    .filter(|doc| matches_filter(doc, filter))
                    .count()
            }))
    }

    async fn find_all(
        &self,
        collection: &str,
        filter: Option<&Filter>,
    ) -> Result<Vec<Value>, StoreError> {
        self.sweep(collection).await;
        let collections = self.collections.read().await;
        Ok(collections
            .get(collection)
            .map(|docs| {
                docs.values()
                    .filter(|doc| matches_filter(doc, filter))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use serde_json::json;

    #[tokio::test]
    async fn test_upsert_overwrites() {
        let store = MemoryStore::new();
        store
            .upsert("users", 1, json!({"name": "first"}))
            .await
            .unwrap();
        store
            .upsert("users", 1, json!({"name": "second"}))
            .await
            .unwrap();

        let doc = store.find_one("users", 1).await.unwrap().unwrap();
        assert_eq!(doc["name"], "second");
        assert_eq!(store.count("users", None).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_delete_reports_presence() {
        let store = MemoryStore::new();
        store.upsert("users", 1, json!({})).await.unwrap();

        assert!(store.delete_one("users", 1).await.unwrap());
        assert!(!store.delete_one("users", 1).await.unwrap());
    }

    #[tokio::test]
    async fn test_filter_matches_fields() {
        let store = MemoryStore::new();
        store
            .upsert("users", 1, json!({"plan": "monthly"}))
            .await
            .unwrap();
        store
            .upsert("users", 2, json!({"plan": "yearly"}))
            .await
            .unwrap();

        let mut filter = Filter::new();
        filter.insert("plan".to_owned(), json!("monthly"));
        assert_eq!(store.count("users", Some(&filter)).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_ttl_sweep_evicts_expired() {
        let store = MemoryStore::new().with_ttl("tokens", "expires_at");

        let gone = (Utc::now() - Duration::hours(1)).to_rfc3339();
        let live = (Utc::now() + Duration::hours(1)).to_rfc3339();
        store
            .upsert("tokens", 1, json!({"expires_at": gone}))
            .await
            .unwrap();
        store
            .upsert("tokens", 2, json!({"expires_at": live}))
            .await
            .unwrap();

        assert!(store.find_one("tokens", 1).await.unwrap().is_none());
        assert!(store.find_one("tokens", 2).await.unwrap().is_some());
        assert_eq!(store.count("tokens", None).await.unwrap(), 1);
    }
}
