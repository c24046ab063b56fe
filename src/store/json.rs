//! JSON-file store backend.
//!
//! All collections live in one pretty-printed JSON file, loaded at
//! open and rewritten after every mutation. This trades write
//! throughput for zero operational dependencies, which suits a bot
//! whose store sees a handful of writes per user interaction.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use super::{is_expired, matches_filter, Filter, Store, StoreError, UserId};

type Collections = HashMap<String, BTreeMap<UserId, Value>>;

/// File-backed document store.
pub struct JsonStore {
    path: PathBuf,
    collections: RwLock<Collections>,
    ttl_fields: HashMap<String, String>,
}

impl JsonStore {
    /// Opens the store at `path`, loading existing data if the file
    /// exists. A missing file starts an empty store; an unreadable one
    /// is an error rather than silent data loss.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();

        let collections = match std::fs::read_to_string(&path) {
            Ok(content) => serde_json::from_str(&content)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("store file {} not found, starting empty", path.display());
                Collections::new()
            }
            Err(e) => return Err(e.into()),
        };

        Ok(Self {
            path,
            collections: RwLock::new(collections),
            ttl_fields: HashMap::new(),
        })
    }

    /// Enables a read-time TTL sweep on `collection`, evicting documents
    /// whose `field` timestamp has passed.
    #[must_use]
    pub fn with_ttl(mut self, collection: &str, field: &str) -> Self {
        self.ttl_fields
            .insert(collection.to_owned(), field.to_owned());
        self
    }

    /// Writes the current collections to disk.
    fn save(&self, collections: &Collections) -> Result<(), StoreError> {
        let json = serde_json::to_string_pretty(collections)?;
        std::fs::write(&self.path, json)?;
        Ok(())
    }

    /// Removes expired documents from a TTL collection, persisting the
    /// eviction so expired tokens never resurface after a restart.
    async fn sweep(&self, collection: &str) {
        let Some(field) = self.ttl_fields.get(collection) else {
            return;
        };
        let now = Utc::now();
        let mut collections = self.collections.write().await;
        let Some(docs) = collections.get_mut(collection) else {
            return;
        };

        let before = docs.len();
        docs.retain(|_, doc| !is_expired(doc, field, now));
        let evicted = before - docs.len();

        if evicted > 0 {
            debug!("evicted {} expired document(s) from {}", evicted, collection);
            if let Err(e) = self.save(&collections) {
                warn!("failed to persist TTL sweep of {}: {}", collection, e);
            }
        }
    }
}

#[async_trait]
impl Store for JsonStore {
    async fn upsert(&self, collection: &str, key: UserId, fields: Value) -> Result<(), StoreError> {
        let mut collections = self.collections.write().await;
        collections
            .entry(collection.to_owned())
            .or_default()
            .insert(key, fields);
        self.save(&collections)
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
        let was_present = collections
            .get_mut(collection)
            .is_some_and(|docs| docs.remove(&key).is_some());
        if was_present {
            self.save(&collections)?;
        }
        Ok(was_present)
    }

    async fn count(&self, collection: &str, filter: Option<&Filter>) -> Result<usize, StoreError> {
        self.sweep(collection).await;
        let collections = self.collections.read().await;
        Ok(collections.get(collection).map_or(0, |docs| {
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

impl std::fmt::Debug for JsonStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JsonStore")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}
