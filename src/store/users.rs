//! Tracked-user records and interaction accounting.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use super::{Store, StoreError, UserId, USERS};

/// A known bot user, upserted on every interaction.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UserRecord {
    /// Platform-assigned user identifier.
    pub user_id: UserId,

    /// Username, if the user has one.
    #[serde(default)]
    pub username: Option<String>,

    /// Display name.
    #[serde(default)]
    pub first_name: Option<String>,

    /// When the user last talked to the bot.
    pub last_interaction: DateTime<Utc>,

    /// Day of the user's most recent quiz upload.
    #[serde(default)]
    pub last_quiz_date: Option<NaiveDate>,

    /// Quizzes created on `last_quiz_date`.
    #[serde(default)]
    pub quiz_count: Option<u32>,
}

impl UserRecord {
    /// Decodes a stored document, tolerating unknown fields.
    #[must_use]
    pub fn from_value(doc: &Value) -> Option<Self> {
        serde_json::from_value(doc.clone()).ok()
    }
}

/// Records an interaction, creating or refreshing the user's row.
///
/// Existing quiz-accounting fields are preserved; only the identity
/// fields and `last_interaction` are overwritten.
pub async fn record_interaction(
    store: &dyn Store,
    user_id: UserId,
    username: Option<&str>,
    first_name: Option<&str>,
) -> Result<(), StoreError> {
    let existing = store
        .find_one(USERS, user_id)
        .await?
        .as_ref()
        .and_then(UserRecord::from_value);

    let record = UserRecord {
        user_id,
        username: username.map(str::to_owned),
        first_name: first_name.map(str::to_owned),
        last_interaction: Utc::now(),
        last_quiz_date: existing.as_ref().and_then(|u| u.last_quiz_date),
        quiz_count: existing.as_ref().and_then(|u| u.quiz_count),
    };

    store
        .upsert(USERS, user_id, serde_json::to_value(record)?)
        .await
}

/// Bumps the user's daily quiz counter, resetting it on a new day.
pub async fn note_quiz_created(store: &dyn Store, user_id: UserId) -> Result<u32, StoreError> {
    let today = Utc::now().date_naive();

    let mut record = store
        .find_one(USERS, user_id)
        .await?
        .as_ref()
        .and_then(UserRecord::from_value)
        .unwrap_or(UserRecord {
            user_id,
            username: None,
            first_name: None,
            last_interaction: Utc::now(),
            last_quiz_date: None,
            quiz_count: None,
        });

    let count = if record.last_quiz_date == Some(today) {
        record.quiz_count.unwrap_or(0) + 1
    } else {
        1
    };

    record.last_quiz_date = Some(today);
    record.quiz_count = Some(count);
    debug!("user {} quiz count for {} is now {}", user_id, today, count);

    store
        .upsert(USERS, user_id, serde_json::to_value(record)?)
        .await?;
    Ok(count)
}

/// Snapshots every known user id, in key order.
pub async fn all_user_ids(store: &dyn Store) -> Result<Vec<UserId>, StoreError> {
    let docs = store.find_all(USERS, None).await?;
    Ok(docs
        .iter()
        .filter_map(|doc| doc.get("user_id").and_then(Value::as_i64))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    #[tokio::test]
    async fn test_record_interaction_upserts() {
        let store = MemoryStore::new();

        record_interaction(&store, 7, Some("bob"), Some("Bob"))
            .await
            .unwrap();
        record_interaction(&store, 7, Some("bobby"), Some("Bob"))
            .await
            .unwrap();

        let ids = all_user_ids(&store).await.unwrap();
        assert_eq!(ids, vec![7]);

        let doc = store.find_one(USERS, 7).await.unwrap().unwrap();
        let user = UserRecord::from_value(&doc).unwrap();
        assert_eq!(user.username.as_deref(), Some("bobby"));
    }

    #[tokio::test]
    async fn test_interaction_preserves_quiz_accounting() {
        let store = MemoryStore::new();

        record_interaction(&store, 7, None, None).await.unwrap();
        note_quiz_created(&store, 7).await.unwrap();
        record_interaction(&store, 7, Some("bob"), None)
            .await
            .unwrap();

        let doc = store.find_one(USERS, 7).await.unwrap().unwrap();
        let user = UserRecord::from_value(&doc).unwrap();
        assert_eq!(user.quiz_count, Some(1));
        assert!(user.last_quiz_date.is_some());
    }

    #[tokio::test]
    async fn test_quiz_counter_increments_same_day() {
        let store = MemoryStore::new();

        assert_eq!(note_quiz_created(&store, 3).await.unwrap(), 1);
        assert_eq!(note_quiz_created(&store, 3).await.unwrap(), 2);
        assert_eq!(note_quiz_created(&store, 3).await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_all_user_ids_in_key_order() {
        let store = MemoryStore::new();

        record_interaction(&store, 30, None, None).await.unwrap();
        record_interaction(&store, 10, None, None).await.unwrap();
        record_interaction(&store, 20, None, None).await.unwrap();

        assert_eq!(all_user_ids(&store).await.unwrap(), vec![10, 20, 30]);
    }
}
