//! The access-tier resolver.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::{parse_grant_duration, DurationError, TtlCache, CACHE_TTL, TOKEN_VALIDITY_HOURS};
use crate::store::{Store, StoreError, UserId, PREMIUM_USERS, SUDO_USERS, TOKENS};

/// The resolved entitlement tier, highest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Tier {
    /// No entitlement.
    None,
    /// Holds a valid 24-hour token.
    Token,
    /// Holds an unexpired premium grant.
    Premium,
    /// Owner or listed administrator.
    Sudo,
}

impl Tier {
    /// Whether this tier may use gated features at all.
    #[must_use]
    pub fn has_access(self) -> bool {
        self != Self::None
    }
}

impl std::fmt::Display for Tier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::None => "none",
            Self::Token => "token",
            Self::Premium => "premium",
            Self::Sudo => "sudo",
        };
        write!(f, "{name}")
    }
}

/// A sudo grant row.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct SudoRecord {
    user_id: UserId,
    granted_at: DateTime<Utc>,
}

/// A premium grant with explicit start and expiry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PremiumRecord {
    pub user_id: UserId,
    pub start_date: DateTime<Utc>,
    pub expiry_date: DateTime<Utc>,
    pub plan: String,
}

/// A verified 24-hour access token. Eviction at `expires_at` is the
/// store's TTL sweep, not an application-level date check.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenRecord {
    pub user_id: UserId,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

/// Errors from administrative entitlement operations.
#[derive(Debug, thiserror::Error)]
pub enum AccessError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    BadDuration(#[from] DurationError),

    #[error("no pending verification for this user")]
    NoPendingVerification,

    #[error("verification token does not match")]
    TokenMismatch,
}

/// Resolves the entitlement tier of a user.
///
/// Owns its caches and the pending-verification map; create one
/// instance per bot and share it behind an [`Arc`].
pub struct AccessResolver {
    store: Arc<dyn Store>,
    owner_id: UserId,

    sudo_cache: TtlCache,
    premium_cache: TtlCache,
    token_cache: TtlCache,

    /// Tokens handed out but not yet verified, keyed by user. Never
    /// persisted; lost entries just force the user to start over.
    pending: Mutex<HashMap<UserId, String>>,
}

impl AccessResolver {
    /// Creates a resolver over `store` with the default cache TTL.
    #[must_use]
    pub fn new(store: Arc<dyn Store>, owner_id: UserId) -> Self {
        Self::with_cache_ttl(store, owner_id, CACHE_TTL)
    }

    /// Creates a resolver with an explicit cache TTL (tests use zero).
    #[must_use]
    pub fn with_cache_ttl(store: Arc<dyn Store>, owner_id: UserId, ttl: StdDuration) -> Self {
        Self {
            store,
            owner_id,
            sudo_cache: TtlCache::new(ttl),
            premium_cache: TtlCache::new(ttl),
            token_cache: TtlCache::new(ttl),
            pending: Mutex::new(HashMap::new()),
        }
    }

    /// Resolves the highest applicable tier for `user_id`.
    ///
    /// The premium check always runs, even when sudo wins, so an
    /// expired grant is compacted away on the same pass.
    pub async fn resolve_tier(&self, user_id: UserId) -> Tier {
        let premium = self.is_premium(user_id).await;

        if self.is_sudo(user_id).await {
            Tier::Sudo
        } else if premium {
            Tier::Premium
        } else if self.token_row_present(user_id).await {
            Tier::Token
        } else {
            Tier::None
        }
    }

    /// Whether `user_id` is the owner or a listed administrator.
    ///
    /// A store outage resolves to `false` rather than failing the
    /// caller; the next check after the outage re-reads the store.
    pub async fn is_sudo(&self, user_id: UserId) -> bool {
        if user_id == self.owner_id {
            return true;
        }

        if let Some(cached) = self.sudo_cache.get(user_id).await {
            return cached;
        }

        let result = match self.store.find_one(SUDO_USERS, user_id).await {
            Ok(row) => row.is_some(),
            Err(e) => {
                warn!("sudo check for {} failed, denying: {}", user_id, e);
                return false;
            }
        };

        self.sudo_cache.put(user_id, result).await;
        result
    }

    /// Whether `user_id` holds an unexpired premium grant.
    ///
    /// Read implies compaction: an expired grant found here is deleted
    /// on the spot so it never resurfaces.
    pub async fn is_premium(&self, user_id: UserId) -> bool {
        if let Some(cached) = self.premium_cache.get(user_id).await {
            return cached;
        }

        let row = match self.store.find_one(PREMIUM_USERS, user_id).await {
            Ok(row) => row,
            Err(e) => {
                warn!("premium check for {} failed, denying: {}", user_id, e);
                return false;
            }
        };

        let result = match row.as_ref().and_then(|doc| {
            serde_json::from_value::<PremiumRecord>(doc.clone()).ok()
        }) {
            Some(record) if record.expiry_date > Utc::now() => true,
            Some(record) => {
                info!(
                    "premium grant for {} expired {}, purging",
                    user_id, record.expiry_date
                );
                if let Err(e) = self.store.delete_one(PREMIUM_USERS, user_id).await {
                    warn!("failed to purge expired premium for {}: {}", user_id, e);
                }
                false
            }
            None => false,
        };

        self.premium_cache.put(user_id, result).await;
        result
    }

    /// Whether `user_id` may use token-gated features.
    ///
    /// Cumulative: sudo and premium users pass without holding a token.
    pub async fn has_valid_token(&self, user_id: UserId) -> bool {
        if self.is_sudo(user_id).await || self.is_premium(user_id).await {
            return true;
        }
        self.token_row_present(user_id).await
    }

    /// Checks for a token row. Presence alone implies validity; the
    /// store's TTL sweep removes expired rows.
    async fn token_row_present(&self, user_id: UserId) -> bool {
        if let Some(cached) = self.token_cache.get(user_id).await {
            return cached;
        }

        let result = match self.store.find_one(TOKENS, user_id).await {
            Ok(row) => row.is_some(),
            Err(e) => {
                warn!("token check for {} failed, denying: {}", user_id, e);
                return false;
            }
        };

        self.token_cache.put(user_id, result).await;
        result
    }

    /// Adds a user to the sudo list. Idempotent.
    pub async fn add_sudo(&self, user_id: UserId) -> Result<(), AccessError> {
        let record = SudoRecord {
            user_id,
            granted_at: Utc::now(),
        };
        self.store
            .upsert(SUDO_USERS, user_id, serde_json::to_value(record).map_err(StoreError::from)?)
            .await?;
        self.sudo_cache.invalidate(user_id).await;
        info!("granted sudo to {}", user_id);
        Ok(())
    }

    /// Removes a user from the sudo list. Returns whether a grant
    /// existed.
    pub async fn remove_sudo(&self, user_id: UserId) -> Result<bool, AccessError> {
        let was_present = self.store.delete_one(SUDO_USERS, user_id).await?;
        self.sudo_cache.invalidate(user_id).await;
        if was_present {
            info!("revoked sudo from {}", user_id);
        }
        Ok(was_present)
    }

    /// Grants premium for a compact human duration such as `1month`.
    ///
    /// The duration is validated before anything touches the store.
    pub async fn grant_premium(
        &self,
        user_id: UserId,
        duration: &str,
        plan: &str,
    ) -> Result<PremiumRecord, AccessError> {
        let span = parse_grant_duration(duration)?;

        let now = Utc::now();
        let record = PremiumRecord {
            user_id,
            start_date: now,
            expiry_date: now + span,
            plan: plan.to_owned(),
        };

        self.store
            .upsert(
                PREMIUM_USERS,
                user_id,
                serde_json::to_value(&record).map_err(StoreError::from)?,
            )
            .await?;
        self.premium_cache.invalidate(user_id).await;
        info!(
            "granted premium ({}) to {} until {}",
            plan, user_id, record.expiry_date
        );
        Ok(record)
    }

    /// Revokes a premium grant. Returns whether one existed.
    pub async fn revoke_premium(&self, user_id: UserId) -> Result<bool, AccessError> {
        let was_present = self.store.delete_one(PREMIUM_USERS, user_id).await?;
        self.premium_cache.invalidate(user_id).await;
        if was_present {
            info!("revoked premium from {}", user_id);
        }
        Ok(was_present)
    }

    /// Lists all stored premium grants, expired ones included (the
    /// read path purges those on the next per-user check).
    pub async fn premium_users(&self) -> Result<Vec<PremiumRecord>, AccessError> {
        let docs = self.store.find_all(PREMIUM_USERS, None).await?;
        Ok(docs
            .into_iter()
            .filter_map(|doc| serde_json::from_value(doc).ok())
            .collect())
    }

    /// Issues an opaque verification token for `user_id`, replacing
    /// any earlier pending one. The user must present the exact string
    /// back through the verification round-trip.
    pub async fn issue_verification(&self, user_id: UserId) -> String {
        let bytes: [u8; 16] = rand::random();
        let token = hex::encode(bytes);

        let mut pending = self.pending.lock().await;
        pending.insert(user_id, token.clone());
        debug!("issued verification token for {}", user_id);
        token
    }

    /// Completes the verification round-trip, persisting a 24-hour
    /// token on an exact match.
    pub async fn complete_verification(
        &self,
        user_id: UserId,
        presented: &str,
    ) -> Result<TokenRecord, AccessError> {
        {
            let mut pending = self.pending.lock().await;
            match pending.get(&user_id) {
                None => return Err(AccessError::NoPendingVerification),
                Some(expected) if expected != presented => {
                    return Err(AccessError::TokenMismatch);
                }
                Some(_) => {
                    pending.remove(&user_id);
                }
            }
        }

        let now = Utc::now();
        let record = TokenRecord {
            user_id,
            created_at: now,
            expires_at: now + chrono::Duration::hours(TOKEN_VALIDITY_HOURS),
        };

        self.store
            .upsert(
                TOKENS,
                user_id,
                serde_json::to_value(&record).map_err(StoreError::from)?,
            )
            .await?;
        self.token_cache.invalidate(user_id).await;
        info!("verified token access for {} until {}", user_id, record.expires_at);
        Ok(record)
    }
}

impl std::fmt::Debug for AccessResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccessResolver")
            .field("owner_id", &self.owner_id)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use serde_json::Value;

    use crate::store::{Filter, MemoryStore};

    /// Store double that counts reads, for cache-behaviour assertions.
    struct CountingStore {
        inner: MemoryStore,
        reads: AtomicUsize,
    }

    impl CountingStore {
        fn new() -> Self {
            Self {
                inner: MemoryStore::new().with_ttl(TOKENS, "expires_at"),
                reads: AtomicUsize::new(0),
            }
        }

        fn reads(&self) -> usize {
            self.reads.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Store for CountingStore {
        async fn upsert(
            &self,
            collection: &str,
            key: UserId,
            fields: Value,
        ) -> Result<(), StoreError> {
            self.inner.upsert(collection, key, fields).await
        }

        async fn find_one(
            &self,
            collection: &str,
            key: UserId,
        ) -> Result<Option<Value>, StoreError> {
            self.reads.fetch_add(1, Ordering::SeqCst);
            self.inner.find_one(collection, key).await
        }

        async fn delete_one(&self, collection: &str, key: UserId) -> Result<bool, StoreError> {
            self.inner.delete_one(collection, key).await
        }

        async fn count(
            &self,
            collection: &str,
            filter: Option<&Filter>,
        ) -> Result<usize, StoreError> {
            self.reads.fetch_add(1, Ordering::SeqCst);
            self.inner.count(collection, filter).await
        }

        async fn find_all(
            &self,
            collection: &str,
            filter: Option<&Filter>,
        ) -> Result<Vec<Value>, StoreError> {
            self.reads.fetch_add(1, Ordering::SeqCst);
            self.inner.find_all(collection, filter).await
        }
    }

    const OWNER: UserId = 1000;

    fn resolver(store: Arc<dyn Store>) -> AccessResolver {
        AccessResolver::new(store, OWNER)
    }

    #[tokio::test]
    async fn test_owner_is_always_sudo() {
        let resolver = resolver(Arc::new(MemoryStore::new()));
        assert!(resolver.is_sudo(OWNER).await);
        assert_eq!(resolver.resolve_tier(OWNER).await, Tier::Sudo);
    }

    #[tokio::test]
    async fn test_unknown_user_has_no_tier() {
        let resolver = resolver(Arc::new(MemoryStore::new()));
        assert_eq!(resolver.resolve_tier(5).await, Tier::None);
        assert!(!resolver.has_valid_token(5).await);
    }

    #[tokio::test]
    async fn test_sudo_grant_and_revoke() {
        let resolver = resolver(Arc::new(MemoryStore::new()));

        resolver.add_sudo(5).await.unwrap();
        assert!(resolver.is_sudo(5).await);

        assert!(resolver.remove_sudo(5).await.unwrap());
        assert!(!resolver.is_sudo(5).await);
        assert!(!resolver.remove_sudo(5).await.unwrap());
    }

    #[tokio::test]
    async fn test_premium_grant_resolves() {
        let resolver = resolver(Arc::new(MemoryStore::new()));

        let record = resolver.grant_premium(5, "1month", "monthly").await.unwrap();
        assert!(record.expiry_date > Utc::now());
        assert_eq!(resolver.resolve_tier(5).await, Tier::Premium);
    }

    #[tokio::test]
    async fn test_bad_duration_does_not_mutate_store() {
        let store = Arc::new(MemoryStore::new());
        let resolver = resolver(Arc::clone(&store) as Arc<dyn Store>);

        assert!(resolver.grant_premium(5, "5weeks", "odd").await.is_err());
        assert!(resolver.grant_premium(5, "abc", "odd").await.is_err());
        assert!(store.find_one(PREMIUM_USERS, 5).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_expired_premium_is_purged_on_read() {
        let store = Arc::new(MemoryStore::new());
        let resolver =
            AccessResolver::with_cache_ttl(Arc::clone(&store) as Arc<dyn Store>, OWNER, StdDuration::ZERO);

        let now = Utc::now();
        let stale = PremiumRecord {
            user_id: 5,
            start_date: now - chrono::Duration::days(40),
            expiry_date: now - chrono::Duration::days(10),
            plan: "monthly".to_owned(),
        };
        store
            .upsert(PREMIUM_USERS, 5, serde_json::to_value(&stale).unwrap())
            .await
            .unwrap();

        assert!(!resolver.is_premium(5).await);
        // Read implies compaction.
        assert!(store.find_one(PREMIUM_USERS, 5).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_sudo_beats_expired_premium_and_purges_it() {
        let store = Arc::new(MemoryStore::new());
        let resolver =
            AccessResolver::with_cache_ttl(Arc::clone(&store) as Arc<dyn Store>, OWNER, StdDuration::ZERO);

        resolver.add_sudo(5).await.unwrap();
        let now = Utc::now();
        let stale = PremiumRecord {
            user_id: 5,
            start_date: now - chrono::Duration::days(2),
            expiry_date: now - chrono::Duration::hours(1),
            plan: "daily".to_owned(),
        };
        store
            .upsert(PREMIUM_USERS, 5, serde_json::to_value(&stale).unwrap())
            .await
            .unwrap();

        assert_eq!(resolver.resolve_tier(5).await, Tier::Sudo);

        // The premium check still ran during resolution and compacted
        // the stale grant on the spot.
        assert!(store.find_one(PREMIUM_USERS, 5).await.unwrap().is_none());
        assert!(!resolver.is_premium(5).await);
    }

    #[tokio::test]
    async fn test_cache_hit_skips_store_read() {
        let store = Arc::new(CountingStore::new());
        let resolver = AccessResolver::new(Arc::clone(&store) as Arc<dyn Store>, OWNER);

        assert!(!resolver.is_sudo(5).await);
        let after_first = store.reads();
        assert!(!resolver.is_sudo(5).await);
        assert_eq!(store.reads(), after_first, "second check within TTL must not read");
    }

    #[tokio::test]
    async fn test_expired_cache_rereads_store() {
        let store = Arc::new(CountingStore::new());
        let resolver =
            AccessResolver::with_cache_ttl(Arc::clone(&store) as Arc<dyn Store>, OWNER, StdDuration::ZERO);

        assert!(!resolver.is_sudo(5).await);
        let after_first = store.reads();
        assert!(!resolver.is_sudo(5).await);
        assert!(store.reads() > after_first, "zero TTL must re-read");
    }

    #[tokio::test]
    async fn test_grant_invalidates_cache() {
        let store = Arc::new(MemoryStore::new());
        let resolver = resolver(Arc::clone(&store) as Arc<dyn Store>);

        // Prime the negative cache entry, then grant within the TTL.
        assert!(!resolver.is_sudo(5).await);
        resolver.add_sudo(5).await.unwrap();
        assert!(resolver.is_sudo(5).await, "grant must not be masked by a stale cache");

        assert!(!resolver.is_premium(7).await);
        resolver.grant_premium(7, "1day", "daily").await.unwrap();
        assert!(resolver.is_premium(7).await);
    }

    #[tokio::test]
    async fn test_token_verification_roundtrip() {
        let store = Arc::new(MemoryStore::new().with_ttl(TOKENS, "expires_at"));
        let resolver = resolver(Arc::clone(&store) as Arc<dyn Store>);

        let token = resolver.issue_verification(5).await;
        let record = resolver.complete_verification(5, &token).await.unwrap();
        assert_eq!(record.user_id, 5);

        assert_eq!(resolver.resolve_tier(5).await, Tier::Token);
        assert!(resolver.has_valid_token(5).await);

        // Pending entry is consumed.
        assert!(matches!(
            resolver.complete_verification(5, &token).await,
            Err(AccessError::NoPendingVerification)
        ));
    }

    #[tokio::test]
    async fn test_token_mismatch_rejected() {
        let resolver = resolver(Arc::new(MemoryStore::new()));

        let _token = resolver.issue_verification(5).await;
        assert!(matches!(
            resolver.complete_verification(5, "wrong").await,
            Err(AccessError::TokenMismatch)
        ));
        assert!(matches!(
            resolver.complete_verification(6, "anything").await,
            Err(AccessError::NoPendingVerification)
        ));
    }

    #[tokio::test]
    async fn test_issue_overwrites_pending() {
        let resolver = resolver(Arc::new(MemoryStore::new()));

        let first = resolver.issue_verification(5).await;
        let second = resolver.issue_verification(5).await;
        assert_ne!(first, second);

        assert!(matches!(
            resolver.complete_verification(5, &first).await,
            Err(AccessError::TokenMismatch)
        ));
    }

    #[tokio::test]
    async fn test_premium_implies_token_access() {
        let resolver = resolver(Arc::new(MemoryStore::new()));
        resolver.grant_premium(5, "1day", "daily").await.unwrap();
        assert!(resolver.has_valid_token(5).await);
    }

    #[tokio::test]
    async fn test_premium_users_listing() {
        let resolver = resolver(Arc::new(MemoryStore::new()));
        resolver.grant_premium(5, "1month", "monthly").await.unwrap();
        resolver.grant_premium(6, "1year", "yearly").await.unwrap();

        let grants = resolver.premium_users().await.unwrap();
        assert_eq!(grants.len(), 2);
        assert!(grants.iter().any(|g| g.user_id == 5 && g.plan == "monthly"));
    }

    #[test]
    fn test_tier_ordering() {
        assert!(Tier::Sudo > Tier::Premium);
        assert!(Tier::Premium > Tier::Token);
        assert!(Tier::Token > Tier::None);
        assert!(!Tier::None.has_access());
        assert!(Tier::Token.has_access());
    }
}
