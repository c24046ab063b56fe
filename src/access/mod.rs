//! Access-tier resolution module.
//!
//! Every gated operation asks the [`AccessResolver`] what a user may
//! do. Three entitlement sources overlap: sudo membership (owner plus
//! an administrative list, never expires), premium grants (explicit
//! expiry date, purged lazily on read) and 24-hour verification tokens
//! (evicted by the store's TTL sweep). Results are cached in-process
//! for a short window to keep store traffic bounded.

mod cache;
mod duration;
mod resolver;

pub use cache::TtlCache;
pub use duration::{parse_grant_duration, DurationError};
pub use resolver::{AccessError, AccessResolver, PremiumRecord, Tier, TokenRecord};

use std::time::Duration;

/// How long a resolved check stays valid before the store is consulted
/// again.
pub const CACHE_TTL: Duration = Duration::from_secs(30);

/// Validity of an access token from the moment of verification.
pub const TOKEN_VALIDITY_HOURS: i64 = 24;
