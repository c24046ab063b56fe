//! Broadcast fan-out module.
//!
//! Replicates one staged message to every known user, one recipient at
//! a time. The engine self-throttles between sends, backs off and
//! retries in place when the platform says slow down, records
//! permanent failures without stopping, and reports progress at a
//! fixed cadence. Jobs are staged per operator and consumed by a
//! confirm or discarded by a cancel.

mod engine;
mod job;

use std::time::Duration;

use async_trait::async_trait;

pub use engine::{BroadcastEngine, CancelFlag, DeliveryReport, Progress};
pub use job::{BroadcastJob, BroadcastPayload, JobBoard};

use crate::quiz::Question;
use crate::store::UserId;

/// Pause after every attempted recipient, keeping the outbound rate
/// under the platform ceiling.
pub const INTER_MESSAGE_PAUSE: Duration = Duration::from_millis(500);

/// Safety margin added on top of a mandated backoff wait.
pub const BACKOFF_MARGIN: Duration = Duration::from_secs(1);

/// Progress is reported every this many recipients, and always on the
/// last one.
pub const PROGRESS_EVERY: usize = 10;

/// Upper bound on per-recipient failure details kept in a report.
pub const SAMPLE_FAILURE_CAP: usize = 20;

/// Outcome of one send attempt toward one recipient.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendOutcome {
    /// The message reached the recipient.
    Delivered,

    /// The platform demands a pause before retrying this recipient.
    RateLimited {
        /// Mandated wait before the retry.
        retry_after: Duration,
    },

    /// The recipient is unreachable for good (blocked the bot, account
    /// deleted, malformed reference). Never retried.
    Failed {
        /// Human-readable reason for the report.
        reason: String,
    },
}

/// The outbound send primitive.
///
/// The live implementation wraps the Telegram client; tests script
/// outcomes per recipient.
#[async_trait]
pub trait SendPort: Send + Sync {
    /// Sends a broadcast payload to one recipient.
    async fn send(&self, recipient: UserId, payload: &BroadcastPayload) -> SendOutcome;

    /// Sends one question as a quiz poll to one recipient.
    async fn send_quiz(&self, recipient: UserId, question: &Question) -> SendOutcome;

    /// Sends a plain text notice to one recipient.
    async fn send_text(&self, recipient: UserId, text: &str) -> SendOutcome;
}

/// Clock seam so tests run without wall-clock delays.
#[async_trait]
pub trait Sleeper: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

/// The real clock.
#[derive(Debug, Default)]
pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}
