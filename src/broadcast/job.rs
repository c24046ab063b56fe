//! Broadcast staging: payloads and the per-operator job board.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tracing::debug;

use crate::store::UserId;

/// The message being replicated.
///
/// Kept opaque to the engine: the staged text plus a reference to the
/// message it was staged from, so the transport can preserve rich
/// content where the platform allows it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BroadcastPayload {
    /// Staged message text.
    pub text: String,

    /// Identifier of the message the operator replied to, when known.
    pub origin_message_id: Option<i32>,
}

impl BroadcastPayload {
    /// Stages a plain text payload.
    #[must_use]
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            origin_message_id: None,
        }
    }
}

/// A staged, unconfirmed broadcast.
#[derive(Debug, Clone)]
pub struct BroadcastJob {
    /// What to send.
    pub payload: BroadcastPayload,

    /// Snapshot of recipient ids taken at staging time. Never
    /// re-queried mid-flight.
    pub recipients: Vec<UserId>,

    /// When the job was staged.
    pub prepared_at: DateTime<Utc>,
}

/// At most one staged job per operator.
///
/// Staging again overwrites the previous unconfirmed job; confirm
/// consumes it; cancel discards it.
#[derive(Debug, Default)]
pub struct JobBoard {
    jobs: Mutex<HashMap<UserId, BroadcastJob>>,
}

impl JobBoard {
    /// Creates an empty board.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Stages a job for `operator`, replacing any unconfirmed one.
    pub async fn prepare(&self, operator: UserId, payload: BroadcastPayload, recipients: Vec<UserId>) -> BroadcastJob {
        let job = BroadcastJob {
            payload,
            recipients,
            prepared_at: Utc::now(),
        };

        let mut jobs = self.jobs.lock().await;
        if jobs.insert(operator, job.clone()).is_some() {
            debug!("operator {} replaced an unconfirmed broadcast", operator);
        }
        job
    }

    /// Consumes the staged job for `operator`, if any.
    pub async fn take(&self, operator: UserId) -> Option<BroadcastJob> {
        let mut jobs = self.jobs.lock().await;
        jobs.remove(&operator)
    }

    /// Discards the staged job for `operator`. Returns whether one
    /// existed.
    pub async fn cancel(&self, operator: UserId) -> bool {
        let mut jobs = self.jobs.lock().await;
        jobs.remove(&operator).is_some()
    }

    /// Peeks at the staged job for `operator` without consuming it.
    pub async fn pending(&self, operator: UserId) -> Option<BroadcastJob> {
        let jobs = self.jobs.lock().await;
        jobs.get(&operator).cloned()
    }
}
