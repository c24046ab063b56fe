//! Sequential broadcast delivery.
//!
//! One recipient at a time, by construction: the platform's rate
//! ceiling and backoff rules are defined against a single outbound
//! stream, so there is deliberately no parallel sending here.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::{
    BroadcastPayload, SendOutcome, SendPort, Sleeper, BACKOFF_MARGIN, INTER_MESSAGE_PAUSE,
    PROGRESS_EVERY, SAMPLE_FAILURE_CAP,
};
use crate::store::UserId;

/// Cooperative stop signal, checked once per recipient boundary.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    /// Creates a flag in the running state.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests the running delivery to stop before its next recipient.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Whether a stop has been requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// A progress observation, emitted every [`PROGRESS_EVERY`] recipients
/// and on the final one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Progress {
    pub attempted: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub total: usize,
}

/// Final accounting for one delivery run.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DeliveryReport {
    /// Recipients the engine moved past (a retried recipient counts
    /// once).
    pub attempted: usize,

    /// Deliveries that reached their recipient.
    pub succeeded: usize,

    /// Recipients given up on.
    pub failed: usize,

    /// Up to [`SAMPLE_FAILURE_CAP`] failure details, in order.
    pub sample_failures: Vec<(UserId, String)>,

    /// Whether the run was stopped by a cancel before finishing.
    pub cancelled: bool,
}

/// Drives a payload through the send primitive for a recipient
/// snapshot.
pub struct BroadcastEngine {
    port: Arc<dyn SendPort>,
    sleeper: Arc<dyn Sleeper>,
    pace: std::time::Duration,
}

impl BroadcastEngine {
    /// Creates an engine over the given send primitive with the
    /// default inter-message pace.
    #[must_use]
    pub fn new(port: Arc<dyn SendPort>, sleeper: Arc<dyn Sleeper>) -> Self {
        Self {
            port,
            sleeper,
            pace: INTER_MESSAGE_PAUSE,
        }
    }

    /// Overrides the inter-message pace.
    #[must_use]
    pub const fn with_pace(mut self, pace: std::time::Duration) -> Self {
        self.pace = pace;
        self
    }

    /// Delivers `payload` to every recipient in snapshot order.
    ///
    /// A single recipient failing never aborts the run. Rate-limit
    /// signals cause an in-place retry after the mandated wait plus a
    /// margin; the retried recipient still counts once. Progress
    /// observations go to `progress` when provided; a full receiver
    /// drops observations rather than stalling delivery.
    pub async fn deliver(
        &self,
        payload: &BroadcastPayload,
        recipients: &[UserId],
        cancel: &CancelFlag,
        progress: Option<&mpsc::Sender<Progress>>,
    ) -> DeliveryReport {
        let total = recipients.len();
        info!("broadcast starting: {} recipient(s)", total);

        let mut report = DeliveryReport::default();

        for (position, &recipient) in recipients.iter().enumerate() {
            if cancel.is_cancelled() {
                info!(
                    "broadcast cancelled after {} of {} recipient(s)",
                    report.attempted, total
                );
                report.cancelled = true;
                break;
            }

            self.deliver_one(payload, recipient, &mut report).await;

            let is_last = position + 1 == total;
            if (position + 1) % PROGRESS_EVERY == 0 || is_last {
                if let Some(tx) = progress {
                    let _ = tx.try_send(Progress {
                        attempted: report.attempted,
                        succeeded: report.succeeded,
                        failed: report.failed,
                        total,
                    });
                }
            }

            // Self-throttle after every attempt, reactive backoff aside.
            if !is_last {
                self.sleeper.sleep(self.pace).await;
            }
        }

        info!(
            "broadcast finished: attempted={} succeeded={} failed={}",
            report.attempted, report.succeeded, report.failed
        );
        report
    }

    /// Sends to one recipient, retrying in place on rate limits.
    async fn deliver_one(
        &self,
        payload: &BroadcastPayload,
        recipient: UserId,
        report: &mut DeliveryReport,
    ) {
        loop {
            match self.port.send(recipient, payload).await {
                SendOutcome::Delivered => {
                    report.succeeded += 1;
                    break;
                }
                SendOutcome::RateLimited { retry_after } => {
                    let wait = retry_after + BACKOFF_MARGIN;
                    debug!(
                        "rate limited on {}, waiting {:?} before retrying",
                        recipient, wait
                    );
                    self.sleeper.sleep(wait).await;
                    // Same recipient, same attempt.
                }
                SendOutcome::Failed { reason } => {
                    warn!("broadcast to {} failed: {}", recipient, reason);
                    report.failed += 1;
                    if report.sample_failures.len() < SAMPLE_FAILURE_CAP {
                        report.sample_failures.push((recipient, reason));
                    }
                    break;
                }
            }
        }
        report.attempted += 1;
    }
}

impl std::fmt::Debug for BroadcastEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BroadcastEngine")
            .field("pace", &self.pace)
            .finish_non_exhaustive()
    }
}
