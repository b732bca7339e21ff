//! Offline delivery queue.
//!
//! Messages that could not be sent are appended here and replayed, in
//! enqueue order, by [`OfflineQueue::drain`]. Each pass touches every entry
//! at most once: a delivered entry is removed, a failed one has its retry
//! count bumped, and an entry that reaches its retry limit is dropped and
//! reported as a [`PermanentFailure`]. A failed write during a pass is
//! recorded in the report and does not stop it.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::dispatch::{Delivery, Dispatch, DispatchOutcome};
use super::models::ChatRequest;
use crate::error::{CourierError, Result};
use crate::storage::kv::KvStore;

/// Storage key of the persisted queue.
pub const QUEUE_KEY: &str = "offline_queue.v1";

/// Failed drain passes a message survives before it is dropped.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

// =============================================================================
// Entries
// =============================================================================

/// A message waiting for a viable send path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueuedMessage {
    pub id: String,
    pub chat_id: String,
    pub message: ChatRequest,
    pub enqueued_at: DateTime<Utc>,
    pub retry_count: u32,
    pub max_retries: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

impl QueuedMessage {
    /// Whether the retry budget is spent.
    #[must_use]
    pub const fn is_exhausted(&self) -> bool {
        self.retry_count >= self.max_retries
    }
}

/// A message dropped after exhausting its retries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PermanentFailure {
    pub id: String,
    pub chat_id: String,
    pub attempts: u32,
    pub last_error: Option<String>,
}

impl PermanentFailure {
    #[must_use]
    pub fn to_error(&self) -> CourierError {
        CourierError::PermanentQueueFailure {
            message_id: self.id.clone(),
            attempts: self.attempts,
        }
    }
}

/// A queued message that went out during a drain.
#[derive(Debug)]
pub struct QueuedDelivery {
    pub message: QueuedMessage,
    pub delivery: Delivery,
}

// =============================================================================
// Drain report
// =============================================================================

/// Result of one drain pass.
#[derive(Debug, Default)]
pub struct DrainReport {
    pub sent: usize,
    /// Entries whose send failed this pass, retried or dropped.
    pub failed: usize,
    /// Failed entries kept for the next pass.
    pub retried: usize,
    pub permanent_failures: Vec<PermanentFailure>,
    pub deliveries: Vec<QueuedDelivery>,
    /// Another drain was already running; nothing was attempted.
    pub skipped: bool,
    /// The device went offline mid-pass; remaining entries were not attempted.
    pub interrupted: bool,
    /// Queue writes that failed during the pass.
    pub storage_errors: Vec<String>,
}

impl DrainReport {
    fn skipped() -> Self {
        Self {
            skipped: true,
            ..Self::default()
        }
    }

    /// Serializable counts for notifications.
    #[must_use]
    pub fn summary(&self) -> DrainSummary {
        DrainSummary {
            sent: self.sent,
            failed: self.failed,
            retried: self.retried,
            permanent: self.permanent_failures.len(),
            skipped: self.skipped,
            interrupted: self.interrupted,
            storage_errors: self.storage_errors.len(),
        }
    }

    fn record_storage_error(&mut self, id: &str, err: &CourierError) {
        tracing::error!(id, error = %err, "Could not persist offline queue during drain");
        self.storage_errors.push(format!("{id}: {err}"));
    }
}

/// Aggregate counts of a drain pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DrainSummary {
    pub sent: usize,
    pub failed: usize,
    pub retried: usize,
    pub permanent: usize,
    pub skipped: bool,
    pub interrupted: bool,
    pub storage_errors: usize,
}

// =============================================================================
// Queue
// =============================================================================

/// Durable FIFO of undelivered messages.
pub struct OfflineQueue {
    kv: Arc<dyn KvStore>,
    entries: Mutex<Vec<QueuedMessage>>,
    max_retries: u32,
    draining: AtomicBool,
}

struct DrainGuard<'a>(&'a AtomicBool);

impl Drop for DrainGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl OfflineQueue {
    /// Load the persisted queue. Corrupt data is logged and discarded.
    pub fn load(kv: Arc<dyn KvStore>) -> Self {
        Self::load_with_max_retries(kv, DEFAULT_MAX_RETRIES)
    }

    /// Load with a custom retry limit for newly enqueued messages.
    pub fn load_with_max_retries(kv: Arc<dyn KvStore>, max_retries: u32) -> Self {
        let entries = match kv.get(QUEUE_KEY) {
            Ok(Some(raw)) => serde_json::from_str::<Vec<QueuedMessage>>(&raw).unwrap_or_else(|e| {
                tracing::warn!(error = %e, "Stored offline queue is corrupt; starting empty");
                Vec::new()
            }),
            Ok(None) => Vec::new(),
            Err(e) => {
                tracing::warn!(error = %e, "Could not read offline queue; starting empty");
                Vec::new()
            }
        };
        if !entries.is_empty() {
            tracing::debug!(count = entries.len(), "Offline queue loaded");
        }
        Self {
            kv,
            entries: Mutex::new(entries),
            max_retries: max_retries.max(1),
            draining: AtomicBool::new(false),
        }
    }

    /// Append a message and persist the queue.
    ///
    /// # Errors
    /// Returns a storage error if the queue cannot be persisted; the message
    /// is not kept in that case.
    pub fn enqueue(&self, chat_id: &str, message: ChatRequest) -> Result<QueuedMessage> {
        let entry = QueuedMessage {
            id: uuid::Uuid::new_v4().to_string(),
            chat_id: chat_id.to_string(),
            message,
            enqueued_at: Utc::now(),
            retry_count: 0,
            max_retries: self.max_retries,
            last_error: None,
        };
        self.mutate(|entries| entries.push(entry.clone()))?;
        tracing::info!(id = %entry.id, chat_id, "Message queued for later delivery");
        Ok(entry)
    }

    /// Snapshot of waiting messages, oldest first.
    #[must_use]
    pub fn list(&self) -> Vec<QueuedMessage> {
        self.entries.lock().map(|e| e.clone()).unwrap_or_default()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.lock().map(|e| e.len()).unwrap_or_default()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether a drain pass is running.
    #[must_use]
    pub fn is_draining(&self) -> bool {
        self.draining.load(Ordering::Acquire)
    }

    /// Drop a message without sending it.
    ///
    /// # Errors
    /// Returns [`CourierError::QueuedMessageNotFound`] for unknown ids, or a
    /// storage error if persisting fails.
    pub fn remove(&self, id: &str) -> Result<QueuedMessage> {
        let mut removed = None;
        self.mutate(|entries| {
            if let Some(pos) = entries.iter().position(|e| e.id == id) {
                removed = Some(entries.remove(pos));
            }
        })?;
        removed.ok_or_else(|| CourierError::QueuedMessageNotFound(id.to_string()))
    }

    /// Replay every waiting message once, in enqueue order.
    ///
    /// Only one pass runs at a time; an overlapping call returns a report
    /// with `skipped` set. Sends are sequential.
    ///
    /// A write that fails mid-pass is logged and listed in
    /// [`DrainReport::storage_errors`]; the change still applies in memory and
    /// is written with the next successful persist.
    pub async fn drain(&self, dispatcher: &dyn Dispatch) -> DrainReport {
        if self
            .draining
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            tracing::debug!("Drain already in progress; skipping");
            return DrainReport::skipped();
        }
        let _guard = DrainGuard(&self.draining);

        let snapshot = self.list();
        let mut report = DrainReport::default();
        if snapshot.is_empty() {
            return report;
        }
        tracing::info!(count = snapshot.len(), "Draining offline queue");

        for entry in snapshot {
            match dispatcher.send(&entry.message).await {
                DispatchOutcome::Delivered(delivery) => {
                    if let Err(e) = self.apply(|entries| entries.retain(|e| e.id != entry.id)) {
                        report.record_storage_error(&entry.id, &e);
                    }
                    report.sent += 1;
                    report.deliveries.push(QueuedDelivery {
                        message: entry,
                        delivery,
                    });
                }
                DispatchOutcome::Failed(failure) => {
                    report.failed += 1;
                    let summary = failure.summary();
                    let mut dropped = None;
                    let persisted = self.apply(|entries| {
                        let Some(pos) = entries.iter().position(|e| e.id == entry.id) else {
                            return;
                        };
                        let current = &mut entries[pos];
                        current.retry_count += 1;
                        current.last_error = Some(summary.clone());
                        if current.is_exhausted() {
                            dropped = Some(entries.remove(pos));
                        }
                    });
                    if let Err(e) = persisted {
                        report.record_storage_error(&entry.id, &e);
                    }

                    if let Some(gone) = dropped {
                        tracing::warn!(
                            id = %gone.id,
                            attempts = gone.retry_count,
                            "Queued message dropped after exhausting retries"
                        );
                        report.permanent_failures.push(PermanentFailure {
                            id: gone.id,
                            chat_id: gone.chat_id,
                            attempts: gone.retry_count,
                            last_error: gone.last_error,
                        });
                    } else {
                        report.retried += 1;
                    }
                }
                DispatchOutcome::MustQueue => {
                    tracing::info!("Device went offline during drain; stopping pass");
                    report.interrupted = true;
                    break;
                }
            }
        }

        if !report.storage_errors.is_empty() {
            match self.apply(|_| {}) {
                Ok(()) => tracing::info!("Offline queue persisted after earlier write failures"),
                Err(e) => tracing::error!(error = %e, "Offline queue still not persisted"),
            }
        }

        tracing::info!(
            sent = report.sent,
            failed = report.failed,
            permanent = report.permanent_failures.len(),
            storage_errors = report.storage_errors.len(),
            remaining = self.len(),
            "Offline queue drain finished"
        );
        report
    }

    /// Apply `f` to a copy, persist it, then publish it.
    fn mutate(&self, f: impl FnOnce(&mut Vec<QueuedMessage>)) -> Result<()> {
        self.update(f, false)
    }

    /// Like [`mutate`](Self::mutate), but the change is published even when
    /// the write fails.
    fn apply(&self, f: impl FnOnce(&mut Vec<QueuedMessage>)) -> Result<()> {
        self.update(f, true)
    }

    fn update(&self, f: impl FnOnce(&mut Vec<QueuedMessage>), keep_on_error: bool) -> Result<()> {
        let mut guard = self
            .entries
            .lock()
            .map_err(|_| CourierError::Storage("queue lock poisoned".to_string()))?;
        let mut next = guard.clone();
        f(&mut next);
        let persisted = serde_json::to_string(&next)
            .map_err(CourierError::from)
            .and_then(|raw| self.kv.put(QUEUE_KEY, &raw));
        if persisted.is_ok() || keep_on_error {
            *guard = next;
        }
        persisted
    }
}
