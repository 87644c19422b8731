use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use tokio::sync::{mpsc, oneshot, Mutex};

use crate::error::StoreError;
use crate::types::{Event, StoredEvent};

#[cfg(feature = "tracing")]
fn trace_event(message: &'static str) {
    tracing::debug!(message);
}

#[cfg(not(feature = "tracing"))]
fn trace_event(_message: &'static str) {}

/// Pluggable snapshot persistence for the durable store.
///
/// Implementations must make `save_atomic` all-or-nothing: a crash during
/// the call leaves either the previous snapshot or the new one on disk,
/// never a torn file.
#[async_trait]
pub trait StoreBackend: Send + Sync {
    async fn load(&self) -> Result<Vec<StoredEvent>, StoreError>;
    async fn save_atomic(&self, events: &[StoredEvent]) -> Result<(), StoreError>;
}

/// In-memory backend for tests and ephemeral deployments.
#[derive(Default)]
pub struct MemoryBackend {
    snapshot: Mutex<Vec<StoredEvent>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StoreBackend for MemoryBackend {
    async fn load(&self) -> Result<Vec<StoredEvent>, StoreError> {
        Ok(self.snapshot.lock().await.clone())
    }

    async fn save_atomic(&self, events: &[StoredEvent]) -> Result<(), StoreError> {
        *self.snapshot.lock().await = events.to_vec();
        Ok(())
    }
}

/// Interval between unsolicited retention sweeps inside the store task.
const SWEEP_PERIOD_SECS: u64 = 3_600;

enum StoreCommand {
    Store(Event),
    Delete(HashSet<String>),
    IncrementRetry { id: String, max_retries: u32 },
    FetchPending(oneshot::Sender<Vec<StoredEvent>>),
    Sweep,
    Shutdown(oneshot::Sender<()>),
}

/// Capped, retention-bounded, crash-safe queue of undelivered events.
///
/// All reads and writes funnel through one sequential task that exclusively
/// owns the in-memory list and the backing snapshot, so concurrent callers
/// never race on either. Every mutation is followed by a full-snapshot
/// write through the backend; persistence failures are swallowed because
/// losing unsent telemetry is preferable to disturbing the host.
///
/// `shutdown` drains: commands already queued are processed to completion
/// before the task exits.
pub struct DurableStore {
    tx: mpsc::Sender<StoreCommand>,
}

impl DurableStore {
    /// Spawn the store task.
    ///
    /// Loads the persisted snapshot first; an unreadable snapshot resets to
    /// an empty store rather than failing startup. A retention sweep runs
    /// at startup and then periodically.
    pub async fn open(
        backend: Arc<dyn StoreBackend>,
        max_events: usize,
        retention_days: i64,
    ) -> Self {
        let (tx, rx) = mpsc::channel(1_024);

        let events = match backend.load().await {
            Ok(events) => events,
            Err(_) => {
                trace_event("telemetry.store.snapshot_reset");
                Vec::new()
            }
        };

        let mut state = StoreState {
            events,
            backend,
            max_events: max_events.max(1),
            retention_days,
        };
        state.sweep().await;

        tokio::spawn(store_loop(rx, state));

        Self { tx }
    }

    /// Persist a failed event for later retry.
    ///
    /// Returns as soon as the command is submitted; the append, trim, and
    /// snapshot write happen on the store task. If the command queue is
    /// full the event is dropped (bounded resource use over completeness).
    pub fn store(&self, event: Event) {
        let _ = self.tx.try_send(StoreCommand::Store(event));
    }

    /// Point-in-time snapshot of pending entries, oldest first.
    ///
    /// Consistent (never torn) because it is served by the same sequential
    /// task that applies mutations, but it may be stale by the time a
    /// retry acts on it.
    pub async fn fetch_pending(&self) -> Vec<StoredEvent> {
        let (reply_tx, reply_rx) = oneshot::channel();
        if self
            .tx
            .send(StoreCommand::FetchPending(reply_tx))
            .await
            .is_err()
        {
            return Vec::new();
        }
        reply_rx.await.unwrap_or_default()
    }

    /// Remove entries by ID after successful transmission.
    pub fn delete(&self, ids: impl IntoIterator<Item = String>) {
        let ids: HashSet<String> = ids.into_iter().collect();
        if !ids.is_empty() {
            let _ = self.tx.try_send(StoreCommand::Delete(ids));
        }
    }

    /// Increment an entry's retry count, evicting it once the count
    /// exceeds `max_retries`.
    pub fn increment_retry(&self, id: impl Into<String>, max_retries: u32) {
        let _ = self.tx.try_send(StoreCommand::IncrementRetry {
            id: id.into(),
            max_retries,
        });
    }

    /// Trigger a retention sweep now.
    pub fn sweep(&self) {
        let _ = self.tx.try_send(StoreCommand::Sweep);
    }

    /// Drain queued commands and stop the store task.
    pub async fn shutdown(&self) {
        let (ack_tx, ack_rx) = oneshot::channel();
        if self.tx.send(StoreCommand::Shutdown(ack_tx)).await.is_ok() {
            let _ = ack_rx.await;
        }
    }
}

struct StoreState {
    events: Vec<StoredEvent>,
    backend: Arc<dyn StoreBackend>,
    max_events: usize,
    retention_days: i64,
}

impl StoreState {
    async fn persist(&self) {
        if self.backend.save_atomic(&self.events).await.is_err() {
            trace_event("telemetry.store.persist_failed");
        }
    }

    async fn store(&mut self, event: Event) {
        self.events.push(StoredEvent::new(event));
        if self.events.len() > self.max_events {
            // Entries are appended in creation order, so the front is oldest.
            let excess = self.events.len() - self.max_events;
            self.events.drain(..excess);
        }
        self.persist().await;
    }

    async fn delete(&mut self, ids: HashSet<String>) {
        let before = self.events.len();
        self.events.retain(|entry| !ids.contains(&entry.id));
        if self.events.len() != before {
            self.persist().await;
        }
    }

    async fn increment_retry(&mut self, id: &str, max_retries: u32) {
        let Some(index) = self.events.iter().position(|entry| entry.id == id) else {
            return;
        };

        self.events[index].retry_count += 1;
        if self.events[index].retry_count > max_retries {
            // Explicit data-loss boundary: retry exhaustion drops the entry.
            self.events.remove(index);
            trace_event("telemetry.store.retry_exhausted");
        }
        self.persist().await;
    }

    async fn sweep(&mut self) {
        let cutoff = Utc::now() - ChronoDuration::days(self.retention_days);
        let before = self.events.len();
        self.events.retain(|entry| entry.created_at >= cutoff);
        if self.events.len() != before {
            trace_event("telemetry.store.retention_purge");
            self.persist().await;
        }
    }
}

async fn store_loop(mut rx: mpsc::Receiver<StoreCommand>, mut state: StoreState) {
    let mut sweep_timer =
        tokio::time::interval(std::time::Duration::from_secs(SWEEP_PERIOD_SECS));
    sweep_timer.tick().await; // immediate first tick; startup sweep already ran

    loop {
        tokio::select! {
            command = rx.recv() => {
                let Some(command) = command else { break };
                match command {
                    StoreCommand::Store(event) => state.store(event).await,
                    StoreCommand::Delete(ids) => state.delete(ids).await,
                    StoreCommand::IncrementRetry { id, max_retries } => {
                        state.increment_retry(&id, max_retries).await
                    }
                    StoreCommand::FetchPending(reply) => {
                        let _ = reply.send(state.events.clone());
                    }
                    StoreCommand::Sweep => state.sweep().await,
                    StoreCommand::Shutdown(ack) => {
                        // Commands queued behind this one were submitted after
                        // shutdown began; the channel is FIFO so everything
                        // earlier has already been applied.
                        let _ = ack.send(());
                        break;
                    }
                }
            }
            _ = sweep_timer.tick() => {
                state.sweep().await;
            }
        }
    }
}
