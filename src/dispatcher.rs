use std::sync::{
    atomic::{AtomicBool, AtomicU64, Ordering},
    Arc,
};

use chrono::Utc;
use tokio::sync::{Mutex, Notify};
use tokio::task::JoinHandle;

use crate::signing::Signer;
use crate::store::{DurableStore, MemoryBackend, StoreBackend};
use crate::transport::Transport;
use crate::types::{Event, PipelineConfig, UnsignedPolicy};

#[cfg(feature = "metrics")]
fn metric_inc(name: &'static str) {
    metrics::counter!(name).increment(1);
}

#[cfg(not(feature = "metrics"))]
fn metric_inc(_name: &'static str) {}

#[cfg(feature = "tracing")]
fn trace_event(message: &'static str) {
    tracing::debug!(message);
}

#[cfg(not(feature = "tracing"))]
fn trace_event(_message: &'static str) {}

/// Counters describing pipeline activity since construction.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchStats {
    pub enqueued: u64,
    pub dropped_invalid: u64,
    pub batches_delivered: u64,
    pub batches_failed: u64,
    pub events_persisted: u64,
    pub retried_delivered: u64,
    pub blocked_unsigned: u64,
}

#[derive(Default)]
struct StatsInner {
    enqueued: AtomicU64,
    dropped_invalid: AtomicU64,
    batches_delivered: AtomicU64,
    batches_failed: AtomicU64,
    events_persisted: AtomicU64,
    retried_delivered: AtomicU64,
    blocked_unsigned: AtomicU64,
}

impl StatsInner {
    fn snapshot(&self) -> DispatchStats {
        DispatchStats {
            enqueued: self.enqueued.load(Ordering::Relaxed),
            dropped_invalid: self.dropped_invalid.load(Ordering::Relaxed),
            batches_delivered: self.batches_delivered.load(Ordering::Relaxed),
            batches_failed: self.batches_failed.load(Ordering::Relaxed),
            events_persisted: self.events_persisted.load(Ordering::Relaxed),
            retried_delivered: self.retried_delivered.load(Ordering::Relaxed),
            blocked_unsigned: self.blocked_unsigned.load(Ordering::Relaxed),
        }
    }
}

/// Shared internals handed to the background flusher.
struct EngineShared {
    pending: Mutex<Vec<Event>>,
    store: DurableStore,
    signer: Signer,
    transport: Arc<dyn Transport>,
    config: PipelineConfig,
    stats: StatsInner,
}

/// Authenticated, durable, retrying event-dispatch engine.
///
/// Live events accumulate in a pending buffer and are flushed into a
/// signed batch when the buffer reaches `batch_size` or the periodic
/// flush fires, whichever comes first. A failed transmission persists
/// every event of the batch into the durable store, where explicit retry
/// triggers pick them up later.
///
/// None of the public operations return errors to the host: transport and
/// persistence failures degrade internally and silently.
pub struct DispatchEngine {
    shared: Arc<EngineShared>,
    is_running: Arc<AtomicBool>,
    flush_wakeup: Arc<Notify>,
    flusher_handle: Mutex<Option<JoinHandle<()>>>,
}

impl DispatchEngine {
    /// Start an engine with an in-memory store backend.
    pub async fn start(config: PipelineConfig, transport: Arc<dyn Transport>) -> Self {
        Self::start_with_backend(config, transport, Arc::new(MemoryBackend::new())).await
    }

    /// Start an engine persisting undelivered events through `backend`.
    pub async fn start_with_backend(
        config: PipelineConfig,
        transport: Arc<dyn Transport>,
        backend: Arc<dyn StoreBackend>,
    ) -> Self {
        let store = DurableStore::open(backend, config.max_events, config.retention_days).await;
        let signer = Signer::new(config.secret_key.as_ref().map(|s| s.as_bytes().to_vec()));

        let shared = Arc::new(EngineShared {
            pending: Mutex::new(Vec::new()),
            store,
            signer,
            transport,
            config,
            stats: StatsInner::default(),
        });

        let is_running = Arc::new(AtomicBool::new(true));
        let flush_wakeup = Arc::new(Notify::new());

        let flusher_shared = shared.clone();
        let flusher_running = is_running.clone();
        let flusher_wakeup = flush_wakeup.clone();
        let flusher_handle = tokio::spawn(async move {
            let interval = flusher_shared.config.flush_interval;
            loop {
                if !flusher_running.load(Ordering::SeqCst) {
                    return;
                }
                tokio::select! {
                    _ = tokio::time::sleep(interval) => {
                        // Periodic trigger: bound worst-case latency and
                        // sweep the offline backlog.
                        flush_pending(&flusher_shared).await;
                        retry_offline(&flusher_shared).await;
                    }
                    _ = flusher_wakeup.notified() => {
                        if !flusher_running.load(Ordering::SeqCst) {
                            return;
                        }
                        flush_pending(&flusher_shared).await;
                    }
                }
            }
        });

        Self {
            shared,
            is_running,
            flush_wakeup,
            flusher_handle: Mutex::new(Some(flusher_handle)),
        }
    }

    /// Append an event to the pending buffer.
    ///
    /// Returns once the event is buffered. Reaching `batch_size` wakes the
    /// background flusher; transmission never happens on the caller's
    /// control flow. Events enqueued after shutdown are dropped.
    pub async fn enqueue(&self, event: Event) {
        if !self.is_running.load(Ordering::SeqCst) {
            return;
        }

        let should_flush = {
            let mut pending = self.shared.pending.lock().await;
            pending.push(event);
            pending.len() >= self.shared.config.batch_size
        };
        self.shared.stats.enqueued.fetch_add(1, Ordering::Relaxed);
        metric_inc("telemetry.dispatch.enqueued");

        if should_flush {
            self.flush_wakeup.notify_one();
        }
    }

    /// Flush the pending buffer now, even below `batch_size`.
    ///
    /// Intended for explicit host triggers (app backgrounding, manual
    /// flush). Completes when the transmission attempt has resolved.
    pub async fn flush(&self) {
        flush_pending(&self.shared).await;
    }

    /// Re-send persisted events from the durable store.
    ///
    /// Intended for explicit host triggers: connectivity regained, app
    /// foregrounded. Successfully delivered entries are deleted; failed
    /// ones get their retry count incremented (and are evicted past
    /// `max_retries`).
    pub async fn retry_offline_events(&self) {
        retry_offline(&self.shared).await;
    }

    /// Counters snapshot for diagnostics and tests.
    pub fn stats(&self) -> DispatchStats {
        self.shared.stats.snapshot()
    }

    pub fn is_running(&self) -> bool {
        self.is_running.load(Ordering::SeqCst)
    }

    /// Stop the background flusher, perform a final flush, and drain the
    /// durable store's command queue.
    pub async fn shutdown(&self) {
        self.is_running.store(false, Ordering::SeqCst);
        // notify_one stores a permit, so the flusher wakes even if it is
        // mid-flush rather than parked on notified().
        self.flush_wakeup.notify_one();

        if let Some(handle) = self.flusher_handle.lock().await.take() {
            let _ = handle.await;
        }

        flush_pending(&self.shared).await;
        self.shared.store.shutdown().await;
        trace_event("telemetry.dispatch.shutdown");
    }
}

/// Form a batch from the pending buffer, sign it, and attempt transmission.
async fn flush_pending(shared: &EngineShared) {
    let batch: Vec<Event> = {
        let mut pending = shared.pending.lock().await;
        if pending.is_empty() {
            return;
        }
        std::mem::take(&mut *pending)
    };

    let batch: Vec<Event> = batch
        .into_iter()
        .filter(|event| {
            if custom_data_acceptable(event, shared.config.max_custom_data_bytes) {
                true
            } else {
                // A malformed payload drops the offending event only,
                // never the rest of the batch.
                shared.stats.dropped_invalid.fetch_add(1, Ordering::Relaxed);
                metric_inc("telemetry.dispatch.dropped_invalid");
                false
            }
        })
        .collect();

    if batch.is_empty() {
        return;
    }

    let Ok(payload) = serde_json::to_vec(&batch) else {
        // Event fields are plain values; encoding cannot realistically
        // fail, but telemetry must not panic either way.
        return;
    };

    let timestamp_millis = Utc::now().timestamp_millis();
    let ctx = shared.signer.signature_context(timestamp_millis, &payload);

    if ctx.signature.is_none()
        && shared.config.unsigned_policy == UnsignedPolicy::Block
    {
        shared
            .stats
            .blocked_unsigned
            .fetch_add(1, Ordering::Relaxed);
        metric_inc("telemetry.dispatch.blocked_unsigned");
        persist_batch(shared, batch);
        return;
    }

    match shared.transport.send(&payload, &ctx).await {
        Ok(()) => {
            shared
                .stats
                .batches_delivered
                .fetch_add(1, Ordering::Relaxed);
            metric_inc("telemetry.dispatch.batch_delivered");
        }
        Err(_) => {
            shared.stats.batches_failed.fetch_add(1, Ordering::Relaxed);
            metric_inc("telemetry.dispatch.batch_failed");
            persist_batch(shared, batch);
        }
    }
}

fn persist_batch(shared: &EngineShared, batch: Vec<Event>) {
    for event in batch {
        shared.store.store(event);
        shared
            .stats
            .events_persisted
            .fetch_add(1, Ordering::Relaxed);
    }
}

/// Re-batch and re-send the durable store's pending entries.
async fn retry_offline(shared: &EngineShared) {
    let pending = shared.store.fetch_pending().await;
    if pending.is_empty() {
        return;
    }

    if !shared.signer.is_initialized()
        && shared.config.unsigned_policy == UnsignedPolicy::Block
    {
        // Entries stay put until a secret is available.
        return;
    }

    for chunk in pending.chunks(shared.config.batch_size.max(1)) {
        let events: Vec<Event> = chunk.iter().map(|entry| entry.event.clone()).collect();
        let Ok(payload) = serde_json::to_vec(&events) else {
            continue;
        };

        let timestamp_millis = Utc::now().timestamp_millis();
        let ctx = shared.signer.signature_context(timestamp_millis, &payload);

        match shared.transport.send(&payload, &ctx).await {
            Ok(()) => {
                shared
                    .store
                    .delete(chunk.iter().map(|entry| entry.id.clone()));
                shared
                    .stats
                    .retried_delivered
                    .fetch_add(chunk.len() as u64, Ordering::Relaxed);
                metric_inc("telemetry.dispatch.retry_delivered");
            }
            Err(_) => {
                for entry in chunk {
                    shared
                        .store
                        .increment_retry(entry.id.clone(), shared.config.max_retries);
                }
                metric_inc("telemetry.dispatch.retry_failed");
            }
        }
    }
}

fn custom_data_acceptable(event: &Event, max_bytes: usize) -> bool {
    match event.custom_data {
        None => true,
        Some(ref data) => {
            data.len() <= max_bytes
                && serde_json::from_str::<serde_json::Value>(data).is_ok()
        }
    }
}
