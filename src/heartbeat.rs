use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{sleep_until, Instant};

use crate::types::{Heartbeat, PipelineConfig};

/// Receiver of heartbeat samples.
///
/// The scheduler holds a handle to this seam instead of a back-reference
/// into the event-production layer; the host maps each sample into an
/// `Event` and enqueues it.
#[async_trait]
pub trait HeartbeatSink: Send + Sync {
    async fn emit(&self, heartbeat: Heartbeat);
}

/// Adaptive interval arithmetic, separated from the timer so it can be
/// exercised without a runtime.
///
/// While the user is idle past the threshold each tick lengthens the
/// interval by ×1.5 up to `max`; any tick with recent activity snaps it
/// back to `base`.
#[derive(Debug, Clone)]
pub struct BackoffState {
    base: Duration,
    max: Duration,
    inactivity_threshold: Duration,
    current: Duration,
}

impl BackoffState {
    pub fn new(base: Duration, max: Duration, inactivity_threshold: Duration) -> Self {
        Self {
            base,
            max: max.max(base),
            inactivity_threshold,
            current: base,
        }
    }

    pub fn current(&self) -> Duration {
        self.current
    }

    /// Advance to the interval for the next tick given the idle time
    /// observed at this tick.
    pub fn advance(&mut self, idle: Duration) -> Duration {
        if idle > self.inactivity_threshold {
            self.current = self.current.mul_f64(1.5).min(self.max);
        } else {
            self.current = self.base;
        }
        self.current
    }

    /// Snap back to the base interval. Returns whether anything changed.
    pub fn reset_to_base(&mut self) -> bool {
        if self.current != self.base {
            self.current = self.base;
            true
        } else {
            false
        }
    }
}

/// Point-in-time scheduler state for diagnostics and tests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeartbeatStats {
    pub ping_count: u32,
    pub current_interval: Duration,
    pub active_time: Duration,
}

enum HeartbeatCommand {
    Start,
    Interaction,
    Pause,
    Resume,
    ResetSession,
    Stop,
    Snapshot(oneshot::Sender<HeartbeatStats>),
}

/// Self-rescheduling liveness timer.
///
/// A single task holds one armed single-shot deadline at a time and
/// re-arms it after every tick at the (possibly backed-off) interval, so a
/// changed interval takes effect on the very next tick rather than one
/// cycle later. `pause`/`stop` cancel the armed deadline; no tick fires
/// after cancellation.
///
/// Foreground time accounting: elapsed time only accumulates while the
/// scheduler is running and not paused. Background time is never counted.
pub struct HeartbeatScheduler {
    tx: mpsc::Sender<HeartbeatCommand>,
}

impl HeartbeatScheduler {
    pub fn new(config: &PipelineConfig, sink: Arc<dyn HeartbeatSink>) -> Self {
        Self::with_intervals(
            config.heartbeat_base_interval,
            config.heartbeat_max_interval,
            config.inactivity_threshold,
            sink,
        )
    }

    pub fn with_intervals(
        base: Duration,
        max: Duration,
        inactivity_threshold: Duration,
        sink: Arc<dyn HeartbeatSink>,
    ) -> Self {
        let (tx, rx) = mpsc::channel(64);
        tokio::spawn(heartbeat_loop(
            rx,
            BackoffState::new(base, max, inactivity_threshold),
            sink,
        ));
        Self { tx }
    }

    /// Begin a session: zero counters, arm the first tick at the base
    /// interval.
    pub async fn start(&self) {
        let _ = self.tx.send(HeartbeatCommand::Start).await;
    }

    /// Note user activity. Resets a backed-off interval to base and, if a
    /// tick is armed, re-arms it at the shorter interval immediately.
    pub async fn record_interaction(&self) {
        let _ = self.tx.send(HeartbeatCommand::Interaction).await;
    }

    /// Freeze active-time accumulation and cancel the armed tick.
    pub async fn pause(&self) {
        let _ = self.tx.send(HeartbeatCommand::Pause).await;
    }

    /// Restart the foreground baseline and re-arm, keeping the ping
    /// counter and accumulated active time.
    pub async fn resume(&self) {
        let _ = self.tx.send(HeartbeatCommand::Resume).await;
    }

    /// Zero all counters and return to the base interval.
    pub async fn reset_session(&self) {
        let _ = self.tx.send(HeartbeatCommand::ResetSession).await;
    }

    /// Cancel the armed tick and leave the running state.
    pub async fn stop(&self) {
        let _ = self.tx.send(HeartbeatCommand::Stop).await;
    }

    pub async fn snapshot(&self) -> Option<HeartbeatStats> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(HeartbeatCommand::Snapshot(reply_tx))
            .await
            .ok()?;
        reply_rx.await.ok()
    }
}

struct TimerState {
    backoff: BackoffState,
    deadline: Option<Instant>,
    ping_counter: u32,
    total_active: Duration,
    segment_start: Option<Instant>,
    last_interaction: Instant,
}

impl TimerState {
    fn active_time(&self, now: Instant) -> Duration {
        match self.segment_start {
            Some(start) => self.total_active + now.duration_since(start),
            None => self.total_active,
        }
    }
}

async fn heartbeat_loop(
    mut rx: mpsc::Receiver<HeartbeatCommand>,
    backoff: BackoffState,
    sink: Arc<dyn HeartbeatSink>,
) {
    let mut state = TimerState {
        backoff,
        deadline: None,
        ping_counter: 0,
        total_active: Duration::ZERO,
        segment_start: None,
        last_interaction: Instant::now(),
    };

    loop {
        let deadline = state.deadline;
        let tick = async move {
            match deadline {
                Some(deadline) => sleep_until(deadline).await,
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            command = rx.recv() => {
                let Some(command) = command else { break };
                let now = Instant::now();
                match command {
                    HeartbeatCommand::Start => {
                        state.ping_counter = 0;
                        state.total_active = Duration::ZERO;
                        state.backoff.reset_to_base();
                        state.last_interaction = now;
                        state.segment_start = Some(now);
                        state.deadline = Some(now + state.backoff.current());
                    }
                    HeartbeatCommand::Interaction => {
                        state.last_interaction = now;
                        if state.backoff.reset_to_base() && state.deadline.is_some() {
                            // Don't make a re-engaged user wait out a long
                            // backoff interval.
                            state.deadline = Some(now + state.backoff.current());
                        }
                    }
                    HeartbeatCommand::Pause => {
                        if let Some(start) = state.segment_start.take() {
                            state.total_active += now.duration_since(start);
                        }
                        state.deadline = None;
                    }
                    HeartbeatCommand::Resume => {
                        if state.segment_start.is_none() {
                            state.segment_start = Some(now);
                            state.deadline = Some(now + state.backoff.current());
                        }
                    }
                    HeartbeatCommand::ResetSession => {
                        state.ping_counter = 0;
                        state.total_active = Duration::ZERO;
                        state.backoff.reset_to_base();
                        state.last_interaction = now;
                        if state.segment_start.is_some() {
                            state.segment_start = Some(now);
                        }
                        if state.deadline.is_some() {
                            state.deadline = Some(now + state.backoff.current());
                        }
                    }
                    HeartbeatCommand::Stop => {
                        if let Some(start) = state.segment_start.take() {
                            state.total_active += now.duration_since(start);
                        }
                        state.deadline = None;
                    }
                    HeartbeatCommand::Snapshot(reply) => {
                        let _ = reply.send(HeartbeatStats {
                            ping_count: state.ping_counter,
                            current_interval: state.backoff.current(),
                            active_time: state.active_time(now),
                        });
                    }
                }
            }
            _ = tick => {
                let now = Instant::now();
                let idle = now.duration_since(state.last_interaction);
                let interval = state.backoff.advance(idle);

                state.ping_counter += 1;
                sink.emit(Heartbeat {
                    active_time_seconds: state.active_time(now).as_secs(),
                    ping_count: state.ping_counter,
                })
                .await;

                state.deadline = Some(now + interval);
            }
        }
    }
}
