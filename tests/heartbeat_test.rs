use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use telemetry_dispatcher::{BackoffState, Heartbeat, HeartbeatScheduler, HeartbeatSink};
use tokio::time::Instant;

/// Sink double recording each tick with its (paused-clock) arrival time.
#[derive(Default)]
struct RecordingSink {
    ticks: Mutex<Vec<(Instant, Heartbeat)>>,
}

impl RecordingSink {
    fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn ticks(&self) -> Vec<(Instant, Heartbeat)> {
        self.ticks.lock().expect("lock").clone()
    }
}

#[async_trait]
impl HeartbeatSink for RecordingSink {
    async fn emit(&self, heartbeat: Heartbeat) {
        self.ticks
            .lock()
            .expect("lock")
            .push((Instant::now(), heartbeat));
    }
}

fn scheduler(sink: Arc<RecordingSink>) -> HeartbeatScheduler {
    HeartbeatScheduler::with_intervals(
        Duration::from_secs(30),
        Duration::from_secs(120),
        Duration::from_secs(30),
        sink,
    )
}

#[test]
fn test_backoff_arithmetic() {
    let mut backoff = BackoffState::new(
        Duration::from_secs(30),
        Duration::from_secs(120),
        Duration::from_secs(30),
    );

    let idle = Duration::from_secs(60);
    assert_eq!(backoff.advance(idle), Duration::from_secs(45));
    assert_eq!(backoff.advance(idle), Duration::from_millis(67_500));
    assert_eq!(backoff.advance(idle), Duration::from_millis(101_250));
    assert_eq!(backoff.advance(idle), Duration::from_secs(120));
    assert_eq!(backoff.advance(idle), Duration::from_secs(120));

    // Any recent-activity tick snaps back to base.
    assert_eq!(backoff.advance(Duration::from_secs(5)), Duration::from_secs(30));
}

#[tokio::test(start_paused = true)]
async fn test_idle_intervals_follow_backoff_ladder() {
    let sink = RecordingSink::new();
    let hb = scheduler(sink.clone());

    let t0 = Instant::now();
    hb.start().await;

    // Long enough for seven ticks with no interaction at all.
    tokio::time::sleep(Duration::from_secs(520)).await;

    let ticks = sink.ticks();
    assert_eq!(ticks.len(), 7);

    let offsets_ms: Vec<u128> = ticks
        .iter()
        .map(|(at, _)| at.duration_since(t0).as_millis())
        .collect();
    // 30, then backoff 45, 67.5, 101.25, capped 120, 120 between ticks.
    assert_eq!(
        offsets_ms,
        vec![30_000, 60_000, 105_000, 172_500, 273_750, 393_750, 513_750]
    );

    for (n, (_, heartbeat)) in ticks.iter().enumerate() {
        assert_eq!(heartbeat.ping_count, n as u32 + 1);
    }
    // Never paused, so active time equals elapsed time at each tick.
    assert_eq!(ticks[2].1.active_time_seconds, 105);
    assert_eq!(ticks[6].1.active_time_seconds, 513);

    hb.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_interaction_resets_interval_and_rearms_immediately() {
    let sink = RecordingSink::new();
    let hb = scheduler(sink.clone());

    let t0 = Instant::now();
    hb.start().await;

    // Ticks at 30, 60, 105; interval is now 67.5s, next tick armed at 172.5.
    tokio::time::sleep(Duration::from_secs(106)).await;
    assert_eq!(sink.ticks().len(), 3);

    // User re-engages at t=106: the pending tick must move to 106 + 30,
    // not stay at the backed-off 172.5.
    hb.record_interaction().await;
    let stats = hb.snapshot().await.expect("snapshot");
    assert_eq!(stats.current_interval, Duration::from_secs(30));

    tokio::time::sleep(Duration::from_secs(34)).await;

    let ticks = sink.ticks();
    assert_eq!(ticks.len(), 4);
    assert_eq!(ticks[3].0.duration_since(t0), Duration::from_secs(136));

    hb.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_pause_cancels_tick_and_freezes_active_time() {
    let sink = RecordingSink::new();
    let hb = scheduler(sink.clone());

    hb.start().await;
    tokio::time::sleep(Duration::from_secs(10)).await;
    hb.pause().await;

    // Background time: no ticks, no accumulation.
    tokio::time::sleep(Duration::from_secs(200)).await;
    let stats = hb.snapshot().await.expect("snapshot");
    assert_eq!(stats.ping_count, 0);
    assert_eq!(stats.active_time, Duration::from_secs(10));

    // Resuming re-arms and keeps counting from where it left off.
    hb.resume().await;
    tokio::time::sleep(Duration::from_secs(31)).await;
    let ticks = sink.ticks();
    assert_eq!(ticks.len(), 1);
    assert_eq!(ticks[0].1.ping_count, 1);
    assert_eq!(ticks[0].1.active_time_seconds, 40);

    hb.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_pause_resume_back_to_back_changes_nothing() {
    let sink = RecordingSink::new();
    let hb = scheduler(sink.clone());

    hb.start().await;
    tokio::time::sleep(Duration::from_secs(10)).await;

    let before = hb.snapshot().await.expect("snapshot");
    hb.pause().await;
    hb.resume().await;
    let after = hb.snapshot().await.expect("snapshot");

    assert_eq!(before.active_time, after.active_time);
    assert_eq!(before.ping_count, after.ping_count);

    hb.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_reset_session_zeroes_counters_and_interval() {
    let sink = RecordingSink::new();
    let hb = scheduler(sink.clone());

    hb.start().await;
    // Ticks at 30 and 60; interval has backed off to 45.
    tokio::time::sleep(Duration::from_secs(65)).await;
    assert_eq!(sink.ticks().len(), 2);

    hb.reset_session().await;
    let stats = hb.snapshot().await.expect("snapshot");
    assert_eq!(stats.ping_count, 0);
    assert_eq!(stats.active_time, Duration::ZERO);
    assert_eq!(stats.current_interval, Duration::from_secs(30));

    // The armed tick moved to reset-time + base interval.
    tokio::time::sleep(Duration::from_secs(31)).await;
    let ticks = sink.ticks();
    assert_eq!(ticks.len(), 3);
    assert_eq!(ticks[2].1.ping_count, 1);

    hb.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_stop_cancels_pending_tick() {
    let sink = RecordingSink::new();
    let hb = scheduler(sink.clone());

    hb.start().await;
    tokio::time::sleep(Duration::from_secs(10)).await;
    hb.stop().await;

    tokio::time::sleep(Duration::from_secs(300)).await;
    assert!(sink.ticks().is_empty());

    let stats = hb.snapshot().await.expect("snapshot");
    assert_eq!(stats.ping_count, 0);
    assert_eq!(stats.active_time, Duration::from_secs(10));
}
