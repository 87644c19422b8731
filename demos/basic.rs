use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use telemetry_dispatcher::{
    DispatchEngine, Event, FileBackend, Heartbeat, HeartbeatScheduler, HeartbeatSink,
    PipelineConfig, SendError, SignatureContext, Transport,
};

/// Stand-in transport that prints each batch instead of posting it.
struct StdoutTransport;

#[async_trait]
impl Transport for StdoutTransport {
    async fn send(&self, batch_json: &[u8], ctx: &SignatureContext) -> Result<(), SendError> {
        println!(
            "batch ts={} signature={:?}: {}",
            ctx.timestamp_millis,
            ctx.signature,
            String::from_utf8_lossy(batch_json)
        );
        Ok(())
    }
}

struct PrintSink;

#[async_trait]
impl HeartbeatSink for PrintSink {
    async fn emit(&self, heartbeat: Heartbeat) {
        println!(
            "heartbeat ping={} active={}s",
            heartbeat.ping_count, heartbeat.active_time_seconds
        );
    }
}

#[tokio::main]
async fn main() {
    let config = PipelineConfig::new("https://collect.example.com/batch")
        .with_secret("supersecret")
        .with_batch_size(2)
        .with_flush_interval(Duration::from_secs(5));

    let engine = DispatchEngine::start_with_backend(
        config.clone(),
        Arc::new(StdoutTransport),
        Arc::new(FileBackend::new("offline_events.json")),
    )
    .await;

    let heartbeat = HeartbeatScheduler::new(&config, Arc::new(PrintSink));
    heartbeat.start().await;

    engine
        .enqueue(
            Event::new("screen_view")
                .with_session("site_1", "sess_42")
                .with_page("https://example.com/pricing", "Pricing"),
        )
        .await;
    engine
        .enqueue(Event::new("video_play").with_video("intro", 12.0, 95.0))
        .await;

    tokio::time::sleep(Duration::from_millis(200)).await;

    heartbeat.stop().await;
    engine.shutdown().await;
}
