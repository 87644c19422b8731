use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A single telemetry occurrence produced by the host application.
///
/// `Event` is a pure value object: the pipeline never mutates one after
/// `enqueue`. All context fields are optional; which of them are populated
/// is decided by the event-production layer, not by the pipeline.
///
/// Field names are the wire names. Absent fields are omitted from the
/// serialized payload entirely.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    /// Event type discriminator (e.g. `screen_view`, `video_play`, `ping`).
    pub event_type: String,

    /// Occurrence time in milliseconds since the Unix epoch.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<i64>,

    // Identifiers.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub site_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_id: Option<String>,

    // Page context.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page_title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub referrer: Option<String>,

    // Screen context (native hosts).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub screen_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub screen_class: Option<String>,

    // Engagement.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_seconds: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scroll_depth: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub active_time_seconds: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ping_count: Option<u32>,

    // Video.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub video_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub video_title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub video_position: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub video_duration: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub video_percent: Option<u32>,

    // UTM attribution.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub utm_source: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub utm_medium: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub utm_campaign: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub utm_term: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub utm_content: Option<String>,

    // Device / environment.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub os: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub browser: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub app_version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub locale: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub country: Option<String>,

    // Conversions / pushes.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conversion_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conversion_value: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub push_id: Option<String>,

    /// Free-form, pre-serialized JSON string supplied by the host.
    /// Treated as opaque; entries exceeding the configured size limit are
    /// dropped at batch time.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub custom_data: Option<String>,
}

impl Event {
    /// Create an event of the given type with all context fields unset.
    pub fn new(event_type: impl Into<String>) -> Self {
        Self {
            event_type: event_type.into(),
            timestamp: None,
            site_id: None,
            session_id: None,
            user_id: None,
            device_id: None,
            page_url: None,
            page_title: None,
            page_path: None,
            referrer: None,
            screen_name: None,
            screen_class: None,
            duration_seconds: None,
            scroll_depth: None,
            active_time_seconds: None,
            ping_count: None,
            video_id: None,
            video_title: None,
            video_position: None,
            video_duration: None,
            video_percent: None,
            utm_source: None,
            utm_medium: None,
            utm_campaign: None,
            utm_term: None,
            utm_content: None,
            device_type: None,
            os: None,
            browser: None,
            app_version: None,
            locale: None,
            country: None,
            conversion_id: None,
            conversion_value: None,
            push_id: None,
            custom_data: None,
        }
    }

    /// Set the occurrence timestamp (milliseconds since the Unix epoch).
    pub fn with_timestamp(mut self, millis: i64) -> Self {
        self.timestamp = Some(millis);
        self
    }

    /// Attach site and session identifiers.
    pub fn with_session(mut self, site_id: impl Into<String>, session_id: impl Into<String>) -> Self {
        self.site_id = Some(site_id.into());
        self.session_id = Some(session_id.into());
        self
    }

    /// Attach a user identifier.
    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    /// Attach page context.
    pub fn with_page(mut self, url: impl Into<String>, title: impl Into<String>) -> Self {
        self.page_url = Some(url.into());
        self.page_title = Some(title.into());
        self
    }

    /// Attach screen context.
    pub fn with_screen(mut self, name: impl Into<String>, class: impl Into<String>) -> Self {
        self.screen_name = Some(name.into());
        self.screen_class = Some(class.into());
        self
    }

    /// Attach video engagement metrics.
    pub fn with_video(mut self, id: impl Into<String>, position: f64, duration: f64) -> Self {
        self.video_id = Some(id.into());
        self.video_position = Some(position);
        self.video_duration = Some(duration);
        if duration > 0.0 {
            self.video_percent = Some(((position / duration) * 100.0).round() as u32);
        }
        self
    }

    /// Attach a pre-serialized custom payload.
    pub fn with_custom_data(mut self, json: impl Into<String>) -> Self {
        self.custom_data = Some(json.into());
        self
    }
}

/// An undelivered event held in the durable store.
///
/// Created when an `Event` fails transmission; removed after a successful
/// retry, retry exhaustion, cap eviction, or retention expiry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredEvent {
    /// Globally unique for the lifetime of the store.
    pub id: String,
    pub event: Event,
    pub created_at: DateTime<Utc>,
    pub retry_count: u32,
}

impl StoredEvent {
    pub fn new(event: Event) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            event,
            created_at: Utc::now(),
            retry_count: 0,
        }
    }
}

/// Authentication material for one batch transmission.
///
/// Derived per batch and never persisted independently of the payload it
/// authenticates. `signature` is `None` when the signer holds no secret.
#[derive(Debug, Clone)]
pub struct SignatureContext {
    /// Signing time in milliseconds since the Unix epoch.
    pub timestamp_millis: i64,
    /// Lower-hex SHA-256 of the batch payload.
    pub payload_hash: String,
    /// Lower-hex HMAC-SHA256, absent when unsigned.
    pub signature: Option<String>,
}

/// Liveness sample emitted by the heartbeat scheduler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Heartbeat {
    /// Accumulated foreground time for the current logical session.
    pub active_time_seconds: u64,
    /// Ticks emitted since the session started.
    pub ping_count: u32,
}

/// Policy for batches produced while the signer holds no secret.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnsignedPolicy {
    /// Keep events in the durable store until a secret is available.
    /// Nothing unauthenticated ever leaves the process.
    Block,
    /// Transmit without a signature and let the server decide.
    SendUnsigned,
}

/// Configuration consumed by the pipeline core.
///
/// A pure configuration object with no internal state; cloned freely into
/// the background tasks that need it.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Collection endpoint URL.
    pub endpoint: String,

    /// Events per batch; reaching this count triggers an immediate flush.
    pub batch_size: usize,

    /// Interval of the periodic flush, bounding worst-case delivery latency.
    pub flush_interval: Duration,

    /// Durable store cap; oldest entries are evicted first.
    pub max_events: usize,

    /// Stored entries older than this are purged by the retention sweep.
    pub retention_days: i64,

    /// Per-event retry bound; exceeding it drops the event permanently.
    pub max_retries: u32,

    /// Heartbeat interval while the user is active.
    pub heartbeat_base_interval: Duration,

    /// Upper bound for the backed-off heartbeat interval.
    pub heartbeat_max_interval: Duration,

    /// Idle time after which heartbeat backoff engages.
    pub inactivity_threshold: Duration,

    /// Shared secret for batch signing. `None` leaves the signer
    /// uninitialized and defers to `unsigned_policy`.
    pub secret_key: Option<String>,

    /// What to do with batches when no secret is configured.
    pub unsigned_policy: UnsignedPolicy,

    /// Maximum accepted length of `custom_data`, in bytes.
    pub max_custom_data_bytes: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            endpoint: String::new(),
            batch_size: 20,
            flush_interval: Duration::from_secs(30),
            max_events: 500,
            retention_days: 7,
            max_retries: 5,
            heartbeat_base_interval: Duration::from_secs(30),
            heartbeat_max_interval: Duration::from_secs(120),
            inactivity_threshold: Duration::from_secs(30),
            secret_key: None,
            unsigned_policy: UnsignedPolicy::Block,
            max_custom_data_bytes: 16 * 1024,
        }
    }
}

impl PipelineConfig {
    /// Create a configuration targeting the given collection endpoint.
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            ..Default::default()
        }
    }

    /// Set the signing secret.
    pub fn with_secret(mut self, secret: impl Into<String>) -> Self {
        self.secret_key = Some(secret.into());
        self
    }

    /// Set the batch size trigger.
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// Set the periodic flush interval.
    pub fn with_flush_interval(mut self, interval: Duration) -> Self {
        self.flush_interval = interval;
        self
    }

    /// Set durable-store bounds.
    pub fn with_store_limits(mut self, max_events: usize, retention_days: i64, max_retries: u32) -> Self {
        self.max_events = max_events;
        self.retention_days = retention_days;
        self.max_retries = max_retries;
        self
    }

    /// Set heartbeat timing parameters.
    pub fn with_heartbeat_intervals(
        mut self,
        base: Duration,
        max: Duration,
        inactivity_threshold: Duration,
    ) -> Self {
        self.heartbeat_base_interval = base;
        self.heartbeat_max_interval = max;
        self.inactivity_threshold = inactivity_threshold;
        self
    }

    /// Choose the unsigned-batch policy.
    pub fn with_unsigned_policy(mut self, policy: UnsignedPolicy) -> Self {
        self.unsigned_policy = policy;
        self
    }
}
