//! A client-embedded telemetry delivery pipeline.
//!
//! This crate provides a **bounded, durable, best-effort**
//! event-dispatch engine intended to run inside a host application.
//!
//! ## Guarantees
//! - Bounded memory and disk use
//! - At-least-once delivery for undelivered events, up to explicit
//!   retry-exhaustion and cap-eviction boundaries
//! - Authenticated batches (HMAC-SHA256 over a hashed payload plus a
//!   replay-limiting timestamp)
//! - Crash-safe persistence via atomic snapshot replacement
//! - The host never observes telemetry errors
//!
//! ## Non-Guarantees
//! - Exactly-once delivery
//! - Cross-batch ordering once retries are involved
//! - Multi-process coordination
//!
//! Event construction, identity persistence, and OS lifecycle wiring are
//! the host's responsibility; the pipeline consumes ready-made [`Event`]
//! values and an injected [`Transport`].

mod dispatcher;
mod error;
mod heartbeat;
mod signing;
mod store;
mod store_file;
mod transport;
mod types;

pub use dispatcher::{DispatchEngine, DispatchStats};
pub use error::{SendError, StoreError};
pub use heartbeat::{BackoffState, HeartbeatScheduler, HeartbeatSink, HeartbeatStats};
pub use signing::{is_timestamp_fresh, sha256_hex, verify_signature, Signer};
pub use store::{DurableStore, MemoryBackend, StoreBackend};
pub use store_file::FileBackend;
pub use transport::Transport;
pub use types::{
    Event, Heartbeat, PipelineConfig, SignatureContext, StoredEvent, UnsignedPolicy,
};

#[cfg(feature = "http")]
pub use transport::HttpTransport;
