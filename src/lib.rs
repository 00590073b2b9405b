//! Entry Guard
//!
//! Sensor-triggered entry access control.
//! The controller side runs the access-decision state machine:
//! - Motion sensing with cooldown
//! - Capture and face classification
//! - Lock and alarm actuation
//! - Local encrypted capture log and audit trail
//!
//! The gateway side receives framed events over TCP, keeps the most recent
//! window in a bounded store and exposes it read-only to a dashboard.

pub mod annotate;
pub mod client;
pub mod config;
pub mod controller;
pub mod dashboard;
pub mod embeddings;
pub mod error;
pub mod facade;
pub mod model;
pub mod protocol;
pub mod recorder;
pub mod server;
pub mod sim;
pub mod store;

pub use annotate::Annotator;
pub use client::TransportClient;
pub use config::{ControllerConfig, GatewayConfig};
pub use controller::{AccessController, AttemptOutcome, ControllerState};
pub use embeddings::{EmbeddingClassifier, EmbeddingDatabase};
pub use error::EntryError;
pub use model::{AccessStatus, Decision, EntryEvent, Identity, Image};
pub use protocol::{WireEvent, WireStatus};
pub use recorder::EventRecorder;
pub use server::TransportServer;
pub use store::EventStore;

/// Entry guard version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default gateway port for the event transport
pub const DEFAULT_GATEWAY_PORT: u16 = 9999;

/// Default dashboard port
pub const DEFAULT_DASHBOARD_PORT: u16 = 5000;

/// Number of events the gateway keeps
pub const DEFAULT_STORE_CAPACITY: usize = 20;

/// Result type for entry guard operations
pub type Result<T> = std::result::Result<T, EntryError>;

/// Install the tracing subscriber used by both binaries.
pub fn init_tracing() {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "entry_guard=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}
