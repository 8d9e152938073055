//! Home Assistant discovery bridge for mbmd telemetry.
//!
//! Watches the topics mbmd publishes readings on (`mbmd/<device>/<kind>/<phase>`)
//! and announces a Home Assistant sensor for each distinct measurement. The
//! sensors read their state straight from the original telemetry topic; the
//! bridge only publishes retained discovery documents.
//!
//! # Overview
//!
//! - [`TopicIdentity`] splits a telemetry topic into device, kind and phase
//! - [`discovery`] holds the kind metadata and builds discovery documents
//! - [`DiscoveryCache`] remembers every announcement for replay
//! - [`DiscoveryBridge`] is the event-driven state machine
//! - [`BridgeRunner`] connects the state machine to a broker with rumqttc
//!
//! # Example
//!
//! ```ignore
//! use mbmd_hass_bridge::{BridgeRunner, HassConfig};
//!
//! let runner = BridgeRunner::new(config, "http://192.168.1.10:8080");
//! tokio::spawn(runner.run(shutdown_rx));
//! ```

pub mod bridge;
pub mod cache;
pub mod config;
pub mod discovery;
mod error;
pub mod runner;
pub mod topic;

pub use bridge::{BridgeEvent, ConnectionState, DiscoveryBridge, MqttSink, SharedBridge};
pub use cache::DiscoveryCache;
pub use config::{BrokerAddress, HassConfig};
pub use discovery::{Announcement, DiscoveryPayload, classify};
pub use error::{BridgeError, Result};
pub use runner::{BridgeRunner, ReconnectBackoff};
pub use topic::{Rejection, TopicIdentity};
