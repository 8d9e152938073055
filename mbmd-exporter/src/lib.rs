//! Prometheus exporter for mbmd meter readings.
//!
//! Every scrape of the metrics endpoint performs one fetch of mbmd's
//! `/api/last` snapshot and renders the readings it recognizes as Prometheus
//! metrics. Nothing is cached between scrapes.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐     ┌─────────────────┐     ┌─────────────────┐
//! │      mbmd       │<────│    Collector    │<────│   HTTP Server   │
//! │   (/api/last)   │     │  (catalog map)  │     │   (/metrics)    │
//! └─────────────────┘     └─────────────────┘     └─────────────────┘
//! ```
//!
//! Optionally, the Home Assistant discovery bridge from `mbmd-hass-bridge`
//! runs in the same process.
//!
//! # Usage
//!
//! ```bash
//! mbmd-exporter --url http://mbmd:8080
//! mbmd-exporter --url http://mbmd:8080 --hass-enable --mqtt-host tcp://mqtt:1883
//! ```
//!
//! # Configuration
//!
//! See [`config::ExporterConfig`] for configuration options.

pub mod catalog;
pub mod collector;
pub mod config;
pub mod http;
pub mod names;
pub mod value;

pub use catalog::{Catalog, MetricDescriptor, MetricKind};
pub use collector::{ScrapeCollector, ScrapeError, SharedCollector, Snapshot};
pub use config::{ConfigError, ExporterConfig};
pub use http::HttpServer;
pub use names::DeviceNameMap;
pub use value::RawValue;
