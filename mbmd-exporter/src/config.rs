//! Configuration for the mbmd exporter.

use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use mbmd_common::LoggingConfig;
use mbmd_hass_bridge::HassConfig;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::names::DEFAULT_DEVICE_NAMES_PATH;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error(transparent)]
    Load(#[from] mbmd_common::Error),
    #[error("Validation error: {0}")]
    Validation(String),
}

/// Complete exporter configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExporterConfig {
    /// The mbmd instance to scrape.
    #[serde(default)]
    pub upstream: UpstreamConfig,

    /// Prometheus exporter settings.
    #[serde(default)]
    pub prometheus: PrometheusConfig,

    /// Home Assistant discovery over MQTT.
    #[serde(default)]
    pub hass: HassConfig,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Upstream mbmd settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpstreamConfig {
    /// Base URL of the mbmd HTTP API, e.g. `http://mbmd:8080`. Required.
    #[serde(default)]
    pub url: String,

    /// Timeout for one snapshot fetch (default: 5).
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,

    /// mbmd configuration file holding device names (default: "/etc/mbmd.yaml").
    #[serde(default = "default_device_names")]
    pub device_names: String,
}

fn default_timeout() -> u64 {
    5
}

fn default_device_names() -> String {
    DEFAULT_DEVICE_NAMES_PATH.to_string()
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            timeout_secs: default_timeout(),
            device_names: default_device_names(),
        }
    }
}

impl UpstreamConfig {
    /// The base URL with trailing slashes removed.
    pub fn base_url(&self) -> &str {
        self.url.trim().trim_end_matches('/')
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Prometheus HTTP endpoint configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrometheusConfig {
    /// Address to listen on (default: "0.0.0.0:8080"). `:8080` binds all interfaces.
    #[serde(default = "default_listen")]
    pub listen: String,

    /// Path for metrics endpoint (default: "/metrics").
    #[serde(default = "default_path")]
    pub path: String,
}

fn default_listen() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_path() -> String {
    "/metrics".to_string()
}

impl Default for PrometheusConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            path: default_path(),
        }
    }
}

impl PrometheusConfig {
    /// Parse the listen address, accepting the port-only `:8080` form.
    pub fn listen_addr(&self) -> Result<SocketAddr, ConfigError> {
        let listen = self.listen.trim();
        let normalized = if listen.starts_with(':') {
            format!("0.0.0.0{}", listen)
        } else {
            listen.to_string()
        };

        normalized
            .parse()
            .map_err(|_| ConfigError::Validation(format!("Invalid listen address: {}", self.listen)))
    }
}

impl ExporterConfig {
    /// Load configuration from a JSON5 file.
    ///
    /// The file is not validated here: command-line overrides are applied
    /// first, then [`ExporterConfig::validate`] runs on the merged result.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        Ok(mbmd_common::load_config(path)?)
    }

    /// Parse configuration from a JSON5 string.
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        Ok(mbmd_common::parse_config(content)?)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.upstream.base_url().is_empty() {
            return Err(ConfigError::Validation(
                "upstream url is required (--url or MBMD_URL)".to_string(),
            ));
        }

        if self.upstream.timeout_secs == 0 {
            return Err(ConfigError::Validation(
                "upstream timeout_secs must be > 0".to_string(),
            ));
        }

        self.prometheus.listen_addr()?;

        if !self.prometheus.path.starts_with('/') {
            return Err(ConfigError::Validation(
                "Metrics path must start with /".to_string(),
            ));
        }

        self.hass
            .validate()
            .map_err(|e| ConfigError::Validation(e.to_string()))?;

        Ok(())
    }
}
