//! MQTT connection settings for the discovery bridge.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{BridgeError, Result};

/// Default MQTT port when the broker URI does not name one.
pub const DEFAULT_MQTT_PORT: u16 = 1883;

/// Home Assistant discovery settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HassConfig {
    /// Run the discovery bridge alongside the exporter.
    #[serde(default)]
    pub enabled: bool,

    /// Broker URI, e.g. `tcp://mqtt:1883`. Required when enabled.
    #[serde(default)]
    pub broker: Option<String>,

    /// Wildcard topic carrying mbmd telemetry (default: "mbmd/#").
    #[serde(default = "default_topic")]
    pub topic: String,

    /// MQTT client identifier.
    #[serde(default = "default_client_id")]
    pub client_id: String,

    /// Start every connection with a clean session.
    #[serde(default = "default_clean_session")]
    pub clean_session: bool,

    /// Re-send unacknowledged requests after a reconnect.
    #[serde(default)]
    pub resume_subs: bool,

    /// Timeout for establishing the broker connection (seconds).
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    /// Upper bound for the delay between reconnect attempts (seconds).
    #[serde(default = "default_max_reconnect")]
    pub max_reconnect_secs: u64,
}

fn default_topic() -> String {
    "mbmd/#".to_string()
}

fn default_client_id() -> String {
    crate::discovery::BRIDGE_ID.to_string()
}

fn default_clean_session() -> bool {
    true
}

fn default_connect_timeout() -> u64 {
    30
}

fn default_max_reconnect() -> u64 {
    120
}

impl Default for HassConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            broker: None,
            topic: default_topic(),
            client_id: default_client_id(),
            clean_session: default_clean_session(),
            resume_subs: false,
            connect_timeout_secs: default_connect_timeout(),
            max_reconnect_secs: default_max_reconnect(),
        }
    }
}

impl HassConfig {
    /// Validate the settings. A disabled bridge is always valid.
    pub fn validate(&self) -> Result<()> {
        if !self.enabled {
            return Ok(());
        }

        let Some(broker) = self.broker.as_deref().filter(|b| !b.trim().is_empty()) else {
            return Err(BridgeError::validation(
                "discovery is enabled but no broker URI is set",
            ));
        };
        BrokerAddress::parse(broker)?;

        if self.topic.trim().is_empty() {
            return Err(BridgeError::validation("subscribe topic must not be empty"));
        }
        if self.client_id.is_empty() {
            return Err(BridgeError::validation("client_id must not be empty"));
        }
        if self.connect_timeout_secs == 0 {
            return Err(BridgeError::validation("connect_timeout_secs must be > 0"));
        }
        if self.max_reconnect_secs == 0 {
            return Err(BridgeError::validation("max_reconnect_secs must be > 0"));
        }

        Ok(())
    }

    /// Resolve the configured broker URI.
    pub fn broker_address(&self) -> Result<BrokerAddress> {
        match self.broker.as_deref() {
            Some(uri) => BrokerAddress::parse(uri),
            None => Err(BridgeError::validation("no broker URI is set")),
        }
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn max_reconnect_interval(&self) -> Duration {
        Duration::from_secs(self.max_reconnect_secs)
    }
}

/// Host and port of an MQTT broker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerAddress {
    pub host: String,
    pub port: u16,
}

impl BrokerAddress {
    /// Parse `tcp://host:port`, `mqtt://host:port`, `host:port` or `host`.
    ///
    /// IPv6 hosts are written in brackets, e.g. `tcp://[::1]:1883`.
    pub fn parse(uri: &str) -> Result<Self> {
        let trimmed = uri.trim();
        let rest = match trimmed.split_once("://") {
            Some(("tcp" | "mqtt", rest)) => rest,
            Some((scheme, _)) => {
                return Err(BridgeError::broker_uri(
                    uri,
                    format!("unsupported scheme '{}'", scheme),
                ));
            }
            None => trimmed,
        };
        let rest = rest.trim_end_matches('/');

        // `[v6addr]:port` keeps the address without its brackets.
        let (host, port) = match rest.strip_prefix('[') {
            Some(bracketed) => {
                let (host, tail) = bracketed
                    .split_once(']')
                    .ok_or_else(|| BridgeError::broker_uri(uri, "unterminated '['"))?;
                match tail {
                    "" => (host, None),
                    _ => match tail.strip_prefix(':') {
                        Some(port) => (host, Some(port)),
                        None => {
                            return Err(BridgeError::broker_uri(uri, "unexpected text after ']'"));
                        }
                    },
                }
            }
            None => match rest.rsplit_once(':') {
                Some((host, _)) if host.contains(':') => {
                    return Err(BridgeError::broker_uri(
                        uri,
                        "IPv6 addresses must be enclosed in brackets",
                    ));
                }
                Some((host, port)) => (host, Some(port)),
                None => (rest, None),
            },
        };

        let port = match port {
            Some(port) => port
                .parse::<u16>()
                .map_err(|_| BridgeError::broker_uri(uri, format!("invalid port '{}'", port)))?,
            None => DEFAULT_MQTT_PORT,
        };

        if host.is_empty() {
            return Err(BridgeError::broker_uri(uri, "missing host"));
        }

        Ok(Self {
            host: host.to_string(),
            port,
        })
    }
}
