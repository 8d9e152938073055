//! Home Assistant discovery payloads for mbmd measurements.

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::topic::{Rejection, TopicIdentity};

/// Token identifying this bridge in unique ids and discovery topics.
pub const BRIDGE_ID: &str = "mbmd-exporter-bridge";

/// Home Assistant discovery topic prefix.
pub const DISCOVERY_PREFIX: &str = "homeassistant";

/// Seconds without a state update before Home Assistant marks the entity unavailable.
pub const EXPIRE_AFTER_SECS: u64 = 60;

/// Manufacturer reported in the device block.
pub const MANUFACTURER: &str = "mbmd";

/// Discovery metadata for one measurement kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KindMetadata {
    pub kind: &'static str,
    pub unit: Option<&'static str>,
    pub state_class: &'static str,
    pub device_class: &'static str,
}

const fn kind(
    kind: &'static str,
    unit: Option<&'static str>,
    state_class: &'static str,
    device_class: &'static str,
) -> KindMetadata {
    KindMetadata {
        kind,
        unit,
        state_class,
        device_class,
    }
}

/// Measurement kinds announced to Home Assistant.
pub static KINDS: &[KindMetadata] = &[
    kind("Export", Some("kWh"), "total_increasing", "energy"),
    kind("Import", Some("kWh"), "total_increasing", "energy"),
    kind("Sum", Some("kWh"), "total_increasing", "energy"),
    kind("Cosphi", None, "measurement", "power_factor"),
    kind("Current", Some("A"), "measurement", "current"),
    kind("Voltage", Some("V"), "measurement", "voltage"),
    kind("Power", Some("W"), "measurement", "power"),
    kind("ReactivePower", Some("var"), "measurement", "reactive_power"),
    kind("Frequency", Some("Hz"), "measurement", "frequency"),
];

/// Look up the metadata for a measurement kind (case-sensitive).
pub fn lookup_kind(kind: &str) -> Option<&'static KindMetadata> {
    KINDS.iter().find(|k| k.kind == kind)
}

/// A telemetry topic that maps to a Home Assistant sensor.
#[derive(Debug, Clone, Copy)]
pub struct Entity<'a> {
    /// The originating telemetry topic; Home Assistant reads state from it.
    pub state_topic: &'a str,
    pub identity: TopicIdentity<'a>,
    pub metadata: &'static KindMetadata,
}

/// Decide whether a telemetry topic describes an announceable entity.
pub fn classify(topic: &str) -> std::result::Result<Entity<'_>, Rejection> {
    let identity = TopicIdentity::parse(topic)?;
    let metadata = lookup_kind(identity.kind).ok_or(Rejection::UnknownKind)?;

    Ok(Entity {
        state_topic: topic,
        identity,
        metadata,
    })
}

impl Entity<'_> {
    /// `mbmd-exporter-bridge_<device>_<kind>[-<phase>]`
    pub fn unique_id(&self) -> String {
        format!(
            "{}_{}_{}",
            BRIDGE_ID,
            self.identity.device_slug(),
            self.identity.channel_slug()
        )
    }

    /// `homeassistant/sensor/mbmd-exporter-bridge-<device>/<kind>[-<phase>]/config`
    pub fn discovery_topic(&self) -> String {
        format!(
            "{}/sensor/{}-{}/{}/config",
            DISCOVERY_PREFIX,
            BRIDGE_ID,
            self.identity.device_slug(),
            self.identity.channel_slug()
        )
    }

    /// Build the discovery document for this entity.
    pub fn payload(&self, config_url: &str) -> DiscoveryPayload {
        DiscoveryPayload {
            name: self.identity.entity_name(),
            state_topic: self.state_topic.to_string(),
            unique_id: self.unique_id(),
            device_class: self.metadata.device_class.to_string(),
            state_class: self.metadata.state_class.to_string(),
            unit_of_measurement: self.metadata.unit.map(str::to_string),
            expire_after: EXPIRE_AFTER_SECS,
            device: DeviceInfo {
                name: self.identity.device.to_string(),
                identifiers: self.identity.device_slug(),
                configuration_url: config_url.to_string(),
                manufacturer: MANUFACTURER.to_string(),
                model: self.identity.device.to_string(),
            },
        }
    }

    /// Serialize the discovery document together with its target topic.
    pub fn announcement(&self, config_url: &str) -> Result<Announcement> {
        let payload = serde_json::to_vec(&self.payload(config_url))?;
        Ok(Announcement {
            topic: self.discovery_topic(),
            payload,
        })
    }
}

/// Sensor discovery document, using Home Assistant's abbreviated keys.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiscoveryPayload {
    pub name: String,
    #[serde(rename = "stat_t")]
    pub state_topic: String,
    #[serde(rename = "uniq_id")]
    pub unique_id: String,
    #[serde(rename = "dev_cla")]
    pub device_class: String,
    #[serde(rename = "stat_cla")]
    pub state_class: String,
    #[serde(
        rename = "unit_of_meas",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub unit_of_measurement: Option<String>,
    #[serde(rename = "exp_aft")]
    pub expire_after: u64,
    #[serde(rename = "dev")]
    pub device: DeviceInfo,
}

/// Device block shared by every sensor of one meter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceInfo {
    pub name: String,
    #[serde(rename = "ids")]
    pub identifiers: String,
    #[serde(rename = "cu")]
    pub configuration_url: String,
    #[serde(rename = "mf")]
    pub manufacturer: String,
    #[serde(rename = "mdl")]
    pub model: String,
}

/// A serialized discovery document and the topic it is published to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Announcement {
    pub topic: String,
    pub payload: Vec<u8>,
}
