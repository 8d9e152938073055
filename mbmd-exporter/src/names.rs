//! Display names for mbmd devices, read from the mbmd configuration file.

use std::collections::HashMap;
use std::path::Path;

use serde::Deserialize;
use tracing::{debug, info, warn};

/// Where mbmd keeps its configuration by default.
pub const DEFAULT_DEVICE_NAMES_PATH: &str = "/etc/mbmd.yaml";

/// The part of `mbmd.yaml` we care about.
#[derive(Debug, Deserialize)]
struct MbmdFile {
    #[serde(default)]
    devices: Vec<DeviceEntry>,
}

/// One meter entry. mbmd also records `type` and `adapter`; they are not needed here.
#[derive(Debug, Deserialize)]
struct DeviceEntry {
    #[serde(default)]
    name: String,
    #[serde(default)]
    id: i64,
}

/// Maps the numeric device suffix (`"2"` in `"this.2"`) to a display name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceNameMap {
    names: HashMap<String, String>,
}

impl DeviceNameMap {
    /// Load names from an mbmd YAML file.
    ///
    /// A missing or malformed file yields an empty map; display names then stay blank.
    pub fn load(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) => {
                debug!(path = %path.display(), error = %e, "No device name file, names stay empty");
                return Self::default();
            }
        };

        match Self::parse(&content) {
            Ok(map) => {
                info!(path = %path.display(), devices = map.len(), "Loaded device names");
                map
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Failed to parse device name file");
                Self::default()
            }
        }
    }

    /// Parse the YAML document.
    pub fn parse(content: &str) -> Result<Self, serde_yaml::Error> {
        let file: MbmdFile = serde_yaml::from_str(content)?;
        Ok(file
            .devices
            .into_iter()
            .map(|d| (d.id.to_string(), d.name))
            .collect())
    }

    /// Resolve the display name for an upstream device id.
    ///
    /// Returns an empty string if the id has no `.`-suffix or the suffix is unmapped.
    pub fn resolve(&self, device_id: &str) -> &str {
        device_suffix(device_id)
            .and_then(|suffix| self.names.get(suffix))
            .map(String::as_str)
            .unwrap_or("")
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for DeviceNameMap {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            names: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

/// The segment after the last `.`, if the id has at least two segments.
pub fn device_suffix(device_id: &str) -> Option<&str> {
    device_id.rsplit_once('.').map(|(_, suffix)| suffix)
}
