//! Scrape collector: fetches an mbmd snapshot and turns it into samples.

use std::collections::{BTreeMap, HashMap};
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, trace, warn};

use crate::catalog::{Catalog, LABELS, MetricDescriptor};
use crate::names::DeviceNameMap;
use crate::value::RawValue;

/// Path of the mbmd endpoint returning the latest reading of every device.
pub const SNAPSHOT_PATH: &str = "/api/last";

/// Default timeout for one upstream fetch.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Why a scrape produced no samples.
#[derive(Debug, Error)]
pub enum ScrapeError {
    #[error("mbmd fetch failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("mbmd upstream error: status={status} body={body}")]
    Status { status: u16, body: String },

    #[error("mbmd json decode failed: {0}")]
    Decode(#[from] serde_json::Error),
}

/// Device id -> field key -> raw value, as returned by `/api/last`.
///
/// Devices are kept sorted so output order is stable. A device reported as
/// `null` has no readings.
pub type Snapshot = BTreeMap<String, Option<HashMap<String, RawValue>>>;

/// Decode an `/api/last` response body.
pub fn decode_snapshot(body: &[u8]) -> Result<Snapshot, ScrapeError> {
    Ok(serde_json::from_slice(body)?)
}

/// One labeled value of a catalog metric.
#[derive(Debug, Clone, PartialEq)]
pub struct Sample<'c> {
    pub descriptor: &'c MetricDescriptor,
    /// Device id exactly as reported upstream.
    pub device: String,
    /// Resolved display name, possibly empty.
    pub name: String,
    pub value: f64,
}

/// Collector that performs one upstream fetch per scrape.
///
/// Holds no per-scrape state; concurrent scrapes each fetch independently.
pub struct ScrapeCollector {
    endpoint: String,
    client: reqwest::Client,
    catalog: Catalog,
    names: DeviceNameMap,
}

/// Create a shareable collector handle.
pub type SharedCollector = Arc<ScrapeCollector>;

impl ScrapeCollector {
    /// Create a collector for the mbmd instance at `base_url`.
    pub fn new(
        base_url: &str,
        timeout: Duration,
        names: DeviceNameMap,
    ) -> Result<Self, ScrapeError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            endpoint: format!("{}{}", base_url.trim_end_matches('/'), SNAPSHOT_PATH),
            client,
            catalog: Catalog::mbmd(),
            names,
        })
    }

    /// The full URL fetched on every scrape.
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Fetch and decode the current snapshot.
    pub async fn fetch(&self) -> Result<Snapshot, ScrapeError> {
        let response = self.client.get(&self.endpoint).send().await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ScrapeError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let body = response.bytes().await?;
        decode_snapshot(&body)
    }

    /// Turn a snapshot into samples, grouped by metric in catalog order.
    ///
    /// Missing fields and values that do not coerce are skipped one by one;
    /// the device's other fields are still emitted.
    pub fn emit(&self, snapshot: &Snapshot) -> Vec<Sample<'_>> {
        let display_names: Vec<(&str, &str, &HashMap<String, RawValue>)> = snapshot
            .iter()
            .filter_map(|(device, values)| {
                let values = values.as_ref()?;
                Some((device.as_str(), self.names.resolve(device), values))
            })
            .collect();

        let mut samples = Vec::new();
        for descriptor in self.catalog.descriptors() {
            for &(device, name, values) in &display_names {
                let Some(raw) = values.get(descriptor.field) else {
                    continue;
                };
                let Some(value) = raw.as_f64() else {
                    trace!(device, field = descriptor.field, ?raw, "Skipping non-numeric field");
                    continue;
                };

                samples.push(Sample {
                    descriptor,
                    device: device.to_string(),
                    name: name.to_string(),
                    value,
                });
            }
        }
        samples
    }

    /// Run one scrape. Upstream failures are logged and yield no samples.
    pub async fn scrape(&self) -> Vec<Sample<'_>> {
        match self.fetch().await {
            Ok(snapshot) => {
                let samples = self.emit(&snapshot);
                debug!(
                    devices = snapshot.len(),
                    samples = samples.len(),
                    "Scraped mbmd"
                );
                samples
            }
            Err(e) => {
                warn!(endpoint = %self.endpoint, error = %e, "Scrape failed");
                Vec::new()
            }
        }
    }

    /// Scrape and render in Prometheus exposition format.
    pub async fn render(&self) -> String {
        let samples = self.scrape().await;
        encode(&samples)
    }
}

/// Render samples in Prometheus exposition format.
///
/// Expects samples of the same metric to be adjacent, as produced by
/// [`ScrapeCollector::emit`].
pub fn encode(samples: &[Sample<'_>]) -> String {
    let mut output = Vec::with_capacity(samples.len() * 100);
    let mut current: Option<&str> = None;

    for sample in samples {
        let descriptor = sample.descriptor;
        if current != Some(descriptor.name.as_str()) {
            writeln!(output, "# HELP {} {}", descriptor.name, descriptor.help).ok();
            writeln!(
                output,
                "# TYPE {} {}",
                descriptor.name,
                descriptor.kind.as_str()
            )
            .ok();
            current = Some(descriptor.name.as_str());
        }

        writeln!(
            output,
            "{}{{{}=\"{}\",{}=\"{}\"}} {}",
            descriptor.name,
            LABELS[0],
            escape_label_value(&sample.device),
            LABELS[1],
            escape_label_value(&sample.name),
            format_value(sample.value)
        )
        .ok();
    }

    String::from_utf8(output).unwrap_or_default()
}

/// Escape special characters in label values.
fn escape_label_value(value: &str) -> String {
    let mut result = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '\\' => result.push_str("\\\\"),
            '"' => result.push_str("\\\""),
            '\n' => result.push_str("\\n"),
            _ => result.push(c),
        }
    }
    result
}

/// Format a floating point value for Prometheus.
fn format_value(value: f64) -> String {
    if value.is_nan() {
        "NaN".to_string()
    } else if value.is_infinite() {
        if value.is_sign_positive() {
            "+Inf".to_string()
        } else {
            "-Inf".to_string()
        }
    } else if value.fract() == 0.0 {
        format!("{:.0}", value)
    } else {
        format!("{}", value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::MetricKind;

    fn collector(names: DeviceNameMap) -> ScrapeCollector {
        ScrapeCollector::new("http://127.0.0.1:9", DEFAULT_TIMEOUT, names).unwrap()
    }

    fn snapshot(json: &str) -> Snapshot {
        decode_snapshot(json.as_bytes()).unwrap()
    }

    #[test]
    fn test_endpoint_trims_trailing_slash() {
        let c = ScrapeCollector::new("http://mbmd:8080//", DEFAULT_TIMEOUT, DeviceNameMap::default())
            .unwrap();
        assert_eq!(c.endpoint(), "http://mbmd:8080/api/last");
    }

    #[test]
    fn test_emit_power_and_sum() {
        let c = collector(DeviceNameMap::default());
        let snap = snapshot(r#"{"this.1": {"Power": 100.5, "Sum": 42}}"#);

        let samples = c.emit(&snap);
        assert_eq!(samples.len(), 2);

        assert_eq!(samples[0].descriptor.name, "mbmd_power_watts");
        assert_eq!(samples[0].descriptor.kind, MetricKind::Gauge);
        assert_eq!(samples[0].device, "this.1");
        assert_eq!(samples[0].name, "");
        assert_eq!(samples[0].value, 100.5);

        assert_eq!(samples[1].descriptor.name, "mbmd_total_kwh");
        assert_eq!(samples[1].descriptor.kind, MetricKind::Counter);
        assert_eq!(samples[1].value, 42.0);
    }

    #[test]
    fn test_emit_skips_bad_fields_only() {
        let c = collector(DeviceNameMap::default());
        let snap = snapshot(
            r#"{"this.1": {
                "Power": "n/a",
                "Voltage": " 231.2 ",
                "Current": "",
                "Frequency": null,
                "Import": true,
                "Export": 3.5,
                "Timestamp": "2024-01-01T00:00:00Z",
                "Unknown": 1
            }}"#,
        );

        let samples = c.emit(&snap);
        let names: Vec<_> = samples.iter().map(|s| s.descriptor.name.as_str()).collect();
        assert_eq!(names, vec!["mbmd_voltage_volts", "mbmd_export_kwh"]);
        assert_eq!(samples[0].value, 231.2);
    }

    #[test]
    fn test_emit_resolves_names() {
        let names: DeviceNameMap = [("2", "Kitchen")].into_iter().collect();
        let c = collector(names);
        let snap = snapshot(r#"{"this.2": {"Power": 1}, "this.3": {"Power": 2}, "solo": {"Power": 3}}"#);

        let samples = c.emit(&snap);
        let labels: Vec<_> = samples
            .iter()
            .map(|s| (s.device.as_str(), s.name.as_str()))
            .collect();
        assert_eq!(
            labels,
            vec![("solo", ""), ("this.2", "Kitchen"), ("this.3", "")]
        );
    }

    #[test]
    fn test_emit_empty_device() {
        let c = collector(DeviceNameMap::default());
        assert!(c.emit(&snapshot(r#"{"this.1": {}}"#)).is_empty());
        assert!(c.emit(&snapshot("{}")).is_empty());
    }

    #[test]
    fn test_null_device_does_not_hide_others() {
        let c = collector(DeviceNameMap::default());
        let snap = snapshot(r#"{"this.1": null, "this.2": {"Power": 1}}"#);

        let samples = c.emit(&snap);
        assert_eq!(samples.len(), 1);
        assert_eq!(samples[0].device, "this.2");
        assert_eq!(samples[0].value, 1.0);
    }

    #[test]
    fn test_decode_rejects_malformed() {
        assert!(decode_snapshot(b"not json").is_err());
        assert!(decode_snapshot(br#"{"this.1": 5}"#).is_err());
        assert!(decode_snapshot(br#"[1, 2]"#).is_err());
    }

    #[test]
    fn test_encode() {
        let c = collector(DeviceNameMap::default());
        let snap = snapshot(r#"{"this.1": {"Power": 100.5, "Sum": 42}, "this.2": {"Power": 7}}"#);

        let output = encode(&c.emit(&snap));
        let expected = "\
# HELP mbmd_power_watts Power (W)
# TYPE mbmd_power_watts gauge
mbmd_power_watts{device=\"this.1\",name=\"\"} 100.5
mbmd_power_watts{device=\"this.2\",name=\"\"} 7
# HELP mbmd_total_kwh Total (kWh)
# TYPE mbmd_total_kwh counter
mbmd_total_kwh{device=\"this.1\",name=\"\"} 42
";
        assert_eq!(output, expected);
    }

    #[test]
    fn test_encode_empty() {
        assert_eq!(encode(&[]), "");
    }

    #[test]
    fn test_escape_label_value() {
        assert_eq!(escape_label_value("simple"), "simple");
        assert_eq!(escape_label_value("with\"quote"), "with\\\"quote");
        assert_eq!(escape_label_value("with\\backslash"), "with\\\\backslash");
        assert_eq!(escape_label_value("with\nnewline"), "with\\nnewline");
    }

    #[test]
    fn test_format_value() {
        assert_eq!(format_value(42.0), "42");
        assert_eq!(format_value(3.14), "3.14");
        assert_eq!(format_value(f64::NAN), "NaN");
        assert_eq!(format_value(f64::INFINITY), "+Inf");
        assert_eq!(format_value(f64::NEG_INFINITY), "-Inf");
    }
}
