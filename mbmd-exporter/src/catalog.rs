//! Catalog mapping mbmd reading fields to Prometheus metrics.

use std::collections::HashMap;

/// Prefix of every exported metric name.
pub const NAMESPACE: &str = "mbmd";

/// Label names carried by every sample, in exposition order.
pub const LABELS: [&str; 2] = ["device", "name"];

/// Prometheus metric type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricKind {
    Gauge,
    Counter,
}

impl MetricKind {
    /// Get the TYPE comment string for Prometheus exposition format.
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricKind::Gauge => "gauge",
            MetricKind::Counter => "counter",
        }
    }
}

/// Instantaneous readings: (mbmd field, metric suffix, help).
const GAUGES: &[(&str, &str, &str)] = &[
    ("Frequency", "frequency_hz", "Frequency (Hz)"),
    ("Power", "power_watts", "Power (W)"),
    ("PowerL1", "power_l1_watts", "Power L1 (W)"),
    ("PowerL2", "power_l2_watts", "Power L2 (W)"),
    ("PowerL3", "power_l3_watts", "Power L3 (W)"),
    ("ApparentPower", "apparent_power_watts", "Apparent Power (W)"),
    ("ApparentPowerL1", "apparent_power_l1_watts", "Apparent Power L1 (W)"),
    ("ApparentPowerL2", "apparent_power_l2_watts", "Apparent Power L2 (W)"),
    ("ApparentPowerL3", "apparent_power_l3_watts", "Apparent Power L3 (W)"),
    ("Voltage", "voltage_volts", "Voltage (V)"),
    ("VoltageL1", "voltage_l1_volts", "Voltage L1 (V)"),
    ("VoltageL2", "voltage_l2_volts", "Voltage L2 (V)"),
    ("VoltageL3", "voltage_l3_volts", "Voltage L3 (V)"),
    ("Current", "current_amps", "Current (A)"),
    ("CurrentL1", "current_l1_amps", "Current L1 (A)"),
    ("CurrentL2", "current_l2_amps", "Current L2 (A)"),
    ("CurrentL3", "current_l3_amps", "Current L3 (A)"),
    ("ReactivePower", "reactive_power_vars", "Reactive Power (var)"),
];

/// Accumulated energy: (mbmd field, metric suffix, help).
const COUNTERS: &[(&str, &str, &str)] = &[
    ("Sum", "total_kwh", "Total (kWh)"),
    ("SumL1", "total_l1_kwh", "Total L1 (kWh)"),
    ("SumL2", "total_l2_kwh", "Total L2 (kWh)"),
    ("SumL3", "total_l3_kwh", "Total L3 (kWh)"),
    ("Import", "import_kwh", "Import (kWh)"),
    ("ImportL1", "import_l1_kwh", "Import L1 (kWh)"),
    ("ImportL2", "import_l2_kwh", "Import L2 (kWh)"),
    ("ImportL3", "import_l3_kwh", "Import L3 (kWh)"),
    ("Export", "export_kwh", "Export (kWh)"),
    ("ExportL1", "export_l1_kwh", "Export L1 (kWh)"),
    ("ExportL2", "export_l2_kwh", "Export L2 (kWh)"),
    ("ExportL3", "export_l3_kwh", "Export L3 (kWh)"),
];

/// One exported metric family.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricDescriptor {
    /// Field key in the mbmd reading.
    pub field: &'static str,
    /// Full metric name, including the namespace.
    pub name: String,
    pub kind: MetricKind,
    pub help: &'static str,
}

/// The fixed set of exported metrics, built once at startup.
#[derive(Debug, Clone)]
pub struct Catalog {
    descriptors: Vec<MetricDescriptor>,
    by_field: HashMap<&'static str, usize>,
}

impl Catalog {
    /// The mbmd meter catalog: gauges first, then counters.
    pub fn mbmd() -> Self {
        let gauges = GAUGES.iter().map(|e| (e, MetricKind::Gauge));
        let counters = COUNTERS.iter().map(|e| (e, MetricKind::Counter));

        let descriptors: Vec<MetricDescriptor> = gauges
            .chain(counters)
            .map(|(&(field, suffix, help), kind)| MetricDescriptor {
                field,
                name: format!("{}_{}", NAMESPACE, suffix),
                kind,
                help,
            })
            .collect();

        let by_field = descriptors
            .iter()
            .enumerate()
            .map(|(i, d)| (d.field, i))
            .collect();

        Self {
            descriptors,
            by_field,
        }
    }

    /// All descriptors in exposition order.
    pub fn descriptors(&self) -> &[MetricDescriptor] {
        &self.descriptors
    }

    /// Look up the descriptor for an mbmd field. Unknown fields yield `None`.
    pub fn get(&self, field: &str) -> Option<&MetricDescriptor> {
        self.by_field.get(field).map(|&i| &self.descriptors[i])
    }

    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }
}

impl Default for Catalog {
    fn default() -> Self {
        Self::mbmd()
    }
}
