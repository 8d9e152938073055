//! Topic identity parsing for mbmd telemetry topics.
//!
//! mbmd publishes readings on `<root>/<device>/<kind>/<phase>`, for example
//! `mbmd/this.1/Power/L1`. An empty phase segment (`mbmd/this.1/Power/`)
//! denotes the unphased total.

/// Device segment used by mbmd for its own status messages.
pub const RESERVED_DEVICE: &str = "status";

/// Why a topic was not turned into a discovery entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    /// Fewer than four `/`-separated segments.
    TooFewSegments,
    /// More than four segments.
    UnsupportedShape,
    /// Device segment is the reserved status token.
    ReservedDevice,
    /// Phase is a transport sub-channel marker (`T1`, `T23`, ...).
    TransportChannel,
    /// Measurement kind has no discovery metadata.
    UnknownKind,
}

/// The (device, kind, phase) triple addressed by a telemetry topic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TopicIdentity<'a> {
    pub device: &'a str,
    pub kind: &'a str,
    pub phase: &'a str,
}

impl<'a> TopicIdentity<'a> {
    /// Split a topic into its identity.
    ///
    /// Does not check the kind; see [`crate::discovery::classify`].
    pub fn parse(topic: &'a str) -> Result<Self, Rejection> {
        let parts: Vec<&str> = topic.split('/').collect();
        if parts.len() < 4 {
            return Err(Rejection::TooFewSegments);
        }
        if parts.len() > 4 {
            return Err(Rejection::UnsupportedShape);
        }

        let (device, kind, phase) = (parts[1], parts[2], parts[3]);
        if device == RESERVED_DEVICE {
            return Err(Rejection::ReservedDevice);
        }
        if is_transport_marker(phase) {
            return Err(Rejection::TransportChannel);
        }

        Ok(Self {
            device,
            kind,
            phase,
        })
    }

    /// Human readable entity name, e.g. `Power L1` or `Power Total`.
    pub fn entity_name(&self) -> String {
        let phase = if self.phase.is_empty() {
            "Total"
        } else {
            self.phase
        };
        format!("{} {}", self.kind, phase)
    }

    /// Device id made safe for topic levels and identifiers (`this.1` -> `this-1`).
    pub fn device_slug(&self) -> String {
        self.device.replace('.', "-")
    }

    /// Kind and phase joined into a lower-case identifier (`power-l1`, `sum`).
    pub fn channel_slug(&self) -> String {
        format!("{}-{}", self.kind, self.phase)
            .trim_matches('-')
            .replace('.', "-")
            .to_lowercase()
    }
}

/// Matches `T` followed by one or more ASCII digits.
fn is_transport_marker(phase: &str) -> bool {
    match phase.strip_prefix('T') {
        Some(digits) => !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit()),
        None => false,
    }
}
