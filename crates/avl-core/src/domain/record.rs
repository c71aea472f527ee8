//! Decoded position records and device identity.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Identity a device announces in the first frame of a connection.
///
/// The IMEI is kept exactly as received; no digit or checksum validation is
/// applied.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeviceIdentity {
    pub imei: String,
}

impl DeviceIdentity {
    pub fn new(imei: impl Into<String>) -> Self {
        Self { imei: imei.into() }
    }
}

impl fmt::Display for DeviceIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.imei)
    }
}

/// One key/value sensor reading attached to an AVL record.
///
/// Codec 8 carries 1-byte IDs and values of 1, 2, 4 or 8 bytes; all values
/// are widened to `u64` here.  Interpretation of the ID (ignition, battery
/// voltage, odometer, ...) is device-configuration specific and left to
/// downstream consumers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IoElement {
    pub id: u16,
    pub value: u64,
}

/// A single GPS fix decoded from a telemetry frame.
///
/// Coordinates are already scaled down from the wire's 10^-7 degree integers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AvlRecord {
    /// Instant of the fix, after millisecond/second disambiguation.
    pub timestamp: DateTime<Utc>,
    /// Device-assigned priority (0 = low, 1 = high, 2 = panic).  Not
    /// interpreted by the gateway.
    pub priority: u8,
    /// Degrees east of Greenwich, negative for west.
    pub longitude: f64,
    /// Degrees north of the equator, negative for south.
    pub latitude: f64,
    /// Meters above sea level.
    pub altitude: i16,
    /// Heading in degrees clockwise from north.
    pub angle: u16,
    /// Satellites in use for the fix.
    pub satellites: u8,
    /// Ground speed in km/h.
    pub speed: u16,
    /// ID of the IO element that triggered this record, 0 when periodic.
    #[serde(default)]
    pub event_io_id: u8,
    /// IO elements carried by the record.  Empty for bare frames.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub io: Vec<IoElement>,
}

impl AvlRecord {
    /// Looks up an IO element value by ID.
    pub fn io_value(&self, id: u16) -> Option<u64> {
        self.io.iter().find(|e| e.id == id).map(|e| e.value)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
