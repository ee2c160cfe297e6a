//! Telemetry Wire Codec
//!
//! Decodes JSON telemetry into a [`TelemetryRecord`]. Two shapes are
//! accepted:
//!
//! - the dashboard shape, with a nested `Location` object;
//! - the vehicle agent's flat shape, with `Latitude`, `Longitude` and
//!   `Heading` at top level.
//!
//! A missing `Timestamp` is filled with the receive time. `VehicleID` is
//! trimmed, and a missing one decodes to an empty id so that validation,
//! not the codec, rejects it.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::domain::telemetry::{Location, TelemetryRecord};

/// Decode failures.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// Payload was empty.
    #[error("empty telemetry payload")]
    Empty,

    /// Payload was not a telemetry JSON object.
    #[error("malformed telemetry payload: {0}")]
    Malformed(#[from] serde_json::Error),
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct WireTelemetry {
    #[serde(default)]
    timestamp: Option<DateTime<Utc>>,
    #[serde(default, rename = "VehicleID", alias = "VehicleId")]
    vehicle_id: String,
    #[serde(default)]
    speed: f64,
    #[serde(default)]
    steering_angle: f64,
    #[serde(default)]
    throttle: f64,
    #[serde(default)]
    brake: f64,
    #[serde(default)]
    gear: i32,
    #[serde(default)]
    location: Option<Location>,
    #[serde(default)]
    latitude: Option<f64>,
    #[serde(default)]
    longitude: Option<f64>,
    #[serde(default)]
    heading: Option<f64>,
    #[serde(default)]
    metadata: Option<BTreeMap<String, serde_json::Value>>,
}

impl WireTelemetry {
    fn into_record(self, received_at: DateTime<Utc>) -> TelemetryRecord {
        let location = self.location.unwrap_or(Location {
            latitude: self.latitude.unwrap_or_default(),
            longitude: self.longitude.unwrap_or_default(),
            heading: self.heading.unwrap_or_default(),
        });

        TelemetryRecord {
            timestamp: self.timestamp.unwrap_or(received_at),
            vehicle_id: self.vehicle_id.trim().to_string(),
            speed: self.speed,
            steering_angle: self.steering_angle,
            throttle: self.throttle,
            brake: self.brake,
            gear: self.gear,
            location,
            metadata: self.metadata.unwrap_or_default(),
        }
    }
}

/// Decode one JSON telemetry payload.
///
/// The result is not validated; run it through the ingestion use case.
///
/// # Errors
///
/// Returns `CodecError` when the bytes are empty or not a telemetry object.
pub fn decode_telemetry(
    payload: &[u8],
    received_at: DateTime<Utc>,
) -> Result<TelemetryRecord, CodecError> {
    if payload.iter().all(u8::is_ascii_whitespace) {
        return Err(CodecError::Empty);
    }
    let wire: WireTelemetry = serde_json::from_slice(payload)?;
    Ok(wire.into_record(received_at))
}
