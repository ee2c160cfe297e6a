//! Telemetry Record Types
//!
//! The value object that flows through the whole relay: one timestamped
//! snapshot of a vehicle's kinematic and control state.
//!
//! # Invariants
//!
//! - `vehicle_id` is non-empty
//! - `speed` is not negative
//!
//! A record failing either check is rejected before any side effect occurs.
//! Records are never mutated once validated; consumers that need a changed
//! copy build a new instance.
//!
//! # Wire Format
//!
//! Records serialize with the field names the dashboard client expects:
//!
//! ```json
//! {
//!   "Timestamp": "2024-03-15T14:30:00Z",
//!   "VehicleID": "car-1",
//!   "Speed": 42.5,
//!   "SteeringAngle": -3.0,
//!   "Throttle": 0.4,
//!   "Brake": 0.0,
//!   "Gear": 3,
//!   "Location": { "Latitude": 35.1, "Longitude": -117.2, "Heading": 90.0 },
//!   "Metadata": {}
//! }
//! ```

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// =============================================================================
// Constants
// =============================================================================

/// Speed above which a sample is treated as an emergency.
pub const EMERGENCY_SPEED_THRESHOLD: f64 = 100.0;

/// Brake pressure above which a sample is treated as an emergency.
pub const EMERGENCY_BRAKE_THRESHOLD: f64 = 0.9;

/// Prefix of the cache key holding the latest sample per vehicle.
pub const LATEST_CACHE_KEY_PREFIX: &str = "telemetry:latest:";

// =============================================================================
// Errors
// =============================================================================

/// Domain validation errors.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TelemetryError {
    /// Vehicle identifier is empty.
    #[error("invalid vehicle ID")]
    InvalidVehicleId,

    /// Speed is negative.
    #[error("invalid speed: {0}")]
    InvalidSpeed(f64),

    /// Aggregation interval is zero or too large to bucket.
    #[error("invalid aggregation interval: {0:?}")]
    InvalidInterval(Duration),
}

// =============================================================================
// Telemetry Record
// =============================================================================

/// Geographic position and heading of a vehicle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Location {
    /// Latitude in degrees.
    pub latitude: f64,
    /// Longitude in degrees.
    pub longitude: f64,
    /// Heading in degrees.
    pub heading: f64,
}

/// One timestamped snapshot of a vehicle's state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct TelemetryRecord {
    /// Sample time as reported by the vehicle agent.
    pub timestamp: DateTime<Utc>,
    /// Identity key of the vehicle.
    #[serde(rename = "VehicleID")]
    pub vehicle_id: String,
    /// Speed (non-negative).
    pub speed: f64,
    /// Steering angle in degrees.
    pub steering_angle: f64,
    /// Throttle position.
    pub throttle: f64,
    /// Brake pressure.
    pub brake: f64,
    /// Selected gear.
    pub gear: i32,
    /// Position and heading.
    #[serde(default)]
    pub location: Location,
    /// Free-form key/value payload.
    #[serde(default)]
    pub metadata: BTreeMap<String, serde_json::Value>,
}

impl TelemetryRecord {
    /// Create a record with zeroed control inputs.
    #[must_use]
    pub fn new(vehicle_id: impl Into<String>, timestamp: DateTime<Utc>, speed: f64) -> Self {
        Self {
            timestamp,
            vehicle_id: vehicle_id.into(),
            speed,
            steering_angle: 0.0,
            throttle: 0.0,
            brake: 0.0,
            gear: 0,
            location: Location::default(),
            metadata: BTreeMap::new(),
        }
    }

    /// Return a copy with a different brake pressure.
    #[must_use]
    pub fn with_brake(mut self, brake: f64) -> Self {
        self.brake = brake;
        self
    }

    /// Return a copy with a different location.
    #[must_use]
    pub const fn with_location(mut self, location: Location) -> Self {
        self.location = location;
        self
    }

    /// Validate the domain invariants.
    ///
    /// # Errors
    ///
    /// Returns `TelemetryError::InvalidVehicleId` for a blank vehicle id or one
    /// with surrounding whitespace, and
    /// `TelemetryError::InvalidSpeed` for a negative speed.
    pub fn validate(&self) -> Result<(), TelemetryError> {
        if normalize_vehicle_id(&self.vehicle_id) != Some(self.vehicle_id.as_str()) {
            return Err(TelemetryError::InvalidVehicleId);
        }
        if self.speed < 0.0 {
            return Err(TelemetryError::InvalidSpeed(self.speed));
        }
        Ok(())
    }

    /// Whether this sample crosses a safety threshold.
    #[must_use]
    pub fn is_emergency(&self) -> bool {
        self.speed > EMERGENCY_SPEED_THRESHOLD || self.brake > EMERGENCY_BRAKE_THRESHOLD
    }

    /// Cache key for the latest sample of this record's vehicle.
    #[must_use]
    pub fn latest_cache_key(&self) -> String {
        latest_cache_key(&self.vehicle_id)
    }
}

/// The canonical form of a vehicle id: trimmed, and `None` when blank.
///
/// Writes must already be canonical and reads are canonicalized, so both
/// sides agree on which ids exist.
#[must_use]
pub fn normalize_vehicle_id(raw: &str) -> Option<&str> {
    let trimmed = raw.trim();
    (!trimmed.is_empty()).then_some(trimmed)
}

/// Cache key for the latest sample of a vehicle.
#[must_use]
pub fn latest_cache_key(vehicle_id: &str) -> String {
    format!("{LATEST_CACHE_KEY_PREFIX}{vehicle_id}")
}

// =============================================================================
// Aggregated Telemetry
// =============================================================================

/// Rollup of all samples of one vehicle that fall into a time bucket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregatedTelemetry {
    /// Vehicle the bucket belongs to.
    pub vehicle_id: String,
    /// Inclusive start of the bucket.
    pub bucket_start: DateTime<Utc>,
    /// Number of samples in the bucket.
    pub sample_count: usize,
    /// Minimum speed.
    pub min_speed: f64,
    /// Maximum speed.
    pub max_speed: f64,
    /// Mean speed.
    pub avg_speed: f64,
    /// Mean throttle.
    pub avg_throttle: f64,
    /// Mean brake pressure.
    pub avg_brake: f64,
    /// Peak brake pressure.
    pub max_brake: f64,
}

#[derive(Debug)]
struct BucketAccumulator {
    count: usize,
    min_speed: f64,
    max_speed: f64,
    sum_speed: f64,
    sum_throttle: f64,
    sum_brake: f64,
    max_brake: f64,
}

impl BucketAccumulator {
    const fn new() -> Self {
        Self {
            count: 0,
            min_speed: f64::INFINITY,
            max_speed: f64::NEG_INFINITY,
            sum_speed: 0.0,
            sum_throttle: 0.0,
            sum_brake: 0.0,
            max_brake: f64::NEG_INFINITY,
        }
    }

    fn push(&mut self, record: &TelemetryRecord) {
        self.count += 1;
        self.min_speed = self.min_speed.min(record.speed);
        self.max_speed = self.max_speed.max(record.speed);
        self.sum_speed += record.speed;
        self.sum_throttle += record.throttle;
        self.sum_brake += record.brake;
        self.max_brake = self.max_brake.max(record.brake);
    }

    #[allow(clippy::cast_precision_loss)]
    fn finish(self, vehicle_id: &str, bucket_start: DateTime<Utc>) -> AggregatedTelemetry {
        let n = self.count as f64;
        AggregatedTelemetry {
            vehicle_id: vehicle_id.to_string(),
            bucket_start,
            sample_count: self.count,
            min_speed: self.min_speed,
            max_speed: self.max_speed,
            avg_speed: self.sum_speed / n,
            avg_throttle: self.sum_throttle / n,
            avg_brake: self.sum_brake / n,
            max_brake: self.max_brake,
        }
    }
}

/// Width of an aggregation bucket in milliseconds.
///
/// # Errors
///
/// Returns `TelemetryError::InvalidInterval` if `interval` is shorter than
/// one millisecond or does not fit in an `i64` of milliseconds.
pub fn bucket_width_millis(interval: Duration) -> Result<i64, TelemetryError> {
    i64::try_from(interval.as_millis())
        .ok()
        .filter(|ms| *ms > 0)
        .ok_or(TelemetryError::InvalidInterval(interval))
}

/// Roll samples of one vehicle up into fixed-width time buckets.
///
/// Buckets are aligned to the Unix epoch and returned in ascending order.
/// Samples of other vehicles are ignored. Empty buckets are not emitted.
///
/// # Errors
///
/// Returns `TelemetryError::InvalidInterval` if `interval` is shorter than
/// one millisecond or does not fit in an `i64` of milliseconds.
pub fn aggregate<'a>(
    vehicle_id: &str,
    records: impl IntoIterator<Item = &'a TelemetryRecord>,
    interval: Duration,
) -> Result<Vec<AggregatedTelemetry>, TelemetryError> {
    let interval_ms = bucket_width_millis(interval)?;

    let mut buckets: BTreeMap<i64, BucketAccumulator> = BTreeMap::new();
    for record in records {
        if record.vehicle_id != vehicle_id {
            continue;
        }
        let ts = record.timestamp.timestamp_millis();
        let start = ts - ts.rem_euclid(interval_ms);
        buckets
            .entry(start)
            .or_insert_with(BucketAccumulator::new)
            .push(record);
    }

    Ok(buckets
        .into_iter()
        .filter_map(|(start_ms, acc)| {
            DateTime::<Utc>::from_timestamp_millis(start_ms)
                .map(|bucket_start| acc.finish(vehicle_id, bucket_start))
        })
        .collect())
}

// =============================================================================
// Tests
// =============================================================================
