//! In-memory telemetry repository and cache.

use std::collections::{BTreeMap, HashMap};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;

use crate::application::ports::{
    CacheError, RepositoryError, TelemetryCachePort, TelemetryRepositoryPort,
};
use crate::domain::telemetry::{AggregatedTelemetry, TelemetryRecord, aggregate};

// =============================================================================
// Retention
// =============================================================================

/// Default history kept per vehicle, measured back from its newest sample.
pub const DEFAULT_RETENTION_WINDOW: Duration = Duration::from_secs(60 * 60);

/// Default row cap per vehicle: one hour of samples at 10 Hz.
pub const DEFAULT_RETENTION_MAX_ROWS: usize = 36_000;

/// How much history the in-memory repository keeps per vehicle.
///
/// Both bounds are enforced on every write. Age is measured against the
/// vehicle's newest sample timestamp, not the wall clock, so replayed or
/// delayed telemetry is trimmed consistently.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetentionPolicy {
    /// Samples older than the newest one by more than this are dropped.
    pub max_age: Duration,
    /// Most samples kept per vehicle; the oldest go first.
    pub max_rows_per_vehicle: usize,
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self {
            max_age: DEFAULT_RETENTION_WINDOW,
            max_rows_per_vehicle: DEFAULT_RETENTION_MAX_ROWS,
        }
    }
}

impl RetentionPolicy {
    /// Trim `series` in place. Returns the number of rows dropped.
    fn apply(&self, series: &mut BTreeMap<DateTime<Utc>, TelemetryRecord>) -> usize {
        let before = series.len();

        let cutoff = series.last_key_value().and_then(|(newest, _)| {
            chrono::Duration::from_std(self.max_age)
                .ok()
                .and_then(|age| newest.checked_sub_signed(age))
        });
        if let Some(cutoff) = cutoff {
            *series = series.split_off(&cutoff);
        }

        while series.len() > self.max_rows_per_vehicle.max(1) {
            series.pop_first();
        }

        before - series.len()
    }
}

// =============================================================================
// Repository
// =============================================================================

/// In-memory implementation of `TelemetryRepositoryPort`.
///
/// Rows are keyed by `(vehicle_id, timestamp)`; writing the same key twice
/// keeps the last write. History per vehicle is bounded by a
/// [`RetentionPolicy`].
#[derive(Debug, Default)]
pub struct InMemoryTelemetryRepository {
    rows: RwLock<HashMap<String, BTreeMap<DateTime<Utc>, TelemetryRecord>>>,
    retention: RetentionPolicy,
}

impl InMemoryTelemetryRepository {
    /// Create a new empty repository with the default retention.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a new empty repository with explicit retention.
    #[must_use]
    pub fn with_retention(retention: RetentionPolicy) -> Self {
        Self {
            rows: RwLock::default(),
            retention,
        }
    }

    /// Retention in effect.
    #[must_use]
    pub const fn retention(&self) -> RetentionPolicy {
        self.retention
    }

    fn insert(
        &self,
        rows: &mut HashMap<String, BTreeMap<DateTime<Utc>, TelemetryRecord>>,
        record: &TelemetryRecord,
    ) -> usize {
        let series = rows.entry(record.vehicle_id.clone()).or_default();
        series.insert(record.timestamp, record.clone());
        self.retention.apply(series)
    }

    /// Total number of stored rows.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.read().values().map(BTreeMap::len).sum()
    }

    /// Check if the repository is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of distinct vehicles.
    #[must_use]
    pub fn vehicle_count(&self) -> usize {
        self.rows.read().len()
    }
}

#[async_trait]
impl TelemetryRepositoryPort for InMemoryTelemetryRepository {
    async fn store(&self, record: &TelemetryRecord) -> Result<(), RepositoryError> {
        let pruned = self.insert(&mut self.rows.write(), record);
        if pruned > 0 {
            tracing::trace!(vehicle_id = %record.vehicle_id, pruned, "Retention applied");
        }
        Ok(())
    }

    async fn store_batch(&self, records: &[TelemetryRecord]) -> Result<(), RepositoryError> {
        let mut rows = self.rows.write();
        let pruned: usize = records
            .iter()
            .map(|record| self.insert(&mut rows, record))
            .sum();
        if pruned > 0 {
            tracing::trace!(records = records.len(), pruned, "Retention applied");
        }
        Ok(())
    }

    async fn get_latest(
        &self,
        vehicle_id: &str,
    ) -> Result<Option<TelemetryRecord>, RepositoryError> {
        Ok(self
            .rows
            .read()
            .get(vehicle_id)
            .and_then(|series| series.last_key_value())
            .map(|(_, record)| record.clone()))
    }

    async fn get_by_time_range(
        &self,
        vehicle_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<TelemetryRecord>, RepositoryError> {
        if start > end {
            return Ok(Vec::new());
        }
        Ok(self
            .rows
            .read()
            .get(vehicle_id)
            .map(|series| series.range(start..=end).map(|(_, r)| r.clone()).collect())
            .unwrap_or_default())
    }

    async fn get_aggregated(
        &self,
        vehicle_id: &str,
        interval: Duration,
    ) -> Result<Vec<AggregatedTelemetry>, RepositoryError> {
        let rows = self.rows.read();
        let Some(series) = rows.get(vehicle_id) else {
            return Ok(Vec::new());
        };
        aggregate(vehicle_id, series.values(), interval).map_err(|e| RepositoryError::QueryFailed {
            message: e.to_string(),
        })
    }
}

// =============================================================================
// Cache
// =============================================================================

#[derive(Debug, Clone)]
struct CacheEntry {
    record: TelemetryRecord,
    expires_at: Instant,
}

/// In-memory implementation of `TelemetryCachePort` with per-entry expiry.
///
/// Expired entries read as missing and are dropped lazily on access.
#[derive(Debug, Default)]
pub struct InMemoryTelemetryCache {
    entries: RwLock<HashMap<String, CacheEntry>>,
}

impl InMemoryTelemetryCache {
    /// Create a new empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of entries, including expired ones not yet purged.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Check if the cache is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Drop every expired entry.
    pub fn purge_expired(&self) {
        let now = Instant::now();
        self.entries.write().retain(|_, e| e.expires_at > now);
    }
}

#[async_trait]
impl TelemetryCachePort for InMemoryTelemetryCache {
    async fn get(&self, key: &str) -> Result<Option<TelemetryRecord>, CacheError> {
        let now = Instant::now();
        {
            let entries = self.entries.read();
            match entries.get(key) {
                None => return Ok(None),
                Some(entry) if entry.expires_at > now => return Ok(Some(entry.record.clone())),
                Some(_) => {}
            }
        }
        self.entries.write().remove(key);
        Ok(None)
    }

    async fn set(
        &self,
        key: &str,
        record: &TelemetryRecord,
        ttl: Duration,
    ) -> Result<(), CacheError> {
        let expires_at = Instant::now()
            .checked_add(ttl)
            .unwrap_or_else(|| Instant::now() + Duration::from_secs(86_400 * 365));
        self.entries.write().insert(
            key.to_string(),
            CacheEntry {
                record: record.clone(),
                expires_at,
            },
        );
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        self.entries.write().remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    #[tokio::test]
    async fn store_and_get_latest() {
        let repo = InMemoryTelemetryRepository::new();
        repo.store(&TelemetryRecord::new("car-1", at(10), 20.0))
            .await
            .unwrap();
        repo.store(&TelemetryRecord::new("car-1", at(5), 10.0))
            .await
            .unwrap();

        let latest = repo.get_latest("car-1").await.unwrap().unwrap();
        assert_eq!(latest.timestamp, at(10));
        assert_eq!(repo.len(), 2);
    }

    #[tokio::test]
    async fn get_latest_unknown_vehicle() {
        let repo = InMemoryTelemetryRepository::new();
        assert!(repo.get_latest("ghost").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn same_time_and_vehicle_overwrites() {
        let repo = InMemoryTelemetryRepository::new();
        repo.store(&TelemetryRecord::new("car-1", at(0), 1.0))
            .await
            .unwrap();
        repo.store(&TelemetryRecord::new("car-1", at(0), 2.0))
            .await
            .unwrap();

        assert_eq!(repo.len(), 1);
        let latest = repo.get_latest("car-1").await.unwrap().unwrap();
        assert!((latest.speed - 2.0).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn store_batch_and_range_query() {
        let repo = InMemoryTelemetryRepository::new();
        let batch: Vec<_> = (0..10)
            .map(|i| TelemetryRecord::new("car-1", at(i), f64::from(u8::try_from(i).unwrap())))
            .chain(std::iter::once(TelemetryRecord::new("car-2", at(3), 99.0)))
            .collect();
        repo.store_batch(&batch).await.unwrap();

        let range = repo.get_by_time_range("car-1", at(2), at(5)).await.unwrap();
        let times: Vec<_> = range.iter().map(|r| r.timestamp).collect();
        assert_eq!(times, vec![at(2), at(3), at(4), at(5)]);
        assert_eq!(repo.vehicle_count(), 2);
    }

    #[tokio::test]
    async fn inverted_range_is_empty() {
        let repo = InMemoryTelemetryRepository::new();
        repo.store(&TelemetryRecord::new("car-1", at(3), 1.0))
            .await
            .unwrap();
        assert!(repo
            .get_by_time_range("car-1", at(5), at(0))
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn aggregated_buckets_are_ordered() {
        let repo = InMemoryTelemetryRepository::new();
        for (secs, speed) in [(0, 10.0), (30, 20.0), (60, 40.0), (61, 60.0)] {
            repo.store(&TelemetryRecord::new("car-1", at(secs), speed))
                .await
                .unwrap();
        }

        let buckets = repo
            .get_aggregated("car-1", Duration::from_secs(60))
            .await
            .unwrap();

        assert!(buckets.windows(2).all(|w| w[0].bucket_start < w[1].bucket_start));
        let total: usize = buckets.iter().map(|b| b.sample_count).sum();
        assert_eq!(total, 4);
    }

    #[tokio::test]
    async fn aggregated_rejects_zero_interval() {
        let repo = InMemoryTelemetryRepository::new();
        repo.store(&TelemetryRecord::new("car-1", at(0), 1.0))
            .await
            .unwrap();
        let err = repo.get_aggregated("car-1", Duration::ZERO).await.unwrap_err();
        assert!(matches!(err, RepositoryError::QueryFailed { .. }));
    }

    #[tokio::test]
    async fn row_cap_drops_oldest_samples() {
        let repo = InMemoryTelemetryRepository::with_retention(RetentionPolicy {
            max_age: Duration::from_secs(3600),
            max_rows_per_vehicle: 3,
        });
        for secs in 0..10 {
            repo.store(&TelemetryRecord::new("car-1", at(secs), 1.0))
                .await
                .unwrap();
        }
        repo.store(&TelemetryRecord::new("car-2", at(0), 1.0))
            .await
            .unwrap();

        assert_eq!(repo.len(), 4);
        let kept: Vec<_> = repo
            .get_by_time_range("car-1", at(0), at(100))
            .await
            .unwrap()
            .iter()
            .map(|r| r.timestamp)
            .collect();
        assert_eq!(kept, vec![at(7), at(8), at(9)]);
    }

    #[tokio::test]
    async fn window_is_measured_from_newest_sample() {
        let repo = InMemoryTelemetryRepository::with_retention(RetentionPolicy {
            max_age: Duration::from_secs(10),
            max_rows_per_vehicle: 1_000,
        });
        for secs in [0, 5, 10, 15, 20] {
            repo.store(&TelemetryRecord::new("car-1", at(secs), 1.0))
                .await
                .unwrap();
        }

        let kept: Vec<_> = repo
            .get_by_time_range("car-1", at(0), at(100))
            .await
            .unwrap()
            .iter()
            .map(|r| r.timestamp)
            .collect();
        assert_eq!(kept, vec![at(10), at(15), at(20)]);

        // A late sample already outside the window is not retained.
        repo.store(&TelemetryRecord::new("car-1", at(2), 1.0))
            .await
            .unwrap();
        assert_eq!(repo.len(), 3);
    }

    #[tokio::test]
    async fn batch_writes_are_bounded() {
        let repo = InMemoryTelemetryRepository::with_retention(RetentionPolicy {
            max_age: Duration::from_secs(3600),
            max_rows_per_vehicle: 5,
        });
        let batch: Vec<_> = (0..50)
            .map(|i| TelemetryRecord::new("car-1", at(i), 1.0))
            .collect();
        repo.store_batch(&batch).await.unwrap();

        assert_eq!(repo.len(), 5);
        let latest = repo.get_latest("car-1").await.unwrap().unwrap();
        assert_eq!(latest.timestamp, at(49));
    }

    #[test]
    fn default_retention() {
        let repo = InMemoryTelemetryRepository::new();
        assert_eq!(repo.retention(), RetentionPolicy::default());
        assert_eq!(repo.retention().max_rows_per_vehicle, DEFAULT_RETENTION_MAX_ROWS);
    }

    #[tokio::test]
    async fn cache_set_get_delete() {
        let cache = InMemoryTelemetryCache::new();
        let record = TelemetryRecord::new("car-1", at(0), 1.0);

        cache
            .set("telemetry:latest:car-1", &record, Duration::from_secs(600))
            .await
            .unwrap();
        assert_eq!(
            cache.get("telemetry:latest:car-1").await.unwrap(),
            Some(record)
        );

        cache.delete("telemetry:latest:car-1").await.unwrap();
        assert!(cache.get("telemetry:latest:car-1").await.unwrap().is_none());
        cache.delete("telemetry:latest:car-1").await.unwrap();
    }

    #[tokio::test]
    async fn cache_entry_expires() {
        let cache = InMemoryTelemetryCache::new();
        let record = TelemetryRecord::new("car-1", at(0), 1.0);
        cache
            .set("k", &record, Duration::from_millis(10))
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(30)).await;

        assert!(cache.get("k").await.unwrap().is_none());
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn purge_drops_only_expired() {
        let cache = InMemoryTelemetryCache::new();
        let record = TelemetryRecord::new("car-1", at(0), 1.0);
        cache.set("short", &record, Duration::ZERO).await.unwrap();
        cache
            .set("long", &record, Duration::from_secs(60))
            .await
            .unwrap();

        cache.purge_expired();

        assert_eq!(cache.len(), 1);
        assert!(cache.get("long").await.unwrap().is_some());
    }
}
