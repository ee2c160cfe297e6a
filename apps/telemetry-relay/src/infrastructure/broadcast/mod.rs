//! Broadcast Hub
//!
//! Owns every live observer connection and fans each inbound payload out to
//! all of them.
//!
//! # Architecture
//!
//! One async mutex guards the registry. It is held for membership changes
//! and for the whole iterate-and-write of a broadcast or probe, so every
//! write to a connection is serialized and arrival order is preserved per
//! observer. Writes within one broadcast run concurrently, each under its own
//! deadline; a connection that errors or misses the deadline is evicted and
//! closed while delivery to the rest continues.
//!
//! Transports plug in through [`ObserverSink`]. The hub never buffers: a
//! sink that blocks holds the lock until its deadline fires. Connections
//! evicted by one broadcast are closed together, so k stalled observers cost
//! one write deadline plus one close deadline, not k of them.
//!
//! Every connection carries a session token. Whatever removes a connection
//! (eviction, unregister, shutdown) cancels it, so the task serving the
//! connection learns it is gone even when the peer stays silent.

mod liveness;

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use bytes::Bytes;
use futures::future::join_all;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

pub use liveness::{LivenessConfig, LivenessProbe};

use super::metrics::{self, EvictionReason};
use crate::domain::observer::{ObserverId, ObserverLifecycle, ObserverState};

// =============================================================================
// Observer Sink
// =============================================================================

/// Outbound transport failure.
#[derive(Debug, Clone, thiserror::Error)]
pub enum SinkError {
    /// Peer already went away.
    #[error("observer connection closed")]
    Closed,

    /// Transport rejected the write.
    #[error("observer transport error: {0}")]
    Transport(String),
}

/// Outbound half of one observer connection.
#[async_trait]
pub trait ObserverSink: Send {
    /// Deliver one payload.
    async fn send_payload(&mut self, payload: Bytes) -> Result<(), SinkError>;

    /// Send a liveness probe.
    async fn send_probe(&mut self) -> Result<(), SinkError>;

    /// Close the outbound side.
    async fn close(&mut self) -> Result<(), SinkError>;
}

// =============================================================================
// Hub
// =============================================================================

/// Write deadlines applied by the hub.
#[derive(Debug, Clone, Copy)]
pub struct HubConfig {
    /// Deadline for one payload write.
    pub write_timeout: Duration,
    /// Deadline for one liveness probe.
    pub probe_timeout: Duration,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            write_timeout: Duration::from_secs(5),
            probe_timeout: Duration::from_secs(5),
        }
    }
}

/// Result of one broadcast.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    /// Connections that accepted the payload.
    pub delivered: usize,
    /// Connections evicted during this broadcast.
    pub evicted: usize,
}

/// Hub counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HubStats {
    /// Currently registered connections.
    pub registered: usize,
    /// Payload writes that succeeded since start.
    pub delivered_total: u64,
    /// Connections evicted since start.
    pub evicted_total: u64,
}

struct ObserverEntry {
    lifecycle: ObserverLifecycle,
    sink: Box<dyn ObserverSink>,
    session: CancellationToken,
}

/// Registry of live observers.
pub struct BroadcastHub {
    config: HubConfig,
    observers: Mutex<HashMap<ObserverId, ObserverEntry>>,
    delivered_total: AtomicU64,
    evicted_total: AtomicU64,
}

/// Shared broadcast hub reference.
pub type SharedBroadcastHub = Arc<BroadcastHub>;

impl BroadcastHub {
    /// Create an empty hub.
    #[must_use]
    pub fn new(config: HubConfig) -> Self {
        Self {
            config,
            observers: Mutex::new(HashMap::new()),
            delivered_total: AtomicU64::new(0),
            evicted_total: AtomicU64::new(0),
        }
    }

    /// Create an empty hub with default deadlines.
    #[must_use]
    pub fn with_defaults() -> Self {
        Self::new(HubConfig::default())
    }

    /// Deadlines in effect.
    #[must_use]
    pub const fn config(&self) -> HubConfig {
        self.config
    }

    /// Admit a freshly upgraded connection.
    pub async fn register<S>(&self, sink: S) -> ObserverId
    where
        S: ObserverSink + 'static,
    {
        self.register_session(sink, CancellationToken::new()).await
    }

    /// Admit a connection tied to `session`.
    ///
    /// The hub cancels `session` when it removes the connection for any
    /// reason.
    pub async fn register_session<S>(&self, sink: S, session: CancellationToken) -> ObserverId
    where
        S: ObserverSink + 'static,
    {
        let id = ObserverId::new();
        let mut lifecycle = ObserverLifecycle::connecting(id);
        let registered = lifecycle.transition(ObserverState::Registered);
        debug_assert!(registered.is_ok());

        let mut observers = self.observers.lock().await;
        observers.insert(
            id,
            ObserverEntry {
                lifecycle,
                sink: Box::new(sink),
                session,
            },
        );
        metrics::set_observers(observers.len());
        tracing::info!(observer_id = %id, observers = observers.len(), "Observer registered");

        id
    }

    /// Remove a connection and close its sink.
    ///
    /// Returns `false` when `id` was not registered.
    pub async fn unregister(&self, id: ObserverId) -> bool {
        let mut observers = self.observers.lock().await;
        let Some(entry) = observers.remove(&id) else {
            return false;
        };
        metrics::set_observers(observers.len());
        self.close_entry(entry).await;
        tracing::info!(observer_id = %id, observers = observers.len(), "Observer unregistered");

        true
    }

    /// Write `payload` to every registered connection.
    pub async fn broadcast(&self, payload: Bytes) -> BroadcastReport {
        let started = Instant::now();
        let write_timeout = self.config.write_timeout;
        let mut observers = self.observers.lock().await;

        let writes = observers.iter_mut().map(|(id, entry)| {
            let payload = payload.clone();
            async move {
                let failure =
                    match tokio::time::timeout(write_timeout, entry.sink.send_payload(payload))
                        .await
                    {
                        Ok(Ok(())) => {
                            entry.lifecycle.touch();
                            None
                        }
                        Ok(Err(e)) => {
                            tracing::debug!(observer_id = %id, error = %e, "Observer write failed");
                            Some(EvictionReason::WriteFailed)
                        }
                        Err(_) => Some(EvictionReason::WriteTimeout),
                    };
                (*id, failure)
            }
        });
        let outcomes = join_all(writes).await;

        let mut report = BroadcastReport::default();
        let mut evicted = Vec::new();
        for (id, failure) in outcomes {
            match failure {
                None => report.delivered += 1,
                Some(reason) => evicted.extend(self.detach(&mut observers, id, reason)),
            }
        }
        report.evicted = evicted.len();
        if report.evicted > 0 {
            metrics::set_observers(observers.len());
            self.close_entries(evicted).await;
        }
        drop(observers);

        self.delivered_total
            .fetch_add(report.delivered as u64, Ordering::Relaxed);
        metrics::record_broadcast_duration(started.elapsed());

        report
    }

    /// Send one liveness probe to `id`.
    ///
    /// Returns `true` while the connection is alive. A failed or late probe
    /// evicts the connection; a missing id also reads as `false`.
    pub async fn probe(&self, id: ObserverId) -> bool {
        let mut observers = self.observers.lock().await;
        let Some(entry) = observers.get_mut(&id) else {
            return false;
        };

        let failure =
            match tokio::time::timeout(self.config.probe_timeout, entry.sink.send_probe()).await {
                Ok(Ok(())) => {
                    entry.lifecycle.touch();
                    None
                }
                Ok(Err(e)) => {
                    tracing::debug!(observer_id = %id, error = %e, "Observer probe failed");
                    Some(EvictionReason::ProbeFailed)
                }
                Err(_) => Some(EvictionReason::ProbeTimeout),
            };

        match failure {
            None => true,
            Some(reason) => {
                let evicted = self.detach(&mut observers, id, reason);
                metrics::set_observers(observers.len());
                self.close_entries(evicted).await;
                false
            }
        }
    }

    /// Close and remove every connection.
    pub async fn close_all(&self) {
        let mut observers = self.observers.lock().await;
        let entries: Vec<_> = observers.drain().map(|(_, entry)| entry).collect();
        let count = entries.len();
        self.close_entries(entries).await;
        metrics::set_observers(0);
        if count > 0 {
            tracing::info!(observers = count, "Closed all observers");
        }
    }

    /// Whether `id` is currently registered.
    pub async fn contains(&self, id: ObserverId) -> bool {
        self.observers.lock().await.contains_key(&id)
    }

    /// Current counters.
    pub async fn stats(&self) -> HubStats {
        let registered = self.observers.lock().await.len();
        HubStats {
            registered,
            delivered_total: self.delivered_total.load(Ordering::Relaxed),
            evicted_total: self.evicted_total.load(Ordering::Relaxed),
        }
    }

    /// Remove an evicted connection from the registry without closing it.
    fn detach(
        &self,
        observers: &mut HashMap<ObserverId, ObserverEntry>,
        id: ObserverId,
        reason: EvictionReason,
    ) -> Option<ObserverEntry> {
        let entry = observers.remove(&id)?;
        self.evicted_total.fetch_add(1, Ordering::Relaxed);
        metrics::record_eviction(reason);
        tracing::warn!(
            observer_id = %id,
            reason = reason.as_str(),
            observers = observers.len(),
            "Observer evicted"
        );
        Some(entry)
    }

    async fn close_entries<I>(&self, entries: I)
    where
        I: IntoIterator<Item = ObserverEntry>,
    {
        join_all(entries.into_iter().map(|entry| self.close_entry(entry))).await;
    }

    /// Drive an entry through `Closing` to `Removed`.
    async fn close_entry(&self, mut entry: ObserverEntry) {
        let id = entry.lifecycle.id();
        entry.session.cancel();
        if let Err(e) = entry.lifecycle.transition(ObserverState::Closing) {
            tracing::debug!(observer_id = %id, error = %e, "Unexpected observer state");
        }

        match tokio::time::timeout(self.config.write_timeout, entry.sink.close()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::debug!(observer_id = %id, error = %e, "Observer close failed"),
            Err(_) => tracing::debug!(observer_id = %id, "Observer close timed out"),
        }

        if let Err(e) = entry.lifecycle.transition(ObserverState::Removed) {
            tracing::debug!(observer_id = %id, error = %e, "Unexpected observer state");
        }
    }
}

impl std::fmt::Debug for BroadcastHub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BroadcastHub")
            .field("config", &self.config)
            .field("delivered_total", &self.delivered_total)
            .field("evicted_total", &self.evicted_total)
            .finish_non_exhaustive()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
pub(crate) mod tests {
    use std::sync::atomic::AtomicUsize;

    use parking_lot::Mutex as SyncMutex;

    use super::*;

    /// How a test sink answers writes.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub(crate) enum Behavior {
        Accept,
        Fail,
        /// Writes never complete; close succeeds.
        Hang,
        /// Writes and close never complete.
        Stall,
    }

    /// Observable state of a test sink, shared with the test body.
    #[derive(Debug, Default)]
    pub(crate) struct SinkLog {
        pub payloads: SyncMutex<Vec<Bytes>>,
        pub probes: AtomicUsize,
        pub closes: AtomicUsize,
    }

    pub(crate) struct TestSink {
        behavior: Behavior,
        seen: Arc<SinkLog>,
    }

    impl TestSink {
        pub(crate) fn new(behavior: Behavior) -> (Self, Arc<SinkLog>) {
            let seen = Arc::new(SinkLog::default());
            (
                Self {
                    behavior,
                    seen: Arc::clone(&seen),
                },
                seen,
            )
        }

        async fn answer(&self) -> Result<(), SinkError> {
            match self.behavior {
                Behavior::Accept => Ok(()),
                Behavior::Fail => Err(SinkError::Transport("broken pipe".to_string())),
                Behavior::Hang | Behavior::Stall => std::future::pending().await,
            }
        }
    }

    #[async_trait]
    impl ObserverSink for TestSink {
        async fn send_payload(&mut self, payload: Bytes) -> Result<(), SinkError> {
            self.answer().await?;
            self.seen.payloads.lock().push(payload);
            Ok(())
        }

        async fn send_probe(&mut self) -> Result<(), SinkError> {
            self.answer().await?;
            self.seen.probes.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn close(&mut self) -> Result<(), SinkError> {
            self.seen.closes.fetch_add(1, Ordering::SeqCst);
            if self.behavior == Behavior::Stall {
                std::future::pending::<()>().await;
            }
            Ok(())
        }
    }

    fn fast_hub() -> BroadcastHub {
        BroadcastHub::new(HubConfig {
            write_timeout: Duration::from_millis(50),
            probe_timeout: Duration::from_millis(50),
        })
    }

    #[tokio::test]
    async fn broadcast_with_no_observers() {
        let hub = fast_hub();
        let report = hub.broadcast(Bytes::from_static(b"x")).await;
        assert_eq!(report, BroadcastReport::default());
    }

    #[tokio::test]
    async fn every_observer_receives_payload_once() {
        let hub = fast_hub();
        let mut seen = Vec::new();
        for _ in 0..3 {
            let (sink, probe) = TestSink::new(Behavior::Accept);
            hub.register(sink).await;
            seen.push(probe);
        }

        let report = hub.broadcast(Bytes::from_static(b"{\"Speed\":1}")).await;
        assert_eq!(report.delivered, 3);
        assert_eq!(report.evicted, 0);
        for probe in seen {
            assert_eq!(
                probe.payloads.lock().as_slice(),
                &[Bytes::from_static(b"{\"Speed\":1}")]
            );
        }
    }

    #[tokio::test]
    async fn failing_observer_is_evicted_others_still_receive() {
        let hub = fast_hub();
        let (good_a, seen_a) = TestSink::new(Behavior::Accept);
        let (bad, seen_bad) = TestSink::new(Behavior::Fail);
        let (good_b, seen_b) = TestSink::new(Behavior::Accept);
        hub.register(good_a).await;
        let bad_id = hub.register(bad).await;
        hub.register(good_b).await;

        let report = hub.broadcast(Bytes::from_static(b"p")).await;

        assert_eq!(report, BroadcastReport { delivered: 2, evicted: 1 });
        assert!(!hub.contains(bad_id).await);
        assert_eq!(seen_bad.closes.load(Ordering::SeqCst), 1);
        assert_eq!(seen_a.payloads.lock().len(), 1);
        assert_eq!(seen_b.payloads.lock().len(), 1);

        let stats = hub.stats().await;
        assert_eq!(stats.registered, 2);
        assert_eq!(stats.evicted_total, 1);
        assert_eq!(stats.delivered_total, 2);
    }

    #[tokio::test]
    async fn hung_observer_is_evicted_after_deadline() {
        let hub = fast_hub();
        let (good, seen_good) = TestSink::new(Behavior::Accept);
        let (stuck, _) = TestSink::new(Behavior::Hang);
        hub.register(good).await;
        let stuck_id = hub.register(stuck).await;

        let started = Instant::now();
        let report = hub.broadcast(Bytes::from_static(b"p")).await;

        assert!(started.elapsed() < Duration::from_secs(2));
        assert_eq!(report, BroadcastReport { delivered: 1, evicted: 1 });
        assert!(!hub.contains(stuck_id).await);
        assert_eq!(seen_good.payloads.lock().len(), 1);
    }

    #[tokio::test]
    async fn stalled_observers_are_closed_together() {
        let hub = fast_hub();
        let (good, seen_good) = TestSink::new(Behavior::Accept);
        hub.register(good).await;
        let mut stalled = Vec::new();
        for _ in 0..8 {
            let (sink, seen) = TestSink::new(Behavior::Stall);
            hub.register(sink).await;
            stalled.push(seen);
        }

        let started = Instant::now();
        let report = hub.broadcast(Bytes::from_static(b"p")).await;
        let elapsed = started.elapsed();

        // One write deadline plus one close deadline; closing one by one
        // would take nine deadlines.
        assert!(elapsed < Duration::from_millis(300), "took {elapsed:?}");
        assert_eq!(report, BroadcastReport { delivered: 1, evicted: 8 });
        assert_eq!(seen_good.payloads.lock().len(), 1);
        for seen in stalled {
            assert_eq!(seen.closes.load(Ordering::SeqCst), 1);
        }
        assert_eq!(hub.stats().await.registered, 1);
    }

    #[tokio::test]
    async fn failed_write_cancels_session() {
        let hub = fast_hub();
        let session = CancellationToken::new();
        let (bad, _) = TestSink::new(Behavior::Fail);
        hub.register_session(bad, session.clone()).await;

        hub.broadcast(Bytes::from_static(b"p")).await;

        assert!(session.is_cancelled());
    }

    #[tokio::test]
    async fn failed_ping_cancels_session() {
        let hub = fast_hub();
        let session = CancellationToken::new();
        let (stuck, _) = TestSink::new(Behavior::Hang);
        let id = hub.register_session(stuck, session.clone()).await;

        assert!(!hub.probe(id).await);
        assert!(session.is_cancelled());
    }

    #[tokio::test]
    async fn healthy_session_survives_broadcast() {
        let hub = fast_hub();
        let session = CancellationToken::new();
        let (sink, _) = TestSink::new(Behavior::Accept);
        let id = hub.register_session(sink, session.clone()).await;

        hub.broadcast(Bytes::from_static(b"p")).await;
        assert!(hub.probe(id).await);
        assert!(!session.is_cancelled());

        assert!(hub.unregister(id).await);
        assert!(session.is_cancelled());
    }

    #[tokio::test]
    async fn close_all_cancels_every_session() {
        let hub = fast_hub();
        let sessions: Vec<_> = (0..3).map(|_| CancellationToken::new()).collect();
        for session in &sessions {
            let (sink, _) = TestSink::new(Behavior::Stall);
            hub.register_session(sink, session.clone()).await;
        }

        let started = Instant::now();
        hub.close_all().await;

        assert!(started.elapsed() < Duration::from_millis(200));
        assert!(sessions.iter().all(CancellationToken::is_cancelled));
    }

    #[tokio::test]
    async fn evicted_observer_gets_nothing_further() {
        let hub = fast_hub();
        let (bad, seen_bad) = TestSink::new(Behavior::Fail);
        hub.register(bad).await;

        hub.broadcast(Bytes::from_static(b"1")).await;
        let report = hub.broadcast(Bytes::from_static(b"2")).await;

        assert_eq!(report, BroadcastReport::default());
        assert!(seen_bad.payloads.lock().is_empty());
        assert_eq!(seen_bad.closes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn payloads_arrive_in_broadcast_order() {
        let hub = fast_hub();
        let (sink, seen) = TestSink::new(Behavior::Accept);
        hub.register(sink).await;

        for i in 0..10_u8 {
            hub.broadcast(Bytes::from(vec![i])).await;
        }

        let got: Vec<u8> = seen.payloads.lock().iter().map(|b| b[0]).collect();
        assert_eq!(got, (0..10).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn unregister_is_idempotent() {
        let hub = fast_hub();
        let (sink, seen) = TestSink::new(Behavior::Accept);
        let id = hub.register(sink).await;

        assert!(hub.unregister(id).await);
        assert!(!hub.unregister(id).await);
        assert_eq!(seen.closes.load(Ordering::SeqCst), 1);
        assert_eq!(hub.stats().await.registered, 0);
        assert_eq!(hub.stats().await.evicted_total, 0);
    }

    #[tokio::test]
    async fn probe_keeps_healthy_observer() {
        let hub = fast_hub();
        let (sink, seen) = TestSink::new(Behavior::Accept);
        let id = hub.register(sink).await;

        assert!(hub.probe(id).await);
        assert!(hub.contains(id).await);
        assert_eq!(seen.probes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn failed_probe_evicts() {
        let hub = fast_hub();
        let (sink, seen) = TestSink::new(Behavior::Hang);
        let id = hub.register(sink).await;

        assert!(!hub.probe(id).await);
        assert!(!hub.contains(id).await);
        assert_eq!(seen.closes.load(Ordering::SeqCst), 1);
        assert_eq!(hub.stats().await.evicted_total, 1);
    }

    #[tokio::test]
    async fn probe_of_unknown_observer_is_false() {
        let hub = fast_hub();
        assert!(!hub.probe(ObserverId::new()).await);
    }

    #[tokio::test]
    async fn close_all_empties_registry() {
        let hub = fast_hub();
        let (a, seen_a) = TestSink::new(Behavior::Accept);
        let (b, seen_b) = TestSink::new(Behavior::Accept);
        hub.register(a).await;
        hub.register(b).await;

        hub.close_all().await;

        assert_eq!(hub.stats().await.registered, 0);
        assert_eq!(seen_a.closes.load(Ordering::SeqCst), 1);
        assert_eq!(seen_b.closes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn concurrent_register_and_broadcast() {
        let hub = Arc::new(fast_hub());
        let mut tasks = Vec::new();
        for _ in 0..16 {
            let hub = Arc::clone(&hub);
            tasks.push(tokio::spawn(async move {
                let (sink, _) = TestSink::new(Behavior::Accept);
                let id = hub.register(sink).await;
                hub.broadcast(Bytes::from_static(b"x")).await;
                hub.unregister(id).await
            }));
        }
        for task in tasks {
            assert!(task.await.unwrap());
        }
        assert_eq!(hub.stats().await.registered, 0);
    }
}
