//! Liveness Probe
//!
//! One task per observer that periodically asks the hub to probe its
//! connection. The task ends once the hub reports the connection gone, or
//! when shutdown is requested.

use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::SharedBroadcastHub;
use crate::domain::observer::ObserverId;

/// Configuration for liveness probing.
#[derive(Debug, Clone, Copy)]
pub struct LivenessConfig {
    /// Interval between probes.
    pub probe_interval: Duration,
}

impl Default for LivenessConfig {
    fn default() -> Self {
        Self {
            probe_interval: Duration::from_secs(5),
        }
    }
}

/// Periodic prober for a single observer.
pub struct LivenessProbe {
    config: LivenessConfig,
    hub: SharedBroadcastHub,
    observer_id: ObserverId,
    cancel: CancellationToken,
}

impl LivenessProbe {
    /// Create a prober for `observer_id`.
    #[must_use]
    pub const fn new(
        config: LivenessConfig,
        hub: SharedBroadcastHub,
        observer_id: ObserverId,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            config,
            hub,
            observer_id,
            cancel,
        }
    }

    /// Spawn the probe loop on the current runtime.
    #[must_use]
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    /// Run the probe loop until the connection is gone or cancelled.
    pub async fn run(self) {
        let mut interval = tokio::time::interval(self.config.probe_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        // First tick completes immediately; the connection was just admitted.
        interval.tick().await;

        loop {
            tokio::select! {
                () = self.cancel.cancelled() => {
                    tracing::debug!(observer_id = %self.observer_id, "Liveness probe cancelled");
                    break;
                }
                _ = interval.tick() => {
                    if !self.hub.probe(self.observer_id).await {
                        tracing::debug!(observer_id = %self.observer_id, "Liveness probe stopped");
                        break;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::Ordering;

    use super::*;
    use crate::infrastructure::broadcast::tests::{Behavior, TestSink};
    use crate::infrastructure::broadcast::{BroadcastHub, HubConfig};

    fn hub() -> SharedBroadcastHub {
        Arc::new(BroadcastHub::new(HubConfig {
            write_timeout: Duration::from_millis(50),
            probe_timeout: Duration::from_millis(50),
        }))
    }

    fn fast() -> LivenessConfig {
        LivenessConfig {
            probe_interval: Duration::from_millis(20),
        }
    }

    #[test]
    fn default_interval_is_five_seconds() {
        assert_eq!(
            LivenessConfig::default().probe_interval,
            Duration::from_secs(5)
        );
    }

    #[tokio::test]
    async fn probes_healthy_observer_until_cancelled() {
        let hub = hub();
        let (sink, seen) = TestSink::new(Behavior::Accept);
        let id = hub.register(sink).await;
        let cancel = CancellationToken::new();

        let task = LivenessProbe::new(fast(), Arc::clone(&hub), id, cancel.clone()).spawn();
        tokio::time::sleep(Duration::from_millis(120)).await;
        cancel.cancel();
        task.await.unwrap();

        assert!(seen.probes.load(Ordering::SeqCst) >= 2);
        assert!(hub.contains(id).await);
    }

    #[tokio::test]
    async fn stops_and_evicts_when_probe_fails() {
        let hub = hub();
        let (sink, seen) = TestSink::new(Behavior::Fail);
        let id = hub.register(sink).await;

        let task = LivenessProbe::new(fast(), Arc::clone(&hub), id, CancellationToken::new()).spawn();
        tokio::time::timeout(Duration::from_secs(2), task)
            .await
            .unwrap()
            .unwrap();

        assert!(!hub.contains(id).await);
        assert_eq!(seen.closes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn stops_when_observer_unregistered() {
        let hub = hub();
        let (sink, _) = TestSink::new(Behavior::Accept);
        let id = hub.register(sink).await;

        let task = LivenessProbe::new(fast(), Arc::clone(&hub), id, CancellationToken::new()).spawn();
        hub.unregister(id).await;

        tokio::time::timeout(Duration::from_secs(2), task)
            .await
            .unwrap()
            .unwrap();
    }
}
