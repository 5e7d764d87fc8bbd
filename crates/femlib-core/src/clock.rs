//! Injected time and telemetry boundaries.
//!
//! The cartridge controller never calls `tokio::time::sleep` or a pub/sub
//! system directly. It is handed a [`Clock`] and a [`Telemetry`] at
//! construction, so the same procedures run under a blocking loop, a
//! cooperative scheduler, or a test that wants sleeps to return instantly.
//! Long procedures (demagnetize, mixer heating, lock search) are built
//! from many short `clock.sleep()` awaits, so an external executor cancels
//! them simply by not resuming the future.

use async_trait::async_trait;
use std::time::Duration;
use tokio::sync::broadcast;

use crate::events::CartridgeEvent;
use crate::types::StateSnapshot;

/// Suspension-point provider for the controller's procedures.
#[async_trait]
pub trait Clock: Send + Sync {
    /// Suspend for (approximately) the given duration.
    async fn sleep(&self, duration: Duration);
}

/// The production clock: defers to the tokio timer.
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioClock;

#[async_trait]
impl Clock for TokioClock {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Side-effect sink for state publication.
///
/// Called by the controller after every mutating operation. Implementations
/// must not block; the broadcast-backed implementation drops events when no
/// receiver is listening.
pub trait Telemetry: Send + Sync {
    /// Publish a state snapshot under the given source name.
    fn publish(&self, source: &str, snapshot: &StateSnapshot);

    /// Publish a discrete event (lock transitions, thermal shutdown).
    fn event(&self, event: CartridgeEvent);
}

/// Telemetry over a [`tokio::sync::broadcast`] channel.
pub struct BroadcastTelemetry {
    tx: broadcast::Sender<CartridgeEvent>,
}

impl BroadcastTelemetry {
    /// Create a broadcast telemetry sink with the given channel capacity.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        BroadcastTelemetry { tx }
    }

    /// Subscribe to the event stream.
    pub fn subscribe(&self) -> broadcast::Receiver<CartridgeEvent> {
        self.tx.subscribe()
    }
}

impl Telemetry for BroadcastTelemetry {
    fn publish(&self, source: &str, snapshot: &StateSnapshot) {
        // Send fails only when there are no subscribers; that is fine.
        let _ = self.tx.send(CartridgeEvent::StateUpdated {
            source: source.to_string(),
            snapshot: snapshot.clone(),
        });
    }

    fn event(&self, event: CartridgeEvent) {
        let _ = self.tx.send(event);
    }
}

/// Telemetry that discards everything. Useful for tools that only care
/// about the final result of an operation.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullTelemetry;

impl Telemetry for NullTelemetry {
    fn publish(&self, _source: &str, _snapshot: &StateSnapshot) {}
    fn event(&self, _event: CartridgeEvent) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TuningState;

    #[tokio::test]
    async fn tokio_clock_sleeps() {
        tokio::time::pause();
        let clock = TokioClock;
        let start = tokio::time::Instant::now();
        clock.sleep(Duration::from_millis(50)).await;
        assert!(start.elapsed() >= Duration::from_millis(50));
    }

    #[test]
    fn broadcast_telemetry_delivers() {
        let telemetry = BroadcastTelemetry::new(16);
        let mut rx = telemetry.subscribe();

        let snap = TuningState::cleared().snapshot();
        telemetry.publish("band6", &snap);

        match rx.try_recv().unwrap() {
            CartridgeEvent::StateUpdated { source, snapshot } => {
                assert_eq!(source, "band6");
                assert_eq!(snapshot.get("lo_ghz"), Some(0.0));
            }
            other => panic!("expected StateUpdated, got {other:?}"),
        }
    }

    #[test]
    fn broadcast_telemetry_without_subscribers_is_silent() {
        let telemetry = BroadcastTelemetry::new(4);
        let snap = TuningState::cleared().snapshot();
        // Must not panic or error with zero receivers.
        telemetry.publish("band3", &snap);
        telemetry.event(CartridgeEvent::PowerChanged { enabled: true });
    }

    #[test]
    fn null_telemetry_is_a_no_op() {
        let telemetry = NullTelemetry;
        telemetry.publish("band7", &TuningState::cleared().snapshot());
        telemetry.event(CartridgeEvent::LockLost {
            reason: "test".into(),
        });
    }
}
