//! An instant clock for tests.

use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use femlib_core::Clock;

/// A [`Clock`] whose sleeps return immediately while recording the total
/// duration requested. Tuning procedures that pace themselves with dwell
/// times run instantly under test, and assertions can still check how long
/// the procedure would have waited on hardware.
#[derive(Debug, Clone, Default)]
pub struct InstantClock {
    slept_ms: Arc<AtomicU64>,
}

impl InstantClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total time requested across all sleeps so far.
    pub fn slept(&self) -> Duration {
        Duration::from_millis(self.slept_ms.load(Ordering::Relaxed))
    }
}

#[async_trait]
impl Clock for InstantClock {
    async fn sleep(&self, duration: Duration) {
        self.slept_ms
            .fetch_add(duration.as_millis() as u64, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn sleeps_are_instant_and_recorded() {
        let clock = InstantClock::new();
        clock.sleep(Duration::from_millis(100)).await;
        clock.sleep(Duration::from_millis(200)).await;
        assert_eq!(clock.slept(), Duration::from_millis(300));
    }
}
