//! Shared helpers for the in-crate controller tests.

use std::sync::Arc;
use std::time::Duration;

use femlib_core::RetryPolicy;
use femlib_test_harness::{InstantClock, MockCartridge, SharedMockCartridge};

use crate::bands::CartridgeModel;
use crate::builder::CartridgeBuilder;
use crate::controller::CartridgeController;

/// Build a controller over a shared mock cartridge, with an instant clock
/// and no retry backoff so long procedures run in test time.
pub(crate) async fn controller(
    model: CartridgeModel,
    mock: MockCartridge,
) -> (CartridgeController, SharedMockCartridge) {
    let shared = SharedMockCartridge::new(mock);
    let controller = CartridgeBuilder::new(model)
        .timeout(Duration::from_millis(50))
        .retry(RetryPolicy {
            max_attempts: 3,
            backoff: Duration::ZERO,
        })
        .clock(Arc::new(InstantClock::new()))
        .build(Box::new(shared.clone()))
        .await
        .expect("controller build against mock");
    (controller, shared)
}
