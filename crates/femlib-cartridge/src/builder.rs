//! Controller construction.

use std::sync::Arc;
use std::time::Duration;

use femlib_core::{
    Clock, LockSide, NullTelemetry, Result, RetryPolicy, SimulationPolicy, Telemetry, TokioClock,
    Transport, TuningState,
};
use femlib_proto::{Engine, DEFAULT_TIMEOUT};

use crate::bands::CartridgeModel;
use crate::controller::CartridgeController;

/// Builder for a [`CartridgeController`].
///
/// Everything except the band model has a production default: the tokio
/// timer, no telemetry, no simulation, and the standard exchange timeout
/// and retry budget.
///
/// # Example
///
/// ```no_run
/// # async fn demo() -> femlib_core::Result<()> {
/// use femlib_cartridge::{bands, CartridgeBuilder};
///
/// let transport = femlib_transport::DirectTransport::connect("192.168.1.100:2000", 0x13).await?;
/// let mut cartridge = CartridgeBuilder::new(bands::band6())
///     .build(Box::new(transport))
///     .await?;
/// cartridge.tune(230.538, 0.0, false).await?;
/// # Ok(())
/// # }
/// ```
pub struct CartridgeBuilder {
    model: CartridgeModel,
    timeout: Duration,
    retry: RetryPolicy,
    clock: Arc<dyn Clock>,
    telemetry: Arc<dyn Telemetry>,
    simulation: SimulationPolicy,
}

impl CartridgeBuilder {
    /// Start a builder for the given band.
    pub fn new(model: CartridgeModel) -> Self {
        CartridgeBuilder {
            model,
            timeout: DEFAULT_TIMEOUT,
            retry: RetryPolicy::default(),
            clock: Arc::new(TokioClock),
            telemetry: Arc::new(NullTelemetry),
            simulation: SimulationPolicy::none(),
        }
    }

    /// Per-exchange reply timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Retry budget for controls and reply matching.
    pub fn retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Replace the clock the tuning procedures pace themselves with.
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Attach a telemetry sink.
    pub fn telemetry(mut self, telemetry: Arc<dyn Telemetry>) -> Self {
        self.telemetry = telemetry;
        self
    }

    /// Mark subsystems as simulated.
    pub fn simulation(mut self, simulation: SimulationPolicy) -> Self {
        self.simulation = simulation;
        self
    }

    /// Build the controller over the given transport and take an initial
    /// state reading.
    pub async fn build(self, transport: Box<dyn Transport>) -> Result<CartridgeController> {
        let engine = Engine::with_policy(transport, self.timeout, self.retry);
        let mut controller = CartridgeController {
            engine,
            model: self.model,
            state: TuningState::cleared(),
            clock: self.clock,
            telemetry: self.telemetry,
            simulation: self.simulation,
            lock_side: LockSide::Below,
        };
        controller.update_state().await?;
        Ok(controller)
    }
}
