//! Asynchronous cartridge event types.
//!
//! Events are emitted by the cartridge controller through a
//! [`tokio::sync::broadcast`] channel after every mutating operation.
//! Telemetry collectors and dashboards subscribe to these events instead
//! of polling the controller.

use crate::types::StateSnapshot;

/// An event emitted by a cartridge controller when its state changes.
///
/// Delivery is best-effort through a bounded broadcast channel; slow
/// consumers may miss events during long procedures that publish on every
/// ramp step.
#[derive(Debug, Clone)]
pub enum CartridgeEvent {
    /// A fresh state snapshot after a mutating operation.
    StateUpdated {
        /// The publishing controller's name (e.g. "band6").
        source: String,
        /// Flattened tuning state.
        snapshot: StateSnapshot,
    },

    /// The PLL transitioned into lock.
    Locked {
        /// LO frequency in GHz.
        lo_ghz: f64,
        /// Coarse count the lock was found at.
        yto_coarse: u16,
    },

    /// The PLL lost lock or a search failed.
    LockLost {
        /// Human-readable reason.
        reason: String,
    },

    /// The thermal interlock tripped and the cartridge was zeroed.
    ThermalShutdown {
        /// Index of the sensor that read out of range.
        sensor: u8,
        /// The out-of-range reading in kelvin.
        temperature_k: f32,
    },

    /// Cartridge power state changed.
    PowerChanged {
        /// `true` if the power distribution module is now enabled.
        enabled: bool,
    },
}
