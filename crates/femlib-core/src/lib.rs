//! femlib-core: Core traits, types, and error definitions for femlib.
//!
//! This crate defines the hardware-agnostic abstractions shared by all
//! femlib crates. Higher layers (the protocol engine, the transports, and
//! the cartridge controller) depend on these types without pulling in any
//! specific wire format or socket backend.
//!
//! # Key types
//!
//! - [`Transport`] -- frame-level communication channel to the bus
//! - [`Frame`] -- one addressed monitor/control exchange unit
//! - [`TuningState`] -- the controller's explicit tuning record
//! - [`Clock`] / [`Telemetry`] -- injected suspension and publish boundaries
//! - [`Error`] / [`Result`] -- error handling

pub mod clock;
pub mod error;
pub mod events;
pub mod helpers;
pub mod transport;
pub mod types;

// Re-export key types at crate root for ergonomic `use femlib_core::*`.
pub use clock::{BroadcastTelemetry, Clock, NullTelemetry, Telemetry, TokioClock};
pub use error::{Error, Result};
pub use events::CartridgeEvent;
pub use helpers::{format_lo_ghz, interp};
pub use transport::Transport;
pub use types::*;
