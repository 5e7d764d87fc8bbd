//! femlib-cartridge: The receiver cartridge tuning state machine.
//!
//! A [`CartridgeController`] drives one cryogenic receiver cartridge over
//! the monitor/control bus: PLL lock acquisition and FM trim, verified
//! SIS bias and magnet ramps with per-mixer calibration, the PA drain
//! servo, thermal interlocking, and the deflux maintenance procedures.
//! Band-specific numbers live in a [`CartridgeModel`]; time and telemetry
//! are injected, so the same procedures run in production and under the
//! instant-clock test harness.
//!
//! # Example
//!
//! ```no_run
//! # async fn demo() -> femlib_core::Result<()> {
//! use femlib_cartridge::{bands, CartridgeBuilder};
//! use femlib_transport::GatewayTransport;
//!
//! let transport = GatewayTransport::connect_tcp("192.168.1.100:2000", 0x13).await?;
//! let mut cartridge = CartridgeBuilder::new(bands::band6())
//!     .build(Box::new(transport))
//!     .await?;
//!
//! cartridge.power(true).await?;
//! cartridge.tune(230.538, 0.0, false).await?;
//! println!("locked: {}", cartridge.state().is_locked());
//! # Ok(())
//! # }
//! ```

pub mod bands;
mod bias;
pub mod builder;
pub mod controller;
mod lock;
mod maintenance;
pub mod tables;

#[cfg(test)]
pub(crate) mod testutil;

pub use bands::{BandTables, CartridgeModel};
pub use builder::CartridgeBuilder;
pub use controller::CartridgeController;
pub use tables::FreqTable;
