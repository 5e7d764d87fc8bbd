//! Test harness for femlib: mock transports and a simulated cartridge.
//!
//! - [`MockTransport`]: scripted request/reply pairs for exact-exchange
//!   tests of the protocol engine
//! - [`MockCartridge`]: a stateful register-map device for whole tuning
//!   sequences, where exchange order is an outcome rather than a script
//! - [`InstantClock`]: a [`Clock`](femlib_core::Clock) whose sleeps
//!   return immediately, so dwell-paced procedures run instantly

pub mod clock;
pub mod mock_cartridge;
pub mod mock_transport;

pub use clock::InstantClock;
pub use mock_cartridge::{MockCartridge, SharedMockCartridge};
pub use mock_transport::MockTransport;
