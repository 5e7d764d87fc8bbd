//! # femlib -- Receiver Cartridge Monitor and Control
//!
//! `femlib` is an asynchronous Rust library for monitoring and controlling
//! cryogenic receiver cartridges over their CAN-style monitor/control bus.
//! It covers the wire protocol (typed monitor and control points, write
//! verification, device status decoding), the socket transports that carry
//! it, and the tuning state machine that locks the first LO and biases the
//! SIS mixers.
//!
//! ## Quick Start
//!
//! Add `femlib` to your `Cargo.toml`:
//!
//! ```toml
//! [dependencies]
//! femlib = "0.1"
//! tokio = { version = "1", features = ["full"] }
//! ```
//!
//! Connect through an Ethernet/CAN gateway and tune band 6:
//!
//! ```no_run
//! use femlib::cartridge::{bands, CartridgeBuilder};
//! use femlib::transport::GatewayTransport;
//!
//! #[tokio::main]
//! async fn main() -> femlib::Result<()> {
//!     let transport = GatewayTransport::connect_tcp("192.168.1.100:2000", 0x13).await?;
//!     let mut cartridge = CartridgeBuilder::new(bands::band6())
//!         .build(Box::new(transport))
//!         .await?;
//!
//!     cartridge.power(true).await?;
//!     cartridge.tune(230.538, 0.0, false).await?;
//!     println!("locked: {}", cartridge.state().is_locked());
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! The library is organized as a workspace of focused crates:
//!
//! | Crate                 | Purpose                                          |
//! |-----------------------|--------------------------------------------------|
//! | `femlib-core`         | [`Transport`] trait, [`Frame`], state, errors    |
//! | `femlib-proto`        | RCA addressing, request/reply engine, commands   |
//! | `femlib-transport`    | Gateway TCP/UDP, direct UDP, and relay transports|
//! | `femlib-cartridge`    | Lock search, bias ramps, servo, safety procedures|
//! | `femlib-test-harness` | Mock transports and a simulated cartridge        |
//! | **`femlib`**          | This facade crate -- re-exports everything       |
//!
//! Everything above the sockets is written against the frame-level
//! [`Transport`] trait, so the same engine and tuning procedures run over
//! a gateway, a direct adapter, a relay, or the test harness's simulated
//! cartridge.
//!
//! ## Telemetry
//!
//! The cartridge controller publishes a [`StateSnapshot`] after every
//! mutating operation and emits discrete [`CartridgeEvent`]s (lock
//! transitions, thermal shutdown, power changes) through a broadcast
//! channel:
//!
//! ```no_run
//! use femlib::{BroadcastTelemetry, CartridgeEvent};
//! # fn example() {
//! let telemetry = std::sync::Arc::new(BroadcastTelemetry::new(64));
//! let mut events = telemetry.subscribe();
//! tokio::spawn(async move {
//!     while let Ok(event) = events.recv().await {
//!         if let CartridgeEvent::Locked { lo_ghz, yto_coarse } = event {
//!             println!("locked at {lo_ghz} GHz (coarse {yto_coarse})");
//!         }
//!     }
//! });
//! # }
//! ```

pub use femlib_core::*;

/// RCA addressing, the request/reply engine, and the typed command set.
pub mod proto {
    pub use femlib_proto::*;
}

/// Socket transports: gateway TCP/UDP, direct UDP, and the fan-out relay.
pub mod transport {
    pub use femlib_transport::*;
}

/// The cartridge tuning state machine and band models.
pub mod cartridge {
    pub use femlib_cartridge::*;
}

/// The band models this library ships tables for.
///
/// Sites with other cartridges build a
/// [`CartridgeModel`](cartridge::CartridgeModel) from their own tables.
pub fn supported_bands() -> Vec<cartridge::CartridgeModel> {
    vec![
        cartridge::bands::band3(),
        cartridge::bands::band6(),
        cartridge::bands::band7(),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn supported_bands_are_distinct() {
        let bands = supported_bands();
        assert_eq!(bands.len(), 3);
        let numbers: Vec<u8> = bands.iter().map(|b| b.band).collect();
        assert_eq!(numbers, vec![3, 6, 7]);
    }
}
