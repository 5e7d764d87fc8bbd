//! Transport implementations for femlib.
//!
//! This crate provides concrete implementations of the
//! [`Transport`](femlib_core::Transport) trait for the three ways of
//! reaching the bus, plus the relay daemon:
//!
//! - [`GatewayTransport`]: the Ethernet-to-bus gateway, over TCP or UDP,
//!   using the 36-byte gateway envelope; on TCP the gateway returns
//!   replies on a connection it opens to a locally bound listener
//! - [`DirectTransport`]: the bus adapter's UDP socket, using the compact
//!   16-byte envelope
//! - [`RelayServer`]: shares one gateway connection among several
//!   clients, answering each on its own connection; relay clients use
//!   [`GatewayTransport::connect_relay`]
//!
//! [`TransportConfig`] and [`connect`] select among them at runtime.
//!
//! # Example
//!
//! ```no_run
//! use femlib_transport::{connect, TransportConfig};
//! use femlib_core::Frame;
//! use std::time::Duration;
//!
//! # async fn example() -> femlib_core::Result<()> {
//! let config = TransportConfig::Gateway {
//!     addr: "192.168.1.1:2000".into(),
//!     node_id: 0x13,
//! };
//! let mut transport = connect(&config).await?;
//! transport.send(&Frame::request(0x06800)).await?;
//! let reply = transport.recv(Duration::from_millis(500)).await?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod direct;
pub mod gateway;
pub mod relay;

pub use config::{connect, TransportConfig};
pub use direct::DirectTransport;
pub use gateway::GatewayTransport;
pub use relay::RelayServer;

/// Shared bounds for `drain()` across transports: read until the bus goes
/// quiet for a moment or the frame budget is spent, whichever comes first.
pub(crate) mod drain_budget {
    use std::time::Duration;

    pub const MAX_FRAMES: usize = 32;
    pub const PER_FRAME: Duration = Duration::from_millis(5);
}
