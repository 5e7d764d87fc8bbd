//! Transport trait for bus communication.
//!
//! The [`Transport`] trait abstracts over the physical link to the
//! monitor/control bus. Implementations exist for a direct bus-adapter
//! socket, an Ethernet gateway (TCP or UDP), a relay daemon client, and
//! mock transports for testing.
//!
//! The trait is frame-granular rather than byte-granular: the bus is
//! datagram-oriented, so each variant's wire envelope is encoded and
//! decoded inside the transport. The request/reply engine above this
//! layer only ever sees [`Frame`]s.

use async_trait::async_trait;
use std::time::Duration;

use crate::error::Result;
use crate::types::Frame;

#[async_trait]
pub trait Transport: Send + Sync {
    /// Send one frame to the bus.
    ///
    /// Implementations should block until the frame has been handed to the
    /// underlying socket.
    async fn send(&mut self, frame: &Frame) -> Result<()>;

    /// Receive the next frame from the bus.
    ///
    /// Waits up to `timeout`; returns
    /// [`Error::Timeout`](crate::error::Error::Timeout) if nothing arrives
    /// within the deadline.
    async fn recv(&mut self, timeout: Duration) -> Result<Frame>;

    /// Discard any buffered inbound traffic.
    ///
    /// Called before every send so that a reply cannot be confused with a
    /// leftover packet from concurrent bus chatter. Errors are swallowed;
    /// draining a dead connection is reported by the subsequent send.
    async fn drain(&mut self);

    /// Close the transport connection.
    ///
    /// After calling `close()`, subsequent `send()` and `recv()` calls
    /// should return [`Error::NotConnected`](crate::error::Error::NotConnected).
    async fn close(&mut self) -> Result<()>;

    /// Check whether the transport is currently connected.
    fn is_connected(&self) -> bool;
}
