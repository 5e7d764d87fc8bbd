//! Direct bus-adapter transport.
//!
//! This module provides [`DirectTransport`], which implements the
//! [`Transport`] trait over the bus adapter's UDP socket. Each datagram
//! carries one 16-byte direct envelope (see [`femlib_proto::frame`]); the
//! adapter puts the frame on the bus verbatim and forwards every bus frame
//! back as a datagram.
//!
//! The bus is shared, so the socket sees traffic addressed to every node.
//! The transport filters on its configured node id and discards the rest
//! at `trace` level.
//!
//! # Example
//!
//! ```no_run
//! use femlib_transport::DirectTransport;
//! use femlib_core::{Frame, Transport};
//! use std::time::Duration;
//!
//! # async fn example() -> femlib_core::Result<()> {
//! let mut transport = DirectTransport::connect("192.168.1.2:2000", 0x13).await?;
//! transport.send(&Frame::request(0x06812)).await?;
//! let reply = transport.recv(Duration::from_millis(500)).await?;
//! # Ok(())
//! # }
//! ```

use async_trait::async_trait;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::UdpSocket;

use femlib_core::{Error, Frame, Result, Transport};
use femlib_proto::frame::{decode_direct, encode_direct, DIRECT_ENVELOPE_LEN};

use crate::drain_budget;

/// Direct UDP transport to a bus adapter.
///
/// The socket is connected to the adapter address so `send`/`recv` need no
/// per-call destination, and stray datagrams from other hosts are rejected
/// by the kernel.
#[derive(Debug)]
pub struct DirectTransport {
    /// The underlying socket, `None` after `close()`.
    socket: Option<UdpSocket>,
    /// The adapter address, for logging.
    addr: String,
    /// Bus node this transport talks to.
    node_id: u8,
}

impl DirectTransport {
    /// Bind an ephemeral local port and connect it to the adapter.
    pub async fn connect(addr: &str, node_id: u8) -> Result<Self> {
        tracing::debug!(addr = %addr, node_id, "Connecting direct transport");

        let socket = UdpSocket::bind("0.0.0.0:0").await.map_err(Error::Io)?;
        socket.connect(addr).await.map_err(|e| {
            tracing::error!(addr = %addr, error = %e, "Failed to connect UDP socket");
            Error::Io(e)
        })?;

        tracing::info!(addr = %addr, node_id, "Direct transport connected");

        Ok(Self {
            socket: Some(socket),
            addr: addr.to_string(),
            node_id,
        })
    }

    /// The adapter address this transport was connected to.
    pub fn addr(&self) -> &str {
        &self.addr
    }

    /// The local address of the bound socket.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        let socket = self.socket.as_ref().ok_or(Error::NotConnected)?;
        socket.local_addr().map_err(Error::Io)
    }
}

#[async_trait]
impl Transport for DirectTransport {
    async fn send(&mut self, frame: &Frame) -> Result<()> {
        let socket = self.socket.as_ref().ok_or(Error::NotConnected)?;
        let bytes = encode_direct(self.node_id, frame);

        tracing::trace!(addr = %self.addr, frame = %frame, "Sending frame");

        socket.send(&bytes).await.map_err(|e| {
            tracing::error!(addr = %self.addr, error = %e, "Failed to send datagram");
            Error::Io(e)
        })?;
        Ok(())
    }

    async fn recv(&mut self, timeout: Duration) -> Result<Frame> {
        let socket = self.socket.as_ref().ok_or(Error::NotConnected)?;
        let deadline = tokio::time::Instant::now() + timeout;
        let mut buf = [0u8; 256];

        loop {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            if remaining.is_zero() {
                return Err(Error::Timeout);
            }

            let n = match tokio::time::timeout(remaining, socket.recv(&mut buf)).await {
                Ok(Ok(n)) => n,
                Ok(Err(e)) => {
                    tracing::error!(addr = %self.addr, error = %e, "Failed to receive datagram");
                    return Err(Error::Io(e));
                }
                Err(_) => return Err(Error::Timeout),
            };

            if n < DIRECT_ENVELOPE_LEN {
                tracing::trace!(addr = %self.addr, bytes = n, "Discarding short datagram");
                continue;
            }
            let (node, frame) = match decode_direct(&buf[..DIRECT_ENVELOPE_LEN]) {
                Ok(decoded) => decoded,
                Err(e) => {
                    tracing::trace!(addr = %self.addr, error = %e, "Discarding undecodable datagram");
                    continue;
                }
            };
            if node != self.node_id {
                tracing::trace!(
                    addr = %self.addr,
                    node,
                    want = self.node_id,
                    "Discarding frame for other node"
                );
                continue;
            }
            tracing::trace!(addr = %self.addr, frame = %frame, "Received frame");
            return Ok(frame);
        }
    }

    async fn drain(&mut self) {
        let Some(socket) = self.socket.as_ref() else {
            return;
        };
        let mut buf = [0u8; 256];
        for _ in 0..drain_budget::MAX_FRAMES {
            match tokio::time::timeout(drain_budget::PER_FRAME, socket.recv(&mut buf)).await {
                Ok(Ok(n)) => {
                    tracing::trace!(addr = %self.addr, bytes = n, "Drained stale datagram");
                }
                _ => break,
            }
        }
    }

    async fn close(&mut self) -> Result<()> {
        if self.socket.take().is_some() {
            tracing::info!(addr = %self.addr, "Direct transport closed");
        }
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.socket.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use femlib_proto::frame::encode_direct;

    /// Helper: bind a UDP socket standing in for the bus adapter.
    async fn adapter() -> (UdpSocket, String) {
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let addr = socket.local_addr().unwrap().to_string();
        (socket, addr)
    }

    #[tokio::test]
    async fn send_and_receive_roundtrip() {
        let (adapter, addr) = adapter().await;

        let server = tokio::spawn(async move {
            let mut buf = [0u8; 256];
            let (n, src) = adapter.recv_from(&mut buf).await.unwrap();
            // Echo the envelope back unchanged.
            adapter.send_to(&buf[..n], src).await.unwrap();
        });

        let mut transport = DirectTransport::connect(&addr, 0x13).await.unwrap();
        assert!(transport.is_connected());

        let frame = Frame::new(0x06812, &[0x07, 0xFF]).unwrap();
        transport.send(&frame).await.unwrap();
        let echoed = transport.recv(Duration::from_secs(2)).await.unwrap();
        assert_eq!(echoed, frame);

        transport.close().await.unwrap();
        server.await.unwrap();
    }

    #[tokio::test]
    async fn frames_for_other_nodes_are_filtered() {
        let (adapter, addr) = adapter().await;

        let server = tokio::spawn(async move {
            let mut buf = [0u8; 256];
            let (_, src) = adapter.recv_from(&mut buf).await.unwrap();
            // Chatter for node 0x20, then the frame for node 0x13.
            let other = encode_direct(0x20, &Frame::new(0x1, &[0xAA]).unwrap());
            adapter.send_to(&other, src).await.unwrap();
            let ours = encode_direct(0x13, &Frame::new(0x06812, &[0x01, 0x02]).unwrap());
            adapter.send_to(&ours, src).await.unwrap();
        });

        let mut transport = DirectTransport::connect(&addr, 0x13).await.unwrap();
        transport.send(&Frame::request(0x06812)).await.unwrap();

        let frame = transport.recv(Duration::from_secs(2)).await.unwrap();
        assert_eq!(frame.rca(), 0x06812);
        assert_eq!(frame.data(), &[0x01, 0x02]);

        transport.close().await.unwrap();
        server.await.unwrap();
    }

    #[tokio::test]
    async fn recv_timeout() {
        let (_adapter, addr) = adapter().await;
        let mut transport = DirectTransport::connect(&addr, 0).await.unwrap();
        let result = transport.recv(Duration::from_millis(50)).await;
        assert!(matches!(result, Err(Error::Timeout)));
    }

    #[tokio::test]
    async fn operations_after_close_return_not_connected() {
        let (_adapter, addr) = adapter().await;
        let mut transport = DirectTransport::connect(&addr, 0).await.unwrap();
        transport.close().await.unwrap();
        assert!(!transport.is_connected());

        assert!(matches!(
            transport.send(&Frame::request(0x1)).await,
            Err(Error::NotConnected)
        ));
        assert!(matches!(
            transport.recv(Duration::from_millis(10)).await,
            Err(Error::NotConnected)
        ));
        // Closing again is a no-op.
        transport.close().await.unwrap();
    }

    #[tokio::test]
    async fn drain_discards_stale_traffic() {
        let (adapter, addr) = adapter().await;
        let mut transport = DirectTransport::connect(&addr, 0x13).await.unwrap();
        let client_addr = transport.local_addr().unwrap();

        for i in 0..3u8 {
            let stale = encode_direct(0x13, &Frame::new(0x1, &[i]).unwrap());
            adapter.send_to(&stale, client_addr).await.unwrap();
        }
        // Let the datagrams land before draining.
        tokio::time::sleep(Duration::from_millis(50)).await;

        transport.drain().await;
        let result = transport.recv(Duration::from_millis(50)).await;
        assert!(matches!(result, Err(Error::Timeout)));
    }
}
