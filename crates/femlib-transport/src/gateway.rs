//! Ethernet gateway transport.
//!
//! This module provides [`GatewayTransport`], which implements the
//! [`Transport`] trait through the Ethernet-to-bus gateway. The gateway
//! speaks fixed 36-byte envelopes (see [`femlib_proto::frame`]) over
//! either TCP or UDP; both carry identical bytes, so one transport covers
//! both with an inner socket enum.
//!
//! The TCP wiring is asymmetric: commands go out on a stream the client
//! opens to the gateway, but replies come back on a connection the
//! *gateway* opens to the control computer's reply port (2001 unless the
//! gateway is configured otherwise). [`connect_tcp`] therefore binds a
//! reply listener before dialing out, and the reply connection is
//! accepted on the first `recv`. On both streams the envelope size
//! doubles as the framing: the transport reads exactly 36 bytes per
//! frame, so a short read means the stream is out of sync and the
//! connection is surfaced as lost.
//!
//! The relay daemon (see [`crate::relay`]) answers each client on the
//! client's own connection instead, so relay clients use
//! [`connect_relay`], which reads replies off the command stream.
//!
//! [`connect_tcp`]: GatewayTransport::connect_tcp
//! [`connect_relay`]: GatewayTransport::connect_relay
//!
//! # Example
//!
//! ```no_run
//! use femlib_transport::GatewayTransport;
//! use femlib_core::{Frame, Transport};
//! use std::time::Duration;
//!
//! # async fn example() -> femlib_core::Result<()> {
//! let mut transport = GatewayTransport::connect_tcp("192.168.1.1:2000", 0x13).await?;
//! transport.send(&Frame::request(0x06800)).await?;
//! let reply = transport.recv(Duration::from_millis(500)).await?;
//! # Ok(())
//! # }
//! ```

use async_trait::async_trait;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream, UdpSocket};

use femlib_core::{Error, Frame, Result, Transport};
use femlib_proto::frame::{decode_gateway, encode_gateway, GATEWAY_ENVELOPE_LEN};

use crate::drain_budget;

/// Default connection timeout (5 seconds).
///
/// Generous enough for an observatory LAN, short enough that a dead
/// gateway does not hang a tuning sequence.
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Where the gateway delivers TCP replies: the gateway firmware connects
/// back to this port on the control computer.
pub const DEFAULT_REPLY_ADDR: &str = "0.0.0.0:2001";

#[derive(Debug)]
enum GatewaySocket {
    /// Direct-to-gateway TCP: commands out on `commands`, replies in on
    /// the connection the gateway opens to `listener`.
    Tcp {
        commands: TcpStream,
        listener: TcpListener,
        replies: Option<TcpStream>,
    },
    /// Relay-client TCP: the relay answers on the same stream.
    Relay(TcpStream),
    Udp(UdpSocket),
}

/// Gateway transport over TCP or UDP.
#[derive(Debug)]
pub struct GatewayTransport {
    /// The underlying socket, `None` after `close()`.
    socket: Option<GatewaySocket>,
    /// The gateway address, for logging.
    addr: String,
    /// Bus node this transport talks to.
    node_id: u8,
}

impl GatewayTransport {
    /// Connect to the gateway over TCP.
    ///
    /// Binds the reply listener at [`DEFAULT_REPLY_ADDR`], then opens the
    /// command stream. The gateway's reply connection is accepted on the
    /// first `recv`.
    pub async fn connect_tcp(addr: &str, node_id: u8) -> Result<Self> {
        Self::connect_tcp_with_options(addr, node_id, DEFAULT_REPLY_ADDR, DEFAULT_CONNECT_TIMEOUT)
            .await
    }

    /// Connect to the gateway over TCP with an explicit reply-listener
    /// address and connect timeout.
    pub async fn connect_tcp_with_options(
        addr: &str,
        node_id: u8,
        reply_addr: &str,
        timeout: Duration,
    ) -> Result<Self> {
        tracing::debug!(
            addr = %addr,
            reply_addr = %reply_addr,
            node_id,
            timeout_ms = timeout.as_millis(),
            "Connecting to gateway"
        );

        // Bind before dialing out: the gateway may connect back the
        // moment it accepts the command stream.
        let listener = TcpListener::bind(reply_addr).await.map_err(|e| {
            tracing::error!(reply_addr = %reply_addr, error = %e, "Failed to bind reply listener");
            Error::Io(e)
        })?;

        let commands = Self::dial(addr, timeout).await?;

        let local = listener.local_addr().map_err(Error::Io)?;
        tracing::info!(
            addr = %addr,
            reply_addr = %local,
            node_id,
            "Gateway connection established"
        );

        Ok(Self {
            socket: Some(GatewaySocket::Tcp {
                commands,
                listener,
                replies: None,
            }),
            addr: addr.to_string(),
            node_id,
        })
    }

    /// Connect to a [`crate::RelayServer`] with the default timeout.
    ///
    /// The relay writes replies back on this same stream, so no reply
    /// listener is bound.
    pub async fn connect_relay(addr: &str, node_id: u8) -> Result<Self> {
        tracing::debug!(addr = %addr, node_id, "Connecting to relay");
        let stream = Self::dial(addr, DEFAULT_CONNECT_TIMEOUT).await?;
        tracing::info!(addr = %addr, node_id, "Relay connection established");
        Ok(Self {
            socket: Some(GatewaySocket::Relay(stream)),
            addr: addr.to_string(),
            node_id,
        })
    }

    /// Connect to the gateway's UDP service.
    pub async fn connect_udp(addr: &str, node_id: u8) -> Result<Self> {
        tracing::debug!(addr = %addr, node_id, "Connecting to gateway over UDP");

        let socket = UdpSocket::bind("0.0.0.0:0").await.map_err(Error::Io)?;
        socket.connect(addr).await.map_err(|e| {
            tracing::error!(addr = %addr, error = %e, "Failed to connect UDP socket");
            Error::Io(e)
        })?;

        tracing::info!(addr = %addr, node_id, "Gateway UDP socket connected");

        Ok(Self {
            socket: Some(GatewaySocket::Udp(socket)),
            addr: addr.to_string(),
            node_id,
        })
    }

    /// The gateway address this transport was connected to.
    pub fn addr(&self) -> &str {
        &self.addr
    }

    /// The bound reply-listener address, if this is a direct TCP
    /// connection.
    pub fn reply_addr(&self) -> Option<SocketAddr> {
        match self.socket.as_ref()? {
            GatewaySocket::Tcp { listener, .. } => listener.local_addr().ok(),
            _ => None,
        }
    }

    /// Open the command stream with a timeout and set TCP_NODELAY.
    async fn dial(addr: &str, timeout: Duration) -> Result<TcpStream> {
        let stream = tokio::time::timeout(timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| {
                tracing::error!(addr = %addr, "Gateway connection timed out");
                Error::Timeout
            })?
            .map_err(|e| {
                tracing::error!(addr = %addr, error = %e, "Gateway connection failed");
                map_connect_error(e, addr)
            })?;

        // Exchanges are single small frames; latency matters more than
        // throughput.
        if let Err(e) = stream.set_nodelay(true) {
            tracing::warn!(addr = %addr, error = %e, "Failed to set TCP_NODELAY (continuing anyway)");
        }
        Ok(stream)
    }

    /// Read one raw envelope, respecting `deadline`.
    async fn recv_envelope(
        socket: &mut GatewaySocket,
        addr: &str,
        deadline: tokio::time::Instant,
    ) -> Result<[u8; GATEWAY_ENVELOPE_LEN]> {
        match socket {
            GatewaySocket::Tcp {
                listener, replies, ..
            } => {
                let stream = match replies {
                    Some(stream) => stream,
                    None => {
                        let accepted = Self::accept_reply(listener, addr, deadline).await?;
                        replies.insert(accepted)
                    }
                };
                let result = read_stream_envelope(stream, addr, deadline).await;
                if matches!(result, Err(Error::ConnectionLost)) {
                    // A rebooting gateway reconnects; accept it next time.
                    *replies = None;
                }
                result
            }
            GatewaySocket::Relay(stream) => read_stream_envelope(stream, addr, deadline).await,
            GatewaySocket::Udp(socket) => {
                let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
                if remaining.is_zero() {
                    return Err(Error::Timeout);
                }
                let mut buf = [0u8; GATEWAY_ENVELOPE_LEN];
                let mut dgram = [0u8; 256];
                match tokio::time::timeout(remaining, socket.recv(&mut dgram)).await {
                    Ok(Ok(n)) if n >= GATEWAY_ENVELOPE_LEN => {
                        buf.copy_from_slice(&dgram[..GATEWAY_ENVELOPE_LEN]);
                        Ok(buf)
                    }
                    Ok(Ok(n)) => {
                        tracing::trace!(addr = %addr, bytes = n, "Short gateway datagram");
                        Err(Error::Protocol(format!(
                            "short gateway datagram: {n} of {GATEWAY_ENVELOPE_LEN} bytes"
                        )))
                    }
                    Ok(Err(e)) => {
                        tracing::error!(addr = %addr, error = %e, "Failed to receive datagram");
                        Err(Error::Io(e))
                    }
                    Err(_) => Err(Error::Timeout),
                }
            }
        }
    }

    /// Accept the gateway's reply connection, respecting `deadline`.
    async fn accept_reply(
        listener: &TcpListener,
        addr: &str,
        deadline: tokio::time::Instant,
    ) -> Result<TcpStream> {
        let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
        if remaining.is_zero() {
            return Err(Error::Timeout);
        }
        match tokio::time::timeout(remaining, listener.accept()).await {
            Ok(Ok((stream, peer))) => {
                tracing::info!(addr = %addr, peer = %peer, "Gateway reply connection accepted");
                if let Err(e) = stream.set_nodelay(true) {
                    tracing::warn!(peer = %peer, error = %e, "Failed to set TCP_NODELAY (continuing anyway)");
                }
                Ok(stream)
            }
            Ok(Err(e)) => {
                tracing::error!(addr = %addr, error = %e, "Reply accept failed");
                Err(Error::Io(e))
            }
            Err(_) => {
                tracing::debug!(addr = %addr, "No reply connection from gateway before deadline");
                Err(Error::Timeout)
            }
        }
    }
}

#[async_trait]
impl Transport for GatewayTransport {
    async fn send(&mut self, frame: &Frame) -> Result<()> {
        let socket = self.socket.as_mut().ok_or(Error::NotConnected)?;
        let bytes = encode_gateway(self.node_id, frame);

        tracing::trace!(addr = %self.addr, frame = %frame, "Sending frame");

        match socket {
            GatewaySocket::Tcp { commands, .. } => {
                commands.write_all(&bytes).await.map_err(|e| {
                    tracing::error!(addr = %self.addr, error = %e, "Failed to send frame");
                    map_io_error(e)
                })?;
                commands.flush().await.map_err(map_io_error)?;
            }
            GatewaySocket::Relay(stream) => {
                stream.write_all(&bytes).await.map_err(|e| {
                    tracing::error!(addr = %self.addr, error = %e, "Failed to send frame");
                    map_io_error(e)
                })?;
                stream.flush().await.map_err(map_io_error)?;
            }
            GatewaySocket::Udp(socket) => {
                socket.send(&bytes).await.map_err(|e| {
                    tracing::error!(addr = %self.addr, error = %e, "Failed to send datagram");
                    Error::Io(e)
                })?;
            }
        }
        Ok(())
    }

    async fn recv(&mut self, timeout: Duration) -> Result<Frame> {
        let socket = self.socket.as_mut().ok_or(Error::NotConnected)?;
        let deadline = tokio::time::Instant::now() + timeout;

        loop {
            let buf = Self::recv_envelope(socket, &self.addr, deadline).await?;
            let (node, frame) = match decode_gateway(&buf) {
                Ok(decoded) => decoded,
                Err(e) => {
                    tracing::trace!(addr = %self.addr, error = %e, "Discarding undecodable envelope");
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
        let Some(socket) = self.socket.as_mut() else {
            return;
        };
        // Before the gateway's reply connection exists there is nothing
        // to drain, and a full accept inside the drain budget would eat
        // the first real reply's time.
        if matches!(
            socket,
            GatewaySocket::Tcp { replies: None, .. }
        ) {
            return;
        }
        for _ in 0..drain_budget::MAX_FRAMES {
            let deadline = tokio::time::Instant::now() + drain_budget::PER_FRAME;
            match Self::recv_envelope(socket, &self.addr, deadline).await {
                Ok(_) => {
                    tracing::trace!(addr = %self.addr, "Drained stale envelope");
                }
                Err(_) => break,
            }
        }
    }

    async fn close(&mut self) -> Result<()> {
        if let Some(socket) = self.socket.take() {
            tracing::debug!(addr = %self.addr, "Closing gateway transport");
            let streams = match socket {
                GatewaySocket::Tcp {
                    commands, replies, ..
                } => {
                    let mut streams = vec![commands];
                    streams.extend(replies);
                    streams
                }
                GatewaySocket::Relay(stream) => vec![stream],
                GatewaySocket::Udp(_) => Vec::new(),
            };
            for mut stream in streams {
                if let Err(e) = stream.shutdown().await {
                    tracing::warn!(
                        addr = %self.addr,
                        error = %e,
                        "Failed to shutdown TCP stream (continuing anyway)"
                    );
                }
            }
            tracing::info!(addr = %self.addr, "Gateway transport closed");
        }
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.socket.is_some()
    }
}

impl Drop for GatewayTransport {
    fn drop(&mut self) {
        if self.socket.is_some() {
            tracing::debug!(addr = %self.addr, "GatewayTransport dropped, closing connection");
        }
    }
}

/// Read one fixed-size envelope off a TCP stream, respecting `deadline`.
async fn read_stream_envelope(
    stream: &mut TcpStream,
    addr: &str,
    deadline: tokio::time::Instant,
) -> Result<[u8; GATEWAY_ENVELOPE_LEN]> {
    let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
    if remaining.is_zero() {
        return Err(Error::Timeout);
    }
    let mut buf = [0u8; GATEWAY_ENVELOPE_LEN];
    match tokio::time::timeout(remaining, stream.read_exact(&mut buf)).await {
        Ok(Ok(_)) => Ok(buf),
        Ok(Err(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
            tracing::warn!(addr = %addr, "Gateway closed connection mid-frame");
            Err(Error::ConnectionLost)
        }
        Ok(Err(e)) => {
            tracing::error!(addr = %addr, error = %e, "Failed to read envelope");
            Err(map_io_error(e))
        }
        Err(_) => Err(Error::Timeout),
    }
}

/// Map a connection-time I/O error to the appropriate [`Error`] variant.
fn map_connect_error(e: std::io::Error, addr: &str) -> Error {
    match e.kind() {
        std::io::ErrorKind::ConnectionRefused => {
            Error::Transport(format!("connection refused: {addr}"))
        }
        _ => Error::Io(e),
    }
}

/// Map a data-path I/O error to the appropriate [`Error`] variant.
fn map_io_error(e: std::io::Error) -> Error {
    match e.kind() {
        std::io::ErrorKind::ConnectionReset
        | std::io::ErrorKind::BrokenPipe
        | std::io::ErrorKind::NotConnected
        | std::io::ErrorKind::ConnectionAborted => Error::ConnectionLost,
        _ => Error::Io(e),
    }
}
