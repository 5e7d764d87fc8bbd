//! Bus relay daemon.
//!
//! The gateway accepts a single TCP client, but several programs may
//! need the bus at once (an operator console alongside the tuning
//! controller, say). [`RelayServer`] owns the one gateway connection and
//! listens for any number of downstream clients. Envelopes are forwarded
//! verbatim in both directions: a client frame goes straight up the
//! gateway command stream, and every envelope the gateway delivers on its
//! reply connection (the connection it opens back to the relay's reply
//! listener, as for any direct client) is fanned out to all connected
//! clients, each of which filters on its own node id.
//!
//! Downstream the wiring is symmetric: the relay answers each client on
//! the client's own connection, so clients use
//! [`GatewayTransport::connect_relay`](crate::GatewayTransport::connect_relay).
//! A client that stops reading or disconnects is dropped from the fan-out
//! on its first failed write; it never stalls the other clients.

use std::net::SocketAddr;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use femlib_core::{Error, Result};
use femlib_proto::frame::GATEWAY_ENVELOPE_LEN;

use crate::gateway::DEFAULT_REPLY_ADDR;

/// Channel depth for frames in flight through the relay.
const CHANNEL_CAPACITY: usize = 64;

/// The relay daemon. Construct with [`bind`](RelayServer::bind), then
/// drive it with [`run`](RelayServer::run) (typically in a spawned task).
pub struct RelayServer {
    listener: TcpListener,
    local_addr: SocketAddr,
    reply_listener: TcpListener,
    reply_addr: SocketAddr,
    upstream_addr: String,
    cancel: CancellationToken,
}

impl RelayServer {
    /// Bind the downstream listener and the gateway reply listener (at
    /// [`DEFAULT_REPLY_ADDR`]). The upstream connection is opened lazily
    /// by [`run`](RelayServer::run).
    pub async fn bind(listen_addr: &str, upstream_addr: &str) -> Result<Self> {
        Self::bind_with_reply(listen_addr, upstream_addr, DEFAULT_REPLY_ADDR).await
    }

    /// Bind with an explicit gateway reply-listener address.
    pub async fn bind_with_reply(
        listen_addr: &str,
        upstream_addr: &str,
        reply_addr: &str,
    ) -> Result<Self> {
        let listener = TcpListener::bind(listen_addr).await.map_err(|e| {
            tracing::error!(addr = %listen_addr, error = %e, "Failed to bind relay listener");
            Error::Io(e)
        })?;
        let local_addr = listener.local_addr().map_err(Error::Io)?;

        let reply_listener = TcpListener::bind(reply_addr).await.map_err(|e| {
            tracing::error!(addr = %reply_addr, error = %e, "Failed to bind gateway reply listener");
            Error::Io(e)
        })?;
        let reply_addr = reply_listener.local_addr().map_err(Error::Io)?;

        tracing::info!(
            listen = %local_addr,
            reply = %reply_addr,
            upstream = %upstream_addr,
            "Relay listeners bound"
        );

        Ok(Self {
            listener,
            local_addr,
            reply_listener,
            reply_addr,
            upstream_addr: upstream_addr.to_string(),
            cancel: CancellationToken::new(),
        })
    }

    /// The address the downstream listener is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// The address the gateway's reply connection is expected on.
    pub fn reply_addr(&self) -> SocketAddr {
        self.reply_addr
    }

    /// A token that stops the relay when cancelled.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Run the relay until cancelled or the gateway connection drops.
    pub async fn run(self) -> Result<()> {
        let mut commands = TcpStream::connect(&self.upstream_addr).await.map_err(|e| {
            tracing::error!(
                upstream = %self.upstream_addr,
                error = %e,
                "Failed to connect to gateway"
            );
            Error::Io(e)
        })?;
        if let Err(e) = commands.set_nodelay(true) {
            tracing::warn!(error = %e, "Failed to set TCP_NODELAY on upstream (continuing anyway)");
        }
        tracing::info!(upstream = %self.upstream_addr, "Relay connected to gateway");

        // The gateway answers on a connection it opens back to us.
        let replies = tokio::select! {
            _ = self.cancel.cancelled() => {
                tracing::info!("Relay cancelled before the gateway connected back");
                return Ok(());
            }
            accepted = self.reply_listener.accept() => {
                let (stream, peer) = accepted.map_err(Error::Io)?;
                tracing::info!(peer = %peer, "Gateway reply connection accepted");
                stream
            }
        };

        // Complete envelopes only cross these channels; the reader tasks
        // own all partial-read state.
        let (up_tx, mut up_rx) = mpsc::channel::<[u8; GATEWAY_ENVELOPE_LEN]>(CHANNEL_CAPACITY);
        let (client_tx, mut client_rx) =
            mpsc::channel::<[u8; GATEWAY_ENVELOPE_LEN]>(CHANNEL_CAPACITY);

        let reply_reader = tokio::spawn(read_envelopes(replies, up_tx, self.cancel.clone()));

        let mut clients: Vec<(SocketAddr, OwnedWriteHalf)> = Vec::new();

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    tracing::info!("Relay cancelled, shutting down");
                    break;
                }
                accepted = self.listener.accept() => {
                    match accepted {
                        Ok((stream, peer)) => {
                            tracing::info!(peer = %peer, "Relay client connected");
                            if let Err(e) = stream.set_nodelay(true) {
                                tracing::warn!(peer = %peer, error = %e, "Failed to set TCP_NODELAY");
                            }
                            let (read, write) = stream.into_split();
                            clients.push((peer, write));
                            tokio::spawn(read_envelopes(read, client_tx.clone(), self.cancel.clone()));
                        }
                        Err(e) => {
                            tracing::warn!(error = %e, "Relay accept failed");
                        }
                    }
                }
                frame = up_rx.recv() => {
                    let Some(frame) = frame else {
                        tracing::warn!("Gateway reply connection lost, relay shutting down");
                        break;
                    };
                    fan_out(&mut clients, &frame).await;
                }
                frame = client_rx.recv() => {
                    // client_tx is kept alive above, so recv() never yields None here.
                    if let Some(frame) = frame {
                        if let Err(e) = commands.write_all(&frame).await {
                            tracing::error!(error = %e, "Failed to forward frame upstream");
                            break;
                        }
                    }
                }
            }
        }

        reply_reader.abort();
        Ok(())
    }
}

/// Read fixed-size envelopes from `reader` into `tx` until EOF, error,
/// or cancellation. Dropping `tx` signals the main loop.
async fn read_envelopes<R>(mut reader: R, tx: mpsc::Sender<[u8; GATEWAY_ENVELOPE_LEN]>, cancel: CancellationToken)
where
    R: tokio::io::AsyncRead + Unpin + Send + 'static,
{
    let mut buf = [0u8; GATEWAY_ENVELOPE_LEN];
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            read = reader.read_exact(&mut buf) => {
                match read {
                    Ok(_) => {
                        if tx.send(buf).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        if e.kind() != std::io::ErrorKind::UnexpectedEof {
                            tracing::warn!(error = %e, "Relay reader error");
                        }
                        break;
                    }
                }
            }
        }
    }
}

/// Write one envelope to every client, dropping clients whose write fails.
async fn fan_out(clients: &mut Vec<(SocketAddr, OwnedWriteHalf)>, frame: &[u8; GATEWAY_ENVELOPE_LEN]) {
    let mut dead = Vec::new();
    for (index, (peer, write)) in clients.iter_mut().enumerate() {
        if let Err(e) = write.write_all(frame).await {
            tracing::info!(peer = %peer, error = %e, "Dropping relay client");
            dead.push(index);
        }
    }
    for index in dead.into_iter().rev() {
        clients.swap_remove(index);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::GatewayTransport;
    use femlib_core::{Frame, Transport};
    use femlib_proto::frame::{decode_gateway, encode_gateway};
    use std::time::Duration;

    /// Fake gateway: accepts the relay's command stream, connects back to
    /// `reply_addr`, and echoes every command envelope onto the reply
    /// connection. Never writes on the command stream.
    fn fake_gateway(
        listener: TcpListener,
        reply_addr: SocketAddr,
    ) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let (mut commands, _) = listener.accept().await.unwrap();
            let mut replies = TcpStream::connect(reply_addr).await.unwrap();
            let mut buf = [0u8; GATEWAY_ENVELOPE_LEN];
            while commands.read_exact(&mut buf).await.is_ok() {
                replies.write_all(&buf).await.unwrap();
                replies.flush().await.unwrap();
            }
        })
    }

    /// Gateway + relay, wired together with ephemeral addresses.
    async fn started_relay() -> (
        tokio::task::JoinHandle<()>,
        tokio::task::JoinHandle<Result<()>>,
        CancellationToken,
        String,
    ) {
        let gateway_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let gateway_addr = gateway_listener.local_addr().unwrap().to_string();

        let relay = RelayServer::bind_with_reply("127.0.0.1:0", &gateway_addr, "127.0.0.1:0")
            .await
            .unwrap();
        let gateway = fake_gateway(gateway_listener, relay.reply_addr());

        let relay_addr = relay.local_addr().to_string();
        let cancel = relay.cancel_token();
        let relay_task = tokio::spawn(relay.run());
        (gateway, relay_task, cancel, relay_addr)
    }

    #[tokio::test]
    async fn relay_fans_out_to_all_clients() {
        let (gateway, relay_task, cancel, relay_addr) = started_relay().await;

        let mut client_a = GatewayTransport::connect_relay(&relay_addr, 0x13).await.unwrap();
        let mut client_b = GatewayTransport::connect_relay(&relay_addr, 0x13).await.unwrap();
        // Let the relay register both clients before traffic flows.
        tokio::time::sleep(Duration::from_millis(50)).await;

        let frame = Frame::new(0x06812, &[0x07, 0xFF]).unwrap();
        client_a.send(&frame).await.unwrap();

        // The gateway's reply-connection echo comes back through the
        // relay to both clients.
        let got_a = client_a.recv(Duration::from_secs(2)).await.unwrap();
        let got_b = client_b.recv(Duration::from_secs(2)).await.unwrap();
        assert_eq!(got_a, frame);
        assert_eq!(got_b, frame);

        cancel.cancel();
        relay_task.await.unwrap().unwrap();
        gateway.abort();
    }

    #[tokio::test]
    async fn relay_survives_client_disconnect() {
        let (gateway, relay_task, cancel, relay_addr) = started_relay().await;

        let mut doomed = GatewayTransport::connect_relay(&relay_addr, 0x13).await.unwrap();
        let mut survivor = GatewayTransport::connect_relay(&relay_addr, 0x13).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        doomed.close().await.unwrap();

        let frame = Frame::new(0x00800, &[0x01]).unwrap();
        survivor.send(&frame).await.unwrap();
        let got = survivor.recv(Duration::from_secs(2)).await.unwrap();
        assert_eq!(got, frame);

        cancel.cancel();
        relay_task.await.unwrap().unwrap();
        gateway.abort();
    }

    #[tokio::test]
    async fn cancellation_stops_the_relay() {
        let (gateway, relay_task, cancel, _relay_addr) = started_relay().await;

        tokio::time::sleep(Duration::from_millis(50)).await;
        cancel.cancel();
        relay_task.await.unwrap().unwrap();
        gateway.abort();
    }

    #[tokio::test]
    async fn envelopes_cross_the_relay_unchanged() {
        // The relay must not reinterpret envelopes; spot-check the bytes.
        let frame = Frame::new(0x10812, &[0x0A, 0x00]).unwrap();
        let bytes = encode_gateway(0x13, &frame);
        let (node, decoded) = decode_gateway(&bytes).unwrap();
        assert_eq!(node, 0x13);
        assert_eq!(decoded, frame);
    }
}
