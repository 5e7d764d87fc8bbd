//! Transport selection.
//!
//! [`TransportConfig`] names the four ways of reaching the bus; [`connect`]
//! turns one into a boxed [`Transport`] ready to hand to the protocol
//! engine. Higher layers stay transport-agnostic.

use femlib_core::{Result, Transport};

use crate::{DirectTransport, GatewayTransport};

/// How to reach the bus.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportConfig {
    /// Ethernet gateway over TCP.
    Gateway { addr: String, node_id: u8 },
    /// Ethernet gateway over UDP.
    GatewayUdp { addr: String, node_id: u8 },
    /// Direct bus-adapter socket (16-byte envelopes).
    Direct { addr: String, node_id: u8 },
    /// A running [`crate::RelayServer`]. The relay forwards gateway
    /// envelopes verbatim and answers on the client's own connection.
    Relay { addr: String, node_id: u8 },
}

impl TransportConfig {
    /// The configured bus node id.
    pub fn node_id(&self) -> u8 {
        match self {
            TransportConfig::Gateway { node_id, .. }
            | TransportConfig::GatewayUdp { node_id, .. }
            | TransportConfig::Direct { node_id, .. }
            | TransportConfig::Relay { node_id, .. } => *node_id,
        }
    }
}

/// Open the configured transport.
pub async fn connect(config: &TransportConfig) -> Result<Box<dyn Transport>> {
    match config {
        TransportConfig::Gateway { addr, node_id } => {
            Ok(Box::new(GatewayTransport::connect_tcp(addr, *node_id).await?))
        }
        TransportConfig::Relay { addr, node_id } => Ok(Box::new(
            GatewayTransport::connect_relay(addr, *node_id).await?,
        )),
        TransportConfig::GatewayUdp { addr, node_id } => {
            Ok(Box::new(GatewayTransport::connect_udp(addr, *node_id).await?))
        }
        TransportConfig::Direct { addr, node_id } => {
            Ok(Box::new(DirectTransport::connect(addr, *node_id).await?))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn node_id_accessor() {
        let config = TransportConfig::Gateway {
            addr: "192.168.1.1:2000".into(),
            node_id: 0x13,
        };
        assert_eq!(config.node_id(), 0x13);
    }

    #[tokio::test]
    async fn connect_direct_through_factory() {
        let adapter = tokio::net::UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let config = TransportConfig::Direct {
            addr: adapter.local_addr().unwrap().to_string(),
            node_id: 0x13,
        };
        let transport = connect(&config).await.unwrap();
        assert!(transport.is_connected());
    }
}
