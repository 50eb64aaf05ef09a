//! Peer discovery for Lanshare.
//!
//! Discovery is a request/response exchange over UDP on a single port:
//!
//! 1. [`DiscoveryService::broadcast_discovery`] sends a `discovery` request to
//!    the subnet broadcast address.
//! 2. Every running listener answers the sender with a unicast `response`
//!    carrying its name, IPv4 address and transfer port.
//! 3. Responses are upserted into the [`PeerTable`] keyed by `"ip:port"`.
//!
//! Requests and responses go out from the listening socket itself, so the
//! replies to our own broadcast arrive back on the receive loop.
//!
//! Malformed datagrams are logged and dropped; they never stop the loop.
//! Peers do not expire unless a `peer_ttl` is configured.

mod peers;

pub use peers::{Device, PeerTable};

use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::sync::Arc;
use std::time::Duration;

use tokio::net::UdpSocket;
use tokio_util::sync::CancellationToken;

use crate::error::Result;
use crate::protocol::{DiscoveryMessage, MAX_DATAGRAM_SIZE};

/// Configuration for the discovery service.
#[derive(Debug, Clone)]
pub struct DiscoveryConfig {
    /// Name announced to peers
    pub device_name: String,
    /// UDP port requests and responses travel on
    pub discovery_port: u16,
    /// TCP port announced for direct transfers
    pub transfer_port: u16,
    /// Address announced to peers (auto-detected when unset)
    pub advertise_ip: Option<Ipv4Addr>,
    /// Destination of discovery broadcasts
    pub broadcast_addr: Ipv4Addr,
    /// Forget peers not heard from for this long
    pub peer_ttl: Option<Duration>,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            device_name: crate::config::default_device_name(),
            discovery_port: crate::DEFAULT_DISCOVERY_PORT,
            transfer_port: crate::DEFAULT_TRANSFER_PORT,
            advertise_ip: None,
            broadcast_addr: Ipv4Addr::BROADCAST,
            peer_ttl: None,
        }
    }
}

impl From<&crate::config::Config> for DiscoveryConfig {
    fn from(config: &crate::config::Config) -> Self {
        Self {
            device_name: config.general.device_name.clone(),
            discovery_port: config.network.discovery_port,
            transfer_port: config.network.transfer_port,
            advertise_ip: None,
            broadcast_addr: Ipv4Addr::BROADCAST,
            peer_ttl: config.network.peer_ttl,
        }
    }
}

/// What happened to one inbound datagram.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DatagramOutcome {
    /// A discovery request was answered
    Answered,
    /// A peer was inserted or refreshed
    PeerUpdated(Device),
    /// A response describing ourselves was ignored
    IgnoredSelf,
}

/// UDP discovery service owning the known-peers table.
#[derive(Debug)]
pub struct DiscoveryService {
    /// Socket bound to the discovery port
    socket: Arc<UdpSocket>,
    /// Service configuration
    config: DiscoveryConfig,
    /// Address announced in responses
    local_ip: Ipv4Addr,
    /// Known peers
    peers: PeerTable,
}

impl DiscoveryService {
    /// Bind the discovery socket.
    ///
    /// # Errors
    ///
    /// Returns an error if the socket cannot be created or bound.
    pub async fn bind(config: DiscoveryConfig) -> Result<Self> {
        let socket = socket2::Socket::new(
            socket2::Domain::IPV4,
            socket2::Type::DGRAM,
            Some(socket2::Protocol::UDP),
        )?;

        socket.set_broadcast(true)?;
        socket.set_reuse_address(true)?;

        #[cfg(target_os = "macos")]
        socket.set_reuse_port(true)?;

        let addr = SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, config.discovery_port);
        socket.bind(&addr.into())?;

        socket.set_nonblocking(true)?;

        let std_socket: std::net::UdpSocket = socket.into();
        let socket = UdpSocket::from_std(std_socket)?;

        let local_ip = config.advertise_ip.unwrap_or_else(local_ipv4);
        tracing::info!(
            "Discovery bound on {} (announcing {}:{})",
            socket.local_addr()?,
            local_ip,
            config.transfer_port
        );

        Ok(Self {
            socket: Arc::new(socket),
            config,
            local_ip,
            peers: PeerTable::new(),
        })
    }

    /// Local address of the discovery socket.
    ///
    /// # Errors
    ///
    /// Returns an error if the socket address cannot be read.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    /// Address announced in responses.
    #[must_use]
    pub fn local_ip(&self) -> Ipv4Addr {
        self.local_ip
    }

    /// Handle to the known-peers table.
    #[must_use]
    pub fn peers(&self) -> &PeerTable {
        &self.peers
    }

    /// Forget every known peer.
    pub fn clear_peers(&self) {
        self.peers.clear();
    }

    /// Forget peers not heard from within `max_age`. Returns how many were
    /// removed.
    pub fn prune_stale(&self, max_age: Duration) -> usize {
        self.peers.prune_stale(max_age)
    }

    /// Broadcast a discovery request to the subnet.
    ///
    /// # Errors
    ///
    /// Returns an error if the datagram cannot be sent.
    pub async fn broadcast_discovery(&self) -> Result<()> {
        let target = SocketAddr::V4(SocketAddrV4::new(
            self.config.broadcast_addr,
            self.config.discovery_port,
        ));
        self.request_from(target).await
    }

    /// Send a discovery request to a single address.
    ///
    /// # Errors
    ///
    /// Returns an error if the datagram cannot be sent.
    pub async fn request_from(&self, target: SocketAddr) -> Result<()> {
        let request = DiscoveryMessage::discovery(&self.config.device_name).encode()?;
        self.socket.send_to(&request, target).await?;
        tracing::debug!("Sent discovery request to {}", target);
        Ok(())
    }

    /// Run the receive loop until `shutdown` is cancelled.
    ///
    /// Errors from individual datagrams are logged and the loop continues.
    pub async fn listen(&self, shutdown: CancellationToken) {
        let mut buf = [0u8; MAX_DATAGRAM_SIZE];
        let prune_every = self
            .config
            .peer_ttl
            .map(|ttl| (ttl / 2).max(Duration::from_secs(1)));
        let mut prune_tick = tokio::time::interval(prune_every.unwrap_or(Duration::from_secs(3600)));

        loop {
            tokio::select! {
                () = shutdown.cancelled() => {
                    tracing::debug!("Discovery listener received shutdown signal");
                    break;
                }
                _ = prune_tick.tick(), if prune_every.is_some() => {
                    if let Some(ttl) = self.config.peer_ttl {
                        let removed = self.peers.prune_stale(ttl);
                        if removed > 0 {
                            tracing::info!("Pruned {} stale peer(s)", removed);
                        }
                    }
                }
                result = self.socket.recv_from(&mut buf) => match result {
                    Ok((len, source)) => {
                        if let Err(e) = self.handle_datagram(&buf[..len], source).await {
                            tracing::warn!("Dropped datagram from {}: {}", source, e);
                        }
                    }
                    Err(e) => {
                        tracing::warn!("Error receiving discovery datagram: {}", e);
                    }
                }
            }
        }
    }

    /// Process one inbound datagram.
    ///
    /// # Errors
    ///
    /// Returns an error if the datagram is malformed or the reply cannot be sent.
    pub async fn handle_datagram(&self, bytes: &[u8], source: SocketAddr) -> Result<DatagramOutcome> {
        match DiscoveryMessage::decode(bytes)? {
            DiscoveryMessage::Discovery { device_name } => {
                tracing::debug!("Discovery request from {} ({})", device_name, source);
                let response = DiscoveryMessage::response(
                    &self.config.device_name,
                    self.local_ip,
                    self.config.transfer_port,
                )
                .encode()?;
                self.socket.send_to(&response, source).await?;
                Ok(DatagramOutcome::Answered)
            }
            DiscoveryMessage::Response {
                device_name,
                ip,
                port,
            } => {
                if ip == self.local_ip && port == self.config.transfer_port {
                    return Ok(DatagramOutcome::IgnoredSelf);
                }
                let device = Device::new(device_name, ip, port);
                tracing::debug!("Peer {} is {}", device.id, device.name);
                self.peers.upsert(device.clone());
                Ok(DatagramOutcome::PeerUpdated(device))
            }
        }
    }

    /// Broadcast a request, collect responses for `duration`, and return the peers.
    ///
    /// # Errors
    ///
    /// Returns an error if the broadcast cannot be sent.
    pub async fn scan(&self, duration: Duration) -> Result<Vec<Device>> {
        self.broadcast_discovery().await?;

        let token = CancellationToken::new();
        tokio::select! {
            () = self.listen(token.clone()) => {}
            () = tokio::time::sleep(duration) => token.cancel(),
        }

        Ok(self.peers.snapshot())
    }
}

/// Best-effort primary IPv4 address of this machine.
///
/// Uses a connected UDP socket to learn which interface routes outward;
/// no packet is sent. Falls back to loopback.
#[must_use]
pub fn local_ipv4() -> Ipv4Addr {
    let detected = std::net::UdpSocket::bind("0.0.0.0:0")
        .and_then(|socket| {
            socket.connect("8.8.8.8:80")?;
            socket.local_addr()
        })
        .ok();

    match detected {
        Some(SocketAddr::V4(addr)) if !addr.ip().is_unspecified() => *addr.ip(),
        _ => Ipv4Addr::LOCALHOST,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config(transfer_port: u16) -> DiscoveryConfig {
        DiscoveryConfig {
            device_name: "test-node".to_string(),
            discovery_port: 0,
            transfer_port,
            advertise_ip: Some(Ipv4Addr::LOCALHOST),
            broadcast_addr: Ipv4Addr::LOCALHOST,
            peer_ttl: None,
        }
    }

    fn response(name: &str, ip: &str, port: u16) -> Vec<u8> {
        format!(r#"{{"type":"response","device_name":"{name}","ip":"{ip}","port":{port}}}"#)
            .into_bytes()
    }

    #[tokio::test]
    async fn test_bind_on_ephemeral_port() {
        let service = DiscoveryService::bind(test_config(1)).await.expect("bind");
        assert_ne!(service.local_addr().unwrap().port(), 0);
        assert_eq!(service.local_ip(), Ipv4Addr::LOCALHOST);
    }

    #[tokio::test]
    async fn test_response_upserts_latest_data() {
        let service = DiscoveryService::bind(test_config(1)).await.unwrap();
        let source: SocketAddr = "10.0.0.9:48480".parse().unwrap();

        service
            .handle_datagram(&response("first", "10.0.0.9", 9000), source)
            .await
            .unwrap();
        service
            .handle_datagram(&response("second", "10.0.0.9", 9000), source)
            .await
            .unwrap();

        let peers = service.peers().snapshot();
        assert_eq!(peers.len(), 1);
        assert_eq!(peers[0].id, "10.0.0.9:9000");
        assert_eq!(peers[0].name, "second");
    }

    #[tokio::test]
    async fn test_malformed_datagram_is_an_error_not_a_peer() {
        let service = DiscoveryService::bind(test_config(1)).await.unwrap();
        let source: SocketAddr = "10.0.0.9:48480".parse().unwrap();

        assert!(service.handle_datagram(b"garbage", source).await.is_err());
        assert!(service
            .handle_datagram(br#"{"type":"response","device_name":"x"}"#, source)
            .await
            .is_err());
        assert!(service.peers().is_empty());
    }

    #[tokio::test]
    async fn test_own_response_is_ignored() {
        let service = DiscoveryService::bind(test_config(4242)).await.unwrap();
        let source: SocketAddr = "127.0.0.1:1".parse().unwrap();

        let outcome = service
            .handle_datagram(&response("me", "127.0.0.1", 4242), source)
            .await
            .unwrap();

        assert_eq!(outcome, DatagramOutcome::IgnoredSelf);
        assert!(service.peers().is_empty());
    }

    #[tokio::test]
    async fn test_request_is_answered_with_transfer_endpoint() {
        let service = DiscoveryService::bind(test_config(5555)).await.unwrap();
        let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();

        let outcome = service
            .handle_datagram(
                br#"{"type":"discovery","device_name":"asker"}"#,
                client.local_addr().unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(outcome, DatagramOutcome::Answered);

        let mut buf = [0u8; MAX_DATAGRAM_SIZE];
        let (len, _) = tokio::time::timeout(Duration::from_secs(2), client.recv_from(&mut buf))
            .await
            .expect("reply in time")
            .unwrap();

        assert_eq!(
            DiscoveryMessage::decode(&buf[..len]).unwrap(),
            DiscoveryMessage::response("test-node", Ipv4Addr::LOCALHOST, 5555)
        );
    }

    #[tokio::test]
    async fn test_listen_stops_on_shutdown() {
        let service = DiscoveryService::bind(test_config(1)).await.unwrap();
        let token = CancellationToken::new();
        token.cancel();

        tokio::time::timeout(Duration::from_secs(1), service.listen(token))
            .await
            .expect("listener should stop promptly");
    }

    #[test]
    fn test_local_ipv4_is_never_unspecified() {
        assert!(!local_ipv4().is_unspecified());
    }
}
