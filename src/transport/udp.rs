//! UDP group transport
//!
//! Single-socket UDP transport for invalidation traffic. One socket is
//! used for both send and receive so the datagram source address equals
//! the advertised member address, which keeps the controller's
//! self-origin filter exact; bind a concrete interface address rather
//! than `0.0.0.0` when the filter matters. Broadcasts fan out as one
//! unicast datagram per configured peer, or as a single datagram to an
//! IP multicast group when one is configured. Payloads travel inside a
//! group-tagged [`Packet`] envelope so traffic from foreign groups
//! sharing a port can be dropped before dispatch.
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use tattler::cache::MemoryCache;
//! use tattler::cluster::ClusterController;
//! use tattler::settings::TransportConfig;
//! use tattler::transport::UdpGroupTransport;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = TransportConfig {
//!     listen_udp: "192.168.1.10:7600".parse()?,
//!     multicast: None,
//!     topology: vec!["192.168.1.11:7600".parse()?].into_iter().collect(),
//! };
//! let transport = Arc::new(UdpGroupTransport::new(config));
//! let cache = Arc::new(MemoryCache::new());
//! let controller = Arc::new(ClusterController::new("orders", transport, cache));
//!
//! controller.connect().await?;
//! controller.send_evict("orders", 42).await;
//! controller.disconnect().await?;
//! # Ok(())
//! # }
//! ```

use std::collections::HashSet;
use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use bincode::{Decode, Encode};
use parking_lot::RwLock;
use tokio::net::UdpSocket;
use tokio::sync::RwLock as AsyncRwLock;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::{Result, TattlerError};
use crate::settings::TransportConfig;
use crate::transport::{GroupTransport, MemberAddress, MembershipListener, MessageReceiver};

/// Maximum UDP datagram size accepted on the wire
pub const MAX_DATAGRAM_SIZE: usize = 65536; // 64KB maximum UDP packet size

/// Group-tagged envelope around an invalidation payload
#[derive(Debug, Clone, Decode, Encode)]
pub struct Packet {
    pub group: String,
    pub packet_id: u64,
    pub payload: Vec<u8>,
}

impl Packet {
    /// Create a new packet with a random id
    pub fn new(group: impl Into<String>, payload: Vec<u8>) -> Self {
        Self {
            group: group.into(),
            packet_id: rand::random(),
            payload,
        }
    }

    /// Serialize for the wire
    pub fn serialize(&self) -> std::result::Result<Vec<u8>, bincode::error::EncodeError> {
        let config = bincode::config::standard().with_big_endian();
        bincode::encode_to_vec(self, config)
    }

    /// Deserialize from the wire
    pub fn deserialize(data: &[u8]) -> std::result::Result<Self, bincode::error::DecodeError> {
        let config = bincode::config::standard().with_big_endian();
        let (packet, _) = bincode::decode_from_slice(data, config)?;
        Ok(packet)
    }
}

#[derive(Debug, Default)]
struct UdpTransportStats {
    messages_sent: AtomicU64,
    messages_received: AtomicU64,
    send_errors: AtomicU64,
    receive_errors: AtomicU64,
    packets_dropped: AtomicU64,
}

impl UdpTransportStats {
    fn freeze(&self) -> FrozenTransportStats {
        FrozenTransportStats {
            messages_sent: self.messages_sent.load(Ordering::Relaxed),
            messages_received: self.messages_received.load(Ordering::Relaxed),
            send_errors: self.send_errors.load(Ordering::Relaxed),
            receive_errors: self.receive_errors.load(Ordering::Relaxed),
            packets_dropped: self.packets_dropped.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time snapshot of transport statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrozenTransportStats {
    pub messages_sent: u64,
    pub messages_received: u64,
    pub send_errors: u64,
    pub receive_errors: u64,
    pub packets_dropped: u64,
}

struct Session {
    group: String,
    socket: Arc<UdpSocket>,
    listener: Arc<dyn MembershipListener>,
    recv_task: JoinHandle<()>,
}

/// UDP-backed [`GroupTransport`] with a dynamic peer set
pub struct UdpGroupTransport {
    config: TransportConfig,
    peers: RwLock<HashSet<SocketAddr>>,
    local_address: RwLock<Option<MemberAddress>>,
    session: AsyncRwLock<Option<Session>>,
    stats: Arc<UdpTransportStats>,
}

impl UdpGroupTransport {
    /// Create a transport from configuration. No socket is opened until
    /// [`GroupTransport::join`] is called.
    pub fn new(config: TransportConfig) -> Self {
        let peers = config.topology.iter().copied().collect();
        Self {
            config,
            peers: RwLock::new(peers),
            local_address: RwLock::new(None),
            session: AsyncRwLock::new(None),
            stats: Arc::new(UdpTransportStats::default()),
        }
    }

    /// Add a peer on top of the configured topology
    pub async fn add_peer(&self, address: SocketAddr) {
        if !self.peers.write().insert(address) {
            return;
        }
        debug!("Added peer {}", address);
        let session = self.session.read().await;
        if let Some(session) = session.as_ref() {
            session.listener.on_view_change(&self.current_view());
        }
    }

    /// Remove a peer from the current peer set
    pub async fn remove_peer(&self, address: &SocketAddr) {
        if !self.peers.write().remove(address) {
            return;
        }
        debug!("Removed peer {}", address);
        let session = self.session.read().await;
        if let Some(session) = session.as_ref() {
            session.listener.on_view_change(&self.current_view());
        }
    }

    /// Get the current peer set
    pub fn peers(&self) -> Vec<SocketAddr> {
        self.peers.read().iter().copied().collect()
    }

    /// Get a snapshot of the transport statistics
    pub fn stats(&self) -> FrozenTransportStats {
        self.stats.freeze()
    }

    fn current_view(&self) -> Vec<MemberAddress> {
        let mut view: Vec<MemberAddress> = self
            .peers
            .read()
            .iter()
            .map(|addr| MemberAddress::from(*addr))
            .collect();
        if let Some(local) = self.local_address.read().clone() {
            view.push(local);
        }
        view.sort();
        view
    }

    fn join_multicast(&self, socket: &UdpSocket, multicast: SocketAddr) -> Result<()> {
        match (multicast.ip(), self.config.listen_udp.ip()) {
            (IpAddr::V4(group), IpAddr::V4(interface)) if group.is_multicast() => socket
                .join_multicast_v4(group, interface)
                .map_err(|e| {
                    TattlerError::Transport(format!(
                        "Failed to join multicast group {}: {}",
                        multicast, e
                    ))
                }),
            (IpAddr::V6(group), _) if group.is_multicast() => socket
                .join_multicast_v6(&group, 0)
                .map_err(|e| {
                    TattlerError::Transport(format!(
                        "Failed to join multicast group {}: {}",
                        multicast, e
                    ))
                }),
            _ => Err(crate::config_error!(
                "Invalid multicast address: {}",
                multicast
            )),
        }
    }

    /// Whether the advertised address will equal the source address peers
    /// (and our own multicast echo) see. An unspecified bind breaks that
    /// equality, so the self-origin filter cannot match echoed datagrams.
    fn advertised_address_is_exact(local: SocketAddr, multicast: Option<SocketAddr>) -> bool {
        multicast.is_none() || !local.ip().is_unspecified()
    }

    async fn receive_loop(
        socket: Arc<UdpSocket>,
        group: String,
        receiver: Arc<dyn MessageReceiver>,
        stats: Arc<UdpTransportStats>,
    ) {
        let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];

        loop {
            match socket.recv_from(&mut buf).await {
                Ok((len, addr)) => {
                    let packet = match Packet::deserialize(&buf[..len]) {
                        Ok(packet) => packet,
                        Err(e) => {
                            stats.packets_dropped.fetch_add(1, Ordering::Relaxed);
                            debug!("Dropping undecodable datagram from {}: {}", addr, e);
                            continue;
                        }
                    };
                    if packet.group != group {
                        stats.packets_dropped.fetch_add(1, Ordering::Relaxed);
                        debug!(
                            "Dropping packet for foreign group '{}' from {}",
                            packet.group, addr
                        );
                        continue;
                    }
                    stats.messages_received.fetch_add(1, Ordering::Relaxed);
                    receiver.on_message(&MemberAddress::from(addr), &packet.payload);
                }
                Err(e) => {
                    stats.receive_errors.fetch_add(1, Ordering::Relaxed);
                    warn!("UDP receive error: {}", e);
                    // Continue receiving despite errors
                }
            }
        }
    }
}

#[async_trait]
impl GroupTransport for UdpGroupTransport {
    async fn join(
        &self,
        group: &str,
        receiver: Arc<dyn MessageReceiver>,
        listener: Arc<dyn MembershipListener>,
    ) -> Result<MemberAddress> {
        let mut session = self.session.write().await;
        if let Some(current) = session.as_ref() {
            return Err(crate::transport_error!(
                "already joined group '{}'",
                current.group
            ));
        }

        let socket = UdpSocket::bind(self.config.listen_udp).await.map_err(|e| {
            TattlerError::Transport(format!(
                "Failed to bind UDP socket {}: {}",
                self.config.listen_udp, e
            ))
        })?;
        if let Some(multicast) = self.config.multicast {
            self.join_multicast(&socket, multicast)?;
        }
        let local = socket.local_addr().map_err(|e| {
            TattlerError::Transport(format!("Failed to read local address: {}", e))
        })?;
        if !Self::advertised_address_is_exact(local, self.config.multicast) {
            warn!(
                "Listening on unspecified address {} with multicast enabled; \
                 self-origin filtering needs a concrete interface address",
                local
            );
        }

        let address = MemberAddress::from(local);
        let socket = Arc::new(socket);
        let recv_task = tokio::spawn(Self::receive_loop(
            Arc::clone(&socket),
            group.to_string(),
            receiver,
            Arc::clone(&self.stats),
        ));

        *self.local_address.write() = Some(address.clone());
        *session = Some(Session {
            group: group.to_string(),
            socket,
            listener: Arc::clone(&listener),
            recv_task,
        });
        drop(session);

        listener.on_view_change(&self.current_view());
        info!(
            "Joined group '{}' on {} with {} configured peers",
            group,
            address,
            self.peers.read().len()
        );
        Ok(address)
    }

    async fn leave(&self) -> Result<()> {
        let mut session = self.session.write().await;
        match session.take() {
            Some(current) => {
                current.recv_task.abort();
                *self.local_address.write() = None;
                info!("Left group '{}'", current.group);
            }
            None => debug!("Leave called while not joined"),
        }
        Ok(())
    }

    async fn broadcast(&self, payload: &[u8]) -> Result<()> {
        let session = self.session.read().await;
        let session = session
            .as_ref()
            .ok_or_else(|| crate::transport_error!("not joined to a group"))?;

        let packet = Packet::new(&session.group, payload.to_vec());
        let data = packet.serialize()?;
        if data.len() > MAX_DATAGRAM_SIZE {
            return Err(crate::transport_error!(
                "Packet too large: {} bytes (max: {} bytes)",
                data.len(),
                MAX_DATAGRAM_SIZE
            ));
        }

        if let Some(multicast) = self.config.multicast {
            session.socket.send_to(&data, multicast).await.map_err(|e| {
                self.stats.send_errors.fetch_add(1, Ordering::Relaxed);
                TattlerError::Transport(format!("Multicast send to {} failed: {}", multicast, e))
            })?;
            self.stats.messages_sent.fetch_add(1, Ordering::Relaxed);
            return Ok(());
        }

        let peers: Vec<SocketAddr> = self.peers.read().iter().copied().collect();
        if peers.is_empty() {
            debug!("Broadcast on group '{}' with no peers configured", session.group);
            return Ok(());
        }

        let mut errors = Vec::new();
        for peer in &peers {
            match session.socket.send_to(&data, peer).await {
                Ok(_) => {
                    self.stats.messages_sent.fetch_add(1, Ordering::Relaxed);
                }
                Err(e) => {
                    self.stats.send_errors.fetch_add(1, Ordering::Relaxed);
                    errors.push(format!("{}: {}", peer, e));
                }
            }
        }
        if errors.len() == peers.len() {
            return Err(crate::transport_error!(
                "Broadcast failed for every peer: {:?}",
                errors
            ));
        }
        if !errors.is_empty() {
            warn!("Broadcast send errors: {:?}", errors);
        }
        Ok(())
    }

    fn local_address(&self) -> Option<MemberAddress> {
        self.local_address.read().clone()
    }
}
