//! Tattler application settings
use std::collections::HashSet;
use std::net::SocketAddr;

pub const APP_NAME: &str = env!("CARGO_PKG_NAME");
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

pub const STANDARD_PORT_UDP: u16 = 7600;
pub const DEFAULT_PORT_UDP: &str = "7600";
// Fine for unicast fan-out; multicast deployments should bind a concrete
// interface address so self-origin filtering of echoed datagrams stays exact.
pub const DEFAULT_LISTEN_UDP: &str = "0.0.0.0:7600";
pub const DEFAULT_GROUP: &str = "tattler";

#[derive(Clone, Debug)]
pub struct Settings {
    // Name of the invalidation group to join
    pub group: String,

    // UDP listen address for invalidation traffic
    pub listen_udp: SocketAddr,

    // Optional multicast group; unicast fan-out to the topology when absent
    pub multicast: Option<SocketAddr>,

    // Cluster configuration information: peer addresses
    pub topology: HashSet<SocketAddr>,
}

/// Transport-level slice of the settings, consumed by the UDP transport
#[derive(Clone, Debug)]
pub struct TransportConfig {
    pub listen_udp: SocketAddr,
    pub multicast: Option<SocketAddr>,
    pub topology: HashSet<SocketAddr>,
}

impl Settings {
    pub fn transport_config(&self) -> TransportConfig {
        TransportConfig {
            listen_udp: self.listen_udp,
            multicast: self.multicast,
            topology: self.topology.clone(),
        }
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            group: DEFAULT_GROUP.to_string(),
            listen_udp: SocketAddr::from(([0, 0, 0, 0], STANDARD_PORT_UDP)),
            multicast: None,
            topology: HashSet::new(),
        }
    }
}
