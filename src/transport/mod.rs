//! Group transport seam
//!
//! Defines the capability interface the cluster controller speaks to:
//! join/leave a named group, broadcast bytes to every member, and receive
//! inbound messages plus membership views through registered callbacks.
//! Any concrete transport (UDP fan-out, multicast, an in-process hub, an
//! external broker) can sit behind these traits without the controller or
//! the command codec changing.

pub mod local;
pub mod udp;

use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::Result;
pub use local::{LocalGroup, LocalGroupTransport};
pub use udp::{FrozenTransportStats, Packet, UdpGroupTransport, MAX_DATAGRAM_SIZE};

/// Opaque member identity assigned by a transport at join time.
///
/// Used only to detect self-originated messages and to log membership
/// views; it never travels inside the command payload.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MemberAddress(String);

impl MemberAddress {
    pub fn new(address: impl Into<String>) -> Self {
        Self(address.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MemberAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<SocketAddr> for MemberAddress {
    fn from(addr: SocketAddr) -> Self {
        Self(addr.to_string())
    }
}

impl From<&str> for MemberAddress {
    fn from(addr: &str) -> Self {
        Self(addr.to_string())
    }
}

/// Callback for inbound group messages.
///
/// Transports invoke this sequentially, in delivery order, from a single
/// delivery context; implementations must never panic out of it.
pub trait MessageReceiver: Send + Sync {
    fn on_message(&self, sender: &MemberAddress, payload: &[u8]);
}

/// Callback for membership view changes.
///
/// Purely observational; a transport without membership visibility may
/// never call it and still satisfies the contract.
pub trait MembershipListener: Send + Sync {
    fn on_view_change(&self, members: &[MemberAddress]);
}

/// Capability interface for group communication.
#[async_trait]
pub trait GroupTransport: Send + Sync {
    /// Join the named group, registering the message receiver and the
    /// membership listener before any message can be delivered. Returns
    /// the transport-assigned local member address. A failed join must
    /// leave nothing behind: no receiver retained, no session open.
    async fn join(
        &self,
        group: &str,
        receiver: Arc<dyn MessageReceiver>,
        listener: Arc<dyn MembershipListener>,
    ) -> Result<MemberAddress>;

    /// Leave the group and release the session.
    async fn leave(&self) -> Result<()>;

    /// Best-effort broadcast of an opaque payload to every group member.
    /// No acknowledgement, retry, or cross-node ordering is implied.
    async fn broadcast(&self, payload: &[u8]) -> Result<()>;

    /// The local member address while joined.
    fn local_address(&self) -> Option<MemberAddress>;
}
