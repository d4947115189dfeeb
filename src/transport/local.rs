//! In-process group transport
//!
//! A delivery hub for tests and single-process deployments. Broadcasts
//! are delivered synchronously to every member of the group including
//! the sender, which is exactly the loopback echo the cluster
//! controller's self-origin filter exists for. Groups are isolated from
//! one another and every join/leave produces a fresh membership view
//! for all listeners in the group.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use tracing::debug;

use crate::error::Result;
use crate::transport::{GroupTransport, MemberAddress, MembershipListener, MessageReceiver};

#[derive(Clone)]
struct LocalMember {
    address: MemberAddress,
    receiver: Arc<dyn MessageReceiver>,
    listener: Arc<dyn MembershipListener>,
}

/// Registry of in-process groups and their members
#[derive(Clone, Default)]
pub struct LocalGroup {
    groups: Arc<Mutex<HashMap<String, Vec<LocalMember>>>>,
    next_member_id: Arc<AtomicU64>,
}

impl LocalGroup {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a transport endpoint backed by this hub
    pub fn transport(&self) -> LocalGroupTransport {
        LocalGroupTransport {
            hub: self.clone(),
            membership: RwLock::new(None),
        }
    }

    /// Number of members currently joined to a group
    pub fn member_count(&self, group: &str) -> usize {
        self.groups
            .lock()
            .get(group)
            .map_or(0, |members| members.len())
    }

    fn register(
        &self,
        group: &str,
        receiver: Arc<dyn MessageReceiver>,
        listener: Arc<dyn MembershipListener>,
    ) -> (MemberAddress, Vec<LocalMember>) {
        let id = self.next_member_id.fetch_add(1, Ordering::Relaxed) + 1;
        let address = MemberAddress::new(format!("local-{}", id));

        let mut groups = self.groups.lock();
        let members = groups.entry(group.to_string()).or_default();
        members.push(LocalMember {
            address: address.clone(),
            receiver,
            listener,
        });
        (address, members.clone())
    }

    fn deregister(&self, group: &str, address: &MemberAddress) -> Vec<LocalMember> {
        let mut groups = self.groups.lock();
        match groups.get_mut(group) {
            Some(members) => {
                members.retain(|member| member.address != *address);
                if members.is_empty() {
                    groups.remove(group);
                    Vec::new()
                } else {
                    members.clone()
                }
            }
            None => Vec::new(),
        }
    }

    fn deliver(&self, group: &str, sender: &MemberAddress, payload: &[u8]) {
        let members = {
            let groups = self.groups.lock();
            groups.get(group).cloned().unwrap_or_default()
        };
        // Deliberate loopback: the sender receives its own broadcast too.
        for member in &members {
            member.receiver.on_message(sender, payload);
        }
    }

    fn notify_view(members: &[LocalMember]) {
        let view: Vec<MemberAddress> = members.iter().map(|m| m.address.clone()).collect();
        for member in members {
            member.listener.on_view_change(&view);
        }
    }
}

/// One member endpoint on a [`LocalGroup`] hub
pub struct LocalGroupTransport {
    hub: LocalGroup,
    membership: RwLock<Option<(String, MemberAddress)>>,
}

#[async_trait]
impl GroupTransport for LocalGroupTransport {
    async fn join(
        &self,
        group: &str,
        receiver: Arc<dyn MessageReceiver>,
        listener: Arc<dyn MembershipListener>,
    ) -> Result<MemberAddress> {
        let (address, members) = {
            let mut membership = self.membership.write();
            if let Some((joined, _)) = membership.as_ref() {
                return Err(crate::transport_error!("already joined group '{}'", joined));
            }
            let (address, members) = self.hub.register(group, receiver, listener);
            *membership = Some((group.to_string(), address.clone()));
            (address, members)
        };
        debug!("Member {} joined local group '{}'", address, group);
        LocalGroup::notify_view(&members);
        Ok(address)
    }

    async fn leave(&self) -> Result<()> {
        let left = { self.membership.write().take() };
        if let Some((group, address)) = left {
            let remaining = self.hub.deregister(&group, &address);
            debug!("Member {} left local group '{}'", address, group);
            LocalGroup::notify_view(&remaining);
        }
        Ok(())
    }

    async fn broadcast(&self, payload: &[u8]) -> Result<()> {
        let (group, sender) = {
            let membership = self.membership.read();
            match membership.as_ref() {
                Some((group, address)) => (group.clone(), address.clone()),
                None => return Err(crate::transport_error!("not joined to a group")),
            }
        };
        self.hub.deliver(&group, &sender, payload);
        Ok(())
    }

    fn local_address(&self) -> Option<MemberAddress> {
        self.membership.read().as_ref().map(|(_, address)| address.clone())
    }
}
