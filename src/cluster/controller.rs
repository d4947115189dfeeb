//! Cluster invalidation controller
//!
//! The control core of the invalidation protocol. A controller owns one
//! group-transport session for its connected lifetime: local cache
//! mutations become outbound commands, inbound commands become local
//! cache calls, and self-originated or malformed traffic is filtered
//! before dispatch. Everything is best-effort: apart from `connect`, no
//! failure in this module ever surfaces to the application.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::RwLock;
use tracing::{debug, error, info, warn};

use super::messages::{CacheKey, Command};
use crate::cache::CacheStore;
use crate::error::{Result, TattlerError};
use crate::transport::{GroupTransport, MemberAddress, MembershipListener, MessageReceiver};

/// Inbound half of the controller: classifies every delivered message and
/// dispatches surviving commands to the local cache. Registered with the
/// transport as both message receiver and membership listener at join.
struct InboundDispatcher {
    cache: Arc<dyn CacheStore>,
    local_address: RwLock<Option<MemberAddress>>,
}

impl MessageReceiver for InboundDispatcher {
    fn on_message(&self, sender: &MemberAddress, payload: &[u8]) {
        if payload.is_empty() {
            warn!("Message from {} is empty", sender);
            return;
        }

        // Some transports echo broadcasts back to the sender; dropping
        // our own messages here is not an error.
        if self
            .local_address
            .read()
            .as_ref()
            .map_or(false, |local| local == sender)
        {
            debug!("Ignoring our own invalidation message");
            return;
        }

        let command = match Command::decode(payload) {
            Ok(command) => command,
            Err(e) => {
                error!("Failed to decode message from {}: {}", sender, e);
                return;
            }
        };

        match command.operator {
            Command::OPT_DELETE_KEY => {
                debug!(
                    "Evicting key '{}' from region '{}' on command from {}",
                    command.key, command.region, sender
                );
                if let Err(e) = self.cache.evict(&command.region, &command.key) {
                    error!(
                        "Failed to evict cache, region={}, key={}: {}",
                        command.region, command.key, e
                    );
                }
            }
            Command::OPT_CLEAR_KEY => {
                debug!(
                    "Clearing region '{}' on command from {}",
                    command.region, sender
                );
                if let Err(e) = self.cache.clear(&command.region) {
                    error!("Failed to clear cache, region={}: {}", command.region, e);
                }
            }
            operator => warn!("Unknown command operator = {}", operator),
        }
    }
}

impl MembershipListener for InboundDispatcher {
    fn on_view_change(&self, members: &[MemberAddress]) {
        let list: Vec<&str> = members.iter().map(|m| m.as_str()).collect();
        info!("Group members changed, list: {}", list.join(","));
    }
}

/// Distributed cache-invalidation controller.
///
/// Two states, Disconnected (initial) and Connected. The controller holds
/// no cache data of its own; its only mutable state is the connected flag
/// and the local member address recorded at join for self-origin
/// filtering.
pub struct ClusterController {
    group: String,
    transport: Arc<dyn GroupTransport>,
    dispatcher: Arc<InboundDispatcher>,
    connected: AtomicBool,
}

impl ClusterController {
    pub fn new(
        group: impl Into<String>,
        transport: Arc<dyn GroupTransport>,
        cache: Arc<dyn CacheStore>,
    ) -> Self {
        Self {
            group: group.into(),
            transport,
            dispatcher: Arc::new(InboundDispatcher {
                cache,
                local_address: RwLock::new(None),
            }),
            connected: AtomicBool::new(false),
        }
    }

    /// Name of the invalidation group this controller joins
    pub fn group(&self) -> &str {
        &self.group
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Join the invalidation group: Disconnected -> Connected.
    ///
    /// Registers the inbound handler with the transport as part of the
    /// join, then records the assigned member address for self-origin
    /// filtering. On failure the controller stays Disconnected, the
    /// transport retains nothing, and the wrapped cause is fatal to the
    /// caller; there is no internal retry.
    pub async fn connect(&self) -> Result<()> {
        let started = Instant::now();
        let receiver = Arc::clone(&self.dispatcher) as Arc<dyn MessageReceiver>;
        let listener = Arc::clone(&self.dispatcher) as Arc<dyn MembershipListener>;

        match self.transport.join(&self.group, receiver, listener).await {
            Ok(address) => {
                *self.dispatcher.local_address.write() = Some(address.clone());
                self.connected.store(true, Ordering::SeqCst);
                info!(
                    "Connected to invalidation group '{}' as {}, time {} ms",
                    self.group,
                    address,
                    started.elapsed().as_millis()
                );
                Ok(())
            }
            Err(e) => Err(TattlerError::connection(e)),
        }
    }

    /// Leave the group and release the session: Connected -> Disconnected.
    /// Calling this while already Disconnected is a no-op.
    pub async fn disconnect(&self) -> Result<()> {
        if !self.connected.swap(false, Ordering::SeqCst) {
            debug!("Disconnect called while not connected");
            return Ok(());
        }

        *self.dispatcher.local_address.write() = None;
        self.transport.leave().await?;
        info!("Disconnected from invalidation group '{}'", self.group);
        Ok(())
    }

    /// Broadcast a single-key eviction to every peer in the group.
    ///
    /// Fire-and-forget: encode or broadcast failures are logged with the
    /// region and key, then swallowed. The local eviction already
    /// happened before this call and is never rolled back; a peer that
    /// misses the notification keeps a stale entry until it expires or
    /// is overwritten.
    pub async fn send_evict(&self, region: &str, key: impl Into<CacheKey>) {
        if !self.is_connected() {
            debug!(
                "Dropping evict command for region '{}' while disconnected",
                region
            );
            return;
        }

        let command = Command::evict(region, key);
        if let Err(e) = self.broadcast(&command).await {
            error!(
                "Failed to send evict command, region={}, key={}: {}",
                command.region, command.key, e
            );
        }
    }

    /// Broadcast a whole-region clear to every peer in the group.
    /// Same fire-and-forget semantics as [`ClusterController::send_evict`].
    pub async fn send_clear(&self, region: &str) {
        if !self.is_connected() {
            debug!(
                "Dropping clear command for region '{}' while disconnected",
                region
            );
            return;
        }

        let command = Command::clear(region);
        if let Err(e) = self.broadcast(&command).await {
            error!("Failed to send clear command, region={}: {}", command.region, e);
        }
    }

    async fn broadcast(&self, command: &Command) -> Result<()> {
        let payload = command.encode()?;
        self.transport.broadcast(&payload).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryCache;
    use crate::transport::{LocalGroup, LocalGroupTransport};
    use async_trait::async_trait;
    use parking_lot::Mutex;

    /// Transport whose join always fails, for connect() error paths
    struct FailingTransport;

    #[async_trait]
    impl GroupTransport for FailingTransport {
        async fn join(
            &self,
            _group: &str,
            _receiver: Arc<dyn MessageReceiver>,
            _listener: Arc<dyn MembershipListener>,
        ) -> Result<MemberAddress> {
            Err(crate::transport_error!("bind failed"))
        }

        async fn leave(&self) -> Result<()> {
            Ok(())
        }

        async fn broadcast(&self, _payload: &[u8]) -> Result<()> {
            Ok(())
        }

        fn local_address(&self) -> Option<MemberAddress> {
            None
        }
    }

    /// Transport that joins fine but fails every broadcast
    struct SendFailTransport;

    #[async_trait]
    impl GroupTransport for SendFailTransport {
        async fn join(
            &self,
            _group: &str,
            _receiver: Arc<dyn MessageReceiver>,
            _listener: Arc<dyn MembershipListener>,
        ) -> Result<MemberAddress> {
            Ok(MemberAddress::new("fail-send-1"))
        }

        async fn leave(&self) -> Result<()> {
            Ok(())
        }

        async fn broadcast(&self, _payload: &[u8]) -> Result<()> {
            Err(crate::transport_error!("network unreachable"))
        }

        fn local_address(&self) -> Option<MemberAddress> {
            Some(MemberAddress::new("fail-send-1"))
        }
    }

    /// Cache that records calls and optionally fails every one of them
    #[derive(Default)]
    struct RecordingCache {
        evictions: Mutex<Vec<(String, CacheKey)>>,
        clears: Mutex<Vec<String>>,
        fail: bool,
    }

    impl RecordingCache {
        fn failing() -> Self {
            Self {
                fail: true,
                ..Self::default()
            }
        }

        fn evictions(&self) -> Vec<(String, CacheKey)> {
            self.evictions.lock().clone()
        }

        fn clears(&self) -> Vec<String> {
            self.clears.lock().clone()
        }
    }

    impl CacheStore for RecordingCache {
        fn evict(&self, region: &str, key: &CacheKey) -> Result<()> {
            self.evictions
                .lock()
                .push((region.to_string(), key.clone()));
            if self.fail {
                return Err(crate::cache_error!("store unavailable"));
            }
            Ok(())
        }

        fn clear(&self, region: &str) -> Result<()> {
            self.clears.lock().push(region.to_string());
            if self.fail {
                return Err(crate::cache_error!("store unavailable"));
            }
            Ok(())
        }
    }

    fn controller_on(
        hub: &LocalGroup,
        cache: Arc<dyn CacheStore>,
    ) -> ClusterController {
        ClusterController::new("invalidation", Arc::new(hub.transport()), cache)
    }

    /// A bare group member used to inject raw payloads at peers
    async fn raw_member(hub: &LocalGroup) -> (LocalGroupTransport, MemberAddress) {
        struct Sink;
        impl MessageReceiver for Sink {
            fn on_message(&self, _sender: &MemberAddress, _payload: &[u8]) {}
        }
        impl MembershipListener for Sink {
            fn on_view_change(&self, _members: &[MemberAddress]) {}
        }

        let transport = hub.transport();
        let address = transport
            .join("invalidation", Arc::new(Sink), Arc::new(Sink))
            .await
            .expect("raw member should join");
        (transport, address)
    }

    #[tokio::test]
    async fn test_connect_and_disconnect_lifecycle() {
        let hub = LocalGroup::new();
        let controller = controller_on(&hub, Arc::new(MemoryCache::new()));

        assert!(!controller.is_connected());
        controller.connect().await.expect("connect should succeed");
        assert!(controller.is_connected());
        assert_eq!(hub.member_count("invalidation"), 1);

        controller.disconnect().await.expect("disconnect should succeed");
        assert!(!controller.is_connected());
        assert_eq!(hub.member_count("invalidation"), 0);
    }

    #[tokio::test]
    async fn test_disconnect_is_idempotent() {
        let hub = LocalGroup::new();
        let controller = controller_on(&hub, Arc::new(MemoryCache::new()));

        // Never connected: still Ok
        controller.disconnect().await.unwrap();

        controller.connect().await.unwrap();
        controller.disconnect().await.unwrap();
        controller.disconnect().await.unwrap();
        assert!(!controller.is_connected());
    }

    #[tokio::test]
    async fn test_failed_connect_stays_disconnected() {
        let cache = Arc::new(RecordingCache::default());
        let controller =
            ClusterController::new("invalidation", Arc::new(FailingTransport), cache.clone());

        let result = controller.connect().await;
        match result {
            Err(TattlerError::Connection(cause)) => {
                assert!(matches!(*cause, TattlerError::Transport(_)));
            }
            other => panic!("Expected Connection error, got {:?}", other),
        }

        assert!(!controller.is_connected());
        assert!(controller.dispatcher.local_address.read().is_none());
        assert!(cache.evictions().is_empty());
    }

    #[tokio::test]
    async fn test_evict_propagates_to_peer_only() {
        let hub = LocalGroup::new();
        let sender_cache = Arc::new(MemoryCache::new());
        let peer_cache = Arc::new(MemoryCache::new());

        let sender = controller_on(&hub, sender_cache.clone());
        let peer = controller_on(&hub, peer_cache.clone());
        sender.connect().await.unwrap();
        peer.connect().await.unwrap();

        // Both nodes hold the entry; only the peer should lose it, the
        // sender's copy is the application's business.
        sender_cache.put("users", CacheKey::Int(42), b"v".to_vec());
        peer_cache.put("users", CacheKey::Int(42), b"v".to_vec());

        sender.send_evict("users", 42i64).await;

        assert!(!peer_cache.contains("users", &CacheKey::Int(42)));
        assert!(sender_cache.contains("users", &CacheKey::Int(42)));
    }

    #[tokio::test]
    async fn test_evict_dispatches_exactly_once_per_peer() {
        let hub = LocalGroup::new();
        let peer_cache = Arc::new(RecordingCache::default());

        let sender = controller_on(&hub, Arc::new(MemoryCache::new()));
        let peer = controller_on(&hub, Arc::clone(&peer_cache) as Arc<dyn CacheStore>);
        sender.connect().await.unwrap();
        peer.connect().await.unwrap();

        sender.send_evict("users", 42i64).await;

        let evictions = peer_cache.evictions();
        assert_eq!(evictions.len(), 1);
        assert_eq!(evictions[0], ("users".to_string(), CacheKey::Int(42)));
        assert!(peer_cache.clears().is_empty());
    }

    #[tokio::test]
    async fn test_clear_dispatches_regardless_of_key_content() {
        let hub = LocalGroup::new();
        let peer_cache = Arc::new(RecordingCache::default());

        let sender = controller_on(&hub, Arc::new(MemoryCache::new()));
        let peer = controller_on(&hub, Arc::clone(&peer_cache) as Arc<dyn CacheStore>);
        sender.connect().await.unwrap();
        peer.connect().await.unwrap();

        sender.send_clear("users").await;

        assert_eq!(peer_cache.clears(), vec!["users".to_string()]);
        assert!(peer_cache.evictions().is_empty());

        // A hand-built clear carrying a non-placeholder key still clears
        let (raw, _) = raw_member(&hub).await;
        let odd_clear = Command {
            operator: Command::OPT_CLEAR_KEY,
            region: "orders".to_string(),
            key: CacheKey::Int(999),
        };
        raw.broadcast(&odd_clear.encode().unwrap()).await.unwrap();

        assert!(peer_cache.clears().contains(&"orders".to_string()));
        assert!(peer_cache.evictions().is_empty());
    }

    #[tokio::test]
    async fn test_empty_payload_never_dispatches() {
        let hub = LocalGroup::new();
        let peer_cache = Arc::new(RecordingCache::default());

        let peer = controller_on(&hub, Arc::clone(&peer_cache) as Arc<dyn CacheStore>);
        peer.connect().await.unwrap();

        let (raw, _) = raw_member(&hub).await;
        raw.broadcast(b"").await.unwrap();

        assert!(peer_cache.evictions().is_empty());
        assert!(peer_cache.clears().is_empty());
    }

    #[tokio::test]
    async fn test_malformed_payload_never_dispatches() {
        let hub = LocalGroup::new();
        let peer_cache = Arc::new(RecordingCache::default());

        let peer = controller_on(&hub, Arc::clone(&peer_cache) as Arc<dyn CacheStore>);
        peer.connect().await.unwrap();

        let (raw, _) = raw_member(&hub).await;
        raw.broadcast(b"\xff\xfe not a command").await.unwrap();

        assert!(peer_cache.evictions().is_empty());
        assert!(peer_cache.clears().is_empty());
    }

    #[tokio::test]
    async fn test_deeply_nested_payload_never_dispatches() {
        let hub = LocalGroup::new();
        let peer_cache = Arc::new(RecordingCache::default());

        let peer = controller_on(&hub, Arc::clone(&peer_cache) as Arc<dyn CacheStore>);
        peer.connect().await.unwrap();

        // A structurally valid evict whose key nests compounds far past
        // the decode budget: rejected at decode, receive loop stays up.
        let mut payload = vec![Command::OPT_DELETE_KEY, 0];
        for _ in 0..30_000 {
            payload.extend_from_slice(&[4, 1]);
        }
        payload.push(0);

        let (raw, _) = raw_member(&hub).await;
        raw.broadcast(&payload).await.unwrap();

        assert!(peer_cache.evictions().is_empty());
        assert!(peer_cache.clears().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_operator_never_dispatches() {
        let hub = LocalGroup::new();
        let peer_cache = Arc::new(RecordingCache::default());

        let peer = controller_on(&hub, Arc::clone(&peer_cache) as Arc<dyn CacheStore>);
        peer.connect().await.unwrap();

        let (raw, _) = raw_member(&hub).await;
        let unknown = Command {
            operator: 77,
            region: "users".to_string(),
            key: CacheKey::Int(1),
        };
        raw.broadcast(&unknown.encode().unwrap()).await.unwrap();

        assert!(peer_cache.evictions().is_empty());
        assert!(peer_cache.clears().is_empty());
    }

    #[tokio::test]
    async fn test_self_originated_messages_are_filtered() {
        let hub = LocalGroup::new();
        let cache = Arc::new(RecordingCache::default());

        // The local hub echoes every broadcast back to its sender, so a
        // single connected controller receives its own traffic.
        let controller = controller_on(&hub, Arc::clone(&cache) as Arc<dyn CacheStore>);
        controller.connect().await.unwrap();

        controller.send_evict("users", 42i64).await;
        controller.send_clear("users").await;

        assert!(cache.evictions().is_empty());
        assert!(cache.clears().is_empty());
    }

    #[tokio::test]
    async fn test_send_while_disconnected_is_dropped() {
        let hub = LocalGroup::new();
        let peer_cache = Arc::new(RecordingCache::default());

        let peer = controller_on(&hub, Arc::clone(&peer_cache) as Arc<dyn CacheStore>);
        peer.connect().await.unwrap();

        let offline = controller_on(&hub, Arc::new(MemoryCache::new()));
        offline.send_evict("users", 1i64).await;
        offline.send_clear("users").await;

        assert!(peer_cache.evictions().is_empty());
        assert!(peer_cache.clears().is_empty());
    }

    #[tokio::test]
    async fn test_broadcast_failure_is_swallowed() {
        let controller = ClusterController::new(
            "invalidation",
            Arc::new(SendFailTransport),
            Arc::new(MemoryCache::new()),
        );
        controller.connect().await.unwrap();

        // Neither call panics or surfaces the transport error
        controller.send_evict("users", 42i64).await;
        controller.send_clear("users").await;
        assert!(controller.is_connected());
    }

    #[tokio::test]
    async fn test_cache_failure_is_isolated_per_message() {
        let hub = LocalGroup::new();
        let peer_cache = Arc::new(RecordingCache::failing());

        let sender = controller_on(&hub, Arc::new(MemoryCache::new()));
        let peer = controller_on(&hub, Arc::clone(&peer_cache) as Arc<dyn CacheStore>);
        sender.connect().await.unwrap();
        peer.connect().await.unwrap();

        // The first dispatch fails inside the store; the later messages
        // must still reach it.
        sender.send_evict("users", 1i64).await;
        sender.send_evict("users", 2i64).await;
        sender.send_clear("users").await;

        assert_eq!(peer_cache.evictions().len(), 2);
        assert_eq!(peer_cache.clears().len(), 1);
    }

    #[tokio::test]
    async fn test_commands_traverse_wire_encoding() {
        let hub = LocalGroup::new();
        let peer_cache = Arc::new(RecordingCache::default());

        let sender = controller_on(&hub, Arc::new(MemoryCache::new()));
        let peer = controller_on(&hub, Arc::clone(&peer_cache) as Arc<dyn CacheStore>);
        sender.connect().await.unwrap();
        peer.connect().await.unwrap();

        let compound = CacheKey::Compound(vec![
            CacheKey::Text("tenant-7".to_string()),
            CacheKey::Int(42),
        ]);
        sender.send_evict("users", compound.clone()).await;

        let evictions = peer_cache.evictions();
        assert_eq!(evictions.len(), 1);
        assert_eq!(evictions[0].1, compound);
    }
}
