//! [`ControlPlane`] – single entry point over a transport and the mesh
//! registries.
//!
//! The facade owns a raw [`NetworkInterface`] and, once a
//! [`MembershipStore`] is attached, lazily builds the
//! `InventoryCache → CapabilityDirectory → MeshDispatcher` chain on first
//! use. Attaching a different registry throws that chain away so the next
//! call rebuilds it against the new store.
//!
//! It also implements [`NetworkInterface`] itself by delegating to the
//! wrapped transport, and can drain that transport into a callback on a
//! background thread ([`start_listening`](ControlPlane::start_listening)).
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use roboplane_middleware::MemoryNetwork;
//! use roboplane_runtime::ControlPlane;
//! use roboplane_store::{MemoryStore, MembershipStore};
//! use roboplane_types::{DispatchStatus, NodeInfo, Requirements};
//! use serde_json::json;
//!
//! let store = Arc::new(MemoryStore::new());
//! let plane = ControlPlane::new(Arc::new(MemoryNetwork::new()))
//!     .with_registry(MembershipStore::new(store));
//! plane
//!     .register_node("arm-1", NodeInfo::new("arm.picker@cell-3").with_capabilities(["grip"]))
//!     .unwrap();
//!
//! let needs = Requirements::new().with_capabilities(["grip"]);
//! let outcome = plane.dispatch_to_mesh(&json!({"id": "pick"}), None, Some(&needs)).unwrap();
//! assert_eq!(outcome.status, DispatchStatus::Dispatched);
//! ```

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use roboplane_kernel::{
    CapabilityDirectory, DriverInstaller, DriverRequestHandler, DriverResolver, InventoryCache,
    stale_nodes,
};
use roboplane_middleware::{
    DiscoveryService, MessageCallback, NetworkInterface, NetworkListener, websocket_connector,
};
use roboplane_store::{
    HeartbeatStore, MembershipStore, MembershipUpdate, NodeTaskQueue, SessionStore, TaskQueue,
};
use roboplane_types::{
    CapabilityRecord, DispatchOutcome, MeshError, NodeInfo, Requirements,
};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::agent::{NodeAgent, NodeAgentConfig, TaskHandler};
use crate::config::{ConfigError, ControlPlaneConfig};
use crate::dispatcher::{DEFAULT_RETRY_ATTEMPTS, DEFAULT_RETRY_BACKOFF, MeshDispatcher};
use crate::monitor::DispatchMonitor;

const DEFAULT_LISTEN_INTERVAL: Duration = Duration::from_millis(20);

/// Heartbeat age, in seconds, after which [`ControlPlane::prune_expired_nodes`]
/// evicts a node.
pub const DEFAULT_STALE_AFTER_SECS: f64 = 30.0;

/// Components built on demand from the attached registry.
#[derive(Default)]
struct Lazy {
    inventory: Option<Arc<InventoryCache>>,
    directory: Option<Arc<CapabilityDirectory>>,
    dispatcher: Option<Arc<MeshDispatcher>>,
}

type CallbackSlot = Arc<Mutex<Option<MessageCallback>>>;

pub struct ControlPlane {
    network: Arc<dyn NetworkInterface>,
    registry: Mutex<Option<MembershipStore>>,
    heartbeats: Option<HeartbeatStore>,
    tasks: Option<Arc<dyn NodeTaskQueue>>,
    discovery: Option<Arc<DiscoveryService>>,
    sessions: Option<SessionStore>,

    agent_config: NodeAgentConfig,
    retry_attempts: u32,
    retry_backoff: Duration,
    installer: Option<DriverInstaller>,
    request_handler: Option<DriverRequestHandler>,
    monitor: Arc<DispatchMonitor>,
    stale_after: f64,

    lazy: Mutex<Lazy>,
    listen_interval: Duration,
    callback: CallbackSlot,
    listener: Mutex<Option<NetworkListener>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn not_configured() -> MeshError {
    MeshError::NotConfigured(
        "node registry not attached; call attach_node_registry first".to_string(),
    )
}

impl ControlPlane {
    pub fn new(network: Arc<dyn NetworkInterface>) -> Self {
        Self {
            network,
            registry: Mutex::new(None),
            heartbeats: None,
            tasks: None,
            discovery: None,
            sessions: None,
            agent_config: NodeAgentConfig::default(),
            retry_attempts: DEFAULT_RETRY_ATTEMPTS,
            retry_backoff: DEFAULT_RETRY_BACKOFF,
            installer: None,
            request_handler: None,
            monitor: Arc::new(DispatchMonitor::new()),
            stale_after: DEFAULT_STALE_AFTER_SECS,
            lazy: Mutex::new(Lazy::default()),
            listen_interval: DEFAULT_LISTEN_INTERVAL,
            callback: Arc::new(Mutex::new(None)),
            listener: Mutex::new(None),
        }
    }

    /// Build a control plane from configuration: opens the configured store
    /// and wires the registry, heartbeat store, task queue and discovery.
    /// Discovery is not started.
    pub fn from_config(
        config: &ControlPlaneConfig,
        network: Arc<dyn NetworkInterface>,
    ) -> Result<Self, ConfigError> {
        let handles = config.open_store()?;
        let registry = MembershipStore::with_key(handles.hashes.clone(), &config.membership_key);
        let heartbeats = HeartbeatStore::with_key(handles.hashes.clone(), &config.heartbeat_key);
        let tasks = TaskQueue::with_prefix(handles.lists.clone(), &config.task_prefix);
        let sessions = SessionStore::with_key(handles.hashes.clone(), &config.session_key);

        let mut discovery = DiscoveryService::new(registry.clone(), heartbeats.clone())
            .with_channel(&config.gossip_channel);
        if let Some(pubsub) = handles.pubsub.clone() {
            discovery = discovery.with_pubsub(pubsub);
        }
        if let Some(url) = &config.discovery_ws_url {
            discovery = discovery.with_fallback(websocket_connector(url.as_str()));
        }
        info!(store = %config.store, channel = %config.gossip_channel, "control plane configured");

        Ok(Self::new(network)
            .with_registry(registry)
            .with_heartbeats(heartbeats)
            .with_task_queue(Arc::new(tasks))
            .with_discovery(Arc::new(discovery))
            .with_sessions(sessions)
            .with_stale_after(config.stale_after_secs)
            .with_agent_config(config.agent_config())
            .with_retry(config.retry_attempts, config.retry_backoff())
            .with_listen_interval(config.listen_poll_interval()))
    }

    pub fn with_registry(self, registry: MembershipStore) -> Self {
        self.attach_node_registry(registry);
        self
    }

    pub fn with_heartbeats(mut self, heartbeats: HeartbeatStore) -> Self {
        self.heartbeats = Some(heartbeats);
        self
    }

    pub fn with_task_queue(mut self, tasks: Arc<dyn NodeTaskQueue>) -> Self {
        self.tasks = Some(tasks);
        self
    }

    pub fn with_discovery(mut self, discovery: Arc<DiscoveryService>) -> Self {
        self.discovery = Some(discovery);
        self
    }

    pub fn with_sessions(mut self, sessions: SessionStore) -> Self {
        self.sessions = Some(sessions);
        self
    }

    /// Heartbeat age used by [`prune_expired_nodes`](Self::prune_expired_nodes).
    pub fn with_stale_after(mut self, secs: f64) -> Self {
        self.stale_after = secs;
        self
    }

    /// Loop cadence for agents created by [`create_node_agent`](Self::create_node_agent).
    pub fn with_agent_config(mut self, config: NodeAgentConfig) -> Self {
        self.agent_config = config;
        self
    }

    pub fn with_retry(mut self, attempts: u32, backoff: Duration) -> Self {
        self.retry_attempts = attempts.max(1);
        self.retry_backoff = backoff;
        self
    }

    pub fn with_driver_installer(mut self, installer: DriverInstaller) -> Self {
        self.installer = Some(installer);
        self
    }

    pub fn with_driver_request_handler(mut self, handler: DriverRequestHandler) -> Self {
        self.request_handler = Some(handler);
        self
    }

    /// Sleep of the listen loop when no message is waiting.
    pub fn with_listen_interval(mut self, interval: Duration) -> Self {
        self.listen_interval = interval;
        self
    }

    // ── accessors ──────────────────────────────────────────────────────────

    pub fn network(&self) -> &Arc<dyn NetworkInterface> {
        &self.network
    }

    pub fn registry(&self) -> Option<MembershipStore> {
        lock(&self.registry).clone()
    }

    pub fn heartbeats(&self) -> Option<&HeartbeatStore> {
        self.heartbeats.as_ref()
    }

    pub fn task_queue(&self) -> Option<&Arc<dyn NodeTaskQueue>> {
        self.tasks.as_ref()
    }

    pub fn discovery(&self) -> Option<&Arc<DiscoveryService>> {
        self.discovery.as_ref()
    }

    pub fn sessions(&self) -> Option<&SessionStore> {
        self.sessions.as_ref()
    }

    pub fn stale_after(&self) -> f64 {
        self.stale_after
    }

    /// Dispatch telemetry. Shared by every dispatcher this facade builds.
    pub fn monitor(&self) -> &Arc<DispatchMonitor> {
        &self.monitor
    }

    /// Attach `registry` and drop every component built from the previous
    /// one.
    pub fn attach_node_registry(&self, registry: MembershipStore) {
        *lock(&self.registry) = Some(registry);
        *lock(&self.lazy) = Lazy::default();
        debug!("node registry attached");
    }

    pub fn node_inventory(&self) -> Result<Arc<InventoryCache>, MeshError> {
        let mut lazy = lock(&self.lazy);
        self.ensure_inventory(&mut lazy)
    }

    pub fn capability_directory(&self) -> Result<Arc<CapabilityDirectory>, MeshError> {
        let mut lazy = lock(&self.lazy);
        self.ensure_directory(&mut lazy)
    }

    pub fn mesh_dispatcher(&self) -> Result<Arc<MeshDispatcher>, MeshError> {
        let mut lazy = lock(&self.lazy);
        if let Some(dispatcher) = &lazy.dispatcher {
            return Ok(Arc::clone(dispatcher));
        }
        let directory = self.ensure_directory(&mut lazy)?;
        let mut resolver = DriverResolver::new(Arc::clone(&directory));
        if let Some(installer) = &self.installer {
            resolver = resolver.with_installer(Arc::clone(installer));
        }
        if let Some(handler) = &self.request_handler {
            resolver = resolver.with_request_handler(Arc::clone(handler));
        }
        let dispatcher = Arc::new(
            MeshDispatcher::new(directory, Arc::clone(&self.network))
                .with_resolver(resolver)
                .with_monitor(Arc::clone(&self.monitor))
                .with_retry(self.retry_attempts, self.retry_backoff),
        );
        lazy.dispatcher = Some(Arc::clone(&dispatcher));
        Ok(dispatcher)
    }

    fn ensure_inventory(&self, lazy: &mut Lazy) -> Result<Arc<InventoryCache>, MeshError> {
        if let Some(inventory) = &lazy.inventory {
            return Ok(Arc::clone(inventory));
        }
        let registry = self.registry().ok_or_else(not_configured)?;
        let inventory = Arc::new(InventoryCache::new(registry)?);
        lazy.inventory = Some(Arc::clone(&inventory));
        Ok(inventory)
    }

    fn ensure_directory(&self, lazy: &mut Lazy) -> Result<Arc<CapabilityDirectory>, MeshError> {
        if let Some(directory) = &lazy.directory {
            return Ok(Arc::clone(directory));
        }
        let inventory = self.ensure_inventory(lazy)?;
        let directory = Arc::new(CapabilityDirectory::new(inventory));
        lazy.directory = Some(Arc::clone(&directory));
        Ok(directory)
    }

    // ── listening ──────────────────────────────────────────────────────────

    /// Drain the transport into `callback` on a background thread.
    ///
    /// Calling this again while listening only swaps the callback.
    pub fn start_listening(&self, callback: MessageCallback) {
        *lock(&self.callback) = Some(callback);
        let mut listener = lock(&self.listener);
        if listener.is_some() {
            return;
        }
        let slot = Arc::clone(&self.callback);
        *listener = Some(NetworkListener::spawn(
            Arc::clone(&self.network),
            Arc::new(move |recipient: &str, message: &Value| {
                let current = lock(&slot).clone();
                if let Some(callback) = current {
                    callback(recipient, message);
                }
            }),
            self.listen_interval,
        ));
        info!("control plane listening");
    }

    /// Stop the listen loop and join its thread. Idempotent.
    pub fn stop_listening(&self) {
        if let Some(mut listener) = lock(&self.listener).take() {
            listener.stop();
            info!("control plane stopped listening");
        }
    }

    pub fn is_listening(&self) -> bool {
        lock(&self.listener).as_ref().is_some_and(NetworkListener::is_running)
    }

    // ── mesh helpers ───────────────────────────────────────────────────────

    pub fn register_node(&self, id: &str, info: NodeInfo) -> Result<CapabilityRecord, MeshError> {
        self.capability_directory()?.register(id, info)
    }

    pub fn unregister_node(&self, id: &str) -> Result<(), MeshError> {
        self.node_inventory()?.unregister(id)
    }

    /// Partially update a node. `None` when the node is unknown.
    pub fn update_node(
        &self,
        id: &str,
        update: &MembershipUpdate,
    ) -> Result<Option<CapabilityRecord>, MeshError> {
        self.capability_directory()?.update(id, update)
    }

    pub fn find_nodes(&self, requirements: &Requirements) -> Result<Vec<CapabilityRecord>, MeshError> {
        Ok(self.capability_directory()?.find(requirements))
    }

    /// Reload the inventory cache from the registry. Returns the node count.
    pub fn refresh_inventory(&self) -> Result<usize, MeshError> {
        self.node_inventory()?.refresh()
    }

    /// Register `id`, start a [`NodeAgent`] for it and, if discovery is
    /// attached, gossip its snapshot.
    ///
    /// # Errors
    ///
    /// [`MeshError::NotConfigured`] unless a registry, heartbeat store and
    /// task queue are all configured.
    pub fn create_node_agent(
        &self,
        id: &str,
        info: NodeInfo,
        handler: Option<TaskHandler>,
    ) -> Result<NodeAgent, MeshError> {
        let (Some(registry), Some(heartbeats), Some(tasks)) =
            (self.registry(), self.heartbeats.clone(), self.tasks.clone())
        else {
            return Err(MeshError::NotConfigured(
                "control-plane components (registry, heartbeats, task queue) not configured"
                    .to_string(),
            ));
        };

        self.register_node(id, info.clone())?;
        let agent = NodeAgent::new(id, registry, heartbeats, tasks)
            .with_config(self.agent_config.clone());
        agent.start(info, handler)?;

        if let Some(discovery) = &self.discovery {
            match agent.snapshot() {
                Ok(snapshot) => {
                    discovery.broadcast(&snapshot);
                }
                Err(e) => warn!(robo_id = %id, error = %e, "could not snapshot new agent"),
            }
        }
        Ok(agent)
    }

    pub fn dispatch_to_mesh(
        &self,
        pack: &Value,
        origin: Option<&str>,
        requirements: Option<&Requirements>,
    ) -> Result<DispatchOutcome, MeshError> {
        Ok(self.mesh_dispatcher()?.dispatch(pack, origin, requirements))
    }

    /// Evict nodes whose heartbeat is older than `max_age` seconds from the
    /// registry, the heartbeat store and the inventory cache.
    pub fn prune_stale_nodes(&self, max_age: f64) -> Result<Vec<String>, MeshError> {
        let pruned = match (&self.discovery, self.registry(), &self.heartbeats) {
            (Some(discovery), _, _) => discovery.prune_stale_nodes(max_age)?,
            (None, Some(registry), Some(heartbeats)) => {
                let stale = stale_nodes(&heartbeats.all()?, heartbeats.now(), max_age);
                for id in &stale {
                    registry.leave(id)?;
                    heartbeats.remove(id)?;
                }
                stale
            }
            _ => {
                return Err(MeshError::NotConfigured(
                    "pruning needs discovery or a registry with a heartbeat store".to_string(),
                ));
            }
        };

        if let Some(inventory) = &lock(&self.lazy).inventory {
            for id in &pruned {
                inventory.forget(id);
            }
        }
        Ok(pruned)
    }

    /// [`prune_stale_nodes`](Self::prune_stale_nodes) with the configured
    /// stale age.
    pub fn prune_expired_nodes(&self) -> Result<Vec<String>, MeshError> {
        self.prune_stale_nodes(self.stale_after)
    }
}

impl NetworkInterface for ControlPlane {
    fn send(&self, recipient: &str, message: &Value) -> Result<(), MeshError> {
        self.network.send(recipient, message)
    }

    fn broadcast(&self, message: &Value) -> Result<(), MeshError> {
        self.network.broadcast(message)
    }

    fn receive(&self) -> Option<(String, Value)> {
        self.network.receive()
    }
}

impl Drop for ControlPlane {
    fn drop(&mut self) {
        self.stop_listening();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use roboplane_middleware::MemoryNetwork;
    use roboplane_store::MemoryStore;
    use roboplane_types::{DispatchStatus, ManualClock};
    use serde_json::json;
    use std::thread;

    fn full_plane(store: &Arc<MemoryStore>) -> ControlPlane {
        ControlPlane::new(Arc::new(MemoryNetwork::new()))
            .with_registry(MembershipStore::new(store.clone()))
            .with_heartbeats(HeartbeatStore::new(store.clone()))
            .with_task_queue(Arc::new(TaskQueue::new(store.clone())))
            .with_agent_config(NodeAgentConfig {
                heartbeat_interval: Duration::from_millis(20),
                heartbeat_grace: Duration::from_secs(1),
                task_poll_interval: Duration::from_millis(5),
            })
            .with_retry(1, Duration::ZERO)
    }

    #[test]
    fn helpers_require_a_registry() {
        let plane = ControlPlane::new(Arc::new(MemoryNetwork::new()));
        assert!(matches!(
            plane.register_node("n1", NodeInfo::new("a")),
            Err(MeshError::NotConfigured(_))
        ));
        assert!(matches!(
            plane.dispatch_to_mesh(&json!({}), None, None),
            Err(MeshError::NotConfigured(_))
        ));
        assert!(matches!(
            plane.create_node_agent("n1", NodeInfo::new("a"), None),
            Err(MeshError::NotConfigured(_))
        ));
    }

    #[test]
    fn lazy_components_are_cached_until_reattach() {
        let store = Arc::new(MemoryStore::new());
        let plane = full_plane(&store);
        let first = plane.mesh_dispatcher().unwrap();
        assert!(Arc::ptr_eq(&first, &plane.mesh_dispatcher().unwrap()));

        plane.attach_node_registry(MembershipStore::with_key(store.clone(), "other:nodes"));
        let second = plane.mesh_dispatcher().unwrap();
        assert!(!Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn register_find_update_unregister() {
        let store = Arc::new(MemoryStore::new());
        let plane = full_plane(&store);
        plane
            .register_node("n1", NodeInfo::new("a").with_capabilities(["lidar"]))
            .unwrap();
        let lidar = Requirements::new().with_capabilities(["lidar"]);
        assert_eq!(plane.find_nodes(&lidar).unwrap().len(), 1);

        let updated = plane
            .update_node("n1", &MembershipUpdate::new().capabilities(["camera"]))
            .unwrap()
            .unwrap();
        assert!(updated.info.capabilities.contains("camera"));
        assert!(plane.find_nodes(&lidar).unwrap().is_empty());

        plane.unregister_node("n1").unwrap();
        assert!(plane.registry().unwrap().get("n1").unwrap().is_none());
    }

    #[test]
    fn dispatch_uses_shared_monitor() {
        let store = Arc::new(MemoryStore::new());
        let plane = full_plane(&store);
        plane
            .register_node("n1", NodeInfo::new("addr-1").with_capabilities(["arm"]))
            .unwrap();
        let outcome = plane
            .dispatch_to_mesh(
                &json!({"id": "p", "requirements": {"capabilities": ["arm"]}}),
                Some("ops"),
                None,
            )
            .unwrap();
        assert_eq!(outcome.status, DispatchStatus::Dispatched);
        let (recipient, message) = plane.receive().unwrap();
        assert_eq!(recipient, "addr-1");
        assert_eq!(message["origin"], "ops");
        assert_eq!(plane.monitor().len(), 1);
    }

    #[test]
    fn installer_configured_on_facade_reaches_dispatcher() {
        let store = Arc::new(MemoryStore::new());
        let plane = full_plane(&store).with_driver_installer(Arc::new(|_: &str, _: &str| Ok(true)));
        plane
            .register_node("n1", NodeInfo::new("a").with_capabilities(["arm"]))
            .unwrap();
        let needs = Requirements::new().with_capabilities(["arm"]).with_drivers(["servo"]);
        let outcome = plane.dispatch_to_mesh(&json!({}), None, Some(&needs)).unwrap();
        assert_eq!(outcome.status, DispatchStatus::Dispatched);
        assert!(plane.capability_directory().unwrap().has_driver("n1", "servo"));
    }

    #[test]
    fn listening_delivers_to_latest_callback() {
        let plane = ControlPlane::new(Arc::new(MemoryNetwork::new()))
            .with_listen_interval(Duration::from_millis(5));
        let seen = Arc::new(Mutex::new(Vec::new()));

        let sink = Arc::clone(&seen);
        plane.start_listening(Arc::new(move |_: &str, m: &Value| {
            sink.lock().unwrap().push(("first", m.clone()));
        }));
        let sink = Arc::clone(&seen);
        plane.start_listening(Arc::new(move |_: &str, m: &Value| {
            sink.lock().unwrap().push(("second", m.clone()));
        }));
        assert!(plane.is_listening());

        plane.send("n1", &json!({"k": 1})).unwrap();
        thread::sleep(Duration::from_millis(80));
        plane.stop_listening();
        plane.stop_listening();
        assert!(!plane.is_listening());
        assert_eq!(*seen.lock().unwrap(), vec![("second", json!({"k": 1}))]);
    }

    #[test]
    fn create_node_agent_registers_and_gossips() {
        let store = Arc::new(MemoryStore::new());
        let peer_store = Arc::new(MemoryStore::new());
        let peer = DiscoveryService::new(
            MembershipStore::new(peer_store.clone()),
            HeartbeatStore::new(peer_store.clone()),
        )
        .with_pubsub(store.clone());
        peer.start();

        let discovery = Arc::new(
            DiscoveryService::new(
                MembershipStore::new(store.clone()),
                HeartbeatStore::new(store.clone()),
            )
            .with_pubsub(store.clone()),
        );
        let plane = full_plane(&store).with_discovery(discovery);

        let agent = plane
            .create_node_agent("n1", NodeInfo::new("10.0.0.9").with_capabilities(["lift"]), None)
            .unwrap();
        assert!(agent.is_running());
        assert!(plane.capability_directory().unwrap().get("n1").unwrap().is_some());

        let mut gossiped = false;
        for _ in 0..100 {
            if peer.membership().get("n1").unwrap().is_some() {
                gossiped = true;
                break;
            }
            thread::sleep(Duration::from_millis(10));
        }
        assert!(gossiped);
        let seen = peer.membership().get("n1").unwrap().unwrap();
        assert_eq!(seen.address, "10.0.0.9");
        assert!(seen.capabilities.contains("lift"));
        agent.stop(true).unwrap();
        peer.stop();
    }

    #[test]
    fn prune_without_discovery_uses_heartbeats() {
        let store = Arc::new(MemoryStore::new());
        let clock = ManualClock::new(1000.0);
        let plane = ControlPlane::new(Arc::new(MemoryNetwork::new()))
            .with_registry(MembershipStore::new(store.clone()))
            .with_heartbeats(HeartbeatStore::new(store.clone()).with_clock(clock.clock()));
        plane.register_node("old", NodeInfo::new("a")).unwrap();
        plane.register_node("new", NodeInfo::new("b")).unwrap();
        let beats = plane.heartbeats().unwrap();
        beats.beat("old", Some(900.0)).unwrap();
        beats.beat("new", Some(995.0)).unwrap();

        assert_eq!(plane.prune_stale_nodes(30.0).unwrap(), vec!["old"]);
        assert!(plane.node_inventory().unwrap().get("old").unwrap().is_none());
        assert!(plane.registry().unwrap().get("new").unwrap().is_some());
    }

    #[test]
    fn prune_expired_uses_configured_age() {
        let store = Arc::new(MemoryStore::new());
        let clock = ManualClock::new(1000.0);
        let plane = ControlPlane::new(Arc::new(MemoryNetwork::new()))
            .with_registry(MembershipStore::new(store.clone()))
            .with_heartbeats(HeartbeatStore::new(store.clone()).with_clock(clock.clock()))
            .with_stale_after(10.0);
        plane.register_node("old", NodeInfo::new("a")).unwrap();
        plane.register_node("new", NodeInfo::new("b")).unwrap();
        let beats = plane.heartbeats().unwrap();
        beats.beat("old", Some(985.0)).unwrap();
        beats.beat("new", Some(995.0)).unwrap();

        assert_eq!(plane.prune_expired_nodes().unwrap(), vec!["old"]);
        assert!(plane.registry().unwrap().get("new").unwrap().is_some());
    }

    #[test]
    fn from_config_wires_sessions_and_stale_age() {
        let config = ControlPlaneConfig {
            session_key: "fleet:sessions".to_string(),
            stale_after_secs: 12.5,
            ..ControlPlaneConfig::default()
        };
        let plane = ControlPlane::from_config(&config, Arc::new(MemoryNetwork::new())).unwrap();
        assert_eq!(plane.stale_after(), 12.5);
        let sessions = plane.sessions().unwrap();
        sessions.start("s1", ["n1", "n2"]).unwrap();
        assert_eq!(sessions.sessions().unwrap()["s1"], vec!["n1", "n2"]);
        assert!(sessions.end("s1").unwrap());
    }

    #[test]
    fn from_config_wires_memory_store() {
        let plane =
            ControlPlane::from_config(&ControlPlaneConfig::default(), Arc::new(MemoryNetwork::new()))
                .unwrap();
        assert!(plane.heartbeats().is_some());
        assert!(plane.task_queue().is_some());
        assert_eq!(plane.discovery().unwrap().channel(), "mesh:gossip");
        let agent = plane.create_node_agent("n1", NodeInfo::new("a"), None).unwrap();
        agent.stop(true).unwrap();
    }
}
