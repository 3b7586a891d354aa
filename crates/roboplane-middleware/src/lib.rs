//! `roboplane-middleware` – Transports & Discovery
//!
//! Moves messages between nodes without caring what they mean, and keeps
//! membership in sync across the mesh.
//!
//! # Modules
//!
//! - [`network`] – the [`NetworkInterface`] trait consumed by the dispatcher
//!   and the control plane, plus [`NetworkListener`], a background thread
//!   that drains `receive()` into a callback.
//! - [`memory_network`] – [`MemoryNetwork`]: a bounded in-process transport
//!   with delivery statistics.
//! - [`pubsub_network`] – [`PubSubNetwork`]: a transport over any
//!   [`PubSub`][roboplane_store::PubSub] backend.
//! - [`discovery`] – [`DiscoveryService`]: gossip-based membership
//!   propagation and stale-node eviction.
//! - [`ws_client`] – [`WebSocketDiscoveryClient`]: the push-stream fallback
//!   used when pub/sub is unavailable, with a WebSocket connector.

pub mod discovery;
pub mod memory_network;
pub mod network;
pub mod pubsub_network;
pub mod ws_client;

pub use discovery::{DiscoveryService, DiscoveryTransport, GossipMessage};
pub use memory_network::{MemoryNetwork, NetworkStats};
pub use network::{MessageCallback, NetworkInterface, NetworkListener};
pub use pubsub_network::PubSubNetwork;
pub use ws_client::{ChannelStream, StreamConnector, WebSocketDiscoveryClient, channel_stream, websocket_connector};
