//! `roboplane-store` – the shared external store and the registries built
//! directly on top of it.
//!
//! Everything that is shared between processes in the mesh lives behind
//! three small traits ([`HashStore`], [`ListStore`], [`PubSub`]); any
//! key-value store or broker that offers those primitives is a valid
//! backend.
//!
//! # Modules
//!
//! - [`backend`] – the store traits, [`MessageStream`] and the
//!   [`StoreHandles`] bundle.
//! - [`memory`] – [`MemoryStore`]: a thread-safe in-process backend with
//!   blocking pops and broadcast-channel pub/sub.
//! - [`sqlite`] – [`SqliteStore`]: a file-backed hash + list backend.
//! - [`membership`] – [`MembershipStore`]: `id -> node record` registry.
//! - [`heartbeat`] – [`HeartbeatStore`]: `id -> last-seen timestamp`.
//! - [`tasks`] – [`TaskQueue`]: per-node FIFO queues of [`NodeTask`]s.
//! - [`session`] – [`SessionStore`]: active communication sessions.
//!
//! [`NodeTask`]: roboplane_types::NodeTask

pub mod backend;
pub mod error;
pub mod heartbeat;
pub mod membership;
pub mod memory;
pub mod session;
pub mod sqlite;
pub mod tasks;

pub use backend::{HashStore, ListStore, MessageStream, PubSub, StoreHandles, StreamPoll};
pub use error::StoreError;
pub use heartbeat::HeartbeatStore;
pub use membership::{MembershipStore, MembershipUpdate, NodeFilter};
pub use memory::MemoryStore;
pub use session::SessionStore;
pub use sqlite::SqliteStore;
pub use tasks::{NodeTaskQueue, TaskQueue};
