//! `roboplane-runtime` – Orchestration
//!
//! Where the pieces below it are put to work: picking a node for a job and
//! delivering it, running a node's own heartbeat and task loops, and the
//! facade that ties a transport to the mesh registries.
//!
//! # Modules
//!
//! - [`dispatcher`] – [`MeshDispatcher`][dispatcher::MeshDispatcher]:
//!   ordered candidate selection, driver resolution, send with linear
//!   backoff retry and failover across candidates.
//! - [`monitor`] – [`DispatchMonitor`][monitor::DispatchMonitor]: the
//!   append-only dispatch telemetry log.
//! - [`agent`] – [`NodeAgent`][agent::NodeAgent]: registers a node, keeps
//!   its heartbeat fresh and drains its task queue into a handler.
//! - [`control_plane`] – [`ControlPlane`][control_plane::ControlPlane]: the
//!   facade over a [`NetworkInterface`][roboplane_middleware::NetworkInterface]
//!   that lazily builds the inventory, directory and dispatcher.
//! - [`config`] – [`ControlPlaneConfig`][config::ControlPlaneConfig]:
//!   `~/.roboplane/config.toml` with `ROBOPLANE_*` environment overrides.
//! - [`telemetry`] – [`init_tracing`][telemetry::init_tracing]: the global
//!   `tracing` subscriber with an optional OTLP span exporter.

pub mod agent;
pub mod config;
pub mod control_plane;
pub mod dispatcher;
pub mod monitor;
pub mod telemetry;

pub use agent::{HandlerFailure, NodeAgent, NodeAgentConfig, TaskHandler};
pub use config::{ConfigError, ControlPlaneConfig, StoreBackend};
pub use control_plane::ControlPlane;
pub use dispatcher::MeshDispatcher;
pub use monitor::DispatchMonitor;
pub use telemetry::{TracerProviderGuard, init_tracing};
