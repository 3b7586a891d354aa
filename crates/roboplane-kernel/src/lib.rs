//! `roboplane-kernel` – Inventory & Dependency Logic
//!
//! Decides *which* node can run a piece of work. It does not move bytes;
//! it keeps track of what every node offers and what it still lacks.
//!
//! # Modules
//!
//! - [`inventory`] – [`InventoryCache`][inventory::InventoryCache]: a
//!   mutex-guarded, order-preserving cache of every node's capabilities,
//!   drivers and apps, written through to the
//!   [`MembershipStore`][roboplane_store::MembershipStore].
//! - [`capability_directory`] –
//!   [`CapabilityDirectory`][capability_directory::CapabilityDirectory]:
//!   the capability-oriented query surface used by the dispatcher.
//! - [`driver_resolver`] – [`DriverResolver`][driver_resolver::DriverResolver]:
//!   works out which required drivers a node is missing and, when an
//!   installer is configured, installs them.
//! - [`liveness`] – [`NodeHealth`][liveness::NodeHealth] classification from
//!   heartbeat ages.

pub mod capability_directory;
pub mod driver_resolver;
pub mod inventory;
pub mod liveness;

pub use capability_directory::CapabilityDirectory;
pub use driver_resolver::{DriverInstaller, DriverRequestHandler, DriverResolution, DriverResolver};
pub use inventory::InventoryCache;
pub use liveness::{NodeHealth, classify, stale_nodes};
