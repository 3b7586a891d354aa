//! `roboplane-types` – shared vocabulary of the mesh control plane.
//!
//! Every other crate in the workspace speaks in these types: node
//! addresses, inventory records, queued tasks, dispatch outcomes and the
//! gossip snapshot a node advertises about itself.
//!
//! # Modules
//!
//! - [`address`] – [`NodeAddress`]: the canonical `type.role@place#instance`
//!   identity, with parsing, formatting and similarity scoring.
//! - [`error`] – [`MeshError`]: the workspace-wide error type.
//! - [`node`] – [`NodeInfo`], [`CapabilityRecord`], [`Requirements`] and
//!   [`NodeTask`].
//! - [`dispatch`] – [`DispatchStatus`], [`DispatchOutcome`] and the
//!   [`DispatchEvent`] telemetry record.
//! - [`gossip`] – [`NodeSnapshot`], the JSON payload exchanged over the
//!   gossip channel.
//! - [`clock`] – wall-clock helpers and an injectable [`Clock`].
//! - [`json`] – lenient helpers for reading loosely typed JSON objects.

pub mod address;
pub mod clock;
pub mod dispatch;
pub mod error;
pub mod gossip;
pub mod json;
pub mod node;

pub use address::{AddressComparison, AddressField, NodeAddress};
pub use clock::{Clock, ManualClock, system_clock, unix_now};
pub use dispatch::{DispatchEvent, DispatchOutcome, DispatchStatus, pack_identifier};
pub use error::MeshError;
pub use gossip::NodeSnapshot;
pub use json::JsonMap;
pub use node::{CapabilityRecord, NodeInfo, NodeTask, Requirements};
