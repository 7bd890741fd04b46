//! `ecubus-kernel` – Bookkeeping & Policy
//!
//! Holds the node's authoritative state about ports, ECUs and plugins.  It
//! does not move data; the middleware does that.
//!
//! # Modules
//!
//! - [`port_registry`] – [`PortBindings`][port_registry::PortBindings]:
//!   validated install-time name → id tables, and
//!   [`PortRegistry`][port_registry::PortRegistry]: every port bound on the
//!   node, unique by id.
//! - [`placement`] – [`Placement`][placement::Placement]: the ECU pool and
//!   the allocation strategies that pick a host for a new plugin.
//! - [`plugin_table`] – [`PluginTable`][plugin_table::PluginTable]: per-plugin
//!   lifecycle records and the state machine guarding them, plus the
//!   node-wide [`IdAllocator`][plugin_table::IdAllocator].

pub mod placement;
pub mod plugin_table;
pub mod port_registry;

pub use placement::{Ecu, Placement};
pub use plugin_table::{IdAllocator, PluginRecord, PluginTable, can_transition};
pub use port_registry::{PortBindings, PortRegistry};
