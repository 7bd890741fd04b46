//! `ecubus-runtime` – Plugin Execution
//!
//! Runs plugins on top of the data plane and answers the lifecycle protocol.
//!
//! # Modules
//!
//! - [`component`] – the [`Plugin`][component::Plugin] trait, the
//!   [`PluginCatalog`][component::PluginCatalog] of installable plugins, the
//!   port handles a plugin binds during init, and the stop protocol for its
//!   spawned task.
//! - [`lifecycle`] – [`LifecycleManager`][lifecycle::LifecycleManager]:
//!   install / load / uninstall / request-id handling with per-name
//!   serialisation.  Drives placement, port binding and channel creation
//!   through `ecubus-kernel` and `ecubus-middleware`.
//! - [`builtin`] – the `echo` and `heartbeat` diagnostic plugins.
//! - [`telemetry`] – [`init_tracing`][telemetry::init_tracing]: console
//!   logging plus optional OTLP span export tagged with the node's identity.

pub mod builtin;
pub mod component;
pub mod lifecycle;
pub mod telemetry;

pub use builtin::builtin_catalog;
pub use component::{
    DEFAULT_STOP_GRACE, Plugin, PluginCatalog, PluginContext, PluginFactory, ProvidedPort,
    RequiredPort, RunningTask, StopSignal,
};
pub use lifecycle::LifecycleManager;
pub use telemetry::{init_tracing, LogFormat, TelemetrySettings, TracerProviderGuard};
