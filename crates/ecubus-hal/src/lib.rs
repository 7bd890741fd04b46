//! `ecubus-hal` – Native Pins
//!
//! Host-side drivers behind the router's native links.
//!
//! - [`actuator`] – [`Actuator`]: outputs driven to an integer level.
//! - [`relay`] – [`Relay`]: discrete on/off outputs.
//! - [`registry`] – [`HardwareRegistry`]: pin-id keyed driver table that
//!   implements [`NativeSink`][ecubus_middleware::NativeSink].
//! - [`sim_registry`] – [`SimRegistry`]: builds a registry of recording stubs.

pub mod actuator;
pub mod registry;
pub mod relay;
pub mod sim_registry;

pub use actuator::{Actuator, RangedActuator};
pub use registry::HardwareRegistry;
pub use relay::Relay;
pub use sim_registry::SimRegistry;
