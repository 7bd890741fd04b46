//! [`SimRegistry`] – in-process native pins for tests and desk runs.
//!
//! Constructs a [`HardwareRegistry`] whose every pin is backed by a stub
//! driver that records commands without touching real hardware.  Nodes
//! started from a config file get their `[[pins]]` this way.
//!
//! | Driver type | Stub behaviour |
//! |---|---|
//! | [`Actuator`] | Stores the last `set_level` value; `level()` returns it. |
//! | [`Relay`]    | Stores the last `set_state` value; `state()` returns it. |
//!
//! # Example
//!
//! ```rust
//! use ecubus_hal::sim_registry::SimRegistry;
//! use ecubus_middleware::NativeSink;
//! use ecubus_types::{PortId, Value};
//!
//! let registry = SimRegistry::builder()
//!     .with_actuator(PortId(40))
//!     .with_relay(PortId(41))
//!     .build();
//!
//! registry.write_native(PortId(41), &Value::Int(1)).unwrap();
//! assert_eq!(registry.state(PortId(41)), Some(true));
//! ```

use ecubus_types::{BusError, PortId};
use tracing::trace;

use crate::actuator::Actuator;
use crate::registry::HardwareRegistry;
use crate::relay::Relay;

// ─────────────────────────────────────────────────────────────────────────────
// Stub actuator
// ─────────────────────────────────────────────────────────────────────────────

struct StubActuator {
    pin: PortId,
    level: i64,
}

impl Actuator for StubActuator {
    fn pin(&self) -> PortId {
        self.pin
    }

    fn set_level(&mut self, level: i64) -> Result<(), BusError> {
        trace!(pin = %self.pin, level, "sim actuator");
        self.level = level;
        Ok(())
    }

    fn level(&self) -> i64 {
        self.level
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Stub relay
// ─────────────────────────────────────────────────────────────────────────────

struct StubRelay {
    pin: PortId,
    state: bool,
}

impl Relay for StubRelay {
    fn pin(&self) -> PortId {
        self.pin
    }

    fn set_state(&mut self, active: bool) -> Result<(), BusError> {
        trace!(pin = %self.pin, active, "sim relay");
        self.state = active;
        Ok(())
    }

    fn state(&self) -> bool {
        self.state
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// SimRegistry builder
// ─────────────────────────────────────────────────────────────────────────────

/// Builder that constructs a [`HardwareRegistry`] populated with stub
/// drivers.
#[derive(Default)]
pub struct SimRegistry {
    actuator_pins: Vec<PortId>,
    relay_pins: Vec<PortId>,
}

impl SimRegistry {
    /// Create a new builder with no registered stubs.
    pub fn builder() -> Self {
        Self::default()
    }

    /// Register a stub [`Actuator`] on `pin`.
    pub fn with_actuator(mut self, pin: PortId) -> Self {
        self.actuator_pins.push(pin);
        self
    }

    /// Register a stub [`Relay`] on `pin`.
    pub fn with_relay(mut self, pin: PortId) -> Self {
        self.relay_pins.push(pin);
        self
    }

    /// Consume the builder and return a fully populated [`HardwareRegistry`].
    pub fn build(self) -> HardwareRegistry {
        let registry = HardwareRegistry::new();

        for pin in self.actuator_pins {
            registry.register_actuator(Box::new(StubActuator { pin, level: 0 }));
        }

        for pin in self.relay_pins {
            registry.register_relay(Box::new(StubRelay { pin, state: false }));
        }

        registry
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use ecubus_middleware::{ChannelTable, Delivery, LinkEntry, LinkTable, NativeSink, Router};
    use ecubus_types::Value;

    use super::*;

    #[test]
    fn sim_pins_start_idle() {
        let registry = SimRegistry::builder()
            .with_actuator(PortId(40))
            .with_relay(PortId(41))
            .build();
        assert_eq!(registry.level(PortId(40)), Some(0));
        assert_eq!(registry.state(PortId(41)), Some(false));
        assert_eq!(registry.pins(), vec![PortId(40), PortId(41)]);
    }

    #[test]
    fn native_link_drives_sim_pin_through_router() {
        let registry = Arc::new(SimRegistry::builder().with_relay(PortId(41)).build());
        let router = Router::new(Arc::new(ChannelTable::new()), registry.clone()).with_links(
            LinkTable::from_entries([LinkEntry::native(PortId(2), PortId(41))]).unwrap(),
        );

        let delivery = router.dispatch(PortId(2), Value::Int(1)).unwrap();
        assert_eq!(delivery, Delivery::Native(PortId(41)));
        assert_eq!(registry.state(PortId(41)), Some(true));
    }

    #[test]
    fn empty_sim_registry_rejects_writes() {
        let registry = SimRegistry::builder().build();
        let result = registry.write_native(PortId(1), &Value::Int(1));
        assert!(matches!(result, Err(BusError::NativeIo { .. })));
    }
}
