//! [`HardwareRegistry`] – native pin registry and [`NativeSink`] backend.
//!
//! The registry stores every registered [`Actuator`] and [`Relay`] driver
//! keyed by the port id native links target.  When the router delivers a
//! value along a native link, the registry resolves the driver by that id
//! and applies the value:
//!
//! | Driver | Accepted values | Effect |
//! |---|---|---|
//! | [`Actuator`] | `int`, `long` | `set_level(value)` |
//! | [`Relay`]    | `int`, `long` | `set_state(value != 0)` |
//!
//! Text and object values are rejected with [`BusError::NativeIo`], as are
//! writes to a port with no registered driver.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use ecubus_middleware::NativeSink;
use ecubus_types::{BusError, PortId, Value};
use tracing::{debug, info};

use crate::actuator::Actuator;
use crate::relay::Relay;

/// Native driver registry.
///
/// Construct with [`HardwareRegistry::new`], register drivers, then hand it
/// to the router as its [`NativeSink`].
#[derive(Default)]
pub struct HardwareRegistry {
    actuators: Mutex<HashMap<PortId, Box<dyn Actuator>>>,
    relays: Mutex<HashMap<PortId, Box<dyn Relay>>>,
}

impl HardwareRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an actuator driver.  Any previously registered actuator on
    /// the same pin is replaced.
    pub fn register_actuator(&self, actuator: Box<dyn Actuator>) {
        let pin = actuator.pin();
        debug!(pin = %pin, "actuator registered");
        self.actuators
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(pin, actuator);
    }

    /// Register a relay driver.  Any previously registered relay on the same
    /// pin is replaced.
    pub fn register_relay(&self, relay: Box<dyn Relay>) {
        let pin = relay.pin();
        debug!(pin = %pin, "relay registered");
        self.relays
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(pin, relay);
    }

    /// Current level of the actuator on `pin`.
    pub fn level(&self, pin: PortId) -> Option<i64> {
        self.actuators
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&pin)
            .map(|a| a.level())
    }

    /// Current state of the relay on `pin`.
    pub fn state(&self, pin: PortId) -> Option<bool> {
        self.relays
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&pin)
            .map(|r| r.state())
    }

    /// Every registered pin, actuators first, each group in ascending order.
    pub fn pins(&self) -> Vec<PortId> {
        let mut actuators: Vec<PortId> = self
            .actuators
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .copied()
            .collect();
        let mut relays: Vec<PortId> = self
            .relays
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .copied()
            .collect();
        actuators.sort();
        relays.sort();
        actuators.extend(relays);
        actuators
    }

    /// Safe state for node shutdown: hold every actuator at its current level
    /// and de-energise every relay.
    ///
    /// # Errors
    ///
    /// The first driver failure.  Remaining drivers are still visited.
    pub fn release_all(&self) -> Result<(), BusError> {
        let mut first_err = None;

        for act in self
            .actuators
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values_mut()
        {
            let level = act.level();
            if let Err(e) = act.set_level(level) {
                first_err.get_or_insert(e);
            }
        }
        for relay in self
            .relays
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values_mut()
        {
            if let Err(e) = relay.set_state(false) {
                first_err.get_or_insert(e);
            }
        }

        info!("native outputs released");
        first_err.map_or(Ok(()), Err)
    }
}

/// Integer payload of a native write, or the rejection for other kinds.
fn integer_level(port: PortId, value: &Value) -> Result<i64, BusError> {
    match value {
        Value::Int(v) => Ok(i64::from(*v)),
        Value::Long(v) => Ok(*v),
        other => Err(BusError::NativeIo {
            port,
            details: format!("native pins take int or long values, got {}", other.kind()),
        }),
    }
}

impl NativeSink for HardwareRegistry {
    fn write_native(&self, port: PortId, value: &Value) -> Result<(), BusError> {
        if let Some(act) = self
            .actuators
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get_mut(&port)
        {
            return act.set_level(integer_level(port, value)?);
        }

        if let Some(relay) = self
            .relays
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get_mut(&port)
        {
            return relay.set_state(integer_level(port, value)? != 0);
        }

        Err(BusError::NativeIo {
            port,
            details: format!("no native driver registered on pin {port}"),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // ------------------------------------------------------------------
    // Test doubles
    // ------------------------------------------------------------------

    struct MockActuator {
        pin: PortId,
        level: i64,
    }
    impl MockActuator {
        fn new(pin: u32) -> Box<Self> {
            Box::new(Self { pin: PortId(pin), level: 0 })
        }
    }
    impl Actuator for MockActuator {
        fn pin(&self) -> PortId {
            self.pin
        }
        fn set_level(&mut self, level: i64) -> Result<(), BusError> {
            self.level = level;
            Ok(())
        }
        fn level(&self) -> i64 {
            self.level
        }
    }

    struct MockRelay {
        pin: PortId,
        state: bool,
    }
    impl MockRelay {
        fn new(pin: u32) -> Box<Self> {
            Box::new(Self { pin: PortId(pin), state: false })
        }
    }
    impl Relay for MockRelay {
        fn pin(&self) -> PortId {
            self.pin
        }
        fn set_state(&mut self, active: bool) -> Result<(), BusError> {
            self.state = active;
            Ok(())
        }
        fn state(&self) -> bool {
            self.state
        }
    }

    // ------------------------------------------------------------------
    // Tests
    // ------------------------------------------------------------------

    #[test]
    fn int_value_drives_actuator_level() {
        let registry = HardwareRegistry::new();
        registry.register_actuator(MockActuator::new(40));

        registry.write_native(PortId(40), &Value::Int(255)).unwrap();
        assert_eq!(registry.level(PortId(40)), Some(255));

        registry.write_native(PortId(40), &Value::Long(-7)).unwrap();
        assert_eq!(registry.level(PortId(40)), Some(-7));
    }

    #[test]
    fn non_zero_value_energises_relay() {
        let registry = HardwareRegistry::new();
        registry.register_relay(MockRelay::new(41));

        registry.write_native(PortId(41), &Value::Int(1)).unwrap();
        assert_eq!(registry.state(PortId(41)), Some(true));

        registry.write_native(PortId(41), &Value::Long(0)).unwrap();
        assert_eq!(registry.state(PortId(41)), Some(false));
    }

    #[test]
    fn text_value_is_rejected() {
        let registry = HardwareRegistry::new();
        registry.register_relay(MockRelay::new(41));

        let result = registry.write_native(PortId(41), &Value::from("on"));
        let Err(BusError::NativeIo { port, details }) = result else {
            panic!("expected a native I/O error");
        };
        assert_eq!(port, PortId(41));
        assert!(details.ends_with("got text"), "{details}");
        assert_eq!(registry.state(PortId(41)), Some(false));
    }

    #[test]
    fn unregistered_pin_returns_error() {
        let registry = HardwareRegistry::new();
        let result = registry.write_native(PortId(99), &Value::Int(1));
        assert!(matches!(result, Err(BusError::NativeIo { .. })));
    }

    #[test]
    fn release_all_de_energises_relays_and_holds_levels() {
        let registry = HardwareRegistry::new();
        registry.register_actuator(MockActuator::new(40));
        registry.register_relay(MockRelay::new(41));
        registry.write_native(PortId(40), &Value::Int(120)).unwrap();
        registry.write_native(PortId(41), &Value::Int(1)).unwrap();

        registry.release_all().unwrap();
        assert_eq!(registry.level(PortId(40)), Some(120));
        assert_eq!(registry.state(PortId(41)), Some(false));
    }

    #[test]
    fn re_registering_replaces_old_driver() {
        let registry = HardwareRegistry::new();
        registry.register_actuator(MockActuator::new(40));
        registry.write_native(PortId(40), &Value::Int(3)).unwrap();

        registry.register_actuator(MockActuator::new(40));
        assert_eq!(registry.level(PortId(40)), Some(0));
        assert_eq!(registry.pins(), vec![PortId(40)]);
    }
}
