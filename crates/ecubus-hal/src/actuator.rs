//! Generic `Actuator` trait for level-driven outputs: PWM channels, motor
//! set-points, servo positions, DAC pins.
//!
//! Drivers implement this trait and register themselves with a
//! [`HardwareRegistry`][crate::registry::HardwareRegistry] under the port id
//! that native links target.

use ecubus_types::{BusError, PortId};

/// A native output driven to an integer level.
pub trait Actuator: Send {
    /// Port id native links use to reach this output.
    fn pin(&self) -> PortId;

    /// Drive the output to `level`.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::NativeIo`] if the level cannot be applied (e.g. the
    /// output is faulted or the level is out of range).
    fn set_level(&mut self, level: i64) -> Result<(), BusError>;

    /// Most recently applied level.
    fn level(&self) -> i64;
}

/// Actuator clamped to an inclusive range, e.g. a servo that accepts
/// `0..=180`.
pub struct RangedActuator<A> {
    inner: A,
    min: i64,
    max: i64,
}

impl<A: Actuator> RangedActuator<A> {
    pub fn new(inner: A, min: i64, max: i64) -> Self {
        Self { inner, min, max }
    }
}

impl<A: Actuator> Actuator for RangedActuator<A> {
    fn pin(&self) -> PortId {
        self.inner.pin()
    }

    fn set_level(&mut self, level: i64) -> Result<(), BusError> {
        if !(self.min..=self.max).contains(&level) {
            return Err(BusError::NativeIo {
                port: self.inner.pin(),
                details: format!("level {level} outside {}..={}", self.min, self.max),
            });
        }
        self.inner.set_level(level)
    }

    fn level(&self) -> i64 {
        self.inner.level()
    }
}
