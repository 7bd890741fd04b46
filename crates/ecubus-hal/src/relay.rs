//! Generic `Relay` trait for discrete on/off outputs (brake lights,
//! solenoids, power switches, …).

use ecubus_types::{BusError, PortId};

/// A discrete on/off native output.
///
/// Drivers implement this trait and register themselves with a
/// [`HardwareRegistry`][crate::registry::HardwareRegistry].
pub trait Relay: Send {
    /// Port id native links use to reach this output.
    fn pin(&self) -> PortId;

    /// Drive the relay to `active` (`true` = energised / on).
    ///
    /// # Errors
    ///
    /// Returns [`BusError::NativeIo`] if the command cannot be applied.
    fn set_state(&mut self, active: bool) -> Result<(), BusError>;

    /// Return the relay's current state (`true` = energised).
    fn state(&self) -> bool;
}
