//! The native I/O seam.
//!
//! The bus never talks to hardware itself.  Links classified as
//! [`NativeSink`][ecubus_types::RoutingClass::NativeSink] hand their value to
//! whatever [`NativeSink`] the [`Router`][crate::router::Router] was built
//! with.  `ecubus-hal` provides pin-driver implementations; tests inject
//! recording doubles.

use ecubus_types::{BusError, PortId, Value};
use tracing::debug;

/// Host-provided native output surface.
///
/// # Contract
///
/// * `write_native` must not block the calling task for longer than a
///   register write or a syscall.  Slow devices should buffer internally.
/// * The value is passed through untouched; interpreting it is the sink's
///   business.
pub trait NativeSink: Send + Sync {
    /// Deliver `value` to the native endpoint bound to `port`.
    ///
    /// # Errors
    ///
    /// [`BusError::NativeIo`] when the endpoint is unknown or rejects the
    /// value.
    fn write_native(&self, port: PortId, value: &Value) -> Result<(), BusError>;
}

/// Sink that accepts and discards every write.  Used by nodes without native
/// I/O.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl NativeSink for NullSink {
    fn write_native(&self, port: PortId, value: &Value) -> Result<(), BusError> {
        debug!(port = %port, %value, "native write discarded (no native surface)");
        Ok(())
    }
}
