//! [`Router`] – dispatches every provided-port write to its destination.
//!
//! For a write on `source` the router consults the current [`LinkTable`]:
//!
//! | Route | Delivery |
//! |---|---|
//! | [`Route::Local`] | direct write into the destination [`Channel`][crate::channel::Channel] |
//! | [`Route::Native`] | [`NativeSink::write_native`] keyed by the destination port id |
//! | [`Route::Remote`] | [`RemoteTransport::send`] with the remote port id |
//!
//! A source without a link is a silent no-op: plugins routinely write to
//! ports nobody has wired yet.  Nothing here blocks the calling task.

use std::sync::{Arc, PoisonError, RwLock};

use ecubus_types::{BusError, PortId, Value, ValueKind};
use tracing::{debug, trace, warn};

use crate::channel::ChannelTable;
use crate::link_table::{LinkTable, Route};
use crate::native::NativeSink;
use crate::transport::{self, RemoteLink, RemoteTransport};

/// What happened to a dispatched value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Written into the channel bound to this port.
    Local(PortId),
    /// Handed to the native sink under this port.
    Native(PortId),
    /// Framed and sent for this remote port.
    Remote(PortId),
    /// No link, or no channel at the destination.  The value is gone.
    Dropped,
}

/// Routes values between channels, the native surface and remote nodes.
pub struct Router {
    channels: Arc<ChannelTable>,
    links: RwLock<Arc<LinkTable>>,
    native: Arc<dyn NativeSink>,
    remote: RwLock<Option<RemoteTransport>>,
}

impl Router {
    /// Create a router with an empty link table and no remote link.
    pub fn new(channels: Arc<ChannelTable>, native: Arc<dyn NativeSink>) -> Self {
        Self {
            channels,
            links: RwLock::new(Arc::new(LinkTable::new())),
            native,
            remote: RwLock::new(None),
        }
    }

    pub fn with_links(self, links: LinkTable) -> Self {
        self.replace_links(links);
        self
    }

    /// Swap in a new link table.  In-flight dispatches finish against the
    /// table they started with.
    pub fn replace_links(&self, links: LinkTable) {
        debug!(links = links.len(), "link table replaced");
        *self.links.write().unwrap_or_else(PoisonError::into_inner) = Arc::new(links);
    }

    /// Snapshot of the current link table.
    pub fn links(&self) -> Arc<LinkTable> {
        Arc::clone(&self.links.read().unwrap_or_else(PoisonError::into_inner))
    }

    /// Attach the cross-node link used for [`Route::Remote`] deliveries.
    pub fn set_remote(&self, link: Arc<dyn RemoteLink>) {
        *self.remote.write().unwrap_or_else(PoisonError::into_inner) =
            Some(RemoteTransport::new(link));
    }

    pub fn channels(&self) -> &Arc<ChannelTable> {
        &self.channels
    }

    /// Route `value` written on `source`.
    ///
    /// # Errors
    ///
    /// * [`BusError::NativeIo`] – the native sink rejected the value.
    /// * [`BusError::Transport`] – the link is remote but no remote link is
    ///   attached, or the link refused the frame.
    ///
    /// An unlinked source is not an error; it yields [`Delivery::Dropped`].
    pub fn dispatch(&self, source: PortId, value: Value) -> Result<Delivery, BusError> {
        let Some(route) = self.links().resolve(source) else {
            trace!(source = %source, "no link for source port, write dropped");
            return Ok(Delivery::Dropped);
        };

        match route {
            Route::Local(dest) => Ok(self.deliver_local(dest, value)),
            Route::Native(dest) => {
                self.native.write_native(dest, &value).inspect_err(|e| {
                    warn!(source = %source, dest = %dest, error = %e, "native write failed");
                })?;
                Ok(Delivery::Native(dest))
            }
            Route::Remote(remote) => {
                let transport = self
                    .remote
                    .read()
                    .unwrap_or_else(PoisonError::into_inner)
                    .clone()
                    .ok_or_else(|| {
                        BusError::Transport(format!(
                            "port {source} is linked to remote port {remote} but no remote link is attached"
                        ))
                    })?;
                transport.send(remote, &value).inspect_err(|e| {
                    warn!(source = %source, remote = %remote, error = %e, "remote send failed");
                })?;
                Ok(Delivery::Remote(remote))
            }
        }
    }

    /// Same-node delivery: write straight into the channel bound to `dest`.
    pub fn deliver_local(&self, dest: PortId, value: Value) -> Delivery {
        if self.channels.write(dest, value) {
            Delivery::Local(dest)
        } else {
            debug!(dest = %dest, "no channel bound to destination port, write dropped");
            Delivery::Dropped
        }
    }

    /// Handle a frame received from another node.
    ///
    /// The frame's port id names a port on this node.  When a channel is
    /// bound to it the value is written there; otherwise the id is treated as
    /// a source and routed through this node's link table.
    ///
    /// # Errors
    ///
    /// * [`BusError::MalformedFrame`] – the frame cannot be decoded.  Nothing
    ///   is delivered in that case.
    /// * [`BusError::UnresolvedLink`] – the port has neither a channel nor a
    ///   link on this node, so the sending peer is misconfigured.
    pub fn deliver_frame(&self, frame: &[u8]) -> Result<Delivery, BusError> {
        let port = transport::peek_port(frame)?;
        let kind = self.kind_for_inbound(port);
        let (port, value) = transport::decode_frame(frame, |_| kind)?;

        if self.channels.get(port).is_some() {
            return Ok(self.deliver_local(port, value));
        }
        if self.links().get(port).is_none() {
            return Err(BusError::UnresolvedLink(port));
        }
        self.dispatch(port, value)
    }

    /// Declared kind used to decode an inbound frame for `port`.  Frames that
    /// only pass through this node keep their raw bytes.
    fn kind_for_inbound(&self, port: PortId) -> ValueKind {
        if let Some(kind) = self.channels.kind_of(port) {
            return kind;
        }
        match self.links().resolve(port) {
            Some(Route::Local(dest)) => self.channels.kind_of(dest).unwrap_or(ValueKind::Object),
            _ => ValueKind::Object,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use ecubus_types::ChannelMode;

    use super::*;
    use crate::link_table::LinkEntry;
    use crate::native::NullSink;
    use crate::transport::{encode_frame, ChannelLink};

    // ------------------------------------------------------------------
    // Test doubles
    // ------------------------------------------------------------------

    #[derive(Default)]
    struct RecordingSink {
        writes: Mutex<Vec<(PortId, Value)>>,
    }

    impl NativeSink for RecordingSink {
        fn write_native(&self, port: PortId, value: &Value) -> Result<(), BusError> {
            self.writes.lock().unwrap().push((port, value.clone()));
            Ok(())
        }
    }

    struct FailingSink;

    impl NativeSink for FailingSink {
        fn write_native(&self, port: PortId, _value: &Value) -> Result<(), BusError> {
            Err(BusError::NativeIo {
                port,
                details: "pin not configured".into(),
            })
        }
    }

    fn router_with(links: Vec<LinkEntry>, native: Arc<dyn NativeSink>) -> Router {
        Router::new(Arc::new(ChannelTable::new()), native)
            .with_links(LinkTable::from_entries(links).unwrap())
    }

    // ------------------------------------------------------------------
    // Tests
    // ------------------------------------------------------------------

    #[test]
    fn same_node_delivers_exact_value() {
        let router = router_with(vec![LinkEntry::same_node(PortId(0), PortId(5))], Arc::new(NullSink));
        router.channels().open(PortId(5), ValueKind::Text, ChannelMode::Latch);

        let delivery = router.dispatch(PortId(0), Value::from("3.4")).unwrap();
        assert_eq!(delivery, Delivery::Local(PortId(5)));
        assert_eq!(router.channels().read(PortId(5)), Some(Value::from("3.4")));
    }

    #[test]
    fn unlinked_source_is_a_noop() {
        let router = router_with(vec![], Arc::new(NullSink));
        assert_eq!(router.dispatch(PortId(3), Value::Int(1)).unwrap(), Delivery::Dropped);
    }

    #[test]
    fn missing_destination_channel_drops() {
        let router = router_with(vec![LinkEntry::same_node(PortId(0), PortId(5))], Arc::new(NullSink));
        assert_eq!(router.dispatch(PortId(0), Value::Int(1)).unwrap(), Delivery::Dropped);
    }

    #[test]
    fn native_link_reaches_sink() {
        let sink = Arc::new(RecordingSink::default());
        let router = router_with(vec![LinkEntry::native(PortId(2), PortId(40))], sink.clone());

        let delivery = router.dispatch(PortId(2), Value::Int(255)).unwrap();
        assert_eq!(delivery, Delivery::Native(PortId(40)));
        assert_eq!(*sink.writes.lock().unwrap(), vec![(PortId(40), Value::Int(255))]);
    }

    #[test]
    fn native_failure_is_returned_not_panicked() {
        let router = router_with(vec![LinkEntry::native(PortId(2), PortId(40))], Arc::new(FailingSink));
        let result = router.dispatch(PortId(2), Value::Int(1));
        assert!(matches!(result, Err(BusError::NativeIo { .. })));
    }

    #[tokio::test]
    async fn remote_link_produces_frame_with_remote_port() {
        let router = router_with(
            vec![LinkEntry::remote(PortId(0), PortId(5), PortId(77))],
            Arc::new(NullSink),
        );
        let (link, mut rx) = ChannelLink::new(8);
        router.set_remote(Arc::new(link));

        let delivery = router.dispatch(PortId(0), Value::Int(9)).unwrap();
        assert_eq!(delivery, Delivery::Remote(PortId(77)));

        let frame = rx.recv().await.unwrap();
        assert_eq!(u32::from_be_bytes([frame[0], frame[1], frame[2], frame[3]]), 77);
    }

    #[test]
    fn remote_link_without_transport_errors() {
        let router = router_with(
            vec![LinkEntry::remote(PortId(0), PortId(5), PortId(77))],
            Arc::new(NullSink),
        );
        assert!(matches!(
            router.dispatch(PortId(0), Value::Int(9)),
            Err(BusError::Transport(_))
        ));
    }

    #[test]
    fn inbound_frame_lands_in_local_channel() {
        let router = router_with(vec![], Arc::new(NullSink));
        router.channels().open(PortId(77), ValueKind::Int, ChannelMode::Mailbox);

        let frame = encode_frame(PortId(77), &Value::Int(9));
        assert_eq!(router.deliver_frame(&frame).unwrap(), Delivery::Local(PortId(77)));
        assert_eq!(router.channels().read(PortId(77)), Some(Value::Int(9)));
    }

    #[test]
    fn inbound_frame_without_channel_follows_links() {
        let router = router_with(vec![LinkEntry::same_node(PortId(77), PortId(8))], Arc::new(NullSink));
        router.channels().open(PortId(8), ValueKind::Long, ChannelMode::Latch);

        let frame = encode_frame(PortId(77), &Value::Long(-3));
        assert_eq!(router.deliver_frame(&frame).unwrap(), Delivery::Local(PortId(8)));
        assert_eq!(router.channels().read(PortId(8)), Some(Value::Long(-3)));
    }

    #[test]
    fn inbound_frame_for_unknown_port_is_unresolved() {
        let router = router_with(vec![], Arc::new(NullSink));
        let frame = encode_frame(PortId(99), &Value::Int(1));
        assert_eq!(router.deliver_frame(&frame).unwrap_err(), BusError::UnresolvedLink(PortId(99)));
    }

    #[test]
    fn malformed_inbound_frame_delivers_nothing() {
        let router = router_with(vec![], Arc::new(NullSink));
        router.channels().open(PortId(77), ValueKind::Long, ChannelMode::Latch);

        // Int payload is too short for a long port.
        let frame = encode_frame(PortId(77), &Value::Int(9));
        assert!(matches!(router.deliver_frame(&frame), Err(BusError::MalformedFrame(_))));
        assert!(router.channels().read(PortId(77)).is_none());
    }

    #[test]
    fn replacing_links_takes_effect_for_next_dispatch() {
        let router = router_with(vec![LinkEntry::same_node(PortId(0), PortId(5))], Arc::new(NullSink));
        router.channels().open(PortId(5), ValueKind::Int, ChannelMode::Latch);
        router.channels().open(PortId(6), ValueKind::Int, ChannelMode::Latch);

        router.replace_links(LinkTable::from_entries([LinkEntry::same_node(PortId(0), PortId(6))]).unwrap());
        router.dispatch(PortId(0), Value::Int(1)).unwrap();

        assert!(router.channels().read(PortId(5)).is_none());
        assert_eq!(router.channels().read(PortId(6)), Some(Value::Int(1)));
    }
}
