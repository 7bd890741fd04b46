//! `ecubus-middleware` – The Data Plane
//!
//! Moves typed values between plugins without caring what they mean.
//!
//! # Modules
//!
//! - [`channel`] – [`LatchChannel`] and [`MailboxChannel`], the two channel
//!   semantics every port uses, and the node-wide [`ChannelTable`].
//! - [`link_table`] – static `(source → destination)` routing records and
//!   their classification into same-node, native and remote routes.
//! - [`router`] – [`Router`]: dispatches provided-port writes along the link
//!   table and delivers inbound remote frames.
//! - [`native`] – the [`NativeSink`] seam to host hardware I/O.
//! - [`transport`] – remote frame codec and the [`RemoteLink`] seam.
//! - [`bridge`] – [`NodeBridge`]: carries frames between nodes over
//!   WebSocket.
//! - [`publish_bus`] – [`PublishBus`]: keyed `"key|value"` telemetry fan-out,
//!   independent of ports.

pub mod bridge;
pub mod channel;
pub mod link_table;
pub mod native;
pub mod publish_bus;
pub mod router;
pub mod transport;

pub use bridge::{NodeBridge, WsLink};
pub use channel::{Channel, ChannelTable, LatchChannel, MailboxChannel, poll_within};
pub use link_table::{LinkEntry, LinkTable, Route};
pub use native::{NativeSink, NullSink};
pub use publish_bus::{KeySubscriber, PublishBus, Published};
pub use router::{Delivery, Router};
pub use transport::{ChannelLink, RemoteLink, RemoteTransport};
