//! Data-carrying channels bound to port identifiers.
//!
//! Two variants share the [`Channel`] capability set:
//!
//! | Variant | Write | Read |
//! |---|---|---|
//! | [`LatchChannel`] | replaces the stored value, bumps the generation | copies the latest value, never consumes |
//! | [`MailboxChannel`] | replaces any unconsumed message | takes the pending message, leaving the slot empty |
//!
//! Neither variant blocks or queues.  Each guards a tiny
//! `(value, generation)` record with a mutex, so a write is totally ordered
//! against every other write on the same channel.  Nothing orders writes
//! across channels.
//!
//! [`ChannelTable`] owns every channel of a node, keyed by [`PortId`].

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::time::Duration;

use ecubus_types::{ChannelMode, PortId, Value, ValueKind};
use tokio::time::Instant;
use tracing::debug;

/// Interval between polls in [`poll_within`].
pub const RECEIVE_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Capability set shared by both channel variants.
///
/// `read` returning `None` means "no data": a latch that was never written,
/// or a mailbox with nothing pending.  It is the normal steady state, not an
/// error.
pub trait Channel: Send + Sync {
    /// Store `value`, replacing whatever the slot held.
    fn write(&self, value: Value);

    /// Read the slot.  Mailboxes consume what they return.
    fn read(&self) -> Option<Value>;

    /// Number of writes accepted so far.  Zero means never written.
    fn generation(&self) -> u64;

    fn mode(&self) -> ChannelMode;
}

#[derive(Default)]
struct Slot {
    value: Option<Value>,
    generation: u64,
}

fn lock(slot: &Mutex<Slot>) -> MutexGuard<'_, Slot> {
    slot.lock().unwrap_or_else(PoisonError::into_inner)
}

// ─────────────────────────────────────────────────────────────────────────────
// Latch
// ─────────────────────────────────────────────────────────────────────────────

/// Overwrite-on-write channel: exactly one logical value exists at a time
/// and every read sees the most recent write.
#[derive(Default)]
pub struct LatchChannel {
    slot: Mutex<Slot>,
}

impl LatchChannel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read the latest value together with the generation that produced it.
    pub fn read_with_generation(&self) -> Option<(Value, u64)> {
        let slot = lock(&self.slot);
        slot.value.clone().map(|v| (v, slot.generation))
    }
}

impl Channel for LatchChannel {
    fn write(&self, value: Value) {
        let mut slot = lock(&self.slot);
        slot.value = Some(value);
        slot.generation += 1;
    }

    fn read(&self) -> Option<Value> {
        let slot = lock(&self.slot);
        if slot.generation == 0 {
            return None;
        }
        slot.value.clone()
    }

    fn generation(&self) -> u64 {
        lock(&self.slot).generation
    }

    fn mode(&self) -> ChannelMode {
        ChannelMode::Latch
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Mailbox
// ─────────────────────────────────────────────────────────────────────────────

/// Single-slot, consume-once channel.
///
/// A send while a message is still pending overwrites it: at most one message
/// is ever outstanding, and the newest one wins.
#[derive(Default)]
pub struct MailboxChannel {
    slot: Mutex<Slot>,
}

impl MailboxChannel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Alias for [`Channel::write`].
    pub fn send(&self, value: Value) {
        self.write(value);
    }

    /// Alias for [`Channel::read`]: take the pending message, if any.
    pub fn receive(&self) -> Option<Value> {
        self.read()
    }

    /// `true` when a message is waiting to be received.
    pub fn is_pending(&self) -> bool {
        lock(&self.slot).value.is_some()
    }

    /// Poll [`receive`][Self::receive] until a message arrives or `timeout`
    /// elapses.  See [`poll_within`].
    pub async fn receive_within(&self, timeout: Duration) -> Option<Value> {
        poll_within(self, timeout).await
    }
}

impl Channel for MailboxChannel {
    fn write(&self, value: Value) {
        let mut slot = lock(&self.slot);
        slot.value = Some(value);
        slot.generation += 1;
    }

    fn read(&self) -> Option<Value> {
        lock(&self.slot).value.take()
    }

    fn generation(&self) -> u64 {
        lock(&self.slot).generation
    }

    fn mode(&self) -> ChannelMode {
        ChannelMode::Mailbox
    }
}

/// Bounded-wait read: poll `channel` every [`RECEIVE_POLL_INTERVAL`] until it
/// yields a value or `timeout` elapses.
///
/// The returned future holds no lock between polls.  Dropping it abandons the
/// wait; nothing is left running and no message is consumed.
pub async fn poll_within<C: Channel + ?Sized>(channel: &C, timeout: Duration) -> Option<Value> {
    let deadline = Instant::now() + timeout;
    loop {
        if let Some(value) = channel.read() {
            return Some(value);
        }
        let now = Instant::now();
        if now >= deadline {
            return None;
        }
        tokio::time::sleep(RECEIVE_POLL_INTERVAL.min(deadline - now)).await;
    }
}

/// Build an empty channel of the requested variant.
pub fn open_channel(mode: ChannelMode) -> Arc<dyn Channel> {
    match mode {
        ChannelMode::Latch => Arc::new(LatchChannel::new()),
        ChannelMode::Mailbox => Arc::new(MailboxChannel::new()),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Channel table
// ─────────────────────────────────────────────────────────────────────────────

/// A channel together with the value kind its port declares.
#[derive(Clone)]
pub struct ChannelEntry {
    pub kind: ValueKind,
    pub channel: Arc<dyn Channel>,
}

/// Every channel on this node, keyed by the port id it is bound to.
#[derive(Default)]
pub struct ChannelTable {
    entries: RwLock<HashMap<PortId, ChannelEntry>>,
}

impl ChannelTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a channel for `port`, replacing any previous channel bound to it.
    pub fn open(&self, port: PortId, kind: ValueKind, mode: ChannelMode) -> Arc<dyn Channel> {
        let channel = open_channel(mode);
        let entry = ChannelEntry {
            kind,
            channel: Arc::clone(&channel),
        };
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(port, entry);
        debug!(port = %port, ?kind, ?mode, "channel opened");
        channel
    }

    /// Close the channel bound to `port`.  Returns `false` when none existed.
    pub fn close(&self, port: PortId) -> bool {
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&port)
            .is_some()
    }

    pub fn get(&self, port: PortId) -> Option<Arc<dyn Channel>> {
        self.entry(port).map(|e| e.channel)
    }

    pub fn entry(&self, port: PortId) -> Option<ChannelEntry> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&port)
            .cloned()
    }

    /// Declared value kind of the channel bound to `port`.
    pub fn kind_of(&self, port: PortId) -> Option<ValueKind> {
        self.entry(port).map(|e| e.kind)
    }

    /// Write to the channel bound to `port`.  Returns `false` when no such
    /// channel exists.
    pub fn write(&self, port: PortId, value: Value) -> bool {
        match self.get(port) {
            Some(channel) => {
                channel.write(value);
                true
            }
            None => false,
        }
    }

    /// Read the channel bound to `port`.  Unknown ports read as no data.
    pub fn read(&self, port: PortId) -> Option<Value> {
        self.get(port).and_then(|c| c.read())
    }

    pub fn len(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn latch_reads_no_data_before_first_write() {
        let latch = LatchChannel::new();
        assert!(latch.read().is_none());
        assert_eq!(latch.generation(), 0);
    }

    #[test]
    fn latch_last_write_wins_and_reads_repeat() {
        let latch = LatchChannel::new();
        for v in ["3.3", "3.5", "3.4"] {
            latch.write(Value::from(v));
        }
        assert_eq!(latch.read(), Some(Value::from("3.4")));
        // Reading never consumes.
        assert_eq!(latch.read(), Some(Value::from("3.4")));
        assert_eq!(latch.generation(), 3);
        assert_eq!(latch.read_with_generation(), Some((Value::from("3.4"), 3)));
    }

    #[test]
    fn mailbox_delivers_exactly_once() {
        let mailbox = MailboxChannel::new();
        mailbox.send(Value::Int(120));
        assert_eq!(mailbox.receive(), Some(Value::Int(120)));
        assert_eq!(mailbox.receive(), None);
    }

    #[test]
    fn mailbox_overwrites_unconsumed_message() {
        let mailbox = MailboxChannel::new();
        for i in 0..5 {
            mailbox.send(Value::Int(i));
        }
        assert!(mailbox.is_pending());
        assert_eq!(mailbox.receive(), Some(Value::Int(4)));
        assert!(!mailbox.is_pending());
        assert_eq!(mailbox.generation(), 5);
    }

    #[tokio::test]
    async fn receive_within_returns_none_after_timeout() {
        let mailbox = MailboxChannel::new();
        let started = Instant::now();
        let got = mailbox.receive_within(Duration::from_millis(30)).await;
        assert!(got.is_none());
        assert!(started.elapsed() >= Duration::from_millis(30));
    }

    #[tokio::test]
    async fn receive_within_picks_up_late_message() {
        let mailbox = Arc::new(MailboxChannel::new());
        let writer = Arc::clone(&mailbox);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            writer.send(Value::Int(42));
        });
        let got = mailbox.receive_within(Duration::from_secs(2)).await;
        assert_eq!(got, Some(Value::Int(42)));
        assert_eq!(mailbox.receive(), None);
    }

    #[tokio::test]
    async fn abandoned_wait_does_not_consume() {
        let mailbox = MailboxChannel::new();
        let wait = mailbox.receive_within(Duration::from_secs(5));
        // Give up well before the deadline.
        let result = tokio::time::timeout(Duration::from_millis(20), wait).await;
        assert!(result.is_err());

        mailbox.send(Value::Int(1));
        assert_eq!(mailbox.receive(), Some(Value::Int(1)));
    }

    #[test]
    fn table_routes_writes_by_port_id() {
        let table = ChannelTable::new();
        table.open(PortId(5), ValueKind::Text, ChannelMode::Latch);
        table.open(PortId(6), ValueKind::Int, ChannelMode::Mailbox);

        assert!(table.write(PortId(5), Value::from("hello")));
        assert!(!table.write(PortId(99), Value::from("lost")));
        assert_eq!(table.read(PortId(5)), Some(Value::from("hello")));
        assert_eq!(table.kind_of(PortId(6)), Some(ValueKind::Int));
        assert_eq!(table.get(PortId(6)).map(|c| c.mode()), Some(ChannelMode::Mailbox));
        assert!(table.read(PortId(99)).is_none());
    }

    #[test]
    fn closing_removes_channel() {
        let table = ChannelTable::new();
        table.open(PortId(1), ValueKind::Int, ChannelMode::Latch);
        assert_eq!(table.len(), 1);
        assert!(table.close(PortId(1)));
        assert!(!table.close(PortId(1)));
        assert!(table.is_empty());
    }

    #[test]
    fn concurrent_writers_leave_a_complete_value() {
        let latch = Arc::new(LatchChannel::new());
        let handles: Vec<_> = (0..8)
            .map(|t| {
                let latch = Arc::clone(&latch);
                std::thread::spawn(move || {
                    for i in 0..100 {
                        latch.write(Value::Long(t * 1000 + i));
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(latch.generation(), 800);
        assert!(matches!(latch.read(), Some(Value::Long(_))));
    }
}
