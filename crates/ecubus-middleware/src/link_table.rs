//! Static routing records: which destination each source port feeds.
//!
//! A [`LinkTable`] is built once when the component graph is configured and
//! is read-only afterwards.  Reconfiguration replaces the whole table (see
//! [`Router::replace_links`][crate::router::Router::replace_links]).
//!
//! In configuration files a link looks like:
//!
//! ```toml
//! [[links]]
//! source = 0
//! dest = 5
//! class = -1      # SameNode
//! remote = -1     # not remote
//! ```

use std::collections::HashMap;

use ecubus_types::{BusError, PortId, RoutingClass};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Configuration value marking "not a remote link".
pub const NOT_REMOTE: i64 = -1;

/// One routing record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkEntry {
    pub source: PortId,
    pub dest: PortId,
    pub class: RoutingClass,
    /// Port id on the far node.  Only meaningful for remote links.
    #[serde(
        default,
        deserialize_with = "deserialize_remote",
        serialize_with = "serialize_remote"
    )]
    pub remote: Option<PortId>,
}

/// Where a write resolved by the link table has to go.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    /// Direct write into a channel on this node.
    Local(PortId),
    /// Hand the value to the native I/O surface under this port id.
    Native(PortId),
    /// Frame the value for this port id on the remote node.
    Remote(PortId),
}

impl LinkEntry {
    pub fn same_node(source: PortId, dest: PortId) -> Self {
        Self {
            source,
            dest,
            class: RoutingClass::SameNode,
            remote: None,
        }
    }

    pub fn native(source: PortId, dest: PortId) -> Self {
        Self {
            source,
            dest,
            class: RoutingClass::NativeSink,
            remote: None,
        }
    }

    pub fn remote(source: PortId, dest: PortId, remote: PortId) -> Self {
        Self {
            source,
            dest,
            class: RoutingClass::RemoteNode,
            remote: Some(remote),
        }
    }

    /// Classify this entry.  A remote classification without a remote port id
    /// is ambiguous and falls back to a same-node delivery.
    pub fn route(&self) -> Route {
        match (self.class, self.remote) {
            (RoutingClass::RemoteNode, Some(remote)) => Route::Remote(remote),
            (RoutingClass::RemoteNode, None) | (RoutingClass::SameNode, _) => {
                Route::Local(self.dest)
            }
            (RoutingClass::NativeSink, _) => Route::Native(self.dest),
        }
    }
}

/// Map from source port to its single [`LinkEntry`].
#[derive(Debug, Clone, Default)]
pub struct LinkTable {
    by_source: HashMap<PortId, LinkEntry>,
}

impl LinkTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a table, rejecting two entries for the same source port.
    pub fn from_entries(entries: impl IntoIterator<Item = LinkEntry>) -> Result<Self, BusError> {
        let mut table = Self::new();
        for entry in entries {
            table.insert(entry)?;
        }
        Ok(table)
    }

    /// Add `entry`.
    ///
    /// # Errors
    ///
    /// [`BusError::DuplicateLink`] when the source port is already linked.
    pub fn insert(&mut self, entry: LinkEntry) -> Result<(), BusError> {
        if self.by_source.contains_key(&entry.source) {
            return Err(BusError::DuplicateLink(entry.source));
        }
        self.by_source.insert(entry.source, entry);
        Ok(())
    }

    pub fn get(&self, source: PortId) -> Option<&LinkEntry> {
        self.by_source.get(&source)
    }

    /// Resolve a source port to its route.  `None` means the destination has
    /// not been configured.
    pub fn resolve(&self, source: PortId) -> Option<Route> {
        self.get(source).map(LinkEntry::route)
    }

    pub fn iter(&self) -> impl Iterator<Item = &LinkEntry> {
        self.by_source.values()
    }

    pub fn len(&self) -> usize {
        self.by_source.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_source.is_empty()
    }
}

fn deserialize_remote<'de, D>(deserializer: D) -> Result<Option<PortId>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<i64>::deserialize(deserializer)?;
    match raw {
        None => Ok(None),
        Some(v) if v < 0 => Ok(None),
        Some(v) => u32::try_from(v)
            .map(|id| Some(PortId(id)))
            .map_err(|_| serde::de::Error::custom(format!("remote port id {v} out of range"))),
    }
}

fn serialize_remote<S>(remote: &Option<PortId>, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    match remote {
        Some(id) => serializer.serialize_i64(i64::from(id.0)),
        None => serializer.serialize_i64(NOT_REMOTE),
    }
}
