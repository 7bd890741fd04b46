//! [`PortRegistry`] – validated port-name → port-id bindings.
//!
//! A plugin's binding table arrives once, at install, as an ordered flat list
//! `["ap", "0", "adc", "1"]`.  [`PortBindings`] validates it, then
//! [`PortBindings::resolve`] pairs every declared port with its id.  The
//! resulting [`Port`] values are immutable for the plugin's lifetime and are
//! registered node-wide so no two plugins can claim the same id.
//!
//! Lookups by name happen during a plugin's init phase only; the runtime
//! caches the ids it gets back.

use std::collections::HashMap;

use ecubus_types::{BusError, PluginId, Port, PortDecl, PortId};
use tracing::debug;

// ─────────────────────────────────────────────────────────────────────────────
// Install-time bindings
// ─────────────────────────────────────────────────────────────────────────────

/// Ordered, validated `(name, id)` pairs for one plugin.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PortBindings {
    pairs: Vec<(String, PortId)>,
}

impl PortBindings {
    /// Parse a flat `[name, id, name, id, ...]` table.
    ///
    /// # Errors
    ///
    /// [`BusError::MalformedBindings`] for an odd-length list, an id that is
    /// not a non-negative integer, or a name that appears twice.
    ///
    /// ```
    /// use ecubus_kernel::port_registry::PortBindings;
    /// use ecubus_types::PortId;
    ///
    /// let b = PortBindings::from_flat(&["ap", "0", "adc", "1"]).unwrap();
    /// assert_eq!(b.get("adc"), Some(PortId(1)));
    /// assert!(PortBindings::from_flat(&["ap", "0", "adc"]).is_err());
    /// ```
    pub fn from_flat<S: AsRef<str>>(flat: &[S]) -> Result<Self, BusError> {
        if flat.len() % 2 != 0 {
            return Err(BusError::MalformedBindings(format!(
                "binding list has odd length {}",
                flat.len()
            )));
        }

        let pairs = flat
            .chunks_exact(2)
            .map(|pair| {
                let name = pair[0].as_ref();
                let raw = pair[1].as_ref().trim();
                raw.parse::<u32>()
                    .map(|id| (name.to_string(), PortId(id)))
                    .map_err(|_| {
                        BusError::MalformedBindings(format!(
                            "port '{name}' has non-numeric id '{raw}'"
                        ))
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Self::checked(pairs)
    }

    /// Build from already-typed pairs.
    ///
    /// # Errors
    ///
    /// [`BusError::MalformedBindings`] when a name appears twice.
    pub fn from_pairs<I, S>(pairs: I) -> Result<Self, BusError>
    where
        I: IntoIterator<Item = (S, PortId)>,
        S: Into<String>,
    {
        Self::checked(pairs.into_iter().map(|(n, id)| (n.into(), id)).collect())
    }

    fn checked(pairs: Vec<(String, PortId)>) -> Result<Self, BusError> {
        for (i, (name, _)) in pairs.iter().enumerate() {
            if pairs[..i].iter().any(|(other, _)| other == name) {
                return Err(BusError::MalformedBindings(format!(
                    "port '{name}' is bound twice"
                )));
            }
        }
        Ok(Self { pairs })
    }

    /// Id bound to `name`, if any.
    pub fn get(&self, name: &str) -> Option<PortId> {
        self.pairs
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, id)| *id)
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    /// Pair every declaration of `plugin` with its bound id.
    ///
    /// Bindings that match no declaration are ignored.
    ///
    /// # Errors
    ///
    /// [`BusError::UnknownPortName`] for the first declared port without a
    /// binding.  A plugin cannot run without all of its declared ports.
    pub fn resolve(
        &self,
        plugin: &str,
        owner: PluginId,
        decls: &[PortDecl],
    ) -> Result<Vec<Port>, BusError> {
        let ports = decls
            .iter()
            .map(|decl| {
                let id = self.get(&decl.name).ok_or_else(|| BusError::UnknownPortName {
                    plugin: plugin.to_string(),
                    port: decl.name.clone(),
                })?;
                Ok(Port {
                    id,
                    name: decl.name.clone(),
                    direction: decl.direction,
                    kind: decl.kind,
                    mode: decl.mode,
                    owner,
                })
            })
            .collect::<Result<Vec<_>, BusError>>()?;

        if self.pairs.len() > ports.len() {
            debug!(
                plugin,
                bound = self.pairs.len(),
                declared = ports.len(),
                "binding table names ports the plugin does not declare"
            );
        }
        Ok(ports)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Node-wide registry
// ─────────────────────────────────────────────────────────────────────────────

/// Every port bound on this node, keyed by id.
///
/// # Example
///
/// ```
/// use ecubus_kernel::port_registry::{PortBindings, PortRegistry};
/// use ecubus_types::{PluginId, PortDecl, PortId, ValueKind};
///
/// let decls = [PortDecl::provided("ap", ValueKind::Text)];
/// let ports = PortBindings::from_flat(&["ap", "0"])
///     .unwrap()
///     .resolve("AdcPub", PluginId(1), &decls)
///     .unwrap();
///
/// let mut registry = PortRegistry::new();
/// registry.register(ports).unwrap();
/// assert_eq!(registry.bind(PluginId(1), "ap").unwrap(), PortId(0));
/// ```
#[derive(Debug, Default)]
pub struct PortRegistry {
    ports: HashMap<PortId, Port>,
}

impl PortRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a plugin's resolved ports.  All or nothing.
    ///
    /// # Errors
    ///
    /// [`BusError::PortIdInUse`] when any id is already registered on this
    /// node, or appears twice in `ports`.
    pub fn register(&mut self, ports: Vec<Port>) -> Result<(), BusError> {
        for (i, port) in ports.iter().enumerate() {
            if self.ports.contains_key(&port.id) || ports[..i].iter().any(|p| p.id == port.id) {
                return Err(BusError::PortIdInUse(port.id));
            }
        }
        for port in ports {
            self.ports.insert(port.id, port);
        }
        Ok(())
    }

    /// Resolve `name` for `plugin`.
    ///
    /// # Errors
    ///
    /// [`BusError::UnknownPortName`] when `plugin` has no port called `name`.
    pub fn bind(&self, plugin: PluginId, name: &str) -> Result<PortId, BusError> {
        self.ports
            .values()
            .find(|p| p.owner == plugin && p.name == name)
            .map(|p| p.id)
            .ok_or_else(|| BusError::UnknownPortName {
                plugin: plugin.to_string(),
                port: name.to_string(),
            })
    }

    pub fn get(&self, id: PortId) -> Option<&Port> {
        self.ports.get(&id)
    }

    /// Ports owned by `plugin`, in ascending id order.
    pub fn ports_of(&self, plugin: PluginId) -> Vec<&Port> {
        let mut ports: Vec<&Port> = self.ports.values().filter(|p| p.owner == plugin).collect();
        ports.sort_by_key(|p| p.id);
        ports
    }

    /// Drop every port owned by `plugin` and return them.
    pub fn release(&mut self, plugin: PluginId) -> Vec<Port> {
        let ids: Vec<PortId> = self
            .ports
            .values()
            .filter(|p| p.owner == plugin)
            .map(|p| p.id)
            .collect();
        let mut released: Vec<Port> = ids.iter().filter_map(|id| self.ports.remove(id)).collect();
        released.sort_by_key(|p| p.id);
        released
    }

    pub fn len(&self) -> usize {
        self.ports.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ports.is_empty()
    }
}
