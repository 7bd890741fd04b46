//! [`PluginTable`] – lifecycle records for every plugin on the node.
//!
//! Each record walks one path through the lifecycle state machine:
//!
//! ```text
//! Requested ──► Installed ──► Running ──► Uninstalling ──► Removed
//!     │             │                          ▲
//!     │             └──────────────────────────┘
//!     └──► Removed   (install failed)
//! ```
//!
//! Any other transition is rejected with [`BusError::InvalidTransition`].
//! A record is dropped from the table when it reaches `Removed`, so its name
//! can be installed again.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU32, Ordering};

use ecubus_types::{BusError, ComponentState, EcuId, PluginId, Port, ResourceDemand};
use tracing::debug;

/// First identifier handed out by an [`IdAllocator`].
pub const FIRST_ID: u32 = 1;

/// Node-wide source of fresh identifiers.  Plugin ids and ids handed out by
/// the request-id protocol come from the same counter, so they never collide.
#[derive(Debug)]
pub struct IdAllocator {
    next: AtomicU32,
}

impl IdAllocator {
    pub fn new() -> Self {
        Self {
            next: AtomicU32::new(FIRST_ID),
        }
    }

    pub fn next(&self) -> u32 {
        self.next.fetch_add(1, Ordering::Relaxed)
    }
}

impl Default for IdAllocator {
    fn default() -> Self {
        Self::new()
    }
}

/// Whether the lifecycle state machine allows `from → to`.
pub fn can_transition(from: ComponentState, to: ComponentState) -> bool {
    use ComponentState::*;
    matches!(
        (from, to),
        (Requested, Installed)
            | (Requested, Removed)
            | (Installed, Running)
            | (Installed, Uninstalling)
            | (Running, Uninstalling)
            | (Uninstalling, Removed)
    )
}

/// Everything the node knows about one plugin.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PluginRecord {
    pub id: PluginId,
    pub name: String,
    pub state: ComponentState,
    pub ecu: Option<EcuId>,
    pub ports: Vec<Port>,
    pub demand: ResourceDemand,
}

/// Plugin records keyed by name.
#[derive(Debug, Default)]
pub struct PluginTable {
    records: BTreeMap<String, PluginRecord>,
}

impl PluginTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a `Requested` record for `name`.
    ///
    /// # Errors
    ///
    /// [`BusError::DuplicateInstall`] when a record for `name` already exists
    /// in any state.
    pub fn admit(&mut self, name: &str, id: PluginId) -> Result<&mut PluginRecord, BusError> {
        if self.records.contains_key(name) {
            return Err(BusError::DuplicateInstall(name.to_string()));
        }
        debug!(plugin = name, id = %id, "plugin requested");
        Ok(self.records.entry(name.to_string()).or_insert(PluginRecord {
            id,
            name: name.to_string(),
            state: ComponentState::Requested,
            ecu: None,
            ports: Vec::new(),
            demand: ResourceDemand::default(),
        }))
    }

    /// Move `name` to `to`.  Reaching `Removed` drops the record, which is
    /// returned.
    ///
    /// # Errors
    ///
    /// * [`BusError::UnknownUninstallTarget`] – no record for `name`.
    /// * [`BusError::InvalidTransition`] – the state machine forbids the move.
    pub fn transition(&mut self, name: &str, to: ComponentState) -> Result<PluginRecord, BusError> {
        let record = self
            .records
            .get_mut(name)
            .ok_or_else(|| BusError::UnknownUninstallTarget(name.to_string()))?;

        if !can_transition(record.state, to) {
            return Err(BusError::InvalidTransition {
                plugin: name.to_string(),
                from: record.state,
                to,
            });
        }
        debug!(plugin = name, from = %record.state, to = %to, "plugin state change");
        record.state = to;
        let snapshot = record.clone();

        if to == ComponentState::Removed {
            self.records.remove(name);
        }
        Ok(snapshot)
    }

    pub fn get(&self, name: &str) -> Option<&PluginRecord> {
        self.records.get(name)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut PluginRecord> {
        self.records.get_mut(name)
    }

    /// Records in name order.
    pub fn iter(&self) -> impl Iterator<Item = &PluginRecord> {
        self.records.values()
    }

    /// Names of plugins in `state`.
    pub fn names_in(&self, state: ComponentState) -> Vec<String> {
        self.records
            .values()
            .filter(|r| r.state == state)
            .map(|r| r.name.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocator_is_monotonic_and_unique() {
        let ids = IdAllocator::new();
        let a = ids.next();
        let b = ids.next();
        assert_eq!(a, FIRST_ID);
        assert!(b > a);
    }

    #[test]
    fn full_lifecycle_path() {
        let mut table = PluginTable::new();
        table.admit("AdcPub", PluginId(1)).unwrap();

        for state in [
            ComponentState::Installed,
            ComponentState::Running,
            ComponentState::Uninstalling,
        ] {
            assert_eq!(table.transition("AdcPub", state).unwrap().state, state);
        }
        let removed = table.transition("AdcPub", ComponentState::Removed).unwrap();
        assert_eq!(removed.state, ComponentState::Removed);
        assert!(table.get("AdcPub").is_none());
    }

    #[test]
    fn duplicate_admit_is_rejected_until_removed() {
        let mut table = PluginTable::new();
        table.admit("AdcPub", PluginId(1)).unwrap();
        table.transition("AdcPub", ComponentState::Installed).unwrap();
        table.transition("AdcPub", ComponentState::Running).unwrap();

        assert_eq!(
            table.admit("AdcPub", PluginId(2)).unwrap_err(),
            BusError::DuplicateInstall("AdcPub".into())
        );

        table.transition("AdcPub", ComponentState::Uninstalling).unwrap();
        table.transition("AdcPub", ComponentState::Removed).unwrap();
        assert!(table.admit("AdcPub", PluginId(2)).is_ok());
    }

    #[test]
    fn skipping_states_is_invalid() {
        let mut table = PluginTable::new();
        table.admit("p", PluginId(1)).unwrap();
        let err = table.transition("p", ComponentState::Running).unwrap_err();
        assert!(matches!(
            err,
            BusError::InvalidTransition {
                from: ComponentState::Requested,
                to: ComponentState::Running,
                ..
            }
        ));
        // Record is untouched.
        assert_eq!(table.get("p").unwrap().state, ComponentState::Requested);
    }

    #[test]
    fn failed_install_goes_straight_to_removed() {
        let mut table = PluginTable::new();
        table.admit("p", PluginId(1)).unwrap();
        table.transition("p", ComponentState::Removed).unwrap();
        assert!(table.is_empty());
    }

    #[test]
    fn unknown_name_is_reported() {
        let mut table = PluginTable::new();
        assert_eq!(
            table.transition("ghost", ComponentState::Uninstalling).unwrap_err(),
            BusError::UnknownUninstallTarget("ghost".into())
        );
    }

    #[test]
    fn names_in_filters_by_state() {
        let mut table = PluginTable::new();
        table.admit("a", PluginId(1)).unwrap();
        table.admit("b", PluginId(2)).unwrap();
        table.transition("b", ComponentState::Installed).unwrap();
        assert_eq!(table.names_in(ComponentState::Installed), vec!["b".to_string()]);
        assert_eq!(table.len(), 2);
    }
}
