//! [`Placement`] – chooses the ECU that hosts a newly installed plugin.
//!
//! | Strategy | Choice |
//! |---|---|
//! | `RANDOM` | uniform among ECUs with spare capacity |
//! | `SAME_ECU` | the ECU hosting the reference component |
//! | `DIFF_ECU` | lowest-id ECU with spare capacity other than the reference's host |
//! | `SPECIFIC` | the ECU named by the request |
//! | `MAX_MEMORY` / `MAX_CPU` / `MAX_STORAGE` | largest remaining budget in that resource, ties to the lowest id |
//!
//! An ECU has spare capacity when every remaining budget covers the
//! request's [`ResourceDemand`].  The strategy is consumed by the decision
//! and is not stored with the plugin.

use std::cmp::Reverse;
use std::collections::BTreeMap;

use ecubus_types::{AllocationStrategy, BusError, EcuId, InstallRequest, ResourceDemand};
use rand::Rng;
use rand::seq::IndexedRandom;
use tracing::{debug, info};

// ─────────────────────────────────────────────────────────────────────────────
// ECU
// ─────────────────────────────────────────────────────────────────────────────

/// One electronic control unit and what is running on it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ecu {
    pub id: EcuId,
    pub name: String,
    pub capacity: ResourceDemand,
    used: ResourceDemand,
    /// Resident plugin name → demand charged for it.
    residents: BTreeMap<String, ResourceDemand>,
}

impl Ecu {
    pub fn new(id: EcuId, name: impl Into<String>, capacity: ResourceDemand) -> Self {
        Self {
            id,
            name: name.into(),
            capacity,
            used: ResourceDemand::default(),
            residents: BTreeMap::new(),
        }
    }

    /// Budgets not yet charged to a resident.
    pub fn remaining(&self) -> ResourceDemand {
        ResourceDemand {
            memory: self.capacity.memory.saturating_sub(self.used.memory),
            cpu: self.capacity.cpu.saturating_sub(self.used.cpu),
            storage: self.capacity.storage.saturating_sub(self.used.storage),
        }
    }

    pub fn has_spare(&self, demand: &ResourceDemand) -> bool {
        let left = self.remaining();
        left.memory >= demand.memory && left.cpu >= demand.cpu && left.storage >= demand.storage
    }

    pub fn hosts(&self, plugin: &str) -> bool {
        self.residents.contains_key(plugin)
    }

    pub fn residents(&self) -> impl Iterator<Item = &str> {
        self.residents.keys().map(String::as_str)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Placement
// ─────────────────────────────────────────────────────────────────────────────

/// The pool of ECUs plugins can be placed on.
#[derive(Debug, Clone, Default)]
pub struct Placement {
    ecus: BTreeMap<EcuId, Ecu>,
}

impl Placement {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an ECU.  An ECU with the same id is replaced.
    pub fn add_ecu(&mut self, ecu: Ecu) {
        debug!(ecu = %ecu.id, name = %ecu.name, "ecu added");
        self.ecus.insert(ecu.id, ecu);
    }

    pub fn with_ecu(mut self, ecu: Ecu) -> Self {
        self.add_ecu(ecu);
        self
    }

    pub fn ecu(&self, id: EcuId) -> Option<&Ecu> {
        self.ecus.get(&id)
    }

    /// ECUs in ascending id order.
    pub fn ecus(&self) -> impl Iterator<Item = &Ecu> {
        self.ecus.values()
    }

    /// The ECU currently hosting `plugin`.
    pub fn host_of(&self, plugin: &str) -> Option<EcuId> {
        self.ecus.values().find(|e| e.hosts(plugin)).map(|e| e.id)
    }

    /// Choose an ECU for `request` using the thread-local RNG for `RANDOM`.
    pub fn place(&self, request: &InstallRequest) -> Result<EcuId, BusError> {
        self.place_with_rng(request, &mut rand::rng())
    }

    /// Choose an ECU for `request`.
    ///
    /// # Errors
    ///
    /// [`BusError::PlacementExhausted`] when no ECU satisfies the strategy,
    /// including a missing reference component or target name.
    pub fn place_with_rng<R: Rng + ?Sized>(
        &self,
        request: &InstallRequest,
        rng: &mut R,
    ) -> Result<EcuId, BusError> {
        let strategy = request.strategy;
        let demand = &request.demand;
        let exhausted = |reason: String| BusError::PlacementExhausted { strategy, reason };

        let chosen = match strategy {
            AllocationStrategy::Random => {
                let eligible: Vec<&Ecu> = self.with_spare(demand).collect();
                eligible
                    .choose(rng)
                    .map(|e| e.id)
                    .ok_or_else(|| exhausted("no ECU has spare capacity".into()))?
            }

            AllocationStrategy::SameEcu => {
                let host = self.reference_host(request).map_err(exhausted)?;
                let ecu = &self.ecus[&host];
                if !ecu.has_spare(demand) {
                    return Err(exhausted(format!("ECU '{}' has no spare capacity", ecu.name)));
                }
                host
            }

            AllocationStrategy::DiffEcu => {
                let host = self.reference_host(request).map_err(exhausted)?;
                self.with_spare(demand)
                    .find(|e| e.id != host)
                    .map(|e| e.id)
                    .ok_or_else(|| exhausted(format!("no ECU other than {host} has spare capacity")))?
            }

            AllocationStrategy::Specific => {
                let target = request
                    .target_ecu
                    .as_deref()
                    .ok_or_else(|| exhausted("no target ECU named".into()))?;
                let ecu = self
                    .ecus
                    .values()
                    .find(|e| e.name == target)
                    .ok_or_else(|| exhausted(format!("no ECU named '{target}'")))?;
                if !ecu.has_spare(demand) {
                    return Err(exhausted(format!("ECU '{target}' has no spare capacity")));
                }
                ecu.id
            }

            AllocationStrategy::MaxMemory => self
                .largest(demand, |r| r.memory)
                .ok_or_else(|| exhausted("no ECU has spare capacity".into()))?,
            AllocationStrategy::MaxCpu => self
                .largest(demand, |r| r.cpu)
                .ok_or_else(|| exhausted("no ECU has spare capacity".into()))?,
            AllocationStrategy::MaxStorage => self
                .largest(demand, |r| r.storage)
                .ok_or_else(|| exhausted("no ECU has spare capacity".into()))?,
        };

        debug!(plugin = %request.plugin_name, %strategy, ecu = %chosen, "placement decided");
        Ok(chosen)
    }

    /// Record `plugin` as resident on `ecu` and charge `demand` to it.
    ///
    /// # Errors
    ///
    /// [`BusError::PlacementExhausted`] when `ecu` is not in the pool.
    pub fn assign(&mut self, ecu: EcuId, plugin: &str, demand: ResourceDemand) -> Result<(), BusError> {
        let target = self.ecus.get_mut(&ecu).ok_or_else(|| BusError::PlacementExhausted {
            strategy: AllocationStrategy::Specific,
            reason: format!("ECU {ecu} is not in the pool"),
        })?;
        target.used.memory += demand.memory;
        target.used.cpu += demand.cpu;
        target.used.storage += demand.storage;
        target.residents.insert(plugin.to_string(), demand);
        info!(plugin, ecu = %ecu, "plugin placed");
        Ok(())
    }

    /// Remove `plugin` from its ECU and refund its demand.  Returns the ECU
    /// it was on.
    pub fn release(&mut self, plugin: &str) -> Option<EcuId> {
        let ecu = self.ecus.values_mut().find(|e| e.hosts(plugin))?;
        if let Some(demand) = ecu.residents.remove(plugin) {
            ecu.used.memory = ecu.used.memory.saturating_sub(demand.memory);
            ecu.used.cpu = ecu.used.cpu.saturating_sub(demand.cpu);
            ecu.used.storage = ecu.used.storage.saturating_sub(demand.storage);
        }
        Some(ecu.id)
    }

    // ── helpers ─────────────────────────────────────────────────────────────

    fn with_spare<'a>(&'a self, demand: &'a ResourceDemand) -> impl Iterator<Item = &'a Ecu> {
        self.ecus.values().filter(move |e| e.has_spare(demand))
    }

    fn reference_host(&self, request: &InstallRequest) -> Result<EcuId, String> {
        let reference = request
            .reference_component
            .as_deref()
            .ok_or_else(|| "no reference component named".to_string())?;
        self.host_of(reference)
            .ok_or_else(|| format!("reference component '{reference}' is not hosted anywhere"))
    }

    fn largest(&self, demand: &ResourceDemand, budget: impl Fn(&ResourceDemand) -> u64) -> Option<EcuId> {
        self.with_spare(demand)
            .min_by_key(|e| (Reverse(budget(&e.remaining())), e.id))
            .map(|e| e.id)
    }
}
