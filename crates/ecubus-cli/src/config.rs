//! Node configuration – reads/writes `~/.ecubus/node.toml`.
//!
//! ```toml
//! node_name = "front-left"
//! service_name = "ecubus"
//! listen = "0.0.0.0:7070"
//! peer = "ws://10.0.0.2:7070"
//!
//! [[ecus]]
//! id = 1
//! name = "A"
//! memory = 512
//! cpu = 100
//! storage = 1024
//!
//! [[links]]
//! source = 11
//! dest = 40
//! class = -2
//!
//! [[pins]]
//! port = 40
//! driver = "relay"
//!
//! [[plugins]]
//! name = "echo"
//! strategy = "MAX_MEMORY"
//! bindings = ["in", "10", "out", "11"]
//! ```

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use ecubus_hal::{HardwareRegistry, SimRegistry};
use ecubus_kernel::{Ecu, Placement};
use ecubus_middleware::{LinkEntry, LinkTable};
use ecubus_runtime::TelemetrySettings;
use ecubus_types::{AllocationStrategy, BusError, EcuId, InstallRequest, PortId, ResourceDemand};

/// Overrides the config file location.
pub const CONFIG_PATH_VAR: &str = "ECUBUS_CONFIG";

/// One ECU of the placement pool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EcuConfig {
    pub id: u32,
    pub name: String,
    #[serde(default)]
    pub memory: u64,
    #[serde(default)]
    pub cpu: u64,
    #[serde(default)]
    pub storage: u64,
}

/// Native pin driver kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PinDriver {
    Actuator,
    Relay,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PinConfig {
    pub port: u32,
    pub driver: PinDriver,
}

/// A plugin installed and loaded at boot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginConfig {
    /// Catalog name.
    pub name: String,
    #[serde(default = "default_strategy")]
    pub strategy: AllocationStrategy,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    /// Flat `["name", "id", ...]` binding table.
    #[serde(default)]
    pub bindings: Vec<String>,
    #[serde(default)]
    pub memory: u64,
    #[serde(default)]
    pub cpu: u64,
    #[serde(default)]
    pub storage: u64,
}

impl PluginConfig {
    pub fn to_request(&self) -> InstallRequest {
        InstallRequest {
            plugin_name: self.name.clone(),
            strategy: self.strategy,
            reference_component: self.reference.clone(),
            target_ecu: self.target.clone(),
            bindings: self.bindings.clone(),
            demand: ResourceDemand {
                memory: self.memory,
                cpu: self.cpu,
                storage: self.storage,
            },
        }
    }
}

/// Persisted node configuration stored in `~/.ecubus/node.toml`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_node_name")]
    pub node_name: String,

    /// `service.name` reported with exported spans.
    #[serde(default = "default_service_name")]
    pub service_name: String,

    /// Address the node bridge accepts peer connections on.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub listen: Option<String>,

    /// WebSocket URL of the peer node remote links are sent to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub peer: Option<String>,

    #[serde(default = "default_ecus")]
    pub ecus: Vec<EcuConfig>,

    #[serde(default)]
    pub links: Vec<LinkEntry>,

    #[serde(default)]
    pub pins: Vec<PinConfig>,

    #[serde(default)]
    pub plugins: Vec<PluginConfig>,
}

fn default_node_name() -> String {
    "ecubus-node".to_string()
}
fn default_service_name() -> String {
    "ecubus".to_string()
}
fn default_strategy() -> AllocationStrategy {
    AllocationStrategy::MaxMemory
}
fn default_ecus() -> Vec<EcuConfig> {
    vec![EcuConfig {
        id: 1,
        name: "main".to_string(),
        memory: 1024,
        cpu: 100,
        storage: 4096,
    }]
}

impl Default for Config {
    fn default() -> Self {
        Self {
            node_name: default_node_name(),
            service_name: default_service_name(),
            listen: None,
            peer: None,
            ecus: default_ecus(),
            links: Vec::new(),
            pins: Vec::new(),
            plugins: Vec::new(),
        }
    }
}

impl Config {
    /// The configured link table.
    ///
    /// # Errors
    ///
    /// [`BusError::DuplicateLink`] when two links share a source port.
    pub fn link_table(&self) -> Result<LinkTable, BusError> {
        LinkTable::from_entries(self.links.iter().copied())
    }

    /// The configured ECU pool.
    pub fn placement(&self) -> Placement {
        self.ecus.iter().fold(Placement::new(), |pool, e| {
            pool.with_ecu(Ecu::new(
                EcuId(e.id),
                e.name.clone(),
                ResourceDemand {
                    memory: e.memory,
                    cpu: e.cpu,
                    storage: e.storage,
                },
            ))
        })
    }

    /// Telemetry settings naming this node and its ECUs.
    pub fn telemetry(&self) -> TelemetrySettings {
        TelemetrySettings::for_node(
            &self.service_name,
            &self.node_name,
            self.ecus.iter().map(|e| e.name.clone()),
        )
    }

    /// Native pins backed by simulated drivers.
    pub fn hardware(&self) -> HardwareRegistry {
        self.pins
            .iter()
            .fold(SimRegistry::builder(), |sim, pin| match pin.driver {
                PinDriver::Actuator => sim.with_actuator(PortId(pin.port)),
                PinDriver::Relay => sim.with_relay(PortId(pin.port)),
            })
            .build()
    }
}

/// Return the config path: `$ECUBUS_CONFIG`, else `~/.ecubus/node.toml`.
pub fn config_path() -> PathBuf {
    if let Ok(path) = std::env::var(CONFIG_PATH_VAR) {
        return PathBuf::from(path);
    }
    config_path_for_home(
        &std::env::var("HOME")
            .or_else(|_| std::env::var("USERPROFILE"))
            .unwrap_or_else(|_| ".".to_string()),
    )
}

/// Build the config path relative to the given home directory.
pub(crate) fn config_path_for_home(home: &str) -> PathBuf {
    PathBuf::from(home).join(".ecubus").join("node.toml")
}

/// Load the config from disk.  Returns `None` if the file does not exist.
pub fn load() -> Result<Option<Config>, String> {
    load_from(&config_path())
}

/// Load the config from a specific path.
pub(crate) fn load_from(path: &Path) -> Result<Option<Config>, String> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = fs::read_to_string(path)
        .map_err(|e| format!("Failed to read config at {}: {}", path.display(), e))?;
    let mut cfg: Config =
        toml::from_str(&raw).map_err(|e| format!("Failed to parse config: {}", e))?;
    apply_env_overrides(&mut cfg);
    Ok(Some(cfg))
}

/// Apply `ECUBUS_*` environment variable overrides to `cfg`.
///
/// | Variable | Config field |
/// |---|---|
/// | `ECUBUS_NODE_NAME` | `node_name` |
/// | `ECUBUS_LISTEN` | `listen` |
/// | `ECUBUS_PEER` | `peer` |
pub fn apply_env_overrides(cfg: &mut Config) {
    if let Ok(v) = std::env::var("ECUBUS_NODE_NAME") {
        cfg.node_name = v;
    }
    if let Ok(v) = std::env::var("ECUBUS_LISTEN") {
        cfg.listen = Some(v).filter(|s| !s.is_empty());
    }
    if let Ok(v) = std::env::var("ECUBUS_PEER") {
        cfg.peer = Some(v).filter(|s| !s.is_empty());
    }
}

/// Save the config to disk, creating `~/.ecubus/` if necessary.
pub fn save(cfg: &Config) -> Result<(), String> {
    save_to(cfg, &config_path())
}

/// Save the config to a specific path.
pub(crate) fn save_to(cfg: &Config, path: &Path) -> Result<(), String> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .map_err(|e| format!("Failed to create config directory: {}", e))?;
    }
    let raw = toml::to_string_pretty(cfg)
        .map_err(|e| format!("Failed to serialize config: {}", e))?;
    fs::write(path, raw)
        .map_err(|e| format!("Failed to write config at {}: {}", path.display(), e))?;
    Ok(())
}
