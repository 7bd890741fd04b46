use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

// ─────────────────────────────────────────────────────────────────────────────
// Identifiers
// ─────────────────────────────────────────────────────────────────────────────

/// Numeric port identifier, unique per node.  Travels as 4 big-endian bytes
/// in remote frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PortId(pub u32);

impl fmt::Display for PortId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier assigned to a plugin when its install is accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PluginId(pub u32);

impl fmt::Display for PluginId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of an electronic control unit able to host plugins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EcuId(pub u32);

impl fmt::Display for EcuId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Values
// ─────────────────────────────────────────────────────────────────────────────

/// Statically declared value type of a port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueKind {
    /// 32-bit signed integer, 4 bytes on the wire.
    Int,
    /// 64-bit signed integer, 8 bytes on the wire.
    Long,
    /// UTF-8 text.
    Text,
    /// Opaque object carried as raw bytes.
    Object,
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ValueKind::Int => "int",
            ValueKind::Long => "long",
            ValueKind::Text => "text",
            ValueKind::Object => "object",
        };
        f.write_str(s)
    }
}

/// A payload carried by the bus.  The bus never interprets it except to
/// pick a wire encoding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "lowercase")]
pub enum Value {
    Int(i32),
    Long(i64),
    Text(String),
    Object(Vec<u8>),
}

impl Value {
    pub fn kind(&self) -> ValueKind {
        match self {
            Value::Int(_) => ValueKind::Int,
            Value::Long(_) => ValueKind::Long,
            Value::Text(_) => ValueKind::Text,
            Value::Object(_) => ValueKind::Object,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Int(v) => write!(f, "{v}"),
            Value::Long(v) => write!(f, "{v}"),
            Value::Text(s) => f.write_str(s),
            Value::Object(bytes) => write!(f, "<{} bytes>", bytes.len()),
        }
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Long(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Value::Object(v)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Ports
// ─────────────────────────────────────────────────────────────────────────────

/// Which side of a connection a port sits on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// The owning plugin writes to this port.
    Provided,
    /// The owning plugin reads from this port.
    Required,
}

/// Channel semantics used for a required port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelMode {
    /// Overwrite on write, read returns the latest value.
    #[default]
    Latch,
    /// Single slot, consumed on read.
    Mailbox,
}

/// A port as declared by plugin code, before an id is bound to it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortDecl {
    pub name: String,
    pub direction: Direction,
    pub kind: ValueKind,
    #[serde(default)]
    pub mode: ChannelMode,
}

impl PortDecl {
    pub fn provided(name: impl Into<String>, kind: ValueKind) -> Self {
        Self {
            name: name.into(),
            direction: Direction::Provided,
            kind,
            mode: ChannelMode::Latch,
        }
    }

    /// A required port backed by a latch channel.
    pub fn required(name: impl Into<String>, kind: ValueKind) -> Self {
        Self {
            name: name.into(),
            direction: Direction::Required,
            kind,
            mode: ChannelMode::Latch,
        }
    }

    /// Switch this declaration to mailbox semantics.
    pub fn mailbox(mut self) -> Self {
        self.mode = ChannelMode::Mailbox;
        self
    }
}

/// A bound port.  Immutable from install until uninstall.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Port {
    pub id: PortId,
    pub name: String,
    pub direction: Direction,
    pub kind: ValueKind,
    pub mode: ChannelMode,
    pub owner: PluginId,
}

// ─────────────────────────────────────────────────────────────────────────────
// Routing
// ─────────────────────────────────────────────────────────────────────────────

/// How a link delivers a write.  Configuration carries the numeric codes
/// `-1`, `-2` and `-3`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "i32", into = "i32")]
pub enum RoutingClass {
    SameNode,
    NativeSink,
    RemoteNode,
}

impl RoutingClass {
    pub const SAME_NODE: i32 = -1;
    pub const NATIVE_SINK: i32 = -2;
    pub const REMOTE_NODE: i32 = -3;

    pub fn code(self) -> i32 {
        match self {
            RoutingClass::SameNode => Self::SAME_NODE,
            RoutingClass::NativeSink => Self::NATIVE_SINK,
            RoutingClass::RemoteNode => Self::REMOTE_NODE,
        }
    }
}

impl TryFrom<i32> for RoutingClass {
    type Error = BusError;

    fn try_from(code: i32) -> Result<Self, Self::Error> {
        match code {
            Self::SAME_NODE => Ok(RoutingClass::SameNode),
            Self::NATIVE_SINK => Ok(RoutingClass::NativeSink),
            Self::REMOTE_NODE => Ok(RoutingClass::RemoteNode),
            other => Err(BusError::Config(format!(
                "unknown routing classification {other}"
            ))),
        }
    }
}

impl From<RoutingClass> for i32 {
    fn from(class: RoutingClass) -> Self {
        class.code()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Placement
// ─────────────────────────────────────────────────────────────────────────────

/// Policy for choosing the ECU that hosts a newly installed plugin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AllocationStrategy {
    Random,
    SameEcu,
    DiffEcu,
    Specific,
    MaxMemory,
    MaxCpu,
    MaxStorage,
}

impl fmt::Display for AllocationStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AllocationStrategy::Random => "RANDOM",
            AllocationStrategy::SameEcu => "SAME_ECU",
            AllocationStrategy::DiffEcu => "DIFF_ECU",
            AllocationStrategy::Specific => "SPECIFIC",
            AllocationStrategy::MaxMemory => "MAX_MEMORY",
            AllocationStrategy::MaxCpu => "MAX_CPU",
            AllocationStrategy::MaxStorage => "MAX_STORAGE",
        };
        f.write_str(s)
    }
}

impl FromStr for AllocationStrategy {
    type Err = BusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "RANDOM" => Ok(AllocationStrategy::Random),
            "SAME_ECU" => Ok(AllocationStrategy::SameEcu),
            "DIFF_ECU" => Ok(AllocationStrategy::DiffEcu),
            "SPECIFIC" => Ok(AllocationStrategy::Specific),
            "MAX_MEMORY" => Ok(AllocationStrategy::MaxMemory),
            "MAX_CPU" => Ok(AllocationStrategy::MaxCpu),
            "MAX_STORAGE" => Ok(AllocationStrategy::MaxStorage),
            other => Err(BusError::Config(format!("unknown allocation strategy '{other}'"))),
        }
    }
}

/// Resources a plugin asks for at install time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ResourceDemand {
    #[serde(default)]
    pub memory: u64,
    #[serde(default)]
    pub cpu: u64,
    #[serde(default)]
    pub storage: u64,
}

// ─────────────────────────────────────────────────────────────────────────────
// Lifecycle
// ─────────────────────────────────────────────────────────────────────────────

/// Lifecycle state of an installed plugin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComponentState {
    Requested,
    Installed,
    Running,
    Uninstalling,
    Removed,
}

impl fmt::Display for ComponentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ComponentState::Requested => "requested",
            ComponentState::Installed => "installed",
            ComponentState::Running => "running",
            ComponentState::Uninstalling => "uninstalling",
            ComponentState::Removed => "removed",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstallRequest {
    /// Catalog name of the plugin to install.
    pub plugin_name: String,
    pub strategy: AllocationStrategy,
    /// Component whose ECU anchors `SAME_ECU` / `DIFF_ECU`.
    #[serde(default)]
    pub reference_component: Option<String>,
    /// ECU name used by `SPECIFIC`.
    #[serde(default)]
    pub target_ecu: Option<String>,
    /// Flat `[name, id, name, id, ...]` binding table.
    #[serde(default)]
    pub bindings: Vec<String>,
    #[serde(default)]
    pub demand: ResourceDemand,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadRequest {
    pub plugin_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UninstallRequest {
    pub sending_port: PortId,
    pub callback_port: PortId,
    /// Caller-chosen correlation tag echoed in the acknowledgement.
    pub reference: i32,
    pub plugin_name: String,
}

/// Request accepted by the lifecycle manager.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "request", content = "payload")]
pub enum LifecycleRequest {
    Install(InstallRequest),
    Load(LoadRequest),
    Uninstall(UninstallRequest),
    RequestId,
}

/// Outcome carried by every acknowledgement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum AckStatus {
    Success,
    Failure { reason: String },
}

impl AckStatus {
    pub fn is_success(&self) -> bool {
        matches!(self, AckStatus::Success)
    }
}

impl From<&BusError> for AckStatus {
    fn from(err: &BusError) -> Self {
        AckStatus::Failure {
            reason: err.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstallAck {
    pub plugin_name: String,
    pub plugin_id: Option<PluginId>,
    pub ecu: Option<EcuId>,
    pub status: AckStatus,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadAck {
    pub plugin_name: String,
    pub plugin_id: Option<PluginId>,
    pub status: AckStatus,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UninstallAck {
    pub sending_port: PortId,
    pub callback_port: PortId,
    pub reference: i32,
    pub plugin_name: String,
    pub status: AckStatus,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestIdAck {
    pub id: u32,
}

/// Reply produced for each [`LifecycleRequest`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "ack", content = "payload")]
pub enum LifecycleAck {
    Install(InstallAck),
    Load(LoadAck),
    Uninstall(UninstallAck),
    RequestId(RequestIdAck),
}

impl LifecycleAck {
    pub fn is_success(&self) -> bool {
        match self {
            LifecycleAck::Install(ack) => ack.status.is_success(),
            LifecycleAck::Load(ack) => ack.status.is_success(),
            LifecycleAck::Uninstall(ack) => ack.status.is_success(),
            LifecycleAck::RequestId(_) => true,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Errors
// ─────────────────────────────────────────────────────────────────────────────

/// Global error type for port binding, routing, transport and lifecycle.
///
/// None of these are fatal to the bus; each is scoped to the operation that
/// raised it.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum BusError {
    #[error("Unknown port name '{port}' for plugin {plugin}")]
    UnknownPortName { plugin: String, port: String },

    #[error("No link configured for source port {0}")]
    UnresolvedLink(PortId),

    #[error("Malformed frame: {0}")]
    MalformedFrame(String),

    #[error("Malformed binding table: {0}")]
    MalformedBindings(String),

    #[error("Port id {0} is already bound on this node")]
    PortIdInUse(PortId),

    #[error("Duplicate link for source port {0}")]
    DuplicateLink(PortId),

    #[error("Plugin '{0}' is already installed")]
    DuplicateInstall(String),

    #[error("No installed plugin named '{0}'")]
    UnknownUninstallTarget(String),

    #[error("Plugin '{0}' is not in the catalog")]
    UnknownPlugin(String),

    #[error("Plugin '{0}' is not installed")]
    NotInstalled(String),

    #[error("Placement failed for {strategy}: {reason}")]
    PlacementExhausted {
        strategy: AllocationStrategy,
        reason: String,
    },

    #[error("Plugin '{plugin}' cannot move from {from} to {to}")]
    InvalidTransition {
        plugin: String,
        from: ComponentState,
        to: ComponentState,
    },

    #[error("Native I/O fault on port {port}: {details}")]
    NativeIo { port: PortId, details: String },

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Configuration error: {0}")]
    Config(String),
}
