//! Component runtime – how a plugin is bound, started and stopped.
//!
//! A plugin goes through two phases:
//!
//! 1. **Init** – [`Plugin::init`] receives a [`PluginContext`] and resolves
//!    each declared port name into a [`ProvidedPort`] or [`RequiredPort`]
//!    handle.  Names are bound through the node's [`PortRegistry`]; handles
//!    cache the resulting port id, so no registry lookups happen afterwards.
//! 2. **Run** – [`Plugin::run`] executes as an independent tokio task until it
//!    returns or its [`StopSignal`] fires.
//!
//! Plugins are created from a [`PluginCatalog`] by name, so install requests
//! stay plain data.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use ecubus_kernel::PortRegistry;
use ecubus_middleware::{Channel, Delivery, PublishBus, Router, poll_within};
use ecubus_types::{BusError, Direction, PluginId, Port, PortDecl, PortId, Value, ValueKind};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

// ─────────────────────────────────────────────────────────────────────────────
// Plugin contract
// ─────────────────────────────────────────────────────────────────────────────

/// Every installable plugin implements this trait.
///
/// # Contract
///
/// * `ports` – the ports the plugin declares.  Install fails unless the
///   binding table names every one of them.
/// * `init` – bind the declared ports through the context.  An error here
///   aborts the load and the install is rolled back.
/// * `run` – the logic phase.  Long-running plugins should watch `stop` and
///   return promptly once it fires; a plugin that ignores it is aborted after
///   a grace period.
#[async_trait]
pub trait Plugin: Send {
    fn ports(&self) -> Vec<PortDecl>;

    fn init(&mut self, ctx: &PluginContext) -> Result<(), BusError>;

    async fn run(&mut self, stop: StopSignal) -> Result<(), BusError>;
}

/// Builds a fresh plugin instance.
pub type PluginFactory = Arc<dyn Fn() -> Box<dyn Plugin> + Send + Sync>;

/// Name → factory table consulted by install requests.
#[derive(Clone, Default)]
pub struct PluginCatalog {
    factories: BTreeMap<String, PluginFactory>,
}

impl PluginCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `factory` under `name`, replacing any earlier entry.
    pub fn register<F>(&mut self, name: impl Into<String>, factory: F)
    where
        F: Fn() -> Box<dyn Plugin> + Send + Sync + 'static,
    {
        self.factories.insert(name.into(), Arc::new(factory));
    }

    pub fn with<F>(mut self, name: impl Into<String>, factory: F) -> Self
    where
        F: Fn() -> Box<dyn Plugin> + Send + Sync + 'static,
    {
        self.register(name, factory);
        self
    }

    /// Instantiate the plugin registered as `name`.
    ///
    /// # Errors
    ///
    /// [`BusError::UnknownPlugin`] when nothing is registered under `name`.
    pub fn create(&self, name: &str) -> Result<Box<dyn Plugin>, BusError> {
        self.factories
            .get(name)
            .map(|factory| factory())
            .ok_or_else(|| BusError::UnknownPlugin(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    /// Registered names in sorted order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.factories.keys().map(String::as_str)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Port handles
// ─────────────────────────────────────────────────────────────────────────────

/// Write side of a provided port.
#[derive(Clone)]
pub struct ProvidedPort {
    id: PortId,
    kind: ValueKind,
    router: Arc<Router>,
}

impl ProvidedPort {
    pub fn id(&self) -> PortId {
        self.id
    }

    pub fn kind(&self) -> ValueKind {
        self.kind
    }

    /// Route `value` along this port's link.  An unlinked port yields
    /// [`Delivery::Dropped`].
    ///
    /// # Errors
    ///
    /// Native and transport failures from [`Router::dispatch`].
    pub fn write(&self, value: impl Into<Value>) -> Result<Delivery, BusError> {
        self.router.dispatch(self.id, value.into())
    }
}

/// Read side of a required port.
#[derive(Clone)]
pub struct RequiredPort {
    id: PortId,
    kind: ValueKind,
    channel: Arc<dyn Channel>,
}

impl RequiredPort {
    pub fn id(&self) -> PortId {
        self.id
    }

    pub fn kind(&self) -> ValueKind {
        self.kind
    }

    /// Latch: the latest value.  Mailbox: the pending message, consumed.
    /// `None` is the ordinary "no data" outcome.
    pub fn read(&self) -> Option<Value> {
        self.channel.read()
    }

    /// Write count seen by the channel so far.
    pub fn generation(&self) -> u64 {
        self.channel.generation()
    }

    /// Poll until data arrives or `timeout` elapses.  Dropping the future
    /// abandons the wait.
    pub async fn receive_within(&self, timeout: Duration) -> Option<Value> {
        poll_within(self.channel.as_ref(), timeout).await
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Init context
// ─────────────────────────────────────────────────────────────────────────────

/// What a plugin sees during its init phase.
///
/// `registry` is the node-wide port registry; the plugin's ports must already
/// be registered under `id`.
pub struct PluginContext {
    id: PluginId,
    name: String,
    registry: Arc<Mutex<PortRegistry>>,
    router: Arc<Router>,
    publish: PublishBus,
}

impl PluginContext {
    pub fn new(
        id: PluginId,
        name: impl Into<String>,
        registry: Arc<Mutex<PortRegistry>>,
        router: Arc<Router>,
        publish: PublishBus,
    ) -> Self {
        Self {
            id,
            name: name.into(),
            registry,
            router,
            publish,
        }
    }

    pub fn id(&self) -> PluginId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Resolve a provided port by declared name.
    ///
    /// # Errors
    ///
    /// [`BusError::UnknownPortName`] when the plugin has no provided port
    /// called `name`.
    pub fn provided(&self, name: &str) -> Result<ProvidedPort, BusError> {
        let port = self.port(name, Direction::Provided)?;
        Ok(ProvidedPort {
            id: port.id,
            kind: port.kind,
            router: Arc::clone(&self.router),
        })
    }

    /// Resolve a required port by declared name.
    ///
    /// # Errors
    ///
    /// [`BusError::UnknownPortName`] when the plugin has no required port
    /// called `name`, or its channel has been closed.
    pub fn required(&self, name: &str) -> Result<RequiredPort, BusError> {
        let port = self.port(name, Direction::Required)?;
        let channel = self
            .router
            .channels()
            .get(port.id)
            .ok_or_else(|| self.unknown(name))?;
        Ok(RequiredPort {
            id: port.id,
            kind: port.kind,
            channel,
        })
    }

    /// Handle to the node's publish bus.
    pub fn publisher(&self) -> PublishBus {
        self.publish.clone()
    }

    fn port(&self, name: &str, direction: Direction) -> Result<Port, BusError> {
        let registry = self.registry.lock().unwrap_or_else(PoisonError::into_inner);
        let id = registry.bind(self.id, name).map_err(|_| self.unknown(name))?;
        registry
            .get(id)
            .filter(|p| p.direction == direction)
            .cloned()
            .ok_or_else(|| self.unknown(name))
    }

    fn unknown(&self, name: &str) -> BusError {
        BusError::UnknownPortName {
            plugin: self.name.clone(),
            port: name.to_string(),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Stop protocol
// ─────────────────────────────────────────────────────────────────────────────

/// Default time a plugin gets to return after being asked to stop.
pub const DEFAULT_STOP_GRACE: Duration = Duration::from_millis(500);

/// Cooperative stop request handed to [`Plugin::run`].
#[derive(Clone)]
pub struct StopSignal {
    rx: watch::Receiver<bool>,
}

impl StopSignal {
    pub fn is_stopped(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolve once a stop is requested.  Also resolves when the owning task
    /// handle is gone.
    pub async fn stopped(&mut self) {
        let _ = self.rx.wait_for(|stop| *stop).await;
    }
}

/// A plugin's spawned logic phase.
pub struct RunningTask {
    stop: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl RunningTask {
    /// Spawn `plugin.run` on the tokio runtime.
    pub fn spawn(mut plugin: Box<dyn Plugin>, name: &str) -> Self {
        let (stop, rx) = watch::channel(false);
        let signal = StopSignal { rx };
        let name = name.to_string();
        let handle = tokio::spawn(async move {
            match plugin.run(signal).await {
                Ok(()) => debug!(plugin = %name, "plugin task finished"),
                Err(e) => error!(plugin = %name, error = %e, "plugin task failed"),
            }
        });
        Self { stop, handle }
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Ask the task to stop, wait up to `grace`, then abort it.  Returns
    /// `true` when the task returned on its own.
    pub async fn stop(self, grace: Duration) -> bool {
        let _ = self.stop.send(true);
        let mut handle = self.handle;
        match tokio::time::timeout(grace, &mut handle).await {
            Ok(_) => true,
            Err(_) => {
                warn!(grace_ms = grace.as_millis() as u64, "plugin ignored stop request, aborting");
                handle.abort();
                false
            }
        }
    }
}

impl std::fmt::Debug for RunningTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunningTask")
            .field("finished", &self.handle.is_finished())
            .finish()
    }
}

/// Run a plugin's init phase with logging.
pub(crate) fn init_plugin(plugin: &mut dyn Plugin, ctx: &PluginContext) -> Result<(), BusError> {
    plugin.init(ctx).inspect_err(|e| {
        error!(plugin = %ctx.name(), error = %e, "plugin init failed");
    })?;
    info!(plugin = %ctx.name(), id = %ctx.id(), "plugin initialised");
    Ok(())
}
