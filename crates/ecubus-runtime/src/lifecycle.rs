//! [`LifecycleManager`] – install / load / uninstall request handling.
//!
//! Every request gets exactly one acknowledgement; failures are reported in
//! the ack's [`AckStatus`], never raised to the caller.
//!
//! | Request | Work done | State reached |
//! |---|---|---|
//! | `Install` | catalog lookup, id assignment, port binding, placement, channel creation | `Installed` |
//! | `Load` | plugin init phase, task spawn | `Running` |
//! | `Uninstall` | stop task, release ports and channels, refund the ECU | `Removed` |
//! | `RequestId` | hand out a fresh node-wide id | – |
//!
//! Requests for the same plugin name are serialised; requests for different
//! names proceed independently.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use ecubus_kernel::{Ecu, IdAllocator, Placement, PluginRecord, PluginTable, PortBindings, PortRegistry};
use ecubus_middleware::{PublishBus, Router};
use ecubus_types::{
    AckStatus, BusError, ComponentState, Direction, EcuId, InstallAck, InstallRequest,
    LifecycleAck, LifecycleRequest, LoadAck, LoadRequest, PluginId, Port, PortDecl, PortId, RequestIdAck,
    UninstallAck, UninstallRequest,
};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::{info, warn};

use crate::component::{
    DEFAULT_STOP_GRACE, Plugin, PluginCatalog, PluginContext, RunningTask, init_plugin,
};

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Owns every plugin on the node from install request to removal.
pub struct LifecycleManager {
    catalog: PluginCatalog,
    router: Arc<Router>,
    publish: PublishBus,
    ids: IdAllocator,
    /// Shared with every [`PluginContext`] so init binds through it.
    ports: Arc<Mutex<PortRegistry>>,
    placement: Mutex<Placement>,
    plugins: Mutex<PluginTable>,
    /// Installed plugin instances waiting for their load request.
    staged: Mutex<HashMap<String, Box<dyn Plugin>>>,
    tasks: Mutex<HashMap<String, RunningTask>>,
    name_locks: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
    stop_grace: Duration,
}

impl LifecycleManager {
    pub fn new(
        router: Arc<Router>,
        publish: PublishBus,
        placement: Placement,
        catalog: PluginCatalog,
    ) -> Self {
        Self {
            catalog,
            router,
            publish,
            ids: IdAllocator::new(),
            ports: Arc::new(Mutex::new(PortRegistry::new())),
            placement: Mutex::new(placement),
            plugins: Mutex::new(PluginTable::new()),
            staged: Mutex::new(HashMap::new()),
            tasks: Mutex::new(HashMap::new()),
            name_locks: Mutex::new(HashMap::new()),
            stop_grace: DEFAULT_STOP_GRACE,
        }
    }

    /// Override how long a stopping plugin may take before it is aborted.
    pub fn with_stop_grace(mut self, grace: Duration) -> Self {
        self.stop_grace = grace;
        self
    }

    // ── Protocol entry points ────────────────────────────────────────────────

    /// Answer any lifecycle request.
    pub async fn handle(&self, request: LifecycleRequest) -> LifecycleAck {
        match request {
            LifecycleRequest::Install(r) => LifecycleAck::Install(self.install(r).await),
            LifecycleRequest::Load(r) => LifecycleAck::Load(self.load(r).await),
            LifecycleRequest::Uninstall(r) => LifecycleAck::Uninstall(self.uninstall(r).await),
            LifecycleRequest::RequestId => LifecycleAck::RequestId(self.request_id()),
        }
    }

    pub async fn install(&self, request: InstallRequest) -> InstallAck {
        let _held = self.hold_name(&request.plugin_name).await;
        self.install_locked(&request)
    }

    pub async fn load(&self, request: LoadRequest) -> LoadAck {
        let _held = self.hold_name(&request.plugin_name).await;
        self.load_locked(&request.plugin_name)
    }

    /// Install then, if that succeeded, load.  No other request for the
    /// same name can slip in between.
    pub async fn install_and_load(&self, request: InstallRequest) -> (InstallAck, Option<LoadAck>) {
        let _held = self.hold_name(&request.plugin_name).await;
        let install = self.install_locked(&request);
        if !install.status.is_success() {
            return (install, None);
        }
        let load = self.load_locked(&request.plugin_name);
        (install, Some(load))
    }

    pub async fn uninstall(&self, request: UninstallRequest) -> UninstallAck {
        let _held = self.hold_name(&request.plugin_name).await;

        let status = match self.stop_and_remove(&request.plugin_name).await {
            Ok(()) => AckStatus::Success,
            Err(e) => {
                warn!(plugin = %request.plugin_name, reference = request.reference, error = %e, "uninstall rejected");
                AckStatus::from(&e)
            }
        };
        UninstallAck {
            sending_port: request.sending_port,
            callback_port: request.callback_port,
            reference: request.reference,
            plugin_name: request.plugin_name,
            status,
        }
    }

    /// Hand out a fresh identifier, independent of any install.
    pub fn request_id(&self) -> RequestIdAck {
        RequestIdAck { id: self.ids.next() }
    }

    /// Uninstall every plugin, e.g. at node shutdown.
    pub async fn uninstall_all(&self) -> Vec<UninstallAck> {
        let names: Vec<String> = lock(&self.plugins).iter().map(|r| r.name.clone()).collect();
        let mut acks = Vec::with_capacity(names.len());
        for plugin_name in names {
            acks.push(
                self.uninstall(UninstallRequest {
                    sending_port: PortId(0),
                    callback_port: PortId(0),
                    reference: 0,
                    plugin_name,
                })
                .await,
            );
        }
        acks
    }

    // ── Queries ──────────────────────────────────────────────────────────────

    /// Snapshot of every plugin record, in name order.
    pub fn plugins(&self) -> Vec<PluginRecord> {
        lock(&self.plugins).iter().cloned().collect()
    }

    pub fn state_of(&self, name: &str) -> Option<ComponentState> {
        lock(&self.plugins).get(name).map(|r| r.state)
    }

    /// Snapshot of the ECU pool.
    pub fn ecus(&self) -> Vec<Ecu> {
        lock(&self.placement).ecus().cloned().collect()
    }

    pub fn catalog(&self) -> &PluginCatalog {
        &self.catalog
    }

    pub fn router(&self) -> &Arc<Router> {
        &self.router
    }

    pub fn publish_bus(&self) -> &PublishBus {
        &self.publish
    }

    // ── Install ──────────────────────────────────────────────────────────────

    fn install_locked(&self, request: &InstallRequest) -> InstallAck {
        let plugin_name = request.plugin_name.clone();
        match self.stage(request) {
            Ok((id, ecu)) => {
                info!(plugin = %plugin_name, id = %id, ecu = %ecu, strategy = %request.strategy, "plugin installed");
                InstallAck {
                    plugin_name,
                    plugin_id: Some(id),
                    ecu: Some(ecu),
                    status: AckStatus::Success,
                }
            }
            Err(e) => {
                warn!(plugin = %plugin_name, error = %e, "install rejected");
                InstallAck {
                    plugin_name,
                    plugin_id: None,
                    ecu: None,
                    status: AckStatus::from(&e),
                }
            }
        }
    }

    fn stage(&self, request: &InstallRequest) -> Result<(PluginId, EcuId), BusError> {
        let name = request.plugin_name.as_str();
        let plugin = self.catalog.create(name)?;
        let bindings = PortBindings::from_flat(&request.bindings)?;

        if lock(&self.plugins).get(name).is_some() {
            return Err(BusError::DuplicateInstall(name.to_string()));
        }
        let id = PluginId(self.ids.next());
        lock(&self.plugins).admit(name, id)?;

        let (ecu, ports) = match self.bind_and_place(request, id, &plugin.ports(), &bindings) {
            Ok(placed) => placed,
            Err(e) => {
                let _ = lock(&self.plugins).transition(name, ComponentState::Removed);
                return Err(e);
            }
        };

        for port in ports.iter().filter(|p| p.direction == Direction::Required) {
            self.router.channels().open(port.id, port.kind, port.mode);
        }

        {
            let mut table = lock(&self.plugins);
            if let Some(record) = table.get_mut(name) {
                record.ecu = Some(ecu);
                record.ports = ports;
                record.demand = request.demand;
            }
            table.transition(name, ComponentState::Installed)?;
        }
        lock(&self.staged).insert(name.to_string(), plugin);
        Ok((id, ecu))
    }

    /// Resolve ports, choose an ECU, then commit both.  Nothing is left
    /// registered on failure.
    fn bind_and_place(
        &self,
        request: &InstallRequest,
        id: PluginId,
        decls: &[PortDecl],
        bindings: &PortBindings,
    ) -> Result<(EcuId, Vec<Port>), BusError> {
        let name = request.plugin_name.as_str();
        let ports = bindings.resolve(name, id, decls)?;

        let mut placement = lock(&self.placement);
        let ecu = placement.place(request)?;
        lock(&self.ports).register(ports.clone())?;
        if let Err(e) = placement.assign(ecu, name, request.demand) {
            lock(&self.ports).release(id);
            return Err(e);
        }
        Ok((ecu, ports))
    }

    // ── Load ─────────────────────────────────────────────────────────────────

    fn load_locked(&self, name: &str) -> LoadAck {
        match self.start(name) {
            Ok(id) => {
                info!(plugin = %name, id = %id, "plugin running");
                LoadAck {
                    plugin_name: name.to_string(),
                    plugin_id: Some(id),
                    status: AckStatus::Success,
                }
            }
            Err(e) => {
                warn!(plugin = %name, error = %e, "load rejected");
                LoadAck {
                    plugin_name: name.to_string(),
                    plugin_id: None,
                    status: AckStatus::from(&e),
                }
            }
        }
    }

    fn start(&self, name: &str) -> Result<PluginId, BusError> {
        let record = lock(&self.plugins)
            .get(name)
            .cloned()
            .ok_or_else(|| BusError::NotInstalled(name.to_string()))?;
        if record.state != ComponentState::Installed {
            return Err(BusError::InvalidTransition {
                plugin: name.to_string(),
                from: record.state,
                to: ComponentState::Running,
            });
        }
        let mut plugin = lock(&self.staged)
            .remove(name)
            .ok_or_else(|| BusError::NotInstalled(name.to_string()))?;

        let ctx = PluginContext::new(
            record.id,
            name,
            Arc::clone(&self.ports),
            Arc::clone(&self.router),
            self.publish.clone(),
        );
        if let Err(e) = init_plugin(plugin.as_mut(), &ctx) {
            // A plugin that cannot bind its ports never runs; undo the install.
            lock(&self.plugins).transition(name, ComponentState::Uninstalling)?;
            self.release_resources(&record);
            lock(&self.plugins).transition(name, ComponentState::Removed)?;
            return Err(e);
        }

        let task = RunningTask::spawn(plugin, name);
        lock(&self.tasks).insert(name.to_string(), task);
        lock(&self.plugins).transition(name, ComponentState::Running)?;
        Ok(record.id)
    }

    // ── Uninstall ────────────────────────────────────────────────────────────

    async fn stop_and_remove(&self, name: &str) -> Result<(), BusError> {
        let record = lock(&self.plugins).transition(name, ComponentState::Uninstalling)?;

        let task = lock(&self.tasks).remove(name);
        if let Some(task) = task {
            task.stop(self.stop_grace).await;
        }
        lock(&self.staged).remove(name);

        self.release_resources(&record);
        lock(&self.plugins).transition(name, ComponentState::Removed)?;
        info!(plugin = %name, id = %record.id, "plugin removed");
        Ok(())
    }

    fn release_resources(&self, record: &PluginRecord) {
        let released = lock(&self.ports).release(record.id);
        for port in released.iter().filter(|p| p.direction == Direction::Required) {
            self.router.channels().close(port.id);
        }
        lock(&self.placement).release(&record.name);
    }

    async fn hold_name(&self, name: &str) -> NameGuard<'_> {
        let serial = Arc::clone(lock(&self.name_locks).entry(name.to_string()).or_default());
        NameGuard {
            manager: self,
            name: name.to_string(),
            held: Some(serial.lock_owned().await),
        }
    }
}

/// Exclusive hold on one plugin name.  The last holder removes the name's
/// lock entry on drop.
struct NameGuard<'a> {
    manager: &'a LifecycleManager,
    name: String,
    held: Option<OwnedMutexGuard<()>>,
}

impl Drop for NameGuard<'_> {
    fn drop(&mut self) {
        // Release first so our own reference is not counted below.
        self.held.take();
        let mut locks = lock(&self.manager.name_locks);
        // Waiters and holders each keep a clone, and new ones must take the
        // map lock to get one.
        if locks.get(&self.name).is_some_and(|l| Arc::strong_count(l) == 1) {
            locks.remove(&self.name);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};

    use async_trait::async_trait;
    use ecubus_middleware::{ChannelTable, LinkEntry, LinkTable, NullSink};
    use ecubus_types::{
        AllocationStrategy, ChannelMode, ResourceDemand, Value, ValueKind,
    };

    use super::*;
    use crate::component::{ProvidedPort, RequiredPort, StopSignal};

    // ------------------------------------------------------------------
    // Test plugins
    // ------------------------------------------------------------------

    /// Forwards every new value of `adc` to `ap`.
    #[derive(Default)]
    struct AdcPub {
        ap: Option<ProvidedPort>,
        adc: Option<RequiredPort>,
    }

    #[async_trait]
    impl Plugin for AdcPub {
        fn ports(&self) -> Vec<PortDecl> {
            vec![
                PortDecl::provided("ap", ValueKind::Text),
                PortDecl::required("adc", ValueKind::Text),
            ]
        }

        fn init(&mut self, ctx: &PluginContext) -> Result<(), BusError> {
            self.ap = Some(ctx.provided("ap")?);
            self.adc = Some(ctx.required("adc")?);
            Ok(())
        }

        async fn run(&mut self, mut stop: StopSignal) -> Result<(), BusError> {
            let (Some(ap), Some(adc)) = (&self.ap, &self.adc) else {
                return Ok(());
            };
            let mut seen = 0;
            loop {
                if adc.generation() != seen {
                    seen = adc.generation();
                    if let Some(v) = adc.read() {
                        ap.write(v)?;
                    }
                }
                tokio::select! {
                    _ = stop.stopped() => return Ok(()),
                    _ = tokio::time::sleep(Duration::from_millis(5)) => {}
                }
            }
        }
    }

    /// Binds a port it never declared, so its init always fails.
    struct Misbound;

    #[async_trait]
    impl Plugin for Misbound {
        fn ports(&self) -> Vec<PortDecl> {
            vec![PortDecl::required("in", ValueKind::Int)]
        }
        fn init(&mut self, ctx: &PluginContext) -> Result<(), BusError> {
            ctx.provided("out").map(|_| ())
        }
        async fn run(&mut self, _stop: StopSignal) -> Result<(), BusError> {
            Ok(())
        }
    }

    /// Records whether it saw the stop request.
    struct Watcher(Arc<AtomicBool>);

    #[async_trait]
    impl Plugin for Watcher {
        fn ports(&self) -> Vec<PortDecl> {
            vec![PortDecl::required("evt", ValueKind::Int).mailbox()]
        }
        fn init(&mut self, ctx: &PluginContext) -> Result<(), BusError> {
            ctx.required("evt").map(|_| ())
        }
        async fn run(&mut self, mut stop: StopSignal) -> Result<(), BusError> {
            stop.stopped().await;
            self.0.store(true, Ordering::SeqCst);
            Ok(())
        }
    }

    // ------------------------------------------------------------------
    // Fixtures
    // ------------------------------------------------------------------

    fn manager_with(stopped: Arc<AtomicBool>) -> LifecycleManager {
        let router = Arc::new(
            Router::new(Arc::new(ChannelTable::new()), Arc::new(NullSink)).with_links(
                LinkTable::from_entries([LinkEntry::same_node(PortId(0), PortId(5))]).unwrap(),
            ),
        );
        let placement = Placement::new()
            .with_ecu(Ecu::new(
                EcuId(1),
                "A",
                ResourceDemand { memory: 10, cpu: 10, storage: 10 },
            ))
            .with_ecu(Ecu::new(
                EcuId(2),
                "B",
                ResourceDemand { memory: 50, cpu: 10, storage: 10 },
            ));
        let catalog = PluginCatalog::new()
            .with("AdcPub", || Box::new(AdcPub::default()))
            .with("Misbound", || Box::new(Misbound))
            .with("Watcher", move || Box::new(Watcher(Arc::clone(&stopped))));
        LifecycleManager::new(router, PublishBus::default(), placement, catalog)
    }

    fn manager() -> LifecycleManager {
        manager_with(Arc::new(AtomicBool::new(false)))
    }

    fn install_request(name: &str, bindings: &[&str]) -> InstallRequest {
        InstallRequest {
            plugin_name: name.into(),
            strategy: AllocationStrategy::MaxMemory,
            reference_component: None,
            target_ecu: None,
            bindings: bindings.iter().map(|s| s.to_string()).collect(),
            demand: ResourceDemand::default(),
        }
    }

    fn uninstall_request(name: &str, reference: i32) -> UninstallRequest {
        UninstallRequest {
            sending_port: PortId(20),
            callback_port: PortId(21),
            reference,
            plugin_name: name.into(),
        }
    }

    async fn wait_for_value(mgr: &LifecycleManager, port: PortId, want: &Value) -> bool {
        for _ in 0..200 {
            if mgr.router().channels().read(port).as_ref() == Some(want) {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        false
    }

    // ------------------------------------------------------------------
    // Tests
    // ------------------------------------------------------------------

    #[tokio::test]
    async fn adc_pub_forwards_latest_reading() -> Result<(), Box<dyn std::error::Error>> {
        let mgr = manager();
        // Port 5 belongs to some other plugin on this node.
        mgr.router().channels().open(PortId(5), ValueKind::Text, ChannelMode::Latch);

        let install = mgr.install(install_request("AdcPub", &["ap", "0", "adc", "1"])).await;
        assert!(install.status.is_success(), "{:?}", install.status);
        assert_eq!(install.ecu, Some(EcuId(2)));
        assert_eq!(mgr.state_of("AdcPub"), Some(ComponentState::Installed));

        for reading in ["3.3", "3.5", "3.4"] {
            mgr.router().channels().write(PortId(1), Value::from(reading));
        }
        assert_eq!(mgr.router().channels().read(PortId(1)), Some(Value::from("3.4")));

        let load = mgr.load(LoadRequest { plugin_name: "AdcPub".into() }).await;
        assert!(load.status.is_success(), "{:?}", load.status);
        assert_eq!(load.plugin_id, install.plugin_id);
        assert_eq!(mgr.state_of("AdcPub"), Some(ComponentState::Running));

        assert!(wait_for_value(&mgr, PortId(5), &Value::from("3.4")).await);
        Ok(())
    }

    #[tokio::test]
    async fn uninstall_of_unknown_plugin_echoes_reference() {
        let mgr = manager();
        let ack = mgr.uninstall(uninstall_request("Ghost", 7)).await;
        assert_eq!(ack.reference, 7);
        assert_eq!((ack.sending_port, ack.callback_port), (PortId(20), PortId(21)));
        assert!(!ack.status.is_success());
    }

    #[tokio::test]
    async fn duplicate_install_is_rejected() {
        let mgr = manager();
        let bindings = ["ap", "0", "adc", "1"];
        let (first, _) = mgr.install_and_load(install_request("AdcPub", &bindings)).await;
        assert!(first.status.is_success());

        let second = mgr.install(install_request("AdcPub", &bindings)).await;
        assert_eq!(
            second.status,
            AckStatus::from(&BusError::DuplicateInstall("AdcPub".into()))
        );
        assert_eq!(mgr.plugins().len(), 1);
    }

    #[tokio::test]
    async fn uninstall_stops_task_and_frees_everything() {
        let stopped = Arc::new(AtomicBool::new(false));
        let mgr = manager_with(Arc::clone(&stopped));
        let mut request = install_request("Watcher", &["evt", "9"]);
        request.demand = ResourceDemand { memory: 30, ..Default::default() };

        let (install, load) = mgr.install_and_load(request.clone()).await;
        assert!(install.status.is_success());
        assert!(load.is_some_and(|l| l.status.is_success()));
        assert!(mgr.router().channels().get(PortId(9)).is_some());
        let b = mgr.ecus().into_iter().find(|e| e.id == EcuId(2)).unwrap();
        assert_eq!(b.remaining().memory, 20);

        let ack = mgr.uninstall(uninstall_request("Watcher", 1)).await;
        assert!(ack.status.is_success());
        assert!(stopped.load(Ordering::SeqCst), "plugin must see the stop request");
        assert!(mgr.router().channels().get(PortId(9)).is_none());
        assert!(mgr.state_of("Watcher").is_none());
        let b = mgr.ecus().into_iter().find(|e| e.id == EcuId(2)).unwrap();
        assert_eq!(b.remaining().memory, 50);

        // Same name and ports can be installed again.
        let again = mgr.install(request).await;
        assert!(again.status.is_success());
        assert_ne!(again.plugin_id, install.plugin_id);
    }

    #[tokio::test]
    async fn missing_binding_leaves_no_trace() {
        let mgr = manager();
        let ack = mgr.install(install_request("AdcPub", &["ap", "0"])).await;
        assert!(matches!(ack.status, AckStatus::Failure { .. }));
        assert!(ack.plugin_id.is_none());
        assert!(mgr.plugins().is_empty());
        assert!(mgr.router().channels().is_empty());

        // The port ids are still free for a correct install.
        let ok = mgr.install(install_request("AdcPub", &["ap", "0", "adc", "1"])).await;
        assert!(ok.status.is_success());
    }

    #[tokio::test]
    async fn odd_binding_list_is_rejected() {
        let mgr = manager();
        let ack = mgr.install(install_request("AdcPub", &["ap", "0", "adc"])).await;
        assert!(!ack.status.is_success());
    }

    #[tokio::test]
    async fn placement_exhaustion_fails_install() {
        let mgr = manager();
        let mut request = install_request("AdcPub", &["ap", "0", "adc", "1"]);
        request.demand = ResourceDemand { memory: 1_000, ..Default::default() };

        let ack = mgr.install(request).await;
        assert!(!ack.status.is_success());
        assert!(mgr.plugins().is_empty());
        assert!(mgr.router().channels().is_empty());
    }

    #[tokio::test]
    async fn unknown_catalog_entry_fails_install() {
        let mgr = manager();
        let ack = mgr.install(install_request("Nope", &[])).await;
        assert_eq!(ack.status, AckStatus::from(&BusError::UnknownPlugin("Nope".into())));
    }

    #[tokio::test]
    async fn failed_init_rolls_back_install() {
        let mgr = manager();
        let (install, load) = mgr.install_and_load(install_request("Misbound", &["in", "3"])).await;
        assert!(install.status.is_success());
        let load = load.unwrap();
        assert!(!load.status.is_success());
        assert!(mgr.state_of("Misbound").is_none());
        assert!(mgr.router().channels().get(PortId(3)).is_none());
    }

    #[tokio::test]
    async fn load_requires_install() {
        let mgr = manager();
        let ack = mgr.load(LoadRequest { plugin_name: "AdcPub".into() }).await;
        assert_eq!(ack.status, AckStatus::from(&BusError::NotInstalled("AdcPub".into())));
    }

    #[tokio::test]
    async fn request_ids_never_collide_with_plugin_ids() {
        let mgr = manager();
        let a = mgr.request_id().id;
        let install = mgr.install(install_request("AdcPub", &["ap", "0", "adc", "1"])).await;
        let b = mgr.request_id().id;
        let plugin_id = install.plugin_id.unwrap().0;
        assert!(a != b && a != plugin_id && b != plugin_id);
    }

    #[tokio::test]
    async fn handle_accepts_serialised_requests() -> Result<(), Box<dyn std::error::Error>> {
        let mgr = manager();
        let json = r#"{"request":"Uninstall","payload":{"sending_port":1,"callback_port":2,"reference":7,"plugin_name":"Ghost"}}"#;
        let request: LifecycleRequest = serde_json::from_str(json)?;

        let ack = mgr.handle(request).await;
        assert!(!ack.is_success());
        let LifecycleAck::Uninstall(ack) = ack else {
            return Err("wrong ack kind".into());
        };
        assert_eq!(ack.reference, 7);

        let id_ack = mgr.handle(LifecycleRequest::RequestId).await;
        assert!(matches!(id_ack, LifecycleAck::RequestId(_)));
        Ok(())
    }

    #[tokio::test]
    async fn uninstall_all_clears_the_node() {
        let mgr = manager();
        mgr.install_and_load(install_request("AdcPub", &["ap", "0", "adc", "1"])).await;
        mgr.install(install_request("Watcher", &["evt", "9"])).await;

        let acks = mgr.uninstall_all().await;
        assert_eq!(acks.len(), 2);
        assert!(acks.iter().all(|a| a.status.is_success()));
        assert!(mgr.plugins().is_empty());
    }

    #[tokio::test]
    async fn name_locks_are_dropped_once_free() {
        let mgr = manager();
        mgr.uninstall(uninstall_request("Ghost", 1)).await;
        assert!(lock(&mgr.name_locks).is_empty());

        mgr.install_and_load(install_request("AdcPub", &["ap", "0", "adc", "1"])).await;
        mgr.uninstall(uninstall_request("AdcPub", 2)).await;
        assert!(lock(&mgr.name_locks).is_empty());
    }

    #[tokio::test]
    async fn waiting_request_keeps_the_name_lock() {
        let mgr = Arc::new(manager());
        let first = mgr.hold_name("AdcPub").await;

        let waiter = tokio::spawn({
            let mgr = Arc::clone(&mgr);
            async move { mgr.uninstall(uninstall_request("AdcPub", 1)).await }
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        drop(first);
        assert!(
            lock(&mgr.name_locks).contains_key("AdcPub"),
            "entry must survive while a request waits on it"
        );

        waiter.await.unwrap();
        assert!(lock(&mgr.name_locks).is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn racing_install_and_uninstall_leave_a_consistent_node() {
        for _ in 0..20 {
            let mgr = Arc::new(manager());
            let mut tasks = Vec::new();
            for i in 0..8 {
                let installer = Arc::clone(&mgr);
                tasks.push(tokio::spawn(async move {
                    installer
                        .install_and_load(install_request("AdcPub", &["ap", "0", "adc", "1"]))
                        .await;
                }));
                let remover = Arc::clone(&mgr);
                tasks.push(tokio::spawn(async move {
                    remover.uninstall(uninstall_request("AdcPub", i)).await;
                }));
            }
            for task in tasks {
                task.await.unwrap();
            }

            let channels = mgr.router().channels();
            match mgr.plugins().as_slice() {
                [] => {
                    assert!(channels.is_empty(), "removed plugin left channels open");
                    assert!(lock(&mgr.ports).is_empty());
                }
                [record] => {
                    assert_eq!(record.state, ComponentState::Running);
                    let required: Vec<PortId> = record
                        .ports
                        .iter()
                        .filter(|p| p.direction == Direction::Required)
                        .map(|p| p.id)
                        .collect();
                    assert_eq!(required, vec![PortId(1)]);
                    assert_eq!(channels.len(), required.len());
                    assert!(channels.get(PortId(1)).is_some());
                    assert_eq!(lock(&mgr.ports).ports_of(record.id).len(), 2);
                }
                records => panic!("more than one record for one name: {records:?}"),
            }
            assert!(lock(&mgr.name_locks).is_empty());
        }
    }
}
