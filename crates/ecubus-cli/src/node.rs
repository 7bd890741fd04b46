//! Node assembly: wires the data plane, native pins, bridge and lifecycle
//! manager together from a [`Config`].

use std::net::SocketAddr;
use std::sync::Arc;

use ecubus_hal::HardwareRegistry;
use ecubus_middleware::{ChannelTable, NativeSink, NodeBridge, PublishBus, Router};
use ecubus_runtime::{builtin_catalog, LifecycleManager};
use ecubus_types::{BusError, InstallAck, LoadAck, UninstallAck};
use tokio::net::TcpListener;
use tracing::{error, info, warn};

use crate::config::Config;

/// A running node.
pub struct Node {
    pub name: String,
    pub lifecycle: Arc<LifecycleManager>,
    pub pins: Arc<HardwareRegistry>,
    /// Address the bridge actually bound, when listening.
    pub local_addr: Option<SocketAddr>,
}

impl Node {
    /// Build every node component and start the background tasks.
    ///
    /// Must be called inside a Tokio runtime.  A peer that cannot be reached
    /// is logged and skipped; remote links then fail per write until the node
    /// is restarted.
    ///
    /// # Errors
    ///
    /// * [`BusError::DuplicateLink`] – the link table is inconsistent.
    /// * [`BusError::Config`] – `listen` is not a socket address.
    /// * [`BusError::Transport`] – the listen address cannot be bound.
    pub async fn start(cfg: &Config) -> Result<Self, BusError> {
        let pins = Arc::new(cfg.hardware());
        let native: Arc<dyn NativeSink> = pins.clone();
        let router = Arc::new(
            Router::new(Arc::new(ChannelTable::new()), native).with_links(cfg.link_table()?),
        );
        let bridge = NodeBridge::new(Arc::clone(&router));

        let local_addr = match &cfg.listen {
            Some(listen) => {
                let addr: SocketAddr = listen
                    .parse()
                    .map_err(|e| BusError::Config(format!("invalid listen address '{listen}': {e}")))?;
                let listener = TcpListener::bind(addr)
                    .await
                    .map_err(|e| BusError::Transport(format!("ws bind error on {addr}: {e}")))?;
                let bound = listener
                    .local_addr()
                    .map_err(|e| BusError::Transport(e.to_string()))?;
                info!(node = %cfg.node_name, addr = %bound, "node bridge listening");
                let server = bridge.clone();
                tokio::spawn(async move {
                    if let Err(e) = server.serve(listener).await {
                        error!(error = %e, "node bridge stopped");
                    }
                });
                Some(bound)
            }
            None => None,
        };

        if let Some(peer) = &cfg.peer {
            match bridge.connect(peer).await {
                Ok(link) => router.set_remote(Arc::new(link)),
                Err(e) => warn!(peer = %peer, error = %e, "peer unreachable, remote links disabled"),
            }
        }

        let publish = PublishBus::default();
        let mut published = publish.subscribe_all();
        tokio::spawn(async move {
            while let Some(item) = published.recv().await {
                info!(
                    target: "ecubus::publish",
                    key = %item.key,
                    value = %item.value,
                    at = %item.received_at.format("%H:%M:%S%.3f"),
                    "published"
                );
            }
        });

        let lifecycle = Arc::new(LifecycleManager::new(
            router,
            publish,
            cfg.placement(),
            builtin_catalog(),
        ));

        info!(
            node = %cfg.node_name,
            ecus = cfg.ecus.len(),
            links = cfg.links.len(),
            pins = cfg.pins.len(),
            "node started"
        );
        Ok(Self {
            name: cfg.node_name.clone(),
            lifecycle,
            pins,
            local_addr,
        })
    }

    /// Install and load every plugin listed in the config, in order.
    pub async fn install_configured(&self, cfg: &Config) -> Vec<(InstallAck, Option<LoadAck>)> {
        let mut acks = Vec::with_capacity(cfg.plugins.len());
        for plugin in &cfg.plugins {
            acks.push(self.lifecycle.install_and_load(plugin.to_request()).await);
        }
        acks
    }

    /// Uninstall every plugin and return all pins to their idle level.
    pub async fn shutdown(&self) -> Vec<UninstallAck> {
        let acks = self.lifecycle.uninstall_all().await;
        if let Err(e) = self.pins.release_all() {
            warn!(error = %e, "failed to release native pins");
        }
        info!(node = %self.name, plugins = acks.len(), "node shut down");
        acks
    }
}
