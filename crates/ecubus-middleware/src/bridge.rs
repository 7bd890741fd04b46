//! WebSocket node bridge.
//!
//! Carries remote-transport frames between nodes as binary WebSocket
//! messages:
//!
//! 1. **Serves** an endpoint where peer nodes connect and push frames.
//!    Every inbound binary message is handed to
//!    [`Router::deliver_frame`].
//!
//! 2. **Connects** to a peer and returns a [`WsLink`] that the local
//!    [`Router`] uses as its [`RemoteLink`].  Frames the peer sends back on
//!    the same connection are delivered locally as well.
//!
//! The bridge does not look inside frames beyond what the router needs.
//! Malformed frames are logged and dropped.

use std::net::SocketAddr;
use std::sync::Arc;

use ecubus_types::BusError;
use futures_util::{SinkExt, Stream, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{accept_async, connect_async};
use tracing::{debug, error, info, warn};

use crate::router::Router;
use crate::transport::{ChannelLink, RemoteLink};

/// Outbound frames buffered per peer before new ones are dropped.
pub const DEFAULT_LINK_CAPACITY: usize = 1024;

/// Bridge between the local [`Router`] and peer nodes.
#[derive(Clone)]
pub struct NodeBridge {
    router: Arc<Router>,
}

impl NodeBridge {
    pub fn new(router: Arc<Router>) -> Self {
        Self { router }
    }

    // -----------------------------------------------------------------------
    // Server side
    // -----------------------------------------------------------------------

    /// Bind `addr` and serve peers until a fatal error.
    ///
    /// # Errors
    ///
    /// [`BusError::Transport`] if the TCP listener cannot be bound.
    pub async fn run_ws_server(self, addr: SocketAddr) -> Result<(), BusError> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| BusError::Transport(format!("ws bind error on {addr}: {e}")))?;
        info!(addr = %addr, "node bridge listening");
        self.serve(listener).await
    }

    /// Serve peers on an already-bound listener.
    pub async fn serve(self, listener: TcpListener) -> Result<(), BusError> {
        loop {
            match listener.accept().await {
                Ok((stream, peer)) => {
                    let bridge = self.clone();
                    tokio::spawn(async move {
                        if let Err(e) = bridge.handle_peer(stream, peer).await {
                            error!(peer = %peer, error = %e, "peer connection error");
                        }
                    });
                }
                Err(e) => {
                    error!(error = %e, "ws accept error");
                }
            }
        }
    }

    async fn handle_peer(&self, stream: TcpStream, peer: SocketAddr) -> Result<(), BusError> {
        let ws_stream = accept_async(stream)
            .await
            .map_err(|e| BusError::Transport(format!("ws handshake from {peer}: {e}")))?;
        debug!(peer = %peer, "peer connected");

        let (_ws_tx, ws_rx) = ws_stream.split();
        self.pump_inbound(ws_rx, &peer.to_string()).await;
        debug!(peer = %peer, "peer disconnected");
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Client side
    // -----------------------------------------------------------------------

    /// Connect to the peer at `url` (e.g. `ws://10.0.0.2:7070`).
    ///
    /// Spawns a writer task fed by the returned [`WsLink`] and a reader task
    /// that delivers frames the peer sends back.  Both end when the
    /// connection closes.
    ///
    /// # Errors
    ///
    /// [`BusError::Transport`] if the connection or handshake fails.
    pub async fn connect(&self, url: &str) -> Result<WsLink, BusError> {
        let (ws_stream, _response) = connect_async(url)
            .await
            .map_err(|e| BusError::Transport(format!("ws connect to {url}: {e}")))?;
        info!(peer = %url, "connected to peer node");

        let (mut ws_tx, ws_rx) = ws_stream.split();
        let (link, mut frames) = ChannelLink::new(DEFAULT_LINK_CAPACITY);

        let peer = url.to_string();
        tokio::spawn(async move {
            while let Some(frame) = frames.recv().await {
                if let Err(e) = ws_tx.send(Message::Binary(frame.into())).await {
                    warn!(peer = %peer, error = %e, "ws send failed, closing link");
                    break;
                }
            }
        });

        let bridge = self.clone();
        let peer = url.to_string();
        tokio::spawn(async move {
            bridge.pump_inbound(ws_rx, &peer).await;
        });

        Ok(WsLink { inner: link })
    }

    // -----------------------------------------------------------------------
    // Shared
    // -----------------------------------------------------------------------

    async fn pump_inbound<S>(&self, mut ws_rx: S, peer: &str)
    where
        S: Stream<Item = Result<Message, tungstenite::Error>> + Unpin,
    {
        while let Some(msg) = ws_rx.next().await {
            match msg {
                Ok(Message::Binary(frame)) => {
                    if let Err(e) = self.router.deliver_frame(&frame) {
                        warn!(peer = %peer, error = %e, "inbound frame dropped");
                    }
                }
                Ok(Message::Close(_)) | Err(_) => break,
                Ok(_) => {}
            }
        }
    }
}

/// [`RemoteLink`] writing into a peer WebSocket connection.
#[derive(Clone)]
pub struct WsLink {
    inner: ChannelLink,
}

impl RemoteLink for WsLink {
    fn send_frame(&self, frame: Vec<u8>) -> Result<(), BusError> {
        self.inner.send_frame(frame)
    }
}
