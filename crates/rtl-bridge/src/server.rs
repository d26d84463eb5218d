//! WebSocket server for accepting view connections.
//!
//! Every accepted connection becomes one view session on the served
//! document, with its own file watcher.

use crate::bridge::DocumentBridge;
use crate::connection::{ConnectionEvent, ViewConnection};
use crate::watcher::FileWatcher;
use anyhow::Result;
use rtl_core::fs::FileSystem;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::accept_async;
use tracing::{debug, error, info, warn};

/// Event emitted by the server.
#[derive(Debug)]
pub enum ServerEvent {
    /// A view disconnected and its session was disposed.
    ViewClosed { view_id: String },
}

/// WebSocket server serving one document to any number of views.
pub struct ViewServer<F: FileSystem> {
    bridge: Arc<DocumentBridge<F>>,
    /// Document path as known to the bridge's file system
    document_path: String,
    /// File to watch for external changes (None = watching disabled)
    watch_path: Option<PathBuf>,
    connections: HashMap<String, ViewConnection>,
    event_tx: mpsc::UnboundedSender<ConnectionEvent>,
    event_rx: mpsc::UnboundedReceiver<ConnectionEvent>,
}

impl<F: FileSystem + 'static> ViewServer<F> {
    pub fn new(
        bridge: Arc<DocumentBridge<F>>,
        document_path: impl Into<String>,
        watch_path: Option<PathBuf>,
    ) -> Self {
        let (event_tx, event_rx) = mpsc::unbounded_channel();

        Self {
            bridge,
            document_path: document_path.into(),
            watch_path,
            connections: HashMap::new(),
            event_tx,
            event_rx,
        }
    }

    /// Bind to an address and return the TCP listener.
    pub async fn bind(listen_addr: &str) -> Result<TcpListener> {
        let listener = TcpListener::bind(listen_addr).await?;
        info!("WebSocket server listening on {}", listen_addr);
        Ok(listener)
    }

    /// Upgrade a new TCP connection and open a view session for it.
    pub async fn accept_connection(&mut self, stream: TcpStream, addr: SocketAddr) {
        let ws_stream = match accept_async(stream).await {
            Ok(ws) => ws,
            Err(e) => {
                // Health checks connect and close without a WebSocket handshake
                let err_str = e.to_string();
                if err_str.contains("Handshake not finished")
                    || err_str.contains("Connection reset")
                    || err_str.contains("unexpected EOF")
                {
                    debug!("Connection closed before handshake from {}", addr);
                } else {
                    error!("WebSocket upgrade failed for {}: {}", addr, e);
                }
                return;
            }
        };

        let (session, outbox) = match self.bridge.open_view(&self.document_path).await {
            Ok(opened) => opened,
            Err(e) => {
                error!("Failed to open {} for {}: {}", self.document_path, addr, e);
                return;
            }
        };

        let watcher = match &self.watch_path {
            Some(path) => {
                match FileWatcher::new(path.clone(), self.bridge.config().watch_debounce) {
                    Ok(watcher) => Some(watcher),
                    Err(e) => {
                        warn!("File watching unavailable for {}: {:#}", session.id(), e);
                        None
                    }
                }
            }
            None => None,
        };

        info!("New view from {} (view_id: {})", addr, session.id());
        let conn = ViewConnection::new(session, outbox, watcher, ws_stream, self.event_tx.clone());
        self.connections.insert(conn.view_id.clone(), conn);
    }

    /// Wait for the next server event.
    pub async fn poll_event(&mut self) -> Option<ServerEvent> {
        let event = self.event_rx.recv().await?;

        match event {
            ConnectionEvent::Closed { view_id } => {
                self.connections.remove(&view_id);
                Some(ServerEvent::ViewClosed { view_id })
            }
        }
    }

    pub fn bridge(&self) -> &Arc<DocumentBridge<F>> {
        &self.bridge
    }

    /// Number of connected views.
    pub fn view_count(&self) -> usize {
        self.connections.len()
    }
}
