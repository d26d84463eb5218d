//! Individual view connection management.
//!
//! Each connection owns one `ViewSession` and runs a single task that handles,
//! in order, the view's WebSocket frames, the session's outgoing messages and
//! the file watcher's events.

use crate::session::ViewSession;
use crate::watcher::{FileEvent, FileWatcher};
use futures::{SinkExt, StreamExt};
use rtl_core::fs::FileSystem;
use rtl_core::protocol::{HostMessage, MAX_MESSAGE_SIZE, ViewMessage};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::{
    WebSocketStream,
    tungstenite::{Error as WsError, Message},
};
use tracing::{debug, error, warn};

/// Event emitted by a connection.
#[derive(Debug)]
pub enum ConnectionEvent {
    /// The view went away and its session is closed
    Closed { view_id: String },
}

/// A single WebSocket connection to a view.
pub struct ViewConnection {
    pub view_id: String,
    task: Option<JoinHandle<()>>,
}

impl ViewConnection {
    /// Spawn the connection task.
    pub fn new<F: FileSystem + 'static>(
        session: ViewSession<F>,
        outbox: mpsc::UnboundedReceiver<HostMessage>,
        watcher: Option<FileWatcher>,
        ws_stream: WebSocketStream<TcpStream>,
        event_tx: mpsc::UnboundedSender<ConnectionEvent>,
    ) -> Self {
        let view_id = session.id().to_string();
        let task = tokio::spawn(Self::run(session, outbox, watcher, ws_stream, event_tx));

        Self {
            view_id,
            task: Some(task),
        }
    }

    async fn run<F: FileSystem>(
        session: ViewSession<F>,
        mut outbox: mpsc::UnboundedReceiver<HostMessage>,
        mut watcher: Option<FileWatcher>,
        ws_stream: WebSocketStream<TcpStream>,
        event_tx: mpsc::UnboundedSender<ConnectionEvent>,
    ) {
        let view_id = session.id().to_string();
        let (mut write, mut read) = ws_stream.split();

        loop {
            tokio::select! {
                incoming = read.next() => {
                    let msg = match incoming {
                        Some(Ok(msg)) => msg,
                        Some(Err(e)) => {
                            match e {
                                WsError::ConnectionClosed | WsError::AlreadyClosed => {
                                    debug!("Connection {} closed", view_id);
                                }
                                _ => {
                                    error!("WebSocket error on {}: {}", view_id, e);
                                }
                            }
                            break;
                        }
                        None => {
                            debug!("Connection {} stream ended", view_id);
                            break;
                        }
                    };

                    let parsed = match msg {
                        Message::Text(text) => {
                            if text.len() > MAX_MESSAGE_SIZE {
                                Self::warn_oversized(&view_id, text.len());
                                continue;
                            }
                            ViewMessage::from_json(&text)
                        }
                        Message::Binary(data) => {
                            if data.len() > MAX_MESSAGE_SIZE {
                                Self::warn_oversized(&view_id, data.len());
                                continue;
                            }
                            ViewMessage::from_binary(&data)
                        }
                        Message::Close(_) => {
                            debug!("Received close frame from {}", view_id);
                            break;
                        }
                        Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => continue,
                    };

                    match parsed {
                        Ok(message) => session.handle_message(message).await,
                        Err(e) => warn!("Skipping message from {}: {}", view_id, e),
                    }
                }

                Some(message) = outbox.recv() => {
                    let text = match message.to_json() {
                        Ok(text) => text,
                        Err(e) => {
                            error!("Failed to encode {} for {}: {}", message.kind(), view_id, e);
                            continue;
                        }
                    };
                    if let Err(e) = write.send(Message::Text(text)).await {
                        debug!("Failed to send {} to {}: {}", message.kind(), view_id, e);
                        break;
                    }
                }

                Some(event) = next_file_event(&mut watcher) => {
                    session.on_watcher_event(event).await;
                }
            }
        }

        session.close();
        let _ = write.send(Message::Close(None)).await;

        // Release the watcher and session before reporting
        drop(watcher);
        drop(session);
        let _ = event_tx.send(ConnectionEvent::Closed { view_id });
    }

    fn warn_oversized(view_id: &str, len: usize) {
        warn!(
            "Message from {} exceeds max size ({} > {}), dropping",
            view_id, len, MAX_MESSAGE_SIZE
        );
    }

    /// Stop the connection task. Its session closes with it.
    pub fn close(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl Drop for ViewConnection {
    fn drop(&mut self) {
        self.close();
    }
}

async fn next_file_event(watcher: &mut Option<FileWatcher>) -> Option<FileEvent> {
    match watcher {
        Some(watcher) => watcher.event_rx().recv().await,
        None => std::future::pending().await,
    }
}
