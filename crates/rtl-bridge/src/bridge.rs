//! Host-side document bridge.
//!
//! The bridge is the single source of truth for persisted content. It keeps
//! one live `Document` per path and hands out a `ViewSession` per view.

use crate::config::BridgeConfig;
use crate::document::{DiskSync, Document};
use crate::session::ViewSession;
use rtl_core::fs::{FileSystem, FsError, decode_text};
use rtl_core::protocol::HostMessage;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum BridgeError {
    /// Writing the document failed; the view keeps its draft.
    #[error(transparent)]
    Persist(FsError),

    /// Reading the document for a refresh or comparison failed.
    #[error(transparent)]
    Read(FsError),

    #[error("View session is closed")]
    SessionClosed,
}

pub type Result<T> = std::result::Result<T, BridgeError>;

pub struct DocumentBridge<F: FileSystem> {
    fs: Arc<F>,
    config: BridgeConfig,
    documents: Mutex<HashMap<String, Weak<Document>>>,
}

impl<F: FileSystem> DocumentBridge<F> {
    pub fn new(fs: F, config: BridgeConfig) -> Self {
        Self {
            fs: Arc::new(fs),
            config,
            documents: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    /// The live document for `path`, if any view (or caller) holds it.
    pub fn document(&self, path: &str) -> Option<Arc<Document>> {
        self.documents
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(path)
            .and_then(Weak::upgrade)
    }

    /// Number of documents currently alive.
    pub fn open_documents(&self) -> usize {
        self.documents
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .filter(|doc| doc.strong_count() > 0)
            .count()
    }

    /// Get the live document for `path`, loading it from storage if needed.
    /// A missing file loads as an empty document.
    pub async fn load_document(&self, path: &str) -> Result<Arc<Document>> {
        if let Some(document) = self.document(path) {
            return Ok(document);
        }

        // Stat before reading: a write in between leaves the recorded mtime
        // behind the text, and the next sync rereads it.
        let synced_mtime = match self.fs.stat(path).await {
            Ok(stat) => stat.mtime_millis,
            Err(FsError::NotFound(_)) => 0,
            Err(e) => return Err(BridgeError::Read(e)),
        };

        let text = match self.fs.read(path).await {
            Ok(bytes) => decode_text(bytes),
            Err(FsError::NotFound(_)) => {
                debug!("{} does not exist yet, starting empty", path);
                String::new()
            }
            Err(e) => return Err(BridgeError::Read(e)),
        };

        let mut documents = self.documents.lock().unwrap_or_else(|e| e.into_inner());
        // Another open may have loaded it while we were reading
        if let Some(document) = documents.get(path).and_then(Weak::upgrade) {
            return Ok(document);
        }

        documents.retain(|_, doc| doc.strong_count() > 0);
        let document = Arc::new(Document::new(path, text, synced_mtime));
        documents.insert(path.to_string(), Arc::downgrade(&document));
        Ok(document)
    }

    /// Open a session for a new view of `path`.
    ///
    /// The returned receiver carries every message for the view, starting with
    /// the initial `update`. A live document is first checked against
    /// storage; if the file moved under unsaved host edits, the view also
    /// gets `fileChanged` so it can compare.
    pub async fn open_view(
        &self,
        path: &str,
    ) -> Result<(ViewSession<F>, mpsc::UnboundedReceiver<HostMessage>)> {
        let document = self.load_document(path).await?;

        let diverged = match document.sync_with_disk(&*self.fs).await {
            Ok(DiskSync::Current) | Ok(DiskSync::Reloaded) => false,
            Ok(DiskSync::Diverged) => true,
            Err(e) => {
                warn!("Could not check {} against disk: {}", path, e);
                true
            }
        };

        let initial_mtime = match self.fs.stat(path).await {
            Ok(stat) => stat.mtime_millis,
            Err(FsError::NotFound(_)) => 0,
            Err(e) => {
                warn!("Could not stat {}, assuming no prior timestamp: {}", path, e);
                0
            }
        };

        let (outbox, inbox) = mpsc::unbounded_channel();
        let session = ViewSession::new(
            document,
            Arc::clone(&self.fs),
            &self.config,
            initial_mtime,
            outbox,
        );
        session.post(HostMessage::Update {
            content: session.document().text(),
        });
        if diverged {
            session.post(HostMessage::file_changed());
        }

        info!("Opened view {} on {}", session.id(), path);
        Ok((session, inbox))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rtl_core::fs::InMemoryFs;

    #[tokio::test]
    async fn test_missing_file_opens_empty() {
        let bridge = DocumentBridge::new(InMemoryFs::new(), BridgeConfig::default());
        let (session, mut rx) = bridge.open_view("new.txt").await.unwrap();

        assert_eq!(session.last_known_mtime(), 0);
        assert_eq!(
            rx.try_recv().unwrap(),
            HostMessage::Update {
                content: String::new()
            }
        );
    }

    #[tokio::test]
    async fn test_views_share_live_document() {
        let bridge = DocumentBridge::new(
            InMemoryFs::with_file("a.txt", "disk"),
            BridgeConfig::default(),
        );

        let (first, _rx1) = bridge.open_view("a.txt").await.unwrap();
        first.document().replace_all("unsaved host edit");

        let (second, mut rx2) = bridge.open_view("a.txt").await.unwrap();
        assert!(Arc::ptr_eq(first.document(), second.document()));
        assert_eq!(bridge.open_documents(), 1);
        assert_eq!(
            rx2.try_recv().unwrap(),
            HostMessage::Update {
                content: "unsaved host edit".into()
            }
        );
    }

    #[tokio::test]
    async fn test_document_released_with_last_view() {
        let bridge = DocumentBridge::new(
            InMemoryFs::with_file("a.txt", "one"),
            BridgeConfig::default(),
        );

        let (session, _rx) = bridge.open_view("a.txt").await.unwrap();
        assert!(bridge.document("a.txt").is_some());

        drop(session);
        assert!(bridge.document("a.txt").is_none());
        assert_eq!(bridge.open_documents(), 0);
    }

    #[tokio::test]
    async fn test_unreadable_file_fails_to_open() {
        struct BrokenFs;

        #[async_trait::async_trait]
        impl FileSystem for BrokenFs {
            async fn read(&self, path: &str) -> rtl_core::fs::Result<Vec<u8>> {
                Err(FsError::Io(format!("{}: device error", path)))
            }
            async fn write(&self, _path: &str, _content: &[u8]) -> rtl_core::fs::Result<()> {
                Ok(())
            }
            async fn stat(&self, path: &str) -> rtl_core::fs::Result<rtl_core::FileStat> {
                Err(FsError::Io(format!("{}: device error", path)))
            }
        }

        let bridge = DocumentBridge::new(BrokenFs, BridgeConfig::default());
        let err = bridge.open_view("a.txt").await.err().unwrap();
        assert!(matches!(err, BridgeError::Read(FsError::Io(_))));
        assert!(err.to_string().contains("device error"));
    }

    #[tokio::test]
    async fn test_reopen_after_external_write_loads_disk() {
        let fs = Arc::new(InMemoryFs::with_file("a.txt", "A"));
        fs.set_mtime("a.txt", 1_000);
        let bridge = DocumentBridge::new(Arc::clone(&fs), BridgeConfig::default());

        let (first, _rx1) = bridge.open_view("a.txt").await.unwrap();
        fs.put("a.txt", "external edit");
        fs.set_mtime("a.txt", 5_000);

        let (second, mut rx2) = bridge.open_view("a.txt").await.unwrap();
        assert!(Arc::ptr_eq(first.document(), second.document()));
        assert_eq!(second.last_known_mtime(), 5_000);
        assert_eq!(
            rx2.try_recv().unwrap(),
            HostMessage::Update {
                content: "external edit".into()
            }
        );
        assert!(rx2.try_recv().is_err());

        // Saving from the reopened view builds on the external text
        second.handle_save("external edit, extended").await;
        assert_eq!(fs.contents("a.txt").as_deref(), Some("external edit, extended"));
    }

    #[tokio::test]
    async fn test_reopen_with_unsaved_host_edit_flags_external_change() {
        let fs = Arc::new(InMemoryFs::with_file("a.txt", "A"));
        fs.set_mtime("a.txt", 1_000);
        let bridge = DocumentBridge::new(Arc::clone(&fs), BridgeConfig::default());

        let (first, _rx1) = bridge.open_view("a.txt").await.unwrap();
        first.document().replace_all("host edit");
        fs.put("a.txt", "external edit");
        fs.set_mtime("a.txt", 5_000);

        let (_second, mut rx2) = bridge.open_view("a.txt").await.unwrap();
        assert_eq!(
            rx2.try_recv().unwrap(),
            HostMessage::Update {
                content: "host edit".into()
            }
        );
        assert_eq!(rx2.try_recv().unwrap(), HostMessage::file_changed());
        assert_eq!(fs.contents("a.txt").as_deref(), Some("external edit"));
    }
}
