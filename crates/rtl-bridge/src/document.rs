//! Host-side in-memory document.
//!
//! One `Document` exists per open path, shared by every view session on it.
//! Text changes and saves are published on the document's `EventBus`.

use rtl_core::events::{DocumentEvent, EventBus};
use rtl_core::fs::{FileSystem, FsError, decode_text};
use std::sync::{Arc, RwLock};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Outcome of checking the document against storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiskSync {
    /// Storage has not moved since the last load or save.
    Current,
    /// Storage was newer and the document had no unsaved edits; it now holds
    /// the stored text.
    Reloaded,
    /// Storage was newer but the document has edits of its own. Nothing was
    /// replaced.
    Diverged,
}

struct DocumentState {
    text: String,
    /// Storage mtime the text was last loaded from or saved at
    synced_mtime: u64,
    /// Text changed since it was last loaded or saved
    modified: bool,
}

pub struct Document {
    path: String,
    state: RwLock<DocumentState>,
    events: Arc<EventBus>,
    /// Serializes replace + persist so one save completes before the next
    save_lock: Mutex<()>,
}

impl Document {
    /// A document holding `text`, as stored at `synced_mtime` (0 when the
    /// file does not exist).
    pub fn new(path: impl Into<String>, text: impl Into<String>, synced_mtime: u64) -> Self {
        Self {
            path: path.into(),
            state: RwLock::new(DocumentState {
                text: text.into(),
                synced_mtime,
                modified: false,
            }),
            events: Arc::new(EventBus::new()),
            save_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Current in-memory text.
    pub fn text(&self) -> String {
        self.state.read().unwrap_or_else(|e| e.into_inner()).text.clone()
    }

    pub fn synced_mtime(&self) -> u64 {
        self.state.read().unwrap_or_else(|e| e.into_inner()).synced_mtime
    }

    /// Whether the text has edits that were never persisted.
    pub fn is_modified(&self) -> bool {
        self.state.read().unwrap_or_else(|e| e.into_inner()).modified
    }

    pub fn events(&self) -> &Arc<EventBus> {
        &self.events
    }

    /// Replace the full text. Emits `Changed` when the text actually differs.
    pub fn replace_all(&self, content: &str) -> bool {
        {
            let mut state = self.state.write().unwrap_or_else(|e| e.into_inner());
            if state.text == content {
                return false;
            }
            state.text = content.to_string();
            state.modified = true;
        }

        // Lock released: subscribers read the text back
        self.events.emit(DocumentEvent::changed(&self.path));
        true
    }

    /// Replace the text and persist it. Returns the post-write mtime.
    pub async fn save<F: FileSystem + ?Sized>(&self, fs: &F, content: &str) -> Result<u64, FsError> {
        let _guard = self.save_lock.lock().await;

        self.replace_all(content);
        fs.write(&self.path, content.as_bytes()).await?;

        let mtime_millis = match fs.stat(&self.path).await {
            Ok(stat) => stat.mtime_millis,
            Err(e) => {
                warn!("Saved {} but could not stat it: {}", self.path, e);
                0
            }
        };
        debug!("Persisted {} ({} bytes, mtime {})", self.path, content.len(), mtime_millis);

        {
            let mut state = self.state.write().unwrap_or_else(|e| e.into_inner());
            state.modified = false;
            if mtime_millis > 0 {
                state.synced_mtime = mtime_millis;
            }
        }

        self.events.emit(DocumentEvent::saved(&self.path, mtime_millis));
        Ok(mtime_millis)
    }

    /// Bring the document up to date with storage if another program wrote
    /// the file since the last load or save.
    ///
    /// A reload replaces the text without emitting `Changed`: views already
    /// open learn about the write from their own watchers.
    pub async fn sync_with_disk<F: FileSystem + ?Sized>(&self, fs: &F) -> Result<DiskSync, FsError> {
        let _guard = self.save_lock.lock().await;

        let disk_mtime = match fs.stat(&self.path).await {
            Ok(stat) => stat.mtime_millis,
            Err(FsError::NotFound(_)) => return Ok(DiskSync::Current),
            Err(e) => return Err(e),
        };

        {
            let state = self.state.read().unwrap_or_else(|e| e.into_inner());
            if disk_mtime <= state.synced_mtime {
                return Ok(DiskSync::Current);
            }
            if state.modified {
                warn!(
                    "{} changed on disk (mtime {}) while the document has unsaved edits",
                    self.path, disk_mtime
                );
                return Ok(DiskSync::Diverged);
            }
        }

        let text = match fs.read(&self.path).await {
            Ok(bytes) => decode_text(bytes),
            Err(FsError::NotFound(_)) => return Ok(DiskSync::Current),
            Err(e) => return Err(e),
        };

        let mut state = self.state.write().unwrap_or_else(|e| e.into_inner());
        state.text = text;
        state.synced_mtime = disk_mtime;
        info!("Reloaded {} from disk (mtime {})", self.path, disk_mtime);
        Ok(DiskSync::Reloaded)
    }
}

impl std::fmt::Debug for Document {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Document")
            .field("path", &self.path)
            .field("subscribers", &self.events.subscriber_count())
            .finish()
    }
}
