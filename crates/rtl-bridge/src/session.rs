//! One view's session against one document.
//!
//! A `ViewSession` handles the view's save/refresh requests and decides which
//! document and file-system changes reach the view. Two mechanisms keep a
//! view's own saves from coming back to it as external changes:
//!
//! - the `InternalSaveFlag`, raised for the duration of a save plus a grace
//!   period, during which watcher events and document echoes are dropped;
//! - the `ModificationWatch`, which only accepts a watcher event when the file
//!   mtime moved past the last known one by more than the guard interval.

use crate::bridge::BridgeError;
use crate::config::BridgeConfig;
use crate::document::Document;
use crate::watcher::FileEvent;
use rtl_core::events::{DocumentEvent, Subscription};
use rtl_core::fs::{FileSystem, decode_text};
use rtl_core::protocol::{HostMessage, ViewMessage};
use rtl_core::watch::{ModificationWatch, WatchVerdict};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Outcome of a save, as reported to the caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum SaveResult {
    Success,
    Error { message: String },
}

/// Both versions of the document, for a comparison.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Comparison {
    pub disk_content: String,
    pub draft_content: String,
}

/// Marks a save by this session as in progress.
///
/// Raised before the document is touched; cleared by a timer task a grace
/// period after the save completes. Raising again cancels a pending clear.
#[derive(Debug, Default)]
pub struct InternalSaveFlag {
    raised: Arc<AtomicBool>,
    clear_task: Mutex<Option<JoinHandle<()>>>,
}

impl InternalSaveFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_raised(&self) -> bool {
        self.raised.load(Ordering::SeqCst)
    }

    pub fn raise(&self) {
        self.cancel();
        self.raised.store(true, Ordering::SeqCst);
    }

    /// Clear the flag after `delay`. Must be called within a tokio runtime.
    pub fn schedule_clear(&self, delay: Duration) {
        let raised = Arc::clone(&self.raised);
        let task = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            raised.store(false, Ordering::SeqCst);
        });

        let previous = self
            .clear_task
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .replace(task);
        if let Some(previous) = previous {
            previous.abort();
        }
    }

    /// Abort a pending clear. The flag keeps its current value.
    pub fn cancel(&self) {
        if let Some(task) = self
            .clear_task
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
        {
            task.abort();
        }
    }
}

impl Drop for InternalSaveFlag {
    fn drop(&mut self) {
        self.cancel();
    }
}

/// Session state reachable from the document's event callbacks.
struct SessionShared {
    id: String,
    path: String,
    flag: InternalSaveFlag,
    watch: Mutex<ModificationWatch>,
    closed: AtomicBool,
    outbox: mpsc::UnboundedSender<HostMessage>,
}

impl SessionShared {
    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Queue a message for the view. Dropped once the session is closed.
    fn post(&self, message: HostMessage) -> bool {
        if self.is_closed() {
            debug!("Session {} closed, dropping {}", self.id, message.kind());
            return false;
        }
        if self.outbox.send(message).is_err() {
            debug!("View for session {} is gone", self.id);
            return false;
        }
        true
    }

    fn forward_update(&self, content: String) -> bool {
        if self.flag.is_raised() {
            debug!("Session {}: not echoing own save of {}", self.id, self.path);
            return false;
        }
        self.post(HostMessage::Update { content })
    }

    fn advance_watch(&self, mtime_millis: u64) {
        self.watch
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .advance_to(mtime_millis);
    }

    fn observe(&self, mtime_millis: u64) -> WatchVerdict {
        self.watch
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .observe(mtime_millis)
    }
}

/// A bridge session for one view of one document.
pub struct ViewSession<F: FileSystem> {
    shared: Arc<SessionShared>,
    document: Arc<Document>,
    fs: Arc<F>,
    save_grace: Duration,
    _subscription: Subscription,
}

impl<F: FileSystem> ViewSession<F> {
    pub(crate) fn new(
        document: Arc<Document>,
        fs: Arc<F>,
        config: &BridgeConfig,
        initial_mtime: u64,
        outbox: mpsc::UnboundedSender<HostMessage>,
    ) -> Self {
        let shared = Arc::new(SessionShared {
            id: uuid::Uuid::new_v4().to_string(),
            path: document.path().to_string(),
            flag: InternalSaveFlag::new(),
            watch: Mutex::new(ModificationWatch::new(initial_mtime, config.guard_interval)),
            closed: AtomicBool::new(false),
            outbox,
        });

        let weak_document = Arc::downgrade(&document);
        let callback_shared = Arc::clone(&shared);
        let subscription = document.events().subscribe(move |event| match event {
            DocumentEvent::Changed { .. } => {
                if let Some(document) = weak_document.upgrade() {
                    callback_shared.forward_update(document.text());
                }
            }
            DocumentEvent::Saved { mtime_millis, .. } => {
                callback_shared.advance_watch(mtime_millis);
            }
        });

        Self {
            shared,
            document,
            fs,
            save_grace: config.save_grace,
            _subscription: subscription,
        }
    }

    pub fn id(&self) -> &str {
        &self.shared.id
    }

    pub fn path(&self) -> &str {
        &self.shared.path
    }

    pub fn document(&self) -> &Arc<Document> {
        &self.document
    }

    pub fn is_closed(&self) -> bool {
        self.shared.is_closed()
    }

    pub fn is_saving(&self) -> bool {
        self.shared.flag.is_raised()
    }

    pub fn last_known_mtime(&self) -> u64 {
        self.shared
            .watch
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .last_known_millis()
    }

    /// Queue a message for the view.
    pub fn post(&self, message: HostMessage) -> bool {
        self.shared.post(message)
    }

    /// Dispatch a message from the view.
    pub async fn handle_message(&self, message: ViewMessage) {
        match message {
            ViewMessage::Save { content } => {
                self.handle_save(&content).await;
            }
            ViewMessage::Refresh => {
                // Failures are already reported to the view
                let _ = self.handle_refresh().await;
            }
            ViewMessage::RefreshWithDraft { draft_content } => {
                let _ = self.handle_refresh_with_draft(draft_content).await;
            }
        }
    }

    /// Replace the document with `content` and persist it.
    pub async fn handle_save(&self, content: &str) -> SaveResult {
        if self.is_closed() {
            debug!("Session {}: save after close", self.id());
            return SaveResult::Error {
                message: BridgeError::SessionClosed.to_string(),
            };
        }

        self.shared.flag.raise();
        let result = self.document.save(&*self.fs, content).await;
        self.shared.flag.schedule_clear(self.save_grace);

        match result {
            Ok(mtime_millis) => {
                info!(
                    "Saved {} ({} bytes, mtime {})",
                    self.path(),
                    content.len(),
                    mtime_millis
                );
                self.post(HostMessage::save_success());
                SaveResult::Success
            }
            Err(e) => {
                let err = BridgeError::Persist(e);
                error!("Failed to save {}: {}", self.path(), err);
                let message = HostMessage::save_error(&err);
                self.post(message);
                SaveResult::Error {
                    message: err.to_string(),
                }
            }
        }
    }

    /// Read the persisted content, bypassing the in-memory document.
    pub async fn handle_refresh(&self) -> Result<String, BridgeError> {
        match self.read_disk().await {
            Ok(content) => {
                self.post(HostMessage::RefreshComplete {
                    content: content.clone(),
                });
                Ok(content)
            }
            Err(err) => {
                warn!("Failed to refresh {}: {}", self.path(), err);
                self.post(HostMessage::refresh_error(&err));
                Err(err)
            }
        }
    }

    /// Read the persisted content and hand both versions back for a
    /// comparison. Nothing is modified.
    pub async fn handle_refresh_with_draft(
        &self,
        draft_content: String,
    ) -> Result<Comparison, BridgeError> {
        let disk_content = match self.read_disk().await {
            Ok(content) => content,
            Err(err) => {
                warn!("Failed to compare {}: {}", self.path(), err);
                self.post(HostMessage::compare_error(&err));
                return Err(err);
            }
        };

        self.post(HostMessage::merge_dialog(
            disk_content.clone(),
            draft_content.clone(),
        ));
        Ok(Comparison {
            disk_content,
            draft_content,
        })
    }

    /// Forward the live document text to the view, unless this session is
    /// the one saving.
    pub fn on_host_document_changed(&self) -> bool {
        self.shared.forward_update(self.document.text())
    }

    /// A watcher reported a write with modification time `mtime_millis`.
    /// Returns whether the view was told.
    pub fn on_external_file_changed(&self, mtime_millis: u64) -> bool {
        if self.is_closed() {
            return false;
        }
        if self.shared.flag.is_raised() {
            debug!(
                "Session {}: ignoring change to {} during own save",
                self.id(),
                self.path()
            );
            return false;
        }

        match self.shared.observe(mtime_millis) {
            WatchVerdict::External => {
                info!("External change to {} (mtime {})", self.path(), mtime_millis);
                self.post(HostMessage::file_changed())
            }
            WatchVerdict::Duplicate => {
                debug!(
                    "Session {}: duplicate change event for {} (mtime {})",
                    self.id(),
                    self.path(),
                    mtime_millis
                );
                false
            }
        }
    }

    /// Entry point for the file watcher. Stats the file for its mtime.
    pub async fn on_watcher_event(&self, event: FileEvent) -> bool {
        match self.fs.stat(self.path()).await {
            Ok(stat) => self.on_external_file_changed(stat.mtime_millis),
            Err(e) => {
                debug!("Ignoring {:?} event for {}: {}", event.kind, self.path(), e);
                false
            }
        }
    }

    /// Dispose the session. Later messages are dropped.
    pub fn close(&self) {
        if !self.shared.closed.swap(true, Ordering::SeqCst) {
            self.shared.flag.cancel();
            debug!("Session {} closed", self.id());
        }
    }

    async fn read_disk(&self) -> Result<String, BridgeError> {
        let bytes = self.fs.read(self.path()).await.map_err(BridgeError::Read)?;
        Ok(decode_text(bytes))
    }
}

impl<F: FileSystem> Drop for ViewSession<F> {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::DocumentBridge;
    use rtl_core::fs::InMemoryFs;
    use rtl_core::protocol::FILE_CHANGED_MESSAGE;

    const PATH: &str = "notes.txt";

    fn test_config() -> BridgeConfig {
        BridgeConfig {
            save_grace: Duration::from_millis(50),
            guard_interval: Duration::from_millis(100),
            watch_debounce: Duration::from_millis(50),
        }
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<HostMessage>) -> Vec<HostMessage> {
        let mut messages = Vec::new();
        while let Ok(message) = rx.try_recv() {
            messages.push(message);
        }
        messages
    }

    fn setup(content: &str) -> (Arc<InMemoryFs>, DocumentBridge<Arc<InMemoryFs>>) {
        let fs = Arc::new(InMemoryFs::with_file(PATH, content));
        let bridge = DocumentBridge::new(Arc::clone(&fs), test_config());
        (fs, bridge)
    }

    #[tokio::test]
    async fn test_open_posts_initial_update() {
        let (_fs, bridge) = setup("hello");
        let (_session, mut rx) = bridge.open_view(PATH).await.unwrap();

        assert_eq!(
            drain(&mut rx),
            vec![HostMessage::Update {
                content: "hello".into()
            }]
        );
    }

    #[tokio::test]
    async fn test_save_then_refresh_round_trips() {
        let (fs, bridge) = setup("hello");
        let (session, mut rx) = bridge.open_view(PATH).await.unwrap();
        drain(&mut rx);

        assert_eq!(session.handle_save("hello world").await, SaveResult::Success);
        assert_eq!(session.handle_refresh().await.unwrap(), "hello world");
        assert_eq!(fs.contents(PATH).as_deref(), Some("hello world"));

        // Own save is not echoed back as an update
        assert_eq!(
            drain(&mut rx),
            vec![
                HostMessage::save_success(),
                HostMessage::RefreshComplete {
                    content: "hello world".into()
                },
            ]
        );
    }

    #[tokio::test]
    async fn test_save_result_serializes_with_status() {
        let json = serde_json::to_string(&SaveResult::Success).unwrap();
        assert_eq!(json, r#"{"status":"success"}"#);

        let json = serde_json::to_string(&SaveResult::Error {
            message: "nope".into(),
        })
        .unwrap();
        assert_eq!(json, r#"{"status":"error","message":"nope"}"#);
    }

    #[tokio::test]
    async fn test_watcher_event_for_own_save_is_suppressed() {
        let (fs, bridge) = setup("A");
        let (session, mut rx) = bridge.open_view(PATH).await.unwrap();
        drain(&mut rx);

        session.handle_save("B").await;
        assert!(session.is_saving());

        // The watcher fires for our own write while the flag is up
        let mtime = fs.stat(PATH).await.unwrap().mtime_millis;
        assert!(!session.on_external_file_changed(mtime + 10_000));
        assert!(!session.on_watcher_event(FileEvent {
            kind: crate::watcher::FileEventKind::Modified
        })
        .await);

        // And after the grace period the same mtime is within the guard
        tokio::time::sleep(Duration::from_millis(120)).await;
        assert!(!session.is_saving());
        assert!(!session.on_external_file_changed(mtime + 50));

        let messages = drain(&mut rx);
        assert!(
            messages
                .iter()
                .all(|m| !matches!(m, HostMessage::FileChanged { .. }))
        );
    }

    #[tokio::test]
    async fn test_external_change_past_guard_is_reported_once() {
        let (fs, bridge) = setup("A");
        let (session, mut rx) = bridge.open_view(PATH).await.unwrap();
        drain(&mut rx);

        let initial = session.last_known_mtime();
        fs.put(PATH, "edited elsewhere");
        fs.set_mtime(PATH, initial + 2_000);

        let event = FileEvent {
            kind: crate::watcher::FileEventKind::Modified,
        };
        assert!(session.on_watcher_event(event).await);
        assert!(!session.on_watcher_event(event).await);
        assert_eq!(session.last_known_mtime(), initial + 2_000);

        assert_eq!(
            drain(&mut rx),
            vec![HostMessage::FileChanged {
                message: FILE_CHANGED_MESSAGE.into(),
                has_unsaved_changes: Some(true),
            }]
        );
    }

    #[tokio::test]
    async fn test_change_within_guard_is_dropped() {
        let (_fs, bridge) = setup("A");
        let (session, mut rx) = bridge.open_view(PATH).await.unwrap();
        drain(&mut rx);

        let initial = session.last_known_mtime();
        assert!(!session.on_external_file_changed(initial + 100));
        assert!(session.on_external_file_changed(initial + 101));
    }

    #[tokio::test]
    async fn test_deleted_file_event_is_ignored() {
        let (fs, bridge) = setup("A");
        let (session, mut rx) = bridge.open_view(PATH).await.unwrap();
        drain(&mut rx);

        fs.remove(PATH);
        assert!(!session.on_watcher_event(FileEvent {
            kind: crate::watcher::FileEventKind::Deleted
        })
        .await);
        assert!(drain(&mut rx).is_empty());
    }

    #[tokio::test]
    async fn test_failed_save_reports_and_clears_flag() {
        let (fs, bridge) = setup("A");
        fs.set_read_only(PATH, true);
        let (session, mut rx) = bridge.open_view(PATH).await.unwrap();
        drain(&mut rx);

        let result = session.handle_save("A and more").await;
        match result {
            SaveResult::Error { message } => assert!(message.contains("Permission denied")),
            other => panic!("expected error, got {:?}", other),
        }

        match drain(&mut rx).as_slice() {
            [HostMessage::SaveError { message }] => {
                assert!(message.starts_with("Failed to save file: Permission denied"))
            }
            other => panic!("expected saveError, got {:?}", other),
        }
        assert_eq!(fs.contents(PATH).as_deref(), Some("A"));

        assert!(session.is_saving());
        tokio::time::sleep(Duration::from_millis(120)).await;
        assert!(!session.is_saving());
    }

    #[tokio::test]
    async fn test_refresh_error_is_reported() {
        let (fs, bridge) = setup("A");
        let (session, mut rx) = bridge.open_view(PATH).await.unwrap();
        drain(&mut rx);

        fs.remove(PATH);
        assert!(matches!(
            session.handle_refresh().await,
            Err(BridgeError::Read(_))
        ));
        assert!(session.handle_refresh_with_draft("B".into()).await.is_err());

        match drain(&mut rx).as_slice() {
            [
                HostMessage::RefreshError { message: refresh },
                HostMessage::RefreshError { message: compare },
            ] => {
                assert!(refresh.starts_with("Failed to refresh file: "));
                assert!(compare.starts_with("Failed to compare file versions: "));
            }
            other => panic!("expected two refresh errors, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_refresh_with_draft_mutates_nothing() {
        let (fs, bridge) = setup("A");
        let (session, mut rx) = bridge.open_view(PATH).await.unwrap();
        drain(&mut rx);
        fs.put(PATH, "C");

        let comparison = session.handle_refresh_with_draft("B".into()).await.unwrap();
        assert_eq!(comparison.disk_content, "C");
        assert_eq!(comparison.draft_content, "B");
        assert_eq!(session.document().text(), "A");
        assert_eq!(fs.contents(PATH).as_deref(), Some("C"));

        assert_eq!(
            drain(&mut rx),
            vec![HostMessage::merge_dialog("C".into(), "B".into())]
        );
    }

    #[tokio::test]
    async fn test_sibling_view_receives_update() {
        let (fs, bridge) = setup("A");
        let (saver, mut saver_rx) = bridge.open_view(PATH).await.unwrap();
        let (sibling, mut sibling_rx) = bridge.open_view(PATH).await.unwrap();
        drain(&mut saver_rx);
        drain(&mut sibling_rx);

        saver.handle_save("from saver").await;

        assert_eq!(
            drain(&mut sibling_rx),
            vec![HostMessage::Update {
                content: "from saver".into()
            }]
        );

        // The sibling's watch moved past our write too
        let mtime = fs.stat(PATH).await.unwrap().mtime_millis;
        assert_eq!(sibling.last_known_mtime(), mtime);
        tokio::time::sleep(Duration::from_millis(120)).await;
        assert!(!sibling.on_external_file_changed(mtime));
    }

    #[tokio::test]
    async fn test_host_edit_reaches_view() {
        let (_fs, bridge) = setup("A");
        let (session, mut rx) = bridge.open_view(PATH).await.unwrap();
        drain(&mut rx);

        assert!(session.document().replace_all("host edit"));
        assert!(session.on_host_document_changed());

        assert_eq!(
            drain(&mut rx),
            vec![
                HostMessage::Update {
                    content: "host edit".into()
                },
                HostMessage::Update {
                    content: "host edit".into()
                },
            ]
        );
    }

    #[tokio::test]
    async fn test_close_cancels_clear_and_drops_messages() {
        let (_fs, bridge) = setup("A");
        let (session, mut rx) = bridge.open_view(PATH).await.unwrap();
        drain(&mut rx);

        session.handle_save("B").await;
        drain(&mut rx);
        session.close();

        // The pending clear was aborted
        tokio::time::sleep(Duration::from_millis(120)).await;
        assert!(session.is_saving());

        assert!(!session.post(HostMessage::save_success()));
        assert!(!session.on_external_file_changed(u64::MAX));
        assert!(matches!(
            session.handle_save("C").await,
            SaveResult::Error { .. }
        ));
        assert!(drain(&mut rx).is_empty());
        assert_eq!(session.document().text(), "B");
    }

    #[tokio::test]
    async fn test_dropping_session_unsubscribes() {
        let (_fs, bridge) = setup("A");
        let (session, _rx) = bridge.open_view(PATH).await.unwrap();
        let document = Arc::clone(session.document());
        assert_eq!(document.events().subscriber_count(), 1);

        drop(session);
        assert_eq!(document.events().subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_raise_cancels_pending_clear() {
        let flag = InternalSaveFlag::new();
        flag.raise();
        flag.schedule_clear(Duration::from_millis(30));
        flag.raise();

        tokio::time::sleep(Duration::from_millis(80)).await;
        assert!(flag.is_raised());

        flag.schedule_clear(Duration::from_millis(10));
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(!flag.is_raised());
    }
}
