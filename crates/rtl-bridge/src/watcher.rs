//! File watcher with debouncing for the edited document.
//!
//! Uses notify-debouncer-mini. The parent directory is watched
//! non-recursively and events are filtered by file name, so editors that save
//! by writing a temp file and renaming it over the original are still seen.

use anyhow::{Context, Result};
use notify::RecursiveMode;
use notify_debouncer_mini::{DebouncedEvent, new_debouncer};
use std::ffi::OsString;
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error};

/// File event from the watcher. Carries no content.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileEvent {
    pub kind: FileEventKind,
}

/// Type of file event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileEventKind {
    /// File was created or modified
    Modified,
    /// File was deleted
    Deleted,
}

/// Watches a single file.
pub struct FileWatcher {
    /// Debouncer handle (must keep alive)
    _debouncer: notify_debouncer_mini::Debouncer<notify::RecommendedWatcher>,
    event_rx: mpsc::UnboundedReceiver<FileEvent>,
}

impl FileWatcher {
    /// Start watching `file_path`. The file itself need not exist yet, but
    /// its parent directory must.
    pub fn new(file_path: PathBuf, debounce: Duration) -> Result<Self> {
        let file_name = file_path
            .file_name()
            .map(|n| n.to_os_string())
            .with_context(|| format!("{} has no file name", file_path.display()))?;
        let parent = match file_path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        // FSEvents on macOS needs the real path (/var -> /private/var)
        let parent = parent.canonicalize().unwrap_or(parent);

        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let target = file_name.clone();

        let mut debouncer = new_debouncer(
            debounce,
            move |result: Result<Vec<DebouncedEvent>, notify::Error>| match result {
                Ok(events) => {
                    // Several raw events for one write collapse into one notice
                    if let Some(file_event) = events
                        .iter()
                        .filter_map(|event| Self::process_event(event, &target))
                        .last()
                    {
                        let _ = event_tx.send(file_event);
                    }
                }
                Err(e) => {
                    error!("File watcher error: {}", e);
                }
            },
        )?;

        debouncer
            .watcher()
            .watch(&parent, RecursiveMode::NonRecursive)
            .with_context(|| format!("Failed to watch {}", parent.display()))?;

        debug!("Watching {}", parent.join(&file_name).display());

        Ok(Self {
            _debouncer: debouncer,
            event_rx,
        })
    }

    fn process_event(event: &DebouncedEvent, target: &OsString) -> Option<FileEvent> {
        if event.path.file_name() != Some(target.as_os_str()) {
            return None;
        }

        let kind = if event.path.exists() {
            FileEventKind::Modified
        } else {
            FileEventKind::Deleted
        };
        debug!("File event: {:?} - {}", kind, event.path.display());

        Some(FileEvent { kind })
    }

    /// Get the receiver for file events.
    pub fn event_rx(&mut self) -> &mut mpsc::UnboundedReceiver<FileEvent> {
        &mut self.event_rx
    }
}
