//! Timestamp guard for external file-change notifications.
//!
//! Watchers fire more than once for a single write, and a save's own write can
//! race the internal-save flag. An event only counts as a new external change
//! when the file's mtime moved past the last known mtime by more than the
//! guard interval.

use std::time::Duration;

/// Default guard interval between distinct external changes.
pub const DEFAULT_GUARD_INTERVAL: Duration = Duration::from_millis(100);

/// Outcome of observing a watcher timestamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchVerdict {
    /// A genuine external write; the view must be told.
    External,
    /// Within the guard interval of the last known write.
    Duplicate,
}

/// Last observed modification time of one file, as seen by one view.
#[derive(Debug, Clone)]
pub struct ModificationWatch {
    last_known_millis: u64,
    guard_interval_millis: u64,
}

impl ModificationWatch {
    /// Start watching from `initial_mtime` (0 when the file does not exist yet).
    pub fn new(initial_mtime: u64, guard_interval: Duration) -> Self {
        Self {
            last_known_millis: initial_mtime,
            guard_interval_millis: u64::try_from(guard_interval.as_millis()).unwrap_or(u64::MAX),
        }
    }

    pub fn last_known_millis(&self) -> u64 {
        self.last_known_millis
    }

    pub fn guard_interval(&self) -> Duration {
        Duration::from_millis(self.guard_interval_millis)
    }

    /// Classify a watcher event carrying `mtime`. Records it when external.
    pub fn observe(&mut self, mtime: u64) -> WatchVerdict {
        let threshold = self
            .last_known_millis
            .saturating_add(self.guard_interval_millis);
        if mtime > threshold {
            self.last_known_millis = mtime;
            WatchVerdict::External
        } else {
            WatchVerdict::Duplicate
        }
    }

    /// Record a write made through the bridge. Never moves backwards.
    pub fn advance_to(&mut self, mtime: u64) {
        self.last_known_millis = self.last_known_millis.max(mtime);
    }

    /// Re-initialize on reopen.
    pub fn reset(&mut self, mtime: u64) {
        self.last_known_millis = mtime;
    }
}
