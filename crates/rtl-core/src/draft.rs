//! View-side draft controller.
//!
//! `DraftController` owns the editable buffer and decides how to react to the
//! bridge's messages. It performs no I/O: every input returns the `Effect`s the
//! view surface must carry out (post a message, re-render, show a prompt).
//!
//! The one rule it never breaks: a dirty draft is only replaced after an
//! explicit user decision, or by an authoritative `update` from the host.

use crate::protocol::{HostMessage, ViewMessage};
use tracing::debug;

pub const DISCARD_PROMPT: &str =
    "You have unsaved changes. Do you want to refresh and lose your changes?";

/// Synchronization state of the draft against the document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    /// Draft matches the last synced content.
    Clean,
    /// Draft has unsaved edits.
    LocalDirty,
    /// The file changed on disk and the change is not resolved yet.
    ExternalPending,
}

/// Answer to an external-change (or discard) prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExternalChangeChoice {
    /// Ignore the disk change and keep editing.
    KeepDraft,
    /// Fetch the disk version and choose between the two.
    CompareAndMerge,
    /// Throw the draft away and reload from disk.
    DiscardAndReload,
}

/// Answer to a draft-versus-disk comparison. Whole-document only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictChoice {
    KeepDraft,
    AcceptDisk,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeLevel {
    Warning,
    Error,
}

/// Both versions of the document, for the user to pick one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConflictPrompt {
    pub message: String,
    pub disk_content: String,
    pub draft_content: String,
    /// Length of each version in characters, shown next to the choice.
    pub disk_chars: usize,
    pub draft_chars: usize,
}

impl ConflictPrompt {
    pub fn new(message: String, disk_content: String, draft_content: String) -> Self {
        Self {
            disk_chars: disk_content.chars().count(),
            draft_chars: draft_content.chars().count(),
            message,
            disk_content,
            draft_content,
        }
    }
}

/// Work for the view surface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    /// Post a message to the bridge.
    Send(ViewMessage),
    /// Replace the editor's text.
    Render(String),
    /// Show the notification bar.
    Notify { level: NoticeLevel, message: String },
    /// The file changed while the draft is dirty; answer with
    /// `resolve_external_change`.
    PromptExternalChange { message: String },
    /// A refresh was requested with unsaved changes; answer with
    /// `resolve_external_change`.
    ConfirmDiscard { message: String },
    /// Show both versions; answer with `resolve_conflict`.
    PromptConflict(ConflictPrompt),
    /// Hide the notification bar.
    Dismiss,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RefreshReason {
    /// Sent on our own because the draft was clean.
    Auto,
    /// The user asked for it (or agreed to discard).
    Explicit,
}

#[derive(Debug, Clone)]
pub struct DraftController {
    draft: String,
    last_synced: String,
    dirty: bool,
    state: SyncState,
    /// Content of the save awaiting confirmation
    save_in_flight: Option<String>,
    save_queued: bool,
    pending_refresh: Option<RefreshReason>,
    /// An external-change or discard prompt is open
    awaiting_decision: bool,
    conflict: Option<ConflictPrompt>,
}

impl Default for DraftController {
    fn default() -> Self {
        Self::new()
    }
}

impl DraftController {
    /// Empty, clean draft. The bridge's first `update` fills it.
    pub fn new() -> Self {
        Self::with_content(String::new())
    }

    pub fn with_content(content: impl Into<String>) -> Self {
        let content = content.into();
        Self {
            draft: content.clone(),
            last_synced: content,
            dirty: false,
            state: SyncState::Clean,
            save_in_flight: None,
            save_queued: false,
            pending_refresh: None,
            awaiting_decision: false,
            conflict: None,
        }
    }

    pub fn text(&self) -> &str {
        &self.draft
    }

    pub fn last_synced(&self) -> &str {
        &self.last_synced
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn state(&self) -> SyncState {
        self.state
    }

    pub fn is_saving(&self) -> bool {
        self.save_in_flight.is_some()
    }

    pub fn conflict(&self) -> Option<&ConflictPrompt> {
        self.conflict.as_ref()
    }

    /// The user changed the text.
    pub fn on_user_edit(&mut self, text: impl Into<String>) {
        self.draft = text.into();
        self.dirty = self.draft != self.last_synced;
        if self.state != SyncState::ExternalPending {
            self.state = self.settled_state();
        }
    }

    /// Ctrl+S or an explicit save. The draft stays dirty until confirmed.
    pub fn request_save(&mut self) -> Vec<Effect> {
        if self.save_in_flight.is_some() {
            debug!("Save already in flight, queueing another");
            self.save_queued = true;
            return Vec::new();
        }

        self.save_in_flight = Some(self.draft.clone());
        vec![Effect::Send(ViewMessage::Save {
            content: self.draft.clone(),
        })]
    }

    /// The editor lost focus: save pending edits.
    pub fn on_blur(&mut self) -> Vec<Effect> {
        if self.dirty {
            self.request_save()
        } else {
            Vec::new()
        }
    }

    /// The user pressed refresh.
    pub fn request_refresh(&mut self) -> Vec<Effect> {
        if self.dirty {
            self.awaiting_decision = true;
            return vec![Effect::ConfirmDiscard {
                message: DISCARD_PROMPT.to_string(),
            }];
        }
        self.start_refresh(RefreshReason::Explicit)
    }

    /// Answer an open external-change or discard prompt.
    pub fn resolve_external_change(&mut self, choice: ExternalChangeChoice) -> Vec<Effect> {
        if !self.awaiting_decision {
            debug!("No external change prompt open, ignoring {:?}", choice);
            return Vec::new();
        }
        self.awaiting_decision = false;

        match choice {
            ExternalChangeChoice::KeepDraft => {
                self.state = self.settled_state();
                vec![Effect::Dismiss]
            }
            ExternalChangeChoice::CompareAndMerge => vec![Effect::Send(ViewMessage::RefreshWithDraft {
                draft_content: self.draft.clone(),
            })],
            ExternalChangeChoice::DiscardAndReload => self.start_refresh(RefreshReason::Explicit),
        }
    }

    /// Answer an open draft-versus-disk comparison.
    pub fn resolve_conflict(&mut self, choice: ConflictChoice) -> Vec<Effect> {
        let Some(prompt) = self.conflict.take() else {
            debug!("No conflict open, ignoring {:?}", choice);
            return Vec::new();
        };

        match choice {
            ConflictChoice::KeepDraft => {
                self.state = self.settled_state();
                vec![Effect::Dismiss]
            }
            ConflictChoice::AcceptDisk => self.accept_content(prompt.disk_content),
        }
    }

    /// React to a message from the bridge.
    pub fn handle_message(&mut self, message: HostMessage) -> Vec<Effect> {
        match message {
            HostMessage::Update { content } => self.on_host_update(content),
            HostMessage::FileChanged { message, .. } => self.on_external_change(message),
            HostMessage::RefreshComplete { content } => self.on_refresh_complete(content),
            HostMessage::RefreshError { message } => {
                // Never blank the editor on a failed refresh
                self.pending_refresh = None;
                if self.state == SyncState::ExternalPending
                    && !self.awaiting_decision
                    && self.conflict.is_none()
                {
                    // Nothing left for the user to answer
                    self.state = self.settled_state();
                }
                vec![Effect::Notify {
                    level: NoticeLevel::Error,
                    message,
                }]
            }
            HostMessage::ShowMergeDialog {
                disk_content,
                message,
                ..
            } => {
                self.state = SyncState::ExternalPending;
                self.open_conflict(message, disk_content)
            }
            HostMessage::SaveSuccess { .. } => self.on_save_success(),
            HostMessage::SaveError { message } => {
                self.save_in_flight = None;
                self.save_queued = false;
                vec![Effect::Notify {
                    level: NoticeLevel::Error,
                    message,
                }]
            }
        }
    }

    /// Authoritative replace from the host. Pre-empts local edits.
    fn on_host_update(&mut self, content: String) -> Vec<Effect> {
        let unchanged = !self.dirty && self.draft == content && self.last_synced == content;
        let had_prompt = self.awaiting_decision || self.conflict.is_some();

        self.draft = content.clone();
        self.last_synced = content;
        self.dirty = false;
        self.state = SyncState::Clean;
        self.awaiting_decision = false;
        self.conflict = None;

        let mut effects = Vec::new();
        if !unchanged {
            effects.push(Effect::Render(self.draft.clone()));
        }
        if had_prompt {
            effects.push(Effect::Dismiss);
        }
        effects
    }

    fn on_external_change(&mut self, message: String) -> Vec<Effect> {
        self.state = SyncState::ExternalPending;

        if self.dirty {
            debug!("External change with unsaved draft, asking the user");
            // Any comparison on screen is stale now
            self.conflict = None;
            self.awaiting_decision = true;
            return vec![Effect::PromptExternalChange { message }];
        }

        self.start_refresh(RefreshReason::Auto)
    }

    fn on_refresh_complete(&mut self, content: String) -> Vec<Effect> {
        let reason = self.pending_refresh.take();

        if self.dirty && reason != Some(RefreshReason::Explicit) {
            // The user typed while an automatic refresh was in flight
            debug!("Draft became dirty during refresh, asking the user");
            self.state = SyncState::ExternalPending;
            return self.open_conflict(
                crate::protocol::MERGE_DIALOG_MESSAGE.to_string(),
                content,
            );
        }

        self.accept_content(content)
    }

    fn on_save_success(&mut self) -> Vec<Effect> {
        let Some(saved) = self.save_in_flight.take() else {
            return vec![Effect::Dismiss];
        };

        self.last_synced = saved;
        self.dirty = self.draft != self.last_synced;
        // Saving the draft settles any open external change in its favor
        self.awaiting_decision = false;
        self.conflict = None;
        self.state = self.settled_state();

        let mut effects = vec![Effect::Dismiss];
        if std::mem::take(&mut self.save_queued) && self.dirty {
            effects.extend(self.request_save());
        }
        effects
    }

    fn start_refresh(&mut self, reason: RefreshReason) -> Vec<Effect> {
        if let Some(pending) = self.pending_refresh {
            if reason == RefreshReason::Explicit && pending == RefreshReason::Auto {
                self.pending_refresh = Some(reason);
            }
            return Vec::new();
        }

        self.pending_refresh = Some(reason);
        vec![Effect::Send(ViewMessage::Refresh)]
    }

    /// The draft shown next to the disk version is the current one, since
    /// that is what keeping the draft keeps.
    fn open_conflict(&mut self, message: String, disk_content: String) -> Vec<Effect> {
        let prompt = ConflictPrompt::new(message, disk_content, self.draft.clone());
        self.conflict = Some(prompt.clone());
        vec![Effect::PromptConflict(prompt)]
    }

    fn accept_content(&mut self, content: String) -> Vec<Effect> {
        self.draft = content.clone();
        self.last_synced = content;
        self.dirty = false;
        self.state = SyncState::Clean;
        self.awaiting_decision = false;
        self.conflict = None;
        vec![Effect::Render(self.draft.clone()), Effect::Dismiss]
    }

    fn settled_state(&self) -> SyncState {
        if self.dirty {
            SyncState::LocalDirty
        } else {
            SyncState::Clean
        }
    }
}
