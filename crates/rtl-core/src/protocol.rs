//! Bridge <-> view message protocol.
//!
//! Messages are JSON objects tagged by `type`, sent as WebSocket text frames
//! (binary frames carrying UTF-8 JSON are accepted too). Field names are
//! camelCase to match the view script.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Maximum message size (50MB) to prevent memory exhaustion from a misbehaving view.
pub const MAX_MESSAGE_SIZE: usize = 50 * 1024 * 1024;

pub const FILE_CHANGED_MESSAGE: &str =
    "File has been modified externally. Click Refresh to reload or continue editing.";
pub const MERGE_DIALOG_MESSAGE: &str =
    "File was modified externally. Choose which version to keep:";
pub const SAVE_SUCCESS_MESSAGE: &str = "File saved successfully";

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("Message is not valid UTF-8: {0}")]
    Utf8(#[from] std::str::Utf8Error),

    #[error("Malformed message: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, ProtocolError>;

/// Messages sent by the view to the bridge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ViewMessage {
    /// Persist `content` as the new document body.
    Save { content: String },
    /// Force a reload from storage, discarding the draft.
    Refresh,
    /// Ask for the disk content so it can be compared against the draft.
    RefreshWithDraft {
        #[serde(rename = "draftContent")]
        draft_content: String,
    },
}

/// Messages sent by the bridge to the view.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum HostMessage {
    /// Authoritative content replace (initial load or host-side change).
    Update { content: String },
    /// External change detected. Carries no content; the view decides.
    FileChanged {
        message: String,
        #[serde(
            rename = "hasUnsavedChanges",
            default,
            skip_serializing_if = "Option::is_none"
        )]
        has_unsaved_changes: Option<bool>,
    },
    /// Result of an explicit refresh.
    RefreshComplete { content: String },
    /// Refresh (or compare) failed.
    RefreshError { message: String },
    /// Both versions, for the user to pick one.
    ShowMergeDialog {
        #[serde(rename = "diskContent")]
        disk_content: String,
        #[serde(rename = "draftContent")]
        draft_content: String,
        message: String,
    },
    /// Save confirmed persisted.
    SaveSuccess {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
    /// Save failed; the view keeps its draft.
    SaveError { message: String },
}

impl ViewMessage {
    /// Serialize to a JSON string for a text frame.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    /// Parse a binary frame holding UTF-8 JSON.
    pub fn from_binary(data: &[u8]) -> Result<Self> {
        Self::from_json(std::str::from_utf8(data)?)
    }
}

impl HostMessage {
    /// Serialize to a JSON string for a text frame.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    /// Parse a binary frame holding UTF-8 JSON.
    pub fn from_binary(data: &[u8]) -> Result<Self> {
        Self::from_json(std::str::from_utf8(data)?)
    }

    /// External change notice. The bridge does not know the view's dirty
    /// state, so it always flags unsaved changes as possible.
    pub fn file_changed() -> Self {
        Self::FileChanged {
            message: FILE_CHANGED_MESSAGE.to_string(),
            has_unsaved_changes: Some(true),
        }
    }

    pub fn save_success() -> Self {
        Self::SaveSuccess {
            message: Some(SAVE_SUCCESS_MESSAGE.to_string()),
        }
    }

    pub fn save_error(cause: impl std::fmt::Display) -> Self {
        Self::SaveError {
            message: format!("Failed to save file: {}", cause),
        }
    }

    pub fn refresh_error(cause: impl std::fmt::Display) -> Self {
        Self::RefreshError {
            message: format!("Failed to refresh file: {}", cause),
        }
    }

    pub fn compare_error(cause: impl std::fmt::Display) -> Self {
        Self::RefreshError {
            message: format!("Failed to compare file versions: {}", cause),
        }
    }

    pub fn merge_dialog(disk_content: String, draft_content: String) -> Self {
        Self::ShowMergeDialog {
            disk_content,
            draft_content,
            message: MERGE_DIALOG_MESSAGE.to_string(),
        }
    }

    /// Message type tag, for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Update { .. } => "update",
            Self::FileChanged { .. } => "fileChanged",
            Self::RefreshComplete { .. } => "refreshComplete",
            Self::RefreshError { .. } => "refreshError",
            Self::ShowMergeDialog { .. } => "showMergeDialog",
            Self::SaveSuccess { .. } => "saveSuccess",
            Self::SaveError { .. } => "saveError",
        }
    }
}
