//! rtl-core: Shared library for the bidirectional (RTL/LTR) text editor.
//!
//! This crate provides the pieces both sides of the editor agree on:
//! - The JSON message protocol between the host bridge and the view
//! - `DraftController`, the view-side draft/dirty/conflict state machine
//! - `ModificationWatch`, the timestamp guard for external file changes
//! - FileSystem trait abstraction and the document event bus
//! - Text direction detection and font sizing for the view

pub mod display;
pub mod draft;
pub mod events;
pub mod fs;
pub mod protocol;
pub mod watch;

pub use display::{Direction, FontSize, detect_direction};
pub use draft::{
    ConflictChoice, ConflictPrompt, DraftController, Effect, ExternalChangeChoice, NoticeLevel,
    SyncState,
};
pub use events::{DocumentEvent, EventBus, Subscription};
pub use fs::{FileStat, FileSystem, FsError, InMemoryFs};
pub use protocol::{HostMessage, ProtocolError, ViewMessage};
pub use watch::{ModificationWatch, WatchVerdict};
