//! rtl-bridge library: the host side of the bidirectional text editor.
//!
//! `DocumentBridge` owns the persisted document and opens a `ViewSession` per
//! view. The binary serves one file to views over WebSocket; integration
//! tests use the same modules directly.

pub mod bridge;
pub mod config;
pub mod connection;
pub mod document;
pub mod native_fs;
pub mod server;
pub mod session;
pub mod watcher;

// Re-export key types for convenience
pub use bridge::{BridgeError, DocumentBridge};
pub use config::{BridgeConfig, ConfigError};
pub use document::{DiskSync, Document};
pub use native_fs::NativeFs;
pub use server::{ServerEvent, ViewServer};
pub use session::{Comparison, InternalSaveFlag, SaveResult, ViewSession};
pub use watcher::{FileEvent, FileEventKind, FileWatcher};
