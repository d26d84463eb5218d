//! FileSystem trait abstraction for document persistence.
//!
//! Implementations:
//! - `InMemoryFs` - For testing (supports write-failure injection)
//! - `NativeFs` (in rtl-bridge) - Uses tokio::fs

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::RwLock;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FsError {
    #[error("File not found: {0}")]
    NotFound(String),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("IO error: {0}")]
    Io(String),
}

pub type Result<T> = std::result::Result<T, FsError>;

/// File metadata
#[derive(Debug, Clone)]
pub struct FileStat {
    /// Modification time in milliseconds since epoch
    pub mtime_millis: u64,
    /// File size in bytes
    pub size: u64,
}

/// Storage for persisted documents.
///
/// Paths are opaque keys relative to the implementation's root.
#[async_trait]
pub trait FileSystem: Send + Sync {
    /// Read file contents
    async fn read(&self, path: &str) -> Result<Vec<u8>>;

    /// Write file contents (creates parent directories if needed)
    async fn write(&self, path: &str, content: &[u8]) -> Result<()>;

    /// Get file metadata
    async fn stat(&self, path: &str) -> Result<FileStat>;
}

/// Decode stored bytes as text. Invalid UTF-8 sequences are replaced rather
/// than rejected, so a stray byte never makes a file unopenable.
pub fn decode_text(bytes: Vec<u8>) -> String {
    match String::from_utf8(bytes) {
        Ok(text) => text,
        Err(e) => String::from_utf8_lossy(e.as_bytes()).into_owned(),
    }
}

/// In-memory filesystem for testing
pub struct InMemoryFs {
    files: RwLock<HashMap<String, Vec<u8>>>,
    /// Tracks file modification times (path -> mtime in ms)
    mtimes: RwLock<HashMap<String, u64>>,
    /// Paths whose writes fail with `PermissionDenied`
    read_only: RwLock<HashSet<String>>,
}

impl InMemoryFs {
    pub fn new() -> Self {
        Self {
            files: RwLock::new(HashMap::new()),
            mtimes: RwLock::new(HashMap::new()),
            read_only: RwLock::new(HashSet::new()),
        }
    }

    /// Create a filesystem holding a single text file.
    pub fn with_file(path: &str, content: &str) -> Self {
        let fs = Self::new();
        fs.put(path, content);
        fs
    }

    /// Write behind the bridge's back, like another editor would.
    /// Bypasses the read-only flag.
    pub fn put(&self, path: &str, content: &str) {
        let path = Self::normalize_path(path);
        self.files
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(path.clone(), content.as_bytes().to_vec());
        self.touch(&path);
    }

    /// Remove a file, like a concurrent external deletion.
    pub fn remove(&self, path: &str) {
        let path = Self::normalize_path(path);
        self.files
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&path);
        self.mtimes
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&path);
    }

    /// Set a specific mtime for testing timestamp guards
    pub fn set_mtime(&self, path: &str, mtime: u64) {
        let path = Self::normalize_path(path);
        self.mtimes
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(path, mtime);
    }

    /// Make writes to `path` fail with a permission error.
    pub fn set_read_only(&self, path: &str, read_only: bool) {
        let path = Self::normalize_path(path);
        let mut guard = self.read_only.write().unwrap_or_else(|e| e.into_inner());
        if read_only {
            guard.insert(path);
        } else {
            guard.remove(&path);
        }
    }

    /// Read a file as text, for assertions.
    pub fn contents(&self, path: &str) -> Option<String> {
        let path = Self::normalize_path(path);
        self.files
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&path)
            .map(|bytes| String::from_utf8_lossy(bytes).into_owned())
    }

    /// Bump the mtime to now, never going backwards for the same path.
    fn touch(&self, path: &str) {
        let mut mtimes = self.mtimes.write().unwrap_or_else(|e| e.into_inner());
        let previous = mtimes.get(path).copied().unwrap_or(0);
        mtimes.insert(path.to_string(), Self::current_time_ms().max(previous + 1));
    }

    /// Get current time in milliseconds
    fn current_time_ms() -> u64 {
        use web_time::{SystemTime, UNIX_EPOCH};
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
            .unwrap_or(0)
    }

    fn normalize_path(path: &str) -> String {
        path.trim_matches('/').to_string()
    }
}

impl Default for InMemoryFs {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl FileSystem for InMemoryFs {
    async fn read(&self, path: &str) -> Result<Vec<u8>> {
        let path = Self::normalize_path(path);
        let files = self.files.read().unwrap_or_else(|e| e.into_inner());
        files
            .get(&path)
            .cloned()
            .ok_or_else(|| FsError::NotFound(path))
    }

    async fn write(&self, path: &str, content: &[u8]) -> Result<()> {
        let path = Self::normalize_path(path);

        if self
            .read_only
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .contains(&path)
        {
            return Err(FsError::PermissionDenied(path));
        }

        let mut files = self.files.write().unwrap_or_else(|e| e.into_inner());
        files.insert(path.clone(), content.to_vec());
        drop(files);

        self.touch(&path);
        Ok(())
    }

    async fn stat(&self, path: &str) -> Result<FileStat> {
        let path = Self::normalize_path(path);

        let files = self.files.read().unwrap_or_else(|e| e.into_inner());
        let content = files.get(&path).ok_or_else(|| FsError::NotFound(path.clone()))?;
        let mtimes = self.mtimes.read().unwrap_or_else(|e| e.into_inner());
        Ok(FileStat {
            mtime_millis: mtimes.get(&path).copied().unwrap_or(0),
            size: content.len() as u64,
        })
    }
}

// Implement FileSystem for Arc<T> where T: FileSystem
// This allows tests to keep a handle on the store the bridge writes to
#[async_trait]
impl<T: FileSystem + Send + Sync> FileSystem for std::sync::Arc<T> {
    async fn read(&self, path: &str) -> Result<Vec<u8>> {
        (**self).read(path).await
    }

    async fn write(&self, path: &str, content: &[u8]) -> Result<()> {
        (**self).write(path, content).await
    }

    async fn stat(&self, path: &str) -> Result<FileStat> {
        (**self).stat(path).await
    }
}
