//! Remote backend interface.
//!
//! Defines the capability set the virtual filesystem tree consumes from a
//! remote storage system. Remote paths are slash separated, relative to the
//! backend root, and never carry a leading slash; the root itself is `""`.

use std::sync::Arc;
use std::time::{Duration, SystemTime};
use thiserror::Error;

/// Type tag the backend attaches to every entry.
///
/// Also used as the event descriptor for change notifications: the changed
/// path refers to an object or to a directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntryKind {
    Object,
    Directory,
}

/// The backend's record for one path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    /// Full remote path
    pub remote: String,
    /// Object or directory
    pub kind: EntryKind,
    /// Size in bytes, zero for directories
    pub size: u64,
    /// Modification time as reported by the backend
    pub mod_time: SystemTime,
    /// Backend-native identity (object id, etag, ...), if the backend has one
    pub id: Option<String>,
}

impl DirEntry {
    pub fn object(remote: impl Into<String>, size: u64, mod_time: SystemTime) -> Self {
        Self {
            remote: remote.into(),
            kind: EntryKind::Object,
            size,
            mod_time,
            id: None,
        }
    }

    pub fn dir(remote: impl Into<String>, mod_time: SystemTime) -> Self {
        Self {
            remote: remote.into(),
            kind: EntryKind::Directory,
            size: 0,
            mod_time,
            id: None,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Leaf name of the entry.
    pub fn name(&self) -> &str {
        split_remote(&self.remote).1
    }

    pub fn is_dir(&self) -> bool {
        self.kind == EntryKind::Directory
    }
}

/// Join a directory remote and a leaf name.
pub fn join_remote(dir: &str, leaf: &str) -> String {
    if dir.is_empty() {
        leaf.to_string()
    } else {
        format!("{}/{}", dir, leaf)
    }
}

/// Split a remote into its parent directory and leaf name.
pub fn split_remote(remote: &str) -> (&str, &str) {
    match remote.rfind('/') {
        Some(i) => (&remote[..i], &remote[i + 1..]),
        None => ("", remote),
    }
}

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("Object not found: {remote}")]
    NotFound { remote: String },

    #[error("Directory not found: {remote}")]
    DirNotFound { remote: String },

    #[error("Directory not empty: {remote}")]
    DirNotEmpty { remote: String },

    #[error("Already exists: {remote}")]
    AlreadyExists { remote: String },

    #[error("Permission denied: {remote}")]
    PermissionDenied { remote: String },

    #[error("Backend does not support {op}")]
    Unsupported { op: String },

    /// Failure the backend considers worth retrying (timeouts, throttling).
    #[error("Transient backend failure: {msg}")]
    Transient { msg: String },

    #[error("Backend I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

impl BackendError {
    pub fn to_errno(&self) -> i32 {
        use libc::*;
        match self {
            BackendError::NotFound { .. } | BackendError::DirNotFound { .. } => ENOENT,
            BackendError::DirNotEmpty { .. } => ENOTEMPTY,
            BackendError::AlreadyExists { .. } => EEXIST,
            BackendError::PermissionDenied { .. } => EACCES,
            BackendError::Unsupported { .. } => ENOSYS,
            BackendError::Transient { .. } => EAGAIN,
            BackendError::Io(e) => e.raw_os_error().unwrap_or(EIO),
            BackendError::Other(_) => EIO,
        }
    }

    pub fn is_retryable(&self) -> bool {
        match self {
            BackendError::Transient { .. } => true,
            BackendError::Io(e) => matches!(
                e.kind(),
                std::io::ErrorKind::TimedOut
                    | std::io::ErrorKind::Interrupted
                    | std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::ConnectionAborted
            ),
            _ => false,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            BackendError::NotFound { .. } | BackendError::DirNotFound { .. }
        )
    }
}

pub type BackendResult<T> = std::result::Result<T, BackendError>;

/// Invoked by a backend with a changed remote path and the kind of entry at it.
pub type ChangeCallback = Arc<dyn Fn(&str, EntryKind) + Send + Sync>;

/// Optional capability: push-style change notification.
pub trait ChangeNotify: Send + Sync {
    /// Start delivering changes to `callback`. `interval` is a hint; the
    /// backend decides actual timing and batching.
    fn notify(&self, callback: ChangeCallback, interval: Duration);
}

/// Optional capability: delete a directory and everything below it in one call.
pub trait Purge: Send + Sync {
    fn purge(&self, dir: &str) -> BackendResult<()>;
}

/// A remote storage system.
pub trait Backend: Send + Sync {
    /// Human readable name used in logs and `Display` impls
    fn name(&self) -> &str;
    /// List the immediate children of a directory
    fn list(&self, dir: &str) -> BackendResult<Vec<DirEntry>>;
    /// Read up to `len` bytes of an object starting at `offset`
    fn read(&self, remote: &str, offset: u64, len: usize) -> BackendResult<Vec<u8>>;
    /// Upload a complete object, replacing any previous content
    fn put(&self, remote: &str, data: &[u8], mod_time: SystemTime) -> BackendResult<DirEntry>;
    /// Delete a single object
    fn remove(&self, remote: &str) -> BackendResult<()>;
    /// Create a directory
    fn mkdir(&self, dir: &str) -> BackendResult<()>;
    /// Remove an empty directory
    fn rmdir(&self, dir: &str) -> BackendResult<()>;

    /// Change the modification time of an object
    fn set_mod_time(&self, _remote: &str, _mod_time: SystemTime) -> BackendResult<()> {
        Err(BackendError::Unsupported {
            op: "set_mod_time".into(),
        })
    }

    /// Hex sha256 of an object, if the backend can compute one
    fn hash(&self, _remote: &str) -> BackendResult<Option<String>> {
        Ok(None)
    }

    fn change_notify(&self) -> Option<&dyn ChangeNotify> {
        None
    }

    fn purge(&self) -> Option<&dyn Purge> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entry_name_is_leaf() {
        let entry = DirEntry::object("a/b/c.txt", 3, SystemTime::UNIX_EPOCH);
        assert_eq!(entry.name(), "c.txt");
        assert!(!entry.is_dir());

        let top = DirEntry::dir("top", SystemTime::UNIX_EPOCH);
        assert_eq!(top.name(), "top");
        assert!(top.is_dir());
    }

    #[test]
    fn test_join_and_split_remote() {
        assert_eq!(join_remote("", "a"), "a");
        assert_eq!(join_remote("a/b", "c"), "a/b/c");
        assert_eq!(split_remote("a/b/c"), ("a/b", "c"));
        assert_eq!(split_remote("a"), ("", "a"));
    }

    #[test]
    fn test_with_id() {
        let entry = DirEntry::object("x", 0, SystemTime::UNIX_EPOCH).with_id("etag-1");
        assert_eq!(entry.id.as_deref(), Some("etag-1"));
    }

    #[test]
    fn test_backend_errno() {
        let err = BackendError::NotFound {
            remote: "x".into(),
        };
        assert_eq!(err.to_errno(), libc::ENOENT);
        assert!(err.is_not_found());

        let err = BackendError::Unsupported { op: "purge".into() };
        assert_eq!(err.to_errno(), libc::ENOSYS);
    }

    #[test]
    fn test_retryable_classification() {
        assert!(BackendError::Transient {
            msg: "503".into()
        }
        .is_retryable());
        assert!(BackendError::Io(std::io::ErrorKind::TimedOut.into()).is_retryable());
        assert!(!BackendError::PermissionDenied {
            remote: "x".into()
        }
        .is_retryable());
    }
}
