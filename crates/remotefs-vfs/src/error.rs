use crate::backend::BackendError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum VfsError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("No such file or directory: {path}")]
    NotFound { path: String },

    /// A path continued past a file. Reported to the kernel as ENOENT.
    #[error("Not a directory: {path}")]
    NotDirectory { path: String },

    #[error("Is a directory: {path}")]
    IsDirectory { path: String },

    #[error("Read-only file system, operation: {op}")]
    ReadOnly { op: String },

    #[error("Operation not permitted on {path}: {op}")]
    PermissionDenied { path: String, op: String },

    #[error("Operation not supported: {op}")]
    NotSupported { op: String },

    #[error("Seek not allowed: read at {offset}, handle positioned at {expected}")]
    SeekNotAllowed { offset: u64, expected: u64 },

    #[error("File handle already released")]
    HandleClosed,

    #[error("Checksum mismatch on {path}: expected {expected}, got {actual}")]
    ChecksumMismatch {
        path: String,
        expected: String,
        actual: String,
    },

    #[error("Backend error: {0}")]
    Backend(#[from] BackendError),
}

pub type Result<T> = std::result::Result<T, VfsError>;

impl VfsError {
    pub fn to_errno(&self) -> i32 {
        use libc::*;
        match self {
            VfsError::Io(e) => e.raw_os_error().unwrap_or(EIO),
            VfsError::NotFound { .. } => ENOENT,
            VfsError::NotDirectory { .. } => ENOENT,
            VfsError::IsDirectory { .. } => EISDIR,
            VfsError::ReadOnly { .. } => EROFS,
            VfsError::PermissionDenied { .. } => EPERM,
            VfsError::NotSupported { .. } => ENOSYS,
            VfsError::SeekNotAllowed { .. } => ESPIPE,
            VfsError::HandleClosed => EBADF,
            VfsError::ChecksumMismatch { .. } => EIO,
            VfsError::Backend(e) => e.to_errno(),
        }
    }

    pub(crate) fn read_only(op: &str) -> Self {
        VfsError::ReadOnly { op: op.to_string() }
    }
}
