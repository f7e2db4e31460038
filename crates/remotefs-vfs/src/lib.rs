//! remotefs virtual filesystem layer.
//!
//! Presents the flat object namespace of a remote storage backend as a tree
//! of directories and files with stable inode numbers, a time limited
//! directory cache and change notification driven invalidation.

pub mod backend;
pub mod config;
pub mod dir;
pub mod error;
pub mod file;
pub mod fs;
pub mod handle;
pub mod inode;
pub mod local;
pub mod memory;
pub mod node;

pub use backend::{Backend, BackendError, ChangeNotify, DirEntry, EntryKind, Purge};
pub use config::{MountConfig, VfsOptions};
pub use dir::Dir;
pub use error::{Result, VfsError};
pub use file::File;
pub use fs::{CacheStats, Fs};
pub use handle::{ReadFileHandle, WriteFileHandle};
pub use inode::InodeId;
pub use node::{Node, Noder, Nodes};
