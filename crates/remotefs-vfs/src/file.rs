use crate::backend::{split_remote, Backend, BackendError, DirEntry};
use crate::config::VfsOptions;
use crate::dir::Dir;
use crate::error::{Result, VfsError};
use crate::fs::FsShared;
use crate::handle::{ReadFileHandle, SharedWriteBuffer, WriteBuffer, WriteFileHandle};
use crate::inode::{new_inode, InodeId};
use crate::node::{Node, S_IFREG};
use parking_lot::{Mutex, RwLock};
use std::fmt;
use std::sync::{Arc, Weak};
use std::time::{Instant, SystemTime};
use tracing::debug;

/// A single backend object.
pub struct File {
    fs: Arc<FsShared>,
    inode: InodeId,
    parent: Weak<Dir>,
    me: Weak<File>,
    entry: RwLock<DirEntry>,
    // when the entry was last replaced by a local upload or mod time change
    changed_at: Mutex<Option<Instant>>,
    writers: Mutex<Vec<Weak<Mutex<WriteBuffer>>>>,
}

impl File {
    pub(crate) fn new(fs: Arc<FsShared>, parent: Weak<Dir>, entry: DirEntry) -> Arc<File> {
        Arc::new_cyclic(|me| File {
            fs,
            inode: new_inode(),
            parent,
            me: me.clone(),
            entry: RwLock::new(entry),
            changed_at: Mutex::new(None),
            writers: Mutex::new(Vec::new()),
        })
    }

    pub fn inode(&self) -> InodeId {
        self.inode
    }

    pub fn path(&self) -> String {
        self.entry.read().remote.clone()
    }

    pub fn name(&self) -> String {
        split_remote(&self.entry.read().remote).1.to_string()
    }

    pub fn size(&self) -> u64 {
        self.entry.read().size
    }

    pub fn mode(&self) -> u32 {
        let mut perms = self.fs.opt.file_perms & 0o7777;
        if self.fs.opt.read_only {
            perms &= !0o222;
        }
        S_IFREG | perms
    }

    /// With `no_mod_time` set, the parent directory's time is reported.
    pub fn mod_time(&self) -> SystemTime {
        if self.fs.opt.no_mod_time {
            if let Some(parent) = self.parent() {
                return parent.mod_time();
            }
        }
        self.entry.read().mod_time
    }

    pub fn entry(&self) -> DirEntry {
        self.entry.read().clone()
    }

    pub fn parent(&self) -> Option<Arc<Dir>> {
        self.parent.upgrade()
    }

    fn set_local_entry(&self, entry: DirEntry) {
        let mut current = self.entry.write();
        *current = entry;
        *self.changed_at.lock() = Some(Instant::now());
    }

    /// Install an entry from a listing that started at `listed_at`. A local
    /// change made after that point is newer and is kept.
    pub(crate) fn refresh_entry(&self, entry: DirEntry, listed_at: Instant) {
        let mut current = self.entry.write();
        if self.changed_at.lock().is_some_and(|t| t > listed_at) {
            debug!("file: kept local entry of {} over listing", current.remote);
            return;
        }
        *current = entry;
    }

    /// True while a write handle on this file is alive.
    pub(crate) fn has_writers(&self) -> bool {
        self.writers.lock().iter().any(|w| w.strong_count() > 0)
    }

    pub(crate) fn opts(&self) -> &VfsOptions {
        &self.fs.opt
    }

    pub(crate) fn backend(&self) -> &dyn Backend {
        self.fs.backend.as_ref()
    }

    pub fn set_mod_time(&self, mod_time: SystemTime) -> Result<()> {
        self.fs.check_writable("set_mod_time")?;
        let path = self.path();
        match self.fs.backend.set_mod_time(&path, mod_time) {
            Ok(()) => {}
            Err(BackendError::Unsupported { op }) => return Err(VfsError::NotSupported { op }),
            Err(e) => return Err(e.into()),
        }
        let mut entry = self.entry();
        entry.mod_time = mod_time;
        self.set_local_entry(entry);
        debug!("file: set mod time of {}", path);
        Ok(())
    }

    /// Push buffered writes of every open writer to the backend.
    pub fn fsync(&self) -> Result<()> {
        let writers: Vec<SharedWriteBuffer> = {
            let mut writers = self.writers.lock();
            writers.retain(|w| w.strong_count() > 0);
            writers.iter().filter_map(Weak::upgrade).collect()
        };
        for buffer in writers {
            let mut buffer = buffer.lock();
            self.upload(&mut buffer)?;
        }
        Ok(())
    }

    pub fn remove(&self) -> Result<()> {
        self.fs.check_writable("remove")?;
        let path = self.path();
        self.fs.backend.remove(&path)?;
        if let (Some(parent), Some(me)) = (self.parent(), self.me.upgrade()) {
            parent.evict(&self.name(), &Node::File(me));
        }
        debug!("file: removed {}", path);
        Ok(())
    }

    pub fn remove_all(&self) -> Result<()> {
        self.remove()
    }

    pub fn open_read(self: &Arc<Self>) -> Result<ReadFileHandle> {
        Ok(ReadFileHandle::new(Arc::clone(self)))
    }

    pub fn open_write(self: &Arc<Self>) -> Result<WriteFileHandle> {
        self.fs.check_writable("open_write")?;
        let (handle, buffer) = WriteFileHandle::new(Arc::clone(self));
        self.writers.lock().push(Arc::downgrade(&buffer));
        Ok(handle)
    }

    /// Upload the buffer if it holds unsaved data.
    pub(crate) fn upload(&self, buffer: &mut WriteBuffer) -> Result<()> {
        if !buffer.dirty {
            return Ok(());
        }
        let path = self.path();
        let entry = self
            .fs
            .backend
            .put(&path, &buffer.data, SystemTime::now())?;
        debug!("file: uploaded {} bytes to {}", buffer.data.len(), path);
        self.set_local_entry(entry);
        buffer.dirty = false;
        // a refresh may have dropped the node while it only existed locally
        if let (Some(parent), Some(me)) = (self.parent(), self.me.upgrade()) {
            parent.adopt(&self.name(), &Node::File(me));
        }
        Ok(())
    }
}

impl fmt::Display for File {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.entry.read().remote)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::Fs;
    use crate::memory::MemoryBackend;
    use std::time::Duration;

    fn setup(opt: VfsOptions) -> (Arc<MemoryBackend>, Fs) {
        let backend = Arc::new(MemoryBackend::new("mem"));
        backend
            .put(
                "dir/file.txt",
                b"contents",
                SystemTime::UNIX_EPOCH + Duration::from_secs(100),
            )
            .unwrap();
        let fs = Fs::new(
            backend.clone(),
            VfsOptions {
                poll_interval: Duration::ZERO,
                ..opt
            },
        );
        (backend, fs)
    }

    fn file(fs: &Fs) -> Arc<File> {
        fs.lookup("dir/file.txt").unwrap().as_file().unwrap().clone()
    }

    #[test]
    fn test_metadata_from_entry() {
        let (_backend, fs) = setup(VfsOptions::default());
        let f = file(&fs);
        assert_eq!(f.size(), 8);
        assert_eq!(f.name(), "file.txt");
        assert_eq!(f.path(), "dir/file.txt");
        assert_eq!(
            f.mod_time(),
            SystemTime::UNIX_EPOCH + Duration::from_secs(100)
        );
        assert_eq!(f.entry().remote, "dir/file.txt");
    }

    #[test]
    fn test_no_mod_time_reports_parent_time() {
        let (_backend, fs) = setup(VfsOptions {
            no_mod_time: true,
            ..VfsOptions::default()
        });
        let f = file(&fs);
        let parent = f.parent().unwrap();
        let t = SystemTime::UNIX_EPOCH + Duration::from_secs(42);
        parent.set_mod_time(t).unwrap();
        assert_eq!(f.mod_time(), t);
    }

    #[test]
    fn test_set_mod_time_propagates() {
        let (backend, fs) = setup(VfsOptions::default());
        let f = file(&fs);
        let t = SystemTime::UNIX_EPOCH + Duration::from_secs(5_000);
        f.set_mod_time(t).unwrap();
        assert_eq!(f.mod_time(), t);
        assert_eq!(backend.object_mod_time("dir/file.txt"), Some(t));
    }

    #[test]
    fn test_set_mod_time_read_only() {
        let (_backend, fs) = setup(VfsOptions {
            read_only: true,
            ..VfsOptions::default()
        });
        let f = file(&fs);
        let err = f.set_mod_time(SystemTime::now()).unwrap_err();
        assert!(matches!(err, VfsError::ReadOnly { .. }));
    }

    #[test]
    fn test_set_mod_time_unsupported_backend() {
        let backend = Arc::new(MemoryBackend::new("mem").without_set_mod_time());
        backend.put("f", b"x", SystemTime::now()).unwrap();
        let fs = Fs::new(backend, VfsOptions::default());
        let f = fs.lookup("f").unwrap();
        let err = f.set_mod_time(SystemTime::now()).unwrap_err();
        assert!(matches!(err, VfsError::NotSupported { .. }));
        assert_eq!(err.to_errno(), libc::ENOSYS);
    }

    #[test]
    fn test_remove_evicts_from_parent() {
        let (backend, fs) = setup(VfsOptions::default());
        let f = file(&fs);
        f.remove().unwrap();

        assert_eq!(backend.remove_calls(), 1);
        assert!(matches!(
            fs.lookup("dir/file.txt"),
            Err(VfsError::NotFound { .. })
        ));
    }

    #[test]
    fn test_remove_read_only_never_reaches_backend() {
        let (backend, fs) = setup(VfsOptions {
            read_only: true,
            ..VfsOptions::default()
        });
        let f = file(&fs);
        let err = f.remove().unwrap_err();
        assert_eq!(err.to_errno(), libc::EROFS);
        assert_eq!(backend.remove_calls(), 0);
        assert!(fs.lookup("dir/file.txt").is_ok());
    }

    #[test]
    fn test_remove_missing_object_reports_backend_error() {
        let (backend, fs) = setup(VfsOptions::default());
        let f = file(&fs);
        backend.remove("dir/file.txt").unwrap();
        let err = f.remove().unwrap_err();
        assert!(matches!(err, VfsError::Backend(ref e) if e.is_not_found()));
    }

    #[test]
    fn test_fsync_flushes_open_writer() {
        let (backend, fs) = setup(VfsOptions::default());
        let f = file(&fs);
        let handle = f.open_write().unwrap();
        handle.write_at(0, b"new data!").unwrap();
        assert_eq!(backend.object_data("dir/file.txt").unwrap(), b"contents");

        f.fsync().unwrap();
        assert_eq!(backend.object_data("dir/file.txt").unwrap(), b"new data!");
        assert_eq!(f.size(), 9);
    }

    #[test]
    fn test_stale_listing_does_not_overwrite_upload() {
        let (_backend, fs) = setup(VfsOptions::default());
        let f = file(&fs);
        let listed_at = Instant::now();
        let listed = f.entry();
        std::thread::sleep(Duration::from_millis(1));

        let handle = f.open_write().unwrap();
        handle.write_at(0, b"longer data").unwrap();
        handle.release().unwrap();

        f.refresh_entry(listed.clone(), listed_at);
        assert_eq!(f.size(), 11);

        f.refresh_entry(listed, Instant::now());
        assert_eq!(f.size(), 8);
    }

    #[test]
    fn test_fsync_without_writers() {
        let (_backend, fs) = setup(VfsOptions::default());
        file(&fs).fsync().unwrap();
    }

    #[test]
    fn test_read_only_mode_bits() {
        let (_backend, fs) = setup(VfsOptions {
            read_only: true,
            ..VfsOptions::default()
        });
        assert_eq!(file(&fs).mode() & 0o777, 0o444);
    }
}
