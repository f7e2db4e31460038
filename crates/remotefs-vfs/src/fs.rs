//! Top level filesystem.
//!
//! [`Fs`] owns the backend handle, the root directory and the options for one
//! mount session. The mount transport drives it through [`Fs::lookup`] and
//! the per-node operations.

use crate::backend::{Backend, ChangeCallback, DirEntry, EntryKind};
use crate::config::VfsOptions;
use crate::dir::Dir;
use crate::error::{Result, VfsError};
use crate::node::Node;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tracing::debug;

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CacheStats {
    /// Lookups served from a fresh listing
    pub hits: u64,
    /// Lookups that found the listing missing or stale
    pub misses: u64,
    /// Listings fetched from the backend and installed
    pub refreshes: u64,
    /// Directories marked stale
    pub invalidations: u64,
}

#[derive(Debug, Default)]
pub(crate) struct CacheCounters {
    hits: AtomicU64,
    misses: AtomicU64,
    refreshes: AtomicU64,
    invalidations: AtomicU64,
}

impl CacheCounters {
    pub(crate) fn hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn refresh(&self) {
        self.refreshes.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn invalidation(&self) {
        self.invalidations.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            refreshes: self.refreshes.load(Ordering::Relaxed),
            invalidations: self.invalidations.load(Ordering::Relaxed),
        }
    }
}

/// State shared by every node of one filesystem.
pub(crate) struct FsShared {
    pub(crate) backend: Arc<dyn Backend>,
    pub(crate) opt: VfsOptions,
    pub(crate) stats: CacheCounters,
}

impl FsShared {
    pub(crate) fn check_writable(&self, op: &str) -> Result<()> {
        if self.opt.read_only {
            return Err(VfsError::read_only(op));
        }
        Ok(())
    }
}

pub struct Fs {
    shared: Arc<FsShared>,
    root: Arc<Dir>,
}

impl Fs {
    /// Create the filesystem and its root directory. If a poll interval is
    /// configured, change notification is set up immediately.
    pub fn new(backend: Arc<dyn Backend>, opt: VfsOptions) -> Self {
        let poll_interval = opt.poll_interval;
        let shared = Arc::new(FsShared {
            backend,
            opt,
            stats: CacheCounters::default(),
        });
        let root = Dir::new(
            Arc::clone(&shared),
            None,
            DirEntry::dir("", SystemTime::now()),
        );
        debug!(
            "fs: created root inode {} over backend {}",
            root.inode(),
            shared.backend.name()
        );

        let fsys = Self { shared, root };
        if !poll_interval.is_zero() {
            fsys.poll_changes(poll_interval);
        }
        fsys
    }

    /// Ask the backend to report changes every `interval`, invalidating the
    /// affected directories. Does nothing if the backend cannot notify.
    pub fn poll_changes(&self, interval: Duration) -> &Self {
        match self.shared.backend.change_notify() {
            Some(notifier) => {
                let root = Arc::downgrade(&self.root);
                let callback: ChangeCallback = Arc::new(move |path: &str, kind: EntryKind| {
                    if let Some(root) = root.upgrade() {
                        root.forget_path(path, kind);
                    }
                });
                notifier.notify(callback, interval);
                debug!("fs: polling changes every {:?}", interval);
            }
            None => {
                debug!(
                    "fs: backend {} has no change notification, relying on cache expiry",
                    self.shared.backend.name()
                );
            }
        }
        self
    }

    pub fn root(&self) -> Result<Arc<Dir>> {
        Ok(Arc::clone(&self.root))
    }

    /// Find the node for a slash separated path starting at the root.
    ///
    /// Empty segments are skipped, so leading, trailing and doubled slashes
    /// are accepted. An empty path returns the root.
    pub fn lookup(&self, path: &str) -> Result<Node> {
        let mut node = Node::Dir(Arc::clone(&self.root));
        for name in path.split('/').filter(|s| !s.is_empty()) {
            let dir = match &node {
                Node::Dir(dir) => Arc::clone(dir),
                Node::File(file) => {
                    return Err(VfsError::NotDirectory { path: file.path() });
                }
            };
            node = dir.lookup(name)?;
        }
        Ok(node)
    }

    /// Filesystem statistics.
    ///
    /// Backends have no notion of block or inode counts, so nothing is
    /// computed here; the call always succeeds.
    pub fn statfs(&self) -> Result<()> {
        debug!("fs: statfs");
        Ok(())
    }

    pub fn options(&self) -> &VfsOptions {
        &self.shared.opt
    }

    pub fn backend(&self) -> &Arc<dyn Backend> {
        &self.shared.backend
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.shared.stats.snapshot()
    }
}

impl fmt::Debug for Fs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Fs")
            .field("backend", &self.shared.backend.name())
            .field("root", &self.root.inode())
            .field("options", &self.shared.opt)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryBackend;

    fn options() -> VfsOptions {
        VfsOptions {
            dir_cache_time: Duration::from_secs(60),
            poll_interval: Duration::ZERO,
            ..VfsOptions::default()
        }
    }

    fn populated() -> Arc<MemoryBackend> {
        let backend = Arc::new(MemoryBackend::new("mem"));
        for p in ["a/b/c.txt", "a/d.txt", "top.txt"] {
            backend.put(p, b"hello", SystemTime::now()).unwrap();
        }
        backend
    }

    #[test]
    fn test_empty_path_returns_root() {
        let fs = Fs::new(populated(), options());
        let root = fs.root().unwrap();
        let node = fs.lookup("").unwrap();
        assert!(node.is_dir());
        assert_eq!(node.inode(), root.inode());
        assert!(fs.lookup("/").unwrap().ptr_eq(&node));
    }

    #[test]
    fn test_lookup_nested_file() {
        let fs = Fs::new(populated(), options());
        let node = fs.lookup("a/b/c.txt").unwrap();
        assert!(node.is_file());
        assert_eq!(node.size(), 5);
        assert_eq!(node.remote(), "a/b/c.txt");
    }

    #[test]
    fn test_lookup_tolerates_extra_slashes() {
        let fs = Fs::new(populated(), options());
        let plain = fs.lookup("a/b/c.txt").unwrap();
        for path in ["/a/b/c.txt", "a//b/c.txt", "a/b/c.txt/", "//a/b//c.txt//"] {
            assert!(fs.lookup(path).unwrap().ptr_eq(&plain), "path {}", path);
        }
    }

    #[test]
    fn test_lookup_matches_segment_walk() {
        let fs = Fs::new(populated(), options());
        let root = fs.root().unwrap();
        let a = root.lookup("a").unwrap();
        let b = a.as_dir().unwrap().lookup("b").unwrap();
        let c = b.as_dir().unwrap().lookup("c.txt").unwrap();
        assert!(fs.lookup("a/b/c.txt").unwrap().ptr_eq(&c));
    }

    #[test]
    fn test_lookup_through_file_fails() {
        let fs = Fs::new(populated(), options());
        let err = fs.lookup("a/d.txt/more").unwrap_err();
        assert!(matches!(err, VfsError::NotDirectory { ref path } if path == "a/d.txt"));
        assert_eq!(err.to_errno(), libc::ENOENT);
    }

    #[test]
    fn test_lookup_missing_segment() {
        let fs = Fs::new(populated(), options());
        let err = fs.lookup("a/missing/c.txt").unwrap_err();
        assert!(matches!(err, VfsError::NotFound { ref path } if path == "a/missing"));
    }

    #[test]
    fn test_statfs_is_noop() {
        let fs = Fs::new(populated(), options());
        fs.statfs().unwrap();
        assert_eq!(fs.cache_stats(), CacheStats::default());
    }

    #[test]
    fn test_poll_changes_without_capability() {
        let backend = Arc::new(MemoryBackend::new("mem").without_change_notify());
        backend.put("x/a", b"1", SystemTime::now()).unwrap();
        let fs = Fs::new(backend.clone(), options());

        fs.poll_changes(Duration::from_secs(1))
            .poll_changes(Duration::from_secs(1));

        fs.lookup("x/a").unwrap();
        fs.lookup("x/a").unwrap();
        let stats = fs.cache_stats();
        assert_eq!(stats.invalidations, 0);
        assert_eq!(stats.refreshes, 2);
        assert_eq!(backend.list_calls(), 2);
    }

    #[test]
    fn test_new_registers_poll_when_interval_set() {
        let backend = Arc::new(MemoryBackend::new("mem"));
        let fs = Fs::new(
            backend.clone(),
            VfsOptions {
                poll_interval: Duration::from_secs(3600),
                ..options()
            },
        );
        assert_eq!(backend.subscriber_count(), 1);
        drop(fs);
    }

    #[test]
    fn test_options_are_copied() {
        let fs = Fs::new(
            populated(),
            VfsOptions {
                read_only: true,
                no_seek: true,
                ..options()
            },
        );
        assert!(fs.options().read_only);
        assert!(fs.options().no_seek);
        assert!(!fs.options().no_checksum);
        assert_eq!(fs.backend().name(), "mem");
    }
}
