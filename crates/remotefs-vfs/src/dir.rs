//! Directory nodes and their listing cache.
//!
//! Each [`Dir`] keeps an immutable snapshot of its children. A snapshot is
//! replaced as a whole, never edited in place, so readers always see a
//! complete listing. A snapshot is fresh while it is younger than
//! `dir_cache_time` and no invalidation happened since its listing started.

use crate::backend::{join_remote, split_remote, DirEntry, EntryKind};
use crate::error::{Result, VfsError};
use crate::file::File;
use crate::fs::FsShared;
use crate::handle::WriteFileHandle;
use crate::inode::{new_inode, InodeId};
use crate::node::{Node, Nodes, S_IFDIR};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Instant, SystemTime};
use tracing::{debug, warn};

type Children = Arc<HashMap<String, Node>>;

struct Listing {
    items: Children,
    read_at: Option<Instant>,
    generation: u64,
}

pub struct Dir {
    fs: Arc<FsShared>,
    inode: InodeId,
    parent: Option<Weak<Dir>>,
    me: Weak<Dir>,
    path: String,
    entry: RwLock<DirEntry>,
    listing: RwLock<Listing>,
    generation: AtomicU64,
    // serialises refreshes and local edits of the listing
    update: Mutex<()>,
}

impl Dir {
    pub(crate) fn new(fs: Arc<FsShared>, parent: Option<Weak<Dir>>, entry: DirEntry) -> Arc<Dir> {
        Arc::new_cyclic(|me| Dir {
            fs,
            inode: new_inode(),
            parent,
            me: me.clone(),
            path: entry.remote.clone(),
            entry: RwLock::new(entry),
            listing: RwLock::new(Listing {
                items: Arc::new(HashMap::new()),
                read_at: None,
                generation: 0,
            }),
            generation: AtomicU64::new(0),
            update: Mutex::new(()),
        })
    }

    pub fn inode(&self) -> InodeId {
        self.inode
    }

    /// Backend path, `""` for the root.
    pub fn path(&self) -> String {
        self.path.clone()
    }

    pub fn name(&self) -> String {
        split_remote(&self.path).1.to_string()
    }

    pub fn size(&self) -> u64 {
        0
    }

    pub fn mode(&self) -> u32 {
        let mut perms = self.fs.opt.dir_perms & 0o7777;
        if self.fs.opt.read_only {
            perms &= !0o222;
        }
        S_IFDIR | perms
    }

    pub fn mod_time(&self) -> SystemTime {
        self.entry.read().mod_time
    }

    pub fn entry(&self) -> DirEntry {
        self.entry.read().clone()
    }

    pub fn is_root(&self) -> bool {
        self.parent.is_none()
    }

    pub fn parent(&self) -> Option<Arc<Dir>> {
        self.parent.as_ref().and_then(Weak::upgrade)
    }

    pub(crate) fn set_entry(&self, entry: DirEntry) {
        *self.entry.write() = entry;
    }

    /// Find a child by name, refreshing the listing first if it is stale.
    pub fn lookup(&self, name: &str) -> Result<Node> {
        let items = self.items()?;
        items.get(name).cloned().ok_or_else(|| {
            debug!("dir: {} not found in {}", name, self);
            VfsError::NotFound {
                path: join_remote(&self.path, name),
            }
        })
    }

    /// All children sorted by backend path.
    pub fn read_dir_all(&self) -> Result<Nodes> {
        let items = self.items()?;
        let mut nodes = Nodes(items.values().cloned().collect());
        nodes.sort();
        Ok(nodes)
    }

    /// Mark the listing stale so the next lookup goes to the backend.
    pub fn forget(&self) {
        self.generation.fetch_add(1, Ordering::AcqRel);
        self.fs.stats.invalidation();
        debug!("dir: forgot listing of {}", self);
    }

    /// Mark this directory and every cached directory below it stale.
    pub fn forget_all(&self) {
        self.forget();
        let items = Arc::clone(&self.listing.read().items);
        for node in items.values() {
            if let Node::Dir(dir) = node {
                dir.forget_all();
            }
        }
    }

    /// Invalidate the cached listing that covers `path`, relative to this
    /// directory.
    ///
    /// A changed directory is forgotten along with its cached subtree. A
    /// changed object invalidates the directory holding it. If the walk leaves
    /// the cached part of the tree, the deepest cached directory is forgotten
    /// so the new entry shows up on the next lookup. Node identities are kept.
    pub fn forget_path(&self, path: &str, kind: EntryKind) {
        let path = path.trim_matches('/');
        let (target, recursive) = match kind {
            EntryKind::Directory => (path, true),
            EntryKind::Object => (split_remote(path).0, false),
        };
        debug!("dir: change notified for {:?} {:?}", path, kind);

        let mut current: Option<Arc<Dir>> = None;
        for name in target.split('/').filter(|s| !s.is_empty()) {
            let next = {
                let here = current.as_deref().unwrap_or(self);
                match here.cached_dir(name) {
                    Some(dir) => dir,
                    None => {
                        here.forget();
                        return;
                    }
                }
            };
            current = Some(next);
        }

        let dir = current.as_deref().unwrap_or(self);
        if recursive {
            dir.forget_all();
        } else {
            dir.forget();
        }
    }

    fn cached_dir(&self, name: &str) -> Option<Arc<Dir>> {
        match self.listing.read().items.get(name) {
            Some(Node::Dir(dir)) => Some(Arc::clone(dir)),
            _ => None,
        }
    }

    fn fresh_items(&self) -> Option<Children> {
        let listing = self.listing.read();
        let read_at = listing.read_at?;
        if listing.generation != self.generation.load(Ordering::Acquire) {
            return None;
        }
        if read_at.elapsed() >= self.fs.opt.dir_cache_time {
            return None;
        }
        Some(Arc::clone(&listing.items))
    }

    fn items(&self) -> Result<Children> {
        if let Some(items) = self.fresh_items() {
            self.fs.stats.hit();
            return Ok(items);
        }
        self.fs.stats.miss();

        let _guard = self.update.lock();
        // another caller may have refreshed while we waited
        if let Some(items) = self.fresh_items() {
            return Ok(items);
        }
        self.refresh()
    }

    // Caller must hold `update`.
    fn refresh(&self) -> Result<Children> {
        let generation = self.generation.load(Ordering::Acquire);
        let started = Instant::now();
        let entries = match self.fs.backend.list(&self.path) {
            Ok(entries) => entries,
            Err(e) => {
                warn!("dir: listing {} failed, keeping previous snapshot: {}", self, e);
                return Err(e.into());
            }
        };

        let old = Arc::clone(&self.listing.read().items);
        let mut items = HashMap::with_capacity(entries.len());
        for entry in entries {
            let name = entry.name().to_string();
            if name.is_empty() {
                continue;
            }
            let node = match (old.get(&name), entry.kind) {
                (Some(Node::Dir(dir)), EntryKind::Directory) => {
                    dir.set_entry(entry);
                    Node::Dir(Arc::clone(dir))
                }
                (Some(Node::File(file)), EntryKind::Object) => {
                    file.refresh_entry(entry, started);
                    Node::File(Arc::clone(file))
                }
                (_, EntryKind::Directory) => Node::Dir(Dir::new(
                    Arc::clone(&self.fs),
                    Some(self.me.clone()),
                    entry,
                )),
                (_, EntryKind::Object) => {
                    Node::File(File::new(Arc::clone(&self.fs), self.me.clone(), entry))
                }
            };
            items.insert(name, node);
        }
        // files created here but not uploaded yet are unknown to the backend
        for (name, node) in old.iter() {
            if let Node::File(file) = node {
                if file.has_writers() && !items.contains_key(name) {
                    items.insert(name.clone(), node.clone());
                }
            }
        }

        let items = Arc::new(items);
        *self.listing.write() = Listing {
            items: Arc::clone(&items),
            read_at: Some(Instant::now()),
            generation,
        };
        self.fs.stats.refresh();
        debug!("dir: refreshed {} with {} entries", self, items.len());
        Ok(items)
    }

    fn edit_listing(&self, edit: impl FnOnce(&mut HashMap<String, Node>)) {
        let _guard = self.update.lock();
        let mut listing = self.listing.write();
        let mut items = (*listing.items).clone();
        edit(&mut items);
        listing.items = Arc::new(items);
    }

    /// Drop `node` from the listing if it is still the entry under `name`.
    pub(crate) fn evict(&self, name: &str, node: &Node) {
        self.edit_listing(|items| {
            if items.get(name).is_some_and(|n| n.ptr_eq(node)) {
                items.remove(name);
            }
        });
        debug!("dir: evicted {} from {}", name, self);
    }

    /// Put `node` back under `name` unless it is already the entry there.
    pub(crate) fn adopt(&self, name: &str, node: &Node) {
        if self
            .listing
            .read()
            .items
            .get(name)
            .is_some_and(|n| n.ptr_eq(node))
        {
            return;
        }
        self.add(name, node.clone());
        debug!("dir: re-added {} to {}", name, self);
    }

    fn add(&self, name: &str, node: Node) {
        self.edit_listing(|items| {
            items.insert(name.to_string(), node);
        });
    }

    /// Directories have no modification time on most backends; the new time
    /// is kept on the node only.
    pub fn set_mod_time(&self, mod_time: SystemTime) -> Result<()> {
        self.fs.check_writable("set_mod_time")?;
        self.entry.write().mod_time = mod_time;
        Ok(())
    }

    pub fn fsync(&self) -> Result<()> {
        Ok(())
    }

    /// Remove this directory, which must be empty on the backend.
    pub fn remove(&self) -> Result<()> {
        self.fs.check_writable("remove")?;
        let parent = self.checked_parent("remove")?;
        self.fs.backend.rmdir(&self.path)?;
        if let Some(parent) = parent {
            if let Some(me) = self.me.upgrade() {
                parent.evict(&self.name(), &Node::Dir(me));
            }
        }
        debug!("dir: removed {}", self);
        Ok(())
    }

    /// Remove everything below this directory, then the directory itself.
    ///
    /// Uses the backend's purge when offered. Otherwise children are removed
    /// one by one; the first failure is returned after all children have been
    /// attempted, and the directory itself is then left in place.
    pub fn remove_all(&self) -> Result<()> {
        self.fs.check_writable("remove_all")?;
        let parent = self.checked_parent("remove_all")?;

        if let Some(purger) = self.fs.backend.purge() {
            purger.purge(&self.path)?;
            // mark cached subdirectories stale while they are still reachable
            self.forget_all();
            self.edit_listing(HashMap::clear);
            if let (Some(parent), Some(me)) = (parent, self.me.upgrade()) {
                parent.evict(&self.name(), &Node::Dir(me));
            }
            debug!("dir: purged {}", self);
            return Ok(());
        }

        let mut first_err = None;
        for child in self.read_dir_all()? {
            if let Err(e) = child.remove_all() {
                warn!("dir: failed to remove {}: {}", child, e);
                first_err.get_or_insert(e);
            }
        }
        match first_err {
            Some(e) => Err(e),
            None => self.remove(),
        }
    }

    fn checked_parent(&self, op: &str) -> Result<Option<Arc<Dir>>> {
        if self.is_root() {
            return Err(VfsError::PermissionDenied {
                path: "/".to_string(),
                op: op.to_string(),
            });
        }
        Ok(self.parent())
    }

    /// Create a subdirectory on the backend and add it to the listing.
    pub fn mkdir(&self, name: &str) -> Result<Arc<Dir>> {
        self.fs.check_writable("mkdir")?;
        let path = join_remote(&self.path, name);
        self.fs.backend.mkdir(&path)?;
        let dir = Dir::new(
            Arc::clone(&self.fs),
            Some(self.me.clone()),
            DirEntry::dir(path, SystemTime::now()),
        );
        self.add(name, Node::Dir(Arc::clone(&dir)));
        debug!("dir: created directory {}", dir);
        Ok(dir)
    }

    /// Create (or truncate) a file and open it for writing. Nothing reaches
    /// the backend until the handle is flushed.
    pub fn create(&self, name: &str) -> Result<(Arc<File>, WriteFileHandle)> {
        self.fs.check_writable("create")?;
        let path = join_remote(&self.path, name);
        if let Some(Node::Dir(_)) = self.items()?.get(name) {
            return Err(VfsError::IsDirectory { path });
        }
        let file = File::new(
            Arc::clone(&self.fs),
            self.me.clone(),
            DirEntry::object(path, 0, SystemTime::now()),
        );
        self.add(name, Node::File(Arc::clone(&file)));
        let handle = file.open_write()?;
        Ok((file, handle))
    }
}

impl fmt::Display for Dir {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.path.is_empty() {
            write!(f, "/")
        } else {
            write!(f, "{}/", self.path)
        }
    }
}
