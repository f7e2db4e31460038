//! In-memory backend.
//!
//! Keeps objects and directories in concurrent maps. Used by the test suite
//! and for trying the filesystem without a remote. Supports every optional
//! capability; each one can be switched off to emulate simpler backends.

use crate::backend::{
    join_remote, split_remote, Backend, BackendError, BackendResult, ChangeCallback, ChangeNotify,
    DirEntry, EntryKind, Purge,
};
use dashmap::DashMap;
use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, SystemTime};
use tracing::debug;

#[derive(Debug, Clone)]
struct MemObject {
    data: Vec<u8>,
    mod_time: SystemTime,
    generation: u64,
}

#[derive(Default)]
struct ChangeQueue {
    pending: Mutex<Vec<(String, EntryKind)>>,
    subscribers: Mutex<Vec<ChangeCallback>>,
    poller_started: AtomicBool,
}

impl ChangeQueue {
    fn push(&self, remote: &str, kind: EntryKind) {
        if self.subscribers.lock().is_empty() {
            return;
        }
        self.pending.lock().push((remote.to_string(), kind));
    }

    fn deliver(&self) -> usize {
        let events: Vec<_> = std::mem::take(&mut *self.pending.lock());
        if events.is_empty() {
            return 0;
        }
        let subscribers = self.subscribers.lock().clone();
        for (remote, kind) in &events {
            for callback in &subscribers {
                callback(remote, *kind);
            }
        }
        debug!(
            "memory: delivered {} changes to {} subscribers",
            events.len(),
            subscribers.len()
        );
        events.len()
    }
}

pub struct MemoryBackend {
    name: String,
    objects: DashMap<String, MemObject>,
    dirs: DashMap<String, SystemTime>,
    changes: Arc<ChangeQueue>,
    hash_overrides: DashMap<String, String>,
    next_generation: AtomicU64,
    list_calls: AtomicU64,
    remove_calls: AtomicU64,
    fail_next_list: AtomicBool,
    fail_next_remove: AtomicBool,
    can_notify: bool,
    can_purge: bool,
    can_set_mod_time: bool,
}

impl MemoryBackend {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            objects: DashMap::new(),
            dirs: DashMap::new(),
            changes: Arc::new(ChangeQueue::default()),
            hash_overrides: DashMap::new(),
            next_generation: AtomicU64::new(1),
            list_calls: AtomicU64::new(0),
            remove_calls: AtomicU64::new(0),
            fail_next_list: AtomicBool::new(false),
            fail_next_remove: AtomicBool::new(false),
            can_notify: true,
            can_purge: true,
            can_set_mod_time: true,
        }
    }

    pub fn without_change_notify(mut self) -> Self {
        self.can_notify = false;
        self
    }

    pub fn without_purge(mut self) -> Self {
        self.can_purge = false;
        self
    }

    pub fn without_set_mod_time(mut self) -> Self {
        self.can_set_mod_time = false;
        self
    }

    /// Number of `list` calls served (including injected failures).
    pub fn list_calls(&self) -> u64 {
        self.list_calls.load(Ordering::SeqCst)
    }

    /// Number of successful object removals.
    pub fn remove_calls(&self) -> u64 {
        self.remove_calls.load(Ordering::SeqCst)
    }

    /// Make the next `list` call fail with a transient error.
    pub fn fail_next_list(&self) {
        self.fail_next_list.store(true, Ordering::SeqCst);
    }

    /// Make the next object `remove` fail with a transient error.
    pub fn fail_next_remove(&self) {
        self.fail_next_remove.store(true, Ordering::SeqCst);
    }

    /// Report `hash` for `remote` instead of the real digest.
    pub fn corrupt_hash(&self, remote: &str, hash: &str) {
        self.hash_overrides
            .insert(remote.to_string(), hash.to_string());
    }

    pub fn object_data(&self, remote: &str) -> Option<Vec<u8>> {
        self.objects.get(remote).map(|o| o.data.clone())
    }

    pub fn object_mod_time(&self, remote: &str) -> Option<SystemTime> {
        self.objects.get(remote).map(|o| o.mod_time)
    }

    pub fn dir_exists(&self, dir: &str) -> bool {
        dir.is_empty() || self.dirs.contains_key(dir)
    }

    pub fn subscriber_count(&self) -> usize {
        self.changes.subscribers.lock().len()
    }

    /// Deliver queued change events now instead of waiting for the poller.
    pub fn deliver_changes(&self) -> usize {
        self.changes.deliver()
    }

    fn ensure_parents(&self, remote: &str, mod_time: SystemTime) {
        let mut dir = split_remote(remote).0;
        while !dir.is_empty() {
            if self.dirs.contains_key(dir) {
                break;
            }
            self.dirs.insert(dir.to_string(), mod_time);
            dir = split_remote(dir).0;
        }
    }

    fn has_children(&self, dir: &str) -> bool {
        let is_child = |key: &str| split_remote(key).0 == dir && key != dir;
        self.objects.iter().any(|e| is_child(e.key().as_str()))
            || self.dirs.iter().any(|e| is_child(e.key().as_str()))
    }
}

impl Backend for MemoryBackend {
    fn name(&self) -> &str {
        &self.name
    }

    fn list(&self, dir: &str) -> BackendResult<Vec<DirEntry>> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_next_list.swap(false, Ordering::SeqCst) {
            return Err(BackendError::Transient {
                msg: format!("injected listing failure for {:?}", dir),
            });
        }
        if !self.dir_exists(dir) {
            return Err(BackendError::DirNotFound {
                remote: dir.to_string(),
            });
        }

        let mut entries: Vec<DirEntry> = self
            .objects
            .iter()
            .filter(|e| split_remote(e.key()).0 == dir)
            .map(|e| {
                DirEntry::object(e.key().clone(), e.data.len() as u64, e.mod_time)
                    .with_id(format!("obj-{}", e.generation))
            })
            .collect();
        entries.extend(
            self.dirs
                .iter()
                .filter(|e| !e.key().is_empty() && split_remote(e.key()).0 == dir)
                .map(|e| DirEntry::dir(e.key().clone(), *e.value())),
        );
        entries.sort_by(|a, b| a.remote.cmp(&b.remote));
        Ok(entries)
    }

    fn read(&self, remote: &str, offset: u64, len: usize) -> BackendResult<Vec<u8>> {
        let obj = self.objects.get(remote).ok_or_else(|| BackendError::NotFound {
            remote: remote.to_string(),
        })?;
        let start = (offset as usize).min(obj.data.len());
        let end = start.saturating_add(len).min(obj.data.len());
        Ok(obj.data[start..end].to_vec())
    }

    fn put(&self, remote: &str, data: &[u8], mod_time: SystemTime) -> BackendResult<DirEntry> {
        if self.dirs.contains_key(remote) {
            return Err(BackendError::AlreadyExists {
                remote: remote.to_string(),
            });
        }
        self.ensure_parents(remote, mod_time);
        let generation = self.next_generation.fetch_add(1, Ordering::SeqCst);
        self.objects.insert(
            remote.to_string(),
            MemObject {
                data: data.to_vec(),
                mod_time,
                generation,
            },
        );
        self.hash_overrides.remove(remote);
        self.changes.push(remote, EntryKind::Object);
        Ok(DirEntry::object(remote, data.len() as u64, mod_time)
            .with_id(format!("obj-{}", generation)))
    }

    fn remove(&self, remote: &str) -> BackendResult<()> {
        if self.fail_next_remove.swap(false, Ordering::SeqCst) {
            return Err(BackendError::Transient {
                msg: format!("injected remove failure for {:?}", remote),
            });
        }
        if self.objects.remove(remote).is_none() {
            return Err(BackendError::NotFound {
                remote: remote.to_string(),
            });
        }
        self.remove_calls.fetch_add(1, Ordering::SeqCst);
        self.changes.push(remote, EntryKind::Object);
        Ok(())
    }

    fn mkdir(&self, dir: &str) -> BackendResult<()> {
        if self.objects.contains_key(dir) || self.dir_exists(dir) {
            return Err(BackendError::AlreadyExists {
                remote: dir.to_string(),
            });
        }
        let now = SystemTime::now();
        self.ensure_parents(dir, now);
        self.dirs.insert(dir.to_string(), now);
        self.changes.push(dir, EntryKind::Directory);
        Ok(())
    }

    fn rmdir(&self, dir: &str) -> BackendResult<()> {
        if dir.is_empty() || !self.dirs.contains_key(dir) {
            return Err(BackendError::DirNotFound {
                remote: dir.to_string(),
            });
        }
        if self.has_children(dir) {
            return Err(BackendError::DirNotEmpty {
                remote: dir.to_string(),
            });
        }
        self.dirs.remove(dir);
        self.changes.push(dir, EntryKind::Directory);
        Ok(())
    }

    fn set_mod_time(&self, remote: &str, mod_time: SystemTime) -> BackendResult<()> {
        if !self.can_set_mod_time {
            return Err(BackendError::Unsupported {
                op: "set_mod_time".into(),
            });
        }
        let mut obj = self.objects.get_mut(remote).ok_or_else(|| BackendError::NotFound {
            remote: remote.to_string(),
        })?;
        obj.mod_time = mod_time;
        drop(obj);
        self.changes.push(remote, EntryKind::Object);
        Ok(())
    }

    fn hash(&self, remote: &str) -> BackendResult<Option<String>> {
        if let Some(hash) = self.hash_overrides.get(remote) {
            return Ok(Some(hash.clone()));
        }
        let obj = self.objects.get(remote).ok_or_else(|| BackendError::NotFound {
            remote: remote.to_string(),
        })?;
        Ok(Some(format!("{:x}", Sha256::digest(&obj.data))))
    }

    fn change_notify(&self) -> Option<&dyn ChangeNotify> {
        if self.can_notify {
            Some(self)
        } else {
            None
        }
    }

    fn purge(&self) -> Option<&dyn Purge> {
        if self.can_purge {
            Some(self)
        } else {
            None
        }
    }
}

impl ChangeNotify for MemoryBackend {
    /// Subscribers stack. The first non-zero interval starts a poller thread
    /// that stops once the backend is dropped.
    fn notify(&self, callback: ChangeCallback, interval: Duration) {
        self.changes.subscribers.lock().push(callback);
        if interval.is_zero() || self.changes.poller_started.swap(true, Ordering::SeqCst) {
            return;
        }

        let queue: Weak<ChangeQueue> = Arc::downgrade(&self.changes);
        std::thread::spawn(move || loop {
            std::thread::sleep(interval);
            match queue.upgrade() {
                Some(queue) => {
                    queue.deliver();
                }
                None => break,
            }
        });
        debug!("memory: change poller started, interval {:?}", interval);
    }
}

impl Purge for MemoryBackend {
    fn purge(&self, dir: &str) -> BackendResult<()> {
        if !self.dir_exists(dir) {
            return Err(BackendError::DirNotFound {
                remote: dir.to_string(),
            });
        }
        let prefix = join_remote(dir, "");
        let under = |key: &str| dir.is_empty() || key == dir || key.starts_with(&prefix);
        self.objects.retain(|k, _| !under(k.as_str()));
        self.dirs.retain(|k, _| !under(k.as_str()));
        self.changes.push(dir, EntryKind::Directory);
        Ok(())
    }
}
