use std::sync::atomic::{AtomicU64, Ordering};

pub type InodeId = u64;

/// Hands out inode numbers. Zero is never returned.
#[derive(Debug, Default)]
pub struct InodeAllocator {
    count: AtomicU64,
}

impl InodeAllocator {
    pub const fn new() -> Self {
        Self {
            count: AtomicU64::new(0),
        }
    }

    pub fn next(&self) -> InodeId {
        self.count.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Number of inodes handed out so far.
    pub fn allocated(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }
}

static INODES: InodeAllocator = InodeAllocator::new();

/// Allocate a process-wide unique inode number.
pub fn new_inode() -> InodeId {
    INODES.next()
}
