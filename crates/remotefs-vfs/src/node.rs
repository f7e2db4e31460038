//! Filesystem nodes.
//!
//! A [`Node`] is either a [`Dir`] or a [`File`]. Both are reference counted so
//! the mount transport, open handles and parent listings can share them.

use crate::backend::DirEntry;
use crate::dir::Dir;
use crate::error::Result;
use crate::file::File;
use crate::inode::InodeId;
use std::fmt;
use std::sync::Arc;
use std::time::SystemTime;

pub const S_IFMT: u32 = 0o170000;
pub const S_IFDIR: u32 = 0o040000;
pub const S_IFREG: u32 = 0o100000;

/// Point-in-time snapshot of a node's metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeMetadata {
    pub inode: InodeId,
    pub name: String,
    pub size: u64,
    pub mode: u32,
    pub mod_time: SystemTime,
    pub is_dir: bool,
}

#[derive(Clone)]
pub enum Node {
    Dir(Arc<Dir>),
    File(Arc<File>),
}

impl Node {
    pub fn is_file(&self) -> bool {
        matches!(self, Node::File(_))
    }

    pub fn is_dir(&self) -> bool {
        matches!(self, Node::Dir(_))
    }

    pub fn inode(&self) -> InodeId {
        match self {
            Node::Dir(d) => d.inode(),
            Node::File(f) => f.inode(),
        }
    }

    pub fn name(&self) -> String {
        match self {
            Node::Dir(d) => d.name(),
            Node::File(f) => f.name(),
        }
    }

    /// Backend path of the node.
    pub fn remote(&self) -> String {
        match self {
            Node::Dir(d) => d.path(),
            Node::File(f) => f.path(),
        }
    }

    pub fn size(&self) -> u64 {
        match self {
            Node::Dir(d) => d.size(),
            Node::File(f) => f.size(),
        }
    }

    pub fn mode(&self) -> u32 {
        match self {
            Node::Dir(d) => d.mode(),
            Node::File(f) => f.mode(),
        }
    }

    pub fn mod_time(&self) -> SystemTime {
        match self {
            Node::Dir(d) => d.mod_time(),
            Node::File(f) => f.mod_time(),
        }
    }

    pub fn metadata(&self) -> NodeMetadata {
        NodeMetadata {
            inode: self.inode(),
            name: self.name(),
            size: self.size(),
            mode: self.mode(),
            mod_time: self.mod_time(),
            is_dir: self.is_dir(),
        }
    }

    pub fn set_mod_time(&self, mod_time: SystemTime) -> Result<()> {
        match self {
            Node::Dir(d) => d.set_mod_time(mod_time),
            Node::File(f) => f.set_mod_time(mod_time),
        }
    }

    pub fn fsync(&self) -> Result<()> {
        match self {
            Node::Dir(d) => d.fsync(),
            Node::File(f) => f.fsync(),
        }
    }

    pub fn remove(&self) -> Result<()> {
        match self {
            Node::Dir(d) => d.remove(),
            Node::File(f) => f.remove(),
        }
    }

    pub fn remove_all(&self) -> Result<()> {
        match self {
            Node::Dir(d) => d.remove_all(),
            Node::File(f) => f.remove_all(),
        }
    }

    pub fn dir_entry(&self) -> DirEntry {
        match self {
            Node::Dir(d) => d.entry(),
            Node::File(f) => f.entry(),
        }
    }

    pub fn as_dir(&self) -> Option<&Arc<Dir>> {
        match self {
            Node::Dir(d) => Some(d),
            Node::File(_) => None,
        }
    }

    pub fn as_file(&self) -> Option<&Arc<File>> {
        match self {
            Node::File(f) => Some(f),
            Node::Dir(_) => None,
        }
    }

    /// True when both values refer to the same node object.
    pub fn ptr_eq(&self, other: &Node) -> bool {
        match (self, other) {
            (Node::Dir(a), Node::Dir(b)) => Arc::ptr_eq(a, b),
            (Node::File(a), Node::File(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Node::Dir(d) => fmt::Display::fmt(d, f),
            Node::File(file) => fmt::Display::fmt(file, f),
        }
    }
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = if self.is_dir() { "Dir" } else { "File" };
        f.debug_struct(kind)
            .field("inode", &self.inode())
            .field("remote", &self.remote())
            .finish()
    }
}

impl From<Arc<Dir>> for Node {
    fn from(d: Arc<Dir>) -> Self {
        Node::Dir(d)
    }
}

impl From<Arc<File>> for Node {
    fn from(f: Arc<File>) -> Self {
        Node::File(f)
    }
}

/// Something that can hand back the node it refers to.
pub trait Noder: fmt::Display {
    fn node(&self) -> Node;
}

impl Noder for Node {
    fn node(&self) -> Node {
        self.clone()
    }
}

impl Noder for Arc<Dir> {
    fn node(&self) -> Node {
        Node::Dir(Arc::clone(self))
    }
}

impl Noder for Arc<File> {
    fn node(&self) -> Node {
        Node::File(Arc::clone(self))
    }
}

/// An ordered collection of nodes.
#[derive(Debug, Clone, Default)]
pub struct Nodes(pub Vec<Node>);

impl Nodes {
    /// Sort ascending by backend path.
    pub fn sort(&mut self) {
        self.0.sort_by_cached_key(Node::remote);
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Node> {
        self.0.iter()
    }

    pub fn names(&self) -> Vec<String> {
        self.0.iter().map(Node::name).collect()
    }
}

impl From<Vec<Node>> for Nodes {
    fn from(nodes: Vec<Node>) -> Self {
        Nodes(nodes)
    }
}

impl IntoIterator for Nodes {
    type Item = Node;
    type IntoIter = std::vec::IntoIter<Node>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::Backend;
    use crate::config::VfsOptions;
    use crate::fs::Fs;
    use crate::memory::MemoryBackend;

    fn fs_with(paths: &[&str]) -> Fs {
        let backend = Arc::new(MemoryBackend::new("mem"));
        for p in paths {
            backend.put(p, b"data", SystemTime::now()).unwrap();
        }
        Fs::new(backend, VfsOptions::default())
    }

    #[test]
    fn test_nodes_sort_by_remote() {
        let fs = fs_with(&["b", "a", "c"]);
        let mut nodes = Nodes(vec![
            fs.lookup("b").unwrap(),
            fs.lookup("a").unwrap(),
            fs.lookup("c").unwrap(),
        ]);
        nodes.sort();
        assert_eq!(nodes.names(), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_sort_uses_full_path() {
        let fs = fs_with(&["z/a", "b/z"]);
        let mut nodes = Nodes(vec![fs.lookup("z/a").unwrap(), fs.lookup("b/z").unwrap()]);
        nodes.sort();
        let remotes: Vec<_> = nodes.iter().map(Node::remote).collect();
        assert_eq!(remotes, vec!["b/z", "z/a"]);
    }

    #[test]
    fn test_variant_predicates() {
        let fs = fs_with(&["dir/file"]);
        let dir = fs.lookup("dir").unwrap();
        let file = fs.lookup("dir/file").unwrap();

        assert!(dir.is_dir());
        assert!(!dir.is_file());
        assert!(file.is_file());
        assert!(file.as_file().is_some());
        assert!(dir.as_dir().is_some());
    }

    #[test]
    fn test_mode_bits() {
        let fs = fs_with(&["dir/file"]);
        let dir = fs.lookup("dir").unwrap();
        let file = fs.lookup("dir/file").unwrap();

        assert_eq!(dir.mode() & S_IFMT, S_IFDIR);
        assert_eq!(dir.mode() & 0o777, 0o777);
        assert_eq!(file.mode() & S_IFMT, S_IFREG);
        assert_eq!(file.mode() & 0o777, 0o666);
    }

    #[test]
    fn test_metadata_snapshot() {
        let fs = fs_with(&["f.txt"]);
        let node = fs.lookup("f.txt").unwrap();
        let meta = node.metadata();
        assert_eq!(meta.inode, node.inode());
        assert_eq!(meta.name, "f.txt");
        assert_eq!(meta.size, 4);
        assert!(!meta.is_dir);
    }

    #[test]
    fn test_noder_returns_same_node() {
        let fs = fs_with(&["f.txt"]);
        let node = fs.lookup("f.txt").unwrap();
        let file = node.as_file().unwrap().clone();
        assert!(file.node().ptr_eq(&node));
        assert_eq!(file.node().to_string(), "f.txt");
    }
}
