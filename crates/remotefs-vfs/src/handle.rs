//! Open file handles.
//!
//! Minimal read and write handles that refer back to the [`File`] they were
//! opened against. Reads go straight to the backend; writes are buffered in
//! memory and uploaded as a whole object on flush.

use crate::error::{Result, VfsError};
use crate::file::File;
use crate::node::{Node, Noder};
use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};

struct ReadState {
    offset: u64,
    // None once the read stopped being sequential from offset 0
    hasher: Option<Sha256>,
    closed: bool,
}

pub struct ReadFileHandle {
    file: Arc<File>,
    state: Mutex<ReadState>,
}

impl ReadFileHandle {
    pub(crate) fn new(file: Arc<File>) -> Self {
        let hasher = (!file.opts().no_checksum).then(Sha256::new);
        Self {
            file,
            state: Mutex::new(ReadState {
                offset: 0,
                hasher,
                closed: false,
            }),
        }
    }

    pub fn file(&self) -> &Arc<File> {
        &self.file
    }

    /// Read up to `len` bytes at `offset`.
    pub fn read_at(&self, offset: u64, len: usize) -> Result<Vec<u8>> {
        let mut state = self.state.lock();
        if state.closed {
            return Err(VfsError::HandleClosed);
        }
        if offset != state.offset {
            if self.file.opts().no_seek {
                return Err(VfsError::SeekNotAllowed {
                    offset,
                    expected: state.offset,
                });
            }
            state.hasher = None;
        }

        let data = self.file.backend().read(&self.file.path(), offset, len)?;
        if let Some(hasher) = state.hasher.as_mut() {
            hasher.update(&data);
        }
        state.offset = offset + data.len() as u64;
        Ok(data)
    }

    /// Close the handle. If the whole file was read sequentially, its hash is
    /// checked against the backend's.
    pub fn release(&self) -> Result<()> {
        let mut state = self.state.lock();
        if state.closed {
            return Err(VfsError::HandleClosed);
        }
        state.closed = true;

        let Some(hasher) = state.hasher.take() else {
            return Ok(());
        };
        if state.offset != self.file.size() {
            return Ok(());
        }
        let path = self.file.path();
        let Some(expected) = self.file.backend().hash(&path)? else {
            return Ok(());
        };
        let actual = format!("{:x}", hasher.finalize());
        if actual != expected {
            warn!("handle: checksum mismatch on {}", path);
            return Err(VfsError::ChecksumMismatch {
                path,
                expected,
                actual,
            });
        }
        debug!("handle: verified checksum of {}", path);
        Ok(())
    }
}

impl fmt::Display for ReadFileHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (r)", self.file)
    }
}

impl Noder for ReadFileHandle {
    fn node(&self) -> Node {
        Node::File(Arc::clone(&self.file))
    }
}

pub(crate) struct WriteBuffer {
    pub(crate) data: Vec<u8>,
    pub(crate) dirty: bool,
    closed: bool,
}

pub(crate) type SharedWriteBuffer = Arc<Mutex<WriteBuffer>>;

/// Sequential writer. Data reaches the backend on [`flush`](Self::flush),
/// [`release`](Self::release) or [`File::fsync`].
pub struct WriteFileHandle {
    file: Arc<File>,
    buffer: SharedWriteBuffer,
}

impl WriteFileHandle {
    pub(crate) fn new(file: Arc<File>) -> (Self, SharedWriteBuffer) {
        let buffer = Arc::new(Mutex::new(WriteBuffer {
            data: Vec::new(),
            dirty: true,
            closed: false,
        }));
        let handle = Self {
            file,
            buffer: Arc::clone(&buffer),
        };
        (handle, buffer)
    }

    pub fn file(&self) -> &Arc<File> {
        &self.file
    }

    /// Append `data`; `offset` must equal the number of bytes written so far.
    pub fn write_at(&self, offset: u64, data: &[u8]) -> Result<usize> {
        let mut buffer = self.buffer.lock();
        if buffer.closed {
            return Err(VfsError::HandleClosed);
        }
        let expected = buffer.data.len() as u64;
        if offset != expected {
            return Err(VfsError::SeekNotAllowed { offset, expected });
        }
        buffer.data.extend_from_slice(data);
        buffer.dirty = true;
        Ok(data.len())
    }

    pub fn written(&self) -> u64 {
        self.buffer.lock().data.len() as u64
    }

    pub fn flush(&self) -> Result<()> {
        let mut buffer = self.buffer.lock();
        if buffer.closed {
            return Err(VfsError::HandleClosed);
        }
        self.file.upload(&mut buffer)
    }

    pub fn release(&self) -> Result<()> {
        let mut buffer = self.buffer.lock();
        if buffer.closed {
            return Err(VfsError::HandleClosed);
        }
        self.file.upload(&mut buffer)?;
        buffer.closed = true;
        Ok(())
    }
}

impl fmt::Display for WriteFileHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (w)", self.file)
    }
}

impl Noder for WriteFileHandle {
    fn node(&self) -> Node {
        Node::File(Arc::clone(&self.file))
    }
}
