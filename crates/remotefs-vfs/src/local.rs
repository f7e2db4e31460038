//! Backend over a directory of the host filesystem.

use crate::backend::{join_remote, Backend, BackendError, BackendResult, DirEntry, Purge};
use sha2::{Digest, Sha256};
use std::fs;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tracing::debug;

pub struct LocalBackend {
    name: String,
    root: PathBuf,
}

impl LocalBackend {
    pub fn new(root: impl Into<PathBuf>) -> BackendResult<Self> {
        let root = root.into();
        let meta = fs::metadata(&root).map_err(|e| map_io_err("", e))?;
        if !meta.is_dir() {
            return Err(BackendError::DirNotFound {
                remote: root.display().to_string(),
            });
        }
        debug!("local: serving {}", root.display());
        Ok(Self {
            name: format!("local:{}", root.display()),
            root,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn full_path(&self, remote: &str) -> BackendResult<PathBuf> {
        if remote
            .split('/')
            .any(|seg| seg == ".." || seg == "." || seg.contains('\\'))
        {
            return Err(BackendError::PermissionDenied {
                remote: remote.to_string(),
            });
        }
        let mut path = self.root.clone();
        path.extend(remote.split('/').filter(|s| !s.is_empty()));
        Ok(path)
    }
}

fn map_io_err(remote: &str, e: io::Error) -> BackendError {
    let remote = remote.to_string();
    match e.kind() {
        io::ErrorKind::NotFound => BackendError::NotFound { remote },
        io::ErrorKind::PermissionDenied => BackendError::PermissionDenied { remote },
        io::ErrorKind::AlreadyExists => BackendError::AlreadyExists { remote },
        _ if e.raw_os_error() == Some(libc::ENOTEMPTY) => BackendError::DirNotEmpty { remote },
        _ => BackendError::Io(e),
    }
}

fn entry_from_metadata(remote: String, meta: &fs::Metadata) -> DirEntry {
    let mod_time = meta.modified().unwrap_or(SystemTime::UNIX_EPOCH);
    if meta.is_dir() {
        DirEntry::dir(remote, mod_time)
    } else {
        DirEntry::object(remote, meta.len(), mod_time)
    }
}

impl Backend for LocalBackend {
    fn name(&self) -> &str {
        &self.name
    }

    fn list(&self, dir: &str) -> BackendResult<Vec<DirEntry>> {
        let path = self.full_path(dir)?;
        let read_dir = fs::read_dir(&path).map_err(|e| match map_io_err(dir, e) {
            BackendError::NotFound { remote } => BackendError::DirNotFound { remote },
            other => other,
        })?;

        let mut entries = Vec::new();
        for item in read_dir {
            let item = item.map_err(|e| map_io_err(dir, e))?;
            let Ok(name) = item.file_name().into_string() else {
                debug!("local: skipping non UTF-8 name in {}", path.display());
                continue;
            };
            // follows symlinks; dangling ones are skipped
            let Ok(meta) = fs::metadata(item.path()) else {
                continue;
            };
            if !meta.is_dir() && !meta.is_file() {
                continue;
            }
            entries.push(entry_from_metadata(join_remote(dir, &name), &meta));
        }
        entries.sort_by(|a, b| a.remote.cmp(&b.remote));
        Ok(entries)
    }

    fn read(&self, remote: &str, offset: u64, len: usize) -> BackendResult<Vec<u8>> {
        let mut file = fs::File::open(self.full_path(remote)?).map_err(|e| map_io_err(remote, e))?;
        file.seek(SeekFrom::Start(offset))?;
        let mut buf = Vec::with_capacity(len.min(1 << 20));
        file.take(len as u64).read_to_end(&mut buf)?;
        Ok(buf)
    }

    fn put(&self, remote: &str, data: &[u8], mod_time: SystemTime) -> BackendResult<DirEntry> {
        let path = self.full_path(remote)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| map_io_err(remote, e))?;
        }
        fs::write(&path, data).map_err(|e| map_io_err(remote, e))?;
        let file = fs::File::options()
            .write(true)
            .open(&path)
            .map_err(|e| map_io_err(remote, e))?;
        file.set_modified(mod_time)?;
        let meta = file.metadata()?;
        Ok(entry_from_metadata(remote.to_string(), &meta))
    }

    fn remove(&self, remote: &str) -> BackendResult<()> {
        fs::remove_file(self.full_path(remote)?).map_err(|e| map_io_err(remote, e))
    }

    fn mkdir(&self, dir: &str) -> BackendResult<()> {
        fs::create_dir(self.full_path(dir)?).map_err(|e| map_io_err(dir, e))
    }

    fn rmdir(&self, dir: &str) -> BackendResult<()> {
        if dir.is_empty() {
            return Err(BackendError::PermissionDenied {
                remote: dir.to_string(),
            });
        }
        fs::remove_dir(self.full_path(dir)?).map_err(|e| map_io_err(dir, e))
    }

    fn set_mod_time(&self, remote: &str, mod_time: SystemTime) -> BackendResult<()> {
        let file = fs::File::options()
            .write(true)
            .open(self.full_path(remote)?)
            .map_err(|e| map_io_err(remote, e))?;
        file.set_modified(mod_time)?;
        Ok(())
    }

    fn hash(&self, remote: &str) -> BackendResult<Option<String>> {
        let mut file = fs::File::open(self.full_path(remote)?).map_err(|e| map_io_err(remote, e))?;
        let mut hasher = Sha256::new();
        io::copy(&mut file, &mut hasher)?;
        Ok(Some(format!("{:x}", hasher.finalize())))
    }

    fn purge(&self) -> Option<&dyn Purge> {
        Some(self)
    }
}

impl Purge for LocalBackend {
    fn purge(&self, dir: &str) -> BackendResult<()> {
        if dir.is_empty() {
            return Err(BackendError::PermissionDenied {
                remote: dir.to_string(),
            });
        }
        fs::remove_dir_all(self.full_path(dir)?).map_err(|e| map_io_err(dir, e))
    }
}
