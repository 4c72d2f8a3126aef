//! The node tree of the memory backend.
//!
//! Nodes are shared between their parent directory's entry map and any open
//! handles; a node stays alive as long as either holds it, so removing an
//! open file only detaches it from the tree. Every node carries its own
//! mutex, taken for the duration of a single operation. Parent locks are
//! acquired before child locks.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::SystemTime;

use crate::error::{ErrorKind, VfsError, VfsResult};
use crate::eval::FileData;
use crate::{FileMode, FileType, Metadata, DIR_SIZE_SENTINEL, MODE_PERM};

#[derive(Debug)]
pub(super) enum Payload {
    File(Vec<u8>),
    Directory(BTreeMap<String, Arc<Node>>),
    Symlink(String),
}

#[derive(Debug)]
struct NodeState {
    mode: FileMode,
    modified: SystemTime,
    payload: Payload,
}

#[derive(Debug)]
pub(super) struct Node {
    state: Mutex<NodeState>,
}

impl Node {
    fn new(mode: FileMode, payload: Payload) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(NodeState {
                mode: mode & MODE_PERM,
                modified: SystemTime::now(),
                payload,
            }),
        })
    }

    pub(super) fn new_file(perm: FileMode) -> Arc<Self> {
        Self::new(perm, Payload::File(Vec::new()))
    }

    pub(super) fn new_dir(perm: FileMode) -> Arc<Self> {
        Self::new(perm, Payload::Directory(BTreeMap::new()))
    }

    pub(super) fn new_symlink(target: &str, perm: FileMode) -> Arc<Self> {
        Self::new(perm, Payload::Symlink(target.to_owned()))
    }

    fn lock(&self) -> MutexGuard<'_, NodeState> {
        self.state.lock().expect("memory node lock")
    }

    pub(super) fn file_type(&self) -> FileType {
        match self.lock().payload {
            Payload::File(_) => FileType::new_file(),
            Payload::Directory(_) => FileType::new_dir(),
            Payload::Symlink(_) => FileType::new_symlink(),
        }
    }

    pub(super) fn is_dir(&self) -> bool {
        matches!(self.lock().payload, Payload::Directory(_))
    }

    pub(super) fn is_symlink(&self) -> bool {
        matches!(self.lock().payload, Payload::Symlink(_))
    }

    pub(super) fn metadata(&self, name: &str) -> Metadata {
        let state = self.lock();
        let (ft, len) = match &state.payload {
            Payload::File(data) => (FileType::new_file(), data.len() as u64),
            Payload::Directory(_) => (FileType::new_dir(), DIR_SIZE_SENTINEL),
            Payload::Symlink(target) => (FileType::new_symlink(), target.len() as u64),
        };
        Metadata {
            name: name.to_owned(),
            ft,
            mode: state.mode,
            len,
            modified: state.modified,
        }
    }

    pub(super) fn chmod(&self, mode: FileMode) {
        let mut state = self.lock();
        state.mode = mode & MODE_PERM;
    }

    pub(super) fn set_modified(&self, mtime: SystemTime) {
        self.lock().modified = mtime;
    }

    pub(super) fn link_target(&self) -> Option<String> {
        match &self.lock().payload {
            Payload::Symlink(target) => Some(target.clone()),
            _ => None,
        }
    }

    /// Child of a directory node, or `NotDir`.
    pub(super) fn child(&self, name: &str) -> Result<Option<Arc<Node>>, ErrorKind> {
        match &self.lock().payload {
            Payload::Directory(entries) => Ok(entries.get(name).cloned()),
            _ => Err(ErrorKind::NotDir),
        }
    }

    /// Adds `child` under `name`, failing on duplicates.
    pub(super) fn add(&self, name: &str, child: Arc<Node>) -> Result<(), ErrorKind> {
        let mut state = self.lock();
        let Payload::Directory(entries) = &mut state.payload else {
            return Err(ErrorKind::NotDir);
        };
        if entries.contains_key(name) {
            return Err(ErrorKind::AlreadyExists);
        }
        entries.insert(name.to_owned(), child);
        state.modified = SystemTime::now();
        Ok(())
    }

    /// Removes the entry `name`. With `must_be_empty`, a non-empty child
    /// directory is refused; the child lock is taken inside the parent lock
    /// to verify emptiness.
    pub(super) fn remove(&self, name: &str, must_be_empty: bool) -> Result<(), ErrorKind> {
        let mut state = self.lock();
        let Payload::Directory(entries) = &mut state.payload else {
            return Err(ErrorKind::NotDir);
        };
        let Some(child) = entries.get(name) else {
            return Err(ErrorKind::NotFound);
        };
        if must_be_empty {
            if let Payload::Directory(grandchildren) = &child.lock().payload {
                if !grandchildren.is_empty() {
                    return Err(ErrorKind::NotEmpty);
                }
            }
        }
        entries.remove(name);
        state.modified = SystemTime::now();
        Ok(())
    }

    /// Sorted metadata of all entries.
    pub(super) fn entries(&self) -> Result<Vec<Metadata>, ErrorKind> {
        let state = self.lock();
        let Payload::Directory(entries) = &state.payload else {
            return Err(ErrorKind::NotDir);
        };
        Ok(entries
            .iter()
            .map(|(name, child)| child.metadata(name))
            .collect())
    }

    pub(super) fn len(&self) -> Result<u64, ErrorKind> {
        match &self.lock().payload {
            Payload::File(data) => Ok(data.len() as u64),
            _ => Err(ErrorKind::InvalidInput),
        }
    }

    pub(super) fn read_at(&self, buf: &mut [u8], offset: u64) -> Result<usize, ErrorKind> {
        let state = self.lock();
        let Payload::File(data) = &state.payload else {
            return Err(ErrorKind::InvalidInput);
        };
        let offset = offset as usize;
        if offset >= data.len() {
            return Ok(0);
        }
        let end = data.len().min(offset + buf.len());
        buf[..end - offset].copy_from_slice(&data[offset..end]);
        Ok(end - offset)
    }

    pub(super) fn write_at(&self, buf: &[u8], offset: u64) -> Result<usize, ErrorKind> {
        let mut state = self.lock();
        let Payload::File(data) = &mut state.payload else {
            return Err(ErrorKind::InvalidInput);
        };
        let offset = offset as usize;
        if offset > data.len() {
            data.resize(offset, 0);
        }
        let end = offset + buf.len();
        if end > data.len() {
            data.resize(end, 0);
        }
        data[offset..end].copy_from_slice(buf);
        state.modified = SystemTime::now();
        Ok(buf.len())
    }

    pub(super) fn truncate(&self, size: u64) -> Result<(), ErrorKind> {
        let mut state = self.lock();
        let Payload::File(data) = &mut state.payload else {
            return Err(ErrorKind::InvalidInput);
        };
        data.resize(size as usize, 0);
        state.modified = SystemTime::now();
        Ok(())
    }
}

impl FileData for Arc<Node> {
    fn is_dir(&self) -> bool {
        Node::is_dir(self)
    }

    fn is_symlink(&self) -> bool {
        Node::is_symlink(self)
    }

    fn link_target(&self) -> String {
        Node::link_target(self).unwrap_or_default()
    }

    fn lookup(&self, name: &str) -> VfsResult<Option<Self>> {
        self.child(name)
            .map_err(|kind| VfsError::new(kind, "lookup", name.to_owned()))
    }
}
