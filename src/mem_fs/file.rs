//! Open-handle implementation of the memory backend.

use std::io;
use std::sync::Arc;

use crate::error::{ErrorKind, VfsError, VfsResult};
use crate::{File, Metadata};

use super::node::Node;

/// An open file or directory of the memory backend.
///
/// Owns a reference to the node, a byte position and a directory-read
/// cursor. Several handles may reference the same node; data mutations are
/// visible across handles immediately, positions and cursors are per-handle.
#[derive(Debug)]
pub struct MemFile {
    name: String,
    node: Arc<Node>,
    offset: u64,
    dir_cursor: usize,
    closed: bool,
    read_only: bool,
}

impl MemFile {
    pub(super) fn new(name: String, node: Arc<Node>) -> Self {
        Self {
            name,
            node,
            offset: 0,
            dir_cursor: 0,
            closed: false,
            read_only: false,
        }
    }

    pub(super) fn read_only(mut self) -> Self {
        self.read_only = true;
        self
    }

    /// Positions at end-of-file for `APPEND` opens. Unlike `seek` this may
    /// land *at* the end, so appending to an empty file works.
    pub(super) fn seek_end_for_append(mut self) -> Self {
        self.offset = self.node.len().unwrap_or(0);
        self
    }

    fn check_open(&self) -> Result<(), ErrorKind> {
        if self.closed {
            Err(ErrorKind::Closed)
        } else {
            Ok(())
        }
    }

    fn check_writable(&self) -> Result<(), ErrorKind> {
        self.check_open()?;
        if self.read_only {
            Err(ErrorKind::ReadOnly)
        } else {
            Ok(())
        }
    }

    fn wrap(&self, op: &'static str) -> impl Fn(ErrorKind) -> VfsError + '_ {
        move |kind| VfsError::new(kind, op, self.name.clone())
    }
}

impl io::Read for MemFile {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.check_open().map_err(self.wrap("read"))?;
        let n = self.node.read_at(buf, self.offset).map_err(self.wrap("read"))?;
        self.offset += n as u64;
        Ok(n)
    }
}

impl io::Write for MemFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.check_writable().map_err(self.wrap("write"))?;
        let n = self.node.write_at(buf, self.offset).map_err(self.wrap("write"))?;
        self.offset += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.check_open().map_err(self.wrap("flush"))?;
        Ok(())
    }
}

impl io::Seek for MemFile {
    fn seek(&mut self, pos: io::SeekFrom) -> io::Result<u64> {
        self.check_open().map_err(self.wrap("seek"))?;
        let len = self.node.len().map_err(self.wrap("seek"))? as i64;
        let target = match pos {
            io::SeekFrom::Start(offset) => offset as i64,
            io::SeekFrom::Current(delta) => self.offset as i64 + delta,
            io::SeekFrom::End(delta) => len + delta,
        };
        // Positions are confined to the existing data; there are no sparse
        // files here.
        if target < 0 || target >= len {
            return Err(VfsError::new(ErrorKind::OutOfRange, "seek", self.name.clone()).into());
        }
        self.offset = target as u64;
        Ok(self.offset)
    }
}

impl File for MemFile {
    fn name(&self) -> &str {
        &self.name
    }

    fn stat(&self) -> VfsResult<Metadata> {
        Ok(self.node.metadata(&self.name))
    }

    fn close(&mut self) -> VfsResult<()> {
        self.closed = true;
        Ok(())
    }

    fn sync(&mut self) -> VfsResult<()> {
        self.check_open().map_err(self.wrap("sync"))?;
        Ok(())
    }

    fn read_at(&mut self, buf: &mut [u8], offset: u64) -> VfsResult<usize> {
        self.check_open().map_err(self.wrap("read_at"))?;
        self.node.read_at(buf, offset).map_err(self.wrap("read_at"))
    }

    fn write_at(&mut self, buf: &[u8], offset: u64) -> VfsResult<usize> {
        self.check_writable().map_err(self.wrap("write_at"))?;
        self.node
            .write_at(buf, offset)
            .map_err(self.wrap("write_at"))
    }

    fn truncate(&mut self, size: u64) -> VfsResult<()> {
        self.check_writable().map_err(self.wrap("truncate"))?;
        self.node.truncate(size).map_err(self.wrap("truncate"))
    }

    fn read_dir(&mut self, count: Option<usize>) -> VfsResult<Vec<Metadata>> {
        self.check_open().map_err(self.wrap("readdir"))?;
        let entries = self.node.entries().map_err(self.wrap("readdir"))?;
        if self.dir_cursor >= entries.len() {
            return Ok(Vec::new());
        }
        let remaining = &entries[self.dir_cursor..];
        let take = count.map_or(remaining.len(), |n| n.min(remaining.len()));
        self.dir_cursor += take;
        Ok(remaining[..take].to_vec())
    }
}
