//! Path remapping shared by the projection and composition backends.
//!
//! A mapping backend walks client paths component by component in its own
//! namespace, translating every prefix through [`PathMapping::map`] before
//! touching a delegate. Symlinks found along the way are spliced in client
//! terms: a rooted target restarts at the *client* root, which is what keeps
//! a projection confined and mount dispatch correct.

use std::fmt;
use std::io;
use std::sync::Arc;

use crate::error::{ErrorKind, VfsError, VfsResult};
use crate::{path, File, FileMode, FileSystem, Metadata, MAX_LINK_EXPANSIONS};

/// A delegate filesystem together with the path to use on it.
pub(crate) struct MappedPath {
    pub fs: Arc<dyn FileSystem>,
    pub path: String,
}

/// Translation from a rooted client path to a delegate and its path there.
pub(crate) trait PathMapping: fmt::Debug + Send + Sync {
    fn map(&self, client_path: &str) -> MappedPath;
}

/// Resolves `name` against the client namespace: `..` clamps at the client
/// root, every existing prefix is checked on its delegate, and symlinks are
/// expanded with client-side re-rooting. The returned mapping addresses the
/// final component, which is allowed to not exist.
pub(crate) fn resolve_mapped(
    client: &dyn FileSystem,
    mapping: &dyn PathMapping,
    name: &str,
    follow_terminal: bool,
    op: &'static str,
) -> VfsResult<MappedPath> {
    let normalized = client.normalize(name);
    if !client.volume_name(&normalized).is_empty() {
        return Err(VfsError::new(ErrorKind::VolumeMismatch, op, name.to_owned()));
    }
    let (_, mut elems, _) = path::split_path(client, &normalized);
    let mut resolved = String::from("/");
    let mut links = 0usize;

    let mut i = 0usize;
    while i < elems.len() {
        if elems[i] == ".." {
            resolved = path::split(client, &resolved).0;
            if resolved.is_empty() {
                resolved = String::from("/");
            }
            i += 1;
            continue;
        }

        let next = path::join(client, &[&resolved, &elems[i]]);
        let target = mapping.map(&next);
        let is_last = i + 1 == elems.len();
        match target.fs.lstat(&target.path) {
            Ok(meta) if meta.is_symlink() && (follow_terminal || !is_last) => {
                links += 1;
                if links > MAX_LINK_EXPANSIONS {
                    return Err(VfsError::new(ErrorKind::TooManyLinks, op, next));
                }
                let link = target
                    .fs
                    .readlink(&target.path)
                    .map_err(|err| err.rewrap(op, next.clone()))?;
                let link = target.fs.normalize(&link);
                if !target.fs.volume_name(&link).is_empty() {
                    return Err(VfsError::new(ErrorKind::VolumeMismatch, op, next));
                }
                let (_, nested, rooted) = path::split_path(client, &link);
                if rooted {
                    // Rooted targets restart at the client root, never the
                    // delegate's.
                    resolved = String::from("/");
                }
                elems.splice(i..=i, nested);
            }
            Ok(_) => {
                resolved = next;
                i += 1;
            }
            Err(err) if err.is_not_found() => {
                if !is_last {
                    return Err(err.rewrap(op, next));
                }
                resolved = next;
                i += 1;
            }
            Err(err) => return Err(err.rewrap(op, next)),
        }
    }

    Ok(mapping.map(&resolved))
}

/// `mkdir_all` over a mapping backend. Directories are created prefix by
/// prefix through the client so every mkdir dispatches to the delegate
/// owning that prefix.
pub(crate) fn mkdir_all_mapped(client: &dyn FileSystem, name: &str, perm: FileMode) -> VfsResult<()> {
    let rooted = path::canonical(client, name, false)?;
    let (_, elems, _) = path::split_path(client, &rooted);
    let mut prefix = String::from("/");
    for elem in &elems {
        prefix = path::join(client, &[&prefix, elem]);
        match client.stat(&prefix) {
            Ok(meta) if meta.is_dir() => {}
            Ok(_) => {
                return Err(VfsError::new(ErrorKind::NotDir, "mkdir_all", prefix));
            }
            Err(err) if err.is_not_found() => {
                client.mkdir(&prefix, perm)?;
            }
            Err(err) => return Err(err),
        }
    }
    Ok(())
}

/// Wraps a delegate handle under the client-visible name.
pub(crate) struct RenamedFile {
    name: String,
    inner: Box<dyn File>,
}

impl RenamedFile {
    pub(crate) fn new(name: impl Into<String>, inner: Box<dyn File>) -> Box<dyn File> {
        Box::new(Self {
            name: name.into(),
            inner,
        })
    }
}

impl fmt::Debug for RenamedFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RenamedFile")
            .field("name", &self.name)
            .field("inner", &self.inner)
            .finish()
    }
}

impl io::Read for RenamedFile {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.inner.read(buf)
    }
}

impl io::Write for RenamedFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.inner.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

impl io::Seek for RenamedFile {
    fn seek(&mut self, pos: io::SeekFrom) -> io::Result<u64> {
        self.inner.seek(pos)
    }
}

impl File for RenamedFile {
    fn name(&self) -> &str {
        &self.name
    }

    fn stat(&self) -> VfsResult<Metadata> {
        self.inner.stat()
    }

    fn close(&mut self) -> VfsResult<()> {
        self.inner.close()
    }

    fn sync(&mut self) -> VfsResult<()> {
        self.inner.sync()
    }

    fn read_at(&mut self, buf: &mut [u8], offset: u64) -> VfsResult<usize> {
        self.inner.read_at(buf, offset)
    }

    fn write_at(&mut self, buf: &[u8], offset: u64) -> VfsResult<usize> {
        self.inner.write_at(buf, offset)
    }

    fn truncate(&mut self, size: u64) -> VfsResult<()> {
        self.inner.truncate(size)
    }

    fn read_dir(&mut self, count: Option<usize>) -> VfsResult<Vec<Metadata>> {
        self.inner.read_dir(count)
    }

    fn os_file(&self) -> Option<&std::fs::File> {
        self.inner.os_file()
    }
}
