//! Copy-on-write layering: a writable upper filesystem over a read-only
//! lower one.
//!
//! Reads see the union of both layers with the upper shadowing the lower.
//! All mutations land in the upper layer; deleting something that exists in
//! the lower layer records a whiteout marker (`.wh.<name>`) in the upper
//! parent, and re-creating a directory that shadows a lower one marks it
//! opaque (`.wh..wh..opq`) so the lower contents stay hidden. Marker names
//! are reserved: clients can neither address them nor see them in listings.

use std::collections::{BTreeMap, HashSet};
use std::io;
use std::sync::Arc;
use std::time::SystemTime;

use tracing::trace;

use crate::error::{ErrorKind, VfsError, VfsResult};
use crate::mapped::RenamedFile;
use crate::{ops, path, File, FileMode, FileSystem, Metadata, OpenFlags};

/// Prefix of an upper-layer marker hiding the corresponding lower entry.
pub const WHITEOUT_PREFIX: &str = ".wh.";
/// Upper-layer marker hiding the whole lower content of its directory.
pub const OPAQUE_MARKER: &str = ".wh..wh..opq";

fn whiteout_name(name: &str) -> String {
    format!("{WHITEOUT_PREFIX}{name}")
}

/// Marker names are reserved; the opaque marker is covered by the whiteout
/// prefix as well.
fn is_reserved_name(name: &str) -> bool {
    name.starts_with(WHITEOUT_PREFIX)
}

#[derive(Debug)]
pub struct OverlayFileSystem {
    upper: Arc<dyn FileSystem>,
    lower: Arc<dyn FileSystem>,
}

impl OverlayFileSystem {
    pub fn new(upper: Arc<dyn FileSystem>, lower: Arc<dyn FileSystem>) -> Self {
        Self { upper, lower }
    }

    pub fn upper(&self) -> &Arc<dyn FileSystem> {
        &self.upper
    }

    pub fn lower(&self) -> &Arc<dyn FileSystem> {
        &self.lower
    }

    fn reject_reserved(&self, name: &str, op: &'static str, kind: ErrorKind) -> VfsResult<()> {
        let (_, elems, _) = path::split_path(self, name);
        if elems.iter().any(|elem| is_reserved_name(elem)) {
            return Err(VfsError::new(kind, op, name.to_owned()));
        }
        Ok(())
    }

    fn is_client_root(&self, name: &str) -> bool {
        let (_, elems, _) = path::split_path(self, name);
        elems.iter().all(|elem| elem == "..")
    }

    fn upper_has(&self, name: &str) -> bool {
        self.upper.lstat(name).is_ok()
    }

    fn lower_has(&self, name: &str) -> bool {
        self.lower.lstat(name).is_ok()
    }

    fn has_whiteout(&self, dir: &str, base: &str) -> bool {
        let marker = path::join(self, &[dir, &whiteout_name(base)]);
        self.upper.lstat(&marker).is_ok()
    }

    fn has_opaque(&self, dir: &str) -> bool {
        let marker = path::join(self, &[dir, OPAQUE_MARKER]);
        self.upper.lstat(&marker).is_ok()
    }

    /// Whether the lower layer's node at `name` shows through the upper
    /// layer: no whiteout for any component, no opaque ancestor, no upper
    /// non-directory shadowing an intermediate component.
    fn lower_visible(&self, name: &str) -> bool {
        let (_, elems, _) = path::split_path(self, name);
        let mut prefix = String::from("/");
        for (i, elem) in elems.iter().enumerate() {
            if is_reserved_name(elem) {
                return false;
            }
            if self.has_whiteout(&prefix, elem) {
                return false;
            }
            let next = path::join(self, &[&prefix, elem]);
            match self.upper.lstat(&next) {
                Ok(meta) if meta.is_dir() => {
                    if i + 1 < elems.len() && self.has_opaque(&next) {
                        return false;
                    }
                }
                Ok(_) => {
                    if i + 1 < elems.len() {
                        return false;
                    }
                }
                // The upper chain ends here; no deeper markers can exist.
                Err(_) => return true,
            }
            prefix = next;
        }
        true
    }

    /// Materializes the upper directory chain above `name`, copying modes
    /// from the lower directories (metadata-only copy-up). Fails with
    /// `NotFound` when a prefix exists in neither layer.
    fn ensure_upper_parents(&self, name: &str, op: &'static str) -> VfsResult<()> {
        let (_, elems, _) = path::split_path(self, name);
        let mut prefix = String::from("/");
        for elem in elems.iter().take(elems.len().saturating_sub(1)) {
            let next = path::join(self, &[&prefix, elem]);
            match self.upper.lstat(&next) {
                Ok(meta) if meta.is_dir() => {}
                Ok(_) => return Err(VfsError::new(ErrorKind::NotDir, op, next)),
                Err(err) if err.is_not_found() => {
                    let lower_meta = self
                        .lower
                        .lstat(&next)
                        .map_err(|err| err.rewrap(op, next.clone()))?;
                    if !lower_meta.is_dir() {
                        return Err(VfsError::new(ErrorKind::NotDir, op, next));
                    }
                    trace!(path = %next, "copying up directory metadata");
                    self.upper
                        .mkdir(&next, lower_meta.mode)
                        .map_err(|err| err.rewrap(op, next.clone()))?;
                }
                Err(err) => return Err(err.rewrap(op, next.clone())),
            }
            prefix = next;
        }
        Ok(())
    }

    fn write_whiteout(&self, name: &str, op: &'static str) -> VfsResult<()> {
        self.ensure_upper_parents(name, op)?;
        let (dir, base) = path::split(self, name);
        let marker = path::join(self, &[&dir, &whiteout_name(&base)]);
        self.upper
            .open_file(&marker, OpenFlags::WRITE | OpenFlags::CREATE, 0o600)
            .map_err(|err| err.rewrap(op, name.to_owned()))?;
        Ok(())
    }

    fn remove_whiteout(&self, name: &str) {
        let (dir, base) = path::split(self, name);
        let marker = path::join(self, &[&dir, &whiteout_name(&base)]);
        let _ = self.upper.remove(&marker);
    }

    fn write_opaque(&self, dir: &str, op: &'static str) -> VfsResult<()> {
        let marker = path::join(self, &[dir, OPAQUE_MARKER]);
        self.upper
            .open_file(&marker, OpenFlags::WRITE | OpenFlags::CREATE, 0o600)
            .map_err(|err| err.rewrap(op, dir.to_owned()))?;
        Ok(())
    }

    /// Copies a lower node into the upper layer. Regular files carry their
    /// content unless `skip_content` (a truncating open overwrites it
    /// anyway); directories and symlinks carry metadata only.
    fn copy_up(&self, name: &str, skip_content: bool, op: &'static str) -> VfsResult<()> {
        let meta = self
            .lower
            .lstat(name)
            .map_err(|err| err.rewrap(op, name.to_owned()))?;
        self.ensure_upper_parents(name, op)?;
        trace!(path = %name, skip_content, "copying up lower node");
        if meta.is_dir() {
            self.upper
                .mkdir(name, meta.mode)
                .map_err(|err| err.rewrap(op, name.to_owned()))?;
        } else if meta.is_symlink() {
            let target = self
                .lower
                .readlink(name)
                .map_err(|err| err.rewrap(op, name.to_owned()))?;
            self.upper
                .symlink(&target, name)
                .map_err(|err| err.rewrap(op, name.to_owned()))?;
            // chtimes would chase the link target, so the marker keeps the
            // creation time.
            return Ok(());
        } else {
            let data = if skip_content {
                Vec::new()
            } else {
                ops::read_file(&*self.lower, name).map_err(|err| err.rewrap(op, name.to_owned()))?
            };
            ops::write_file(&*self.upper, name, &data, meta.mode)
                .map_err(|err| err.rewrap(op, name.to_owned()))?;
        }
        self.upper
            .chtimes(name, meta.modified, meta.modified)
            .map_err(|err| err.rewrap(op, name.to_owned()))?;
        Ok(())
    }

    /// Merged, sorted listing of the directory at `name`, markers filtered
    /// out. The caller has already established that the directory is
    /// visible.
    fn merged_entries(&self, name: &str) -> VfsResult<Vec<Metadata>> {
        let mut merged: BTreeMap<String, Metadata> = BTreeMap::new();
        let mut whiteouts: HashSet<String> = HashSet::new();
        let mut opaque = false;
        let mut upper_listed = false;

        match ops::read_dir(&*self.upper, name) {
            Ok(entries) => {
                upper_listed = true;
                for entry in entries {
                    if entry.name == OPAQUE_MARKER {
                        opaque = true;
                        continue;
                    }
                    if let Some(hidden) = entry.name.strip_prefix(WHITEOUT_PREFIX) {
                        whiteouts.insert(hidden.to_owned());
                        continue;
                    }
                    merged.insert(entry.name.clone(), entry);
                }
            }
            Err(err) if err.is_not_found() => {}
            Err(err) => return Err(err.rewrap("readdir", name.to_owned())),
        }

        let lower_applies = !opaque && (!upper_listed || self.lower_visible(name));
        if lower_applies {
            match ops::read_dir(&*self.lower, name) {
                Ok(entries) => {
                    for entry in entries {
                        if is_reserved_name(&entry.name)
                            || whiteouts.contains(&entry.name)
                            || merged.contains_key(&entry.name)
                        {
                            continue;
                        }
                        merged.insert(entry.name.clone(), entry);
                    }
                }
                Err(err) if err.is_not_found() => {}
                Err(err) => return Err(err.rewrap("readdir", name.to_owned())),
            }
        }

        Ok(merged.into_values().collect())
    }
}

/// Directory handle serving a merged listing materialized at open time.
#[derive(Debug)]
struct OverlayDirFile {
    name: String,
    meta: Metadata,
    entries: Vec<Metadata>,
    cursor: usize,
    closed: bool,
}

impl OverlayDirFile {
    fn check_open(&self, op: &'static str) -> VfsResult<()> {
        if self.closed {
            Err(VfsError::new(ErrorKind::Closed, op, self.name.clone()))
        } else {
            Ok(())
        }
    }

    fn not_a_file(&self, op: &'static str) -> VfsError {
        VfsError::new(ErrorKind::InvalidInput, op, self.name.clone())
    }
}

impl io::Read for OverlayDirFile {
    fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
        Err(self.not_a_file("read").into())
    }
}

impl io::Write for OverlayDirFile {
    fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
        Err(self.not_a_file("write").into())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl io::Seek for OverlayDirFile {
    fn seek(&mut self, _pos: io::SeekFrom) -> io::Result<u64> {
        Err(self.not_a_file("seek").into())
    }
}

impl File for OverlayDirFile {
    fn name(&self) -> &str {
        &self.name
    }

    fn stat(&self) -> VfsResult<Metadata> {
        Ok(self.meta.clone())
    }

    fn close(&mut self) -> VfsResult<()> {
        self.closed = true;
        Ok(())
    }

    fn sync(&mut self) -> VfsResult<()> {
        self.check_open("sync")
    }

    fn read_at(&mut self, _buf: &mut [u8], _offset: u64) -> VfsResult<usize> {
        Err(self.not_a_file("read_at"))
    }

    fn write_at(&mut self, _buf: &[u8], _offset: u64) -> VfsResult<usize> {
        Err(self.not_a_file("write_at"))
    }

    fn truncate(&mut self, _size: u64) -> VfsResult<()> {
        Err(self.not_a_file("truncate"))
    }

    fn read_dir(&mut self, count: Option<usize>) -> VfsResult<Vec<Metadata>> {
        self.check_open("readdir")?;
        if self.cursor >= self.entries.len() {
            return Ok(Vec::new());
        }
        let remaining = &self.entries[self.cursor..];
        let take = count.map_or(remaining.len(), |n| n.min(remaining.len()));
        self.cursor += take;
        Ok(remaining[..take].to_vec())
    }
}

impl FileSystem for OverlayFileSystem {
    fn name(&self) -> String {
        format!(
            "OverlayFileSystem [{} | {}]",
            self.upper.name(),
            self.lower.name()
        )
    }

    fn getwd(&self) -> VfsResult<String> {
        Ok("/".to_owned())
    }

    fn create(&self, name: &str) -> VfsResult<Box<dyn File>> {
        self.reject_reserved(name, "create", ErrorKind::InvalidName)?;
        if self.stat(name).is_ok() {
            return Err(VfsError::new(
                ErrorKind::AlreadyExists,
                "create",
                name.to_owned(),
            ));
        }
        self.ensure_upper_parents(name, "create")?;
        let file = self
            .upper
            .create(name)
            .map_err(|err| err.rewrap("create", name.to_owned()))?;
        self.remove_whiteout(name);
        Ok(RenamedFile::new(name, file))
    }

    fn mkdir(&self, name: &str, perm: FileMode) -> VfsResult<()> {
        self.reject_reserved(name, "mkdir", ErrorKind::InvalidName)?;
        if self.stat(name).is_ok() {
            return Err(VfsError::new(
                ErrorKind::AlreadyExists,
                "mkdir",
                name.to_owned(),
            ));
        }
        self.ensure_upper_parents(name, "mkdir")?;
        self.upper
            .mkdir(name, perm)
            .map_err(|err| err.rewrap("mkdir", name.to_owned()))?;
        self.remove_whiteout(name);
        // A shadowed lower directory must not shine through the re-created
        // one; the opaque marker is written as part of the same mkdir.
        if self.lower.stat(name).map(|meta| meta.is_dir()).unwrap_or(false) {
            self.write_opaque(name, "mkdir")?;
        }
        Ok(())
    }

    fn mkdir_all(&self, name: &str, perm: FileMode) -> VfsResult<()> {
        let rooted = path::canonical(self, name, false)?;
        let (_, elems, _) = path::split_path(self, &rooted);
        let mut prefix = String::from("/");
        for elem in &elems {
            prefix = path::join(self, &[&prefix, elem]);
            match self.stat(&prefix) {
                Ok(meta) if meta.is_dir() => {}
                Ok(_) => {
                    return Err(VfsError::new(ErrorKind::NotDir, "mkdir_all", prefix));
                }
                Err(err) if err.is_not_found() => self.mkdir(&prefix, perm)?,
                Err(err) => return Err(err),
            }
        }
        Ok(())
    }

    fn open_file(&self, name: &str, flags: OpenFlags, perm: FileMode) -> VfsResult<Box<dyn File>> {
        let reserved_kind = if flags.would_mutate() {
            ErrorKind::InvalidName
        } else {
            ErrorKind::NotFound
        };
        self.reject_reserved(name, "open", reserved_kind)?;

        if !flags.would_mutate() {
            // Plain read: a visible directory gets a merged handle, files
            // resolve upper-first.
            if let Ok(meta) = self.stat(name) {
                if meta.is_dir() {
                    return Ok(Box::new(OverlayDirFile {
                        name: name.to_owned(),
                        entries: self.merged_entries(name)?,
                        meta,
                        cursor: 0,
                        closed: false,
                    }));
                }
            }
            return match self.upper.open_file(name, flags, perm) {
                Ok(file) => Ok(RenamedFile::new(name, file)),
                Err(err) if err.is_not_found() && self.lower_visible(name) => {
                    let file = self
                        .lower
                        .open_file(name, flags, perm)
                        .map_err(|err| err.rewrap("open", name.to_owned()))?;
                    Ok(RenamedFile::new(name, file))
                }
                Err(err) => Err(err.rewrap("open", name.to_owned())),
            };
        }

        // Mutating open: route to the upper layer, copying a lower file up
        // on first write access.
        if !self.upper_has(name) {
            let lower_meta = if self.lower_visible(name) {
                self.lower.stat(name).ok()
            } else {
                None
            };
            match lower_meta {
                Some(meta) if meta.is_file() => {
                    self.copy_up(name, flags.contains(OpenFlags::TRUNC), "open")?;
                }
                Some(_) => {
                    return Err(VfsError::new(ErrorKind::InvalidInput, "open", name.to_owned()));
                }
                None => {
                    if !flags.contains(OpenFlags::CREATE) {
                        return Err(VfsError::new(ErrorKind::NotFound, "open", name.to_owned()));
                    }
                    self.ensure_upper_parents(name, "open")?;
                }
            }
        }
        let file = self
            .upper
            .open_file(name, flags, perm)
            .map_err(|err| err.rewrap("open", name.to_owned()))?;
        self.remove_whiteout(name);
        Ok(RenamedFile::new(name, file))
    }

    fn remove(&self, name: &str) -> VfsResult<()> {
        self.reject_reserved(name, "remove", ErrorKind::InvalidName)?;
        if self.is_client_root(name) {
            return Err(VfsError::new(
                ErrorKind::Permission,
                "remove",
                name.to_owned(),
            ));
        }
        let meta = self.lstat(name)?;
        if meta.is_dir() && !self.merged_entries(name)?.is_empty() {
            return Err(VfsError::new(
                ErrorKind::NotEmpty,
                "remove",
                name.to_owned(),
            ));
        }
        if self.upper_has(name) {
            if meta.is_dir() {
                // The upper directory may still hold marker files.
                self.upper
                    .remove_all(name)
                    .map_err(|err| err.rewrap("remove", name.to_owned()))?;
            } else {
                self.upper
                    .remove(name)
                    .map_err(|err| err.rewrap("remove", name.to_owned()))?;
            }
        }
        if self.lower_has(name) {
            self.write_whiteout(name, "remove")?;
        }
        Ok(())
    }

    fn remove_all(&self, name: &str) -> VfsResult<()> {
        self.reject_reserved(name, "remove_all", ErrorKind::InvalidName)?;
        if self.is_client_root(name) {
            return Err(VfsError::new(
                ErrorKind::Permission,
                "remove_all",
                name.to_owned(),
            ));
        }
        if self.lstat(name).is_err() {
            return Ok(());
        }
        if self.upper_has(name) {
            self.upper
                .remove_all(name)
                .map_err(|err| err.rewrap("remove_all", name.to_owned()))?;
        }
        if self.lower_has(name) {
            self.write_whiteout(name, "remove_all")?;
        }
        Ok(())
    }

    fn rename(&self, oldname: &str, newname: &str) -> VfsResult<()> {
        self.reject_reserved(oldname, "rename", ErrorKind::InvalidName)?;
        self.reject_reserved(newname, "rename", ErrorKind::InvalidName)?;
        if self.is_client_root(oldname) {
            return Err(VfsError::new(
                ErrorKind::Permission,
                "rename",
                oldname.to_owned(),
            ));
        }
        self.lstat(oldname)
            .map_err(|err| err.rewrap("rename", oldname.to_owned()))?;
        if self.lstat(newname).is_ok() {
            return Err(VfsError::new(
                ErrorKind::AlreadyExists,
                "rename",
                newname.to_owned(),
            ));
        }
        if !self.upper_has(oldname) {
            // Moving a lower-only node would require materialising its
            // whole subtree in the upper layer.
            return Err(VfsError::new(
                ErrorKind::CrossDevice,
                "rename",
                oldname.to_owned(),
            ));
        }
        self.ensure_upper_parents(newname, "rename")?;
        self.upper
            .rename(oldname, newname)
            .map_err(|err| err.rewrap("rename", oldname.to_owned()))?;
        self.remove_whiteout(newname);
        if self.lower_has(oldname) {
            self.write_whiteout(oldname, "rename")?;
        }
        Ok(())
    }

    fn stat(&self, name: &str) -> VfsResult<Metadata> {
        self.reject_reserved(name, "stat", ErrorKind::NotFound)?;
        match self.upper.stat(name) {
            Ok(meta) => Ok(meta),
            Err(err) if err.is_not_found() && self.lower_visible(name) => self
                .lower
                .stat(name)
                .map_err(|err| err.rewrap("stat", name.to_owned())),
            Err(err) => Err(err.rewrap("stat", name.to_owned())),
        }
    }

    fn lstat(&self, name: &str) -> VfsResult<Metadata> {
        self.reject_reserved(name, "lstat", ErrorKind::NotFound)?;
        match self.upper.lstat(name) {
            Ok(meta) => Ok(meta),
            Err(err) if err.is_not_found() && self.lower_visible(name) => self
                .lower
                .lstat(name)
                .map_err(|err| err.rewrap("lstat", name.to_owned())),
            Err(err) => Err(err.rewrap("lstat", name.to_owned())),
        }
    }

    fn chmod(&self, name: &str, mode: FileMode) -> VfsResult<()> {
        self.reject_reserved(name, "chmod", ErrorKind::InvalidName)?;
        if !self.upper_has(name) {
            self.lstat(name)?;
            self.copy_up(name, false, "chmod")?;
        }
        self.upper
            .chmod(name, mode)
            .map_err(|err| err.rewrap("chmod", name.to_owned()))
    }

    fn chtimes(&self, name: &str, atime: SystemTime, mtime: SystemTime) -> VfsResult<()> {
        self.reject_reserved(name, "chtimes", ErrorKind::InvalidName)?;
        if !self.upper_has(name) {
            self.lstat(name)?;
            self.copy_up(name, false, "chtimes")?;
        }
        self.upper
            .chtimes(name, atime, mtime)
            .map_err(|err| err.rewrap("chtimes", name.to_owned()))
    }

    fn symlink(&self, target: &str, linkpath: &str) -> VfsResult<()> {
        self.reject_reserved(linkpath, "symlink", ErrorKind::InvalidName)?;
        if self.lstat(linkpath).is_ok() {
            return Err(VfsError::new(
                ErrorKind::AlreadyExists,
                "symlink",
                linkpath.to_owned(),
            ));
        }
        self.ensure_upper_parents(linkpath, "symlink")?;
        self.upper
            .symlink(target, linkpath)
            .map_err(|err| err.rewrap("symlink", linkpath.to_owned()))?;
        self.remove_whiteout(linkpath);
        Ok(())
    }

    fn readlink(&self, name: &str) -> VfsResult<String> {
        self.reject_reserved(name, "readlink", ErrorKind::NotFound)?;
        match self.upper.lstat(name) {
            Ok(_) => self
                .upper
                .readlink(name)
                .map_err(|err| err.rewrap("readlink", name.to_owned())),
            Err(err) if err.is_not_found() && self.lower_visible(name) => self
                .lower
                .readlink(name)
                .map_err(|err| err.rewrap("readlink", name.to_owned())),
            Err(err) => Err(err.rewrap("readlink", name.to_owned())),
        }
    }
}

#[cfg(test)]
mod tests;
