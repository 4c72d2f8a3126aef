//! Chroot-style projection: a subtree of a base filesystem presented as `/`.
//!
//! Confinement is strict: `..` clamps at the projected root, and symlinks
//! with rooted targets are re-rooted into the projection (`/x` means
//! `<projection>/x` on the base, never the base's own `/x`).

use std::sync::Arc;
use std::time::SystemTime;

use tracing::debug;

use crate::mapped::{mkdir_all_mapped, resolve_mapped, MappedPath, PathMapping, RenamedFile};
use crate::{path, File, FileMode, FileSystem, Metadata, OpenFlags, VfsResult};

#[derive(Debug)]
pub struct ProjectionFileSystem {
    base: Arc<dyn FileSystem>,
    projection: String,
}

impl ProjectionFileSystem {
    /// Projects `root` of `base` as the new filesystem root. The projected
    /// path is eagerly canonicalized against the base so later remapping is
    /// purely lexical.
    pub fn new(base: Arc<dyn FileSystem>, root: &str) -> VfsResult<Self> {
        let projection = path::eval_symlinks(&*base, root)?;
        debug!(base = %base.name(), projection = %projection, "projecting subtree as root");
        Ok(Self { base, projection })
    }

    pub fn base(&self) -> &Arc<dyn FileSystem> {
        &self.base
    }

    fn resolve(&self, name: &str, follow_terminal: bool, op: &'static str) -> VfsResult<MappedPath> {
        // Errors out of the walk already carry the client-visible prefix.
        resolve_mapped(self, self, name, follow_terminal, op)
    }
}

impl PathMapping for ProjectionFileSystem {
    fn map(&self, client_path: &str) -> MappedPath {
        MappedPath {
            fs: self.base.clone(),
            path: path::join(&*self.base, &[&self.projection, client_path]),
        }
    }
}

impl FileSystem for ProjectionFileSystem {
    fn name(&self) -> String {
        format!("ProjectionFileSystem [{}]{}", self.base.name(), self.projection)
    }

    fn volume_name(&self, path: &str) -> String {
        self.base.volume_name(path)
    }

    fn normalize(&self, path: &str) -> String {
        self.base.normalize(path)
    }

    fn getwd(&self) -> VfsResult<String> {
        Ok("/".to_owned())
    }

    fn create(&self, name: &str) -> VfsResult<Box<dyn File>> {
        let mapped = self.resolve(name, true, "create")?;
        let file = mapped
            .fs
            .create(&mapped.path)
            .map_err(|err| err.rewrap("create", name.to_owned()))?;
        Ok(RenamedFile::new(name, file))
    }

    fn mkdir(&self, name: &str, perm: FileMode) -> VfsResult<()> {
        let mapped = self.resolve(name, true, "mkdir")?;
        mapped
            .fs
            .mkdir(&mapped.path, perm)
            .map_err(|err| err.rewrap("mkdir", name.to_owned()))
    }

    fn mkdir_all(&self, name: &str, perm: FileMode) -> VfsResult<()> {
        mkdir_all_mapped(self, name, perm)
    }

    fn open_file(&self, name: &str, flags: OpenFlags, perm: FileMode) -> VfsResult<Box<dyn File>> {
        let mapped = self.resolve(name, true, "open")?;
        let file = mapped
            .fs
            .open_file(&mapped.path, flags, perm)
            .map_err(|err| err.rewrap("open", name.to_owned()))?;
        Ok(RenamedFile::new(name, file))
    }

    fn remove(&self, name: &str) -> VfsResult<()> {
        let mapped = self.resolve(name, false, "remove")?;
        mapped
            .fs
            .remove(&mapped.path)
            .map_err(|err| err.rewrap("remove", name.to_owned()))
    }

    fn remove_all(&self, name: &str) -> VfsResult<()> {
        let mapped = self.resolve(name, false, "remove_all")?;
        mapped
            .fs
            .remove_all(&mapped.path)
            .map_err(|err| err.rewrap("remove_all", name.to_owned()))
    }

    fn rename(&self, oldname: &str, newname: &str) -> VfsResult<()> {
        let old = self.resolve(oldname, false, "rename")?;
        let new = self.resolve(newname, false, "rename")?;
        old.fs
            .rename(&old.path, &new.path)
            .map_err(|err| err.rewrap("rename", oldname.to_owned()))
    }

    fn stat(&self, name: &str) -> VfsResult<Metadata> {
        let mapped = self.resolve(name, true, "stat")?;
        mapped
            .fs
            .stat(&mapped.path)
            .map_err(|err| err.rewrap("stat", name.to_owned()))
    }

    fn lstat(&self, name: &str) -> VfsResult<Metadata> {
        let mapped = self.resolve(name, false, "lstat")?;
        mapped
            .fs
            .lstat(&mapped.path)
            .map_err(|err| err.rewrap("lstat", name.to_owned()))
    }

    fn chmod(&self, name: &str, mode: FileMode) -> VfsResult<()> {
        let mapped = self.resolve(name, true, "chmod")?;
        mapped
            .fs
            .chmod(&mapped.path, mode)
            .map_err(|err| err.rewrap("chmod", name.to_owned()))
    }

    fn chtimes(&self, name: &str, atime: SystemTime, mtime: SystemTime) -> VfsResult<()> {
        let mapped = self.resolve(name, true, "chtimes")?;
        mapped
            .fs
            .chtimes(&mapped.path, atime, mtime)
            .map_err(|err| err.rewrap("chtimes", name.to_owned()))
    }

    fn symlink(&self, target: &str, linkpath: &str) -> VfsResult<()> {
        let mapped = self.resolve(linkpath, false, "symlink")?;
        // The target is stored verbatim; rooted targets are re-rooted into
        // the projection at resolution time, not here.
        mapped
            .fs
            .symlink(target, &mapped.path)
            .map_err(|err| err.rewrap("symlink", linkpath.to_owned()))
    }

    fn readlink(&self, name: &str) -> VfsResult<String> {
        let mapped = self.resolve(name, false, "readlink")?;
        mapped
            .fs
            .readlink(&mapped.path)
            .map_err(|err| err.rewrap("readlink", name.to_owned()))
    }
}
