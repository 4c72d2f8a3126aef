//! Composition of filesystems through a mount table.
//!
//! A root filesystem carries the namespace; other filesystems are mounted at
//! existing directories and receive every operation whose path falls under
//! their mountpoint (longest-prefix dispatch). The mount table is expected
//! to be configured before concurrent use.

use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};
use std::time::SystemTime;

use tracing::debug;

use crate::error::{ErrorKind, VfsError, VfsResult};
use crate::mapped::{mkdir_all_mapped, resolve_mapped, MappedPath, PathMapping, RenamedFile};
use crate::{path, File, FileMode, FileSystem, Metadata, OpenFlags};

#[derive(Debug)]
pub struct ComposedFileSystem {
    root: Arc<dyn FileSystem>,
    mounts: RwLock<BTreeMap<String, Arc<dyn FileSystem>>>,
}

impl ComposedFileSystem {
    pub fn new(root: Arc<dyn FileSystem>) -> Self {
        Self {
            root,
            mounts: RwLock::new(BTreeMap::new()),
        }
    }

    pub fn base(&self) -> &Arc<dyn FileSystem> {
        &self.root
    }

    /// Mounts `fs` at `point`. The mountpoint is canonicalized against the
    /// composed view (resolving through existing mounts and symlinks) and
    /// must be an existing directory.
    pub fn mount(&self, point: &str, fs: Arc<dyn FileSystem>) -> VfsResult<()> {
        let mountpoint = path::canonical(self, point, true)
            .map_err(|err| err.rewrap("mount", point.to_owned()))?;
        let meta = self
            .lstat(&mountpoint)
            .map_err(|err| err.rewrap("mount", point.to_owned()))?;
        if !meta.is_dir() {
            return Err(VfsError::new(ErrorKind::NotDir, "mount", mountpoint));
        }
        debug!(mountpoint = %mountpoint, fs = %fs.name(), "mounting filesystem");
        self.mounts
            .write()
            .expect("mount table lock")
            .insert(mountpoint, fs);
        Ok(())
    }

    /// Removes the mount at `point`.
    pub fn unmount(&self, point: &str) -> VfsResult<()> {
        let mountpoint = path::clean(self, &path::join(self, &["/", point]));
        match self
            .mounts
            .write()
            .expect("mount table lock")
            .remove(&mountpoint)
        {
            Some(_) => Ok(()),
            None => Err(VfsError::new(ErrorKind::NotFound, "unmount", mountpoint)),
        }
    }

    fn resolve(&self, name: &str, follow_terminal: bool, op: &'static str) -> VfsResult<MappedPath> {
        resolve_mapped(self, self, name, follow_terminal, op)
    }
}

impl PathMapping for ComposedFileSystem {
    fn map(&self, client_path: &str) -> MappedPath {
        let mounts = self.mounts.read().expect("mount table lock");
        let mut best: Option<(&str, &Arc<dyn FileSystem>)> = None;
        for (point, fs) in mounts.iter() {
            if client_path == point {
                return MappedPath {
                    fs: fs.clone(),
                    path: String::from("/"),
                };
            }
            let matches = if point == "/" {
                true
            } else {
                client_path.starts_with(point)
                    && client_path.as_bytes().get(point.len()) == Some(&b'/')
            };
            if matches && best.map_or(true, |(current, _)| point.len() > current.len()) {
                best = Some((point.as_str(), fs));
            }
        }
        match best {
            Some((point, fs)) => {
                let rest = if point == "/" {
                    client_path.to_owned()
                } else {
                    client_path[point.len()..].to_owned()
                };
                MappedPath {
                    fs: fs.clone(),
                    path: rest,
                }
            }
            None => MappedPath {
                fs: self.root.clone(),
                path: client_path.to_owned(),
            },
        }
    }
}

impl FileSystem for ComposedFileSystem {
    fn name(&self) -> String {
        format!("ComposedFileSystem [{}]", self.root.name())
    }

    fn volume_name(&self, path: &str) -> String {
        self.root.volume_name(path)
    }

    fn normalize(&self, path: &str) -> String {
        self.root.normalize(path)
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
        if !Arc::ptr_eq(&old.fs, &new.fs) {
            return Err(VfsError::new(
                ErrorKind::CrossDevice,
                "rename",
                newname.to_owned(),
            ));
        }
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
