//! The in-memory backend: a tree of files, directories and symbolic links.
//!
//! This backend is the behavioral reference for the contract. Every
//! operation resolves its path through the shared evaluator
//! ([`crate::eval::evaluate_path`]) and then mutates the node tree.

mod file;
mod node;

pub use file::MemFile;

use std::sync::Arc;
use std::time::SystemTime;

use crate::error::{ErrorKind, VfsError, VfsResult};
use crate::eval::{evaluate_path, Resolved};
use crate::{path, File, FileMode, FileSystem, Metadata, OpenFlags};

use node::Node;

#[derive(Debug, Clone)]
pub struct MemoryFileSystem {
    root: Arc<Node>,
}

impl MemoryFileSystem {
    pub fn new() -> Self {
        Self {
            root: Node::new_dir(0o777),
        }
    }

    fn evaluate(
        &self,
        name: &str,
        follow_terminal: bool,
        op: &'static str,
    ) -> VfsResult<Resolved<Arc<Node>>> {
        evaluate_path(self, &self.root, name, follow_terminal, op)
    }

    /// Resolves to an existing node, failing with `NotFound` otherwise.
    fn find(
        &self,
        name: &str,
        follow_terminal: bool,
        op: &'static str,
    ) -> VfsResult<(Arc<Node>, String)> {
        let resolved = self.evaluate(name, follow_terminal, op)?;
        match resolved.node {
            Some(node) => Ok((node, display_name(&resolved.base))),
            None => Err(VfsError::new(ErrorKind::NotFound, op, name.to_owned())),
        }
    }
}

impl Default for MemoryFileSystem {
    fn default() -> Self {
        Self::new()
    }
}

fn display_name(base: &str) -> String {
    if base.is_empty() {
        "/".to_owned()
    } else {
        base.to_owned()
    }
}

impl FileSystem for MemoryFileSystem {
    fn name(&self) -> String {
        "MemoryFileSystem".to_owned()
    }

    fn getwd(&self) -> VfsResult<String> {
        Ok("/".to_owned())
    }

    fn create(&self, name: &str) -> VfsResult<Box<dyn File>> {
        let resolved = self.evaluate(name, true, "create")?;
        if resolved.node.is_some() {
            return Err(VfsError::new(
                ErrorKind::AlreadyExists,
                "create",
                name.to_owned(),
            ));
        }
        let file = Node::new_file(0o777);
        resolved
            .parent
            .add(&resolved.base, file.clone())
            .map_err(|kind| VfsError::new(kind, "create", name.to_owned()))?;
        Ok(Box::new(MemFile::new(resolved.base, file)))
    }

    fn mkdir(&self, name: &str, perm: FileMode) -> VfsResult<()> {
        let resolved = self.evaluate(name, true, "mkdir")?;
        if resolved.node.is_some() {
            return Err(VfsError::new(
                ErrorKind::AlreadyExists,
                "mkdir",
                name.to_owned(),
            ));
        }
        resolved
            .parent
            .add(&resolved.base, Node::new_dir(perm))
            .map_err(|kind| VfsError::new(kind, "mkdir", name.to_owned()))
    }

    fn mkdir_all(&self, name: &str, perm: FileMode) -> VfsResult<()> {
        let canonical = path::canonical(self, name, false)?;
        let (_, elems, _) = path::split_path(self, &canonical);
        let mut current = self.root.clone();
        let mut walked = String::from("/");
        for elem in &elems {
            walked = path::join(self, &[&walked, elem]);
            let next = match current.child(elem) {
                Ok(Some(next)) => next,
                Ok(None) => {
                    let dir = Node::new_dir(perm);
                    match current.add(elem, dir.clone()) {
                        Ok(()) | Err(ErrorKind::AlreadyExists) => {}
                        Err(kind) => return Err(VfsError::new(kind, "mkdir_all", walked)),
                    }
                    // Re-read in case a concurrent creation won.
                    match current.child(elem) {
                        Ok(Some(next)) => next,
                        _ => dir,
                    }
                }
                Err(kind) => return Err(VfsError::new(kind, "mkdir_all", walked)),
            };
            current = next;
        }
        if !current.is_dir() {
            return Err(VfsError::new(ErrorKind::NotDir, "mkdir_all", walked));
        }
        Ok(())
    }

    fn open_file(&self, name: &str, flags: OpenFlags, perm: FileMode) -> VfsResult<Box<dyn File>> {
        if !flags.intersects(OpenFlags::READ | OpenFlags::WRITE) {
            return Err(VfsError::new(
                ErrorKind::InvalidInput,
                "open",
                name.to_owned(),
            ));
        }
        let resolved = self.evaluate(name, true, "open")?;
        let node = match resolved.node {
            Some(node) => {
                if flags.contains(OpenFlags::CREATE | OpenFlags::EXCL) {
                    return Err(VfsError::new(
                        ErrorKind::AlreadyExists,
                        "open",
                        name.to_owned(),
                    ));
                }
                node
            }
            None => {
                if !flags.contains(OpenFlags::CREATE) {
                    return Err(VfsError::new(
                        ErrorKind::NotFound,
                        "open",
                        name.to_owned(),
                    ));
                }
                let file = Node::new_file(perm);
                resolved
                    .parent
                    .add(&resolved.base, file.clone())
                    .map_err(|kind| VfsError::new(kind, "open", name.to_owned()))?;
                file
            }
        };

        if !flags.writable() {
            return Ok(Box::new(
                MemFile::new(display_name(&resolved.base), node).read_only(),
            ));
        }
        if node.is_dir() {
            return Err(VfsError::new(
                ErrorKind::InvalidInput,
                "open",
                name.to_owned(),
            ));
        }
        let mut handle = MemFile::new(display_name(&resolved.base), node.clone());
        if flags.contains(OpenFlags::APPEND) {
            handle = handle.seek_end_for_append();
        }
        if flags.contains(OpenFlags::TRUNC) {
            node.truncate(0)
                .map_err(|kind| VfsError::new(kind, "open", name.to_owned()))?;
        }
        Ok(Box::new(handle))
    }

    fn remove(&self, name: &str) -> VfsResult<()> {
        let resolved = self.evaluate(name, false, "remove")?;
        if resolved.node.is_none() {
            return Err(VfsError::new(
                ErrorKind::NotFound,
                "remove",
                name.to_owned(),
            ));
        }
        if resolved.base.is_empty() {
            return Err(VfsError::new(
                ErrorKind::Permission,
                "remove",
                name.to_owned(),
            ));
        }
        resolved
            .parent
            .remove(&resolved.base, true)
            .map_err(|kind| VfsError::new(kind, "remove", name.to_owned()))
    }

    fn remove_all(&self, name: &str) -> VfsResult<()> {
        let resolved = match self.evaluate(name, false, "remove_all") {
            Ok(resolved) => resolved,
            Err(err) if err.is_not_found() => return Ok(()),
            Err(err) => return Err(err),
        };
        if resolved.node.is_none() {
            return Ok(());
        }
        if resolved.base.is_empty() {
            return Err(VfsError::new(
                ErrorKind::Permission,
                "remove_all",
                name.to_owned(),
            ));
        }
        // Dropping the parent's reference drops the whole subtree; open
        // handles keep the detached nodes alive.
        resolved
            .parent
            .remove(&resolved.base, false)
            .map_err(|kind| VfsError::new(kind, "remove_all", name.to_owned()))
    }

    fn rename(&self, oldname: &str, newname: &str) -> VfsResult<()> {
        let old = self.evaluate(oldname, false, "rename")?;
        if old.base.is_empty() {
            return Err(VfsError::new(
                ErrorKind::Permission,
                "rename",
                oldname.to_owned(),
            ));
        }
        let Some(moved) = old.node else {
            return Err(VfsError::new(
                ErrorKind::NotFound,
                "rename",
                oldname.to_owned(),
            ));
        };
        let new = self.evaluate(newname, false, "rename")?;
        if new.node.is_some() {
            return Err(VfsError::new(
                ErrorKind::AlreadyExists,
                "rename",
                newname.to_owned(),
            ));
        }
        new.parent
            .add(&new.base, moved)
            .map_err(|kind| VfsError::new(kind, "rename", newname.to_owned()))?;
        old.parent
            .remove(&old.base, false)
            .map_err(|kind| VfsError::new(kind, "rename", oldname.to_owned()))
    }

    fn stat(&self, name: &str) -> VfsResult<Metadata> {
        let (node, base) = self.find(name, true, "stat")?;
        Ok(node.metadata(&base))
    }

    fn lstat(&self, name: &str) -> VfsResult<Metadata> {
        let (node, base) = self.find(name, false, "lstat")?;
        Ok(node.metadata(&base))
    }

    fn chmod(&self, name: &str, mode: FileMode) -> VfsResult<()> {
        let (node, _) = self.find(name, true, "chmod")?;
        node.chmod(mode);
        Ok(())
    }

    fn chtimes(&self, name: &str, _atime: SystemTime, mtime: SystemTime) -> VfsResult<()> {
        let (node, _) = self.find(name, true, "chtimes")?;
        node.set_modified(mtime);
        Ok(())
    }

    fn symlink(&self, target: &str, linkpath: &str) -> VfsResult<()> {
        let resolved = self.evaluate(linkpath, false, "symlink")?;
        if resolved.node.is_some() {
            return Err(VfsError::new(
                ErrorKind::AlreadyExists,
                "symlink",
                linkpath.to_owned(),
            ));
        }
        resolved
            .parent
            .add(&resolved.base, Node::new_symlink(target, 0o777))
            .map_err(|kind| VfsError::new(kind, "symlink", linkpath.to_owned()))
    }

    fn readlink(&self, name: &str) -> VfsResult<String> {
        let (node, _) = self.find(name, false, "readlink")?;
        node.link_target()
            .ok_or_else(|| VfsError::new(ErrorKind::InvalidInput, "readlink", name.to_owned()))
    }
}
