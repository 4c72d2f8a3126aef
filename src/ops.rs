//! Thin helpers composed from the [`FileSystem`] contract.

use std::collections::VecDeque;
use std::io::{Read, Write};

use crate::error::VfsResult;
use crate::{path, FileMode, FileSystem, Metadata, OpenFlags};

/// Does anything exist at `path`? Errors other than absence count as
/// existing — the node is there even if it cannot be inspected.
pub fn exists(fs: &dyn FileSystem, path: &str) -> bool {
    match fs.stat(path) {
        Ok(_) => true,
        Err(err) => !err.is_not_found(),
    }
}

/// Does `path` refer to a directory?
pub fn is_dir(fs: &dyn FileSystem, path: &str) -> bool {
    fs.stat(path).map(|meta| meta.is_dir()).unwrap_or(false)
}

/// Does `path` refer to a regular file?
pub fn is_file(fs: &dyn FileSystem, path: &str) -> bool {
    fs.stat(path).map(|meta| meta.is_file()).unwrap_or(false)
}

/// Reads a whole file into memory.
pub fn read_file(fs: &dyn FileSystem, path: &str) -> VfsResult<Vec<u8>> {
    let mut file = fs.open(path)?;
    let mut buffer = Vec::new();
    file.read_to_end(&mut buffer)?;
    Ok(buffer)
}

/// Writes `data` as the whole content of `path`, creating or truncating it.
pub fn write_file(fs: &dyn FileSystem, path: &str, data: &[u8], mode: FileMode) -> VfsResult<()> {
    let mut file = fs.open_file(
        path,
        OpenFlags::WRITE | OpenFlags::CREATE | OpenFlags::TRUNC,
        mode,
    )?;
    file.write_all(data)?;
    file.close()
}

/// Sorted metadata of the entries of the directory at `path`.
pub fn read_dir(fs: &dyn FileSystem, path: &str) -> VfsResult<Vec<Metadata>> {
    let mut handle = fs.open(path)?;
    handle.read_dir(None)
}

/// Sorted entry names of the directory at `path`.
pub fn read_dir_names(fs: &dyn FileSystem, path: &str) -> VfsResult<Vec<String>> {
    let mut handle = fs.open(path)?;
    handle.read_dir_names(None)
}

/// Creates a directory and all missing ancestors with mode `0o777`.
pub fn create_dir_all(fs: &dyn FileSystem, path: &str) -> VfsResult<()> {
    fs.mkdir_all(path, 0o777)
}

/// Creates `path` as an empty file if nothing exists there.
pub fn touch(fs: &dyn FileSystem, path: &str) -> VfsResult<()> {
    fs.open_file(path, OpenFlags::WRITE | OpenFlags::CREATE, 0o666)?;
    Ok(())
}

/// Copies a regular file between filesystems, preserving its mode.
pub fn copy_file(
    source: &dyn FileSystem,
    from: &str,
    destination: &dyn FileSystem,
    to: &str,
) -> VfsResult<()> {
    let meta = source.stat(from)?;
    let data = read_file(source, from)?;
    write_file(destination, to, &data, meta.mode)
}

/// Pre-order traversal of the tree under `path`, yielding each entry's full
/// path and metadata. Unreadable directories are skipped.
pub fn walk<'a>(
    fs: &'a dyn FileSystem,
    path: &str,
) -> Box<dyn Iterator<Item = (String, Metadata)> + 'a> {
    let mut pending: VecDeque<(String, Metadata)> = read_dir(fs, path)
        .ok()
        .into_iter()
        .flatten()
        .map(|meta| (path::join(fs, &[path, &meta.name]), meta))
        .collect();

    Box::new(std::iter::from_fn(move || {
        let (entry_path, meta) = pending.pop_front()?;
        if meta.is_dir() {
            if let Ok(children) = read_dir(fs, &entry_path) {
                for child in children {
                    let child_path = path::join(fs, &[&entry_path, &child.name]);
                    pending.push_back((child_path, child));
                }
            }
        }
        Some((entry_path, meta))
    }))
}
