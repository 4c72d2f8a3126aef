//! The shared path-walk algorithm for tree-shaped backends.
//!
//! A backend exposes its nodes through the [`FileData`] capability and gets
//! component-by-component resolution with embedded symlink expansion, `..`
//! clamping at the root and loop bounding in return.

use crate::error::{ErrorKind, VfsError, VfsResult};
use crate::{path, FileSystem, MAX_LINK_EXPANSIONS};

/// Minimal view of a backend node required by [`evaluate_path`].
///
/// Implementations are cheap handles (reference-counted pointers) cloned
/// freely during the walk.
pub trait FileData: Clone {
    fn is_dir(&self) -> bool;

    fn is_symlink(&self) -> bool;

    /// The stored link target. Only called on symlink nodes.
    fn link_target(&self) -> String;

    /// Child lookup. `Ok(None)` when the entry is absent, `NotDir` when
    /// `self` is not a directory.
    fn lookup(&self, name: &str) -> VfsResult<Option<Self>>;
}

/// Outcome of a successful walk. `node` is `None` when everything up to the
/// final component exists but the final component itself does not — the
/// state create-style operations branch on.
pub struct Resolved<D> {
    pub parent: D,
    pub parent_path: String,
    pub node: Option<D>,
    pub base: String,
}

/// Walks `name` from `root`, resolving `..` against the walked stack
/// (clamping at the root) and splicing symlink targets in place; rooted
/// targets restart the walk from the root. A terminal symlink is only
/// followed when `follow_terminal` is set. More than
/// [`MAX_LINK_EXPANSIONS`] expansions fail with `TooManyLinks`.
pub fn evaluate_path<D: FileData>(
    fs: &dyn FileSystem,
    root: &D,
    name: &str,
    follow_terminal: bool,
    op: &'static str,
) -> VfsResult<Resolved<D>> {
    let (_, mut elems, _) = path::split_path(fs, name);
    let mut links = 0usize;

    'restart: loop {
        let mut stack: Vec<D> = vec![root.clone()];
        let mut walked = String::from("/");
        let mut dir = true;

        let mut i = 0usize;
        while i < elems.len() {
            let elem = elems[i].clone();
            if elem == ".." {
                if !dir {
                    return Err(VfsError::new(ErrorKind::NotDir, op, walked));
                }
                if stack.len() > 1 {
                    stack.pop();
                    walked = path::split(fs, &walked).0;
                }
                i += 1;
                continue;
            }

            let current = stack[stack.len() - 1].clone();
            let next = match current.lookup(&elem) {
                Ok(next) => next,
                Err(err) if err.is_not_dir() => {
                    return Err(err.rewrap(op, walked));
                }
                Err(err) => return Err(err),
            };
            let Some(next) = next else {
                if i == elems.len() - 1 {
                    return Ok(Resolved {
                        parent: current,
                        parent_path: walked,
                        node: None,
                        base: elem,
                    });
                }
                let missing = path::join(fs, &[&walked, &elem]);
                return Err(VfsError::new(ErrorKind::NotFound, op, missing));
            };

            if !next.is_symlink() || (!follow_terminal && i == elems.len() - 1) {
                dir = next.is_dir();
                walked = path::join(fs, &[&walked, &elem]);
                stack.push(next);
                i += 1;
                continue;
            }

            links += 1;
            if links > MAX_LINK_EXPANSIONS {
                return Err(VfsError::new(ErrorKind::TooManyLinks, op, walked));
            }
            let target = fs.normalize(&next.link_target());
            let (_, nested, rooted) = path::split_path(fs, &target);
            if rooted {
                let rest = elems.split_off(i + 1);
                elems = nested;
                elems.extend(rest);
                continue 'restart;
            }
            // Relative target: splice in place and re-scan from here.
            elems.splice(i..=i, nested);
        }

        if walked == "/" {
            return Ok(Resolved {
                parent: root.clone(),
                parent_path: String::from("/"),
                node: Some(root.clone()),
                base: String::new(),
            });
        }
        let (parent_path, base) = path::split(fs, &walked);
        let node = stack[stack.len() - 1].clone();
        let parent = stack[stack.len() - 2].clone();
        return Ok(Resolved {
            parent,
            parent_path,
            node: Some(node),
            base,
        });
    }
}
