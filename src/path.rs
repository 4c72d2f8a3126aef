//! Lexical path primitives and symlink-aware canonicalization.
//!
//! Every function is parameterised by the filesystem so volume detection and
//! host-syntax normalization stay backend hooks. The lexical half never does
//! I/O; [`canonical`], [`eval_symlinks`] and [`abs`] call `lstat`/`readlink`
//! on the filesystem while walking.

use crate::error::{ErrorKind, VfsError, VfsResult};
use crate::{FileSystem, MAX_LINK_EXPANSIONS, PATH_SEPARATOR_STR};

/// Reports whether `c` is the path separator.
pub fn is_path_separator(c: u8) -> bool {
    c == b'/'
}

/// Splits `path` into its volume prefix and the rest.
pub fn split_volume(fs: &dyn FileSystem, path: &str) -> (String, String) {
    let path = fs.normalize(path);
    let vol = fs.volume_name(&path);
    let rest = path[vol.len()..].to_owned();
    (vol, rest)
}

/// True if `path` is rooted (after the volume prefix, if any).
pub fn is_abs(fs: &dyn FileSystem, path: &str) -> bool {
    let (_, rest) = split_volume(fs, path);
    rest.starts_with(PATH_SEPARATOR_STR)
}

/// True if `path` denotes the root directory.
pub fn is_root(fs: &dyn FileSystem, path: &str) -> bool {
    let (_, rest) = split_volume(fs, path);
    rest == PATH_SEPARATOR_STR
}

/// Normalizes separator runs and strips redundant components: separator runs
/// collapse to one, trailing separators and `.` segments are dropped. `..`
/// segments are preserved. A path reducing to nothing becomes `/` when
/// rooted and `.` when relative; the empty path is unchanged.
pub fn trim(fs: &dyn FileSystem, path: &str) -> String {
    let (vol, rest) = split_volume(fs, path);
    let rooted = rest.starts_with(PATH_SEPARATOR_STR);
    let body = rest
        .split('/')
        .filter(|seg| !seg.is_empty() && *seg != ".")
        .collect::<Vec<_>>()
        .join(PATH_SEPARATOR_STR);
    let trimmed = if rooted {
        format!("/{body}")
    } else if body.is_empty() {
        if rest.is_empty() {
            String::new()
        } else {
            ".".to_owned()
        }
    } else {
        body
    };
    format!("{vol}{trimmed}")
}

/// Joins path elements with separators, dropping empty elements, and trims
/// the result. `..` segments are left alone so the joined path denotes the
/// same file as its inputs.
pub fn join(fs: &dyn FileSystem, elems: &[&str]) -> String {
    let joined = elems
        .iter()
        .copied()
        .filter(|elem| !elem.is_empty())
        .collect::<Vec<_>>()
        .join(PATH_SEPARATOR_STR);
    trim(fs, &joined)
}

/// Splits `path` at the final separator into a directory part (without the
/// trailing separator, so `split` can be applied to it again) and a base
/// name. Without a separator the directory part is empty.
pub fn split(fs: &dyn FileSystem, path: &str) -> (String, String) {
    let path = fs.normalize(path);
    let vol_len = fs.volume_name(&path).len() as isize;
    let bytes = path.as_bytes();

    let mut i = bytes.len() as isize - 1;
    while i >= vol_len && !is_path_separator(bytes[i as usize]) {
        i -= 1;
    }
    let mut j = i;
    while j > vol_len && is_path_separator(bytes[j as usize]) {
        j -= 1;
    }
    let dir_end = (j + 1).max(0) as usize;
    let base_start = (i + 1).max(0) as usize;
    (path[..dir_end].to_owned(), path[base_start..].to_owned())
}

/// The directory part of `path` with trailing separators stripped. The root
/// stays `/`; a relative path without a directory part becomes `.`.
pub fn dir(fs: &dyn FileSystem, path: &str) -> String {
    let mut def = ".";
    let (vol, rest) = split_volume(fs, path);
    let bytes = rest.as_bytes();

    let mut i = bytes.len() as isize - 1;
    while i > 0 && is_path_separator(bytes[i as usize]) {
        i -= 1;
    }
    while i >= 0 && !is_path_separator(bytes[i as usize]) {
        i -= 1;
    }
    while i > 0 && is_path_separator(bytes[i as usize]) {
        def = PATH_SEPARATOR_STR;
        i -= 1;
    }
    let head = &rest[..(i + 1).max(0) as usize];
    if head.is_empty() {
        format!("{vol}{def}")
    } else {
        format!("{vol}{head}")
    }
}

/// The last component of `path`, ignoring trailing separators.
/// `base("/") == "/"` and `base("") == "."`.
pub fn base(fs: &dyn FileSystem, path: &str) -> String {
    let (_, rest) = split_volume(fs, path);
    let bytes = rest.as_bytes();

    let mut i = bytes.len() as isize - 1;
    while i > 0 && is_path_separator(bytes[i as usize]) {
        i -= 1;
    }
    let mut j = i;
    while j >= 0 && !is_path_separator(bytes[j as usize]) {
        j -= 1;
    }
    let name = &rest[(j + 1).max(0) as usize..(i + 1).max(0) as usize];
    if name.is_empty() {
        if j == 0 {
            PATH_SEPARATOR_STR.to_owned()
        } else {
            ".".to_owned()
        }
    } else {
        name.to_owned()
    }
}

/// Shortest lexically equivalent path: separator runs collapse, `.` drops,
/// `X/..` cancels, a leading `/..` clamps to `/`. The empty result is `.`.
pub fn clean(fs: &dyn FileSystem, path: &str) -> String {
    let (vol, rest) = split_volume(fs, path);
    format!("{vol}{}", clean_rest(&rest))
}

fn clean_rest(path: &str) -> String {
    if path.is_empty() {
        return ".".to_owned();
    }
    let rooted = path.starts_with(PATH_SEPARATOR_STR);
    let mut out: Vec<&str> = Vec::new();
    for seg in path.split('/') {
        match seg {
            "" | "." => {}
            ".." => {
                if out.last().is_some_and(|top| *top != "..") {
                    out.pop();
                } else if !rooted {
                    out.push("..");
                }
            }
            _ => out.push(seg),
        }
    }
    let body = out.join(PATH_SEPARATOR_STR);
    if rooted {
        format!("/{body}")
    } else if body.is_empty() {
        ".".to_owned()
    } else {
        body
    }
}

/// Splits `path` into its volume, its segments (excluding `.` and empty
/// components) and whether it was rooted.
pub fn split_path(fs: &dyn FileSystem, path: &str) -> (String, Vec<String>, bool) {
    let (vol, rest) = split_volume(fs, path);
    let rooted = rest.starts_with(PATH_SEPARATOR_STR);
    let elems = rest
        .split('/')
        .filter(|seg| !seg.is_empty() && *seg != ".")
        .map(str::to_owned)
        .collect();
    (vol, elems, rooted)
}

/// Canonical absolute path of `path` with all symlinks along existing
/// prefixes resolved. With `exist` every prefix (including the final
/// component) must exist; without it the non-existing tail is reduced
/// lexically.
pub fn canonical(fs: &dyn FileSystem, path: &str, exist: bool) -> VfsResult<String> {
    let resolved = resolve_walk(fs, path, exist, "canonical")?;
    if is_abs(fs, &resolved) {
        return Ok(resolved);
    }
    let cwd = fs.getwd()?;
    Ok(clean(fs, &join(fs, &[&cwd, &resolved])))
}

/// Resolves all symbolic links in `path` without making it absolute: a
/// relative input stays relative as long as no rooted link target is hit,
/// and `..` escaping the walk origin is kept in the output.
pub fn eval_symlinks(fs: &dyn FileSystem, path: &str) -> VfsResult<String> {
    resolve_walk(fs, path, false, "eval_symlinks")
}

/// Absolute form of `path`: symlinks in `path` are resolved, then a still
/// relative result is joined with the working directory (whose own symlinks
/// are left alone).
pub fn abs(fs: &dyn FileSystem, path: &str) -> VfsResult<String> {
    let resolved = resolve_walk(fs, path, false, "abs")?;
    if is_abs(fs, &resolved) {
        return Ok(resolved);
    }
    let cwd = fs.getwd()?;
    Ok(clean(fs, &join(fs, &[&cwd, &resolved])))
}

/// Shortest relative path from `basepath` to `targpath`, after
/// canonicalizing the base and resolving symlinks in the target. Fails with
/// `VolumeMismatch` for differing volumes and `InvalidInput` when exactly
/// one side is rooted.
pub fn rel(fs: &dyn FileSystem, basepath: &str, targpath: &str) -> VfsResult<String> {
    let base = canonical(fs, basepath, false)?;
    let target = eval_symlinks(fs, targpath)?;
    lexical_rel(fs, &base, &target)
}

fn lexical_rel(fs: &dyn FileSystem, basepath: &str, targpath: &str) -> VfsResult<String> {
    let (base_vol, base) = split_volume(fs, &clean(fs, basepath));
    let (targ_vol, targ) = split_volume(fs, &clean(fs, targpath));
    if base_vol != targ_vol {
        return Err(VfsError::new(ErrorKind::VolumeMismatch, "rel", targpath));
    }
    if base == targ {
        return Ok(".".to_owned());
    }
    let base_rooted = base.starts_with(PATH_SEPARATOR_STR);
    let targ_rooted = targ.starts_with(PATH_SEPARATOR_STR);
    if base_rooted != targ_rooted {
        return Err(VfsError::new(ErrorKind::InvalidInput, "rel", targpath));
    }

    let base_segs: Vec<&str> = base
        .split('/')
        .filter(|seg| !seg.is_empty() && *seg != ".")
        .collect();
    let targ_segs: Vec<&str> = targ
        .split('/')
        .filter(|seg| !seg.is_empty() && *seg != ".")
        .collect();

    let mut common = 0;
    while common < base_segs.len()
        && common < targ_segs.len()
        && base_segs[common] == targ_segs[common]
    {
        common += 1;
    }
    if base_segs[common..].contains(&"..") {
        // Cannot climb out of an unknown directory.
        return Err(VfsError::new(ErrorKind::InvalidInput, "rel", targpath));
    }

    let mut parts: Vec<&str> = vec![".."; base_segs.len() - common];
    parts.extend(&targ_segs[common..]);
    if parts.is_empty() {
        Ok(".".to_owned())
    } else {
        Ok(parts.join(PATH_SEPARATOR_STR))
    }
}

fn render(vol: &str, rooted: bool, out: &[String]) -> String {
    let body = out.join(PATH_SEPARATOR_STR);
    if rooted {
        format!("{vol}/{body}")
    } else if body.is_empty() {
        ".".to_owned()
    } else {
        format!("{vol}{body}")
    }
}

/// The component walk shared by `canonical`, `eval_symlinks` and `abs`.
///
/// Walks left to right, keeping a stack of resolved components. Existing
/// prefixes go through `lstat`; symlinks splice their target in place
/// (rooted targets restart the stack from the root). `..` pops the stack,
/// refuses to traverse an existing regular file, clamps at a rooted origin
/// and accumulates when escaping a relative one. Expansion is bounded by
/// [`MAX_LINK_EXPANSIONS`].
fn resolve_walk(
    fs: &dyn FileSystem,
    path: &str,
    exist: bool,
    op: &'static str,
) -> VfsResult<String> {
    let normalized = fs.normalize(path);
    let (vol, mut elems, mut rooted) = split_path(fs, &normalized);
    let mut out: Vec<String> = Vec::new();
    let mut links = 0usize;
    let mut i = 0usize;

    while i < elems.len() {
        if elems[i] == ".." {
            if out.last().is_some_and(|top| top != "..") {
                let prefix = render(&vol, rooted, &out);
                match fs.lstat(&prefix) {
                    Ok(meta) if !meta.is_dir() => {
                        return Err(VfsError::new(ErrorKind::NotDir, op, prefix));
                    }
                    Ok(_) => {}
                    Err(err) if err.is_not_found() || err.is_permission() => {}
                    Err(err) => return Err(err),
                }
                out.pop();
            } else if !rooted {
                out.push("..".to_owned());
            }
            i += 1;
            continue;
        }

        let prefix = render(&vol, rooted, &out);
        let next = join(fs, &[&prefix, &elems[i]]);
        match fs.lstat(&next) {
            Ok(meta) if meta.is_symlink() => {
                links += 1;
                if links > MAX_LINK_EXPANSIONS {
                    return Err(VfsError::new(ErrorKind::TooManyLinks, op, next));
                }
                let target = fs.normalize(&fs.readlink(&next)?);
                let (target_vol, nested, target_rooted) = split_path(fs, &target);
                if !target_vol.is_empty() && target_vol != vol {
                    return Err(VfsError::new(ErrorKind::VolumeMismatch, op, next));
                }
                if target_rooted {
                    rooted = true;
                    out.clear();
                }
                elems.splice(i..=i, nested);
            }
            Ok(_) => {
                out.push(elems[i].clone());
                i += 1;
            }
            Err(err) if err.is_not_found() => {
                if exist {
                    return Err(err.rewrap(op, next));
                }
                out.push(elems[i].clone());
                i += 1;
            }
            Err(err) if err.is_permission() => {
                out.push(elems[i].clone());
                i += 1;
            }
            Err(err) => return Err(err),
        }
    }

    Ok(render(&vol, rooted, &out))
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::mem_fs::MemoryFileSystem;

    fn fs() -> MemoryFileSystem {
        MemoryFileSystem::new()
    }

    #[test]
    fn base_cases() {
        let fs = fs();
        assert_eq!(base(&fs, "/"), "/");
        assert_eq!(base(&fs, "//"), "/");
        assert_eq!(base(&fs, ""), ".");
        assert_eq!(base(&fs, "."), ".");
        assert_eq!(base(&fs, "/."), ".");
        assert_eq!(base(&fs, "/base"), "base");
        assert_eq!(base(&fs, "/base/"), "base");
        assert_eq!(base(&fs, "/base/."), ".");
        assert_eq!(base(&fs, "/path/base/."), ".");
    }

    #[test]
    fn dir_cases() {
        let fs = fs();
        assert_eq!(dir(&fs, "/"), "/");
        assert_eq!(dir(&fs, ""), ".");
        assert_eq!(dir(&fs, "file"), ".");
        assert_eq!(dir(&fs, "/file"), "/");
        assert_eq!(dir(&fs, "a/b"), "a");
        assert_eq!(dir(&fs, "a/b/"), "a");
        assert_eq!(dir(&fs, "/a/b/c"), "/a/b");
    }

    #[test]
    fn dir_base_round_trip() {
        let fs = fs();
        let parts = ["file", "/", ".", ".."];

        fn check(fs: &MemoryFileSystem, segments: &[&str]) {
            let path = join(fs, segments);
            let recombined = join(fs, &[&dir(fs, &path), &base(fs, &path)]);
            assert_eq!(
                trim(fs, &recombined),
                trim(fs, &path),
                "round-trip of {segments:?} ({path:?})",
            );
        }

        for a in parts {
            for b in parts {
                for c in parts {
                    check(&fs, &[a, b, c]);
                    for d in parts {
                        check(&fs, &[a, b, c, d]);
                    }
                }
            }
        }
    }

    #[test]
    fn trim_cases() {
        let fs = fs();
        assert_eq!(trim(&fs, "path/"), "path");
        assert_eq!(trim(&fs, "path//"), "path");
        assert_eq!(trim(&fs, "path/other"), "path/other");
        assert_eq!(trim(&fs, "path//other"), "path/other");
        assert_eq!(trim(&fs, "path//other/"), "path/other");
        assert_eq!(trim(&fs, "path//other//"), "path/other");
        assert_eq!(trim(&fs, "/path/other/"), "/path/other");
        assert_eq!(trim(&fs, "/path/other//"), "/path/other");
        assert_eq!(trim(&fs, "//path//other"), "/path/other");
        assert_eq!(trim(&fs, "//path//other/"), "/path/other");
        assert_eq!(trim(&fs, "//path//other//"), "/path/other");
        assert_eq!(trim(&fs, "//"), "/");
        assert_eq!(trim(&fs, "/./a/."), "/a");
        assert_eq!(trim(&fs, "/../a/."), "/../a");
        assert_eq!(trim(&fs, "././a/."), "a");
        assert_eq!(trim(&fs, "./../a/."), "../a");
        assert_eq!(trim(&fs, "."), ".");
        assert_eq!(trim(&fs, "/."), "/");
        assert_eq!(trim(&fs, "//."), "/");
        assert_eq!(trim(&fs, "//.//"), "/");
        assert_eq!(trim(&fs, ""), "");
    }

    #[test]
    fn join_cases() {
        let fs = fs();
        assert_eq!(join(&fs, &["path"]), "path");
        assert_eq!(join(&fs, &["path", "other"]), "path/other");
        assert_eq!(join(&fs, &["/path", "/other"]), "/path/other");
        assert_eq!(join(&fs, &["", "/other"]), "/other");
        assert_eq!(join(&fs, &["", "other"]), "other");
        assert_eq!(join(&fs, &["", "path", "", "", "other", ""]), "path/other");
        assert_eq!(join(&fs, &["//"]), "/");
    }

    #[test]
    fn split_cases() {
        let fs = fs();
        assert_eq!(split(&fs, "/a/b"), ("/a".to_owned(), "b".to_owned()));
        assert_eq!(split(&fs, "/"), ("/".to_owned(), String::new()));
        assert_eq!(split(&fs, "a"), (String::new(), "a".to_owned()));
        assert_eq!(split(&fs, "path/"), ("path".to_owned(), String::new()));
        assert_eq!(split(&fs, "/a"), ("/".to_owned(), "a".to_owned()));
    }

    #[test]
    fn clean_cases() {
        let fs = fs();
        assert_eq!(clean(&fs, ""), ".");
        assert_eq!(clean(&fs, "a/b/.."), "a");
        assert_eq!(clean(&fs, "a/b/../.."), ".");
        assert_eq!(clean(&fs, "a/../../b"), "../b");
        assert_eq!(clean(&fs, "/.."), "/");
        assert_eq!(clean(&fs, "/../a"), "/a");
        assert_eq!(clean(&fs, "//a//b///c"), "/a/b/c");
        assert_eq!(clean(&fs, "./a/./b/."), "a/b");
        assert_eq!(clean(&fs, "a/.."), ".");
    }

    #[test]
    fn clean_is_idempotent() {
        let fs = fs();
        for p in [
            "", "/", ".", "..", "a//b/./../c", "/../..//x/", "../../a", "a/b/c/../../..",
        ] {
            let once = clean(&fs, p);
            assert_eq!(clean(&fs, &once), once, "clean(clean({p:?}))");
        }
    }

    #[test]
    fn split_path_cases() {
        let fs = fs();
        let (vol, elems, rooted) = split_path(&fs, "/a/./b//c");
        assert_eq!(vol, "");
        assert_eq!(elems, vec!["a", "b", "c"]);
        assert!(rooted);

        let (_, elems, rooted) = split_path(&fs, "a/../b");
        assert_eq!(elems, vec!["a", "..", "b"]);
        assert!(!rooted);
    }

    #[test]
    fn rel_cases() {
        let fs = fs();
        assert_eq!(rel(&fs, "/a", "/a/b/c").unwrap(), "b/c");
        assert_eq!(rel(&fs, "/a/b", "/a").unwrap(), "..");
        assert_eq!(rel(&fs, "/a/b", "/c/d").unwrap(), "../../c/d");
        assert_eq!(rel(&fs, "/a", "/a").unwrap(), ".");
    }

    #[test]
    fn rel_round_trip_property() {
        let fs = fs();
        for (base_path, suffix) in [("/a", "b/c"), ("/a/b", "x"), ("/", "a/b")] {
            let target = join(&fs, &[base_path, suffix]);
            assert_eq!(rel(&fs, base_path, &target).unwrap(), clean(&fs, suffix));
        }
    }

    #[test]
    fn abs_prepends_working_directory() {
        let fs = fs();
        fs.mkdir_all("/d1/d2", 0o755).unwrap();
        assert_eq!(abs(&fs, "d1/d2").unwrap(), "/d1/d2");
        assert_eq!(abs(&fs, "/d1").unwrap(), "/d1");
        assert_eq!(abs(&fs, "..").unwrap(), "/");
    }

    #[test]
    fn canonical_is_rooted_for_abs_input() {
        let fs = fs();
        fs.mkdir_all("/d1/d2", 0o755).unwrap();
        assert!(canonical(&fs, "/d1/d2/x", false).unwrap().starts_with('/'));
        assert_eq!(canonical(&fs, "/d1/../d1/d2", true).unwrap(), "/d1/d2");
        assert!(canonical(&fs, "/d1/nope/x", true)
            .unwrap_err()
            .is_not_found());
    }
}
