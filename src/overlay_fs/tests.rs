use std::sync::Arc;

use pretty_assertions::assert_eq;

use crate::error::ErrorKind;
use crate::{ops, FileSystem, MemoryFileSystem, OpenFlags};

use super::OverlayFileSystem;

const DEFAULT_CONTENT: &[u8] = b"This is a test\n";

fn env() -> (OverlayFileSystem, Arc<MemoryFileSystem>, Arc<MemoryFileSystem>) {
    let upper = Arc::new(MemoryFileSystem::new());
    let lower = Arc::new(MemoryFileSystem::new());

    lower.mkdir_all("base/d1", 0o777).unwrap();
    ops::write_file(&*lower, "base/d1/basefile", DEFAULT_CONTENT, 0o644).unwrap();
    ops::write_file(&*lower, "base/d1/otherfile", DEFAULT_CONTENT, 0o644).unwrap();
    let double: Vec<u8> = [DEFAULT_CONTENT, DEFAULT_CONTENT].concat();
    ops::write_file(&*lower, "base/basefile", &double, 0o644).unwrap();

    let fs = OverlayFileSystem::new(upper.clone(), lower.clone());
    (fs, upper, lower)
}

fn names(fs: &dyn FileSystem, dir: &str) -> Vec<String> {
    ops::read_dir_names(fs, dir).unwrap()
}

#[test]
fn listings_merge_both_layers() {
    let (fs, _, _) = env();
    assert_eq!(names(&fs, "base"), ["basefile", "d1"]);
    assert_eq!(names(&fs, "base/d1"), ["basefile", "otherfile"]);
}

#[test]
fn remove_writes_a_whiteout() {
    let (fs, upper, lower) = env();
    fs.remove("base/basefile").unwrap();

    assert_eq!(names(&fs, "base"), ["d1"]);
    assert_eq!(names(&*upper, "base"), [".wh.basefile"]);
    assert_eq!(names(&*lower, "base"), ["basefile", "d1"]);
}

#[test]
fn recreate_replaces_the_whiteout() {
    let (fs, upper, lower) = env();
    fs.remove("base/basefile").unwrap();
    ops::write_file(&fs, "base/basefile", b"other content", 0o644).unwrap();

    assert_eq!(names(&fs, "base"), ["basefile", "d1"]);
    assert_eq!(names(&*upper, "base"), ["basefile"]);
    assert_eq!(names(&*lower, "base"), ["basefile", "d1"]);
    let double: Vec<u8> = [DEFAULT_CONTENT, DEFAULT_CONTENT].concat();
    assert_eq!(ops::read_file(&*lower, "base/basefile").unwrap(), double);
    assert_eq!(ops::read_file(&fs, "base/basefile").unwrap(), b"other content");
}

#[test]
fn redelete_restores_the_whiteout() {
    let (fs, upper, lower) = env();
    fs.remove("base/basefile").unwrap();
    ops::write_file(&fs, "base/basefile", b"other content", 0o644).unwrap();
    fs.remove("base/basefile").unwrap();

    assert_eq!(names(&fs, "base"), ["d1"]);
    assert_eq!(names(&*upper, "base"), [".wh.basefile"]);
    assert_eq!(names(&*lower, "base"), ["basefile", "d1"]);
}

#[test]
fn remove_all_hides_a_lower_directory() {
    let (fs, upper, lower) = env();
    fs.remove_all("base/d1").unwrap();

    assert_eq!(names(&fs, "base"), ["basefile"]);
    assert_eq!(names(&*upper, "base"), [".wh.d1"]);
    assert_eq!(names(&*lower, "base/d1"), ["basefile", "otherfile"]);
}

#[test]
fn recreated_directory_is_opaque() {
    let (fs, upper, lower) = env();
    fs.mkdir("d1", 0o777).unwrap();
    fs.remove_all("base").unwrap();
    assert_eq!(names(&fs, "/"), ["d1"]);
    assert_eq!(names(&*upper, "/"), [".wh.base", "d1"]);

    fs.mkdir("base", 0o777).unwrap();
    assert_eq!(names(&fs, "/"), ["base", "d1"]);
    assert_eq!(names(&*upper, "/"), ["base", "d1"]);
    assert_eq!(names(&fs, "/base"), Vec::<String>::new());
    assert_eq!(names(&*upper, "/base"), [super::OPAQUE_MARKER]);

    fs.mkdir("base/d1", 0o777).unwrap();
    assert_eq!(names(&fs, "/base/d1"), Vec::<String>::new());
    assert_eq!(names(&*lower, "/base/d1"), ["basefile", "otherfile"]);
    assert_eq!(names(&*upper, "/base/d1"), [super::OPAQUE_MARKER]);
}

#[test]
fn lower_files_are_readable_through_the_overlay() {
    let (fs, _, _) = env();
    assert_eq!(ops::read_file(&fs, "base/d1/basefile").unwrap(), DEFAULT_CONTENT);
}

#[test]
fn truncating_write_copies_up_without_content() {
    let (fs, upper, lower) = env();
    let mut file = fs
        .open_file(
            "base/d1/basefile",
            OpenFlags::WRITE | OpenFlags::CREATE | OpenFlags::TRUNC,
            0o644,
        )
        .unwrap();
    use std::io::Write;
    file.write_all(b"other content").unwrap();
    file.close().unwrap();

    assert_eq!(ops::read_file(&fs, "base/d1/basefile").unwrap(), b"other content");
    assert_eq!(ops::read_file(&*lower, "base/d1/basefile").unwrap(), DEFAULT_CONTENT);
    assert_eq!(names(&fs, "base/d1"), ["basefile", "otherfile"]);
    assert_eq!(names(&fs, "base"), ["basefile", "d1"]);
    assert_eq!(names(&*upper, "base"), ["d1"]);
    assert_eq!(names(&*upper, "base/d1"), ["basefile"]);
}

#[test]
fn in_place_write_copies_up_the_lower_content() {
    let (fs, upper, lower) = env();
    let mut file = fs
        .open_file(
            "base/d1/basefile",
            OpenFlags::WRITE | OpenFlags::CREATE,
            0o644,
        )
        .unwrap();
    use std::io::Write;
    file.write_all(b"other content").unwrap();
    file.close().unwrap();

    let mut modified = DEFAULT_CONTENT.to_vec();
    modified[..13].copy_from_slice(b"other content");
    assert_eq!(ops::read_file(&fs, "base/d1/basefile").unwrap(), modified);
    assert_eq!(ops::read_file(&*lower, "base/d1/basefile").unwrap(), DEFAULT_CONTENT);
    assert_eq!(names(&*upper, "base/d1"), ["basefile"]);
}

#[test]
fn marker_names_are_reserved() {
    let (fs, _, _) = env();
    assert_eq!(
        fs.create("base/.wh.x").unwrap_err().kind(),
        ErrorKind::InvalidName
    );
    assert_eq!(
        fs.mkdir(&format!("base/{}", super::OPAQUE_MARKER), 0o777)
            .unwrap_err()
            .kind(),
        ErrorKind::InvalidName
    );
    // Markers never show up through reads either.
    fs.remove("base/basefile").unwrap();
    assert_eq!(
        fs.stat("base/.wh.basefile").unwrap_err().kind(),
        ErrorKind::NotFound
    );
}

#[test]
fn chmod_copies_a_lower_file_up() {
    let (fs, upper, lower) = env();
    fs.chmod("base/d1/basefile", 0o600).unwrap();

    assert_eq!(fs.stat("base/d1/basefile").unwrap().mode, 0o600);
    assert_eq!(lower.stat("base/d1/basefile").unwrap().mode, 0o644);
    assert_eq!(ops::read_file(&*upper, "base/d1/basefile").unwrap(), DEFAULT_CONTENT);
}

#[test]
fn remove_refuses_non_empty_merged_directories() {
    let (fs, _, _) = env();
    assert_eq!(
        fs.remove("base/d1").unwrap_err().kind(),
        ErrorKind::NotEmpty
    );
    assert_eq!(fs.remove("/").unwrap_err().kind(), ErrorKind::Permission);
}

#[test]
fn rename_within_the_upper_layer() {
    let (fs, upper, _) = env();
    ops::write_file(&fs, "fresh", b"upper only", 0o644).unwrap();
    fs.rename("fresh", "renamed").unwrap();
    assert_eq!(ops::read_file(&fs, "renamed").unwrap(), b"upper only");
    assert!(names(&*upper, "/").contains(&"renamed".to_owned()));
}

#[test]
fn rename_of_a_lower_only_node_is_rejected() {
    let (fs, _, _) = env();
    assert_eq!(
        fs.rename("base/basefile", "base/moved").unwrap_err().kind(),
        ErrorKind::CrossDevice
    );
    assert_eq!(
        fs.rename("base/basefile", "base/d1/basefile")
            .unwrap_err()
            .kind(),
        ErrorKind::AlreadyExists
    );
}

#[test]
fn symlinks_resolve_per_layer() {
    let (fs, _, lower) = env();
    lower.symlink("base/basefile", "lowerlink").unwrap();
    assert_eq!(fs.readlink("lowerlink").unwrap(), "base/basefile");

    fs.symlink("base/d1", "upperlink").unwrap();
    assert_eq!(fs.readlink("upperlink").unwrap(), "base/d1");
    assert!(fs.lstat("upperlink").unwrap().is_symlink());
}

#[test]
fn create_requires_a_visible_parent() {
    let (fs, _, _) = env();
    assert!(fs.create("missing/f").unwrap_err().is_not_found());

    // A parent that only exists in the lower layer is materialized in the
    // upper layer on demand.
    ops::write_file(&fs, "base/d1/new", b"x", 0o644).unwrap();
    assert_eq!(
        names(&fs, "base/d1"),
        ["basefile", "new", "otherfile"]
    );
}
