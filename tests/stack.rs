//! Scenarios that compose several backends into one stack.

use std::sync::Arc;

use vfskit::{
    ops, path, ComposedFileSystem, ErrorKind, FileSystem, MemoryFileSystem, OverlayFileSystem,
    ProjectionFileSystem,
};

fn names(fs: &dyn FileSystem, dir: &str) -> Vec<String> {
    ops::read_dir_names(fs, dir).unwrap()
}

#[test]
fn projection_of_an_overlay_stays_confined() {
    let upper = Arc::new(MemoryFileSystem::new());
    let lower = Arc::new(MemoryFileSystem::new());
    lower.mkdir_all("/app/etc", 0o755).unwrap();
    ops::write_file(&*lower, "/app/etc/config", b"lower config", 0o644).unwrap();

    let overlay = Arc::new(OverlayFileSystem::new(upper.clone(), lower));
    let projected = ProjectionFileSystem::new(overlay, "/app").unwrap();

    // The lower content is visible through the projected overlay root.
    assert_eq!(names(&projected, "/"), ["etc"]);
    assert_eq!(
        ops::read_file(&projected, "/etc/config").unwrap(),
        b"lower config"
    );

    // Escaping upwards only reaches the projected root.
    assert_eq!(names(&projected, "../.."), ["etc"]);

    // A write through the projection lands in the overlay's upper layer
    // under the projected subtree.
    ops::write_file(&projected, "/etc/config", b"patched", 0o644).unwrap();
    assert_eq!(ops::read_file(&projected, "/etc/config").unwrap(), b"patched");
    assert_eq!(
        ops::read_file(&*upper, "/app/etc/config").unwrap(),
        b"patched"
    );
}

#[test]
fn overlay_mounted_into_a_composition() {
    let root = Arc::new(MemoryFileSystem::new());
    let upper = Arc::new(MemoryFileSystem::new());
    let lower = Arc::new(MemoryFileSystem::new());
    lower.mkdir_all("/data", 0o755).unwrap();
    ops::write_file(&*lower, "/data/seed", b"seed", 0o644).unwrap();

    let compose = ComposedFileSystem::new(root.clone());
    compose.mkdir("/merged", 0o755).unwrap();
    compose
        .mount(
            "/merged",
            Arc::new(OverlayFileSystem::new(upper.clone(), lower)),
        )
        .unwrap();

    assert_eq!(names(&compose, "/merged/data"), ["seed"]);

    // Deleting through the mount writes the whiteout into the overlay's
    // upper layer, not into the composition root.
    compose.remove("/merged/data/seed").unwrap();
    assert_eq!(names(&compose, "/merged/data"), Vec::<String>::new());
    assert_eq!(names(&*upper, "/data"), [".wh.seed"]);
    assert!(names(&*root, "/").contains(&"merged".to_owned()));

    // Renames cannot cross the mount boundary.
    ops::write_file(&compose, "/outside", b"", 0o644).unwrap();
    assert_eq!(
        compose
            .rename("/outside", "/merged/inside")
            .unwrap_err()
            .kind(),
        ErrorKind::CrossDevice
    );
}

#[test]
fn symlinks_cross_mountpoints_in_client_terms() {
    let root = Arc::new(MemoryFileSystem::new());
    let mounted = Arc::new(MemoryFileSystem::new());
    mounted.mkdir_all("/shared/bin", 0o755).unwrap();

    let compose = ComposedFileSystem::new(root);
    compose.mkdir("/mnt", 0o755).unwrap();
    compose.mount("/mnt", mounted).unwrap();

    // A rooted link target names the composed namespace, so it may point
    // into a different mount than the link itself.
    compose.symlink("/mnt/shared", "/link").unwrap();
    assert_eq!(names(&compose, "/link"), ["bin"]);
    assert!(compose.stat("/link/bin").unwrap().is_dir());
}

#[test]
fn path_helpers_operate_on_the_composed_view() {
    let root = Arc::new(MemoryFileSystem::new());
    let mounted = Arc::new(MemoryFileSystem::new());
    mounted.mkdir_all("/d1/d2", 0o755).unwrap();

    let compose = ComposedFileSystem::new(root);
    compose.mkdir("/mnt", 0o755).unwrap();
    compose.mount("/mnt", mounted).unwrap();
    compose.symlink("/mnt/d1", "/alias").unwrap();

    assert_eq!(
        path::eval_symlinks(&compose, "/alias/d2").unwrap(),
        "/mnt/d1/d2"
    );
    assert_eq!(path::abs(&compose, "mnt/d1").unwrap(), "/mnt/d1");
    assert_eq!(
        path::rel(&compose, "/mnt", "/mnt/d1/d2").unwrap(),
        "d1/d2"
    );
    assert_eq!(
        path::canonical(&compose, "/alias/d2/..", true).unwrap(),
        "/mnt/d1"
    );
}

#[test]
fn walk_traverses_a_merged_stack() {
    let upper = Arc::new(MemoryFileSystem::new());
    let lower = Arc::new(MemoryFileSystem::new());
    lower.mkdir_all("/a/b", 0o755).unwrap();
    ops::write_file(&*lower, "/a/b/f", b"", 0o644).unwrap();
    let overlay = OverlayFileSystem::new(upper, lower);
    ops::write_file(&overlay, "/a/g", b"", 0o644).unwrap();

    let mut seen: Vec<String> = ops::walk(&overlay, "/").map(|(path, _)| path).collect();
    seen.sort();
    assert_eq!(seen, ["/a", "/a/b", "/a/b/f", "/a/g"]);
}
