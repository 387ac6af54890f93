//! End-to-end mounting scenarios.
//!
//! Each test mirrors a real user workflow: mount something, read members,
//! compare against reference bytes produced independently of the mount
//! path.

mod common;

use std::sync::Arc;

use arcmount::source::{read_member, MountSource};
use arcmount::{mount, EntryKind, MountOptions, SeekableStream, WriteOverlay};

#[test]
fn single_file_tar() {
    let dir = tempfile::tempdir().unwrap();
    let archive = common::write_archive(
        dir.path(),
        "single-file.tar",
        &common::build_tar(&[("bar", b"foo\n")]),
    );

    let root = mount(&[archive.to_str().unwrap()], &MountOptions::default()).unwrap();
    assert_eq!(read_member(root.as_ref(), "/bar").unwrap(), b"foo\n");

    let listing = root.list("/").unwrap().unwrap();
    assert_eq!(listing.len(), 1);
    assert_eq!(listing[0].0, "bar");
    assert_eq!(listing[0].1.size, 4);
}

#[test]
fn nested_tar_with_unlimited_recursion() {
    let dir = tempfile::tempdir().unwrap();
    let archive =
        common::write_archive(dir.path(), "nested-tar.tar", &common::build_nested_tar());

    let options = MountOptions::new().recursion_depth(-1);
    let root = mount(&[archive.to_str().unwrap()], &options).unwrap();

    assert_eq!(
        read_member(root.as_ref(), "/foo/lighter.tar/fighter/bar").unwrap(),
        b"foo\n"
    );
    assert_eq!(
        read_member(root.as_ref(), "/foo/lighter.tar/fighter/ufo").unwrap(),
        b"iriya\n"
    );

    // Without recursion the member stays a plain file.
    let flat = mount(&[archive.to_str().unwrap()], &MountOptions::default()).unwrap();
    let entry = flat.lookup("/foo/lighter.tar").unwrap().unwrap();
    assert_eq!(entry.kind, EntryKind::Regular);
    assert!(flat
        .lookup("/foo/lighter.tar/fighter/bar")
        .unwrap()
        .is_none());
}

#[test]
fn updated_file_versions() {
    let dir = tempfile::tempdir().unwrap();
    let archive =
        common::write_archive(dir.path(), "updated-file.tar", &common::build_updated_tar());

    let options = MountOptions::new().file_versions(true);
    let root = mount(&[archive.to_str().unwrap()], &options).unwrap();

    assert_eq!(root.versions("/foo/fighter/ufo").unwrap(), 3);
    assert_eq!(
        read_member(root.as_ref(), "/foo/fighter/ufo.versions/1").unwrap(),
        b"first"
    );
    assert_eq!(
        read_member(root.as_ref(), "/foo/fighter/ufo.versions/2").unwrap(),
        b"second!"
    );
    assert_eq!(
        read_member(root.as_ref(), "/foo/fighter/ufo.versions/3").unwrap(),
        b"third!!!"
    );
    // The plain path resolves to the highest version.
    assert_eq!(
        read_member(root.as_ref(), "/foo/fighter/ufo").unwrap(),
        read_member(root.as_ref(), "/foo/fighter/ufo.versions/3").unwrap()
    );
}

#[test]
fn sparse_member_reads_match_reference() {
    let region_a = vec![0xAAu8; 4096];
    let region_b = vec![0xBBu8; 4096];
    let fixture = common::build_pax_sparse_member(
        "01.sparse1.bin",
        &[(0, region_a.as_slice()), (8192, region_b.as_slice())],
        16384,
    );

    let dir = tempfile::tempdir().unwrap();
    let archive =
        common::write_archive(dir.path(), "gnu-sparse-files.tar", &fixture.tar_bytes);
    let root = mount(&[archive.to_str().unwrap()], &MountOptions::default()).unwrap();

    let entry = root.lookup("/01.sparse1.bin").unwrap().unwrap();
    assert_eq!(entry.size, 16384);

    let got = read_member(root.as_ref(), "/01.sparse1.bin").unwrap();
    assert_eq!(got, fixture.reference);

    // Random ranges through the holes agree with the reference too.
    let stream = root.open(&entry).unwrap();
    for &(a, b) in &[(0usize, 100usize), (4000, 4200), (8000, 8400), (12000, 16384)] {
        assert_eq!(
            stream.read_range(a as u64, b - a).unwrap(),
            &fixture.reference[a..b],
            "range {a}..{b}"
        );
    }
}

#[test]
fn union_mount_of_two_folders() {
    let folder1 = tempfile::tempdir().unwrap();
    std::fs::create_dir(folder1.path().join("subfolder")).unwrap();
    std::fs::write(folder1.path().join("subfolder/world"), b"hello\n").unwrap();
    let folder2 = tempfile::tempdir().unwrap();
    std::fs::write(folder2.path().join("ufo"), b"iriya\n").unwrap();

    let root = mount(
        &[
            folder1.path().to_str().unwrap(),
            folder2.path().to_str().unwrap(),
        ],
        &MountOptions::default(),
    )
    .unwrap();

    assert_eq!(
        read_member(root.as_ref(), "/subfolder/world").unwrap(),
        b"hello\n"
    );
    assert_eq!(read_member(root.as_ref(), "/ufo").unwrap(), b"iriya\n");
}

#[test]
fn union_last_wins_across_sources() {
    let folder1 = tempfile::tempdir().unwrap();
    std::fs::write(folder1.path().join("shared"), b"early").unwrap();
    let folder2 = tempfile::tempdir().unwrap();
    std::fs::write(folder2.path().join("shared"), b"late").unwrap();

    let root = mount(
        &[
            folder1.path().to_str().unwrap(),
            folder2.path().to_str().unwrap(),
        ],
        &MountOptions::default(),
    )
    .unwrap();
    assert_eq!(read_member(root.as_ref(), "/shared").unwrap(), b"late");

    // Disabling the union shows the sources side by side instead.
    let options = MountOptions::new().disable_union_mount(true);
    let root = mount(
        &[
            folder1.path().to_str().unwrap(),
            folder2.path().to_str().unwrap(),
        ],
        &options,
    )
    .unwrap();
    assert_eq!(read_member(root.as_ref(), "/1/shared").unwrap(), b"early");
    assert_eq!(read_member(root.as_ref(), "/2/shared").unwrap(), b"late");
}

#[test]
fn overlay_delete_then_commit() {
    use arcmount::source::tar::TarMountSource;

    let dir = tempfile::tempdir().unwrap();
    let inner = common::build_tar(&[
        ("foo/fighter/ufo", b"iriya\n"),
        ("foo/fighter/bar", b"foo\n"),
    ]);
    let archive = common::write_archive(dir.path(), "base.tar", &inner);

    let tar = Arc::new(TarMountSource::open(&archive, &MountOptions::default()).unwrap());
    let overlay = WriteOverlay::new(
        Arc::clone(&tar) as Arc<dyn MountSource>,
        dir.path().join("overlay"),
    )
    .unwrap();

    overlay.unlink("/foo/fighter/ufo").unwrap();
    assert!(overlay.lookup("/foo/fighter/ufo").unwrap().is_none());
    assert!(overlay.lookup("/foo/fighter/bar").unwrap().is_some());

    let mut committed = Vec::new();
    let stats = arcmount::commit_overlay(&tar, &overlay, &mut committed).unwrap();
    assert_eq!(stats.entries_removed, 1);

    // The committed archive has one fewer entry and remounts cleanly.
    let committed_path = common::write_archive(dir.path(), "committed.tar", &committed);
    let remounted = mount(
        &[committed_path.to_str().unwrap()],
        &MountOptions::default(),
    )
    .unwrap();
    assert!(remounted.lookup("/foo/fighter/ufo").unwrap().is_none());
    assert_eq!(
        read_member(remounted.as_ref(), "/foo/fighter/bar").unwrap(),
        b"foo\n"
    );
}

#[cfg(feature = "gzip")]
#[test]
fn compressed_nested_mounting() {
    let dir = tempfile::tempdir().unwrap();
    let compressed = common::gzip(&common::build_nested_tar());
    let archive = common::write_archive(dir.path(), "nested.tar.gz", &compressed);

    let options = MountOptions::new().recursion_depth(-1);
    let root = mount(&[archive.to_str().unwrap()], &options).unwrap();
    assert_eq!(
        read_member(root.as_ref(), "/foo/lighter.tar/fighter/bar").unwrap(),
        b"foo\n"
    );
}

#[test]
fn strip_recursive_tar_extension_rewrites_mount_points() {
    let dir = tempfile::tempdir().unwrap();
    let archive =
        common::write_archive(dir.path(), "nested-tar.tar", &common::build_nested_tar());

    let options = MountOptions::new()
        .recursion_depth(-1)
        .strip_recursive_tar_extension(true);
    let root = mount(&[archive.to_str().unwrap()], &options).unwrap();
    assert_eq!(
        read_member(root.as_ref(), "/foo/lighter/fighter/bar").unwrap(),
        b"foo\n"
    );
}

#[test]
fn overlay_via_mount_options() {
    let dir = tempfile::tempdir().unwrap();
    let archive = common::write_archive(
        dir.path(),
        "base.tar",
        &common::build_tar(&[("readme", b"original")]),
    );

    let options = MountOptions::new().write_overlay(dir.path().join("upper"));
    let root = mount(&[archive.to_str().unwrap()], &options).unwrap();
    assert_eq!(read_member(root.as_ref(), "/readme").unwrap(), b"original");
    // The root is the overlay itself; writes go through the concrete type.
}
