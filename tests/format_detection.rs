//! Backend auto-detection across container formats.

mod common;

use arcmount::source::{read_member, MountSource};
use arcmount::{mount, Error, MountOptions};

#[test]
fn detects_tar_by_magic_regardless_of_name() {
    let dir = tempfile::tempdir().unwrap();
    let archive = common::write_archive(
        dir.path(),
        "innocent.bin",
        &common::build_tar(&[("x", b"tar!")]),
    );
    let root = mount(&[archive.to_str().unwrap()], &MountOptions::default()).unwrap();
    assert_eq!(read_member(root.as_ref(), "/x").unwrap(), b"tar!");
}

#[cfg(feature = "zip-backend")]
#[test]
fn detects_and_mounts_zip() {
    use std::io::Write;
    let mut writer = zip_writer();
    writer
        .start_file("hello.txt", zip_file_options())
        .unwrap();
    writer.write_all(b"zipped").unwrap();
    let bytes = writer.finish().unwrap().into_inner();

    let dir = tempfile::tempdir().unwrap();
    let archive = common::write_archive(dir.path(), "data.zip", &bytes);
    let root = mount(&[archive.to_str().unwrap()], &MountOptions::default()).unwrap();
    assert_eq!(read_member(root.as_ref(), "/hello.txt").unwrap(), b"zipped");
}

#[cfg(feature = "zip-backend")]
fn zip_writer() -> zip::ZipWriter<std::io::Cursor<Vec<u8>>> {
    zip::ZipWriter::new(std::io::Cursor::new(Vec::new()))
}

#[cfg(feature = "zip-backend")]
fn zip_file_options() -> zip::write::FileOptions {
    zip::write::FileOptions::default()
        .compression_method(zip::CompressionMethod::Deflated)
}

#[cfg(feature = "gzip")]
#[test]
fn single_compressed_file_mounts_as_one_entry() {
    let dir = tempfile::tempdir().unwrap();
    let archive = common::write_archive(
        dir.path(),
        "notes.txt.gz",
        &common::gzip(b"not a container, just text\n"),
    );
    let root = mount(&[archive.to_str().unwrap()], &MountOptions::default()).unwrap();
    let listing = root.list("/").unwrap().unwrap();
    assert_eq!(listing.len(), 1);
    assert_eq!(listing[0].0, "notes.txt");
    assert_eq!(
        read_member(root.as_ref(), "/notes.txt").unwrap(),
        b"not a container, just text\n"
    );
}

#[test]
fn folder_spec_mounts_directly() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("f"), b"folder file").unwrap();
    let root = mount(&[dir.path().to_str().unwrap()], &MountOptions::default()).unwrap();
    assert_eq!(read_member(root.as_ref(), "/f").unwrap(), b"folder file");
}

#[test]
fn remote_urls_report_missing_transport() {
    let err = mount(
        &["https://example.org/archive.tar"],
        &MountOptions::default(),
    )
    .unwrap_err();
    assert!(matches!(err, Error::DependencyMissing { .. }));
}

#[test]
fn unavailable_format_names_its_backend() {
    let dir = tempfile::tempdir().unwrap();
    let mut rar = b"Rar!\x1A\x07\x01\x00".to_vec();
    rar.resize(2048, 0);
    let archive = common::write_archive(dir.path(), "locked.rar", &rar);
    let err = mount(&[archive.to_str().unwrap()], &MountOptions::default()).unwrap_err();
    match err {
        Error::DependencyMissing { backend, .. } => assert_eq!(backend, "rar"),
        other => panic!("unexpected error {other}"),
    }
}

#[test]
fn detection_is_stable_across_mounts() {
    let dir = tempfile::tempdir().unwrap();
    let archive = common::write_archive(
        dir.path(),
        "stable.tar",
        &common::build_tar(&[("k", b"v")]),
    );
    for _ in 0..3 {
        let root = mount(&[archive.to_str().unwrap()], &MountOptions::default()).unwrap();
        assert_eq!(read_member(root.as_ref(), "/k").unwrap(), b"v");
    }
}

#[test]
fn mount_missing_path_is_not_found() {
    let err = mount(&["/definitely/not/here.tar"], &MountOptions::default()).unwrap_err();
    assert!(matches!(err, Error::NotFound { .. }));
}
