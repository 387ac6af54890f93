//! Shared fixture builders for the integration suites.
//!
//! Archives are built in memory at test time — plain tars through the `tar`
//! crate, GNU/pax dialect edge cases (sparse members, pax overrides) as raw
//! blocks — so the suites need no checked-in binary fixtures.

#![allow(dead_code)] // not every suite uses every helper

use std::io::Write;
use std::path::{Path, PathBuf};

/// Builds a plain ustar archive with the given members.
pub fn build_tar(entries: &[(&str, &[u8])]) -> Vec<u8> {
    let mut builder = tar::Builder::new(Vec::new());
    for (path, data) in entries {
        let mut header = tar::Header::new_ustar();
        header.set_size(data.len() as u64);
        header.set_mode(0o644);
        header.set_mtime(1_600_000_000);
        header.set_cksum();
        builder.append_data(&mut header, path, *data).unwrap();
    }
    builder.into_inner().unwrap()
}

/// Builds `nested.tar`: an outer tar holding `foo/lighter.tar`, which in
/// turn holds `fighter/bar` with contents `foo\n`.
pub fn build_nested_tar() -> Vec<u8> {
    let inner = build_tar(&[("fighter/bar", b"foo\n"), ("fighter/ufo", b"iriya\n")]);
    build_tar(&[("foo/lighter.tar", inner.as_slice())])
}

/// Builds a tar where `foo/fighter/ufo` appears three times.
pub fn build_updated_tar() -> Vec<u8> {
    build_tar(&[
        ("foo/fighter/ufo", b"first"),
        ("foo/fighter/ufo", b"second!"),
        ("foo/fighter/ufo", b"third!!!"),
    ])
}

/// Writes `bytes` to `name` under `dir` and returns the path.
pub fn write_archive(dir: &Path, name: &str, bytes: &[u8]) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, bytes).unwrap();
    path
}

/// gzip-compresses `data` as a single member.
#[cfg(feature = "gzip")]
pub fn gzip(data: &[u8]) -> Vec<u8> {
    let mut encoder = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
    encoder.write_all(data).unwrap();
    encoder.finish().unwrap()
}

/// gzip-compresses `data` in `chunk` -sized members (pigz-style), giving
/// the decoder real restart points.
#[cfg(feature = "gzip")]
pub fn gzip_multi_member(data: &[u8], chunk: usize) -> Vec<u8> {
    let mut out = Vec::new();
    for part in data.chunks(chunk) {
        out.extend_from_slice(&gzip(part));
    }
    out
}

/// Fills in the checksum field of a raw tar header block.
pub fn seal_header(block: &mut [u8; 512]) {
    let checksum: u64 = block
        .iter()
        .enumerate()
        .map(|(i, &b)| {
            if (148..156).contains(&i) {
                b' ' as u64
            } else {
                b as u64
            }
        })
        .sum();
    block[148..154].copy_from_slice(format!("{checksum:06o}").as_bytes());
    block[154] = 0;
    block[155] = b' ';
}

/// Builds a raw ustar header block (checksum sealed).
pub fn raw_header(name: &str, size: u64, type_byte: u8) -> [u8; 512] {
    let mut block = [0u8; 512];
    block[..name.len()].copy_from_slice(name.as_bytes());
    block[100..107].copy_from_slice(b"0000644");
    block[108..115].copy_from_slice(b"0000000");
    block[116..123].copy_from_slice(b"0000000");
    block[124..135].copy_from_slice(format!("{size:011o}").as_bytes());
    block[136..147].copy_from_slice(b"13737000000");
    block[156] = type_byte;
    block[257..265].copy_from_slice(b"ustar\000");
    seal_header(&mut block);
    block
}

/// One pax record, `"<len> <key>=<value>\n"` framed.
pub fn pax_record(key: &str, value: &str) -> Vec<u8> {
    let body_len = key.len() + value.len() + 2;
    let mut record_len = body_len + 1;
    while record_len.to_string().len() + 1 + body_len != record_len {
        record_len = record_len.to_string().len() + 1 + body_len;
    }
    format!("{record_len} {key}={value}\n").into_bytes()
}

/// Pads `data` to a 512-byte multiple.
pub fn pad_block(mut data: Vec<u8>) -> Vec<u8> {
    data.resize(data.len().div_ceil(512) * 512, 0);
    data
}

/// A sparse member fixture: the raw tar bytes of one pax-1.0 sparse member
/// plus the materialized reference contents.
pub struct SparseFixture {
    pub tar_bytes: Vec<u8>,
    pub reference: Vec<u8>,
}

/// Builds a pax-1.0 sparse member named `name` with data regions
/// `(offset, contents)` over a logical size of `real_size`.
pub fn build_pax_sparse_member(
    name: &str,
    regions: &[(u64, &[u8])],
    real_size: u64,
) -> SparseFixture {
    // pax local header carrying the sparse attributes.
    let mut pax_payload = Vec::new();
    pax_payload.extend_from_slice(&pax_record("GNU.sparse.major", "1"));
    pax_payload.extend_from_slice(&pax_record("GNU.sparse.minor", "0"));
    pax_payload.extend_from_slice(&pax_record("GNU.sparse.name", name));
    pax_payload.extend_from_slice(&pax_record(
        "GNU.sparse.realsize",
        &real_size.to_string(),
    ));

    let mut tar_bytes = Vec::new();
    tar_bytes
        .extend_from_slice(&raw_header("./PaxHeaders/sparse", pax_payload.len() as u64, b'x'));
    tar_bytes.extend_from_slice(&pad_block(pax_payload));

    // The member data starts with the decimal sparse map.
    let mut map_text = format!("{}\n", regions.len()).into_bytes();
    for (offset, contents) in regions {
        map_text.extend_from_slice(format!("{offset}\n{}\n", contents.len()).as_bytes());
    }
    let map_block = pad_block(map_text);

    let mut data = Vec::new();
    for (_, contents) in regions {
        data.extend_from_slice(contents);
    }
    let stored = pad_block(data);

    let member_size = (map_block.len() + stored.len()) as u64;
    tar_bytes.extend_from_slice(&raw_header(
        &format!("GNUSparseFile.0/{name}"),
        member_size,
        b'0',
    ));
    tar_bytes.extend_from_slice(&map_block);
    tar_bytes.extend_from_slice(&stored);
    tar_bytes.extend_from_slice(&[0u8; 1024]);

    // Materialize the reference: holes are zeros.
    let mut reference = vec![0u8; real_size as usize];
    for (offset, contents) in regions {
        let at = *offset as usize;
        reference[at..at + contents.len()].copy_from_slice(contents);
    }

    SparseFixture {
        tar_bytes,
        reference,
    }
}
