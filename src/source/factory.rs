//! Backend registry and archive detection.
//!
//! The factory turns "a path or URL the user typed" into a mount source:
//! it resolves `file://` URLs, refuses remote schemes (transports live
//! above this crate), sniffs magic bytes at the head and — for trailer
//! formats like ZIP — the tail, falls back to extension hints, and breaks
//! ties with the caller's prioritized backend list followed by
//! registration order. Detection is a pure function of the input bytes and
//! those two lists, so repeated mounts always pick the same backend.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use log::debug;

use crate::compress::{peek_decompressed, Codec};
use crate::options::MountOptions;
use crate::source::asar::AsarMountSource;
use crate::source::folder::FolderMountSource;
use crate::source::single_file::SingleFileMountSource;
use crate::source::sqlar::SqlarMountSource;
use crate::source::tar::TarMountSource;
use crate::source::MountSource;
use crate::stream::{FileStream, SeekableStream};
use crate::{Error, Result};

/// Bytes sniffed from each end of a candidate archive.
const SNIFF_LENGTH: usize = 4096;

/// How far from the end the ZIP end-of-central-directory record may sit
/// (the record plus a maximal comment).
const EOCD_SEARCH_LENGTH: usize = 66 * 1024;

/// URL schemes that belong to remote transport backends outside this crate.
const REMOTE_SCHEMES: &[&str] = &[
    "http", "https", "ftp", "ssh", "sftp", "smb", "webdav", "s3", "ipfs", "git", "github",
    "dropbox",
];

/// One entry of the static backend registry.
#[derive(Debug, Clone, Copy)]
pub struct BackendInfo {
    /// Backend name as used in priority lists.
    pub name: &'static str,
    /// Whether this build can instantiate the backend.
    pub available: bool,
    /// Why not, when unavailable.
    pub unavailable_reason: &'static str,
}

/// The registry, in registration order (the detection tie-break).
pub const BACKENDS: &[BackendInfo] = &[
    BackendInfo {
        name: "tar",
        available: true,
        unavailable_reason: "",
    },
    BackendInfo {
        name: "zip",
        available: cfg!(feature = "zip-backend"),
        unavailable_reason: "zip-backend feature disabled",
    },
    BackendInfo {
        name: "sqlar",
        available: true,
        unavailable_reason: "",
    },
    BackendInfo {
        name: "asar",
        available: true,
        unavailable_reason: "",
    },
    BackendInfo {
        name: "single-file",
        available: true,
        unavailable_reason: "",
    },
    BackendInfo {
        name: "rar",
        available: false,
        unavailable_reason: "no RAR library in this build",
    },
    BackendInfo {
        name: "7z",
        available: false,
        unavailable_reason: "no 7z library in this build",
    },
    BackendInfo {
        name: "squashfs",
        available: false,
        unavailable_reason: "no SquashFS library in this build",
    },
    BackendInfo {
        name: "ext4",
        available: false,
        unavailable_reason: "no EXT4 library in this build",
    },
    BackendInfo {
        name: "fat",
        available: false,
        unavailable_reason: "no FAT library in this build",
    },
    BackendInfo {
        name: "libarchive",
        available: false,
        unavailable_reason: "no libarchive binding in this build",
    },
];

/// Looks up a registry entry by name.
pub fn backend_info(name: &str) -> Option<&'static BackendInfo> {
    BACKENDS.iter().find(|backend| backend.name == name)
}

/// What the sniffer decided an input is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DetectedFormat {
    /// A tar archive, raw or behind the codec.
    Tar(Option<Codec>),
    /// A ZIP archive.
    Zip,
    /// An SQLAR database.
    Sqlar,
    /// An ASAR archive.
    Asar,
    /// A compressed non-container file.
    SingleFile(Codec),
    /// A format whose backend is registered but unavailable.
    Unavailable(&'static str),
    /// Nothing recognized.
    Unknown,
}

impl DetectedFormat {
    fn backend_name(&self) -> &'static str {
        match self {
            DetectedFormat::Tar(_) => "tar",
            DetectedFormat::Zip => "zip",
            DetectedFormat::Sqlar => "sqlar",
            DetectedFormat::Asar => "asar",
            DetectedFormat::SingleFile(_) => "single-file",
            DetectedFormat::Unavailable(name) => name,
            DetectedFormat::Unknown => "",
        }
    }
}

/// Resolves a mount spec (local path or URL) to a local path.
///
/// Remote schemes and `::`-chained URLs are recognized and reported as
/// unavailable backends; callers with their own transport open streams and
/// use [`open_from_stream`].
pub fn resolve_spec(spec: &str) -> Result<PathBuf> {
    if spec.contains("::") {
        let chain: Vec<&str> = spec.split("::").collect();
        for part in &chain {
            if let Some((scheme, _)) = part.split_once("://") {
                if REMOTE_SCHEMES.contains(&scheme) {
                    return Err(Error::dependency_missing(
                        format!("remote/{scheme}"),
                        "remote transports are provided by the embedding application",
                    ));
                }
            }
        }
        return Err(Error::invalid_path(format!(
            "unsupported URL chain '{spec}'"
        )));
    }
    if let Some((scheme, rest)) = spec.split_once("://") {
        if scheme == "file" {
            return Ok(PathBuf::from(rest));
        }
        if REMOTE_SCHEMES.contains(&scheme) {
            return Err(Error::dependency_missing(
                format!("remote/{scheme}"),
                "remote transports are provided by the embedding application",
            ));
        }
        return Err(Error::invalid_path(format!("unknown URL scheme '{scheme}'")));
    }
    Ok(PathBuf::from(spec))
}

/// Sniffs the format of a seekable stream.
///
/// `extension` is the extension hint used when no signature matches.
pub fn detect_format(
    stream: &Arc<dyn SeekableStream>,
    extension: Option<&str>,
    options: &MountOptions,
) -> Result<DetectedFormat> {
    let head = stream.read_range(0, SNIFF_LENGTH)?;
    let tail_start = stream.size().saturating_sub(EOCD_SEARCH_LENGTH as u64);
    let mut candidates = Vec::new();

    // Head signatures first.
    if head.len() >= 265 && (&head[257..262] == b"ustar") {
        candidates.push(DetectedFormat::Tar(None));
    }
    if let Some(codec) = Codec::sniff(&head) {
        // A compressed stream may still be a tar; peek at the first
        // decompressed block to decide.
        let peeked = peek_decompressed(stream, codec, 512)?;
        if peeked.len() >= 262 && &peeked[257..262] == b"ustar" {
            candidates.push(DetectedFormat::Tar(Some(codec)));
        } else {
            candidates.push(DetectedFormat::SingleFile(codec));
        }
    }
    if head.starts_with(b"PK\x03\x04") || head.starts_with(b"PK\x05\x06") {
        candidates.push(DetectedFormat::Zip);
    }
    if head.starts_with(b"SQLite format 3\0") {
        candidates.push(DetectedFormat::Sqlar);
    }
    if head.len() >= 16 && head[0..4] == [4, 0, 0, 0] {
        candidates.push(DetectedFormat::Asar);
    }
    if head.starts_with(b"Rar!\x1A\x07") {
        candidates.push(DetectedFormat::Unavailable("rar"));
    }
    if head.starts_with(&[0x37, 0x7A, 0xBC, 0xAF, 0x27, 0x1C]) {
        candidates.push(DetectedFormat::Unavailable("7z"));
    }
    if head.starts_with(b"hsqs") {
        candidates.push(DetectedFormat::Unavailable("squashfs"));
    }
    if head.len() > 1082 && head[1080] == 0x53 && head[1081] == 0xEF {
        candidates.push(DetectedFormat::Unavailable("ext4"));
    }

    // Trailer signatures: a ZIP self-extractor has its EOCD record near
    // the end even when the head is an executable.
    if !candidates.iter().any(|c| *c == DetectedFormat::Zip) {
        let tail = stream.read_range(tail_start, EOCD_SEARCH_LENGTH)?;
        if tail
            .windows(4)
            .rev()
            .any(|window| window == b"PK\x05\x06")
        {
            candidates.push(DetectedFormat::Zip);
        }
    }

    // Extension hints close the gap for magic-less formats.
    if candidates.is_empty() {
        if let Some(extension) = extension {
            match extension.to_ascii_lowercase().as_str() {
                "tar" => candidates.push(DetectedFormat::Tar(None)),
                "zip" | "jar" => candidates.push(DetectedFormat::Zip),
                "sqlar" => candidates.push(DetectedFormat::Sqlar),
                "asar" => candidates.push(DetectedFormat::Asar),
                "rar" => candidates.push(DetectedFormat::Unavailable("rar")),
                "7z" => candidates.push(DetectedFormat::Unavailable("7z")),
                _ => {}
            }
        }
    }

    if candidates.is_empty() {
        return Ok(DetectedFormat::Unknown);
    }

    // The caller's priority list reorders candidates; registration order
    // breaks remaining ties (the sort is stable).
    let priority = |format: &DetectedFormat| {
        options
            .prioritized_backends
            .iter()
            .position(|name| name == format.backend_name())
            .unwrap_or(usize::MAX)
    };
    candidates.sort_by_key(priority);
    debug!("format candidates (post-priority): {candidates:?}");
    Ok(candidates.into_iter().next().expect("nonempty candidates"))
}

/// Opens a mount source for a path or URL.
pub fn open_mount_source(spec: &str, options: &MountOptions) -> Result<Arc<dyn MountSource>> {
    let path = resolve_spec(spec)?;
    if path.is_dir() {
        return Ok(Arc::new(FolderMountSource::new(path)?));
    }
    if !path.exists() {
        return Err(Error::not_found(path.display().to_string()));
    }

    let extension = path
        .extension()
        .map(|extension| extension.to_string_lossy().into_owned());
    let stream: Arc<dyn SeekableStream> = Arc::new(FileStream::open(&path)?);
    let format = detect_format(&stream, extension.as_deref(), options)?;
    debug!("detected {} as {:?}", path.display(), format);

    match format {
        DetectedFormat::Tar(_) => {
            Ok(Arc::new(TarMountSource::open(&path, options)?))
        }
        #[cfg(feature = "zip-backend")]
        DetectedFormat::Zip => Ok(Arc::new(
            crate::source::zip::ZipMountSource::open(&path, options)?,
        )),
        #[cfg(not(feature = "zip-backend"))]
        DetectedFormat::Zip => Err(Error::dependency_missing(
            "zip",
            "zip-backend feature disabled",
        )),
        DetectedFormat::Sqlar => Ok(Arc::new(SqlarMountSource::open(&path, options)?)),
        DetectedFormat::Asar => Ok(Arc::new(AsarMountSource::open(&path)?)),
        DetectedFormat::SingleFile(_) => {
            Ok(Arc::new(SingleFileMountSource::open(&path, options)?))
        }
        DetectedFormat::Unavailable(backend) => {
            let reason = backend_info(backend)
                .map(|info| info.unavailable_reason)
                .unwrap_or("backend not registered");
            Err(Error::dependency_missing(backend, reason))
        }
        DetectedFormat::Unknown => Err(Error::dependency_missing(
            "auto",
            format!("cannot detect archive format of {}", path.display()),
        )),
    }
}

/// Opens a mount source from an arbitrary seekable stream (remote objects,
/// nested archive members). `name_hint` supplies the extension hint.
pub fn open_from_stream(
    stream: Arc<dyn SeekableStream>,
    name_hint: &str,
    options: &MountOptions,
) -> Result<Arc<dyn MountSource>> {
    let extension = Path::new(name_hint)
        .extension()
        .map(|extension| extension.to_string_lossy().into_owned());
    let format = detect_format(&stream, extension.as_deref(), options)?;

    match format {
        DetectedFormat::Tar(_) => Ok(Arc::new(TarMountSource::from_stream(stream, options)?)),
        #[cfg(feature = "zip-backend")]
        DetectedFormat::Zip => Ok(Arc::new(crate::source::zip::ZipMountSource::from_stream(
            stream, options,
        )?)),
        #[cfg(not(feature = "zip-backend"))]
        DetectedFormat::Zip => Err(Error::dependency_missing(
            "zip",
            "zip-backend feature disabled",
        )),
        DetectedFormat::Asar => Ok(Arc::new(AsarMountSource::from_stream(stream, None)?)),
        DetectedFormat::SingleFile(codec) => Ok(Arc::new(SingleFileMountSource::from_stream(
            stream,
            codec,
            name_hint,
            0,
            options,
        )?)),
        DetectedFormat::Sqlar => Err(Error::dependency_missing(
            "sqlar",
            "sqlar requires a local file, not a stream",
        )),
        DetectedFormat::Unavailable(backend) => {
            let reason = backend_info(backend)
                .map(|info| info.unavailable_reason)
                .unwrap_or("backend not registered");
            Err(Error::dependency_missing(backend, reason))
        }
        DetectedFormat::Unknown => Err(Error::dependency_missing(
            "auto",
            format!("cannot detect archive format of {name_hint}"),
        )),
    }
}

/// Returns `true` if a member with this name and head plausibly is an
/// archive worth recursing into.
pub fn looks_like_archive(name: &str, head: &[u8]) -> bool {
    if head.len() >= 262 && &head[257..262] == b"ustar" {
        return true;
    }
    if Codec::sniff(head).is_some()
        || head.starts_with(b"PK\x03\x04")
        || head.starts_with(b"SQLite format 3\0")
    {
        return true;
    }
    let extension = Path::new(name)
        .extension()
        .map(|extension| extension.to_string_lossy().to_ascii_lowercase());
    matches!(
        extension.as_deref(),
        Some("tar" | "tgz" | "tbz2" | "txz" | "tzst" | "zip" | "jar" | "sqlar" | "asar")
    )
}
