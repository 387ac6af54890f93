//! Configuration consumed by the mount-source layer.
//!
//! This module provides [`MountOptions`], the single options struct threaded
//! through the factory, the indexers, and the composition layers. Options
//! that influence what ends up in a persistent index participate in
//! [`MountOptions::arg_hash`], which is stored alongside the index so a later
//! mount with different semantics can be warned about.

use std::path::PathBuf;

use crate::{Error, Result};

/// Default spacing between compression checkpoints (16 MiB of decompressed
/// output).
pub const DEFAULT_SEEK_POINT_SPACING: u64 = 16 * 1024 * 1024;

/// Default capacity of the per-mount lookup cache.
pub const DEFAULT_ENTRY_CACHE_SIZE: usize = 4096;

/// Default number of warm decoder cursors kept per compressed stream.
pub const DEFAULT_CURSOR_POOL_CAPACITY: usize = 4;

/// File-name encoding applied to container path bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathEncoding {
    /// Interpret path bytes as UTF-8 (the default).
    Utf8,
    /// Interpret path bytes as ISO-8859-1; every byte maps to a code point.
    Latin1,
}

impl PathEncoding {
    /// Parses an encoding name as accepted by the `encoding` option.
    pub fn from_name(name: &str) -> Result<Self> {
        match name.to_ascii_lowercase().as_str() {
            "utf-8" | "utf8" => Ok(PathEncoding::Utf8),
            "latin-1" | "latin1" | "iso-8859-1" => Ok(PathEncoding::Latin1),
            other => Err(Error::Encoding {
                encoding: other.to_string(),
            }),
        }
    }

    /// Returns the canonical name of this encoding.
    pub fn name(&self) -> &'static str {
        match self {
            PathEncoding::Utf8 => "utf-8",
            PathEncoding::Latin1 => "latin-1",
        }
    }

    /// Decodes raw path bytes under this encoding.
    ///
    /// Fails with [`Error::Encoding`] when the bytes are not valid in the
    /// selected charset.
    pub fn decode(&self, bytes: &[u8]) -> Result<String> {
        match self {
            PathEncoding::Utf8 => std::str::from_utf8(bytes)
                .map(str::to_owned)
                .map_err(|_| Error::Encoding {
                    encoding: self.name().to_string(),
                }),
            PathEncoding::Latin1 => Ok(bytes.iter().map(|&b| b as char).collect()),
        }
    }
}

/// Tri-state switch for GNU-incremental handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GnuIncremental {
    /// Sample leading entries and decide automatically (the default).
    #[default]
    Auto,
    /// Force incremental prefix stripping on.
    On,
    /// Never strip incremental prefixes.
    Off,
}

/// A regex rewrite applied to paths.
#[derive(Debug, Clone)]
pub struct PathTransform {
    /// The pattern to match.
    pub pattern: regex::Regex,
    /// Replacement string, `$1`-style capture references allowed.
    pub replacement: String,
}

impl PathTransform {
    /// Compiles a transform from a pattern and replacement.
    pub fn new(pattern: &str, replacement: &str) -> Result<Self> {
        let pattern = regex::Regex::new(pattern)
            .map_err(|e| Error::invalid_path(format!("bad transform pattern: {e}")))?;
        Ok(Self {
            pattern,
            replacement: replacement.to_string(),
        })
    }

    /// Applies the transform to a path, returning the rewritten path.
    pub fn apply(&self, path: &str) -> String {
        self.pattern
            .replace(path, self.replacement.as_str())
            .into_owned()
    }
}

/// Parallelization level for decoder work.
///
/// `0` means "all cores"; `1` forces sequential decoding. The default maps
/// gzip to 1 — sequential reads beat `pread` when rotating disks cannot
/// sustain parallel seeks — and everything else to all cores.
#[derive(Debug, Clone)]
pub struct Parallelization {
    /// Level applied when no per-backend override matches.
    pub default_level: u32,
    /// Per-backend overrides, keyed by backend name.
    pub per_backend: Vec<(String, u32)>,
}

impl Default for Parallelization {
    fn default() -> Self {
        Self {
            default_level: 0,
            per_backend: vec![("gzip".to_string(), 1)],
        }
    }
}

impl Parallelization {
    /// Resolves the effective thread count for a backend.
    pub fn resolve(&self, backend: &str) -> usize {
        let level = self
            .per_backend
            .iter()
            .find(|(name, _)| name == backend)
            .map(|(_, level)| *level)
            .unwrap_or(self.default_level);
        if level == 0 {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
        } else {
            level as usize
        }
    }
}

/// Options consumed by the mount-source layer.
///
/// # Example
///
/// ```rust
/// use arcmount::MountOptions;
///
/// let options = MountOptions::new()
///     .recursion_depth(-1)
///     .ignore_zeros(true)
///     .file_versions(true);
/// assert!(options.validate().is_ok());
/// ```
#[derive(Debug, Clone)]
pub struct MountOptions {
    /// How deep to mount archives found inside archives.
    /// `-1` is unlimited, `0` disables recursive mounting.
    pub recursion_depth: i32,

    /// Continue parsing past zero blocks; enables concatenated tarballs and
    /// skipping isolated corrupt headers.
    pub ignore_zeros: bool,

    /// GNU-incremental prefix handling.
    pub gnu_incremental: GnuIncremental,

    /// Encoding applied to container path bytes.
    pub encoding: PathEncoding,

    /// Target spacing between compression checkpoints in decompressed bytes.
    pub seek_point_spacing: u64,

    /// Whether archive mtime participates in the index fingerprint check.
    /// Off by default because mtime changes spuriously during downloads.
    pub verify_mtime: bool,

    /// Discard any existing index and rebuild from scratch.
    pub recreate_index: bool,

    /// Explicit index database path; overrides placement logic entirely.
    pub index_path: Option<PathBuf>,

    /// Fallback directories tried in order when the archive's own directory
    /// is not writable. The first writable entry wins.
    pub index_folders: Vec<PathBuf>,

    /// Strip a trailing `.tar` from recursive mount points so
    /// `/archive/foo.tar/bar` becomes `/archive/foo/bar`.
    pub strip_recursive_tar_extension: bool,

    /// Rewrite applied to every archive member path.
    pub transform: Option<PathTransform>,

    /// Rewrite applied to recursive mount point names.
    pub transform_recursive_mount_point: Option<PathTransform>,

    /// Backend names tried first, in order, during format detection.
    pub prioritized_backends: Vec<String>,

    /// Decoder parallelization policy.
    pub parallelization: Parallelization,

    /// Password for encrypted members.
    pub password: Option<Vec<u8>>,

    /// File to read the password from (first line, without the newline).
    pub password_file: Option<PathBuf>,

    /// Present multiple sources side by side instead of merged.
    pub disable_union_mount: bool,

    /// Expose `.versions/` history directories.
    pub file_versions: bool,

    /// Folder backing the copy-on-write overlay, if any.
    pub write_overlay: Option<PathBuf>,

    /// Write overlay deletions back to the source archive on unmount.
    pub commit_overlay: bool,

    /// Containers with fewer entries than this are indexed in memory only.
    pub index_minimum_file_count: u64,

    /// Defer per-archive indexing until first access.
    pub lazy_mounting: bool,

    /// Capacity of the path → entry lookup cache.
    pub entry_cache_size: usize,

    /// Warm decoder cursors kept per compressed stream.
    pub cursor_pool_capacity: usize,
}

impl Default for MountOptions {
    fn default() -> Self {
        Self {
            recursion_depth: 0,
            ignore_zeros: false,
            gnu_incremental: GnuIncremental::Auto,
            encoding: PathEncoding::Utf8,
            seek_point_spacing: DEFAULT_SEEK_POINT_SPACING,
            verify_mtime: false,
            recreate_index: false,
            index_path: None,
            index_folders: Vec::new(),
            strip_recursive_tar_extension: false,
            transform: None,
            transform_recursive_mount_point: None,
            prioritized_backends: Vec::new(),
            parallelization: Parallelization::default(),
            password: None,
            password_file: None,
            disable_union_mount: false,
            file_versions: false,
            write_overlay: None,
            commit_overlay: false,
            index_minimum_file_count: 0,
            lazy_mounting: false,
            entry_cache_size: DEFAULT_ENTRY_CACHE_SIZE,
            cursor_pool_capacity: DEFAULT_CURSOR_POOL_CAPACITY,
        }
    }
}

impl MountOptions {
    /// Creates options with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the recursive-mount depth (`-1` unlimited, `0` off).
    pub fn recursion_depth(mut self, depth: i32) -> Self {
        self.recursion_depth = depth;
        self
    }

    /// Sets whether zero blocks terminate tar parsing.
    pub fn ignore_zeros(mut self, ignore: bool) -> Self {
        self.ignore_zeros = ignore;
        self
    }

    /// Sets the GNU-incremental handling mode.
    pub fn gnu_incremental(mut self, mode: GnuIncremental) -> Self {
        self.gnu_incremental = mode;
        self
    }

    /// Sets the path-byte encoding.
    pub fn encoding(mut self, encoding: PathEncoding) -> Self {
        self.encoding = encoding;
        self
    }

    /// Sets the checkpoint spacing in decompressed bytes.
    pub fn seek_point_spacing(mut self, bytes: u64) -> Self {
        self.seek_point_spacing = bytes;
        self
    }

    /// Sets whether mtime participates in fingerprint checks.
    pub fn verify_mtime(mut self, verify: bool) -> Self {
        self.verify_mtime = verify;
        self
    }

    /// Forces index recreation.
    pub fn recreate_index(mut self, recreate: bool) -> Self {
        self.recreate_index = recreate;
        self
    }

    /// Pins the index database to an explicit path.
    pub fn index_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.index_path = Some(path.into());
        self
    }

    /// Sets the ordered index fallback directories.
    pub fn index_folders(mut self, folders: Vec<PathBuf>) -> Self {
        self.index_folders = folders;
        self
    }

    /// Strips `.tar` from recursive mount point names.
    pub fn strip_recursive_tar_extension(mut self, strip: bool) -> Self {
        self.strip_recursive_tar_extension = strip;
        self
    }

    /// Sets the member-path transform.
    pub fn transform(mut self, transform: PathTransform) -> Self {
        self.transform = Some(transform);
        self
    }

    /// Sets the recursive mount point transform.
    pub fn transform_recursive_mount_point(mut self, transform: PathTransform) -> Self {
        self.transform_recursive_mount_point = Some(transform);
        self
    }

    /// Sets the prioritized backend list.
    pub fn prioritized_backends(mut self, backends: Vec<String>) -> Self {
        self.prioritized_backends = backends;
        self
    }

    /// Sets the password used for encrypted members.
    pub fn password(mut self, password: impl Into<Vec<u8>>) -> Self {
        self.password = Some(password.into());
        self
    }

    /// Disables the union merge of multiple sources.
    pub fn disable_union_mount(mut self, disable: bool) -> Self {
        self.disable_union_mount = disable;
        self
    }

    /// Enables `.versions/` history directories.
    pub fn file_versions(mut self, enable: bool) -> Self {
        self.file_versions = enable;
        self
    }

    /// Sets the copy-on-write overlay folder.
    pub fn write_overlay(mut self, folder: impl Into<PathBuf>) -> Self {
        self.write_overlay = Some(folder.into());
        self
    }

    /// Sets the lookup-cache capacity.
    pub fn entry_cache_size(mut self, size: usize) -> Self {
        self.entry_cache_size = size;
        self
    }

    /// Sets the warm-cursor pool capacity.
    pub fn cursor_pool_capacity(mut self, capacity: usize) -> Self {
        self.cursor_pool_capacity = capacity;
        self
    }

    /// Validates option combinations.
    pub fn validate(&self) -> Result<()> {
        if self.recursion_depth < -1 {
            return Err(Error::invalid_path(format!(
                "recursion_depth must be >= -1, got {}",
                self.recursion_depth
            )));
        }
        if self.seek_point_spacing == 0 {
            return Err(Error::invalid_path(
                "seek_point_spacing must be nonzero".to_string(),
            ));
        }
        if self.commit_overlay && self.write_overlay.is_none() {
            return Err(Error::invalid_path(
                "commit_overlay requires write_overlay".to_string(),
            ));
        }
        Ok(())
    }

    /// Resolves the effective password, reading `password_file` if needed.
    pub fn resolve_password(&self) -> Result<Option<Vec<u8>>> {
        if let Some(password) = &self.password {
            return Ok(Some(password.clone()));
        }
        if let Some(file) = &self.password_file {
            let contents = std::fs::read(file)?;
            let first_line = contents
                .split(|&b| b == b'\n')
                .next()
                .unwrap_or_default()
                .to_vec();
            return Ok(Some(first_line));
        }
        Ok(None)
    }

    /// Digest of the options that change what an index contains.
    ///
    /// Stored in the index `metadata` table; a later open with a different
    /// hash logs a warning but still uses the index.
    pub fn arg_hash(&self) -> u32 {
        let mut hasher = crc32fast::Hasher::new();
        hasher.update(&[self.ignore_zeros as u8]);
        hasher.update(match self.gnu_incremental {
            GnuIncremental::Auto => b"auto".as_slice(),
            GnuIncremental::On => b"on",
            GnuIncremental::Off => b"off",
        });
        hasher.update(self.encoding.name().as_bytes());
        hasher.update(&self.seek_point_spacing.to_le_bytes());
        if let Some(transform) = &self.transform {
            hasher.update(transform.pattern.as_str().as_bytes());
            hasher.update(transform.replacement.as_bytes());
        }
        for backend in &self.prioritized_backends {
            hasher.update(backend.as_bytes());
            hasher.update(b"\0");
        }
        hasher.finalize()
    }
}
