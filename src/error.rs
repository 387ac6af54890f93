//! Error types for mount-source operations.
//!
//! This module provides the [`Error`] enum which represents all failure modes
//! of the mount-source layer, along with a convenient [`Result<T>`] type
//! alias. The enum is flat on purpose: the filesystem adapter sitting above
//! this crate maps each kind to an `errno` value via [`Error::to_errno`] and
//! must not need to unwrap nested error chains to do so.
//!
//! # Error Handling
//!
//! All fallible operations in this crate return `Result<T, Error>`:
//!
//! ```rust,no_run
//! use arcmount::{MountOptions, MountSource, Result};
//! use arcmount::source::factory;
//!
//! fn list_root(path: &str) -> Result<()> {
//!     let source = factory::open_mount_source(path, &MountOptions::default())?;
//!     for (name, _entry) in source.list("/")?.unwrap_or_default() {
//!         println!("{name}");
//!     }
//!     Ok(())
//! }
//! ```

use std::io;

/// The main error type for mount-source operations.
///
/// Kinds fall into a few categories:
///
/// | Category | Variants |
/// |----------|----------|
/// | Path resolution | [`NotFound`][Self::NotFound], [`InvalidPath`][Self::InvalidPath] |
/// | Streams | [`NotSeekable`][Self::NotSeekable], [`DecoderError`][Self::DecoderError], [`Truncated`][Self::Truncated], [`ChecksumMismatch`][Self::ChecksumMismatch] |
/// | Container parsing | [`TarHeaderCorrupt`][Self::TarHeaderCorrupt], [`Encoding`][Self::Encoding] |
/// | Index | [`IndexSchemaMismatch`][Self::IndexSchemaMismatch], [`IndexFingerprintMismatch`][Self::IndexFingerprintMismatch], [`IndexCorrupt`][Self::IndexCorrupt], [`IndexNotWritable`][Self::IndexNotWritable] |
/// | Encryption | [`PasswordRequired`][Self::PasswordRequired], [`WrongPassword`][Self::WrongPassword] |
/// | Environment | [`DependencyMissing`][Self::DependencyMissing], [`CrossBackendHardlink`][Self::CrossBackendHardlink], [`Io`][Self::Io] |
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// A path was looked up that does not exist in any backing source.
    ///
    /// Composition layers normally report absent paths as `Ok(None)`; this
    /// kind is used where an operation requires the path to exist (e.g.
    /// deleting a nonexistent file through the write overlay).
    #[error("path not found: {path}")]
    NotFound {
        /// The path that was not found.
        path: String,
    },

    /// A path is malformed: `..` components, embedded NUL bytes, or an
    /// encoding the configured charset cannot represent.
    #[error("invalid path: {reason}")]
    InvalidPath {
        /// Description of the violation.
        reason: String,
    },

    /// The underlying resource does not support random access and cannot be
    /// buffered into something that does.
    #[error("stream is not seekable: {0}")]
    NotSeekable(String),

    /// The decompressor rejected its input as malformed.
    #[error("decoder error in {codec} stream at compressed offset {offset:#x}: {reason}")]
    DecoderError {
        /// Codec name ("gzip", "bzip2", ...).
        codec: &'static str,
        /// Compressed byte offset where decoding failed.
        offset: u64,
        /// Description from the codec.
        reason: String,
    },

    /// Input ended before the expected amount of data was available.
    #[error("truncated input: expected {expected} more bytes at offset {offset:#x}")]
    Truncated {
        /// Byte offset where the truncation was detected.
        offset: u64,
        /// Number of bytes that were still expected.
        expected: u64,
    },

    /// Integrity verification failed while decoding.
    #[error("checksum mismatch in {context}")]
    ChecksumMismatch {
        /// What was being verified (codec stream, archive member, ...).
        context: String,
    },

    /// A tar header block failed validation.
    #[error("corrupt tar header at offset {offset:#x}: {reason}")]
    TarHeaderCorrupt {
        /// Archive byte offset of the offending 512-byte block.
        offset: u64,
        /// Description of the corruption.
        reason: String,
    },

    /// Path bytes could not be decoded under the configured encoding.
    #[error("cannot decode path bytes as {encoding}")]
    Encoding {
        /// The encoding that was configured.
        encoding: String,
    },

    /// A cached index was written by an incompatible schema version.
    ///
    /// Schema mismatches are never silently migrated; the caller decides
    /// whether to recreate.
    #[error("index schema version {found} does not match expected {expected}")]
    IndexSchemaMismatch {
        /// Version stored in the index.
        found: u32,
        /// Version this build writes.
        expected: u32,
    },

    /// A cached index does not belong to the archive being opened.
    #[error("index fingerprint mismatch: {reason}")]
    IndexFingerprintMismatch {
        /// Which fingerprint component differed.
        reason: String,
    },

    /// The index database exists but cannot be read as a valid index.
    #[error("index corrupt: {0}")]
    IndexCorrupt(String),

    /// No writable location for the index database could be found.
    #[error("index not writable at {path}")]
    IndexNotWritable {
        /// The last location that was attempted.
        path: String,
    },

    /// An encrypted member was opened without a configured password.
    ///
    /// Listing encrypted members succeeds; only `open` fails.
    #[error("password required to open encrypted member '{path}'")]
    PasswordRequired {
        /// The member that requires a password.
        path: String,
    },

    /// The configured password does not decrypt the member.
    #[error("wrong password for member '{path}'")]
    WrongPassword {
        /// The member that failed to decrypt.
        path: String,
    },

    /// The detected container format needs a backend that is not available
    /// in this build.
    #[error("backend '{backend}' is not available: {reason}")]
    DependencyMissing {
        /// Name of the missing backend.
        backend: String,
        /// Why it is unavailable (feature disabled, out of stack, remote).
        reason: String,
    },

    /// A hardlink was requested from the overlay into a read-only backing
    /// source, which host filesystems cannot represent.
    #[error("cannot hardlink '{target}' across backend boundary")]
    CrossBackendHardlink {
        /// The link target inside the read-only source.
        target: String,
    },

    /// A wrapped transport or host-filesystem failure.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Reserved for the filesystem adapter; the core never emits this.
    #[error("operation canceled")]
    Canceled,
}

impl Error {
    /// Returns `true` if this error indicates data corruption in the archive
    /// or the index rather than a usage or environment problem.
    pub fn is_corruption(&self) -> bool {
        matches!(
            self,
            Error::DecoderError { .. }
                | Error::Truncated { .. }
                | Error::ChecksumMismatch { .. }
                | Error::TarHeaderCorrupt { .. }
                | Error::IndexCorrupt(_)
        )
    }

    /// Returns `true` if this error means a cached index cannot be used as-is
    /// and recreating it may succeed.
    pub fn is_index_stale(&self) -> bool {
        matches!(
            self,
            Error::IndexSchemaMismatch { .. }
                | Error::IndexFingerprintMismatch { .. }
                | Error::IndexCorrupt(_)
        )
    }

    /// Returns `true` if this error is encryption-related.
    pub fn is_encryption_error(&self) -> bool {
        matches!(
            self,
            Error::PasswordRequired { .. } | Error::WrongPassword { .. }
        )
    }

    /// Maps this error to the `errno` value the filesystem adapter should
    /// return for the failed syscall.
    ///
    /// The mapping follows the usual FUSE conventions: absent paths are
    /// `ENOENT`, missing credentials are `EACCES`, and anything that boils
    /// down to unreadable data is `EIO`.
    pub fn to_errno(&self) -> i32 {
        match self {
            Error::NotFound { .. } => libc::ENOENT,
            Error::InvalidPath { .. } | Error::Encoding { .. } => libc::EINVAL,
            Error::PasswordRequired { .. } | Error::WrongPassword { .. } => libc::EACCES,
            Error::CrossBackendHardlink { .. } => libc::EXDEV,
            Error::DependencyMissing { .. } => libc::ENOTSUP,
            Error::IndexNotWritable { .. } => libc::EROFS,
            Error::Canceled => libc::EINTR,
            Error::Io(e) => e.raw_os_error().unwrap_or(libc::EIO),
            _ => libc::EIO,
        }
    }

    /// Creates an [`Error::InvalidPath`] with the given reason.
    pub fn invalid_path(reason: impl Into<String>) -> Self {
        Error::InvalidPath {
            reason: reason.into(),
        }
    }

    /// Creates an [`Error::NotFound`] for the given path.
    pub fn not_found(path: impl Into<String>) -> Self {
        Error::NotFound { path: path.into() }
    }

    /// Creates an [`Error::DecoderError`] with full context.
    pub fn decoder(codec: &'static str, offset: u64, reason: impl Into<String>) -> Self {
        Error::DecoderError {
            codec,
            offset,
            reason: reason.into(),
        }
    }

    /// Creates an [`Error::TarHeaderCorrupt`] at the given archive offset.
    pub fn tar_header(offset: u64, reason: impl Into<String>) -> Self {
        Error::TarHeaderCorrupt {
            offset,
            reason: reason.into(),
        }
    }

    /// Creates an [`Error::DependencyMissing`] for the named backend.
    pub fn dependency_missing(backend: impl Into<String>, reason: impl Into<String>) -> Self {
        Error::DependencyMissing {
            backend: backend.into(),
            reason: reason.into(),
        }
    }
}

/// A specialized Result type for mount-source operations.
pub type Result<T> = std::result::Result<T, Error>;
