//! The mount-source trait and its per-format implementations.
//!
//! A mount source answers filesystem questions about one archive-shaped
//! thing: lookups, listings, version counts, and member opens. Composition
//! layers (union, versions, recursive mounting, subvolumes) are themselves
//! mount sources wrapping other mount sources, so the adapter above the
//! crate only ever talks to this one trait.

pub mod asar;
pub mod entry;
pub mod factory;
pub mod folder;
pub mod single_file;
pub mod sqlar;
pub mod tar;
#[cfg(feature = "zip-backend")]
pub mod zip;

pub use entry::{EntryKind, FileEntry, Locator, SparseMap, StatFs};
pub use factory::open_mount_source;

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::stream::SeekableStream;
use crate::Result;

/// A read-only view of one archive, folder, or composition of either.
///
/// Operations on paths that do not exist return `Ok(None)` rather than an
/// error; error returns are reserved for real failures (I/O, corruption,
/// missing credentials). Implementations never panic on untrusted input and
/// never dereference symlinks — that is the adapter's job.
pub trait MountSource: Send + Sync {
    /// Resolves a normalized absolute path to its current entry.
    fn lookup(&self, path: &str) -> Result<Option<FileEntry>>;

    /// Lists a directory as `(name, entry)` pairs in unspecified order.
    ///
    /// Returns `Ok(None)` when `path` does not name a directory.
    fn list(&self, path: &str) -> Result<Option<Vec<(String, FileEntry)>>>;

    /// Number of recorded versions at `path` (0 when absent).
    fn versions(&self, path: &str) -> Result<u64> {
        Ok(if self.lookup(path)?.is_some() { 1 } else { 0 })
    }

    /// Resolves a specific 1-based version at `path`.
    ///
    /// The default only knows the current version.
    fn lookup_version(&self, path: &str, version: u64) -> Result<Option<FileEntry>> {
        let count = self.versions(path)?;
        if version == count && count > 0 {
            self.lookup(path)
        } else {
            Ok(None)
        }
    }

    /// Opens an entry's contents as a seekable stream.
    ///
    /// May be called concurrently; every call yields an independently
    /// readable view (the stream itself is positionless).
    fn open(&self, entry: &FileEntry) -> Result<Arc<dyn SeekableStream>>;

    /// Returns `true` if `path` exists.
    fn exists(&self, path: &str) -> Result<bool> {
        Ok(self.lookup(path)?.is_some())
    }

    /// Filesystem statistics for the adapter's `statfs`.
    fn statfs(&self) -> StatFs {
        StatFs::default()
    }

    /// Extended attributes recorded for `path`.
    fn xattrs(&self, path: &str) -> Result<BTreeMap<String, Vec<u8>>> {
        Ok(self
            .lookup(path)?
            .map(|entry| entry.xattrs)
            .unwrap_or_default())
    }

    /// Arms resources that must not leak across a daemonizing fork
    /// (background threads, network connections). In-tree sources hold only
    /// file descriptors and re-validate lazily, so the default is a no-op.
    fn enter(&self) -> Result<()> {
        Ok(())
    }

    /// Releases everything `enter` armed plus pooled handles.
    fn exit(&self) -> Result<()> {
        Ok(())
    }

    /// Short backend name, as used in priority lists and the index.
    fn backend_name(&self) -> &'static str;
}

/// Convenience: looks up `path` and reads the whole member.
pub fn read_member(source: &dyn MountSource, path: &str) -> Result<Vec<u8>> {
    let entry = source
        .lookup(path)?
        .ok_or_else(|| crate::Error::not_found(path))?;
    source.open(&entry)?.read_all()
}
