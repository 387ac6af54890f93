//! # arcmount
//!
//! Present the contents of archive files — possibly nested and compressed —
//! as a random-access filesystem tree, without extracting them.
//!
//! The core abstraction is the [`MountSource`] trait: lookups, directory
//! listings, version history, and member opens over one archive-shaped
//! thing. Container formats (tar in all its dialects, ZIP, SQLAR, ASAR,
//! plain folders, single compressed files) implement it directly;
//! composition layers (union, version history, recursive mounting,
//! subvolumes, the copy-on-write overlay) implement it by wrapping other
//! mount sources. A FUSE adapter above this crate maps the trait onto
//! kernel callbacks; nothing in here depends on one.
//!
//! Random access is what distinguishes this from streaming extractors:
//! member metadata is parsed once into a persistent SQLite index, and
//! compressed archives get a checkpoint index that makes seeking inside
//! gzip/bzip2/xz/zstd streams O(log C) instead of decompress-everything.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use arcmount::{mount, MountOptions, MountSource, Result};
//! use arcmount::source::read_member;
//!
//! fn main() -> Result<()> {
//!     let options = MountOptions::new().recursion_depth(-1);
//!     let root = mount(&["archive.tar.gz"], &options)?;
//!
//!     for (name, entry) in root.list("/")?.unwrap_or_default() {
//!         println!("{name}: {} bytes", entry.size);
//!     }
//!     let bytes = read_member(root.as_ref(), "/inner.tar/member.txt")?;
//!     println!("{} bytes read", bytes.len());
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `gzip` | Yes | gzip/zlib/deflate decoding |
//! | `bzip2` | Yes | bzip2 decoding |
//! | `xz` | Yes | xz decoding |
//! | `zstd` | Yes | Zstandard decoding |
//! | `zip-backend` | Yes | ZIP mount source |
//! | `parallel` | Yes | Parallel read fan-out with Rayon |
//!
//! A decoder or backend selected while its feature is off reports
//! [`Error::DependencyMissing`] instead of failing to detect.

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]
#![forbid(unsafe_code)]

pub mod cache;
pub mod compose;
pub mod compress;
pub mod error;
pub mod index;
pub mod options;
pub mod overlay;
pub mod paths;
pub mod source;
pub mod stream;
pub mod tar;

pub use error::{Error, Result};
pub use options::{GnuIncremental, MountOptions, Parallelization, PathEncoding, PathTransform};

// Re-export the trait surface at the crate root for convenience.
pub use compose::{assemble, AutoMountSource, FileVersionSource, SubvolumesSource, UnionSource};
pub use overlay::{commit_overlay, WriteOverlay};
pub use source::{
    open_mount_source, EntryKind, FileEntry, Locator, MountSource, SparseMap, StatFs,
};
pub use stream::{SeekableStream, StencilView, StreamCursor};

use std::sync::Arc;

/// Opens and composes mount sources for a set of path/URL specs.
///
/// Each spec opens through the detection factory; multiple sources merge
/// per the union/subvolume options; recursive mounting, version
/// directories, and the write overlay stack on top as configured. This is
/// the function the mounting CLI calls once per invocation.
pub fn mount(specs: &[&str], options: &MountOptions) -> Result<Arc<dyn MountSource>> {
    options.validate()?;
    let mut children = Vec::with_capacity(specs.len());
    for spec in specs {
        children.push(source::factory::open_mount_source(spec, options)?);
    }
    let root = compose::assemble(children, options)?;
    if let Some(folder) = &options.write_overlay {
        return Ok(Arc::new(WriteOverlay::new(root, folder)?));
    }
    Ok(root)
}
