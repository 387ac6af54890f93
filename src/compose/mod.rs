//! Composition layers: mount sources built out of other mount sources.
//!
//! Every layer here implements [`MountSource`] itself, so layers stack in
//! any order. Routing between a layer and the child that owns an entry goes
//! through the entry's `route` stack: a layer pushes its child id during
//! `lookup`/`list` and pops it again in `open` — no hidden shared state
//! crosses layer boundaries.
//!
//! Layer invariants: operations on nonexistent paths return `Ok(None)`, and
//! no layer dereferences symlinks.

pub mod automount;
pub mod subvolumes;
pub mod union;
pub mod versions;

pub use automount::AutoMountSource;
pub use subvolumes::SubvolumesSource;
pub use union::UnionSource;
pub use versions::FileVersionSource;

use std::sync::Arc;

use crate::options::MountOptions;
use crate::source::MountSource;
use crate::Result;

/// Stacks the configured composition layers over a set of opened sources.
///
/// Multiple sources merge into a union (last wins) unless union mounting is
/// disabled, in which case they appear as numbered sibling subvolumes.
/// Recursive mounting and version directories wrap on top when enabled.
pub fn assemble(
    children: Vec<Arc<dyn MountSource>>,
    options: &MountOptions,
) -> Result<Arc<dyn MountSource>> {
    let mut root: Arc<dyn MountSource> = match children.len() {
        0 => {
            return Err(crate::Error::invalid_path("no sources to mount"));
        }
        1 => children.into_iter().next().expect("one child"),
        _ if options.disable_union_mount => {
            let named = children
                .into_iter()
                .enumerate()
                .map(|(i, child)| (format!("{}", i + 1), child))
                .collect();
            Arc::new(SubvolumesSource::new(named)?)
        }
        _ => Arc::new(UnionSource::new(children, options.entry_cache_size)),
    };

    if options.recursion_depth != 0 {
        root = Arc::new(AutoMountSource::new(
            root,
            options.clone(),
            options.recursion_depth,
        ));
    }
    if options.file_versions {
        root = Arc::new(FileVersionSource::new(root));
    }
    Ok(root)
}
