//! The union layer: an ordered list of sources merged into one tree.
//!
//! Shadowing is last-wins: when a path exists in several children, the
//! highest-indexed child owns it. Version numbering is cumulative across
//! children in list order, so the oldest versions come from the first child
//! and plain lookups agree with the versioning view.

use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex};

use lru::LruCache;

use crate::paths;
use crate::source::{FileEntry, MountSource, StatFs};
use crate::stream::SeekableStream;
use crate::{Error, Result};

/// An ordered union of mount sources.
pub struct UnionSource {
    children: Vec<Arc<dyn MountSource>>,
    /// Accelerates repeated lookups: path → owning child index.
    owners: Mutex<LruCache<String, usize>>,
}

impl UnionSource {
    /// Merges `children`; later children shadow earlier ones.
    pub fn new(children: Vec<Arc<dyn MountSource>>, cache_size: usize) -> Self {
        let cache_size = NonZeroUsize::new(cache_size).unwrap_or(NonZeroUsize::MIN);
        Self {
            children,
            owners: Mutex::new(LruCache::new(cache_size)),
        }
    }

    /// The merged children, in shadowing order.
    pub fn children(&self) -> &[Arc<dyn MountSource>] {
        &self.children
    }

    fn lookup_in(&self, child_index: usize, path: &str) -> Result<Option<FileEntry>> {
        Ok(self.children[child_index].lookup(path)?.map(|mut entry| {
            entry.route_push(child_index as u32);
            entry
        }))
    }
}

impl MountSource for UnionSource {
    fn lookup(&self, path: &str) -> Result<Option<FileEntry>> {
        let path = paths::normalize(path)?;
        if let Some(&owner) = self.owners.lock().expect("owner cache poisoned").get(&path) {
            if let Some(entry) = self.lookup_in(owner, &path)? {
                return Ok(Some(entry));
            }
        }
        for child_index in (0..self.children.len()).rev() {
            if let Some(entry) = self.lookup_in(child_index, &path)? {
                self.owners
                    .lock()
                    .expect("owner cache poisoned")
                    .put(path, child_index);
                return Ok(Some(entry));
            }
        }
        Ok(None)
    }

    fn list(&self, path: &str) -> Result<Option<Vec<(String, FileEntry)>>> {
        let path = paths::normalize(path)?;
        let mut merged: HashMap<String, FileEntry> = HashMap::new();
        let mut found_any = false;
        for (child_index, child) in self.children.iter().enumerate() {
            if let Some(listing) = child.list(&path)? {
                found_any = true;
                for (name, mut entry) in listing {
                    entry.route_push(child_index as u32);
                    // Later children overwrite: last wins.
                    merged.insert(name, entry);
                }
            }
        }
        if !found_any {
            return Ok(None);
        }
        Ok(Some(merged.into_iter().collect()))
    }

    fn versions(&self, path: &str) -> Result<u64> {
        let mut total = 0;
        for child in &self.children {
            total += child.versions(path)?;
        }
        Ok(total)
    }

    fn lookup_version(&self, path: &str, version: u64) -> Result<Option<FileEntry>> {
        // Versions are numbered across children in list order.
        let mut remaining = version;
        for (child_index, child) in self.children.iter().enumerate() {
            let count = child.versions(path)?;
            if remaining <= count {
                return Ok(child.lookup_version(path, remaining)?.map(|mut entry| {
                    entry.route_push(child_index as u32);
                    entry
                }));
            }
            remaining -= count;
        }
        Ok(None)
    }

    fn open(&self, entry: &FileEntry) -> Result<Arc<dyn SeekableStream>> {
        let mut entry = entry.clone();
        let child_index = entry
            .route_pop()
            .ok_or_else(|| Error::invalid_path("entry lost its union routing tag"))?
            as usize;
        self.children
            .get(child_index)
            .ok_or_else(|| Error::invalid_path("union routing tag out of range"))?
            .open(&entry)
    }

    fn statfs(&self) -> StatFs {
        let mut stats = StatFs::default();
        for child in &self.children {
            let child_stats = child.statfs();
            stats.blocks += child_stats.blocks;
            stats.files += child_stats.files;
        }
        stats
    }

    fn enter(&self) -> Result<()> {
        for child in &self.children {
            child.enter()?;
        }
        Ok(())
    }

    fn exit(&self) -> Result<()> {
        for child in &self.children {
            child.exit()?;
        }
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "union"
    }
}
