//! The subvolumes layer: named sources as sibling directories.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::paths;
use crate::source::{EntryKind, FileEntry, MountSource, StatFs};
use crate::stream::SeekableStream;
use crate::{Error, Result};

/// Multiple named mount sources exposed side by side under the root.
pub struct SubvolumesSource {
    children: Vec<(String, Arc<dyn MountSource>)>,
}

impl SubvolumesSource {
    /// Builds the layer; names must be unique, nonempty path components.
    pub fn new(children: Vec<(String, Arc<dyn MountSource>)>) -> Result<Self> {
        let mut seen = BTreeMap::new();
        for (name, _) in &children {
            if name.is_empty() || name.contains('/') {
                return Err(Error::invalid_path(format!(
                    "bad subvolume name '{name}'"
                )));
            }
            if seen.insert(name.clone(), ()).is_some() {
                return Err(Error::invalid_path(format!(
                    "duplicate subvolume name '{name}'"
                )));
            }
        }
        Ok(Self { children })
    }

    /// Splits a path into its subvolume and the remainder.
    fn dispatch<'a>(&self, path: &'a str) -> Option<(usize, &'a str)> {
        let without_root = path.strip_prefix('/')?;
        let (name, rest) = match without_root.split_once('/') {
            Some((name, rest)) => (name, rest),
            None => (without_root, ""),
        };
        let index = self
            .children
            .iter()
            .position(|(child_name, _)| child_name == name)?;
        Some((
            index,
            if rest.is_empty() { "/" } else { &path[name.len() + 1..] },
        ))
    }

    fn subvolume_entry(&self, name: &str) -> FileEntry {
        FileEntry {
            kind: EntryKind::Directory,
            mode: 0o755,
            ..FileEntry::regular("/", name, 0)
        }
    }
}

impl MountSource for SubvolumesSource {
    fn lookup(&self, path: &str) -> Result<Option<FileEntry>> {
        let path = paths::normalize(path)?;
        if path == "/" {
            return Ok(Some(FileEntry::root()));
        }
        let Some((index, rest)) = self.dispatch(&path) else {
            return Ok(None);
        };
        if rest == "/" {
            return Ok(Some(self.subvolume_entry(&self.children[index].0)));
        }
        Ok(self.children[index].1.lookup(rest)?.map(|mut entry| {
            entry.route_push(index as u32);
            entry
        }))
    }

    fn list(&self, path: &str) -> Result<Option<Vec<(String, FileEntry)>>> {
        let path = paths::normalize(path)?;
        if path == "/" {
            return Ok(Some(
                self.children
                    .iter()
                    .map(|(name, _)| (name.clone(), self.subvolume_entry(name)))
                    .collect(),
            ));
        }
        let Some((index, rest)) = self.dispatch(&path) else {
            return Ok(None);
        };
        let Some(listing) = self.children[index].1.list(rest)? else {
            return Ok(None);
        };
        Ok(Some(
            listing
                .into_iter()
                .map(|(name, mut entry)| {
                    entry.route_push(index as u32);
                    (name, entry)
                })
                .collect(),
        ))
    }

    fn versions(&self, path: &str) -> Result<u64> {
        let path = paths::normalize(path)?;
        if path == "/" {
            return Ok(1);
        }
        match self.dispatch(&path) {
            Some((_, "/")) => Ok(1),
            Some((index, rest)) => self.children[index].1.versions(rest),
            None => Ok(0),
        }
    }

    fn lookup_version(&self, path: &str, version: u64) -> Result<Option<FileEntry>> {
        let path = paths::normalize(path)?;
        match self.dispatch(&path) {
            Some((index, rest)) if rest != "/" => {
                Ok(self.children[index].1.lookup_version(rest, version)?.map(
                    |mut entry| {
                        entry.route_push(index as u32);
                        entry
                    },
                ))
            }
            _ if version == 1 => self.lookup(&path),
            _ => Ok(None),
        }
    }

    fn open(&self, entry: &FileEntry) -> Result<Arc<dyn SeekableStream>> {
        if entry.is_dir() && entry.route.is_empty() {
            return Ok(Arc::new(crate::stream::MemoryStream::new(Vec::new())));
        }
        let mut entry = entry.clone();
        let index = entry
            .route_pop()
            .ok_or_else(|| Error::invalid_path("entry lost its subvolume routing tag"))?
            as usize;
        self.children
            .get(index)
            .ok_or_else(|| Error::invalid_path("subvolume routing tag out of range"))?
            .1
            .open(&entry)
    }

    fn statfs(&self) -> StatFs {
        let mut stats = StatFs::default();
        for (_, child) in &self.children {
            stats.files += child.statfs().files;
        }
        stats
    }

    fn enter(&self) -> Result<()> {
        for (_, child) in &self.children {
            child.enter()?;
        }
        Ok(())
    }

    fn exit(&self) -> Result<()> {
        for (_, child) in &self.children {
            child.exit()?;
        }
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "subvolumes"
    }
}
