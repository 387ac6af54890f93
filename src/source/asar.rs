//! The ASAR mount source.
//!
//! ASAR archives (Electron's app bundles) keep their whole directory as one
//! JSON document at the front of the file: a 16-byte pickle preamble, the
//! JSON index, then member data back to back. Offsets in the JSON are
//! relative to the end of the header region and arrive as strings because
//! JSON numbers cannot hold 64 bits. Members marked `unpacked` live as
//! plain files in a sibling `<archive>.unpacked/` directory.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use byteorder::{ByteOrder, LittleEndian};
use serde::Deserialize;

use crate::paths;
use crate::source::{EntryKind, FileEntry, Locator, MountSource, StatFs};
use crate::stream::{FileStream, MemoryStream, SeekableStream, SubStream};
use crate::{Error, Result};

/// One node of the ASAR JSON index.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum AsarNode {
    Directory {
        files: BTreeMap<String, AsarNode>,
    },
    Link {
        link: String,
    },
    File {
        size: u64,
        #[serde(default)]
        offset: Option<String>,
        #[serde(default)]
        executable: bool,
        #[serde(default)]
        unpacked: bool,
    },
}

/// An ASAR archive presented as a mount source.
pub struct AsarMountSource {
    stream: Arc<dyn SeekableStream>,
    entries: BTreeMap<String, FileEntry>,
    children: BTreeMap<String, Vec<String>>,
    /// Data region start: offsets in the JSON are relative to this.
    data_start: u64,
}

impl AsarMountSource {
    /// Opens an ASAR archive at `path`.
    pub fn open(path: &Path) -> Result<Self> {
        let stream: Arc<dyn SeekableStream> = Arc::new(FileStream::open(path)?);
        let unpacked_dir = path.with_file_name(format!(
            "{}.unpacked",
            path.file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default()
        ));
        Self::from_stream(stream, Some(unpacked_dir))
    }

    /// Opens an ASAR archive from an arbitrary seekable stream.
    pub fn from_stream(
        stream: Arc<dyn SeekableStream>,
        unpacked_dir: Option<PathBuf>,
    ) -> Result<Self> {
        let preamble = stream.read_range(0, 16)?;
        if preamble.len() < 16 || LittleEndian::read_u32(&preamble[0..4]) != 4 {
            return Err(Error::decoder("asar", 0, "bad pickle preamble"));
        }
        let pickle_size = LittleEndian::read_u32(&preamble[4..8]) as u64;
        let json_length = LittleEndian::read_u32(&preamble[12..16]) as u64;
        if json_length > pickle_size {
            return Err(Error::decoder("asar", 8, "json longer than pickle"));
        }
        let data_start = 8 + pickle_size;

        let json = stream.read_range(16, json_length as usize)?;
        let root: AsarNode = serde_json::from_slice(&json)
            .map_err(|e| Error::decoder("asar", 16, e.to_string()))?;
        let AsarNode::Directory { files } = root else {
            return Err(Error::decoder("asar", 16, "root node is not a directory"));
        };

        let mut source = Self {
            stream,
            entries: BTreeMap::new(),
            children: BTreeMap::new(),
            data_start,
        };
        source.collect("/", &files, unpacked_dir.as_deref())?;
        Ok(source)
    }

    fn collect(
        &mut self,
        parent: &str,
        nodes: &BTreeMap<String, AsarNode>,
        unpacked_dir: Option<&Path>,
    ) -> Result<()> {
        for (name, node) in nodes {
            let path = paths::join(parent, name);
            let entry = match node {
                AsarNode::Directory { files } => {
                    let child_unpacked = unpacked_dir.map(|dir| dir.join(name));
                    self.insert(FileEntry::directory(parent, name));
                    self.collect(&path, files, child_unpacked.as_deref())?;
                    continue;
                }
                AsarNode::Link { link } => FileEntry {
                    kind: EntryKind::Symlink,
                    link_target: link.clone(),
                    mode: 0o777,
                    ..FileEntry::regular(parent, name, 0)
                },
                AsarNode::File {
                    size,
                    offset,
                    executable,
                    unpacked,
                } => {
                    let locator = if *unpacked {
                        let host = unpacked_dir
                            .map(|dir| dir.join(name))
                            .ok_or_else(|| Error::not_found(&path))?;
                        Locator::Host(host)
                    } else {
                        let relative: u64 = offset
                            .as_deref()
                            .and_then(|o| o.parse().ok())
                            .ok_or_else(|| {
                                Error::decoder("asar", 16, format!("missing offset for {path}"))
                            })?;
                        Locator::Archive {
                            offset: self.data_start + relative,
                            stored_size: *size,
                            sparsity: None,
                        }
                    };
                    FileEntry {
                        mode: if *executable { 0o755 } else { 0o644 },
                        locator,
                        mtime_absent: true,
                        ..FileEntry::regular(parent, name, *size)
                    }
                }
            };
            self.insert(entry);
        }
        Ok(())
    }

    fn insert(&mut self, entry: FileEntry) {
        self.children
            .entry(entry.parent.clone())
            .or_default()
            .push(entry.name.clone());
        self.entries.insert(entry.path(), entry);
    }
}

impl MountSource for AsarMountSource {
    fn lookup(&self, path: &str) -> Result<Option<FileEntry>> {
        let path = paths::normalize(path)?;
        if path == "/" {
            return Ok(Some(FileEntry::root()));
        }
        Ok(self.entries.get(&path).cloned())
    }

    fn list(&self, path: &str) -> Result<Option<Vec<(String, FileEntry)>>> {
        let path = paths::normalize(path)?;
        if path != "/" {
            match self.entries.get(&path) {
                Some(entry) if entry.is_dir() => {}
                _ => return Ok(None),
            }
        }
        let names = self.children.get(path.as_str()).cloned().unwrap_or_default();
        let mut listing = Vec::with_capacity(names.len());
        for name in names {
            let child_path = paths::join(&path, &name);
            if let Some(entry) = self.entries.get(&child_path) {
                listing.push((name, entry.clone()));
            }
        }
        Ok(Some(listing))
    }

    fn open(&self, entry: &FileEntry) -> Result<Arc<dyn SeekableStream>> {
        match &entry.locator {
            Locator::Archive {
                offset,
                stored_size,
                ..
            } => Ok(Arc::new(SubStream::new(
                Arc::clone(&self.stream),
                *offset,
                *stored_size,
            ))),
            Locator::Host(host) => Ok(Arc::new(FileStream::open(host)?)),
            Locator::None => Ok(Arc::new(MemoryStream::new(
                entry.link_target.as_bytes().to_vec(),
            ))),
        }
    }

    fn statfs(&self) -> StatFs {
        StatFs {
            files: self.entries.len() as u64,
            ..StatFs::default()
        }
    }

    fn backend_name(&self) -> &'static str {
        "asar"
    }
}
