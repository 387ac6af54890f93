//! The SQLAR mount source.
//!
//! An SQLAR archive already *is* an SQLite database — one `sqlar` table of
//! `(name, mode, mtime, sz, data)` rows, zlib-deflating each file — so this
//! source queries the container directly instead of building a second
//! index. The directory tree is assembled once at open from the name
//! column; file bytes are read (and inflated when `sz` differs from the
//! blob length) on demand.

use std::collections::{BTreeMap, HashSet};
use std::io::Read;
use std::path::Path;
use std::sync::{Arc, Mutex};

use rusqlite::{params, Connection, OpenFlags, OptionalExtension};

use crate::options::MountOptions;
use crate::paths;
use crate::source::{EntryKind, FileEntry, Locator, MountSource, StatFs};
use crate::stream::{MemoryStream, SeekableStream};
use crate::{Error, Result};

fn db_err(e: rusqlite::Error) -> Error {
    Error::decoder("sqlar", 0, e.to_string())
}

/// An SQLAR database presented as a mount source.
pub struct SqlarMountSource {
    conn: Mutex<Connection>,
    entries: BTreeMap<String, FileEntry>,
    children: BTreeMap<String, Vec<String>>,
}

impl SqlarMountSource {
    /// Opens an SQLAR database at `path`.
    pub fn open(path: &Path, options: &MountOptions) -> Result<Self> {
        let conn = Connection::open_with_flags(path, OpenFlags::SQLITE_OPEN_READ_ONLY)
            .map_err(db_err)?;

        let has_table: bool = conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = 'sqlar'",
                [],
                |row| row.get::<_, i64>(0).map(|n| n > 0),
            )
            .map_err(db_err)?;
        if !has_table {
            return Err(Error::decoder("sqlar", 0, "no sqlar table"));
        }

        let mut entries = BTreeMap::new();
        let mut children: BTreeMap<String, Vec<String>> = BTreeMap::new();
        let mut known_dirs: HashSet<String> = HashSet::from(["/".to_string()]);
        {
            let mut stmt = conn
                .prepare("SELECT name, mode, mtime, sz FROM sqlar ORDER BY name")
                .map_err(db_err)?;
            let rows = stmt
                .query_map([], |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, i64>(1)? as u32,
                        row.get::<_, i64>(2)?,
                        row.get::<_, i64>(3)?,
                    ))
                })
                .map_err(db_err)?;

            for row in rows {
                let (name, mode, mtime, sz) = row.map_err(db_err)?;
                let mut member_path = paths::normalize(&name)?;
                if let Some(transform) = &options.transform {
                    member_path = paths::normalize(&transform.apply(&member_path))?;
                }
                if member_path == "/" {
                    continue;
                }

                let kind = match mode & 0o170000 {
                    0o040000 => EntryKind::Directory,
                    0o120000 => EntryKind::Symlink,
                    _ if sz < 0 => EntryKind::Symlink,
                    _ => EntryKind::Regular,
                };

                // Parents may be implicit in the name column.
                for ancestor in paths::ancestors(&member_path)
                    .filter(|a| !known_dirs.contains(*a))
                    .map(str::to_string)
                    .collect::<Vec<_>>()
                    .into_iter()
                    .rev()
                {
                    let (parent, dir_name) = paths::split(&ancestor);
                    insert_entry(
                        &mut entries,
                        &mut children,
                        FileEntry::directory(parent, dir_name),
                    );
                    known_dirs.insert(ancestor);
                }
                if kind == EntryKind::Directory {
                    known_dirs.insert(member_path.clone());
                }

                let link_target = if kind == EntryKind::Symlink {
                    conn.query_row(
                        "SELECT data FROM sqlar WHERE name = ?1",
                        params![name],
                        |row| row.get::<_, Option<Vec<u8>>>(0),
                    )
                    .ok()
                    .flatten()
                    .map(|data| String::from_utf8_lossy(&data).into_owned())
                    .unwrap_or_default()
                } else {
                    String::new()
                };

                let (parent, entry_name) = paths::split(&member_path);
                insert_entry(
                    &mut entries,
                    &mut children,
                    FileEntry {
                        parent: parent.to_string(),
                        name: entry_name.to_string(),
                        version: 1,
                        kind,
                        mode: mode & 0o7777,
                        uid: 0,
                        gid: 0,
                        mtime,
                        size: if kind == EntryKind::Regular {
                            sz.max(0) as u64
                        } else {
                            0
                        },
                        link_target,
                        // Bytes are fetched by row name, not byte range.
                        locator: Locator::None,
                        route: Vec::new(),
                        xattrs: BTreeMap::new(),
                        encrypted: false,
                        mtime_absent: false,
                    },
                );
            }
        }

        Ok(Self {
            conn: Mutex::new(conn),
            entries,
            children,
        })
    }

    /// Fetches and inflates a member's bytes by its row name.
    fn read_row(&self, row_name: &str, expected_size: u64) -> Result<Vec<u8>> {
        let conn = self.conn.lock().expect("sqlar connection poisoned");
        let data: Option<Vec<u8>> = conn
            .query_row(
                "SELECT data FROM sqlar WHERE name = ?1",
                params![row_name],
                |row| row.get(0),
            )
            .optional()
            .map_err(db_err)?
            .flatten();
        let data = data.ok_or_else(|| Error::not_found(row_name))?;

        if data.len() as u64 == expected_size {
            return Ok(data);
        }
        // sz differing from the blob length means zlib compression.
        #[cfg(feature = "gzip")]
        {
            let mut decoder = flate2::read::ZlibDecoder::new(data.as_slice());
            let mut bytes = Vec::with_capacity(expected_size as usize);
            decoder
                .read_to_end(&mut bytes)
                .map_err(|e| Error::decoder("sqlar", 0, e.to_string()))?;
            if bytes.len() as u64 != expected_size {
                return Err(Error::ChecksumMismatch {
                    context: format!("sqlar row {row_name}"),
                });
            }
            Ok(bytes)
        }
        #[cfg(not(feature = "gzip"))]
        Err(Error::dependency_missing(
            "sqlar",
            "zlib support requires the gzip feature",
        ))
    }
}

fn insert_entry(
    entries: &mut BTreeMap<String, FileEntry>,
    children: &mut BTreeMap<String, Vec<String>>,
    entry: FileEntry,
) {
    let path = entry.path();
    children
        .entry(entry.parent.clone())
        .or_default()
        .push(entry.name.clone());
    entries.insert(path, entry);
}

impl MountSource for SqlarMountSource {
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
        if entry.is_dir() {
            return Ok(Arc::new(MemoryStream::new(Vec::new())));
        }
        // Row names are the path without the leading slash.
        let row_name = entry.path()[1..].to_string();
        let bytes = self.read_row(&row_name, entry.size)?;
        Ok(Arc::new(MemoryStream::new(bytes)))
    }

    fn statfs(&self) -> StatFs {
        StatFs {
            files: self.entries.len() as u64,
            ..StatFs::default()
        }
    }

    fn backend_name(&self) -> &'static str {
        "sqlar"
    }
}
