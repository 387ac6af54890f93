//! The persistent SQLite metadata index.
//!
//! One index database describes one archive: every resolved entry (§`files`),
//! the archive fingerprint and indexing options (§`metadata`), and the
//! compression checkpoints of the underlying stream (§`stream_index`).
//! Writes happen once, during indexing, in batched transactions; afterwards
//! the database is effectively read-only and shared by any number of
//! readers. The connection is mutex-guarded; SQLite runs in WAL mode for
//! file-backed databases.
//!
//! Index placement tries, in order: an explicit `index_path`, the archive's
//! own directory, the configured fallback folders (first writable wins), and
//! finally memory. An index file that is itself gzip-compressed (it may have
//! been copied from elsewhere) is decompressed into a temp file before use;
//! `ARCMOUNT_INDEX_TMPDIR` overrides where.

pub mod fingerprint;

pub use fingerprint::{Fingerprint, FingerprintStatus};

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use byteorder::{ByteOrder, LittleEndian};
use log::{debug, warn};
use rusqlite::{params, Connection, OptionalExtension};

use crate::compress::{Checkpoint, CheckpointIndex};
use crate::options::MountOptions;
use crate::source::{EntryKind, FileEntry, Locator, SparseMap};
use crate::{Error, Result};

/// Version of the index schema this build reads and writes.
pub const SCHEMA_VERSION: u32 = 1;

/// Suffix appended to archive names for sidecar index files.
pub const INDEX_SUFFIX: &str = ".arcmount.index.sqlite";

/// Environment variable overriding the temp dir for materialized indexes.
pub const INDEX_TMPDIR_VAR: &str = "ARCMOUNT_INDEX_TMPDIR";

/// Rows per insert transaction during indexing.
const BATCH_SIZE: usize = 1000;

/// Well-known `metadata` keys.
pub mod keys {
    /// Schema version (decimal).
    pub const SCHEMA_VERSION: &str = "schema_version";
    /// Backend that produced the index.
    pub const BACKEND: &str = "backend";
    /// Version of the producing backend.
    pub const BACKEND_VERSION: &str = "backend_version";
    /// Digest of the index-affecting options.
    pub const ARG_HASH: &str = "arg_hash";
    /// Fingerprint: archive size.
    pub const ARCHIVE_SIZE: &str = "archive_size";
    /// Fingerprint: archive mtime.
    pub const ARCHIVE_MTIME: &str = "archive_mtime";
    /// Fingerprint: CRC-32 of the first kiB.
    pub const HEAD_CRC: &str = "archive_head_crc";
    /// Fingerprint: CRC-32 of the last kiB.
    pub const TAIL_CRC: &str = "archive_tail_crc";
    /// Whether GNU-incremental prefix stripping was applied.
    pub const IS_GNU_INCREMENTAL: &str = "is_gnu_incremental";
    /// Set to "1" once indexing finished cleanly.
    pub const INDEX_COMPLETE: &str = "index_complete";
    /// Archive offset up to which the tar walk has parsed.
    pub const PARSED_UNTIL: &str = "parsed_until";
    /// Decompressed size of the archive stream, when compressed.
    pub const UNCOMPRESSED_SIZE: &str = "uncompressed_size";
    /// Codec of the archive stream, when compressed.
    pub const CODEC: &str = "codec";
}

fn db_err(e: rusqlite::Error) -> Error {
    Error::IndexCorrupt(e.to_string())
}

/// A mutex-guarded handle to one index database.
#[derive(Debug)]
pub struct SqliteIndex {
    conn: Mutex<Connection>,
    path: Option<PathBuf>,
    /// Keeps a decompressed copy of a compressed index alive.
    _materialized: Option<tempfile::TempPath>,
}

impl SqliteIndex {
    /// Creates a fresh in-memory index.
    pub fn create_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(db_err)?;
        let index = Self {
            conn: Mutex::new(conn),
            path: None,
            _materialized: None,
        };
        index.create_schema()?;
        Ok(index)
    }

    /// Creates a fresh index at `path`, replacing any existing file.
    pub fn create_at(path: &Path) -> Result<Self> {
        if path.exists() {
            std::fs::remove_file(path).map_err(|_| Error::IndexNotWritable {
                path: path.display().to_string(),
            })?;
        }
        let conn = Connection::open(path).map_err(|_| Error::IndexNotWritable {
            path: path.display().to_string(),
        })?;
        let index = Self {
            conn: Mutex::new(conn),
            path: Some(path.to_path_buf()),
            _materialized: None,
        };
        index.configure_journal();
        index.create_schema()?;
        Ok(index)
    }

    /// Opens an existing index, materializing it first if it is compressed,
    /// and validates the schema version.
    pub fn open_existing(path: &Path) -> Result<Self> {
        let (real_path, materialized) = materialize_if_compressed(path)?;
        let conn = Connection::open_with_flags(
            &real_path,
            rusqlite::OpenFlags::SQLITE_OPEN_READ_WRITE,
        )
        .or_else(|_| {
            Connection::open_with_flags(
                &real_path,
                rusqlite::OpenFlags::SQLITE_OPEN_READ_ONLY,
            )
        })
        .map_err(db_err)?;
        let index = Self {
            conn: Mutex::new(conn),
            path: Some(real_path),
            _materialized: materialized,
        };
        index.validate_schema_version()?;
        Ok(index)
    }

    /// Path of the backing database file, if file-backed.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    fn configure_journal(&self) {
        let conn = self.conn.lock().expect("index connection poisoned");
        // journal_mode returns a row; errors here only cost performance.
        let _ = conn.query_row("PRAGMA journal_mode=WAL", [], |_row| Ok(()));
        let _ = conn.execute_batch("PRAGMA synchronous=NORMAL;");
    }

    fn create_schema(&self) -> Result<()> {
        let conn = self.conn.lock().expect("index connection poisoned");
        conn.execute_batch(
            "
            CREATE TABLE files (
                parent        TEXT    NOT NULL,
                name          TEXT    NOT NULL,
                version       INTEGER NOT NULL,
                kind          INTEGER NOT NULL,
                mode          INTEGER NOT NULL,
                uid           INTEGER NOT NULL,
                gid           INTEGER NOT NULL,
                mtime         INTEGER NOT NULL,
                size          INTEGER NOT NULL,
                offset        INTEGER,
                stored_size   INTEGER,
                header_offset INTEGER,
                host_path     TEXT,
                linkname      TEXT    NOT NULL DEFAULT '',
                sparsity      BLOB,
                xattrs        BLOB,
                encrypted     INTEGER NOT NULL DEFAULT 0,
                mtime_absent  INTEGER NOT NULL DEFAULT 0,
                PRIMARY KEY (parent, name, version)
            );
            CREATE INDEX idx_files_parent ON files (parent);
            CREATE TABLE metadata (
                key   TEXT PRIMARY KEY,
                value TEXT NOT NULL
            );
            CREATE TABLE stream_index (
                codec               TEXT    NOT NULL,
                uncompressed_offset INTEGER NOT NULL,
                compressed_offset   INTEGER NOT NULL,
                window              BLOB,
                PRIMARY KEY (codec, uncompressed_offset)
            );
            ",
        )
        .map_err(db_err)?;
        drop(conn);
        self.set_metadata(keys::SCHEMA_VERSION, &SCHEMA_VERSION.to_string())?;
        Ok(())
    }

    fn validate_schema_version(&self) -> Result<()> {
        let found = self
            .get_metadata(keys::SCHEMA_VERSION)?
            .ok_or_else(|| Error::IndexCorrupt("missing schema_version".into()))?;
        let found: u32 = found
            .parse()
            .map_err(|_| Error::IndexCorrupt("unparsable schema_version".into()))?;
        if found != SCHEMA_VERSION {
            return Err(Error::IndexSchemaMismatch {
                found,
                expected: SCHEMA_VERSION,
            });
        }
        Ok(())
    }

    /// Compares the stored fingerprint and option hash against the current
    /// archive. An `arg_hash` difference is only warned about: the index is
    /// usable but may reflect different semantics than requested.
    pub fn validate_against(
        &self,
        current: &Fingerprint,
        options: &MountOptions,
    ) -> Result<FingerprintStatus> {
        let stored = self.load_fingerprint()?;
        let status = stored.check(current, options.verify_mtime);

        if let Some(stored_hash) = self.get_metadata(keys::ARG_HASH)? {
            let current_hash = options.arg_hash().to_string();
            if stored_hash != current_hash {
                warn!(
                    "index was created with different options (hash {stored_hash} vs \
                     {current_hash}); listings may not reflect the requested semantics"
                );
            }
        }
        Ok(status)
    }

    /// Stores the archive fingerprint.
    pub fn store_fingerprint(&self, fingerprint: &Fingerprint) -> Result<()> {
        self.set_metadata(keys::ARCHIVE_SIZE, &fingerprint.size.to_string())?;
        if let Some(mtime) = fingerprint.mtime {
            self.set_metadata(keys::ARCHIVE_MTIME, &mtime.to_string())?;
        }
        self.set_metadata(keys::HEAD_CRC, &fingerprint.head_crc.to_string())?;
        self.set_metadata(keys::TAIL_CRC, &fingerprint.tail_crc.to_string())?;
        Ok(())
    }

    /// Loads the stored archive fingerprint.
    pub fn load_fingerprint(&self) -> Result<Fingerprint> {
        let get_u64 = |key: &str| -> Result<u64> {
            self.get_metadata(key)?
                .and_then(|v| v.parse().ok())
                .ok_or_else(|| Error::IndexCorrupt(format!("missing metadata key {key}")))
        };
        Ok(Fingerprint {
            size: get_u64(keys::ARCHIVE_SIZE)?,
            mtime: self
                .get_metadata(keys::ARCHIVE_MTIME)?
                .and_then(|v| v.parse().ok()),
            head_crc: get_u64(keys::HEAD_CRC)? as u32,
            tail_crc: get_u64(keys::TAIL_CRC)? as u32,
        })
    }

    /// Sets a `metadata` key.
    pub fn set_metadata(&self, key: &str, value: &str) -> Result<()> {
        let conn = self.conn.lock().expect("index connection poisoned");
        conn.execute(
            "INSERT OR REPLACE INTO metadata (key, value) VALUES (?1, ?2)",
            params![key, value],
        )
        .map_err(db_err)?;
        Ok(())
    }

    /// Reads a `metadata` key.
    pub fn get_metadata(&self, key: &str) -> Result<Option<String>> {
        let conn = self.conn.lock().expect("index connection poisoned");
        conn.query_row(
            "SELECT value FROM metadata WHERE key = ?1",
            params![key],
            |row| row.get(0),
        )
        .optional()
        .map_err(db_err)
    }

    /// Inserts entries in batched transactions, assigning versions in
    /// insertion order per `(parent, name)`.
    pub fn insert_entries(&self, entries: &[FileEntry]) -> Result<()> {
        let rows: Vec<IndexedEntry> = entries
            .iter()
            .map(|entry| IndexedEntry {
                entry: entry.clone(),
                header_offset: None,
            })
            .collect();
        self.insert_indexed(&rows)
    }

    /// Resolves `(parent, name)` to its highest-version entry.
    pub fn lookup(&self, parent: &str, name: &str) -> Result<Option<FileEntry>> {
        let conn = self.conn.lock().expect("index connection poisoned");
        conn.query_row(
            &format!("{SELECT_ENTRY} WHERE parent = ?1 AND name = ?2 ORDER BY version DESC LIMIT 1"),
            params![parent, name],
            decode_entry,
        )
        .optional()
        .map_err(db_err)
    }

    /// Resolves a specific version of `(parent, name)`.
    pub fn lookup_version(
        &self,
        parent: &str,
        name: &str,
        version: u64,
    ) -> Result<Option<FileEntry>> {
        let conn = self.conn.lock().expect("index connection poisoned");
        conn.query_row(
            &format!("{SELECT_ENTRY} WHERE parent = ?1 AND name = ?2 AND version = ?3"),
            params![parent, name, version as i64],
            decode_entry,
        )
        .optional()
        .map_err(db_err)
    }

    /// Number of versions recorded at `(parent, name)`.
    pub fn count_versions(&self, parent: &str, name: &str) -> Result<u64> {
        let conn = self.conn.lock().expect("index connection poisoned");
        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM files WHERE parent = ?1 AND name = ?2",
                params![parent, name],
                |row| row.get(0),
            )
            .map_err(db_err)?;
        Ok(count as u64)
    }

    /// Lists the current version of every entry under `parent`.
    pub fn list(&self, parent: &str) -> Result<Vec<(String, FileEntry)>> {
        let conn = self.conn.lock().expect("index connection poisoned");
        let mut stmt = conn
            .prepare_cached(&format!(
                "{SELECT_ENTRY} WHERE parent = ?1 AND version = (
                    SELECT MAX(version) FROM files f2
                    WHERE f2.parent = files.parent AND f2.name = files.name
                )"
            ))
            .map_err(db_err)?;
        let rows = stmt
            .query_map(params![parent], decode_entry)
            .map_err(db_err)?;
        let mut entries = Vec::new();
        for row in rows {
            let entry = row.map_err(db_err)?;
            entries.push((entry.name.clone(), entry));
        }
        Ok(entries)
    }

    /// All entries in archive order with their header offsets, current and
    /// shadowed versions alike. Used by the overlay commit.
    pub fn all_entries_by_offset(&self) -> Result<Vec<(FileEntry, u64)>> {
        let conn = self.conn.lock().expect("index connection poisoned");
        let mut stmt = conn
            .prepare(&format!(
                "{SELECT_ENTRY} WHERE header_offset IS NOT NULL ORDER BY header_offset"
            ))
            .map_err(db_err)?;
        let rows = stmt
            .query_map([], |row| {
                let header_offset: i64 = row.get(11)?;
                Ok((decode_entry(row)?, header_offset as u64))
            })
            .map_err(db_err)?;
        let mut entries = Vec::new();
        for row in rows {
            entries.push(row.map_err(db_err)?);
        }
        Ok(entries)
    }

    /// Total number of entry rows.
    pub fn file_count(&self) -> Result<u64> {
        let conn = self.conn.lock().expect("index connection poisoned");
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM files", [], |row| row.get(0))
            .map_err(db_err)?;
        Ok(count as u64)
    }

    /// Stores the checkpoint sequence for a codec stream.
    pub fn store_checkpoints(&self, codec: &str, checkpoints: &CheckpointIndex) -> Result<()> {
        let mut conn = self.conn.lock().expect("index connection poisoned");
        let tx = conn.transaction().map_err(db_err)?;
        {
            let mut stmt = tx
                .prepare(
                    "INSERT OR REPLACE INTO stream_index
                     (codec, uncompressed_offset, compressed_offset, window)
                     VALUES (?1, ?2, ?3, ?4)",
                )
                .map_err(db_err)?;
            for point in checkpoints.export() {
                stmt.execute(params![
                    codec,
                    point.uncompressed_offset as i64,
                    point.compressed_offset as i64,
                    point.window,
                ])
                .map_err(db_err)?;
            }
        }
        tx.commit().map_err(db_err)?;
        Ok(())
    }

    /// Loads the checkpoint sequence for a codec stream.
    pub fn load_checkpoints(&self, codec: &str) -> Result<CheckpointIndex> {
        let conn = self.conn.lock().expect("index connection poisoned");
        let mut stmt = conn
            .prepare(
                "SELECT uncompressed_offset, compressed_offset, window
                 FROM stream_index WHERE codec = ?1 ORDER BY uncompressed_offset",
            )
            .map_err(db_err)?;
        let rows = stmt
            .query_map(params![codec], |row| {
                Ok(Checkpoint {
                    uncompressed_offset: row.get::<_, i64>(0)? as u64,
                    compressed_offset: row.get::<_, i64>(1)? as u64,
                    window: row.get(2)?,
                })
            })
            .map_err(db_err)?;
        let mut points = Vec::new();
        for row in rows {
            points.push(row.map_err(db_err)?);
        }
        CheckpointIndex::import(points)
    }

    /// Marks indexing complete and compacts the database.
    pub fn finalize(&self) -> Result<()> {
        self.set_metadata(keys::INDEX_COMPLETE, "1")?;
        let conn = self.conn.lock().expect("index connection poisoned");
        if self.path.is_some() {
            conn.execute_batch("VACUUM").map_err(db_err)?;
        }
        debug!("index finalized at {:?}", self.path);
        Ok(())
    }
}

const SELECT_ENTRY: &str = "SELECT parent, name, version, kind, mode, uid, gid, mtime, size,
    offset, stored_size, header_offset, host_path, linkname, sparsity, xattrs,
    encrypted, mtime_absent FROM files";

fn decode_entry(row: &rusqlite::Row<'_>) -> rusqlite::Result<FileEntry> {
    let offset: Option<i64> = row.get(9)?;
    let stored_size: Option<i64> = row.get(10)?;
    let host_path: Option<String> = row.get(12)?;
    let sparsity: Option<Vec<u8>> = row.get(14)?;
    let locator = match (offset, host_path) {
        (Some(offset), _) => Locator::Archive {
            offset: offset as u64,
            stored_size: stored_size.unwrap_or(0) as u64,
            sparsity: match sparsity {
                Some(blob) => Some(SparseMap::from_blob(&blob).map_err(|_| {
                    rusqlite::Error::FromSqlConversionFailure(
                        14,
                        rusqlite::types::Type::Blob,
                        "malformed sparsity blob".into(),
                    )
                })?),
                None => None,
            },
        },
        (None, Some(path)) => Locator::Host(PathBuf::from(path)),
        (None, None) => Locator::None,
    };
    let xattrs: Option<Vec<u8>> = row.get(15)?;
    Ok(FileEntry {
        parent: row.get(0)?,
        name: row.get(1)?,
        version: row.get::<_, i64>(2)? as u64,
        kind: EntryKind::from_code(row.get(3)?).map_err(|_| {
            rusqlite::Error::FromSqlConversionFailure(
                3,
                rusqlite::types::Type::Integer,
                "unknown entry kind".into(),
            )
        })?,
        mode: row.get(4)?,
        uid: row.get(5)?,
        gid: row.get(6)?,
        mtime: row.get(7)?,
        size: row.get::<_, i64>(8)? as u64,
        link_target: row.get(13)?,
        locator,
        route: Vec::new(),
        xattrs: xattrs.map(|blob| decode_xattrs(&blob)).unwrap_or_default(),
        encrypted: row.get::<_, i64>(16)? != 0,
        mtime_absent: row.get::<_, i64>(17)? != 0,
    })
}

type LocatorColumns = (Option<i64>, Option<i64>, Option<String>, Option<Vec<u8>>);

fn encode_locator(locator: &Locator) -> LocatorColumns {
    match locator {
        Locator::None => (None, None, None, None),
        Locator::Archive {
            offset,
            stored_size,
            sparsity,
        } => (
            Some(*offset as i64),
            Some(*stored_size as i64),
            None,
            sparsity.as_ref().map(SparseMap::to_blob),
        ),
        Locator::Host(path) => (None, None, Some(path.display().to_string()), None),
    }
}

/// Encodes xattrs as length-prefixed `(name, value)` pairs.
fn encode_xattrs(xattrs: &BTreeMap<String, Vec<u8>>) -> Option<Vec<u8>> {
    if xattrs.is_empty() {
        return None;
    }
    let mut blob = Vec::new();
    let mut scratch = [0u8; 4];
    for (name, value) in xattrs {
        LittleEndian::write_u32(&mut scratch, name.len() as u32);
        blob.extend_from_slice(&scratch);
        blob.extend_from_slice(name.as_bytes());
        LittleEndian::write_u32(&mut scratch, value.len() as u32);
        blob.extend_from_slice(&scratch);
        blob.extend_from_slice(value);
    }
    Some(blob)
}

fn decode_xattrs(blob: &[u8]) -> BTreeMap<String, Vec<u8>> {
    let mut xattrs = BTreeMap::new();
    let mut at = 0usize;
    while at + 4 <= blob.len() {
        let name_len = LittleEndian::read_u32(&blob[at..at + 4]) as usize;
        at += 4;
        if at + name_len + 4 > blob.len() {
            break;
        }
        let name = String::from_utf8_lossy(&blob[at..at + name_len]).into_owned();
        at += name_len;
        let value_len = LittleEndian::read_u32(&blob[at..at + 4]) as usize;
        at += 4;
        if at + value_len > blob.len() {
            break;
        }
        xattrs.insert(name, blob[at..at + value_len].to_vec());
        at += value_len;
    }
    xattrs
}

/// A [`FileEntry`] whose locator carries the raw header offset too.
///
/// The `files` schema stores `header_offset` separately from the data
/// locator so the overlay commit can copy raw entry spans; the tar indexer
/// supplies it through this pair.
#[derive(Debug, Clone)]
pub struct IndexedEntry {
    /// The entry itself.
    pub entry: FileEntry,
    /// Offset of the first header block contributing to the entry.
    pub header_offset: Option<u64>,
}

impl SqliteIndex {
    /// Inserts entries together with their raw header offsets.
    pub fn insert_indexed(&self, rows: &[IndexedEntry]) -> Result<()> {
        // Same statement as insert_entries, with header_offset filled in.
        let mut conn = self.conn.lock().expect("index connection poisoned");
        for chunk in rows.chunks(BATCH_SIZE) {
            let tx = conn.transaction().map_err(db_err)?;
            {
                let mut stmt = tx
                    .prepare_cached(
                        "INSERT INTO files (
                            parent, name, version, kind, mode, uid, gid, mtime, size,
                            offset, stored_size, header_offset, host_path, linkname,
                            sparsity, xattrs, encrypted, mtime_absent
                        ) VALUES (
                            ?1, ?2,
                            1 + (SELECT COUNT(*) FROM files WHERE parent = ?1 AND name = ?2),
                            ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17
                        )",
                    )
                    .map_err(db_err)?;
                for row in chunk {
                    let entry = &row.entry;
                    let (offset, stored_size, host_path, sparsity) =
                        encode_locator(&entry.locator);
                    stmt.execute(params![
                        entry.parent,
                        entry.name,
                        entry.kind.code(),
                        entry.mode,
                        entry.uid,
                        entry.gid,
                        entry.mtime,
                        entry.size as i64,
                        offset,
                        stored_size,
                        row.header_offset.map(|o| o as i64),
                        host_path,
                        entry.link_target,
                        sparsity,
                        encode_xattrs(&entry.xattrs),
                        entry.encrypted as i64,
                        entry.mtime_absent as i64,
                    ])
                    .map_err(db_err)?;
                }
            }
            tx.commit().map_err(db_err)?;
        }
        Ok(())
    }

    /// Header offset column for the entry at `(parent, name, version)`.
    pub fn header_offset(&self, parent: &str, name: &str, version: u64) -> Result<Option<u64>> {
        let conn = self.conn.lock().expect("index connection poisoned");
        let offset: Option<Option<i64>> = conn
            .query_row(
                "SELECT header_offset FROM files
                 WHERE parent = ?1 AND name = ?2 AND version = ?3",
                params![parent, name, version as i64],
                |row| row.get(0),
            )
            .optional()
            .map_err(db_err)?;
        Ok(offset.flatten().map(|o| o as u64))
    }
}

/// Decides where the index for `archive_path` should live.
///
/// Returns `None` when no writable location exists (the caller indexes in
/// memory).
pub fn resolve_index_path(archive_path: &Path, options: &MountOptions) -> Option<PathBuf> {
    if let Some(explicit) = &options.index_path {
        return Some(explicit.clone());
    }

    let file_name = archive_path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "archive".to_string());
    let sidecar_name = format!("{file_name}{INDEX_SUFFIX}");

    if let Some(dir) = archive_path.parent() {
        let dir = if dir.as_os_str().is_empty() {
            Path::new(".")
        } else {
            dir
        };
        if dir_is_writable(dir) {
            return Some(dir.join(&sidecar_name));
        }
    }

    for folder in &options.index_folders {
        if dir_is_writable(folder) {
            // Disambiguate same-named archives from different directories.
            let tag = crc32fast::hash(archive_path.display().to_string().as_bytes());
            return Some(folder.join(format!("{tag:08x}-{sidecar_name}")));
        }
    }
    None
}

fn dir_is_writable(dir: &Path) -> bool {
    tempfile::Builder::new()
        .prefix(".arcmount-probe")
        .tempfile_in(dir)
        .is_ok()
}

/// Detects a gzip-compressed index file and decompresses it to a temp file.
fn materialize_if_compressed(path: &Path) -> Result<(PathBuf, Option<tempfile::TempPath>)> {
    let mut head = [0u8; 16];
    let n = {
        use std::io::Read;
        let mut file = std::fs::File::open(path)?;
        file.read(&mut head)?
    };
    if head[..n].starts_with(b"SQLite format 3\0") {
        return Ok((path.to_path_buf(), None));
    }

    #[cfg(feature = "gzip")]
    if head[..n].starts_with(&[0x1F, 0x8B]) {
        let tmp_dir = std::env::var_os(INDEX_TMPDIR_VAR)
            .map(PathBuf::from)
            .unwrap_or_else(std::env::temp_dir);
        let mut tmp = tempfile::Builder::new()
            .prefix("arcmount-index-")
            .suffix(".sqlite")
            .tempfile_in(tmp_dir)?;
        let file = std::fs::File::open(path)?;
        let mut decoder = flate2::read::MultiGzDecoder::new(file);
        std::io::copy(&mut decoder, &mut tmp)?;
        let tmp_path = tmp.into_temp_path();
        return Ok((tmp_path.to_path_buf(), Some(tmp_path)));
    }

    Err(Error::IndexCorrupt(format!(
        "{} is neither an SQLite database nor a compressed one",
        path.display()
    )))
}
