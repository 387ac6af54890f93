//! The copy-on-write overlay layer.
//!
//! Wraps any read-only mount source with write semantics backed by a host
//! folder plus a companion SQLite database of markers. File bytes always
//! live as plain host files in the overlay folder; the database records
//! what the host filesystem cannot: deletions of underlying entries
//! (`hidden`), renames of unmaterialized entries (`renamed`), and
//! metadata-only overrides (`chmoded`, `chtimed`). A host file at a path
//! always wins over both markers and the underlying source.

pub mod commit;

pub use commit::{commit_overlay, CommitStats};

use std::collections::BTreeMap;
use std::io::{Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use rusqlite::{params, Connection, OptionalExtension};

use crate::paths;
use crate::source::{EntryKind, FileEntry, Locator, MountSource, StatFs};
use crate::stream::{FileStream, SeekableStream};
use crate::{Error, Result};

/// File name of the overlay marker database inside the overlay folder.
pub const OVERLAY_DB_NAME: &str = ".arcmount.overlay.sqlite";

/// Route tag for entries served from the overlay folder.
const FROM_OVERLAY: u32 = 1;
/// Route tag for entries served from the underlying source.
const FROM_BASE: u32 = 0;

fn db_err(e: rusqlite::Error) -> Error {
    Error::IndexCorrupt(format!("overlay database: {e}"))
}

/// Marker kinds recorded in the overlay database.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Marker {
    Hidden,
    /// Payload: the original path in the underlying source.
    Renamed(String),
    /// Payload: mode, uid, gid overrides.
    Chmoded { mode: u32, uid: u32, gid: u32 },
    /// Payload: mtime override.
    Chtimed(i64),
    NewFile,
}

impl Marker {
    fn kind(&self) -> &'static str {
        match self {
            Marker::Hidden => "hidden",
            Marker::Renamed(_) => "renamed",
            Marker::Chmoded { .. } => "chmoded",
            Marker::Chtimed(_) => "chtimed",
            Marker::NewFile => "newfile",
        }
    }

    fn payload(&self) -> String {
        match self {
            Marker::Hidden | Marker::NewFile => String::new(),
            Marker::Renamed(original) => original.clone(),
            Marker::Chmoded { mode, uid, gid } => {
                serde_json::json!({ "mode": mode, "uid": uid, "gid": gid }).to_string()
            }
            Marker::Chtimed(mtime) => serde_json::json!({ "mtime": mtime }).to_string(),
        }
    }

    fn decode(kind: &str, payload: &str) -> Result<Self> {
        Ok(match kind {
            "hidden" => Marker::Hidden,
            "renamed" => Marker::Renamed(payload.to_string()),
            "newfile" => Marker::NewFile,
            "chmoded" => {
                let value: serde_json::Value = serde_json::from_str(payload)
                    .map_err(|e| Error::IndexCorrupt(format!("overlay payload: {e}")))?;
                Marker::Chmoded {
                    mode: value["mode"].as_u64().unwrap_or(0o644) as u32,
                    uid: value["uid"].as_u64().unwrap_or(0) as u32,
                    gid: value["gid"].as_u64().unwrap_or(0) as u32,
                }
            }
            "chtimed" => {
                let value: serde_json::Value = serde_json::from_str(payload)
                    .map_err(|e| Error::IndexCorrupt(format!("overlay payload: {e}")))?;
                Marker::Chtimed(value["mtime"].as_i64().unwrap_or(0))
            }
            other => {
                return Err(Error::IndexCorrupt(format!(
                    "unknown overlay marker kind '{other}'"
                )));
            }
        })
    }
}

/// A mount source with copy-on-write semantics.
pub struct WriteOverlay {
    base: Arc<dyn MountSource>,
    folder: PathBuf,
    db: Mutex<Connection>,
}

impl WriteOverlay {
    /// Opens (or initializes) an overlay over `base` backed by `folder`.
    pub fn new(base: Arc<dyn MountSource>, folder: impl Into<PathBuf>) -> Result<Self> {
        let folder = folder.into();
        std::fs::create_dir_all(&folder)?;
        let db_path = folder.join(OVERLAY_DB_NAME);
        let conn = Connection::open(&db_path).map_err(|_| Error::IndexNotWritable {
            path: db_path.display().to_string(),
        })?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS overlay (
                path    TEXT NOT NULL,
                kind    TEXT NOT NULL,
                payload TEXT NOT NULL DEFAULT '',
                PRIMARY KEY (path, kind)
            );",
        )
        .map_err(db_err)?;
        Ok(Self {
            base,
            folder,
            db: Mutex::new(conn),
        })
    }

    /// The underlying read-only source.
    pub fn base(&self) -> &Arc<dyn MountSource> {
        &self.base
    }

    /// The overlay folder.
    pub fn folder(&self) -> &Path {
        &self.folder
    }

    fn host_path(&self, path: &str) -> PathBuf {
        let mut host = self.folder.clone();
        for component in paths::components(path) {
            host.push(component);
        }
        host
    }

    fn markers(&self, path: &str) -> Result<Vec<Marker>> {
        let conn = self.db.lock().expect("overlay db poisoned");
        let mut stmt = conn
            .prepare_cached("SELECT kind, payload FROM overlay WHERE path = ?1")
            .map_err(db_err)?;
        let rows = stmt
            .query_map(params![path], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })
            .map_err(db_err)?;
        let mut markers = Vec::new();
        for row in rows {
            let (kind, payload) = row.map_err(db_err)?;
            markers.push(Marker::decode(&kind, &payload)?);
        }
        Ok(markers)
    }

    fn put_marker(&self, path: &str, marker: &Marker) -> Result<()> {
        let conn = self.db.lock().expect("overlay db poisoned");
        conn.execute(
            "INSERT OR REPLACE INTO overlay (path, kind, payload) VALUES (?1, ?2, ?3)",
            params![path, marker.kind(), marker.payload()],
        )
        .map_err(db_err)?;
        Ok(())
    }

    fn remove_marker(&self, path: &str, kind: Option<&str>) -> Result<()> {
        let conn = self.db.lock().expect("overlay db poisoned");
        match kind {
            Some(kind) => conn
                .execute(
                    "DELETE FROM overlay WHERE path = ?1 AND kind = ?2",
                    params![path, kind],
                )
                .map_err(db_err)?,
            None => conn
                .execute("DELETE FROM overlay WHERE path = ?1", params![path])
                .map_err(db_err)?,
        };
        Ok(())
    }

    fn has_marker(&self, path: &str, kind: &str) -> Result<bool> {
        let conn = self.db.lock().expect("overlay db poisoned");
        let found: Option<String> = conn
            .query_row(
                "SELECT kind FROM overlay WHERE path = ?1 AND kind = ?2",
                params![path, kind],
                |row| row.get(0),
            )
            .optional()
            .map_err(db_err)?;
        Ok(found.is_some())
    }

    /// All paths with a `hidden` marker.
    pub fn hidden_paths(&self) -> Result<Vec<String>> {
        let conn = self.db.lock().expect("overlay db poisoned");
        let mut stmt = conn
            .prepare("SELECT path FROM overlay WHERE kind = 'hidden' ORDER BY path")
            .map_err(db_err)?;
        let rows = stmt
            .query_map([], |row| row.get::<_, String>(0))
            .map_err(db_err)?;
        let mut hidden = Vec::new();
        for row in rows {
            hidden.push(row.map_err(db_err)?);
        }
        Ok(hidden)
    }

    /// Entries renamed *into* `parent`: `(new_name, original_path)`.
    fn renamed_into(&self, parent: &str) -> Result<Vec<(String, String)>> {
        let conn = self.db.lock().expect("overlay db poisoned");
        let mut stmt = conn
            .prepare("SELECT path, payload FROM overlay WHERE kind = 'renamed'")
            .map_err(db_err)?;
        let rows = stmt
            .query_map([], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })
            .map_err(db_err)?;
        let mut renamed = Vec::new();
        for row in rows {
            let (new_path, original) = row.map_err(db_err)?;
            let (new_parent, new_name) = paths::split(&new_path);
            if new_parent == parent {
                renamed.push((new_name.to_string(), original));
            }
        }
        Ok(renamed)
    }

    /// Applies metadata overrides to a base entry.
    fn apply_overrides(&self, path: &str, mut entry: FileEntry) -> Result<FileEntry> {
        for marker in self.markers(path)? {
            match marker {
                Marker::Chmoded { mode, uid, gid } => {
                    entry.mode = mode & 0o7777;
                    entry.uid = uid;
                    entry.gid = gid;
                }
                Marker::Chtimed(mtime) => entry.mtime = mtime,
                _ => {}
            }
        }
        Ok(entry)
    }

    fn host_entry(&self, path: &str) -> Result<Option<FileEntry>> {
        let host = self.host_path(path);
        let metadata = match std::fs::symlink_metadata(&host) {
            Ok(metadata) => metadata,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let (parent, name) = paths::split(path);
        let mut entry = host_metadata_entry(parent, name, &host, &metadata);
        entry.route_push(FROM_OVERLAY);
        Ok(Some(entry))
    }

    /// Resolves a path without stamping route tags (internal).
    fn resolve_base(&self, path: &str) -> Result<Option<FileEntry>> {
        if self.has_marker(path, "hidden")? {
            return Ok(None);
        }
        for marker in self.markers(path)? {
            if let Marker::Renamed(original) = marker {
                if let Some(entry) = self.base.lookup(&original)? {
                    let (parent, name) = paths::split(path);
                    let renamed = FileEntry {
                        parent: parent.to_string(),
                        name: name.to_string(),
                        ..entry
                    };
                    return Ok(Some(self.apply_overrides(path, renamed)?));
                }
                return Ok(None);
            }
        }
        match self.base.lookup(path)? {
            Some(entry) => Ok(Some(self.apply_overrides(path, entry)?)),
            None => Ok(None),
        }
    }

    /// Copies underlying bytes into the overlay folder so they can be
    /// modified in place. No-op when the path is already materialized.
    fn materialize(&self, path: &str) -> Result<PathBuf> {
        let host = self.host_path(path);
        if host.exists() {
            return Ok(host);
        }
        if let Some(parent) = host.parent() {
            std::fs::create_dir_all(parent)?;
        }
        if let Some(entry) = self.resolve_base(path)? {
            if entry.kind == EntryKind::Regular {
                let stream = self.base.open(&entry)?;
                let mut out = std::fs::File::create(&host)?;
                let mut offset = 0u64;
                let mut buf = vec![0u8; 128 * 1024];
                loop {
                    let n = stream.read_at(offset, &mut buf)?;
                    if n == 0 {
                        break;
                    }
                    out.write_all(&buf[..n])?;
                    offset += n as u64;
                }
            }
        }
        Ok(host)
    }

    // Write operations.

    /// Creates (or truncates) a file in the overlay.
    pub fn create(&self, path: &str, mode: u32) -> Result<()> {
        let path = paths::normalize(path)?;
        let host = self.host_path(&path);
        if let Some(parent) = host.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::File::create(&host)?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&host, std::fs::Permissions::from_mode(mode & 0o7777))?;
        }
        #[cfg(not(unix))]
        let _ = mode;
        self.remove_marker(&path, Some("hidden"))?;
        self.put_marker(&path, &Marker::NewFile)?;
        Ok(())
    }

    /// Writes `data` at `offset`, materializing underlying bytes first.
    pub fn write(&self, path: &str, offset: u64, data: &[u8]) -> Result<()> {
        let path = paths::normalize(path)?;
        if self.lookup(&path)?.is_none() {
            return Err(Error::not_found(&path));
        }
        let host = self.materialize(&path)?;
        let mut file = std::fs::OpenOptions::new().write(true).open(host)?;
        file.seek(SeekFrom::Start(offset))?;
        file.write_all(data)?;
        Ok(())
    }

    /// Truncates to `length`, materializing underlying bytes first.
    pub fn truncate(&self, path: &str, length: u64) -> Result<()> {
        let path = paths::normalize(path)?;
        if self.lookup(&path)?.is_none() {
            return Err(Error::not_found(&path));
        }
        let host = self.materialize(&path)?;
        let file = std::fs::OpenOptions::new().write(true).open(host)?;
        file.set_len(length)?;
        Ok(())
    }

    /// Creates a directory.
    ///
    /// A `hidden` marker at the path is kept: remaking a deleted underlying
    /// directory yields an empty directory, not a resurrected one.
    pub fn mkdir(&self, path: &str, mode: u32) -> Result<()> {
        let path = paths::normalize(path)?;
        let host = self.host_path(&path);
        std::fs::create_dir_all(&host)?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&host, std::fs::Permissions::from_mode(mode & 0o7777))?;
        }
        #[cfg(not(unix))]
        let _ = mode;
        Ok(())
    }

    /// Deletes a file: removed from the overlay folder, hidden from the
    /// underlying source.
    pub fn unlink(&self, path: &str) -> Result<()> {
        let path = paths::normalize(path)?;
        let host = self.host_path(&path);
        let host_existed = host.is_file() || host.is_symlink();
        if host_existed {
            std::fs::remove_file(&host)?;
        }
        let in_base = self.resolve_base(&path)?.is_some();
        self.remove_marker(&path, None)?;
        if in_base {
            self.put_marker(&path, &Marker::Hidden)?;
        } else if !host_existed {
            return Err(Error::not_found(&path));
        }
        Ok(())
    }

    /// Deletes an empty directory.
    pub fn rmdir(&self, path: &str) -> Result<()> {
        let path = paths::normalize(path)?;
        match self.list(&path)? {
            None => return Err(Error::not_found(&path)),
            Some(listing) if !listing.is_empty() => {
                return Err(Error::Io(std::io::Error::new(
                    std::io::ErrorKind::DirectoryNotEmpty,
                    path.clone(),
                )));
            }
            Some(_) => {}
        }
        let host = self.host_path(&path);
        if host.is_dir() {
            std::fs::remove_dir(&host)?;
        }
        self.remove_marker(&path, None)?;
        if self.base.lookup(&path)?.is_some() {
            self.put_marker(&path, &Marker::Hidden)?;
        }
        Ok(())
    }

    /// Renames a file or directory.
    pub fn rename(&self, from: &str, to: &str) -> Result<()> {
        let from = paths::normalize(from)?;
        let to = paths::normalize(to)?;
        let from_host = self.host_path(&from);
        let to_host = self.host_path(&to);
        if let Some(parent) = to_host.parent() {
            std::fs::create_dir_all(parent)?;
        }

        if from_host.exists() || from_host.is_symlink() {
            std::fs::rename(&from_host, &to_host)?;
            self.remove_marker(&to, None)?;
            // A marker chain may still point at the old name.
            let from_markers = self.markers(&from)?;
            self.remove_marker(&from, None)?;
            for marker in from_markers {
                if let Marker::Renamed(original) = marker {
                    self.put_marker(&to, &Marker::Renamed(original))?;
                }
            }
            if self.base.lookup(&from)?.is_some() {
                self.put_marker(&from, &Marker::Hidden)?;
            }
            return Ok(());
        }

        let Some(_) = self.resolve_base(&from)? else {
            return Err(Error::not_found(&from));
        };
        // Underlying-only: record the mapping, hide the original. Bytes
        // materialize on first write through the renamed path.
        let original = self
            .markers(&from)?
            .into_iter()
            .find_map(|marker| match marker {
                Marker::Renamed(original) => Some(original),
                _ => None,
            })
            .unwrap_or_else(|| from.clone());
        self.remove_marker(&from, None)?;
        self.put_marker(&from, &Marker::Hidden)?;
        self.remove_marker(&to, None)?;
        self.put_marker(&to, &Marker::Renamed(original))?;
        Ok(())
    }

    /// Changes permissions and ownership.
    pub fn chmod(&self, path: &str, mode: u32, uid: u32, gid: u32) -> Result<()> {
        let path = paths::normalize(path)?;
        let host = self.host_path(&path);
        if host.exists() {
            #[cfg(unix)]
            {
                use std::os::unix::fs::PermissionsExt;
                std::fs::set_permissions(&host, std::fs::Permissions::from_mode(mode & 0o7777))?;
            }
            return Ok(());
        }
        if self.resolve_base(&path)?.is_none() {
            return Err(Error::not_found(&path));
        }
        // Metadata-only override: no byte materialization.
        self.put_marker(&path, &Marker::Chmoded { mode, uid, gid })?;
        Ok(())
    }

    /// Changes the modification time.
    pub fn utimens(&self, path: &str, mtime: i64) -> Result<()> {
        let path = paths::normalize(path)?;
        let host = self.host_path(&path);
        if host.exists() {
            let time = filetime::FileTime::from_unix_time(mtime, 0);
            filetime::set_file_times(&host, time, time)?;
            return Ok(());
        }
        if self.resolve_base(&path)?.is_none() {
            return Err(Error::not_found(&path));
        }
        self.put_marker(&path, &Marker::Chtimed(mtime))?;
        Ok(())
    }

    /// Creates a symlink at `path` pointing at `target`.
    pub fn symlink(&self, target: &str, path: &str) -> Result<()> {
        let path = paths::normalize(path)?;
        let host = self.host_path(&path);
        if let Some(parent) = host.parent() {
            std::fs::create_dir_all(parent)?;
        }
        #[cfg(unix)]
        std::os::unix::fs::symlink(target, &host)?;
        #[cfg(windows)]
        std::os::windows::fs::symlink_file(target, &host)?;
        self.remove_marker(&path, Some("hidden"))?;
        Ok(())
    }

    /// Creates a hardlink; both ends must be overlay files.
    pub fn hardlink(&self, original: &str, link: &str) -> Result<()> {
        let original = paths::normalize(original)?;
        let link = paths::normalize(link)?;
        let original_host = self.host_path(&original);
        if !original_host.is_file() {
            // Host filesystems cannot link into archive-backed bytes.
            if self.resolve_base(&original)?.is_some() {
                return Err(Error::CrossBackendHardlink { target: original });
            }
            return Err(Error::not_found(&original));
        }
        let link_host = self.host_path(&link);
        if let Some(parent) = link_host.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::hard_link(&original_host, &link_host)?;
        self.remove_marker(&link, Some("hidden"))?;
        Ok(())
    }
}

impl MountSource for WriteOverlay {
    fn lookup(&self, path: &str) -> Result<Option<FileEntry>> {
        let path = paths::normalize(path)?;
        if path == "/" {
            return Ok(Some(FileEntry::root()));
        }
        if let Some(entry) = self.host_entry(&path)? {
            return Ok(Some(entry));
        }
        Ok(self.resolve_base(&path)?.map(|mut entry| {
            entry.route_push(FROM_BASE);
            entry
        }))
    }

    fn list(&self, path: &str) -> Result<Option<Vec<(String, FileEntry)>>> {
        let path = paths::normalize(path)?;
        let mut merged: BTreeMap<String, FileEntry> = BTreeMap::new();
        let mut dir_exists = false;

        // A hidden directory never shows base children, even if a fresh
        // host directory now exists at the same path.
        let base_visible = path == "/" || !self.has_marker(&path, "hidden")?;
        if !base_visible && !self.host_path(&path).is_dir() {
            return Ok(None);
        }

        if let Some(base_listing) = self.base.list(&path)?.filter(|_| base_visible) {
            dir_exists = true;
            for (name, mut entry) in base_listing {
                let child_path = paths::join(&path, &name);
                if self.has_marker(&child_path, "hidden")? {
                    continue;
                }
                entry = self.apply_overrides(&child_path, entry)?;
                entry.route_push(FROM_BASE);
                merged.insert(name, entry);
            }
        }

        // Entries renamed into this directory from elsewhere.
        for (name, original) in self.renamed_into(&path)? {
            if let Some(entry) = self.base.lookup(&original)? {
                let child_path = paths::join(&path, &name);
                let mut renamed = FileEntry {
                    parent: path.clone(),
                    name: name.clone(),
                    ..entry
                };
                renamed = self.apply_overrides(&child_path, renamed)?;
                renamed.route_push(FROM_BASE);
                merged.insert(name, renamed);
            }
        }

        // The overlay folder overrides everything.
        let host = self.host_path(&path);
        match std::fs::read_dir(&host) {
            Ok(read_dir) => {
                dir_exists = true;
                for dir_entry in read_dir {
                    let dir_entry = dir_entry?;
                    let name = dir_entry.file_name().to_string_lossy().into_owned();
                    if path == "/" && name == OVERLAY_DB_NAME {
                        continue;
                    }
                    let child_host = dir_entry.path();
                    let metadata = match std::fs::symlink_metadata(&child_host) {
                        Ok(metadata) => metadata,
                        Err(_) => continue,
                    };
                    let mut entry =
                        host_metadata_entry(&path, &name, &child_host, &metadata);
                    entry.route_push(FROM_OVERLAY);
                    merged.insert(name, entry);
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotADirectory => {}
            Err(e) => return Err(e.into()),
        }

        if !dir_exists && path != "/" {
            // Neither side has the directory (or it is hidden).
            if self.lookup(&path)?.map(|e| e.is_dir()) != Some(true) {
                return Ok(None);
            }
        }
        Ok(Some(merged.into_iter().collect()))
    }

    fn versions(&self, path: &str) -> Result<u64> {
        let path = paths::normalize(path)?;
        if self.has_marker(&path, "hidden")? {
            return Ok(0);
        }
        let base_versions = self.base.versions(&path)?;
        if self.host_path(&path).exists() {
            Ok(base_versions + 1)
        } else {
            Ok(base_versions)
        }
    }

    fn open(&self, entry: &FileEntry) -> Result<Arc<dyn SeekableStream>> {
        let mut entry = entry.clone();
        match entry.route_pop() {
            Some(FROM_OVERLAY) => match &entry.locator {
                Locator::Host(host) => Ok(Arc::new(FileStream::open(host)?)),
                _ => Err(Error::invalid_path("overlay entry without host locator")),
            },
            Some(FROM_BASE) => self.base.open(&entry),
            _ => Err(Error::invalid_path("entry lost its overlay routing tag")),
        }
    }

    fn statfs(&self) -> StatFs {
        self.base.statfs()
    }

    fn enter(&self) -> Result<()> {
        self.base.enter()
    }

    fn exit(&self) -> Result<()> {
        self.base.exit()
    }

    fn backend_name(&self) -> &'static str {
        "write-overlay"
    }
}

fn host_metadata_entry(
    parent: &str,
    name: &str,
    host: &Path,
    metadata: &std::fs::Metadata,
) -> FileEntry {
    let file_type = metadata.file_type();
    let kind = if file_type.is_dir() {
        EntryKind::Directory
    } else if file_type.is_symlink() {
        EntryKind::Symlink
    } else {
        EntryKind::Regular
    };
    let link_target = if kind == EntryKind::Symlink {
        std::fs::read_link(host)
            .map(|target| target.to_string_lossy().into_owned())
            .unwrap_or_default()
    } else {
        String::new()
    };
    let (mode, uid, gid, mtime) = metadata_fields(metadata);
    FileEntry {
        parent: parent.to_string(),
        name: name.to_string(),
        version: 1,
        kind,
        mode,
        uid,
        gid,
        mtime,
        size: if kind == EntryKind::Regular {
            metadata.len()
        } else {
            0
        },
        link_target,
        locator: Locator::Host(host.to_path_buf()),
        route: Vec::new(),
        xattrs: BTreeMap::new(),
        encrypted: false,
        mtime_absent: false,
    }
}

#[cfg(unix)]
fn metadata_fields(metadata: &std::fs::Metadata) -> (u32, u32, u32, i64) {
    use std::os::unix::fs::MetadataExt;
    (
        metadata.mode() & 0o7777,
        metadata.uid(),
        metadata.gid(),
        metadata.mtime(),
    )
}

#[cfg(not(unix))]
fn metadata_fields(metadata: &std::fs::Metadata) -> (u32, u32, u32, i64) {
    let mtime = metadata
        .modified()
        .ok()
        .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0);
    (0o644, 0, 0, mtime)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::MountOptions;
    use crate::source::read_member;
    use crate::source::tar::TarMountSource;

    fn overlay_over_tar() -> (tempfile::TempDir, WriteOverlay) {
        let dir = tempfile::tempdir().unwrap();
        let mut builder = tar::Builder::new(Vec::new());
        for (path, data) in [("keep.txt", &b"kept"[..]), ("victim.txt", b"doomed")] {
            let mut tar_header = tar::Header::new_ustar();
            tar_header.set_size(data.len() as u64);
            tar_header.set_mode(0o644);
            tar_header.set_cksum();
            builder.append_data(&mut tar_header, path, data).unwrap();
        }
        let archive = dir.path().join("base.tar");
        std::fs::write(&archive, builder.into_inner().unwrap()).unwrap();
        let base: Arc<dyn MountSource> =
            Arc::new(TarMountSource::open(&archive, &MountOptions::default()).unwrap());
        let overlay = WriteOverlay::new(base, dir.path().join("upper")).unwrap();
        (dir, overlay)
    }

    #[test]
    fn test_transparent_passthrough() {
        let (_dir, overlay) = overlay_over_tar();
        assert_eq!(read_member(&overlay, "/keep.txt").unwrap(), b"kept");
        let mut names: Vec<String> = overlay
            .list("/")
            .unwrap()
            .unwrap()
            .into_iter()
            .map(|(name, _)| name)
            .collect();
        names.sort();
        assert_eq!(names, vec!["keep.txt", "victim.txt"]);
    }

    #[test]
    fn test_create_and_write_new_file() {
        let (_dir, overlay) = overlay_over_tar();
        overlay.create("/fresh.txt", 0o600).unwrap();
        overlay.write("/fresh.txt", 0, b"brand new").unwrap();
        assert_eq!(read_member(&overlay, "/fresh.txt").unwrap(), b"brand new");

        let entry = overlay.lookup("/fresh.txt").unwrap().unwrap();
        #[cfg(unix)]
        assert_eq!(entry.mode, 0o600);
        assert!(matches!(entry.locator, Locator::Host(_)));
    }

    #[test]
    fn test_copy_on_write_materializes_base_bytes() {
        let (_dir, overlay) = overlay_over_tar();
        overlay.write("/keep.txt", 4, b" and changed").unwrap();
        assert_eq!(
            read_member(&overlay, "/keep.txt").unwrap(),
            b"kept and changed"
        );
        // The underlying source still has the original bytes.
        assert_eq!(read_member(overlay.base().as_ref(), "/keep.txt").unwrap(), b"kept");
    }

    #[test]
    fn test_delete_hides_underlying_file() {
        let (_dir, overlay) = overlay_over_tar();
        overlay.unlink("/victim.txt").unwrap();
        assert!(overlay.lookup("/victim.txt").unwrap().is_none());
        let names: Vec<String> = overlay
            .list("/")
            .unwrap()
            .unwrap()
            .into_iter()
            .map(|(name, _)| name)
            .collect();
        assert_eq!(names, vec!["keep.txt"]);
        assert_eq!(overlay.hidden_paths().unwrap(), vec!["/victim.txt"]);

        // Deleting again reports absence.
        assert!(matches!(
            overlay.unlink("/victim.txt").unwrap_err(),
            Error::NotFound { .. }
        ));

        // Re-creating clears the tombstone.
        overlay.create("/victim.txt", 0o644).unwrap();
        overlay.write("/victim.txt", 0, b"reborn").unwrap();
        assert_eq!(read_member(&overlay, "/victim.txt").unwrap(), b"reborn");
        assert!(overlay.hidden_paths().unwrap().is_empty());
    }

    #[test]
    fn test_rename_underlying_without_materializing() {
        let (dir, overlay) = overlay_over_tar();
        overlay.rename("/victim.txt", "/renamed.txt").unwrap();

        assert!(overlay.lookup("/victim.txt").unwrap().is_none());
        assert_eq!(read_member(&overlay, "/renamed.txt").unwrap(), b"doomed");

        // No bytes were copied into the overlay folder.
        assert!(!dir.path().join("upper/renamed.txt").exists());

        // Listing shows the new name only.
        let mut names: Vec<String> = overlay
            .list("/")
            .unwrap()
            .unwrap()
            .into_iter()
            .map(|(name, _)| name)
            .collect();
        names.sort();
        assert_eq!(names, vec!["keep.txt", "renamed.txt"]);

        // Writing through the new name materializes.
        overlay.write("/renamed.txt", 0, b"DOOMED").unwrap();
        assert_eq!(read_member(&overlay, "/renamed.txt").unwrap(), b"DOOMED");
        assert!(dir.path().join("upper/renamed.txt").exists());
    }

    #[test]
    fn test_metadata_only_overrides() {
        let (dir, overlay) = overlay_over_tar();
        overlay.chmod("/keep.txt", 0o400, 1000, 1000).unwrap();
        overlay.utimens("/keep.txt", 123_456_789).unwrap();

        let entry = overlay.lookup("/keep.txt").unwrap().unwrap();
        assert_eq!(entry.mode, 0o400);
        assert_eq!(entry.uid, 1000);
        assert_eq!(entry.mtime, 123_456_789);

        // Still served from the archive, not the overlay folder.
        assert!(!dir.path().join("upper/keep.txt").exists());
        assert_eq!(read_member(&overlay, "/keep.txt").unwrap(), b"kept");
    }

    #[test]
    fn test_cross_backend_hardlink_fails() {
        let (_dir, overlay) = overlay_over_tar();
        let err = overlay.hardlink("/keep.txt", "/link.txt").unwrap_err();
        assert!(matches!(err, Error::CrossBackendHardlink { .. }));

        // Overlay-to-overlay hardlinks work.
        overlay.create("/a.txt", 0o644).unwrap();
        overlay.write("/a.txt", 0, b"shared").unwrap();
        overlay.hardlink("/a.txt", "/b.txt").unwrap();
        assert_eq!(read_member(&overlay, "/b.txt").unwrap(), b"shared");
    }

    #[cfg(unix)]
    #[test]
    fn test_symlink_to_underlying_path() {
        let (_dir, overlay) = overlay_over_tar();
        overlay.symlink("keep.txt", "/alias").unwrap();
        let entry = overlay.lookup("/alias").unwrap().unwrap();
        assert_eq!(entry.kind, EntryKind::Symlink);
        assert_eq!(entry.link_target, "keep.txt");
    }

    #[test]
    fn test_mkdir_rmdir() {
        let (_dir, overlay) = overlay_over_tar();
        overlay.mkdir("/newdir", 0o755).unwrap();
        assert!(overlay.lookup("/newdir").unwrap().unwrap().is_dir());

        overlay.create("/newdir/inner.txt", 0o644).unwrap();
        assert!(overlay.rmdir("/newdir").is_err());
        overlay.unlink("/newdir/inner.txt").unwrap();
        overlay.rmdir("/newdir").unwrap();
        assert!(overlay.lookup("/newdir").unwrap().is_none());
    }

    #[test]
    fn test_overlay_db_hidden_from_listing() {
        let (_dir, overlay) = overlay_over_tar();
        overlay.create("/visible.txt", 0o644).unwrap();
        let names: Vec<String> = overlay
            .list("/")
            .unwrap()
            .unwrap()
            .into_iter()
            .map(|(name, _)| name)
            .collect();
        assert!(!names.iter().any(|name| name == OVERLAY_DB_NAME));
    }
}
