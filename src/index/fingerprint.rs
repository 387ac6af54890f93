//! Archive fingerprints: deciding whether a cached index still matches.
//!
//! A fingerprint is cheap to compute — size, optional mtime, and CRC-32 of
//! the first and last kiB — and is stored in the index `metadata` table.
//! On open, the stored fingerprint is compared against the archive: an exact
//! match keeps the index, pure growth with an unchanged head offers the
//! append path to the tar indexer, anything else forces a rebuild.

use std::sync::Arc;

use crate::stream::SeekableStream;
use crate::Result;

/// Bytes hashed at each end of the archive.
const PROBE_LENGTH: usize = 1024;

/// Identity of an archive at one point in time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fingerprint {
    /// Archive size in bytes.
    pub size: u64,
    /// Archive mtime in seconds, when the backing store has one.
    pub mtime: Option<i64>,
    /// CRC-32 of the first kiB.
    pub head_crc: u32,
    /// CRC-32 of the last kiB.
    pub tail_crc: u32,
}

/// Outcome of comparing a stored fingerprint against the current archive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FingerprintStatus {
    /// The index matches the archive.
    Match,
    /// The archive grew and its head is unchanged; the index can be
    /// extended by parsing only the tail.
    Grew,
    /// The index belongs to different contents; rebuild.
    Mismatch(String),
}

impl Fingerprint {
    /// Computes the fingerprint of a stream, with an optional mtime from
    /// the backing store.
    pub fn compute(stream: &Arc<dyn SeekableStream>, mtime: Option<i64>) -> Result<Self> {
        let size = stream.size();
        let head = stream.read_range(0, PROBE_LENGTH)?;
        let tail_start = size.saturating_sub(PROBE_LENGTH as u64);
        let tail = stream.read_range(tail_start, PROBE_LENGTH)?;
        Ok(Self {
            size,
            mtime,
            head_crc: crc32fast::hash(&head),
            tail_crc: crc32fast::hash(&tail),
        })
    }

    /// Compares `self` (stored in an index) against `current`.
    ///
    /// `verify_mtime` controls whether mtime differences count; it is off by
    /// default because downloads routinely rewrite mtimes without touching
    /// contents.
    pub fn check(&self, current: &Fingerprint, verify_mtime: bool) -> FingerprintStatus {
        if verify_mtime {
            if let (Some(stored), Some(now)) = (self.mtime, current.mtime) {
                if stored != now {
                    return FingerprintStatus::Mismatch(format!(
                        "mtime changed from {stored} to {now}"
                    ));
                }
            }
        }
        if self.size == current.size {
            if self.head_crc != current.head_crc {
                return FingerprintStatus::Mismatch("leading bytes changed".into());
            }
            if self.tail_crc != current.tail_crc {
                return FingerprintStatus::Mismatch("trailing bytes changed".into());
            }
            return FingerprintStatus::Match;
        }
        if self.size < current.size && self.head_crc == current.head_crc {
            return FingerprintStatus::Grew;
        }
        FingerprintStatus::Mismatch(format!(
            "size changed from {} to {}",
            self.size, current.size
        ))
    }
}
