//! Committing overlay deletions back to the source tar.
//!
//! The only write-back the layer supports: re-emitting the underlying tar
//! with the hidden entries removed. Raw entry spans — extension blocks,
//! header, data, padding — are copied verbatim from the (possibly decoded)
//! archive stream, so kept entries survive byte-identical; nothing is
//! re-encoded. Content modifications stay in the overlay folder, which
//! remains the editable view.

use std::collections::HashSet;
use std::io::Write;

use log::debug;

use crate::source::tar::TarMountSource;
use crate::stream::SeekableStream;
use crate::Result;

use super::WriteOverlay;

/// Outcome of a commit.
#[derive(Debug, Clone, Default)]
pub struct CommitStats {
    /// Entries copied into the new archive.
    pub entries_kept: u64,
    /// Entries dropped because the overlay hid them.
    pub entries_removed: u64,
    /// Bytes written, terminator included.
    pub bytes_written: u64,
}

/// Writes `tar` minus the overlay's hidden entries to `output`.
pub fn commit_overlay(
    tar: &TarMountSource,
    overlay: &WriteOverlay,
    output: &mut dyn Write,
) -> Result<CommitStats> {
    let hidden: HashSet<String> = overlay.hidden_paths()?.into_iter().collect();
    let entries = tar.index().all_entries_by_offset()?;
    let parsed_until = tar.parsed_until()?;
    let stream = tar.archive_stream();

    let mut stats = CommitStats::default();
    let mut copy_buf = vec![0u8; 128 * 1024];

    for (position, (entry, header_offset)) in entries.iter().enumerate() {
        // The raw span runs to the next entry's first block (or the
        // archive terminator), covering extension blocks and padding.
        let span_end = entries
            .get(position + 1)
            .map(|(_, next_offset)| *next_offset)
            .unwrap_or(parsed_until);
        if hidden.contains(&entry.path()) {
            debug!("commit drops {} ({} bytes)", entry.path(), span_end - header_offset);
            stats.entries_removed += 1;
            continue;
        }
        stats.entries_kept += 1;

        let mut offset = *header_offset;
        while offset < span_end {
            let take = copy_buf.len().min((span_end - offset) as usize);
            let n = stream.read_at(offset, &mut copy_buf[..take])?;
            if n == 0 {
                return Err(crate::Error::Truncated {
                    offset,
                    expected: span_end - offset,
                });
            }
            output.write_all(&copy_buf[..n])?;
            offset += n as u64;
            stats.bytes_written += n as u64;
        }
    }

    // Archive terminator: two zero blocks.
    let terminator = [0u8; 1024];
    output.write_all(&terminator)?;
    stats.bytes_written += terminator.len() as u64;
    Ok(stats)
}
