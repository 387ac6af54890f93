//! pax extended header records.
//!
//! A pax header's data region is a sequence of `"<len> <key>=<value>\n"`
//! records where `<len>` counts the whole record including itself. Local
//! (`x`) records override the next entry only; global (`g`) records
//! override every following entry until overridden again. The GNU sparse
//! dialects 0.1 and 1.0 ride on pax keys and are interpreted here.

use std::collections::HashMap;

use crate::source::SparseMap;
use crate::{Error, Result};

/// Parsed pax records, keyed by attribute name.
#[derive(Debug, Clone, Default)]
pub struct PaxRecords {
    attributes: HashMap<String, String>,
}

impl PaxRecords {
    /// Parses a pax data region.
    pub fn parse(data: &[u8], offset: u64) -> Result<Self> {
        let mut attributes = HashMap::new();
        let mut rest = data;
        while !rest.is_empty() {
            // Trailing NUL padding after the last record is fine.
            if rest[0] == 0 {
                break;
            }
            let space = rest
                .iter()
                .position(|&b| b == b' ')
                .ok_or_else(|| Error::tar_header(offset, "pax record without length"))?;
            let length: usize = std::str::from_utf8(&rest[..space])
                .ok()
                .and_then(|s| s.parse().ok())
                .ok_or_else(|| Error::tar_header(offset, "unparsable pax record length"))?;
            if length <= space + 1 || length > rest.len() {
                return Err(Error::tar_header(offset, "pax record length out of range"));
            }
            let record = &rest[space + 1..length];
            let record = record.strip_suffix(b"\n").unwrap_or(record);
            let eq = record
                .iter()
                .position(|&b| b == b'=')
                .ok_or_else(|| Error::tar_header(offset, "pax record without '='"))?;
            let key = String::from_utf8_lossy(&record[..eq]).into_owned();
            let value = String::from_utf8_lossy(&record[eq + 1..]).into_owned();
            // An empty value deletes the attribute (pax spec).
            if value.is_empty() {
                attributes.remove(&key);
            } else {
                attributes.insert(key, value);
            }
            rest = &rest[length..];
        }
        Ok(Self { attributes })
    }

    /// Merges `other` on top of `self` (used to apply globals then locals).
    pub fn merge(&mut self, other: &PaxRecords) {
        for (key, value) in &other.attributes {
            self.attributes.insert(key.clone(), value.clone());
        }
    }

    /// Raw attribute access.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).map(String::as_str)
    }

    /// The `path` override, if present.
    pub fn path(&self) -> Option<&str> {
        self.get("path")
    }

    /// The `linkpath` override, if present.
    pub fn link_path(&self) -> Option<&str> {
        self.get("linkpath")
    }

    /// The `size` override, if present.
    pub fn size(&self) -> Option<u64> {
        self.get("size").and_then(|v| v.parse().ok())
    }

    /// The `uid`/`gid` overrides, if present.
    pub fn uid(&self) -> Option<u32> {
        self.get("uid").and_then(|v| v.parse().ok())
    }

    /// See [`PaxRecords::uid`].
    pub fn gid(&self) -> Option<u32> {
        self.get("gid").and_then(|v| v.parse().ok())
    }

    /// The `mtime` override; pax allows fractional seconds, which are
    /// truncated.
    pub fn mtime(&self) -> Option<i64> {
        let raw = self.get("mtime")?;
        let whole = raw.split('.').next().unwrap_or(raw);
        whole.parse().ok()
    }

    /// Extended attributes carried as `SCHILY.xattr.<name>` records.
    pub fn xattrs(&self) -> impl Iterator<Item = (&str, &str)> {
        self.attributes.iter().filter_map(|(key, value)| {
            key.strip_prefix("SCHILY.xattr.")
                .map(|name| (name, value.as_str()))
        })
    }

    /// Returns `true` if this entry uses the pax sparse dialect 1.0
    /// (`GNU.sparse.major=1`, map stored in the data prefix).
    pub fn is_sparse_1_0(&self) -> bool {
        self.get("GNU.sparse.major") == Some("1")
    }

    /// The real member path for sparse 1.0 entries (`GNU.sparse.name`).
    pub fn sparse_name(&self) -> Option<&str> {
        self.get("GNU.sparse.name")
    }

    /// The apparent size of a sparse member (`GNU.sparse.realsize` for 1.0,
    /// `GNU.sparse.size` for 0.x).
    pub fn sparse_real_size(&self) -> Option<u64> {
        self.get("GNU.sparse.realsize")
            .or_else(|| self.get("GNU.sparse.size"))
            .and_then(|v| v.parse().ok())
    }

    /// Builds the sparse map of a 0.1-dialect entry from the
    /// `GNU.sparse.map` attribute (`offset,size[,offset,size...]`).
    pub fn sparse_map_0_1(&self, offset: u64) -> Result<Option<SparseMap>> {
        let Some(map) = self.get("GNU.sparse.map") else {
            return Ok(None);
        };
        let numbers: Vec<u64> = map
            .split(',')
            .map(|n| {
                n.parse()
                    .map_err(|_| Error::tar_header(offset, "bad GNU.sparse.map number"))
            })
            .collect::<Result<_>>()?;
        if numbers.len() % 2 != 0 {
            return Err(Error::tar_header(offset, "odd GNU.sparse.map length"));
        }
        let regions: Vec<(u64, u64)> = numbers.chunks(2).map(|pair| (pair[0], pair[1])).collect();
        let total_size = self.sparse_real_size().unwrap_or_else(|| {
            regions
                .last()
                .map(|&(region_offset, length)| region_offset + length)
                .unwrap_or(0)
        });
        Ok(Some(SparseMap {
            regions,
            total_size,
        }))
    }
}

/// Parses the sparse-1.0 map stored at the start of a member's data region:
/// decimal numbers, one per line — the region count, then offset/size pairs.
///
/// Returns the map and the number of bytes it occupies in the data region
/// (padded to a block multiple).
pub fn parse_sparse_1_0_map(data: &[u8], offset: u64) -> Result<(SparseMap, u64)> {
    let mut at = 0usize;
    let mut read_number = |what: &str| -> Result<u64> {
        let start = at;
        while at < data.len() && data[at] != b'\n' {
            at += 1;
        }
        if at >= data.len() {
            return Err(Error::tar_header(
                offset,
                format!("unterminated sparse map {what}"),
            ));
        }
        let number = std::str::from_utf8(&data[start..at])
            .ok()
            .and_then(|s| s.parse().ok())
            .ok_or_else(|| Error::tar_header(offset, format!("bad sparse map {what}")))?;
        at += 1;
        Ok(number)
    };

    let count = read_number("region count")?;
    let mut regions = Vec::with_capacity(count as usize);
    let mut end = 0u64;
    for _ in 0..count {
        let region_offset = read_number("region offset")?;
        let region_length = read_number("region size")?;
        end = end.max(region_offset + region_length);
        regions.push((region_offset, region_length));
    }

    let consumed = (at as u64).div_ceil(super::header::BLOCK_SIZE) * super::header::BLOCK_SIZE;
    Ok((
        SparseMap {
            regions,
            total_size: end,
        },
        consumed,
    ))
}
