//! Memory mapping utilities for bounding stack reads
//!
//! This module parses /proc/self/maps into the list of readable regions. The
//! walker only dereferences frame pointers that lie inside the region holding
//! the first frame pointer, which is the walked thread's stack.

use anyhow::{Context, Result};
use log::warn;
use std::fs;

const MAPS_PATH: &str = "/proc/self/maps";

/// Memory range of a mapping in the process's address space
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryRange {
    pub start: u64,
    pub end: u64,
}

impl MemoryRange {
    /// Check if an address falls within this memory range
    #[must_use]
    pub fn contains(&self, addr: u64) -> bool {
        addr >= self.start && addr < self.end
    }
}

/// Snapshot of every readable mapping, sorted by start address
#[derive(Debug, Clone, Default)]
pub struct ReadableRegions {
    regions: Vec<MemoryRange>,
}

impl ReadableRegions {
    /// Read the current process's mappings
    ///
    /// An unreadable maps file yields an empty snapshot, which stops every
    /// walk after its first frame.
    #[must_use]
    pub fn snapshot() -> Self {
        match fs::read_to_string(MAPS_PATH).with_context(|| format!("Failed to read {MAPS_PATH}")) {
            Ok(maps) => Self::parse(&maps),
            Err(e) => {
                warn!("{e:#}");
                Self::default()
            }
        }
    }

    /// Parse maps text: "start-end perms offset dev inode pathname"
    ///
    /// Malformed lines are skipped.
    #[must_use]
    pub fn parse(maps: &str) -> Self {
        let mut regions: Vec<MemoryRange> =
            maps.lines().filter_map(|line| parse_readable_line(line).ok().flatten()).collect();
        regions.sort_by_key(|r| r.start);
        Self { regions }
    }

    /// The readable mapping containing `addr`
    #[must_use]
    pub fn region_containing(&self, addr: u64) -> Option<MemoryRange> {
        let idx = self.regions.partition_point(|r| r.start <= addr).checked_sub(1)?;
        let region = self.regions[idx];
        region.contains(addr).then_some(region)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.regions.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.regions.is_empty()
    }
}

fn parse_readable_line(line: &str) -> Result<Option<MemoryRange>> {
    let mut parts = line.split_whitespace();
    let range = parts.next().context("Missing address range")?;
    let perms = parts.next().context("Missing permissions")?;
    if !perms.starts_with('r') {
        return Ok(None);
    }

    let (start, end) = range.split_once('-').context("Malformed address range")?;
    let start = u64::from_str_radix(start, 16).context("Failed to parse range start")?;
    let end = u64::from_str_radix(end, 16).context("Failed to parse range end")?;
    Ok((start < end).then_some(MemoryRange { start, end }))
}
