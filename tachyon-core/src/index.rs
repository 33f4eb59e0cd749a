//! Variant index (spec C7 / §4.7): an append-only per-block record of
//! (contig, min/max position, byte offsets) plus a tabix-style hierarchical
//! bin scheme for intra-block record filtering (SPEC_FULL §12.1 resolves
//! the open question of which bin scheme to use).

use crate::error::{err, ErrorKind, Result};
use crate::ioutil::{LeReadExt, LeWriteExt, MemReader, MemWriter};

/// Bin-size shifts from the finest (16,384bp) to the coarsest
/// (536,870,912bp) level, mirroring the tabix/BAI convention: level `i`'s
/// bins are `1 << SHIFTS[i]` base pairs wide, and a bin id at level i is
/// offset by the cumulative bin count of all coarser levels.
const SHIFTS: [u32; 6] = [14, 17, 20, 23, 26, 29];

fn level_offset(level: usize) -> u32 {
    // Level 0 is the coarsest single bin (the whole contig, bin 0); offsets
    // follow 4^0 + 4^1 + ... for each finer level, matching BAI's
    // reg2bin table.
    match level {
        0 => 0,
        1 => 1,
        2 => 1 + 8,
        3 => 1 + 8 + 64,
        4 => 1 + 8 + 64 + 512,
        5 => 1 + 8 + 64 + 512 + 4096,
        _ => unreachable!("only 6 levels are defined"),
    }
}

/// Maps a 0-based half-open-ish position to its bin id at the finest level
/// that still distinguishes it from neighbouring bins of the same width,
/// then walks up reporting the bin at every level touched. Mirrors
/// `reg2bin` from the BAM/tabix index format, generalized to the 6-level
/// `SHIFTS` table above (reversed: index 0 here is the finest level, so the
/// iteration order is finest-to-coarsest and the offsets above are
/// reversed relative to BAI's coarsest-first numbering).
pub fn bin_for(pos: i64) -> u32 {
    // Use the finest level; callers needing coarser containment walk via
    // `bins_overlapping`.
    bin_at_level(pos, 0)
}

fn bin_at_level(pos: i64, level: usize) -> u32 {
    let shift = SHIFTS[level];
    let idx = (pos >> shift) as u32;
    level_offset_from_finest(level) + idx
}

fn level_offset_from_finest(level: usize) -> u32 {
    // level 0 = finest (shift 14); reuse level_offset with inverted index.
    level_offset(SHIFTS.len() - 1 - level)
}

/// All bin ids (across all 6 levels) that a half-open interval
/// `[begin, end)` touches. Used when computing a block's or a variant's
/// `min_bin`/`max_bin` footprint.
pub fn bins_overlapping(begin: i64, end: i64) -> Vec<u32> {
    let mut bins = Vec::new();
    let end = end.max(begin + 1);
    for level in 0..SHIFTS.len() {
        let shift = SHIFTS[level];
        let lo = begin >> shift;
        let hi = (end - 1) >> shift;
        let offset = level_offset_from_finest(level);
        for b in lo..=hi {
            bins.push(offset + b as u32);
        }
    }
    bins
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexEntry {
    pub block_id: u64,
    pub contig: i32,
    pub min_position: i64,
    pub max_position: i64,
    pub n_variants: u32,
    pub byte_offset_begin: u64,
    pub byte_offset_end: u64,
    pub min_bin: u32,
    pub max_bin: u32,
}

#[derive(Debug, Clone, Default)]
pub struct VariantIndex {
    entries: Vec<IndexEntry>,
}

impl VariantIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> &[IndexEntry] {
        &self.entries
    }

    /// Appends the next block's entry. Block ids and byte offsets must be
    /// strictly increasing, matching the writer's single-threaded,
    /// in-order append discipline (spec C7 invariant).
    pub fn append(&mut self, entry: IndexEntry) -> Result<()> {
        if let Some(last) = self.entries.last() {
            if entry.block_id <= last.block_id {
                return Err(err(
                    ErrorKind::Integrity,
                    "variant index block ids must be strictly increasing",
                ));
            }
            if entry.byte_offset_begin < last.byte_offset_end {
                return Err(err(
                    ErrorKind::Integrity,
                    "variant index byte offsets overlap with the previous block",
                ));
            }
        }
        if entry.min_position > entry.max_position {
            return Err(err(
                ErrorKind::InputMalformed,
                "index entry min_position exceeds max_position",
            ));
        }
        self.entries.push(entry);
        Ok(())
    }

    /// Returns every block entry whose `[min_position, max_position]`
    /// intersects `[p0, p1]` on `contig`, in block-id order. Implemented as
    /// a binary search for the first entry whose `max_position >= p0`
    /// followed by a linear scan, per spec §4.7 ("binary search on
    /// min_position" -- here done against the contig-filtered slice since
    /// entries are stored in overall block order, not per-contig order).
    pub fn find_overlaps(&self, contig: i32, p0: i64, p1: i64) -> Vec<&IndexEntry> {
        let (p0, p1) = if p0 <= p1 { (p0, p1) } else { (p1, p0) };
        let contig_entries: Vec<&IndexEntry> =
            self.entries.iter().filter(|e| e.contig == contig).collect();
        let start = contig_entries.partition_point(|e| e.max_position < p0);
        contig_entries[start..]
            .iter()
            .copied()
            .filter(|e| e.min_position <= p1 && e.max_position >= p0)
            .collect()
    }

    /// Serialises the full entry table for the archive's EOF region (spec
    /// §6 "EOF region: VariantIndex | ChecksumTable | Footer").
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut w = MemWriter::new();
        w.write_u64(self.entries.len() as u64).unwrap();
        for e in &self.entries {
            w.write_u64(e.block_id).unwrap();
            w.write_i32(e.contig).unwrap();
            w.write_i64(e.min_position).unwrap();
            w.write_i64(e.max_position).unwrap();
            w.write_u32(e.n_variants).unwrap();
            w.write_u64(e.byte_offset_begin).unwrap();
            w.write_u64(e.byte_offset_end).unwrap();
            w.write_u32(e.min_bin).unwrap();
            w.write_u32(e.max_bin).unwrap();
        }
        w.into_bytes()
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let mut r = MemReader::from(bytes.to_vec());
        let n = r.read_u64()? as usize;
        let mut entries = Vec::with_capacity(n);
        for _ in 0..n {
            entries.push(IndexEntry {
                block_id: r.read_u64()?,
                contig: r.read_i32()?,
                min_position: r.read_i64()?,
                max_position: r.read_i64()?,
                n_variants: r.read_u32()?,
                byte_offset_begin: r.read_u64()?,
                byte_offset_end: r.read_u64()?,
                min_bin: r.read_u32()?,
                max_bin: r.read_u32()?,
            });
        }
        Ok(VariantIndex { entries })
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn entry(block_id: u64, contig: i32, min: i64, max: i64, begin: u64, end: u64) -> IndexEntry {
        let bins = bins_overlapping(min, max + 1);
        IndexEntry {
            block_id,
            contig,
            min_position: min,
            max_position: max,
            n_variants: 1,
            byte_offset_begin: begin,
            byte_offset_end: end,
            min_bin: *bins.iter().min().unwrap(),
            max_bin: *bins.iter().max().unwrap(),
        }
    }

    #[test]
    fn strictly_increasing_block_ids_enforced() {
        let mut idx = VariantIndex::new();
        idx.append(entry(0, 0, 0, 100, 0, 10)).unwrap();
        assert!(idx.append(entry(0, 0, 100, 200, 10, 20)).is_err());
    }

    #[test]
    fn scenario_s6_interval_query() {
        let mut idx = VariantIndex::new();
        idx.append(entry(0, 0, 0, 999, 0, 10)).unwrap();
        idx.append(entry(1, 0, 1000, 1999, 10, 20)).unwrap();
        idx.append(entry(2, 0, 2000, 2999, 20, 30)).unwrap();
        idx.append(entry(3, 1, 0, 999, 30, 40)).unwrap();
        idx.append(entry(4, 1, 1000, 1999, 40, 50)).unwrap();

        let hits = idx.find_overlaps(0, 1500, 2500);
        let ids: Vec<u64> = hits.iter().map(|e| e.block_id).collect();
        assert_eq!(ids, vec![1, 2]);

        let hits = idx.find_overlaps(1, 500, 1500);
        let ids: Vec<u64> = hits.iter().map(|e| e.block_id).collect();
        assert_eq!(ids, vec![3, 4]);

        assert!(idx.find_overlaps(2, 0, 1000).is_empty());
    }

    #[test]
    fn bins_overlapping_includes_every_level() {
        let bins = bins_overlapping(0, 1);
        assert_eq!(bins.len(), SHIFTS.len());
    }

    #[test]
    fn index_round_trips_through_bytes() {
        let mut idx = VariantIndex::new();
        idx.append(entry(0, 0, 0, 999, 0, 10)).unwrap();
        idx.append(entry(1, 0, 1000, 1999, 10, 20)).unwrap();
        let restored = VariantIndex::from_bytes(&idx.to_bytes()).unwrap();
        assert_eq!(restored.entries(), idx.entries());
    }
}
