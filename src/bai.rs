/* Copyright (C) 2024 Philipp Benner
 *
 * This program is free software: you can redistribute it and/or modify
 * it under the terms of the GNU General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * This program is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 * GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License
 * along with this program.  If not, see <http://www.gnu.org/licenses/>.
 */

use std::collections::HashMap;
use std::fmt;

use crate::cursor::{BinaryCursor, Endian};
use crate::error::{Result, TrackError};

/* -------------------------------------------------------------------------- */

const BAI_MAGIC: u32 = 21578050; // "BAI\1"

/// Bin 37450 carries optional per-reference statistics, not chunks.
const PSEUDO_BIN: u32 = 37450;

/// Adjacent chunks whose compressed gap is below one BGZF member are
/// fetched as one request.
const CHUNK_MERGE_DISTANCE: u64 = 65_000;

/// Window size of the linear index: 16 kbp.
const LINEAR_INDEX_SHIFT: u32 = 14;

/// Reference positions are capped at 2^29 by the 5-level binning scheme.
const MAX_POSITION: u32 = 1 << 29;

/* -------------------------------------------------------------------------- */

/// Pointer into a BGZF stream: the compressed offset of a member (48 bits)
/// and a byte position within its inflated output (16 bits).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord)]
pub struct VirtualOffset {
    pub block_pos: u64,
    pub data_pos : u16,
}

/* -------------------------------------------------------------------------- */

impl VirtualOffset {

    pub fn new(block_pos: u64, data_pos: u16) -> Self {
        VirtualOffset { block_pos, data_pos }
    }

    /// Decode the 8-byte representation: the two least-significant bytes
    /// hold the data position, the remaining six the member offset. The
    /// encoding is little-endian regardless of the file's byte order.
    pub fn from_u64(value: u64) -> Self {
        VirtualOffset {
            block_pos: value >> 16,
            data_pos : (value & 0xffff) as u16,
        }
    }

    pub fn to_u64(&self) -> u64 {
        (self.block_pos << 16) | self.data_pos as u64
    }

    pub fn is_zero(&self) -> bool {
        self.block_pos == 0 && self.data_pos == 0
    }

}

/* -------------------------------------------------------------------------- */

impl fmt::Display for VirtualOffset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.block_pos, self.data_pos)
    }
}

/* -------------------------------------------------------------------------- */

/// Half-open range of BAM records between two virtual offsets.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Chunk {
    pub start: VirtualOffset,
    pub end  : VirtualOffset,
}

/* -------------------------------------------------------------------------- */

/// Bin and linear index of one reference sequence.
#[derive(Clone, Debug, Default)]
pub struct BaiRefData {
    pub bin_index   : HashMap<u32, Vec<Chunk>>,
    pub linear_index: Vec<VirtualOffset>,
}

/* -------------------------------------------------------------------------- */

/// Parsed BAI index. Immutable after parsing.
#[derive(Clone, Debug)]
pub struct BaiIndex {
    pub ref_data: Vec<BaiRefData>,
}

/* -------------------------------------------------------------------------- */

impl BaiIndex {

    pub fn parse(data: &[u8]) -> Result<BaiIndex> {
        // Virtual offsets and all BAI integers are little-endian
        let mut cursor = BinaryCursor::new(data, Endian::Little);

        let magic = cursor.read_u32()?;
        if magic != BAI_MAGIC {
            return Err(TrackError::format(format!("invalid BAI magic: {:#x}", magic)));
        }

        let n_ref = cursor.read_i32()?;
        let mut ref_data = Vec::with_capacity(n_ref.max(0) as usize);

        for _ in 0..n_ref {
            let mut bin_index = HashMap::new();

            let n_bin = cursor.read_i32()?;
            for _ in 0..n_bin {
                let bin      = cursor.read_u32()?;
                let n_chunk  = cursor.read_i32()?;

                if bin == PSEUDO_BIN {
                    // Two pseudo-chunks of statistics
                    cursor.skip(n_chunk.max(0) as usize * 16)?;
                    continue;
                }

                let mut chunks = Vec::with_capacity(n_chunk.max(0) as usize);
                for _ in 0..n_chunk {
                    let start = VirtualOffset::from_u64(cursor.read_u64_le()?);
                    let end   = VirtualOffset::from_u64(cursor.read_u64_le()?);
                    chunks.push(Chunk { start, end });
                }
                bin_index.insert(bin, chunks);
            }

            let n_intv = cursor.read_i32()?;
            let mut linear_index = Vec::with_capacity(n_intv.max(0) as usize);
            for _ in 0..n_intv {
                linear_index.push(VirtualOffset::from_u64(cursor.read_u64_le()?));
            }

            ref_data.push(BaiRefData { bin_index, linear_index });
        }

        Ok(BaiIndex { ref_data })
    }

    /// Smallest member offset holding any alignment, used to bound the
    /// header section at the head of the BAM stream.
    pub fn first_alignment_block(&self) -> u64 {
        let mut first: Option<u64> = None;

        for r in &self.ref_data {
            for chunks in r.bin_index.values() {
                for chunk in chunks {
                    let pos = chunk.start.block_pos;
                    if first.map_or(true, |f| pos < f) {
                        first = Some(pos);
                    }
                }
            }
        }
        first.unwrap_or(0)
    }

    /// Byte ranges of all records that may overlap `[start, end)` on the
    /// given reference: bin lookup, linear-index pruning, then coalescing
    /// of nearby chunks.
    pub fn chunks_for_region(&self, ref_id: u32, start: u32, end: u32) -> Result<Vec<Chunk>> {
        let ref_data = self.ref_data.get(ref_id as usize)
            .ok_or_else(|| TrackError::DataMissing(format!("reference id {}", ref_id)))?;

        let mut chunks: Vec<Chunk> = Vec::new();
        for bin in reg2bins(start, end) {
            if let Some(c) = ref_data.bin_index.get(&bin) {
                chunks.extend_from_slice(c);
            }
        }

        if let Some(lowest) = linear_lower_bound(&ref_data.linear_index, start, end) {
            chunks.retain(|c| c.end >= lowest);
        }

        chunks.sort_by_key(|c| c.start);

        Ok(coalesce_chunks(&chunks))
    }

}

/* -------------------------------------------------------------------------- */

/// Bin numbers of the UCSC 5-level scheme whose span overlaps `[start, end)`.
/// The root bin 0 is always included.
pub fn reg2bins(start: u32, end: u32) -> Vec<u32> {
    let mut bins = vec![0];

    let start = start.min(MAX_POSITION);
    let end   = end  .min(MAX_POSITION);
    if end <= start {
        return bins;
    }
    let end = end - 1;

    for (shift, offset) in [(26u32, 1u32), (23, 9), (20, 73), (17, 585), (14, 4681)] {
        for bin in (offset + (start >> shift))..=(offset + (end >> shift)) {
            bins.push(bin);
        }
    }
    bins
}

/* -------------------------------------------------------------------------- */

/// Minimum virtual offset of the 16 kbp windows covering the query, the
/// lower bound below which no overlapping record can start. Zero entries
/// mark windows without records and are skipped.
fn linear_lower_bound(linear_index: &[VirtualOffset], start: u32, end: u32) -> Option<VirtualOffset> {
    if linear_index.is_empty() {
        return None;
    }
    let last    = linear_index.len() - 1;
    let i_start = ((start >> LINEAR_INDEX_SHIFT) as usize).min(last);
    let i_end   = ((end   >> LINEAR_INDEX_SHIFT) as usize).max(last);

    let mut lowest: Option<VirtualOffset> = None;
    for i in i_start..=i_end {
        match linear_index.get(i) {
            Some(vo) if !vo.is_zero() => {
                if lowest.map_or(true, |l| *vo < l) {
                    lowest = Some(*vo);
                }
            }
            _ => {}
        }
    }
    lowest
}

/* -------------------------------------------------------------------------- */

/// Merge chunks whose compressed gap is below `CHUNK_MERGE_DISTANCE`,
/// amortizing round trips for records in nearby BGZF members. Input must
/// be sorted by start offset.
fn coalesce_chunks(chunks: &[Chunk]) -> Vec<Chunk> {
    let mut merged: Vec<Chunk> = Vec::with_capacity(chunks.len());

    for chunk in chunks {
        match merged.last_mut() {
            Some(last) if chunk.start.block_pos < last.end.block_pos + CHUNK_MERGE_DISTANCE => {
                if chunk.end > last.end {
                    last.end = chunk.end;
                }
            }
            _ => merged.push(*chunk),
        }
    }
    merged
}

/* -------------------------------------------------------------------------- */
/* -------------------------------------------------------------------------- */

#[cfg(test)]
mod tests {

    use super::*;

    fn vo(block: u64, data: u16) -> VirtualOffset {
        VirtualOffset::new(block, data)
    }

    #[test]
    fn test_virtual_offset_decode() {

        // dataPos from the two least-significant bytes, blockPos above
        let raw = (123456u64 << 16) | 789;
        let v   = VirtualOffset::from_u64(raw);

        assert_eq!(v.block_pos, 123456);
        assert_eq!(v.data_pos,  789);
        assert_eq!(v.to_u64(),  raw);
    }

    #[test]
    fn test_virtual_offset_ordering() {

        assert!(vo(1, 0)     < vo(2, 0));
        assert!(vo(1, 5)     < vo(1, 6));
        assert!(vo(1, 65535) < vo(2, 0));
        assert_eq!(vo(3, 3), vo(3, 3));
    }

    #[test]
    fn test_reg2bins_includes_root() {

        let bins = reg2bins(0, 0);
        assert_eq!(bins, vec![0]);

        let bins = reg2bins(20_890_000, 20_910_000);
        assert!(bins.contains(&0));

        // One bin per level for a small interval
        assert!(bins.contains(&(1    + (20_890_000 >> 26))));
        assert!(bins.contains(&(4681 + (20_890_000 >> 14))));
    }

    #[test]
    fn test_reg2bins_size_bound() {

        // Worst case: full reference span covers every bin of the scheme
        let bins = reg2bins(0, MAX_POSITION);
        assert_eq!(bins.len(), 1 + 8 + 64 + 512 + 4096 + 32768);
        assert!(bins.contains(&0));
        assert!(bins.contains(&4681));
        assert!(bins.contains(&(4681 + ((MAX_POSITION - 1) >> 14))));

        // A single 16 kbp window touches one bin per level
        let bins = reg2bins(0, 1 << 14);
        assert_eq!(bins, vec![0, 1, 9, 73, 585, 4681]);

        // Positions beyond 2^29 are capped
        let capped = reg2bins(0, u32::MAX);
        assert_eq!(capped.len(), reg2bins(0, MAX_POSITION).len());
    }

    #[test]
    fn test_linear_lower_bound() {

        let linear = vec![vo(0, 0), vo(100, 2), vo(50, 1), vo(0, 0)];

        // Zero entries are skipped when taking the minimum
        let lowest = linear_lower_bound(&linear, 0, 4 << 14).unwrap();
        assert_eq!(lowest, vo(50, 1));

        // All-zero index yields no bound
        assert!(linear_lower_bound(&[vo(0, 0)], 0, 100).is_none());
    }

    #[test]
    fn test_coalesce_chunks() {

        let chunks = vec![
            Chunk { start: vo(0, 0),       end: vo(10_000, 5)  },
            Chunk { start: vo(20_000, 0),  end: vo(30_000, 9)  },
            Chunk { start: vo(200_000, 0), end: vo(250_000, 1) },
        ];

        let merged = coalesce_chunks(&chunks);

        // First two are within 65000 compressed bytes of each other
        assert_eq!(merged.len(), 2);
        assert_eq!(merged[0].start, vo(0, 0));
        assert_eq!(merged[0].end,   vo(30_000, 9));
        assert_eq!(merged[1].start, vo(200_000, 0));

        // Result is sorted and pair-wise non-coalescable
        for pair in merged.windows(2) {
            assert!(pair[0].start < pair[1].start);
            assert!(pair[1].start.block_pos >= pair[0].end.block_pos + CHUNK_MERGE_DISTANCE);
        }
    }

    #[test]
    fn test_coalesce_overlapping_keeps_max_end() {

        let chunks = vec![
            Chunk { start: vo(0, 0),  end: vo(50_000, 0) },
            Chunk { start: vo(10, 0), end: vo(40_000, 0) },
        ];

        let merged = coalesce_chunks(&chunks);

        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].end, vo(50_000, 0));
    }

    #[test]
    fn test_chunks_for_region_prunes_by_linear_index() {

        let mut bin_index = HashMap::new();
        bin_index.insert(4681u32, vec![
            Chunk { start: vo(10, 0),      end: vo(20, 0)      },
            Chunk { start: vo(900_000, 0), end: vo(950_000, 0) },
        ]);

        let index = BaiIndex {
            ref_data: vec![BaiRefData {
                bin_index,
                linear_index: vec![vo(900_000, 0)],
            }],
        };

        let chunks = index.chunks_for_region(0, 0, 1000).unwrap();

        // The early chunk ends below the linear lower bound
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].start, vo(900_000, 0));

        assert!(index.chunks_for_region(7, 0, 1000).is_err());
    }

}
