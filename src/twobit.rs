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
use std::sync::OnceLock;

use async_stream::stream;
use futures_core::stream::Stream;

use crate::bbi::{detect_file_kind, FileKind};
use crate::buffered::{BufferedRangeSource, DEFAULT_BUFFER_SIZE};
use crate::cursor::{BinaryCursor, Endian};
use crate::error::{Result, TrackError};
use crate::netfile::{NetRangeSource, RangeSource};

/* -------------------------------------------------------------------------- */

/// Packed bases decode to this alphabet, two bits per base, high bits
/// first.
const BASES: [u8; 4] = *b"TCAG";

/* -------------------------------------------------------------------------- */

/// 256-entry table mapping one packed byte to its four bases.
fn base_table() -> &'static [[u8; 4]; 256] {
    static TABLE: OnceLock<[[u8; 4]; 256]> = OnceLock::new();
    TABLE.get_or_init(|| {
        let mut table = [[0u8; 4]; 256];
        for (byte, entry) in table.iter_mut().enumerate() {
            let byte = byte as u8;
            entry[0] = BASES[(byte >> 6 & 3) as usize];
            entry[1] = BASES[(byte >> 4 & 3) as usize];
            entry[2] = BASES[(byte >> 2 & 3) as usize];
            entry[3] = BASES[(byte      & 3) as usize];
        }
        table
    })
}

/* -------------------------------------------------------------------------- */

/// Index entry and overlay blocks of one 2bit sequence. Built on first
/// access and memoized by the reader.
#[derive(Clone, Debug)]
pub struct SequenceRecord {
    pub dna_size     : u32,
    pub n_blocks     : Vec<(u32, u32)>,
    pub mask_blocks  : Vec<(u32, u32)>,
    pub packed_offset: u64,
}

/* -------------------------------------------------------------------------- */

#[derive(Debug)]
struct TwoBitIndex {
    order  : Endian,
    names  : Vec<String>,
    offsets: HashMap<String, u32>,
}

/* -------------------------------------------------------------------------- */

/// Reader for 2bit sequence files.
pub struct TwoBitReader<S: RangeSource> {
    loader : BufferedRangeSource<S>,
    index  : Option<TwoBitIndex>,
    records: HashMap<String, SequenceRecord>,
}

/* -------------------------------------------------------------------------- */

impl TwoBitReader<NetRangeSource> {

    /// Open a local path or an HTTP(S) URL.
    pub fn open(filename: &str) -> Result<Self> {
        Ok(TwoBitReader::new(NetRangeSource::open(filename)?))
    }

}

/* -------------------------------------------------------------------------- */

impl<S: RangeSource> TwoBitReader<S> {

    pub fn new(source: S) -> Self {
        TwoBitReader {
            loader : BufferedRangeSource::new(source, DEFAULT_BUFFER_SIZE),
            index  : None,
            records: HashMap::new(),
        }
    }

    fn ensure_index(&mut self) -> Result<&TwoBitIndex> {
        if self.index.is_none() {
            let (kind, order) = detect_file_kind(&mut self.loader)?;
            if kind != FileKind::TwoBit {
                return Err(TrackError::format(format!("expected a 2bit file, found {:?}", kind)));
            }

            let head       = self.loader.read(0, 16)?;
            let mut cursor = BinaryCursor::new(&head, order);
            cursor.position = 4;

            let version        = cursor.read_u32()?;
            let sequence_count = cursor.read_u32()?;
            let reserved       = cursor.read_u32()?;

            if version != 0 || reserved != 0 {
                return Err(TrackError::format(format!(
                    "invalid 2bit header: version={}, reserved={}", version, reserved
                )));
            }

            let mut names   = Vec::with_capacity(sequence_count as usize);
            let mut offsets = HashMap::new();
            let mut pos     = 16u64;

            for _ in 0..sequence_count {
                let len_byte = self.loader.read(pos, 1)?;
                let name_len = *len_byte.first()
                    .ok_or_else(|| TrackError::format("truncated 2bit sequence index"))? as u64;
                let entry    = self.loader.read(pos + 1, name_len + 4)?;

                let mut cursor = BinaryCursor::new(&entry, order);
                let name       = cursor.read_fixed_string(name_len as usize, false)?;
                let offset     = cursor.read_u32()?;

                offsets.insert(name.clone(), offset);
                names.push(name);
                pos += 1 + name_len + 4;
            }

            self.index = Some(TwoBitIndex { order, names, offsets });
        }
        Ok(self.index.as_ref().unwrap())
    }

    pub fn sequence_names(&mut self) -> Result<&[String]> {
        Ok(&self.ensure_index()?.names)
    }

    /// Load (or recall) the sequence record of `chrom`: size, N blocks,
    /// soft-mask blocks and the offset of the packed bases.
    pub fn get_sequence_record(&mut self, chrom: &str) -> Result<&SequenceRecord> {
        if !self.records.contains_key(chrom) {
            let (order, offset) = {
                let index  = self.ensure_index()?;
                let offset = *index.offsets.get(chrom)
                    .ok_or_else(|| TrackError::DataMissing(chrom.to_string()))?;
                (index.order, offset as u64)
            };

            let head       = self.loader.read(offset, 8)?;
            let mut cursor = BinaryCursor::new(&head, order);
            let dna_size   = cursor.read_u32()?;
            let n_count    = cursor.read_u32()? as u64;

            let mut pos  = offset + 8;
            let n_blocks = self.read_block_lists(order, &mut pos, n_count)?;

            let mask_count  = {
                let bytes      = self.loader.read(pos, 4)?;
                let mut cursor = BinaryCursor::new(&bytes, order);
                pos += 4;
                cursor.read_u32()? as u64
            };
            let mask_blocks = self.read_block_lists(order, &mut pos, mask_count)?;

            // Reserved word precedes the packed bases
            let packed_offset = pos + 4;

            self.records.insert(chrom.to_string(), SequenceRecord {
                dna_size,
                n_blocks,
                mask_blocks,
                packed_offset,
            });
        }
        Ok(&self.records[chrom])
    }

    /// Read the parallel start and size arrays of an overlay block list.
    fn read_block_lists(&mut self, order: Endian, pos: &mut u64, count: u64) -> Result<Vec<(u32, u32)>> {
        let bytes      = self.loader.read(*pos, count * 8)?;
        let mut cursor = BinaryCursor::new(&bytes, order);

        let mut starts = Vec::with_capacity(count as usize);
        for _ in 0..count {
            starts.push(cursor.read_u32()?);
        }
        let mut blocks = Vec::with_capacity(count as usize);
        for start in starts {
            blocks.push((start, cursor.read_u32()?));
        }
        *pos += count * 8;

        Ok(blocks)
    }

    /// Decode the bases of `[start, end)`, uppercase, with N blocks
    /// replaced by `N` and soft-masked blocks lowercased.
    pub fn read_twobit_data(&mut self, chrom: &str, start: u32, end: u32) -> Result<String> {
        let record = self.get_sequence_record(chrom)?.clone();

        if end > record.dna_size || start > end {
            return Err(TrackError::OutOfRange {
                offset: start as u64,
                size  : Some((end.max(start) - start) as u64),
            });
        }
        if start == end {
            return Ok(String::new());
        }

        let first   = (start / 4) as u64;
        let n_bytes = ((end + 3) / 4) as u64 - first;
        let packed  = self.loader.read(record.packed_offset + first, n_bytes)?;

        let table     = base_table();
        let mut bases = Vec::with_capacity(packed.len() * 4);
        for &byte in &packed {
            bases.extend_from_slice(&table[byte as usize]);
        }

        let skip = (start % 4) as usize;
        let mut bases: Vec<u8> = bases[skip..skip + (end - start) as usize].to_vec();

        overlay_blocks(&record.n_blocks, start, end, |i| bases[i] = b'N');
        overlay_blocks(&record.mask_blocks, start, end, |i| {
            bases[i] = bases[i].to_ascii_lowercase()
        });

        String::from_utf8(bases)
            .map_err(|_| TrackError::format("non-ascii sequence data"))
    }

    /// Streaming variant: the interval is delivered in chunks of at most
    /// `chunk_size` bases, overlays applied per chunk.
    pub fn stream_twobit_data<'a>(
        &'a mut self,
        chrom     : &'a str,
        start     : u32,
        end       : u32,
        chunk_size: u32,
    ) -> impl Stream<Item = Result<String>> + 'a {

        stream! {

            let chunk_size = chunk_size.max(1);
            let mut pos    = start;

            while pos < end {
                let chunk_end = end.min(pos + chunk_size);
                match self.read_twobit_data(chrom, pos, chunk_end) {
                    Ok (chunk) => yield Ok(chunk),
                    Err(e)     => { yield Err(e); return; }
                }
                pos = chunk_end;
            }
        }
    }

    /// One-hot encoding over `ACGT`. Bases without a defined encoding
    /// (`N` and soft-masked lowercase) yield the zero vector.
    pub fn read_twobit_data_one_hot(&mut self, chrom: &str, start: u32, end: u32) -> Result<Vec<[f32; 4]>> {
        let bases = self.read_twobit_data(chrom, start, end)?;

        Ok(bases.bytes().map(|base| match base {
            b'A' => [1.0, 0.0, 0.0, 0.0],
            b'C' => [0.0, 1.0, 0.0, 0.0],
            b'G' => [0.0, 0.0, 1.0, 0.0],
            b'T' => [0.0, 0.0, 0.0, 1.0],
            _    => [0.0; 4],
        }).collect())
    }

}

/* -------------------------------------------------------------------------- */

/// Apply `f` to every queried position covered by a block list. Blocks
/// are sorted and non-overlapping within one list.
fn overlay_blocks<F: FnMut(usize)>(blocks: &[(u32, u32)], start: u32, end: u32, mut f: F) {
    for &(block_start, block_size) in blocks {
        let block_end = block_start + block_size;
        if block_end <= start {
            continue;
        }
        if block_start >= end {
            break;
        }
        for position in block_start.max(start)..block_end.min(end) {
            f((position - start) as usize);
        }
    }
}

/* -------------------------------------------------------------------------- */
/* -------------------------------------------------------------------------- */
