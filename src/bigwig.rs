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

use std::fmt;

use async_stream::stream;
use futures::executor::block_on_stream;
use futures_core::stream::Stream;

use crate::bbi::{uncompress_slice, BbiFile, FileKind};
use crate::buffered::{BufferedRangeSource, DEFAULT_BUFFER_SIZE};
use crate::cursor::{BinaryCursor, Endian};
use crate::error::{Result, TrackError};
use crate::genome::Genome;
use crate::logger::{log_opt, Logger};
use crate::netfile::{NetRangeSource, RangeSource};
use crate::rtree::{find_overlapping_leaves, RTreeQuery};

/* -------------------------------------------------------------------------- */

pub const BBI_TYPE_BED_GRAPH: u8 = 1;
pub const BBI_TYPE_VARIABLE : u8 = 2;
pub const BBI_TYPE_FIXED    : u8 = 3;

/* -------------------------------------------------------------------------- */

/// One value interval of a BigWig file; intervals are half-open.
#[derive(Clone, Debug, PartialEq)]
pub struct BigWigRecord {
    pub chrom: String,
    pub start: u32,
    pub end  : u32,
    pub value: f32,
}

/* -------------------------------------------------------------------------- */

impl fmt::Display for BigWigRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(chrom={}, start={}, end={}, value={})",
            self.chrom, self.start, self.end, self.value)
    }
}

/* -------------------------------------------------------------------------- */

/// Pre-aggregated summary interval from one zoom level.
#[derive(Clone, Debug, PartialEq)]
pub struct BigZoomRecord {
    pub chrom      : String,
    pub start      : u32,
    pub end        : u32,
    pub valid_count: u32,
    pub min_val    : f32,
    pub max_val    : f32,
    pub sum_data   : f32,
    pub sum_squares: f32,
}

/* -------------------------------------------------------------------------- */

/// Header of one wig data block.
#[derive(Clone, Copy, Debug)]
pub(crate) struct BbiDataHeader {
    pub chrom_id  : u32,
    pub start     : u32,
    pub end       : u32,
    pub step      : u32,
    pub span      : u32,
    pub kind      : u8,
    pub reserved  : u8,
    pub item_count: u16,
}

/* -------------------------------------------------------------------------- */

impl BbiDataHeader {

    pub(crate) fn read(cursor: &mut BinaryCursor) -> Result<BbiDataHeader> {
        Ok(BbiDataHeader {
            chrom_id  : cursor.read_u32()?,
            start     : cursor.read_u32()?,
            end       : cursor.read_u32()?,
            step      : cursor.read_u32()?,
            span      : cursor.read_u32()?,
            kind      : cursor.read_u8()?,
            reserved  : cursor.read_u8()?,
            item_count: cursor.read_u16()?,
        })
    }

}

/* -------------------------------------------------------------------------- */

/// Interval filter shared by the wig, bed and zoom block decoders.
#[derive(Clone, Copy, Debug)]
pub(crate) struct RecordFilter {
    pub start_chrom: u32,
    pub start_base : u32,
    pub end_chrom  : u32,
    pub end_base   : u32,
}

/* -------------------------------------------------------------------------- */

impl RecordFilter {

    /// Record ends before the query start.
    pub fn before_query(&self, chrom_id: u32, end: u32) -> bool {
        chrom_id < self.start_chrom || (chrom_id == self.start_chrom && end < self.start_base)
    }

    /// Record starts at or past the query end; since blocks are sorted,
    /// decoding may stop here.
    pub fn past_query(&self, chrom_id: u32, start: u32) -> bool {
        chrom_id > self.end_chrom || (chrom_id == self.end_chrom && start >= self.end_base)
    }

    pub fn chrom_in_range(&self, chrom_id: u32) -> bool {
        chrom_id >= self.start_chrom && chrom_id <= self.end_chrom
    }

    pub fn to_query(&self) -> RTreeQuery {
        RTreeQuery {
            start_chrom: self.start_chrom,
            start_base : self.start_base,
            end_chrom  : self.end_chrom,
            end_base   : self.end_base,
        }
    }

}

/* -------------------------------------------------------------------------- */

/// Decode one wig block. BedGraph items carry explicit intervals,
/// variable-step items a start, fixed-step items only a value.
pub(crate) fn decode_wig_block(
    buffer: &[u8],
    order : Endian,
    filter: &RecordFilter,
    genome: &Genome,
    out   : &mut Vec<BigWigRecord>,
) -> Result<()> {

    let mut cursor = BinaryCursor::new(buffer, order);
    let header     = BbiDataHeader::read(&mut cursor)?;

    if !filter.chrom_in_range(header.chrom_id) {
        return Ok(());
    }
    let chrom = genome.seqnames.get(header.chrom_id as usize)
        .ok_or_else(|| TrackError::format(format!("invalid chromosome id {}", header.chrom_id)))?;

    let mut fixed_start = header.start;

    for _ in 0..header.item_count {
        let (start, end, value) = match header.kind {
            BBI_TYPE_BED_GRAPH => {
                let start = cursor.read_u32()?;
                let end   = cursor.read_u32()?;
                let value = cursor.read_f32()?;
                (start, end, value)
            }
            BBI_TYPE_VARIABLE => {
                let start = cursor.read_u32()?;
                let value = cursor.read_f32()?;
                (start, start + header.span, value)
            }
            _ => {
                let value = cursor.read_f32()?;
                let start = fixed_start;
                fixed_start += header.step;
                (start, start + header.span, value)
            }
        };

        if filter.past_query(header.chrom_id, start) {
            break;
        }
        if filter.before_query(header.chrom_id, end) {
            continue;
        }
        out.push(BigWigRecord {
            chrom: chrom.clone(),
            start,
            end,
            value,
        });
    }
    Ok(())
}

/* -------------------------------------------------------------------------- */

/// Decode one zoom block: a sequence of 32-byte summary records.
pub(crate) fn decode_zoom_block(
    buffer: &[u8],
    order : Endian,
    filter: &RecordFilter,
    genome: &Genome,
    out   : &mut Vec<BigZoomRecord>,
) -> Result<()> {

    let mut cursor = BinaryCursor::new(buffer, order);

    while cursor.remaining() >= 32 {
        let chrom_id    = cursor.read_u32()?;
        let start       = cursor.read_u32()?;
        let end         = cursor.read_u32()?;
        let valid_count = cursor.read_u32()?;
        let min_val     = cursor.read_f32()?;
        let max_val     = cursor.read_f32()?;
        let sum_data    = cursor.read_f32()?;
        let sum_squares = cursor.read_f32()?;

        if filter.past_query(chrom_id, start) {
            break;
        }
        if !filter.chrom_in_range(chrom_id) || filter.before_query(chrom_id, end) {
            continue;
        }
        let chrom = genome.seqnames.get(chrom_id as usize)
            .ok_or_else(|| TrackError::format(format!("invalid chromosome id {}", chrom_id)))?;

        out.push(BigZoomRecord {
            chrom: chrom.clone(),
            start,
            end,
            valid_count,
            min_val,
            max_val,
            sum_data,
            sum_squares,
        });
    }
    Ok(())
}

/* -------------------------------------------------------------------------- */

/// Reader for BigWig files. File-level structures are decoded on first
/// use and cached for the lifetime of the reader.
pub struct BigWigReader<S: RangeSource> {
    pub(crate) loader: BufferedRangeSource<S>,
    pub(crate) bwf   : Option<BbiFile>,
    pub(crate) logger: Option<Logger>,
}

/* -------------------------------------------------------------------------- */

impl BigWigReader<NetRangeSource> {

    /// Open a local path or an HTTP(S) URL.
    pub fn open(filename: &str) -> Result<Self> {
        Ok(BigWigReader::new(NetRangeSource::open(filename)?))
    }

}

/* -------------------------------------------------------------------------- */

impl<S: RangeSource> BigWigReader<S> {

    pub fn new(source: S) -> Self {
        BigWigReader {
            loader: BufferedRangeSource::new(source, DEFAULT_BUFFER_SIZE),
            bwf   : None,
            logger: None,
        }
    }

    pub fn with_logger(mut self, logger: Logger) -> Self {
        self.logger = Some(logger);
        self
    }

    pub fn get_header(&mut self) -> Result<&BbiFile> {
        if self.bwf.is_none() {
            self.bwf = Some(BbiFile::open(&mut self.loader, FileKind::BigWig)?);
        }
        Ok(self.bwf.as_ref().unwrap())
    }

    pub fn genome(&mut self) -> Result<&Genome> {
        Ok(&self.get_header()?.genome)
    }

    fn resolve_filter(
        &mut self,
        start_chrom: &str,
        start_base : u32,
        end_chrom  : &str,
        end_base   : u32,
    ) -> Result<RecordFilter> {
        let bwf = self.get_header()?;
        Ok(RecordFilter {
            start_chrom: bwf.genome.require_idx(start_chrom)?,
            start_base,
            end_chrom  : bwf.genome.require_idx(end_chrom)?,
            end_base,
        })
    }

    /// Fetch one leaf block and undo the optional zlib compression.
    pub(crate) fn load_block(&mut self, offset: u64, size: u64) -> Result<Vec<u8>> {
        let raw = self.loader.read(offset, size)?;
        let ubs = self.bwf.as_ref().map_or(0, |b| b.header.uncompress_buf_size);

        if ubs > 0 {
            uncompress_slice(&raw)
        } else {
            Ok(raw)
        }
    }

    /// Stream the wig records overlapping the query rectangle, in file
    /// order.
    pub fn stream_bigwig_data<'a>(
        &'a mut self,
        start_chrom: &'a str,
        start_base : u32,
        end_chrom  : &'a str,
        end_base   : u32,
    ) -> impl Stream<Item = Result<BigWigRecord>> + 'a {

        stream! {

            let filter = match self.resolve_filter(start_chrom, start_base, end_chrom, end_base) {
                Ok (f) => f,
                Err(e) => { yield Err(e); return; }
            };

            let (order, index_offset, genome) = {
                let bwf = self.bwf.as_ref().unwrap();
                (bwf.header.order, bwf.header.full_index_offset, bwf.genome.clone())
            };

            let leaves = match find_overlapping_leaves(&mut self.loader, order, index_offset, &filter.to_query()) {
                Ok (l) => l,
                Err(e) => { yield Err(e); return; }
            };

            log_opt!(self.logger, "bigwig query ({}:{} - {}:{}): {} overlapping blocks",
                start_chrom, start_base, end_chrom, end_base, leaves.len());

            for leaf in leaves {

                let block = match self.load_block(leaf.data_offset, leaf.data_size) {
                    Ok (b) => b,
                    Err(e) => { yield Err(e); return; }
                };

                let mut records = Vec::new();
                if let Err(e) = decode_wig_block(&block, order, &filter, &genome, &mut records) {
                    yield Err(e); return;
                }
                for record in records {
                    yield Ok(record);
                }
            }
        }
    }

    /// Collect the wig records overlapping the query rectangle.
    pub fn read_bigwig_data(
        &mut self,
        start_chrom: &str,
        start_base : u32,
        end_chrom  : &str,
        end_base   : u32,
    ) -> Result<Vec<BigWigRecord>> {
        let s = Box::pin(self.stream_bigwig_data(start_chrom, start_base, end_chrom, end_base));
        block_on_stream(s).collect()
    }

    /// Stream summary records from the given zoom level.
    pub fn stream_zoom_data<'a>(
        &'a mut self,
        start_chrom: &'a str,
        start_base : u32,
        end_chrom  : &'a str,
        end_base   : u32,
        zoom_index : usize,
    ) -> impl Stream<Item = Result<BigZoomRecord>> + 'a {

        stream! {

            let filter = match self.resolve_filter(start_chrom, start_base, end_chrom, end_base) {
                Ok (f) => f,
                Err(e) => { yield Err(e); return; }
            };

            let (order, index_offset, genome) = {
                let bwf = self.bwf.as_ref().unwrap();
                let zoom = match bwf.zoom_header(zoom_index) {
                    Ok (z) => z,
                    Err(e) => { yield Err(e); return; }
                };
                (bwf.header.order, zoom.index_offset, bwf.genome.clone())
            };

            let leaves = match find_overlapping_leaves(&mut self.loader, order, index_offset, &filter.to_query()) {
                Ok (l) => l,
                Err(e) => { yield Err(e); return; }
            };

            log_opt!(self.logger, "zoom query level {} ({}:{} - {}:{}): {} overlapping blocks",
                zoom_index, start_chrom, start_base, end_chrom, end_base, leaves.len());

            for leaf in leaves {

                let block = match self.load_block(leaf.data_offset, leaf.data_size) {
                    Ok (b) => b,
                    Err(e) => { yield Err(e); return; }
                };

                let mut records = Vec::new();
                if let Err(e) = decode_zoom_block(&block, order, &filter, &genome, &mut records) {
                    yield Err(e); return;
                }
                for record in records {
                    yield Ok(record);
                }
            }
        }
    }

    /// Collect summary records from the given zoom level.
    pub fn read_zoom_data(
        &mut self,
        start_chrom: &str,
        start_base : u32,
        end_chrom  : &str,
        end_base   : u32,
        zoom_index : usize,
    ) -> Result<Vec<BigZoomRecord>> {
        let s = Box::pin(self.stream_zoom_data(start_chrom, start_base, end_chrom, end_base, zoom_index));
        block_on_stream(s).collect()
    }

}

/* -------------------------------------------------------------------------- */
/* -------------------------------------------------------------------------- */
