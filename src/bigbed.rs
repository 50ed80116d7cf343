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

use async_stream::stream;
use futures::executor::block_on_stream;
use futures_core::stream::Stream;

use crate::bbi::{uncompress_slice, BbiFile, FileKind};
use crate::bed::{parse_bed_default, BedColumnParser, BedRecord};
use crate::bigwig::RecordFilter;
use crate::buffered::{BufferedRangeSource, DEFAULT_BUFFER_SIZE};
use crate::cursor::{BinaryCursor, Endian};
use crate::error::{Result, TrackError};
use crate::genome::Genome;
use crate::logger::{log_opt, Logger};
use crate::netfile::{NetRangeSource, RangeSource};
use crate::rtree::find_overlapping_leaves;

/* -------------------------------------------------------------------------- */

/// Decode one bed block: `(chromId, start, end, rest)` records with a
/// NUL-terminated tail of tab-separated columns.
pub(crate) fn decode_bed_block<T>(
    buffer: &[u8],
    order : Endian,
    filter: &RecordFilter,
    genome: &Genome,
    parser: BedColumnParser<T>,
    out   : &mut Vec<T>,
) -> Result<()> {

    let mut cursor = BinaryCursor::new(buffer, order);

    while cursor.remaining() > 12 {
        let chrom_id = cursor.read_u32()?;
        let start    = cursor.read_u32()?;
        let end      = cursor.read_u32()?;
        let rest     = cursor.read_cstring(None)?;

        if filter.past_query(chrom_id, start) {
            break;
        }
        if !filter.chrom_in_range(chrom_id) || filter.before_query(chrom_id, end) {
            continue;
        }
        let chrom = genome.seqnames.get(chrom_id as usize)
            .ok_or_else(|| TrackError::format(format!("invalid chromosome id {}", chrom_id)))?;

        out.push(parser(chrom.clone(), start, end, &rest));
    }
    Ok(())
}

/* -------------------------------------------------------------------------- */

/// Reader for BigBed files. The record tail is handed to a column
/// parser; `read_bigbed_data` applies the default UCSC parser, domain
/// variants (narrow peak, broad peak, methyl, TSS peak, IDR peak) plug
/// into `read_bigbed_data_with`.
pub struct BigBedReader<S: RangeSource> {
    loader: BufferedRangeSource<S>,
    bbf   : Option<BbiFile>,
    logger: Option<Logger>,
}

/* -------------------------------------------------------------------------- */

impl BigBedReader<NetRangeSource> {

    /// Open a local path or an HTTP(S) URL.
    pub fn open(filename: &str) -> Result<Self> {
        Ok(BigBedReader::new(NetRangeSource::open(filename)?))
    }

}

/* -------------------------------------------------------------------------- */

impl<S: RangeSource> BigBedReader<S> {

    pub fn new(source: S) -> Self {
        BigBedReader {
            loader: BufferedRangeSource::new(source, DEFAULT_BUFFER_SIZE),
            bbf   : None,
            logger: None,
        }
    }

    pub fn with_logger(mut self, logger: Logger) -> Self {
        self.logger = Some(logger);
        self
    }

    pub fn get_header(&mut self) -> Result<&BbiFile> {
        if self.bbf.is_none() {
            self.bbf = Some(BbiFile::open(&mut self.loader, FileKind::BigBed)?);
        }
        Ok(self.bbf.as_ref().unwrap())
    }

    pub fn genome(&mut self) -> Result<&Genome> {
        Ok(&self.get_header()?.genome)
    }

    /// Autosql text describing the record columns, when the file has one.
    pub fn auto_sql(&mut self) -> Result<Option<&str>> {
        Ok(self.get_header()?.auto_sql.as_deref())
    }

    fn resolve_filter(
        &mut self,
        start_chrom: &str,
        start_base : u32,
        end_chrom  : &str,
        end_base   : u32,
    ) -> Result<RecordFilter> {
        let bbf = self.get_header()?;
        Ok(RecordFilter {
            start_chrom: bbf.genome.require_idx(start_chrom)?,
            start_base,
            end_chrom  : bbf.genome.require_idx(end_chrom)?,
            end_base,
        })
    }

    /// Stream the bed records overlapping the query rectangle, decoded
    /// by the given column parser.
    pub fn stream_bigbed_data_with<'a, T: 'a>(
        &'a mut self,
        start_chrom: &'a str,
        start_base : u32,
        end_chrom  : &'a str,
        end_base   : u32,
        parser     : BedColumnParser<T>,
    ) -> impl Stream<Item = Result<T>> + 'a {

        stream! {

            let filter = match self.resolve_filter(start_chrom, start_base, end_chrom, end_base) {
                Ok (f) => f,
                Err(e) => { yield Err(e); return; }
            };

            let (order, index_offset, uncompress, genome) = {
                let bbf = self.bbf.as_ref().unwrap();
                (
                    bbf.header.order,
                    bbf.header.full_index_offset,
                    bbf.header.uncompress_buf_size > 0,
                    bbf.genome.clone(),
                )
            };

            let leaves = match find_overlapping_leaves(&mut self.loader, order, index_offset, &filter.to_query()) {
                Ok (l) => l,
                Err(e) => { yield Err(e); return; }
            };

            log_opt!(self.logger, "bigbed query ({}:{} - {}:{}): {} overlapping blocks",
                start_chrom, start_base, end_chrom, end_base, leaves.len());

            for leaf in leaves {

                let raw = match self.loader.read(leaf.data_offset, leaf.data_size) {
                    Ok (b) => b,
                    Err(e) => { yield Err(e); return; }
                };
                let block = if uncompress {
                    match uncompress_slice(&raw) {
                        Ok (b) => b,
                        Err(e) => { yield Err(e); return; }
                    }
                } else {
                    raw
                };

                let mut records = Vec::new();
                if let Err(e) = decode_bed_block(&block, order, &filter, &genome, parser, &mut records) {
                    yield Err(e); return;
                }
                for record in records {
                    yield Ok(record);
                }
            }
        }
    }

    /// Collect records decoded by the given column parser.
    pub fn read_bigbed_data_with<T>(
        &mut self,
        start_chrom: &str,
        start_base : u32,
        end_chrom  : &str,
        end_base   : u32,
        parser     : BedColumnParser<T>,
    ) -> Result<Vec<T>> {
        let s = Box::pin(self.stream_bigbed_data_with(start_chrom, start_base, end_chrom, end_base, parser));
        block_on_stream(s).collect()
    }

    /// Collect records with the default UCSC parser.
    pub fn read_bigbed_data(
        &mut self,
        start_chrom: &str,
        start_base : u32,
        end_chrom  : &str,
        end_base   : u32,
    ) -> Result<Vec<BedRecord>> {
        self.read_bigbed_data_with(start_chrom, start_base, end_chrom, end_base, parse_bed_default)
    }

    /// Stream records with the default UCSC parser.
    pub fn stream_bigbed_data<'a>(
        &'a mut self,
        start_chrom: &'a str,
        start_base : u32,
        end_chrom  : &'a str,
        end_base   : u32,
    ) -> impl Stream<Item = Result<BedRecord>> + 'a {
        self.stream_bigbed_data_with(start_chrom, start_base, end_chrom, end_base, parse_bed_default)
    }

}

/* -------------------------------------------------------------------------- */
/* -------------------------------------------------------------------------- */
