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

use crate::bai::BaiIndex;
use crate::bgzf::{decompress_chunk, decompress_prefix, BGZF_MAX_BLOCK_SIZE};
use crate::buffered::{BufferedRangeSource, DEFAULT_BUFFER_SIZE};
use crate::cursor::{BinaryCursor, Endian};
use crate::error::{Result, TrackError};
use crate::genome::Genome;
use crate::logger::{log_opt, Logger};
use crate::netfile::{NetRangeSource, RangeSource};

/* -------------------------------------------------------------------------- */

const BAM_MAGIC: u32 = 0x014D4142; // "BAM\1"

const CIGAR_OPS  : &[u8] = b"MIDNSHP=X";
const SEQ_LETTERS: &[u8] = b"=ACMGRSVTWYHKDBN";

pub const FLAG_READ_PAIRED  : u16 = 0x1;
pub const FLAG_PROPER_PAIR  : u16 = 0x2;
pub const FLAG_READ_UNMAPPED: u16 = 0x4;
pub const FLAG_MATE_UNMAPPED: u16 = 0x8;
pub const FLAG_READ_STRAND  : u16 = 0x10;
pub const FLAG_MATE_STRAND  : u16 = 0x20;
pub const FLAG_FIRST_OF_PAIR: u16 = 0x40;
pub const FLAG_SECOND_OF_PAIR: u16 = 0x80;
pub const FLAG_SECONDARY    : u16 = 0x100;
pub const FLAG_QC_FAIL      : u16 = 0x200;
pub const FLAG_DUPLICATE    : u16 = 0x400;
pub const FLAG_SUPPLEMENTARY: u16 = 0x800;

/* -------------------------------------------------------------------------- */

/// Alignment flag word with named accessors.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BamFlag(pub u16);

/* -------------------------------------------------------------------------- */

impl BamFlag {

    pub fn read_paired(&self) -> bool {
        self.0 & FLAG_READ_PAIRED != 0
    }

    pub fn proper_pair(&self) -> bool {
        self.0 & FLAG_PROPER_PAIR != 0
    }

    pub fn unmapped(&self) -> bool {
        self.0 & FLAG_READ_UNMAPPED != 0
    }

    pub fn mate_unmapped(&self) -> bool {
        self.0 & FLAG_MATE_UNMAPPED != 0
    }

    pub fn reverse_strand(&self) -> bool {
        self.0 & FLAG_READ_STRAND != 0
    }

    pub fn mate_reverse_strand(&self) -> bool {
        self.0 & FLAG_MATE_STRAND != 0
    }

    pub fn first_of_pair(&self) -> bool {
        self.0 & FLAG_FIRST_OF_PAIR != 0
    }

    pub fn second_of_pair(&self) -> bool {
        self.0 & FLAG_SECOND_OF_PAIR != 0
    }

    pub fn secondary(&self) -> bool {
        self.0 & FLAG_SECONDARY != 0
    }

    pub fn qc_fail(&self) -> bool {
        self.0 & FLAG_QC_FAIL != 0
    }

    pub fn duplicate(&self) -> bool {
        self.0 & FLAG_DUPLICATE != 0
    }

    pub fn supplementary(&self) -> bool {
        self.0 & FLAG_SUPPLEMENTARY != 0
    }

}

/* -------------------------------------------------------------------------- */

/// One CIGAR operation, with the offset of the bases it consumes within
/// the read sequence.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CigarOp {
    pub op        : char,
    pub op_len    : u32,
    pub seq_offset: u32,
}

/* -------------------------------------------------------------------------- */

impl fmt::Display for CigarOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.op_len, self.op)
    }
}

/* -------------------------------------------------------------------------- */

/// Decoded alignment record.
#[derive(Clone, Debug, Default)]
pub struct BamAlignment {
    pub chrom          : String,
    pub start          : u32,
    pub flags          : BamFlag,
    pub strand         : bool,
    pub read_name      : String,
    pub cigar_ops      : Vec<CigarOp>,
    pub template_length: i32,
    pub mapping_quality: u8,
    pub seq            : String,
    pub phred          : Vec<u8>,
    pub length_on_ref  : u32,
}

/* -------------------------------------------------------------------------- */

/// BAM header: the SAM header text and the reference dictionary, with
/// reference ids given by list position.
#[derive(Clone, Debug, Default)]
pub struct BamHeader {
    pub text  : String,
    pub genome: Genome,
}

/* -------------------------------------------------------------------------- */

impl BamHeader {

    /// Parse the header section from decompressed BGZF output.
    pub fn parse(data: &[u8]) -> Result<BamHeader> {
        let mut cursor = BinaryCursor::new(data, Endian::Little);

        let magic = cursor.read_u32()?;
        if magic != BAM_MAGIC {
            return Err(TrackError::format(format!("invalid BAM magic: {:#x}", magic)));
        }

        let text_length = cursor.read_i32()?;
        let text        = String::from_utf8_lossy(cursor.read_bytes(text_length.max(0) as usize)?).to_string();

        let n_ref      = cursor.read_i32()?;
        let mut genome = Genome::default();

        for _ in 0..n_ref {
            let name_length = cursor.read_i32()?;
            let name        = cursor.read_fixed_string(name_length.max(0) as usize, true)?;
            let ref_length  = cursor.read_i32()?;

            genome.add_sequence(name, ref_length.max(0) as u32)?;
        }

        Ok(BamHeader { text, genome })
    }

}

/* -------------------------------------------------------------------------- */

/// Decode the alignments of one decompressed chunk, keeping those that
/// overlap `[start, end)` on reference `ref_id`. Skipped records are
/// jumped over via their block size; a truncated trailing record ends
/// the chunk.
pub(crate) fn decode_alignments(
    data  : &[u8],
    ref_id: u32,
    start : u32,
    end   : u32,
    chrom : &str,
    out   : &mut Vec<BamAlignment>,
) -> Result<()> {

    let mut cursor = BinaryCursor::new(data, Endian::Little);

    while cursor.remaining() >= 4 {
        let block_size = cursor.read_i32()?;
        if block_size <= 0 || cursor.remaining() < block_size as usize {
            break;
        }
        let block_end = cursor.position + block_size as usize;

        let block_ref_id  = cursor.read_i32()?;
        let pos           = cursor.read_i32()?;
        let read_name_len = cursor.read_u8()?;
        let mapq          = cursor.read_u8()?;
        let _bin          = cursor.read_u16()?;
        let n_cigar_op    = cursor.read_u16()?;
        let flags         = cursor.read_u16()?;
        let seq_len       = cursor.read_i32()?;
        let _mate_ref_id  = cursor.read_i32()?;
        let _mate_pos     = cursor.read_i32()?;
        let template_len  = cursor.read_i32()?;

        if block_ref_id == -1
            || block_ref_id != ref_id as i32
            || pos > end as i32
            || pos + seq_len < start as i32
        {
            cursor.position = block_end;
            continue;
        }

        let read_name = cursor.read_cstring(Some(read_name_len as usize))?;

        let mut cigar_ops     = Vec::with_capacity(n_cigar_op as usize);
        let mut seq_offset    = 0u32;
        let mut length_on_ref = 0u32;

        for _ in 0..n_cigar_op {
            let raw    = cursor.read_u32()?;
            let op_len = raw >> 4;
            let op     = CIGAR_OPS[(raw & 0xf) as usize] as char;

            cigar_ops.push(CigarOp { op, op_len, seq_offset });

            if matches!(op, 'M' | 'I' | 'S' | '=' | 'X') {
                seq_offset += op_len;
            }
            if matches!(op, 'M' | 'D' | 'N' | '=' | 'X') {
                length_on_ref += op_len;
            }
        }

        // Two bases per byte, high nibble first
        let seq_bytes = cursor.read_bytes(((seq_len + 1) / 2).max(0) as usize)?;
        let mut seq   = String::with_capacity(seq_len.max(0) as usize);
        for &byte in seq_bytes {
            seq.push(SEQ_LETTERS[(byte >> 4) as usize] as char);
            seq.push(SEQ_LETTERS[(byte & 0xf) as usize] as char);
        }
        seq.truncate(seq_len.max(0) as usize);

        let phred = cursor.read_bytes(seq_len.max(0) as usize)?.to_vec();

        // Optional tags are skipped
        cursor.position = block_end;

        out.push(BamAlignment {
            chrom          : chrom.to_string(),
            start          : pos as u32,
            flags          : BamFlag(flags),
            strand         : flags & FLAG_READ_STRAND == 0,
            read_name,
            cigar_ops,
            template_length: template_len,
            mapping_quality: mapq,
            seq,
            phred,
            length_on_ref,
        });
    }
    Ok(())
}

/* -------------------------------------------------------------------------- */

/// Reader for indexed BAM files. The BAI index and the header are read
/// on first use and cached; region reads fetch only the BGZF members
/// addressed by the index.
pub struct BamReader<S: RangeSource> {
    loader    : BufferedRangeSource<S>,
    bai_source: S,
    bai       : Option<BaiIndex>,
    header    : Option<BamHeader>,
    logger    : Option<Logger>,
}

/* -------------------------------------------------------------------------- */

impl BamReader<NetRangeSource> {

    /// Open a local path or an HTTP(S) URL together with its BAI index.
    pub fn open(filename: &str, index_filename: &str) -> Result<Self> {
        Ok(BamReader::new(
            NetRangeSource::open(filename)?,
            NetRangeSource::open(index_filename)?,
        ))
    }

}

/* -------------------------------------------------------------------------- */

impl<S: RangeSource> BamReader<S> {

    pub fn new(source: S, index_source: S) -> Self {
        BamReader {
            loader    : BufferedRangeSource::new(source, DEFAULT_BUFFER_SIZE),
            bai_source: index_source,
            bai       : None,
            header    : None,
            logger    : None,
        }
    }

    pub fn with_logger(mut self, logger: Logger) -> Self {
        self.logger = Some(logger);
        self
    }

    pub fn get_index_data(&mut self) -> Result<&BaiIndex> {
        if self.bai.is_none() {
            let data = self.bai_source.read(0, None)?;
            self.bai = Some(BaiIndex::parse(&data)?);
        }
        Ok(self.bai.as_ref().unwrap())
    }

    pub fn get_header_data(&mut self) -> Result<&BamHeader> {
        if self.header.is_none() {
            // The header ends at the first alignment member; one extra
            // member bounds the fetch
            let first_block = self.get_index_data()?.first_alignment_block();
            let bound       = first_block + BGZF_MAX_BLOCK_SIZE as u64;

            let raw  = self.loader.read(0, bound)?;
            let data = decompress_prefix(&raw)?;

            self.header = Some(BamHeader::parse(&data)?);
        }
        Ok(self.header.as_ref().unwrap())
    }

    pub fn genome(&mut self) -> Result<&Genome> {
        Ok(&self.get_header_data()?.genome)
    }

    /// Stream the alignments overlapping `[start, end)` on `chrom`, in
    /// file order.
    pub fn stream_read<'a>(
        &'a mut self,
        chrom: &'a str,
        start: u32,
        end  : u32,
    ) -> impl Stream<Item = Result<BamAlignment>> + 'a {

        stream! {

            if let Err(e) = self.get_header_data() {
                yield Err(e); return;
            }

            let genome = self.header.as_ref().unwrap().genome.clone();
            let ref_id = match genome.require_idx(chrom) {
                Ok (id) => id,
                Err(e)  => { yield Err(e); return; }
            };

            let chunks = match self.get_index_data().and_then(|bai| bai.chunks_for_region(ref_id, start, end)) {
                Ok (c) => c,
                Err(e) => { yield Err(e); return; }
            };

            log_opt!(self.logger, "bam query {}:{}-{}: {} chunks", chrom, start, end, chunks.len());

            for chunk in chunks {

                let fetch_size = chunk.end.block_pos + BGZF_MAX_BLOCK_SIZE as u64 - chunk.start.block_pos;

                let raw = match self.loader.read(chunk.start.block_pos, fetch_size) {
                    Ok (r) => r,
                    Err(e) => { yield Err(e); return; }
                };
                let data = match decompress_chunk(&raw, &chunk) {
                    Ok (d) => d,
                    Err(e) => { yield Err(e); return; }
                };

                let mut alignments = Vec::new();
                if let Err(e) = decode_alignments(&data, ref_id, start, end, chrom, &mut alignments) {
                    yield Err(e); return;
                }
                for alignment in alignments {
                    yield Ok(alignment);
                }
            }
        }
    }

    /// Collect the alignments overlapping `[start, end)` on `chrom`.
    pub fn read(&mut self, chrom: &str, start: u32, end: u32) -> Result<Vec<BamAlignment>> {
        let s = Box::pin(self.stream_read(chrom, start, end));
        block_on_stream(s).collect()
    }

}

/* -------------------------------------------------------------------------- */
/* -------------------------------------------------------------------------- */
