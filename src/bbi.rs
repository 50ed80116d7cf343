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

use std::io::Read;

use byteorder::{BigEndian, ByteOrder, LittleEndian};
use flate2::read::ZlibDecoder;

use crate::buffered::BufferedRangeSource;
use crate::cursor::{BinaryCursor, Endian};
use crate::error::{Result, TrackError};
use crate::genome::Genome;
use crate::netfile::RangeSource;

/* -------------------------------------------------------------------------- */

pub const BIGWIG_MAGIC    : u32 = 0x888FFC26;
pub const BIGBED_MAGIC    : u32 = 0x8789F2EB;
pub const TWOBIT_MAGIC    : u32 = 0x1A412743;
pub const CHROM_TREE_MAGIC: u32 = 0x78CA4A8E;

const COMMON_HEADER_SIZE: u64 = 64;

/* -------------------------------------------------------------------------- */

/// File kind discovered from the first four bytes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FileKind {
    BigWig,
    BigBed,
    TwoBit,
    Bam,
}

/* -------------------------------------------------------------------------- */

/// Identify the file from its magic, trying little-endian first and
/// falling back to the opposite byte order. BAM files are BGZF streams
/// and are recognized by the gzip magic instead.
pub fn detect_file_kind<S: RangeSource>(
    loader: &mut BufferedRangeSource<S>,
) -> Result<(FileKind, Endian)> {

    let bytes = loader.read(0, 4)?;
    if bytes.len() < 4 {
        return Err(TrackError::format("file too short for a magic number"));
    }

    if bytes[0] == 0x1f && bytes[1] == 0x8b {
        return Ok((FileKind::Bam, Endian::Little));
    }

    for order in [Endian::Little, Endian::Big] {
        let magic = match order {
            Endian::Little => LittleEndian::read_u32(&bytes),
            Endian::Big    => BigEndian   ::read_u32(&bytes),
        };
        match magic {
            BIGWIG_MAGIC => return Ok((FileKind::BigWig, order)),
            BIGBED_MAGIC => return Ok((FileKind::BigBed, order)),
            TWOBIT_MAGIC => return Ok((FileKind::TwoBit, order)),
            _            => {}
        }
    }

    Err(TrackError::format(format!(
        "unrecognized file magic: {:02x} {:02x} {:02x} {:02x}",
        bytes[0], bytes[1], bytes[2], bytes[3]
    )))
}

/* -------------------------------------------------------------------------- */

/// Common header of a BigWig or BigBed file.
#[derive(Clone, Debug)]
pub struct BbiHeader {
    pub kind                : FileKind,
    pub order               : Endian,
    pub version             : u16,
    pub zoom_levels         : u16,
    pub chrom_tree_offset   : u64,
    pub full_data_offset    : u64,
    pub full_index_offset   : u64,
    pub field_count         : u16,
    pub defined_field_count : u16,
    pub auto_sql_offset     : u64,
    pub total_summary_offset: u64,
    pub uncompress_buf_size : u32,
}

/* -------------------------------------------------------------------------- */

#[derive(Clone, Copy, Debug)]
pub struct BbiZoomHeader {
    pub reduction_level: u32,
    pub data_offset    : u64,
    pub index_offset   : u64,
}

/* -------------------------------------------------------------------------- */

#[derive(Clone, Copy, Debug)]
pub struct BbiSummary {
    pub valid_count: u64,
    pub min_val    : f64,
    pub max_val    : f64,
    pub sum_data   : f64,
    pub sum_squares: f64,
}

/* -------------------------------------------------------------------------- */

/// Decoded file-level structures of a BigWig/BigBed file: header, zoom
/// table, autosql, total summary and chromosome dictionary. Built once
/// per reader and immutable afterwards.
#[derive(Clone, Debug)]
pub struct BbiFile {
    pub header      : BbiHeader,
    pub zoom_headers: Vec<BbiZoomHeader>,
    pub auto_sql    : Option<String>,
    pub summary     : Option<BbiSummary>,
    pub data_count  : u32,
    pub genome      : Genome,
}

/* -------------------------------------------------------------------------- */

impl BbiFile {

    /// Decode everything between the file head and the start of the data
    /// section. The region past the fixed header is fetched as one
    /// contiguous block.
    pub fn open<S: RangeSource>(
        loader  : &mut BufferedRangeSource<S>,
        expected: FileKind,
    ) -> Result<BbiFile> {

        let (kind, order) = detect_file_kind(loader)?;
        if kind != expected {
            return Err(TrackError::format(format!(
                "expected a {:?} file, found {:?}", expected, kind
            )));
        }

        let head       = loader.read(0, COMMON_HEADER_SIZE)?;
        let mut cursor = BinaryCursor::new(&head, order);
        cursor.position = 4; // past the magic

        let header = BbiHeader {
            kind,
            order,
            version             : cursor.read_u16()?,
            zoom_levels         : cursor.read_u16()?,
            chrom_tree_offset   : cursor.read_u64()?,
            full_data_offset    : cursor.read_u64()?,
            full_index_offset   : cursor.read_u64()?,
            field_count         : cursor.read_u16()?,
            defined_field_count : cursor.read_u16()?,
            auto_sql_offset     : cursor.read_u64()?,
            total_summary_offset: cursor.read_u64()?,
            uncompress_buf_size : cursor.read_u32()?,
        };

        if header.full_data_offset < COMMON_HEADER_SIZE {
            return Err(TrackError::format("invalid full data offset"));
        }

        // Zoom table, autosql, total summary and chromosome tree all live
        // between the header and the data section
        let body_size = header.full_data_offset + 5 - COMMON_HEADER_SIZE;
        let body      = loader.read(COMMON_HEADER_SIZE, body_size)?;

        let zoom_headers = read_zoom_headers(&body, &header)?;
        let auto_sql     = read_auto_sql    (&body, &header)?;
        let summary      = read_summary     (&body, &header)?;
        let genome       = read_chrom_tree  (&body, &header)?;

        let mut cursor = BinaryCursor::new(&body, order);
        cursor.position = (header.full_data_offset - COMMON_HEADER_SIZE) as usize;
        let data_count = cursor.read_u32()?;

        Ok(BbiFile {
            header,
            zoom_headers,
            auto_sql,
            summary,
            data_count,
            genome,
        })
    }

    /// Index offset of the given zoom level. The zoom table is indexed
    /// the way the reader API exposes it; an out-of-range level is a
    /// format error.
    pub fn zoom_header(&self, zoom_index: usize) -> Result<&BbiZoomHeader> {
        self.zoom_headers.get(zoom_index).ok_or_else(|| {
            TrackError::format(format!(
                "invalid zoom level index {} (file has {} levels)",
                zoom_index,
                self.zoom_headers.len()
            ))
        })
    }

}

/* -------------------------------------------------------------------------- */

/// Inflate one zlib-compressed data block.
pub(crate) fn uncompress_slice(data: &[u8]) -> Result<Vec<u8>> {
    let mut decoder = ZlibDecoder::new(data);
    let mut buffer  = Vec::new();
    decoder.read_to_end(&mut buffer)
        .map_err(|e| TrackError::format(format!("zlib inflate failed: {}", e)))?;
    Ok(buffer)
}

/* -------------------------------------------------------------------------- */

fn read_zoom_headers(body: &[u8], header: &BbiHeader) -> Result<Vec<BbiZoomHeader>> {
    let mut cursor  = BinaryCursor::new(body, header.order);
    let mut headers = vec![
        BbiZoomHeader { reduction_level: 0, data_offset: 0, index_offset: 0 };
        header.zoom_levels as usize
    ];

    // The table is exposed in reverse of its on-disk order
    for i in 0..header.zoom_levels as usize {
        let reduction_level = cursor.read_u32()?;
        let _reserved       = cursor.read_u32()?;
        let data_offset     = cursor.read_u64()?;
        let index_offset    = cursor.read_u64()?;

        headers[header.zoom_levels as usize - 1 - i] = BbiZoomHeader {
            reduction_level,
            data_offset,
            index_offset,
        };
    }
    Ok(headers)
}

/* -------------------------------------------------------------------------- */

fn read_auto_sql(body: &[u8], header: &BbiHeader) -> Result<Option<String>> {
    if header.auto_sql_offset == 0 {
        return Ok(None);
    }
    let mut cursor = BinaryCursor::new(body, header.order);
    cursor.position = (header.auto_sql_offset - COMMON_HEADER_SIZE) as usize;

    Ok(Some(cursor.read_cstring(None)?))
}

/* -------------------------------------------------------------------------- */

fn read_summary(body: &[u8], header: &BbiHeader) -> Result<Option<BbiSummary>> {
    if header.total_summary_offset == 0 {
        return Ok(None);
    }
    let mut cursor = BinaryCursor::new(body, header.order);
    cursor.position = (header.total_summary_offset - COMMON_HEADER_SIZE) as usize;

    Ok(Some(BbiSummary {
        valid_count: cursor.read_u64()?,
        min_val    : cursor.read_f64()?,
        max_val    : cursor.read_f64()?,
        sum_data   : cursor.read_f64()?,
        sum_squares: cursor.read_f64()?,
    }))
}

/* -------------------------------------------------------------------------- */

/// Walk the chromosome B+ tree depth-first, filling the dictionary with
/// `(name, id, size)` triples found at the leaves.
fn read_chrom_tree(body: &[u8], header: &BbiHeader) -> Result<Genome> {
    let mut cursor = BinaryCursor::new(body, header.order);
    cursor.position = (header.chrom_tree_offset - COMMON_HEADER_SIZE) as usize;

    let magic = cursor.read_u32()?;
    if magic != CHROM_TREE_MAGIC {
        return Err(TrackError::format(format!(
            "invalid chromosome tree magic: {:#x}", magic
        )));
    }

    let _block_size = cursor.read_u32()?;
    let key_size    = cursor.read_u32()? as usize;
    let val_size    = cursor.read_u32()?;
    let _item_count = cursor.read_u64()?;
    let _reserved   = cursor.read_u64()?;

    if val_size != 8 {
        return Err(TrackError::format(format!(
            "invalid chromosome tree value size: {}", val_size
        )));
    }

    let mut genome = Genome::default();
    let root       = cursor.position;
    read_chrom_tree_node(body, header, root, key_size, &mut genome)?;

    Ok(genome)
}

/* -------------------------------------------------------------------------- */

fn read_chrom_tree_node(
    body    : &[u8],
    header  : &BbiHeader,
    position: usize,
    key_size: usize,
    genome  : &mut Genome,
) -> Result<()> {

    let mut cursor = BinaryCursor::new(body, header.order);
    cursor.position = position;

    let is_leaf   = cursor.read_u8()?;
    let _reserved = cursor.read_u8()?;
    let count     = cursor.read_u16()?;

    if is_leaf != 0 {
        for _ in 0..count {
            let key        = cursor.read_fixed_string(key_size, true)?;
            let chrom_id   = cursor.read_u32()?;
            let chrom_size = cursor.read_u32()?;
            genome.insert_sequence(chrom_id, key, chrom_size)?;
        }
    } else {
        let mut children = Vec::with_capacity(count as usize);
        for _ in 0..count {
            cursor.skip(key_size)?;
            children.push(cursor.read_u64()?);
        }
        for child in children {
            if child < COMMON_HEADER_SIZE {
                return Err(TrackError::format("invalid chromosome tree child offset"));
            }
            let child_pos = (child - COMMON_HEADER_SIZE) as usize;
            read_chrom_tree_node(body, header, child_pos, key_size, genome)?;
        }
    }
    Ok(())
}

/* -------------------------------------------------------------------------- */
/* -------------------------------------------------------------------------- */

#[cfg(test)]
mod tests {

    use super::*;
    use crate::netfile::MemoryRangeSource;

    #[test]
    fn test_detect_file_kind() {

        let mut data = BIGWIG_MAGIC.to_le_bytes().to_vec();
        data.resize(16, 0);
        let mut loader = BufferedRangeSource::new(MemoryRangeSource::new(data), 64);
        assert_eq!(detect_file_kind(&mut loader).unwrap(), (FileKind::BigWig, Endian::Little));

        let mut data = BIGBED_MAGIC.to_be_bytes().to_vec();
        data.resize(16, 0);
        let mut loader = BufferedRangeSource::new(MemoryRangeSource::new(data), 64);
        assert_eq!(detect_file_kind(&mut loader).unwrap(), (FileKind::BigBed, Endian::Big));

        let mut data = vec![0x1f, 0x8b, 0x08, 0x04];
        data.resize(16, 0);
        let mut loader = BufferedRangeSource::new(MemoryRangeSource::new(data), 64);
        assert_eq!(detect_file_kind(&mut loader).unwrap(), (FileKind::Bam, Endian::Little));

        let mut loader = BufferedRangeSource::new(MemoryRangeSource::new(vec![9; 16]), 64);
        assert!(detect_file_kind(&mut loader).is_err());
    }

}
