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

//! In-memory builders for the binary formats under test.

#![allow(dead_code)]

use std::io::Write;

use flate2::write::{DeflateEncoder, ZlibEncoder};
use flate2::{Compression, Crc};

/* -------------------------------------------------------------------------- */

pub const BIGWIG_MAGIC    : u32 = 0x888FFC26;
pub const BIGBED_MAGIC    : u32 = 0x8789F2EB;
pub const CHROM_TREE_MAGIC: u32 = 0x78CA4A8E;
pub const RTREE_MAGIC     : u32 = 0x2468ACE0;
pub const BAI_MAGIC       : u32 = 21578050;
pub const BAM_MAGIC       : u32 = 0x014D4142;

pub const BBI_TYPE_BED_GRAPH: u8 = 1;
pub const BBI_TYPE_VARIABLE : u8 = 2;
pub const BBI_TYPE_FIXED    : u8 = 3;

/* -------------------------------------------------------------------------- */

/// One data block of a bbi file: the rectangle it covers and its
/// uncompressed payload.
pub struct BbiBlock {
    pub start_chrom: u32,
    pub start_base : u32,
    pub end_chrom  : u32,
    pub end_base   : u32,
    pub payload    : Vec<u8>,
}

/* -------------------------------------------------------------------------- */

pub struct BbiBuilder {
    magic   : u32,
    chroms  : Vec<(String, u32)>,
    blocks  : Vec<BbiBlock>,
    zooms   : Vec<(u32, Vec<BbiBlock>)>,
    compress: bool,
}

/* -------------------------------------------------------------------------- */

impl BbiBuilder {

    pub fn new_bigwig(chroms: &[(&str, u32)]) -> Self {
        BbiBuilder::new(BIGWIG_MAGIC, chroms)
    }

    pub fn new_bigbed(chroms: &[(&str, u32)]) -> Self {
        BbiBuilder::new(BIGBED_MAGIC, chroms)
    }

    fn new(magic: u32, chroms: &[(&str, u32)]) -> Self {
        BbiBuilder {
            magic,
            chroms  : chroms.iter().map(|(n, s)| (n.to_string(), *s)).collect(),
            blocks  : Vec::new(),
            zooms   : Vec::new(),
            compress: false,
        }
    }

    pub fn compressed(mut self) -> Self {
        self.compress = true;
        self
    }

    pub fn add_block(&mut self, block: BbiBlock) -> &mut Self {
        self.blocks.push(block);
        self
    }

    pub fn add_zoom_level(&mut self, reduction_level: u32, blocks: Vec<BbiBlock>) -> &mut Self {
        self.zooms.push((reduction_level, blocks));
        self
    }

    /// Assemble the file: header, zoom table, total summary, chromosome
    /// tree, data section, R+ tree, then one data+index pair per zoom
    /// level.
    pub fn build(&self) -> Vec<u8> {
        let uncompress_buf_size = if self.compress {
            self.blocks.iter()
                .chain(self.zooms.iter().flat_map(|(_, b)| b.iter()))
                .map(|b| b.payload.len())
                .max()
                .unwrap_or(0) as u32
        } else {
            0
        };

        let chrom_tree = self.build_chrom_tree();

        let summary_size  = 40u64;
        let zoom_table    = (self.zooms.len() * 24) as u64;
        let summary_off   = 64 + zoom_table;
        let chrom_off     = summary_off + summary_size;
        let data_off      = chrom_off + chrom_tree.len() as u64;

        let (data, leaves)  = self.build_data_section(&self.blocks, data_off);
        let index_off       = data_off + data.len() as u64;
        let index           = build_rtree(&leaves);

        // Zoom sections follow the main index
        let mut zoom_entries = Vec::new();
        let mut zoom_bytes   = Vec::new();
        let mut cursor_off   = index_off + index.len() as u64;

        for (reduction, blocks) in &self.zooms {
            let (zdata, zleaves) = self.build_data_section(blocks, cursor_off);
            let zindex_off       = cursor_off + zdata.len() as u64;
            let zindex           = build_rtree(&zleaves);

            zoom_entries.push((*reduction, cursor_off, zindex_off));
            cursor_off += zdata.len() as u64 + zindex.len() as u64;
            zoom_bytes.extend_from_slice(&zdata);
            zoom_bytes.extend_from_slice(&zindex);
        }

        let mut file = Vec::new();

        // Common header
        file.extend_from_slice(&self.magic.to_le_bytes());
        file.extend_from_slice(&4u16.to_le_bytes());                      // version
        file.extend_from_slice(&(self.zooms.len() as u16).to_le_bytes());
        file.extend_from_slice(&chrom_off.to_le_bytes());
        file.extend_from_slice(&data_off.to_le_bytes());
        file.extend_from_slice(&index_off.to_le_bytes());
        file.extend_from_slice(&0u16.to_le_bytes());                      // field count
        file.extend_from_slice(&0u16.to_le_bytes());                      // defined field count
        file.extend_from_slice(&0u64.to_le_bytes());                      // autosql offset
        file.extend_from_slice(&summary_off.to_le_bytes());
        file.extend_from_slice(&uncompress_buf_size.to_le_bytes());
        file.extend_from_slice(&0u64.to_le_bytes());                      // reserved

        for (reduction, zdata_off, zindex_off) in &zoom_entries {
            file.extend_from_slice(&reduction.to_le_bytes());
            file.extend_from_slice(&0u32.to_le_bytes());
            file.extend_from_slice(&zdata_off.to_le_bytes());
            file.extend_from_slice(&zindex_off.to_le_bytes());
        }

        // Total summary
        file.extend_from_slice(&0u64.to_le_bytes());
        file.extend_from_slice(&0f64.to_le_bytes());
        file.extend_from_slice(&0f64.to_le_bytes());
        file.extend_from_slice(&0f64.to_le_bytes());
        file.extend_from_slice(&0f64.to_le_bytes());

        file.extend_from_slice(&chrom_tree);
        file.extend_from_slice(&data);
        file.extend_from_slice(&index);
        file.extend_from_slice(&zoom_bytes);

        assert_eq!(file.len() as u64, cursor_off);
        file
    }

    fn build_chrom_tree(&self) -> Vec<u8> {
        let key_size = self.chroms.iter().map(|(n, _)| n.len()).max().unwrap_or(1) as u32;

        let mut tree = Vec::new();
        tree.extend_from_slice(&CHROM_TREE_MAGIC.to_le_bytes());
        tree.extend_from_slice(&256u32.to_le_bytes());                    // block size
        tree.extend_from_slice(&key_size.to_le_bytes());
        tree.extend_from_slice(&8u32.to_le_bytes());                      // value size
        tree.extend_from_slice(&(self.chroms.len() as u64).to_le_bytes());
        tree.extend_from_slice(&0u64.to_le_bytes());                      // reserved

        // Single leaf node holding every chromosome
        tree.push(1);
        tree.push(0);
        tree.extend_from_slice(&(self.chroms.len() as u16).to_le_bytes());

        for (id, (name, size)) in self.chroms.iter().enumerate() {
            let mut key = name.as_bytes().to_vec();
            key.resize(key_size as usize, 0);
            tree.extend_from_slice(&key);
            tree.extend_from_slice(&(id as u32).to_le_bytes());
            tree.extend_from_slice(&size.to_le_bytes());
        }
        tree
    }

    fn build_data_section(&self, blocks: &[BbiBlock], section_offset: u64) -> (Vec<u8>, Vec<RTreeLeafSpec>) {
        let mut data = (blocks.len() as u32).to_le_bytes().to_vec();
        let mut leaves = Vec::new();

        for block in blocks {
            let payload = if self.compress {
                let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
                encoder.write_all(&block.payload).unwrap();
                encoder.finish().unwrap()
            } else {
                block.payload.clone()
            };

            leaves.push(RTreeLeafSpec {
                start_chrom: block.start_chrom,
                start_base : block.start_base,
                end_chrom  : block.end_chrom,
                end_base   : block.end_base,
                data_offset: section_offset + data.len() as u64,
                data_size  : payload.len() as u64,
            });
            data.extend_from_slice(&payload);
        }
        (data, leaves)
    }

}

/* -------------------------------------------------------------------------- */

pub struct RTreeLeafSpec {
    pub start_chrom: u32,
    pub start_base : u32,
    pub end_chrom  : u32,
    pub end_base   : u32,
    pub data_offset: u64,
    pub data_size  : u64,
}

/* -------------------------------------------------------------------------- */

/// 48-byte index header followed by a single leaf node.
fn build_rtree(leaves: &[RTreeLeafSpec]) -> Vec<u8> {
    let start_chrom = leaves.iter().map(|l| l.start_chrom).min().unwrap_or(0);
    let end_chrom   = leaves.iter().map(|l| l.end_chrom)  .max().unwrap_or(0);
    let start_base  = leaves.iter().map(|l| l.start_base) .min().unwrap_or(0);
    let end_base    = leaves.iter().map(|l| l.end_base)   .max().unwrap_or(0);

    let mut tree = Vec::new();
    tree.extend_from_slice(&RTREE_MAGIC.to_le_bytes());
    tree.extend_from_slice(&256u32.to_le_bytes());
    tree.extend_from_slice(&(leaves.len() as u64).to_le_bytes());
    tree.extend_from_slice(&start_chrom.to_le_bytes());
    tree.extend_from_slice(&start_base.to_le_bytes());
    tree.extend_from_slice(&end_chrom.to_le_bytes());
    tree.extend_from_slice(&end_base.to_le_bytes());
    tree.extend_from_slice(&0u64.to_le_bytes());          // end file offset
    tree.extend_from_slice(&1024u32.to_le_bytes());       // items per slot
    tree.extend_from_slice(&0u32.to_le_bytes());          // reserved

    tree.push(1);
    tree.push(0);
    tree.extend_from_slice(&(leaves.len() as u16).to_le_bytes());

    for leaf in leaves {
        tree.extend_from_slice(&leaf.start_chrom.to_le_bytes());
        tree.extend_from_slice(&leaf.start_base.to_le_bytes());
        tree.extend_from_slice(&leaf.end_chrom.to_le_bytes());
        tree.extend_from_slice(&leaf.end_base.to_le_bytes());
        tree.extend_from_slice(&leaf.data_offset.to_le_bytes());
        tree.extend_from_slice(&leaf.data_size.to_le_bytes());
    }
    tree
}

/* -------------------------------------------------------------------------- */

/// Encode one wig block payload.
pub fn wig_block(
    kind    : u8,
    chrom_id: u32,
    start   : u32,
    step    : u32,
    span    : u32,
    items   : &[(u32, u32, f32)],
) -> Vec<u8> {
    let mut b = Vec::new();
    b.extend_from_slice(&chrom_id.to_le_bytes());
    b.extend_from_slice(&start.to_le_bytes());
    b.extend_from_slice(&items.last().map_or(start, |i| i.1).to_le_bytes());
    b.extend_from_slice(&step.to_le_bytes());
    b.extend_from_slice(&span.to_le_bytes());
    b.push(kind);
    b.push(0);
    b.extend_from_slice(&(items.len() as u16).to_le_bytes());

    for (s, e, v) in items {
        match kind {
            BBI_TYPE_BED_GRAPH => {
                b.extend_from_slice(&s.to_le_bytes());
                b.extend_from_slice(&e.to_le_bytes());
                b.extend_from_slice(&v.to_le_bytes());
            }
            BBI_TYPE_VARIABLE => {
                b.extend_from_slice(&s.to_le_bytes());
                b.extend_from_slice(&v.to_le_bytes());
            }
            _ => {
                b.extend_from_slice(&v.to_le_bytes());
            }
        }
    }
    b
}

/* -------------------------------------------------------------------------- */

/// Encode one bed block payload.
pub fn bed_block(records: &[(u32, u32, u32, &str)]) -> Vec<u8> {
    let mut b = Vec::new();
    for (chrom_id, start, end, rest) in records {
        b.extend_from_slice(&chrom_id.to_le_bytes());
        b.extend_from_slice(&start.to_le_bytes());
        b.extend_from_slice(&end.to_le_bytes());
        b.extend_from_slice(rest.as_bytes());
        b.push(0);
    }
    b
}

/* -------------------------------------------------------------------------- */

/// Encode one zoom block payload of 32-byte summary records.
pub fn zoom_block(records: &[(u32, u32, u32, u32, f32, f32, f32, f32)]) -> Vec<u8> {
    let mut b = Vec::new();
    for (chrom_id, start, end, valid, min, max, sum, sum_sq) in records {
        b.extend_from_slice(&chrom_id.to_le_bytes());
        b.extend_from_slice(&start.to_le_bytes());
        b.extend_from_slice(&end.to_le_bytes());
        b.extend_from_slice(&valid.to_le_bytes());
        b.extend_from_slice(&min.to_le_bytes());
        b.extend_from_slice(&max.to_le_bytes());
        b.extend_from_slice(&sum.to_le_bytes());
        b.extend_from_slice(&sum_sq.to_le_bytes());
    }
    b
}

/* -------------------------------------------------------------------------- */

/// Assemble one BGZF member around raw deflate output.
pub fn bgzf_member(data: &[u8]) -> Vec<u8> {
    let mut encoder = DeflateEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data).unwrap();
    let payload = encoder.finish().unwrap();

    let total = 18 + payload.len() + 8;
    assert!(total <= 65536);
    let bsize = (total - 1) as u16;

    let mut crc = Crc::new();
    crc.update(data);

    let mut member = Vec::with_capacity(total);
    member.extend_from_slice(&[
        0x1f, 0x8b, 0x08, 0x04,
        0, 0, 0, 0,
        0, 0xff,
        6, 0,
        b'B', b'C', 2, 0,
    ]);
    member.extend_from_slice(&bsize.to_le_bytes());
    member.extend_from_slice(&payload);
    member.extend_from_slice(&crc.sum().to_le_bytes());
    member.extend_from_slice(&(data.len() as u32).to_le_bytes());
    member
}

/* -------------------------------------------------------------------------- */

/// Uncompressed BAM header section.
pub fn bam_header(text: &str, refs: &[(&str, u32)]) -> Vec<u8> {
    let mut data = BAM_MAGIC.to_le_bytes().to_vec();
    data.extend_from_slice(&(text.len() as i32).to_le_bytes());
    data.extend_from_slice(text.as_bytes());
    data.extend_from_slice(&(refs.len() as i32).to_le_bytes());

    for (name, length) in refs {
        data.extend_from_slice(&(name.len() as i32 + 1).to_le_bytes());
        data.extend_from_slice(name.as_bytes());
        data.push(0);
        data.extend_from_slice(&(*length as i32).to_le_bytes());
    }
    data
}

/* -------------------------------------------------------------------------- */

const CIGAR_OPS  : &[u8] = b"MIDNSHP=X";
const SEQ_LETTERS: &[u8] = b"=ACMGRSVTWYHKDBN";

/// Uncompressed BAM alignment record.
pub fn bam_record(
    ref_id: i32,
    pos   : i32,
    flags : u16,
    mapq  : u8,
    name  : &str,
    cigar : &[(u32, u8)],
    seq   : &str,
) -> Vec<u8> {
    let mut body = Vec::new();
    body.extend_from_slice(&ref_id.to_le_bytes());
    body.extend_from_slice(&pos.to_le_bytes());
    body.push(name.len() as u8 + 1);
    body.push(mapq);
    body.extend_from_slice(&0u16.to_le_bytes());
    body.extend_from_slice(&(cigar.len() as u16).to_le_bytes());
    body.extend_from_slice(&flags.to_le_bytes());
    body.extend_from_slice(&(seq.len() as i32).to_le_bytes());
    body.extend_from_slice(&(-1i32).to_le_bytes());
    body.extend_from_slice(&(-1i32).to_le_bytes());
    body.extend_from_slice(&0i32.to_le_bytes());
    body.extend_from_slice(name.as_bytes());
    body.push(0);

    for (len, op) in cigar {
        let op_index = CIGAR_OPS.iter().position(|&c| c == *op).unwrap() as u32;
        body.extend_from_slice(&((len << 4) | op_index).to_le_bytes());
    }

    for pair in seq.as_bytes().chunks(2) {
        let hi = SEQ_LETTERS.iter().position(|&c| c == pair[0]).unwrap() as u8;
        let lo = if pair.len() > 1 {
            SEQ_LETTERS.iter().position(|&c| c == pair[1]).unwrap() as u8
        } else {
            0
        };
        body.push((hi << 4) | lo);
    }
    body.extend_from_slice(&vec![30u8; seq.len()]);

    let mut record = (body.len() as i32).to_le_bytes().to_vec();
    record.extend_from_slice(&body);
    record
}

/* -------------------------------------------------------------------------- */

/// BAI index with one reference; every chunk is filed under the root
/// bin, which every region lookup consults.
pub fn bai_index(chunks: &[(u64, u16, u64, u16)], linear: &[u64]) -> Vec<u8> {
    let mut data = BAI_MAGIC.to_le_bytes().to_vec();
    data.extend_from_slice(&1i32.to_le_bytes());           // one reference

    data.extend_from_slice(&1i32.to_le_bytes());           // one bin
    data.extend_from_slice(&0u32.to_le_bytes());           // root bin number
    data.extend_from_slice(&(chunks.len() as i32).to_le_bytes());

    for (start_block, start_data, end_block, end_data) in chunks {
        data.extend_from_slice(&((start_block << 16) | *start_data as u64).to_le_bytes());
        data.extend_from_slice(&((end_block   << 16) | *end_data   as u64).to_le_bytes());
    }

    data.extend_from_slice(&(linear.len() as i32).to_le_bytes());
    for vo in linear {
        data.extend_from_slice(&vo.to_le_bytes());
    }
    data
}
