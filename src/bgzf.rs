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

use byteorder::{ByteOrder, LittleEndian};
use flate2::read::DeflateDecoder;

use crate::bai::Chunk;
use crate::error::{Result, TrackError};

/* -------------------------------------------------------------------------- */

/// Upper bound on the size of one compressed BGZF member.
pub const BGZF_MAX_BLOCK_SIZE: usize = 65536;

const GZIP_ID1    : u8 = 0x1f;
const GZIP_ID2    : u8 = 0x8b;
const GZIP_DEFLATE: u8 = 8;
const GZIP_FEXTRA : u8 = 0x04;

/* -------------------------------------------------------------------------- */

/// Framing of one member: where its deflate payload sits and how far to
/// advance to the next member.
#[derive(Clone, Copy, Debug)]
struct MemberFrame {
    data_start: usize,
    data_end  : usize,
    total_size: usize,
}

/* -------------------------------------------------------------------------- */

/// Parse the RFC1952 header of the member starting at `pos` and locate
/// its BSIZE extra subfield. Returns `None` when fewer than a full header
/// is available.
fn parse_member_header(buffer: &[u8], pos: usize) -> Result<Option<MemberFrame>> {
    if buffer.len() < pos + 12 {
        return Ok(None);
    }
    let header = &buffer[pos..];

    if header[0] != GZIP_ID1 || header[1] != GZIP_ID2 {
        return Err(TrackError::format("not a gzip member"));
    }
    if header[2] != GZIP_DEFLATE {
        return Err(TrackError::format(format!("unsupported compression method {}", header[2])));
    }
    if header[3] & GZIP_FEXTRA == 0 {
        return Err(TrackError::format("gzip member without BGZF extra field"));
    }

    let xlen = LittleEndian::read_u16(&header[10..12]) as usize;
    if header.len() < 12 + xlen {
        return Ok(None);
    }

    // Scan the extra subfields for BC, which holds the member size
    let mut extra = &header[12..12 + xlen];
    let mut bsize: Option<u16> = None;

    while extra.len() >= 4 {
        let si1  = extra[0];
        let si2  = extra[1];
        let slen = LittleEndian::read_u16(&extra[2..4]) as usize;
        if extra.len() < 4 + slen {
            break;
        }
        if si1 == b'B' && si2 == b'C' && slen == 2 {
            bsize = Some(LittleEndian::read_u16(&extra[4..6]));
        }
        extra = &extra[4 + slen..];
    }

    let bsize = bsize.ok_or_else(|| TrackError::format("missing BGZF BC subfield"))? as usize;
    let total = bsize + 1;

    if buffer.len() < pos + total {
        return Ok(None);
    }

    Ok(Some(MemberFrame {
        data_start: pos + 12 + xlen,
        data_end  : pos + total - 8, // CRC32 and ISIZE trail the payload
        total_size: total,
    }))
}

/* -------------------------------------------------------------------------- */

fn inflate_member(buffer: &[u8], frame: &MemberFrame, out: &mut Vec<u8>) -> Result<()> {
    let mut decoder = DeflateDecoder::new(&buffer[frame.data_start..frame.data_end]);
    decoder.read_to_end(out)
        .map_err(|e| TrackError::format(format!("BGZF inflate failed: {}", e)))?;
    Ok(())
}

/* -------------------------------------------------------------------------- */

/// Decompress a complete concatenation of BGZF members. A truncated
/// trailing member is an error.
pub fn decompress_all(buffer: &[u8]) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    let mut pos = 0;

    while pos < buffer.len() {
        match parse_member_header(buffer, pos)? {
            Some(frame) => {
                inflate_member(buffer, &frame, &mut out)?;
                pos += frame.total_size;
            }
            None => {
                return Err(TrackError::format("truncated BGZF member"));
            }
        }
    }
    Ok(out)
}

/* -------------------------------------------------------------------------- */

/// Decompress the complete members available at the head of `buffer`,
/// stopping silently at the first truncated one. Used for the BAM header
/// section, which is fetched with an upper bound that may cut a member.
pub fn decompress_prefix(buffer: &[u8]) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    let mut pos = 0;

    while pos < buffer.len() {
        match parse_member_header(buffer, pos)? {
            Some(frame) => {
                inflate_member(buffer, &frame, &mut out)?;
                pos += frame.total_size;
            }
            None => break,
        }
    }
    Ok(out)
}

/* -------------------------------------------------------------------------- */

/// Decompress the members of one BAI chunk. `buffer` must start at the
/// member addressed by `chunk.start.block_pos`. The output is trimmed to
/// the chunk: bytes before `start.data_pos` in the first member are
/// dropped, and the member at `end.block_pos` is cut at `end.data_pos`
/// (inclusive); both trims compose when start and end share a member.
pub fn decompress_chunk(buffer: &[u8], chunk: &Chunk) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    let mut pos = 0usize;

    let end_rel = chunk.end.block_pos.saturating_sub(chunk.start.block_pos) as usize;

    while pos < buffer.len() {
        let frame = match parse_member_header(buffer, pos)? {
            Some(frame) => frame,
            None        => break,
        };

        let member_out_start = out.len();
        inflate_member(buffer, &frame, &mut out)?;

        if pos == end_rel {
            out.truncate(member_out_start + chunk.end.data_pos as usize + 1);
            break;
        }
        if pos > end_rel {
            // The end offset addressed a member boundary we already passed
            out.truncate(member_out_start);
            break;
        }
        pos += frame.total_size;
    }

    let head = (chunk.start.data_pos as usize).min(out.len());
    out.drain(..head);

    Ok(out)
}

/* -------------------------------------------------------------------------- */
/* -------------------------------------------------------------------------- */
