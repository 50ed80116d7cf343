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

use byteorder::{BigEndian, ByteOrder, LittleEndian};

use crate::error::{Result, TrackError};

/* -------------------------------------------------------------------------- */

/// Byte order of a file, fixed once per file when the header is decoded.
///
/// BAI virtual offsets are always little-endian, independent of this value.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Endian {
    Little,
    Big,
}

/* -------------------------------------------------------------------------- */

/// Advance-through-buffer decoder for fixed-width primitives and strings.
///
/// The cursor does not own the bytes; `position` may be assigned directly
/// for forward skips. Reading past the end of the buffer is a format error
/// surfaced to the caller.
#[derive(Debug)]
pub struct BinaryCursor<'a> {
    pub buffer  : &'a [u8],
    pub position: usize,
    pub order   : Endian,
}

/* -------------------------------------------------------------------------- */

impl<'a> BinaryCursor<'a> {

    pub fn new(buffer: &'a [u8], order: Endian) -> Self {
        BinaryCursor {
            buffer,
            position: 0,
            order,
        }
    }

    pub fn remaining(&self) -> usize {
        self.buffer.len().saturating_sub(self.position)
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        if self.remaining() < n {
            return Err(TrackError::format(format!(
                "unexpected end of buffer: position={}, requested={}, length={}",
                self.position, n, self.buffer.len()
            )));
        }
        let slice = &self.buffer[self.position..self.position + n];
        self.position += n;
        Ok(slice)
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    pub fn read_i8(&mut self) -> Result<i8> {
        Ok(self.take(1)?[0] as i8)
    }

    pub fn read_u16(&mut self) -> Result<u16> {
        let b = self.take(2)?;
        Ok(match self.order {
            Endian::Little => LittleEndian::read_u16(b),
            Endian::Big    => BigEndian   ::read_u16(b),
        })
    }

    pub fn read_i16(&mut self) -> Result<i16> {
        Ok(self.read_u16()? as i16)
    }

    pub fn read_u32(&mut self) -> Result<u32> {
        let b = self.take(4)?;
        Ok(match self.order {
            Endian::Little => LittleEndian::read_u32(b),
            Endian::Big    => BigEndian   ::read_u32(b),
        })
    }

    pub fn read_i32(&mut self) -> Result<i32> {
        Ok(self.read_u32()? as i32)
    }

    pub fn read_u64(&mut self) -> Result<u64> {
        let b = self.take(8)?;
        Ok(match self.order {
            Endian::Little => LittleEndian::read_u64(b),
            Endian::Big    => BigEndian   ::read_u64(b),
        })
    }

    pub fn read_i64(&mut self) -> Result<i64> {
        Ok(self.read_u64()? as i64)
    }

    pub fn read_f32(&mut self) -> Result<f32> {
        Ok(f32::from_bits(self.read_u32()?))
    }

    pub fn read_f64(&mut self) -> Result<f64> {
        Ok(f64::from_bits(self.read_u64()?))
    }

    /// 64-bit integer delivered as a double. Valid only while the value
    /// fits into the 53-bit mantissa; larger values are a format error.
    pub fn read_long64(&mut self) -> Result<f64> {
        let v = self.read_u64()?;
        if v > (1 << 53) {
            return Err(TrackError::format(format!(
                "64-bit value {} exceeds double precision", v
            )));
        }
        Ok(v as f64)
    }

    /// 64-bit little-endian integer, independent of the cursor's byte order.
    /// BAI virtual offsets are encoded this way.
    pub fn read_u64_le(&mut self) -> Result<u64> {
        let b = self.take(8)?;
        Ok(LittleEndian::read_u64(b))
    }

    pub fn read_bytes(&mut self, n: usize) -> Result<&'a [u8]> {
        self.take(n)
    }

    /// NUL-terminated string. When `max_length` is given, at most that many
    /// bytes are consumed even without a terminator; the cursor always
    /// advances past the terminator when one is found.
    pub fn read_cstring(&mut self, max_length: Option<usize>) -> Result<String> {
        let limit = match max_length {
            Some(n) => n.min(self.remaining()),
            None    => self.remaining(),
        };
        let window = &self.buffer[self.position..self.position + limit];

        match window.iter().position(|&b| b == 0) {
            Some(i) => {
                let s = String::from_utf8_lossy(&window[..i]).to_string();
                self.position += i + 1;
                Ok(s)
            }
            None => {
                let s = String::from_utf8_lossy(window).to_string();
                self.position += limit;
                Ok(s)
            }
        }
    }

    /// Fixed-length string. With `trim` set, trailing bytes with values at
    /// or below ASCII space are removed, which covers both NUL padding and
    /// whitespace padding found in chromosome tree keys.
    pub fn read_fixed_string(&mut self, length: usize, trim: bool) -> Result<String> {
        let bytes = self.take(length)?;
        if trim {
            let end = bytes.iter().rposition(|&b| b > 32).map_or(0, |i| i + 1);
            Ok(String::from_utf8_lossy(&bytes[..end]).to_string())
        } else {
            Ok(String::from_utf8_lossy(bytes).to_string())
        }
    }

    pub fn skip(&mut self, n: usize) -> Result<()> {
        self.take(n)?;
        Ok(())
    }

}

/* -------------------------------------------------------------------------- */
/* -------------------------------------------------------------------------- */
