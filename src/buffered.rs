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

use std::io;

use crate::error::{Result, TrackError};
use crate::netfile::{ByteStream, RangeSource};

/* -------------------------------------------------------------------------- */

pub const DEFAULT_BUFFER_SIZE: usize = 1 << 19;

/* -------------------------------------------------------------------------- */

/// Read-ahead wrapper over a `RangeSource`.
///
/// Non-streaming mode fetches `buffer_size` bytes on every cache miss and
/// recovers from an out-of-range response exactly once by retrying without
/// an upper bound, which handles reads into the tail of the resource.
///
/// Streaming mode keeps one open byte stream and satisfies reads by
/// appending arriving chunks to a growing buffer; a read that cannot be
/// reached by the current stream discards it and opens a new one at the
/// requested offset. The buffer head is trimmed after each delivered read.
pub struct BufferedRangeSource<S: RangeSource> {
    source     : S,
    buffer     : Vec<u8>,
    buf_start  : u64,
    buffer_size: usize,
    streaming  : bool,
    stream     : Option<ByteStream>,
}

/* -------------------------------------------------------------------------- */

impl<S: RangeSource> BufferedRangeSource<S> {

    pub fn new(source: S, buffer_size: usize) -> Self {
        BufferedRangeSource {
            source,
            buffer     : Vec::new(),
            buf_start  : 0,
            buffer_size: buffer_size.max(1),
            streaming  : false,
            stream     : None,
        }
    }

    pub fn new_streaming(source: S, buffer_size: usize) -> Self {
        let mut loader = BufferedRangeSource::new(source, buffer_size);
        loader.streaming = true;
        loader
    }

    pub fn into_inner(self) -> S {
        self.source
    }

    fn buf_end(&self) -> u64 {
        self.buf_start + self.buffer.len() as u64
    }

    fn hit(&self, offset: u64, size: u64) -> bool {
        offset >= self.buf_start && offset + size <= self.buf_end()
    }

    fn serve(&self, offset: u64, size: u64) -> Vec<u8> {
        let a = (offset - self.buf_start) as usize;
        self.buffer[a..a + size as usize].to_vec()
    }

    /// Drop buffered bytes before `offset`.
    fn trim_head(&mut self, offset: u64) {
        if offset > self.buf_start {
            let n = (offset - self.buf_start) as usize;
            self.buffer.drain(..n);
            self.buf_start = offset;
        }
    }

    pub fn read(&mut self, offset: u64, size: u64) -> Result<Vec<u8>> {
        if size == 0 {
            return Ok(Vec::new());
        }
        if self.hit(offset, size) {
            let data = self.serve(offset, size);
            if self.streaming {
                self.trim_head(offset);
            }
            return Ok(data);
        }
        if self.streaming {
            self.read_from_stream(offset, size)
        } else {
            self.read_buffered(offset, size)
        }
    }

    fn read_buffered(&mut self, offset: u64, size: u64) -> Result<Vec<u8>> {
        let request = size.max(self.buffer_size as u64);

        let data = match self.source.read(offset, Some(request)) {
            Ok(data) => data,
            // The window may extend past the end of the resource; retry
            // once without an upper bound to pick up the tail.
            Err(e) if e.is_out_of_range() => self.source.read(offset, None)?,
            Err(e) => return Err(e),
        };

        self.buffer    = data;
        self.buf_start = offset;

        // After the tail retry fewer bytes than requested may exist; the
        // read is clamped to what the resource holds.
        let n = size.min(self.buffer.len() as u64);

        Ok(self.serve(offset, n))
    }

    fn read_from_stream(&mut self, offset: u64, size: u64) -> Result<Vec<u8>> {
        // A read behind the current buffer, or with no stream open, cannot
        // be caught up to; dispose the stream and re-seek.
        if self.stream.is_none() || offset < self.buf_start || offset > self.buf_end() {
            self.stream    = None;
            self.buffer    = Vec::new();
            self.buf_start = offset;
            self.stream    = Some(self.source.stream(offset, None)?);
        }

        let required_end = offset + size;

        while self.buf_end() < required_end {
            let stream = self.stream.as_mut().unwrap();
            match stream.next() {
                Some(Ok(chunk)) => self.buffer.extend_from_slice(&chunk),
                Some(Err(e))    => return Err(TrackError::Io(e)),
                None => {
                    self.stream = None;
                    return Err(TrackError::Io(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        format!("stream ended before offset {}", required_end),
                    )));
                }
            }
        }

        let data = self.serve(offset, size);
        self.trim_head(offset);

        Ok(data)
    }

}

/* -------------------------------------------------------------------------- */
/* -------------------------------------------------------------------------- */
