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

use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::Path;

use reqwest::blocking::Client;
use reqwest::StatusCode;

use crate::error::{Result, TrackError};

/* -------------------------------------------------------------------------- */

/// A pull stream of byte chunks, used by the streaming read path of
/// `BufferedRangeSource`.
pub type ByteStream = Box<dyn Iterator<Item = io::Result<Vec<u8>>>>;

const STREAM_CHUNK_SIZE: usize = 1 << 16;

/* -------------------------------------------------------------------------- */

/// Abstract byte-range transport.
///
/// `read` yields exactly `size` bytes starting at `offset`, or everything
/// from `offset` to the end of the resource when `size` is omitted. Requests
/// past the end fail with `TrackError::OutOfRange`.
pub trait RangeSource {

    fn read(&mut self, offset: u64, size: Option<u64>) -> Result<Vec<u8>>;

    /// Streaming variant for large reads. The default implementation wraps
    /// a single `read` into a one-chunk stream.
    fn stream(&mut self, offset: u64, size: Option<u64>) -> Result<ByteStream> {
        let data = self.read(offset, size)?;
        Ok(Box::new(std::iter::once(Ok(data))))
    }

}

/* -------------------------------------------------------------------------- */

/// Local file transport.
#[derive(Debug)]
pub struct FileRangeSource {
    file  : File,
    length: u64,
}

/* -------------------------------------------------------------------------- */

impl FileRangeSource {

    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file   = File::open(path.as_ref())?;
        let length = file.metadata()?.len();

        Ok(FileRangeSource { file, length })
    }

    pub fn length(&self) -> u64 {
        self.length
    }

}

/* -------------------------------------------------------------------------- */

impl RangeSource for FileRangeSource {

    fn read(&mut self, offset: u64, size: Option<u64>) -> Result<Vec<u8>> {
        if offset > self.length || size.map_or(false, |s| offset + s > self.length) {
            return Err(TrackError::OutOfRange { offset, size });
        }

        let n = size.unwrap_or(self.length - offset);

        self.file.seek(SeekFrom::Start(offset))?;

        let mut buffer = vec![0; n as usize];
        self.file.read_exact(&mut buffer)
            .map_err(|_| TrackError::short_read(offset, n))?;

        Ok(buffer)
    }

    fn stream(&mut self, offset: u64, size: Option<u64>) -> Result<ByteStream> {
        if offset > self.length || size.map_or(false, |s| offset + s > self.length) {
            return Err(TrackError::OutOfRange { offset, size });
        }

        let n          = size.unwrap_or(self.length - offset);
        let mut reader = self.file.try_clone()?;
        reader.seek(SeekFrom::Start(offset))?;

        Ok(chunked_stream(reader, n))
    }

}

/* -------------------------------------------------------------------------- */

/// In-memory transport over an owned byte buffer.
#[derive(Clone, Debug)]
pub struct MemoryRangeSource {
    data: Vec<u8>,
}

/* -------------------------------------------------------------------------- */

impl MemoryRangeSource {

    pub fn new(data: Vec<u8>) -> Self {
        MemoryRangeSource { data }
    }

    pub fn length(&self) -> u64 {
        self.data.len() as u64
    }

}

/* -------------------------------------------------------------------------- */

impl RangeSource for MemoryRangeSource {

    fn read(&mut self, offset: u64, size: Option<u64>) -> Result<Vec<u8>> {
        let length = self.data.len() as u64;

        if offset > length || size.map_or(false, |s| offset + s > length) {
            return Err(TrackError::OutOfRange { offset, size });
        }

        let end = size.map_or(length, |s| offset + s);

        Ok(self.data[offset as usize..end as usize].to_vec())
    }

}

/* -------------------------------------------------------------------------- */

/// HTTP transport using range requests. The resource length is taken from
/// a HEAD request at open time so out-of-range reads can be rejected
/// without a round trip.
#[derive(Debug)]
pub struct HttpRangeSource {
    client        : Client,
    url           : String,
    content_length: u64,
}

/* -------------------------------------------------------------------------- */

impl HttpRangeSource {

    pub fn open(url: &str) -> Result<Self> {
        let client    = Client::new();
        let head_resp = client.head(url).send()?;

        if !head_resp.status().is_success() {
            return Err(TrackError::Io(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("HTTP HEAD request failed for `{}`", url),
            )));
        }

        let content_length = head_resp
            .headers()
            .get("Content-Length")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok())
            .ok_or_else(|| TrackError::Io(io::Error::new(
                io::ErrorKind::InvalidData,
                "missing or invalid Content-Length header",
            )))?;

        Ok(HttpRangeSource {
            client,
            url: url.to_string(),
            content_length,
        })
    }

    pub fn length(&self) -> u64 {
        self.content_length
    }

    fn request(&self, offset: u64, end: u64) -> Result<reqwest::blocking::Response> {
        let range_header = format!("bytes={}-{}", offset, end - 1);
        let response     = self.client
            .get(&self.url)
            .header("Range", range_header)
            .send()?;

        if response.status() == StatusCode::RANGE_NOT_SATISFIABLE {
            return Err(TrackError::OutOfRange { offset, size: Some(end - offset) });
        }
        if !response.status().is_success() {
            return Err(TrackError::Io(io::Error::new(
                io::ErrorKind::Other,
                format!("HTTP range request failed with status {}", response.status()),
            )));
        }

        Ok(response)
    }

}

/* -------------------------------------------------------------------------- */

impl RangeSource for HttpRangeSource {

    fn read(&mut self, offset: u64, size: Option<u64>) -> Result<Vec<u8>> {
        if offset > self.content_length || size.map_or(false, |s| offset + s > self.content_length) {
            return Err(TrackError::OutOfRange { offset, size });
        }

        let end      = size.map_or(self.content_length, |s| offset + s);
        let response = self.request(offset, end)?;
        let bytes    = response.bytes()?;

        if (bytes.len() as u64) < end - offset {
            return Err(TrackError::short_read(offset, end - offset));
        }

        Ok(bytes[..(end - offset) as usize].to_vec())
    }

    fn stream(&mut self, offset: u64, size: Option<u64>) -> Result<ByteStream> {
        if offset > self.content_length || size.map_or(false, |s| offset + s > self.content_length) {
            return Err(TrackError::OutOfRange { offset, size });
        }

        let end      = size.map_or(self.content_length, |s| offset + s);
        let response = self.request(offset, end)?;

        Ok(chunked_stream(response, end - offset))
    }

}

/* -------------------------------------------------------------------------- */

/// Transport selected from a path or URL, the way files are opened
/// throughout this crate.
pub enum NetRangeSource {
    File(FileRangeSource),
    Http(HttpRangeSource),
}

/* -------------------------------------------------------------------------- */

impl NetRangeSource {

    pub fn open(filename: &str) -> Result<Self> {
        if filename.starts_with("http://") || filename.starts_with("https://") {
            Ok(NetRangeSource::Http(HttpRangeSource::open(filename)?))
        } else {
            Ok(NetRangeSource::File(FileRangeSource::open(filename)?))
        }
    }

}

/* -------------------------------------------------------------------------- */

impl RangeSource for NetRangeSource {

    fn read(&mut self, offset: u64, size: Option<u64>) -> Result<Vec<u8>> {
        match self {
            NetRangeSource::File(s) => s.read(offset, size),
            NetRangeSource::Http(s) => s.read(offset, size),
        }
    }

    fn stream(&mut self, offset: u64, size: Option<u64>) -> Result<ByteStream> {
        match self {
            NetRangeSource::File(s) => s.stream(offset, size),
            NetRangeSource::Http(s) => s.stream(offset, size),
        }
    }

}

/* -------------------------------------------------------------------------- */

fn chunked_stream<R: Read + 'static>(reader: R, total: u64) -> ByteStream {
    let mut reader    = reader;
    let mut remaining = total;

    Box::new(std::iter::from_fn(move || {
        if remaining == 0 {
            return None;
        }
        let n = remaining.min(STREAM_CHUNK_SIZE as u64) as usize;
        let mut chunk = vec![0; n];
        let mut filled = 0;

        while filled < n {
            match reader.read(&mut chunk[filled..]) {
                Ok(0)  => break,
                Ok(m)  => filled += m,
                Err(e) => return Some(Err(e)),
            }
        }
        if filled == 0 {
            remaining = 0;
            return None;
        }
        chunk.truncate(filled);
        remaining -= filled as u64;

        Some(Ok(chunk))
    }))
}

/* -------------------------------------------------------------------------- */
/* -------------------------------------------------------------------------- */
