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

use thiserror::Error;

/* -------------------------------------------------------------------------- */

/// Errors produced while locating or decoding track data.
///
/// `OutOfRange` is special: it is the only error a caller of the raw
/// transport may recover from, and `BufferedRangeSource` does so exactly
/// once per read by retrying without an upper bound.
#[derive(Error, Debug)]
pub enum TrackError {
    #[error("byte range out of bounds: offset={offset}, size={size:?}")]
    OutOfRange {
        offset: u64,
        size  : Option<u64>,
    },
    #[error("sequence `{0}` not found")]
    DataMissing(String),
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),
    #[error("invalid file format: {0}")]
    FileFormat(String),
}

/* -------------------------------------------------------------------------- */

pub type Result<T> = std::result::Result<T, TrackError>;

/* -------------------------------------------------------------------------- */

impl TrackError {

    pub fn is_out_of_range(&self) -> bool {
        matches!(self, TrackError::OutOfRange { .. })
    }

    pub(crate) fn format<S: Into<String>>(msg: S) -> TrackError {
        TrackError::FileFormat(msg.into())
    }

    pub(crate) fn short_read(offset: u64, size: u64) -> TrackError {
        TrackError::Io(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            format!("short read: offset={}, size={}", offset, size),
        ))
    }

}

/* -------------------------------------------------------------------------- */

impl From<reqwest::Error> for TrackError {
    fn from(err: reqwest::Error) -> Self {
        TrackError::Io(io::Error::new(io::ErrorKind::Other, err))
    }
}
