
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

/* -------------------------------------------------------------------------- */

// Public crates
pub mod bai;
pub mod bam;
pub mod bbi;
pub mod bed;
pub mod bgzf;
pub mod bigbed;
pub mod bigwig;
pub mod buffered;
pub mod cursor;
pub mod error;
pub mod genome;
pub mod logger;
pub mod netfile;
pub mod rtree;
pub mod twobit;
