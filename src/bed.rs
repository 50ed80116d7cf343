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

/// Column parser applied to the tail of each BigBed record. The first
/// three columns are decoded by the reader; `rest` holds the remaining
/// tab-separated columns.
pub type BedColumnParser<T> = fn(chrom: String, start: u32, end: u32, rest: &str) -> T;

/* -------------------------------------------------------------------------- */

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BedExon {
    pub start: u32,
    pub end  : u32,
}

/* -------------------------------------------------------------------------- */

/// Standard UCSC BED record (BED3 through BED12); columns absent from
/// the file are left unset.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct BedRecord {
    pub chrom      : String,
    pub start      : u32,
    pub end        : u32,
    pub name       : Option<String>,
    pub score      : Option<u32>,
    pub strand     : Option<char>,
    pub thick_start: Option<u32>,
    pub thick_end  : Option<u32>,
    pub color      : Option<String>,
    pub exons      : Vec<BedExon>,
}

/* -------------------------------------------------------------------------- */

/// ENCODE narrow peak record.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct NarrowPeakRecord {
    pub chrom       : String,
    pub start       : u32,
    pub end         : u32,
    pub name        : Option<String>,
    pub score       : Option<u32>,
    pub strand      : Option<char>,
    pub signal_value: Option<f64>,
    pub p_value     : Option<f64>,
    pub q_value     : Option<f64>,
    pub peak        : Option<u32>,
}

/* -------------------------------------------------------------------------- */

/// ENCODE broad peak record.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct BroadPeakRecord {
    pub chrom       : String,
    pub start       : u32,
    pub end         : u32,
    pub name        : Option<String>,
    pub score       : Option<u32>,
    pub strand      : Option<char>,
    pub signal_value: Option<f64>,
    pub p_value     : Option<f64>,
    pub q_value     : Option<f64>,
}

/* -------------------------------------------------------------------------- */

/// Whole-genome bisulfite methylation record (bedMethyl).
#[derive(Clone, Debug, Default, PartialEq)]
pub struct MethylRecord {
    pub chrom             : String,
    pub start             : u32,
    pub end               : u32,
    pub name              : Option<String>,
    pub score             : Option<u32>,
    pub strand            : Option<char>,
    pub thick_start       : Option<u32>,
    pub thick_end         : Option<u32>,
    pub color             : Option<String>,
    pub read_count        : Option<u32>,
    pub percent_methylated: Option<f64>,
}

/* -------------------------------------------------------------------------- */

/// RAMPAGE transcription start site peak record.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct TssPeakRecord {
    pub chrom    : String,
    pub start    : u32,
    pub end      : u32,
    pub name     : Option<String>,
    pub score    : Option<u32>,
    pub strand   : Option<char>,
    pub count    : Option<f64>,
    pub gene_id  : Option<String>,
    pub gene_name: Option<String>,
    pub tss_id   : Option<String>,
}

/* -------------------------------------------------------------------------- */

/// Irreproducible discovery rate peak record.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct IdrPeakRecord {
    pub chrom     : String,
    pub start     : u32,
    pub end       : u32,
    pub name      : Option<String>,
    pub score     : Option<u32>,
    pub strand    : Option<char>,
    pub local_idr : Option<f64>,
    pub global_idr: Option<f64>,
    pub rep1_start: Option<u32>,
    pub rep1_end  : Option<u32>,
    pub rep2_start: Option<u32>,
    pub rep2_end  : Option<u32>,
}

/* -------------------------------------------------------------------------- */

fn column<'a>(columns: &'a [&'a str], i: usize) -> Option<&'a str> {
    columns.get(i).copied().filter(|c| !c.is_empty())
}

fn column_u32(columns: &[&str], i: usize) -> Option<u32> {
    column(columns, i).and_then(|c| c.parse().ok())
}

fn column_f64(columns: &[&str], i: usize) -> Option<f64> {
    column(columns, i).and_then(|c| c.parse().ok())
}

fn column_char(columns: &[&str], i: usize) -> Option<char> {
    column(columns, i).and_then(|c| c.chars().next())
}

fn column_string(columns: &[&str], i: usize) -> Option<String> {
    column(columns, i).map(|c| c.to_string())
}

/// UCSC stores colors as comma-separated RGB triples; normalize those to
/// an `rgb(r,g,b)` form unless already given that way.
fn normalize_color(color: &str) -> String {
    if color.contains(',') && !color.starts_with("rgb") {
        format!("rgb({})", color)
    } else {
        color.to_string()
    }
}

/* -------------------------------------------------------------------------- */

/// Default UCSC BED parser, including the block table of BED12.
pub fn parse_bed_default(chrom: String, start: u32, end: u32, rest: &str) -> BedRecord {
    let columns: Vec<&str> = rest.split('\t').collect();

    let mut record = BedRecord {
        chrom,
        start,
        end,
        name       : column_string(&columns, 0),
        score      : column_u32   (&columns, 1),
        strand     : column_char  (&columns, 2),
        thick_start: column_u32   (&columns, 3),
        thick_end  : column_u32   (&columns, 4),
        color      : column       (&columns, 5).map(normalize_color),
        exons      : Vec::new(),
    };

    // blockCount, blockSizes, blockStarts describe the exon structure
    if let (Some(count), Some(sizes), Some(starts)) =
        (column_u32(&columns, 6), column(&columns, 7), column(&columns, 8))
    {
        let sizes : Vec<u32> = sizes .split(',').filter_map(|v| v.parse().ok()).collect();
        let starts: Vec<u32> = starts.split(',').filter_map(|v| v.parse().ok()).collect();

        for i in 0..(count as usize).min(sizes.len()).min(starts.len()) {
            record.exons.push(BedExon {
                start: start + starts[i],
                end  : start + starts[i] + sizes[i],
            });
        }
    }
    record
}

/* -------------------------------------------------------------------------- */

pub fn parse_narrow_peak(chrom: String, start: u32, end: u32, rest: &str) -> NarrowPeakRecord {
    let columns: Vec<&str> = rest.split('\t').collect();

    NarrowPeakRecord {
        chrom,
        start,
        end,
        name        : column_string(&columns, 0),
        score       : column_u32   (&columns, 1),
        strand      : column_char  (&columns, 2),
        signal_value: column_f64   (&columns, 3),
        p_value     : column_f64   (&columns, 4),
        q_value     : column_f64   (&columns, 5),
        peak        : column_u32   (&columns, 6),
    }
}

/* -------------------------------------------------------------------------- */

pub fn parse_broad_peak(chrom: String, start: u32, end: u32, rest: &str) -> BroadPeakRecord {
    let columns: Vec<&str> = rest.split('\t').collect();

    BroadPeakRecord {
        chrom,
        start,
        end,
        name        : column_string(&columns, 0),
        score       : column_u32   (&columns, 1),
        strand      : column_char  (&columns, 2),
        signal_value: column_f64   (&columns, 3),
        p_value     : column_f64   (&columns, 4),
        q_value     : column_f64   (&columns, 5),
    }
}

/* -------------------------------------------------------------------------- */

pub fn parse_methyl(chrom: String, start: u32, end: u32, rest: &str) -> MethylRecord {
    let columns: Vec<&str> = rest.split('\t').collect();

    MethylRecord {
        chrom,
        start,
        end,
        name              : column_string(&columns, 0),
        score             : column_u32   (&columns, 1),
        strand            : column_char  (&columns, 2),
        thick_start       : column_u32   (&columns, 3),
        thick_end         : column_u32   (&columns, 4),
        color             : column       (&columns, 5).map(normalize_color),
        read_count        : column_u32   (&columns, 6),
        percent_methylated: column_f64   (&columns, 7),
    }
}

/* -------------------------------------------------------------------------- */

pub fn parse_tss_peak(chrom: String, start: u32, end: u32, rest: &str) -> TssPeakRecord {
    let columns: Vec<&str> = rest.split('\t').collect();

    TssPeakRecord {
        chrom,
        start,
        end,
        name     : column_string(&columns, 0),
        score    : column_u32   (&columns, 1),
        strand   : column_char  (&columns, 2),
        count    : column_f64   (&columns, 3),
        gene_id  : column_string(&columns, 4),
        gene_name: column_string(&columns, 5),
        tss_id   : column_string(&columns, 6),
    }
}

/* -------------------------------------------------------------------------- */

pub fn parse_idr_peak(chrom: String, start: u32, end: u32, rest: &str) -> IdrPeakRecord {
    let columns: Vec<&str> = rest.split('\t').collect();

    IdrPeakRecord {
        chrom,
        start,
        end,
        name      : column_string(&columns, 0),
        score     : column_u32   (&columns, 1),
        strand    : column_char  (&columns, 2),
        local_idr : column_f64   (&columns, 3),
        global_idr: column_f64   (&columns, 4),
        rep1_start: column_u32   (&columns, 5),
        rep1_end  : column_u32   (&columns, 6),
        rep2_start: column_u32   (&columns, 7),
        rep2_end  : column_u32   (&columns, 8),
    }
}

/* -------------------------------------------------------------------------- */
/* -------------------------------------------------------------------------- */
