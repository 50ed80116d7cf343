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

mod common;

use futures::executor::block_on_stream;

use rustytracks::bam::{BamReader, CigarOp};
use rustytracks::error::TrackError;
use rustytracks::netfile::MemoryRangeSource;

use common::*;

/* -------------------------------------------------------------------------- */

/// One header member followed by one member of alignments, with a BAI
/// addressing the alignment member from the root bin.
fn test_files() -> (Vec<u8>, Vec<u8>) {
    let header = bam_header("@HD\tVN:1.6\tSO:coordinate\n", &[("chr22", 50_818_468)]);

    let mut records = Vec::new();
    records.extend_from_slice(&bam_record(0,   100, 16, 37, "read-a", &[(4, b'M')],             "ACGT"));
    records.extend_from_slice(&bam_record(0,   500,  0, 60, "read-b", &[(2, b'S'), (6, b'M')], "TTGGCCAA"));
    records.extend_from_slice(&bam_record(0, 5_000,  0, 60, "read-c", &[(4, b'M')],             "GGGG"));

    let member0 = bgzf_member(&header);
    let member1 = bgzf_member(&records);

    let data_start = member0.len() as u64;
    let data_end   = (member0.len() + member1.len()) as u64;

    let mut bam = member0;
    bam.extend_from_slice(&member1);

    let bai = bai_index(
        &[(data_start, 0, data_end, 0)],
        &[data_start << 16],
    );

    (bam, bai)
}

fn reader(bam: Vec<u8>, bai: Vec<u8>) -> BamReader<MemoryRangeSource> {
    BamReader::new(MemoryRangeSource::new(bam), MemoryRangeSource::new(bai))
}

/* -------------------------------------------------------------------------- */

#[test]
fn test_bam_header() {

    let (bam, bai) = test_files();
    let mut b = reader(bam, bai);

    let header = b.get_header_data().unwrap();

    assert_eq!(header.text, "@HD\tVN:1.6\tSO:coordinate\n");
    assert_eq!(header.genome.seqnames, vec!["chr22"]);
    assert_eq!(header.genome.seq_length("chr22").unwrap(), 50_818_468);
}

#[test]
fn test_bam_index() {

    let (bam, bai) = test_files();
    let mut b = reader(bam, bai);

    let index = b.get_index_data().unwrap();

    assert_eq!(index.ref_data.len(), 1);

    let chunks = index.chunks_for_region(0, 0, 10_000).unwrap();
    assert_eq!(chunks.len(), 1);

    // The linear lower bound never exceeds a surviving chunk's end
    let lowest = index.ref_data[0].linear_index[0];
    assert!(chunks.iter().all(|c| c.end >= lowest));
}

#[test]
fn test_bam_read_region() {

    let (bam, bai) = test_files();
    let mut b = reader(bam, bai);

    let alignments = b.read("chr22", 50, 1_000).unwrap();

    // read-c sits past the query end
    assert_eq!(alignments.len(), 2);

    let a = &alignments[0];
    assert_eq!(a.read_name, "read-a");
    assert_eq!(a.chrom, "chr22");
    assert_eq!(a.start, 100);
    assert_eq!(a.flags.0, 16);
    assert!(!a.strand);
    assert!(a.flags.reverse_strand());
    assert_eq!(a.mapping_quality, 37);
    assert_eq!(a.seq, "ACGT");
    assert_eq!(a.phred, vec![30; 4]);
    assert_eq!(a.cigar_ops, vec![CigarOp { op: 'M', op_len: 4, seq_offset: 0 }]);
    assert_eq!(a.length_on_ref, 4);

    let r = &alignments[1];
    assert_eq!(r.read_name, "read-b");
    assert!(r.strand);
    assert_eq!(r.cigar_ops, vec![
        CigarOp { op: 'S', op_len: 2, seq_offset: 0 },
        CigarOp { op: 'M', op_len: 6, seq_offset: 2 },
    ]);
    assert_eq!(r.length_on_ref, 6);

    // Overlap invariant
    for a in &alignments {
        assert!(a.start <= 1_000);
        assert!(a.start + a.seq.len() as u32 >= 50);
    }
}

#[test]
fn test_bam_read_narrow_window() {

    let (bam, bai) = test_files();
    let mut b = reader(bam, bai);

    // read-a ends before this window
    let alignments = b.read("chr22", 600, 1_000).unwrap();

    assert_eq!(alignments.len(), 1);
    assert_eq!(alignments[0].read_name, "read-b");
}

#[test]
fn test_bam_stream_matches_collected() {

    let (bam, bai) = test_files();
    let mut b = reader(bam.clone(), bai.clone());

    let collected = b.read("chr22", 0, 10_000).unwrap();

    let mut b = reader(bam, bai);
    let streamed: Vec<_> = block_on_stream(Box::pin(b.stream_read("chr22", 0, 10_000)))
        .map(|r| r.unwrap())
        .collect();

    assert_eq!(collected.len(), 3);
    assert_eq!(streamed.len(), 3);

    for (x, y) in collected.iter().zip(streamed.iter()) {
        assert_eq!(x.read_name, y.read_name);
        assert_eq!(x.start, y.start);
    }

    // Emitted in file order
    for pair in collected.windows(2) {
        assert!(pair[0].start <= pair[1].start);
    }
}

#[test]
fn test_bam_unknown_chromosome() {

    let (bam, bai) = test_files();
    let mut b = reader(bam, bai);

    assert!(matches!(
        b.read("chrMT", 0, 100).unwrap_err(),
        TrackError::DataMissing(_)
    ));
}

#[test]
fn test_bam_bad_index_magic() {

    let (bam, _) = test_files();
    let mut b = reader(bam, vec![0; 16]);

    assert!(matches!(
        b.get_index_data().unwrap_err(),
        TrackError::FileFormat(_)
    ));
}
