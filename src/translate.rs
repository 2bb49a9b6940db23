//! Six-frame Translation Module
//!
//! Translates nucleotide records into peptides so they can be searched with a
//! protein profile model. Frame numbering follows the EMBOSS `transeq`
//! convention, which downstream parsing relies on:
//!
//! - frames 1-3: forward strand, starting at nucleotide offset 0, 1, 2
//! - frames 4-6: reverse complement, starting at offset 0, 1, 2
//!
//! A translated record is named `{id}_{frame}`.

use anyhow::Result;
use rustc_hash::FxHashMap;
use std::io::Write;
use std::path::Path;
use std::sync::LazyLock;

use crate::seqio::{FastaReader, FastaWriter};

/// Which frames to translate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameSet {
    /// Frame 1 only, for sequences already in reading frame (predicted ORFs).
    Forward,
    /// All six frames.
    All,
}

impl FrameSet {
    fn frames(self) -> std::ops::RangeInclusive<u8> {
        match self {
            FrameSet::Forward => 1..=1,
            FrameSet::All => 1..=6,
        }
    }
}

// ============================================================================
// Codon Table
// ============================================================================

/// Standard genetic code codon table.
static CODON_TABLE: LazyLock<FxHashMap<&'static [u8], u8>> = LazyLock::new(|| {
    const CODONS: &[(&str, u8)] = &[
        ("TTT", b'F'), ("TTC", b'F'),
        ("TTA", b'L'), ("TTG", b'L'), ("CTT", b'L'), ("CTC", b'L'), ("CTA", b'L'), ("CTG", b'L'),
        ("ATT", b'I'), ("ATC", b'I'), ("ATA", b'I'),
        ("ATG", b'M'),
        ("GTT", b'V'), ("GTC", b'V'), ("GTA", b'V'), ("GTG", b'V'),
        ("TCT", b'S'), ("TCC", b'S'), ("TCA", b'S'), ("TCG", b'S'), ("AGT", b'S'), ("AGC", b'S'),
        ("CCT", b'P'), ("CCC", b'P'), ("CCA", b'P'), ("CCG", b'P'),
        ("ACT", b'T'), ("ACC", b'T'), ("ACA", b'T'), ("ACG", b'T'),
        ("GCT", b'A'), ("GCC", b'A'), ("GCA", b'A'), ("GCG", b'A'),
        ("TAT", b'Y'), ("TAC", b'Y'),
        ("TAA", b'*'), ("TAG", b'*'), ("TGA", b'*'),
        ("CAT", b'H'), ("CAC", b'H'),
        ("CAA", b'Q'), ("CAG", b'Q'),
        ("AAT", b'N'), ("AAC", b'N'),
        ("AAA", b'K'), ("AAG", b'K'),
        ("GAT", b'D'), ("GAC", b'D'),
        ("GAA", b'E'), ("GAG", b'E'),
        ("TGT", b'C'), ("TGC", b'C'),
        ("TGG", b'W'),
        ("CGT", b'R'), ("CGC", b'R'), ("CGA", b'R'), ("CGG", b'R'), ("AGA", b'R'), ("AGG", b'R'),
        ("GGT", b'G'), ("GGC", b'G'), ("GGA", b'G'), ("GGG", b'G'),
    ];
    CODONS.iter().map(|(c, aa)| (c.as_bytes(), *aa)).collect()
});

/// Translates a codon to its amino acid; unknown or ambiguous codons give 'X'.
pub fn translate_codon(codon: &[u8]) -> u8 {
    let mut upper = [0u8; 3];
    for (dst, src) in upper.iter_mut().zip(codon) {
        *dst = match src.to_ascii_uppercase() {
            b'U' => b'T',
            b => b,
        };
    }
    CODON_TABLE.get(&upper[..]).copied().unwrap_or(b'X')
}

/// Computes the reverse complement of a DNA sequence.
pub fn reverse_complement(seq: &str) -> String {
    seq.chars()
        .rev()
        .map(|c| match c.to_ascii_uppercase() {
            'A' => 'T',
            'T' => 'A',
            'G' => 'C',
            'C' => 'G',
            _ => 'N',
        })
        .collect()
}

/// Translates one frame (1-6) of a nucleotide sequence.
pub fn translate_frame(seq: &str, frame: u8) -> String {
    debug_assert!((1..=6).contains(&frame));
    let offset = ((frame - 1) % 3) as usize;
    let strand = if frame <= 3 {
        seq.to_string()
    } else {
        reverse_complement(seq)
    };
    let bytes = strand.as_bytes();
    if bytes.len() < offset + 3 {
        return String::new();
    }
    bytes[offset..]
        .chunks_exact(3)
        .map(|codon| translate_codon(codon) as char)
        .collect()
}

/// Writes the translated frames of every record of a nucleotide FASTA file to `out`.
///
/// Returns the number of peptide records written.
pub fn translate_records<W: Write>(nucleotides: &Path, frames: FrameSet, out: &mut W) -> Result<usize> {
    let mut reader = FastaReader::open(nucleotides)?;
    let mut written = 0;
    while let Some(record) = reader.read_next()? {
        for frame in frames.frames() {
            let peptide = translate_frame(&record.seq, frame);
            if peptide.is_empty() {
                continue;
            }
            writeln!(out, ">{}_{}", record.id(), frame)?;
            writeln!(out, "{}", peptide)?;
            written += 1;
        }
    }
    Ok(written)
}

/// Translates a nucleotide FASTA file into a peptide FASTA file.
pub fn translate_file(nucleotides: &Path, peptides: &Path, frames: FrameSet) -> Result<usize> {
    let mut writer = FastaWriter::create(peptides)?;
    let mut reader = FastaReader::open(nucleotides)?;
    let mut written = 0;
    while let Some(record) = reader.read_next()? {
        for frame in frames.frames() {
            let peptide = translate_frame(&record.seq, frame);
            if !peptide.is_empty() {
                writer.write_record(&format!("{}_{}", record.id(), frame), &peptide)?;
                written += 1;
            }
        }
    }
    writer.finish()?;
    Ok(written)
}

/// Splits a translated identifier `{id}_{frame}` into the source id and frame.
pub fn split_frame(name: &str) -> (&str, Option<u8>) {
    if let Some((id, frame)) = name.rsplit_once('_') {
        if let Ok(f) = frame.parse::<u8>() {
            if (1..=6).contains(&f) && !id.is_empty() {
                return (id, Some(f));
            }
        }
    }
    (name, None)
}
