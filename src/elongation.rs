//! Hit region extraction and elongation.
//!
//! A profile hit covers only the residues that aligned to the model, which
//! rarely coincide with the start and stop codons of the gene. Before ORF
//! prediction each hit is widened by a flanking window on both sides,
//! clamped to its sequence. All of it is coordinate arithmetic over the spans
//! carried by [`HitRecord`].

use anyhow::Result;
use rustc_hash::FxHashMap;
use std::path::Path;

use crate::classifier::HitRecord;
use crate::seqio::{FastaReader, FastaWriter};
use crate::translate::{reverse_complement, translate_frame};

/// Smallest span covering all of `spans`.
pub fn merge_spans(spans: impl IntoIterator<Item = (usize, usize)>) -> Option<(usize, usize)> {
    spans
        .into_iter()
        .reduce(|(s1, e1), (s2, e2)| (s1.min(s2), e1.max(e2)))
}

/// Widens a 0-based half-open span by `flank` on each side, within `0..seq_len`.
pub fn pad_span((start, end): (usize, usize), flank: usize, seq_len: usize) -> (usize, usize) {
    (start.saturating_sub(flank), end.saturating_add(flank).min(seq_len))
}

fn group_by_source(hits: &[HitRecord]) -> FxHashMap<&str, Vec<&HitRecord>> {
    let mut groups: FxHashMap<&str, Vec<&HitRecord>> = FxHashMap::default();
    for hit in hits {
        groups.entry(hit.source_id()).or_default().push(hit);
    }
    groups
}

/// Writes the region of every hit sequence, widened by `flank` nucleotides.
///
/// Hits on the same sequence collapse into one region. With `whole`, or when
/// no hit of a sequence carries coordinates, the full sequence is written.
/// Records keep their source order. Returns the number of records written.
pub fn extract_regions(hits: &[HitRecord], source: &Path, flank: usize, whole: bool, out: &Path) -> Result<usize> {
    let groups = group_by_source(hits);
    let mut writer = FastaWriter::create(out)?;
    let mut written = 0;

    for record in FastaReader::open(source)? {
        let record = record?;
        let Some(group) = groups.get(record.id()) else {
            continue;
        };
        let len = record.seq.len();
        let span = merge_spans(group.iter().filter_map(|h| h.nucleotide_span(len)));

        match span {
            Some(span) if !whole => {
                let (start, end) = pad_span(span, flank, len);
                let header = format!("{} {}-{}", record.id(), start + 1, end);
                writer.write_record(&header, &record.seq[start..end])?;
            }
            _ => writer.write_record(&record.header, &record.seq)?,
        }
        written += 1;
    }

    writer.finish()?;
    Ok(written)
}

/// Writes each sequence hit, elongated for ORF prediction.
pub fn elongate(hits: &[HitRecord], source: &Path, flank: usize, whole: bool, out: &Path) -> Result<usize> {
    let n = extract_regions(hits, source, flank, whole, out)?;
    log::info!("Elongated {} hit sequences by {} nt", n, flank);
    Ok(n)
}

/// Translates every hit in the frame it was found in.
///
/// Peptides are named after the translated target (`{id}_{frame}`) and cover
/// the aligned span of the hit. Returns the number of peptides written.
pub fn hit_peptides(hits: &[HitRecord], source: &Path, out: &Path) -> Result<usize> {
    let groups = group_by_source(hits);
    let mut writer = FastaWriter::create(out)?;
    let mut written = 0;

    for record in FastaReader::open(source)? {
        let record = record?;
        let Some(group) = groups.get(record.id()) else {
            continue;
        };
        let len = record.seq.len();
        for hit in group {
            let (Some(frame), Some((start, end))) = (hit.frame(), hit.nucleotide_span(len)) else {
                continue;
            };
            let region = &record.seq[start..end];
            let peptide = if frame <= 3 {
                translate_frame(region, 1)
            } else {
                translate_frame(&reverse_complement(region), 1)
            };
            writer.write_record(&hit.target, &peptide)?;
            written += 1;
        }
    }

    writer.finish()?;
    Ok(written)
}
