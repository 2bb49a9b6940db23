//! Hit Classifier Module
//!
//! Turns a profile-search domain table into a hit list: the sequences whose
//! model score passes the configured thresholds.
//!
//! # Classification
//! A searched sequence is a hit when either
//! 1. its full-sequence score reaches the long score (an (almost) complete gene), or
//! 2. in metagenomic mode, one of its domains reaches the meta score expressed
//!    per aligned residue (a gene fragment carried by a short read).
//!
//! # Hit-list format
//! One line per hit, tab separated: `target  score  ali_from  ali_to`.
//! Coordinates are the 1-based residue span of the best domain on the target.

use anyhow::{Context, Result};
use rustc_hash::FxHashMap;
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;

use crate::hmmer::DomTblReader;
use crate::translate::split_frame;

const HIT_FILE_HEADER: &str = "#target\tscore\tali_from\tali_to";

/// Score thresholds a sequence has to pass to be reported.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Thresholds {
    /// Full-sequence score for complete genes.
    pub long_score: f64,
    /// Domain score per aligned residue for fragments; `None` outside metagenomic mode.
    pub meta_score: Option<f64>,
}

/// One classified sequence.
#[derive(Debug, Clone, PartialEq)]
pub struct HitRecord {
    /// Name of the searched sequence (`{id}_{frame}` for translated input).
    pub target: String,
    /// Full-sequence model score.
    pub score: f64,
    /// 1-based inclusive residue span of the best domain, when known.
    pub span: Option<(usize, usize)>,
}

impl HitRecord {
    /// Identifier of the nucleotide sequence the hit was translated from.
    pub fn source_id(&self) -> &str {
        split_frame(&self.target).0
    }

    /// Translation frame (1-6) of the hit, if the target was translated.
    pub fn frame(&self) -> Option<u8> {
        split_frame(&self.target).1
    }

    /// Maps the residue span back onto the nucleotide source sequence.
    ///
    /// Returns a 0-based half-open range on the forward strand, or `None`
    /// for untranslated hits or hits without coordinates.
    pub fn nucleotide_span(&self, seq_len: usize) -> Option<(usize, usize)> {
        let frame = self.frame()?;
        let (from, to) = self.span?;
        let offset = ((frame - 1) % 3) as usize;
        let start = (offset + from.saturating_sub(1) * 3).min(seq_len);
        let end = (offset + to * 3).min(seq_len);
        if frame <= 3 {
            Some((start, end))
        } else {
            Some((seq_len - end, seq_len - start))
        }
    }
}

/// Classifies a domtblout file and writes the hit list.
///
/// Returns the hits in the order the search reported them.
pub fn classify(domtbl: &Path, hit_file: &Path, thresholds: &Thresholds) -> Result<Vec<HitRecord>> {
    let mut order: Vec<String> = Vec::new();
    // target -> (full score, best domain score, best span, passes)
    let mut best: FxHashMap<String, (f64, f64, (usize, usize), bool)> = FxHashMap::default();

    for record in DomTblReader::open(domtbl)? {
        let dom = record?;
        let passes_long = dom.full_score >= thresholds.long_score;
        let passes_meta = thresholds
            .meta_score
            .map_or(false, |meta| dom.score_per_residue() >= meta);
        let span = (dom.ali_from, dom.ali_to);

        match best.get_mut(&dom.target_name) {
            Some(entry) => {
                if dom.domain_score > entry.1 {
                    entry.1 = dom.domain_score;
                    entry.2 = span;
                }
                entry.3 |= passes_long || passes_meta;
            }
            None => {
                order.push(dom.target_name.clone());
                best.insert(
                    dom.target_name.clone(),
                    (dom.full_score, dom.domain_score, span, passes_long || passes_meta),
                );
            }
        }
    }

    let hits: Vec<HitRecord> = order
        .into_iter()
        .filter_map(|target| {
            let (score, _, span, passes) = best.remove(&target)?;
            passes.then(|| HitRecord {
                target,
                score,
                span: Some(span),
            })
        })
        .collect();

    write_hit_file(hit_file, &hits)?;
    Ok(hits)
}

pub fn write_hit_file(path: &Path, hits: &[HitRecord]) -> Result<()> {
    let file = File::create(path)
        .with_context(|| format!("Failed to create hit file: {}", path.display()))?;
    let mut writer = BufWriter::new(file);
    writeln!(writer, "{}", HIT_FILE_HEADER)?;
    for hit in hits {
        match hit.span {
            Some((from, to)) => writeln!(writer, "{}\t{}\t{}\t{}", hit.target, hit.score, from, to)?,
            None => writeln!(writer, "{}\t{}\t-\t-", hit.target, hit.score)?,
        }
    }
    writer.flush()?;
    Ok(())
}

pub fn read_hit_file(path: &Path) -> Result<Vec<HitRecord>> {
    let file = File::open(path)
        .with_context(|| format!("Failed to open hit file: {}", path.display()))?;
    let mut hits = Vec::new();

    for (line_no, line) in BufReader::new(file).lines().enumerate() {
        let line = line?;
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let fields: Vec<&str> = line.split('\t').collect();
        if fields.len() < 4 {
            anyhow::bail!("Invalid hit line {} in {}", line_no + 1, path.display());
        }
        let score = fields[1]
            .parse()
            .with_context(|| format!("Invalid score on line {} of {}", line_no + 1, path.display()))?;
        let span = match (fields[2].parse(), fields[3].parse()) {
            (Ok(from), Ok(to)) => Some((from, to)),
            _ => None,
        };
        hits.push(HitRecord {
            target: fields[0].to_string(),
            score,
            span,
        });
    }

    Ok(hits)
}
