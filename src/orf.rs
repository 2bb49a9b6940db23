//! ORF prediction and retrieval.
//!
//! Two interchangeable predictors share one contract, nucleotide FASTA in and
//! predicted ORF nucleotides out:
//! - [`Prodigal`]: ab initio gene prediction in metagenomic mode
//! - [`OrfFinder`]: NCBI ORFfinder, a plain stop-to-stop ORF scan
//!
//! Raw predictions are then filtered by length and searched with the model
//! again, so only ORFs that still carry the gene are kept.

use anyhow::Result;
use rustc_hash::FxHashSet;
use std::path::{Path, PathBuf};
use std::process::Command;

use crate::classifier::{self, Thresholds};
use crate::retrieve::retrieve_fasta;
use crate::seqio::{FastaReader, FastaWriter};
use crate::tools::{find_executable, run_tool, CancelToken, ProfileSearch};
use crate::translate::{self, FrameSet};

/// Which predictor a run uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrfBackend {
    Prodigal,
    OrfFinder,
}

pub trait OrfPredictor: Send + Sync {
    fn name(&self) -> &'static str;

    /// Predicts ORFs of at least `min_len` nucleotides where supported.
    fn predict_orfs(&self, input: &Path, output: &Path, min_len: usize, cancel: &CancelToken) -> Result<()>;
}

pub struct Prodigal {
    exe: PathBuf,
}

impl Prodigal {
    pub fn locate() -> Result<Self> {
        Ok(Self {
            exe: find_executable("prodigal")?,
        })
    }
}

impl OrfPredictor for Prodigal {
    fn name(&self) -> &'static str {
        "prodigal"
    }

    // Prodigal has no length cut-off; short genes are dropped during retrieval.
    fn predict_orfs(&self, input: &Path, output: &Path, _min_len: usize, cancel: &CancelToken) -> Result<()> {
        let mut cmd = Command::new(&self.exe);
        cmd.arg("-i").arg(input).arg("-d").arg(output).args(["-p", "meta", "-q"]);
        run_tool(&mut cmd, "prodigal", cancel)
    }
}

pub struct OrfFinder {
    exe: PathBuf,
}

impl OrfFinder {
    pub fn locate() -> Result<Self> {
        Ok(Self {
            exe: find_executable("ORFfinder")?,
        })
    }
}

impl OrfPredictor for OrfFinder {
    fn name(&self) -> &'static str {
        "ORFfinder"
    }

    fn predict_orfs(&self, input: &Path, output: &Path, min_len: usize, cancel: &CancelToken) -> Result<()> {
        let mut cmd = Command::new(&self.exe);
        cmd.arg("-in")
            .arg(input)
            .arg("-ml")
            .arg(min_len.max(30).to_string())
            .args(["-outfmt", "1"])
            .arg("-out")
            .arg(output);
        run_tool(&mut cmd, "ORFfinder", cancel)
    }
}

/// Where the retained ORFs of one prediction are written.
#[derive(Debug, Clone)]
pub struct OrfOutputs {
    /// Scratch prefix for intermediates, e.g. `tmpdir/S-contigs`.
    pub scratch_prefix: PathBuf,
    pub nucleotides: PathBuf,
    pub peptides: PathBuf,
}

/// Keeps predicted ORFs that are long enough and still match the model.
///
/// Returns the number of ORFs written to `outputs.nucleotides`.
pub fn retrieve_predicted_orfs(
    raw_orfs: &Path,
    min_len: usize,
    search: &dyn ProfileSearch,
    model: &Path,
    thresholds: &Thresholds,
    outputs: &OrfOutputs,
    cancel: &CancelToken,
) -> Result<usize> {
    let prefix = outputs.scratch_prefix.to_string_lossy();
    let long_orfs = PathBuf::from(format!("{}-long-orfs-min{}.fasta", prefix, min_len));
    let domtbl = PathBuf::from(format!("{}-orfs-hmmsearched.out", prefix));
    let hit_file = PathBuf::from(format!("{}-orfs-positives.out", prefix));

    let mut kept = 0;
    let mut writer = FastaWriter::create(&long_orfs)?;
    for record in FastaReader::open(raw_orfs)? {
        let record = record?;
        if record.seq.len() >= min_len {
            writer.write_record(&record.header, &record.seq)?;
            kept += 1;
        }
    }
    writer.finish()?;
    log::info!("{} predicted ORFs of at least {} nt", kept, min_len);

    if kept == 0 {
        FastaWriter::create(&outputs.nucleotides)?.finish()?;
        FastaWriter::create(&outputs.peptides)?.finish()?;
        return Ok(0);
    }

    search.translate_and_search(&long_orfs, FrameSet::Forward, model, &domtbl, cancel)?;
    let hits = classifier::classify(&domtbl, &hit_file, thresholds)?;
    let ids: FxHashSet<String> = hits.iter().map(|h| h.source_id().to_string()).collect();

    let retrieved = retrieve_fasta(&ids, &long_orfs, &outputs.nucleotides)?;
    translate::translate_file(&outputs.nucleotides, &outputs.peptides, FrameSet::Forward)?;
    Ok(retrieved)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    /// Search stand-in that reports every translated record as a strong hit.
    struct AcceptAll;

    impl ProfileSearch for AcceptAll {
        fn search(&self, _: &Path, _: &Path, _: &Path, _: &CancelToken) -> Result<()> {
            unreachable!()
        }

        fn translate_and_search(
            &self,
            nucleotides: &Path,
            frames: FrameSet,
            _model: &Path,
            domtbl: &Path,
            _cancel: &CancelToken,
        ) -> Result<()> {
            let mut buf = Vec::new();
            translate::translate_records(nucleotides, frames, &mut buf)?;
            let text = String::from_utf8(buf)?;
            let mut out = String::new();
            for name in text.lines().filter_map(|l| l.strip_prefix('>')) {
                out += &format!("{} - 10 m - 10 1e-9 500 0 1 1 1e-9 1e-9 500 0 1 10 1 10 1 10 0.9 -\n", name);
            }
            fs::write(domtbl, out)?;
            Ok(())
        }
    }

    #[test]
    fn test_short_orfs_are_dropped() {
        let dir = TempDir::new().unwrap();
        let raw = dir.path().join("raw.fasta");
        fs::write(&raw, ">orf1 # 1 # 12\nATGAAAAAATAA\n>orf2\nATGTAA\n").unwrap();
        let outputs = OrfOutputs {
            scratch_prefix: dir.path().join("S"),
            nucleotides: dir.path().join("S-predicted-orfs.fasta"),
            peptides: dir.path().join("S-predicted-orfs-amino.fasta"),
        };
        let thresholds = Thresholds { long_score: 100.0, meta_score: None };

        let n = retrieve_predicted_orfs(
            &raw,
            9,
            &AcceptAll,
            Path::new("model.hmm"),
            &thresholds,
            &outputs,
            &CancelToken::new(),
        )
        .unwrap();

        assert_eq!(n, 1);
        let nt = fs::read_to_string(&outputs.nucleotides).unwrap();
        assert_eq!(nt, ">orf1 # 1 # 12\nATGAAAAAATAA\n");
        let aa = fs::read_to_string(&outputs.peptides).unwrap();
        assert_eq!(aa, ">orf1_1\nMKK*\n");
    }
}
