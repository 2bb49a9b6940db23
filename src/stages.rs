//! Downstream stage chain.
//!
//! After the merge, results flow through a fixed sequence of optional
//! stages. Metagenomic runs:
//!
//! ```text
//! retrieved pairs -> [quality filtering] -> [assembly] -> contig retrieval
//!                 -> elongation -> [ORF prediction] -> ORF retrieval
//! ```
//!
//! Genome runs, once per input file:
//!
//! ```text
//! gene retrieval -> hit peptides -> elongation -> [ORF prediction] -> ORF retrieval
//! ```
//!
//! Each stage ends as a [`StageOutcome`]. A stage whose declared output is
//! missing, or whose tool fails, ends the chain: every later stage is
//! recorded as not run and never invoked. Nothing is retried.

use anyhow::Result;
use rustc_hash::FxHashSet;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::classifier::{self, HitRecord};
use crate::config::Config;
use crate::elongation;
use crate::error::{is_cancelled, PipelineError};
use crate::naming::file_stem;
use crate::orf::{self, OrfOutputs};
use crate::retrieve::{retrieve_fasta, RetrievedPair};
use crate::seqio::open_buffered;
use crate::summary::{ResultsSummary, StageStatus};
use crate::tools::{CancelToken, Toolbox};
use crate::translate::FrameSet;
use crate::worker::WorkerResult;

#[derive(Debug, Clone, PartialEq)]
pub enum StageOutcome<T> {
    Produced(T),
    Skipped,
    Failed(String),
}

impl<T> StageOutcome<T> {
    pub fn produced(self) -> Option<T> {
        match self {
            StageOutcome::Produced(value) => Some(value),
            _ => None,
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, StageOutcome::Failed(_))
    }
}

/// Fails with `MissingUpstreamOutput` unless `path` is an existing file.
pub fn require_output(stage: &str, path: &Path) -> Result<()> {
    if path.is_file() {
        Ok(())
    } else {
        Err(PipelineError::missing_output(stage, path).into())
    }
}

/// Runs stages in order and records each outcome in the summary.
pub struct StageChain<'a> {
    summary: &'a mut ResultsSummary,
    label: Option<String>,
    halted: bool,
}

impl<'a> StageChain<'a> {
    pub fn new(summary: &'a mut ResultsSummary, label: Option<String>) -> Self {
        Self {
            summary,
            label,
            halted: false,
        }
    }

    fn name(&self, stage: &str) -> String {
        match &self.label {
            Some(label) => format!("{} ({})", stage, label),
            None => stage.to_string(),
        }
    }

    pub fn halted(&self) -> bool {
        self.halted
    }

    pub fn summary(&mut self) -> &mut ResultsSummary {
        &mut *self.summary
    }

    /// Runs one stage unless it is disabled or an earlier stage failed.
    ///
    /// Only cancellation is returned as an error; every other failure becomes
    /// `StageOutcome::Failed` and halts the chain.
    pub fn run<T>(&mut self, stage: &str, enabled: bool, body: impl FnOnce() -> Result<T>) -> Result<StageOutcome<T>> {
        let name = self.name(stage);
        if self.halted {
            self.summary.record_stage(&name, StageStatus::NotRun);
            return Ok(StageOutcome::Skipped);
        }
        if !enabled {
            log::info!("Skipping {}", name);
            self.summary.record_stage(&name, StageStatus::Skipped);
            return Ok(StageOutcome::Skipped);
        }

        log::info!("Running {}", name);
        match body() {
            Ok(value) => {
                self.summary.record_stage(&name, StageStatus::Produced);
                Ok(StageOutcome::Produced(value))
            }
            Err(e) if is_cancelled(&e) => Err(e),
            Err(e) => {
                let reason = format!("{:#}", e);
                log::error!("{} failed: {}", name, reason);
                self.summary.record_stage(&name, StageStatus::Failed(reason.clone()));
                self.halted = true;
                Ok(StageOutcome::Failed(reason))
            }
        }
    }
}

/// Concatenates sequence files (gzip aware) into one plain file.
pub fn concat_files(inputs: &[PathBuf], out: &Path) -> Result<()> {
    let mut writer = BufWriter::new(File::create(out)?);
    for input in inputs {
        let mut reader = open_buffered(input)?;
        io::copy(&mut reader, &mut writer)?;
    }
    writer.flush()?;
    Ok(())
}

fn source_ids(hits: &[HitRecord]) -> FxHashSet<String> {
    hits.iter().map(|h| h.source_id().to_string()).collect()
}

// ============================================================================
// Metagenomic chain
// ============================================================================

/// Runs the stages that follow mate retrieval.
pub fn run_meta_chain(
    retrieved: &[RetrievedPair],
    config: &Config,
    toolbox: &Toolbox,
    summary: &mut ResultsSummary,
    cancel: &CancelToken,
) -> Result<()> {
    let layout = &config.layout;
    let model = &config.model;
    let has_reads = retrieved.iter().any(|p| p.reads1 > 0 || p.reads2 > 0);
    if !has_reads {
        log::warn!("No reads were retrieved; nothing to assemble");
    }
    let mut chain = StageChain::new(summary, None);

    let filtered = chain.run("quality filtering", has_reads && toolbox.quality_filter.is_some(), || {
        let Some(filter) = toolbox.quality_filter.as_deref() else {
            anyhow::bail!("no quality filter configured");
        };
        let mut pairs = Vec::with_capacity(retrieved.len());
        for pair in retrieved {
            let (out1, out2) = filter.filter_pair(&pair.mate1, &pair.mate2, &layout.trimmed_dir, cancel)?;
            require_output("quality filtering", &out1)?;
            require_output("quality filtering", &out2)?;
            pairs.push((out1, out2));
        }
        Ok(pairs)
    })?;
    let reads: Vec<(PathBuf, PathBuf)> = filtered
        .produced()
        .unwrap_or_else(|| retrieved.iter().map(|p| (p.mate1.clone(), p.mate2.clone())).collect());

    let contigs = chain.run("assembly", has_reads && toolbox.assembler.is_some(), || {
        let Some(assembler) = toolbox.assembler.as_deref() else {
            anyhow::bail!("no assembler configured");
        };
        let (mate1, mate2) = if reads.len() == 1 {
            reads[0].clone()
        } else {
            let all1 = layout.tmp_dir.join(format!("all-{}-assembly-input_1.fastq", model.name));
            let all2 = layout.tmp_dir.join(format!("all-{}-assembly-input_2.fastq", model.name));
            let (firsts, seconds): (Vec<PathBuf>, Vec<PathBuf>) = reads.iter().cloned().unzip();
            concat_files(&firsts, &all1)?;
            concat_files(&seconds, &all2)?;
            (all1, all2)
        };
        let contigs = assembler.assemble(&mate1, &mate2, &layout.assembly_dir, cancel)?;
        require_output("assembly", &contigs)?;
        Ok(contigs)
    })?;
    let contigs = contigs.produced();

    let base = "contigs";
    let contig_hits = chain.run("contig retrieval", contigs.is_some(), || {
        let contigs = contigs.as_deref().unwrap_or(Path::new(""));
        let domtbl = layout.hmm_dir.join(format!("{}-{}-hmmsearched.out", base, model.name));
        let hit_file = layout.tmp_dir.join(format!("{}-{}-positives.out", base, model.name));
        let out = layout.genes_dir.join(format!("{}-{}-retrieved.fasta", base, model.name));

        toolbox
            .search
            .translate_and_search(contigs, FrameSet::All, &model.path, &domtbl, cancel)?;
        require_output("contig search", &domtbl)?;
        let hits = classifier::classify(&domtbl, &hit_file, &config.thresholds)?;
        retrieve_fasta(&source_ids(&hits), contigs, &out)?;
        require_output("contig retrieval", &out)?;
        Ok((out, hits))
    })?;
    let contig_hits = contig_hits.produced();
    if let Some((retrieved, _)) = &contig_hits {
        let n = chain.summary().record_contigs(retrieved)?;
        log::info!("Retrieved {} contigs", n);
    }

    let has_hits = contig_hits.as_ref().map_or(false, |(_, hits)| !hits.is_empty());
    let scratch = layout.tmp_dir.join(format!("{}-{}", base, model.name));
    let (retrieved_contigs, hits) = contig_hits.unwrap_or_default();
    run_orf_stages(&mut chain, has_hits, &hits, &retrieved_contigs, &scratch, &layout.genes_dir, config, toolbox, cancel)
}

// ============================================================================
// Genome chain
// ============================================================================

/// Runs the stages that follow classification of one genome or protein file.
pub fn run_genome_chain(
    result: &WorkerResult,
    config: &Config,
    toolbox: &Toolbox,
    summary: &mut ResultsSummary,
    cancel: &CancelToken,
) -> Result<()> {
    let layout = &config.layout;
    let model = &config.model;
    let stem = file_stem(&result.source)?;
    summary.record_hits(&result.hit_file)?;
    let mut chain = StageChain::new(summary, Some(result.basename.clone()));

    let filtered = layout.genes_dir.join(format!("{}-{}-filtered.fasta", stem, model.name));
    let hits = chain.run("gene retrieval", true, || {
        let hits = classifier::read_hit_file(&result.hit_file)?;
        if config.protein {
            let targets: FxHashSet<String> = hits.iter().map(|h| h.target.clone()).collect();
            retrieve_fasta(&targets, &result.source, &filtered)?;
        } else {
            elongation::extract_regions(&hits, &result.source, 0, config.retrieve_whole, &filtered)?;
        }
        require_output("gene retrieval", &filtered)?;
        Ok(hits)
    })?;
    let hits = hits.produced().unwrap_or_default();
    if !chain.halted() {
        chain.summary().record_sequences(&filtered)?;
    }
    let translated = !config.protein && !hits.is_empty();

    chain.run("hit peptides", translated, || {
        let peptides = layout
            .genes_dir
            .join(format!("{}-{}-filtered-peptides.fasta", stem, model.name));
        match &result.peptides {
            Some(stored) => {
                let targets: FxHashSet<String> = hits.iter().map(|h| h.target.clone()).collect();
                retrieve_fasta(&targets, stored, &peptides)?
            }
            None => elongation::hit_peptides(&hits, &result.source, &peptides)?,
        };
        require_output("hit peptides", &peptides)
    })?;

    let scratch = layout.tmp_dir.join(format!("{}-{}", stem, model.name));
    run_orf_stages(&mut chain, translated, &hits, &result.source, &scratch, &layout.genes_dir, config, toolbox, cancel)
}

// ============================================================================
// Shared tail
// ============================================================================

/// Elongation, ORF prediction and ORF retrieval over the hits of `source`.
#[allow(clippy::too_many_arguments)]
fn run_orf_stages(
    chain: &mut StageChain<'_>,
    enabled: bool,
    hits: &[HitRecord],
    source: &Path,
    scratch: &Path,
    genes_dir: &Path,
    config: &Config,
    toolbox: &Toolbox,
    cancel: &CancelToken,
) -> Result<()> {
    let prefix = scratch.to_string_lossy().into_owned();
    let name = scratch
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("sequences")
        .to_string();

    let elongated = PathBuf::from(format!("{}-gene-elongated.fasta", prefix));
    let elongated = chain
        .run("elongation", enabled, || {
            elongation::elongate(hits, source, config.flank_length, config.retrieve_whole, &elongated)?;
            require_output("elongation", &elongated)?;
            Ok(elongated)
        })?
        .produced();

    let predictor = toolbox.orf_predictor.as_deref();
    let raw_orfs = PathBuf::from(format!("{}-long-orfs.fasta", prefix));
    let raw_orfs = chain
        .run("ORF prediction", elongated.is_some() && predictor.is_some(), || {
            let (Some(predictor), Some(elongated)) = (predictor, elongated.as_deref()) else {
                anyhow::bail!("no ORF predictor configured");
            };
            log::info!("Predicting ORFs with {}", predictor.name());
            predictor.predict_orfs(elongated, &raw_orfs, config.min_orf_length, cancel)?;
            require_output("ORF prediction", &raw_orfs)?;
            Ok(raw_orfs)
        })?
        .produced();

    let outputs = OrfOutputs {
        scratch_prefix: scratch.to_path_buf(),
        nucleotides: genes_dir.join(format!("{}-predicted-orfs.fasta", name)),
        peptides: genes_dir.join(format!("{}-predicted-orfs-amino.fasta", name)),
    };
    let kept = chain.run("ORF retrieval", raw_orfs.is_some(), || {
        let raw = raw_orfs.as_deref().unwrap_or(Path::new(""));
        orf::retrieve_predicted_orfs(
            raw,
            config.min_orf_length,
            toolbox.search.as_ref(),
            &config.model.path,
            &config.thresholds,
            &outputs,
            cancel,
        )?;
        require_output("ORF retrieval", &outputs.nucleotides)
    })?;

    if kept.produced().is_some() {
        let n = chain.summary().record_orfs(&outputs.nucleotides)?;
        log::info!("{} predicted ORFs of at least {} nt", n, config.min_orf_length);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_failed_stage_halts_chain() {
        let mut summary = ResultsSummary::new("m", 2, true, 90);
        let mut chain = StageChain::new(&mut summary, None);
        let mut later_ran = false;

        let first = chain.run("assembly", true, || -> Result<PathBuf> {
            let contigs = PathBuf::from("/nonexistent/spades/contigs.fasta");
            require_output("assembly", &contigs)?;
            Ok(contigs)
        });
        assert!(first.unwrap().is_failed());

        let second = chain
            .run("contig retrieval", true, || {
                later_ran = true;
                Ok(())
            })
            .unwrap();
        assert_eq!(second, StageOutcome::Skipped);
        assert!(!later_ran);

        assert!(matches!(summary.stage_status("assembly"), Some(StageStatus::Failed(_))));
        assert_eq!(summary.stage_status("contig retrieval"), Some(&StageStatus::NotRun));
    }

    #[test]
    fn test_disabled_stage_does_not_halt() {
        let mut summary = ResultsSummary::new("m", 1, false, 90);
        let mut chain = StageChain::new(&mut summary, Some("g.fasta".into()));
        assert_eq!(chain.run("ORF prediction", false, || Ok(1)).unwrap(), StageOutcome::Skipped);
        assert_eq!(chain.run("ORF retrieval", true, || Ok(2)).unwrap(), StageOutcome::Produced(2));
        assert_eq!(summary.stage_status("ORF prediction (g.fasta)"), Some(&StageStatus::Skipped));
    }

    #[test]
    fn test_cancellation_propagates() {
        let mut summary = ResultsSummary::new("m", 1, false, 90);
        let mut chain = StageChain::new(&mut summary, None);
        let err = chain
            .run("assembly", true, || -> Result<()> { Err(PipelineError::Cancelled.into()) })
            .unwrap_err();
        assert!(is_cancelled(&err));
    }

    #[test]
    fn test_concat_files() {
        let dir = TempDir::new().unwrap();
        let a = dir.path().join("a.fq");
        let b = dir.path().join("b.fq");
        let out = dir.path().join("all.fq");
        fs::write(&a, "@r1\nA\n+\nI\n").unwrap();
        fs::write(&b, "@r2\nC\n+\nI\n").unwrap();
        concat_files(&[a, b], &out).unwrap();
        assert_eq!(fs::read_to_string(&out).unwrap(), "@r1\nA\n+\nI\n@r2\nC\n+\nI\n");
    }
}
