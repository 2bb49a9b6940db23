//! Per-file worker tasks and the bounded pool that runs them.
//!
//! Each task turns one input file into a hit list:
//!
//! ```text
//! FASTQ -> FASTA -> six-frame translation -> hmmsearch -> classification
//! ```
//!
//! Tasks share only the immutable [`Config`] and write only files derived
//! from their own input name, so the pool needs no locking. The pool is a
//! full barrier: [`run_pool`] returns after every task has finished, and
//! returns `PipelineError::Cancelled` instead of results when the run was
//! aborted.

use anyhow::{Context, Result};
use rayon::prelude::*;
use std::path::{Path, PathBuf};
use std::time::Instant;

use crate::classifier;
use crate::config::Config;
use crate::error::{is_cancelled, PipelineError};
use crate::naming::{basename, file_stem};
use crate::seqio::{self, SeqFormat};
use crate::tools::{CancelToken, ProfileSearch};
use crate::translate::{self, FrameSet};

/// One file handed to the pool: a mate file, a genome or a protein FASTA.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputFile {
    pub path: PathBuf,
}

impl InputFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

/// What one finished task hands to the merge.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkerResult {
    /// Basename of the original input file.
    pub basename: String,
    pub source: PathBuf,
    pub hit_file: PathBuf,
    /// Stored peptide file, when the task kept one.
    pub peptides: Option<PathBuf>,
    pub hits: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TaskOutcome {
    Completed(WorkerResult),
    Failed { file: PathBuf, reason: String },
    Cancelled,
}

/// Outcome of a full pool run that was not cancelled.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PoolReport {
    /// Completed tasks, in input order.
    pub results: Vec<WorkerResult>,
    pub failures: Vec<(PathBuf, String)>,
}

impl PoolReport {
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }
}

// ============================================================================
// Single task
// ============================================================================

/// Runs the per-file chain, mapping every way it can end onto a [`TaskOutcome`].
pub fn run_task(input: &InputFile, config: &Config, search: &dyn ProfileSearch, cancel: &CancelToken) -> TaskOutcome {
    if cancel.is_cancelled() {
        return TaskOutcome::Cancelled;
    }
    match process_file(input, config, search, cancel) {
        Ok(result) => TaskOutcome::Completed(result),
        Err(e) if is_cancelled(&e) => TaskOutcome::Cancelled,
        Err(e) => TaskOutcome::Failed {
            file: input.path.clone(),
            reason: format!("{:#}", e),
        },
    }
}

fn process_file(
    input: &InputFile,
    config: &Config,
    search: &dyn ProfileSearch,
    cancel: &CancelToken,
) -> Result<WorkerResult> {
    let start = Instant::now();
    let name = basename(&input.path)?;
    let stem = file_stem(&input.path)?;
    let layout = &config.layout;
    let model = &config.model;
    let domtbl = layout.hmm_dir.join(format!("{}-{}-hmmsearched.out", stem, model.name));
    let hit_file = layout.tmp_dir.join(format!("{}-{}-positives.out", stem, model.name));

    log::info!("Processing {}", input.path.display());

    let peptides = if config.protein {
        search.search(&input.path, &model.path, &domtbl, cancel)?;
        None
    } else if config.rerun {
        rerun_search(&stem, config, search, &domtbl, cancel)?
    } else {
        let nucleotides = nucleotide_fasta(input, &stem, &layout.tmp_dir)?;
        cancel.check()?;
        if config.store_peptides {
            let amino = layout.tmp_dir.join(format!("{}-amino.fasta", stem));
            translate::translate_file(&nucleotides, &amino, FrameSet::All)?;
            search.search(&amino, &model.path, &domtbl, cancel)?;
            Some(amino)
        } else {
            search.translate_and_search(&nucleotides, FrameSet::All, &model.path, &domtbl, cancel)?;
            None
        }
    };

    cancel.check()?;
    let hits = classifier::classify(&domtbl, &hit_file, &config.thresholds)
        .with_context(|| format!("Failed to classify search results of {}", name))?;

    log::info!("{}: {} hits ({:.1}s)", name, hits.len(), start.elapsed().as_secs_f64());

    Ok(WorkerResult {
        basename: name,
        source: input.path.clone(),
        hit_file,
        peptides,
        hits: hits.len(),
    })
}

/// Nucleotide FASTA for a task, converting FASTQ reads into the scratch directory.
fn nucleotide_fasta(input: &InputFile, stem: &str, tmp_dir: &Path) -> Result<PathBuf> {
    match SeqFormat::detect(&input.path)? {
        Some(SeqFormat::Fasta) => Ok(input.path.clone()),
        Some(SeqFormat::Fastq) => {
            let fasta = tmp_dir.join(format!("{}.fasta", stem));
            let n = seqio::fastq_to_fasta(&input.path, &fasta)?;
            log::debug!("Converted {} reads of {}", n, input.path.display());
            Ok(fasta)
        }
        None => anyhow::bail!("{} is neither FASTA nor FASTQ", input.path.display()),
    }
}

/// Searches the intermediates of a previous run, preferring stored peptides.
fn rerun_search(
    stem: &str,
    config: &Config,
    search: &dyn ProfileSearch,
    domtbl: &Path,
    cancel: &CancelToken,
) -> Result<Option<PathBuf>> {
    let amino = config.amino_dir.join(format!("{}-amino.fasta", stem));
    if amino.is_file() {
        search.search(&amino, &config.model.path, domtbl, cancel)?;
        return Ok(Some(amino));
    }
    let fasta = config.fasta_dir.join(format!("{}.fasta", stem));
    if !fasta.is_file() {
        return Err(PipelineError::missing_output("previous run", fasta).into());
    }
    search.translate_and_search(&fasta, FrameSet::All, &config.model.path, domtbl, cancel)?;
    Ok(None)
}

// ============================================================================
// Pool
// ============================================================================

/// Runs one task per input on `config.processes` threads and waits for all of them.
pub fn run_pool(
    inputs: &[InputFile],
    config: &Config,
    search: &dyn ProfileSearch,
    cancel: &CancelToken,
) -> Result<PoolReport> {
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(config.processes)
        .build()
        .context("Failed to build worker pool")?;

    log::info!("Searching {} files with {} workers", inputs.len(), config.processes);

    let outcomes: Vec<TaskOutcome> = pool.install(|| {
        inputs
            .par_iter()
            .map(|input| {
                let outcome = run_task(input, config, search, cancel);
                if outcome == TaskOutcome::Cancelled {
                    // Stop tasks that are still queued or running
                    cancel.cancel();
                }
                outcome
            })
            .collect()
    });

    collect_outcomes(outcomes, cancel)
}

fn collect_outcomes(outcomes: Vec<TaskOutcome>, cancel: &CancelToken) -> Result<PoolReport> {
    if cancel.is_cancelled() || outcomes.iter().any(|o| *o == TaskOutcome::Cancelled) {
        let finished = outcomes
            .iter()
            .filter(|o| matches!(o, TaskOutcome::Completed(_)))
            .count();
        log::warn!("Cancelled after {} of {} files", finished, outcomes.len());
        return Err(PipelineError::Cancelled.into());
    }

    let mut report = PoolReport::default();
    for outcome in outcomes {
        match outcome {
            TaskOutcome::Completed(result) => report.results.push(result),
            TaskOutcome::Failed { file, reason } => {
                log::error!("{} failed: {}", file.display(), reason);
                report.failures.push((file, reason));
            }
            TaskOutcome::Cancelled => {}
        }
    }
    Ok(report)
}
