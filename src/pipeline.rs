//! Top-level orchestration.
//!
//! Metagenomic runs (`--meta`):
//! 1. infer the mate naming convention from the first two files and pair the batch
//! 2. search every file in the worker pool (fan-out)
//! 3. merge all hit lists into one dictionary (fan-in, after the pool joined)
//! 4. pull every hit and its mate out of the original read files
//! 5. run the downstream stage chain
//!
//! Genome runs search every FASTA file in the pool, then run the per-file
//! stage chain for each of them in turn.
//!
//! A file whose worker failed is named in the summary and its pair is left
//! out of retrieval; the rest of the batch carries on.
//!
//! A cancelled run returns `PipelineError::Cancelled` straight from the pool,
//! so nothing after the fan-out is written.

use anyhow::Result;
use std::path::PathBuf;
use std::time::Instant;

use crate::config::Config;
use crate::merge;
use crate::naming::NamingConvention;
use crate::retrieve;
use crate::stages;
use crate::summary::ResultsSummary;
use crate::tools::{CancelToken, Toolbox};
use crate::worker::{self, InputFile, PoolReport};

/// Runs the whole pipeline and writes the summary reports.
pub fn run(config: &Config, toolbox: &Toolbox, cancel: &CancelToken) -> Result<ResultsSummary> {
    let start = Instant::now();
    let mut summary = ResultsSummary::new(
        &config.model.name,
        config.infiles.len(),
        config.meta,
        config.min_orf_length,
    );

    if config.meta {
        // Pairing problems must surface before anything is written
        let convention = NamingConvention::infer(&config.infiles[0], &config.infiles[1])?;
        let pairs = convention.pair_files(&config.infiles)?;
        config.layout.create(true)?;
        run_meta(config, toolbox, &convention, &pairs, &mut summary, cancel)?;
    } else {
        config.layout.create(false)?;
        run_genome(config, toolbox, &mut summary, cancel)?;
    }

    summary.write(&config.layout.summary_txt, &config.layout.summary_json)?;
    log::info!("Pipeline finished in {:.1}s", start.elapsed().as_secs_f64());
    Ok(summary)
}

fn record_failures(report: &PoolReport, summary: &mut ResultsSummary) {
    for (file, reason) in &report.failures {
        summary.record_failure(file, reason);
    }
    if !report.is_complete() {
        log::warn!(
            "{} of {} files failed",
            report.failures.len(),
            report.failures.len() + report.results.len()
        );
    }
}

fn run_meta(
    config: &Config,
    toolbox: &Toolbox,
    convention: &NamingConvention,
    pairs: &[(PathBuf, PathBuf)],
    summary: &mut ResultsSummary,
    cancel: &CancelToken,
) -> Result<()> {
    let inputs: Vec<InputFile> = pairs
        .iter()
        .flat_map(|(first, second)| [InputFile::new(first.clone()), InputFile::new(second.clone())])
        .collect();

    let report = worker::run_pool(&inputs, config, toolbox.search.as_ref(), cancel)?;
    record_failures(&report, summary);
    for result in &report.results {
        summary.record_hits(&result.hit_file)?;
    }

    let dictionary = merge::merge_results(&report.results, convention)?;
    if dictionary.is_empty() {
        log::warn!("No hits in any mate file");
    } else {
        log::info!(
            "{} reads registered for retrieval from {} files",
            dictionary.len(),
            dictionary.basenames().count()
        );
    }

    // A pair with a failed mate cannot be retrieved as a pair
    let intact: Vec<(PathBuf, PathBuf)> = pairs
        .iter()
        .filter(|(first, second)| {
            let failed = report.failures.iter().any(|(file, _)| file == first || file == second);
            if failed {
                log::warn!("Skipping retrieval for {} and its mate", first.display());
            }
            !failed
        })
        .cloned()
        .collect();

    cancel.check()?;
    let batch = retrieve::retrieve_paired_end(
        &dictionary,
        &intact,
        convention,
        &config.model.name,
        &config.layout.fragments_dir,
    );
    for (file, reason) in &batch.failures {
        summary.record_failure(file, reason);
    }
    let retrieved = batch.retrieved;

    cancel.check()?;
    stages::run_meta_chain(&retrieved, config, toolbox, summary, cancel)
}

fn run_genome(config: &Config, toolbox: &Toolbox, summary: &mut ResultsSummary, cancel: &CancelToken) -> Result<()> {
    let inputs: Vec<InputFile> = config.infiles.iter().map(InputFile::new).collect();

    let report = worker::run_pool(&inputs, config, toolbox.search.as_ref(), cancel)?;
    record_failures(&report, summary);

    for result in &report.results {
        cancel.check()?;
        stages::run_genome_chain(result, config, toolbox, summary, cancel)?;
    }
    Ok(())
}
