//! Run configuration.
//!
//! [`RunOptions`] is the raw option set handed over by the command line;
//! [`Config::resolve`] validates it and produces the immutable [`Config`] the
//! pipeline runs with. Every check that can fail happens here, before any
//! file is written.

use anyhow::Result;
use std::fs;
use std::path::{Path, PathBuf};

use crate::classifier::Thresholds;
use crate::error::PipelineError;
use crate::hmmer::read_model_length;
use crate::naming::file_stem;
use crate::orf::OrfBackend;
use crate::seqio::SeqFormat;

// ============================================================================
// Model catalog
// ============================================================================

/// A model shipped with the tool, with its calibrated thresholds.
#[derive(Debug, Clone, Copy)]
pub struct PredefinedModel {
    pub name: &'static str,
    pub file: &'static str,
    pub long_score: f64,
    pub meta_score: f64,
}

pub const MODEL_CATALOG: &[PredefinedModel] = &[
    PredefinedModel { name: "b1", file: "B1.hmm", long_score: 135.8, meta_score: 0.2424 },
    PredefinedModel { name: "class_b_1_2", file: "class_B_1_2.hmm", long_score: 127.0, meta_score: 0.3636 },
    PredefinedModel { name: "class_b_3", file: "class_B_3.hmm", long_score: 103.0, meta_score: 0.30303 },
    PredefinedModel { name: "class_a", file: "class_A.hmm", long_score: 105.0, meta_score: 0.2424 },
    PredefinedModel { name: "class_c", file: "class_C.hmm", long_score: 248.0, meta_score: 0.30303 },
    PredefinedModel { name: "class_d_1", file: "class_D_1.hmm", long_score: 182.0, meta_score: 0.3030 },
    PredefinedModel { name: "class_d_2", file: "class_D_2.hmm", long_score: 234.0, meta_score: 0.3030 },
    PredefinedModel { name: "qnr", file: "qnr.hmm", long_score: 150.0, meta_score: 0.51515 },
];

pub fn find_predefined(name: &str) -> Option<&'static PredefinedModel> {
    let lower = name.to_ascii_lowercase();
    MODEL_CATALOG.iter().find(|m| m.name == lower)
}

/// The profile model of a run.
#[derive(Debug, Clone, PartialEq)]
pub struct HmmModel {
    /// File stem of the profile, used in output file names.
    pub name: String,
    pub path: PathBuf,
}

// ============================================================================
// Output layout
// ============================================================================

/// Directories and report files of one run.
#[derive(Debug, Clone, PartialEq)]
pub struct OutputLayout {
    pub out_dir: PathBuf,
    pub hmm_dir: PathBuf,
    pub fragments_dir: PathBuf,
    pub trimmed_dir: PathBuf,
    pub tmp_dir: PathBuf,
    pub genes_dir: PathBuf,
    pub assembly_dir: PathBuf,
    pub summary_txt: PathBuf,
    pub summary_json: PathBuf,
}

impl OutputLayout {
    pub fn new(out_dir: &Path, tmp_dir: Option<&Path>) -> Self {
        let fragments_dir = out_dir.join("retrievedFragments");
        Self {
            out_dir: out_dir.to_path_buf(),
            hmm_dir: out_dir.join("hmmsearchresults"),
            trimmed_dir: fragments_dir.join("trimmedReads"),
            fragments_dir,
            tmp_dir: tmp_dir.map_or_else(|| out_dir.join("tmpdir"), Path::to_path_buf),
            genes_dir: out_dir.join("predictedGenes"),
            assembly_dir: out_dir.join("spades_assembly"),
            summary_txt: out_dir.join("results_summary.txt"),
            summary_json: out_dir.join("results_summary.json"),
        }
    }

    /// Creates the directories a run in the given mode writes to.
    pub fn create(&self, meta: bool) -> Result<()> {
        let mut dirs = vec![&self.out_dir, &self.hmm_dir, &self.tmp_dir, &self.genes_dir];
        if meta {
            dirs.push(&self.fragments_dir);
            dirs.push(&self.trimmed_dir);
        }
        for dir in dirs {
            fs::create_dir_all(dir)
                .map_err(|e| anyhow::anyhow!("Failed to create {}: {}", dir.display(), e))?;
        }
        Ok(())
    }
}

// ============================================================================
// Options and resolved configuration
// ============================================================================

/// Unvalidated options, one field per command-line flag.
#[derive(Debug, Clone)]
pub struct RunOptions {
    pub infiles: Vec<PathBuf>,
    pub hmm_model: String,
    pub long_score: Option<f64>,
    pub meta: bool,
    pub meta_score: Option<f64>,
    pub output: PathBuf,
    pub force: bool,
    pub tmp_dir: Option<PathBuf>,
    pub protein: bool,
    pub processes: usize,
    pub min_orf_length: Option<usize>,
    pub retrieve_whole: bool,
    pub no_orf_predict: bool,
    pub no_quality_filtering: bool,
    pub no_assembly: bool,
    pub orf_finder: bool,
    pub store_peptides: bool,
    pub rerun: bool,
    pub amino_dir: Option<PathBuf>,
    pub fasta_dir: Option<PathBuf>,
    pub models_dir: PathBuf,
    pub flank_length: usize,
    pub threads: usize,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            infiles: Vec::new(),
            hmm_model: String::new(),
            long_score: None,
            meta: false,
            meta_score: None,
            output: PathBuf::from("./fargene_output"),
            force: false,
            tmp_dir: None,
            protein: false,
            processes: 1,
            min_orf_length: None,
            retrieve_whole: false,
            no_orf_predict: false,
            no_quality_filtering: false,
            no_assembly: false,
            orf_finder: false,
            store_peptides: false,
            rerun: false,
            amino_dir: None,
            fasta_dir: None,
            models_dir: PathBuf::from("models"),
            flank_length: 150,
            threads: 1,
        }
    }
}

/// Validated, immutable configuration of one run.
#[derive(Debug, Clone)]
pub struct Config {
    pub infiles: Vec<PathBuf>,
    pub model: HmmModel,
    pub thresholds: Thresholds,
    pub meta: bool,
    pub protein: bool,
    pub processes: usize,
    pub threads: usize,
    /// Minimum ORF length in nucleotides.
    pub min_orf_length: usize,
    pub retrieve_whole: bool,
    pub orf_predict: bool,
    pub no_quality_filtering: bool,
    pub no_assembly: bool,
    pub orf_finder: bool,
    pub store_peptides: bool,
    pub rerun: bool,
    pub amino_dir: PathBuf,
    pub fasta_dir: PathBuf,
    pub flank_length: usize,
    pub layout: OutputLayout,
}

fn config_err(msg: impl Into<String>) -> anyhow::Error {
    PipelineError::config(msg).into()
}

impl Config {
    pub fn resolve(opts: RunOptions) -> Result<Self> {
        if opts.infiles.is_empty() {
            return Err(config_err("no input files given"));
        }
        for file in &opts.infiles {
            if !file.is_file() {
                return Err(config_err(format!("input file {} does not exist", file.display())));
            }
        }
        if opts.output.is_dir() && !opts.force {
            return Err(config_err(format!(
                "output directory {} exists; use --force to write into it",
                opts.output.display()
            )));
        }
        if opts.meta && opts.protein {
            return Err(config_err("--protein cannot be combined with --meta"));
        }
        if opts.meta && (opts.infiles.len() < 2 || opts.infiles.len() % 2 != 0) {
            return Err(config_err(format!(
                "--meta needs paired-end input: an even number of files, got {}",
                opts.infiles.len()
            )));
        }

        let (model, long_score, meta_score) = resolve_model(&opts)?;
        let thresholds = Thresholds {
            long_score,
            meta_score: if opts.meta { meta_score } else { None },
        };

        check_input_format(&opts.infiles[0], opts.meta)?;

        let layout = OutputLayout::new(&opts.output, opts.tmp_dir.as_deref());
        let amino_dir = opts.amino_dir.clone().unwrap_or_else(|| layout.tmp_dir.clone());
        let fasta_dir = opts.fasta_dir.clone().unwrap_or_else(|| layout.tmp_dir.clone());
        if opts.rerun {
            for file in &opts.infiles {
                let base = file_stem(file)?;
                let amino = amino_dir.join(format!("{}-amino.fasta", base));
                let fasta = fasta_dir.join(format!("{}.fasta", base));
                if !amino.is_file() && !fasta.is_file() {
                    return Err(config_err(format!(
                        "--rerun needs {} or {} from a previous run",
                        amino.display(),
                        fasta.display()
                    )));
                }
            }
        }

        let min_orf_length = match opts.min_orf_length {
            Some(len) => len,
            None => default_min_orf_length(&model.path)?,
        };

        let available = rayon::current_num_threads().max(1);
        let processes = opts.processes.clamp(1, available);
        if processes < opts.processes {
            log::warn!("Only {} CPUs available, using {} processes", available, processes);
        }

        Ok(Self {
            infiles: opts.infiles,
            model,
            thresholds,
            meta: opts.meta,
            protein: opts.protein,
            processes,
            threads: opts.threads.max(1),
            min_orf_length,
            retrieve_whole: opts.retrieve_whole,
            orf_predict: !opts.no_orf_predict,
            no_quality_filtering: opts.no_quality_filtering,
            no_assembly: opts.no_assembly,
            orf_finder: opts.orf_finder,
            store_peptides: opts.store_peptides,
            rerun: opts.rerun,
            amino_dir,
            fasta_dir,
            flank_length: opts.flank_length,
            layout,
        })
    }

    /// ORF predictor of this run.
    ///
    /// Assembled contigs always go through ORFfinder. Genomes use Prodigal
    /// unless `--orf-finder` is given. Protein input has no ORFs to predict.
    pub fn orf_backend(&self) -> Option<OrfBackend> {
        if !self.orf_predict || self.protein {
            None
        } else if self.meta || self.orf_finder {
            Some(OrfBackend::OrfFinder)
        } else {
            Some(OrfBackend::Prodigal)
        }
    }
}

/// Looks the model up in the catalog, falling back to a custom HMM file.
fn resolve_model(opts: &RunOptions) -> Result<(HmmModel, f64, Option<f64>)> {
    if let Some(predefined) = find_predefined(&opts.hmm_model) {
        let path = opts.models_dir.join(predefined.file);
        if !path.is_file() {
            return Err(config_err(format!(
                "model file {} for {} not found; check --models-dir",
                path.display(),
                predefined.name
            )));
        }
        let model = HmmModel {
            name: file_stem(&path)?,
            path,
        };
        return Ok((
            model,
            opts.long_score.unwrap_or(predefined.long_score),
            Some(opts.meta_score.unwrap_or(predefined.meta_score)),
        ));
    }

    let path = PathBuf::from(&opts.hmm_model);
    if !path.is_file() {
        let names: Vec<&str> = MODEL_CATALOG.iter().map(|m| m.name).collect();
        return Err(config_err(format!(
            "'{}' is neither a pre-defined model ({}) nor an HMM file",
            opts.hmm_model,
            names.join(", ")
        )));
    }
    let long_score = opts
        .long_score
        .ok_or_else(|| config_err("a custom model needs a threshold score (--score)"))?;
    if opts.meta && opts.meta_score.is_none() {
        return Err(config_err("a custom model in --meta mode needs --meta-score"));
    }
    let model = HmmModel {
        name: file_stem(&path)?,
        path,
    };
    Ok((model, long_score, opts.meta_score))
}

fn check_input_format(first: &Path, meta: bool) -> Result<()> {
    match (SeqFormat::detect(first)?, meta) {
        (Some(SeqFormat::Fastq), true) | (Some(SeqFormat::Fasta), false) => Ok(()),
        (_, true) => Err(config_err(format!(
            "{} is not FASTQ; --meta expects paired-end FASTQ reads",
            first.display()
        ))),
        (_, false) => Err(config_err(format!(
            "{} is not FASTA; use --meta for FASTQ reads",
            first.display()
        ))),
    }
}

/// 90 % of the model length, in nucleotides.
pub fn default_min_orf_length(model: &Path) -> Result<usize> {
    let residues = read_model_length(model)?;
    Ok(residues * 27 / 10)
}
