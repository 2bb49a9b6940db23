use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::process;

use fargene::config::{Config, RunOptions};
use fargene::error::PipelineError;
use fargene::logging::init_logger;
use fargene::pipeline;
use fargene::summary::ResultsSummary;
use fargene::tools::{CancelToken, Toolbox};

fn parse_score(s: &str) -> Result<f64, String> {
    let val: f64 = s.parse().map_err(|_| format!("Invalid number: {}", s))?;
    if val < 0.0 {
        Err(format!("Score must not be negative, got {}", val))
    } else {
        Ok(val)
    }
}

#[derive(Parser)]
#[command(name = "fargene")]
#[command(version)]
#[command(about = "Fragmented antibiotic resistance gene identification with profile HMMs")]
#[command(long_about = r#"
fargene - Fragmented Antibiotic Resistance Gene iENntifiEr

Searches genomes or paired-end metagenomic reads for genes matching a profile
HMM, and reconstructs full-length genes from the hits.

WORKFLOW (--meta):
  FASTQ pairs → six-frame translation → hmmsearch → classification (per file, parallel)
              → mate retrieval → trim_galore → metaSPAdes → contig retrieval
              → elongation → ORF prediction

WORKFLOW (genomes):
  FASTA → six-frame translation → hmmsearch → classification
        → gene retrieval → elongation → ORF prediction

PRE-DEFINED MODELS:
  b1, class_b_1_2, class_b_3, class_a, class_c, class_d_1, class_d_2, qnr

OUTPUT FILES:
  results_summary.txt    Counts of hits, contigs and predicted ORFs
  results_summary.json   The same summary, machine readable
  predictedGenes/        Retrieved genes, peptides and predicted ORFs
  retrievedFragments/    Retrieved read pairs (--meta)
  hmmsearchresults/      hmmsearch domain tables
  tmpdir/                Intermediate files

EXAMPLES:
  # Genomes with a pre-defined model
  fargene -i genome1.fasta genome2.fasta --hmm-model class_a -o out/

  # Paired-end metagenomes, 4 files searched in parallel
  fargene -i S_1.fastq S_2.fastq T_1.fastq T_2.fastq --hmm-model qnr --meta -p 4 -o out/
"#)]
struct Args {
    #[arg(short = 'i', long, value_name = "FILE(S)", num_args = 1.., required = true, help_heading = "Input")]
    infiles: Vec<PathBuf>,

    #[arg(long = "hmm-model", value_name = "MODEL", required = true, help_heading = "Input")]
    hmm_model: String,

    #[arg(long = "models-dir", value_name = "DIR", default_value = "models", help_heading = "Input")]
    models_dir: PathBuf,

    #[arg(long, help_heading = "Input")]
    meta: bool,

    #[arg(long, help_heading = "Input")]
    protein: bool,

    #[arg(long = "score", visible_alias = "sl", value_name = "FLOAT",
          value_parser = parse_score, help_heading = "Classification")]
    long_score: Option<f64>,

    #[arg(long = "meta-score", visible_alias = "sm", value_name = "FLOAT",
          value_parser = parse_score, help_heading = "Classification")]
    meta_score: Option<f64>,

    #[arg(short = 'o', long, value_name = "DIR", default_value = "./fargene_output", help_heading = "Output")]
    output: PathBuf,

    #[arg(short = 'f', long, help_heading = "Output")]
    force: bool,

    #[arg(long = "tmp-dir", value_name = "DIR", help_heading = "Output")]
    tmp_dir: Option<PathBuf>,

    #[arg(long = "store-peptides", visible_alias = "sp", help_heading = "Output")]
    store_peptides: bool,

    #[arg(long = "retrieve-whole", help_heading = "Output")]
    retrieve_whole: bool,

    #[arg(short = 'v', long, help_heading = "Output")]
    verbose: bool,

    #[arg(long = "min-orf-length", value_name = "NT", help_heading = "ORF Prediction")]
    min_orf_length: Option<usize>,

    #[arg(long = "no-orf-predict", help_heading = "ORF Prediction")]
    no_orf_predict: bool,

    #[arg(long = "orf-finder", help_heading = "ORF Prediction")]
    orf_finder: bool,

    #[arg(long = "flank-length", value_name = "NT", default_value = "150", help_heading = "ORF Prediction")]
    flank_length: usize,

    #[arg(long = "no-quality-filtering", help_heading = "Assembly")]
    no_quality_filtering: bool,

    #[arg(long = "no-assembly", help_heading = "Assembly")]
    no_assembly: bool,

    #[arg(long, help_heading = "Rerun")]
    rerun: bool,

    #[arg(long = "amino-dir", value_name = "DIR", help_heading = "Rerun")]
    amino_dir: Option<PathBuf>,

    #[arg(long = "fasta-dir", value_name = "DIR", help_heading = "Rerun")]
    fasta_dir: Option<PathBuf>,

    #[arg(short = 'p', long, value_name = "NUM", default_value = "1", help_heading = "Runtime")]
    processes: usize,

    #[arg(short = 't', long, value_name = "NUM", default_value = "1", help_heading = "Runtime")]
    threads: usize,
}

impl Args {
    fn into_options(self) -> RunOptions {
        RunOptions {
            infiles: self.infiles,
            hmm_model: self.hmm_model,
            long_score: self.long_score,
            meta: self.meta,
            meta_score: self.meta_score,
            output: self.output,
            force: self.force,
            tmp_dir: self.tmp_dir,
            protein: self.protein,
            processes: self.processes,
            min_orf_length: self.min_orf_length,
            retrieve_whole: self.retrieve_whole,
            no_orf_predict: self.no_orf_predict,
            no_quality_filtering: self.no_quality_filtering,
            no_assembly: self.no_assembly,
            orf_finder: self.orf_finder,
            store_peptides: self.store_peptides,
            rerun: self.rerun,
            amino_dir: self.amino_dir,
            fasta_dir: self.fasta_dir,
            models_dir: self.models_dir,
            flank_length: self.flank_length,
            threads: self.threads,
        }
    }
}

fn print_report(summary: &ResultsSummary, config: &Config) {
    let (what, count) = if summary.meta {
        ("retrieved contigs", summary.retrieved_contigs)
    } else {
        ("possible genes", summary.retrieved_sequences)
    };
    println!("fARGene is done.");
    println!("Total number of {}: {}", what, count);
    println!(
        "Total number of predicted ORFs longer than {} nt: {}",
        config.min_orf_length, summary.predicted_orfs
    );
    if !summary.failed_files.is_empty() {
        println!(
            "{} of {} input files failed:",
            summary.failed_files.len(),
            summary.num_input_files
        );
        for failed in &summary.failed_files {
            println!("  {}", failed.file.display());
        }
    }
    println!("Output can be found in {}", config.layout.out_dir.display());
}

fn run(args: Args) -> Result<bool> {
    let cancel = CancelToken::new();
    let handler_token = cancel.clone();
    ctrlc::set_handler(move || {
        log::warn!("Interrupt received, stopping all workers");
        handler_token.cancel();
    })
    .context("Failed to install interrupt handler")?;

    let config = Config::resolve(args.into_options())?;
    let toolbox = Toolbox::locate(&config)?;

    log::info!(
        "Model {} ({}), {} input files, {} processes",
        config.model.name,
        config.model.path.display(),
        config.infiles.len(),
        config.processes
    );

    let summary = pipeline::run(&config, &toolbox, &cancel)?;
    print_report(&summary, &config);
    Ok(summary.is_complete())
}

fn main() {
    let args = Args::parse();
    init_logger(args.verbose);

    match run(args) {
        Ok(true) => {}
        Ok(false) => process::exit(1),
        Err(e) => {
            let code = e.downcast_ref::<PipelineError>().map_or(1, PipelineError::exit_code);
            if code == 130 {
                eprintln!("Cancelled.");
            } else {
                eprintln!("Error: {:#}", e);
            }
            process::exit(code);
        }
    }
}
