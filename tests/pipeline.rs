//! End-to-end runs of the orchestration with stand-in tools.

use anyhow::Result;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tempfile::TempDir;

use fargene::config::{Config, RunOptions};
use fargene::error::{is_cancelled, PipelineError};
use fargene::orf::OrfPredictor;
use fargene::pipeline;
use fargene::seqio::{FastaReader, FastaWriter};
use fargene::summary::StageStatus;
use fargene::tools::{Assembler, CancelToken, ProfileSearch, QualityFilter, Toolbox};
use fargene::translate::{self, FrameSet};

const HMM: &str = "HMMER3/f [3.1b2]\nNAME  m\nLENG  10\nALPH  amino\nHMM  A C\n";
const SEQ: &str = "ATGGCCAAAGGGTTTCCCAAAGGGTTTCCC";
const QUAL: &str = "IIIIIIIIIIIIIIIIIIIIIIIIIIIIII";

// ============================================================================
// Stand-in tools
// ============================================================================

/// Reports a strong frame-1 hit for every sequence whose id starts with one of `prefixes`.
struct FakeSearch {
    prefixes: Vec<&'static str>,
    calls: Arc<AtomicUsize>,
    cancel_on_first_call: Option<CancelToken>,
}

impl FakeSearch {
    fn new(prefixes: &[&'static str], calls: &Arc<AtomicUsize>) -> Self {
        Self {
            prefixes: prefixes.to_vec(),
            calls: Arc::clone(calls),
            cancel_on_first_call: None,
        }
    }

    fn write_domtbl(&self, names: &[String], domtbl: &Path) -> Result<()> {
        let mut out = String::from("# target name  accession  tlen ...\n");
        for name in names {
            let (id, frame) = translate::split_frame(name);
            if frame == Some(1) && self.prefixes.iter().any(|p| id.starts_with(p)) {
                out += &format!("{} - 10 m - 10 1e-9 500 0 1 1 1e-9 1e-9 500 0 1 3 1 3 1 3 0.9 -\n", name);
            }
        }
        fs::write(domtbl, out)?;
        Ok(())
    }
}

impl ProfileSearch for FakeSearch {
    fn search(&self, peptides: &Path, _model: &Path, domtbl: &Path, cancel: &CancelToken) -> Result<()> {
        cancel.check()?;
        let names: Vec<String> = FastaReader::open(peptides)?
            .map(|r| r.map(|r| r.id().to_string()))
            .collect::<Result<_>>()?;
        self.write_domtbl(&names, domtbl)
    }

    fn translate_and_search(
        &self,
        nucleotides: &Path,
        frames: FrameSet,
        _model: &Path,
        domtbl: &Path,
        cancel: &CancelToken,
    ) -> Result<()> {
        if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
            if let Some(token) = &self.cancel_on_first_call {
                token.cancel();
            }
        }
        cancel.check()?;
        let mut buf = Vec::new();
        translate::translate_records(nucleotides, frames, &mut buf)?;
        let names: Vec<String> = String::from_utf8(buf)?
            .lines()
            .filter_map(|l| l.strip_prefix('>'))
            .map(str::to_string)
            .collect();
        self.write_domtbl(&names, domtbl)
    }
}

/// Copies each mate unchanged under trim_galore's output names.
struct CopyFilter;

impl QualityFilter for CopyFilter {
    fn filter_pair(&self, mate1: &Path, mate2: &Path, out_dir: &Path, _: &CancelToken) -> Result<(PathBuf, PathBuf)> {
        let name = |p: &Path, n: u8| out_dir.join(format!("{}_val_{}.fq", p.file_stem().unwrap().to_str().unwrap(), n));
        let (out1, out2) = (name(mate1, 1), name(mate2, 2));
        fs::copy(mate1, &out1)?;
        fs::copy(mate2, &out2)?;
        Ok((out1, out2))
    }
}

/// Writes `contigs` when given, otherwise exits "successfully" without output.
struct FakeAssembler {
    contigs: Option<&'static str>,
    inputs: Arc<AtomicUsize>,
}

impl Assembler for FakeAssembler {
    fn assemble(&self, mate1: &Path, _mate2: &Path, out_dir: &Path, _: &CancelToken) -> Result<PathBuf> {
        fs::create_dir_all(out_dir)?;
        let reads = fs::read_to_string(mate1)?.lines().filter(|l| l.starts_with('@')).count();
        self.inputs.store(reads, Ordering::SeqCst);
        let path = out_dir.join("contigs.fasta");
        if let Some(text) = self.contigs {
            fs::write(&path, text)?;
        }
        Ok(path)
    }
}

/// Emits the first 45 nt of every input sequence as one ORF.
struct FakeOrfPredictor;

impl OrfPredictor for FakeOrfPredictor {
    fn name(&self) -> &'static str {
        "fake"
    }

    fn predict_orfs(&self, input: &Path, output: &Path, _min_len: usize, _: &CancelToken) -> Result<()> {
        let mut writer = FastaWriter::create(output)?;
        for (i, record) in FastaReader::open(input)?.enumerate() {
            let record = record?;
            let end = record.seq.len().min(45);
            writer.write_record(&format!("orf_hit{}", i + 1), &record.seq[..end])?;
        }
        writer.finish()
    }
}

// ============================================================================
// Fixtures
// ============================================================================

fn write_reads(dir: &Path, name: &str, ids: &[&str]) -> PathBuf {
    let path = dir.join(name);
    let body: String = ids
        .iter()
        .map(|id| format!("@{} extra\n{}\n+\n{}\n", id, SEQ, QUAL))
        .collect();
    fs::write(&path, body).unwrap();
    path
}

fn meta_config(dir: &Path, infiles: Vec<PathBuf>, processes: usize) -> Config {
    fs::write(dir.join("m.hmm"), HMM).unwrap();
    Config::resolve(RunOptions {
        infiles,
        hmm_model: dir.join("m.hmm").to_string_lossy().into_owned(),
        long_score: Some(100.0),
        meta_score: Some(0.3),
        meta: true,
        output: dir.join("out"),
        processes,
        ..RunOptions::default()
    })
    .unwrap()
}

fn read_file(path: &Path) -> String {
    fs::read_to_string(path).unwrap_or_else(|e| panic!("{}: {}", path.display(), e))
}

// ============================================================================
// Tests
// ============================================================================

#[test]
fn test_hit_in_one_mate_retrieves_both_and_missing_assembly_halts_chain() {
    let dir = TempDir::new().unwrap();
    let s1 = write_reads(dir.path(), "S_1.fastq", &["read41/1", "read42/1", "read43/1"]);
    let s2 = write_reads(dir.path(), "S_2.fastq", &["read41/2", "read42/2", "read43/2"]);
    let config = meta_config(dir.path(), vec![s1, s2], 2);

    let calls = Arc::new(AtomicUsize::new(0));
    let assembled = Arc::new(AtomicUsize::new(0));
    let toolbox = Toolbox {
        // Only mate 1 carries the hit
        search: Box::new(FakeSearch::new(&["read42/1"], &calls)),
        quality_filter: Some(Box::new(CopyFilter)),
        assembler: Some(Box::new(FakeAssembler {
            contigs: None,
            inputs: Arc::clone(&assembled),
        })),
        orf_predictor: Some(Box::new(FakeOrfPredictor)),
    };

    let summary = pipeline::run(&config, &toolbox, &CancelToken::new()).unwrap();

    let fragments = &config.layout.fragments_dir;
    assert_eq!(
        read_file(&fragments.join("S_2-m-retrieved.fastq")),
        format!("@read42/2 extra\n{}\n+\n{}\n", SEQ, QUAL)
    );
    assert_eq!(
        read_file(&fragments.join("S_1-m-retrieved.fastq")),
        format!("@read42/1 extra\n{}\n+\n{}\n", SEQ, QUAL)
    );
    assert_eq!(summary.retrieved_hits, 1);
    assert_eq!(assembled.load(Ordering::SeqCst), 1);

    assert_eq!(summary.stage_status("quality filtering"), Some(&StageStatus::Produced));
    assert!(matches!(summary.stage_status("assembly"), Some(StageStatus::Failed(_))));
    assert_eq!(summary.stage_status("contig retrieval"), Some(&StageStatus::NotRun));
    assert_eq!(summary.stage_status("ORF prediction"), Some(&StageStatus::NotRun));
    // Two worker searches, no contig search
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert!(!summary.is_complete());

    let report = read_file(&config.layout.summary_txt);
    assert!(report.contains("FAILED"));
    assert!(config.layout.summary_json.is_file());
}

#[test]
fn test_full_meta_chain_over_two_pairs() {
    let dir = TempDir::new().unwrap();
    let files = vec![
        write_reads(dir.path(), "S_1.fastq", &["read42/1", "read43/1"]),
        write_reads(dir.path(), "S_2.fastq", &["read42/2", "read43/2"]),
        write_reads(dir.path(), "T_2.fastq", &["read42/2", "read50/2"]),
        write_reads(dir.path(), "T_1.fastq", &["read42/1", "read50/1"]),
    ];
    let config = meta_config(dir.path(), files, 2);

    let contigs = ">NODE_hit_length_60\nATGGCCAAAGGGTTTCCCAAAGGGTTTCCCATGGCCAAAGGGTTTCCCAAAGGGTTTCCC\n>NODE_2\nCCCCCCCCC\n";
    let calls = Arc::new(AtomicUsize::new(0));
    let assembled = Arc::new(AtomicUsize::new(0));
    let toolbox = Toolbox {
        search: Box::new(FakeSearch::new(&["read42/1", "NODE_hit", "orf_hit"], &calls)),
        quality_filter: Some(Box::new(CopyFilter)),
        assembler: Some(Box::new(FakeAssembler {
            contigs: Some(contigs),
            inputs: Arc::clone(&assembled),
        })),
        orf_predictor: Some(Box::new(FakeOrfPredictor)),
    };

    let summary = pipeline::run(&config, &toolbox, &CancelToken::new()).unwrap();

    // Both pairs went into one assembly library
    assert_eq!(assembled.load(Ordering::SeqCst), 2);
    assert_eq!(summary.retrieved_hits, 2);
    assert_eq!(summary.retrieved_contigs, 1);
    assert_eq!(summary.predicted_orfs, 1);
    assert!(summary.is_complete());
    for stage in ["quality filtering", "assembly", "contig retrieval", "elongation", "ORF prediction", "ORF retrieval"] {
        assert_eq!(summary.stage_status(stage), Some(&StageStatus::Produced), "{}", stage);
    }

    let genes = &config.layout.genes_dir;
    assert!(read_file(&genes.join("contigs-m-retrieved.fasta")).starts_with(">NODE_hit_length_60\n"));
    assert!(read_file(&genes.join("contigs-m-predicted-orfs.fasta")).starts_with(">orf_hit1\nATGGCC"));
    assert!(read_file(&genes.join("contigs-m-predicted-orfs-amino.fasta")).starts_with(">orf_hit1_1\nMAKGFPKGFP"));
}

#[test]
fn test_cancellation_leaves_no_merge_or_downstream_artifacts() {
    let dir = TempDir::new().unwrap();
    let files = vec![
        write_reads(dir.path(), "S_1.fastq", &["read42/1"]),
        write_reads(dir.path(), "S_2.fastq", &["read42/2"]),
        write_reads(dir.path(), "T_1.fastq", &["read42/1"]),
        write_reads(dir.path(), "T_2.fastq", &["read42/2"]),
    ];
    let config = meta_config(dir.path(), files, 1);

    let cancel = CancelToken::new();
    let calls = Arc::new(AtomicUsize::new(0));
    let mut search = FakeSearch::new(&["read42/1"], &calls);
    search.cancel_on_first_call = Some(cancel.clone());
    let toolbox = Toolbox {
        search: Box::new(search),
        quality_filter: Some(Box::new(CopyFilter)),
        assembler: None,
        orf_predictor: None,
    };

    let err = pipeline::run(&config, &toolbox, &cancel).unwrap_err();
    assert!(is_cancelled(&err));

    let retrieved: Vec<_> = fs::read_dir(&config.layout.fragments_dir)
        .unwrap()
        .filter_map(|e| e.ok())
        .filter(|e| e.path().is_file())
        .collect();
    assert!(retrieved.is_empty());
    assert_eq!(fs::read_dir(&config.layout.trimmed_dir).unwrap().count(), 0);
    assert!(!config.layout.summary_txt.exists());
    assert!(!config.layout.summary_json.exists());
}

#[test]
fn test_non_conforming_mate_is_a_pairing_error() {
    let dir = TempDir::new().unwrap();
    let files = vec![
        write_reads(dir.path(), "sample_1.fastq", &["r1/1"]),
        write_reads(dir.path(), "sample_3.fastq", &["r1/2"]),
    ];
    let config = meta_config(dir.path(), files, 1);
    let calls = Arc::new(AtomicUsize::new(0));
    let toolbox = Toolbox {
        search: Box::new(FakeSearch::new(&["r1"], &calls)),
        quality_filter: None,
        assembler: None,
        orf_predictor: None,
    };

    let err = pipeline::run(&config, &toolbox, &CancelToken::new()).unwrap_err();
    assert!(matches!(
        err.downcast_ref::<PipelineError>(),
        Some(PipelineError::PairingInference(_))
    ));
    assert_eq!(calls.load(Ordering::SeqCst), 0);
    assert!(!config.layout.out_dir.exists());
}

#[test]
fn test_genome_mode_retrieves_hit_genes() {
    let dir = TempDir::new().unwrap();
    fs::write(dir.path().join("m.hmm"), HMM).unwrap();
    let genome = dir.path().join("g.fasta");
    fs::write(&genome, format!(">contig_hit desc\n{}\n>other\n{}\n", SEQ, SEQ)).unwrap();
    let config = Config::resolve(RunOptions {
        infiles: vec![genome],
        hmm_model: dir.path().join("m.hmm").to_string_lossy().into_owned(),
        long_score: Some(100.0),
        output: dir.path().join("out"),
        retrieve_whole: true,
        ..RunOptions::default()
    })
    .unwrap();

    let calls = Arc::new(AtomicUsize::new(0));
    let toolbox = Toolbox {
        search: Box::new(FakeSearch::new(&["contig_hit"], &calls)),
        quality_filter: None,
        assembler: None,
        orf_predictor: None,
    };

    let summary = pipeline::run(&config, &toolbox, &CancelToken::new()).unwrap();
    assert_eq!(summary.retrieved_hits, 1);
    assert_eq!(summary.retrieved_sequences, 1);
    assert_eq!(summary.predicted_orfs, 0);

    let genes = &config.layout.genes_dir;
    assert_eq!(
        read_file(&genes.join("g-m-filtered.fasta")),
        format!(">contig_hit desc\n{}\n", SEQ)
    );
    assert_eq!(read_file(&genes.join("g-m-filtered-peptides.fasta")), ">contig_hit_1\nMAK\n");
    assert!(config.layout.tmp_dir.join("g-m-gene-elongated.fasta").is_file());
    assert_eq!(
        summary.stage_status("ORF prediction (g.fasta)"),
        Some(&StageStatus::Skipped)
    );
}

#[test]
fn test_failed_mate_is_reported_and_run_completes() {
    let dir = TempDir::new().unwrap();
    let s1 = dir.path().join("S_1.fastq");
    // Second record is truncated
    fs::write(
        &s1,
        format!("@r1/1\n{}\n+\n{}\n@r2/1\n{}\n+\nIII\n", SEQ, QUAL, SEQ),
    )
    .unwrap();
    let s2 = write_reads(dir.path(), "S_2.fastq", &["r1/2", "r2/2"]);
    let t1 = write_reads(dir.path(), "T_1.fastq", &["r5/1"]);
    let t2 = write_reads(dir.path(), "T_2.fastq", &["r5/2"]);
    let config = meta_config(dir.path(), vec![s1.clone(), s2, t1, t2], 2);

    let calls = Arc::new(AtomicUsize::new(0));
    let toolbox = Toolbox {
        search: Box::new(FakeSearch::new(&["r"], &calls)),
        quality_filter: None,
        assembler: None,
        orf_predictor: None,
    };

    let summary = pipeline::run(&config, &toolbox, &CancelToken::new()).unwrap();

    assert_eq!(summary.failed_files.len(), 1);
    assert_eq!(summary.failed_files[0].file, s1);
    assert!(!summary.is_complete());
    // The intact pair is still retrieved, the broken one is not
    let fragments = &config.layout.fragments_dir;
    assert!(fragments.join("T_1-m-retrieved.fastq").is_file());
    assert!(!fragments.join("S_2-m-retrieved.fastq").exists());

    let report = read_file(&config.layout.summary_txt);
    assert!(report.contains("1 of 4 files failed"));
    assert!(report.contains("S_1.fastq"));
}

#[test]
fn test_genome_mode_hit_peptides_come_from_stored_translation() {
    let dir = TempDir::new().unwrap();
    fs::write(dir.path().join("m.hmm"), HMM).unwrap();
    let genome = dir.path().join("g.fasta");
    fs::write(&genome, format!(">contig_hit\n{}\n>other\n{}\n", SEQ, SEQ)).unwrap();
    let config = Config::resolve(RunOptions {
        infiles: vec![genome],
        hmm_model: dir.path().join("m.hmm").to_string_lossy().into_owned(),
        long_score: Some(100.0),
        output: dir.path().join("out"),
        store_peptides: true,
        ..RunOptions::default()
    })
    .unwrap();

    let calls = Arc::new(AtomicUsize::new(0));
    let toolbox = Toolbox {
        search: Box::new(FakeSearch::new(&["contig_hit"], &calls)),
        quality_filter: None,
        assembler: None,
        orf_predictor: None,
    };

    let summary = pipeline::run(&config, &toolbox, &CancelToken::new()).unwrap();
    assert_eq!(summary.retrieved_hits, 1);
    assert_eq!(calls.load(Ordering::SeqCst), 0);
    assert!(config.layout.tmp_dir.join("g-amino.fasta").is_file());
    // Whole frame-1 translation, not just the aligned span
    assert_eq!(
        read_file(&config.layout.genes_dir.join("g-m-filtered-peptides.fasta")),
        ">contig_hit_1\nMAKGFPKGFP\n"
    );
}

