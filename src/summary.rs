//! Run results accumulator.
//!
//! One [`ResultsSummary`] lives for the whole run. Each `record_*` method
//! counts the records of one finished output file and adds them to the
//! totals; none depends on another. All updates happen on the coordinating
//! thread after the worker pool has joined. The summary is written once at
//! the end, as a text report and as JSON.

use anyhow::{Context, Result};
use serde::Serialize;
use std::fmt::Write as _;
use std::fs::{self, File};
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use crate::seqio::count_fasta_records;

/// How one downstream stage ended.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", content = "detail", rename_all = "snake_case")]
pub enum StageStatus {
    Produced,
    Skipped,
    Failed(String),
    NotRun,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StageRecord {
    pub stage: String,
    #[serde(flatten)]
    pub status: StageStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FailedFile {
    pub file: PathBuf,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ResultsSummary {
    pub started_at: String,
    pub finished_at: Option<String>,
    pub model: String,
    pub meta: bool,
    pub num_input_files: usize,
    pub retrieved_hits: usize,
    pub retrieved_sequences: usize,
    pub retrieved_contigs: usize,
    pub predicted_orfs: usize,
    pub min_orf_length: usize,
    pub failed_files: Vec<FailedFile>,
    pub stages: Vec<StageRecord>,
}

fn now() -> String {
    chrono::Local::now().format("%Y-%m-%d %H:%M:%S").to_string()
}

impl ResultsSummary {
    pub fn new(model: &str, num_input_files: usize, meta: bool, min_orf_length: usize) -> Self {
        Self {
            started_at: now(),
            finished_at: None,
            model: model.to_string(),
            meta,
            num_input_files,
            retrieved_hits: 0,
            retrieved_sequences: 0,
            retrieved_contigs: 0,
            predicted_orfs: 0,
            min_orf_length,
            failed_files: Vec::new(),
            stages: Vec::new(),
        }
    }

    /// Adds the entries of a hit-list file.
    pub fn record_hits(&mut self, hit_file: &Path) -> Result<usize> {
        let n = count_hit_lines(hit_file)?;
        self.retrieved_hits += n;
        Ok(n)
    }

    /// Adds the retrieved gene sequences of a FASTA file.
    pub fn record_sequences(&mut self, fasta: &Path) -> Result<usize> {
        let n = count_fasta_records(fasta)?;
        self.retrieved_sequences += n;
        Ok(n)
    }

    pub fn record_contigs(&mut self, fasta: &Path) -> Result<usize> {
        let n = count_fasta_records(fasta)?;
        self.retrieved_contigs += n;
        Ok(n)
    }

    pub fn record_orfs(&mut self, fasta: &Path) -> Result<usize> {
        let n = count_fasta_records(fasta)?;
        self.predicted_orfs += n;
        Ok(n)
    }

    pub fn record_failure(&mut self, file: &Path, reason: &str) {
        self.failed_files.push(FailedFile {
            file: file.to_path_buf(),
            reason: reason.to_string(),
        });
    }

    pub fn record_stage(&mut self, stage: &str, status: StageStatus) {
        self.stages.push(StageRecord {
            stage: stage.to_string(),
            status,
        });
    }

    pub fn stage_status(&self, stage: &str) -> Option<&StageStatus> {
        self.stages
            .iter()
            .rev()
            .find(|s| s.stage == stage)
            .map(|s| &s.status)
    }

    pub fn is_complete(&self) -> bool {
        self.failed_files.is_empty() && !self.stages.iter().any(|s| matches!(s.status, StageStatus::Failed(_)))
    }

    /// Human-readable report.
    pub fn render(&self) -> String {
        let mut text = String::new();
        let _ = writeln!(text, "fARGene results summary");
        let _ = writeln!(text, "Started: {}", self.started_at);
        if let Some(finished) = &self.finished_at {
            let _ = writeln!(text, "Finished: {}", finished);
        }
        let _ = writeln!(text, "The used HMM-model was: {}", self.model);
        let _ = writeln!(text, "The number of analyzed input files was: {}", self.num_input_files);
        let _ = writeln!(text, "Number of hits: {}", self.retrieved_hits);
        if self.meta {
            let _ = writeln!(text, "Number of retrieved contigs: {}", self.retrieved_contigs);
        } else {
            let _ = writeln!(text, "Number of retrieved sequences: {}", self.retrieved_sequences);
        }
        let _ = writeln!(
            text,
            "Number of predicted ORFs longer than {} nt: {}",
            self.min_orf_length, self.predicted_orfs
        );

        if !self.failed_files.is_empty() {
            let _ = writeln!(
                text,
                "{} of {} files failed:",
                self.failed_files.len(),
                self.num_input_files
            );
            for failed in &self.failed_files {
                let _ = writeln!(text, "  {}: {}", failed.file.display(), failed.reason);
            }
        }

        if !self.stages.is_empty() {
            let _ = writeln!(text, "Stages:");
            for record in &self.stages {
                let status = match &record.status {
                    StageStatus::Produced => "done".to_string(),
                    StageStatus::Skipped => "skipped".to_string(),
                    StageStatus::NotRun => "not run".to_string(),
                    StageStatus::Failed(reason) => format!("FAILED ({})", reason),
                };
                let _ = writeln!(text, "  {:<24} {}", record.stage, status);
            }
        }
        text
    }

    /// Stamps the finish time and writes the text and JSON reports.
    pub fn write(&mut self, text_path: &Path, json_path: &Path) -> Result<()> {
        self.finished_at = Some(now());
        fs::write(text_path, self.render())
            .with_context(|| format!("Failed to write summary: {}", text_path.display()))?;
        let json = serde_json::to_string_pretty(self)?;
        fs::write(json_path, json)
            .with_context(|| format!("Failed to write summary: {}", json_path.display()))?;
        Ok(())
    }
}

/// Non-comment lines of a hit-list file; a missing file counts as zero.
fn count_hit_lines(path: &Path) -> Result<usize> {
    if !path.is_file() {
        return Ok(0);
    }
    let file = File::open(path).with_context(|| format!("Failed to open hit file: {}", path.display()))?;
    let mut count = 0;
    for line in BufReader::new(file).lines() {
        let line = line?;
        if !line.is_empty() && !line.starts_with('#') {
            count += 1;
        }
    }
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_counters_are_independent() {
        let dir = TempDir::new().unwrap();
        let hits = dir.path().join("hits.out");
        let contigs = dir.path().join("contigs.fasta");
        fs::write(&hits, "#target\tscore\tali_from\tali_to\nr1_1\t50\t1\t9\nr2_4\t40\t2\t8\n").unwrap();
        fs::write(&contigs, ">c1\nACGT\n>c2\nAC\n>c3\nA\n").unwrap();

        let mut summary = ResultsSummary::new("class_A", 2, true, 675);
        // ORFs first: nothing requires hits to be counted before
        assert_eq!(summary.record_orfs(&dir.path().join("missing.fasta")).unwrap(), 0);
        assert_eq!(summary.record_contigs(&contigs).unwrap(), 3);
        assert_eq!(summary.record_hits(&hits).unwrap(), 2);
        assert_eq!(summary.record_hits(&hits).unwrap(), 2);
        assert_eq!(summary.retrieved_hits, 4);
        assert_eq!(summary.retrieved_contigs, 3);
    }

    #[test]
    fn test_report_names_failures() {
        let dir = TempDir::new().unwrap();
        let mut summary = ResultsSummary::new("qnr", 4, true, 300);
        summary.record_failure(Path::new("S_3.fastq"), "hmmsearch failed");
        summary.record_stage("quality filtering", StageStatus::Produced);
        summary.record_stage("assembly", StageStatus::Failed("no contigs.fasta".into()));
        summary.record_stage("contig retrieval", StageStatus::NotRun);
        assert!(!summary.is_complete());
        assert_eq!(summary.stage_status("assembly"), Some(&StageStatus::Failed("no contigs.fasta".into())));

        let txt = dir.path().join("results_summary.txt");
        let json = dir.path().join("results_summary.json");
        summary.write(&txt, &json).unwrap();

        let text = fs::read_to_string(&txt).unwrap();
        assert!(text.contains("1 of 4 files failed"));
        assert!(text.contains("S_3.fastq: hmmsearch failed"));
        assert!(text.contains("FAILED (no contigs.fasta)"));

        let value: serde_json::Value = serde_json::from_str(&fs::read_to_string(&json).unwrap()).unwrap();
        assert_eq!(value["model"], "qnr");
        assert_eq!(value["stages"][1]["status"], "failed");
        assert_eq!(value["stages"][1]["detail"], "no contigs.fasta");
        assert!(value["finished_at"].is_string());
    }
}
