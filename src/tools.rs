//! External collaborator tools.
//!
//! Every black-box program the pipeline drives sits behind a small trait so the
//! orchestration can be exercised without the binaries installed:
//!
//! - [`ProfileSearch`]: `hmmsearch`, optionally fed by in-process translation
//! - [`QualityFilter`]: `trim_galore --paired`
//! - [`Assembler`]: metaSPAdes
//! - ORF prediction lives in [`crate::orf`]
//!
//! Processes are polled rather than waited on, so a cancelled run kills its
//! children instead of blocking until they finish.

use anyhow::{Context, Result};
use std::env;
use std::fs;
use std::io::{BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crate::config::Config;
use crate::error::PipelineError;
use crate::orf::{OrfBackend, OrfFinder, OrfPredictor, Prodigal};
use crate::translate::{self, FrameSet};

const POLL_INTERVAL: Duration = Duration::from_millis(50);

// ============================================================================
// Cancellation
// ============================================================================

/// Cooperative cancellation flag shared by the coordinator and all workers.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Returns `PipelineError::Cancelled` once the token has been tripped.
    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            return Err(PipelineError::Cancelled.into());
        }
        Ok(())
    }
}

// ============================================================================
// Process helpers
// ============================================================================

pub fn find_executable(name: &str) -> Result<PathBuf> {
    let path = Path::new(name);
    if path.is_absolute() && path.exists() {
        return Ok(path.to_path_buf());
    }

    if let Ok(paths) = env::var("PATH") {
        for dir in env::split_paths(&paths) {
            let full_path = dir.join(name);
            if full_path.is_file() {
                return Ok(full_path);
            }
        }
    }

    Err(PipelineError::config(format!(
        "{} not found in PATH. Please install it or add it to your PATH.",
        name
    ))
    .into())
}

/// Waits for `child`, killing it as soon as `cancel` is tripped.
fn wait_for(mut child: Child, name: &str, cancel: &CancelToken) -> Result<()> {
    let stderr_drain = child.stderr.take().map(|mut stderr| {
        thread::spawn(move || {
            let mut text = String::new();
            let _ = stderr.read_to_string(&mut text);
            text
        })
    });

    loop {
        if let Some(status) = child.try_wait()? {
            let stderr = stderr_drain
                .and_then(|h| h.join().ok())
                .unwrap_or_default();
            if status.success() {
                return Ok(());
            }
            anyhow::bail!(
                "{} failed (exit code: {:?}): {}",
                name,
                status.code(),
                stderr.trim()
            );
        }
        if cancel.is_cancelled() {
            let _ = child.kill();
            let _ = child.wait();
            return Err(PipelineError::Cancelled.into());
        }
        thread::sleep(POLL_INTERVAL);
    }
}

/// Runs a command to completion under cancellation control.
pub fn run_tool(command: &mut Command, name: &str, cancel: &CancelToken) -> Result<()> {
    cancel.check()?;
    log::debug!("Running {:?}", command);
    let child = command
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .spawn()
        .with_context(|| format!("Failed to run {}", name))?;
    wait_for(child, name, cancel)
}

// ============================================================================
// Profile search
// ============================================================================

pub trait ProfileSearch: Send + Sync {
    /// Searches a peptide FASTA file and writes a domain table to `domtbl`.
    fn search(&self, peptides: &Path, model: &Path, domtbl: &Path, cancel: &CancelToken) -> Result<()>;

    /// Translates a nucleotide FASTA file and searches it in one streaming step.
    fn translate_and_search(
        &self,
        nucleotides: &Path,
        frames: FrameSet,
        model: &Path,
        domtbl: &Path,
        cancel: &CancelToken,
    ) -> Result<()>;
}

pub struct Hmmsearch {
    exe: PathBuf,
    threads: usize,
}

impl Hmmsearch {
    pub fn locate(threads: usize) -> Result<Self> {
        Ok(Self {
            exe: find_executable("hmmsearch")?,
            threads,
        })
    }

    fn command(&self, model: &Path, domtbl: &Path) -> Command {
        let mut cmd = Command::new(&self.exe);
        cmd.arg("--cpu")
            .arg(self.threads.to_string())
            .arg("--noali")
            .arg("--domtblout")
            .arg(domtbl)
            .arg(model);
        cmd
    }
}

impl ProfileSearch for Hmmsearch {
    fn search(&self, peptides: &Path, model: &Path, domtbl: &Path, cancel: &CancelToken) -> Result<()> {
        let mut cmd = self.command(model, domtbl);
        cmd.arg(peptides);
        run_tool(&mut cmd, "hmmsearch", cancel)
    }

    fn translate_and_search(
        &self,
        nucleotides: &Path,
        frames: FrameSet,
        model: &Path,
        domtbl: &Path,
        cancel: &CancelToken,
    ) -> Result<()> {
        cancel.check()?;
        let mut cmd = self.command(model, domtbl);
        cmd.arg("-");
        let mut child = cmd
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .context("Failed to run hmmsearch")?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| anyhow::anyhow!("hmmsearch stdin unavailable"))?;
        let source = nucleotides.to_path_buf();
        let feeder = thread::spawn(move || -> Result<usize> {
            let mut writer = BufWriter::new(stdin);
            let n = translate::translate_records(&source, frames, &mut writer)?;
            writer.flush()?;
            Ok(n)
        });

        let waited = wait_for(child, "hmmsearch", cancel);
        let fed = feeder
            .join()
            .map_err(|_| anyhow::anyhow!("translation thread panicked"))?;
        waited?;
        let n = fed.with_context(|| format!("Failed to translate {}", nucleotides.display()))?;
        log::debug!("Searched {} translated frames of {}", n, nucleotides.display());
        Ok(())
    }
}

// ============================================================================
// Quality filtering
// ============================================================================

pub trait QualityFilter: Send + Sync {
    /// Filters one mate pair into `out_dir`, returning the filtered pair paths.
    fn filter_pair(
        &self,
        mate1: &Path,
        mate2: &Path,
        out_dir: &Path,
        cancel: &CancelToken,
    ) -> Result<(PathBuf, PathBuf)>;
}

pub struct TrimGalore {
    exe: PathBuf,
}

impl TrimGalore {
    pub fn locate() -> Result<Self> {
        Ok(Self {
            exe: find_executable("trim_galore")?,
        })
    }

    /// Name trim_galore gives a validated mate: `X.fastq` -> `X_val_1.fq`.
    fn validated_name(input: &Path, mate: u8) -> String {
        let name = input.file_name().and_then(|n| n.to_str()).unwrap_or("reads");
        let stem = name.strip_suffix(".gz").unwrap_or(name);
        let stem = stem
            .strip_suffix(".fastq")
            .or_else(|| stem.strip_suffix(".fq"))
            .unwrap_or(stem);
        format!("{}_val_{}.fq", stem, mate)
    }
}

impl QualityFilter for TrimGalore {
    fn filter_pair(
        &self,
        mate1: &Path,
        mate2: &Path,
        out_dir: &Path,
        cancel: &CancelToken,
    ) -> Result<(PathBuf, PathBuf)> {
        let mut cmd = Command::new(&self.exe);
        cmd.arg("--paired").arg("-o").arg(out_dir).arg(mate1).arg(mate2);
        run_tool(&mut cmd, "trim_galore", cancel)?;
        Ok((
            out_dir.join(Self::validated_name(mate1, 1)),
            out_dir.join(Self::validated_name(mate2, 2)),
        ))
    }
}

// ============================================================================
// Assembly
// ============================================================================

pub trait Assembler: Send + Sync {
    /// Assembles one paired library into `out_dir`, returning the contig file path.
    fn assemble(&self, mate1: &Path, mate2: &Path, out_dir: &Path, cancel: &CancelToken) -> Result<PathBuf>;
}

pub struct MetaSpades {
    exe: PathBuf,
    threads: usize,
}

impl MetaSpades {
    pub fn locate(threads: usize) -> Result<Self> {
        Ok(Self {
            exe: find_executable("spades.py")?,
            threads,
        })
    }
}

impl Assembler for MetaSpades {
    fn assemble(&self, mate1: &Path, mate2: &Path, out_dir: &Path, cancel: &CancelToken) -> Result<PathBuf> {
        if out_dir.exists() {
            fs::remove_dir_all(out_dir)?;
        }
        let mut cmd = Command::new(&self.exe);
        cmd.arg("--meta")
            .arg("-1")
            .arg(mate1)
            .arg("-2")
            .arg(mate2)
            .arg("-o")
            .arg(out_dir)
            .arg("-t")
            .arg(self.threads.to_string());
        run_tool(&mut cmd, "metaSPAdes", cancel)?;
        Ok(out_dir.join("contigs.fasta"))
    }
}

// ============================================================================
// Toolbox
// ============================================================================

/// The set of collaborators one run needs, resolved from configuration.
pub struct Toolbox {
    pub search: Box<dyn ProfileSearch>,
    pub quality_filter: Option<Box<dyn QualityFilter>>,
    pub assembler: Option<Box<dyn Assembler>>,
    pub orf_predictor: Option<Box<dyn OrfPredictor>>,
}

impl Toolbox {
    /// Locates the executables the configured stages will call.
    ///
    /// Only tools for enabled stages are required to be installed.
    pub fn locate(config: &Config) -> Result<Self> {
        let search: Box<dyn ProfileSearch> = Box::new(Hmmsearch::locate(config.threads)?);

        let quality_filter: Option<Box<dyn QualityFilter>> = if config.meta && !config.no_quality_filtering {
            Some(Box::new(TrimGalore::locate()?))
        } else {
            None
        };

        let assembler: Option<Box<dyn Assembler>> = if config.meta && !config.no_assembly {
            Some(Box::new(MetaSpades::locate(config.threads)?))
        } else {
            None
        };

        let orf_predictor: Option<Box<dyn OrfPredictor>> = match config.orf_backend() {
            Some(OrfBackend::OrfFinder) => Some(Box::new(OrfFinder::locate()?)),
            Some(OrfBackend::Prodigal) => Some(Box::new(Prodigal::locate()?)),
            None => None,
        };

        Ok(Self {
            search,
            quality_filter,
            assembler,
            orf_predictor,
        })
    }
}
