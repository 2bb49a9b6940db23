//! HMMER Domain Table Parser Module
//!
//! Parses the per-domain tabular output written by `hmmsearch --domtblout`.
//! Lines starting with `#` are comments; data lines have at least 22
//! whitespace-separated columns.
//!
//! # Columns used
//! ```text
//! Col  Description
//! 1    Target name (searched sequence)
//! 3    Target length
//! 4    Query name (profile)
//! 6    Query length
//! 7    Full sequence E-value
//! 8    Full sequence score
//! 12   Domain conditional E-value
//! 14   Domain score
//! 16   HMM from
//! 17   HMM to
//! 18   Alignment from (on target)
//! 19   Alignment to
//! 20   Envelope from
//! 21   Envelope to
//! ```
//!
//! # Example Usage
//! ```no_run
//! use fargene::hmmer::DomTblReader;
//!
//! let reader = DomTblReader::open("sample-model-hmmsearched.out").unwrap();
//! for record in reader {
//!     let rec = record.unwrap();
//!     println!("{} {:.1} ({}-{})", rec.target_name, rec.full_score, rec.ali_from, rec.ali_to);
//! }
//! ```

use anyhow::{Context, Result};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

/// A single domain hit from a domtblout file.
#[derive(Debug, Clone, PartialEq)]
pub struct DomainHit {
    pub target_name: String,
    pub target_len: usize,
    pub query_name: String,
    pub query_len: usize,
    pub full_evalue: f64,
    pub full_score: f64,
    pub domain_cevalue: f64,
    pub domain_score: f64,
    pub hmm_from: usize,
    pub hmm_to: usize,
    /// Alignment start on the target, 1-based inclusive.
    pub ali_from: usize,
    /// Alignment end on the target, 1-based inclusive.
    pub ali_to: usize,
    pub env_from: usize,
    pub env_to: usize,
}

impl DomainHit {
    /// Parses one data line.
    ///
    /// # Errors
    /// Returns an error if the line has fewer than 22 columns or a numeric
    /// column cannot be parsed.
    pub fn parse_line(line: &str) -> Result<Self> {
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() < 22 {
            anyhow::bail!("Invalid domtblout line: {} columns", fields.len());
        }

        Ok(Self {
            target_name: fields[0].to_string(),
            target_len: fields[2].parse().context("Invalid target length")?,
            query_name: fields[3].to_string(),
            query_len: fields[5].parse().context("Invalid query length")?,
            full_evalue: fields[6].parse().context("Invalid E-value")?,
            full_score: fields[7].parse().context("Invalid sequence score")?,
            domain_cevalue: fields[11].parse().context("Invalid domain c-Evalue")?,
            domain_score: fields[13].parse().context("Invalid domain score")?,
            hmm_from: fields[15].parse().context("Invalid hmm from")?,
            hmm_to: fields[16].parse().context("Invalid hmm to")?,
            ali_from: fields[17].parse().context("Invalid ali from")?,
            ali_to: fields[18].parse().context("Invalid ali to")?,
            env_from: fields[19].parse().context("Invalid env from")?,
            env_to: fields[20].parse().context("Invalid env to")?,
        })
    }

    /// Number of target residues covered by the domain alignment.
    pub fn aligned_len(&self) -> usize {
        self.ali_to.saturating_sub(self.ali_from) + 1
    }

    /// Domain score per aligned residue.
    pub fn score_per_residue(&self) -> f64 {
        self.domain_score / self.aligned_len() as f64
    }
}

/// Sequential reader for domtblout files.
pub struct DomTblReader {
    reader: BufReader<File>,
    line_buf: String,
}

impl DomTblReader {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(path.as_ref())
            .with_context(|| format!("Failed to open domtblout: {}", path.as_ref().display()))?;
        Ok(Self {
            reader: BufReader::with_capacity(1024 * 1024, file),
            line_buf: String::with_capacity(512),
        })
    }

    /// Reads the next domain hit, skipping comments and blank lines.
    pub fn read_next(&mut self) -> Result<Option<DomainHit>> {
        loop {
            self.line_buf.clear();
            if self.reader.read_line(&mut self.line_buf)? == 0 {
                return Ok(None);
            }
            let line = self.line_buf.trim_end();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            return Ok(Some(DomainHit::parse_line(line)?));
        }
    }
}

impl Iterator for DomTblReader {
    type Item = Result<DomainHit>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.read_next() {
            Ok(Some(record)) => Some(Ok(record)),
            Ok(None) => None,
            Err(e) => Some(Err(e)),
        }
    }
}

/// Reads the model length (`LENG`) from an HMMER3 profile file.
pub fn read_model_length<P: AsRef<Path>>(path: P) -> Result<usize> {
    let path = path.as_ref();
    let file = File::open(path)
        .with_context(|| format!("Failed to open HMM: {}", path.display()))?;
    for line in BufReader::new(file).lines() {
        let line = line?;
        if let Some(rest) = line.strip_prefix("LENG") {
            return rest
                .trim()
                .parse()
                .with_context(|| format!("Invalid LENG line in {}", path.display()));
        }
        if line.starts_with("HMM ") {
            break;
        }
    }
    anyhow::bail!("No LENG field in {}", path.display())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    const LINE: &str = "read42/1_3  -  33 class_A  -  250  1.2e-05  40.5  0.1  1  1  2e-07  3e-05  38.0  0.1  100  130  2  31  1  33  0.95 -";

    #[test]
    fn test_parse_domtbl_line() {
        let hit = DomainHit::parse_line(LINE).unwrap();
        assert_eq!(hit.target_name, "read42/1_3");
        assert_eq!(hit.target_len, 33);
        assert_eq!(hit.query_name, "class_A");
        assert_eq!(hit.full_score, 40.5);
        assert_eq!(hit.domain_score, 38.0);
        assert_eq!((hit.ali_from, hit.ali_to), (2, 31));
        assert_eq!(hit.aligned_len(), 30);
        assert!((hit.score_per_residue() - 38.0 / 30.0).abs() < 1e-9);
    }

    #[test]
    fn test_reader_skips_comments() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("out.domtbl");
        fs::write(&path, format!("# header\n#\n{}\n\n# [ok]\n", LINE)).unwrap();
        let hits: Vec<DomainHit> = DomTblReader::open(&path)
            .unwrap()
            .collect::<Result<_>>()
            .unwrap();
        assert_eq!(hits.len(), 1);
    }

    #[test]
    fn test_invalid_line() {
        assert!(DomainHit::parse_line("too few columns").is_err());
    }

    #[test]
    fn test_read_model_length() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("m.hmm");
        fs::write(&path, "HMMER3/f [3.1b2]\nNAME  class_A\nLENG  250\nALPH  amino\nHMM  A C\n").unwrap();
        assert_eq!(read_model_length(&path).unwrap(), 250);
    }
}
