//! Sequence I/O Module
//!
//! Provides streaming readers and writers for biological sequence files.
//! Supports both FASTA and FASTQ formats, including gzip-compressed input.
//!
//! # Supported Formats
//! - FASTA: Standard sequence format with header and sequence lines
//! - FASTQ: Sequence format with quality scores (plain or gzipped)
//!
//! # Examples
//! ```no_run
//! use fargene::seqio::{FastaReader, FastqFile};
//!
//! // Read FASTA file (auto-detects gzip)
//! let mut reader = FastaReader::open("sequences.fasta").unwrap();
//! while let Some(record) = reader.read_next().unwrap() {
//!     println!("{}: {} bp", record.id(), record.seq.len());
//! }
//!
//! // Read FASTQ file (auto-detects gzip)
//! let mut reader = FastqFile::open("reads.fq.gz").unwrap();
//! while let Some(record) = reader.read_next().unwrap() {
//!     println!("{}: {} bp", record.id(), record.seq.len());
//! }
//! ```

use anyhow::{Context, Result};
use flate2::read::MultiGzDecoder;
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Read, Write};
use std::path::Path;

/// Opens a file for buffered reading, transparently decompressing `.gz` files.
pub fn open_buffered(path: &Path) -> Result<BufReader<Box<dyn Read + Send>>> {
    let file = File::open(path)
        .with_context(|| format!("Failed to open {}", path.display()))?;
    let is_gz = path.extension().and_then(|e| e.to_str()) == Some("gz");
    let inner: Box<dyn Read + Send> = if is_gz {
        Box::new(MultiGzDecoder::new(file))
    } else {
        Box::new(file)
    };
    Ok(BufReader::with_capacity(1024 * 1024, inner))
}

/// Returns the identifier part of a header line: text up to the first whitespace.
pub fn header_id(header: &str) -> &str {
    header.split_whitespace().next().unwrap_or("")
}

// ============================================================================
// Format detection
// ============================================================================

/// Sequence file format, detected from the first non-empty line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeqFormat {
    Fasta,
    Fastq,
}

impl SeqFormat {
    /// Sniffs the format of a (possibly gzipped) sequence file.
    ///
    /// Returns `Ok(None)` when the file is empty or starts with neither
    /// `>` nor `@`.
    pub fn detect<P: AsRef<Path>>(path: P) -> Result<Option<Self>> {
        let mut reader = open_buffered(path.as_ref())?;
        let mut line = String::new();
        loop {
            line.clear();
            if reader.read_line(&mut line)? == 0 {
                return Ok(None);
            }
            let trimmed = line.trim_start();
            if trimmed.is_empty() {
                continue;
            }
            return Ok(match trimmed.as_bytes()[0] {
                b'>' => Some(SeqFormat::Fasta),
                b'@' => Some(SeqFormat::Fastq),
                _ => None,
            });
        }
    }
}

// ============================================================================
// FASTA Format
// ============================================================================

/// A FASTA record containing the full header line and the sequence.
#[derive(Debug, Clone, PartialEq)]
pub struct FastaRecord {
    /// Header line without the leading '>' (identifier plus optional description).
    pub header: String,
    /// Sequence, concatenated from all sequence lines.
    pub seq: String,
}

impl FastaRecord {
    pub fn new(header: impl Into<String>, seq: impl Into<String>) -> Self {
        Self {
            header: header.into(),
            seq: seq.into(),
        }
    }

    /// Sequence identifier (header text up to the first whitespace).
    pub fn id(&self) -> &str {
        header_id(&self.header)
    }
}

/// Sequential reader for FASTA format files.
///
/// Reads records one at a time with minimal memory footprint.
/// Handles multi-line sequences and strips whitespace automatically.
pub struct FastaReader {
    reader: BufReader<Box<dyn Read + Send>>,
    line_buf: String,
    current_header: Option<String>,
}

impl FastaReader {
    /// Opens a FASTA file (plain or `.gz`) for reading.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let mut reader = Self {
            reader: open_buffered(path)
                .with_context(|| format!("Failed to open FASTA: {}", path.display()))?,
            line_buf: String::with_capacity(256),
            current_header: None,
        };

        // Skip to the first header line
        loop {
            reader.line_buf.clear();
            if reader.reader.read_line(&mut reader.line_buf)? == 0 {
                break;
            }
            if let Some(header) = reader.line_buf.strip_prefix('>') {
                reader.current_header = Some(header.trim_end().to_string());
                break;
            }
        }

        Ok(reader)
    }

    /// Reads the next FASTA record from the file.
    ///
    /// # Returns
    /// - `Ok(Some(record))` - Successfully read a record
    /// - `Ok(None)` - End of file reached
    /// - `Err(e)` - I/O error occurred
    pub fn read_next(&mut self) -> Result<Option<FastaRecord>> {
        let header = match self.current_header.take() {
            Some(h) => h,
            None => return Ok(None),
        };

        let mut seq = String::with_capacity(1024);

        loop {
            self.line_buf.clear();
            if self.reader.read_line(&mut self.line_buf)? == 0 {
                break;
            }

            if let Some(next) = self.line_buf.strip_prefix('>') {
                self.current_header = Some(next.trim_end().to_string());
                break;
            }
            seq.push_str(self.line_buf.trim());
        }

        Ok(Some(FastaRecord { header, seq }))
    }
}

impl Iterator for FastaReader {
    type Item = Result<FastaRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.read_next() {
            Ok(Some(record)) => Some(Ok(record)),
            Ok(None) => None,
            Err(e) => Some(Err(e)),
        }
    }
}

/// Buffered FASTA writer. Sequences are written on a single line.
pub struct FastaWriter {
    writer: BufWriter<File>,
}

impl FastaWriter {
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::create(path.as_ref())
            .with_context(|| format!("Failed to create FASTA: {}", path.as_ref().display()))?;
        Ok(Self {
            writer: BufWriter::new(file),
        })
    }

    pub fn write_record(&mut self, header: &str, seq: &str) -> Result<()> {
        writeln!(self.writer, ">{}", header)?;
        writeln!(self.writer, "{}", seq)?;
        Ok(())
    }

    pub fn finish(mut self) -> Result<()> {
        self.writer.flush()?;
        Ok(())
    }
}

/// Counts the records of a FASTA file. A missing file counts as zero.
pub fn count_fasta_records<P: AsRef<Path>>(path: P) -> Result<usize> {
    let path = path.as_ref();
    if !path.is_file() {
        return Ok(0);
    }
    let mut reader = open_buffered(path)?;
    let mut line = String::new();
    let mut count = 0;
    loop {
        line.clear();
        if reader.read_line(&mut line)? == 0 {
            break;
        }
        if line.starts_with('>') {
            count += 1;
        }
    }
    Ok(count)
}

// ============================================================================
// FASTQ Format
// ============================================================================

/// A FASTQ record containing header, nucleotide sequence, and quality scores.
#[derive(Debug, Clone, PartialEq)]
pub struct FastqRecord {
    /// Header line without the leading '@'.
    pub header: String,
    /// Nucleotide sequence.
    pub seq: String,
    /// Quality string (Phred+33 encoded).
    pub qual: String,
}

impl FastqRecord {
    /// Read identifier (header text up to the first whitespace).
    pub fn id(&self) -> &str {
        header_id(&self.header)
    }
}

/// Generic FASTQ reader supporting any Read source.
pub struct FastqReader<R: Read> {
    reader: BufReader<R>,
    line_buf: String,
}

impl<R: Read> FastqReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            reader: BufReader::with_capacity(1024 * 1024, inner),
            line_buf: String::with_capacity(512),
        }
    }

    /// Reads the next FASTQ record (4 lines per record).
    ///
    /// # FASTQ Format
    /// ```text
    /// @read_name
    /// SEQUENCE
    /// +
    /// QUALITY
    /// ```
    pub fn read_next(&mut self) -> Result<Option<FastqRecord>> {
        // Line 1: @header, tolerating blank lines between records
        let header = loop {
            self.line_buf.clear();
            if self.reader.read_line(&mut self.line_buf)? == 0 {
                return Ok(None);
            }
            let line = self.line_buf.trim_end();
            if line.is_empty() {
                continue;
            }
            match line.strip_prefix('@') {
                Some(h) => break h.to_string(),
                None => anyhow::bail!("Malformed FASTQ header: {}", line),
            }
        };

        // Line 2: sequence
        self.line_buf.clear();
        self.reader.read_line(&mut self.line_buf)?;
        let seq = self.line_buf.trim_end().to_string();

        // Line 3: + (separator, ignored)
        self.line_buf.clear();
        self.reader.read_line(&mut self.line_buf)?;

        // Line 4: quality scores
        self.line_buf.clear();
        self.reader.read_line(&mut self.line_buf)?;
        let qual = self.line_buf.trim_end().to_string();

        if seq.len() != qual.len() {
            anyhow::bail!("Truncated FASTQ record: {}", header);
        }

        Ok(Some(FastqRecord { header, seq, qual }))
    }
}

/// Auto-detecting FASTQ file reader.
///
/// Files ending in `.gz` are treated as gzip-compressed.
pub enum FastqFile {
    /// Plain text FASTQ file.
    Plain(FastqReader<File>),
    /// Gzip-compressed FASTQ file.
    Gzipped(FastqReader<MultiGzDecoder<File>>),
}

impl FastqFile {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path)
            .with_context(|| format!("Failed to open FASTQ: {}", path.display()))?;
        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");

        if ext == "gz" {
            Ok(FastqFile::Gzipped(FastqReader::new(MultiGzDecoder::new(file))))
        } else {
            Ok(FastqFile::Plain(FastqReader::new(file)))
        }
    }

    pub fn read_next(&mut self) -> Result<Option<FastqRecord>> {
        match self {
            FastqFile::Plain(r) => r.read_next(),
            FastqFile::Gzipped(r) => r.read_next(),
        }
    }
}

impl Iterator for FastqFile {
    type Item = Result<FastqRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.read_next() {
            Ok(Some(record)) => Some(Ok(record)),
            Ok(None) => None,
            Err(e) => Some(Err(e)),
        }
    }
}

/// Buffered FASTQ writer.
pub struct FastqWriter {
    writer: BufWriter<File>,
}

impl FastqWriter {
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::create(path.as_ref())
            .with_context(|| format!("Failed to create FASTQ: {}", path.as_ref().display()))?;
        Ok(Self {
            writer: BufWriter::new(file),
        })
    }

    pub fn write_record(&mut self, record: &FastqRecord) -> Result<()> {
        writeln!(self.writer, "@{}\n{}\n+\n{}", record.header, record.seq, record.qual)?;
        Ok(())
    }

    pub fn finish(mut self) -> Result<()> {
        self.writer.flush()?;
        Ok(())
    }
}

/// Converts a FASTQ file into FASTA, keeping full headers.
///
/// Returns the number of records written.
pub fn fastq_to_fasta<P: AsRef<Path>, Q: AsRef<Path>>(fastq: P, fasta: Q) -> Result<usize> {
    let mut reader = FastqFile::open(fastq.as_ref())?;
    let mut writer = FastaWriter::create(fasta.as_ref())?;
    let mut count = 0;
    while let Some(record) = reader.read_next()? {
        writer.write_record(&record.header, &record.seq)?;
        count += 1;
    }
    writer.finish()?;
    Ok(count)
}
