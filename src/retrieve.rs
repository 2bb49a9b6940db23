//! Record retrieval.
//!
//! Every retrieval streams its source file once and emits the records whose
//! identifier is in the wanted set, so output order is always source order.
//! Wanted identifiers that never show up in the source are skipped silently:
//! a partner set derived from the other mate may name reads a truncated file
//! does not hold.

use anyhow::Result;
use rustc_hash::FxHashSet;
use std::path::{Path, PathBuf};

use crate::merge::FastqDictionary;
use crate::naming::{basename, file_stem, MateRole, NamingConvention};
use crate::seqio::{FastaReader, FastaWriter, FastqFile, FastqWriter};

/// Copies the FASTA records of `source` whose id is in `ids` to `out`.
///
/// Returns the number of records written.
pub fn retrieve_fasta(ids: &FxHashSet<String>, source: &Path, out: &Path) -> Result<usize> {
    let mut writer = FastaWriter::create(out)?;
    let mut written = 0;
    for record in FastaReader::open(source)? {
        let record = record?;
        if ids.contains(record.id()) {
            writer.write_record(&record.header, &record.seq)?;
            written += 1;
        }
    }
    writer.finish()?;
    Ok(written)
}

/// Copies the FASTQ records of one mate file whose canonical id is in `ids`.
pub fn retrieve_mate(
    ids: &FxHashSet<String>,
    source: &Path,
    role: MateRole,
    convention: &NamingConvention,
    out: &Path,
) -> Result<usize> {
    let mut reader = FastqFile::open(source)?;
    let mut writer = FastqWriter::create(out)?;
    let mut written = 0;
    while let Some(record) = reader.read_next()? {
        if ids.contains(convention.canonical_id(record.id(), role)) {
            writer.write_record(&record)?;
            written += 1;
        }
    }
    writer.finish()?;
    Ok(written)
}

/// Retrieved reads of one mate pair.
#[derive(Debug, Clone, PartialEq)]
pub struct RetrievedPair {
    pub mate1: PathBuf,
    pub mate2: PathBuf,
    pub reads1: usize,
    pub reads2: usize,
}

/// Outcome of retrieval over a batch of mate pairs.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PairRetrieval {
    pub retrieved: Vec<RetrievedPair>,
    /// Mate files whose retrieval failed, with the reason. Their pair is left out.
    pub failures: Vec<(PathBuf, String)>,
}

fn retrieve_pair(
    dictionary: &FastqDictionary,
    mate1: &Path,
    mate2: &Path,
    convention: &NamingConvention,
    model_name: &str,
    out_dir: &Path,
) -> std::result::Result<Option<RetrievedPair>, (PathBuf, anyhow::Error)> {
    let empty = FxHashSet::default();
    let name1 = basename(mate1).map_err(|e| (mate1.to_path_buf(), e))?;
    let name2 = basename(mate2).map_err(|e| (mate2.to_path_buf(), e))?;
    let ids1 = dictionary.ids_for(&name1).unwrap_or(&empty);
    let ids2 = dictionary.ids_for(&name2).unwrap_or(&empty);
    if ids1.is_empty() && ids2.is_empty() {
        log::info!("No hits in {} / {}", mate1.display(), mate2.display());
        return Ok(None);
    }

    let retrieve = |mate: &Path, ids: &FxHashSet<String>, role: MateRole| -> Result<(PathBuf, usize)> {
        let out = out_dir.join(format!("{}-{}-retrieved.fastq", file_stem(mate)?, model_name));
        let n = retrieve_mate(ids, mate, role, convention, &out)?;
        Ok((out, n))
    };
    let (out1, reads1) = retrieve(mate1, ids1, MateRole::First).map_err(|e| (mate1.to_path_buf(), e))?;
    let (out2, reads2) = retrieve(mate2, ids2, MateRole::Second).map_err(|e| (mate2.to_path_buf(), e))?;
    if reads1 != reads2 {
        log::warn!(
            "Retrieved {} reads from {} but {} from its mate {}",
            reads1,
            mate1.display(),
            reads2,
            mate2.display()
        );
    }
    log::info!("Retrieved {} read pairs from {}", reads1.min(reads2), mate1.display());

    Ok(Some(RetrievedPair {
        mate1: out1,
        mate2: out2,
        reads1,
        reads2,
    }))
}

/// Extracts every registered read from the original mate files.
///
/// Pairs without any registered read are left out. Outputs are named
/// `{stem}-{model}-retrieved.fastq` in `out_dir`. A pair whose retrieval
/// fails is reported in [`PairRetrieval::failures`] and the remaining pairs
/// are still retrieved.
pub fn retrieve_paired_end(
    dictionary: &FastqDictionary,
    pairs: &[(PathBuf, PathBuf)],
    convention: &NamingConvention,
    model_name: &str,
    out_dir: &Path,
) -> PairRetrieval {
    let mut batch = PairRetrieval::default();
    for (mate1, mate2) in pairs {
        match retrieve_pair(dictionary, mate1, mate2, convention, model_name, out_dir) {
            Ok(Some(pair)) => batch.retrieved.push(pair),
            Ok(None) => {}
            Err((file, e)) => {
                let reason = format!("{:#}", e);
                log::error!("Retrieval from {} failed: {}", file.display(), reason);
                batch.failures.push((file, reason));
            }
        }
    }
    batch
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::naming::{FilenameDelta, HeaderSuffixes};
    use crate::seqio::FastqRecord;
    use std::fs;
    use tempfile::TempDir;

    fn slash_convention() -> NamingConvention {
        NamingConvention {
            filename_delta: FilenameDelta {
                first: "_1".into(),
                second: "_2".into(),
            },
            header_suffixes: HeaderSuffixes {
                first: "/1".into(),
                second: "/2".into(),
            },
        }
    }

    fn read_all(path: &Path) -> Vec<FastqRecord> {
        FastqFile::open(path).unwrap().collect::<Result<_>>().unwrap()
    }

    #[test]
    fn test_retrieve_mate_preserves_source_order() {
        let dir = TempDir::new().unwrap();
        let src = dir.path().join("S_2.fastq");
        let out = dir.path().join("out.fastq");
        let ids_in_file = ["r5", "r1", "r9", "r3", "r7"];
        let body: String = ids_in_file
            .iter()
            .map(|id| format!("@{}/2 extra\nACGT\n+\nIIII\n", id))
            .collect();
        fs::write(&src, body).unwrap();

        // Dictionary iteration order is irrelevant; "r4" is not in the file
        let wanted: FxHashSet<String> = ["r7", "r4", "r1", "r9"].iter().map(|s| s.to_string()).collect();
        let n = retrieve_mate(&wanted, &src, MateRole::Second, &slash_convention(), &out).unwrap();
        assert_eq!(n, 3);

        let got: Vec<String> = read_all(&out).iter().map(|r| r.id().to_string()).collect();
        assert_eq!(got, vec!["r1/2", "r9/2", "r7/2"]);
        // Full records, description included
        assert_eq!(read_all(&out)[0].header, "r1/2 extra");
    }

    #[test]
    fn test_retrieve_fasta_by_id() {
        let dir = TempDir::new().unwrap();
        let src = dir.path().join("g.fasta");
        let out = dir.path().join("hits.fasta");
        fs::write(&src, ">a desc\nAAA\n>b\nCCC\n>c\nGGG\n").unwrap();
        let wanted: FxHashSet<String> = ["c", "a"].iter().map(|s| s.to_string()).collect();
        assert_eq!(retrieve_fasta(&wanted, &src, &out).unwrap(), 2);
        assert_eq!(fs::read_to_string(&out).unwrap(), ">a desc\nAAA\n>c\nGGG\n");
    }

    #[test]
    fn test_failed_pair_does_not_stop_the_batch() {
        let dir = TempDir::new().unwrap();
        let conv = slash_convention();
        let write = |name: &str, body: &str| {
            let path = dir.path().join(name);
            fs::write(&path, body).unwrap();
            path
        };
        // Second record of A_1 is truncated
        let a1 = write("A_1.fastq", "@r1/1\nACGT\n+\nIIII\n@r2/1\nACGT\n+\nII\n");
        let a2 = write("A_2.fastq", "@r1/2\nACGT\n+\nIIII\n@r2/2\nACGT\n+\nIIII\n");
        let b1 = write("B_1.fastq", "@r8/1\nACGT\n+\nIIII\n");
        let b2 = write("B_2.fastq", "@r8/2\nACGT\n+\nIIII\n");

        let mut dict = FastqDictionary::new();
        let hit = |target: &str| crate::classifier::HitRecord {
            target: target.to_string(),
            score: 50.0,
            span: None,
        };
        dict.add_hits("A_2.fastq", &[hit("r2/2_1")], &conv).unwrap();
        dict.add_hits("B_1.fastq", &[hit("r8/1_1")], &conv).unwrap();

        let out = dir.path().join("out");
        fs::create_dir(&out).unwrap();
        let batch = retrieve_paired_end(&dict, &[(a1.clone(), a2), (b1, b2)], &conv, "m", &out);

        assert_eq!(batch.failures.len(), 1);
        assert_eq!(batch.failures[0].0, a1);
        assert!(batch.failures[0].1.contains("Truncated"));
        assert_eq!(batch.retrieved.len(), 1);
        assert_eq!(batch.retrieved[0].reads1, 1);
        assert_eq!(read_all(&batch.retrieved[0].mate2)[0].header, "r8/2");
    }
}
