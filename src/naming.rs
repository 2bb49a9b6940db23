//! Paired-end naming convention inference.
//!
//! Two things have to be learned from the first mate pair of a batch before
//! hits from one mate can be mapped onto the other:
//!
//! - the literal filename difference between the mates (`sample_1.fastq` vs
//!   `sample_2.fastq` differ by `_1` / `_2`), used to derive a partner's basename;
//! - the suffix each mate appends to the shared read identifier in its headers
//!   (`read42/1` vs `read42/2`), possibly empty.
//!
//! The convention is computed once and never mutated. Every further pair of the
//! batch is validated against it with [`NamingConvention::pair_files`].

use anyhow::Result;
use std::path::{Path, PathBuf};

use crate::error::PipelineError;
use crate::seqio::{FastaReader, FastqFile, SeqFormat};

/// Which end of the fragment a mate file holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MateRole {
    First,
    Second,
}

impl MateRole {
    pub fn other(self) -> Self {
        match self {
            MateRole::First => MateRole::Second,
            MateRole::Second => MateRole::First,
        }
    }
}

/// Literal substring that distinguishes the two mate filenames.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilenameDelta {
    pub first: String,
    pub second: String,
}

impl FilenameDelta {
    fn token(&self, role: MateRole) -> &str {
        match role {
            MateRole::First => &self.first,
            MateRole::Second => &self.second,
        }
    }
}

/// Suffixes appended to the shared read identifier by each mate ("" when none).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeaderSuffixes {
    pub first: String,
    pub second: String,
}

impl HeaderSuffixes {
    pub fn none() -> Self {
        Self {
            first: String::new(),
            second: String::new(),
        }
    }

    pub fn is_none(&self) -> bool {
        self.first.is_empty() && self.second.is_empty()
    }

    pub fn for_role(&self, role: MateRole) -> &str {
        match role {
            MateRole::First => &self.first,
            MateRole::Second => &self.second,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamingConvention {
    pub filename_delta: FilenameDelta,
    pub header_suffixes: HeaderSuffixes,
}

const NAME_SEPARATORS: &[u8] = b"_.-";
const HEADER_SEPARATORS: &[u8] = b"/_.:";

impl NamingConvention {
    /// Infers the convention from the two files of the first mate pair.
    ///
    /// The files may be given in either order; the mate whose designator ends
    /// in `1` becomes the first mate. Fails with `PipelineError::PairingInference`
    /// when the filenames or the first headers do not look like a mate pair.
    pub fn infer(mate_a: &Path, mate_b: &Path) -> Result<Self> {
        let name_a = basename(mate_a)?;
        let name_b = basename(mate_b)?;
        let (filename_delta, swapped) = infer_filename_delta(&name_a, &name_b)?;

        let (first_path, second_path) = if swapped {
            (mate_b, mate_a)
        } else {
            (mate_a, mate_b)
        };
        let first_id = first_record_id(first_path)?;
        let second_id = first_record_id(second_path)?;
        let header_suffixes = infer_header_suffixes(&first_id, &second_id)?;

        log::info!(
            "Mate naming: files '{}'/'{}', header suffixes '{}'/'{}'",
            filename_delta.first,
            filename_delta.second,
            header_suffixes.first,
            header_suffixes.second
        );

        Ok(Self {
            filename_delta,
            header_suffixes,
        })
    }

    /// Role of a mate file, judged by which delta token its basename carries.
    pub fn role_of(&self, basename: &str) -> Option<MateRole> {
        let first = find_token(basename, &self.filename_delta.first);
        let second = find_token(basename, &self.filename_delta.second);
        match (first, second) {
            (Some(a), Some(b)) if b > a => Some(MateRole::Second),
            (Some(_), _) => Some(MateRole::First),
            (None, Some(_)) => Some(MateRole::Second),
            (None, None) => None,
        }
    }

    /// Basename of the partner mate file, derived through the filename delta.
    pub fn partner_basename(&self, basename: &str) -> Option<String> {
        let role = self.role_of(basename)?;
        let from = self.filename_delta.token(role);
        let to = self.filename_delta.token(role.other());
        let pos = find_token(basename, from)?;
        Some(format!("{}{}{}", &basename[..pos], to, &basename[pos + from.len()..]))
    }

    /// Strips the mate-specific suffix from a read identifier.
    ///
    /// Identifiers that do not carry the suffix are returned unchanged.
    pub fn canonical_id<'a>(&self, id: &'a str, role: MateRole) -> &'a str {
        let suffix = self.header_suffixes.for_role(role);
        if suffix.is_empty() {
            return id;
        }
        id.strip_suffix(suffix).unwrap_or(id)
    }

    /// Checks that `mate_b` is the partner of `mate_a` under this convention.
    pub fn validate_pair(&self, mate_a: &Path, mate_b: &Path) -> Result<()> {
        let name_a = basename(mate_a)?;
        let name_b = basename(mate_b)?;
        match self.partner_basename(&name_a) {
            Some(partner) if partner == name_b => Ok(()),
            Some(partner) => Err(PipelineError::pairing(format!(
                "{} is not the mate of {} (expected {})",
                name_b, name_a, partner
            ))
            .into()),
            None => Err(PipelineError::pairing(format!(
                "{} carries neither '{}' nor '{}'",
                name_a, self.filename_delta.first, self.filename_delta.second
            ))
            .into()),
        }
    }

    /// Groups a batch of input files into (first mate, second mate) pairs.
    ///
    /// Every file must carry a mate designator and its partner must also be
    /// part of the batch; anything else is a pairing error.
    pub fn pair_files(&self, files: &[PathBuf]) -> Result<Vec<(PathBuf, PathBuf)>> {
        let mut pairs = Vec::new();
        for file in files {
            let name = basename(file)?;
            let role = self.role_of(&name).ok_or_else(|| {
                PipelineError::pairing(format!(
                    "{} carries neither '{}' nor '{}'",
                    name, self.filename_delta.first, self.filename_delta.second
                ))
            })?;
            let partner_name = self.partner_basename(&name).unwrap_or_default();
            let partner = files
                .iter()
                .find(|f| f.file_name().and_then(|n| n.to_str()) == Some(partner_name.as_str()))
                .ok_or_else(|| {
                    PipelineError::pairing(format!(
                        "mate {} of {} is not among the input files",
                        partner_name, name
                    ))
                })?;
            if role == MateRole::First {
                self.validate_pair(file, partner)?;
                pairs.push((file.clone(), partner.clone()));
            }
        }
        Ok(pairs)
    }
}

/// File name component of a path as an owned string.
pub fn basename(path: &Path) -> Result<String> {
    path.file_name()
        .and_then(|n| n.to_str())
        .map(str::to_string)
        .ok_or_else(|| anyhow::anyhow!("Not a file path: {}", path.display()))
}

/// File name without its last extension (`S_1.fastq` → `S_1`).
pub fn file_stem(path: &Path) -> Result<String> {
    path.file_stem()
        .and_then(|n| n.to_str())
        .map(str::to_string)
        .ok_or_else(|| anyhow::anyhow!("Not a file path: {}", path.display()))
}

/// Last position of `token` in `name` that is not followed by another digit.
fn find_token(name: &str, token: &str) -> Option<usize> {
    if token.is_empty() {
        return None;
    }
    name.match_indices(token)
        .map(|(pos, _)| pos)
        .filter(|&pos| {
            name.as_bytes()
                .get(pos + token.len())
                .map_or(true, |b| !b.is_ascii_digit())
        })
        .last()
}

fn common_prefix_len(a: &str, b: &str) -> usize {
    let mut len = a
        .bytes()
        .zip(b.bytes())
        .take_while(|(x, y)| x == y)
        .count();
    while !a.is_char_boundary(len) {
        len -= 1;
    }
    len
}

fn common_suffix_len(a: &str, b: &str, limit: usize) -> usize {
    let mut len = a
        .bytes()
        .rev()
        .zip(b.bytes().rev())
        .take_while(|(x, y)| x == y)
        .count()
        .min(limit);
    while !a.is_char_boundary(a.len() - len) {
        len -= 1;
    }
    len
}

/// Splits a mate designator into its stem and trailing ASCII digit.
fn split_designator(delta: &str) -> Option<(&str, u8)> {
    let stem = delta.strip_suffix(|c: char| c.is_ascii_digit())?;
    Some((stem, delta.as_bytes()[stem.len()]))
}

/// Computes the filename delta; the returned flag is true when `b` is the first mate.
fn infer_filename_delta(a: &str, b: &str) -> Result<(FilenameDelta, bool)> {
    if a == b {
        return Err(PipelineError::pairing(format!("mate files have the same name {}", a)).into());
    }

    let mut prefix = common_prefix_len(a, b);
    let suffix = common_suffix_len(a, b, a.len().min(b.len()) - prefix);
    if prefix == 0 && suffix == 0 {
        return Err(PipelineError::pairing(format!(
            "{} and {} share no common filename structure",
            a, b
        ))
        .into());
    }

    // Pull designator letters and their separator into the delta: "_R1", "_1"
    let bytes = a.as_bytes();
    let mut start = prefix;
    while start > 0 && bytes[start - 1].is_ascii_alphabetic() {
        start -= 1;
    }
    if start > 0 && NAME_SEPARATORS.contains(&bytes[start - 1]) {
        prefix = start - 1;
    } else if prefix > 0 && NAME_SEPARATORS.contains(&bytes[prefix - 1]) {
        prefix -= 1;
    }

    let delta_a = &a[prefix..a.len() - suffix];
    let delta_b = &b[prefix..b.len() - suffix];

    let (Some((stem_a, ordinal_a)), Some((stem_b, ordinal_b))) =
        (split_designator(delta_a), split_designator(delta_b))
    else {
        return Err(PipelineError::pairing(format!(
            "{} and {} are not numbered as mates 1 and 2 ('{}' vs '{}')",
            a, b, delta_a, delta_b
        ))
        .into());
    };
    if stem_a != stem_b {
        return Err(PipelineError::pairing(format!(
            "{} and {} differ by more than a mate designator ('{}' vs '{}')",
            a, b, delta_a, delta_b
        ))
        .into());
    }

    match (ordinal_a, ordinal_b) {
        (b'1', b'2') => Ok((
            FilenameDelta {
                first: delta_a.to_string(),
                second: delta_b.to_string(),
            },
            false,
        )),
        (b'2', b'1') => Ok((
            FilenameDelta {
                first: delta_b.to_string(),
                second: delta_a.to_string(),
            },
            true,
        )),
        _ => Err(PipelineError::pairing(format!(
            "{} and {} are not numbered as mates 1 and 2 ('{}' vs '{}')",
            a, b, delta_a, delta_b
        ))
        .into()),
    }
}

/// Splits two first-record identifiers into a shared prefix and per-mate suffixes.
fn infer_header_suffixes(first: &str, second: &str) -> Result<HeaderSuffixes> {
    if first == second {
        return Ok(HeaderSuffixes::none());
    }

    let mut prefix = common_prefix_len(first, second);
    if prefix == 0 {
        return Err(PipelineError::pairing(format!(
            "first reads '{}' and '{}' share no identifier prefix",
            first, second
        ))
        .into());
    }

    let both_suffixed = prefix < first.len() && prefix < second.len();
    if both_suffixed && HEADER_SEPARATORS.contains(&first.as_bytes()[prefix - 1]) {
        prefix -= 1;
    }

    Ok(HeaderSuffixes {
        first: first[prefix..].to_string(),
        second: second[prefix..].to_string(),
    })
}

/// Identifier of the first record of a FASTQ or FASTA file.
fn first_record_id(path: &Path) -> Result<String> {
    let id = match SeqFormat::detect(path)? {
        Some(SeqFormat::Fastq) => FastqFile::open(path)?
            .read_next()?
            .map(|r| r.id().to_string()),
        Some(SeqFormat::Fasta) => FastaReader::open(path)?
            .read_next()?
            .map(|r| r.id().to_string()),
        None => None,
    };
    id.ok_or_else(|| {
        PipelineError::pairing(format!("{} contains no sequence records", path.display())).into()
    })
}
