//! Hit dictionary merge.
//!
//! Folds the hit lists of every worker into one [`FastqDictionary`]: for each
//! mate file, the canonical ids of the reads to pull out of it. A hit found in
//! one mate is registered for its partner too, so both ends of every fragment
//! reach the assembler.

use anyhow::{Context, Result};
use rustc_hash::{FxHashMap, FxHashSet};

use crate::classifier::{self, HitRecord};
use crate::naming::NamingConvention;
use crate::worker::WorkerResult;

/// Mate-file basename -> canonical ids to retrieve from that file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FastqDictionary {
    entries: FxHashMap<String, FxHashSet<String>>,
}

impl FastqDictionary {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers the hits of one mate file under it and under its partner.
    ///
    /// Returns the number of ids that were new for `basename`.
    pub fn add_hits(&mut self, basename: &str, hits: &[HitRecord], convention: &NamingConvention) -> Result<usize> {
        let role = convention
            .role_of(basename)
            .with_context(|| format!("{} is not a mate file of this batch", basename))?;
        let partner = convention
            .partner_basename(basename)
            .with_context(|| format!("No partner file name for {}", basename))?;

        let canonical: Vec<String> = hits
            .iter()
            .map(|hit| convention.canonical_id(hit.source_id(), role).to_string())
            .collect();

        let own = self.entries.entry(basename.to_string()).or_default();
        let added = canonical.iter().filter(|id| own.insert((*id).clone())).count();
        self.entries.entry(partner).or_default().extend(canonical);
        Ok(added)
    }

    pub fn ids_for(&self, basename: &str) -> Option<&FxHashSet<String>> {
        self.entries.get(basename)
    }

    /// Basenames with at least one registered id.
    pub fn basenames(&self) -> impl Iterator<Item = &str> {
        self.entries
            .iter()
            .filter(|(_, ids)| !ids.is_empty())
            .map(|(name, _)| name.as_str())
    }

    pub fn is_empty(&self) -> bool {
        self.entries.values().all(|ids| ids.is_empty())
    }

    /// Total number of registered (basename, id) entries.
    pub fn len(&self) -> usize {
        self.entries.values().map(|ids| ids.len()).sum()
    }
}

/// Builds the dictionary from every completed worker.
///
/// Must only be called once the whole pool has joined.
pub fn merge_results(results: &[WorkerResult], convention: &NamingConvention) -> Result<FastqDictionary> {
    let mut dictionary = FastqDictionary::new();
    for result in results {
        let hits = classifier::read_hit_file(&result.hit_file)?;
        let added = dictionary.add_hits(&result.basename, &hits, convention)?;
        log::info!("{}: {} hits, {} distinct reads", result.basename, hits.len(), added);
    }
    Ok(dictionary)
}
