//! fARGene - Fragmented Antibiotic Resistance Gene iENntifiEr
//!
//! Finds genes matching a profile HMM in genomes and in paired-end
//! metagenomic reads, then reconstructs full-length genes from the hits.
//!
//! # Modules
//! - `seqio`: FASTA/FASTQ file I/O with gzip support
//! - `naming`: Paired-end file and header naming convention inference
//! - `translate`: Six-frame translation
//! - `hmmer`: hmmsearch domain table parsing
//! - `classifier`: Hit classification and hit-list files
//! - `tools`: External tools (hmmsearch, trim_galore, metaSPAdes) and cancellation
//! - `orf`: ORF prediction backends (Prodigal, ORFfinder) and ORF retrieval
//! - `worker`: Per-file search tasks and the worker pool
//! - `merge`: Hit dictionary merge across mate files
//! - `retrieve`: Mate and sequence retrieval
//! - `elongation`: Hit region extraction and elongation
//! - `stages`: Downstream stage chain
//! - `summary`: Results summary
//! - `config`: Run configuration and model catalog
//! - `error`: Pipeline error taxonomy
//! - `logging`: Logger setup
//! - `pipeline`: Top-level orchestration

pub mod seqio;
pub mod naming;
pub mod translate;
pub mod hmmer;
pub mod classifier;
pub mod tools;
pub mod orf;
pub mod worker;
pub mod merge;
pub mod retrieve;
pub mod elongation;
pub mod stages;
pub mod summary;
pub mod config;
pub mod error;
pub mod logging;
pub mod pipeline;
