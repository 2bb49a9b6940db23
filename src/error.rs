//! Pipeline error taxonomy.
//!
//! Helper code returns `anyhow::Result` with file context. Conditions that
//! change how a run ends are raised as a `PipelineError` inside the
//! `anyhow::Error`, so callers can `downcast_ref::<PipelineError>()`.
//!
//! # Categories
//!
//! - **Configuration**: bad or missing model, threshold or input format; fatal before any work
//! - **PairingInference**: mate files without a shared naming or header convention; fatal
//! - **Cancelled**: operator abort; stops the pool without merging
//! - **MissingUpstreamOutput**: a stage's declared output does not exist; ends the stage chain
//!
//! Per-file worker failures are not errors at this level: they are collected
//! as `worker::TaskOutcome::Failed` and reported in the summary.

use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("cannot pair mate files: {0}")]
    PairingInference(String),

    #[error("run cancelled by operator")]
    Cancelled,

    #[error("{stage} did not produce its output {path:?}")]
    MissingUpstreamOutput { stage: String, path: PathBuf },
}

impl PipelineError {
    pub fn config(msg: impl Into<String>) -> Self {
        PipelineError::Configuration(msg.into())
    }

    pub fn pairing(msg: impl Into<String>) -> Self {
        PipelineError::PairingInference(msg.into())
    }

    pub fn missing_output(stage: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        PipelineError::MissingUpstreamOutput {
            stage: stage.into(),
            path: path.into(),
        }
    }

    /// Process exit status used by the binary for this error.
    pub fn exit_code(&self) -> i32 {
        match self {
            PipelineError::Cancelled => 130,
            PipelineError::Configuration(_) | PipelineError::PairingInference(_) => 2,
            PipelineError::MissingUpstreamOutput { .. } => 1,
        }
    }
}

/// True when `err` carries a `PipelineError::Cancelled`.
pub fn is_cancelled(err: &anyhow::Error) -> bool {
    matches!(err.downcast_ref::<PipelineError>(), Some(PipelineError::Cancelled))
}
