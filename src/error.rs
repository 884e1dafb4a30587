//! Terminal error taxonomy for the pipeline.
//!
//! Everything that ends a session funnels through [`PipelineError`]: the
//! orchestrator converts it into `PatchSession(status = error)` plus a
//! matching progress record. Ledger parse failures never reach this type;
//! they are recovered locally and surface as risk flags.

use miette::Diagnostic;
use thiserror::Error;

use crate::model::ModelError;
use crate::retrieval::RetrieverError;
use crate::store::StoreError;

/// A failure that terminates a session.
#[derive(Debug, Error, Diagnostic)]
pub enum PipelineError {
    /// Model backend transport failure (HTTP, SSE, malformed body).
    #[error(transparent)]
    #[diagnostic(transparent)]
    Model(#[from] ModelError),

    /// Retriever backend failure.
    #[error(transparent)]
    #[diagnostic(transparent)]
    Retriever(#[from] RetrieverError),

    /// Session store failure.
    #[error(transparent)]
    #[diagnostic(transparent)]
    Store(#[from] StoreError),

    /// The session was cancelled by the user or the system.
    #[error("cancelled")]
    #[diagnostic(code(veriweave::pipeline::cancelled))]
    Cancelled,

    /// The per-session wall clock expired.
    #[error("session timed out after {seconds}s")]
    #[diagnostic(
        code(veriweave::pipeline::timeout),
        help("Raise SESSION_TIMEOUT_SECS or reduce retrieval/model latency.")
    )]
    TimedOut { seconds: u64 },

    /// A spawned pipeline task failed to join.
    #[error("pipeline task failure: {message}")]
    #[diagnostic(code(veriweave::pipeline::join))]
    Internal { message: String },
}

impl PipelineError {
    /// True when this failure represents a cancellation, which callers
    /// must keep distinguishable from transport errors.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(
            self,
            Self::Cancelled | Self::Model(ModelError::Cancelled)
        )
    }
}
