//! Typed errors for conditions callers need to match on.
//!
//! Everything else travels as `anyhow::Error`; these types are wrapped
//! into it and can be recovered with `downcast_ref`.

use thiserror::Error;

/// Configuration and input validation errors. All are fatal.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum TriageError {
    #[error("invalid repository '{0}': expected 'owner/name'")]
    InvalidRepo(String),

    #[error(
        "invalid truncation: target {target} dims must be > 0 and <= native {native} dims \
         (fix embedding.truncate_dims in config)"
    )]
    InvalidTruncation { target: usize, native: usize },

    #[error("invalid vision thresholds: need 0 <= drifting ({drifting}) <= aligned ({aligned}) <= 1")]
    InvalidThresholds { aligned: f64, drifting: f64 },

    #[error("invalid scoring weights: {0}")]
    InvalidWeights(String),
}

/// Vector store governance errors.
///
/// These indicate the embedding backend changed underneath an existing
/// store. They are never auto-healed; the message names the command that
/// fixes them.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum StoreError {
    #[error(
        "embedding dimension mismatch: store holds {expected}-dim vectors, got {actual}. \
         Run `triage embed reset` and then `triage embed rebuild` to re-embed with the new provider"
    )]
    DimensionMismatch { expected: usize, actual: usize },

    #[error(
        "embedding model changed: store was built with '{stored}', config uses '{configured}'. \
         Run `triage embed reset` and then `triage embed rebuild`, or restore the previous model"
    )]
    EmbeddingModelChanged { stored: String, configured: String },

    #[error(
        "embedding truncation changed: store was built with {stored:?} dims kept, config asks for {configured:?}. \
         Run `triage embed reset` and then `triage embed rebuild`"
    )]
    TruncationChanged {
        stored: Option<usize>,
        configured: Option<usize>,
    },

    #[error("unknown item {0}: run `triage scan` first")]
    UnknownItem(String),
}
