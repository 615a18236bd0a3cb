//! Error types for the distributed search pipeline.
//!
//! Every error kind here is fatal to a run: the pipeline is barrier-synchronized
//! and has no partial-failure mode, so an unrecoverable error in one participant
//! aborts all participants. Locally recoverable conditions (a worker finding no
//! objects, an empty edge list) are represented as empty collections, not errors.

use thiserror::Error;

/// Fatal pipeline errors.
///
/// Messages identify the failing rank and phase precisely enough to reproduce
/// the faulty partition or message.
#[derive(Debug, Error)]
pub enum SearchError {
    /// Malformed configuration: subdivision grid does not match the worker
    /// count, axis specifications of the wrong length, and similar.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// A computed sub-region has no valid pixels, or the global image itself
    /// is degenerate.
    #[error("domain error: {0}")]
    Domain(String),

    /// Truncated or malformed wire message.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Envelope protocol version mismatch. Always fatal, never tolerated.
    #[error("unsupported protocol version {found} (expected {expected})")]
    ProtocolVersion { found: u16, expected: u16 },

    /// Every worker reported zero-count statistics, leaving the global
    /// threshold undefined.
    #[error("aggregation error: {0}")]
    Aggregation(String),

    /// A channel peer disappeared mid-run (worker or coordinator died).
    #[error("transport failure: {0}")]
    Transport(String),
}

impl SearchError {
    /// True for both protocol error variants (malformed frame, bad version).
    pub fn is_protocol(&self) -> bool {
        matches!(
            self,
            SearchError::Protocol(_) | SearchError::ProtocolVersion { .. }
        )
    }
}
