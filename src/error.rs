//! EMM context error types

use thiserror::Error;

/// EMM context error type
#[derive(Error, Debug)]
pub enum EmmCtxError {
    /// Lookup missed all indices
    #[error("Context not found: {0}")]
    NotFound(String),

    /// Secondary-index key already maps to another context
    #[error("Duplicate {index} index entry, already mapped to UE {existing}")]
    Duplicate { index: &'static str, existing: u32 },

    /// Out-of-range key-set id, vector index, or missing required field
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Store or vector-cache allocation limit hit; existing state is intact
    #[error("Resource exhausted: {0}")]
    ResourceExhausted(&'static str),

    /// Successive authentication synchronisation failures reached the limit
    #[error("Authentication resync abandoned after {0} synchronisation failures")]
    SyncFailureTerminal(u32),

    /// Retransmission budget of a procedure timer exceeded
    #[error("Retry budget exhausted for {purpose} timer of UE {ue_id}")]
    RetryExhausted { purpose: &'static str, ue_id: u32 },
}

/// EMM context result type
pub type EmmCtxResult<T> = Result<T, EmmCtxError>;
