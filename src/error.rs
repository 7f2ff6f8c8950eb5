//! Error types for the checkpoint engine
//!
//! All fallible engine operations return [`EngineResult`]. The variants map
//! directly onto the failure modes a caller can act on:
//! - `NotFound`: unknown session, chain key, or checkpoint index
//! - `BaseProtected`: illegal mutation of checkpoint 0 while later entries exist
//! - `InvalidRange`: out-of-bounds or non-contiguous merge/delete
//! - `CorruptRecord`: decompression or diff application failed to reproduce
//!   the expected structure
//! - `BudgetExceeded`: eviction could not bring storage under the budget

use thiserror::Error;

/// Result type alias for engine operations
pub type EngineResult<T> = Result<T, EngineError>;

/// Main error type for the checkpoint engine
#[derive(Debug, Error)]
pub enum EngineError {
    /// Unknown session, chain key, or checkpoint index
    #[error("not found: {0}")]
    NotFound(String),

    /// Checkpoint 0 may not be deleted while later checkpoints exist
    #[error("checkpoint 0 of chain '{chain_key}' is protected while later checkpoints exist")]
    BaseProtected { chain_key: String },

    /// Out-of-bounds or non-contiguous range for merge/delete
    #[error("invalid range: {0}")]
    InvalidRange(String),

    /// Malformed caller input, such as an unparseable search pattern
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// A stored record could not be decoded back into valid content
    #[error("corrupt record: {0}")]
    CorruptRecord(String),

    /// Eviction could not bring storage usage under the configured budget
    #[error("storage budget exceeded: {used_bytes} bytes used, budget is {budget_bytes}")]
    BudgetExceeded { used_bytes: u64, budget_bytes: u64 },

    /// Storage backend failure
    #[error("storage error: {0}")]
    Storage(String),

    /// Resource access failure (caller-injected read/write callback)
    #[error("resource access error: {0}")]
    Resource(String),

    /// Serialization failure
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO failure
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl EngineError {
    /// Create a not-found error
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound(message.into())
    }

    /// Create a storage error
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage(message.into())
    }

    /// Create a corrupt-record error
    pub fn corrupt(message: impl Into<String>) -> Self {
        Self::CorruptRecord(message.into())
    }

    /// Create an invalid-range error
    pub fn invalid_range(message: impl Into<String>) -> Self {
        Self::InvalidRange(message.into())
    }

    /// Create an invalid-input error
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput(message.into())
    }

    /// Create a resource access error
    pub fn resource(message: impl Into<String>) -> Self {
        Self::Resource(message.into())
    }
}
