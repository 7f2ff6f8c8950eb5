//! Storage backends for checkpoint persistence
//!
//! The engine persists two kinds of documents per session: a summary record
//! and, per chain, an ordered list of checkpoint records. Backends are
//! swappable behind [`StorageBackend`]; a disk implementation and an
//! in-memory implementation (for tests) are provided.

mod file;
mod memory;

pub use file::FileStorageBackend;
pub use memory::MemoryStorageBackend;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::chain::CheckpointChain;
use crate::error::EngineResult;

/// Persisted session summary
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSummary {
    /// Unique session identifier
    pub id: String,

    /// Creation timestamp
    pub created_at: DateTime<Utc>,

    /// Last modification timestamp; drives expiry and eviction ordering
    pub updated_at: DateTime<Utc>,

    /// Edits between automatic checkpoints for this session
    pub auto_checkpoint_interval: u32,

    /// Associated VCS branch (opaque metadata)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vcs_branch: Option<String>,
}

impl SessionSummary {
    /// Create a new summary with a generated ID
    pub fn new(auto_checkpoint_interval: u32, vcs_branch: Option<String>) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            created_at: now,
            updated_at: now,
            auto_checkpoint_interval,
            vcs_branch,
        }
    }

    /// Update the modification timestamp
    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

/// Trait for checkpoint storage backends
///
/// `save_chain` has replace semantics: the persisted record list for the
/// chain is overwritten wholesale, which covers delete/merge/compact
/// rewrites without backend-specific mutation operations.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Persist a session summary
    async fn save_summary(&self, summary: &SessionSummary) -> EngineResult<()>;

    /// Load a session summary by ID
    async fn load_summary(&self, session_id: &str) -> EngineResult<Option<SessionSummary>>;

    /// List all persisted session summaries
    async fn list_summaries(&self) -> EngineResult<Vec<SessionSummary>>;

    /// Persist a chain (records, cursor, edit counter) for a session
    async fn save_chain(&self, session_id: &str, chain: &CheckpointChain) -> EngineResult<()>;

    /// Load all chains of a session
    async fn load_chains(&self, session_id: &str) -> EngineResult<Vec<CheckpointChain>>;

    /// Delete a session and everything it contains
    async fn delete_session(&self, session_id: &str) -> EngineResult<()>;
}

/// Stable directory/file name for a chain key
pub(crate) fn chain_ref(key: &str) -> String {
    use std::collections::hash_map::DefaultHasher;
    use std::hash::{Hash, Hasher};

    let mut hasher = DefaultHasher::new();
    key.hash(&mut hasher);
    format!("{:016x}", hasher.finish())
}
