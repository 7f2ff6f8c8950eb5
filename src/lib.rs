//! Rewind: incremental checkpoint and rewind engine
//!
//! Records, diffs, compresses, and restores historical snapshots of text
//! resources edited by a coding agent, scoped to isolated sessions. Chains
//! store full snapshots at anchor positions and line diffs in between, so
//! any past version reconstructs exactly while storage stays bounded by
//! compaction, a global budget with session eviction, and an expiry sweep.

pub mod chain;
pub mod compression;
pub mod config;
pub mod diff;
pub mod error;
pub mod export;
pub mod maintenance;
pub mod query;
pub mod restore;
pub mod session;
pub mod storage;

// Re-export commonly used types
pub use chain::{
    CheckpointChain, CheckpointOptions, CheckpointRecord, CompactionOutcome, RecordKind,
    RecordPayload, VcsRef,
};
pub use config::EngineConfig;
pub use diff::{DiffOp, TextDiff};
pub use error::{EngineError, EngineResult};
pub use export::{ExportDocument, ExportEngine, ExportedChain};
pub use maintenance::MaintenanceEngine;
pub use query::{ChainStats, EngineStats, QueryEngine, SearchHit, SearchQuery};
pub use restore::{RestoreEngine, RestoreOptions, RestoreReport, RestoreTarget};
pub use session::{MemoryResourceAccess, ResourceAccess, Session, SessionManager};
pub use storage::{FileStorageBackend, MemoryStorageBackend, SessionSummary, StorageBackend};
