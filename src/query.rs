//! Query engine
//!
//! Read-only views over all loaded sessions: checkpoint search and storage
//! statistics. Results are derived on demand and never persisted.

use chrono::{DateTime, Utc};
use glob::Pattern;
use std::collections::BTreeSet;
use std::sync::Arc;

use crate::chain::{CheckpointRecord, RecordKind};
use crate::error::{EngineError, EngineResult};
use crate::session::SessionManager;

/// Filter for checkpoint search
///
/// All set filters must match; unset filters match everything. Patterns use
/// glob syntax (`src/**/*.rs`).
#[derive(Debug, Clone, Default)]
pub struct SearchQuery {
    key_pattern: Option<Pattern>,
    name_pattern: Option<Pattern>,
    after: Option<DateTime<Utc>>,
    before: Option<DateTime<Utc>>,
    tags: BTreeSet<String>,
    vcs_branch: Option<String>,
    vcs_commit: Option<String>,
    limit: Option<usize>,
}

impl SearchQuery {
    /// Create an empty query matching every checkpoint
    pub fn new() -> Self {
        Self::default()
    }

    /// Match chain keys against a glob pattern
    pub fn with_key_pattern(mut self, pattern: &str) -> EngineResult<Self> {
        self.key_pattern = Some(Self::parse_pattern(pattern)?);
        Ok(self)
    }

    /// Match checkpoint names against a glob pattern (unnamed records never match)
    pub fn with_name_pattern(mut self, pattern: &str) -> EngineResult<Self> {
        self.name_pattern = Some(Self::parse_pattern(pattern)?);
        Ok(self)
    }

    /// Only checkpoints created at or after the given time
    pub fn created_after(mut self, t: DateTime<Utc>) -> Self {
        self.after = Some(t);
        self
    }

    /// Only checkpoints created at or before the given time
    pub fn created_before(mut self, t: DateTime<Utc>) -> Self {
        self.before = Some(t);
        self
    }

    /// Require a tag; repeat to require several
    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.insert(tag.into());
        self
    }

    /// Only checkpoints recorded on the given branch
    pub fn with_vcs_branch(mut self, branch: impl Into<String>) -> Self {
        self.vcs_branch = Some(branch.into());
        self
    }

    /// Only checkpoints recorded at the given commit
    pub fn with_vcs_commit(mut self, commit: impl Into<String>) -> Self {
        self.vcs_commit = Some(commit.into());
        self
    }

    /// Cap the number of results
    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    fn parse_pattern(pattern: &str) -> EngineResult<Pattern> {
        Pattern::new(pattern)
            .map_err(|e| EngineError::invalid_input(format!("invalid pattern '{}': {}", pattern, e)))
    }

    fn matches(&self, record: &CheckpointRecord) -> bool {
        if let Some(pattern) = &self.key_pattern {
            if !pattern.matches(&record.chain_key) {
                return false;
            }
        }
        if let Some(pattern) = &self.name_pattern {
            match &record.name {
                Some(name) if pattern.matches(name) => {}
                _ => return false,
            }
        }
        if let Some(after) = self.after {
            if record.created_at < after {
                return false;
            }
        }
        if let Some(before) = self.before {
            if record.created_at > before {
                return false;
            }
        }
        if !self.tags.is_subset(&record.tags) {
            return false;
        }
        if self.vcs_branch.is_some() || self.vcs_commit.is_some() {
            let Some(vcs) = &record.vcs_ref else {
                return false;
            };
            if let Some(branch) = &self.vcs_branch {
                if &vcs.branch != branch {
                    return false;
                }
            }
            if let Some(commit) = &self.vcs_commit {
                if &vcs.commit != commit {
                    return false;
                }
            }
        }
        true
    }
}

/// One search result
#[derive(Debug, Clone)]
pub struct SearchHit {
    pub session_id: String,
    pub record: CheckpointRecord,
}

/// Storage statistics for one chain
#[derive(Debug, Clone)]
pub struct ChainStats {
    pub session_id: String,
    pub key: String,
    pub records: usize,
    pub full_records: usize,
    pub stored_bytes: u64,
    pub raw_bytes: u64,
}

/// Aggregate storage statistics across all loaded sessions
#[derive(Debug, Clone, Default)]
pub struct EngineStats {
    pub sessions: usize,
    pub chains: usize,
    pub records: usize,
    pub full_records: usize,
    pub diff_records: usize,
    pub compressed_records: usize,
    /// Bytes actually stored (post-compression)
    pub stored_bytes: u64,
    /// Bytes before compression
    pub raw_bytes: u64,
    pub earliest: Option<DateTime<Utc>>,
    pub latest: Option<DateTime<Utc>>,
    pub per_chain: Vec<ChainStats>,
}

impl EngineStats {
    /// Stored bytes as a fraction of raw bytes (1.0 = no savings)
    pub fn compression_ratio(&self) -> f64 {
        if self.raw_bytes == 0 {
            return 1.0;
        }
        self.stored_bytes as f64 / self.raw_bytes as f64
    }
}

/// Read-only query surface over the session manager
pub struct QueryEngine {
    manager: Arc<SessionManager>,
}

impl QueryEngine {
    /// Create a query engine over a session manager
    pub fn new(manager: Arc<SessionManager>) -> Self {
        Self { manager }
    }

    /// Search checkpoints across all loaded sessions, newest first
    pub async fn search(&self, query: &SearchQuery) -> EngineResult<Vec<SearchHit>> {
        let mut hits = Vec::new();
        for (session_id, session) in self.manager.session_handles().await {
            let session = session.read().await;
            for chain in session.chain_handles() {
                let chain = chain.lock().await;
                for record in chain.records() {
                    if query.matches(record) {
                        hits.push(SearchHit {
                            session_id: session_id.clone(),
                            record: record.clone(),
                        });
                    }
                }
            }
        }

        hits.sort_by(|a, b| b.record.created_at.cmp(&a.record.created_at));
        if let Some(limit) = query.limit {
            hits.truncate(limit);
        }
        Ok(hits)
    }

    /// Compute aggregate statistics with a per-chain breakdown
    pub async fn stats(&self) -> EngineResult<EngineStats> {
        let mut stats = EngineStats::default();
        for (session_id, session) in self.manager.session_handles().await {
            stats.sessions += 1;
            let session = session.read().await;
            for chain in session.chain_handles() {
                let chain = chain.lock().await;
                let mut per_chain = ChainStats {
                    session_id: session_id.clone(),
                    key: chain.key().to_string(),
                    records: chain.len(),
                    full_records: 0,
                    stored_bytes: 0,
                    raw_bytes: 0,
                };

                for record in chain.records() {
                    match record.kind() {
                        RecordKind::Full => {
                            stats.full_records += 1;
                            per_chain.full_records += 1;
                        }
                        RecordKind::Diff => stats.diff_records += 1,
                    }
                    if record.compressed {
                        stats.compressed_records += 1;
                    }
                    per_chain.stored_bytes += record.size_bytes;
                    per_chain.raw_bytes += record.raw_bytes;

                    stats.earliest = Some(match stats.earliest {
                        Some(t) => t.min(record.created_at),
                        None => record.created_at,
                    });
                    stats.latest = Some(match stats.latest {
                        Some(t) => t.max(record.created_at),
                        None => record.created_at,
                    });
                }

                stats.chains += 1;
                stats.records += per_chain.records;
                stats.stored_bytes += per_chain.stored_bytes;
                stats.raw_bytes += per_chain.raw_bytes;
                stats.per_chain.push(per_chain);
            }
        }
        Ok(stats)
    }
}
