//! Maintenance engine
//!
//! Chain-level housekeeping: tagging, tail deletion, range merges,
//! compaction, and anchor optimization. Every operation mutates the chain
//! under its lock and persists the result before returning, so a crash
//! between calls never leaves storage ahead of or behind memory.

use std::collections::BTreeSet;
use std::sync::Arc;

use crate::chain::{CheckpointOptions, CheckpointRecord, CompactionOutcome};
use crate::error::EngineResult;
use crate::session::SessionManager;

/// Maintenance surface over the session manager
pub struct MaintenanceEngine {
    manager: Arc<SessionManager>,
}

impl MaintenanceEngine {
    /// Create a maintenance engine over a session manager
    pub fn new(manager: Arc<SessionManager>) -> Self {
        Self { manager }
    }

    /// Attach tags to a checkpoint; returns the resulting tag set
    pub async fn tag(
        &self,
        session_id: &str,
        key: &str,
        index: usize,
        tags: Vec<String>,
    ) -> EngineResult<BTreeSet<String>> {
        let chain = self.manager.chain(session_id, key).await?;
        let (tags, snapshot) = {
            let mut chain = chain.lock().await;
            let tags = chain.tag(index, tags)?.clone();
            (tags, chain.clone())
        };
        self.manager.persist_chain(session_id, &snapshot).await?;
        Ok(tags)
    }

    /// Delete the checkpoint at an index
    ///
    /// Only the tail is deletable; index 0 is protected while later records
    /// exist and empties the chain when it is the sole record.
    pub async fn delete_at(&self, session_id: &str, key: &str, index: usize) -> EngineResult<()> {
        let chain = self.manager.chain(session_id, key).await?;
        let snapshot = {
            let mut chain = chain.lock().await;
            chain.delete_at(index)?;
            chain.clone()
        };
        self.manager.persist_chain(session_id, &snapshot).await
    }

    /// Merge the inclusive checkpoint range `[from, to]` into one full snapshot
    pub async fn merge_range(
        &self,
        session_id: &str,
        key: &str,
        from: usize,
        to: usize,
        opts: &CheckpointOptions,
    ) -> EngineResult<CheckpointRecord> {
        let chain = self.manager.chain(session_id, key).await?;
        let (merged, snapshot) = {
            let mut chain = chain.lock().await;
            let merged = chain
                .merge_range(from, to, opts, self.manager.config())?
                .clone();
            (merged, chain.clone())
        };
        self.manager.persist_chain(session_id, &snapshot).await?;
        Ok(merged)
    }

    /// Compact one chain, dropping reconstructible history
    pub async fn compact(
        &self,
        session_id: &str,
        key: &str,
        keep_every_nth: usize,
        max_records: usize,
    ) -> EngineResult<CompactionOutcome> {
        let chain = self.manager.chain(session_id, key).await?;
        let (outcome, snapshot) = {
            let mut chain = chain.lock().await;
            let outcome = chain.compact(keep_every_nth, max_records, self.manager.config())?;
            (outcome, chain.clone())
        };
        if outcome.removed > 0 || outcome.rewritten > 0 {
            self.manager.persist_chain(session_id, &snapshot).await?;
        }
        Ok(outcome)
    }

    /// Compact every chain of a session with the same parameters
    pub async fn compact_session(
        &self,
        session_id: &str,
        keep_every_nth: usize,
        max_records: usize,
    ) -> EngineResult<CompactionOutcome> {
        let session = self.manager.session(session_id).await?;
        let keys = session.read().await.chain_keys();

        let mut total = CompactionOutcome::default();
        for key in keys {
            let outcome = self
                .compact(session_id, &key, keep_every_nth, max_records)
                .await?;
            total.removed += outcome.removed;
            total.rewritten += outcome.rewritten;
        }
        tracing::info!(
            session = session_id,
            removed = total.removed,
            rewritten = total.rewritten,
            "compacted session"
        );
        Ok(total)
    }

    /// Rewrite every Nth record of a chain to a full anchor
    ///
    /// Transparent to readers; returns the number of rewritten records.
    pub async fn optimize(
        &self,
        session_id: &str,
        key: &str,
        anchor_every: usize,
    ) -> EngineResult<usize> {
        let chain = self.manager.chain(session_id, key).await?;
        let (rewritten, snapshot) = {
            let mut chain = chain.lock().await;
            let rewritten = chain.optimize(anchor_every, self.manager.config())?;
            (rewritten, chain.clone())
        };
        if rewritten > 0 {
            self.manager.persist_chain(session_id, &snapshot).await?;
        }
        Ok(rewritten)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::RecordKind;
    use crate::config::EngineConfig;
    use crate::error::EngineError;
    use crate::session::MemoryResourceAccess;
    use crate::storage::{MemoryStorageBackend, StorageBackend};

    async fn setup() -> (
        MaintenanceEngine,
        Arc<SessionManager>,
        Arc<MemoryStorageBackend>,
        String,
    ) {
        let backend = Arc::new(MemoryStorageBackend::new());
        let manager = Arc::new(SessionManager::new(
            EngineConfig::default(),
            backend.clone(),
            Arc::new(MemoryResourceAccess::new()),
        ));
        let id = manager.create_session(None).await.unwrap();
        (MaintenanceEngine::new(manager.clone()), manager, backend, id)
    }

    async fn seed(manager: &SessionManager, id: &str, key: &str, versions: &[String]) {
        for content in versions {
            manager
                .create_checkpoint(id, key, content, &CheckpointOptions::new())
                .await
                .unwrap();
        }
    }

    fn versions(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("version {}\n", i)).collect()
    }

    #[tokio::test]
    async fn test_tag_persists() {
        let (engine, manager, backend, id) = setup().await;
        seed(&manager, &id, "a.txt", &versions(1)).await;

        let tags = engine
            .tag(&id, "a.txt", 0, vec!["stable".to_string()])
            .await
            .unwrap();
        assert!(tags.contains("stable"));

        let stored = backend.load_chains(&id).await.unwrap();
        assert!(stored[0].records()[0].tags.contains("stable"));
    }

    #[tokio::test]
    async fn test_delete_tail_persists() {
        let (engine, manager, backend, id) = setup().await;
        seed(&manager, &id, "a.txt", &versions(3)).await;

        engine.delete_at(&id, "a.txt", 2).await.unwrap();
        let stored = backend.load_chains(&id).await.unwrap();
        assert_eq!(stored[0].len(), 2);

        assert!(matches!(
            engine.delete_at(&id, "a.txt", 0).await,
            Err(EngineError::BaseProtected { .. })
        ));
    }

    #[tokio::test]
    async fn test_merge_range_persists() {
        let (engine, manager, backend, id) = setup().await;
        seed(&manager, &id, "a.txt", &versions(5)).await;

        let merged = engine
            .merge_range(&id, "a.txt", 1, 3, &CheckpointOptions::new().with_name("squashed"))
            .await
            .unwrap();
        assert_eq!(merged.index, 1);
        assert_eq!(merged.kind(), RecordKind::Full);

        let stored = backend.load_chains(&id).await.unwrap();
        assert_eq!(stored[0].len(), 3);
        assert_eq!(stored[0].reconstruct(1).unwrap(), "version 3\n");
        assert_eq!(stored[0].reconstruct(2).unwrap(), "version 4\n");
    }

    #[tokio::test]
    async fn test_compact_session() {
        let (engine, manager, backend, id) = setup().await;
        seed(&manager, &id, "a.txt", &versions(15)).await;
        seed(&manager, &id, "b.txt", &versions(15)).await;

        let outcome = engine.compact_session(&id, 3, 0).await.unwrap();
        assert!(outcome.removed > 0);

        for chain in backend.load_chains(&id).await.unwrap() {
            assert_eq!(chain.reconstruct(0).unwrap(), "version 0\n");
            assert_eq!(
                chain.reconstruct(chain.len() - 1).unwrap(),
                "version 14\n"
            );
        }
    }

    #[tokio::test]
    async fn test_optimize_persists() {
        let (engine, manager, backend, id) = setup().await;
        seed(&manager, &id, "a.txt", &versions(9)).await;

        let rewritten = engine.optimize(&id, "a.txt", 4).await.unwrap();
        assert_eq!(rewritten, 2);

        let stored = backend.load_chains(&id).await.unwrap();
        assert_eq!(stored[0].records()[4].kind(), RecordKind::Full);
        assert_eq!(stored[0].records()[8].kind(), RecordKind::Full);
        for i in 0..9 {
            assert_eq!(stored[0].reconstruct(i).unwrap(), format!("version {}\n", i));
        }
    }
}
