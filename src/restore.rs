//! Restore engine
//!
//! Reconstructs checkpointed content and writes it back through the
//! injected resource accessor, with dry-run and pre-restore backup support.

use chrono::{DateTime, Utc};
use std::sync::Arc;

use crate::chain::CheckpointOptions;
use crate::error::{EngineError, EngineResult};
use crate::session::{ResourceAccess, SessionManager};

/// Options controlling a restore
#[derive(Debug, Clone, Copy, Default)]
pub struct RestoreOptions {
    /// Reconstruct and return content without writing it back
    pub dry_run: bool,
    /// Snapshot the current resource content as a full checkpoint first
    pub backup: bool,
}

impl RestoreOptions {
    /// Create default options (write back, no backup)
    pub fn new() -> Self {
        Self::default()
    }

    /// Reconstruct only, never write
    pub fn dry_run(mut self) -> Self {
        self.dry_run = true;
        self
    }

    /// Take a pre-restore backup checkpoint before writing
    pub fn with_backup(mut self) -> Self {
        self.backup = true;
        self
    }
}

/// One chain/index pair to restore
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestoreTarget {
    pub key: String,
    pub index: usize,
}

impl RestoreTarget {
    pub fn new(key: impl Into<String>, index: usize) -> Self {
        Self {
            key: key.into(),
            index,
        }
    }
}

/// Per-entry outcome of a multi-target restore
///
/// A failed entry never rolls back earlier successes; the report states
/// exactly which targets applied and which did not.
#[derive(Debug, Default)]
pub struct RestoreReport {
    pub succeeded: Vec<RestoreTarget>,
    pub failed: Vec<(RestoreTarget, EngineError)>,
}

impl RestoreReport {
    /// Check whether every target restored
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Engine that restores checkpointed content back into resources
pub struct RestoreEngine {
    manager: Arc<SessionManager>,
}

impl RestoreEngine {
    /// Create a restore engine over a session manager
    pub fn new(manager: Arc<SessionManager>) -> Self {
        Self { manager }
    }

    /// Restore one checkpoint of one resource
    ///
    /// Reconstructs the content at `index` and, unless `dry_run` is set,
    /// writes it back through the resource accessor. With `backup` set, the
    /// current resource content is appended first as a full "pre-restore"
    /// checkpoint, so the restore itself is undoable.
    pub async fn restore_one(
        &self,
        session_id: &str,
        key: &str,
        index: usize,
        opts: &RestoreOptions,
    ) -> EngineResult<String> {
        let chain = self.manager.chain(session_id, key).await?;
        let content = chain.lock().await.reconstruct(index)?;

        if opts.dry_run {
            return Ok(content);
        }

        if opts.backup {
            let current = self.manager.resources().read(key).await?;
            let backup_opts = CheckpointOptions::new()
                .force_full()
                .with_description(format!("pre-restore backup (before checkpoint {})", index));
            self.manager
                .create_checkpoint(session_id, key, &current, &backup_opts)
                .await?;
        }

        self.manager.resources().write(key, &content).await?;
        tracing::info!(session = session_id, chain = key, index, "restored checkpoint");
        Ok(content)
    }

    /// Restore several targets sequentially
    ///
    /// Each entry is attempted independently; a failure is recorded in the
    /// report and the remaining entries still run.
    pub async fn restore_many(
        &self,
        session_id: &str,
        targets: Vec<RestoreTarget>,
        opts: &RestoreOptions,
    ) -> RestoreReport {
        let mut report = RestoreReport::default();
        for target in targets {
            match self
                .restore_one(session_id, &target.key, target.index, opts)
                .await
            {
                Ok(_) => report.succeeded.push(target),
                Err(e) => {
                    tracing::warn!(
                        session = session_id,
                        chain = %target.key,
                        index = target.index,
                        error = %e,
                        "restore target failed"
                    );
                    report.failed.push((target, e));
                }
            }
        }
        report
    }

    /// Restore every chain of a session to its state at a point in time
    ///
    /// For each chain, restores the greatest index with `created_at <= t`;
    /// chains with no checkpoint at or before `t` are skipped.
    pub async fn restore_at_timestamp(
        &self,
        session_id: &str,
        t: DateTime<Utc>,
        opts: &RestoreOptions,
    ) -> EngineResult<RestoreReport> {
        let session = self.manager.session(session_id).await?;
        let keys = session.read().await.chain_keys();

        let mut targets = Vec::new();
        for key in keys {
            let chain = self.manager.chain(session_id, &key).await?;
            let index = chain.lock().await.latest_at(t);
            if let Some(index) = index {
                targets.push(RestoreTarget::new(key, index));
            }
        }

        Ok(self.restore_many(session_id, targets, opts).await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::session::MemoryResourceAccess;
    use crate::storage::MemoryStorageBackend;

    async fn setup() -> (RestoreEngine, Arc<SessionManager>, Arc<MemoryResourceAccess>, String) {
        let resources = Arc::new(MemoryResourceAccess::new());
        let manager = Arc::new(SessionManager::new(
            EngineConfig::default(),
            Arc::new(MemoryStorageBackend::new()),
            resources.clone(),
        ));
        let id = manager.create_session(None).await.unwrap();
        (RestoreEngine::new(manager.clone()), manager, resources, id)
    }

    #[tokio::test]
    async fn test_restore_writes_back() {
        let (engine, manager, resources, id) = setup().await;
        for content in ["v0", "v1", "v2"] {
            manager
                .create_checkpoint(&id, "a.txt", content, &CheckpointOptions::new())
                .await
                .unwrap();
        }
        resources.insert("a.txt", "dirty working copy").await;

        let content = engine
            .restore_one(&id, "a.txt", 1, &RestoreOptions::new())
            .await
            .unwrap();
        assert_eq!(content, "v1");
        assert_eq!(resources.get("a.txt").await.unwrap(), "v1");
    }

    #[tokio::test]
    async fn test_dry_run_does_not_write() {
        let (engine, manager, resources, id) = setup().await;
        manager
            .create_checkpoint(&id, "a.txt", "v0", &CheckpointOptions::new())
            .await
            .unwrap();
        resources.insert("a.txt", "untouched").await;

        let content = engine
            .restore_one(&id, "a.txt", 0, &RestoreOptions::new().dry_run())
            .await
            .unwrap();
        assert_eq!(content, "v0");
        assert_eq!(resources.get("a.txt").await.unwrap(), "untouched");
    }

    #[tokio::test]
    async fn test_backup_snapshots_current_content() {
        let (engine, manager, resources, id) = setup().await;
        manager
            .create_checkpoint(&id, "a.txt", "v0", &CheckpointOptions::new())
            .await
            .unwrap();
        resources.insert("a.txt", "uncommitted work").await;

        engine
            .restore_one(&id, "a.txt", 0, &RestoreOptions::new().with_backup())
            .await
            .unwrap();

        // The pre-restore state became a checkpoint, so the restore is undoable.
        let chain = manager.chain(&id, "a.txt").await.unwrap();
        let chain = chain.lock().await;
        assert_eq!(chain.len(), 2);
        assert_eq!(chain.reconstruct(1).unwrap(), "uncommitted work");
        assert_eq!(resources.get("a.txt").await.unwrap(), "v0");
    }

    #[tokio::test]
    async fn test_restore_many_reports_partial_failure() {
        let (engine, manager, resources, id) = setup().await;
        for content in ["a0", "a1", "a2"] {
            manager
                .create_checkpoint(&id, "a.txt", content, &CheckpointOptions::new())
                .await
                .unwrap();
        }
        manager
            .create_checkpoint(&id, "b.txt", "b0", &CheckpointOptions::new())
            .await
            .unwrap();

        let report = engine
            .restore_many(
                &id,
                vec![RestoreTarget::new("a.txt", 2), RestoreTarget::new("b.txt", 99)],
                &RestoreOptions::new(),
            )
            .await;

        assert!(!report.is_complete());
        assert_eq!(report.succeeded, vec![RestoreTarget::new("a.txt", 2)]);
        assert_eq!(report.failed.len(), 1);
        assert!(matches!(report.failed[0].1, EngineError::NotFound(_)));
        // The successful write stands despite the later failure.
        assert_eq!(resources.get("a.txt").await.unwrap(), "a2");
    }

    #[tokio::test]
    async fn test_restore_at_timestamp_skips_later_chains() {
        let (engine, manager, resources, id) = setup().await;
        manager
            .create_checkpoint(&id, "a.txt", "a0", &CheckpointOptions::new())
            .await
            .unwrap();
        let cutoff = Utc::now();
        tokio::time::sleep(tokio::time::Duration::from_millis(5)).await;
        manager
            .create_checkpoint(&id, "a.txt", "a1", &CheckpointOptions::new())
            .await
            .unwrap();
        manager
            .create_checkpoint(&id, "b.txt", "b0", &CheckpointOptions::new())
            .await
            .unwrap();
        resources.insert("b.txt", "b current").await;

        let report = engine
            .restore_at_timestamp(&id, cutoff, &RestoreOptions::new())
            .await
            .unwrap();

        assert!(report.is_complete());
        assert_eq!(report.succeeded, vec![RestoreTarget::new("a.txt", 0)]);
        assert_eq!(resources.get("a.txt").await.unwrap(), "a0");
        // b.txt has nothing at or before the cutoff and is left alone.
        assert_eq!(resources.get("b.txt").await.unwrap(), "b current");
    }
}
