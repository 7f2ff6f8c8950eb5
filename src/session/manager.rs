//! Session manager
//!
//! Owns all sessions and is the single entry point for chain mutation:
//! auto-checkpointing on tracked edits, explicit checkpoints, undo/redo,
//! storage-budget eviction, and the expiry sweep.

use chrono::{Duration, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};

use crate::chain::{CheckpointChain, CheckpointOptions, CheckpointRecord};
use crate::config::EngineConfig;
use crate::error::{EngineError, EngineResult};
use crate::storage::{SessionSummary, StorageBackend};

use super::{ResourceAccess, Session};

/// Manager for checkpoint sessions
///
/// Every public call takes an explicit session ID; there is no process-wide
/// "current session" state. The active session (for the eviction exemption)
/// is tracked explicitly and switched with [`SessionManager::set_active`].
pub struct SessionManager {
    config: EngineConfig,
    backend: Arc<dyn StorageBackend>,
    resources: Arc<dyn ResourceAccess>,
    sessions: RwLock<HashMap<String, Arc<RwLock<Session>>>>,
    active: RwLock<Option<String>>,
}

impl SessionManager {
    /// Create a manager over a storage backend and resource accessor
    pub fn new(
        config: EngineConfig,
        backend: Arc<dyn StorageBackend>,
        resources: Arc<dyn ResourceAccess>,
    ) -> Self {
        Self {
            config,
            backend,
            resources,
            sessions: RwLock::new(HashMap::new()),
            active: RwLock::new(None),
        }
    }

    /// Get the engine configuration
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub(crate) fn resources(&self) -> Arc<dyn ResourceAccess> {
        self.resources.clone()
    }

    pub(crate) fn backend(&self) -> Arc<dyn StorageBackend> {
        self.backend.clone()
    }

    /// Create a new session and make it active
    pub async fn create_session(&self, vcs_branch: Option<String>) -> EngineResult<String> {
        let summary = SessionSummary::new(self.config.auto_checkpoint_interval, vcs_branch);
        let id = summary.id.clone();
        self.backend.save_summary(&summary).await?;

        let session = Arc::new(RwLock::new(Session::new(summary)));
        self.sessions.write().await.insert(id.clone(), session);
        *self.active.write().await = Some(id.clone());

        tracing::info!(session = %id, "created session");
        Ok(id)
    }

    /// Resume a persisted session by ID and make it active
    pub async fn resume_session(&self, session_id: &str) -> EngineResult<()> {
        if !self.sessions.read().await.contains_key(session_id) {
            let summary = self
                .backend
                .load_summary(session_id)
                .await?
                .ok_or_else(|| EngineError::not_found(format!("session '{}'", session_id)))?;
            let chains = self.backend.load_chains(session_id).await?;
            let session = Arc::new(RwLock::new(Session::from_chains(summary, chains)));
            self.sessions
                .write()
                .await
                .insert(session_id.to_string(), session);
        }

        *self.active.write().await = Some(session_id.to_string());
        tracing::info!(session = session_id, "resumed session");
        Ok(())
    }

    /// Mark a loaded session as the active one
    pub async fn set_active(&self, session_id: &str) -> EngineResult<()> {
        if !self.sessions.read().await.contains_key(session_id) {
            return Err(EngineError::not_found(format!("session '{}'", session_id)));
        }
        *self.active.write().await = Some(session_id.to_string());
        Ok(())
    }

    /// Get the active session ID, if any
    pub async fn active_session(&self) -> Option<String> {
        self.active.read().await.clone()
    }

    /// Get the IDs of all loaded sessions
    pub async fn session_ids(&self) -> Vec<String> {
        self.sessions.read().await.keys().cloned().collect()
    }

    /// Delete a session and all its chains
    pub async fn delete_session(&self, session_id: &str) -> EngineResult<()> {
        if self.sessions.write().await.remove(session_id).is_none() {
            return Err(EngineError::not_found(format!("session '{}'", session_id)));
        }
        self.backend.delete_session(session_id).await?;

        let mut active = self.active.write().await;
        if active.as_deref() == Some(session_id) {
            *active = None;
        }

        tracing::info!(session = session_id, "deleted session");
        Ok(())
    }

    /// Get a loaded session handle
    pub(crate) async fn session(&self, session_id: &str) -> EngineResult<Arc<RwLock<Session>>> {
        self.sessions
            .read()
            .await
            .get(session_id)
            .cloned()
            .ok_or_else(|| EngineError::not_found(format!("session '{}'", session_id)))
    }

    /// Get all loaded session handles with their IDs
    pub(crate) async fn session_handles(&self) -> Vec<(String, Arc<RwLock<Session>>)> {
        self.sessions
            .read()
            .await
            .iter()
            .map(|(id, session)| (id.clone(), session.clone()))
            .collect()
    }

    /// Get the lock-guarded handle of an existing chain
    ///
    /// Callers take the chain lock for reads like `reconstruct`; all
    /// mutation still goes through the manager and the engines.
    pub async fn chain(
        &self,
        session_id: &str,
        key: &str,
    ) -> EngineResult<Arc<Mutex<CheckpointChain>>> {
        let session = self.session(session_id).await?;
        let chain = session.read().await.chain(key);
        chain.ok_or_else(|| {
            EngineError::not_found(format!("chain '{}' in session '{}'", key, session_id))
        })
    }

    /// Persist a chain and touch the owning session
    pub(crate) async fn persist_chain(
        &self,
        session_id: &str,
        chain: &CheckpointChain,
    ) -> EngineResult<()> {
        self.backend.save_chain(session_id, chain).await?;
        self.touch_session(session_id).await
    }

    async fn touch_session(&self, session_id: &str) -> EngineResult<()> {
        let session = self.session(session_id).await?;
        let summary = {
            let mut session = session.write().await;
            session.summary_mut().touch();
            session.summary().clone()
        };
        self.backend.save_summary(&summary).await
    }

    /// Record one tracked edit against a resource
    ///
    /// When the session's auto-checkpoint interval is reached, the current
    /// content is pulled through the injected [`ResourceAccess`], a
    /// checkpoint is appended, and the edit counter resets. Returns the
    /// record when a checkpoint fired.
    pub async fn track_edit(
        &self,
        session_id: &str,
        key: &str,
    ) -> EngineResult<Option<CheckpointRecord>> {
        let session = self.session(session_id).await?;
        let interval = session.read().await.summary().auto_checkpoint_interval;
        let chain = session.write().await.ensure_chain(key);

        let due = {
            let mut chain = chain.lock().await;
            chain.record_edit() >= interval
        };
        if !due {
            return Ok(None);
        }

        let content = self.resources.read(key).await?;
        let opts = CheckpointOptions::new().with_description("auto checkpoint");
        let record = self
            .create_checkpoint(session_id, key, &content, &opts)
            .await?;
        tracing::debug!(session = session_id, chain = key, index = record.index, "auto checkpoint");
        Ok(Some(record))
    }

    /// Append a checkpoint for a resource
    ///
    /// All-or-nothing: if persisting the appended record fails, the
    /// in-memory chain is restored to its prior state before the error
    /// propagates. After a successful append the storage budget is
    /// enforced; a `BudgetExceeded` error means the append itself stands
    /// but eviction could not bring usage back under the budget.
    pub async fn create_checkpoint(
        &self,
        session_id: &str,
        key: &str,
        content: &str,
        opts: &CheckpointOptions,
    ) -> EngineResult<CheckpointRecord> {
        let session = self.session(session_id).await?;
        let chain = session.write().await.ensure_chain(key);

        let record = {
            let mut chain = chain.lock().await;
            let before = chain.clone();
            chain.append(content, opts, &self.config)?;
            match self.backend.save_chain(session_id, &chain).await {
                Ok(()) => chain.record(chain.len() - 1)?.clone(),
                Err(e) => {
                    *chain = before;
                    return Err(e);
                }
            }
        };

        self.touch_session(session_id).await?;
        self.enforce_storage_budget().await?;
        Ok(record)
    }

    /// Step a chain's cursor back and return the reconstructed content
    pub async fn undo(&self, session_id: &str, key: &str) -> EngineResult<String> {
        let chain = self.chain(session_id, key).await?;
        let (content, snapshot) = {
            let mut chain = chain.lock().await;
            let content = chain.undo()?;
            (content, chain.clone())
        };
        self.persist_chain(session_id, &snapshot).await?;
        Ok(content)
    }

    /// Step a chain's cursor forward and return the reconstructed content
    pub async fn redo(&self, session_id: &str, key: &str) -> EngineResult<String> {
        let chain = self.chain(session_id, key).await?;
        let (content, snapshot) = {
            let mut chain = chain.lock().await;
            let content = chain.redo()?;
            (content, chain.clone())
        };
        self.persist_chain(session_id, &snapshot).await?;
        Ok(content)
    }

    /// Enforce the global storage budget
    ///
    /// Sums post-compression bytes across all persisted sessions, not just
    /// the ones loaded into memory. While over budget, evicts whole
    /// sessions oldest-`updated_at` first; the active session is never
    /// evicted. Returns the evicted session IDs. If eviction cannot bring
    /// usage under the budget, `BudgetExceeded` is surfaced.
    pub async fn enforce_storage_budget(&self) -> EngineResult<Vec<String>> {
        let budget = self.config.storage_budget_bytes;
        let mut sessions = self.sessions.write().await;

        let mut usage = Vec::new();
        let mut total: u64 = 0;
        for summary in self.backend.list_summaries().await? {
            let bytes = match sessions.get(&summary.id) {
                Some(session) => session.read().await.storage_bytes().await,
                None => {
                    let chains = self.backend.load_chains(&summary.id).await?;
                    chains.iter().map(|chain| chain.storage_bytes()).sum()
                }
            };
            total += bytes;
            usage.push((summary.id, summary.updated_at, bytes));
        }

        if total <= budget {
            return Ok(Vec::new());
        }

        let active = self.active.read().await.clone();
        usage.sort_by(|a, b| a.1.cmp(&b.1));

        let mut evicted = Vec::new();
        for (id, _, bytes) in usage {
            if total <= budget {
                break;
            }
            if active.as_deref() == Some(id.as_str()) {
                continue;
            }
            self.backend.delete_session(&id).await?;
            sessions.remove(&id);
            total -= bytes;
            tracing::warn!(session = %id, freed_bytes = bytes, "evicted session over storage budget");
            evicted.push(id);
        }

        if total > budget {
            return Err(EngineError::BudgetExceeded {
                used_bytes: total,
                budget_bytes: budget,
            });
        }
        Ok(evicted)
    }

    /// Delete sessions whose `updated_at` predates the expiry cutoff
    ///
    /// Sweeps persisted sessions, not just loaded ones; intended to run at
    /// startup and optionally on a caller-driven timer. Returns the deleted
    /// session IDs.
    pub async fn sweep_expired(&self, max_age_days: Option<i64>) -> EngineResult<Vec<String>> {
        let days = max_age_days.unwrap_or(self.config.max_session_age_days);
        let cutoff = Utc::now() - Duration::days(days);

        let mut expired = Vec::new();
        for summary in self.backend.list_summaries().await? {
            if summary.updated_at < cutoff {
                expired.push(summary.id);
            }
        }

        if expired.is_empty() {
            return Ok(expired);
        }

        let mut sessions = self.sessions.write().await;
        let mut active = self.active.write().await;
        for id in &expired {
            self.backend.delete_session(id).await?;
            sessions.remove(id);
            if active.as_deref() == Some(id.as_str()) {
                *active = None;
            }
            tracing::info!(session = %id, "expired session removed");
        }

        Ok(expired)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::RecordKind;
    use crate::session::MemoryResourceAccess;
    use crate::storage::MemoryStorageBackend;

    fn manager_with(config: EngineConfig) -> (Arc<SessionManager>, Arc<MemoryResourceAccess>) {
        let resources = Arc::new(MemoryResourceAccess::new());
        let manager = Arc::new(SessionManager::new(
            config,
            Arc::new(MemoryStorageBackend::new()),
            resources.clone(),
        ));
        (manager, resources)
    }

    #[tokio::test]
    async fn test_create_and_delete_session() {
        let (manager, _) = manager_with(EngineConfig::default());
        let id = manager.create_session(Some("main".to_string())).await.unwrap();

        assert_eq!(manager.active_session().await, Some(id.clone()));
        assert_eq!(manager.session_ids().await, vec![id.clone()]);

        manager.delete_session(&id).await.unwrap();
        assert!(manager.active_session().await.is_none());
        assert!(matches!(
            manager.delete_session(&id).await,
            Err(EngineError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_create_checkpoint_and_reconstruct() {
        let (manager, _) = manager_with(EngineConfig::default());
        let id = manager.create_session(None).await.unwrap();

        let first = manager
            .create_checkpoint(&id, "a.txt", "hello", &CheckpointOptions::new())
            .await
            .unwrap();
        assert_eq!(first.index, 0);
        assert_eq!(first.kind(), RecordKind::Full);

        let second = manager
            .create_checkpoint(&id, "a.txt", "hello world", &CheckpointOptions::new())
            .await
            .unwrap();
        assert_eq!(second.kind(), RecordKind::Diff);

        let chain = manager.chain(&id, "a.txt").await.unwrap();
        let chain = chain.lock().await;
        assert_eq!(chain.reconstruct(0).unwrap(), "hello");
        assert_eq!(chain.reconstruct(1).unwrap(), "hello world");
    }

    #[tokio::test]
    async fn test_track_edit_fires_at_interval() {
        let config = EngineConfig::default().with_auto_checkpoint_interval(3);
        let (manager, resources) = manager_with(config);
        let id = manager.create_session(None).await.unwrap();
        resources.insert("a.txt", "current content").await;

        assert!(manager.track_edit(&id, "a.txt").await.unwrap().is_none());
        assert!(manager.track_edit(&id, "a.txt").await.unwrap().is_none());
        let record = manager.track_edit(&id, "a.txt").await.unwrap().unwrap();
        assert_eq!(record.index, 0);

        let chain = manager.chain(&id, "a.txt").await.unwrap();
        assert_eq!(chain.lock().await.reconstruct(0).unwrap(), "current content");
        // Counter reset: next edit does not fire.
        assert!(manager.track_edit(&id, "a.txt").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_resume_session() {
        let backend = Arc::new(MemoryStorageBackend::new());
        let resources = Arc::new(MemoryResourceAccess::new());
        let manager = SessionManager::new(
            EngineConfig::default(),
            backend.clone(),
            resources.clone(),
        );

        let id = manager.create_session(None).await.unwrap();
        manager
            .create_checkpoint(&id, "a.txt", "v0", &CheckpointOptions::new())
            .await
            .unwrap();

        // A fresh manager over the same backend resumes the session.
        let revived = SessionManager::new(EngineConfig::default(), backend, resources);
        revived.resume_session(&id).await.unwrap();
        let chain = revived.chain(&id, "a.txt").await.unwrap();
        assert_eq!(chain.lock().await.reconstruct(0).unwrap(), "v0");

        assert!(matches!(
            revived.resume_session("missing").await,
            Err(EngineError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_undo_redo_via_manager() {
        let (manager, _) = manager_with(EngineConfig::default());
        let id = manager.create_session(None).await.unwrap();
        for content in ["v0", "v1", "v2"] {
            manager
                .create_checkpoint(&id, "a.txt", content, &CheckpointOptions::new())
                .await
                .unwrap();
        }

        assert_eq!(manager.undo(&id, "a.txt").await.unwrap(), "v1");
        assert_eq!(manager.undo(&id, "a.txt").await.unwrap(), "v0");
        assert_eq!(manager.redo(&id, "a.txt").await.unwrap(), "v1");
    }

    #[tokio::test]
    async fn test_budget_evicts_oldest_not_active() {
        // Budget small enough that two sessions cannot coexist.
        let config = EngineConfig::default().with_storage_budget(1000);
        let (manager, _) = manager_with(config);

        let payload = "x".repeat(600);
        let old_session = manager.create_session(None).await.unwrap();
        manager
            .create_checkpoint(&old_session, "a.txt", &payload, &CheckpointOptions::new())
            .await
            .unwrap();

        tokio::time::sleep(tokio::time::Duration::from_millis(5)).await;
        let active = manager.create_session(None).await.unwrap();
        manager
            .create_checkpoint(&active, "b.txt", &payload, &CheckpointOptions::new())
            .await
            .unwrap();

        // The older session was evicted during the second checkpoint.
        assert!(matches!(
            manager.session(&old_session).await,
            Err(EngineError::NotFound(_))
        ));
        assert!(manager.session(&active).await.is_ok());
        assert_eq!(manager.active_session().await, Some(active));
    }

    #[tokio::test]
    async fn test_budget_counts_unloaded_sessions() {
        let backend = Arc::new(MemoryStorageBackend::new());
        let resources = Arc::new(MemoryResourceAccess::new());
        let config = EngineConfig::default()
            .with_storage_budget(1000)
            .with_compression_threshold(usize::MAX);

        let first = SessionManager::new(config.clone(), backend.clone(), resources.clone());
        let old_session = first.create_session(None).await.unwrap();
        first
            .create_checkpoint(&old_session, "a.txt", &"x".repeat(600), &CheckpointOptions::new())
            .await
            .unwrap();

        tokio::time::sleep(tokio::time::Duration::from_millis(5)).await;

        // A fresh manager that never loads the old session still counts it
        // against the budget and can evict it.
        let second = SessionManager::new(config, backend.clone(), resources);
        let active = second.create_session(None).await.unwrap();
        second
            .create_checkpoint(&active, "b.txt", &"y".repeat(600), &CheckpointOptions::new())
            .await
            .unwrap();

        assert!(backend.load_summary(&old_session).await.unwrap().is_none());
        assert!(backend.load_summary(&active).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_checkpoint_after_undo_discards_redo_branch() {
        let (manager, _) = manager_with(EngineConfig::default());
        let id = manager.create_session(None).await.unwrap();
        for content in ["v0", "v1", "v2"] {
            manager
                .create_checkpoint(&id, "a.txt", content, &CheckpointOptions::new())
                .await
                .unwrap();
        }

        assert_eq!(manager.undo(&id, "a.txt").await.unwrap(), "v1");
        manager
            .create_checkpoint(&id, "a.txt", "v3", &CheckpointOptions::new())
            .await
            .unwrap();

        let chain = manager.chain(&id, "a.txt").await.unwrap();
        {
            let chain = chain.lock().await;
            assert_eq!(chain.len(), 3);
            assert_eq!(chain.reconstruct(2).unwrap(), "v3");
        }
        // Undo from the new tail reaches v1, never the discarded v2.
        assert_eq!(manager.undo(&id, "a.txt").await.unwrap(), "v1");
        assert_eq!(manager.redo(&id, "a.txt").await.unwrap(), "v3");
    }

    #[tokio::test]
    async fn test_budget_exceeded_when_only_active_remains() {
        let config = EngineConfig::default()
            .with_storage_budget(100)
            .with_compression_threshold(usize::MAX);
        let (manager, _) = manager_with(config);
        let id = manager.create_session(None).await.unwrap();

        let result = manager
            .create_checkpoint(&id, "a.txt", &"y".repeat(500), &CheckpointOptions::new())
            .await;
        assert!(matches!(result, Err(EngineError::BudgetExceeded { .. })));

        // The checkpoint itself stands; only the budget could not be met.
        let chain = manager.chain(&id, "a.txt").await.unwrap();
        assert_eq!(chain.lock().await.len(), 1);
    }

    #[tokio::test]
    async fn test_sweep_expired() {
        let (manager, _) = manager_with(EngineConfig::default());
        let id = manager.create_session(None).await.unwrap();

        // Nothing is older than 30 days.
        assert!(manager.sweep_expired(None).await.unwrap().is_empty());

        // With a cutoff in the future everything is expired.
        let swept = manager.sweep_expired(Some(-1)).await.unwrap();
        assert_eq!(swept, vec![id.clone()]);
        assert!(manager.active_session().await.is_none());
        assert!(matches!(
            manager.session(&id).await,
            Err(EngineError::NotFound(_))
        ));
    }
}
