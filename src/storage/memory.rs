//! In-memory checkpoint storage (for testing)

use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;

use crate::chain::CheckpointChain;
use crate::error::EngineResult;

use super::{SessionSummary, StorageBackend};

/// In-memory storage backend
///
/// Keeps everything in maps behind async locks; useful for tests and for
/// embedding applications that do their own persistence.
#[derive(Default)]
pub struct MemoryStorageBackend {
    summaries: RwLock<HashMap<String, SessionSummary>>,
    chains: RwLock<HashMap<String, HashMap<String, CheckpointChain>>>,
}

impl MemoryStorageBackend {
    /// Create a new in-memory backend
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StorageBackend for MemoryStorageBackend {
    async fn save_summary(&self, summary: &SessionSummary) -> EngineResult<()> {
        let mut summaries = self.summaries.write().await;
        summaries.insert(summary.id.clone(), summary.clone());
        Ok(())
    }

    async fn load_summary(&self, session_id: &str) -> EngineResult<Option<SessionSummary>> {
        let summaries = self.summaries.read().await;
        Ok(summaries.get(session_id).cloned())
    }

    async fn list_summaries(&self) -> EngineResult<Vec<SessionSummary>> {
        let summaries = self.summaries.read().await;
        let mut listed: Vec<_> = summaries.values().cloned().collect();
        listed.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(listed)
    }

    async fn save_chain(&self, session_id: &str, chain: &CheckpointChain) -> EngineResult<()> {
        let mut chains = self.chains.write().await;
        chains
            .entry(session_id.to_string())
            .or_default()
            .insert(chain.key().to_string(), chain.clone());
        Ok(())
    }

    async fn load_chains(&self, session_id: &str) -> EngineResult<Vec<CheckpointChain>> {
        let chains = self.chains.read().await;
        Ok(chains
            .get(session_id)
            .map(|per_key| per_key.values().cloned().collect())
            .unwrap_or_default())
    }

    async fn delete_session(&self, session_id: &str) -> EngineResult<()> {
        self.summaries.write().await.remove(session_id);
        self.chains.write().await.remove(session_id);
        Ok(())
    }
}
