//! In-memory session state

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::chain::CheckpointChain;
use crate::storage::SessionSummary;

/// A live session: summary plus its checkpoint chains
///
/// Chains are created lazily on first checkpoint of a key and guarded by
/// chain-granular locks, so mutations of unrelated resources never
/// serialize against each other.
pub struct Session {
    summary: SessionSummary,
    chains: HashMap<String, Arc<Mutex<CheckpointChain>>>,
}

impl Session {
    /// Create an empty session from a summary
    pub(crate) fn new(summary: SessionSummary) -> Self {
        Self {
            summary,
            chains: HashMap::new(),
        }
    }

    /// Rebuild a session from persisted chains
    pub(crate) fn from_chains(summary: SessionSummary, chains: Vec<CheckpointChain>) -> Self {
        let chains = chains
            .into_iter()
            .map(|chain| (chain.key().to_string(), Arc::new(Mutex::new(chain))))
            .collect();
        Self { summary, chains }
    }

    /// Get the session ID
    pub fn id(&self) -> &str {
        &self.summary.id
    }

    /// Get the session summary
    pub fn summary(&self) -> &SessionSummary {
        &self.summary
    }

    /// Get a mutable handle to the summary
    pub(crate) fn summary_mut(&mut self) -> &mut SessionSummary {
        &mut self.summary
    }

    /// Get the keys of all chains in this session
    pub fn chain_keys(&self) -> Vec<String> {
        self.chains.keys().cloned().collect()
    }

    /// Get the chain for a key, if it exists
    pub(crate) fn chain(&self, key: &str) -> Option<Arc<Mutex<CheckpointChain>>> {
        self.chains.get(key).cloned()
    }

    /// Get or lazily create the chain for a key
    pub(crate) fn ensure_chain(&mut self, key: &str) -> Arc<Mutex<CheckpointChain>> {
        self.chains
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(CheckpointChain::new(key))))
            .clone()
    }

    /// Iterate over all chain handles
    pub(crate) fn chain_handles(&self) -> Vec<Arc<Mutex<CheckpointChain>>> {
        self.chains.values().cloned().collect()
    }

    /// Total stored bytes across all chains (post-compression)
    pub async fn storage_bytes(&self) -> u64 {
        let mut total = 0;
        for chain in self.chains.values() {
            total += chain.lock().await.storage_bytes();
        }
        total
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::CheckpointOptions;
    use crate::config::EngineConfig;

    #[tokio::test]
    async fn test_lazy_chain_creation() {
        let mut session = Session::new(SessionSummary::new(10, None));
        assert!(session.chain("a.txt").is_none());

        let chain = session.ensure_chain("a.txt");
        assert!(chain.lock().await.is_empty());
        assert!(session.chain("a.txt").is_some());
        assert_eq!(session.chain_keys(), vec!["a.txt".to_string()]);

        // ensure_chain returns the same chain on repeat calls
        let again = session.ensure_chain("a.txt");
        assert!(Arc::ptr_eq(&chain, &again));
    }

    #[tokio::test]
    async fn test_storage_bytes_sums_chains() {
        let config = EngineConfig::default();
        let mut session = Session::new(SessionSummary::new(10, None));

        for key in ["a.txt", "b.txt"] {
            let chain = session.ensure_chain(key);
            chain
                .lock()
                .await
                .append("content", &CheckpointOptions::new(), &config)
                .unwrap();
        }

        assert!(session.storage_bytes().await > 0);
    }
}
