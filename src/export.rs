//! Session export and import
//!
//! Serializes a whole session (summary plus every chain's records) into one
//! portable JSON document. Payloads are normalized to uncompressed bytes on
//! export so documents are self-describing; import re-applies the engine's
//! compression policy. Reconstructed content round-trips exactly.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::chain::{CheckpointChain, CheckpointRecord, RecordPayload};
use crate::compression;
use crate::error::{EngineError, EngineResult};
use crate::session::SessionManager;
use crate::storage::{SessionSummary, StorageBackend};

const EXPORT_FORMAT_VERSION: u32 = 1;

/// One chain in an export document
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportedChain {
    pub key: String,
    pub cursor: usize,
    pub edits_since_checkpoint: u32,
    pub records: Vec<CheckpointRecord>,
}

/// A complete exported session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportDocument {
    pub format_version: u32,
    pub exported_at: DateTime<Utc>,
    pub summary: SessionSummary,
    pub chains: Vec<ExportedChain>,
}

impl ExportDocument {
    /// Serialize to pretty JSON
    pub fn to_json(&self) -> EngineResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Parse a document from JSON
    pub fn from_json(json: &str) -> EngineResult<Self> {
        let doc: Self = serde_json::from_str(json)?;
        if doc.format_version != EXPORT_FORMAT_VERSION {
            return Err(EngineError::corrupt(format!(
                "unsupported export format version {}",
                doc.format_version
            )));
        }
        Ok(doc)
    }
}

/// Export/import surface over the session manager
pub struct ExportEngine {
    manager: Arc<SessionManager>,
}

impl ExportEngine {
    /// Create an export engine over a session manager
    pub fn new(manager: Arc<SessionManager>) -> Self {
        Self { manager }
    }

    /// Export a loaded session as one document
    pub async fn export(&self, session_id: &str) -> EngineResult<ExportDocument> {
        let session = self.manager.session(session_id).await?;
        let session = session.read().await;

        let mut chains = Vec::new();
        for handle in session.chain_handles() {
            let chain = handle.lock().await;
            let mut records = Vec::with_capacity(chain.len());
            for record in chain.records() {
                records.push(normalize(record)?);
            }
            chains.push(ExportedChain {
                key: chain.key().to_string(),
                cursor: chain.cursor(),
                edits_since_checkpoint: chain.edits_since_checkpoint(),
                records,
            });
        }
        chains.sort_by(|a, b| a.key.cmp(&b.key));

        tracing::info!(session = session_id, chains = chains.len(), "exported session");
        Ok(ExportDocument {
            format_version: EXPORT_FORMAT_VERSION,
            exported_at: Utc::now(),
            summary: session.summary().clone(),
            chains,
        })
    }

    /// Import a previously exported session
    ///
    /// The document's session ID must not already exist. The imported
    /// session is persisted, loaded, and made active; returns its ID.
    pub async fn import(&self, doc: ExportDocument) -> EngineResult<String> {
        let session_id = doc.summary.id.clone();
        if self
            .manager
            .backend()
            .load_summary(&session_id)
            .await?
            .is_some()
        {
            return Err(EngineError::storage(format!(
                "session '{}' already exists, refusing to overwrite on import",
                session_id
            )));
        }

        self.manager.backend().save_summary(&doc.summary).await?;
        for exported in doc.chains {
            let mut records = Vec::with_capacity(exported.records.len());
            for record in exported.records {
                records.push(apply_compression_policy(
                    record,
                    self.manager.config().compression_threshold,
                )?);
            }
            let chain = CheckpointChain::from_parts(
                exported.key,
                records,
                exported.cursor,
                exported.edits_since_checkpoint,
            );
            self.manager.backend().save_chain(&session_id, &chain).await?;
        }

        self.manager.resume_session(&session_id).await?;
        tracing::info!(session = %session_id, "imported session");
        Ok(session_id)
    }
}

/// Decompress a record's payload in place for export
fn normalize(record: &CheckpointRecord) -> EngineResult<CheckpointRecord> {
    let mut record = record.clone();
    if record.compressed {
        let bytes = record.raw_payload()?;
        record.size_bytes = bytes.len() as u64;
        record.payload = match record.payload {
            RecordPayload::Full { .. } => RecordPayload::Full { bytes },
            RecordPayload::Diff { .. } => RecordPayload::Diff { bytes },
        };
        record.compressed = false;
    }
    Ok(record)
}

/// Re-compress an imported record's payload where the threshold warrants it
fn apply_compression_policy(
    mut record: CheckpointRecord,
    threshold: usize,
) -> EngineResult<CheckpointRecord> {
    if !record.compressed
        && compression::exceeds_threshold(record.payload.bytes().len(), threshold)
    {
        let bytes = compression::compress(record.payload.bytes())?;
        record.size_bytes = bytes.len() as u64;
        record.payload = match record.payload {
            RecordPayload::Full { .. } => RecordPayload::Full { bytes },
            RecordPayload::Diff { .. } => RecordPayload::Diff { bytes },
        };
        record.compressed = true;
    }
    Ok(record)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::CheckpointOptions;
    use crate::config::EngineConfig;
    use crate::session::MemoryResourceAccess;
    use crate::storage::MemoryStorageBackend;

    async fn setup() -> (ExportEngine, Arc<SessionManager>, String) {
        let manager = Arc::new(SessionManager::new(
            EngineConfig::default(),
            Arc::new(MemoryStorageBackend::new()),
            Arc::new(MemoryResourceAccess::new()),
        ));
        let id = manager.create_session(Some("main".to_string())).await.unwrap();
        (ExportEngine::new(manager.clone()), manager, id)
    }

    #[tokio::test]
    async fn test_export_normalizes_payloads() {
        let (engine, manager, id) = setup().await;
        let big = "a compressible line of text\n".repeat(100);
        manager
            .create_checkpoint(&id, "a.txt", &big, &CheckpointOptions::new())
            .await
            .unwrap();

        let doc = engine.export(&id).await.unwrap();
        assert_eq!(doc.chains.len(), 1);
        let record = &doc.chains[0].records[0];
        assert!(!record.compressed);
        assert_eq!(record.payload.bytes(), big.as_bytes());
        assert_eq!(record.size_bytes, record.raw_bytes);
    }

    #[tokio::test]
    async fn test_round_trip_into_fresh_engine() {
        let (engine, manager, id) = setup().await;
        let big = "a compressible line of text\n".repeat(100);
        for content in ["v0\n", "v1\n", big.as_str()] {
            manager
                .create_checkpoint(&id, "a.txt", content, &CheckpointOptions::new())
                .await
                .unwrap();
        }
        manager
            .create_checkpoint(
                &id,
                "b.txt",
                "other\n",
                &CheckpointOptions::new().with_tag("stable"),
            )
            .await
            .unwrap();

        let json = engine.export(&id).await.unwrap().to_json().unwrap();

        let other_manager = Arc::new(SessionManager::new(
            EngineConfig::default(),
            Arc::new(MemoryStorageBackend::new()),
            Arc::new(MemoryResourceAccess::new()),
        ));
        let other = ExportEngine::new(other_manager.clone());
        let imported = other.import(ExportDocument::from_json(&json).unwrap()).await.unwrap();
        assert_eq!(imported, id);
        assert_eq!(other_manager.active_session().await, Some(id.clone()));

        let chain = other_manager.chain(&id, "a.txt").await.unwrap();
        let chain = chain.lock().await;
        assert_eq!(chain.reconstruct(0).unwrap(), "v0\n");
        assert_eq!(chain.reconstruct(1).unwrap(), "v1\n");
        assert_eq!(chain.reconstruct(2).unwrap(), big);
        // Large payloads come back compressed per the engine's policy.
        assert!(chain.records()[2].compressed);

        let chain = other_manager.chain(&id, "b.txt").await.unwrap();
        assert!(chain.lock().await.records()[0].tags.contains("stable"));
    }

    #[tokio::test]
    async fn test_import_rejects_existing_session() {
        let (engine, manager, id) = setup().await;
        manager
            .create_checkpoint(&id, "a.txt", "v0", &CheckpointOptions::new())
            .await
            .unwrap();

        let doc = engine.export(&id).await.unwrap();
        assert!(matches!(
            engine.import(doc).await,
            Err(EngineError::Storage(_))
        ));
    }

    #[tokio::test]
    async fn test_from_json_rejects_unknown_version() {
        let (engine, _, id) = setup().await;
        let mut doc = engine.export(&id).await.unwrap();
        doc.format_version = 99;
        let json = serde_json::to_string(&doc).unwrap();
        assert!(matches!(
            ExportDocument::from_json(&json),
            Err(EngineError::CorruptRecord(_))
        ));
    }
}
