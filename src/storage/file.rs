//! Disk-backed checkpoint storage
//!
//! Layout, one namespace per session:
//!
//! ```text
//! <root>/
//!   {session_id}/
//!     summary.json              session summary
//!     index.json                chain_key -> ordered record references
//!     records/{chain_ref}/
//!       {index:06}.json         individual checkpoint records
//! ```

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use tokio::fs;

use crate::chain::{CheckpointChain, CheckpointRecord};
use crate::error::{EngineError, EngineResult};

use super::{chain_ref, SessionSummary, StorageBackend};

/// Index entry for one chain: where its records live and in what order
#[derive(Debug, Clone, Serialize, Deserialize)]
struct ChainIndexEntry {
    /// Directory name under `records/`
    dir: String,
    /// Undo/redo cursor position
    cursor: usize,
    /// Edits since the last checkpoint
    edits_since_checkpoint: u32,
    /// Record file names, in chain order
    record_files: Vec<String>,
}

/// File-based storage backend
pub struct FileStorageBackend {
    root: PathBuf,
    /// Serializes index.json read-modify-write cycles per backend
    index_lock: tokio::sync::Mutex<()>,
}

impl FileStorageBackend {
    /// Create a backend rooted at the given directory
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            index_lock: tokio::sync::Mutex::new(()),
        }
    }

    fn session_dir(&self, session_id: &str) -> PathBuf {
        self.root.join(session_id)
    }

    fn summary_path(&self, session_id: &str) -> PathBuf {
        self.session_dir(session_id).join("summary.json")
    }

    fn index_path(&self, session_id: &str) -> PathBuf {
        self.session_dir(session_id).join("index.json")
    }

    fn records_dir(&self, session_id: &str, dir: &str) -> PathBuf {
        self.session_dir(session_id).join("records").join(dir)
    }

    async fn read_json<T: serde::de::DeserializeOwned>(
        path: &PathBuf,
    ) -> EngineResult<Option<T>> {
        match fs::read(path).await {
            Ok(bytes) => {
                let value = serde_json::from_slice(&bytes).map_err(|e| {
                    EngineError::storage(format!("Failed to parse {:?}: {}", path, e))
                })?;
                Ok(Some(value))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(EngineError::storage(format!(
                "Failed to read {:?}: {}",
                path, e
            ))),
        }
    }

    async fn write_json<T: Serialize>(path: &PathBuf, value: &T) -> EngineResult<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await.map_err(|e| {
                EngineError::storage(format!("Failed to create directory {:?}: {}", parent, e))
            })?;
        }
        let json = serde_json::to_vec_pretty(value)?;
        fs::write(path, json)
            .await
            .map_err(|e| EngineError::storage(format!("Failed to write {:?}: {}", path, e)))
    }

    async fn load_index(&self, session_id: &str) -> EngineResult<HashMap<String, ChainIndexEntry>> {
        Ok(Self::read_json(&self.index_path(session_id))
            .await?
            .unwrap_or_default())
    }
}

#[async_trait]
impl StorageBackend for FileStorageBackend {
    async fn save_summary(&self, summary: &SessionSummary) -> EngineResult<()> {
        Self::write_json(&self.summary_path(&summary.id), summary).await?;
        tracing::debug!(session = %summary.id, "saved session summary");
        Ok(())
    }

    async fn load_summary(&self, session_id: &str) -> EngineResult<Option<SessionSummary>> {
        Self::read_json(&self.summary_path(session_id)).await
    }

    async fn list_summaries(&self) -> EngineResult<Vec<SessionSummary>> {
        let mut summaries = Vec::new();
        let mut entries = match fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(summaries),
            Err(e) => {
                return Err(EngineError::storage(format!(
                    "Failed to read storage root {:?}: {}",
                    self.root, e
                )))
            }
        };

        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| EngineError::storage(format!("Failed to read directory entry: {}", e)))?
        {
            if !entry.path().is_dir() {
                continue;
            }
            let session_id = entry.file_name().to_string_lossy().to_string();
            if let Some(summary) = self.load_summary(&session_id).await? {
                summaries.push(summary);
            }
        }

        summaries.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(summaries)
    }

    async fn save_chain(&self, session_id: &str, chain: &CheckpointChain) -> EngineResult<()> {
        let _guard = self.index_lock.lock().await;

        let dir = chain_ref(chain.key());
        let records_dir = self.records_dir(session_id, &dir);

        // Replace semantics: clear the old record files first so deletes,
        // merges, and compactions never leave stale payloads behind.
        match fs::remove_dir_all(&records_dir).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                return Err(EngineError::storage(format!(
                    "Failed to clear records directory {:?}: {}",
                    records_dir, e
                )))
            }
        }

        let mut record_files = Vec::with_capacity(chain.len());
        for record in chain.records() {
            let file_name = format!("{:06}.json", record.index);
            Self::write_json(&records_dir.join(&file_name), record).await?;
            record_files.push(file_name);
        }

        let mut index = self.load_index(session_id).await?;
        index.insert(
            chain.key().to_string(),
            ChainIndexEntry {
                dir,
                cursor: chain.cursor(),
                edits_since_checkpoint: chain.edits_since_checkpoint(),
                record_files,
            },
        );
        Self::write_json(&self.index_path(session_id), &index).await?;

        tracing::debug!(session = session_id, chain = chain.key(), records = chain.len(), "saved chain");
        Ok(())
    }

    async fn load_chains(&self, session_id: &str) -> EngineResult<Vec<CheckpointChain>> {
        let index = self.load_index(session_id).await?;
        let mut chains = Vec::with_capacity(index.len());

        for (key, entry) in index {
            let records_dir = self.records_dir(session_id, &entry.dir);
            let mut records: Vec<CheckpointRecord> = Vec::with_capacity(entry.record_files.len());
            for file_name in &entry.record_files {
                let path = records_dir.join(file_name);
                let record = Self::read_json(&path).await?.ok_or_else(|| {
                    EngineError::corrupt(format!(
                        "record file {:?} referenced by index is missing",
                        path
                    ))
                })?;
                records.push(record);
            }
            chains.push(CheckpointChain::from_parts(
                key,
                records,
                entry.cursor,
                entry.edits_since_checkpoint,
            ));
        }

        Ok(chains)
    }

    async fn delete_session(&self, session_id: &str) -> EngineResult<()> {
        let dir = self.session_dir(session_id);
        match fs::remove_dir_all(&dir).await {
            Ok(()) => {
                tracing::debug!(session = session_id, "deleted session storage");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(EngineError::storage(format!(
                "Failed to delete session directory {:?}: {}",
                dir, e
            ))),
        }
    }
}
