//! Checkpoint chain: per-resource ordered history

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::compression;
use crate::config::EngineConfig;
use crate::diff::TextDiff;
use crate::error::{EngineError, EngineResult};

use super::types::{CheckpointOptions, CheckpointRecord, RecordPayload};

/// Outcome of a compaction pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CompactionOutcome {
    /// Records removed from the chain
    pub removed: usize,
    /// Diff records rewritten to full snapshots
    pub rewritten: usize,
}

/// Ordered checkpoint history of one resource
///
/// Index 0 is always a full snapshot and is protected while later records
/// exist. The cursor is the current undo/redo position, modeled as a plain
/// `(cursor, len)` pair recomputed on every transition. Appending after an
/// undo discards the undone records first, so the cursor always ends up at
/// the tail.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointChain {
    key: String,
    records: Vec<CheckpointRecord>,
    cursor: usize,
    edits_since_checkpoint: u32,
}

impl CheckpointChain {
    /// Create an empty chain for a resource key
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            records: Vec::new(),
            cursor: 0,
            edits_since_checkpoint: 0,
        }
    }

    /// Rebuild a chain from persisted parts
    pub(crate) fn from_parts(
        key: String,
        records: Vec<CheckpointRecord>,
        cursor: usize,
        edits_since_checkpoint: u32,
    ) -> Self {
        let cursor = cursor.min(records.len().saturating_sub(1));
        Self {
            key,
            records,
            cursor,
            edits_since_checkpoint,
        }
    }

    /// Get the resource key
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Get the number of checkpoints
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Check if the chain has no checkpoints
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Get all records in order
    pub fn records(&self) -> &[CheckpointRecord] {
        &self.records
    }

    /// Get the record at an index
    pub fn record(&self, index: usize) -> EngineResult<&CheckpointRecord> {
        self.records.get(index).ok_or_else(|| {
            EngineError::not_found(format!(
                "checkpoint {} in chain '{}' (length {})",
                index,
                self.key,
                self.records.len()
            ))
        })
    }

    /// Get the current undo/redo cursor position
    pub fn cursor(&self) -> usize {
        self.cursor
    }

    /// Get edits recorded since the last checkpoint
    pub fn edits_since_checkpoint(&self) -> u32 {
        self.edits_since_checkpoint
    }

    /// Record one edit; returns the updated counter
    pub(crate) fn record_edit(&mut self) -> u32 {
        self.edits_since_checkpoint += 1;
        self.edits_since_checkpoint
    }

    /// Total stored bytes across all records (post-compression)
    pub fn storage_bytes(&self) -> u64 {
        self.records.iter().map(|r| r.size_bytes).sum()
    }

    /// Append a checkpoint for the given content
    ///
    /// The new record lands immediately after the cursor; records past the
    /// cursor (the undone branch, if an undo preceded this append) are
    /// discarded first, as in editor undo semantics. An empty chain gets a
    /// full snapshot at index 0. Later appends store a diff against the
    /// reconstruction of the previous index, except at anchor positions
    /// (`index % anchor_interval == 0`) or when `opts.force_full` is set,
    /// where a full snapshot bounds future reconstruction cost.
    pub fn append(
        &mut self,
        content: &str,
        opts: &CheckpointOptions,
        config: &EngineConfig,
    ) -> EngineResult<&CheckpointRecord> {
        let index = if self.records.is_empty() {
            0
        } else {
            self.cursor + 1
        };
        let full =
            index == 0 || opts.force_full || index % config.anchor_interval.max(1) == 0;

        let raw = if full {
            content.as_bytes().to_vec()
        } else {
            let prev = self.reconstruct(index - 1)?;
            let patch = TextDiff::encode(&prev, content);
            serde_json::to_vec(&patch)?
        };

        let raw_bytes = raw.len() as u64;
        let (bytes, compressed) =
            if compression::exceeds_threshold(raw.len(), config.compression_threshold) {
                (compression::compress(&raw)?, true)
            } else {
                (raw, false)
            };
        let size_bytes = bytes.len() as u64;
        let payload = if full {
            RecordPayload::Full { bytes }
        } else {
            RecordPayload::Diff { bytes }
        };

        // Nothing above mutates the chain, so a failed append leaves it
        // untouched.
        let discarded = self.records.len() - index;
        self.records.truncate(index);
        self.records.push(CheckpointRecord {
            chain_key: self.key.clone(),
            index,
            created_at: Utc::now(),
            payload,
            compressed,
            size_bytes,
            raw_bytes,
            name: opts.name.clone(),
            description: opts.description.clone(),
            tags: opts.tags.clone(),
            vcs_ref: opts.vcs_ref.clone(),
        });
        self.cursor = index;
        self.edits_since_checkpoint = 0;

        tracing::debug!(
            chain = %self.key,
            index,
            kind = %self.records[index].kind(),
            size_bytes,
            discarded,
            "appended checkpoint"
        );
        Ok(&self.records[index])
    }

    /// Reconstruct the exact content at an index
    ///
    /// Scans backward to the nearest full snapshot at or before `index`
    /// (guaranteed by the base invariant to exist), then applies each diff
    /// forward. Read-only.
    pub fn reconstruct(&self, index: usize) -> EngineResult<String> {
        if index >= self.records.len() {
            return Err(EngineError::not_found(format!(
                "checkpoint {} in chain '{}' (length {})",
                index,
                self.key,
                self.records.len()
            )));
        }

        let anchor = (0..=index)
            .rev()
            .find(|&i| self.records[i].is_full())
            .ok_or_else(|| {
                EngineError::corrupt(format!(
                    "chain '{}' has no full snapshot at or before index {}",
                    self.key, index
                ))
            })?;

        let bytes = self.records[anchor].raw_payload()?;
        let mut content = String::from_utf8(bytes).map_err(|e| {
            EngineError::corrupt(format!(
                "snapshot at index {} of chain '{}' is not valid UTF-8: {}",
                anchor, self.key, e
            ))
        })?;

        for i in anchor + 1..=index {
            let bytes = self.records[i].raw_payload()?;
            let patch: TextDiff = serde_json::from_slice(&bytes).map_err(|e| {
                EngineError::corrupt(format!(
                    "invalid diff payload at index {} of chain '{}': {}",
                    i, self.key, e
                ))
            })?;
            content = patch.apply(&content)?;
        }

        Ok(content)
    }

    /// Delete the checkpoint at an index
    ///
    /// Index 0 is rejected with `BaseProtected` while later records exist;
    /// deleting it from a single-record chain empties the chain. Interior
    /// indices are rejected outright (cascading re-diffs are a maintenance
    /// concern, not a delete); only the current tail may be deleted
    /// directly.
    pub fn delete_at(&mut self, index: usize) -> EngineResult<()> {
        let len = self.records.len();
        if index >= len {
            return Err(EngineError::not_found(format!(
                "checkpoint {} in chain '{}' (length {})",
                index, self.key, len
            )));
        }

        if index == 0 {
            if len > 1 {
                return Err(EngineError::BaseProtected {
                    chain_key: self.key.clone(),
                });
            }
            self.records.clear();
            self.cursor = 0;
            return Ok(());
        }

        if index != len - 1 {
            return Err(EngineError::invalid_range(format!(
                "only the tail checkpoint ({}) of chain '{}' can be deleted, got {}",
                len - 1,
                self.key,
                index
            )));
        }

        self.records.pop();
        self.cursor = self.cursor.min(self.records.len() - 1);
        Ok(())
    }

    /// Merge the inclusive range `[from, to]` into one full snapshot
    ///
    /// The merged record carries the reconstruction at `to` and the given
    /// metadata; subsequent indices are renumbered contiguously. A diff
    /// record following the range stays valid: its base content is exactly
    /// what the merged snapshot reconstructs to.
    pub fn merge_range(
        &mut self,
        from: usize,
        to: usize,
        opts: &CheckpointOptions,
        config: &EngineConfig,
    ) -> EngineResult<&CheckpointRecord> {
        let len = self.records.len();
        if from > to || to >= len {
            return Err(EngineError::invalid_range(format!(
                "merge range {}..={} out of bounds for chain '{}' (length {})",
                from, to, self.key, len
            )));
        }

        let content = self.reconstruct(to)?;
        // Keep the timestamp of the newest merged record so time-based
        // queries and restores still see the content at its original time.
        let created_at = self.records[to].created_at;
        let merged = Self::full_record(
            &self.key,
            from,
            created_at,
            &content,
            opts.name.clone(),
            opts.description.clone(),
            opts.tags.clone(),
            opts.vcs_ref.clone(),
            config,
        )?;

        self.records.splice(from..=to, std::iter::once(merged));
        for (i, record) in self.records.iter_mut().enumerate().skip(from) {
            record.index = i;
        }

        self.cursor = if self.cursor <= to {
            self.cursor.min(from)
        } else {
            self.cursor - (to - from)
        };

        tracing::debug!(chain = %self.key, from, to, "merged checkpoint range");
        Ok(&self.records[from])
    }

    /// Attach tags to the checkpoint at an index (idempotent union)
    pub fn tag(
        &mut self,
        index: usize,
        tags: impl IntoIterator<Item = String>,
    ) -> EngineResult<&BTreeSet<String>> {
        let len = self.records.len();
        let record = self.records.get_mut(index).ok_or_else(|| {
            EngineError::not_found(format!(
                "checkpoint {} in chain '{}' (length {})",
                index, self.key, len
            ))
        })?;
        record.tags.extend(tags);
        Ok(&record.tags)
    }

    /// Step the cursor back one checkpoint and reconstruct it
    pub fn undo(&mut self) -> EngineResult<String> {
        if self.records.is_empty() {
            return Err(EngineError::not_found(format!(
                "chain '{}' has no checkpoints to undo to",
                self.key
            )));
        }
        self.cursor = self.cursor.saturating_sub(1);
        self.reconstruct(self.cursor)
    }

    /// Step the cursor forward one checkpoint and reconstruct it
    pub fn redo(&mut self) -> EngineResult<String> {
        if self.records.is_empty() {
            return Err(EngineError::not_found(format!(
                "chain '{}' has no checkpoints to redo to",
                self.key
            )));
        }
        self.cursor = (self.cursor + 1).min(self.records.len() - 1);
        self.reconstruct(self.cursor)
    }

    /// Greatest index with `created_at <= t`, if any
    pub fn latest_at(&self, t: DateTime<Utc>) -> Option<usize> {
        self.records
            .iter()
            .rposition(|record| record.created_at <= t)
    }

    /// Compact the chain to reduce storage
    ///
    /// Always retains index 0, the tail, and the cursor position. Among the
    /// rest, keeps every Nth record counted back from the tail; if the kept
    /// set still exceeds `max_records`, the oldest unprotected records are
    /// dropped. Every kept diff whose predecessor was removed is rewritten
    /// to a full snapshot via reconstruction, so no diff ever dangles
    /// against a missing base. Content at retained positions is unchanged.
    pub fn compact(
        &mut self,
        keep_every_nth: usize,
        max_records: usize,
        config: &EngineConfig,
    ) -> EngineResult<CompactionOutcome> {
        let len = self.records.len();
        if len <= 2 {
            return Ok(CompactionOutcome::default());
        }

        let keep_every_nth = keep_every_nth.max(1);
        let protected: BTreeSet<usize> = [0, len - 1, self.cursor].into_iter().collect();
        let mut kept: BTreeSet<usize> = protected.clone();
        for i in 1..len - 1 {
            if (len - 1 - i) % keep_every_nth == 0 {
                kept.insert(i);
            }
        }

        if max_records > 0 && kept.len() > max_records {
            let removable: Vec<usize> = kept
                .iter()
                .copied()
                .filter(|i| !protected.contains(i))
                .collect();
            for index in removable {
                if kept.len() <= max_records {
                    break;
                }
                kept.remove(&index);
            }
        }

        let kept_indices: Vec<usize> = kept.iter().copied().collect();
        let mut new_records = Vec::with_capacity(kept_indices.len());
        let mut rewritten = 0;
        for (new_index, &old_index) in kept_indices.iter().enumerate() {
            let orphaned_diff = !self.records[old_index].is_full()
                && (old_index == 0 || !kept.contains(&(old_index - 1)));
            let mut record = if orphaned_diff {
                let content = self.reconstruct(old_index)?;
                rewritten += 1;
                self.rewrite_as_full(old_index, &content, config)?
            } else {
                self.records[old_index].clone()
            };
            record.index = new_index;
            new_records.push(record);
        }

        let removed = len - new_records.len();
        // The cursor is protected, so it is always in the kept set.
        self.cursor = kept_indices
            .iter()
            .position(|&i| i == self.cursor)
            .unwrap_or(new_records.len() - 1);
        self.records = new_records;

        tracing::debug!(chain = %self.key, removed, rewritten, "compacted chain");
        Ok(CompactionOutcome { removed, rewritten })
    }

    /// Rewrite every Nth record to a full snapshot
    ///
    /// Transparent to readers: the content reconstructed at every index is
    /// unchanged, only the representation of anchor positions is.
    pub fn optimize(&mut self, anchor_every: usize, config: &EngineConfig) -> EngineResult<usize> {
        let anchor_every = anchor_every.max(1);
        let mut rewritten = 0;

        let mut i = anchor_every;
        while i < self.records.len() {
            if !self.records[i].is_full() {
                let content = self.reconstruct(i)?;
                self.records[i] = self.rewrite_as_full(i, &content, config)?;
                rewritten += 1;
            }
            i += anchor_every;
        }

        if rewritten > 0 {
            tracing::debug!(chain = %self.key, rewritten, "optimized anchors");
        }
        Ok(rewritten)
    }

    /// Replace the payload of a record with a full snapshot of `content`,
    /// preserving its metadata
    fn rewrite_as_full(
        &self,
        index: usize,
        content: &str,
        config: &EngineConfig,
    ) -> EngineResult<CheckpointRecord> {
        let record = &self.records[index];
        Self::full_record(
            &self.key,
            record.index,
            record.created_at,
            content,
            record.name.clone(),
            record.description.clone(),
            record.tags.clone(),
            record.vcs_ref.clone(),
            config,
        )
    }

    #[allow(clippy::too_many_arguments)]
    fn full_record(
        key: &str,
        index: usize,
        created_at: DateTime<Utc>,
        content: &str,
        name: Option<String>,
        description: Option<String>,
        tags: BTreeSet<String>,
        vcs_ref: Option<super::types::VcsRef>,
        config: &EngineConfig,
    ) -> EngineResult<CheckpointRecord> {
        let raw = content.as_bytes();
        let raw_bytes = raw.len() as u64;
        let (bytes, compressed) =
            if compression::exceeds_threshold(raw.len(), config.compression_threshold) {
                (compression::compress(raw)?, true)
            } else {
                (raw.to_vec(), false)
            };
        let size_bytes = bytes.len() as u64;

        Ok(CheckpointRecord {
            chain_key: key.to_string(),
            index,
            created_at,
            payload: RecordPayload::Full { bytes },
            compressed,
            size_bytes,
            raw_bytes,
            name,
            description,
            tags,
            vcs_ref,
        })
    }
}
