//! Checkpoint record types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::compression;
use crate::error::EngineResult;

/// Reference to a version-control state at checkpoint time
///
/// Opaque to the engine; branch and commit are recorded as metadata and
/// passed back out unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VcsRef {
    pub branch: String,
    pub commit: String,
}

impl VcsRef {
    /// Create a new VCS reference
    pub fn new(branch: impl Into<String>, commit: impl Into<String>) -> Self {
        Self {
            branch: branch.into(),
            commit: commit.into(),
        }
    }
}

/// Kind of a checkpoint record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordKind {
    /// Full content snapshot (anchor)
    Full,
    /// Line diff against the previous index
    Diff,
}

impl std::fmt::Display for RecordKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Full => write!(f, "full"),
            Self::Diff => write!(f, "diff"),
        }
    }
}

/// Payload of a checkpoint record
///
/// A tagged variant rather than a kind flag next to opaque bytes, so every
/// consumer has to handle both cases explicitly. `bytes` holds the
/// (possibly compressed) UTF-8 content for `Full`, or the serialized
/// [`TextDiff`](crate::diff::TextDiff) for `Diff`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum RecordPayload {
    Full { bytes: Vec<u8> },
    Diff { bytes: Vec<u8> },
}

impl RecordPayload {
    /// Get the record kind
    pub fn kind(&self) -> RecordKind {
        match self {
            Self::Full { .. } => RecordKind::Full,
            Self::Diff { .. } => RecordKind::Diff,
        }
    }

    /// Get the stored bytes
    pub fn bytes(&self) -> &[u8] {
        match self {
            Self::Full { bytes } | Self::Diff { bytes } => bytes,
        }
    }
}

/// One checkpoint in a chain
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointRecord {
    /// Chain this record belongs to
    pub chain_key: String,

    /// Position in the chain (0-based, monotonic)
    pub index: usize,

    /// When the checkpoint was created
    pub created_at: DateTime<Utc>,

    /// Full snapshot or diff payload
    pub payload: RecordPayload,

    /// Whether the payload bytes are gzip-compressed
    pub compressed: bool,

    /// Stored payload size in bytes (post-compression); the unit the
    /// storage budget is enforced in
    pub size_bytes: u64,

    /// Payload size before compression
    pub raw_bytes: u64,

    /// Human-readable name (optional)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Description of what this checkpoint captures
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Tags attached to this checkpoint
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub tags: BTreeSet<String>,

    /// VCS state at checkpoint time
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vcs_ref: Option<VcsRef>,
}

impl CheckpointRecord {
    /// Get the record kind
    pub fn kind(&self) -> RecordKind {
        self.payload.kind()
    }

    /// Check if this record is a full snapshot
    pub fn is_full(&self) -> bool {
        matches!(self.payload, RecordPayload::Full { .. })
    }

    /// Get the payload bytes, decompressed if necessary
    pub fn raw_payload(&self) -> EngineResult<Vec<u8>> {
        if self.compressed {
            compression::decompress(self.payload.bytes())
        } else {
            Ok(self.payload.bytes().to_vec())
        }
    }
}

/// Options for creating a checkpoint
#[derive(Debug, Clone, Default)]
pub struct CheckpointOptions {
    /// Store a full snapshot even where a diff would do
    pub force_full: bool,

    /// Human-readable name
    pub name: Option<String>,

    /// Description of what this checkpoint captures
    pub description: Option<String>,

    /// Tags to attach
    pub tags: BTreeSet<String>,

    /// VCS state to record
    pub vcs_ref: Option<VcsRef>,
}

impl CheckpointOptions {
    /// Create empty options
    pub fn new() -> Self {
        Self::default()
    }

    /// Force a full snapshot
    pub fn force_full(mut self) -> Self {
        self.force_full = true;
        self
    }

    /// Set checkpoint name
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Set checkpoint description
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Add a tag
    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.insert(tag.into());
        self
    }

    /// Set the VCS reference
    pub fn with_vcs_ref(mut self, vcs_ref: VcsRef) -> Self {
        self.vcs_ref = Some(vcs_ref);
        self
    }
}
