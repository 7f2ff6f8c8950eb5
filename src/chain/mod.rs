//! Checkpoint chains and record types
//!
//! A chain is the ordered checkpoint history of one resource within a
//! session: a base full snapshot at index 0, diffs against the previous
//! index after that, and periodic full "anchor" snapshots to bound
//! reconstruction cost.

mod chain;
mod types;

pub use chain::{CheckpointChain, CompactionOutcome};
pub use types::{CheckpointOptions, CheckpointRecord, RecordKind, RecordPayload, VcsRef};
