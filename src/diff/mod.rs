//! Line-level diff codec
//!
//! Computes and applies diffs between two text snapshots. Diffs are the
//! delta representation stored by checkpoint chains: a `Diff` record holds a
//! serialized [`TextDiff`] against the content at the previous index.

mod text_diff;

pub use text_diff::{DiffOp, TextDiff};
