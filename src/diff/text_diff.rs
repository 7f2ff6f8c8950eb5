//! LCS-based text diff

use crate::error::{EngineError, EngineResult};
use serde::{Deserialize, Serialize};

/// A single diff operation over line runs
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiffOp {
    /// Copy the next N lines from the old text
    Keep(usize),
    /// Skip the next N lines of the old text
    Delete(usize),
    /// Emit these lines
    Insert(Vec<String>),
}

/// Line-level diff between two text snapshots
///
/// Computed via Longest Common Subsequence over the line sequences, O(n*m)
/// time and space in line counts. Not tuned for huge files; checkpoint
/// payloads are expected to be source-file sized.
///
/// Lines are split inclusive of their terminators, so any pair of texts
/// round-trips exactly, including texts without a trailing newline.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextDiff {
    ops: Vec<DiffOp>,
}

/// Split text into lines, each retaining its terminator
fn split_lines(text: &str) -> Vec<&str> {
    text.split_inclusive('\n').collect()
}

impl TextDiff {
    /// Compute the diff that transforms `old` into `new`
    pub fn encode(old: &str, new: &str) -> Self {
        let old_lines = split_lines(old);
        let new_lines = split_lines(new);
        let n = old_lines.len();
        let m = new_lines.len();

        // lcs[i][j] = LCS length of old_lines[i..] and new_lines[j..]
        let mut lcs = vec![vec![0usize; m + 1]; n + 1];
        for i in (0..n).rev() {
            for j in (0..m).rev() {
                lcs[i][j] = if old_lines[i] == new_lines[j] {
                    lcs[i + 1][j + 1] + 1
                } else {
                    lcs[i + 1][j].max(lcs[i][j + 1])
                };
            }
        }

        let mut ops: Vec<DiffOp> = Vec::new();
        let (mut i, mut j) = (0, 0);
        while i < n && j < m {
            if old_lines[i] == new_lines[j] {
                Self::push_keep(&mut ops, 1);
                i += 1;
                j += 1;
            } else if lcs[i + 1][j] >= lcs[i][j + 1] {
                Self::push_delete(&mut ops, 1);
                i += 1;
            } else {
                Self::push_insert(&mut ops, new_lines[j]);
                j += 1;
            }
        }
        if i < n {
            Self::push_delete(&mut ops, n - i);
        }
        while j < m {
            Self::push_insert(&mut ops, new_lines[j]);
            j += 1;
        }

        Self { ops }
    }

    /// Apply this diff to `old`, producing the new text
    ///
    /// Exact inverse of [`TextDiff::encode`]: for any texts A and B,
    /// `TextDiff::encode(A, B).apply(A) == B`. Applying against content the
    /// diff was not encoded for fails with `CorruptRecord`.
    pub fn apply(&self, old: &str) -> EngineResult<String> {
        let old_lines = split_lines(old);
        let mut out = String::with_capacity(old.len());
        let mut pos = 0usize;

        for op in &self.ops {
            match op {
                DiffOp::Keep(count) => {
                    let end = pos.checked_add(*count).filter(|e| *e <= old_lines.len());
                    let end = end.ok_or_else(|| {
                        EngineError::corrupt("diff keep run exceeds source length")
                    })?;
                    for line in &old_lines[pos..end] {
                        out.push_str(line);
                    }
                    pos = end;
                }
                DiffOp::Delete(count) => {
                    let end = pos.checked_add(*count).filter(|e| *e <= old_lines.len());
                    pos = end.ok_or_else(|| {
                        EngineError::corrupt("diff delete run exceeds source length")
                    })?;
                }
                DiffOp::Insert(lines) => {
                    for line in lines {
                        out.push_str(line);
                    }
                }
            }
        }

        if pos != old_lines.len() {
            return Err(EngineError::corrupt(format!(
                "diff consumed {} of {} source lines",
                pos,
                old_lines.len()
            )));
        }

        Ok(out)
    }

    /// Check if this diff changes nothing
    pub fn is_empty(&self) -> bool {
        !self
            .ops
            .iter()
            .any(|op| matches!(op, DiffOp::Delete(_) | DiffOp::Insert(_)))
    }

    /// Count inserted lines
    pub fn added_count(&self) -> usize {
        self.ops
            .iter()
            .map(|op| match op {
                DiffOp::Insert(lines) => lines.len(),
                _ => 0,
            })
            .sum()
    }

    /// Count deleted lines
    pub fn removed_count(&self) -> usize {
        self.ops
            .iter()
            .map(|op| match op {
                DiffOp::Delete(count) => *count,
                _ => 0,
            })
            .sum()
    }

    /// Render the diff in a unified-style format for display
    pub fn format_unified(&self, old: &str) -> String {
        let old_lines = split_lines(old);
        let mut output = String::new();
        let mut pos = 0usize;

        for op in &self.ops {
            match op {
                DiffOp::Keep(count) => {
                    for line in old_lines.iter().skip(pos).take(*count) {
                        output.push(' ');
                        output.push_str(line.trim_end_matches('\n'));
                        output.push('\n');
                    }
                    pos += count;
                }
                DiffOp::Delete(count) => {
                    for line in old_lines.iter().skip(pos).take(*count) {
                        output.push('-');
                        output.push_str(line.trim_end_matches('\n'));
                        output.push('\n');
                    }
                    pos += count;
                }
                DiffOp::Insert(lines) => {
                    for line in lines {
                        output.push('+');
                        output.push_str(line.trim_end_matches('\n'));
                        output.push('\n');
                    }
                }
            }
        }

        output
    }

    fn push_keep(ops: &mut Vec<DiffOp>, count: usize) {
        if let Some(DiffOp::Keep(existing)) = ops.last_mut() {
            *existing += count;
        } else {
            ops.push(DiffOp::Keep(count));
        }
    }

    fn push_delete(ops: &mut Vec<DiffOp>, count: usize) {
        if let Some(DiffOp::Delete(existing)) = ops.last_mut() {
            *existing += count;
        } else {
            ops.push(DiffOp::Delete(count));
        }
    }

    fn push_insert(ops: &mut Vec<DiffOp>, line: &str) {
        if let Some(DiffOp::Insert(lines)) = ops.last_mut() {
            lines.push(line.to_string());
        } else {
            ops.push(DiffOp::Insert(vec![line.to_string()]));
        }
    }
}
