//! Minimal line diff between two IaC sources.

use std::collections::HashSet;

use serde::Serialize;

/// Lines present in only one of two sources.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CodeDiff {
    /// Lines of the second source that never appear in the first, in order.
    pub added_lines: Vec<String>,
    /// Lines of the first source that never appear in the second, in order.
    pub removed_lines: Vec<String>,
    pub added_count: usize,
    pub removed_count: usize,
}

impl CodeDiff {
    pub fn is_empty(&self) -> bool {
        self.added_count == 0 && self.removed_count == 0
    }
}

/// Set-membership diff: not structural, line moves are invisible.
pub fn code_diff(old: &str, new: &str) -> CodeDiff {
    let old_lines: HashSet<&str> = old.split('\n').collect();
    let new_lines: HashSet<&str> = new.split('\n').collect();

    let added_lines: Vec<String> = new
        .split('\n')
        .filter(|l| !old_lines.contains(l))
        .map(str::to_string)
        .collect();
    let removed_lines: Vec<String> = old
        .split('\n')
        .filter(|l| !new_lines.contains(l))
        .map(str::to_string)
        .collect();

    CodeDiff {
        added_count: added_lines.len(),
        removed_count: removed_lines.len(),
        added_lines,
        removed_lines,
    }
}
