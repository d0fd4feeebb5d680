//! Source locations: the join key shared by every stage of the pipeline.

use std::{collections::HashMap, fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// 1-based line/column pair as reported by the markdown parser.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LineColumn {
    pub line: usize,
    pub column: usize,
}

impl LineColumn {
    pub const fn new(line: usize, column: usize) -> Self {
        Self { line, column }
    }
}

/// Inclusive span of one node in the reformatted document.
///
/// Ordering follows document occurrence (start first, then end), and the
/// `Display` form is the location string that asynchronous job results carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SourceRange {
    pub start: LineColumn,
    pub end: LineColumn,
}

impl SourceRange {
    pub const fn new(start: LineColumn, end: LineColumn) -> Self {
        Self { start, end }
    }

    pub const fn from_coords(
        start_line: usize,
        start_column: usize,
        end_line: usize,
        end_column: usize,
    ) -> Self {
        Self {
            start: LineColumn::new(start_line, start_column),
            end: LineColumn::new(end_line, end_column),
        }
    }

    /// String key used by render jobs and the render cache.
    pub fn key(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for SourceRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}-{}:{}",
            self.start.line, self.start.column, self.end.line, self.end.column
        )
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("invalid source range `{input}`")]
pub struct ParseRangeError {
    input: String,
}

impl FromStr for SourceRange {
    type Err = ParseRangeError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let invalid = || ParseRangeError {
            input: value.to_string(),
        };

        let (start, end) = value.split_once('-').ok_or_else(invalid)?;
        let parse_pair = |pair: &str| -> Option<LineColumn> {
            let (line, column) = pair.split_once(':')?;
            Some(LineColumn::new(line.parse().ok()?, column.parse().ok()?))
        };

        Ok(Self {
            start: parse_pair(start).ok_or_else(invalid)?,
            end: parse_pair(end).ok_or_else(invalid)?,
        })
    }
}

/// Reverse lookup from a location string back to its range.
#[derive(Debug, Clone, Default)]
pub struct LocationIndex {
    entries: HashMap<String, SourceRange>,
}

impl LocationIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `range` under its string key. Returns `false` when the key was
    /// already present.
    pub fn insert(&mut self, range: SourceRange) -> bool {
        self.entries.insert(range.key(), range).is_none()
    }

    pub fn lookup(&self, key: &str) -> Option<SourceRange> {
        self.entries.get(key).copied()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
