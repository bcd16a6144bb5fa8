//! Half-open index interval `[offset, offset + count)`.
//!
//! Used for chunk bookkeeping (what a fetch appended) and for splitting a
//! range deletion into its materialized and not-yet-loaded parts.

use serde::{Deserialize, Serialize};

/// Half-open interval of list indices.
///
/// `count == 0` means empty regardless of `offset`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Range {
    pub offset: usize,
    pub count: usize,
}

impl Range {
    pub const EMPTY: Range = Range { offset: 0, count: 0 };

    pub fn new(offset: usize, count: usize) -> Self {
        Self { offset, count }
    }

    /// Build from inclusive bounds. Returns an empty range when `last < first`.
    pub fn inclusive(first: usize, last: usize) -> Self {
        if last < first {
            Self::EMPTY
        } else {
            Self::new(first, last - first + 1)
        }
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// One past the last index.
    pub fn end(&self) -> usize {
        self.offset + self.count
    }

    /// Last index covered, `None` when empty.
    pub fn last(&self) -> Option<usize> {
        if self.is_empty() {
            None
        } else {
            Some(self.end() - 1)
        }
    }

    pub fn contains(&self, index: usize) -> bool {
        !self.is_empty() && self.offset <= index && index < self.end()
    }

    /// Intersection of both ranges, empty if disjoint or either side is empty.
    pub fn overlap(&self, other: &Range) -> Range {
        if self.is_empty() || other.is_empty() {
            return Range::EMPTY;
        }
        let start = self.offset.max(other.offset);
        let end = self.end().min(other.end());
        if start >= end {
            Range::EMPTY
        } else {
            Range::new(start, end - start)
        }
    }
}

impl From<std::ops::Range<usize>> for Range {
    fn from(r: std::ops::Range<usize>) -> Self {
        Range::new(r.start, r.end.saturating_sub(r.start))
    }
}

impl From<Range> for std::ops::Range<usize> {
    fn from(r: Range) -> Self {
        r.offset..r.end()
    }
}
