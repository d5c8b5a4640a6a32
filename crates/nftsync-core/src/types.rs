//! Small shared value types.

use std::fmt;

use serde::{Deserialize, Serialize};

// ─── BlockRange ──────────────────────────────────────────────────────────────

/// An inclusive block range `[from, to]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BlockRange {
    pub from: u64,
    pub to: u64,
}

impl BlockRange {
    pub fn new(from: u64, to: u64) -> Self {
        Self { from, to }
    }

    /// Number of blocks covered. Zero when `from > to`.
    pub fn span(&self) -> u64 {
        if self.from > self.to {
            0
        } else {
            self.to - self.from + 1
        }
    }

    pub fn is_empty(&self) -> bool {
        self.from > self.to
    }

    pub fn contains(&self, block: u64) -> bool {
        self.from <= block && block <= self.to
    }

    /// Split into consecutive sub-ranges of at most `size` blocks.
    ///
    /// A `size` of zero is treated as one.
    pub fn chunks(&self, size: u64) -> Chunks {
        Chunks {
            cursor: self.from,
            to: self.to,
            size: size.max(1),
            done: self.is_empty(),
        }
    }
}

impl fmt::Display for BlockRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {}]", self.from, self.to)
    }
}

/// End of the chunk starting at `cursor`, clamped to `to`.
pub fn chunk_end(cursor: u64, size: u64, to: u64) -> u64 {
    cursor.saturating_add(size.max(1) - 1).min(to)
}

/// Iterator returned by [`BlockRange::chunks`].
#[derive(Debug, Clone)]
pub struct Chunks {
    cursor: u64,
    to: u64,
    size: u64,
    done: bool,
}

impl Iterator for Chunks {
    type Item = BlockRange;

    fn next(&mut self) -> Option<BlockRange> {
        if self.done || self.cursor > self.to {
            return None;
        }
        let end = chunk_end(self.cursor, self.size, self.to);
        let range = BlockRange::new(self.cursor, end);
        match end.checked_add(1) {
            Some(next) => self.cursor = next,
            None => self.done = true,
        }
        if end == self.to {
            self.done = true;
        }
        Some(range)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_into_bounded_chunks() {
        let chunks: Vec<_> = BlockRange::new(100, 250).chunks(100).collect();
        assert_eq!(chunks, vec![BlockRange::new(100, 199), BlockRange::new(200, 250)]);
    }

    #[test]
    fn chunks_cover_range_without_gaps_or_overlap() {
        for (from, to, size) in [(0, 0, 1), (5, 5, 400), (0, 999, 400), (17, 1_234, 7), (1, 10, 10)] {
            let chunks: Vec<_> = BlockRange::new(from, to).chunks(size).collect();
            assert_eq!(chunks.first().map(|c| c.from), Some(from));
            assert_eq!(chunks.last().map(|c| c.to), Some(to));
            for pair in chunks.windows(2) {
                assert_eq!(pair[0].to + 1, pair[1].from);
            }
            assert!(chunks.iter().all(|c| c.span() >= 1 && c.span() <= size));
            let covered: u64 = chunks.iter().map(BlockRange::span).sum();
            assert_eq!(covered, to - from + 1);
        }
    }

    #[test]
    fn empty_range_yields_nothing() {
        assert_eq!(BlockRange::new(10, 9).chunks(5).count(), 0);
        assert_eq!(BlockRange::new(10, 9).span(), 0);
    }

    #[test]
    fn chunk_end_clamps() {
        assert_eq!(chunk_end(100, 100, 250), 199);
        assert_eq!(chunk_end(200, 100, 250), 250);
        assert_eq!(chunk_end(u64::MAX - 1, 10, u64::MAX), u64::MAX);
    }
}
