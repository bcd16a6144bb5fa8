//! Index redirection during a move-aware reload.
//!
//! While a reload is being reconciled, indices past the frontier are served
//! from the stale snapshot. Moves already announced make that snapshot
//! disagree with what consumers were told:
//! - `Add`: a run moved forward. It still sits at `src` in the stale
//!   snapshot but is announced before the stale item at `pos`.
//! - `Del`: a run moved backward, across the frontier. The stale items
//!   `[pos, pos + count)` are now served from the new snapshot and must be
//!   skipped.
//!
//! Entries are ordered by stale position and walked in that order.

use std::cmp::Ordering;
use std::collections::BTreeSet;

#[derive(Debug, Clone, Copy)]
pub enum Redirection {
    Add {
        pos: usize,
        /// Index of the run in the new snapshot; orders runs anchored at the same `pos`.
        new_index: usize,
        src: usize,
        count: usize,
    },
    Del {
        pos: usize,
        count: usize,
    },
}

impl Redirection {
    /// Sort key: position, then additions before deletions, then new index.
    fn key(&self) -> (usize, u8, usize) {
        match *self {
            Redirection::Add { pos, new_index, .. } => (pos, 0, new_index),
            Redirection::Del { pos, .. } => (pos, 1, 0),
        }
    }

    pub fn pos(&self) -> usize {
        match *self {
            Redirection::Add { pos, .. } | Redirection::Del { pos, .. } => pos,
        }
    }

    pub fn count(&self) -> usize {
        match *self {
            Redirection::Add { count, .. } | Redirection::Del { count, .. } => count,
        }
    }
}

impl PartialEq for Redirection {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

impl Eq for Redirection {}

impl PartialOrd for Redirection {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Redirection {
    fn cmp(&self, other: &Self) -> Ordering {
        self.key().cmp(&other.key())
    }
}

#[derive(Debug, Clone, Default)]
pub struct RedirectTable {
    entries: BTreeSet<Redirection>,
}

impl RedirectTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn insert(&mut self, entry: Redirection) {
        self.entries.insert(entry);
    }

    pub fn iter(&self) -> impl Iterator<Item = &Redirection> {
        self.entries.iter()
    }

    /// Remove the forward-move run anchored at `pos` with the given new index.
    pub fn take_add(&mut self, pos: usize, new_index: usize) -> Option<Redirection> {
        self.entries.take(&Redirection::Add {
            pos,
            new_index,
            src: 0,
            count: 0,
        })
    }

    /// Remove the backward-move hole starting at `pos`.
    pub fn take_del(&mut self, pos: usize) -> Option<Redirection> {
        self.entries.take(&Redirection::Del { pos, count: 0 })
    }

    /// Translate a position counted from the frontier's stale index into the
    /// physical index of the stale item served there.
    ///
    /// Overlapping entries are not merged; each one is applied in order.
    pub fn fixup_index_for_move(&self, mut index: usize) -> usize {
        for entry in &self.entries {
            match *entry {
                Redirection::Add { pos, src, count, .. } => {
                    if index < pos {
                        continue;
                    }
                    if index < pos + count {
                        return src + (index - pos);
                    }
                    index -= count;
                }
                Redirection::Del { pos, count } => {
                    if index >= pos {
                        index += count;
                    }
                }
            }
        }
        index
    }

    /// How many positions past the frontier the stale item at `pos` is served.
    pub fn virtual_offset(&self, frontier: usize, pos: usize) -> usize {
        let mut offset = pos - frontier;
        for entry in &self.entries {
            match *entry {
                Redirection::Add { pos: at, count, .. } if at <= pos => offset += count,
                Redirection::Del { pos: at, count } if at + count <= pos => offset -= count,
                _ => {}
            }
        }
        offset
    }

    /// Like `virtual_offset`, for a forward-moved run anchored at `pos`:
    /// only runs sorting before it at the same anchor count.
    pub fn virtual_offset_of_run(&self, frontier: usize, pos: usize, new_index: usize) -> usize {
        let run = (pos, 0u8, new_index);
        let mut offset = pos - frontier;
        for entry in &self.entries {
            match *entry {
                Redirection::Add { count, .. } if entry.key() < run => offset += count,
                Redirection::Del { pos: at, count } if at + count <= pos => offset -= count,
                _ => {}
            }
        }
        offset
    }
}
