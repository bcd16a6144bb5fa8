//! Shortest edit script between two item sequences.
//!
//! Myers' O(ND) algorithm over an identity predicate, followed by:
//! - aggregation of single-element edits into runs (one run per gap between matches)
//! - optional move pairing: a removed run and an inserted run holding the same
//!   items (by identity) become the two halves of a move
//!
//! Edits come out in a single left-to-right pass: non-decreasing in both old and
//! new index, removals of a gap before its insertions. `ListCache` applies this
//! script directly; `diff()` exposes the same result as `DiffOp`s.

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EditKind {
    Insert,
    Remove,
}

/// One run of the edit script.
///
/// For a removal, `old_index` is the first removed item and `new_index` the
/// position in the new sequence the gap sits at. For an insertion,
/// `new_index` is the first inserted item and `old_index` the old item it is
/// inserted before.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Edit {
    pub kind: EditKind,
    pub old_index: usize,
    pub new_index: usize,
    pub count: usize,
    /// Move id shared by the removal and the insertion of a moved run.
    pub pair: Option<u32>,
}

impl Edit {
    fn remove(old_index: usize, new_index: usize, count: usize) -> Self {
        Self {
            kind: EditKind::Remove,
            old_index,
            new_index,
            count,
            pair: None,
        }
    }

    fn insert(old_index: usize, new_index: usize, count: usize) -> Self {
        Self {
            kind: EditKind::Insert,
            old_index,
            new_index,
            count,
            pair: None,
        }
    }

    /// Split off the sub-run `[offset, offset + len)`. Returns (before, mid, after).
    fn split(self, offset: usize, len: usize) -> (Option<Edit>, Edit, Option<Edit>) {
        let piece = |at: usize, count: usize| match self.kind {
            EditKind::Remove => Edit::remove(self.old_index + at, self.new_index, count),
            EditKind::Insert => Edit::insert(self.old_index, self.new_index + at, count),
        };
        let before = (offset > 0).then(|| piece(0, offset));
        let after_len = self.count - offset - len;
        let after = (after_len > 0).then(|| piece(offset + len, after_len));
        (before, piece(offset, len), after)
    }
}

/// Aggregated operation, as exposed to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum DiffOp {
    Insert { new_index: usize, count: usize },
    Remove { old_index: usize, count: usize },
    /// Run of `count` old items at `from` that ends up at `to` in the new sequence.
    Move { from: usize, to: usize, count: usize },
}

/// Diff `old` against `new` and return aggregated operations in script order.
///
/// A move is reported once, at the position of its first half.
pub fn diff<T>(old: &[T], new: &[T], eq: impl Fn(&T, &T) -> bool, use_move: bool) -> Vec<DiffOp> {
    let edits = edit_script(old, new, eq, use_move);
    let mut ops = Vec::with_capacity(edits.len());
    let mut seen = std::collections::HashSet::new();

    for (i, edit) in edits.iter().enumerate() {
        match edit.pair {
            Some(id) => {
                if !seen.insert(id) {
                    continue;
                }
                let Some(partner) = edits[i + 1..].iter().find(|e| e.pair == Some(id)) else {
                    continue;
                };
                let (removed, inserted) = match edit.kind {
                    EditKind::Remove => (edit, partner),
                    EditKind::Insert => (partner, edit),
                };
                ops.push(DiffOp::Move {
                    from: removed.old_index,
                    to: inserted.new_index,
                    count: edit.count,
                });
            }
            None => ops.push(match edit.kind {
                EditKind::Insert => DiffOp::Insert {
                    new_index: edit.new_index,
                    count: edit.count,
                },
                EditKind::Remove => DiffOp::Remove {
                    old_index: edit.old_index,
                    count: edit.count,
                },
            }),
        }
    }
    ops
}

/// Full edit script, runs aggregated, moves paired when `use_move` is set.
pub fn edit_script<T>(old: &[T], new: &[T], eq: impl Fn(&T, &T) -> bool, use_move: bool) -> Vec<Edit> {
    let matches = common_subsequence(old, new, &eq);
    let mut edits = gap_runs(&matches, old.len(), new.len());
    if use_move {
        pair_moves(&mut edits, old, new, &eq);
    }
    edits
}

/// Matched `(old, new)` index pairs of a longest common subsequence, ascending.
fn common_subsequence<T>(old: &[T], new: &[T], eq: &impl Fn(&T, &T) -> bool) -> Vec<(usize, usize)> {
    let n = old.len() as isize;
    let m = new.len() as isize;
    let max = (n + m) as usize;
    // Diagonal k lives at v[k + offset]; -1 marks an unreachable diagonal
    let offset = max as isize + 1;
    let at = |k: isize| (k + offset) as usize;

    let mut v = vec![-1isize; 2 * max + 3];
    let mut trace: Vec<Vec<isize>> = Vec::new();

    let snake = |mut x: isize, mut y: isize| {
        while x < n && y < m && eq(&old[x as usize], &new[y as usize]) {
            x += 1;
            y += 1;
        }
        x
    };

    // Which neighbour diagonal step d reached k from, given v after step d - 1
    let choose = |v: &[isize], k: isize, d: isize| -> Option<(bool, isize)> {
        let down = (k < d && v[at(k + 1)] >= 0 && v[at(k + 1)] - k <= m).then(|| v[at(k + 1)]);
        let right = (k > -d && v[at(k - 1)] >= 0 && v[at(k - 1)] < n).then(|| v[at(k - 1)] + 1);
        match (down, right) {
            (Some(xd), Some(xr)) if xr > xd => Some((false, xr)),
            (Some(xd), _) => Some((true, xd)),
            (None, Some(xr)) => Some((false, xr)),
            (None, None) => None,
        }
    };

    let mut d_final = 0isize;
    'outer: for d in 0..=max as isize {
        if d == 0 {
            v[at(0)] = snake(0, 0);
        } else {
            let prev = v.clone();
            for k in (-d..=d).step_by(2) {
                v[at(k)] = match choose(prev.as_slice(), k, d) {
                    Some((_, x)) => snake(x, x - k),
                    None => -1,
                };
            }
        }
        trace.push(v.clone());
        for k in (-d..=d).step_by(2) {
            if v[at(k)] >= n && v[at(k)] - k >= m {
                d_final = d;
                break 'outer;
            }
        }
    }

    // Walk back from (n, m), collecting diagonal (matched) steps
    let mut matches = Vec::new();
    let (mut x, mut y) = (n, m);
    for d in (1..=d_final).rev() {
        let prev = &trace[(d - 1) as usize];
        let k = x - y;
        let Some((down, _)) = choose(prev.as_slice(), k, d) else {
            break;
        };
        let prev_k = if down { k + 1 } else { k - 1 };
        let prev_x = prev[at(prev_k)];
        let prev_y = prev_x - prev_k;
        let mid_x = if down { prev_x } else { prev_x + 1 };
        while x > mid_x {
            x -= 1;
            y -= 1;
            matches.push((x as usize, y as usize));
        }
        x = prev_x;
        y = prev_y;
    }
    while x > 0 && y > 0 {
        x -= 1;
        y -= 1;
        matches.push((x as usize, y as usize));
    }
    matches.reverse();
    matches
}

/// Turn the unmatched gaps into runs: removals first, then insertions.
fn gap_runs(matches: &[(usize, usize)], n: usize, m: usize) -> Vec<Edit> {
    let mut edits = Vec::new();
    let (mut x0, mut y0) = (0, 0);
    for &(mx, my) in matches.iter().chain(std::iter::once(&(n, m))) {
        if mx > x0 {
            edits.push(Edit::remove(x0, y0, mx - x0));
        }
        if my > y0 {
            edits.push(Edit::insert(mx, y0, my - y0));
        }
        x0 = mx + 1;
        y0 = my + 1;
    }
    edits
}

/// Longest window shared by a removed and an inserted run: the shorter run
/// must appear whole inside the longer one. Returns (removed offset, inserted offset, len).
fn shared_window<T>(
    removed: &Edit,
    inserted: &Edit,
    old: &[T],
    new: &[T],
    eq: &impl Fn(&T, &T) -> bool,
) -> Option<(usize, usize, usize)> {
    let len = removed.count.min(inserted.count);
    let same = |a: usize, b: usize| (0..len).all(|i| eq(&old[removed.old_index + a + i], &new[inserted.new_index + b + i]));

    if removed.count <= inserted.count {
        (0..=inserted.count - len).find(|&b| same(0, b)).map(|b| (0, b, len))
    } else {
        (0..=removed.count - len).find(|&a| same(a, 0)).map(|a| (a, 0, len))
    }
}

/// Replace `edits[idx]` by its split pieces. Returns (index of the middle piece, pieces added).
fn split_at(edits: &mut Vec<Edit>, idx: usize, offset: usize, len: usize) -> (usize, usize) {
    let (before, mid, after) = edits[idx].split(offset, len);
    let mut pieces = Vec::with_capacity(3);
    let mut mid_at = idx;
    if let Some(before) = before {
        pieces.push(before);
        mid_at += 1;
    }
    pieces.push(mid);
    pieces.extend(after);
    let added = pieces.len() - 1;
    edits.splice(idx..=idx, pieces);
    (mid_at, added)
}

fn pair_moves<T>(edits: &mut Vec<Edit>, old: &[T], new: &[T], eq: &impl Fn(&T, &T) -> bool) {
    let mut next_id = 0u32;
    let mut i = 0;
    while i < edits.len() {
        if edits[i].pair.is_some() {
            i += 1;
            continue;
        }

        let found = (i + 1..edits.len()).find_map(|j| {
            let (a, b) = (&edits[i], &edits[j]);
            if b.pair.is_some() || a.kind == b.kind {
                return None;
            }
            let window = match a.kind {
                EditKind::Remove => shared_window(a, b, old, new, eq),
                EditKind::Insert => shared_window(b, a, old, new, eq).map(|(rb, ia, len)| (ia, rb, len)),
            };
            window.map(|(off_i, off_j, len)| (j, off_i, off_j, len))
        });

        let Some((j, off_i, off_j, len)) = found else {
            i += 1;
            continue;
        };

        // Later run first so `i` stays valid
        let (mut mid_j, _) = split_at(edits, j, off_j, len);
        let (mid_i, added) = split_at(edits, i, off_i, len);
        mid_j += added;

        edits[mid_i].pair = Some(next_id);
        edits[mid_j].pair = Some(next_id);
        next_id += 1;
        // A leftover prefix now sits at `i`; look at it again
    }
}
