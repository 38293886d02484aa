//! Lookup grid: a dense grid of indices-into-lists, paired with one or more
//! position lists so that list membership can be tested, added, and removed
//! in O(1).

use crate::error::Result;
use crate::grid::DenseGrid;
use crate::vector::VecDi;

/// Sentinel meaning "not tracked in this list".
pub const NULL_IDX: u32 = u32::MAX;

/// Single-index lookup grid: each cell stores at most one list index, shared
/// across all `N` lists, so a position may be tracked in at most one list at
/// a time.
#[derive(Debug, Clone)]
pub struct LookupGrid<const D: usize> {
    grid: DenseGrid<u32, D>,
    lists: Vec<Vec<VecDi<D>>>,
}

impl<const D: usize> LookupGrid<D> {
    /// Builds a lookup grid with `num_lists` empty lists, every cell
    /// initially untracked.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::InvalidDimensions`] if `size` has a
    /// non-positive axis.
    pub fn new(size: VecDi<D>, offset: VecDi<D>, num_lists: usize) -> Result<Self> {
        Ok(Self {
            grid: DenseGrid::new(size, offset, NULL_IDX)?,
            lists: vec![Vec::new(); num_lists],
        })
    }

    /// The backing dense grid of indices.
    #[must_use]
    pub const fn grid(&self) -> &DenseGrid<u32, D> {
        &self.grid
    }

    /// The position list for `list`.
    #[must_use]
    pub fn list(&self, list: usize) -> &[VecDi<D>] {
        &self.lists[list]
    }

    /// Whether `p` is tracked in any list.
    #[must_use]
    pub fn is_tracked(&self, p: &VecDi<D>) -> bool {
        self.grid.inside(p) && self.grid.get_unchecked(p) != NULL_IDX
    }

    /// Whether `p` is tracked specifically in `list`. Since a position
    /// belongs to at most one list in the single-index scheme, this is
    /// simply "tracked, and the cell's value equals the number of prior
    /// entries we'd expect" — but there is no stored list id per cell, so
    /// instead this walks the target list directly by index; callers that
    /// already know the cell's raw index should prefer that.
    #[must_use]
    pub fn is_tracked_in(&self, p: &VecDi<D>, list: usize) -> bool {
        if !self.is_tracked(p) {
            return false;
        }
        let idx = self.grid.get_unchecked(p) as usize;
        self.lists[list].get(idx) == Some(p)
    }

    /// Appends `p` to `list`, setting its cell to the new tail index.
    /// Returns `false` (no-op) if `p` is already tracked in any list.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::OutOfBounds`] if `p` is outside the grid.
    pub fn track(&mut self, p: &VecDi<D>, list: usize) -> Result<bool> {
        if !self.grid.inside(p) {
            return Err(crate::Error::OutOfBounds);
        }
        if self.is_tracked(p) {
            return Ok(false);
        }
        let new_idx = self.lists[list].len() as u32;
        self.lists[list].push(*p);
        self.grid.set_unchecked(p, new_idx);
        Ok(true)
    }

    /// Removes `p` from `list` via swap-remove, preserving the lookup
    /// invariant: the swapped tail position's cell is updated to the
    /// vacated index. No-op if `p` is not tracked in `list`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::OutOfBounds`] if `p` is outside the grid.
    pub fn untrack(&mut self, p: &VecDi<D>, list: usize) -> Result<bool> {
        if !self.grid.inside(p) {
            return Err(crate::Error::OutOfBounds);
        }
        if !self.is_tracked_in(p, list) {
            return Ok(false);
        }
        let idx = self.grid.get_unchecked(p) as usize;
        let last = self.lists[list].len() - 1;
        self.lists[list].swap(idx, last);
        self.lists[list].pop();
        if idx < self.lists[list].len() {
            let moved = self.lists[list][idx];
            self.grid.set_unchecked(&moved, idx as u32);
        }
        self.grid.set_unchecked(p, NULL_IDX);
        Ok(true)
    }

    /// Clears `list`, setting every member cell back to [`NULL_IDX`].
    pub fn reset(&mut self, list: usize) {
        for p in self.lists[list].clone() {
            self.grid.set_unchecked(&p, NULL_IDX);
        }
        self.lists[list].clear();
    }

    /// Number of lists.
    #[must_use]
    pub fn num_lists(&self) -> usize {
        self.lists.len()
    }
}

/// Multi-index lookup grid: each cell stores one index per list (as a tuple
/// of length `N`), so a position may be tracked in several lists at once.
#[derive(Debug, Clone)]
pub struct MultiLookupGrid<const D: usize> {
    grid: DenseGrid<Vec<u32>, D>,
    lists: Vec<Vec<VecDi<D>>>,
    num_lists: usize,
}

impl<const D: usize> MultiLookupGrid<D> {
    /// Builds a multi-index lookup grid with `num_lists` independent lists.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::InvalidDimensions`] if `size` has a
    /// non-positive axis.
    pub fn new(size: VecDi<D>, offset: VecDi<D>, num_lists: usize) -> Result<Self> {
        Ok(Self {
            grid: DenseGrid::new(size, offset, vec![NULL_IDX; num_lists])?,
            lists: vec![Vec::new(); num_lists],
            num_lists,
        })
    }

    /// The position list for `list`.
    #[must_use]
    pub fn list(&self, list: usize) -> &[VecDi<D>] {
        &self.lists[list]
    }

    /// Whether `p` is tracked in `list`.
    #[must_use]
    pub fn is_tracked_in(&self, p: &VecDi<D>, list: usize) -> bool {
        self.grid.inside(p) && self.grid.get_unchecked(p)[list] != NULL_IDX
    }

    /// Appends `p` to `list`. Returns `false` (no-op) if already tracked in
    /// `list`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::OutOfBounds`] if `p` is outside the grid.
    pub fn track(&mut self, p: &VecDi<D>, list: usize) -> Result<bool> {
        if !self.grid.inside(p) {
            return Err(crate::Error::OutOfBounds);
        }
        if self.is_tracked_in(p, list) {
            return Ok(false);
        }
        let new_idx = self.lists[list].len() as u32;
        self.lists[list].push(*p);
        let mut cell = self.grid.get_unchecked(p);
        cell[list] = new_idx;
        self.grid.set_unchecked(p, cell);
        Ok(true)
    }

    /// Removes `p` from `list` via swap-remove. No-op if not tracked there.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::OutOfBounds`] if `p` is outside the grid.
    pub fn untrack(&mut self, p: &VecDi<D>, list: usize) -> Result<bool> {
        if !self.grid.inside(p) {
            return Err(crate::Error::OutOfBounds);
        }
        if !self.is_tracked_in(p, list) {
            return Ok(false);
        }
        let idx = self.grid.get_unchecked(p)[list] as usize;
        let last = self.lists[list].len() - 1;
        self.lists[list].swap(idx, last);
        self.lists[list].pop();
        if idx < self.lists[list].len() {
            let moved = self.lists[list][idx];
            let mut cell = self.grid.get_unchecked(&moved);
            cell[list] = idx as u32;
            self.grid.set_unchecked(&moved, cell);
        }
        let mut cell = self.grid.get_unchecked(p);
        cell[list] = NULL_IDX;
        self.grid.set_unchecked(p, cell);
        Ok(true)
    }

    /// Clears `list`.
    pub fn reset(&mut self, list: usize) {
        for p in self.lists[list].clone() {
            let mut cell = self.grid.get_unchecked(&p);
            cell[list] = NULL_IDX;
            self.grid.set_unchecked(&p, cell);
        }
        self.lists[list].clear();
    }

    /// Whether `p` is tracked in any list at all.
    #[must_use]
    pub fn is_tracked(&self, p: &VecDi<D>) -> bool {
        self.grid.inside(p) && self.grid.get_unchecked(p).iter().any(|&i| i != NULL_IDX)
    }

    /// Number of lists.
    #[must_use]
    pub const fn num_lists(&self) -> usize {
        self.num_lists
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn track_and_untrack_preserve_invariant() {
        let mut lookup =
            LookupGrid::<2>::new(VecDi::new([5, 5]), VecDi::new([0, 0]), 1).unwrap();
        let a = VecDi::new([1, 1]);
        let b = VecDi::new([2, 2]);
        let c = VecDi::new([3, 3]);
        assert!(lookup.track(&a, 0).unwrap());
        assert!(lookup.track(&b, 0).unwrap());
        assert!(lookup.track(&c, 0).unwrap());
        assert!(!lookup.track(&a, 0).unwrap());

        // Untrack the middle entry; the tail (`c`) should be swapped into
        // its slot.
        assert!(lookup.untrack(&b, 0).unwrap());
        assert_eq!(lookup.list(0).len(), 2);
        assert!(lookup.is_tracked(&a));
        assert!(!lookup.is_tracked(&b));
        assert!(lookup.is_tracked(&c));

        for p in lookup.list(0).to_vec() {
            let idx = lookup.grid().get(&p).unwrap() as usize;
            assert_eq!(lookup.list(0)[idx], p);
        }
    }

    #[test]
    fn reset_clears_all_members() {
        let mut lookup =
            LookupGrid::<2>::new(VecDi::new([3, 3]), VecDi::new([0, 0]), 1).unwrap();
        lookup.track(&VecDi::new([0, 0]), 0).unwrap();
        lookup.track(&VecDi::new([1, 1]), 0).unwrap();
        lookup.reset(0);
        assert!(lookup.list(0).is_empty());
        assert!(!lookup.is_tracked(&VecDi::new([0, 0])));
        assert!(!lookup.is_tracked(&VecDi::new([1, 1])));
    }

    #[test]
    fn multi_index_allows_concurrent_membership() {
        let mut lookup =
            MultiLookupGrid::<2>::new(VecDi::new([3, 3]), VecDi::new([0, 0]), 2).unwrap();
        let p = VecDi::new([1, 1]);
        assert!(lookup.track(&p, 0).unwrap());
        assert!(lookup.track(&p, 1).unwrap());
        assert!(lookup.is_tracked_in(&p, 0));
        assert!(lookup.is_tracked_in(&p, 1));
        assert!(lookup.untrack(&p, 0).unwrap());
        assert!(!lookup.is_tracked_in(&p, 0));
        assert!(lookup.is_tracked_in(&p, 1));
    }
}
