//! Tracked grid: a value grid fused with an embedded lookup grid, so that
//! changing a cell's value can also update its list membership in one call.

use crate::error::Result;
use crate::grid::DenseGrid;
use crate::lookup::{LookupGrid, MultiLookupGrid};
use crate::vector::VecDi;

/// A dense value grid of `T` with an embedded single-index lookup grid.
#[derive(Debug, Clone)]
pub struct TrackedGrid<T, const D: usize> {
    values: DenseGrid<T, D>,
    lookup: LookupGrid<D>,
}

impl<T: Copy, const D: usize> TrackedGrid<T, D> {
    /// Builds a tracked grid with `num_lists` lists, every cell starting at
    /// `background` and untracked.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::InvalidDimensions`] if `size` has a
    /// non-positive axis.
    pub fn new(size: VecDi<D>, offset: VecDi<D>, background: T, num_lists: usize) -> Result<Self> {
        Ok(Self {
            values: DenseGrid::new(size, offset, background)?,
            lookup: LookupGrid::new(size, offset, num_lists)?,
        })
    }

    /// The value grid.
    #[must_use]
    pub const fn values(&self) -> &DenseGrid<T, D> {
        &self.values
    }

    /// The embedded lookup grid.
    #[must_use]
    pub const fn lookup(&self) -> &LookupGrid<D> {
        &self.lookup
    }

    /// Reads the value at `p`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::OutOfBounds`] if `p` is outside the grid.
    pub fn get(&self, p: &VecDi<D>) -> Result<T> {
        self.values.get(p)
    }

    /// Sets the value at `p` and tracks `p` in `list`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::OutOfBounds`] if `p` is outside the grid.
    pub fn track(&mut self, v: T, p: &VecDi<D>, list: usize) -> Result<bool> {
        self.values.set(p, v)?;
        self.lookup.track(p, list)
    }

    /// Removes `p` from `list`, without touching its value.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::OutOfBounds`] if `p` is outside the grid.
    pub fn untrack(&mut self, p: &VecDi<D>, list: usize) -> Result<bool> {
        self.lookup.untrack(p, list)
    }

    /// For each `p` tracked in `list`, resets its value to `background`,
    /// then clears the list.
    pub fn reset(&mut self, list: usize) {
        let background = self.values.background();
        for p in self.lookup.list(list).to_vec() {
            self.values.set_unchecked(&p, background);
        }
        self.lookup.reset(list);
    }

    /// Frees the value grid's storage. Used by the lazy wrapper.
    pub fn clear_storage(&mut self) {
        self.values.clear_storage();
    }

    /// Reallocates the value grid's storage. Used by the lazy wrapper.
    pub fn alloc_storage(&mut self) {
        self.values.alloc_storage();
    }

    /// Whether the value grid's storage is allocated.
    #[must_use]
    pub fn has_storage(&self) -> bool {
        self.values.has_storage()
    }
}

/// A dense value grid of `T` with an embedded multi-index lookup grid, so a
/// single cell may belong to several lists concurrently.
#[derive(Debug, Clone)]
pub struct MultiTrackedGrid<T, const D: usize> {
    values: DenseGrid<T, D>,
    lookup: MultiLookupGrid<D>,
}

impl<T: Copy, const D: usize> MultiTrackedGrid<T, D> {
    /// Builds a multi-list tracked grid.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::InvalidDimensions`] if `size` has a
    /// non-positive axis.
    pub fn new(size: VecDi<D>, offset: VecDi<D>, background: T, num_lists: usize) -> Result<Self> {
        Ok(Self {
            values: DenseGrid::new(size, offset, background)?,
            lookup: MultiLookupGrid::new(size, offset, num_lists)?,
        })
    }

    /// The value grid.
    #[must_use]
    pub const fn values(&self) -> &DenseGrid<T, D> {
        &self.values
    }

    /// The embedded multi-index lookup grid.
    #[must_use]
    pub const fn lookup(&self) -> &MultiLookupGrid<D> {
        &self.lookup
    }

    /// Reads the value at `p`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::OutOfBounds`] if `p` is outside the grid.
    pub fn get(&self, p: &VecDi<D>) -> Result<T> {
        self.values.get(p)
    }

    /// Sets the value at `p` and tracks `p` in `list`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::OutOfBounds`] if `p` is outside the grid.
    pub fn track(&mut self, v: T, p: &VecDi<D>, list: usize) -> Result<bool> {
        self.values.set(p, v)?;
        self.lookup.track(p, list)
    }

    /// Removes `p` from `list` only; `p` may remain tracked in other lists.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::OutOfBounds`] if `p` is outside the grid.
    pub fn untrack(&mut self, p: &VecDi<D>, list: usize) -> Result<bool> {
        self.lookup.untrack(p, list)
    }

    /// For each `p` tracked in `list`, resets its value to `background` if
    /// `p` is tracked in no other list, then clears the list.
    pub fn reset(&mut self, list: usize) {
        let background = self.values.background();
        let num_lists = self.lookup.num_lists();
        for p in self.lookup.list(list).to_vec() {
            let still_tracked = (0..num_lists)
                .filter(|&other| other != list)
                .any(|other| self.lookup.is_tracked_in(&p, other));
            if !still_tracked {
                self.values.set_unchecked(&p, background);
            }
        }
        self.lookup.reset(list);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn track_sets_value_and_membership() {
        let mut grid =
            TrackedGrid::<f64, 2>::new(VecDi::new([3, 3]), VecDi::new([0, 0]), -9.0, 1).unwrap();
        let p = VecDi::new([1, 1]);
        assert!(grid.track(2.5, &p, 0).unwrap());
        assert_eq!(grid.get(&p).unwrap(), 2.5);
        assert_eq!(grid.lookup().list(0), &[p]);
    }

    #[test]
    fn reset_restores_background() {
        let mut grid =
            TrackedGrid::<f64, 2>::new(VecDi::new([3, 3]), VecDi::new([0, 0]), -9.0, 1).unwrap();
        let p = VecDi::new([1, 1]);
        grid.track(2.5, &p, 0).unwrap();
        grid.reset(0);
        assert_eq!(grid.get(&p).unwrap(), -9.0);
        assert!(grid.lookup().list(0).is_empty());
    }

    #[test]
    fn multi_reset_keeps_value_if_tracked_elsewhere() {
        let mut grid = MultiTrackedGrid::<f64, 2>::new(
            VecDi::new([3, 3]),
            VecDi::new([0, 0]),
            -9.0,
            2,
        )
        .unwrap();
        let p = VecDi::new([1, 1]);
        grid.track(2.5, &p, 0).unwrap();
        grid.track(2.5, &p, 1).unwrap();
        grid.reset(0);
        assert_eq!(grid.get(&p).unwrap(), 2.5);
        grid.reset(1);
        assert_eq!(grid.get(&p).unwrap(), -9.0);
    }
}
