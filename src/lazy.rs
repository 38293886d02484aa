//! Lazy activation: a tracked grid whose storage is allocated on first
//! activation and released on deactivation. Reads on an inactive grid
//! return `background`; writes are rejected.

use crate::error::{Error, Result};
use crate::tracked::TrackedGrid;
use crate::vector::VecDi;

/// A [`TrackedGrid`] that starts out, and can return to, an inactive state
/// with no backing storage.
#[derive(Debug, Clone)]
pub struct LazyTrackedGrid<T, const D: usize> {
    inner: TrackedGrid<T, D>,
    active: bool,
}

impl<T: Copy, const D: usize> LazyTrackedGrid<T, D> {
    /// Builds an inactive lazy grid of the given shape. No storage is
    /// allocated until [`Self::activate`] is called.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidDimensions`] if `size` has a non-positive
    /// axis.
    pub fn new(size: VecDi<D>, offset: VecDi<D>, background: T, num_lists: usize) -> Result<Self> {
        let mut inner = TrackedGrid::new(size, offset, background, num_lists)?;
        inner.clear_storage();
        Ok(Self {
            inner,
            active: false,
        })
    }

    /// Whether storage is currently allocated.
    #[must_use]
    pub const fn is_active(&self) -> bool {
        self.active
    }

    /// Transitions inactive → active: allocates storage and fills it with
    /// `background`. No-op if already active.
    pub fn activate(&mut self) {
        if !self.active {
            self.inner.alloc_storage();
            self.active = true;
        }
    }

    /// Transitions active → inactive: releases storage. No-op if already
    /// inactive.
    pub fn deactivate(&mut self) {
        if self.active {
            self.inner.clear_storage();
            self.active = false;
        }
    }

    /// Reads the value at `p`. Returns `background` for any in-bounds `p`
    /// while inactive.
    ///
    /// # Errors
    ///
    /// Returns [`Error::OutOfBounds`] if `p` is outside the grid's shape.
    pub fn get(&self, p: &VecDi<D>) -> Result<T> {
        if !self.inner.values().inside(p) {
            return Err(Error::OutOfBounds);
        }
        if self.active {
            self.inner.get(p)
        } else {
            Ok(self.inner.values().background())
        }
    }

    /// Sets the value at `p` and tracks it in `list`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InactiveGrid`] if the grid is inactive, or
    /// [`Error::OutOfBounds`] if `p` is outside the grid's shape.
    pub fn track(&mut self, v: T, p: &VecDi<D>, list: usize) -> Result<bool> {
        if !self.active {
            return Err(Error::InactiveGrid);
        }
        self.inner.track(v, p, list)
    }

    /// Removes `p` from `list`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InactiveGrid`] if the grid is inactive.
    pub fn untrack(&mut self, p: &VecDi<D>, list: usize) -> Result<bool> {
        if !self.active {
            return Err(Error::InactiveGrid);
        }
        self.inner.untrack(p, list)
    }

    /// Resets `list`, restoring background values. No-op if inactive (an
    /// inactive grid's lists are already empty).
    pub fn reset(&mut self, list: usize) {
        if self.active {
            self.inner.reset(list);
        }
    }

    /// Access to the underlying tracked grid, e.g. for list iteration. Only
    /// meaningful while active; while inactive its lists are all empty.
    #[must_use]
    pub const fn inner(&self) -> &TrackedGrid<T, D> {
        &self.inner
    }

    /// The grid's size.
    #[must_use]
    pub fn size(&self) -> &VecDi<D> {
        self.inner.values().size()
    }

    /// The grid's offset.
    #[must_use]
    pub fn offset(&self) -> &VecDi<D> {
        self.inner.values().offset()
    }

    /// Changes shape. Only valid while inactive.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InactiveGrid`] if the grid is currently active.
    pub fn resize(&mut self, size: VecDi<D>, offset: VecDi<D>) -> Result<()> {
        if self.active {
            return Err(Error::InactiveGrid);
        }
        // Rebuild rather than mutate in place: size is a field inside the
        // embedded lookup/value grids and both must agree.
        let num_lists = self.inner.lookup().num_lists();
        let background = self.inner.values().background();
        self.inner = TrackedGrid::new(size, offset, background, num_lists)?;
        self.inner.clear_storage();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inactive_reads_background() {
        let grid = LazyTrackedGrid::<f64, 2>::new(
            VecDi::new([3, 3]),
            VecDi::new([0, 0]),
            4.0,
            1,
        )
        .unwrap();
        assert!(!grid.is_active());
        assert_eq!(grid.get(&VecDi::new([1, 1])).unwrap(), 4.0);
    }

    #[test]
    fn inactive_write_is_error() {
        let mut grid = LazyTrackedGrid::<f64, 2>::new(
            VecDi::new([3, 3]),
            VecDi::new([0, 0]),
            4.0,
            1,
        )
        .unwrap();
        assert_eq!(
            grid.track(1.0, &VecDi::new([1, 1]), 0),
            Err(Error::InactiveGrid)
        );
    }

    #[test]
    fn activate_then_deactivate_round_trips() {
        let mut grid = LazyTrackedGrid::<f64, 2>::new(
            VecDi::new([3, 3]),
            VecDi::new([0, 0]),
            4.0,
            1,
        )
        .unwrap();
        grid.activate();
        assert!(grid.is_active());
        grid.track(9.0, &VecDi::new([1, 1]), 0).unwrap();
        assert_eq!(grid.get(&VecDi::new([1, 1])).unwrap(), 9.0);

        grid.deactivate();
        assert!(!grid.is_active());
        assert_eq!(grid.get(&VecDi::new([1, 1])).unwrap(), 4.0);
    }

    #[test]
    fn resize_while_active_errors() {
        let mut grid = LazyTrackedGrid::<f64, 2>::new(
            VecDi::new([3, 3]),
            VecDi::new([0, 0]),
            4.0,
            1,
        )
        .unwrap();
        grid.activate();
        assert_eq!(
            grid.resize(VecDi::new([4, 4]), VecDi::new([0, 0])),
            Err(Error::InactiveGrid)
        );
    }
}
