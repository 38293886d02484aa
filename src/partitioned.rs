//! Partitioned tracked grid: a coordinator grid of child lazy tracked grids
//! tiled over space, with lazy per-child activation and a partition-level
//! lookup recording which children hold tracked cells per list.

use std::sync::Mutex;

use rayon::prelude::*;

use crate::error::{Error, Result};
use crate::lazy::LazyTrackedGrid;
use crate::lookup::MultiLookupGrid;
use crate::vector::VecDi;

/// A spatial partitioning of a D-dimensional domain into `child_size`-sized
/// tiles, each a [`LazyTrackedGrid`] activated on first use.
pub struct PartitionedGrid<T, const D: usize> {
    offset: VecDi<D>,
    child_size: VecDi<D>,
    children_size: VecDi<D>,
    background: T,
    num_lists: usize,
    children: Vec<Mutex<LazyTrackedGrid<T, D>>>,
    /// Partition-level lookup: position is the *child index* (not a world
    /// position), list `k` holds the indices of children whose own list `k`
    /// is non-empty.
    partition_lookup: Mutex<MultiLookupGrid<D>>,
}

impl<T: Copy + Send + Sync, const D: usize> PartitionedGrid<T, D> {
    /// Builds a partitioned grid covering `size` cells starting at `offset`,
    /// tiled into children of `child_size` each (the outermost row/column of
    /// children may be partially outside `size` when `child_size` does not
    /// evenly divide `size`, mirroring the ceiling-division child count).
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidDimensions`] if any axis of `size` or
    /// `child_size` is non-positive.
    pub fn new(
        size: VecDi<D>,
        offset: VecDi<D>,
        child_size: VecDi<D>,
        background: T,
        num_lists: usize,
    ) -> Result<Self> {
        if (0..D).any(|axis| size[axis] <= 0 || child_size[axis] <= 0) {
            return Err(Error::InvalidDimensions);
        }
        let mut children_size = VecDi::splat(0);
        for axis in 0..D {
            children_size[axis] =
                (size[axis] + child_size[axis] - 1) / child_size[axis];
        }

        let num_children: usize = (0..D).map(|axis| children_size[axis] as usize).product();
        let mut children = Vec::with_capacity(num_children);
        for flat in 0..num_children {
            let child_idx = unflatten(flat, &children_size);
            let child_offset = offset + hadamard(&child_idx, &child_size);
            let child =
                LazyTrackedGrid::new(child_size, child_offset, background, num_lists)?;
            children.push(Mutex::new(child));
        }

        let partition_lookup = MultiLookupGrid::new(children_size, VecDi::splat(0), num_lists)?;

        Ok(Self {
            offset,
            child_size,
            children_size,
            background,
            num_lists,
            children,
            partition_lookup: Mutex::new(partition_lookup),
        })
    }

    /// The child index (position in the children grid, not a world
    /// position) containing world position `p`.
    #[must_use]
    pub fn child_idx(&self, p: &VecDi<D>) -> VecDi<D> {
        (*p - self.offset).div_floor(&self.child_size)
    }

    fn child_flat_idx(&self, child_idx: &VecDi<D>) -> Option<usize> {
        if (0..D).any(|axis| child_idx[axis] < 0 || child_idx[axis] >= self.children_size[axis]) {
            return None;
        }
        let mut flat = 0usize;
        for axis in 0..D {
            flat = flat * self.children_size[axis] as usize + child_idx[axis] as usize;
        }
        Some(flat)
    }

    /// Number of children.
    #[must_use]
    pub fn num_children(&self) -> usize {
        self.children.len()
    }

    /// The children-grid shape (number of children per axis).
    #[must_use]
    pub const fn children_size(&self) -> &VecDi<D> {
        &self.children_size
    }

    /// Reads the value at `p`. Positions inside an inactive child read as
    /// `background`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::OutOfBounds`] if `p` lies outside the partitioned
    /// domain entirely.
    pub fn get(&self, p: &VecDi<D>) -> Result<T> {
        let child_idx = self.child_idx(p);
        let flat = self.child_flat_idx(&child_idx).ok_or(Error::OutOfBounds)?;
        self.children[flat].lock().unwrap().get(p)
    }

    /// `track(v, p, list)`: activates the owning child if necessary
    /// (guarded by that child's mutex so concurrent activation races
    /// resolve to exactly one activation), registers the child in the
    /// partition-level lookup if this is its first tracked cell in `list`,
    /// then tracks `(v, p, list)` in the child.
    ///
    /// # Errors
    ///
    /// Returns [`Error::OutOfBounds`] if `p` lies outside the partitioned
    /// domain.
    pub fn track(&self, v: T, p: &VecDi<D>, list: usize) -> Result<bool> {
        let child_idx = self.child_idx(p);
        let flat = self.child_flat_idx(&child_idx).ok_or(Error::OutOfBounds)?;

        {
            let mut child = self.children[flat].lock().unwrap();
            if !child.is_active() {
                child.activate();
            }
            if !child.inner().lookup().is_tracked_in(p, list) {
                let mut partition_lookup = self.partition_lookup.lock().unwrap();
                partition_lookup.track(&child_idx, list)?;
            }
            child.track(v, p, list)
        }
    }

    /// `untrack(p, list)`: untracks in the child and, if the child's `list`
    /// becomes empty, untracks the child from the partition-level lookup;
    /// if the child then has no active list at all, deactivates it.
    ///
    /// # Errors
    ///
    /// Returns [`Error::OutOfBounds`] if `p` lies outside the partitioned
    /// domain.
    pub fn untrack(&self, p: &VecDi<D>, list: usize) -> Result<bool> {
        let child_idx = self.child_idx(p);
        let flat = self.child_flat_idx(&child_idx).ok_or(Error::OutOfBounds)?;

        let mut child = self.children[flat].lock().unwrap();
        let removed = child.untrack(p, list)?;
        if removed && child.inner().lookup().list(list).is_empty() {
            let mut partition_lookup = self.partition_lookup.lock().unwrap();
            partition_lookup.untrack(&child_idx, list)?;
            drop(partition_lookup);
            let any_active_list = (0..self.num_lists)
                .any(|l| !child.inner().lookup().list(l).is_empty());
            if !any_active_list {
                child.deactivate();
            }
        }
        Ok(removed)
    }

    /// `retrack(p, from, to)`: moves `p` from `from` to `to`. Unlike
    /// [`Self::untrack`], the child is never deactivated even if `from`
    /// empties, since it remains referenced by `to` throughout.
    ///
    /// # Errors
    ///
    /// Returns [`Error::OutOfBounds`] if `p` lies outside the partitioned
    /// domain.
    pub fn retrack(&self, p: &VecDi<D>, from: usize, to: usize) -> Result<()> {
        let child_idx = self.child_idx(p);
        let flat = self.child_flat_idx(&child_idx).ok_or(Error::OutOfBounds)?;

        let v = {
            let child = self.children[flat].lock().unwrap();
            child.get(p)?
        };

        let mut child = self.children[flat].lock().unwrap();
        child.untrack(p, from)?;
        if child.inner().lookup().list(from).is_empty() {
            let mut partition_lookup = self.partition_lookup.lock().unwrap();
            partition_lookup.untrack(&child_idx, from)?;
        }
        if !child.inner().lookup().is_tracked_in(p, to) {
            let mut partition_lookup = self.partition_lookup.lock().unwrap();
            partition_lookup.track(&child_idx, to)?;
        }
        child.track(v, p, to)?;
        Ok(())
    }

    /// Clears `list` across every partition currently tracking it,
    /// deactivating children left with no active list.
    pub fn reset(&self, list: usize) {
        let child_indices: Vec<VecDi<D>> = {
            let partition_lookup = self.partition_lookup.lock().unwrap();
            partition_lookup.list(list).to_vec()
        };
        for child_idx in child_indices {
            if let Some(flat) = self.child_flat_idx(&child_idx) {
                let mut child = self.children[flat].lock().unwrap();
                child.reset(list);
                let any_active_list =
                    (0..self.num_lists).any(|l| !child.inner().lookup().list(l).is_empty());
                if !any_active_list {
                    child.deactivate();
                }
            }
        }
        self.partition_lookup.lock().unwrap().reset(list);
    }

    /// Child indices currently holding tracked cells in `list`.
    #[must_use]
    pub fn children_in_list(&self, list: usize) -> Vec<VecDi<D>> {
        self.partition_lookup.lock().unwrap().list(list).to_vec()
    }

    /// Runs `f` over every child index tracked in `list`, in parallel.
    pub fn par_for_each_child_in_list<F>(&self, list: usize, f: F)
    where
        F: Fn(&VecDi<D>, &LazyTrackedGrid<T, D>) + Send + Sync,
    {
        let child_indices = self.children_in_list(list);
        child_indices.par_iter().for_each(|child_idx| {
            if let Some(flat) = self.child_flat_idx(child_idx) {
                let child = self.children[flat].lock().unwrap();
                f(child_idx, &child);
            }
        });
    }

    /// Locks and returns the child at `child_idx`, if in range.
    #[must_use]
    pub fn child(&self, child_idx: &VecDi<D>) -> Option<std::sync::MutexGuard<'_, LazyTrackedGrid<T, D>>> {
        self.child_flat_idx(child_idx)
            .map(|flat| self.children[flat].lock().unwrap())
    }

    /// The grid's offset.
    #[must_use]
    pub const fn offset(&self) -> &VecDi<D> {
        &self.offset
    }

    /// The child tile size.
    #[must_use]
    pub const fn child_size(&self) -> &VecDi<D> {
        &self.child_size
    }

    /// The background value.
    #[must_use]
    pub const fn background(&self) -> T {
        self.background
    }
}

fn unflatten<const D: usize>(mut flat: usize, shape: &VecDi<D>) -> VecDi<D> {
    let mut out = VecDi::splat(0);
    for axis in (0..D).rev() {
        let extent = shape[axis] as usize;
        out[axis] = (flat % extent) as i64;
        flat /= extent;
    }
    out
}

fn hadamard<const D: usize>(a: &VecDi<D>, b: &VecDi<D>) -> VecDi<D> {
    let mut out = VecDi::splat(0);
    for axis in 0..D {
        out[axis] = a[axis] * b[axis];
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn track_activates_child_and_partition_lookup() {
        let grid = PartitionedGrid::<f64, 2>::new(
            VecDi::new([9, 9]),
            VecDi::new([0, 0]),
            VecDi::new([3, 3]),
            0.0,
            1,
        )
        .unwrap();
        let p = VecDi::new([4, 4]);
        grid.track(1.0, &p, 0).unwrap();
        assert_eq!(grid.get(&p).unwrap(), 1.0);

        let child_idx = grid.child_idx(&p);
        assert_eq!(grid.children_in_list(0), vec![child_idx]);
    }

    #[test]
    fn untrack_deactivates_when_last_list_empties() {
        let grid = PartitionedGrid::<f64, 2>::new(
            VecDi::new([9, 9]),
            VecDi::new([0, 0]),
            VecDi::new([3, 3]),
            0.0,
            1,
        )
        .unwrap();
        let p = VecDi::new([4, 4]);
        grid.track(1.0, &p, 0).unwrap();
        grid.untrack(&p, 0).unwrap();
        assert!(grid.children_in_list(0).is_empty());
        assert_eq!(grid.get(&p).unwrap(), 0.0);
    }

    #[test]
    fn ceil_division_child_count() {
        // size=9, child_size=4 -> ceil(9/4) = 3 children along each axis.
        let grid = PartitionedGrid::<f64, 2>::new(
            VecDi::new([9, 9]),
            VecDi::new([0, 0]),
            VecDi::new([4, 4]),
            0.0,
            1,
        )
        .unwrap();
        assert_eq!(grid.children_size(), &VecDi::new([3, 3]));
    }

    #[test]
    fn retrack_never_deactivates() {
        let grid = PartitionedGrid::<f64, 2>::new(
            VecDi::new([9, 9]),
            VecDi::new([0, 0]),
            VecDi::new([3, 3]),
            0.0,
            2,
        )
        .unwrap();
        let p = VecDi::new([4, 4]);
        grid.track(1.0, &p, 0).unwrap();
        grid.retrack(&p, 0, 1).unwrap();
        assert_eq!(grid.get(&p).unwrap(), 1.0);
        assert!(grid.children_in_list(0).is_empty());
        assert!(!grid.children_in_list(1).is_empty());
    }
}
