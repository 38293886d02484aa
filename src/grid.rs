//! Dense D-dimensional grid: a contiguous array of values with an offset
//! origin, plus the `inside`/`index` routing shared by every grid flavour
//! built on top of it.

use crate::error::{Error, Result};
use crate::vector::VecDi;

/// A fixed-size, densely stored D-dimensional array of `T`, addressed by
/// integer position.
///
/// Storage is row-major with the last axis most-rapidly varying. A
/// `background` value is used to fill the array on construction/activation
/// and by callers resetting cells.
#[derive(Debug, Clone)]
pub struct DenseGrid<T, const D: usize> {
    size: VecDi<D>,
    offset: VecDi<D>,
    background: T,
    data: Vec<T>,
}

impl<T: Copy, const D: usize> DenseGrid<T, D> {
    /// Constructs a grid of the given `size`/`offset`, filled with
    /// `background`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidDimensions`] if any axis of `size` is
    /// non-positive.
    pub fn new(size: VecDi<D>, offset: VecDi<D>, background: T) -> Result<Self> {
        if (0..D).any(|axis| size[axis] <= 0) {
            return Err(Error::InvalidDimensions);
        }
        let len = Self::size_product(&size);
        Ok(Self {
            size,
            offset,
            background,
            data: vec![background; len],
        })
    }

    fn size_product(size: &VecDi<D>) -> usize {
        (0..D).map(|axis| size[axis] as usize).product()
    }

    /// The grid's size.
    #[must_use]
    pub const fn size(&self) -> &VecDi<D> {
        &self.size
    }

    /// The grid's offset (the world position of cell linear-index 0).
    #[must_use]
    pub const fn offset(&self) -> &VecDi<D> {
        &self.offset
    }

    /// The background value used to fill newly activated storage.
    #[must_use]
    pub const fn background(&self) -> T {
        self.background
    }

    /// Whether `p` lies within `offset..offset+size` on every axis.
    #[must_use]
    pub fn inside(&self, p: &VecDi<D>) -> bool {
        (0..D).all(|axis| {
            let local = p[axis] - self.offset[axis];
            local >= 0 && local < self.size[axis]
        })
    }

    /// Row-major linear index of `p`, without bounds checking.
    fn index_unchecked(&self, p: &VecDi<D>) -> usize {
        let mut idx = 0usize;
        for axis in 0..D {
            let local = (p[axis] - self.offset[axis]) as usize;
            idx = idx * self.size[axis] as usize + local;
        }
        idx
    }

    /// Row-major linear index of `p`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::OutOfBounds`] if `p` is not inside the grid.
    pub fn index(&self, p: &VecDi<D>) -> Result<usize> {
        if !self.inside(p) {
            return Err(Error::OutOfBounds);
        }
        Ok(self.index_unchecked(p))
    }

    /// Inverse of [`Self::index`]: recovers the position for a linear index.
    #[must_use]
    pub fn pos(&self, mut idx: usize) -> VecDi<D> {
        let mut p = VecDi::splat(0);
        for axis in (0..D).rev() {
            let extent = self.size[axis] as usize;
            let local = idx % extent;
            idx /= extent;
            p[axis] = local as i64 + self.offset[axis];
        }
        p
    }

    /// Reads the value at `p`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::OutOfBounds`] if `p` is not inside the grid.
    pub fn get(&self, p: &VecDi<D>) -> Result<T> {
        let idx = self.index(p)?;
        Ok(self.data[idx])
    }

    /// Reads the value at `p` without bounds checking.
    #[must_use]
    pub fn get_unchecked(&self, p: &VecDi<D>) -> T {
        self.data[self.index_unchecked(p)]
    }

    /// Writes `v` at `p`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::OutOfBounds`] if `p` is not inside the grid.
    pub fn set(&mut self, p: &VecDi<D>, v: T) -> Result<()> {
        let idx = self.index(p)?;
        self.data[idx] = v;
        Ok(())
    }

    /// Writes `v` at `p` without bounds checking.
    pub fn set_unchecked(&mut self, p: &VecDi<D>, v: T) {
        let idx = self.index_unchecked(p);
        self.data[idx] = v;
    }

    /// The raw backing storage, in row-major order.
    #[must_use]
    pub fn data(&self) -> &[T] {
        &self.data
    }

    /// Mutable access to the raw backing storage.
    pub fn data_mut(&mut self) -> &mut [T] {
        &mut self.data
    }

    /// Resets every cell to `background`.
    pub fn fill_background(&mut self) {
        self.data.fill(self.background);
    }

    /// Frees the backing storage, leaving the grid with a zero-length array.
    /// Used by lazy grids on deactivation.
    pub fn clear_storage(&mut self) {
        self.data = Vec::new();
    }

    /// Reallocates storage sized for the grid's current `size`, filled with
    /// `background`. Used by lazy grids on activation.
    pub fn alloc_storage(&mut self) {
        self.data = vec![self.background; Self::size_product(&self.size)];
    }

    /// Whether storage is currently allocated (`data.len() ==
    /// size.product()`).
    #[must_use]
    pub fn has_storage(&self) -> bool {
        !self.data.is_empty()
    }

    /// Changes `size`/`offset`, reallocating storage. Callers of lazy grids
    /// should only call this while inactive (`spec.md` §4.4); this dense
    /// grid does not itself enforce that, since activation is a concept
    /// owned by the lazy wrapper.
    pub fn resize(&mut self, size: VecDi<D>, offset: VecDi<D>) {
        self.size = size;
        self.offset = offset;
        if self.has_storage() {
            self.alloc_storage();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn index_round_trips() {
        let grid = DenseGrid::<f64, 2>::new(
            VecDi::new([4, 5]),
            VecDi::new([-2, -2]),
            0.0,
        )
        .unwrap();
        for x in -2..2 {
            for y in -2..3 {
                let p = VecDi::new([x, y]);
                let idx = grid.index(&p).unwrap();
                assert_eq!(grid.pos(idx), p);
            }
        }
    }

    #[test]
    fn out_of_bounds_get() {
        let grid = DenseGrid::<f64, 2>::new(VecDi::new([2, 2]), VecDi::new([0, 0]), 0.0).unwrap();
        assert_eq!(grid.get(&VecDi::new([5, 0])), Err(Error::OutOfBounds));
    }

    #[test]
    fn invalid_dimensions() {
        let result = DenseGrid::<f64, 2>::new(VecDi::new([0, 2]), VecDi::new([0, 0]), 0.0);
        assert_eq!(result.unwrap_err(), Error::InvalidDimensions);
    }

    #[test]
    fn set_then_get() {
        let mut grid =
            DenseGrid::<f64, 2>::new(VecDi::new([3, 3]), VecDi::new([0, 0]), -1.0).unwrap();
        let p = VecDi::new([1, 2]);
        grid.set(&p, 7.0).unwrap();
        assert_eq!(grid.get(&p).unwrap(), 7.0);
        assert_eq!(grid.get(&VecDi::new([0, 0])).unwrap(), -1.0);
    }

    #[test]
    fn row_major_layout() {
        let mut grid =
            DenseGrid::<i32, 2>::new(VecDi::new([2, 3]), VecDi::new([0, 0]), 0).unwrap();
        grid.set(&VecDi::new([0, 1]), 42).unwrap();
        // size = [2, 3]: last axis (y) varies fastest, so (0,1) is linear index 1.
        assert_eq!(grid.data()[1], 42);
    }
}
