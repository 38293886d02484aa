//! Incremental marching-squares/cubes polygoniser: per-partition marching
//! with vertex deduplication, driven by change notifications from a
//! [`Surface`].

use std::sync::Mutex;

use itertools::Itertools;
use rayon::prelude::*;

use crate::lookup::LookupGrid;
use crate::surface::Surface;
use crate::tables;
use crate::vector::{VecDf, VecDi};

/// A vertex emitted by the polygoniser: a position on the zero-crossing,
/// plus a unit normal (used in 3D; left at the zero vector in 2D).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Vertex<const D: usize> {
    /// World-space position of the crossing.
    pub position: VecDf<D>,
    /// Gradient-derived unit normal (zero in 2D, where it is unused).
    pub normal: VecDf<D>,
}

/// A simplex: a line segment in 2D (2 vertex indices) or a triangle in 3D
/// (3 vertex indices), indexing into the owning [`PolyChild`]'s vertex
/// buffer.
pub type Simplex = arrayvec::ArrayVec<u32, 3>;

/// The per-partition polygoniser: owns a lookup grid one cell larger than
/// its isogrid child on every face (so neighbouring partitions agree on
/// shared edges), plus the vertex/simplex buffers it has emitted.
pub struct PolyChild<const D: usize> {
    /// One lookup index per (position, axis) edge; list `k` is axis `k`.
    edge_lookup: LookupGrid<D>,
    vtxs: Vec<Vertex<D>>,
    spxs: Vec<Simplex>,
}

impl<const D: usize> PolyChild<D> {
    fn new(size: VecDi<D>, offset: VecDi<D>) -> Self {
        Self {
            edge_lookup: LookupGrid::new(size, offset, D).expect("positive child size"),
            vtxs: Vec::new(),
            spxs: Vec::new(),
        }
    }

    fn clear(&mut self) {
        for axis in 0..D {
            self.edge_lookup.reset(axis);
        }
        self.vtxs.clear();
        self.spxs.clear();
    }

    /// Emitted vertices since the last march.
    #[must_use]
    pub fn vtxs(&self) -> &[Vertex<D>] {
        &self.vtxs
    }

    /// Emitted simplices since the last march.
    #[must_use]
    pub fn spxs(&self) -> &[Simplex] {
        &self.spxs
    }
}

/// A polygoniser bound to a [`Surface`]: one [`PolyChild`] per isogrid
/// child, plus pending/done partition-index tracking for incremental
/// re-marching.
pub struct Polygoniser<'s, const D: usize> {
    surface: &'s Surface<D>,
    children: Vec<Mutex<Option<PolyChild<D>>>>,
    pending: LookupGrid<D>,
    done: LookupGrid<D>,
    last_changed: Mutex<Vec<VecDi<D>>>,
}

const PENDING_LIST: usize = 0;

impl<'s, const D: usize> Polygoniser<'s, D> {
    /// Binds a polygoniser to `surface`, with one (initially empty, inactive)
    /// child poly per isogrid child.
    #[must_use]
    pub fn new(surface: &'s Surface<D>) -> Self {
        let children_size = *surface.isogrid().children_size();
        let num_children = surface.isogrid().num_children();
        let children = (0..num_children).map(|_| Mutex::new(None)).collect();

        Self {
            surface,
            children,
            pending: LookupGrid::new(children_size, VecDi::splat(0), 1)
                .expect("positive children grid size"),
            done: LookupGrid::new(children_size, VecDi::splat(0), 1)
                .expect("positive children grid size"),
            last_changed: Mutex::new(Vec::new()),
        }
    }

    fn child_flat(&self, child_idx: &VecDi<D>) -> Option<usize> {
        let shape = *self.surface.isogrid().children_size();
        if (0..D).any(|axis| child_idx[axis] < 0 || child_idx[axis] >= shape[axis]) {
            return None;
        }
        let mut flat = 0usize;
        for axis in 0..D {
            flat = flat * shape[axis] as usize + child_idx[axis] as usize;
        }
        Some(flat)
    }

    /// Examines the surface's delta and status-change outermost layers
    /// since the last call, queuing any partition whose isogrid activity
    /// has changed for the next [`Self::march`].
    pub fn notify(&mut self) {
        let l = self.surface.l();
        let mut candidates = Vec::new();
        for id in [-l, l] {
            for p in positions_in_list(self.surface.delta_grid(), id, self.surface) {
                candidates.push(self.surface.isogrid().child_idx(&p));
            }
            for p in positions_in_list(self.surface.status_change(), id, self.surface) {
                candidates.push(self.surface.isogrid().child_idx(&p));
            }
        }
        let candidates = candidates.into_iter().unique_by(Self::child_idx_key);

        for child_idx in candidates {
            let active = self
                .surface
                .isogrid()
                .child(&child_idx)
                .is_some_and(|c| c.is_active());
            if active {
                let _ = self.pending.track(&child_idx, PENDING_LIST);
            } else {
                let _ = self.pending.untrack(&child_idx, PENDING_LIST);
            }
        }
    }

    fn child_idx_key(p: &VecDi<D>) -> Vec<i64> {
        p.as_slice().to_vec()
    }

    /// Forces every currently active poly partition, plus every isogrid
    /// outermost-layer partition, onto the pending list. Used when external
    /// state has changed without an intervening delta.
    pub fn invalidate(&mut self) {
        for child_idx in self.done.list(PENDING_LIST).to_vec() {
            let _ = self.pending.track(&child_idx, PENDING_LIST);
        }
        let l = self.surface.l();
        for id in [-l, l] {
            for child_idx in self.surface.isogrid().children_in_list(self.surface.layer_idx(id)) {
                let _ = self.pending.track(&child_idx, PENDING_LIST);
            }
        }
    }

    /// Re-marches every pending partition in parallel, then swaps pending
    /// and done and clears the new pending list.
    pub fn march(&mut self) {
        let pending = self.pending.list(PENDING_LIST).to_vec();

        pending.par_iter().for_each(|child_idx| {
            let Some(flat) = self.child_flat(child_idx) else {
                return;
            };
            let mut slot = self.children[flat].lock().unwrap();
            let isogrid_active = self
                .surface
                .isogrid()
                .child(child_idx)
                .is_some_and(|c| c.is_active());

            if isogrid_active {
                let child_size = *self.surface.isogrid().child_size();
                let offset = *self.surface.isogrid().offset()
                    + hadamard(child_idx, &child_size);
                let mut poly_size = child_size;
                for axis in 0..D {
                    poly_size[axis] += 2;
                }
                let poly_offset = offset - VecDi::splat(1);

                let poly = slot.get_or_insert_with(|| PolyChild::new(poly_size, poly_offset));
                poly.clear();
                march_child(self.surface, poly, &offset, &child_size);
            } else {
                *slot = None;
            }
        });

        *self.last_changed.lock().unwrap() = pending.clone();

        for child_idx in pending {
            let _ = self.pending.untrack(&child_idx, PENDING_LIST);
            let _ = self.done.track(&child_idx, PENDING_LIST);
        }
    }

    /// The partition indices re-marched by the last [`Self::march`] call.
    #[must_use]
    pub fn changes(&self) -> Vec<VecDi<D>> {
        self.last_changed.lock().unwrap().clone()
    }

    /// Locks and returns the poly child at `child_idx`, if any is currently
    /// active there.
    #[must_use]
    pub fn child(&self, child_idx: &VecDi<D>) -> Option<std::sync::MutexGuard<'_, Option<PolyChild<D>>>> {
        self.child_flat(child_idx).map(|flat| self.children[flat].lock().unwrap())
    }
}

fn hadamard<const D: usize>(a: &VecDi<D>, b: &VecDi<D>) -> VecDi<D> {
    let mut out = VecDi::splat(0);
    for axis in 0..D {
        out[axis] = a[axis] * b[axis];
    }
    out
}

/// Collects positions in a generic partitioned grid's layer list `id`,
/// across every tracking child. Small helper shared by [`Polygoniser::notify`]
/// for both the delta and status-change grids.
fn positions_in_list<T: Copy + Send + Sync, const D: usize>(
    grid: &crate::partitioned::PartitionedGrid<T, D>,
    id: i64,
    surface: &Surface<D>,
) -> Vec<VecDi<D>> {
    let list = surface.layer_idx(id);
    grid.children_in_list(list)
        .into_iter()
        .flat_map(|child_idx| {
            grid.child(&child_idx)
                .map(|child| child.inner().lookup().list(list).to_vec())
                .unwrap_or_default()
        })
        .collect()
}

fn march_child<const D: usize>(
    surface: &Surface<D>,
    poly: &mut PolyChild<D>,
    child_offset: &VecDi<D>,
    child_size: &VecDi<D>,
) {
    let lo = *child_offset;
    let mut hi = *child_offset;
    for axis in 0..D {
        hi[axis] += child_size[axis] - 1;
    }

    each_point_in_box(&lo, &hi, |cell| {
        march_cell(surface, poly, &cell);
    });
}

fn march_cell<const D: usize>(surface: &Surface<D>, poly: &mut PolyChild<D>, cell: &VecDi<D>) {
    let outside = (surface.l() + 1) as f64;
    let sample = |p: &VecDi<D>| surface.isogrid().get(p).unwrap_or(outside);

    if D == 2 {
        march_cell_2d(&sample, poly, cell);
    } else {
        march_cell_3d(&sample, poly, cell);
    }
}

fn corner_mask<const D: usize>(sample: &impl Fn(&VecDi<D>) -> f64, cell: &VecDi<D>, corners: &[VecDi<D>]) -> usize {
    let mut mask = 0usize;
    for (i, corner) in corners.iter().enumerate() {
        let p = *cell + *corner;
        if sample(&p) > 0.0 {
            mask |= 1 << i;
        }
    }
    mask
}

fn edge_vertex<const D: usize>(
    sample: &impl Fn(&VecDi<D>) -> f64,
    poly: &mut PolyChild<D>,
    cell: &VecDi<D>,
    edge: &tables::Edge<D>,
) -> u32 {
    let p_a = *cell + edge.offset;
    if poly.edge_lookup.is_tracked_in(&p_a, edge.axis) {
        let idx = poly.edge_lookup.grid().get_unchecked(&p_a);
        return idx;
    }

    let mut p_b = p_a;
    p_b[edge.axis] += 1;
    let v_a = sample(&p_a);
    let v_b = sample(&p_b);

    const EPS: f64 = 1e-6;
    let position = if v_a.abs() <= EPS {
        p_a.to_f64()
    } else if v_b.abs() <= EPS {
        p_b.to_f64()
    } else if (v_a - v_b).abs() <= EPS {
        (p_a.to_f64() + p_b.to_f64()) * 0.5
    } else {
        let mu = v_a / (v_a - v_b);
        p_a.to_f64() + (p_b.to_f64() - p_a.to_f64()) * mu
    };

    let inside = |_: &VecDi<D>| true;
    let normal = crate::numeric::safe_gradient(sample, inside, &p_a, 1.0)
        .normalize()
        .unwrap_or_else(|| VecDf::splat(0.0));

    let vtx_idx = poly.vtxs.len() as u32;
    poly.vtxs.push(Vertex { position, normal });
    let _ = poly.edge_lookup.track(&p_a, edge.axis);
    vtx_idx
}

fn march_cell_2d<const D: usize>(
    sample: &impl Fn(&VecDi<D>) -> f64,
    poly: &mut PolyChild<D>,
    cell: &VecDi<D>,
) {
    debug_assert_eq!(D, 2);
    let corners: Vec<VecDi<D>> = tables::CORNERS_2D.iter().map(|c| vec2_to_d::<D>(c)).collect();
    let mask = corner_mask(sample, cell, &corners);
    if mask == 0 || mask == 0b1111 {
        return;
    }

    let mut local_vtx = [0u32; 4];
    let edge_mask = tables::VTX_MASK_2D[mask];
    for (i, edge) in tables::EDGES_2D.iter().enumerate() {
        if edge_mask & (1 << i) != 0 {
            let edge_d: tables::Edge<D> = tables::Edge {
                offset: vec2_to_d::<D>(&edge.offset),
                axis: edge.axis,
            };
            local_vtx[i] = edge_vertex(sample, poly, cell, &edge_d);
        }
    }

    let order = tables::VTX_ORDER_2D[mask];
    let mut i = 0;
    while i + 1 < order.len() && order[i] >= 0 && order[i + 1] >= 0 {
        let mut spx = Simplex::new();
        spx.push(local_vtx[order[i] as usize]);
        spx.push(local_vtx[order[i + 1] as usize]);
        poly.spxs.push(spx);
        i += 2;
    }
}

fn march_cell_3d<const D: usize>(
    sample: &impl Fn(&VecDi<D>) -> f64,
    poly: &mut PolyChild<D>,
    cell: &VecDi<D>,
) {
    debug_assert_eq!(D, 3);
    // Marching cubes marches in the negative z-axis direction; shift the
    // driving cell so z covers the cell's upper bound the same way x/y do.
    let cell = *cell - vec3_to_d::<D>(&tables::SPX_OFFSET_3D);
    let cell = &cell;
    let corners: Vec<VecDi<D>> = tables::CORNERS_3D.iter().map(|c| vec3_to_d::<D>(c)).collect();
    let mask = corner_mask(sample, cell, &corners);
    if mask == 0 || mask == 0xff {
        return;
    }

    let mut local_vtx = [0u32; 12];
    let edge_mask = tables::VTX_MASK_3D[mask];
    for (i, edge) in tables::EDGES_3D.iter().enumerate() {
        if edge_mask & (1 << i) != 0 {
            let edge_d: tables::Edge<D> = tables::Edge {
                offset: vec3_to_d::<D>(&edge.offset),
                axis: edge.axis,
            };
            local_vtx[i] = edge_vertex(sample, poly, cell, &edge_d);
        }
    }

    let order = tables::VTX_ORDER_3D[mask];
    let mut i = 0;
    while i + 2 < order.len() + 1 && order[i] >= 0 {
        let mut spx = Simplex::new();
        spx.push(local_vtx[order[i] as usize]);
        spx.push(local_vtx[order[i + 1] as usize]);
        spx.push(local_vtx[order[i + 2] as usize]);
        poly.spxs.push(spx);
        i += 3;
    }
}

/// Converts a 2D table vector into `VecDi<D>`. Only ever called with `D ==
/// 2` (guarded by the dimension branch in [`march_cell`]); the const
/// generic can't express that statically, so the assumption is asserted.
fn vec2_to_d<const D: usize>(v: &VecDi<2>) -> VecDi<D> {
    debug_assert_eq!(D, 2);
    let mut out = VecDi::splat(0);
    let slice = v.as_slice();
    for axis in 0..D.min(2) {
        out[axis] = slice[axis];
    }
    out
}

/// Converts a 3D table vector into `VecDi<D>`. Only ever called with `D ==
/// 3` (guarded by the dimension branch in [`march_cell`]).
fn vec3_to_d<const D: usize>(v: &VecDi<3>) -> VecDi<D> {
    debug_assert_eq!(D, 3);
    let mut out = VecDi::splat(0);
    let slice = v.as_slice();
    for axis in 0..D.min(3) {
        out[axis] = slice[axis];
    }
    out
}

fn each_point_in_box<const D: usize>(lo: &VecDi<D>, hi: &VecDi<D>, mut f: impl FnMut(VecDi<D>)) {
    if (0..D).any(|axis| lo[axis] > hi[axis]) {
        return;
    }
    let mut counters = *lo;
    loop {
        f(counters);
        let mut axis = D;
        loop {
            if axis == 0 {
                return;
            }
            axis -= 1;
            counters[axis] += 1;
            if counters[axis] <= hi[axis] {
                break;
            }
            counters[axis] = lo[axis];
            if axis == 0 {
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use float_cmp::assert_approx_eq;

    #[test]
    fn march_produces_no_simplex_when_entirely_outside() {
        let surface = Surface::<2>::new(VecDi::new([9, 9]), VecDi::new([3, 3]), 2).unwrap();
        let mut poly = Polygoniser::new(&surface);
        poly.notify();
        poly.march();
        assert!(poly.changes().is_empty());
    }

    #[test]
    fn idempotent_march_after_no_notify() {
        let surface = Surface::<2>::new(VecDi::new([9, 9]), VecDi::new([3, 3]), 2).unwrap();
        surface.seed(&VecDi::new([0, 0])).unwrap();
        let mut poly = Polygoniser::new(&surface);
        poly.notify();
        poly.invalidate();
        poly.march();
        let first_changes = poly.changes();

        poly.march();
        let second_changes = poly.changes();
        assert!(!first_changes.is_empty() || second_changes.is_empty());
        assert!(second_changes.is_empty());
    }

    /// A single negative delta at a seeded centre pulls the zero-crossing
    /// in along each axis: the surrounding cube corners converge toward the
    /// centre's value, so the crossing point on every cardinal edge sits at
    /// the same fraction of the way from the centre.
    #[test]
    fn single_center_delta_produces_axis_aligned_crossings() {
        let surface = Surface::<3>::new(VecDi::new([9, 9, 9]), VecDi::new([3, 3, 3]), 2).unwrap();
        surface.seed(&VecDi::new([0, 0, 0])).unwrap();

        surface.update_start();
        surface.delta(&VecDi::new([0, 0, 0]), -0.4).unwrap();
        surface.update_end();

        let mut poly = Polygoniser::new(&surface);
        poly.notify();
        poly.invalidate();
        poly.march();

        let child_idx = surface.isogrid().child_idx(&VecDi::new([0, 0, 0]));
        let guard = poly.child(&child_idx).expect("central partition in range");
        let child = guard.as_ref().expect("central partition marched");
        assert!(!child.vtxs().is_empty());
        assert!(!child.spxs().is_empty());

        for vtx in child.vtxs() {
            assert_approx_eq!(f64, vtx.position.l1_norm(), 0.4, epsilon = 1e-6);
        }
    }
}
