//! Finite-difference and interpolation kernels shared by the surface engine
//! and polygoniser.
//!
//! These are free functions over a sampling closure rather than methods on
//! a particular grid type: every kernel only needs `f(position) -> f64`, and
//! keeping them decoupled from any one grid representation avoids threading
//! a trait-object/generic grid parameter through code that only ever reads.

use crate::vector::{VecDf, VecDi};

/// Forward difference along `axis`: `(f(p+e) - f(p)) / dx`.
pub fn forward_diff<const D: usize>(
    sample: impl Fn(&VecDi<D>) -> f64,
    p: &VecDi<D>,
    axis: usize,
    dx: f64,
) -> f64 {
    let fwd = *p + VecDi::axis(axis);
    (sample(&fwd) - sample(p)) / dx
}

/// Backward difference along `axis`: `(f(p) - f(p-e)) / dx`.
pub fn backward_diff<const D: usize>(
    sample: impl Fn(&VecDi<D>) -> f64,
    p: &VecDi<D>,
    axis: usize,
    dx: f64,
) -> f64 {
    let back = *p - VecDi::axis(axis);
    (sample(p) - sample(&back)) / dx
}

/// Central difference along `axis`: `(f(p+e) - f(p-e)) / (2 dx)`.
pub fn central_diff<const D: usize>(
    sample: impl Fn(&VecDi<D>) -> f64,
    p: &VecDi<D>,
    axis: usize,
    dx: f64,
) -> f64 {
    let fwd = *p + VecDi::axis(axis);
    let back = *p - VecDi::axis(axis);
    (sample(&fwd) - sample(&back)) / (2.0 * dx)
}

/// Whether `p`'s forward/backward neighbour along `axis` is "present" — in
/// this crate every narrow-band cell has all grid neighbours addressable
/// (the isogrid always reads as `background` outside the band rather than
/// being undefined), so the safe gradient only needs to fall back at the
/// true edges of the underlying partitioned domain. `inside` tells it which
/// neighbours are in bounds.
pub fn safe_gradient<const D: usize>(
    sample: impl Fn(&VecDi<D>) -> f64,
    inside: impl Fn(&VecDi<D>) -> bool,
    p: &VecDi<D>,
    dx: f64,
) -> VecDf<D> {
    let mut out = VecDf::splat(0.0);
    for axis in 0..D {
        let fwd = *p + VecDi::axis(axis);
        let back = *p - VecDi::axis(axis);
        let has_fwd = inside(&fwd);
        let has_back = inside(&back);
        out[axis] = if has_fwd && has_back {
            (sample(&fwd) - sample(&back)) / (2.0 * dx)
        } else if has_fwd {
            (sample(&fwd) - sample(p)) / dx
        } else if has_back {
            (sample(p) - sample(&back)) / dx
        } else {
            0.0
        };
    }
    out
}

/// Entropy-satisfying (upwind) gradient, used to keep level-set
/// reinitialisation stable: axis-wise `clamp(f(p)-f(p-e), 0, inf) +
/// clamp(f(p+e)-f(p), -inf, 0)`, divided by `dx`.
pub fn upwind_gradient<const D: usize>(
    sample: impl Fn(&VecDi<D>) -> f64,
    p: &VecDi<D>,
    dx: f64,
) -> VecDf<D> {
    let mut out = VecDf::splat(0.0);
    let f_p = sample(p);
    for axis in 0..D {
        let fwd = *p + VecDi::axis(axis);
        let back = *p - VecDi::axis(axis);
        let back_term = (f_p - sample(&back)).max(0.0);
        let fwd_term = (sample(&fwd) - f_p).min(0.0);
        out[axis] = (back_term + fwd_term) / dx;
    }
    out
}

/// Mean curvature via the difference of forward/backward unit normals.
///
/// For each axis, the forward and backward principal normals are the axial
/// first difference divided by the L² norm of the central-difference
/// gradient evaluated at the neighbouring cell; curvature is half the
/// componentwise sum of `normal_forward - normal_backward`.
pub fn curvature<const D: usize>(sample: impl Fn(&VecDi<D>) -> f64, p: &VecDi<D>, dx: f64) -> f64 {
    let mut sum = 0.0;
    for axis in 0..D {
        let fwd = *p + VecDi::axis(axis);
        let back = *p - VecDi::axis(axis);

        let grad_fwd = central_gradient(&sample, &fwd, dx);
        let grad_back = central_gradient(&sample, &back, dx);

        let diff_fwd = forward_diff(&sample, p, axis, dx);
        let diff_back = backward_diff(&sample, p, axis, dx);

        let norm_fwd = grad_fwd.l2_norm();
        let norm_back = grad_back.l2_norm();

        let normal_fwd = if norm_fwd > f64::EPSILON {
            diff_fwd / norm_fwd
        } else {
            0.0
        };
        let normal_back = if norm_back > f64::EPSILON {
            diff_back / norm_back
        } else {
            0.0
        };

        sum += normal_fwd - normal_back;
    }
    0.5 * sum
}

fn central_gradient<const D: usize>(
    sample: impl Fn(&VecDi<D>) -> f64,
    p: &VecDi<D>,
    dx: f64,
) -> VecDf<D> {
    let mut out = VecDf::splat(0.0);
    for axis in 0..D {
        out[axis] = central_diff(&sample, p, axis, dx);
    }
    out
}

/// Divergence: sum of componentwise forward-minus-backward first
/// differences, divided by `dx^2`.
pub fn divergence<const D: usize>(
    sample: impl Fn(&VecDi<D>) -> f64,
    p: &VecDi<D>,
    dx: f64,
) -> f64 {
    let mut sum = 0.0;
    for axis in 0..D {
        sum += forward_diff(&sample, p, axis, dx) - backward_diff(&sample, p, axis, dx);
    }
    sum / (dx * dx)
}

/// Trilinear (or bilinear, for `D=2`) interpolation at a floating-point
/// position: reads all `2^D` integer corners around `p`'s floor and
/// successively blends one axis at a time.
#[must_use]
pub fn interpolate<const D: usize>(sample: impl Fn(&VecDi<D>) -> f64, p: &VecDf<D>) -> f64 {
    let base = p.floor();
    let num_corners = 1usize << D;
    let mut values = vec![0.0; num_corners];
    for (corner, value) in values.iter_mut().enumerate() {
        let mut corner_pos = base;
        for axis in 0..D {
            if corner & (1 << axis) != 0 {
                corner_pos[axis] += 1;
            }
        }
        *value = sample(&corner_pos);
    }

    let mut stride = num_corners;
    for axis in 0..D {
        let weight = p[axis] - base[axis] as f64;
        stride /= 2;
        for i in 0..stride {
            values[i] = values[i] * (1.0 - weight) + values[i + stride] * weight;
        }
    }
    values[0]
}

#[cfg(test)]
mod tests {
    use super::*;
    use float_cmp::assert_approx_eq;

    fn linear_sample(p: &VecDi<2>) -> f64 {
        (2 * p[0] + 3 * p[1]) as f64
    }

    #[test]
    fn central_diff_matches_linear_slope() {
        let p = VecDi::new([0, 0]);
        assert_approx_eq!(f64, central_diff(linear_sample, &p, 0, 1.0), 2.0);
        assert_approx_eq!(f64, central_diff(linear_sample, &p, 1, 1.0), 3.0);
    }

    #[test]
    fn divergence_of_linear_field_is_zero() {
        let p = VecDi::new([0, 0]);
        assert_approx_eq!(f64, divergence(linear_sample, &p, 1.0), 0.0);
    }

    #[test]
    fn bilinear_interpolation_midpoint() {
        let sample = |p: &VecDi<2>| (p[0] + p[1]) as f64;
        let mid = VecDf::new([0.5, 0.5]);
        assert_approx_eq!(f64, interpolate(sample, &mid), 1.0);
    }

    #[test]
    fn bilinear_interpolation_at_corner_matches_sample() {
        let sample = |p: &VecDi<2>| (p[0] * 10 + p[1]) as f64;
        let corner = VecDf::new([1.0, 2.0]);
        assert_approx_eq!(
            f64,
            interpolate(sample, &corner),
            sample(&VecDi::new([1, 2]))
        );
    }

    #[test]
    fn safe_gradient_falls_back_at_boundary() {
        let inside = |p: &VecDi<2>| p[0] >= 0 && p[1] >= 0;
        let grad = safe_gradient(linear_sample, inside, &VecDi::new([0, 0]), 1.0);
        // No negative-side neighbour exists, so this is a forward
        // difference, still matching the linear field's true slope.
        assert_approx_eq!(f64, grad[0], 2.0);
        assert_approx_eq!(f64, grad[1], 3.0);
    }
}
