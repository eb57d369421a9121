//! Structured inverse of `ρ·I + P` and `ρ·I + Q` by block Gaussian elimination.
//!
//! Each entry of the block system is an `M × W` image, and all arithmetic on
//! entries is pixel-wise.  The elimination runs in two sweeps:
//!
//! ```text
//! forward:  for each pivot t
//!             row t       ← row t / R[t,t]
//!             row u (u>t) ← row u − R[u,t] · row t
//! backward: for s = last..1, t = s−1..0
//!             T[t,·]      ← T[t,·] − R[t,s] · T[s,·]
//! ```
//!
//! For P the blocks are aligned: every product runs over the full width.  For
//! Q two rows `t` and `t1` only interact over their band window (see
//! [`band_window`]), so every product pairs the `lead` columns of one operand
//! with the `trail` columns of the other.  Widening those windows changes the
//! result.
//!
//! The P backward sweep additionally updates `R[t,s] ← R[t,s] − R[t,s]·R[s,s]`
//! with the already normalised `R[s,s]`; the Q sweep leaves R alone.
//!
//! Pivots are never checked.  A small ρ on a sparse aperture can divide by
//! zero and the resulting inf/NaN is returned as is.

use ndarray::{s, Array4, ArrayView4, Axis, Zip};

use super::window::{band_window, BandWindow};

/// How two block rows of the system overlap.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Coupling {
    /// Full-width blocks (P).
    Aligned,
    /// Blocks overlapping on a band window of width `N − |t − t1|` (Q).
    Banded,
}

impl Coupling {
    fn window(self, a: usize, b: usize, len: usize) -> BandWindow {
        match self {
            Coupling::Aligned => BandWindow { offset: 0, len },
            Coupling::Banded => band_window(a, b, len),
        }
    }
}

/// Result of a structured inversion.
#[derive(Clone, Debug)]
pub struct StructuredInverse {
    /// `T ≈ (ρ·I + K)⁻¹` in the same block layout as K.
    pub inverse: Array4<f32>,

    /// The system `A = ρ·I + K` before elimination.
    pub system: Array4<f32>,
}

impl StructuredInverse {
    /// Whether every entry of the inverse is finite.
    pub fn is_finite(&self) -> bool {
        self.inverse.iter().all(|v| v.is_finite())
    }
}

/// Block identity: a ones image on every diagonal slot.
pub fn block_identity(blocks: usize, rows: usize, cols: usize) -> Array4<f32> {
    let mut e = Array4::zeros((blocks, blocks, rows, cols));
    for t in 0..blocks {
        e.slice_mut(s![t, t, .., ..]).fill(1.0);
    }
    e
}

/// Inverse of `ρ·I + P` for P of shape `(S, S, M, N+L-1)`.
///
/// # Panics
///
/// Panics if P is not square in its shot axes.
pub fn compute_p_inv(rho: f32, p: ArrayView4<'_, f32>) -> StructuredInverse {
    eliminate(rho, p, Coupling::Aligned)
}

/// Inverse of `ρ·I + Q` for Q of shape `(L, L, M, N)`.
///
/// # Panics
///
/// Panics if Q is not square in its band axes.
pub fn compute_q_inv(rho: f32, q: ArrayView4<'_, f32>) -> StructuredInverse {
    eliminate(rho, q, Coupling::Banded)
}

fn eliminate(rho: f32, kernel: ArrayView4<'_, f32>, coupling: Coupling) -> StructuredInverse {
    let (blocks, blocks2, rows, cols) = kernel.dim();
    assert_eq!(blocks, blocks2, "structured system must be square in its block axes");

    let identity = block_identity(blocks, rows, cols);
    let system = &identity * rho + &kernel;
    let mut r = system.clone();
    let mut t = identity;

    // Forward sweep.
    for pivot in 0..blocks {
        let diag = r.slice(s![pivot, pivot, .., ..]).to_owned();
        for col in 0..blocks {
            Zip::from(r.slice_mut(s![pivot, col, .., ..]))
                .and(&diag)
                .for_each(|v, &d| *v /= d);
            Zip::from(t.slice_mut(s![pivot, col, .., ..]))
                .and(&diag)
                .for_each(|v, &d| *v /= d);
        }

        let r_pivot = r.index_axis(Axis(0), pivot).to_owned();
        let t_pivot = t.index_axis(Axis(0), pivot).to_owned();
        for row in pivot + 1..blocks {
            let w = coupling.window(row, pivot, cols);
            if w.is_empty() {
                continue;
            }
            let factor = r.slice(s![row, pivot, .., ..]).to_owned();
            for col in 0..blocks {
                Zip::from(r.slice_mut(s![row, col, .., w.lead()]))
                    .and(factor.slice(s![.., w.lead()]))
                    .and(r_pivot.slice(s![col, .., w.trail()]))
                    .for_each(|v, &f, &x| *v -= f * x);
                Zip::from(t.slice_mut(s![row, col, .., w.lead()]))
                    .and(factor.slice(s![.., w.lead()]))
                    .and(t_pivot.slice(s![col, .., w.trail()]))
                    .for_each(|v, &f, &x| *v -= f * x);
            }
        }
    }

    // Backward sweep.
    for col in (1..blocks).rev() {
        let t_col = t.index_axis(Axis(0), col).to_owned();
        let r_diag = r.slice(s![col, col, .., ..]).to_owned();
        for row in (0..col).rev() {
            let w = coupling.window(row, col, cols);
            if w.is_empty() {
                continue;
            }
            let coeff = r.slice(s![row, col, .., ..]);
            for target in 0..blocks {
                Zip::from(t.slice_mut(s![row, target, .., w.trail()]))
                    .and(coeff.slice(s![.., w.trail()]))
                    .and(t_col.slice(s![target, .., w.lead()]))
                    .for_each(|v, &c, &x| *v -= c * x);
            }

            if coupling == Coupling::Aligned {
                Zip::from(r.slice_mut(s![row, col, .., ..]))
                    .and(&r_diag)
                    .for_each(|v, &d| *v -= *v * d);
            }
        }
    }

    let inverse = StructuredInverse { inverse: t, system };
    tracing::debug!(rho, blocks, ?coupling, "eliminated structured system");
    if !inverse.is_finite() {
        tracing::warn!(
            rho,
            ?coupling,
            "structured inverse has non-finite entries; rho is too small for this aperture"
        );
    }
    inverse
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aperture::{ApertureInit, CodedAperture};
    use crate::structure::kernels::{compute_p, compute_q};
    use crate::structure::multiply::{imvm, imvms};
    use ndarray::Array3;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use rand_distr::{Distribution, Uniform};

    fn random_cube(shape: (usize, usize, usize, usize), seed: u64) -> Array4<f32> {
        let mut rng = StdRng::seed_from_u64(seed);
        let dist = Uniform::new(-1.0f32, 1.0);
        Array4::from_shape_simple_fn(shape, || dist.sample(&mut rng))
    }

    fn max_relative_error(got: &Array4<f32>, want: &Array4<f32>) -> f32 {
        let scale = want.iter().fold(0.0f32, |m, v| m.max(v.abs())).max(1e-12);
        got.iter()
            .zip(want.iter())
            .fold(0.0f32, |m, (a, b)| m.max((a - b).abs()))
            / scale
    }

    #[test]
    fn test_block_identity() {
        let e = block_identity(3, 2, 2);
        assert_eq!(e.sum(), 12.0);
        assert!(e.slice(s![1, 1, .., ..]).iter().all(|&v| v == 1.0));
        assert!(e.slice(s![0, 2, .., ..]).iter().all(|&v| v == 0.0));
    }

    #[test]
    fn test_p_inv_single_shot_is_reciprocal() {
        let ca = CodedAperture::random(1, 3, 4, ApertureInit::Uniform, 6, false);
        let p = compute_p(ca.values(), 3);
        let inv = compute_p_inv(0.25, p.view());
        for (got, &pv) in inv.inverse.iter().zip(p.iter()) {
            assert!((got - 1.0 / (0.25 + pv)).abs() < 1e-5);
        }
    }

    #[test]
    fn test_p_inv_large_rho_reconstructs_identity() {
        let ca = CodedAperture::random(1, 8, 8, ApertureInit::Binary, 1, false);
        let p = compute_p(ca.values(), 6);
        let inv = compute_p_inv(1e3, p.view());

        let y = random_cube((2, 1, 8, 13), 2);
        let ay = imvm(y.view(), inv.system.view());
        let back = imvm(ay.view(), inv.inverse.view());
        assert!(max_relative_error(&back, &y) < 1e-3);
    }

    #[test]
    fn test_p_inv_multi_shot_reconstructs_identity() {
        let ca = CodedAperture::random(3, 4, 5, ApertureInit::Uniform, 13, false);
        let p = compute_p(ca.values(), 4);
        let inv = compute_p_inv(0.5, p.view());

        let y = random_cube((1, 3, 4, 8), 3);
        let back = imvm(imvm(y.view(), inv.system.view()).view(), inv.inverse.view());
        assert!(max_relative_error(&back, &y) < 1e-3);
    }

    #[test]
    fn test_p_inv_system_is_shifted_kernel() {
        let ca = CodedAperture::random(2, 2, 3, ApertureInit::Uniform, 4, false);
        let p = compute_p(ca.values(), 2);
        let inv = compute_p_inv(2.0, p.view());
        let expected = &block_identity(2, 2, 4) * 2.0 + &p;
        assert_eq!(inv.system, expected);
    }

    #[test]
    fn test_q_inv_reconstructs_identity() {
        let ca = CodedAperture::random(1, 3, 9, ApertureInit::Uniform, 10, false);
        let q = compute_q(ca.values(), 5);
        let inv = compute_q_inv(0.5, q.view());

        let x = random_cube((2, 5, 3, 9), 11);
        let ax = imvms(x.view(), inv.system.view());
        let back = imvms(ax.view(), inv.inverse.view());
        assert!(max_relative_error(&back, &x) < 1e-3);

        // T is a two-sided inverse
        let tx = imvms(x.view(), inv.inverse.view());
        let forth = imvms(tx.view(), inv.system.view());
        assert!(max_relative_error(&forth, &x) < 1e-3);
    }

    #[test]
    fn test_q_inv_binary_aperture() {
        let ca = CodedAperture::random(1, 4, 12, ApertureInit::Binary, 77, false);
        let q = compute_q(ca.values(), 7);
        let inv = compute_q_inv(1.0, q.view());
        assert!(inv.is_finite());

        let x = random_cube((1, 7, 4, 12), 12);
        let back = imvms(imvms(x.view(), inv.system.view()).view(), inv.inverse.view());
        assert!(max_relative_error(&back, &x) < 1e-3);
    }

    #[test]
    fn test_q_inv_open_aperture_is_not_diagonal() {
        // An all-open aperture couples neighbouring bands, so T must carry
        // off-diagonal blocks.
        let ca = Array3::ones((1, 2, 6));
        let q = compute_q(ca.view(), 3);
        let inv = compute_q_inv(1.0, q.view());
        assert!(inv.inverse.slice(s![0, 1, .., ..]).iter().any(|&v| v != 0.0));
    }

    #[test]
    #[should_panic(expected = "structured system must be square")]
    fn test_p_inv_rejects_rectangular_kernel() {
        let p = Array4::<f32>::zeros((2, 3, 1, 4));
        compute_p_inv(1.0, p.view());
    }

    #[test]
    #[should_panic(expected = "structured system must be square")]
    fn test_q_inv_rejects_rectangular_kernel() {
        let q = Array4::<f32>::zeros((3, 2, 1, 4));
        compute_q_inv(1.0, q.view());
    }

    #[test]
    fn test_zero_rho_on_closed_aperture_propagates_nan() {
        let ca = Array3::zeros((1, 2, 4));
        let q = compute_q(ca.view(), 3);
        let inv = compute_q_inv(0.0, q.view());
        assert!(!inv.is_finite());

        let p = compute_p(ca.view(), 3);
        let inv = compute_p_inv(0.0, p.view());
        assert!(!inv.is_finite());
    }
}
