//! Shifted tensor-vector multiplication with P and Q.
//!
//! Neither tensor is ever expanded into a dense matrix.  P couples shots
//! pixel-by-pixel, so IMVM is a small per-pixel matrix product over the shot
//! axis.  Q couples bands through shifted windows, so IMVMS walks each
//! (k, l) block over its band window only:
//!
//! ```text
//! l ≤ k:  y[k][:, :N+l-k] += Q[k,l][:, :N+l-k] ⊙ x[l][:, k-l:N]
//! l > k:  y[k][:, l-k:N]  += Q[k,l][:, l-k:N]  ⊙ x[l][:, :N-l+k]
//! ```
//!
//! Three IMVMS variants:
//! 1. `imvms_naive`: scalar index loops, reference for validation
//! 2. `imvms`: windowed slices, one batch item at a time
//! 3. `imvms_parallel`: windowed slices, batch items across rayon threads
//!
//! `imvm_with` / `imvms_with` take the strategy as an argument.

use ndarray::{s, Array4, ArrayView3, ArrayView4, ArrayViewMut3, Axis, Zip};

use crate::execution::{for_each_item, Execution};

use super::window::band_window;

// ──────────────────────────────────────────────────────────────
// IMVM (P, shot space)
// ──────────────────────────────────────────────────────────────

/// `out[t] += Σ_s P[t,s] ⊙ y[s]` for one batch item.
fn imvm_into(mut out: ArrayViewMut3<'_, f32>, y: ArrayView3<'_, f32>, p: ArrayView4<'_, f32>) {
    let shots = p.dim().0;
    for t in 0..shots {
        let mut out_t = out.index_axis_mut(Axis(0), t);
        for u in 0..shots {
            Zip::from(&mut out_t)
                .and(p.slice(s![t, u, .., ..]))
                .and(y.index_axis(Axis(0), u))
                .for_each(|o, &a, &b| *o += a * b);
        }
    }
}

fn check_imvm_shapes(y: &ArrayView4<'_, f32>, p: &ArrayView4<'_, f32>) {
    let (shots, shots2, rows, width) = p.dim();
    assert_eq!(shots, shots2, "P must be square in its shot axes");
    let (_, ys, yr, yw) = y.dim();
    assert_eq!((ys, yr, yw), (shots, rows, width), "y does not match P");
}

/// Apply P to a batch of measurements `y` of shape `(B, S, M, N+L-1)`.
///
/// # Panics
///
/// Panics if `y` does not match P's trailing shape.
pub fn imvm(y: ArrayView4<'_, f32>, p: ArrayView4<'_, f32>) -> Array4<f32> {
    imvm_with(y, p, Execution::Sequential)
}

/// [`imvm`] with batch items distributed across threads.
pub fn imvm_parallel(y: ArrayView4<'_, f32>, p: ArrayView4<'_, f32>) -> Array4<f32> {
    imvm_with(y, p, Execution::Parallel)
}

/// [`imvm`] under an explicit execution strategy.
pub fn imvm_with(y: ArrayView4<'_, f32>, p: ArrayView4<'_, f32>, execution: Execution) -> Array4<f32> {
    check_imvm_shapes(&y, &p);
    let mut out = Array4::zeros(y.raw_dim());
    for_each_item(&mut out, y, execution, |out_b, y_b| imvm_into(out_b, y_b, p));
    out
}

// ──────────────────────────────────────────────────────────────
// IMVMS (Q, band space)
// ──────────────────────────────────────────────────────────────

/// Windowed `out[k] += Σ_l Q[k,l] ⊙ shift(x[l])` for one batch item.
fn imvms_into(mut out: ArrayViewMut3<'_, f32>, x: ArrayView3<'_, f32>, q: ArrayView4<'_, f32>) {
    let (bands, _, _, cols) = q.dim();
    for k in 0..bands {
        let mut out_k = out.index_axis_mut(Axis(0), k);
        for l in 0..bands {
            let w = band_window(k, l, cols);
            if w.is_empty() {
                continue;
            }
            // Below the diagonal the input is read ahead of the output;
            // above it, behind.
            let (out_cols, in_cols) = if l <= k {
                (w.lead(), w.trail())
            } else {
                (w.trail(), w.lead())
            };
            Zip::from(out_k.slice_mut(s![.., out_cols.clone()]))
                .and(q.slice(s![k, l, .., out_cols]))
                .and(x.slice(s![l, .., in_cols]))
                .for_each(|o, &a, &b| *o += a * b);
        }
    }
}

fn check_imvms_shapes(x: &ArrayView4<'_, f32>, q: &ArrayView4<'_, f32>) {
    let (bands, bands2, rows, cols) = q.dim();
    assert_eq!(bands, bands2, "Q must be square in its band axes");
    let (_, xl, xr, xc) = x.dim();
    assert_eq!((xl, xr, xc), (bands, rows, cols), "x does not match Q");
}

/// Apply Q to a batch of cubes `x` of shape `(B, L, M, N)`.
///
/// # Panics
///
/// Panics if `x` does not match Q's trailing shape.
pub fn imvms(x: ArrayView4<'_, f32>, q: ArrayView4<'_, f32>) -> Array4<f32> {
    imvms_with(x, q, Execution::Sequential)
}

/// [`imvms`] with batch items distributed across threads.
pub fn imvms_parallel(x: ArrayView4<'_, f32>, q: ArrayView4<'_, f32>) -> Array4<f32> {
    imvms_with(x, q, Execution::Parallel)
}

/// [`imvms`] under an explicit execution strategy.
pub fn imvms_with(x: ArrayView4<'_, f32>, q: ArrayView4<'_, f32>, execution: Execution) -> Array4<f32> {
    check_imvms_shapes(&x, &q);
    let mut out = Array4::zeros(x.raw_dim());
    for_each_item(&mut out, x, execution, |out_b, x_b| imvms_into(out_b, x_b, q));
    out
}

/// Scalar reference for [`imvms`]: `y[k](j) += Q[k,l](j) · x[l](j + k − l)`
/// wherever the source column exists.
pub fn imvms_naive(x: ArrayView4<'_, f32>, q: ArrayView4<'_, f32>) -> Array4<f32> {
    check_imvms_shapes(&x, &q);
    let (batch, bands, rows, cols) = x.dim();
    let mut out = Array4::zeros((batch, bands, rows, cols));
    for b in 0..batch {
        for k in 0..bands {
            for l in 0..bands {
                for i in 0..rows {
                    for j in 0..cols {
                        let src = j as isize + k as isize - l as isize;
                        if src < 0 || src >= cols as isize {
                            continue;
                        }
                        out[[b, k, i, j]] += q[[k, l, i, j]] * x[[b, l, i, src as usize]];
                    }
                }
            }
        }
    }
    out
}
