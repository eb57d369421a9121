//! Dispersive sensing transforms of the base CASSI model.
//!
//! The cube is masked by each shot's aperture, sheared by one column per band
//! and integrated on the detector:
//!
//! ```text
//! forward:   y[t][:, l:l+N] += f_t ⊙ x[l]             (B,L,M,N) → (B,S,M,N+L-1)
//! backward:  x[l] = Σ_t f_t ⊙ y[t][:, l:l+N]          (B,S,M,N+L-1) → (B,L,M,N)
//! ```
//!
//! `backward` is the exact adjoint of `forward`, hence
//! `forward ∘ backward = IMVM(·, P)` and `backward ∘ forward = IMVMS(·, Q)`.

use ndarray::{s, Array3, Array4, ArrayView3, ArrayView4, ArrayViewMut3, Axis, Zip};

use crate::config::measurement_width;
use crate::execution::{for_each_item, Execution};
use crate::structure::window::dispersed;

fn forward_item(mut y: ArrayViewMut3<'_, f32>, x: ArrayView3<'_, f32>, ca: ArrayView3<'_, f32>) {
    let cols = ca.dim().2;
    for (t, f_t) in ca.outer_iter().enumerate() {
        let mut y_t = y.index_axis_mut(Axis(0), t);
        for (l, x_l) in x.outer_iter().enumerate() {
            Zip::from(y_t.slice_mut(s![.., dispersed(l, cols)]))
                .and(&f_t)
                .and(&x_l)
                .for_each(|o, &f, &v| *o += f * v);
        }
    }
}

fn backward_item(mut x: ArrayViewMut3<'_, f32>, y: ArrayView3<'_, f32>, ca: ArrayView3<'_, f32>) {
    let cols = ca.dim().2;
    for (l, mut x_l) in x.outer_iter_mut().enumerate() {
        for (t, f_t) in ca.outer_iter().enumerate() {
            Zip::from(&mut x_l)
                .and(&f_t)
                .and(y.slice(s![t, .., dispersed(l, cols)]))
                .for_each(|o, &f, &v| *o += f * v);
        }
    }
}

/// Project cubes `(B, L, M, N)` onto measurements `(B, S, M, N+L-1)`.
///
/// # Panics
///
/// Panics if the cube's spatial shape differs from the aperture's.
pub fn forward_tensor_cassi(
    x: ArrayView4<'_, f32>,
    ca: ArrayView3<'_, f32>,
    execution: Execution,
) -> Array4<f32> {
    let (batch, bands, rows, cols) = x.dim();
    let (shots, ca_rows, ca_cols) = ca.dim();
    assert_eq!((rows, cols), (ca_rows, ca_cols), "cube does not match aperture");

    let width = measurement_width(bands, cols);
    let mut y = Array4::zeros((batch, shots, rows, width));
    for_each_item(&mut y, x, execution, |y_b, x_b| forward_item(y_b, x_b, ca));
    y
}

/// Back-project measurements `(B, S, M, N+L-1)` onto cubes `(B, L, M, N)`.
///
/// # Panics
///
/// Panics if the measurement is narrower than the aperture or its shot and
/// row axes disagree with it.
pub fn backward_tensor_cassi(
    y: ArrayView4<'_, f32>,
    ca: ArrayView3<'_, f32>,
    execution: Execution,
) -> Array4<f32> {
    let (batch, y_shots, rows, width) = y.dim();
    let (shots, ca_rows, cols) = ca.dim();
    assert_eq!((y_shots, rows), (shots, ca_rows), "measurement does not match aperture");
    assert!(width >= cols, "measurement narrower than aperture");

    let bands = width - cols + 1;
    let mut x = Array4::zeros((batch, bands, rows, cols));
    for_each_item(&mut x, y, execution, |x_b, y_b| backward_item(x_b, y_b, ca));
    x
}

/// Gradient of `⟨forward(x), dy⟩` with respect to the aperture.
///
/// `g[t](i,j) = Σ_b Σ_l x[b,l](i,j) · dy[b,t](i,j+l)`, shape `(S, M, N)`.
pub fn aperture_gradient(x: ArrayView4<'_, f32>, dy: ArrayView4<'_, f32>) -> Array3<f32> {
    let (batch, bands, rows, cols) = x.dim();
    let (dy_batch, shots, dy_rows, width) = dy.dim();
    assert_eq!(batch, dy_batch, "batch size mismatch");
    assert_eq!(rows, dy_rows, "row count mismatch");
    assert_eq!(width, measurement_width(bands, cols), "measurement width mismatch");

    let mut grad = Array3::zeros((shots, rows, cols));
    for (x_b, dy_b) in x.outer_iter().zip(dy.outer_iter()) {
        for (t, mut g_t) in grad.outer_iter_mut().enumerate() {
            for (l, x_l) in x_b.outer_iter().enumerate() {
                Zip::from(&mut g_t)
                    .and(&x_l)
                    .and(dy_b.slice(s![t, .., dispersed(l, cols)]))
                    .for_each(|g, &v, &d| *g += v * d);
            }
        }
    }
    grad
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aperture::{ApertureInit, CodedAperture};
    use crate::structure::kernels::{compute_p, compute_q};
    use crate::structure::multiply::{imvm, imvms};
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use rand_distr::{Distribution, Normal};

    fn random_cube(shape: (usize, usize, usize, usize), seed: u64) -> Array4<f32> {
        let mut rng = StdRng::seed_from_u64(seed);
        let normal = Normal::new(0.0f32, 1.0).unwrap();
        Array4::from_shape_simple_fn(shape, || normal.sample(&mut rng))
    }

    fn assert_close(a: &Array4<f32>, b: &Array4<f32>, tol: f32) {
        assert_eq!(a.dim(), b.dim());
        for (x, y) in a.iter().zip(b.iter()) {
            assert!((x - y).abs() < tol, "{} vs {}", x, y);
        }
    }

    #[test]
    fn test_forward_shape() {
        let ca = CodedAperture::random(1, 6, 5, ApertureInit::Binary, 0, false);
        let x = random_cube((3, 4, 6, 5), 1);
        let y = forward_tensor_cassi(x.view(), ca.values(), Execution::Sequential);
        assert_eq!(y.dim(), (3, 1, 6, 8));
    }

    #[test]
    fn test_forward_shears_bands() {
        // Open aperture, band l lit only at column 0 → detector column l.
        let ca = Array3::ones((1, 1, 3));
        let mut x = Array4::zeros((1, 3, 1, 3));
        for l in 0..3 {
            x[[0, l, 0, 0]] = (l + 1) as f32;
        }
        let y = forward_tensor_cassi(x.view(), ca.view(), Execution::Sequential);
        assert_eq!(y.slice(s![0, 0, 0, ..]).to_vec(), vec![1.0, 2.0, 3.0, 0.0, 0.0]);
    }

    #[test]
    fn test_backward_shape() {
        let ca = CodedAperture::random(1, 6, 5, ApertureInit::Binary, 0, false);
        let y = random_cube((2, 1, 6, 8), 2);
        let x = backward_tensor_cassi(y.view(), ca.values(), Execution::Sequential);
        assert_eq!(x.dim(), (2, 4, 6, 5));
    }

    #[test]
    fn test_backward_is_adjoint() {
        let ca = CodedAperture::random(2, 3, 6, ApertureInit::Uniform, 3, false);
        let x = random_cube((2, 4, 3, 6), 4);
        let y = random_cube((2, 2, 3, 9), 5);

        let hx = forward_tensor_cassi(x.view(), ca.values(), Execution::Sequential);
        let hty = backward_tensor_cassi(y.view(), ca.values(), Execution::Sequential);
        let lhs: f32 = (&hx * &y).sum();
        let rhs: f32 = (&x * &hty).sum();
        assert!((lhs - rhs).abs() < 1e-3 * lhs.abs().max(1.0), "{} vs {}", lhs, rhs);
    }

    #[test]
    fn test_forward_backward_equals_imvm_p() {
        for shots in [1, 2] {
            let ca = CodedAperture::random(shots, 4, 7, ApertureInit::Uniform, 6, false);
            let p = compute_p(ca.values(), 5);
            let y = random_cube((2, shots, 4, 11), 7);

            let hht = forward_tensor_cassi(
                backward_tensor_cassi(y.view(), ca.values(), Execution::Sequential).view(),
                ca.values(),
                Execution::Sequential,
            );
            assert_close(&hht, &imvm(y.view(), p.view()), 1e-4);
        }
    }

    #[test]
    fn test_backward_forward_equals_imvms_q() {
        for shots in [1, 3] {
            let ca = CodedAperture::random(shots, 3, 8, ApertureInit::Binary, 8, false);
            let q = compute_q(ca.values(), 6);
            let x = random_cube((2, 6, 3, 8), 9);

            let hth = backward_tensor_cassi(
                forward_tensor_cassi(x.view(), ca.values(), Execution::Sequential).view(),
                ca.values(),
                Execution::Sequential,
            );
            assert_close(&hth, &imvms(x.view(), q.view()), 1e-4);
        }
    }

    #[test]
    fn test_parallel_matches_sequential() {
        let ca = CodedAperture::random(1, 5, 5, ApertureInit::Binary, 10, false);
        let x = random_cube((6, 3, 5, 5), 11);
        let seq = forward_tensor_cassi(x.view(), ca.values(), Execution::Sequential);
        let par = forward_tensor_cassi(x.view(), ca.values(), Execution::Parallel);
        assert_eq!(seq, par);

        let seq_b = backward_tensor_cassi(seq.view(), ca.values(), Execution::Sequential);
        let par_b = backward_tensor_cassi(par.view(), ca.values(), Execution::Parallel);
        assert_eq!(seq_b, par_b);
    }

    #[test]
    fn test_aperture_gradient_matches_finite_difference() {
        let ca = CodedAperture::random(1, 2, 4, ApertureInit::Uniform, 12, false);
        let x = random_cube((2, 3, 2, 4), 13);
        let dy = random_cube((2, 1, 2, 6), 14);
        let grad = aperture_gradient(x.view(), dy.view());

        // ⟨forward(x; f), dy⟩ is linear in f: a unit step is exact up to rounding.
        let objective = |f: &Array3<f32>| -> f32 {
            (&forward_tensor_cassi(x.view(), f.view(), Execution::Sequential) * &dy).sum()
        };
        let base = ca.values().to_owned();
        let f0 = objective(&base);
        let eps = 1.0;
        for i in 0..2 {
            for j in 0..4 {
                let mut bumped = base.clone();
                bumped[[0, i, j]] += eps;
                let fd = (objective(&bumped) - f0) / eps;
                assert!(
                    (fd - grad[[0, i, j]]).abs() < 1e-3,
                    "pixel ({}, {}): fd={} analytic={}",
                    i,
                    j,
                    fd,
                    grad[[0, i, j]]
                );
            }
        }
    }

    #[test]
    #[should_panic(expected = "cube does not match aperture")]
    fn test_forward_rejects_mismatched_cube() {
        let ca = Array3::<f32>::ones((1, 4, 4));
        let x = Array4::<f32>::zeros((1, 2, 4, 5));
        forward_tensor_cassi(x.view(), ca.view(), Execution::Sequential);
    }
}
