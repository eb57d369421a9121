//! Structured kernel builder: the P and Q tensors of the tensorial CASSI model.
//!
//! With `H` the dispersive sensing operator and `f_t` the aperture of shot `t`:
//!
//! ```text
//! P[t,s] = Σ_l  S_l(f_t ⊙ f_s)                 shape (S, S, M, N+L-1)   (H Hᵀ)
//! Q[0,l] = Σ_t  f_t[:, :N-l] ⊙ f_t[:, l:N]     placed at columns [l, N) (Hᵀ H)
//! Q[k,l] = Q[0, l-k]                            k ≤ l  (Toeplitz)
//! Q[l,k][:, :N-l+k] = Q[k,l][:, l-k:N]          k < l  (shifted reflection)
//! ```
//!
//! `S_l` shifts by `l` columns along the dispersion axis.  Both tensors are pure
//! functions of the aperture; they go stale as soon as the aperture mutates.

use std::time::Instant;

use ndarray::{s, Array4, ArrayView3, Axis, Zip};

use crate::aperture::CodedAperture;
use crate::config::measurement_width;

use super::window::{band_window, dispersed};

/// Build P from an `(S, M, N)` aperture and `bands` spectral bands.
pub fn compute_p(aperture: ArrayView3<'_, f32>, bands: usize) -> Array4<f32> {
    let (shots, rows, cols) = aperture.dim();
    let width = measurement_width(bands, cols);
    let mut p = Array4::zeros((shots, shots, rows, width));

    for t in 0..shots {
        for u in t..shots {
            let product = &aperture.index_axis(Axis(0), t) * &aperture.index_axis(Axis(0), u);
            let mut block = p.slice_mut(s![t, u, .., ..]);
            for l in 0..bands {
                let mut dst = block.slice_mut(s![.., dispersed(l, cols)]);
                dst += &product;
            }

            // self-adjoint: the lower block is the upper one
            if u != t {
                let upper = p.slice(s![t, u, .., ..]).to_owned();
                p.slice_mut(s![u, t, .., ..]).assign(&upper);
            }
        }
    }

    p
}

/// Build Q from an `(S, M, N)` aperture and `bands` spectral bands.
pub fn compute_q(aperture: ArrayView3<'_, f32>, bands: usize) -> Array4<f32> {
    let (shots, rows, cols) = aperture.dim();
    let mut q = Array4::zeros((bands, bands, rows, cols));

    // First row: autocorrelation of the aperture at lag l, summed over shots.
    for l in 0..bands {
        let w = band_window(0, l, cols);
        if w.is_empty() {
            continue;
        }
        let mut dst = q.slice_mut(s![0, l, .., w.trail()]);
        for t in 0..shots {
            let lead = aperture.slice(s![t, .., w.lead()]);
            let trail = aperture.slice(s![t, .., w.trail()]);
            Zip::from(&mut dst)
                .and(&lead)
                .and(&trail)
                .for_each(|d, &a, &b| *d += a * b);
        }
    }

    // Upper triangle from the first row (diagonal-constant).
    for k in 1..bands {
        for l in k..bands {
            let src = q.slice(s![0, l - k, .., ..]).to_owned();
            q.slice_mut(s![k, l, .., ..]).assign(&src);
        }
    }

    // Lower triangle by shifting the mirrored upper block left.
    for k in 0..bands {
        for l in k + 1..bands {
            let w = band_window(k, l, cols);
            let upper = q.slice(s![k, l, .., w.trail()]).to_owned();
            q.slice_mut(s![l, k, .., w.lead()]).assign(&upper);
        }
    }

    q
}

/// P and Q built from one aperture revision.
#[derive(Clone, Debug)]
pub struct StructuredKernels {
    /// `H Hᵀ` in shot space, shape `(S, S, M, N+L-1)`.
    pub p: Array4<f32>,

    /// `Hᵀ H` in band space, shape `(L, L, M, N)`.
    pub q: Array4<f32>,

    /// Aperture version the tensors were derived from.
    aperture_version: u64,

    /// Aperture revision the tensors were derived from.
    aperture_revision: u64,
}

impl StructuredKernels {
    /// Build both tensors for `aperture` and `bands` spectral bands.
    pub fn build(aperture: &CodedAperture, bands: usize) -> Self {
        let start = Instant::now();
        let p = compute_p(aperture.values(), bands);
        let q = compute_q(aperture.values(), bands);
        tracing::debug!(
            p_shape = ?p.dim(),
            q_shape = ?q.dim(),
            aperture_version = aperture.version(),
            elapsed_us = start.elapsed().as_micros() as u64,
            "built structured kernels"
        );
        Self {
            p,
            q,
            aperture_version: aperture.version(),
            aperture_revision: aperture.revision(),
        }
    }

    /// Whether these tensors still describe `aperture`.
    pub fn is_current(&self, aperture: &CodedAperture) -> bool {
        self.aperture_revision == aperture.revision()
    }

    pub fn aperture_version(&self) -> u64 {
        self.aperture_version
    }

    pub fn aperture_revision(&self) -> u64 {
        self.aperture_revision
    }

    /// Number of spectral bands `L`.
    pub fn bands(&self) -> usize {
        self.q.dim().0
    }
}
