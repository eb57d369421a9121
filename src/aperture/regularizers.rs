//! Scalar regularizers for coded apertures and simulated measurements.
//!
//! These plug into `TensorCassi::weights_reg` / `TensorCassi::output_reg`,
//! which accept any `Fn(ArrayView<f32, D>) -> R`.

use ndarray::{ArrayView, Dimension};

/// Binarization penalty: Σ a²(1 − a)².
///
/// Zero exactly when every entry is 0 or 1.
pub fn binary_penalty<D: Dimension>(values: ArrayView<'_, f32, D>) -> f32 {
    values
        .iter()
        .map(|&a| {
            let b = a * (1.0 - a);
            b * b
        })
        .sum()
}

/// Transmittance penalty: (mean(a) − target)².
pub fn transmittance_penalty<D: Dimension>(values: ArrayView<'_, f32, D>, target: f32) -> f32 {
    let mean = values.mean().unwrap_or(0.0);
    (mean - target) * (mean - target)
}

/// Squared L2 norm, handy for measurement energy.
pub fn energy<D: Dimension>(values: ArrayView<'_, f32, D>) -> f32 {
    values.iter().map(|v| v * v).sum()
}
