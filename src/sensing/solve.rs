//! Closed-form data-fidelity step `x = (ρI + HᵀH)⁻¹ (Hᵀy + ρv)`.
//!
//! This is the x-update of ADMM / plug-and-play reconstruction.  Two routes
//! give the same answer:
//!
//! - primal: apply the Q inverse with IMVMS, `(ρI + Q)⁻¹ r`
//! - dual (Woodbury): `(1/ρ)(r − Hᵀ (ρI + P)⁻¹ H r)`, which only inverts in
//!   shot space
//!
//! with `r = Hᵀy + ρv`.  Both divide by pivots that vanish as ρ → 0 on a
//! closed aperture.

use ndarray::{Array4, ArrayView4};

use crate::error::{ensure_shape, CassiError, Result};
use crate::structure::inverse::StructuredInverse;
use crate::structure::multiply::{imvm_with, imvms_with};

use super::operator::TensorCassi;

/// A Q inverse cached for one ρ and one aperture revision.
///
/// Iterative solvers keep ρ fixed across many steps; building the inverse
/// once amortises the elimination.
#[derive(Clone, Debug)]
pub struct NormalSolver {
    rho: f32,
    inverse: StructuredInverse,
    aperture_revision: u64,
}

impl NormalSolver {
    pub fn new(op: &TensorCassi, rho: f32) -> Self {
        Self {
            rho,
            inverse: op.q_inverse(rho),
            aperture_revision: op.aperture().revision(),
        }
    }

    pub fn rho(&self) -> f32 {
        self.rho
    }

    pub fn inverse(&self) -> &StructuredInverse {
        &self.inverse
    }

    /// Whether the cached inverse still matches `op`'s aperture.
    pub fn is_current(&self, op: &TensorCassi) -> bool {
        self.aperture_revision == op.aperture().revision()
    }

    /// Solve for measurements `y` and prior `v`.
    ///
    /// Fails with [`CassiError::StaleInverse`] if `op`'s aperture is not the
    /// one this solver was built from, including a mutated or reloaded copy.
    pub fn solve(
        &self,
        op: &TensorCassi,
        y: ArrayView4<'_, f32>,
        v: ArrayView4<'_, f32>,
    ) -> Result<Array4<f32>> {
        if !self.is_current(op) {
            return Err(CassiError::StaleInverse {
                built: self.aperture_revision,
                current: op.aperture().revision(),
            });
        }
        let r = op.normal_rhs(y, v, self.rho)?;
        let execution = op.execution_for(r.dim().0);
        Ok(imvms_with(r.view(), self.inverse.inverse.view(), execution))
    }
}

impl TensorCassi {
    /// `r = Hᵀy + ρv`.
    fn normal_rhs(
        &self,
        y: ArrayView4<'_, f32>,
        v: ArrayView4<'_, f32>,
        rho: f32,
    ) -> Result<Array4<f32>> {
        let mut r = self.backward(y)?;
        ensure_shape("prior", r.shape(), v.shape())?;
        r.scaled_add(rho, &v);
        Ok(r)
    }

    /// `(ρI + HᵀH)⁻¹ (Hᵀy + ρv)` through the Q inverse.
    pub fn solve_normal(
        &self,
        y: ArrayView4<'_, f32>,
        v: ArrayView4<'_, f32>,
        rho: f32,
    ) -> Result<Array4<f32>> {
        NormalSolver::new(self, rho).solve(self, y, v)
    }

    /// Same as [`solve_normal`](Self::solve_normal), through the P inverse
    /// and the Woodbury identity.  Requires `rho > 0`.
    pub fn solve_normal_dual(
        &self,
        y: ArrayView4<'_, f32>,
        v: ArrayView4<'_, f32>,
        rho: f32,
    ) -> Result<Array4<f32>> {
        let r = self.normal_rhs(y, v, rho)?;
        let hr = self.forward(r.view())?;
        let inverse = self.p_inverse(rho);
        let z = imvm_with(hr.view(), inverse.inverse.view(), self.execution_for(hr.dim().0));
        let htz = self.backward(z.view())?;
        Ok((r - &htz) / rho)
    }
}
