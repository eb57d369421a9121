//! The tensorial CASSI sensing operator.
//!
//! - [`shear`]: stateless forward/backward transforms and the aperture adjoint
//! - [`operator`]: [`TensorCassi`], which owns the aperture and its P/Q tensors
//! - [`solve`]: closed-form `(ρI + HᵀH)⁻¹` steps built on the structured inverses

pub mod operator;
pub mod shear;
pub mod solve;

pub use operator::{Calculation, OperatorConfig, SensingMode, TensorCassi};
pub use shear::{aperture_gradient, backward_tensor_cassi, forward_tensor_cassi};
pub use solve::NormalSolver;
