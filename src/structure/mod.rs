//! Structured P/Q tensors: construction, shifted multiplication and
//! block inversion.
//!
//! P = H Hᵀ lives in shot space with shape `(S, S, M, N+L-1)`; Q = Hᵀ H lives
//! in band space with shape `(L, L, M, N)`.  Neither is ever materialised as a
//! dense matrix.

pub mod inverse;
pub mod kernels;
pub mod multiply;
pub mod window;

pub use inverse::{block_identity, compute_p_inv, compute_q_inv, StructuredInverse};
pub use kernels::{compute_p, compute_q, StructuredKernels};
pub use multiply::{imvm, imvm_parallel, imvm_with, imvms, imvms_naive, imvms_parallel, imvms_with};
pub use window::{band_window, BandWindow};
