//! # tensor-cassi
//!
//! Tensorial forward/backward operator for a single-disperser coded aperture
//! snapshot spectral imager (CASSI), with structured P/Q kernels that make the
//! regularised normal equations cheap to invert.
//!
//! ## Components
//!
//! 1. **Coded aperture**: the only mutable parameter, versioned and persistable
//! 2. **Shear transforms**: cube ⇄ measurement, exact adjoints of one another
//! 3. **Structured kernels**: P = H Hᵀ in shot space, Q = Hᵀ H in band space
//! 4. **IMVM / IMVMS**: P and Q products over shifted band windows
//! 5. **Structured inverses**: `(ρI + P)⁻¹`, `(ρI + Q)⁻¹` by block elimination
//! 6. **Normal solver**: `(ρI + HᵀH)⁻¹(Hᵀy + ρv)`, primal or Woodbury
//!
//! ## Shapes
//!
//! - cube `x`: `(B, L, M, N)`
//! - measurement `y`: `(B, 1, M, N+L-1)`
//! - aperture: `(1, M, N)`
//! - P: `(1, 1, M, N+L-1)`, Q: `(L, L, M, N)`

pub mod aperture;
pub mod error;
pub mod execution;
pub mod sensing;
pub mod structure;

pub use aperture::{ApertureInit, CodedAperture};
pub use error::{CassiError, ErrorKind, Result};
pub use execution::Execution;
pub use sensing::{Calculation, NormalSolver, OperatorConfig, SensingMode, TensorCassi};
pub use structure::{StructuredInverse, StructuredKernels};

/// Operator-wide constants.
pub mod config {
    /// Spectral bands of the default cube.
    pub const DEFAULT_BANDS: usize = 31;

    /// Default spatial rows.
    pub const DEFAULT_ROWS: usize = 32;

    /// Default spatial columns.
    pub const DEFAULT_COLS: usize = 32;

    /// Default batch size of the CLI workload.
    pub const DEFAULT_BATCH: usize = 8;

    /// Default ADMM penalty ρ.
    pub const DEFAULT_RHO: f32 = 0.5;

    /// Default aperture seed.
    pub const DEFAULT_SEED: u64 = 0;

    /// Shots of the base mode.
    pub const BASE_SHOTS: usize = 1;

    /// ρ at which `(ρI + P)⁻¹(ρI + P)` must reproduce the identity.
    pub const IDENTITY_RHO: f32 = 1e3;

    /// Relative error tolerated by identity checks.
    pub const IDENTITY_TOLERANCE: f32 = 1e-3;

    /// Detector width for `bands` bands over `cols` columns: `N + L − 1`.
    pub fn measurement_width(bands: usize, cols: usize) -> usize {
        cols + bands.saturating_sub(1)
    }
}
