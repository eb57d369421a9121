//! `TensorCassi`: the stateful operator that owns the coded aperture.
//!
//! Construction validates the mode and the aperture geometry, then builds P
//! and Q once.  Every method that mutates the aperture rebuilds them before
//! returning, so [`TensorCassi::kernels`] always describes the current mask.

use std::fmt;
use std::str::FromStr;

use ndarray::{Array3, Array4, ArrayView3, ArrayView4};
use serde::{Deserialize, Serialize};

use crate::aperture::{ApertureInit, CodedAperture};
use crate::config;
use crate::error::{ensure_shape, CassiError, Result};
use crate::execution::Execution;
use crate::structure::inverse::{compute_p_inv, compute_q_inv, StructuredInverse};
use crate::structure::kernels::StructuredKernels;
use crate::structure::multiply::{imvm_with, imvms_with};

use super::shear::{aperture_gradient, backward_tensor_cassi, forward_tensor_cassi};

/// Optical layout of the system.  Only the single-disperser base model has
/// the P/Q structure this crate exploits.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SensingMode {
    Base,
}

impl FromStr for SensingMode {
    type Err = CassiError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "base" => Ok(SensingMode::Base),
            other => Err(CassiError::UnsupportedMode {
                mode: other.to_string(),
            }),
        }
    }
}

impl fmt::Display for SensingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SensingMode::Base => write!(f, "base"),
        }
    }
}

/// Which transform [`TensorCassi::apply`] runs.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Calculation {
    /// Cube → measurement.
    Forward,
    /// Measurement → cube.
    Backward,
    /// Cube → cube through the measurement.
    ForwardBackward,
}

impl FromStr for Calculation {
    type Err = CassiError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "forward" => Ok(Calculation::Forward),
            "backward" => Ok(Calculation::Backward),
            "forward_backward" => Ok(Calculation::ForwardBackward),
            other => Err(CassiError::UnknownCalculation {
                name: other.to_string(),
            }),
        }
    }
}

impl fmt::Display for Calculation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Calculation::Forward => write!(f, "forward"),
            Calculation::Backward => write!(f, "backward"),
            Calculation::ForwardBackward => write!(f, "forward_backward"),
        }
    }
}

/// Operator configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct OperatorConfig {
    /// `(L, M, N)`: bands, rows, columns of the spectral cube.
    pub input_shape: (usize, usize, usize),

    /// Sensing mode name; only `"base"` is accepted.
    pub mode: String,

    /// Whether the aperture may be updated by gradient steps.
    pub trainable: bool,

    /// Fill of the random aperture when none is supplied.
    pub init: ApertureInit,

    /// Seed for the random aperture.
    pub seed: u64,

    /// Fixed batch strategy.  `None` picks one per call from the batch size.
    pub execution: Option<Execution>,
}

impl Default for OperatorConfig {
    fn default() -> Self {
        Self {
            input_shape: (config::DEFAULT_BANDS, config::DEFAULT_ROWS, config::DEFAULT_COLS),
            mode: "base".to_string(),
            trainable: false,
            init: ApertureInit::Binary,
            seed: config::DEFAULT_SEED,
            execution: None,
        }
    }
}

/// Tensorial CASSI operator with cached structured kernels.
#[derive(Clone, Debug)]
pub struct TensorCassi {
    bands: usize,
    rows: usize,
    cols: usize,
    mode: SensingMode,
    aperture: CodedAperture,
    kernels: StructuredKernels,
    execution: Option<Execution>,
}

impl TensorCassi {
    /// Build an operator for cubes of shape `input_shape = (L, M, N)`.
    ///
    /// `initial_ca`, when given, must have shape `(1, M, N)`; otherwise a
    /// seeded binary aperture is drawn.
    pub fn new(
        input_shape: (usize, usize, usize),
        mode: &str,
        trainable: bool,
        initial_ca: Option<Array3<f32>>,
    ) -> Result<Self> {
        let config = OperatorConfig {
            input_shape,
            mode: mode.to_string(),
            trainable,
            ..OperatorConfig::default()
        };
        match initial_ca {
            Some(values) => {
                // Mode errors take precedence over shape errors.
                config.mode.parse::<SensingMode>()?;
                let (_, rows, cols) = input_shape;
                let aperture = CodedAperture::from_array(
                    values,
                    (config::BASE_SHOTS, rows, cols),
                    trainable,
                )?;
                Self::from_parts(&config, aperture)
            }
            None => Self::from_config(&config),
        }
    }

    /// Build an operator with a random aperture drawn as `config` says.
    pub fn from_config(config: &OperatorConfig) -> Result<Self> {
        let (_, rows, cols) = config.input_shape;
        let aperture = CodedAperture::random(
            config::BASE_SHOTS,
            rows,
            cols,
            config.init,
            config.seed,
            config.trainable,
        );
        Self::from_parts(config, aperture)
    }

    /// Build an operator around an existing aperture, e.g. one read back
    /// with [`CodedAperture::from_bytes`].  Trainability follows `config`.
    pub fn from_parts(config: &OperatorConfig, mut aperture: CodedAperture) -> Result<Self> {
        let mode: SensingMode = config.mode.parse()?;
        let (bands, rows, cols) = config.input_shape;
        if bands == 0 || rows == 0 || cols == 0 {
            return Err(CassiError::EmptyGeometry {
                shape: config.input_shape,
            });
        }
        let expected = (config::BASE_SHOTS, rows, cols);
        if aperture.dim() != expected {
            return Err(CassiError::ApertureShape {
                expected,
                actual: aperture.dim(),
            });
        }
        aperture.set_trainable(config.trainable);

        let kernels = StructuredKernels::build(&aperture, bands);
        tracing::debug!(
            %mode,
            bands,
            rows,
            cols,
            trainable = config.trainable,
            transmittance = aperture.transmittance(),
            "tensor cassi operator ready"
        );
        Ok(Self {
            bands,
            rows,
            cols,
            mode,
            aperture,
            kernels,
            execution: config.execution,
        })
    }

    /// Pin the batch strategy instead of choosing it per call.
    pub fn with_execution(mut self, execution: Execution) -> Self {
        self.execution = Some(execution);
        self
    }

    // ── Accessors ──────────────────────────────────────────────

    /// `(L, M, N)`.
    pub fn input_shape(&self) -> (usize, usize, usize) {
        (self.bands, self.rows, self.cols)
    }

    /// Measurement shape for a batch of `batch` cubes: `(B, 1, M, N+L-1)`.
    pub fn measurement_shape(&self, batch: usize) -> (usize, usize, usize, usize) {
        (batch, self.aperture.shots(), self.rows, self.width())
    }

    pub fn mode(&self) -> SensingMode {
        self.mode
    }

    pub fn aperture(&self) -> &CodedAperture {
        &self.aperture
    }

    /// P and Q for the current aperture.
    pub fn kernels(&self) -> &StructuredKernels {
        &self.kernels
    }

    pub fn is_trainable(&self) -> bool {
        self.aperture.is_trainable()
    }

    /// Strategy used for a batch of `batch` items.
    pub fn execution_for(&self, batch: usize) -> Execution {
        self.execution.unwrap_or_else(|| Execution::for_batch(batch))
    }

    fn width(&self) -> usize {
        config::measurement_width(self.bands, self.cols)
    }

    fn check_cube(&self, what: &'static str, x: &ArrayView4<'_, f32>) -> Result<()> {
        ensure_shape(what, &[self.bands, self.rows, self.cols], &x.shape()[1..])
    }

    fn check_measurement(&self, what: &'static str, y: &ArrayView4<'_, f32>) -> Result<()> {
        ensure_shape(
            what,
            &[self.aperture.shots(), self.rows, self.width()],
            &y.shape()[1..],
        )
    }

    // ── Sensing ────────────────────────────────────────────────

    /// `(B, L, M, N)` → `(B, 1, M, N+L-1)`.
    pub fn forward(&self, x: ArrayView4<'_, f32>) -> Result<Array4<f32>> {
        self.check_cube("cube", &x)?;
        let execution = self.execution_for(x.dim().0);
        Ok(forward_tensor_cassi(x, self.aperture.values(), execution))
    }

    /// `(B, 1, M, N+L-1)` → `(B, L, M, N)`.
    pub fn backward(&self, y: ArrayView4<'_, f32>) -> Result<Array4<f32>> {
        self.check_measurement("measurement", &y)?;
        let execution = self.execution_for(y.dim().0);
        Ok(backward_tensor_cassi(y, self.aperture.values(), execution))
    }

    /// `backward(forward(x))`.
    pub fn forward_backward(&self, x: ArrayView4<'_, f32>) -> Result<Array4<f32>> {
        let y = self.forward(x)?;
        self.backward(y.view())
    }

    /// Dispatch on `calculation`.  Reads the aperture only.
    pub fn apply(&self, x: ArrayView4<'_, f32>, calculation: Calculation) -> Result<Array4<f32>> {
        tracing::trace!(%calculation, shape = ?x.shape(), "apply");
        match calculation {
            Calculation::Forward => self.forward(x),
            Calculation::Backward => self.backward(x),
            Calculation::ForwardBackward => self.forward_backward(x),
        }
    }

    /// [`apply`](Self::apply) with the calculation given by name:
    /// `"forward"`, `"backward"` or `"forward_backward"`.
    pub fn apply_named(&self, x: ArrayView4<'_, f32>, type_calculation: &str) -> Result<Array4<f32>> {
        let calculation: Calculation = type_calculation.parse()?;
        self.apply(x, calculation)
    }

    // ── Structured kernels ─────────────────────────────────────

    /// `P y` without forming H, equal to `forward(backward(y))`.
    pub fn imvm(&self, y: ArrayView4<'_, f32>) -> Result<Array4<f32>> {
        self.check_measurement("measurement", &y)?;
        let execution = self.execution_for(y.dim().0);
        Ok(imvm_with(y, self.kernels.p.view(), execution))
    }

    /// `Q x` without forming H, equal to `backward(forward(x))`.
    pub fn imvms(&self, x: ArrayView4<'_, f32>) -> Result<Array4<f32>> {
        self.check_cube("cube", &x)?;
        let execution = self.execution_for(x.dim().0);
        Ok(imvms_with(x, self.kernels.q.view(), execution))
    }

    /// `(ρI + P)⁻¹` for the current aperture.
    pub fn p_inverse(&self, rho: f32) -> StructuredInverse {
        compute_p_inv(rho, self.kernels.p.view())
    }

    /// `(ρI + Q)⁻¹` for the current aperture.
    pub fn q_inverse(&self, rho: f32) -> StructuredInverse {
        compute_q_inv(rho, self.kernels.q.view())
    }

    // ── Aperture updates ───────────────────────────────────────

    /// Replace the aperture values and rebuild P and Q.
    pub fn set_aperture(&mut self, values: Array3<f32>) -> Result<()> {
        self.aperture.replace(values)?;
        self.rebuild_kernels();
        Ok(())
    }

    /// Snap the aperture to {0, 1} and rebuild P and Q.
    pub fn binarize_aperture(&mut self) {
        self.aperture.binarize();
        self.rebuild_kernels();
    }

    /// Gradient of `⟨forward(x), dy⟩` with respect to the aperture.
    pub fn aperture_gradient(&self, x: ArrayView4<'_, f32>, dy: ArrayView4<'_, f32>) -> Result<Array3<f32>> {
        self.check_cube("cube", &x)?;
        self.check_measurement("measurement gradient", &dy)?;
        ensure_shape("measurement gradient batch", &[x.dim().0], &[dy.dim().0])?;
        Ok(aperture_gradient(x, dy))
    }

    /// `f ← clamp(f − lr · grad, 0, 1)`, then rebuild P and Q.
    pub fn step_aperture(&mut self, grad: ArrayView3<'_, f32>, lr: f32) -> Result<()> {
        self.aperture.descend(grad, lr)?;
        self.rebuild_kernels();
        Ok(())
    }

    fn rebuild_kernels(&mut self) {
        self.kernels = StructuredKernels::build(&self.aperture, self.bands);
    }

    // ── Regularizers ───────────────────────────────────────────

    /// Evaluate a caller-supplied regularizer on the aperture.
    pub fn weights_reg<R>(&self, reg: impl FnOnce(ArrayView3<'_, f32>) -> R) -> R {
        reg(self.aperture.values())
    }

    /// Evaluate a caller-supplied regularizer on `forward(x)`.
    pub fn output_reg<R>(
        &self,
        reg: impl FnOnce(ArrayView4<'_, f32>) -> R,
        x: ArrayView4<'_, f32>,
    ) -> Result<R> {
        let y = self.forward(x)?;
        Ok(reg(y.view()))
    }
}
