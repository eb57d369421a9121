//! Coded aperture state: the only mutable parameter of the sensing model.
//!
//! The aperture is a transmittance mask `f ∈ [0,1]^{S × M × N}`, one `M × N`
//! plane per shot.  The base tensorial mode uses a single shot (`S = 1`).
//!
//! Every mutation bumps `version` and draws a fresh `revision`.  Revisions
//! come from one process-wide counter, so two apertures share a revision only
//! if one is an unmutated clone of the other.  Derived tensors (P, Q, cached
//! inverses) record the revision to detect that they describe another mask.

use std::sync::atomic::{AtomicU64, Ordering};

use ndarray::{Array3, ArrayView3};
use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, Uniform};
use serde::{Deserialize, Serialize};

use crate::error::{CassiError, Result};

static NEXT_REVISION: AtomicU64 = AtomicU64::new(1);

fn next_revision() -> u64 {
    NEXT_REVISION.fetch_add(1, Ordering::Relaxed)
}

/// How a fresh aperture is filled.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ApertureInit {
    /// `round(U[0,1])`: each pixel is open or blocked with equal odds.
    Binary,
    /// Continuous transmittance drawn from `U[0,1]`.
    Uniform,
}

/// Per-pixel transmittance mask.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CodedAperture {
    /// Mask values, shape `[shots, rows, cols]`.
    values: Array3<f32>,

    /// Whether an external optimiser may update the mask.
    trainable: bool,

    /// Bumped on every mutation.
    version: u64,

    /// Process-unique tag of the current values.  Not persisted: decoding
    /// draws a new one.
    #[serde(skip, default = "next_revision")]
    revision: u64,
}

impl CodedAperture {
    /// Random aperture of shape `(shots, rows, cols)`, deterministic in `seed`.
    pub fn random(
        shots: usize,
        rows: usize,
        cols: usize,
        init: ApertureInit,
        seed: u64,
        trainable: bool,
    ) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        let dist = Uniform::new(0.0f32, 1.0f32);
        let values = Array3::from_shape_simple_fn((shots, rows, cols), || {
            let u = dist.sample(&mut rng);
            match init {
                ApertureInit::Binary => u.round(),
                ApertureInit::Uniform => u,
            }
        });
        Self {
            values,
            trainable,
            version: 0,
            revision: next_revision(),
        }
    }

    /// Wrap an existing mask, checking it against the declared geometry.
    pub fn from_array(
        values: Array3<f32>,
        expected: (usize, usize, usize),
        trainable: bool,
    ) -> Result<Self> {
        let actual = values.dim();
        if actual != expected {
            return Err(CassiError::ApertureShape { expected, actual });
        }
        Ok(Self {
            values,
            trainable,
            version: 0,
            revision: next_revision(),
        })
    }

    /// Mask values.
    pub fn values(&self) -> ArrayView3<'_, f32> {
        self.values.view()
    }

    /// `(shots, rows, cols)`.
    pub fn dim(&self) -> (usize, usize, usize) {
        self.values.dim()
    }

    pub fn shots(&self) -> usize {
        self.values.dim().0
    }

    pub fn is_trainable(&self) -> bool {
        self.trainable
    }

    pub fn set_trainable(&mut self, trainable: bool) {
        self.trainable = trainable;
    }

    /// Mutation counter.
    pub fn version(&self) -> u64 {
        self.version
    }

    /// Identity of the current values across all apertures in the process.
    pub fn revision(&self) -> u64 {
        self.revision
    }

    fn touch(&mut self) {
        self.version += 1;
        self.revision = next_revision();
    }

    /// Replace the mask.  The new values must keep the current shape.
    pub fn replace(&mut self, values: Array3<f32>) -> Result<()> {
        let expected = self.dim();
        let actual = values.dim();
        if actual != expected {
            return Err(CassiError::ApertureShape { expected, actual });
        }
        self.values = values;
        self.touch();
        Ok(())
    }

    /// `f ← clamp(f − lr · grad, 0, 1)`.
    ///
    /// Fails with [`CassiError::FrozenAperture`] when the mask is fixed.
    pub fn descend(&mut self, grad: ArrayView3<'_, f32>, lr: f32) -> Result<()> {
        if !self.trainable {
            return Err(CassiError::FrozenAperture);
        }
        if grad.dim() != self.dim() {
            let (s, m, n) = self.dim();
            let (gs, gm, gn) = grad.dim();
            return Err(CassiError::InputShape {
                what: "aperture gradient",
                expected: vec![s, m, n],
                actual: vec![gs, gm, gn],
            });
        }
        ndarray::Zip::from(&mut self.values)
            .and(&grad)
            .for_each(|f, &g| *f = (*f - lr * g).clamp(0.0, 1.0));
        self.touch();
        Ok(())
    }

    /// Snap every pixel to 0 or 1.
    pub fn binarize(&mut self) {
        self.values.mapv_inplace(|v| if v >= 0.5 { 1.0 } else { 0.0 });
        self.touch();
    }

    /// Fraction of light let through (mean transmittance).
    pub fn transmittance(&self) -> f32 {
        self.values.mean().unwrap_or(0.0)
    }

    /// Serialise the aperture (values, trainability and version).
    pub fn to_bytes(&self) -> Vec<u8> {
        bincode::serialize(self).expect("CodedAperture serialisation should not fail")
    }

    /// Deserialise an aperture previously written by [`to_bytes`](Self::to_bytes).
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        Ok(bincode::deserialize(bytes)?)
    }
}
