//! Error types for the CASSI operator.

use thiserror::Error;

/// Broad class of a [`CassiError`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    /// The operator was built or mutated with an invalid configuration.
    Configuration,
    /// A call received an argument it cannot act on.
    InvalidArgument,
    /// A persisted aperture could not be decoded.
    Persistence,
}

/// Errors raised by the sensing operator and its building blocks.
///
/// Numerical trouble (near-singular pivots during inversion) is not an error:
/// the non-finite values propagate to the caller.
#[derive(Debug, Error)]
pub enum CassiError {
    /// Sensing mode other than `"base"`.
    #[error("the mode {mode} is not valid")]
    UnsupportedMode { mode: String },

    /// Explicit aperture does not match the declared geometry.
    #[error("the start CA shape should be {expected:?} but is {actual:?}")]
    ApertureShape {
        expected: (usize, usize, usize),
        actual: (usize, usize, usize),
    },

    /// Zero-sized band or spatial axis.
    #[error("input shape {shape:?} has an empty axis")]
    EmptyGeometry { shape: (usize, usize, usize) },

    /// Gradient step requested on an aperture that is not trainable.
    #[error("the coded aperture is not trainable")]
    FrozenAperture,

    /// `type_calculation` outside of forward / backward / forward_backward.
    #[error("type_calculation must be forward, backward or forward_backward, got {name:?}")]
    UnknownCalculation { name: String },

    /// A tensor argument has the wrong shape.
    #[error("{what} shape mismatch: expected {expected:?}, got {actual:?}")]
    InputShape {
        what: &'static str,
        expected: Vec<usize>,
        actual: Vec<usize>,
    },

    /// A cached inverse was built for a different aperture or an older state
    /// of this one.
    #[error("inverse was built for aperture revision {built}, operator is at {current}")]
    StaleInverse { built: u64, current: u64 },

    /// Aperture bytes could not be decoded.
    #[error("aperture decode failed: {0}")]
    Persistence(#[from] bincode::Error),
}

impl CassiError {
    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            CassiError::UnsupportedMode { .. }
            | CassiError::ApertureShape { .. }
            | CassiError::EmptyGeometry { .. }
            | CassiError::FrozenAperture => ErrorKind::Configuration,
            CassiError::UnknownCalculation { .. }
            | CassiError::InputShape { .. }
            | CassiError::StaleInverse { .. } => ErrorKind::InvalidArgument,
            CassiError::Persistence(_) => ErrorKind::Persistence,
        }
    }
}

/// Result alias for operator calls.
pub type Result<T> = std::result::Result<T, CassiError>;

/// Fail with [`CassiError::InputShape`] unless `actual == expected`.
pub(crate) fn ensure_shape(what: &'static str, expected: &[usize], actual: &[usize]) -> Result<()> {
    if expected == actual {
        Ok(())
    } else {
        Err(CassiError::InputShape {
            what,
            expected: expected.to_vec(),
            actual: actual.to_vec(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_mapping() {
        let mode = CassiError::UnsupportedMode {
            mode: "quantum".into(),
        };
        assert_eq!(mode.kind(), ErrorKind::Configuration);

        let calc = CassiError::UnknownCalculation {
            name: "sideways".into(),
        };
        assert_eq!(calc.kind(), ErrorKind::InvalidArgument);
        assert_eq!(CassiError::FrozenAperture.kind(), ErrorKind::Configuration);
    }

    #[test]
    fn test_messages_name_offender() {
        let err = CassiError::UnsupportedMode {
            mode: "quantum".into(),
        };
        assert!(err.to_string().contains("quantum"));

        let err = CassiError::UnknownCalculation {
            name: "sideways".into(),
        };
        assert!(err.to_string().contains("sideways"));
    }

    #[test]
    fn test_ensure_shape() {
        assert!(ensure_shape("cube", &[1, 2, 3], &[1, 2, 3]).is_ok());
        let err = ensure_shape("cube", &[1, 2, 3], &[1, 2, 4]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
        assert!(err.to_string().starts_with("cube shape mismatch"));
    }
}
