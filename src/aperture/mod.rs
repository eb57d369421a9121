//! Coded aperture state and its regularizers.

pub mod coded;
pub mod regularizers;

pub use coded::{ApertureInit, CodedAperture};
