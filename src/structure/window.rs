//! Band windows: the index bookkeeping shared by every structured kernel.
//!
//! A block coupling two bands (or rows of the elimination) that sit `offset`
//! apart only overlaps on `len − offset` columns of the last spatial axis:
//!
//! ```text
//! lead  = [0, len − offset)        columns at the start of the axis
//! trail = [offset, len)            the same count, shifted right by offset
//! ```
//!
//! Q's support, the shifted multiply and the banded elimination all pair a
//! `lead` slice of one operand with a `trail` slice of the other.  Offsets at or
//! beyond `len` give empty windows.

use std::ops::Range;

/// Overlap of two copies of an axis of length `len` shifted by `offset`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BandWindow {
    pub offset: usize,
    pub len: usize,
}

impl BandWindow {
    /// `[0, len − offset)`
    pub fn lead(&self) -> Range<usize> {
        0..self.len.saturating_sub(self.offset)
    }

    /// `[offset, len)`
    pub fn trail(&self) -> Range<usize> {
        self.offset.min(self.len)..self.len
    }

    /// Number of overlapping columns.
    pub fn width(&self) -> usize {
        self.len.saturating_sub(self.offset)
    }

    pub fn is_empty(&self) -> bool {
        self.width() == 0
    }
}

/// Window for blocks `k` and `l` on an axis of length `len`: offset `|k − l|`.
pub fn band_window(k: usize, l: usize, len: usize) -> BandWindow {
    BandWindow {
        offset: k.abs_diff(l),
        len,
    }
}

/// Columns `[shift, shift + width)` covered by a plane of `width` columns
/// dispersed by `shift` onto the wide detector axis.
pub fn dispersed(shift: usize, width: usize) -> Range<usize> {
    shift..shift + width
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_diagonal_window_is_full() {
        let w = band_window(3, 3, 8);
        assert_eq!(w.lead(), 0..8);
        assert_eq!(w.trail(), 0..8);
        assert_eq!(w.width(), 8);
    }

    #[test]
    fn test_window_is_symmetric_in_k_l() {
        assert_eq!(band_window(1, 4, 10), band_window(4, 1, 10));
        let w = band_window(1, 4, 10);
        assert_eq!(w.lead(), 0..7);
        assert_eq!(w.trail(), 3..10);
    }

    #[test]
    fn test_lead_and_trail_have_equal_width() {
        for offset in 0..12 {
            let w = BandWindow { offset, len: 9 };
            assert_eq!(w.lead().len(), w.trail().len());
            assert_eq!(w.lead().len(), w.width());
        }
    }

    #[test]
    fn test_offset_beyond_axis_is_empty() {
        let w = band_window(0, 12, 5);
        assert!(w.is_empty());
        assert_eq!(w.lead(), 0..0);
        assert_eq!(w.trail(), 5..5);
    }

    #[test]
    fn test_dispersed() {
        assert_eq!(dispersed(2, 4), 2..6);
    }
}
