//! Batch execution strategy.
//!
//! Every operator in this crate is independent across the batch axis, so the
//! only parallelism is handing batch items to rayon's thread pool.  Kernels are
//! written for a single item; [`for_each_item`] fans them out.

use std::fmt;

use ndarray::{Array4, ArrayView3, ArrayView4, ArrayViewMut3};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

/// How batch items are scheduled.
///
/// There is no default: callers without a preference use
/// [`Execution::for_batch`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Execution {
    /// One item after another on the calling thread.
    Sequential,
    /// Items spread across the rayon pool.
    Parallel,
}

impl fmt::Display for Execution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Execution::Sequential => write!(f, "sequential"),
            Execution::Parallel => write!(f, "parallel"),
        }
    }
}

impl Execution {
    /// Pick a strategy for a batch of `batch` items.
    ///
    /// Single items or a single-thread pool run sequentially.
    pub fn for_batch(batch: usize) -> Self {
        if batch > 1 && rayon::current_num_threads() > 1 {
            Execution::Parallel
        } else {
            Execution::Sequential
        }
    }
}

/// Run `kernel(out[b], input[b])` for every batch item `b`.
///
/// # Panics
///
/// Panics if `out` and `input` disagree on the batch size.
pub fn for_each_item<F>(
    out: &mut Array4<f32>,
    input: ArrayView4<'_, f32>,
    execution: Execution,
    kernel: F,
) where
    F: Fn(ArrayViewMut3<'_, f32>, ArrayView3<'_, f32>) + Sync + Send,
{
    assert_eq!(
        out.len_of(ndarray::Axis(0)),
        input.len_of(ndarray::Axis(0)),
        "batch size mismatch"
    );
    match execution {
        Execution::Sequential => {
            for (out_b, in_b) in out.outer_iter_mut().zip(input.outer_iter()) {
                kernel(out_b, in_b);
            }
        }
        Execution::Parallel => {
            out.outer_iter_mut()
                .into_par_iter()
                .zip(input.outer_iter().into_par_iter())
                .for_each(|(out_b, in_b)| kernel(out_b, in_b));
        }
    }
}
