//! Incremental aggregates over window deltas
//!
//! Every windowed aggregator in this module implements [`Aggregator`] and is
//! driven purely by the [`Delta`](crate::window::Delta) of its input buffer,
//! so maintaining a statistic costs time proportional to what entered and left
//! the window, never to the window size.
//!
//! # Available Aggregators
//!
//! - [`SumAggregator`], [`CountAggregator`], [`MovingAverage`]
//! - [`MinAggregator`], [`MaxAggregator`]: monotonic-deque extremes
//! - [`VarianceAggregator`]: population variance
//! - [`CovarianceAggregator`] and [`pearson`]: paired statistics
//! - [`OnlineHistogram`], [`SlottedHistogram`]: bin counts
//! - [`SparseSumAggregator`]: element-wise sum of sparse vectors
//!
//! [`Ema`] and [`VecDiff`] are not windowed; they follow the latest value of
//! their input.
//!
//! # Examples
//!
//! ```rust
//! use streamaggr::aggregation::{Aggregator, MaxAggregator, SumAggregator};
//! use streamaggr::window::WindowBuffer;
//!
//! let mut buffer = WindowBuffer::new(10);
//! let mut sum = SumAggregator::new();
//! let mut max = MaxAggregator::new();
//!
//! for (ts, value) in [(0, 4.0), (5, 1.0), (12, 2.0)] {
//!     let delta = buffer.update(ts, value).unwrap();
//!     sum.apply(delta).unwrap();
//!     max.apply(delta).unwrap();
//! }
//!
//! assert_eq!(sum.finalize(), 3.0);
//! assert_eq!(max.finalize(), Some(2.0));
//! ```

// Re-name to avoid collision with trait
mod trait_;

mod avg;
mod count;
mod ema;
mod histogram;
mod minmax;
mod running;
mod sparse;
mod sum;
mod variance;
mod vecdiff;
pub mod statistics;

pub use trait_::Aggregator;
pub(crate) use trait_::ensure_finite;

pub use avg::MovingAverage;
pub use count::CountAggregator;
pub use ema::{
    Ema, EmaInterpolation, EmaParams, EmaPhase, EmaValue, ScalarEma, SparseEma,
    DEFAULT_SPARSE_CUTOFF,
};
pub use histogram::{HistogramParams, OnlineHistogram, SlottedHistogram, SlottedParams};
pub use minmax::{Extreme, MaxAggregator, MinAggregator, MonotonicDeque};
pub use sparse::SparseSumAggregator;
pub use statistics::{pearson, CovarianceAggregator};
pub use sum::SumAggregator;
pub use variance::VarianceAggregator;
pub use vecdiff::{vec_diff, VecDiff};
