//! Record-producing operators
//!
//! [`Resampler`] turns an irregular series into a regular grid and [`Merger`]
//! joins several series on the union of their timestamps. Both interpolate
//! through buffered [`Interpolator`]s and emit new records instead of values;
//! the pipeline feeds those records back in as records of the output store.

pub mod interpolator;
pub mod merger;
pub mod resampler;

pub use interpolator::{Interpolator, InterpolatorKind};
pub use merger::{Merger, MergerField};
pub use resampler::{ResampledField, Resampler};
