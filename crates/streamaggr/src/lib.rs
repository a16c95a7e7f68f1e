//! Incremental stream aggregation engine
//!
//! This crate maintains windowed statistics over timestamped records. Operators
//! form a DAG declared by configuration: window buffers read a store and
//! publish exactly what entered and left their window, and every derived
//! operator (sums, extremes, variance, covariance, EMAs, histograms, vector
//! differences) updates from that delta alone. Resamplers and mergers turn
//! irregular series into new records that flow back into the pipeline.

pub mod aggregation;
pub mod config;
pub mod core;
pub mod error;
pub mod pipeline;
pub mod resample;
pub mod state;
pub mod telemetry;
pub mod window;

// Re-export commonly used types
pub use core::{FieldValue, Record, SparseVector};

pub use window::{Delta, RecordBuffer, ScalarDelta, Tick, WindowBuffer, WindowEntry};

pub use error::{
    AggregationError, PipelineError, ProcessorError, Result, Result as ProcessorResult,
    StateError, WindowError,
};

pub use config::{OperatorConfig, OperatorKind, PipelineConfig};

pub use pipeline::{EmittedRecord, PipelineBuilder, PipelineContext, PipelineStats, Snapshot};

pub use resample::{Interpolator, InterpolatorKind, Merger, MergerField, ResampledField, Resampler};

pub use state::{Checkpoint, CheckpointMetadata};

pub use telemetry::{init_logging, LogConfig};
