//! Error types for the aggregation engine
//!
//! This module provides error handling for every engine operation: window
//! updates, aggregate maintenance, pipeline construction and checkpointing.

use thiserror::Error;

/// Main engine error type
#[derive(Error, Debug)]
pub enum ProcessorError {
    /// Window-related errors
    #[error("window error: {0}")]
    Window(#[from] WindowError),

    /// Aggregation-related errors
    #[error("aggregation error: {0}")]
    Aggregation(#[from] AggregationError),

    /// Save/load errors
    #[error("state error: {0}")]
    State(#[from] StateError),

    /// Pipeline construction errors
    #[error("pipeline error: {0}")]
    Pipeline(#[from] PipelineError),

    /// Configuration errors
    #[error("configuration error: {source}")]
    Configuration {
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// Serialization/deserialization errors
    #[error("serialization error: {0}")]
    Serialization(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic error for unexpected conditions
    #[error("unexpected error: {0}")]
    Unexpected(String),
}

/// Window buffer errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum WindowError {
    /// Record timestamp went backwards
    #[error("invalid record timestamp: {timestamp}, reason: {reason}")]
    InvalidTimestamp { timestamp: i64, reason: String },

    /// Buffer capacity is invalid
    #[error("invalid buffer size: {size}, must be greater than 0")]
    InvalidBufferSize { size: usize },

    /// Record does not carry the field the buffer reads
    #[error("record {record_id} has no {expected} field '{field}'")]
    MissingField {
        record_id: u64,
        field: String,
        expected: &'static str,
    },
}

/// Aggregate maintenance errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AggregationError {
    /// Non-finite or otherwise unusable value
    #[error("invalid value: {value}, reason: {reason}")]
    InvalidValue { value: f64, reason: String },

    /// Histogram bin configuration error
    #[error("invalid histogram configuration: {reason}")]
    HistogramConfig { reason: String },

    /// Vectors of different length were combined
    #[error("dimension mismatch in {operation}: {left} vs {right}")]
    DimensionMismatch {
        operation: String,
        left: usize,
        right: usize,
    },

    /// Paired inputs were not updated in lockstep
    #[error("paired inputs out of step in {operation}: {details}")]
    UnpairedInputs { operation: String, details: String },

    /// Interpolation requested outside the buffered points
    #[error("cannot interpolate at {timestamp}: {reason}")]
    Interpolation { timestamp: i64, reason: String },

    /// Type mismatch in aggregation
    #[error("type mismatch: expected {expected}, got {actual}")]
    TypeMismatch { expected: String, actual: String },
}

/// Save/load errors
#[derive(Error, Debug)]
pub enum StateError {
    /// State serialization failed
    #[error("state serialization failed for key '{key}': {reason}")]
    SerializationFailed { key: String, reason: String },

    /// State deserialization failed
    #[error("state deserialization failed for key '{key}': {reason}")]
    DeserializationFailed { key: String, reason: String },

    /// Checkpoint creation failed
    #[error("checkpoint failed at {checkpoint_id}: {reason}")]
    CheckpointFailed {
        checkpoint_id: String,
        reason: String,
    },

    /// Checkpoint restoration failed
    #[error("restore failed from checkpoint {checkpoint_id}: {reason}")]
    RestoreFailed {
        checkpoint_id: String,
        reason: String,
    },
}

/// Pipeline construction and lookup errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PipelineError {
    /// Two operators share a name
    #[error("duplicate operator name: {name}")]
    DuplicateName { name: String },

    /// An operator references an input that does not exist
    #[error("operator '{operator}' references unknown input '{input}'")]
    UnknownInput { operator: String, input: String },

    /// The input exists but does not publish what the operator consumes
    #[error("operator '{operator}' cannot consume '{input}': expected {expected}")]
    IncompatibleInput {
        operator: String,
        input: String,
        expected: String,
    },

    /// Operators form a cycle
    #[error("cyclic dependency between operators: {}", cycle.join(" -> "))]
    CyclicDependency { cycle: Vec<String> },

    /// Statically known vector shapes disagree
    #[error("operator '{operator}' combines vectors of length {left} and {right}")]
    DimensionMismatch {
        operator: String,
        left: usize,
        right: usize,
    },

    /// Read of an operator that is not in the pipeline
    #[error("operator not found: {name}")]
    OperatorNotFound { name: String },

    /// Read interface the operator does not provide
    #[error("operator '{name}' does not provide {interface}")]
    UnsupportedRead {
        name: String,
        interface: &'static str,
    },
}

/// Result type alias for engine operations
pub type Result<T> = std::result::Result<T, ProcessorError>;

/// Result type alias for window operations
pub type WindowResult<T> = std::result::Result<T, WindowError>;

/// Result type alias for aggregation operations
pub type AggregationResult<T> = std::result::Result<T, AggregationError>;

/// Result type alias for state operations
pub type StateResult<T> = std::result::Result<T, StateError>;

/// Result type alias for pipeline construction
pub type PipelineResult<T> = std::result::Result<T, PipelineError>;

impl From<bincode::Error> for ProcessorError {
    fn from(err: bincode::Error) -> Self {
        ProcessorError::Serialization(err.to_string())
    }
}

impl From<serde_json::Error> for ProcessorError {
    fn from(err: serde_json::Error) -> Self {
        ProcessorError::Serialization(err.to_string())
    }
}

impl From<anyhow::Error> for ProcessorError {
    fn from(err: anyhow::Error) -> Self {
        ProcessorError::Unexpected(err.to_string())
    }
}

impl ProcessorError {
    /// Shorthand for a configuration error with a message
    pub fn config<S: Into<String>>(message: S) -> Self {
        ProcessorError::Configuration {
            source: message.into().into(),
        }
    }

    /// Whether the error rejected a single record rather than the pipeline setup
    pub fn is_data_error(&self) -> bool {
        matches!(
            self,
            ProcessorError::Window(_) | ProcessorError::Aggregation(_)
        )
    }
}
