//! Aggregation pipeline
//!
//! This module turns a list of operator declarations into a running graph:
//! - [`PipelineBuilder`]: fluent declaration and build-time validation
//! - [`PipelineContext`]: record push, clock advance, reads, save/load and reset
//! - [`Snapshot`]: structured per-operator view used for reporting
//!
//! # Example
//!
//! ```rust
//! use streamaggr::core::Record;
//! use streamaggr::pipeline::PipelineBuilder;
//!
//! # fn example() -> streamaggr::Result<()> {
//! let mut pipeline = PipelineBuilder::from_json(r#"{
//!     "name": "latency",
//!     "operators": [
//!         { "name": "buf", "type": "timeSeriesWinBuf", "store": "requests",
//!           "value": "latency", "winsize": 10000 },
//!         { "name": "avg", "type": "ma", "inAggr": "buf" },
//!         { "name": "var", "type": "variance", "inAggr": "buf" }
//!     ]
//! }"#)?
//! .build()?;
//!
//! pipeline.on_add("requests", &Record::new(1, 0).with_float("latency", 10.0))?;
//! pipeline.on_add("requests", &Record::new(2, 500).with_float("latency", 30.0))?;
//!
//! assert_eq!(pipeline.value("avg")?, Some(20.0));
//! assert_eq!(pipeline.value("var")?, Some(100.0));
//! # Ok(())
//! # }
//! # example().unwrap();
//! ```

pub mod builder;
pub mod context;
pub mod operator;

pub use builder::PipelineBuilder;
pub use context::{EmittedRecord, PipelineContext, PipelineStats};
pub use operator::Snapshot;
