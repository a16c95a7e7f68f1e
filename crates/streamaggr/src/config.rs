//! Configuration types for the aggregation pipeline
//!
//! A pipeline is declared as a list of [`OperatorConfig`]s. Each one carries a
//! unique name and a `type` tag selecting the operator; the remaining keys are
//! the operator's parameters. Configurations round-trip through JSON:
//!
//! ```rust
//! use streamaggr::config::{OperatorKind, PipelineConfig};
//!
//! let config = PipelineConfig::from_json(r#"{
//!     "name": "latency",
//!     "operators": [
//!         { "name": "buf", "type": "timeSeriesWinBuf", "store": "requests",
//!           "value": "latency", "winsize": 60000 },
//!         { "name": "sum", "type": "winBufSum", "inAggr": "buf" }
//!     ]
//! }"#).unwrap();
//!
//! assert!(matches!(config.operators[1].kind, OperatorKind::Sum { .. }));
//! assert!(config.validate().is_ok());
//! ```

use crate::aggregation::{
    EmaInterpolation, EmaParams, HistogramParams, SlottedParams, DEFAULT_SPARSE_CUTOFF,
};
use crate::error::{ProcessorError, Result};
use crate::resample::{MergerField, ResampledField};
use serde::{Deserialize, Serialize};

fn default_bins() -> usize {
    5
}

fn default_cutoff() -> f64 {
    DEFAULT_SPARSE_CUTOFF
}

/// Pipeline declaration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Pipeline name
    pub name: String,

    /// Optional description
    #[serde(default)]
    pub description: Option<String>,

    /// Free-form tags
    #[serde(default)]
    pub tags: Vec<String>,

    /// Operators in declaration order
    #[serde(default)]
    pub operators: Vec<OperatorConfig>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            name: "default-pipeline".to_string(),
            description: None,
            tags: Vec::new(),
            operators: Vec::new(),
        }
    }
}

impl PipelineConfig {
    /// Parse from JSON; unknown `type` tags and missing keys are configuration errors
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| ProcessorError::Configuration {
            source: Box::new(e),
        })
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Validate the pipeline-level fields and every operator on its own
    ///
    /// Cross-operator checks (unknown inputs, cycles, compatibility) happen when
    /// the pipeline is built.
    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(ProcessorError::config("pipeline name cannot be empty"));
        }
        for op in &self.operators {
            op.validate()?;
        }
        Ok(())
    }
}

/// One named operator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperatorConfig {
    /// Unique operator name
    pub name: String,

    /// Operator type and parameters
    #[serde(flatten)]
    pub kind: OperatorKind,
}

impl OperatorConfig {
    pub fn new<S: Into<String>>(name: S, kind: OperatorKind) -> Self {
        Self {
            name: name.into(),
            kind,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(ProcessorError::config("operator name cannot be empty"));
        }
        let invalid = |reason: String| {
            ProcessorError::config(format!("operator '{}': {}", self.name, reason))
        };
        let nested = |err: crate::error::AggregationError| invalid(err.to_string());

        match &self.kind {
            OperatorKind::RecordBuffer { size, .. } if *size == 0 => {
                Err(invalid("record buffer size must be greater than 0".to_string()))
            }
            OperatorKind::Ema {
                interval,
                ema_type,
                init_window,
                ..
            } => EmaParams::new(*interval, *ema_type)
                .with_init_window(*init_window)
                .validate()
                .map_err(nested),
            OperatorKind::SparseEma {
                interval,
                ema_type,
                init_window,
                cutoff,
                ..
            } => EmaParams::new(*interval, *ema_type)
                .with_init_window(*init_window)
                .with_cutoff(*cutoff)
                .validate()
                .map_err(nested),
            OperatorKind::Histogram { .. } => self
                .kind
                .histogram_params()
                .map_or(Ok(()), |p| p.validate().map_err(nested)),
            OperatorKind::SlottedHistogram { .. } => self
                .kind
                .slotted_params()
                .map_or(Ok(()), |p| p.validate().map_err(nested)),
            OperatorKind::Resampler {
                store,
                out_store,
                interval,
                fields,
                ..
            } => {
                if *interval == 0 {
                    Err(invalid("resampling interval must be greater than 0".to_string()))
                } else if fields.is_empty() {
                    Err(invalid("resampler needs at least one field".to_string()))
                } else if store == out_store {
                    Err(invalid(format!("store '{}' cannot also be the output store", store)))
                } else {
                    Ok(())
                }
            }
            OperatorKind::Merger {
                out_store, fields, ..
            } => {
                if fields.is_empty() {
                    Err(invalid("merger needs at least one field".to_string()))
                } else if fields.iter().any(|f| &f.source == out_store) {
                    Err(invalid(format!(
                        "store '{}' cannot also be the output store",
                        out_store
                    )))
                } else {
                    Ok(())
                }
            }
            _ => Ok(()),
        }
    }
}

/// Operator catalogue, tagged by `type`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum OperatorKind {
    /// Latest value of a store field
    #[serde(rename = "timeSeriesTick")]
    Tick { store: String, value: String },

    /// Time window over a scalar store field
    #[serde(rename = "timeSeriesWinBuf")]
    WindowBuffer {
        store: String,
        value: String,
        winsize: u64,
    },

    /// Last `size` record ids of a store
    RecordBuffer { store: String, size: usize },

    /// Time window over a sparse-vector store field
    #[serde(rename = "timeSeriesSparseVectorWinBuf")]
    SparseWindowBuffer {
        store: String,
        value: String,
        winsize: u64,
    },

    #[serde(rename = "winBufSum")]
    Sum { in_aggr: String },

    #[serde(rename = "winBufMin")]
    Min { in_aggr: String },

    #[serde(rename = "winBufMax")]
    Max { in_aggr: String },

    #[serde(rename = "winBufCount")]
    Count { in_aggr: String },

    #[serde(rename = "ma")]
    MovingAverage { in_aggr: String },

    Variance { in_aggr: String },

    Covariance { in_aggr_x: String, in_aggr_y: String },

    Correlation {
        in_aggr_cov: String,
        in_aggr_var_x: String,
        in_aggr_var_y: String,
    },

    Ema {
        in_aggr: String,
        /// Decay interval in milliseconds
        interval: f64,
        ema_type: EmaInterpolation,
        #[serde(default)]
        init_window: u64,
    },

    #[serde(rename = "onlineHistogram")]
    Histogram {
        in_aggr: String,
        lower_bound: f64,
        upper_bound: f64,
        #[serde(default = "default_bins")]
        bins: usize,
        #[serde(default)]
        add_neg_inf: bool,
        #[serde(default)]
        add_pos_inf: bool,
    },

    #[serde(rename = "onlineSlottedHistogram")]
    SlottedHistogram {
        in_aggr: String,
        period: u64,
        window: u64,
        bins: usize,
        granularity: u64,
    },

    #[serde(rename = "onlineVecDiff")]
    VecDiff { in_aggr_x: String, in_aggr_y: String },

    Resampler {
        store: String,
        out_store: String,
        interval: u64,
        #[serde(default)]
        start: Option<i64>,
        fields: Vec<ResampledField>,
    },

    Merger {
        out_store: String,
        #[serde(default)]
        only_past: bool,
        fields: Vec<MergerField>,
    },

    #[serde(rename = "winBufSpVecSum")]
    SparseSum { in_aggr: String },

    #[serde(rename = "emaSpVec")]
    SparseEma {
        in_aggr: String,
        interval: f64,
        ema_type: EmaInterpolation,
        #[serde(default)]
        init_window: u64,
        #[serde(default = "default_cutoff")]
        cutoff: f64,
    },
}

impl OperatorKind {
    /// The `type` tag as written in configuration
    pub fn type_tag(&self) -> &'static str {
        match self {
            OperatorKind::Tick { .. } => "timeSeriesTick",
            OperatorKind::WindowBuffer { .. } => "timeSeriesWinBuf",
            OperatorKind::RecordBuffer { .. } => "recordBuffer",
            OperatorKind::SparseWindowBuffer { .. } => "timeSeriesSparseVectorWinBuf",
            OperatorKind::Sum { .. } => "winBufSum",
            OperatorKind::Min { .. } => "winBufMin",
            OperatorKind::Max { .. } => "winBufMax",
            OperatorKind::Count { .. } => "winBufCount",
            OperatorKind::MovingAverage { .. } => "ma",
            OperatorKind::Variance { .. } => "variance",
            OperatorKind::Covariance { .. } => "covariance",
            OperatorKind::Correlation { .. } => "correlation",
            OperatorKind::Ema { .. } => "ema",
            OperatorKind::Histogram { .. } => "onlineHistogram",
            OperatorKind::SlottedHistogram { .. } => "onlineSlottedHistogram",
            OperatorKind::VecDiff { .. } => "onlineVecDiff",
            OperatorKind::Resampler { .. } => "resampler",
            OperatorKind::Merger { .. } => "merger",
            OperatorKind::SparseSum { .. } => "winBufSpVecSum",
            OperatorKind::SparseEma { .. } => "emaSpVec",
        }
    }

    /// Names of the operators this one consumes, in parameter order
    pub fn inputs(&self) -> Vec<&str> {
        match self {
            OperatorKind::Sum { in_aggr }
            | OperatorKind::Min { in_aggr }
            | OperatorKind::Max { in_aggr }
            | OperatorKind::Count { in_aggr }
            | OperatorKind::MovingAverage { in_aggr }
            | OperatorKind::Variance { in_aggr }
            | OperatorKind::Ema { in_aggr, .. }
            | OperatorKind::Histogram { in_aggr, .. }
            | OperatorKind::SlottedHistogram { in_aggr, .. }
            | OperatorKind::SparseSum { in_aggr }
            | OperatorKind::SparseEma { in_aggr, .. } => vec![in_aggr.as_str()],
            OperatorKind::Covariance {
                in_aggr_x,
                in_aggr_y,
            }
            | OperatorKind::VecDiff {
                in_aggr_x,
                in_aggr_y,
            } => vec![in_aggr_x.as_str(), in_aggr_y.as_str()],
            OperatorKind::Correlation {
                in_aggr_cov,
                in_aggr_var_x,
                in_aggr_var_y,
            } => vec![
                in_aggr_cov.as_str(),
                in_aggr_var_x.as_str(),
                in_aggr_var_y.as_str(),
            ],
            OperatorKind::Tick { .. }
            | OperatorKind::WindowBuffer { .. }
            | OperatorKind::RecordBuffer { .. }
            | OperatorKind::SparseWindowBuffer { .. }
            | OperatorKind::Resampler { .. }
            | OperatorKind::Merger { .. } => Vec::new(),
        }
    }

    /// Stores whose records this operator reads directly
    pub fn source_stores(&self) -> Vec<&str> {
        match self {
            OperatorKind::Tick { store, .. }
            | OperatorKind::WindowBuffer { store, .. }
            | OperatorKind::RecordBuffer { store, .. }
            | OperatorKind::SparseWindowBuffer { store, .. }
            | OperatorKind::Resampler { store, .. } => vec![store.as_str()],
            OperatorKind::Merger { fields, .. } => {
                let mut stores: Vec<&str> = Vec::new();
                for field in fields {
                    if !stores.contains(&field.source.as_str()) {
                        stores.push(field.source.as_str());
                    }
                }
                stores
            }
            _ => Vec::new(),
        }
    }

    /// Store this operator writes records to
    pub fn output_store(&self) -> Option<&str> {
        match self {
            OperatorKind::Resampler { out_store, .. } | OperatorKind::Merger { out_store, .. } => {
                Some(out_store.as_str())
            }
            _ => None,
        }
    }

    pub(crate) fn histogram_params(&self) -> Option<HistogramParams> {
        match self {
            OperatorKind::Histogram {
                lower_bound,
                upper_bound,
                bins,
                add_neg_inf,
                add_pos_inf,
                ..
            } => Some(HistogramParams {
                lower_bound: *lower_bound,
                upper_bound: *upper_bound,
                bins: *bins,
                include_neg_inf: *add_neg_inf,
                include_pos_inf: *add_pos_inf,
            }),
            _ => None,
        }
    }

    pub(crate) fn slotted_params(&self) -> Option<SlottedParams> {
        match self {
            OperatorKind::SlottedHistogram {
                period,
                window,
                bins,
                granularity,
                ..
            } => Some(SlottedParams {
                period: *period,
                window: *window,
                bins: *bins,
                granularity: *granularity,
            }),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resample::InterpolatorKind;

    fn parse_operator(json: &str) -> OperatorConfig {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn test_default_pipeline_config() {
        let config = PipelineConfig::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_window_buffer() {
        let op = parse_operator(
            r#"{"name": "buf", "type": "timeSeriesWinBuf", "store": "s", "value": "v", "winsize": 1000}"#,
        );
        assert_eq!(
            op.kind,
            OperatorKind::WindowBuffer {
                store: "s".to_string(),
                value: "v".to_string(),
                winsize: 1000,
            }
        );
        assert_eq!(op.kind.type_tag(), "timeSeriesWinBuf");
        assert_eq!(op.kind.source_stores(), vec!["s"]);
    }

    #[test]
    fn test_parse_histogram_defaults() {
        let op = parse_operator(
            r#"{"name": "h", "type": "onlineHistogram", "inAggr": "buf", "lowerBound": 0, "upperBound": 5}"#,
        );
        let params = op.kind.histogram_params().unwrap();
        assert_eq!(params.bins, 5);
        assert!(!params.include_neg_inf);
        assert_eq!(op.kind.inputs(), vec!["buf"]);
    }

    #[test]
    fn test_parse_correlation_inputs() {
        let op = parse_operator(
            r#"{"name": "c", "type": "correlation", "inAggrCov": "cov", "inAggrVarX": "vx", "inAggrVarY": "vy"}"#,
        );
        assert_eq!(op.kind.inputs(), vec!["cov", "vx", "vy"]);
    }

    #[test]
    fn test_parse_ema() {
        let op = parse_operator(
            r#"{"name": "e", "type": "ema", "inAggr": "tick", "interval": 3600000, "emaType": "linear", "initWindow": 60000}"#,
        );
        match op.kind {
            OperatorKind::Ema {
                ema_type,
                init_window,
                ..
            } => {
                assert_eq!(ema_type, EmaInterpolation::Linear);
                assert_eq!(init_window, 60_000);
            }
            other => panic!("unexpected kind {:?}", other),
        }
    }

    #[test]
    fn test_parse_merger() {
        let op = parse_operator(
            r#"{"name": "m", "type": "merger", "outStore": "merged", "fields": [
                {"source": "a", "inField": "v", "outField": "x", "interpolation": "linear"},
                {"source": "b", "inField": "v", "outField": "y", "interpolation": "previous"},
                {"source": "a", "inField": "w", "outField": "z"}
            ]}"#,
        );
        assert_eq!(op.kind.source_stores(), vec!["a", "b"]);
        assert_eq!(op.kind.output_store(), Some("merged"));
        match &op.kind {
            OperatorKind::Merger { fields, only_past, .. } => {
                assert!(!only_past);
                assert_eq!(fields[2].interpolation, InterpolatorKind::Linear);
            }
            other => panic!("unexpected kind {:?}", other),
        }
    }

    #[test]
    fn test_unknown_type_is_configuration_error() {
        let err = PipelineConfig::from_json(
            r#"{"name": "p", "operators": [{"name": "x", "type": "percentile", "inAggr": "b"}]}"#,
        )
        .unwrap_err();
        assert!(matches!(err, ProcessorError::Configuration { .. }));
    }

    #[test]
    fn test_missing_parameter_is_configuration_error() {
        let err = PipelineConfig::from_json(
            r#"{"name": "p", "operators": [{"name": "x", "type": "timeSeriesWinBuf", "store": "s"}]}"#,
        )
        .unwrap_err();
        assert!(matches!(err, ProcessorError::Configuration { .. }));
    }

    #[test]
    fn test_operator_validation() {
        let zero = OperatorConfig::new(
            "rb",
            OperatorKind::RecordBuffer {
                store: "s".to_string(),
                size: 0,
            },
        );
        assert!(zero.validate().is_err());

        let hist = OperatorConfig::new(
            "h",
            OperatorKind::Histogram {
                in_aggr: "b".to_string(),
                lower_bound: 5.0,
                upper_bound: 1.0,
                bins: 5,
                add_neg_inf: false,
                add_pos_inf: false,
            },
        );
        assert!(hist.validate().is_err());

        let ema = OperatorConfig::new(
            "e",
            OperatorKind::Ema {
                in_aggr: "t".to_string(),
                interval: 0.0,
                ema_type: EmaInterpolation::Previous,
                init_window: 0,
            },
        );
        assert!(ema.validate().is_err());

        let resampler = OperatorConfig::new(
            "r",
            OperatorKind::Resampler {
                store: "s".to_string(),
                out_store: "s".to_string(),
                interval: 10,
                start: None,
                fields: vec![ResampledField::new("v", InterpolatorKind::Linear)],
            },
        );
        assert!(resampler.validate().is_err());
    }

    #[test]
    fn test_pipeline_config_json_roundtrip() {
        let config = PipelineConfig {
            name: "roundtrip".to_string(),
            description: Some("json".to_string()),
            tags: vec!["test".to_string()],
            operators: vec![
                OperatorConfig::new(
                    "buf",
                    OperatorKind::SparseWindowBuffer {
                        store: "docs".to_string(),
                        value: "features".to_string(),
                        winsize: 10,
                    },
                ),
                OperatorConfig::new(
                    "ema",
                    OperatorKind::SparseEma {
                        in_aggr: "buf".to_string(),
                        interval: 100.0,
                        ema_type: EmaInterpolation::Next,
                        init_window: 0,
                        cutoff: DEFAULT_SPARSE_CUTOFF,
                    },
                ),
            ],
        };
        let json = config.to_json().unwrap();
        assert!(json.contains("\"emaSpVec\""));
        let restored = PipelineConfig::from_json(&json).unwrap();
        assert_eq!(restored, config);
    }
}
