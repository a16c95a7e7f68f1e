//! Operator nodes of a built pipeline
//!
//! Each configured operator becomes a [`Node`] holding its resolved input
//! indices and an [`OperatorState`]. Dispatch on the operator kind happens
//! through the state enum; names are only looked up while building.
//!
//! Operators talk to their dependents through [`Port`]s. A window buffer
//! publishes its last [`Delta`](crate::window::Delta), scalar aggregates publish a value,
//! histograms publish a dense vector, and so on. Building resolves, for every
//! input of every operator, which port it reads.

use crate::aggregation::{
    ensure_finite, pearson, Aggregator, CountAggregator, CovarianceAggregator, Ema, EmaParams,
    EmaPhase, MaxAggregator, MinAggregator, MovingAverage, OnlineHistogram, ScalarEma,
    SlottedHistogram, SparseEma, SparseSumAggregator, SumAggregator, VarianceAggregator, VecDiff,
};
use crate::config::{OperatorConfig, OperatorKind};
use crate::core::{Record, SparseVector};
use crate::error::{ProcessorError, Result};
use crate::resample::{Merger, Resampler};
use crate::window::{Delta, RecordBuffer, Tick, WindowBuffer, WindowEntry};
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::trace;

/// What an operator publishes to its dependents
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Port {
    /// Entered/evicted entries of a scalar window
    ScalarDelta,
    /// Current scalar value
    Scalar,
    /// Dense vector of statically known length
    Vector,
    /// Entered/evicted entries of a sparse-vector window
    SparseDelta,
    /// Current sparse vector
    Sparse,
    /// Running covariance
    Covariance,
    /// Running variance
    Variance,
}

impl fmt::Display for Port {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Port::ScalarDelta => "a scalar window",
            Port::Scalar => "a scalar value",
            Port::Vector => "a dense vector",
            Port::SparseDelta => "a sparse-vector window",
            Port::Sparse => "a sparse vector",
            Port::Covariance => "a covariance",
            Port::Variance => "a variance",
        };
        f.write_str(name)
    }
}

/// Ports an operator publishes
pub(crate) fn provides(kind: &OperatorKind) -> &'static [Port] {
    match kind {
        OperatorKind::Tick { .. } => &[Port::Scalar],
        OperatorKind::WindowBuffer { .. } => &[Port::ScalarDelta, Port::Scalar],
        OperatorKind::SparseWindowBuffer { .. } => &[Port::SparseDelta, Port::Sparse],
        OperatorKind::Sum { .. }
        | OperatorKind::Min { .. }
        | OperatorKind::Max { .. }
        | OperatorKind::Count { .. }
        | OperatorKind::MovingAverage { .. }
        | OperatorKind::Correlation { .. }
        | OperatorKind::Ema { .. } => &[Port::Scalar],
        OperatorKind::Variance { .. } => &[Port::Scalar, Port::Variance],
        OperatorKind::Covariance { .. } => &[Port::Scalar, Port::Covariance],
        OperatorKind::Histogram { .. }
        | OperatorKind::SlottedHistogram { .. }
        | OperatorKind::VecDiff { .. } => &[Port::Vector],
        OperatorKind::SparseSum { .. } | OperatorKind::SparseEma { .. } => &[Port::Sparse],
        OperatorKind::RecordBuffer { .. }
        | OperatorKind::Resampler { .. }
        | OperatorKind::Merger { .. } => &[],
    }
}

/// Ports accepted for each input, in preference order
pub(crate) fn accepts(kind: &OperatorKind) -> &'static [&'static [Port]] {
    match kind {
        OperatorKind::Sum { .. }
        | OperatorKind::Min { .. }
        | OperatorKind::Max { .. }
        | OperatorKind::Count { .. }
        | OperatorKind::MovingAverage { .. }
        | OperatorKind::Variance { .. } => &[&[Port::ScalarDelta]],
        OperatorKind::Covariance { .. } => &[&[Port::ScalarDelta], &[Port::ScalarDelta]],
        OperatorKind::Correlation { .. } => {
            &[&[Port::Covariance], &[Port::Variance], &[Port::Variance]]
        }
        OperatorKind::Ema { .. }
        | OperatorKind::Histogram { .. }
        | OperatorKind::SlottedHistogram { .. } => &[&[Port::ScalarDelta, Port::Scalar]],
        OperatorKind::VecDiff { .. } => &[&[Port::Vector], &[Port::Vector]],
        OperatorKind::SparseSum { .. } => &[&[Port::SparseDelta]],
        OperatorKind::SparseEma { .. } => &[&[Port::SparseDelta, Port::Sparse]],
        OperatorKind::Tick { .. }
        | OperatorKind::WindowBuffer { .. }
        | OperatorKind::RecordBuffer { .. }
        | OperatorKind::SparseWindowBuffer { .. }
        | OperatorKind::Resampler { .. }
        | OperatorKind::Merger { .. } => &[],
    }
}

/// Mutable state of one operator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) enum OperatorState {
    Tick(Tick),
    WindowBuffer(WindowBuffer<f64>),
    RecordBuffer(RecordBuffer),
    SparseWindowBuffer(WindowBuffer<SparseVector>),
    Sum(SumAggregator),
    Min(MinAggregator),
    Max(MaxAggregator),
    Count(CountAggregator),
    MovingAverage(MovingAverage),
    Variance(VarianceAggregator),
    Covariance(CovarianceAggregator),
    Correlation,
    Ema(ScalarEma),
    Histogram(OnlineHistogram),
    SlottedHistogram(SlottedHistogram),
    VecDiff(VecDiff),
    Resampler(Resampler),
    Merger(Merger),
    SparseSum(SparseSumAggregator),
    SparseEma(SparseEma),
}

impl OperatorState {
    /// Fresh state for a configured operator
    pub(crate) fn from_config(kind: &OperatorKind) -> Result<Self> {
        let state = match kind {
            OperatorKind::Tick { .. } => OperatorState::Tick(Tick::new()),
            OperatorKind::WindowBuffer { winsize, .. } => {
                OperatorState::WindowBuffer(WindowBuffer::new(*winsize))
            }
            OperatorKind::RecordBuffer { size, .. } => {
                OperatorState::RecordBuffer(RecordBuffer::new(*size)?)
            }
            OperatorKind::SparseWindowBuffer { winsize, .. } => {
                OperatorState::SparseWindowBuffer(WindowBuffer::new(*winsize))
            }
            OperatorKind::Sum { .. } => OperatorState::Sum(SumAggregator::new()),
            OperatorKind::Min { .. } => OperatorState::Min(MinAggregator::new()),
            OperatorKind::Max { .. } => OperatorState::Max(MaxAggregator::new()),
            OperatorKind::Count { .. } => OperatorState::Count(CountAggregator::new()),
            OperatorKind::MovingAverage { .. } => {
                OperatorState::MovingAverage(MovingAverage::new())
            }
            OperatorKind::Variance { .. } => OperatorState::Variance(VarianceAggregator::new()),
            OperatorKind::Covariance { .. } => {
                OperatorState::Covariance(CovarianceAggregator::new())
            }
            OperatorKind::Correlation { .. } => OperatorState::Correlation,
            OperatorKind::Ema {
                interval,
                ema_type,
                init_window,
                ..
            } => OperatorState::Ema(Ema::new(
                EmaParams::new(*interval, *ema_type).with_init_window(*init_window),
            )?),
            OperatorKind::Histogram { .. } => match kind.histogram_params() {
                Some(params) => OperatorState::Histogram(OnlineHistogram::new(params)?),
                None => return Err(ProcessorError::config("missing histogram parameters")),
            },
            OperatorKind::SlottedHistogram { .. } => match kind.slotted_params() {
                Some(params) => OperatorState::SlottedHistogram(SlottedHistogram::new(params)?),
                None => return Err(ProcessorError::config("missing slotted histogram parameters")),
            },
            OperatorKind::VecDiff { .. } => OperatorState::VecDiff(VecDiff::new()),
            OperatorKind::Resampler {
                interval,
                start,
                fields,
                ..
            } => OperatorState::Resampler(Resampler::new(*interval, *start, fields)?),
            OperatorKind::Merger {
                only_past, fields, ..
            } => OperatorState::Merger(Merger::new(fields.clone(), *only_past)?),
            OperatorKind::SparseSum { .. } => OperatorState::SparseSum(SparseSumAggregator::new()),
            OperatorKind::SparseEma {
                interval,
                ema_type,
                init_window,
                cutoff,
                ..
            } => OperatorState::SparseEma(Ema::new(
                EmaParams::new(*interval, *ema_type)
                    .with_init_window(*init_window)
                    .with_cutoff(*cutoff),
            )?),
        };
        Ok(state)
    }

    /// Back to the post-construction state
    pub(crate) fn reset(&mut self) {
        match self {
            OperatorState::Tick(tick) => tick.reset(),
            OperatorState::WindowBuffer(buffer) => buffer.reset(),
            OperatorState::RecordBuffer(buffer) => buffer.reset(),
            OperatorState::SparseWindowBuffer(buffer) => buffer.reset(),
            OperatorState::Sum(agg) => agg.reset(),
            OperatorState::Min(agg) => agg.reset(),
            OperatorState::Max(agg) => agg.reset(),
            OperatorState::Count(agg) => agg.reset(),
            OperatorState::MovingAverage(agg) => agg.reset(),
            OperatorState::Variance(agg) => agg.reset(),
            OperatorState::Covariance(agg) => agg.reset(),
            OperatorState::Correlation => {}
            OperatorState::Ema(ema) => ema.reset(),
            OperatorState::Histogram(hist) => hist.reset(),
            OperatorState::SlottedHistogram(hist) => hist.reset(),
            OperatorState::VecDiff(diff) => diff.reset(),
            OperatorState::Resampler(resampler) => resampler.reset(),
            OperatorState::Merger(merger) => merger.reset(),
            OperatorState::SparseSum(agg) => agg.reset(),
            OperatorState::SparseEma(ema) => ema.reset(),
        }
    }
}

/// What a node needs to undo its part of a step
#[derive(Debug)]
pub(crate) enum Savepoint {
    /// Window buffers undo through their last delta
    Window {
        previous: Option<i64>,
        timestamp: Option<i64>,
    },
    Full {
        state: Box<OperatorState>,
        timestamp: Option<i64>,
    },
}

/// One operator of a built pipeline
#[derive(Debug, Clone)]
pub(crate) struct Node {
    pub(crate) config: OperatorConfig,
    /// Schedule positions of the inputs, always lower than this node's
    pub(crate) inputs: Vec<usize>,
    /// Port read from each input
    pub(crate) input_ports: Vec<Port>,
    /// Stores this node reads records from
    pub(crate) stores: Vec<String>,
    /// Length of the published vector, for vector operators
    pub(crate) vector_dim: Option<usize>,
    pub(crate) state: OperatorState,
    pub(crate) timestamp: Option<i64>,
    /// Set when this node changed during the current step
    pub(crate) updated: bool,
}

impl Node {
    pub(crate) fn name(&self) -> &str {
        &self.config.name
    }

    pub(crate) fn provides(&self, port: Port) -> bool {
        provides(&self.config.kind).contains(&port)
    }

    pub(crate) fn reads(&self, store: &str) -> bool {
        self.stores.iter().any(|s| s == store)
    }

    pub(crate) fn reset(&mut self) {
        self.state.reset();
        self.timestamp = None;
        self.updated = false;
    }

    /// Capture what [`rollback`](Self::rollback) needs, before this node changes
    pub(crate) fn savepoint(&self) -> Savepoint {
        let timestamp = self.timestamp;
        match &self.state {
            OperatorState::WindowBuffer(buffer) => Savepoint::Window {
                previous: buffer.timestamp(),
                timestamp,
            },
            OperatorState::SparseWindowBuffer(buffer) => Savepoint::Window {
                previous: buffer.timestamp(),
                timestamp,
            },
            state => Savepoint::Full {
                state: Box::new(state.clone()),
                timestamp,
            },
        }
    }

    /// Return to `savepoint`
    ///
    /// `applied` is false when this node's own update failed, in which case a
    /// window buffer was left untouched and must not be reverted.
    pub(crate) fn rollback(&mut self, savepoint: Savepoint, applied: bool) {
        match savepoint {
            Savepoint::Window {
                previous,
                timestamp,
            } => {
                if applied {
                    match &mut self.state {
                        OperatorState::WindowBuffer(buffer) => buffer.revert(previous),
                        OperatorState::SparseWindowBuffer(buffer) => buffer.revert(previous),
                        _ => {}
                    }
                }
                self.timestamp = timestamp;
            }
            Savepoint::Full { state, timestamp } => {
                self.state = *state;
                self.timestamp = timestamp;
            }
        }
        self.updated = false;
    }

    /// Reject a record this node would not accept, without mutating anything
    pub(crate) fn check_record(&self, store: &str, record: &Record) -> Result<()> {
        match (&self.config.kind, &self.state) {
            (OperatorKind::Tick { value, .. }, _) | (OperatorKind::WindowBuffer { value, .. }, _) => {
                let v = record.float(value)?;
                ensure_finite(v, self.name())?;
            }
            (OperatorKind::SparseWindowBuffer { value, .. }, _) => {
                record.sparse(value)?;
            }
            (_, OperatorState::Resampler(resampler)) => resampler.check(record)?,
            (_, OperatorState::Merger(merger)) => merger.check(store, record)?,
            _ => {}
        }
        Ok(())
    }

    /// Apply a record of one of the stores this node reads
    ///
    /// Returns the records the node emitted, for resamplers and mergers.
    pub(crate) fn on_record(&mut self, store: &str, record: &Record) -> Result<Vec<Record>> {
        let ts = record.timestamp;
        let mut emitted = Vec::new();
        match (&self.config.kind, &mut self.state) {
            (OperatorKind::Tick { value, .. }, OperatorState::Tick(tick)) => {
                tick.update(ts, record.float(value)?)?;
            }
            (OperatorKind::WindowBuffer { value, .. }, OperatorState::WindowBuffer(buffer)) => {
                let delta = buffer.update(ts, record.float(value)?)?;
                trace!(
                    operator = %self.config.name,
                    entered = delta.entered.len(),
                    evicted = delta.evicted.len(),
                    "window delta"
                );
            }
            (_, OperatorState::RecordBuffer(buffer)) => {
                buffer.update(record.id);
            }
            (
                OperatorKind::SparseWindowBuffer { value, .. },
                OperatorState::SparseWindowBuffer(buffer),
            ) => {
                let delta = buffer.update(ts, record.sparse(value)?.clone())?;
                trace!(
                    operator = %self.config.name,
                    entered = delta.entered.len(),
                    evicted = delta.evicted.len(),
                    "sparse window delta"
                );
            }
            (_, OperatorState::Resampler(resampler)) => {
                emitted = resampler.on_record(record)?;
            }
            (_, OperatorState::Merger(merger)) => {
                emitted = merger.on_record(store, record)?;
            }
            _ => {
                return Err(ProcessorError::Unexpected(format!(
                    "operator '{}' does not read records",
                    self.config.name
                )))
            }
        }
        self.timestamp = Some(ts);
        self.updated = true;
        Ok(emitted)
    }

    /// Advance the clock of a store this node reads
    ///
    /// Returns whether the node changed.
    pub(crate) fn on_time(&mut self, ts: i64) -> Result<bool> {
        let changed = match &mut self.state {
            OperatorState::WindowBuffer(buffer) => {
                self.timestamp = Some(ts);
                !buffer.advance_to(ts)?.is_empty()
            }
            OperatorState::SparseWindowBuffer(buffer) => {
                self.timestamp = Some(ts);
                !buffer.advance_to(ts)?.is_empty()
            }
            OperatorState::Tick(tick) => {
                tick.advance_to(ts)?;
                if tick.is_initialized() {
                    self.timestamp = Some(ts);
                }
                false
            }
            _ => false,
        };
        self.updated = changed;
        Ok(changed)
    }

    /// Recompute from inputs that changed in this step
    ///
    /// `upstream` holds every node scheduled before this one.
    pub(crate) fn step(&mut self, upstream: &[Node], now: i64) -> Result<()> {
        let input = |i: usize| &upstream[self.inputs[i]];

        match &mut self.state {
            OperatorState::Sum(agg) => agg.apply(scalar_delta(input(0))?)?,
            OperatorState::Min(agg) => agg.apply(scalar_delta(input(0))?)?,
            OperatorState::Max(agg) => agg.apply(scalar_delta(input(0))?)?,
            OperatorState::Count(agg) => agg.apply(scalar_delta(input(0))?)?,
            OperatorState::MovingAverage(agg) => agg.apply(scalar_delta(input(0))?)?,
            OperatorState::Variance(agg) => agg.apply(scalar_delta(input(0))?)?,
            OperatorState::Covariance(agg) => {
                agg.apply(scalar_delta(input(0))?, scalar_delta(input(1))?)?
            }
            OperatorState::Correlation => {}
            OperatorState::Ema(ema) => match self.input_ports[0] {
                Port::ScalarDelta => {
                    for entry in &scalar_delta(input(0))?.entered {
                        ema.update(entry.timestamp, entry.value)?;
                    }
                }
                _ => {
                    if let Some(value) = scalar_value(upstream, self.inputs[0]) {
                        ema.update(input(0).timestamp.unwrap_or(now), value)?;
                    }
                }
            },
            OperatorState::Histogram(hist) => match self.input_ports[0] {
                Port::ScalarDelta => hist.apply(scalar_delta(input(0))?)?,
                _ => {
                    if let Some(delta) = sample(upstream, self.inputs[0], now) {
                        hist.apply(&delta)?;
                    }
                }
            },
            OperatorState::SlottedHistogram(hist) => match self.input_ports[0] {
                Port::ScalarDelta => hist.apply(scalar_delta(input(0))?)?,
                _ => {
                    if let Some(delta) = sample(upstream, self.inputs[0], now) {
                        hist.apply(&delta)?;
                    }
                }
            },
            OperatorState::VecDiff(diff) => {
                let x = vector_value(upstream, self.inputs[0]).unwrap_or_default();
                let y = vector_value(upstream, self.inputs[1]).unwrap_or_default();
                diff.update(now, &x, &y)?;
            }
            OperatorState::SparseSum(agg) => agg.apply(sparse_delta(input(0))?)?,
            OperatorState::SparseEma(ema) => match self.input_ports[0] {
                Port::SparseDelta => {
                    for entry in &sparse_delta(input(0))?.entered {
                        ema.update(entry.timestamp, entry.value.clone())?;
                    }
                }
                _ => {
                    if let Some(value) = sparse_value(upstream, self.inputs[0]) {
                        ema.update(input(0).timestamp.unwrap_or(now), value)?;
                    }
                }
            },
            OperatorState::Tick(_)
            | OperatorState::WindowBuffer(_)
            | OperatorState::RecordBuffer(_)
            | OperatorState::SparseWindowBuffer(_)
            | OperatorState::Resampler(_)
            | OperatorState::Merger(_) => {
                return Err(ProcessorError::Unexpected(format!(
                    "operator '{}' has no inputs to step from",
                    self.config.name
                )))
            }
        }

        self.timestamp = Some(now);
        self.updated = true;
        Ok(())
    }

    /// Number of entries the operator currently accounts for
    pub(crate) fn length(&self) -> Option<usize> {
        let len = match &self.state {
            OperatorState::WindowBuffer(buffer) => buffer.len() as u64,
            OperatorState::SparseWindowBuffer(buffer) => buffer.len() as u64,
            OperatorState::RecordBuffer(buffer) => buffer.len() as u64,
            OperatorState::Sum(agg) => agg.count(),
            OperatorState::Min(agg) => agg.count(),
            OperatorState::Max(agg) => agg.count(),
            OperatorState::Count(agg) => agg.count(),
            OperatorState::MovingAverage(agg) => agg.count(),
            OperatorState::Variance(agg) => agg.count(),
            OperatorState::Covariance(agg) => agg.count(),
            OperatorState::Histogram(hist) => hist.count(),
            OperatorState::SlottedHistogram(hist) => hist.count(),
            OperatorState::SparseSum(agg) => agg.count(),
            _ => return None,
        };
        Some(len as usize)
    }

    /// Structured view of the operator's current state
    pub(crate) fn snapshot(&self, nodes: &[Node], index: usize) -> Snapshot {
        let timestamp = self.timestamp;
        match &self.state {
            OperatorState::Tick(tick) => Snapshot::Tick {
                timestamp,
                value: tick.is_initialized().then(|| tick.value()),
            },
            OperatorState::WindowBuffer(buffer) => Snapshot::WindowBuffer {
                timestamp,
                entries: buffer.entries().cloned().collect(),
            },
            OperatorState::RecordBuffer(buffer) => Snapshot::RecordBuffer {
                oldest: buffer.oldest(),
                newest: buffer.newest(),
                ids: buffer.ids().collect(),
            },
            OperatorState::SparseWindowBuffer(buffer) => Snapshot::SparseWindowBuffer {
                timestamp,
                entries: buffer.entries().cloned().collect(),
            },
            OperatorState::Ema(ema) => Snapshot::Ema {
                timestamp,
                value: ema.value(),
                phase: ema.phase(),
            },
            OperatorState::Histogram(hist) => Snapshot::Histogram {
                timestamp,
                bounds: hist.bounds(),
                counts: hist.finalize(),
                dropped: hist.dropped(),
            },
            OperatorState::SlottedHistogram(hist) => Snapshot::SlottedHistogram {
                timestamp,
                counts: hist.finalize(),
                dropped: hist.dropped(),
            },
            OperatorState::VecDiff(_) => Snapshot::Vector {
                timestamp,
                values: vector_value(nodes, index).unwrap_or_default(),
            },
            OperatorState::SparseSum(_) | OperatorState::SparseEma(_) => Snapshot::Sparse {
                timestamp,
                value: sparse_value(nodes, index),
            },
            OperatorState::Resampler(resampler) => Snapshot::Resampler {
                next_grid: resampler.next_grid(),
            },
            OperatorState::Merger(merger) => Snapshot::Merger {
                ready: merger.is_ready(),
                next: merger.next_timestamp(),
            },
            OperatorState::Sum(_)
            | OperatorState::Min(_)
            | OperatorState::Max(_)
            | OperatorState::Count(_)
            | OperatorState::MovingAverage(_)
            | OperatorState::Variance(_)
            | OperatorState::Covariance(_)
            | OperatorState::Correlation => Snapshot::Scalar {
                timestamp,
                value: scalar_value(nodes, index),
                count: self.length().unwrap_or_else(|| {
                    self.inputs
                        .first()
                        .and_then(|&i| nodes[i].length())
                        .unwrap_or(0)
                }) as u64,
            },
        }
    }
}

fn scalar_delta(node: &Node) -> Result<&Delta<f64>> {
    match &node.state {
        OperatorState::WindowBuffer(buffer) => Ok(buffer.last_delta()),
        _ => Err(ProcessorError::Unexpected(format!(
            "operator '{}' does not publish a scalar window",
            node.name()
        ))),
    }
}

fn sparse_delta(node: &Node) -> Result<&Delta<SparseVector>> {
    match &node.state {
        OperatorState::SparseWindowBuffer(buffer) => Ok(buffer.last_delta()),
        _ => Err(ProcessorError::Unexpected(format!(
            "operator '{}' does not publish a sparse-vector window",
            node.name()
        ))),
    }
}

/// Single-entry delta from a scalar input, for operators fed by values
fn sample(nodes: &[Node], index: usize, now: i64) -> Option<Delta<f64>> {
    let value = scalar_value(nodes, index)?;
    let timestamp = nodes[index].timestamp.unwrap_or(now);
    Some(Delta {
        entered: vec![WindowEntry::new(timestamp, value)],
        evicted: Vec::new(),
    })
}

/// Current scalar published by `nodes[index]`
pub(crate) fn scalar_value(nodes: &[Node], index: usize) -> Option<f64> {
    let node = &nodes[index];
    match &node.state {
        OperatorState::Tick(tick) => tick.is_initialized().then(|| tick.value()),
        OperatorState::WindowBuffer(buffer) => buffer.newest().map(|entry| entry.value),
        OperatorState::Sum(agg) => Some(agg.finalize()),
        OperatorState::Min(agg) => agg.finalize(),
        OperatorState::Max(agg) => agg.finalize(),
        OperatorState::Count(agg) => Some(agg.finalize() as f64),
        OperatorState::MovingAverage(agg) => Some(agg.finalize()),
        OperatorState::Variance(agg) => Some(agg.finalize()),
        OperatorState::Covariance(agg) => Some(agg.finalize()),
        OperatorState::Correlation => {
            let covariance = match &nodes[*node.inputs.first()?].state {
                OperatorState::Covariance(agg) => agg.finalize(),
                _ => return None,
            };
            let variance = |i: usize| match &nodes[*node.inputs.get(i)?].state {
                OperatorState::Variance(agg) => Some(agg.finalize()),
                _ => None,
            };
            Some(pearson(covariance, variance(1)?, variance(2)?))
        }
        OperatorState::Ema(ema) => ema.value(),
        _ => None,
    }
}

/// Current dense vector published by `nodes[index]`
pub(crate) fn vector_value(nodes: &[Node], index: usize) -> Option<Vec<f64>> {
    let node = &nodes[index];
    match &node.state {
        OperatorState::Histogram(hist) => Some(hist.to_vector()),
        OperatorState::SlottedHistogram(hist) => Some(hist.to_vector()),
        OperatorState::VecDiff(diff) => match diff.timestamp() {
            Some(_) => Some(diff.value().to_vec()),
            None => Some(vec![0.0; node.vector_dim.unwrap_or(0)]),
        },
        _ => None,
    }
}

/// Current sparse vector published by `nodes[index]`
pub(crate) fn sparse_value(nodes: &[Node], index: usize) -> Option<SparseVector> {
    match &nodes[index].state {
        OperatorState::SparseWindowBuffer(buffer) => {
            buffer.newest().map(|entry| entry.value.clone())
        }
        OperatorState::SparseSum(agg) => Some(agg.finalize()),
        OperatorState::SparseEma(ema) => ema.value(),
        _ => None,
    }
}

/// Structured, serializable view of one operator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum Snapshot {
    Tick {
        timestamp: Option<i64>,
        value: Option<f64>,
    },
    WindowBuffer {
        timestamp: Option<i64>,
        entries: Vec<WindowEntry<f64>>,
    },
    RecordBuffer {
        oldest: Option<u64>,
        newest: Option<u64>,
        ids: Vec<u64>,
    },
    SparseWindowBuffer {
        timestamp: Option<i64>,
        entries: Vec<WindowEntry<SparseVector>>,
    },
    /// Scalar aggregate with the window population it covers
    Scalar {
        timestamp: Option<i64>,
        value: Option<f64>,
        count: u64,
    },
    Ema {
        timestamp: Option<i64>,
        value: Option<f64>,
        phase: EmaPhase,
    },
    Histogram {
        timestamp: Option<i64>,
        bounds: Vec<f64>,
        counts: Vec<u64>,
        dropped: u64,
    },
    SlottedHistogram {
        timestamp: Option<i64>,
        counts: Vec<u64>,
        dropped: u64,
    },
    Vector {
        timestamp: Option<i64>,
        values: Vec<f64>,
    },
    Sparse {
        timestamp: Option<i64>,
        value: Option<SparseVector>,
    },
    Resampler {
        next_grid: Option<i64>,
    },
    Merger {
        ready: bool,
        next: Option<i64>,
    },
}

impl Snapshot {
    /// Timestamp of the operator's last update, when it has one
    pub fn timestamp(&self) -> Option<i64> {
        match self {
            Snapshot::Tick { timestamp, .. }
            | Snapshot::WindowBuffer { timestamp, .. }
            | Snapshot::SparseWindowBuffer { timestamp, .. }
            | Snapshot::Scalar { timestamp, .. }
            | Snapshot::Ema { timestamp, .. }
            | Snapshot::Histogram { timestamp, .. }
            | Snapshot::SlottedHistogram { timestamp, .. }
            | Snapshot::Vector { timestamp, .. }
            | Snapshot::Sparse { timestamp, .. } => *timestamp,
            Snapshot::RecordBuffer { .. } | Snapshot::Resampler { .. } | Snapshot::Merger { .. } => {
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregation::EmaInterpolation;

    fn node(name: &str, kind: OperatorKind, inputs: Vec<usize>, ports: Vec<Port>) -> Node {
        let stores = kind
            .source_stores()
            .into_iter()
            .map(str::to_string)
            .collect();
        Node {
            state: OperatorState::from_config(&kind).unwrap(),
            config: OperatorConfig::new(name, kind),
            inputs,
            input_ports: ports,
            stores,
            vector_dim: None,
            timestamp: None,
            updated: false,
        }
    }

    fn buffer(winsize: u64) -> Node {
        node(
            "buf",
            OperatorKind::WindowBuffer {
                store: "s".to_string(),
                value: "v".to_string(),
                winsize,
            },
            vec![],
            vec![],
        )
    }

    #[test]
    fn test_ports() {
        let kind = OperatorKind::Variance {
            in_aggr: "buf".to_string(),
        };
        assert_eq!(provides(&kind), &[Port::Scalar, Port::Variance]);
        assert_eq!(accepts(&kind), &[&[Port::ScalarDelta][..]]);
        assert!(provides(&OperatorKind::RecordBuffer {
            store: "s".to_string(),
            size: 3
        })
        .is_empty());
        assert_eq!(Port::ScalarDelta.to_string(), "a scalar window");
    }

    #[test]
    fn test_check_record_rejects_missing_and_non_finite() {
        let buf = buffer(10);
        assert!(buf.check_record("s", &Record::new(1, 0).with_float("v", 1.0)).is_ok());
        assert!(buf.check_record("s", &Record::new(1, 0)).is_err());
        assert!(buf
            .check_record("s", &Record::new(1, 0).with_float("v", f64::NAN))
            .is_err());
    }

    #[test]
    fn test_sum_steps_from_buffer_delta() {
        let mut nodes = vec![
            buffer(10),
            node(
                "sum",
                OperatorKind::Sum {
                    in_aggr: "buf".to_string(),
                },
                vec![0],
                vec![Port::ScalarDelta],
            ),
        ];

        for (ts, value) in [(0, 1.0), (5, 2.0), (12, 4.0)] {
            let record = Record::new(ts as u64, ts).with_float("v", value);
            let (upstream, rest) = nodes.split_at_mut(1);
            upstream[0].on_record("s", &record).unwrap();
            rest[0].step(upstream, ts).unwrap();
        }

        assert_eq!(scalar_value(&nodes, 1), Some(6.0));
        assert_eq!(nodes[1].length(), Some(2));
        assert_eq!(nodes[1].timestamp, Some(12));
    }

    #[test]
    fn test_rollback_undoes_record_and_step() {
        let mut nodes = vec![
            buffer(10),
            node(
                "sum",
                OperatorKind::Sum {
                    in_aggr: "buf".to_string(),
                },
                vec![0],
                vec![Port::ScalarDelta],
            ),
        ];
        let push = |nodes: &mut Vec<Node>, ts: i64, value: f64| {
            let record = Record::new(ts as u64, ts).with_float("v", value);
            let (upstream, rest) = nodes.split_at_mut(1);
            let buf_point = upstream[0].savepoint();
            let sum_point = rest[0].savepoint();
            upstream[0].on_record("s", &record).unwrap();
            rest[0].step(upstream, ts).unwrap();
            (buf_point, sum_point)
        };

        push(&mut nodes, 0, 1.0);
        push(&mut nodes, 5, 2.0);
        let before: Vec<Snapshot> = (0..2).map(|i| nodes[i].snapshot(&nodes, i)).collect();

        let (buf_point, sum_point) = push(&mut nodes, 12, 4.0);
        assert_eq!(scalar_value(&nodes, 1), Some(6.0));
        nodes[1].rollback(sum_point, true);
        nodes[0].rollback(buf_point, true);

        let after: Vec<Snapshot> = (0..2).map(|i| nodes[i].snapshot(&nodes, i)).collect();
        assert_eq!(after, before);
        assert_eq!(scalar_value(&nodes, 1), Some(3.0));
        assert!(!nodes[0].updated && !nodes[1].updated);

        // a buffer whose own update failed keeps its entries
        let point = nodes[0].savepoint();
        assert!(nodes[0].on_time(3).is_err());
        nodes[0].rollback(point, false);
        assert_eq!(nodes[0].length(), Some(2));
        assert_eq!(nodes[0].timestamp, Some(5));
    }

    #[test]
    fn test_ema_over_tick_uses_scalar_port() {
        let mut nodes = vec![
            node(
                "tick",
                OperatorKind::Tick {
                    store: "s".to_string(),
                    value: "v".to_string(),
                },
                vec![],
                vec![],
            ),
            node(
                "ema",
                OperatorKind::Ema {
                    in_aggr: "tick".to_string(),
                    interval: 1000.0,
                    ema_type: EmaInterpolation::Previous,
                    init_window: 0,
                },
                vec![0],
                vec![Port::Scalar],
            ),
        ];

        let record = Record::new(1, 0).with_float("v", 3.0);
        let (upstream, rest) = nodes.split_at_mut(1);
        upstream[0].on_record("s", &record).unwrap();
        rest[0].step(upstream, 0).unwrap();

        assert_eq!(scalar_value(&nodes, 1), Some(3.0));
        assert!(matches!(
            nodes[1].snapshot(&nodes, 1),
            Snapshot::Ema {
                phase: EmaPhase::Steady,
                ..
            }
        ));
    }

    #[test]
    fn test_on_time_reports_change_only_on_eviction() {
        let mut buf = buffer(10);
        buf.on_record("s", &Record::new(1, 0).with_float("v", 1.0))
            .unwrap();
        assert!(!buf.on_time(5).unwrap());
        assert!(buf.on_time(10).unwrap());
        assert_eq!(buf.length(), Some(0));
        assert_eq!(buf.timestamp, Some(10));
    }

    #[test]
    fn test_reset_restores_fresh_state() {
        let mut buf = buffer(10);
        let fresh = buf.state.clone();
        buf.on_record("s", &Record::new(1, 0).with_float("v", 1.0))
            .unwrap();
        assert_ne!(buf.state, fresh);
        buf.reset();
        assert_eq!(buf.state, fresh);
        assert_eq!(buf.timestamp, None);
    }

    #[test]
    fn test_snapshot_json_is_tagged() {
        let snapshot = Snapshot::Histogram {
            timestamp: Some(1),
            bounds: vec![0.0, 1.0],
            counts: vec![3],
            dropped: 0,
        };
        let json = serde_json::to_value(&snapshot).unwrap();
        assert_eq!(json["kind"], "histogram");
        assert_eq!(snapshot.timestamp(), Some(1));
    }
}
