//! Running pipeline
//!
//! A [`PipelineContext`] owns every operator of a built pipeline, in schedule
//! order. Records are pushed with [`on_add`](PipelineContext::on_add); each
//! push is one synchronous step through the graph. Source operators of the
//! record's store take the record first, then every operator with an input
//! that changed in this step is recomputed, in schedule order.
//!
//! Records emitted by resamplers and mergers are fed back in as records of
//! their output store after the step that produced them completes.

use crate::config::PipelineConfig;
use crate::core::{Record, SparseVector};
use crate::error::{PipelineError, ProcessorError, Result, StateError, WindowError};
use crate::pipeline::operator::{
    scalar_value, sparse_value, vector_value, Node, OperatorState, Port, Savepoint, Snapshot,
};
use crate::state::{Checkpoint, OperatorCheckpoint};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::path::Path;
use tracing::{debug, info, warn};

/// Pipeline statistics
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineStats {
    /// Records accepted, fed-back records included
    pub records_processed: u64,

    /// Records rejected before any state changed
    pub records_rejected: u64,

    /// Records emitted by resamplers and mergers
    pub records_emitted: u64,

    /// Steps run, clock advances included
    pub steps: u64,

    /// Number of resets
    pub resets: u64,
}

impl PipelineStats {
    /// Create new empty stats
    pub fn new() -> Self {
        Self::default()
    }

    /// Increment records processed
    pub fn inc_records_processed(&mut self) {
        self.records_processed += 1;
    }

    /// Increment records rejected
    pub fn inc_records_rejected(&mut self) {
        self.records_rejected += 1;
    }

    /// Increment records emitted
    pub fn inc_records_emitted(&mut self) {
        self.records_emitted += 1;
    }

    /// Increment steps
    pub fn inc_steps(&mut self) {
        self.steps += 1;
    }

    /// Increment resets
    pub fn inc_resets(&mut self) {
        self.resets += 1;
    }
}

/// A record produced by a resampler or merger
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmittedRecord {
    /// Store the record was written to
    pub store: String,
    /// Operator that produced it
    pub operator: String,
    pub record: Record,
}

/// A built, running aggregation pipeline
pub struct PipelineContext {
    config: PipelineConfig,
    nodes: Vec<Node>,
    index: HashMap<String, usize>,
    clocks: BTreeMap<String, i64>,
    emitted: Vec<EmittedRecord>,
    stats: PipelineStats,
}

impl PipelineContext {
    pub(crate) fn new(config: PipelineConfig, nodes: Vec<Node>) -> Self {
        let index = nodes
            .iter()
            .enumerate()
            .map(|(i, node)| (node.name().to_string(), i))
            .collect();
        Self {
            config,
            nodes,
            index,
            clocks: BTreeMap::new(),
            emitted: Vec::new(),
            stats: PipelineStats::new(),
        }
    }

    /// Get the pipeline name
    pub fn name(&self) -> &str {
        &self.config.name
    }

    /// Get the pipeline description
    pub fn description(&self) -> Option<&str> {
        self.config.description.as_deref()
    }

    /// Get the pipeline tags
    pub fn tags(&self) -> &[String] {
        &self.config.tags
    }

    /// Get the declaration the pipeline was built from
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Operator names in the order they are updated
    pub fn schedule(&self) -> Vec<&str> {
        self.nodes.iter().map(Node::name).collect()
    }

    pub fn stats(&self) -> &PipelineStats {
        &self.stats
    }

    /// Last timestamp seen on a store
    pub fn store_time(&self, store: &str) -> Option<i64> {
        self.clocks.get(store).copied()
    }

    /// Push one committed record of `store`
    ///
    /// A record that any reader of the store would reject (missing or
    /// non-finite field, timestamp older than the store's clock) is refused
    /// before anything changes. Records emitted along the way are processed
    /// before this returns; one of them being rejected is logged, not returned.
    pub fn on_add(&mut self, store: &str, record: &Record) -> Result<()> {
        let mut queue: VecDeque<EmittedRecord> = match self.process(store, record) {
            Ok(emitted) => emitted.into(),
            Err(err) => {
                self.stats.inc_records_rejected();
                warn!(store, record_id = record.id, error = %err, "record rejected");
                return Err(err);
            }
        };

        while let Some(emitted) = queue.pop_front() {
            self.stats.inc_records_emitted();
            match self.process(&emitted.store, &emitted.record) {
                Ok(more) => queue.extend(more),
                Err(err) => {
                    self.stats.inc_records_rejected();
                    warn!(
                        store = %emitted.store,
                        operator = %emitted.operator,
                        error = %err,
                        "emitted record rejected"
                    );
                }
            }
            self.emitted.push(emitted);
        }
        Ok(())
    }

    fn process(&mut self, store: &str, record: &Record) -> Result<Vec<EmittedRecord>> {
        let ts = record.timestamp;
        self.check_clock(store, ts)?;
        for node in self.nodes.iter().filter(|n| n.reads(store)) {
            node.check_record(store, record)?;
        }

        let emitted = self.run_step(store, ts, |node| node.on_record(store, record))?;

        self.stats.inc_records_processed();
        self.stats.inc_steps();
        debug!(
            store,
            record_id = record.id,
            timestamp = ts,
            emitted = emitted.len(),
            "record processed"
        );
        Ok(emitted)
    }

    /// Advance the clock of `store` without a record
    ///
    /// Window buffers on the store evict what fell out of their window and
    /// their dependents are updated; ticks move their timestamp. A failure
    /// leaves the pipeline as it was.
    pub fn on_time(&mut self, store: &str, ts: i64) -> Result<()> {
        self.check_clock(store, ts)?;
        self.run_step(store, ts, |node| node.on_time(ts).map(|_| Vec::new()))?;

        self.stats.inc_steps();
        debug!(store, timestamp = ts, "clock advanced");
        Ok(())
    }

    /// One step through the graph for `store` at `ts`
    ///
    /// Readers of the store go through `on_source`, every other node with an
    /// updated input is recomputed. If any node fails, every node changed so
    /// far and the store clock are rolled back before the error is returned.
    fn run_step<F>(
        &mut self,
        store: &str,
        ts: i64,
        mut on_source: F,
    ) -> Result<Vec<EmittedRecord>>
    where
        F: FnMut(&mut Node) -> Result<Vec<Record>>,
    {
        let previous_clock = self.clocks.insert(store.to_string(), ts);
        self.begin_step();

        let mut journal: Vec<(usize, Savepoint)> = Vec::new();
        let mut emitted = Vec::new();
        let mut failure = None;
        for i in 0..self.nodes.len() {
            let (upstream, rest) = self.nodes.split_at_mut(i);
            let node = &mut rest[0];
            let savepoint = if node.reads(store) {
                let savepoint = node.savepoint();
                match on_source(&mut *node) {
                    Ok(out) => {
                        if let Some(out_store) = node.config.kind.output_store() {
                            emitted.extend(out.into_iter().map(|out_record| EmittedRecord {
                                store: out_store.to_string(),
                                operator: node.name().to_string(),
                                record: out_record,
                            }));
                        }
                        Ok(savepoint)
                    }
                    Err(err) => Err((savepoint, err)),
                }
            } else if node.inputs.iter().any(|&j| upstream[j].updated) {
                let savepoint = node.savepoint();
                match node.step(upstream, ts) {
                    Ok(()) => Ok(savepoint),
                    Err(err) => Err((savepoint, err)),
                }
            } else {
                continue;
            };

            match savepoint {
                Ok(savepoint) => journal.push((i, savepoint)),
                Err((savepoint, err)) => {
                    node.rollback(savepoint, false);
                    failure = Some((i, err));
                    break;
                }
            }
        }

        let Some((failed, err)) = failure else {
            return Ok(emitted);
        };

        debug!(
            store,
            timestamp = ts,
            operator = %self.nodes[failed].name(),
            undone = journal.len(),
            "step rolled back"
        );
        for (i, savepoint) in journal.into_iter().rev() {
            self.nodes[i].rollback(savepoint, true);
        }
        match previous_clock {
            Some(last) => {
                self.clocks.insert(store.to_string(), last);
            }
            None => {
                self.clocks.remove(store);
            }
        }
        Err(err)
    }

    fn check_clock(&self, store: &str, ts: i64) -> Result<()> {
        match self.clocks.get(store) {
            Some(&last) if ts < last => Err(WindowError::InvalidTimestamp {
                timestamp: ts,
                reason: format!("store '{}' is already at {}", store, last),
            }
            .into()),
            _ => Ok(()),
        }
    }

    fn begin_step(&mut self) {
        for node in &mut self.nodes {
            node.updated = false;
        }
    }

    /// Records emitted since the last call, in emission order
    pub fn take_emitted(&mut self) -> Vec<EmittedRecord> {
        std::mem::take(&mut self.emitted)
    }

    /// Clear all operator state, keeping the graph and its configuration
    pub fn reset(&mut self) {
        for node in &mut self.nodes {
            node.reset();
        }
        self.clocks.clear();
        self.emitted.clear();
        self.stats.inc_resets();
        info!(pipeline = %self.config.name, "pipeline reset");
    }

    fn node(&self, name: &str) -> Result<(usize, &Node)> {
        self.index
            .get(name)
            .map(|&i| (i, &self.nodes[i]))
            .ok_or_else(|| {
                PipelineError::OperatorNotFound {
                    name: name.to_string(),
                }
                .into()
            })
    }

    fn unsupported(name: &str, interface: &'static str) -> ProcessorError {
        PipelineError::UnsupportedRead {
            name: name.to_string(),
            interface,
        }
        .into()
    }

    /// Current scalar value; `None` until the operator has one
    pub fn value(&self, name: &str) -> Result<Option<f64>> {
        let (i, node) = self.node(name)?;
        if !node.provides(Port::Scalar) {
            return Err(Self::unsupported(name, "a scalar value"));
        }
        Ok(scalar_value(&self.nodes, i))
    }

    /// Current dense vector
    pub fn vector(&self, name: &str) -> Result<Vec<f64>> {
        let (i, node) = self.node(name)?;
        vector_value(&self.nodes, i)
            .filter(|_| node.provides(Port::Vector))
            .ok_or_else(|| Self::unsupported(name, "a dense vector"))
    }

    /// Current sparse vector; `None` until the operator has one
    pub fn sparse(&self, name: &str) -> Result<Option<SparseVector>> {
        let (i, node) = self.node(name)?;
        if !node.provides(Port::Sparse) {
            return Err(Self::unsupported(name, "a sparse vector"));
        }
        Ok(sparse_value(&self.nodes, i))
    }

    /// Timestamp of the operator's last update
    pub fn timestamp(&self, name: &str) -> Result<Option<i64>> {
        Ok(self.node(name)?.1.timestamp)
    }

    /// Number of entries the operator currently covers
    pub fn length(&self, name: &str) -> Result<usize> {
        let (_, node) = self.node(name)?;
        node.length()
            .ok_or_else(|| Self::unsupported(name, "a length"))
    }

    pub fn snapshot(&self, name: &str) -> Result<Snapshot> {
        let (i, node) = self.node(name)?;
        Ok(node.snapshot(&self.nodes, i))
    }

    /// Snapshots of every operator in schedule order
    pub fn snapshot_all(&self) -> Vec<(String, Snapshot)> {
        self.nodes
            .iter()
            .enumerate()
            .map(|(i, node)| (node.name().to_string(), node.snapshot(&self.nodes, i)))
            .collect()
    }

    /// Capture the state of every operator
    pub fn checkpoint(&self) -> Result<Checkpoint> {
        let operators = self
            .nodes
            .iter()
            .map(|node| -> Result<OperatorCheckpoint> {
                Ok(OperatorCheckpoint {
                    name: node.name().to_string(),
                    kind: node.config.kind.type_tag().to_string(),
                    config: serde_json::to_string(&node.config)?,
                    state: bincode::serialize(&(&node.state, node.timestamp))?,
                })
            })
            .collect::<Result<Vec<_>>>()?;
        let clocks = self
            .clocks
            .iter()
            .map(|(store, &ts)| (store.clone(), ts))
            .collect();
        Ok(Checkpoint::new(self.config.name.clone(), operators, clocks))
    }

    /// Restore operator state from a checkpoint of the same pipeline shape
    ///
    /// Every operator is checked and decoded before any state is replaced, so
    /// a failed restore leaves the pipeline as it was.
    pub fn restore(&mut self, mut checkpoint: Checkpoint) -> Result<()> {
        if !checkpoint.metadata.validated {
            checkpoint.validate()?;
        }
        let checkpoint_id = checkpoint.metadata.checkpoint_id.clone();
        let failed = |reason: String| {
            ProcessorError::from(StateError::RestoreFailed {
                checkpoint_id: checkpoint_id.clone(),
                reason,
            })
        };

        if checkpoint.operators.len() != self.nodes.len() {
            return Err(failed(format!(
                "checkpoint has {} operators, pipeline has {}",
                checkpoint.operators.len(),
                self.nodes.len()
            )));
        }

        let mut restored = Vec::with_capacity(self.nodes.len());
        for (node, saved) in self.nodes.iter().zip(&checkpoint.operators) {
            if saved.name != node.name() || saved.kind != node.config.kind.type_tag() {
                return Err(failed(format!(
                    "expected operator '{}' ({}), found '{}' ({})",
                    node.name(),
                    node.config.kind.type_tag(),
                    saved.name,
                    saved.kind
                )));
            }
            if saved.config != serde_json::to_string(&node.config)? {
                return Err(failed(format!(
                    "configuration of '{}' changed since the checkpoint",
                    node.name()
                )));
            }
            let (state, timestamp): (OperatorState, Option<i64>) =
                bincode::deserialize(&saved.state).map_err(|e| {
                    failed(format!("cannot decode state of '{}': {}", node.name(), e))
                })?;
            if std::mem::discriminant(&state) != std::mem::discriminant(&node.state) {
                return Err(failed(format!(
                    "state of '{}' belongs to another operator kind",
                    node.name()
                )));
            }
            restored.push((state, timestamp));
        }

        for (node, (state, timestamp)) in self.nodes.iter_mut().zip(restored) {
            node.state = state;
            node.timestamp = timestamp;
            node.updated = false;
        }
        self.clocks = checkpoint.clocks.into_iter().collect();

        info!(
            pipeline = %self.config.name,
            checkpoint_id = %checkpoint_id,
            operators = self.nodes.len(),
            "pipeline state restored"
        );
        Ok(())
    }

    /// Serialize the state of every operator
    pub fn save(&self) -> Result<Vec<u8>> {
        let checkpoint = self.checkpoint()?;
        let bytes = checkpoint.to_bytes()?;
        info!(
            pipeline = %self.config.name,
            checkpoint_id = %checkpoint.metadata.checkpoint_id,
            bytes = bytes.len(),
            "pipeline state saved"
        );
        Ok(bytes)
    }

    /// Restore from bytes produced by [`save`](Self::save)
    pub fn load(&mut self, bytes: &[u8]) -> Result<()> {
        let checkpoint = Checkpoint::from_bytes(bytes)?;
        self.restore(checkpoint)
    }

    /// Write a checkpoint file
    pub async fn save_to<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        self.checkpoint()?.save(path).await?;
        Ok(())
    }

    /// Restore from a checkpoint file
    pub async fn load_from<P: AsRef<Path>>(&mut self, path: P) -> Result<()> {
        let checkpoint = Checkpoint::load(path).await?;
        self.restore(checkpoint)
    }
}

impl std::fmt::Debug for PipelineContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineContext")
            .field("name", &self.config.name)
            .field("schedule", &self.schedule())
            .field("clocks", &self.clocks)
            .field("stats", &self.stats)
            .finish()
    }
}
