//! Pipeline builder
//!
//! [`PipelineBuilder`] collects operator declarations and turns them into a
//! [`PipelineContext`]. Building resolves input names to schedule positions,
//! orders operators topologically and rejects anything that could not run:
//! duplicate names, unknown inputs, cycles (between operators or through a
//! resampler/merger output store), inputs that do not publish what an operator
//! consumes, and vectors of statically different length.

use crate::config::{OperatorConfig, OperatorKind, PipelineConfig};
use crate::error::{PipelineError, ProcessorError, Result};
use crate::pipeline::context::PipelineContext;
use crate::pipeline::operator::{accepts, provides, Node, OperatorState, Port};
use std::collections::{BTreeSet, HashMap};
use tracing::{debug, info};

/// Builder for aggregation pipelines
///
/// # Example
///
/// ```rust
/// use streamaggr::config::{OperatorConfig, OperatorKind};
/// use streamaggr::pipeline::PipelineBuilder;
///
/// let pipeline = PipelineBuilder::new()
///     .with_name("latency")
///     .with_operator(OperatorConfig::new("buf", OperatorKind::WindowBuffer {
///         store: "requests".to_string(),
///         value: "latency".to_string(),
///         winsize: 60_000,
///     }))
///     .with_operator(OperatorConfig::new("max", OperatorKind::Max {
///         in_aggr: "buf".to_string(),
///     }))
///     .build()
///     .unwrap();
///
/// assert_eq!(pipeline.schedule(), vec!["buf", "max"]);
/// ```
#[derive(Debug, Clone, Default)]
pub struct PipelineBuilder {
    config: PipelineConfig,
}

impl PipelineBuilder {
    /// Create a new pipeline builder with default configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from an existing declaration
    pub fn from_config(config: PipelineConfig) -> Self {
        Self { config }
    }

    /// Start from a JSON declaration
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(Self::from_config(PipelineConfig::from_json(json)?))
    }

    /// Set the pipeline name
    pub fn with_name<S: Into<String>>(mut self, name: S) -> Self {
        self.config.name = name.into();
        self
    }

    /// Set the pipeline description
    pub fn with_description<S: Into<String>>(mut self, description: S) -> Self {
        self.config.description = Some(description.into());
        self
    }

    /// Add a tag to the pipeline
    pub fn with_tag<S: Into<String>>(mut self, tag: S) -> Self {
        self.config.tags.push(tag.into());
        self
    }

    /// Append one operator
    pub fn with_operator(mut self, operator: OperatorConfig) -> Self {
        self.config.operators.push(operator);
        self
    }

    /// Append several operators in order
    pub fn with_operators<I>(mut self, operators: I) -> Self
    where
        I: IntoIterator<Item = OperatorConfig>,
    {
        self.config.operators.extend(operators);
        self
    }

    /// Get the current configuration
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Validate the declaration and build the pipeline
    pub fn build(self) -> Result<PipelineContext> {
        self.config.validate()?;
        let operators = &self.config.operators;

        let mut by_name: HashMap<&str, usize> = HashMap::with_capacity(operators.len());
        for (i, op) in operators.iter().enumerate() {
            if by_name.insert(op.name.as_str(), i).is_some() {
                return Err(PipelineError::DuplicateName {
                    name: op.name.clone(),
                }
                .into());
            }
        }

        let deps = dependencies(operators, &by_name)?;
        let order = schedule(operators, &deps)?;

        let mut position = vec![0; operators.len()];
        for (pos, &decl) in order.iter().enumerate() {
            position[decl] = pos;
        }

        let mut nodes: Vec<Node> = Vec::with_capacity(operators.len());
        for &decl in &order {
            let op = &operators[decl];
            let inputs: Vec<usize> = op
                .kind
                .inputs()
                .iter()
                .map(|name| position[by_name[name]])
                .collect();
            let input_ports = resolve_ports(op, &inputs, &nodes)?;
            check_pairing(op, &inputs, &nodes)?;
            let vector_dim = vector_dimension(op, &inputs, &nodes)?;

            debug!(
                operator = %op.name,
                kind = op.kind.type_tag(),
                inputs = ?op.kind.inputs(),
                "operator scheduled"
            );
            nodes.push(Node {
                state: OperatorState::from_config(&op.kind)?,
                stores: op
                    .kind
                    .source_stores()
                    .into_iter()
                    .map(str::to_string)
                    .collect(),
                config: op.clone(),
                inputs,
                input_ports,
                vector_dim,
                timestamp: None,
                updated: false,
            });
        }

        info!(
            pipeline = %self.config.name,
            operators = nodes.len(),
            "pipeline built"
        );
        Ok(PipelineContext::new(self.config, nodes))
    }
}

/// Declaration indices each operator depends on
///
/// Besides named inputs, an operator reading a store depends on every
/// resampler or merger writing to that store.
fn dependencies(
    operators: &[OperatorConfig],
    by_name: &HashMap<&str, usize>,
) -> Result<Vec<BTreeSet<usize>>> {
    let mut producers: HashMap<&str, Vec<usize>> = HashMap::new();
    for (i, op) in operators.iter().enumerate() {
        if let Some(store) = op.kind.output_store() {
            producers.entry(store).or_default().push(i);
        }
    }

    operators
        .iter()
        .map(|op| {
            let mut deps = BTreeSet::new();
            for input in op.kind.inputs() {
                match by_name.get(input) {
                    Some(&i) => {
                        deps.insert(i);
                    }
                    None => {
                        return Err(ProcessorError::from(PipelineError::UnknownInput {
                            operator: op.name.clone(),
                            input: input.to_string(),
                        }))
                    }
                }
            }
            for store in op.kind.source_stores() {
                if let Some(ids) = producers.get(store) {
                    deps.extend(ids.iter().copied());
                }
            }
            Ok(deps)
        })
        .collect()
}

/// Kahn's algorithm; ties go to the operator declared first
fn schedule(operators: &[OperatorConfig], deps: &[BTreeSet<usize>]) -> Result<Vec<usize>> {
    let mut indegree: Vec<usize> = deps.iter().map(BTreeSet::len).collect();
    let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); operators.len()];
    for (i, d) in deps.iter().enumerate() {
        for &j in d {
            dependents[j].push(i);
        }
    }

    let mut ready: BTreeSet<usize> = (0..operators.len())
        .filter(|&i| indegree[i] == 0)
        .collect();
    let mut order = Vec::with_capacity(operators.len());
    while let Some(i) = ready.pop_first() {
        order.push(i);
        for &j in &dependents[i] {
            indegree[j] -= 1;
            if indegree[j] == 0 {
                ready.insert(j);
            }
        }
    }

    if order.len() == operators.len() {
        return Ok(order);
    }
    Err(PipelineError::CyclicDependency {
        cycle: find_cycle(operators, deps, &indegree),
    }
    .into())
}

/// Names along one cycle among the operators Kahn's algorithm could not place
fn find_cycle(
    operators: &[OperatorConfig],
    deps: &[BTreeSet<usize>],
    indegree: &[usize],
) -> Vec<String> {
    let stuck = |i: usize| indegree[i] > 0;
    let Some(start) = (0..operators.len()).find(|&i| stuck(i)) else {
        return Vec::new();
    };

    // Walk backwards along unresolved dependencies until a node repeats
    let mut path = vec![start];
    let mut current = start;
    loop {
        let Some(&prev) = deps[current].iter().find(|&&j| stuck(j)) else {
            break;
        };
        if let Some(pos) = path.iter().position(|&p| p == prev) {
            let mut cycle = path[pos..].to_vec();
            cycle.push(prev);
            return cycle
                .iter()
                .rev()
                .map(|&i| operators[i].name.clone())
                .collect();
        }
        path.push(prev);
        current = prev;
    }
    path.iter().rev().map(|&i| operators[i].name.clone()).collect()
}

fn resolve_ports(op: &OperatorConfig, inputs: &[usize], nodes: &[Node]) -> Result<Vec<Port>> {
    accepts(&op.kind)
        .iter()
        .zip(inputs)
        .map(|(accepted, &input)| {
            let offered = provides(&nodes[input].config.kind);
            accepted
                .iter()
                .copied()
                .find(|port| offered.contains(port))
                .ok_or_else(|| {
                    PipelineError::IncompatibleInput {
                        operator: op.name.clone(),
                        input: nodes[input].config.name.clone(),
                        expected: accepted
                            .iter()
                            .map(Port::to_string)
                            .collect::<Vec<_>>()
                            .join(" or "),
                    }
                    .into()
                })
        })
        .collect()
}

/// Covariance needs two buffers that step together
fn check_pairing(op: &OperatorConfig, inputs: &[usize], nodes: &[Node]) -> Result<()> {
    if !matches!(op.kind, OperatorKind::Covariance { .. }) {
        return Ok(());
    }
    let shape = |i: usize| match &nodes[i].config.kind {
        OperatorKind::WindowBuffer { store, winsize, .. } => Some((store.as_str(), *winsize)),
        _ => None,
    };
    let (x, y) = (inputs[0], inputs[1]);
    match (shape(x), shape(y)) {
        (Some(a), Some(b)) if a == b => Ok(()),
        _ => Err(PipelineError::IncompatibleInput {
            operator: op.name.clone(),
            input: nodes[y].config.name.clone(),
            expected: format!(
                "a window buffer over the same store and winsize as '{}'",
                nodes[x].config.name
            ),
        }
        .into()),
    }
}

/// Length of the vector an operator publishes, checked against its inputs
fn vector_dimension(
    op: &OperatorConfig,
    inputs: &[usize],
    nodes: &[Node],
) -> Result<Option<usize>> {
    let dim = match &op.kind {
        OperatorKind::Histogram { .. } => op.kind.histogram_params().map(|p| p.dimension()),
        OperatorKind::SlottedHistogram { bins, .. } => Some(*bins),
        OperatorKind::VecDiff { .. } => {
            let left = nodes[inputs[0]].vector_dim.unwrap_or(0);
            let right = nodes[inputs[1]].vector_dim.unwrap_or(0);
            if left != right {
                return Err(PipelineError::DimensionMismatch {
                    operator: op.name.clone(),
                    left,
                    right,
                }
                .into());
            }
            Some(left)
        }
        _ => None,
    };
    Ok(dim)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resample::{InterpolatorKind, ResampledField};

    fn buffer(name: &str, store: &str, winsize: u64) -> OperatorConfig {
        OperatorConfig::new(
            name,
            OperatorKind::WindowBuffer {
                store: store.to_string(),
                value: "v".to_string(),
                winsize,
            },
        )
    }

    fn sum(name: &str, input: &str) -> OperatorConfig {
        OperatorConfig::new(
            name,
            OperatorKind::Sum {
                in_aggr: input.to_string(),
            },
        )
    }

    fn histogram(name: &str, input: &str, bins: usize) -> OperatorConfig {
        OperatorConfig::new(
            name,
            OperatorKind::Histogram {
                in_aggr: input.to_string(),
                lower_bound: 0.0,
                upper_bound: 5.0,
                bins,
                add_neg_inf: false,
                add_pos_inf: false,
            },
        )
    }

    fn pipeline_error(builder: PipelineBuilder) -> PipelineError {
        match builder.build() {
            Err(ProcessorError::Pipeline(err)) => err,
            Err(other) => panic!("unexpected error {:?}", other),
            Ok(_) => panic!("pipeline should not build"),
        }
    }

    #[test]
    fn test_builder_with_name() {
        let pipeline = PipelineBuilder::new()
            .with_name("test-pipeline")
            .with_description("A test pipeline")
            .with_tag("production")
            .build()
            .unwrap();

        assert_eq!(pipeline.name(), "test-pipeline");
        assert_eq!(pipeline.description(), Some("A test pipeline"));
        assert_eq!(pipeline.tags(), &["production"]);
    }

    #[test]
    fn test_schedule_follows_dependencies_then_declaration() {
        let pipeline = PipelineBuilder::new()
            .with_operators(vec![
                sum("total", "buf"),
                buffer("other", "s", 10),
                buffer("buf", "s", 10),
                sum("other_total", "other"),
            ])
            .build()
            .unwrap();

        assert_eq!(
            pipeline.schedule(),
            vec!["other", "buf", "total", "other_total"]
        );
    }

    #[test]
    fn test_duplicate_name() {
        let err = pipeline_error(
            PipelineBuilder::new().with_operators(vec![buffer("buf", "s", 1), buffer("buf", "s", 2)]),
        );
        assert_eq!(
            err,
            PipelineError::DuplicateName {
                name: "buf".to_string()
            }
        );
    }

    #[test]
    fn test_unknown_input() {
        let err = pipeline_error(PipelineBuilder::new().with_operator(sum("total", "missing")));
        assert!(matches!(err, PipelineError::UnknownInput { .. }));
    }

    #[test]
    fn test_cycle_is_reported_with_names() {
        let err = pipeline_error(PipelineBuilder::new().with_operators(vec![
            histogram("a", "b", 5),
            OperatorConfig::new(
                "b",
                OperatorKind::VecDiff {
                    in_aggr_x: "a".to_string(),
                    in_aggr_y: "a".to_string(),
                },
            ),
        ]));
        match err {
            PipelineError::CyclicDependency { cycle } => {
                assert_eq!(cycle.first(), cycle.last());
                assert!(cycle.contains(&"a".to_string()));
                assert!(cycle.contains(&"b".to_string()));
            }
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[test]
    fn test_store_cycle_through_resamplers() {
        let resampler = |name: &str, from: &str, to: &str| {
            OperatorConfig::new(
                name,
                OperatorKind::Resampler {
                    store: from.to_string(),
                    out_store: to.to_string(),
                    interval: 10,
                    start: None,
                    fields: vec![ResampledField::new("v", InterpolatorKind::Linear)],
                },
            )
        };
        let err = pipeline_error(
            PipelineBuilder::new()
                .with_operators(vec![resampler("r1", "a", "b"), resampler("r2", "b", "a")]),
        );
        assert!(matches!(err, PipelineError::CyclicDependency { .. }));
    }

    #[test]
    fn test_incompatible_input() {
        let err = pipeline_error(PipelineBuilder::new().with_operators(vec![
            OperatorConfig::new(
                "tick",
                OperatorKind::Tick {
                    store: "s".to_string(),
                    value: "v".to_string(),
                },
            ),
            sum("total", "tick"),
        ]));
        assert_eq!(
            err,
            PipelineError::IncompatibleInput {
                operator: "total".to_string(),
                input: "tick".to_string(),
                expected: "a scalar window".to_string(),
            }
        );
    }

    #[test]
    fn test_covariance_requires_matching_buffers() {
        let covariance = OperatorConfig::new(
            "cov",
            OperatorKind::Covariance {
                in_aggr_x: "x".to_string(),
                in_aggr_y: "y".to_string(),
            },
        );
        let err = pipeline_error(PipelineBuilder::new().with_operators(vec![
            buffer("x", "s", 10),
            buffer("y", "s", 20),
            covariance.clone(),
        ]));
        assert!(matches!(err, PipelineError::IncompatibleInput { .. }));

        assert!(PipelineBuilder::new()
            .with_operators(vec![buffer("x", "s", 10), buffer("y", "s", 10), covariance])
            .build()
            .is_ok());
    }

    #[test]
    fn test_vecdiff_dimension_mismatch() {
        let err = pipeline_error(PipelineBuilder::new().with_operators(vec![
            buffer("buf", "s", 10),
            histogram("h5", "buf", 5),
            histogram("h7", "buf", 7),
            OperatorConfig::new(
                "diff",
                OperatorKind::VecDiff {
                    in_aggr_x: "h5".to_string(),
                    in_aggr_y: "h7".to_string(),
                },
            ),
        ]));
        assert_eq!(
            err,
            PipelineError::DimensionMismatch {
                operator: "diff".to_string(),
                left: 5,
                right: 7,
            }
        );
    }

    #[test]
    fn test_invalid_operator_is_configuration_error() {
        let result = PipelineBuilder::new()
            .with_operators(vec![buffer("buf", "s", 10), histogram("h", "buf", 0)])
            .build();
        assert!(matches!(result, Err(ProcessorError::Configuration { .. })));
    }
}
