use futures::future::BoxFuture;
use futures::stream::{FuturesUnordered, StreamExt};
use futures::FutureExt;
use serde_json::{Map, Value};
use tracing::{trace, warn};

use crate::context::ExecutionContext;
use crate::deep_merge::DeepMerge;
use crate::fetch::{execute_fetch_node, FetchOutcome};
use crate::plan::{FlattenPathSegment, PlanNode};
use crate::response::GraphQLError;
use crate::trace::{FetchTrace, TraceNode};

/// Structural failures that abort the whole request. Fetch-level problems
/// never surface here; they become error entries and execution continues.
#[derive(Debug, Clone, thiserror::Error)]
pub enum PlanExecutionError {
    #[error("query plan contains an unsupported {kind} node")]
    UnsupportedPlanNode { kind: &'static str },
}

/// What one plan node produced: a delta for the parent to merge, the errors
/// and extensions gathered underneath it, and the mirroring trace node.
pub(crate) struct NodeOutcome {
    pub data: Value,
    pub errors: Vec<GraphQLError>,
    pub extensions: Map<String, Value>,
    pub trace: TraceNode,
}

impl NodeOutcome {
    fn empty(trace: TraceNode) -> Self {
        NodeOutcome {
            data: Value::Null,
            errors: Vec::new(),
            extensions: Map::new(),
            trace,
        }
    }

    fn from_fetch(outcome: FetchOutcome) -> Self {
        NodeOutcome {
            data: outcome.data,
            errors: outcome.errors,
            extensions: outcome.extensions,
            trace: match outcome.trace {
                Some(fetch_trace) => TraceNode::fetch(fetch_trace),
                None => TraceNode::empty(),
            },
        }
    }
}

/// Executes one plan node against a view of the response tree, returning
/// the subtree it produced. Sequences thread the accumulated view through
/// their children so later children observe earlier writes; parallel
/// children all observe the parent view and their (disjoint) deltas merge
/// in completion order.
pub(crate) fn execute_plan_node<'a>(
    node: &'a PlanNode,
    root: &'a Value,
    path: Vec<FlattenPathSegment>,
    ctx: &'a ExecutionContext<'_>,
) -> BoxFuture<'a, Result<NodeOutcome, PlanExecutionError>> {
    Box::pin(async move {
        if ctx.cancellation.is_cancelled() {
            trace!("request cancelled, not starting {} node", node.kind_name());
            return Ok(NodeOutcome::empty(TraceNode::empty()));
        }
        match node {
            PlanNode::Sequence(sequence) => {
                let mut data = root.clone();
                let mut errors = Vec::new();
                let mut extensions = Map::new();
                let mut traces = Vec::with_capacity(sequence.nodes.len());
                for child in &sequence.nodes {
                    let outcome = execute_plan_node(child, &data, path.clone(), ctx).await?;
                    data.deep_merge(outcome.data);
                    errors.extend(outcome.errors);
                    extensions.extend(outcome.extensions);
                    traces.push(outcome.trace);
                }
                Ok(NodeOutcome {
                    data,
                    errors,
                    extensions,
                    trace: TraceNode::sequence(traces),
                })
            }
            PlanNode::Parallel(parallel) => {
                let mut jobs: FuturesUnordered<_> = parallel
                    .nodes
                    .iter()
                    .enumerate()
                    .map(|(index, child)| {
                        execute_plan_node(child, root, path.clone(), ctx)
                            .map(move |result| (index, result))
                    })
                    .collect();
                let mut data = Value::Null;
                let mut errors = Vec::new();
                let mut extensions = Map::new();
                let mut traces = vec![TraceNode::empty(); parallel.nodes.len()];
                while let Some((index, result)) = jobs.next().await {
                    let outcome = result?;
                    data.deep_merge(outcome.data);
                    errors.extend(outcome.errors);
                    extensions.extend(outcome.extensions);
                    traces[index] = outcome.trace;
                }
                Ok(NodeOutcome {
                    data,
                    errors,
                    extensions,
                    trace: TraceNode::parallel(traces),
                })
            }
            PlanNode::Flatten(flatten) => {
                let mut child_path = path;
                child_path.extend(flatten.path.iter().cloned());
                let outcome = execute_plan_node(&flatten.node, root, child_path, ctx).await?;
                Ok(NodeOutcome {
                    data: outcome.data,
                    errors: outcome.errors,
                    extensions: outcome.extensions,
                    trace: TraceNode::flatten(&flatten.path, outcome.trace),
                })
            }
            PlanNode::Fetch(fetch_node) => {
                match execute_fetch_node(fetch_node, root, &path, ctx).await {
                    Ok(outcome) => Ok(NodeOutcome::from_fetch(outcome)),
                    Err(fetch_error) => {
                        warn!(
                            "fetch against '{}' failed: {}",
                            fetch_node.service_name, fetch_error
                        );
                        let mut outcome = NodeOutcome::empty(TraceNode::fetch(FetchTrace {
                            service_name: fetch_node.service_name.clone(),
                            ..Default::default()
                        }));
                        outcome
                            .errors
                            .push(fetch_error.to_graphql_error(&fetch_node.service_name));
                        Ok(outcome)
                    }
                }
            }
            PlanNode::Defer(_) | PlanNode::Condition(_) => Err(
                PlanExecutionError::UnsupportedPlanNode {
                    kind: node.kind_name(),
                },
            ),
        }
    })
}
