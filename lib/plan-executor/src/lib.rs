//! Query plan executor for a federated GraphQL gateway.
//!
//! Interprets a planner-produced tree of fetch, sequence, parallel and
//! flatten nodes against a set of subgraph data sources, merges the
//! subgraph payloads into one response tree, rewrites entity inputs and
//! outputs, hydrates subgraph error paths onto client-visible paths, and
//! shapes the merged tree against the client operation.

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::time::Instant;

use serde_json::{Map, Value};
use tracing::{instrument, warn};

pub mod context;
pub mod deep_merge;
mod error_paths;
pub mod executors;
mod fetch;
mod interpreter;
pub mod metrics;
pub mod plan;
pub mod projection;
pub mod response;
mod response_path;
mod rewrites;
pub mod schema_metadata;
pub mod selection;
mod selection_walker;
pub mod trace;

pub use context::ExecutionContext;
pub use fetch::FetchError;
pub use interpreter::PlanExecutionError;
pub use projection::{IntrospectionHandler, ProjectionError};
pub use response::{ExecutionResult, GraphQLError, SubgraphResponse};

pub(crate) const TYPENAME_FIELD: &str = "__typename";

/// Whether the serialized query plan is attached to the response
/// extensions; `DryRun` attaches it without executing anything.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ExposeQueryPlanMode {
    Yes,
    No,
    DryRun,
}

pub struct ExecuteQueryPlanParams<'exec> {
    pub query_plan: &'exec plan::QueryPlan,
    pub executors: &'exec executors::map::SubgraphExecutorMap,
    pub variable_values: &'exec Option<HashMap<String, Value>>,
    /// The client operation the merged tree is shaped against.
    pub operation: &'exec plan::OperationDefinition,
    /// Supergraph tables, including inaccessible elements; used for entity
    /// representation extraction and rewrite type conditions.
    pub supergraph_metadata: &'exec schema_metadata::SchemaMetadata,
    /// Client-visible tables; used for post-processing.
    pub api_metadata: &'exec schema_metadata::SchemaMetadata,
    pub introspection: IntrospectionHandler<'exec>,
    /// Headers attached to every outgoing subgraph request.
    pub subgraph_headers: &'exec HashMap<String, String>,
    pub cancellation: &'exec tokio_util::sync::CancellationToken,
    pub metrics: &'exec dyn metrics::ExecutorMetrics,
    pub capture_trace: bool,
    pub expose_query_plan: ExposeQueryPlanMode,
}

/// Runs the query plan and returns the response envelope together with the
/// trace tree mirroring the executed plan (absent when the plan had no root
/// or execution was skipped).
#[instrument(level = "debug", skip_all, name = "execute_query_plan", fields(otel.status_code = tracing::field::Empty))]
pub async fn execute_query_plan(
    params: ExecuteQueryPlanParams<'_>,
) -> (ExecutionResult, Option<trace::TraceNode>) {
    let ctx = ExecutionContext {
        variable_values: params.variable_values,
        schema_metadata: params.supergraph_metadata,
        executors: params.executors,
        subgraph_headers: params.subgraph_headers,
        cancellation: params.cancellation,
        metrics: params.metrics,
        capture_trace: params.capture_trace,
        request_start: Instant::now(),
    };

    let mut extensions = Map::new();
    if params.expose_query_plan != ExposeQueryPlanMode::No {
        match serde_json::to_value(params.query_plan) {
            Ok(plan_json) => {
                extensions.insert("queryPlan".to_string(), plan_json);
            }
            Err(serialize_error) => {
                warn!("failed to serialize query plan: {}", serialize_error);
            }
        }
    }

    let mut data = Value::Null;
    let mut fetch_errors = Vec::new();
    let mut trace_root = None;
    if params.expose_query_plan != ExposeQueryPlanMode::DryRun {
        if let Some(root_node) = &params.query_plan.node {
            let empty_view = Value::Null;
            match interpreter::execute_plan_node(root_node, &empty_view, Vec::new(), &ctx).await {
                Ok(outcome) => {
                    data = outcome.data;
                    fetch_errors = outcome.errors;
                    extensions.extend(outcome.extensions);
                    trace_root = Some(outcome.trace);
                }
                Err(plan_error) => {
                    tracing::Span::current().record("otel.status_code", "ERROR");
                    return (
                        ExecutionResult::from_error(GraphQLError::from_message(
                            plan_error.to_string(),
                        )),
                        None,
                    );
                }
            }
        }
    }

    let mut projection_errors = Vec::new();
    let shaped = catch_unwind(AssertUnwindSafe(|| {
        projection::project_by_operation(
            &data,
            params.operation,
            params.api_metadata,
            params.variable_values,
            params.introspection,
            &mut projection_errors,
        )
    }));
    let shaped = match shaped {
        Ok(Ok(shaped)) => shaped,
        Ok(Err(projection_error)) => {
            projection_errors.push(GraphQLError::from_message(projection_error.to_string()));
            None
        }
        Err(_panic) => {
            projection_errors.push(GraphQLError::from_message(
                "Invalid result while processing the response",
            ));
            None
        }
    };

    // Post-processing errors are usually downstream effects of fetch
    // failures; they are dropped whenever a fetch error is already there.
    let mut errors = fetch_errors;
    if errors.is_empty() {
        errors.append(&mut projection_errors);
    }
    if !errors.is_empty() {
        tracing::Span::current().record("otel.status_code", "ERROR");
    }

    (ExecutionResult::new(shaped, errors, extensions), trace_root)
}

#[cfg(test)]
mod tests;
