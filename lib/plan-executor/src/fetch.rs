use std::collections::HashMap;
use std::time::SystemTime;

use futures::future::{self, Either};
use serde_json::{Map, Value};
use tracing::{instrument, trace, warn};

use crate::context::ExecutionContext;
use crate::error_paths::hydrate_subgraph_errors;
use crate::executors::common::{
    SubgraphExecutionRequest, SubgraphExecutorError, FEDERATED_TRACE_FORMAT,
    FEDERATED_TRACE_HEADER,
};
use crate::plan::{FetchNode, FlattenPathSegment, OperationKind};
use crate::response::{GraphQLError, ResponsePathSegment, SubgraphResponse};
use crate::response_path::{traverse_path, SetPathValue};
use crate::rewrites::{pending_input_rewrites, ApplyFetchRewrite};
use crate::selection_walker::extract_representation;
use crate::trace::{decode_ftv1_trace, override_root_parent_type, FetchTrace};

pub(crate) const REPRESENTATIONS_VARIABLE: &str = "representations";
pub(crate) const ENTITIES_FIELD: &str = "_entities";
const FTV1_EXTENSION: &str = "ftv1";

#[derive(Debug, Clone, thiserror::Error)]
pub enum FetchError {
    #[error(transparent)]
    Subgraph(#[from] SubgraphExecutorError),
    #[error("variables must not contain a value named '{REPRESENTATIONS_VARIABLE}'")]
    ForbiddenRepresentationsVariable,
    #[error("expected an '{ENTITIES_FIELD}' array in the response from service '{service}'")]
    ExpectedEntitiesArray { service: String },
    #[error("service '{service}' returned {received} entities for {expected} representations")]
    EntityCountMismatch {
        service: String,
        expected: usize,
        received: usize,
    },
}

impl FetchError {
    pub(crate) fn to_graphql_error(&self, service_name: &str) -> GraphQLError {
        crate::error_paths::add_subgraph_info_to_error(
            GraphQLError::from_message(self.to_string()),
            service_name,
        )
    }
}

/// Everything a single subgraph fetch contributes to the request: a delta
/// to merge into the response tree, hydrated errors, propagated extensions,
/// and the trace record (absent when the fetch was skipped).
pub(crate) struct FetchOutcome {
    pub data: Value,
    pub errors: Vec<GraphQLError>,
    pub extensions: Map<String, Value>,
    pub trace: Option<FetchTrace>,
}

impl FetchOutcome {
    fn skipped() -> Self {
        FetchOutcome {
            data: Value::Null,
            errors: Vec::new(),
            extensions: Map::new(),
            trace: None,
        }
    }
}

/// Where the subgraph payload lands in the response tree.
enum MergeTargets {
    /// A root fetch: the payload merges at the cursor as-is.
    Root,
    /// A root fetch reached through a flatten path: the payload merges at
    /// every concrete position the path resolved to.
    Positions(Vec<Vec<ResponsePathSegment>>),
    /// An entity fetch: `_entities[i]` merges at the i-th recorded path.
    Entities(Vec<Vec<ResponsePathSegment>>),
}

#[instrument(level = "debug", skip_all, name = "fetch", fields(service_name = %node.service_name))]
pub(crate) async fn execute_fetch_node(
    node: &FetchNode,
    root: &Value,
    current_path: &[FlattenPathSegment],
    ctx: &ExecutionContext<'_>,
) -> Result<FetchOutcome, FetchError> {
    let mut variables = collect_variable_usages(node, ctx.variable_values);

    let targets = match &node.requires {
        Some(requires) => {
            if ctx
                .variable_values
                .as_ref()
                .is_some_and(|values| values.contains_key(REPRESENTATIONS_VARIABLE))
            {
                return Err(FetchError::ForbiddenRepresentationsVariable);
            }
            let input_rewrites = pending_input_rewrites(node.input_rewrites.as_ref());
            let mut representations = Vec::new();
            let mut representation_paths = Vec::new();
            traverse_path(root, Vec::new(), current_path, &mut |path, entity| {
                if let Some(representation) =
                    extract_representation(ctx.schema_metadata, entity, requires, &input_rewrites)
                {
                    representations.push(representation);
                    representation_paths.push(path);
                }
            });
            if representations.is_empty() {
                trace!("no usable representations, skipping fetch");
                return Ok(FetchOutcome::skipped());
            }
            variables.insert(
                REPRESENTATIONS_VARIABLE.to_string(),
                Value::Array(representations),
            );
            MergeTargets::Entities(representation_paths)
        }
        None if current_path.is_empty() => MergeTargets::Root,
        None => {
            let mut positions = Vec::new();
            traverse_path(root, Vec::new(), current_path, &mut |path, _| {
                positions.push(path);
            });
            if positions.is_empty() {
                trace!("fetch path resolved to no data, skipping fetch");
                return Ok(FetchOutcome::skipped());
            }
            MergeTargets::Positions(positions)
        }
    };

    let mut headers = ctx.subgraph_headers.clone();
    if ctx.capture_trace {
        headers.insert(
            FEDERATED_TRACE_HEADER.to_string(),
            FEDERATED_TRACE_FORMAT.to_string(),
        );
    }
    let execution_request = SubgraphExecutionRequest {
        query: &node.operation,
        operation_name: node.operation_name.as_deref(),
        variables: if variables.is_empty() {
            None
        } else {
            Some(variables)
        },
        headers,
    };

    let sent_time = SystemTime::now();
    let sent_time_offset_ns = ctx.request_start.elapsed().as_nanos() as u64;
    let send = ctx.executors.execute(&node.service_name, execution_request);
    futures::pin_mut!(send);
    let cancelled = ctx.cancellation.cancelled();
    futures::pin_mut!(cancelled);
    let mut response = match future::select(cancelled, send).await {
        Either::Left(_) => {
            trace!("request cancelled while fetch was in flight");
            return Ok(FetchOutcome::skipped());
        }
        Either::Right((result, _)) => result?,
    };
    let received_time = SystemTime::now();

    let mut fetch_trace = FetchTrace {
        service_name: node.service_name.clone(),
        ..Default::default()
    };
    if ctx.capture_trace {
        fetch_trace.sent_time_offset_ns = sent_time_offset_ns;
        fetch_trace.sent_time = Some(sent_time.into());
        fetch_trace.received_time = Some(received_time.into());
    }
    let had_ftv1 = attach_ftv1(node, &mut response, &mut fetch_trace, ctx.capture_trace);

    let mut outcome = FetchOutcome {
        data: Value::Null,
        errors: Vec::new(),
        extensions: response.extensions.take().unwrap_or_default(),
        trace: Some(fetch_trace),
    };

    let subgraph_errors = response.errors.take().unwrap_or_default();
    let merge_result = merge_response_data(node, ctx, &targets, response.data.take(), &mut outcome);

    let representation_paths = match &targets {
        MergeTargets::Entities(paths) => Some(paths.as_slice()),
        _ => None,
    };
    if !subgraph_errors.is_empty() {
        let hydrated = hydrate_subgraph_errors(
            &node.service_name,
            current_path,
            representation_paths,
            subgraph_errors,
        );
        if !had_ftv1 {
            for error in &hydrated {
                if let Some(path) = &error.path {
                    ctx.metrics
                        .record_subgraph_error_path(&node.service_name, path);
                }
            }
        }
        outcome.errors.extend(hydrated);
    }

    if let Err(validation_error) = merge_result {
        warn!("malformed subgraph response: {}", validation_error);
        outcome
            .errors
            .push(validation_error.to_graphql_error(&node.service_name));
    }

    Ok(outcome)
}

fn merge_response_data(
    node: &FetchNode,
    ctx: &ExecutionContext<'_>,
    targets: &MergeTargets,
    data: Option<Value>,
    outcome: &mut FetchOutcome,
) -> Result<(), FetchError> {
    match targets {
        MergeTargets::Entities(representation_paths) => {
            let entities = match data {
                Some(Value::Object(mut map)) => map.remove(ENTITIES_FIELD),
                _ => None,
            };
            let entities = match entities {
                Some(Value::Array(entities)) => entities,
                _ => {
                    return Err(FetchError::ExpectedEntitiesArray {
                        service: node.service_name.clone(),
                    })
                }
            };
            if entities.len() != representation_paths.len() {
                return Err(FetchError::EntityCountMismatch {
                    service: node.service_name.clone(),
                    expected: representation_paths.len(),
                    received: entities.len(),
                });
            }
            for (mut entity, path) in entities.into_iter().zip(representation_paths.iter()) {
                apply_output_rewrites(node, ctx, &mut entity);
                outcome.data.set_path_value(path, entity);
            }
        }
        MergeTargets::Positions(positions) => {
            let Some(mut data) = data else {
                return Ok(());
            };
            apply_payload_rewrites(node, ctx, &mut data);
            for path in positions {
                outcome.data.set_path_value(path, data.clone());
            }
        }
        MergeTargets::Root => {
            let Some(mut data) = data else {
                return Ok(());
            };
            apply_payload_rewrites(node, ctx, &mut data);
            outcome.data = data;
        }
    }
    Ok(())
}

/// Output rewrites on an entity are anchored at the entity itself.
fn apply_output_rewrites(node: &FetchNode, ctx: &ExecutionContext<'_>, entity: &mut Value) {
    if let Some(output_rewrites) = &node.output_rewrites {
        for rewrite in output_rewrites {
            rewrite.apply(&ctx.schema_metadata.possible_types, entity);
        }
    }
}

/// Output rewrites on a whole payload: a type-conditioned path has no
/// anchor field, so it is matched against every root field value; a
/// key-addressed path walks down from the payload root.
fn apply_payload_rewrites(node: &FetchNode, ctx: &ExecutionContext<'_>, data: &mut Value) {
    let Some(output_rewrites) = &node.output_rewrites else {
        return;
    };
    for rewrite in output_rewrites {
        match rewrite.path().first() {
            Some(crate::plan::FetchPathSegment::TypenameEquals(_)) => {
                if let Value::Object(map) = data {
                    for field_value in map.values_mut() {
                        rewrite.apply(&ctx.schema_metadata.possible_types, field_value);
                    }
                }
            }
            _ => rewrite.apply(&ctx.schema_metadata.possible_types, data),
        }
    }
}

/// Pulls the FTv1 payload out of the response extensions and decodes it
/// into the fetch trace. Returns whether a payload was present; a payload
/// that fails to decode only flags the trace, it never fails the fetch.
fn attach_ftv1(
    node: &FetchNode,
    response: &mut SubgraphResponse,
    fetch_trace: &mut FetchTrace,
    capture_trace: bool,
) -> bool {
    let Some(extensions) = &mut response.extensions else {
        return false;
    };
    let Some(payload) = extensions.remove(FTV1_EXTENSION) else {
        return false;
    };
    if !capture_trace {
        return true;
    }
    let decoded = match &payload {
        Value::String(encoded) => decode_ftv1_trace(encoded),
        _ => {
            warn!("ftv1 extension from '{}' is not a string", node.service_name);
            fetch_trace.trace_parsing_failed = true;
            return true;
        }
    };
    match decoded {
        Ok(mut subgraph_trace) => {
            let root_type_name = node
                .operation_kind
                .unwrap_or(OperationKind::Query)
                .root_type_name();
            override_root_parent_type(&mut subgraph_trace, root_type_name);
            fetch_trace.trace = Some(subgraph_trace);
        }
        Err(decode_error) => {
            warn!(
                "failed to decode ftv1 trace from '{}': {}",
                node.service_name, decode_error
            );
            fetch_trace.trace_parsing_failed = true;
        }
    }
    true
}

fn collect_variable_usages(
    node: &FetchNode,
    variable_values: &Option<HashMap<String, Value>>,
) -> Map<String, Value> {
    let mut variables = Map::new();
    if let Some(values) = variable_values {
        for name in &node.variable_usages {
            if let Some(value) = values.get(name) {
                variables.insert(name.clone(), value.clone());
            }
        }
    }
    variables
}
