use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::{json, Map, Value};
use tokio_util::sync::CancellationToken;

use crate::executors::common::{
    SubgraphExecutionRequest, SubgraphExecutor, SubgraphExecutorError, FEDERATED_TRACE_FORMAT,
    FEDERATED_TRACE_HEADER,
};
use crate::executors::map::SubgraphExecutorMap;
use crate::metrics::NoopMetrics;
use crate::plan::{OperationDefinition, QueryPlan};
use crate::response::{ExecutionResult, SubgraphResponse};
use crate::schema_metadata::SchemaMetadata;
use crate::selection::FieldSelection;
use crate::trace::{trace_node, FetchTrace, TraceNode};
use crate::{execute_query_plan, ExecuteQueryPlanParams, ExposeQueryPlanMode};

const SUPERGRAPH_SDL: &str = r#"
    type Query {
        me: User
        users: [User]
    }

    type User {
        id: ID!
        name: String
        email: String
        username: String
        login: String
        role: Role
    }

    enum Role {
        ADMIN
        MEMBER
    }
"#;

#[derive(Clone, Debug)]
struct RecordedRequest {
    variables: Option<Map<String, Value>>,
    headers: HashMap<String, String>,
}

#[derive(Default)]
struct RequestLog {
    requests: Mutex<Vec<RecordedRequest>>,
}

impl RequestLog {
    fn recorded(&self) -> Vec<RecordedRequest> {
        self.requests.lock().unwrap().clone()
    }

    fn representations(&self) -> Vec<Value> {
        self.recorded()
            .iter()
            .filter_map(|request| request.variables.as_ref()?.get("representations").cloned())
            .flat_map(|representations| match representations {
                Value::Array(items) => items,
                other => vec![other],
            })
            .collect()
    }
}

/// Hands out scripted response payloads in order and records every request
/// it receives.
struct ScriptedSubgraph {
    log: Arc<RequestLog>,
    responses: Mutex<VecDeque<Value>>,
}

#[async_trait]
impl SubgraphExecutor for ScriptedSubgraph {
    async fn execute(
        &self,
        execution_request: SubgraphExecutionRequest<'_>,
    ) -> Result<SubgraphResponse, SubgraphExecutorError> {
        self.log.requests.lock().unwrap().push(RecordedRequest {
            variables: execution_request.variables.clone(),
            headers: execution_request.headers.clone(),
        });
        let payload = self
            .responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| json!({ "data": null }));
        Ok(serde_json::from_value(payload).expect("scripted subgraph payload must deserialize"))
    }
}

struct Gateway {
    supergraph: SchemaMetadata,
    api: SchemaMetadata,
    executors: SubgraphExecutorMap,
    variables: Option<HashMap<String, Value>>,
    cancellation: CancellationToken,
    capture_trace: bool,
    expose_query_plan: ExposeQueryPlanMode,
}

impl Gateway {
    fn new() -> Self {
        Gateway {
            supergraph: SchemaMetadata::from_sdl(SUPERGRAPH_SDL).expect("test supergraph"),
            api: SchemaMetadata::from_sdl(SUPERGRAPH_SDL).expect("test api schema"),
            executors: SubgraphExecutorMap::new(),
            variables: None,
            cancellation: CancellationToken::new(),
            capture_trace: false,
            expose_query_plan: ExposeQueryPlanMode::No,
        }
    }

    fn subgraph(&mut self, name: &str, responses: Vec<Value>) -> Arc<RequestLog> {
        let log = Arc::new(RequestLog::default());
        let executor = ScriptedSubgraph {
            log: log.clone(),
            responses: Mutex::new(responses.into()),
        };
        self.executors
            .insert_boxed_arc(name.to_string(), executor.to_boxed_arc());
        log
    }

    async fn run(
        &self,
        plan_json: Value,
        operation_json: Value,
    ) -> (ExecutionResult, Option<TraceNode>) {
        let query_plan: QueryPlan = serde_json::from_value(plan_json).expect("test query plan");
        let operation: OperationDefinition =
            serde_json::from_value(operation_json).expect("test operation");
        let subgraph_headers = HashMap::new();
        let metrics = NoopMetrics;
        let introspection = |_field: &FieldSelection| Value::Null;
        execute_query_plan(ExecuteQueryPlanParams {
            query_plan: &query_plan,
            executors: &self.executors,
            variable_values: &self.variables,
            operation: &operation,
            supergraph_metadata: &self.supergraph,
            api_metadata: &self.api,
            introspection: &introspection,
            subgraph_headers: &subgraph_headers,
            cancellation: &self.cancellation,
            metrics: &metrics,
            capture_trace: self.capture_trace,
            expose_query_plan: self.expose_query_plan.clone(),
        })
        .await
    }
}

fn users_plan() -> Value {
    json!({
        "kind": "QueryPlan",
        "node": {
            "kind": "Sequence",
            "nodes": [
                {
                    "kind": "Fetch",
                    "serviceName": "A",
                    "operation": "{ users { __typename id } }"
                },
                {
                    "kind": "Flatten",
                    "path": ["users", "@"],
                    "node": {
                        "kind": "Fetch",
                        "serviceName": "B",
                        "operation": "query($representations:[_Any!]!){_entities(representations:$representations){... on User{email}}}",
                        "requires": [
                            {"kind": "InlineFragment", "typeCondition": "User", "selections": [
                                {"kind": "Field", "name": "__typename"},
                                {"kind": "Field", "name": "id"}
                            ]}
                        ]
                    }
                }
            ]
        }
    })
}

fn users_operation() -> Value {
    json!({
        "operationKind": "query",
        "selectionSet": [
            {"kind": "Field", "name": "users", "selections": [
                {"kind": "Field", "name": "id"},
                {"kind": "Field", "name": "email"}
            ]}
        ]
    })
}

fn me_operation(fields: &[&str]) -> Value {
    let selections: Vec<Value> = fields
        .iter()
        .map(|name| json!({"kind": "Field", "name": name}))
        .collect();
    json!({
        "operationKind": "query",
        "selectionSet": [
            {"kind": "Field", "name": "me", "selections": selections}
        ]
    })
}

fn fetch_trace_of(trace: &TraceNode) -> &FetchTrace {
    match &trace.node {
        Some(trace_node::Node::Fetch(fetch)) => fetch,
        other => panic!("expected a fetch trace node, got {:?}", other),
    }
}

#[test]
fn single_root_fetch() {
    tokio_test::block_on(async {
        let mut gateway = Gateway::new();
        let log = gateway.subgraph(
            "S",
            vec![json!({"data": {"me": {"id": "1", "name": "Ada"}}})],
        );
        let (result, trace) = gateway
            .run(
                json!({
                    "kind": "QueryPlan",
                    "node": {"kind": "Fetch", "serviceName": "S", "operation": "{ me { id name } }"}
                }),
                me_operation(&["id", "name"]),
            )
            .await;
        assert_eq!(result.data, Some(json!({"me": {"id": "1", "name": "Ada"}})));
        assert!(result.errors.is_none());
        assert_eq!(log.recorded().len(), 1);
        assert!(trace.is_some());
    });
}

#[test]
fn sequence_resolves_entities() {
    tokio_test::block_on(async {
        let mut gateway = Gateway::new();
        gateway.subgraph(
            "A",
            vec![json!({"data": {"users": [
                {"__typename": "User", "id": "1"},
                {"__typename": "User", "id": "2"}
            ]}})],
        );
        let b_log = gateway.subgraph(
            "B",
            vec![json!({"data": {"_entities": [{"email": "a@x"}, {"email": "b@x"}]}})],
        );
        let (result, _) = gateway.run(users_plan(), users_operation()).await;
        assert_eq!(
            result.data,
            Some(json!({"users": [
                {"id": "1", "email": "a@x"},
                {"id": "2", "email": "b@x"}
            ]}))
        );
        assert!(result.errors.is_none());
        // The second fetch observed the first fetch's writes.
        assert_eq!(
            b_log.representations(),
            vec![
                json!({"__typename": "User", "id": "1"}),
                json!({"__typename": "User", "id": "2"})
            ]
        );
    });
}

#[test]
fn entity_error_paths_are_hydrated() {
    tokio_test::block_on(async {
        let mut gateway = Gateway::new();
        gateway.subgraph(
            "A",
            vec![json!({"data": {"users": [
                {"__typename": "User", "id": "1"},
                {"__typename": "User", "id": "2"}
            ]}})],
        );
        gateway.subgraph(
            "B",
            vec![json!({
                "data": {"_entities": [{"email": "a@x"}, null]},
                "errors": [{"message": "boom", "path": ["_entities", 1, "email"]}]
            })],
        );
        let (result, _) = gateway.run(users_plan(), users_operation()).await;
        let errors = result.errors.expect("subgraph error must surface");
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].message, "boom");
        assert_eq!(
            serde_json::to_value(errors[0].path.as_ref().unwrap()).unwrap(),
            json!(["users", 1, "email"])
        );
        let extensions = errors[0].extensions.as_ref().unwrap();
        assert_eq!(extensions.get("serviceName"), Some(&json!("B")));
        assert_eq!(extensions.get("code"), Some(&json!("DOWNSTREAM_SERVICE_ERROR")));
    });
}

#[test]
fn missing_input_drops_entity() {
    tokio_test::block_on(async {
        let mut gateway = Gateway::new();
        gateway.subgraph(
            "A",
            vec![json!({"data": {"users": [
                {"__typename": "User", "id": "1"},
                {"__typename": "User"}
            ]}})],
        );
        let b_log = gateway.subgraph(
            "B",
            vec![json!({"data": {"_entities": [{"email": "a@x"}]}})],
        );
        let (result, _) = gateway.run(users_plan(), users_operation()).await;
        assert!(result.errors.is_none());
        // Only the complete entity was sent, and every representation
        // carried its runtime type.
        let representations = b_log.representations();
        assert_eq!(representations.len(), 1);
        assert!(representations
            .iter()
            .all(|representation| representation.get("__typename").is_some()));
        assert_eq!(
            result.data,
            Some(json!({"users": [
                {"id": "1", "email": "a@x"},
                {"id": null, "email": null}
            ]}))
        );
    });
}

#[test]
fn output_rewrite_renames_key() {
    tokio_test::block_on(async {
        let mut gateway = Gateway::new();
        gateway.subgraph(
            "S",
            vec![json!({"data": {"me": {"__typename": "User", "username": "ada"}}})],
        );
        let (result, _) = gateway
            .run(
                json!({
                    "kind": "QueryPlan",
                    "node": {
                        "kind": "Fetch",
                        "serviceName": "S",
                        "operation": "{ me { __typename username } }",
                        "outputRewrites": [
                            {"kind": "KeyRenamer", "path": ["... on User", "username"], "renameKeyTo": "login"}
                        ]
                    }
                }),
                me_operation(&["login", "username"]),
            )
            .await;
        assert_eq!(
            result.data,
            Some(json!({"me": {"login": "ada", "username": null}}))
        );
        assert!(result.errors.is_none());
    });
}

#[test]
fn unsupported_plan_node_aborts() {
    tokio_test::block_on(async {
        let mut gateway = Gateway::new();
        let log = gateway.subgraph("A", vec![json!({"data": {"me": {"id": "1"}}})]);
        let (result, trace) = gateway
            .run(
                json!({
                    "kind": "QueryPlan",
                    "node": {
                        "kind": "Sequence",
                        "nodes": [
                            {"kind": "Fetch", "serviceName": "A", "operation": "{ me { id } }"},
                            {"kind": "Defer", "primary": {}}
                        ]
                    }
                }),
                me_operation(&["id"]),
            )
            .await;
        // The fetch ran, but a malformed plan never produces partial data.
        assert_eq!(log.recorded().len(), 1);
        assert!(result.data.is_none());
        let errors = result.errors.expect("the structural error must surface");
        assert_eq!(errors.len(), 1);
        assert!(errors[0].message.contains("unsupported Defer node"));
        assert!(trace.is_none());
    });
}

#[test]
fn parallel_children_merge_independently() {
    fn plan_in(first: &str, second: &str) -> Value {
        json!({
            "kind": "QueryPlan",
            "node": {
                "kind": "Parallel",
                "nodes": [
                    {"kind": "Fetch", "serviceName": first, "operation": "{ a }"},
                    {"kind": "Fetch", "serviceName": second, "operation": "{ b }"}
                ]
            }
        })
    }
    fn operation() -> Value {
        json!({
            "operationKind": "query",
            "selectionSet": [
                {"kind": "Field", "name": "me", "selections": [{"kind": "Field", "name": "id"}]},
                {"kind": "Field", "name": "users", "selections": [{"kind": "Field", "name": "id"}]}
            ]
        })
    }
    async fn run_order(first: &'static str, second: &'static str) -> Option<Value> {
        let mut gateway = Gateway::new();
        gateway.subgraph("X", vec![json!({"data": {"me": {"id": "1"}}})]);
        gateway.subgraph("Y", vec![json!({"data": {"users": [{"id": "2"}]}})]);
        let (result, _) = gateway.run(plan_in(first, second), operation()).await;
        result.data
    }
    tokio_test::block_on(async {
        let forward = run_order("X", "Y").await;
        let reversed = run_order("Y", "X").await;
        assert_eq!(forward, reversed);
        assert_eq!(
            forward,
            Some(json!({"me": {"id": "1"}, "users": [{"id": "2"}]}))
        );
    });
}

#[test]
fn dead_flatten_path_skips_fetch() {
    tokio_test::block_on(async {
        let mut gateway = Gateway::new();
        gateway.subgraph("A", vec![json!({"data": {"users": null}})]);
        let b_log = gateway.subgraph("B", vec![]);
        let (result, trace) = gateway.run(users_plan(), users_operation()).await;
        assert!(b_log.recorded().is_empty());
        assert!(result.errors.is_none());
        assert_eq!(result.data, Some(json!({"users": null})));

        // The trace still mirrors the whole plan; the skipped fetch left no
        // fetch record under the flatten node.
        let trace = trace.expect("trace tree must be produced");
        let children = match &trace.node {
            Some(trace_node::Node::Sequence(sequence)) => &sequence.nodes,
            other => panic!("expected a sequence trace, got {:?}", other),
        };
        assert_eq!(children.len(), 2);
        match &children[1].node {
            Some(trace_node::Node::Flatten(flatten)) => {
                let child = flatten.node.as_ref().expect("flatten child slot");
                assert!(child.node.is_none());
            }
            other => panic!("expected a flatten trace, got {:?}", other),
        }
    });
}

#[test]
fn entity_count_mismatch_is_reported() {
    tokio_test::block_on(async {
        let mut gateway = Gateway::new();
        gateway.subgraph(
            "A",
            vec![json!({"data": {"users": [
                {"__typename": "User", "id": "1"},
                {"__typename": "User", "id": "2"}
            ]}})],
        );
        gateway.subgraph("B", vec![json!({"data": {"_entities": [{"email": "a@x"}]}})]);
        let (result, _) = gateway.run(users_plan(), users_operation()).await;
        let errors = result.errors.expect("count mismatch must surface");
        assert_eq!(errors.len(), 1);
        assert!(errors[0]
            .message
            .contains("returned 1 entities for 2 representations"));
    });
}

#[test]
fn malformed_entities_payload_is_reported() {
    tokio_test::block_on(async {
        let mut gateway = Gateway::new();
        gateway.subgraph(
            "A",
            vec![json!({"data": {"users": [{"__typename": "User", "id": "1"}]}})],
        );
        gateway.subgraph("B", vec![json!({"data": {"_entities": "not-an-array"}})]);
        let (result, _) = gateway.run(users_plan(), users_operation()).await;
        let errors = result.errors.expect("malformed payload must surface");
        assert!(errors[0].message.contains("_entities"));
    });
}

#[test]
fn forbidden_representations_variable_fails_the_fetch() {
    tokio_test::block_on(async {
        let mut gateway = Gateway::new();
        gateway.subgraph(
            "A",
            vec![json!({"data": {"users": [{"__typename": "User", "id": "1"}]}})],
        );
        let b_log = gateway.subgraph("B", vec![]);
        gateway.variables = Some(HashMap::from([(
            "representations".to_string(),
            json!([{"__typename": "User", "id": "999"}]),
        )]));
        let (result, _) = gateway.run(users_plan(), users_operation()).await;
        assert!(b_log.recorded().is_empty());
        let errors = result.errors.expect("the forbidden variable must surface");
        assert!(errors[0].message.contains("representations"));
    });
}

#[test]
fn fetch_errors_suppress_projection_errors() {
    tokio_test::block_on(async {
        let mut gateway = Gateway::new();
        gateway.subgraph(
            "A",
            vec![json!({"data": {"me": {"role": "SUPERUSER"}}})],
        );
        // Service "C" is never registered.
        let (result, _) = gateway
            .run(
                json!({
                    "kind": "QueryPlan",
                    "node": {
                        "kind": "Sequence",
                        "nodes": [
                            {"kind": "Fetch", "serviceName": "A", "operation": "{ me { role } }"},
                            {"kind": "Fetch", "serviceName": "C", "operation": "{ users { id } }"}
                        ]
                    }
                }),
                me_operation(&["role"]),
            )
            .await;
        let errors = result.errors.expect("the fetch error must surface");
        assert_eq!(errors.len(), 1);
        assert!(errors[0].message.contains("was not found in the service map"));
        // The invalid enum still nulls out, but its error is suppressed.
        assert_eq!(result.data, Some(json!({"me": {"role": null}})));
    });
}

#[test]
fn projection_errors_surface_without_fetch_errors() {
    tokio_test::block_on(async {
        let mut gateway = Gateway::new();
        gateway.subgraph("A", vec![json!({"data": {"me": {"role": "SUPERUSER"}}})]);
        let (result, _) = gateway
            .run(
                json!({
                    "kind": "QueryPlan",
                    "node": {"kind": "Fetch", "serviceName": "A", "operation": "{ me { role } }"}
                }),
                me_operation(&["role"]),
            )
            .await;
        let errors = result.errors.expect("the enum error must surface");
        assert_eq!(errors.len(), 1);
        assert!(errors[0].message.contains("enum"));
    });
}

#[test]
fn declared_variable_usages_are_forwarded() {
    tokio_test::block_on(async {
        let mut gateway = Gateway::new();
        let log = gateway.subgraph("S", vec![json!({"data": {"me": {"id": "1"}}})]);
        gateway.variables = Some(HashMap::from([
            ("first".to_string(), json!(2)),
            ("unused".to_string(), json!("nope")),
        ]));
        let (_, _) = gateway
            .run(
                json!({
                    "kind": "QueryPlan",
                    "node": {
                        "kind": "Fetch",
                        "serviceName": "S",
                        "operation": "query($first:Int){ me { id } }",
                        "variableUsages": ["first"]
                    }
                }),
                me_operation(&["id"]),
            )
            .await;
        let recorded = log.recorded();
        assert_eq!(recorded.len(), 1);
        let variables = recorded[0].variables.as_ref().unwrap();
        assert_eq!(variables.get("first"), Some(&json!(2)));
        assert!(!variables.contains_key("unused"));
    });
}

#[test]
fn cancelled_request_starts_no_fetches() {
    tokio_test::block_on(async {
        let mut gateway = Gateway::new();
        let log = gateway.subgraph("S", vec![json!({"data": {"me": {"id": "1"}}})]);
        gateway.cancellation.cancel();
        let (result, _) = gateway
            .run(
                json!({
                    "kind": "QueryPlan",
                    "node": {"kind": "Fetch", "serviceName": "S", "operation": "{ me { id } }"}
                }),
                me_operation(&["id"]),
            )
            .await;
        assert!(log.recorded().is_empty());
        assert!(result.data.is_none());
        assert!(result.errors.is_none());
    });
}

#[test]
fn trace_capture_requests_and_decodes_ftv1() {
    use base64::Engine as _;
    use prost::Message as _;

    tokio_test::block_on(async {
        let subgraph_trace = crate::trace::SubgraphTrace {
            start_time: None,
            end_time: None,
            duration_ns: 7,
            root: Some(crate::trace::SubgraphTraceNode {
                response_name: String::new(),
                r#type: String::new(),
                parent_type: String::new(),
                start_time: 0,
                end_time: 7,
                child: vec![crate::trace::SubgraphTraceNode {
                    response_name: "me".to_string(),
                    r#type: "User".to_string(),
                    parent_type: "RootQuery".to_string(),
                    start_time: 1,
                    end_time: 6,
                    child: vec![],
                    error: vec![],
                }],
                error: vec![],
            }),
        };
        let encoded = base64::engine::general_purpose::STANDARD
            .encode(subgraph_trace.encode_to_vec());

        let mut gateway = Gateway::new();
        gateway.capture_trace = true;
        let log = gateway.subgraph(
            "S",
            vec![json!({
                "data": {"me": {"id": "1"}},
                "extensions": {"ftv1": encoded}
            })],
        );
        let (result, trace) = gateway
            .run(
                json!({
                    "kind": "QueryPlan",
                    "node": {"kind": "Fetch", "serviceName": "S", "operation": "{ me { id } }"}
                }),
                me_operation(&["id"]),
            )
            .await;

        let recorded = log.recorded();
        assert_eq!(
            recorded[0].headers.get(FEDERATED_TRACE_HEADER),
            Some(&FEDERATED_TRACE_FORMAT.to_string())
        );
        // The payload is consumed by the trace, not leaked to the client.
        assert!(result.extensions.is_none());

        let trace = trace.expect("trace tree must be produced");
        let fetch_trace = fetch_trace_of(&trace);
        assert_eq!(fetch_trace.service_name, "S");
        assert!(fetch_trace.sent_time.is_some());
        assert!(fetch_trace.received_time.is_some());
        assert!(!fetch_trace.trace_parsing_failed);
        let decoded = fetch_trace.trace.as_ref().expect("decoded subgraph trace");
        assert_eq!(decoded.root.as_ref().unwrap().child[0].parent_type, "Query");
    });
}

#[test]
fn undecodable_ftv1_only_flags_the_trace() {
    tokio_test::block_on(async {
        let mut gateway = Gateway::new();
        gateway.capture_trace = true;
        gateway.subgraph(
            "S",
            vec![json!({
                "data": {"me": {"id": "1"}},
                "extensions": {"ftv1": "!!! not base64 !!!"}
            })],
        );
        let (result, trace) = gateway
            .run(
                json!({
                    "kind": "QueryPlan",
                    "node": {"kind": "Fetch", "serviceName": "S", "operation": "{ me { id } }"}
                }),
                me_operation(&["id"]),
            )
            .await;
        assert!(result.errors.is_none());
        assert_eq!(result.data, Some(json!({"me": {"id": "1"}})));
        let trace = trace.expect("trace tree must be produced");
        let fetch_trace = fetch_trace_of(&trace);
        assert!(fetch_trace.trace_parsing_failed);
        assert!(fetch_trace.trace.is_none());
    });
}

#[test]
fn expose_query_plan_attaches_extension() {
    tokio_test::block_on(async {
        let mut gateway = Gateway::new();
        gateway.expose_query_plan = ExposeQueryPlanMode::DryRun;
        let log = gateway.subgraph("S", vec![json!({"data": {"me": {"id": "1"}}})]);
        let (result, trace) = gateway
            .run(
                json!({
                    "kind": "QueryPlan",
                    "node": {"kind": "Fetch", "serviceName": "S", "operation": "{ me { id } }"}
                }),
                me_operation(&["id"]),
            )
            .await;
        // Dry run plans but never executes.
        assert!(log.recorded().is_empty());
        assert!(trace.is_none());
        let extensions = result.extensions.expect("plan must be exposed");
        assert_eq!(
            extensions.get("queryPlan").and_then(|plan| plan.get("kind")),
            Some(&json!("QueryPlan"))
        );
    });
}

#[test]
fn subgraph_extensions_propagate_to_the_envelope() {
    tokio_test::block_on(async {
        let mut gateway = Gateway::new();
        gateway.subgraph(
            "S",
            vec![json!({
                "data": {"me": {"id": "1"}},
                "extensions": {"cost": 5}
            })],
        );
        let (result, _) = gateway
            .run(
                json!({
                    "kind": "QueryPlan",
                    "node": {"kind": "Fetch", "serviceName": "S", "operation": "{ me { id } }"}
                }),
                me_operation(&["id"]),
            )
            .await;
        assert_eq!(
            result.extensions.and_then(|extensions| extensions.get("cost").cloned()),
            Some(json!(5))
        );
    });
}
