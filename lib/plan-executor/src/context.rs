use std::collections::HashMap;
use std::time::Instant;

use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::executors::map::SubgraphExecutorMap;
use crate::metrics::ExecutorMetrics;
use crate::schema_metadata::SchemaMetadata;

/// Per-request state shared by every plan node execution. Everything here
/// is read-only during the plan walk; errors and extensions accumulate in
/// the node outcomes instead.
pub struct ExecutionContext<'exec> {
    pub variable_values: &'exec Option<HashMap<String, Value>>,
    /// Supergraph tables; drive representation extraction and rewrites.
    pub schema_metadata: &'exec SchemaMetadata,
    pub executors: &'exec SubgraphExecutorMap,
    /// Headers attached to every outgoing subgraph request.
    pub subgraph_headers: &'exec HashMap<String, String>,
    pub cancellation: &'exec CancellationToken,
    pub metrics: &'exec dyn ExecutorMetrics,
    /// When set, fetches opt into FTv1 traces and record timings.
    pub capture_trace: bool,
    pub request_start: Instant,
}
