use crate::response::ResponsePathSegment;

/// Request-scoped sink for signals the caller may want to aggregate.
/// Subgraph error paths are only reported here when the subgraph response
/// carried no FTv1 trace of its own (the trace already localizes them).
pub trait ExecutorMetrics: Send + Sync {
    fn record_subgraph_error_path(&self, _service_name: &str, _path: &[ResponsePathSegment]) {}
}

#[derive(Debug, Default)]
pub struct NoopMetrics;

impl ExecutorMetrics for NoopMetrics {}
