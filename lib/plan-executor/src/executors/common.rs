use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::response::SubgraphResponse;

/// Header requesting an FTv1 trace from a federation-aware subgraph.
pub const FEDERATED_TRACE_HEADER: &str = "apollo-federation-include-trace";
pub const FEDERATED_TRACE_FORMAT: &str = "ftv1";

#[async_trait]
pub trait SubgraphExecutor {
    async fn execute(
        &self,
        execution_request: SubgraphExecutionRequest<'_>,
    ) -> Result<SubgraphResponse, SubgraphExecutorError>;

    fn to_boxed_arc<'a>(self) -> Arc<Box<dyn SubgraphExecutor + Send + Sync + 'a>>
    where
        Self: Sized + Send + Sync + 'a,
    {
        Arc::new(Box::new(self))
    }
}

pub type SubgraphExecutorType = dyn SubgraphExecutor + Send + Sync;

pub type SubgraphExecutorBoxedArc = Arc<Box<SubgraphExecutorType>>;

#[derive(Debug, Clone)]
pub struct SubgraphExecutionRequest<'a> {
    pub query: &'a str,
    pub operation_name: Option<&'a str>,
    pub variables: Option<Map<String, Value>>,
    pub headers: HashMap<String, String>,
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum SubgraphExecutorError {
    #[error("service '{service}' was not found in the service map")]
    MissingService { service: String },
    #[error("request to subgraph '{service}' failed: {reason}")]
    Http { service: String, reason: String },
    #[error("subgraph '{service}' returned a malformed response: {reason}")]
    MalformedResponse { service: String, reason: String },
}
