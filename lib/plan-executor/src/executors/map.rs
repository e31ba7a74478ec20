use std::collections::HashMap;
use std::sync::Arc;

use tracing::instrument;

use crate::executors::common::{
    SubgraphExecutionRequest, SubgraphExecutor, SubgraphExecutorBoxedArc, SubgraphExecutorError,
};
use crate::executors::http::HttpSubgraphExecutor;
use crate::response::SubgraphResponse;

/// Subgraph data sources keyed by service name, shared by all fetches of a
/// request. Read-only once built.
#[derive(Default)]
pub struct SubgraphExecutorMap {
    inner: HashMap<String, SubgraphExecutorBoxedArc>,
}

impl SubgraphExecutorMap {
    pub fn new() -> Self {
        Self::default()
    }

    #[instrument(level = "trace", name = "subgraph_execute", skip_all, fields(subgraph_name = %subgraph_name))]
    pub async fn execute(
        &self,
        subgraph_name: &str,
        execution_request: SubgraphExecutionRequest<'_>,
    ) -> Result<SubgraphResponse, SubgraphExecutorError> {
        match self.inner.get(subgraph_name) {
            Some(executor) => executor.execute(execution_request).await,
            None => Err(SubgraphExecutorError::MissingService {
                service: subgraph_name.to_string(),
            }),
        }
    }

    pub fn contains(&self, subgraph_name: &str) -> bool {
        self.inner.contains_key(subgraph_name)
    }

    pub fn insert_boxed_arc(&mut self, subgraph_name: String, boxed_arc: SubgraphExecutorBoxedArc) {
        self.inner.insert(subgraph_name, boxed_arc);
    }

    pub fn from_http_endpoint_map(subgraph_endpoint_map: HashMap<String, String>) -> Self {
        let http_client = Arc::new(reqwest::Client::new());
        let inner = subgraph_endpoint_map
            .into_iter()
            .map(|(subgraph_name, endpoint)| {
                let executor =
                    HttpSubgraphExecutor::new(subgraph_name.clone(), endpoint, http_client.clone());
                (subgraph_name, executor.to_boxed_arc())
            })
            .collect();
        SubgraphExecutorMap { inner }
    }
}
