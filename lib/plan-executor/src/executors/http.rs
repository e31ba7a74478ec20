use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::{error, instrument, trace};

use crate::executors::common::{
    SubgraphExecutionRequest, SubgraphExecutor, SubgraphExecutorError,
};
use crate::response::SubgraphResponse;

pub struct HttpSubgraphExecutor {
    pub service_name: String,
    pub endpoint: String,
    http_client: Arc<reqwest::Client>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct HttpRequestBody<'a> {
    query: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    operation_name: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    variables: Option<&'a Map<String, Value>>,
}

impl HttpSubgraphExecutor {
    pub fn new(service_name: String, endpoint: String, http_client: Arc<reqwest::Client>) -> Self {
        HttpSubgraphExecutor {
            service_name,
            endpoint,
            http_client,
        }
    }

    async fn post(
        &self,
        execution_request: &SubgraphExecutionRequest<'_>,
    ) -> Result<SubgraphResponse, SubgraphExecutorError> {
        let body = HttpRequestBody {
            query: execution_request.query,
            operation_name: execution_request.operation_name,
            variables: execution_request.variables.as_ref(),
        };

        let mut request = self
            .http_client
            .post(&self.endpoint)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .json(&body);
        for (name, value) in &execution_request.headers {
            request = request.header(name.as_str(), value.as_str());
        }

        let response = request
            .send()
            .await
            .map_err(|e| SubgraphExecutorError::Http {
                service: self.service_name.clone(),
                reason: e.to_string(),
            })?;

        let response_bytes = response
            .bytes()
            .await
            .map_err(|e| SubgraphExecutorError::Http {
                service: self.service_name.clone(),
                reason: e.to_string(),
            })?;

        serde_json::from_slice::<SubgraphResponse>(&response_bytes).map_err(|e| {
            SubgraphExecutorError::MalformedResponse {
                service: self.service_name.clone(),
                reason: e.to_string(),
            }
        })
    }
}

#[async_trait]
impl SubgraphExecutor for HttpSubgraphExecutor {
    #[instrument(level = "trace", skip_all, name = "http_subgraph_execute", fields(endpoint = %self.endpoint))]
    async fn execute(
        &self,
        execution_request: SubgraphExecutionRequest<'_>,
    ) -> Result<SubgraphResponse, SubgraphExecutorError> {
        self.post(&execution_request).await.map_err(|e| {
            error!("subgraph request failed: {}", e);
            trace!("failed request body: {:?}", execution_request);
            e
        })
    }
}
