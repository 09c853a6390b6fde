//! Subgraphs reached over HTTP

use super::directory::{SubgraphRequest, SubgraphResponse, SubgraphService};
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::{Value, json};

/// POSTs `{ query, variables }` to a GraphQL endpoint
#[derive(Debug, Clone)]
pub struct HttpSubgraph {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpSubgraph {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self::with_client(reqwest::Client::new(), endpoint)
    }

    pub fn with_client(client: reqwest::Client, endpoint: impl Into<String>) -> Self {
        Self {
            client,
            endpoint: endpoint.into(),
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl SubgraphService for HttpSubgraph {
    async fn execute(&self, request: SubgraphRequest) -> Result<SubgraphResponse> {
        let body = request_body(&request);
        let response = self
            .client
            .post(&self.endpoint)
            .json(&body)
            .send()
            .await
            .with_context(|| format!("Failed to reach service '{}' at {}", request.service, self.endpoint))?
            .error_for_status()
            .with_context(|| format!("Service '{}' rejected the request", request.service))?;

        let bytes = response
            .bytes()
            .await
            .with_context(|| format!("Failed to read the response of service '{}'", request.service))?;
        decode_response(&request.service, &bytes)
    }
}

/// The standard GraphQL-over-HTTP request body
fn request_body(request: &SubgraphRequest) -> Value {
    json!({
        "query": request.query,
        "variables": request.variables,
    })
}

fn decode_response(service: &str, body: &[u8]) -> Result<SubgraphResponse> {
    serde_json::from_slice(body).with_context(|| format!("Service '{}' returned an invalid response", service))
}
