//! Subgraph services and the directory that names them

use super::selection::Selection;
use crate::plan::OperationKind;
use anyhow::Result;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;

/// What a sub-query asks for, in structured form
///
/// Mirrors the rendered `query` text, so in-process services can answer
/// without parsing GraphQL.
#[derive(Debug, Clone, PartialEq)]
pub enum SubgraphOperation {
    Root {
        kind: OperationKind,
        selection: Selection,
    },
    Entities {
        type_name: String,
        representations: Vec<Value>,
        selection: Selection,
    },
}

/// One sub-query sent to a service
#[derive(Debug, Clone, PartialEq)]
pub struct SubgraphRequest {
    pub service: String,
    pub operation: SubgraphOperation,
    /// GraphQL text of the sub-query
    pub query: String,
    /// Argument variables, plus `representations` for entity queries
    pub variables: Map<String, Value>,
}

/// An error reported by a subgraph
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct SubgraphError {
    pub message: String,
    #[serde(default)]
    pub path: Option<Vec<Value>>,
}

impl SubgraphError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            path: None,
        }
    }

    pub fn at(mut self, path: Vec<Value>) -> Self {
        self.path = Some(path);
        self
    }
}

/// A subgraph's answer, in the GraphQL response format
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct SubgraphResponse {
    #[serde(default)]
    pub data: Option<Value>,
    #[serde(default)]
    pub errors: Vec<SubgraphError>,
}

impl SubgraphResponse {
    pub fn data(data: Value) -> Self {
        Self {
            data: Some(data),
            errors: Vec::new(),
        }
    }

    pub fn with_error(mut self, error: SubgraphError) -> Self {
        self.errors.push(error);
        self
    }
}

/// Executes sub-queries for one service
///
/// An `Err` fails every field the sub-query was responsible for; errors
/// inside a successful response are scoped to their paths.
#[async_trait]
pub trait SubgraphService: Send + Sync {
    async fn execute(&self, request: SubgraphRequest) -> Result<SubgraphResponse>;
}

/// A registered service
#[derive(Clone)]
pub struct ServiceDefinition {
    pub name: String,
    pub endpoint: Option<String>,
    pub service: Arc<dyn SubgraphService>,
}

impl std::fmt::Debug for ServiceDefinition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceDefinition")
            .field("name", &self.name)
            .field("endpoint", &self.endpoint)
            .finish()
    }
}

/// Service name → subgraph, fixed when the engine is built
#[derive(Debug, Clone, Default)]
pub struct ServiceDirectory {
    services: HashMap<String, ServiceDefinition>,
}

impl ServiceDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &mut self,
        name: impl Into<String>,
        endpoint: Option<String>,
        service: Arc<dyn SubgraphService>,
    ) {
        let name = name.into();
        self.services.insert(
            name.clone(),
            ServiceDefinition {
                name,
                endpoint,
                service,
            },
        );
    }

    pub fn get(&self, name: &str) -> Option<&ServiceDefinition> {
        self.services.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.services.contains_key(name)
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.services.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.services.len()
    }

    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }
}
