//! In-process subgraph backed by JSON values, for tests and demos

use super::directory::{SubgraphOperation, SubgraphRequest, SubgraphResponse, SubgraphService};
use anyhow::{Result, anyhow};
use async_trait::async_trait;
use serde_json::{Map, Value, json};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

#[derive(Default)]
struct Entities {
    keys: Vec<String>,
    values: Vec<Value>,
}

/// Answers root queries from one JSON object and entity queries from
/// per-type entity lists, matched on their key fields
///
/// Records every request it receives.
#[derive(Clone, Default)]
pub struct InMemorySubgraph {
    root: Arc<RwLock<Map<String, Value>>>,
    entities: Arc<RwLock<HashMap<String, Entities>>>,
    requests: Arc<RwLock<Vec<SubgraphRequest>>>,
    latency: Option<Duration>,
    unavailable: Arc<AtomicBool>,
}

impl InMemorySubgraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delay every answer
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Value of a root field
    pub fn with_root(self, field: impl Into<String>, value: Value) -> Result<Self> {
        self.root
            .write()
            .map_err(|e| anyhow!("Failed to acquire write lock: {}", e))?
            .insert(field.into(), value);
        Ok(self)
    }

    /// Entities of `type_name`, looked up by the `keys` fields of incoming
    /// representations
    pub fn with_entities(self, type_name: &str, keys: &[&str], values: Vec<Value>) -> Result<Self> {
        let mut entities = self
            .entities
            .write()
            .map_err(|e| anyhow!("Failed to acquire write lock: {}", e))?;
        let entry = entities.entry(type_name.to_string()).or_default();
        entry.keys = keys.iter().map(|key| key.to_string()).collect();
        entry.values.extend(values);
        drop(entities);
        Ok(self)
    }

    /// Fail every request from now on
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    pub fn requests(&self) -> Result<Vec<SubgraphRequest>> {
        Ok(self
            .requests
            .read()
            .map_err(|e| anyhow!("Failed to acquire read lock: {}", e))?
            .clone())
    }

    fn find_entity(&self, type_name: &str, representation: &Value) -> Result<Value> {
        let entities = self
            .entities
            .read()
            .map_err(|e| anyhow!("Failed to acquire read lock: {}", e))?;
        let Some(entities) = entities.get(type_name) else {
            return Ok(Value::Null);
        };
        let found = entities.values.iter().find(|entity| {
            entities
                .keys
                .iter()
                .all(|key| representation.get(key).is_some() && entity.get(key) == representation.get(key))
        });
        Ok(found.cloned().unwrap_or(Value::Null))
    }
}

#[async_trait]
impl SubgraphService for InMemorySubgraph {
    async fn execute(&self, request: SubgraphRequest) -> Result<SubgraphResponse> {
        self.requests
            .write()
            .map_err(|e| anyhow!("Failed to acquire write lock: {}", e))?
            .push(request.clone());

        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(anyhow!("Service '{}' is unavailable", request.service));
        }

        match &request.operation {
            SubgraphOperation::Root { selection, .. } => {
                let root = self
                    .root
                    .read()
                    .map_err(|e| anyhow!("Failed to acquire read lock: {}", e))?
                    .clone();
                Ok(SubgraphResponse::data(selection.project(&Value::Object(root))))
            }
            SubgraphOperation::Entities {
                type_name,
                representations,
                selection,
            } => {
                let mut entities = Vec::with_capacity(representations.len());
                for representation in representations {
                    let entity = self.find_entity(type_name, representation)?;
                    entities.push(if entity.is_null() {
                        Value::Null
                    } else {
                        selection.project(&entity)
                    });
                }
                Ok(SubgraphResponse::data(json!({ "_entities": entities })))
            }
        }
    }
}

impl std::fmt::Debug for InMemorySubgraph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemorySubgraph")
            .field("latency", &self.latency)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::federation::selection::{SelectedField, Selection};
    use crate::plan::OperationKind;

    fn selection(names: &[&str]) -> Selection {
        let mut selection = Selection::default();
        for name in names {
            selection.push(SelectedField::hidden(name, name, None));
        }
        selection
    }

    #[tokio::test]
    async fn test_answers_entities_by_key() {
        let subgraph = InMemorySubgraph::new()
            .with_entities(
                "Book",
                &["id"],
                vec![json!({"id": "1", "reviews": ["great"]}), json!({"id": "2", "reviews": []})],
            )
            .unwrap();
        let response = subgraph
            .execute(SubgraphRequest {
                service: "reviews".into(),
                operation: SubgraphOperation::Entities {
                    type_name: "Book".into(),
                    representations: vec![
                        json!({"__typename": "Book", "id": "2"}),
                        json!({"__typename": "Book", "id": "9"}),
                    ],
                    selection: selection(&["reviews"]),
                },
                query: String::new(),
                variables: Map::new(),
            })
            .await
            .unwrap();
        assert_eq!(response.data, Some(json!({"_entities": [{"reviews": []}, null]})));
        assert_eq!(subgraph.requests().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_unavailable() {
        let subgraph = InMemorySubgraph::new().with_root("hello", json!("world")).unwrap();
        let request = SubgraphRequest {
            service: "greetings".into(),
            operation: SubgraphOperation::Root {
                kind: OperationKind::Query,
                selection: selection(&["hello"]),
            },
            query: String::new(),
            variables: Map::new(),
        };
        let response = subgraph.execute(request.clone()).await.unwrap();
        assert_eq!(response.data, Some(json!({"hello": "world"})));

        subgraph.set_unavailable(true);
        assert!(subgraph.execute(request).await.is_err());
    }
}
