//! Federated fetch execution
//!
//! Runs the fetch groups of a [`FederatedPlan`] stage by stage and stitches
//! their answers into one response-shaped tree. The execution engine reads
//! service-owned fields from that tree instead of calling resolvers.

use super::directory::{
    ServiceDirectory, SubgraphError, SubgraphOperation, SubgraphRequest, SubgraphService,
};
use super::planner::{FederatedPlan, FetchGroup, FetchKind};
use super::reference::EntityReference;
use crate::core::path::{PathSegment, ResponsePath};
use crate::core::value::{canonical_json, deep_merge};
use crate::loader::{BatchFetcher, BatchKey, BatchLoader, BatchResults, FetcherRegistry};
use crate::plan::ExecutionPlan;
use crate::schema::SchemaRegistry;
use anyhow::{Result, anyhow};
use async_trait::async_trait;
use futures::future::join_all;
use indexmap::IndexMap;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

/// Values and failures of every service-owned field of a request
#[derive(Debug, Clone, PartialEq)]
pub struct FederatedData {
    pub data: Value,
    /// Failure messages by response path; the first failure at a path wins
    pub failures: HashMap<ResponsePath, String>,
}

impl Default for FederatedData {
    fn default() -> Self {
        Self {
            data: Value::Object(Map::new()),
            failures: HashMap::new(),
        }
    }
}

impl FederatedData {
    /// The fetched value at `path`, null when absent
    pub fn value_at(&self, path: &ResponsePath) -> Value {
        let mut current = &self.data;
        for segment in path.segments() {
            let next = match segment {
                PathSegment::Key(key) => current.get(key.as_str()),
                PathSegment::Index(index) => current.get(*index),
            };
            match next {
                Some(value) => current = value,
                None => return Value::Null,
            }
        }
        current.clone()
    }

    pub fn failure_at(&self, path: &ResponsePath) -> Option<&str> {
        self.failures.get(path).map(String::as_str)
    }

    fn record_failure(&mut self, path: ResponsePath, message: String) {
        self.failures.entry(path).or_insert(message);
    }

    fn value_at_mut(&mut self, path: &ResponsePath) -> Option<&mut Value> {
        let mut current = &mut self.data;
        for segment in path.segments() {
            current = match segment {
                PathSegment::Key(key) => current.get_mut(key.as_str())?,
                PathSegment::Index(index) => current.get_mut(*index)?,
            };
        }
        Some(current)
    }
}

/// What one fetch group produced
#[derive(Debug, Default)]
struct GroupOutcome {
    merges: Vec<(ResponsePath, Value)>,
    failures: Vec<(ResponsePath, String)>,
}

impl GroupOutcome {
    fn fail_all(paths: impl IntoIterator<Item = ResponsePath>, message: &str) -> Self {
        Self {
            merges: Vec::new(),
            failures: paths.into_iter().map(|path| (path, message.to_string())).collect(),
        }
    }
}

/// Runs federated plans against a service directory
pub struct FederationExecutor<'a> {
    schema: &'a SchemaRegistry,
    directory: &'a ServiceDirectory,
    max_batch_size: Option<usize>,
}

impl<'a> FederationExecutor<'a> {
    pub fn new(schema: &'a SchemaRegistry, directory: &'a ServiceDirectory) -> Self {
        Self {
            schema,
            directory,
            max_batch_size: None,
        }
    }

    /// Cap the number of representations per `_entities` call
    pub fn with_max_batch_size(mut self, size: Option<usize>) -> Self {
        self.max_batch_size = size;
        self
    }

    pub async fn execute(&self, plan: &ExecutionPlan, federated: &FederatedPlan) -> FederatedData {
        let mut out = FederatedData::default();
        for (index, stage) in federated.stages.iter().enumerate() {
            tracing::debug!(stage = index, groups = stage.len(), "running federation stage");
            let outcomes = join_all(
                stage
                    .iter()
                    .map(|id| self.run_group(plan, federated.group(*id), &out.data)),
            )
            .await;

            for outcome in outcomes {
                for (path, value) in outcome.merges {
                    if let Some(target) = out.value_at_mut(&path) {
                        deep_merge(target, value);
                    }
                }
                for (path, message) in outcome.failures {
                    out.record_failure(path, message);
                }
            }
        }
        out
    }

    async fn run_group(&self, plan: &ExecutionPlan, group: &FetchGroup, data: &Value) -> GroupOutcome {
        let Some(definition) = self.directory.get(&group.service) else {
            let message = format!("Unknown service '{}'", group.service);
            return GroupOutcome::fail_all(root_paths(plan, group), &message);
        };
        tracing::debug!(service = %group.service, group = group.id, "fetching from subgraph");

        match &group.kind {
            FetchKind::Root => self.run_root(plan, group, definition.service.as_ref()).await,
            FetchKind::Entity { type_name, fields } => {
                self.run_entities(plan, group, definition.service.clone(), type_name, fields, data)
                    .await
            }
        }
    }

    async fn run_root(&self, plan: &ExecutionPlan, group: &FetchGroup, service: &dyn SubgraphService) -> GroupOutcome {
        let request = SubgraphRequest {
            service: group.service.clone(),
            operation: SubgraphOperation::Root {
                kind: plan.operation(),
                selection: group.selection.clone(),
            },
            query: group.rendered.query.clone(),
            variables: group.rendered.variables.clone(),
        };

        let response = match service.execute(request).await {
            Ok(response) => response,
            Err(e) => {
                tracing::warn!(service = %group.service, error = %e, "subgraph request failed");
                let message = format!("Service '{}' failed: {}", group.service, e);
                return GroupOutcome::fail_all(root_paths(plan, group), &message);
            }
        };

        let mut outcome = GroupOutcome::default();
        let data = response.data.unwrap_or(Value::Null);
        let unpathed = scoped_errors(response.errors, &ResponsePath::root(), &mut outcome);
        if let Some(message) = unpathed {
            // Attribute an unscoped error to every field that came back empty
            for path in root_paths(plan, group) {
                if lookup(&data, &path).is_none_or(Value::is_null) {
                    outcome.failures.push((path, message.clone()));
                }
            }
        }
        if data.is_object() {
            outcome.merges.push((ResponsePath::root(), data));
        } else if outcome.failures.is_empty() {
            let message = format!("Service '{}' returned no data", group.service);
            outcome.failures.extend(root_paths(plan, group).map(|path| (path, message.clone())));
        }
        outcome
    }

    async fn run_entities(
        &self,
        plan: &ExecutionPlan,
        group: &FetchGroup,
        service: Arc<dyn SubgraphService>,
        type_name: &str,
        fields: &[(String, String)],
        data: &Value,
    ) -> GroupOutcome {
        let mut outcome = GroupOutcome::default();
        let responsible = |object: &ResponsePath| -> Vec<ResponsePath> {
            group
                .nodes
                .iter()
                .map(|id| object.key(plan.node(*id).response_key.clone()))
                .collect()
        };

        // Distinct representations, each with the objects that share it
        let mut references: IndexMap<String, (Value, Vec<ResponsePath>)> = IndexMap::new();
        for (path, object) in collect_objects(data, &group.position, ResponsePath::root()) {
            let concrete = object
                .get("__typename")
                .and_then(Value::as_str)
                .unwrap_or(type_name);
            if !self.schema.type_applies(type_name, concrete) {
                continue;
            }
            match EntityReference::from_object(&group.service, concrete, object, fields) {
                Ok(reference) => {
                    let representation = reference.representation();
                    references
                        .entry(canonical_json(&representation))
                        .or_insert_with(|| (representation, Vec::new()))
                        .1
                        .push(path);
                }
                Err(missing) => {
                    let message = format!(
                        "Cannot resolve {} from service '{}': field '{}' is unavailable",
                        concrete, group.service, missing
                    );
                    outcome
                        .failures
                        .extend(responsible(&path).into_iter().map(|p| (p, message.clone())));
                }
            }
        }
        if references.is_empty() {
            return outcome;
        }

        let fetcher = Arc::new(EntityBatchFetcher {
            service_name: group.service.clone(),
            service,
            group: group.clone(),
            nested: Mutex::new(Vec::new()),
        });
        let mut fetchers = FetcherRegistry::new();
        fetchers.register(type_name, fetcher.clone());
        let loader = BatchLoader::new(Arc::new(fetchers)).with_max_batch_size(self.max_batch_size);

        let keys = references
            .values()
            .map(|(representation, _)| BatchKey::new(type_name, representation.clone()))
            .collect();
        let results = loader.load_many(keys).await;

        for ((representation, paths), result) in references.values().zip(results) {
            match result {
                Ok(Value::Null) => {}
                Ok(entity) => {
                    for path in paths {
                        outcome.merges.push((path.clone(), entity.clone()));
                    }
                }
                Err(e) => {
                    tracing::debug!(entity = %representation, error = %e, "entity fetch failed");
                    let message = e.to_string();
                    for path in paths {
                        outcome
                            .failures
                            .extend(responsible(path).into_iter().map(|p| (p, message.clone())));
                    }
                }
            }
        }

        let nested = std::mem::take(&mut *fetcher.nested.lock().unwrap_or_else(PoisonError::into_inner));
        for (representation, rest, message) in nested {
            let Some((_, paths)) = references.get(&canonical_json(&representation)) else {
                continue;
            };
            for path in paths {
                outcome.failures.push((path.join(&rest), message.clone()));
            }
        }
        outcome
    }
}

/// Response paths of a root group's fields
fn root_paths<'p>(plan: &'p ExecutionPlan, group: &'p FetchGroup) -> impl Iterator<Item = ResponsePath> + 'p {
    group
        .nodes
        .iter()
        .map(|id| ResponsePath::root().key(plan.node(*id).response_key.clone()))
}

fn lookup<'v>(data: &'v Value, path: &ResponsePath) -> Option<&'v Value> {
    let mut current = data;
    for segment in path.segments() {
        current = match segment {
            PathSegment::Key(key) => current.get(key.as_str())?,
            PathSegment::Index(index) => current.get(*index)?,
        };
    }
    Some(current)
}

/// Record errors that carry a path below `base`; returns the message of
/// the first error that has none
fn scoped_errors(errors: Vec<SubgraphError>, base: &ResponsePath, outcome: &mut GroupOutcome) -> Option<String> {
    let mut unpathed = None;
    for error in errors {
        match error.path.as_deref().and_then(ResponsePath::from_json) {
            Some(path) if !path.is_empty() => outcome.failures.push((base.join(&path), error.message)),
            _ => {
                unpathed.get_or_insert(error.message);
            }
        }
    }
    unpathed
}

/// Objects reached by following `position` through `data`, lists flattened
fn collect_objects<'v>(
    data: &'v Value,
    position: &[String],
    path: ResponsePath,
) -> Vec<(ResponsePath, &'v Map<String, Value>)> {
    match data {
        Value::Array(items) => items
            .iter()
            .enumerate()
            .flat_map(|(index, item)| collect_objects(item, position, path.index(index)))
            .collect(),
        Value::Object(object) => match position.split_first() {
            None => vec![(path, object)],
            Some((key, rest)) => match object.get(key) {
                Some(child) => collect_objects(child, rest, path.key(key.clone())),
                None => Vec::new(),
            },
        },
        _ => Vec::new(),
    }
}

/// Batch fetcher that resolves representations through `_entities`
///
/// Errors scoped below one entity (`["_entities", i, ...]`) are kept aside
/// so only the failing field is nulled.
struct EntityBatchFetcher {
    service_name: String,
    service: Arc<dyn SubgraphService>,
    group: FetchGroup,
    nested: Mutex<Vec<(Value, ResponsePath, String)>>,
}

#[async_trait]
impl BatchFetcher for EntityBatchFetcher {
    async fn fetch(&self, entity_type: &str, keys: &[Value]) -> Result<BatchResults> {
        let mut variables = self.group.rendered.variables.clone();
        variables.insert("representations".to_string(), Value::Array(keys.to_vec()));
        let request = SubgraphRequest {
            service: self.service_name.clone(),
            operation: SubgraphOperation::Entities {
                type_name: entity_type.to_string(),
                representations: keys.to_vec(),
                selection: self.group.selection.clone(),
            },
            query: self.group.rendered.query.clone(),
            variables,
        };
        let response = self.service.execute(request).await?;

        let entities = response
            .data
            .as_ref()
            .and_then(|data| data.get("_entities"))
            .and_then(Value::as_array);
        let Some(entities) = entities else {
            let reason = response
                .errors
                .first()
                .map_or("no _entities in response", |e| e.message.as_str());
            return Err(anyhow!("Service '{}' failed: {}", self.service_name, reason));
        };

        let mut results = BatchResults::new();
        for (key, entity) in keys.iter().zip(entities) {
            results.insert(key, entity.clone());
        }

        for error in response.errors {
            let segments = error.path.clone().unwrap_or_default();
            let index = match segments.as_slice() {
                [root, index, ..] if root.as_str() == Some("_entities") => index.as_u64(),
                _ => None,
            };
            let key = index.and_then(|i| keys.get(i as usize));
            match (key, ResponsePath::from_json(segments.get(2..).unwrap_or_default())) {
                (Some(key), Some(rest)) if rest.is_empty() => results.fail(key, error.message),
                (Some(key), Some(rest)) => self
                    .nested
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .push((key.clone(), rest, error.message)),
                _ => tracing::warn!(
                    service = %self.service_name,
                    error = %error.message,
                    "subgraph error outside of any entity"
                ),
            }
        }
        Ok(results)
    }
}
