//! Level-synchronous plan execution
//!
//! Fields run in waves. A wave is every field whose parent value is known;
//! completing a wave's values yields the next wave. Inside a wave, async
//! resolvers run concurrently on one `FuturesUnordered` while the executor
//! watches the batch loader: once every running resolver is parked on a
//! pending load, the loader dispatches one fetch per entity type.
//!
//! Completions are applied in task order, not arrival order, so errors and
//! null propagation do not depend on scheduling.

use super::tree::{FieldState, ResultTree, SlotId};
use crate::core::cancellation::Interruption;
use crate::core::context::RequestContext;
use crate::core::error::{EngineError, LoadError};
use crate::core::path::ResponsePath;
use crate::core::response::FieldError;
use crate::core::value::property;
use crate::federation::{FederatedData, FederatedPlan, FederationExecutor};
use crate::loader::TaskId;
use crate::plan::{ExecutionPlan, NodeId, OperationKind, PlanNode};
use crate::schema::{ResolverContext, SchemaRegistry, TypeDescriptor, TypeKind, TypeRef};
use futures::future::BoxFuture;
use futures::stream::{FuturesUnordered, StreamExt};
use futures::FutureExt;
use indexmap::IndexMap;
use serde_json::{Number, Value};
use std::sync::Arc;

/// Result of executing a plan
#[derive(Debug, Clone)]
pub struct ExecutionOutcome {
    pub data: Value,
    pub errors: Vec<FieldError>,
    /// Set when execution stopped early; pending fields were nulled
    pub interrupted: Option<Interruption>,
}

#[derive(Debug)]
struct Failure {
    message: String,
    code: &'static str,
}

impl Failure {
    fn new(message: impl Into<String>, code: &'static str) -> Self {
        Self {
            message: message.into(),
            code,
        }
    }

    fn from_resolver(err: anyhow::Error) -> Self {
        let code = err
            .downcast_ref::<LoadError>()
            .map_or("RESOLVER_ERROR", LoadError::error_code);
        Self::new(err.to_string(), code)
    }
}

type Outcome = Result<Value, Failure>;

/// One field of the current wave
///
/// `nodes` holds every plan node merged under the slot's response key; the
/// first one carries the field and arguments, all of them contribute
/// children.
struct FieldTask<'a> {
    slot: SlotId,
    nodes: Vec<NodeId>,
    parent_value: Arc<Value>,
    parent_type: &'a TypeDescriptor,
    path: ResponsePath,
}

/// Executes one compiled plan for one request
pub struct Executor<'a> {
    schema: &'a SchemaRegistry,
    plan: &'a ExecutionPlan,
    ctx: &'a RequestContext,
    prefetched: Option<FederatedData>,
    federation: Option<FederationExecutor<'a>>,
    tree: ResultTree,
    errors: Vec<FieldError>,
    interrupted: Option<Interruption>,
    next_task: u64,
}

impl<'a> Executor<'a> {
    pub fn new(schema: &'a SchemaRegistry, plan: &'a ExecutionPlan, ctx: &'a RequestContext) -> Self {
        Self {
            schema,
            plan,
            ctx,
            prefetched: None,
            federation: None,
            tree: ResultTree::new(),
            errors: Vec::new(),
            interrupted: None,
            next_task: 0,
        }
    }

    /// Values of service-owned fields, fetched ahead of execution
    pub fn with_prefetched(mut self, data: FederatedData) -> Self {
        self.prefetched = Some(data);
        self
    }

    /// Runs the per-root federated fetches of a mutation
    pub fn with_federation(mut self, federation: FederationExecutor<'a>) -> Self {
        self.federation = Some(federation);
        self
    }

    pub async fn execute(mut self) -> ExecutionOutcome {
        let schema = self.schema;
        let plan = self.plan;

        let root_type = match schema.resolve_type(plan.root_type()) {
            Ok(ty) => &**ty,
            Err(e) => {
                tracing::error!(error = %e, "root type missing from the registry");
                let err = EngineError::Internal(e.to_string());
                self.errors
                    .push(FieldError::new(err.to_string(), ResponsePath::root()).with_code(err.error_code()));
                return self.finish();
            }
        };

        let root_value = Arc::new(Value::Object(Default::default()));
        let root = self.tree.root();
        let groups = self.collect_fields(plan.roots().iter().copied(), &root_type.name);
        let tasks = self.spawn_children(root, groups, root_value, root_type, &ResponsePath::root());

        match plan.operation() {
            OperationKind::Query => self.run_to_completion(tasks).await,
            OperationKind::Mutation => {
                // Each root mutation and its whole subtree finish before
                // the next one starts; a service-owned root is fetched here
                for task in tasks {
                    if let Some(federated) = plan.root_federation(task.nodes[0]) {
                        self.prefetched = self.fetch_root(federated).await;
                    }
                    self.run_to_completion(vec![task]).await;
                }
            }
        }
        self.finish()
    }

    /// Run the federated fetches of one mutation root, unless interrupted
    async fn fetch_root(&mut self, federated: &FederatedPlan) -> Option<FederatedData> {
        if self.interrupted.is_some() {
            return None;
        }
        let ctx = self.ctx;
        let plan = self.plan;
        let fetched = {
            let federation = self.federation.as_ref()?;
            tokio::select! {
                biased;
                reason = ctx.cancellation().interrupted() => Err(reason),
                data = federation.execute(plan, federated) => Ok(data),
            }
        };
        match fetched {
            Ok(data) => Some(data),
            Err(reason) => {
                tracing::debug!(?reason, "federated mutation abandoned");
                self.interrupted = Some(reason);
                ctx.loader().cancel();
                None
            }
        }
    }

    fn finish(mut self) -> ExecutionOutcome {
        if self.interrupted.is_some() {
            let nulled = self.tree.null_pending();
            tracing::debug!(nulled, "nulled unfinished fields after interruption");
        }
        ExecutionOutcome {
            data: self.tree.into_value(),
            errors: self.errors,
            interrupted: self.interrupted,
        }
    }

    async fn run_to_completion(&mut self, mut wave: Vec<FieldTask<'a>>) {
        while !wave.is_empty() {
            wave = self.run_wave(wave).await;
        }
    }

    async fn run_wave(&mut self, tasks: Vec<FieldTask<'a>>) -> Vec<FieldTask<'a>> {
        if self.interrupted.is_none() {
            self.interrupted = self.ctx.cancellation().check();
            if self.interrupted.is_some() {
                self.ctx.loader().cancel();
            }
        }

        let mut outcomes: Vec<Option<Outcome>> = tasks.iter().map(|_| None).collect();
        let mut running = FuturesUnordered::new();

        for (index, task) in tasks.iter().enumerate() {
            if !self.tree.is_live(task.slot) {
                continue;
            }
            if let Some(outcome) = self.immediate(task) {
                self.tree.set_state(task.slot, FieldState::Running);
                outcomes[index] = Some(outcome);
            } else if self.interrupted.is_none() {
                self.tree.set_state(task.slot, FieldState::Running);
                running.push(self.resolve(index, task));
            }
        }

        if !running.is_empty() {
            tracing::trace!(resolvers = running.len(), "running wave");
            self.drive(&mut running, &mut outcomes).await;
        }

        let plan = self.plan;
        let mut next = Vec::new();
        for (task, outcome) in tasks.into_iter().zip(outcomes) {
            // Not run, or abandoned after an interruption: stays pending
            let Some(outcome) = outcome else { continue };
            let node = task.nodes[0];
            // An earlier sibling already nulled an ancestor: the error is
            // still reported, but nothing is written or bubbled
            if !self.tree.is_live(task.slot) {
                if let Err(failure) = outcome {
                    self.report(task.path.clone(), node, failure);
                }
                continue;
            }
            let completed = outcome.and_then(|value| {
                let ty = &plan.node(node).ty;
                self.complete_value(&task, task.slot, ty, value, &task.path, &mut next)
            });
            match completed {
                Ok(()) => self.tree.set_state(task.slot, FieldState::Succeeded),
                Err(failure) => self.fail(task.slot, task.path.clone(), node, failure),
            }
        }
        next
    }

    /// Poll resolvers and the batch loader until the wave settles
    async fn drive(
        &mut self,
        running: &mut FuturesUnordered<BoxFuture<'a, (usize, Outcome)>>,
        outcomes: &mut [Option<Outcome>],
    ) {
        let ctx = self.ctx;
        let loader = ctx.loader();
        let cancellation = ctx.cancellation();
        let mut dispatch: Option<BoxFuture<'a, ()>> = None;

        while !running.is_empty() || dispatch.is_some() {
            tokio::select! {
                biased;
                reason = cancellation.interrupted() => {
                    tracing::debug!(?reason, "execution interrupted");
                    self.interrupted = Some(reason);
                    break;
                }
                _ = poll_dispatch(&mut dispatch), if dispatch.is_some() => {
                    dispatch = None;
                }
                Some((index, outcome)) = running.next(), if !running.is_empty() => {
                    outcomes[index] = Some(outcome);
                }
                _ = loader.blocked_changed() => {}
            }

            if dispatch.is_none() && loader.should_dispatch(running.len()) {
                dispatch = Some(loader.dispatch().boxed());
            }
        }

        if self.interrupted.is_some() {
            running.clear();
            drop(dispatch);
            loader.cancel();
        }
    }

    /// Tasks that need no resolver call
    fn immediate(&self, task: &FieldTask<'a>) -> Option<Outcome> {
        let node = self.plan.node(task.nodes[0]);
        let Some(field) = &node.field else {
            return Some(Ok(Value::String(task.parent_type.name.clone())));
        };

        if let Some(service) = &node.service {
            return match &self.prefetched {
                Some(data) => Some(match data.failure_at(&task.path) {
                    Some(message) => Err(Failure::new(message, "SUBGRAPH_REQUEST_FAILED")),
                    None => Ok(data.value_at(&task.path)),
                }),
                None if self.interrupted.is_some() => None,
                None => Some(Err(Failure::new(
                    format!("Service '{}' was not queried", service),
                    "SUBGRAPH_REQUEST_FAILED",
                ))),
            };
        }

        match field.resolver_binding() {
            Some(_) => None,
            None => Some(Ok(property(&task.parent_value, &node.field_name))),
        }
    }

    fn resolve(&mut self, index: usize, task: &FieldTask<'a>) -> BoxFuture<'a, (usize, Outcome)> {
        let plan: &'a ExecutionPlan = self.plan;
        let node: &'a PlanNode = plan.node(task.nodes[0]);
        let parent_type: &'a TypeDescriptor = task.parent_type;
        self.next_task += 1;

        let ctx = ResolverContext::new(
            task.parent_value.clone(),
            &node.arguments,
            self.ctx,
            &node.field_name,
            &parent_type.name,
            task.path.clone(),
            TaskId::new(self.next_task),
        );
        let resolver = node.field.as_ref().and_then(|field| field.resolver_binding());

        async move {
            let outcome = match resolver {
                Some(resolver) => resolver.resolve(ctx).await.map_err(Failure::from_resolver),
                None => Ok(property(ctx.parent(), ctx.field_name())),
            };
            (index, outcome)
        }
        .boxed()
    }

    fn fail(&mut self, slot: SlotId, path: ResponsePath, node: NodeId, failure: Failure) {
        self.tree.set_state(slot, FieldState::Failed);
        self.report(path, node, failure);
        self.tree.set_null(slot);
    }

    fn report(&mut self, path: ResponsePath, node: NodeId, failure: Failure) {
        tracing::debug!(path = %path, code = failure.code, error = %failure.message, "field failed");
        self.errors.push(
            FieldError::new(failure.message, path)
                .with_node(node)
                .with_code(failure.code),
        );
    }

    /// Write a resolved value into `slot`, queueing child fields on `next`
    ///
    /// Errors for list items are recorded here at the item's path; an error
    /// for the slot itself is returned to the caller.
    fn complete_value(
        &mut self,
        task: &FieldTask<'a>,
        slot: SlotId,
        ty: &TypeRef,
        value: Value,
        path: &ResponsePath,
        next: &mut Vec<FieldTask<'a>>,
    ) -> Result<(), Failure> {
        match ty {
            TypeRef::NonNull(inner) => {
                if value.is_null() {
                    let node = self.plan.node(task.nodes[0]);
                    return Err(Failure::new(
                        format!(
                            "Cannot return null for non-nullable field {}.{}",
                            task.parent_type.name, node.field_name
                        ),
                        "NULL_VALUE",
                    ));
                }
                self.complete_value(task, slot, inner, value, path, next)
            }
            _ if value.is_null() => {
                self.tree.set_leaf(slot, Value::Null);
                Ok(())
            }
            TypeRef::List(inner) => {
                let Value::Array(items) = value else {
                    return Err(Failure::new(
                        format!("Expected a list for field at {}", path),
                        "INVALID_VALUE",
                    ));
                };
                let slots = self.tree.set_list(slot, items.len(), inner.is_non_null());
                for (index, (item_slot, item)) in slots.into_iter().zip(items).enumerate() {
                    // A non-null item failed and took the list with it
                    if !self.tree.is_live(item_slot) {
                        break;
                    }
                    let item_path = path.index(index);
                    if let Err(failure) = self.complete_value(task, item_slot, inner, item, &item_path, next) {
                        self.fail(item_slot, item_path, task.nodes[0], failure);
                    }
                }
                Ok(())
            }
            TypeRef::Named(name) => {
                let schema = self.schema;
                let named = schema.resolve_type(name).map_err(|e| {
                    tracing::error!(error = %e, "field type missing from the registry");
                    let err = EngineError::Internal(e.to_string());
                    Failure::new(err.to_string(), err.error_code())
                })?;
                match named.kind {
                    TypeKind::Scalar => {
                        let coerced = coerce_scalar(name, value)?;
                        self.tree.set_leaf(slot, coerced);
                        Ok(())
                    }
                    TypeKind::Enum => match &value {
                        Value::String(s) if named.enum_values.iter().any(|v| v == s) => {
                            self.tree.set_leaf(slot, value);
                            Ok(())
                        }
                        _ => Err(Failure::new(
                            format!("Enum \"{}\" cannot represent value: {}", name, value),
                            "INVALID_VALUE",
                        )),
                    },
                    TypeKind::Object | TypeKind::Interface | TypeKind::Union => {
                        let concrete = self.concrete_type(named, &value)?;
                        let groups = self.collect_fields(
                            task.nodes
                                .iter()
                                .flat_map(|id| self.plan.node(*id).children.iter().copied()),
                            &concrete.name,
                        );
                        self.tree.set_object(slot);
                        next.extend(self.spawn_children(slot, groups, Arc::new(value), concrete, path));
                        Ok(())
                    }
                    TypeKind::InputObject => Err(Failure::new(
                        format!("Input type {} cannot be an output", name),
                        "INVALID_VALUE",
                    )),
                }
            }
        }
    }

    fn concrete_type(&self, declared: &'a TypeDescriptor, value: &Value) -> Result<&'a TypeDescriptor, Failure> {
        let schema: &'a SchemaRegistry = self.schema;
        let Some(name) = declared.resolve_concrete_type(value) else {
            return Err(Failure::new(
                format!(
                    "Abstract type {} must resolve to an object type at runtime",
                    declared.name
                ),
                "ABSTRACT_TYPE_UNRESOLVED",
            ));
        };
        if declared.kind.is_abstract() && !schema.is_possible_type(&declared.name, &name) {
            return Err(Failure::new(
                format!("Runtime type {} is not a possible type of {}", name, declared.name),
                "ABSTRACT_TYPE_UNRESOLVED",
            ));
        }
        match schema.get_type(&name) {
            Some(ty) if ty.kind == TypeKind::Object => Ok(ty.as_ref()),
            _ => Err(Failure::new(
                format!("Runtime type {} is not an object type", name),
                "ABSTRACT_TYPE_UNRESOLVED",
            )),
        }
    }

    /// Group child nodes by response key, keeping those whose type
    /// conditions all apply to `concrete`
    fn collect_fields(
        &self,
        children: impl Iterator<Item = NodeId>,
        concrete: &str,
    ) -> IndexMap<String, Vec<NodeId>> {
        let mut groups: IndexMap<String, Vec<NodeId>> = IndexMap::new();
        for id in children {
            let node = self.plan.node(id);
            let applies = node
                .type_conditions
                .iter()
                .all(|condition| self.schema.type_applies(condition, concrete));
            if applies {
                groups.entry(node.response_key.clone()).or_default().push(id);
            }
        }
        groups
    }

    fn spawn_children(
        &mut self,
        slot: SlotId,
        groups: IndexMap<String, Vec<NodeId>>,
        parent_value: Arc<Value>,
        parent_type: &'a TypeDescriptor,
        path: &ResponsePath,
    ) -> Vec<FieldTask<'a>> {
        groups
            .into_iter()
            .map(|(key, nodes)| {
                let non_null = self.plan.node(nodes[0]).is_non_null();
                let child = self.tree.add_field(slot, key.clone(), non_null);
                FieldTask {
                    slot: child,
                    nodes,
                    parent_value: parent_value.clone(),
                    parent_type,
                    path: path.key(key),
                }
            })
            .collect()
    }
}

async fn poll_dispatch(dispatch: &mut Option<BoxFuture<'_, ()>>) {
    match dispatch {
        Some(fut) => fut.await,
        None => std::future::pending().await,
    }
}

/// Serialize a resolved value as a built-in scalar
///
/// Custom scalars pass through unchanged.
fn coerce_scalar(name: &str, value: Value) -> Result<Value, Failure> {
    let invalid = |value: &Value| {
        Failure::new(
            format!("{} cannot represent value: {}", name, value),
            "INVALID_VALUE",
        )
    };
    match name {
        "Int" => {
            let int = match &value {
                Value::Number(n) => n.as_i64().or_else(|| {
                    n.as_f64()
                        .filter(|f| f.fract() == 0.0)
                        .map(|f| f as i64)
                }),
                _ => None,
            };
            match int.filter(|i| i32::try_from(*i).is_ok()) {
                Some(i) => Ok(Value::from(i)),
                None => Err(invalid(&value)),
            }
        }
        "Float" => match value.as_f64().and_then(Number::from_f64) {
            Some(n) => Ok(Value::Number(n)),
            None => Err(invalid(&value)),
        },
        "String" => match value {
            Value::String(_) => Ok(value),
            Value::Number(n) => Ok(Value::String(n.to_string())),
            Value::Bool(b) => Ok(Value::String(b.to_string())),
            other => Err(invalid(&other)),
        },
        "Boolean" => match value {
            Value::Bool(_) => Ok(value),
            other => Err(invalid(&other)),
        },
        "ID" => match &value {
            Value::String(_) => Ok(value),
            Value::Number(n) if n.is_i64() || n.is_u64() => Ok(Value::String(n.to_string())),
            _ => Err(invalid(&value)),
        },
        _ => Ok(value),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::cancellation::Cancellation;
    use crate::core::context::Extensions;
    use crate::loader::{BatchLoader, FetcherRegistry};
    use crate::plan::QueryPlanCompiler;
    use crate::schema::{FieldDescriptor, SchemaBuilder};
    use serde_json::{Map, json};

    fn bookshelf() -> SchemaRegistry {
        SchemaBuilder::new()
            .register(
                TypeDescriptor::object("Query")
                    .field(FieldDescriptor::new("book", "Book").resolve_sync(|_ctx| Ok(json!({"title": "Dune"})))),
            )
            .register(TypeDescriptor::object("Book").field(FieldDescriptor::new("title", "String")))
            .build()
            .unwrap()
    }

    fn context() -> RequestContext {
        RequestContext::new(
            Map::new(),
            Extensions::new(),
            BatchLoader::new(Arc::new(FetcherRegistry::new())),
            Cancellation::default(),
        )
    }

    #[tokio::test]
    async fn test_unregistered_field_type_is_an_internal_error() {
        let plan = QueryPlanCompiler::new(&bookshelf())
            .compile_str("{ book { title } }", None, &Map::new())
            .unwrap();
        // Same root, but Book is gone
        let other = SchemaBuilder::new()
            .register(TypeDescriptor::object("Query").field(FieldDescriptor::new("hello", "String")))
            .build()
            .unwrap();
        let ctx = context();

        let outcome = Executor::new(&other, &plan, &ctx).execute().await;

        assert_eq!(outcome.data, json!({"book": null}));
        assert_eq!(outcome.errors.len(), 1);
        assert_eq!(outcome.errors[0].code, "INTERNAL_ERROR");
        assert!(outcome.errors[0].message.starts_with("Internal error"));
    }

    #[tokio::test]
    async fn test_unregistered_root_type_is_an_internal_error() {
        let plan = QueryPlanCompiler::new(&bookshelf())
            .compile_str("{ book { title } }", None, &Map::new())
            .unwrap();
        let other = SchemaBuilder::new()
            .register(TypeDescriptor::object("Root").field(FieldDescriptor::new("hello", "String")))
            .query_type("Root")
            .build()
            .unwrap();
        let ctx = context();

        let outcome = Executor::new(&other, &plan, &ctx).execute().await;

        assert_eq!(outcome.data, Value::Null);
        assert_eq!(outcome.errors.len(), 1);
        assert_eq!(outcome.errors[0].code, "INTERNAL_ERROR");
    }

    #[test]
    fn test_coerce_scalar() {
        assert_eq!(coerce_scalar("Int", json!(3)).unwrap(), json!(3));
        assert_eq!(coerce_scalar("Int", json!(3.0)).unwrap(), json!(3));
        assert!(coerce_scalar("Int", json!(3.5)).is_err());
        assert!(coerce_scalar("Int", json!(i64::MAX)).is_err());
        assert!(coerce_scalar("Int", json!("3")).is_err());
        assert_eq!(coerce_scalar("Float", json!(2)).unwrap(), json!(2.0));
        assert_eq!(coerce_scalar("String", json!(true)).unwrap(), json!("true"));
        assert!(coerce_scalar("Boolean", json!(1)).is_err());
        assert_eq!(coerce_scalar("ID", json!(42)).unwrap(), json!("42"));
        assert!(coerce_scalar("ID", json!(1.5)).is_err());
        assert_eq!(coerce_scalar("DateTime", json!({"raw": 1})).unwrap(), json!({"raw": 1}));
    }
}
