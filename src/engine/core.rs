//! The engine facade: request in, response out
//!
//! `GraphQLEngine` holds everything shared between requests (schema,
//! fetchers, service directory, plan cache, config) and is meant to live
//! behind an `Arc`. Each call to [`GraphQLEngine::execute`] builds its own
//! request context, loader and result tree.

use super::builder::EngineBuilder;
use crate::config::EngineConfig;
use crate::core::cancellation::Cancellation;
use crate::core::context::{Extensions, RequestContext};
use crate::core::error::EngineError;
use crate::core::response::{GraphQLError, Response};
use crate::execution::Executor;
use crate::federation::{FederatedData, FederationExecutor, FederationPlanner, ServiceDirectory};
use crate::loader::{BatchLoader, FetcherRegistry};
use crate::plan::{ExecutionPlan, OperationKind, PlanCache, QueryPlanCompiler};
use crate::schema::SchemaRegistry;
use serde_json::{Map, Value};
use std::any::Any;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;
use uuid::Uuid;

/// One GraphQL request as handed over by the transport
#[derive(Debug, Default)]
pub struct Request {
    pub query: String,
    pub operation_name: Option<String>,
    pub variables: Map<String, Value>,
    /// Overrides the configured default timeout
    pub timeout: Option<Duration>,
    pub cancellation: Option<CancellationToken>,
    pub extensions: Extensions,
}

impl Request {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            ..Self::default()
        }
    }

    pub fn operation_name(mut self, name: impl Into<String>) -> Self {
        self.operation_name = Some(name.into());
        self
    }

    pub fn variables(mut self, variables: Map<String, Value>) -> Self {
        self.variables = variables;
        self
    }

    pub fn variable(mut self, name: impl Into<String>, value: Value) -> Self {
        self.variables.insert(name.into(), value);
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = Some(token);
        self
    }

    /// Attach request-scoped data readable by resolvers through
    /// `ResolverContext::data`
    pub fn data<T: Any + Send + Sync>(mut self, value: T) -> Self {
        self.extensions.insert(value);
        self
    }
}

/// Compiles and executes GraphQL requests against one schema
pub struct GraphQLEngine {
    schema: Arc<SchemaRegistry>,
    fetchers: Arc<FetcherRegistry>,
    directory: Arc<ServiceDirectory>,
    plans: PlanCache,
    config: EngineConfig,
}

impl GraphQLEngine {
    pub fn builder() -> EngineBuilder {
        EngineBuilder::new()
    }

    pub(crate) fn from_builder_components(
        schema: SchemaRegistry,
        fetchers: FetcherRegistry,
        directory: ServiceDirectory,
        config: EngineConfig,
    ) -> Self {
        Self {
            schema: Arc::new(schema),
            fetchers: Arc::new(fetchers),
            directory: Arc::new(directory),
            plans: PlanCache::new(config.plan_cache_capacity),
            config,
        }
    }

    pub fn schema(&self) -> &SchemaRegistry {
        &self.schema
    }

    pub fn directory(&self) -> &ServiceDirectory {
        &self.directory
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn plan_cache(&self) -> &PlanCache {
        &self.plans
    }

    /// Compile a request into a plan, or fetch it from the cache
    ///
    /// Federated plans are planned here as well, so a cached plan carries
    /// its fetch groups.
    pub fn prepare(
        &self,
        query: &str,
        operation_name: Option<&str>,
        variables: &Map<String, Value>,
    ) -> Result<Arc<ExecutionPlan>, EngineError> {
        let fingerprint = PlanCache::fingerprint(query, operation_name, variables);
        let plan = self.plans.get_or_compile(fingerprint, || {
            let mut plan = QueryPlanCompiler::new(&self.schema)
                .with_limits(self.config.plan_limits())
                .compile_str(query, operation_name, variables)?;
            if plan.has_service_nodes() {
                match plan.operation() {
                    OperationKind::Query => {
                        let federated = FederationPlanner::new(&self.schema, &plan, &self.directory).build()?;
                        plan.set_federation(federated);
                    }
                    // Each root is fetched at its turn, never ahead of an
                    // earlier local mutation
                    OperationKind::Mutation => {
                        for roots in plan.root_groups() {
                            let federated =
                                FederationPlanner::new(&self.schema, &plan, &self.directory).build_roots(&roots)?;
                            if let Some(federated) = federated {
                                plan.set_root_federation(roots[0], federated);
                            }
                        }
                    }
                }
            }
            Ok(plan)
        })?;
        Ok(plan)
    }

    /// Execute one request
    ///
    /// Never fails: compile errors come back as a response with null data,
    /// runtime errors as entries of `errors` next to the partial data.
    pub async fn execute(&self, request: Request) -> Response {
        let request_id = Uuid::new_v4();
        let span = tracing::info_span!(
            "graphql.request",
            request_id = %request_id,
            operation = request.operation_name.as_deref().unwrap_or_default(),
        );
        self.execute_request(request, request_id).instrument(span).await
    }

    async fn execute_request(&self, request: Request, request_id: Uuid) -> Response {
        let started = std::time::Instant::now();
        let plan = match self.prepare(&request.query, request.operation_name.as_deref(), &request.variables) {
            Ok(plan) => plan,
            Err(e) => {
                tracing::debug!(error = %e, code = e.error_code(), "request rejected");
                return Response::from_error(&e);
            }
        };

        let mut cancellation = Cancellation::new(request.cancellation.unwrap_or_default());
        if let Some(timeout) = request.timeout.or_else(|| self.config.timeout()) {
            cancellation = cancellation.with_timeout(timeout);
        }
        let loader = BatchLoader::new(self.fetchers.clone()).with_max_batch_size(self.config.max_batch_size);
        let ctx = RequestContext::new(plan.variables().clone(), request.extensions, loader, cancellation)
            .with_request_id(request_id);

        let prefetched = match plan.federation() {
            Some(federated) => self.fetch_federated(&plan, federated, &ctx).await,
            None => None,
        };

        let federation =
            FederationExecutor::new(&self.schema, &self.directory).with_max_batch_size(self.config.max_batch_size);
        let mut executor = Executor::new(&self.schema, &plan, &ctx).with_federation(federation);
        if let Some(data) = prefetched {
            executor = executor.with_prefetched(data);
        }
        let outcome = executor.execute().await;

        let mut errors: Vec<GraphQLError> = outcome.errors.into_iter().map(GraphQLError::from).collect();
        if let Some(reason) = outcome.interrupted {
            errors.push(GraphQLError::from(&reason.to_error()));
        }

        tracing::debug!(
            nodes = plan.nodes().len(),
            errors = errors.len(),
            fetch_calls = ctx.loader().fetch_calls(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "request completed"
        );
        Response::new(outcome.data, errors)
    }

    /// Run the federated fetches, unless the request is interrupted first
    async fn fetch_federated(
        &self,
        plan: &ExecutionPlan,
        federated: &crate::federation::FederatedPlan,
        ctx: &RequestContext,
    ) -> Option<FederatedData> {
        let executor = FederationExecutor::new(&self.schema, &self.directory)
            .with_max_batch_size(self.config.max_batch_size);
        tokio::select! {
            biased;
            reason = ctx.cancellation().interrupted() => {
                tracing::debug!(?reason, "federated fetches abandoned");
                None
            }
            data = executor.execute(plan, federated) => Some(data),
        }
    }
}

impl std::fmt::Debug for GraphQLEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GraphQLEngine")
            .field("types", &self.schema.types().count())
            .field("services", &self.directory.names())
            .field("plans", &self.plans)
            .field("config", &self.config)
            .finish()
    }
}
